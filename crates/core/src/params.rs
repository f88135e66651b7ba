//! Search parameters and finder configuration.

use crate::blob::TabState;
use crate::geom::Point;
use crate::vector::Alignment;

/// Fraction of resolution used as alignment tolerance for aligned tabs.
pub const ALIGNED_FRACTION: f64 = 0.03125;
/// Fraction of resolution used as alignment tolerance for ragged tabs.
pub const RAGGED_FRACTION: f64 = 2.5;
/// Fraction of height used as a minimum gutter gap for aligned blobs.
pub const ALIGNED_GAP_FRACTION: f64 = 0.75;
/// Fraction of height used as a minimum gutter gap for ragged tabs.
pub const RAGGED_GAP_FRACTION: f64 = 1.0;
/// Alignment tolerance in pixels for rule-line finding.
pub const VLINE_ALIGNMENT: i32 = 3;
/// Gutter gap tolerance in pixels for rule-line finding.
pub const VLINE_GUTTER: i32 = 1;
/// Vertical search limit in pixels for rule-line finding.
pub const VLINE_SEARCH_SIZE: i32 = 150;
/// Minimum height in pixels of a rule line.
pub const VLINE_MIN_LENGTH: i32 = 300;
/// Min number of points to accept for a ragged tab stop.
pub const MIN_RAGGED_TABS: usize = 5;
/// Min number of points to accept for an aligned tab stop.
pub const MIN_ALIGNED_TABS: usize = 4;
/// Minimum gradient of an accepted tab vector: tan(90deg - max skew).
/// Chains flatter than this are junk unless they cross rule lines.
pub const MIN_TAB_GRADIENT: i32 = 4;
/// Divisor applied to a length to get the skew tolerance added on top of
/// the current vertical estimate. 60/15 is roughly 4 degrees.
pub const MAX_SKEW_FACTOR: i32 = 15;

/// Immutable parameter set for one alignment-chasing search.
#[derive(Debug, Clone)]
pub struct AlignParams {
    /// The kind of tab stop being sought.
    pub alignment: Alignment,
    /// True when seeking right edges.
    pub right_tab: bool,
    /// True for a ragged-edge search.
    pub ragged: bool,
    /// State written to every accepted point's edge.
    pub confirmed_type: TabState,
    /// Tolerance to misalignment on the gutter side of the anchor.
    pub l_align_tolerance: i32,
    /// Tolerance to misalignment on the text side of the anchor.
    pub r_align_tolerance: i32,
    /// Required blank zone beyond the edge.
    pub min_gutter: i32,
    /// Fraction of a neighbour's height that counts as its gutter zone.
    pub gutter_fraction: f64,
    /// Maximum vertical gap before the chain is called ended.
    pub max_v_gap: i32,
    /// Minimum number of chained points for acceptance.
    pub min_points: usize,
    /// Minimum accepted y-span.
    pub min_length: i32,
    /// Current estimate of the page's vertical direction.
    pub vertical: Point,
}

impl AlignParams {
    /// Parameters for finding text tab stops. Tolerances come from the
    /// image resolution; the vertical-gap limit from the seed blob height
    /// times `v_gap_multiple`.
    pub fn for_tab_search(
        vertical: Point,
        height: i32,
        v_gap_multiple: i32,
        min_gutter_width: i32,
        resolution: i32,
        alignment: Alignment,
    ) -> Self {
        let right_tab = matches!(alignment, Alignment::RightAligned | Alignment::RightRagged);
        let ragged = matches!(alignment, Alignment::LeftRagged | Alignment::RightRagged);
        let aligned_tol = (f64::from(resolution) * ALIGNED_FRACTION + 0.5) as i32;
        let ragged_tol = (f64::from(resolution) * RAGGED_FRACTION + 0.5) as i32;
        let (l_align_tolerance, r_align_tolerance, gutter_fraction, min_points) = if ragged {
            // A ragged edge is very generous with the inside alignment
            // tolerance, but requires a much bigger gutter.
            if right_tab {
                (ragged_tol, aligned_tol, RAGGED_GAP_FRACTION, MIN_RAGGED_TABS)
            } else {
                (aligned_tol, ragged_tol, RAGGED_GAP_FRACTION, MIN_RAGGED_TABS)
            }
        } else {
            (aligned_tol, aligned_tol, ALIGNED_GAP_FRACTION, MIN_ALIGNED_TABS)
        };
        let min_gutter =
            ((f64::from(height) * gutter_fraction + 0.5) as i32).max(min_gutter_width);
        Self {
            alignment,
            right_tab,
            ragged,
            confirmed_type: TabState::Confirmed,
            l_align_tolerance,
            r_align_tolerance,
            min_gutter,
            gutter_fraction,
            max_v_gap: height * v_gap_multiple,
            min_points,
            min_length: 0,
            vertical,
        }
    }

    /// Parameters for chasing a separator rule line of the given width.
    pub fn for_line_search(vertical: Point, width: i32) -> Self {
        Self {
            alignment: Alignment::Separator,
            right_tab: false,
            ragged: false,
            confirmed_type: TabState::Confirmed,
            l_align_tolerance: VLINE_ALIGNMENT.max(width),
            r_align_tolerance: VLINE_ALIGNMENT.max(width),
            min_gutter: VLINE_GUTTER,
            gutter_fraction: 0.0,
            max_v_gap: VLINE_SEARCH_SIZE,
            min_points: 1,
            min_length: VLINE_MIN_LENGTH,
            vertical,
        }
    }
}

/// Page-level configuration for the tab finder.
///
/// Controls the tolerances the orchestrator feeds into classification and
/// the width-statistics and deskew gates.
#[derive(Debug, Clone, PartialEq)]
pub struct FinderConfig {
    /// Pixel size of a grid cell.
    pub gridsize: i32,
    /// Widens the blank zone required beyond an edge before it can be a
    /// tab candidate. Zero leaves the height-derived default.
    pub min_gutter_width: i32,
    /// Fraction of blob height required clear beside an aligned candidate.
    pub aligned_gap_fraction: f64,
    /// Multiple of blob height searched vertically by the ragged pass.
    pub ragged_search_multiple: i32,
    /// Deskew aborts when the rotation cosine drops below this.
    pub min_skew_cosine: f64,
    /// Minimum number of text lines for an accepted column-width peak.
    pub min_lines_in_column: i32,
    /// Minimum fraction of all measured lines for an accepted peak.
    pub min_fraction_lines_in_column: f64,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            gridsize: 16,
            min_gutter_width: 0,
            aligned_gap_fraction: ALIGNED_GAP_FRACTION,
            ragged_search_multiple: 25,
            min_skew_cosine: 0.866025,
            min_lines_in_column: 10,
            min_fraction_lines_in_column: 0.125,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_params_symmetric_tolerances() {
        let p = AlignParams::for_tab_search(
            Point::new(0, 1),
            20,
            12,
            0,
            300,
            Alignment::LeftAligned,
        );
        assert!(!p.right_tab);
        assert!(!p.ragged);
        assert_eq!(p.l_align_tolerance, p.r_align_tolerance);
        assert_eq!(p.l_align_tolerance, 9); // 300 * 0.03125 rounded
        assert_eq!(p.min_gutter, 15); // 20 * 0.75
        assert_eq!(p.max_v_gap, 240);
        assert_eq!(p.min_points, MIN_ALIGNED_TABS);
    }

    #[test]
    fn test_ragged_params_widen_inside_tolerance() {
        let p = AlignParams::for_tab_search(
            Point::new(0, 1),
            20,
            25,
            0,
            300,
            Alignment::RightRagged,
        );
        assert!(p.right_tab);
        assert!(p.ragged);
        // Inside (left) tolerance is the generous one for a right tab.
        assert!(p.l_align_tolerance > p.r_align_tolerance);
        assert_eq!(p.min_points, MIN_RAGGED_TABS);
        assert_eq!(p.min_gutter, 20); // 20 * 1.0
    }

    #[test]
    fn test_min_gutter_override_wins() {
        let p = AlignParams::for_tab_search(
            Point::new(0, 1),
            20,
            12,
            64,
            300,
            Alignment::LeftAligned,
        );
        assert_eq!(p.min_gutter, 64);
    }

    #[test]
    fn test_line_search_params() {
        let p = AlignParams::for_line_search(Point::new(0, 1), 2);
        assert_eq!(p.alignment, Alignment::Separator);
        assert_eq!(p.l_align_tolerance, VLINE_ALIGNMENT);
        assert_eq!(p.min_length, VLINE_MIN_LENGTH);
        assert_eq!(p.min_points, 1);
    }
}
