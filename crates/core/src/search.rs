//! Greedy vertical alignment chasing.
//!
//! From a seed blob, the search walks the grid up and then down, chaining
//! blobs whose relevant edges line up within tolerance, and decides whether
//! the chain qualifies as a tab stop. Forward progress is guaranteed by
//! requiring strictly advancing y at every step, which bounds the walk by
//! the blob count.

use tracing::debug;

use crate::blob::{BlobId, BlobSet, TabState};
use crate::debug::DebugContext;
use crate::geom::Point;
use crate::grid::{BucketGrid, VerticalDir};
use crate::params::{AlignParams, MAX_SKEW_FACTOR, MIN_TAB_GRADIENT};
use crate::vector::TabVector;

/// Finds a vector of vertically aligned blob edges running through the
/// seed blob. The vector kind and tolerances come from `params`.
///
/// `vertical_sum` accumulates the fitted directions of non-ragged vectors,
/// weighted by point count, for the caller's global skew estimate.
pub fn find_vertical_alignment(
    grid: &BucketGrid,
    blobs: &mut BlobSet,
    params: &AlignParams,
    seed: BlobId,
    vertical_sum: &mut Point,
    dbg: &DebugContext,
) -> Option<TabVector> {
    let mut points: Vec<BlobId> = Vec::new();
    // Search up, then down, from the seed.
    let (count_up, ext_end_y) = align_tabs(grid, blobs, params, seed, false, &mut points, dbg);
    let (count_down, ext_start_y) = align_tabs(grid, blobs, params, seed, true, &mut points, dbg);
    let pt_count = count_up + count_down;
    debug_assert!(!points.is_empty(), "seed must qualify for its own search");
    let first = blobs.bounds(*points.first()?);
    let last = blobs.bounds(*points.last()?);
    let start_y = first.bottom;
    let end_y = last.top;
    let start_x = if params.right_tab { first.right } else { first.left };
    let end_x = if params.right_tab { last.right } else { last.left };

    // Acceptable tab vectors need a minimum number of points, a minimum
    // length and a minimum gradient (the gradient bounds the implied skew
    // angle). Ragged chains end up parallel to the vertical anyway, so
    // they skip the gradient test. A chain crossing at least two rule
    // lines is accepted regardless: it is separator evidence.
    let crossings: i32 = points.iter().map(|&id| blobs.get(id).line_crossings).sum();
    let at_least_2_crossings = crossings >= 2;
    let span = end_y - start_y;
    let passes = pt_count >= params.min_points
        && span >= params.min_length
        && (params.ragged || span >= (end_x - start_x).abs() * MIN_TAB_GRADIENT);
    if !(passes || at_least_2_crossings) {
        if dbg.active(2, first.left, first.bottom) {
            debug!(
                pt_count,
                span,
                min_points = params.min_points,
                min_length = params.min_length,
                "tab vector failed basic tests"
            );
        }
        return None;
    }
    // Ragged chains may not re-harvest text that a previous aligned search
    // already confirmed.
    let confirmed_points = points
        .iter()
        .filter(|&&id| blobs.get(id).tab_state(params.right_tab) == params.confirmed_type)
        .count();
    if params.ragged && confirmed_points * 2 >= pt_count {
        if dbg.active(2, first.left, first.bottom) {
            debug!(confirmed_points, pt_count, "ragged tab reused too many points");
        }
        return None;
    }
    if dbg.active(2, first.left, first.bottom) {
        debug!(
            pt_count,
            x = first.left,
            y = first.bottom,
            "confirming tab vector"
        );
    }
    for &id in &points {
        blobs
            .get_mut(id)
            .set_tab_state(params.right_tab, params.confirmed_type);
    }
    let mut vector = TabVector::from_boxes(params.alignment, ext_start_y, ext_end_y, points);
    if !vector.fit(params.vertical, false, blobs) {
        return None;
    }
    vector.intersects_other_lines = at_least_2_crossings;
    if !vector.is_ragged() {
        let direction = vector.end - vector.start;
        let weight = vector.box_count() as i32;
        vertical_sum.x += direction.x * weight;
        vertical_sum.y += direction.y * weight;
    }
    Some(vector)
}

/// Walk in one direction from the seed, accumulating aligned blobs into
/// `points` (prepended when walking down, appended when walking up, so the
/// combined list stays in increasing-y order). Returns the number of blobs
/// added and the extended boundary y reached.
fn align_tabs(
    grid: &BucketGrid,
    blobs: &mut BlobSet,
    params: &AlignParams,
    seed: BlobId,
    top_to_bottom: bool,
    points: &mut Vec<BlobId>,
    dbg: &DebugContext,
) -> (usize, i32) {
    let mut count = 0usize;
    let mut current = seed;
    let mut x_start = blobs.get(seed).tab_edge(params.right_tab);
    let seed_bounds = blobs.bounds(seed);
    let mut end_y = if top_to_bottom {
        seed_bounds.bottom - params.max_v_gap
    } else {
        seed_bounds.top + params.max_v_gap
    };
    if dbg.active(2, x_start, seed_bounds.bottom) {
        debug!(
            top_to_bottom,
            x_start,
            ragged = params.ragged,
            "starting alignment run"
        );
    }
    loop {
        let state = blobs.get(current).tab_state(params.right_tab);
        let qualifies =
            (state != TabState::None && state != TabState::MaybeRagged) || params.ragged;
        let duplicate = if top_to_bottom {
            points.first() == Some(&current)
        } else {
            points.last() == Some(&current)
        };
        if qualifies && !duplicate {
            if top_to_bottom {
                points.insert(0, current);
            } else {
                points.push(current);
            }
            count += 1;
        }
        // find_aligned_blob guarantees strictly advancing y in the search
        // direction, so this loop terminates.
        let (next, boundary) =
            find_aligned_blob(grid, blobs, params, top_to_bottom, current, x_start, dbg);
        end_y = boundary;
        match next {
            Some(id) => {
                if !params.ragged {
                    x_start = blobs.get(id).tab_edge(params.right_tab);
                }
                current = id;
            }
            None => break,
        }
    }
    if dbg.active(2, x_start, seed_bounds.bottom) {
        debug!(count, end_y, "alignment run ended");
    }
    (count, end_y)
}

/// Search vertically for the next blob aligned with `current`.
///
/// Returns the found blob (or None) plus the boundary y: the edge of the
/// search range, or the leading edge of a gutter blob if one ended the
/// line. Finding a box in the gutter also downgrades the current blob's
/// candidate edge to Deleted.
fn find_aligned_blob(
    grid: &BucketGrid,
    blobs: &mut BlobSet,
    params: &AlignParams,
    top_to_bottom: bool,
    current: BlobId,
    x_start: i32,
    dbg: &DebugContext,
) -> (Option<BlobId>, i32) {
    let bounds = blobs.bounds(current);
    let start_y = if top_to_bottom {
        bounds.bottom
    } else {
        bounds.top
    };
    let debug_here = dbg.active(2, x_start, start_y);
    // The search box spans from the current edge to max_v_gap away, leaning
    // with the vertical estimate, widened by a skew tolerance on top of it.
    let skew_tolerance = params.max_v_gap / MAX_SKEW_FACTOR;
    let lean = (params.max_v_gap * params.vertical.x + params.vertical.y / 2) / params.vertical.y;
    let (x2, mut end_y) = if top_to_bottom {
        (x_start - lean, start_y - params.max_v_gap)
    } else {
        (x_start + lean, start_y + params.max_v_gap)
    };
    let mut xmin = x_start.min(x2) - skew_tolerance;
    let mut xmax = x_start.max(x2) + skew_tolerance;
    if params.right_tab {
        xmax += params.min_gutter;
        xmin -= params.l_align_tolerance;
    } else {
        xmax += params.r_align_tolerance;
        xmin -= params.min_gutter;
    }
    if debug_here {
        debug!(
            xmin,
            xmax,
            start_y,
            search_size = params.max_v_gap,
            gutter = params.min_gutter,
            right = params.right_tab,
            ragged = params.ragged,
            "starting vertical search"
        );
    }
    let dir = if top_to_bottom {
        VerticalDir::Down
    } else {
        VerticalDir::Up
    };
    let mut search = grid.search_vertical(xmin, xmax, start_y, dir);
    // result is the best marked tab candidate; backup is the best aligned
    // non-candidate, used only if no result ever appears.
    let mut result: Option<BlobId> = None;
    let mut backup: Option<BlobId> = None;
    while let Some(entry) = search.next() {
        if entry.id == current {
            continue;
        }
        let nbox = entry.bounds;
        let n_y = nbox.mid_y();
        if (!top_to_bottom && n_y > start_y + params.max_v_gap)
            || (top_to_bottom && n_y < start_y - params.max_v_gap)
        {
            break; // Gone far enough.
        }
        // Forward progress must be strict, or the caller could loop
        // forever waiting for a line of same-y blobs to end.
        if ((n_y < start_y) != top_to_bottom) || nbox.y_overlaps(&bounds) {
            continue;
        }
        if let Some(r) = result {
            if blobs.bounds(r).y_gap(&nbox) > grid.gridsize() {
                return (Some(r), end_y); // No closer candidate can exist.
            }
        }
        if params.ragged && result.is_none() {
            if let Some(b) = backup {
                if blobs.bounds(b).y_gap(&nbox) > grid.gridsize() {
                    return (Some(b), end_y);
                }
            }
        }
        // A neighbour on the wrong side of a separator line does not
        // exist as far as this search is concerned.
        let x_at_n_y = x_start + (n_y - start_y) * params.vertical.x / params.vertical.y;
        let neighbour = blobs.get(entry.id);
        if x_at_n_y < neighbour.left_crossing_rule || x_at_n_y > neighbour.right_crossing_rule {
            continue;
        }
        let n_x = if params.right_tab {
            nbox.right
        } else {
            nbox.left
        };
        if debug_here {
            debug!(n_x, n_y, x_at_n_y, "considering neighbour");
        }
        let gutter_height = (params.gutter_fraction * f64::from(nbox.height())) as i32;
        if params.right_tab
            && nbox.left < x_at_n_y + params.min_gutter
            && nbox.right > x_at_n_y + params.r_align_tolerance
            && (params.ragged || nbox.left < x_at_n_y + gutter_height)
        {
            // A box in the gutter, so end of line.
            if blobs.get(current).right_tab >= TabState::MaybeAligned {
                blobs.get_mut(current).right_tab = TabState::Deleted;
            }
            end_y = if top_to_bottom { nbox.top } else { nbox.bottom };
            if debug_here {
                debug!(end_y, "gutter");
            }
            return (None, end_y);
        }
        if !params.right_tab
            && nbox.left < x_at_n_y - params.l_align_tolerance
            && nbox.right > x_at_n_y - params.min_gutter
            && (params.ragged || nbox.right > x_at_n_y - gutter_height)
        {
            if blobs.get(current).left_tab >= TabState::MaybeAligned {
                blobs.get_mut(current).left_tab = TabState::Deleted;
            }
            end_y = if top_to_bottom { nbox.top } else { nbox.bottom };
            if debug_here {
                debug!(end_y, "gutter");
            }
            return (None, end_y);
        }
        if blobs.get(entry.id).leader_on(params.right_tab) {
            continue; // Neighbours of leaders may not be used.
        }
        if n_x <= x_at_n_y + params.r_align_tolerance && n_x >= x_at_n_y - params.l_align_tolerance
        {
            // Aligned, so keep it: as the result if it is a marked tab
            // candidate, else as the backup.
            let n_state = blobs.get(entry.id).tab_state(params.right_tab);
            if n_state != TabState::None && (params.ragged || n_state != TabState::MaybeRagged) {
                match result {
                    None => result = Some(entry.id),
                    Some(r) => {
                        // Keep the Euclidean-nearest candidate; this stops
                        // the search from jumping to a tab in another
                        // column.
                        let old = blobs.bounds(r);
                        let old_x = if params.right_tab { old.right } else { old.left };
                        let old_dx = i64::from(old_x - x_at_n_y);
                        let old_dy = i64::from(old.mid_y() - start_y);
                        let new_dx = i64::from(n_x - x_at_n_y);
                        let new_dy = i64::from(n_y - start_y);
                        if new_dx * new_dx + new_dy * new_dy < old_dx * old_dx + old_dy * old_dy {
                            result = Some(entry.id);
                        }
                    }
                }
            } else {
                match backup {
                    None => backup = Some(entry.id),
                    Some(b) => {
                        // Backups prefer the edge reaching furthest
                        // outward, unlike results.
                        let bbox = blobs.bounds(b);
                        let better = if params.right_tab {
                            bbox.right < nbox.right
                        } else {
                            bbox.left > nbox.left
                        };
                        if better {
                            backup = Some(entry.id);
                        }
                    }
                }
            }
        }
    }
    (result.or(backup), end_y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::Blob;
    use crate::geom::BBox;
    use crate::vector::Alignment;

    const DBG: DebugContext = DebugContext::INACTIVE;

    fn setup(boxes: &[BBox]) -> (BucketGrid, BlobSet, Vec<BlobId>) {
        let mut blobs = BlobSet::new();
        let ids: Vec<BlobId> = boxes.iter().map(|&b| blobs.push(Blob::new(b))).collect();
        let extent = blobs.extent().unwrap();
        let mut grid = BucketGrid::new(
            16,
            Point::new(extent.left - 32, extent.bottom - 32),
            Point::new(extent.right + 32, extent.top + 32),
        );
        for &id in &ids {
            grid.insert(id, blobs.bounds(id), true, false);
        }
        (grid, blobs, ids)
    }

    fn aligned_left_params() -> AlignParams {
        AlignParams::for_tab_search(Point::new(0, 1), 20, 12, 0, 300, Alignment::LeftAligned)
    }

    #[test]
    fn test_short_chain_rejected_then_accepted() {
        // Three boxes of height 20 spaced 25 apart, aligned at x=100 +/- 1:
        // rejected with min_points = 4; a fourth aligned box flips it.
        let boxes = [
            BBox::new(100, 0, 140, 20),
            BBox::new(101, 25, 141, 45),
            BBox::new(99, 50, 139, 70),
        ];
        let (grid, mut blobs, ids) = setup(&boxes);
        for &id in &ids {
            blobs.get_mut(id).left_tab = TabState::MaybeAligned;
        }
        let params = aligned_left_params();
        let mut vsum = Point::default();
        assert!(
            find_vertical_alignment(&grid, &mut blobs, &params, ids[0], &mut vsum, &DBG).is_none()
        );

        let boxes4 = [
            BBox::new(100, 0, 140, 20),
            BBox::new(101, 25, 141, 45),
            BBox::new(99, 50, 139, 70),
            BBox::new(100, 75, 140, 95),
        ];
        let (grid, mut blobs, ids) = setup(&boxes4);
        for &id in &ids {
            blobs.get_mut(id).left_tab = TabState::MaybeAligned;
        }
        let mut vsum = Point::default();
        let vector =
            find_vertical_alignment(&grid, &mut blobs, &params, ids[0], &mut vsum, &DBG).unwrap();
        assert_eq!(vector.box_count(), 4);
        assert!(vector.start.y <= 0 && vector.end.y >= 95);
        // All chained edges were confirmed.
        for &id in &ids {
            assert_eq!(blobs.get(id).left_tab, TabState::Confirmed);
        }
        // The fitted direction fed the skew estimate.
        assert!(vsum.y > 0);
    }

    #[test]
    fn test_gutter_box_short_circuits_search() {
        // Seed at (100,100)-(120,120); a box at (130,140)-(170,160) sits in
        // the gutter of a right-edge search with min_gutter 20 and must
        // terminate the upward walk at y=140.
        let boxes = [
            BBox::new(100, 100, 120, 120),
            BBox::new(130, 140, 170, 160),
        ];
        let (grid, mut blobs, ids) = setup(&boxes);
        blobs.get_mut(ids[0]).right_tab = TabState::MaybeAligned;
        let mut params = AlignParams::for_tab_search(
            Point::new(0, 1),
            20,
            12,
            20,
            300,
            Alignment::RightAligned,
        );
        params.min_gutter = 20;
        let (found, end_y) =
            find_aligned_blob(&grid, &mut blobs, &params, false, ids[0], 120, &DBG);
        assert_eq!(found, None);
        assert_eq!(end_y, 140);
        // The seed's candidate edge was downgraded.
        assert_eq!(blobs.get(ids[0]).right_tab, TabState::Deleted);
    }

    #[test]
    fn test_same_y_duplicates_terminate() {
        // Pathological same-y boxes must not loop: y never advances, so
        // the walk stops after the seed.
        let boxes = [
            BBox::new(100, 0, 140, 20),
            BBox::new(100, 0, 140, 20),
            BBox::new(100, 5, 140, 18),
        ];
        let (grid, mut blobs, ids) = setup(&boxes);
        for &id in &ids {
            blobs.get_mut(id).left_tab = TabState::MaybeAligned;
        }
        let params = aligned_left_params();
        let mut vsum = Point::default();
        let result =
            find_vertical_alignment(&grid, &mut blobs, &params, ids[0], &mut vsum, &DBG);
        assert!(result.is_none());
    }

    #[test]
    fn test_ragged_search_chains_unmarked_blobs() {
        // Ragged-left: edges need not align tightly and unmarked blobs
        // still join the chain. Lines sit more than a grid cell apart so
        // each step settles on the nearest row before scanning further.
        let boxes = [
            BBox::new(100, 0, 300, 20),
            BBox::new(130, 50, 300, 70),
            BBox::new(110, 100, 300, 120),
            BBox::new(150, 150, 300, 170),
            BBox::new(105, 200, 300, 220),
        ];
        let (grid, mut blobs, ids) = setup(&boxes);
        blobs.get_mut(ids[0]).left_tab = TabState::MaybeRagged;
        let params = AlignParams::for_tab_search(
            Point::new(0, 1),
            20,
            25,
            0,
            300,
            Alignment::LeftRagged,
        );
        let mut vsum = Point::default();
        let vector =
            find_vertical_alignment(&grid, &mut blobs, &params, ids[0], &mut vsum, &DBG)
                .expect("ragged chain should qualify");
        assert_eq!(vector.box_count(), 5);
        assert!(vector.is_ragged());
        // Ragged fits do not contribute to the skew estimate.
        assert_eq!(vsum, Point::default());
    }

    #[test]
    fn test_marked_candidate_beats_backup() {
        // Two aligned continuations: an unmarked one nearer and a marked
        // tab candidate further away. The marked one wins.
        let boxes = [
            BBox::new(100, 0, 140, 20),
            BBox::new(100, 25, 140, 45),
            BBox::new(100, 55, 140, 75),
        ];
        let (grid, mut blobs, ids) = setup(&boxes);
        blobs.get_mut(ids[0]).left_tab = TabState::MaybeAligned;
        blobs.get_mut(ids[2]).left_tab = TabState::MaybeAligned;
        let params = aligned_left_params();
        let (found, _) = find_aligned_blob(&grid, &mut blobs, &params, false, ids[0], 100, &DBG);
        assert_eq!(found, Some(ids[2]));
    }
}
