//! Page-level orchestration of tab-stop detection.
//!
//! The [`TabFinder`] owns the spatial grid and the vector list for one
//! page. Given the caller's blobs it classifies candidate edges, estimates
//! the page's vertical direction, runs the alignment searches, merges and
//! prunes the resulting vectors, deskews the page, reconciles partnered
//! vector endpoints, and aggregates column-width statistics.

use tracing::debug;

use crate::blob::{BlobId, BlobSet, TabState};
use crate::constraint::ConstraintPool;
use crate::debug::DebugContext;
use crate::error::{Result, TabFindError};
use crate::geom::{nearly_equal, BBox, Point, Rotation};
use crate::grid::{BucketGrid, SideDir};
use crate::linefit::LeastSquares;
use crate::params::{AlignParams, ALIGNED_FRACTION, FinderConfig};
use crate::search::find_vertical_alignment;
use crate::stats::Histogram;
use crate::vector::{Alignment, TabVector, VectorId, VectorStore};

/// Multiple of box height to search for initial gutter gaps.
const TAB_RADIUS_FACTOR: i32 = 5;
/// Min and max multiple of height to search vertically for aligned tabs.
const MIN_VERTICAL_SEARCH: i32 = 3;
const MAX_VERTICAL_SEARCH: i32 = 12;
/// Multiplier of gridsize for the min gutter of a ragged candidate.
const RAGGED_GUTTER_MULTIPLE: i32 = 5;
/// Minimum width of a column to be interesting.
const MIN_COLUMN_WIDTH: i32 = 200;
/// Quantization factor for column-width statistics.
pub const COLUMN_WIDTH_FACTOR: i32 = 20;
/// Multiplier of new y positions in the running average for line tracing.
const SMOOTH_FACTOR: f64 = 0.25;
/// Min coverage for a good baseline between vectors.
const MIN_BASELINE_COVERAGE: f64 = 0.5;
/// Minimum vertical overlap fraction when chaining text-line blobs.
const CHAR_VERTICAL_OVERLAP_FRACTION: f64 = 0.375;
/// Maximum horizontal gap, as a multiple of height, while tracing.
const MAX_HORIZONTAL_GAP: f64 = 3.0;
/// Maximum baseline fit error as a fraction of mean height.
const MAX_BASELINE_ERROR: f64 = 0.4375;
/// Min number of boxes a vector must keep after evaluation.
const MIN_EVALUATED_TABS: usize = 3;
/// Multiple of mean height used as the evaluation gutter limit.
const GUTTER_MULTIPLE: i32 = 4;
/// The gutter must be this multiple of the inner neighbour gap.
const GUTTER_TO_NEIGHBOUR_RATIO: i32 = 3;
/// Max multiple of box size bridged between good boxes when evaluating.
const MAX_FILLIN_MULTIPLE: i32 = 11;
/// Min fraction of the median gutter allowed on a good tab box.
const MIN_GUTTER_FRACTION: f64 = 0.5;
/// Multiple of 1/n lines in the evaluation minimum gutter.
const LINE_COUNT_RECIPROCAL: f64 = 4.0;
/// Constant add-on to the minimum gutter for aligned tabs.
const MIN_ALIGNED_GUTTER: f64 = 0.25;
/// Constant add-on to the minimum gutter for ragged tabs.
const MIN_RAGGED_GUTTER: f64 = 1.5;
/// Min aspect ratio for a tall blob to be treated as separator residue.
const LINE_FRAGMENT_ASPECT_RATIO: f64 = 10.0;

/// Evidence accumulated on one side of a candidate edge.
///
/// A single disqualifying neighbour (content in the gutter on that side)
/// ends accumulation for good; otherwise aligned neighbours count up and
/// overlapping unaligned neighbours count down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Evidence {
    Disqualified,
    Count(i32),
}

impl Evidence {
    fn add(&mut self, delta: i32) {
        if let Evidence::Count(n) = self {
            *n += delta;
        }
    }

    fn disqualify(&mut self) {
        *self = Evidence::Disqualified;
    }

    fn disqualified(&self) -> bool {
        matches!(self, Evidence::Disqualified)
    }

    /// More than one net aligned neighbour makes the side supporting.
    fn supports(&self) -> bool {
        matches!(self, Evidence::Count(n) if *n > 1)
    }
}

/// An accepted common column width, in quantized units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnWidth {
    /// Width divided by [`COLUMN_WIDTH_FACTOR`].
    pub width: i32,
    /// Number of text lines measured at this width.
    pub line_count: i32,
}

/// The skew-related outputs of a completed run.
#[derive(Debug, Clone, Copy)]
pub struct TabFindOutcome {
    /// Rotation that was applied to cancel the detected skew.
    pub deskew: Rotation,
    /// Inverse rotation, for mapping results back to source coordinates.
    pub reskew: Rotation,
    /// Final vertical-direction estimate (post-deskew this is (0, 1)).
    pub vertical_skew: Point,
}

/// One fitted text-line trace between two tab vectors.
struct TextlineSegment {
    start_pt: Point,
    end_pt: Point,
    left_blob: BlobId,
    right_blob: BlobId,
}

/// Tab-stop finder for a single page.
pub struct TabFinder {
    grid: BucketGrid,
    store: VectorStore,
    vertical_skew: Point,
    resolution: i32,
    config: FinderConfig,
    dbg: DebugContext,
    left_tab_boxes: Vec<BlobId>,
    right_tab_boxes: Vec<BlobId>,
    column_widths: Vec<ColumnWidth>,
}

impl TabFinder {
    /// Create a finder for a page covering `bleft..tright` pixels at the
    /// given scan resolution (dots per inch).
    pub fn new(
        bleft: Point,
        tright: Point,
        resolution: i32,
        config: FinderConfig,
        dbg: DebugContext,
    ) -> Result<Self> {
        if tright.x <= bleft.x || tright.y <= bleft.y {
            return Err(TabFindError::EmptyGridExtent {
                left: bleft.x,
                bottom: bleft.y,
                right: tright.x,
                top: tright.y,
            });
        }
        Ok(Self {
            grid: BucketGrid::new(config.gridsize, bleft, tright),
            store: VectorStore::new(),
            vertical_skew: Point::new(0, 1),
            resolution,
            config,
            dbg,
            left_tab_boxes: Vec::new(),
            right_tab_boxes: Vec::new(),
            column_widths: Vec::new(),
        })
    }

    /// The current vector set, live and dead.
    pub fn vectors(&self) -> &VectorStore {
        &self.store
    }

    pub fn vertical_skew(&self) -> Point {
        self.vertical_skew
    }

    pub fn grid(&self) -> &BucketGrid {
        &self.grid
    }

    /// Accepted common column widths, in quantized units.
    pub fn common_widths(&self) -> &[ColumnWidth] {
        &self.column_widths
    }

    /// True if the given pixel width is close to a common column width.
    pub fn is_common_width(&self, width: i32) -> bool {
        let width = width / COLUMN_WIDTH_FACTOR;
        self.column_widths
            .iter()
            .any(|cw| nearly_equal(width, cw.width, 1))
    }

    /// Run the whole detection pipeline over the caller's blobs.
    ///
    /// `separators` are pre-found rule-line vectors from the external line
    /// finder; they take part in rule-edge computation and may stand in
    /// for missing tab partners. The only hard failure is an implausible
    /// detected skew, which leaves the page un-rotated so the caller can
    /// fall back to a single-column interpretation.
    pub fn find_tab_vectors(
        &mut self,
        blobs: &mut BlobSet,
        separators: Vec<TabVector>,
    ) -> Result<TabFindOutcome> {
        for sep in separators {
            self.store.push(sep);
        }
        self.store.sort();
        self.insert_blobs(blobs);
        self.find_tab_boxes(blobs);
        self.find_all_tab_vectors(blobs);
        self.store
            .merge_similar(self.vertical_skew, Some(&self.grid), blobs);
        self.evaluate_tabs(blobs);
        self.compute_column_widths(blobs);
        self.store
            .merge_similar(self.vertical_skew, Some(&self.grid), blobs);
        self.clean_up_tabs(blobs);
        let (deskew, reskew) = self.deskew_page(blobs)?;
        self.apply_tab_constraints();
        debug!(
            vectors = self.store.live_count(),
            dead = self.store.dead_vectors().len(),
            widths = self.column_widths.len(),
            "tab finding complete"
        );
        Ok(TabFindOutcome {
            deskew,
            reskew,
            vertical_skew: self.vertical_skew,
        })
    }

    /// Insert every blob, stamping its rule edges from the current vectors.
    pub fn insert_blobs(&mut self, blobs: &mut BlobSet) {
        for id in blobs.ids().collect::<Vec<_>>() {
            self.insert_blob(blobs, id, true, false);
        }
    }

    fn insert_blob(&mut self, blobs: &mut BlobSet, id: BlobId, h_spread: bool, v_spread: bool) {
        let bounds = blobs.bounds(id);
        let blob = blobs.get_mut(id);
        blob.left_rule = self.left_edge_for_box(bounds, false, false);
        blob.right_rule = self.right_edge_for_box(bounds, false, false);
        blob.left_crossing_rule = self.left_edge_for_box(bounds, true, false);
        blob.right_crossing_rule = self.right_edge_for_box(bounds, true, false);
        self.grid.insert(id, bounds, h_spread, v_spread);
    }

    /// x-coordinate of the nearest rule/tab line left of the box, or the
    /// page edge if there is none.
    fn left_edge_for_box(&self, bounds: BBox, crossing: bool, extended: bool) -> i32 {
        let page = self.grid.bleft().y..=self.grid.tright().y;
        match self.store.left_tab_for_box(
            bounds,
            self.vertical_skew,
            *page.start(),
            *page.end(),
            crossing,
            extended,
        ) {
            Some(v) => self.store.get(v).x_at_y(bounds.mid_y()),
            None => self.grid.bleft().x,
        }
    }

    fn right_edge_for_box(&self, bounds: BBox, crossing: bool, extended: bool) -> i32 {
        let page = self.grid.bleft().y..=self.grid.tright().y;
        match self.store.right_tab_for_box(
            bounds,
            self.vertical_skew,
            *page.start(),
            *page.end(),
            crossing,
            extended,
        ) {
            Some(v) => self.store.get(v).x_at_y(bounds.mid_y()),
            None => self.grid.tright().x,
        }
    }

    // ------------------------------------------------------------------
    // Classification.
    // ------------------------------------------------------------------

    /// Decide for every blob whether each edge is a tab candidate, and
    /// collect the candidates sorted outermost-first.
    fn find_tab_boxes(&mut self, blobs: &mut BlobSet) {
        self.left_tab_boxes.clear();
        self.right_tab_boxes.clear();
        let mut search = self.grid.search_full();
        let mut found: Vec<BlobId> = Vec::new();
        while let Some(entry) = search.next() {
            found.push(entry.id);
        }
        for id in found {
            if self.test_box_for_tabs(blobs, id) {
                if blobs.get(id).left_tab != TabState::None {
                    self.left_tab_boxes.push(id);
                }
                if blobs.get(id).right_tab != TabState::None {
                    self.right_tab_boxes.push(id);
                }
            }
        }
        // Left tabs sort by left edge and right tabs right-to-left, so a
        // ragged search sees the outermost candidate first.
        self.left_tab_boxes
            .sort_by_key(|&id| blobs.bounds(id).left);
        self.right_tab_boxes
            .sort_by_key(|&id| std::cmp::Reverse(blobs.bounds(id).right));
        debug!(
            left = self.left_tab_boxes.len(),
            right = self.right_tab_boxes.len(),
            "classified tab candidates"
        );
    }

    fn test_box_for_tabs(&self, blobs: &mut BlobSet, id: BlobId) -> bool {
        let blob = blobs.get(id);
        let bounds = blob.bounds;
        let left_column_edge = blob.left_rule;
        let right_column_edge = blob.right_rule;
        let height = bounds.height();
        let debug_here = self.dbg.active(3, bounds.left, bounds.top);
        let radius = (height * TAB_RADIUS_FACTOR + self.grid.gridsize() - 1) / self.grid.gridsize();
        let min_spacing = ((f64::from(height) * self.config.aligned_gap_fraction) as i32)
            .max(self.config.min_gutter_width);
        let min_ragged_gutter =
            (RAGGED_GUTTER_MULTIPLE * self.grid.gridsize()).max(self.config.min_gutter_width);
        let target_right = bounds.left - min_spacing;
        let target_left = bounds.right + min_spacing;
        let alignment_tolerance = (f64::from(self.resolution) * ALIGNED_FRACTION) as i32;

        // An edge is a sure candidate while nothing is found in its gutter
        // at all. Failing that, evidence above and below counts aligned
        // neighbours up and overlapping unaligned ones down; a gutter
        // object on one side disqualifies that side outright.
        let mut is_left_tab = true;
        let mut is_right_tab = true;
        let mut maybe_ragged_left = true;
        let mut maybe_ragged_right = true;
        let mut left_up = Evidence::Count(0);
        let mut left_down = Evidence::Count(0);
        let mut right_up = Evidence::Count(0);
        let mut right_down = Evidence::Count(0);
        if blob.leader_on_left {
            is_left_tab = false;
            maybe_ragged_left = false;
            left_up.disqualify();
            left_down.disqualify();
        }
        if blob.leader_on_right {
            is_right_tab = false;
            maybe_ragged_right = false;
            right_up.disqualify();
            right_down.disqualify();
        }

        let mut search = self
            .grid
            .search_radius(bounds.mid_x(), bounds.mid_y(), radius);
        while let Some(entry) = search.next() {
            if entry.id == id {
                continue;
            }
            let nbox = entry.bounds;
            let neighbour = blobs.get(entry.id);
            // A neighbour across a separator line does not exist.
            if nbox.right > right_column_edge
                || nbox.left < left_column_edge
                || bounds.left < neighbour.left_rule
                || bounds.right > neighbour.right_rule
            {
                continue;
            }
            let n_mid_x = nbox.mid_x();
            let n_mid_y = nbox.mid_y();
            if n_mid_x <= bounds.left && nbox.right >= target_right {
                if debug_here {
                    debug!(n_mid_x, n_mid_y, "not a left tab");
                }
                is_left_tab = false;
                if n_mid_y < bounds.top {
                    left_down.disqualify();
                }
                if n_mid_y > bounds.bottom {
                    left_up.disqualify();
                }
            } else if nearly_equal(bounds.left, nbox.left, alignment_tolerance) {
                if n_mid_y > bounds.top {
                    left_up.add(1);
                }
                if n_mid_y < bounds.bottom {
                    left_down.add(1);
                }
            } else if nbox.left < bounds.left && nbox.right >= bounds.left {
                // Overlaps but is not aligned, so negative evidence.
                if n_mid_y > bounds.top {
                    left_up.add(-1);
                }
                if n_mid_y < bounds.bottom {
                    left_down.add(-1);
                }
            }
            if nbox.left < bounds.left && nbox.y_overlaps(&bounds) && nbox.right >= target_right {
                maybe_ragged_left = false;
            }
            if n_mid_x >= bounds.right && nbox.left <= target_left {
                if debug_here {
                    debug!(n_mid_x, n_mid_y, "not a right tab");
                }
                is_right_tab = false;
                if n_mid_y < bounds.top {
                    right_down.disqualify();
                }
                if n_mid_y > bounds.bottom {
                    right_up.disqualify();
                }
            } else if nearly_equal(bounds.right, nbox.right, alignment_tolerance) {
                if n_mid_y > bounds.top {
                    right_up.add(1);
                }
                if n_mid_y < bounds.bottom {
                    right_down.add(1);
                }
            } else if nbox.right > bounds.right && nbox.left <= bounds.right {
                if n_mid_y > bounds.top {
                    right_up.add(-1);
                }
                if n_mid_y < bounds.bottom {
                    right_down.add(-1);
                }
            }
            if nbox.right > bounds.right && nbox.y_overlaps(&bounds) && nbox.left <= target_left {
                maybe_ragged_right = false;
            }
            if left_up.disqualified()
                && left_down.disqualified()
                && right_up.disqualified()
                && right_down.disqualified()
            {
                break;
            }
        }
        let left_state = if is_left_tab || left_up.supports() || left_down.supports() {
            TabState::MaybeAligned
        } else if maybe_ragged_left && self.confirm_ragged_left(bounds, min_ragged_gutter) {
            TabState::MaybeRagged
        } else {
            TabState::None
        };
        let right_state = if is_right_tab || right_up.supports() || right_down.supports() {
            TabState::MaybeAligned
        } else if maybe_ragged_right && self.confirm_ragged_right(bounds, min_ragged_gutter) {
            TabState::MaybeRagged
        } else {
            TabState::None
        };
        let blob = blobs.get_mut(id);
        blob.left_tab = left_state;
        blob.right_tab = right_state;
        if debug_here {
            debug!(?left_state, ?right_state, "classified box");
        }
        left_state != TabState::None || right_state != TabState::None
    }

    /// A ragged left candidate needs a fully blank rectangle beside it.
    fn confirm_ragged_left(&self, bounds: BBox, min_gutter: i32) -> bool {
        let mut search_box = bounds;
        search_box.right = bounds.left;
        search_box.left = bounds.left - min_gutter;
        self.nothing_y_overlaps_in(search_box, bounds)
    }

    fn confirm_ragged_right(&self, bounds: BBox, min_gutter: i32) -> bool {
        let mut search_box = bounds;
        search_box.left = bounds.right;
        search_box.right = bounds.right + min_gutter;
        self.nothing_y_overlaps_in(search_box, bounds)
    }

    fn nothing_y_overlaps_in(&self, search_box: BBox, target: BBox) -> bool {
        let mut search = self.grid.search_rect(search_box);
        while let Some(entry) = search.next() {
            if entry.bounds.y_overlaps(&target)
                && entry.bounds != target
                && entry.bounds.x_overlaps(&search_box)
            {
                return false;
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Alignment search driving.
    // ------------------------------------------------------------------

    /// Find all tab vectors: bootstrap the skew estimate on small search
    /// radii, discard those trial vectors, then run the full searches.
    fn find_all_tab_vectors(&mut self, blobs: &mut BlobSet) {
        let mut vertical_sum = Point::new(0, 1);
        let mut trial: Vec<TabVector> = Vec::new();
        // Slowly raise the search size until some vectors appear; they
        // only serve to estimate the vertical direction.
        let mut search_size = MIN_VERTICAL_SEARCH;
        while search_size < MAX_VERTICAL_SEARCH {
            let mut count = 0;
            count += self.find_tab_vectors_pass(
                blobs,
                search_size,
                Alignment::LeftAligned,
                &mut vertical_sum,
                &mut trial,
            );
            count += self.find_tab_vectors_pass(
                blobs,
                search_size,
                Alignment::RightAligned,
                &mut vertical_sum,
                &mut trial,
            );
            if count > 0 {
                break;
            }
            search_size += MIN_VERTICAL_SEARCH;
        }
        trial.clear();
        for &id in self.left_tab_boxes.iter() {
            let blob = blobs.get_mut(id);
            if blob.left_tab == TabState::Confirmed {
                blob.left_tab = TabState::MaybeAligned;
            }
        }
        for &id in self.right_tab_boxes.iter() {
            let blob = blobs.get_mut(id);
            if blob.right_tab == TabState::Confirmed {
                blob.right_tab = TabState::MaybeAligned;
            }
        }
        debug!(
            vertical_x = vertical_sum.x,
            vertical_y = vertical_sum.y,
            "beginning real tab search"
        );
        let mut vectors: Vec<TabVector> = Vec::new();
        self.find_tab_vectors_pass(
            blobs,
            MAX_VERTICAL_SEARCH,
            Alignment::LeftAligned,
            &mut vertical_sum,
            &mut vectors,
        );
        self.find_tab_vectors_pass(
            blobs,
            MAX_VERTICAL_SEARCH,
            Alignment::RightAligned,
            &mut vertical_sum,
            &mut vectors,
        );
        let ragged_search = self.config.ragged_search_multiple;
        self.find_tab_vectors_pass(
            blobs,
            ragged_search,
            Alignment::LeftRagged,
            &mut vertical_sum,
            &mut vectors,
        );
        self.find_tab_vectors_pass(
            blobs,
            ragged_search,
            Alignment::RightRagged,
            &mut vertical_sum,
            &mut vectors,
        );
        for v in vectors {
            self.store.push(v);
        }
        // The summed (mean) direction becomes the direction of everything.
        self.set_vertical_skew_and_parallelize(vertical_sum, blobs);
    }

    /// One search pass over the candidate boxes of one side.
    fn find_tab_vectors_pass(
        &self,
        blobs: &mut BlobSet,
        search_size_multiple: i32,
        alignment: Alignment,
        vertical_sum: &mut Point,
        out: &mut Vec<TabVector>,
    ) -> usize {
        let right = matches!(alignment, Alignment::RightAligned | Alignment::RightRagged);
        let candidates = if right {
            self.right_tab_boxes.clone()
        } else {
            self.left_tab_boxes.clone()
        };
        let mut count = 0;
        for id in candidates {
            if blobs.get(id).tab_state(right) != TabState::MaybeAligned {
                continue;
            }
            let params = AlignParams::for_tab_search(
                shrunk(*vertical_sum),
                blobs.bounds(id).height(),
                search_size_multiple,
                self.config.min_gutter_width,
                self.resolution,
                alignment,
            );
            if let Some(vector) =
                find_vertical_alignment(&self.grid, blobs, &params, id, vertical_sum, &self.dbg)
            {
                count += 1;
                out.push(vector);
            }
        }
        count
    }

    fn set_vertical_skew_and_parallelize(&mut self, vertical_sum: Point, blobs: &BlobSet) {
        self.vertical_skew = shrunk(vertical_sum);
        debug!(
            x = self.vertical_skew.x,
            y = self.vertical_skew.y,
            "vertical skew vector"
        );
        self.store.parallelize(self.vertical_skew, blobs);
    }

    // ------------------------------------------------------------------
    // Evaluation.
    // ------------------------------------------------------------------

    /// Evaluate every non-separator vector and drop the ones left with too
    /// few boxes.
    fn evaluate_tabs(&mut self, blobs: &BlobSet) {
        for id in self.store.ordered_ids().to_vec() {
            if self.store.get(id).is_separator() {
                continue;
            }
            self.evaluate_vector(id, blobs);
            if self.store.get(id).box_count() < MIN_EVALUATED_TABS {
                debug!(id = id.0, "dropping vector with too few boxes");
                drop(self.store.remove(id, None));
            }
        }
    }

    fn fit_and_evaluate_if_needed(&mut self, id: VectorId, blobs: &BlobSet) {
        while self.store.get(id).needs_refit || self.store.get(id).needs_evaluation {
            if self.store.get(id).needs_refit {
                self.store.get_mut(id).fit(self.vertical_skew, true, blobs);
            }
            if self.store.get(id).needs_evaluation {
                self.evaluate_vector(id, blobs);
            }
        }
    }

    /// Score the vector 0-100 by how much of its length is covered by
    /// boxes whose inside neighbour is much nearer than their gutter, then
    /// re-filter against the median gutter, and finally demand a minimum
    /// gutter over the whole span. Bad boxes are removed as noise.
    fn evaluate_vector(&mut self, id: VectorId, blobs: &BlobSet) {
        self.store.get_mut(id).needs_evaluation = false;
        let v = self.store.get(id).clone();
        let length = v.end.y - v.start.y;
        if length == 0 || v.boxes.is_empty() {
            self.store.get_mut(id).percent_score = 0;
            return;
        }
        let mean_height = (v
            .boxes
            .iter()
            .map(|&b| i64::from(blobs.bounds(b).height()))
            .sum::<i64>()
            / v.boxes.len() as i64) as i32;
        // Ragged edges face a tougher test: the gap must stay within the
        // height of the blob.
        let max_gutter = if v.is_ragged() {
            GUTTER_TO_NEIGHBOUR_RATIO * mean_height
        } else {
            GUTTER_MULTIPLE * mean_height
        };
        let left = v.is_left_tab();

        let mut gutters = Histogram::new(0, max_gutter + 1);
        let mut kept: Vec<BlobId> = Vec::new();
        let mut good_length = 0i32;
        let mut first_good: Option<BBox> = None;
        let mut prev_good: Option<BBox> = None;
        let mut deleted = 0usize;
        for &b in &v.boxes {
            let bounds = blobs.bounds(b);
            let tab_x = v.x_at_y(bounds.mid_y());
            let (gutter_width, neighbour_gap) =
                self.gutter_width_and_neighbour_gap(blobs, tab_x, max_gutter, left, b);
            if neighbour_gap * GUTTER_TO_NEIGHBOUR_RATIO <= gutter_width {
                good_length += bounds.height();
                gutters.add(gutter_width, 1);
                match prev_good {
                    Some(prev) => {
                        // Two good boxes also contribute the gap between
                        // them, as long as the gap is not too big.
                        let vertical_gap = bounds.bottom - prev.top;
                        let size1 = (prev.area() as f64).sqrt();
                        let size2 = (bounds.area() as f64).sqrt();
                        if f64::from(vertical_gap) < f64::from(MAX_FILLIN_MULTIPLE) * size1.min(size2)
                        {
                            good_length += vertical_gap;
                        }
                    }
                    None => first_good = Some(bounds),
                }
                prev_good = Some(bounds);
                kept.push(b);
            } else {
                deleted += 1;
            }
        }

        // Second pass: drop boxes whose gutter is a small fraction of the
        // median, which filters ends running into coincidental text gaps.
        let mut search_top = v.end.y;
        let mut search_bottom = v.start.y;
        let median_gutter = gutters.median();
        let mut final_kept: Vec<BlobId> = Vec::new();
        let mut last_good: Option<BBox> = None;
        if gutters.total() > 0 {
            first_good = None;
            for &b in &kept {
                let bounds = blobs.bounds(b);
                let tab_x = v.x_at_y(bounds.mid_y());
                let (gutter_width, _) =
                    self.gutter_width_and_neighbour_gap(blobs, tab_x, max_gutter, left, b);
                if f64::from(gutter_width) >= f64::from(median_gutter) * MIN_GUTTER_FRACTION {
                    if first_good.is_none() {
                        first_good = Some(bounds);
                        search_bottom = bounds.top;
                    }
                    last_good = Some(bounds);
                    search_top = bounds.bottom;
                    final_kept.push(b);
                } else {
                    deleted += 1;
                }
            }
        } else {
            final_kept = kept;
            last_good = prev_good;
        }

        let box_count = final_kept.len();
        {
            let vm = self.store.get_mut(id);
            vm.boxes = final_kept;
        }
        let (Some(first), Some(last)) = (first_good, last_good) else {
            self.store.get_mut(id).percent_score = 0;
            return;
        };
        {
            let vm = self.store.get_mut(id);
            vm.set_y_start(first.bottom);
            vm.set_y_end(last.top);
            let length = (vm.end.y - vm.start.y).max(1);
            vm.percent_score = (100 * good_length / length).clamp(0, 100);
            if deleted > 0 {
                // Refit before the final gutter test; the caller's loop
                // comes back through here.
                vm.needs_refit = true;
                return;
            }
        }
        // Test the gutter over the whole vector, not just at the boxes.
        if search_bottom > search_top {
            search_bottom = self.store.get(id).start.y;
            search_top = self.store.get(id).end.y;
        }
        let mut min_gutter_width = LINE_COUNT_RECIPROCAL / box_count.max(1) as f64;
        min_gutter_width += if v.is_ragged() {
            MIN_RAGGED_GUTTER
        } else {
            MIN_ALIGNED_GUTTER
        };
        min_gutter_width *= f64::from(mean_height);
        let mut max_gutter_width = min_gutter_width.round() as i32 + 1;
        if median_gutter > max_gutter_width {
            max_gutter_width = median_gutter;
        }
        let mut required_shift = 0;
        let gutter = self.gutter_width(
            blobs,
            search_bottom,
            search_top,
            self.store.get(id),
            false,
            max_gutter_width,
            &mut required_shift,
        );
        if f64::from(gutter) < min_gutter_width {
            if self.dbg.active(2, self.store.get(id).start.x, self.store.get(id).start.y) {
                debug!(gutter, min_gutter_width, "rejecting bad tab vector");
            }
            let vm = self.store.get_mut(id);
            vm.freeze();
            vm.percent_score = 0;
        }
    }

    /// Find the gutter width and the gap to the nearest inside neighbour
    /// for one blob on a putative tab line at `tab_x`.
    fn gutter_width_and_neighbour_gap(
        &self,
        blobs: &BlobSet,
        tab_x: i32,
        max_gutter: i32,
        left: bool,
        b: BlobId,
    ) -> (i32, i32) {
        let bounds = blobs.bounds(b);
        let height = bounds.height();
        let gutter_x = if left { bounds.left } else { bounds.right };
        let internal_x = if left { bounds.right } else { bounds.left };
        // A box sitting away from the tab stop widens the allowed gutter.
        let tab_gap = if left { gutter_x - tab_x } else { tab_x - gutter_x };
        let mut gutter_width = max_gutter;
        if tab_gap > 0 {
            gutter_width += tab_gap;
        }
        let gutter_dir = if left { SideDir::Left } else { SideDir::Right };
        if let Some(g) = self.adjacent_blob(
            blobs,
            b,
            gutter_dir,
            false,
            CHAR_VERTICAL_OVERLAP_FRACTION,
            gutter_width,
            bounds.top,
            bounds.bottom,
        ) {
            let gbox = blobs.bounds(g);
            gutter_width = if left {
                tab_x - gbox.right
            } else {
                gbox.left - tab_x
            };
        }
        if gutter_width >= max_gutter {
            // No blob in the way; a tab vector may still close the gutter.
            let mut probe = bounds;
            if left {
                probe.left = tab_x - max_gutter - 1;
                probe.right = tab_x - max_gutter;
                let tab_gutter = self.right_edge_for_box(probe, true, false);
                if tab_gutter < tab_x - 1 {
                    gutter_width = tab_x - tab_gutter;
                }
            } else {
                probe.left = tab_x + max_gutter;
                probe.right = tab_x + max_gutter + 1;
                let tab_gutter = self.left_edge_for_box(probe, true, false);
                if tab_gutter > tab_x + 1 {
                    gutter_width = tab_gutter - tab_x;
                }
            }
        }
        gutter_width = gutter_width.min(max_gutter);
        // Now the neighbour on the inside.
        let inner_dir = if left { SideDir::Right } else { SideDir::Left };
        let mut neighbour_edge = if left {
            self.right_edge_for_box(bounds, true, false)
        } else {
            self.left_edge_for_box(bounds, true, false)
        };
        if let Some(n) = self.adjacent_blob(
            blobs,
            b,
            inner_dir,
            false,
            CHAR_VERTICAL_OVERLAP_FRACTION,
            gutter_width,
            bounds.top,
            bounds.bottom,
        ) {
            let nbox = blobs.bounds(n);
            if !different_sizes(height, nbox.height()) {
                if left && nbox.left < neighbour_edge {
                    neighbour_edge = nbox.left;
                } else if !left && nbox.right > neighbour_edge {
                    neighbour_edge = nbox.right;
                }
            }
        }
        let neighbour_gap = if left {
            neighbour_edge - internal_x
        } else {
            internal_x - neighbour_edge
        };
        (gutter_width, neighbour_gap)
    }

    /// Smallest gap from the vector to any obstruction over `[bottom_y,
    /// top_y]`, capped at `max_gutter_width`. `required_shift` reports how
    /// far the vector would have to move to clear boxes it cuts through;
    /// the result is reduced by that shift.
    fn gutter_width(
        &self,
        blobs: &BlobSet,
        bottom_y: i32,
        top_y: i32,
        v: &TabVector,
        ignore_non_text: bool,
        max_gutter_width: i32,
        required_shift: &mut i32,
    ) -> i32 {
        let look_left = v.is_left_tab();
        let bottom_x = v.x_at_y(bottom_y);
        let top_x = v.x_at_y(top_y);
        let start_x = if look_left {
            top_x.max(bottom_x)
        } else {
            top_x.min(bottom_x)
        };
        let dir = if look_left { SideDir::Left } else { SideDir::Right };
        let mut min_gap = max_gutter_width;
        *required_shift = 0;
        let mut search = self.grid.search_side(start_x, bottom_y, top_y, dir);
        while let Some(entry) = search.next() {
            let bounds = entry.bounds;
            if bounds.bottom >= top_y || bounds.top <= bottom_y {
                continue; // Doesn't overlap enough.
            }
            if bounds.height() >= self.grid.gridsize() * 2
                && f64::from(bounds.height()) > f64::from(bounds.width()) * LINE_FRAGMENT_ASPECT_RATIO
            {
                continue; // Likely separator-line residue.
            }
            if ignore_non_text && !blobs.get(entry.id).region.is_text_like() {
                continue;
            }
            // x at the blob's mid-y, so the required shift guarantees to
            // clear every blob without demanding exactness.
            let tab_x = v.x_at_y(bounds.mid_y());
            let gap = if look_left {
                let gap = tab_x - bounds.right;
                if gap < 0 && bounds.left - tab_x < *required_shift {
                    *required_shift = bounds.left - tab_x;
                }
                gap
            } else {
                let gap = bounds.left - tab_x;
                if gap < 0 && bounds.right - tab_x > *required_shift {
                    *required_shift = bounds.right - tab_x;
                }
                gap
            };
            if gap > 0 && gap < min_gap {
                min_gap = gap;
            }
        }
        // May go negative, which marks a really bad tab stop.
        min_gap - required_shift.abs()
    }

    /// The next blob to the left or right that significantly overlaps the
    /// `[bottom_y, top_y]` band. Stops at big gaps and at confirmed tabs
    /// facing the wrong way, in case that crosses a column boundary.
    #[allow(clippy::too_many_arguments)]
    fn adjacent_blob(
        &self,
        blobs: &BlobSet,
        from: BlobId,
        dir: SideDir,
        ignore_images: bool,
        min_overlap_fraction: f64,
        gap_limit: i32,
        top_y: i32,
        bottom_y: i32,
    ) -> Option<BlobId> {
        let bounds = blobs.bounds(from);
        let mid_x = bounds.mid_x();
        let look_left = dir == SideDir::Left;
        let mut search = self.grid.search_side(mid_x, bottom_y, top_y, dir);
        let mut best_gap = 0;
        let mut result: Option<BlobId> = None;
        while let Some(entry) = search.next() {
            if entry.id == from
                || (ignore_images && !blobs.get(entry.id).region.is_text_like())
            {
                continue;
            }
            let nbox = entry.bounds;
            let v_overlap = nbox.top.min(top_y) - nbox.bottom.max(bottom_y);
            let height = top_y - bottom_y;
            let n_height = nbox.height();
            if f64::from(v_overlap) <= min_overlap_fraction * f64::from(height.min(n_height))
                || (min_overlap_fraction != 0.0 && different_sizes(height, n_height))
            {
                continue;
            }
            let n_mid_x = nbox.mid_x();
            if (look_left != (n_mid_x < mid_x)) || n_mid_x == mid_x {
                continue; // Wrong way.
            }
            let h_gap = nbox.left.max(bounds.left) - nbox.right.min(bounds.right);
            if h_gap > gap_limit {
                // A big gap before the next tab, so nothing more to find.
                return result;
            }
            let n_state = if look_left {
                blobs.get(entry.id).right_tab
            } else {
                blobs.get(entry.id).left_tab
            };
            if h_gap > 0 && n_state >= TabState::Confirmed {
                // A tab facing the wrong way; stop in case this crosses
                // the column boundary.
                return result;
            }
            match result {
                None => {
                    result = Some(entry.id);
                    best_gap = h_gap;
                }
                Some(_) if h_gap < best_gap => {
                    result = Some(entry.id);
                    best_gap = h_gap;
                }
                Some(_) => return result, // Already have the best.
            }
        }
        result
    }

    // ------------------------------------------------------------------
    // Column widths and partners.
    // ------------------------------------------------------------------

    /// Trace text lines between confirmed opposite tab stops, registering
    /// partner relationships and collecting the width histogram.
    fn compute_column_widths(&mut self, blobs: &mut BlobSet) {
        let width_range = (self.grid.tright().x - self.grid.bleft().x) / COLUMN_WIDTH_FACTOR;
        let mut hist = Histogram::new(0, width_range + 1);
        let mut seeds: Vec<BlobId> = Vec::new();
        let mut search = self.grid.search_full();
        while let Some(entry) = search.next() {
            seeds.push(entry.id);
        }
        for id in seeds {
            let blob = blobs.get(id);
            if blob.left_tab != TabState::Confirmed && blob.right_tab != TabState::Confirmed {
                continue;
            }
            if let Some((start_pt, end_pt, line_left, line_right)) =
                self.trace_textline(blobs, id)
            {
                if start_pt.x != end_pt.x {
                    let width = line_right - line_left;
                    if width >= MIN_COLUMN_WIDTH {
                        hist.add(width / COLUMN_WIDTH_FACTOR, 1);
                    }
                }
            }
        }
        self.extract_width_peaks(hist);
    }

    /// Pull peaks out of the histogram, absorbing contiguous non-empty
    /// neighbours, and keep the ones over both count thresholds.
    fn extract_width_peaks(&mut self, mut hist: Histogram) {
        self.column_widths.clear();
        let total = hist.total();
        while hist.total() > 0 {
            let width = hist.mode();
            let mut col_count = hist.pile_count(width);
            hist.add(width, -col_count);
            let mut left = width - 1;
            while left > 0 && hist.pile_count(left) > 0 {
                let n = hist.pile_count(left);
                col_count += n;
                hist.add(left, -n);
                left -= 1;
            }
            let mut right = width + 1;
            while right < hist.range_max() && hist.pile_count(right) > 0 {
                let n = hist.pile_count(right);
                col_count += n;
                hist.add(right, -n);
                right += 1;
            }
            if col_count > self.config.min_lines_in_column
                && f64::from(col_count)
                    > self.config.min_fraction_lines_in_column * total as f64
            {
                debug!(
                    width = width * COLUMN_WIDTH_FACTOR,
                    col_count, "accepted common column width"
                );
                self.column_widths.push(ColumnWidth {
                    width,
                    line_count: col_count,
                });
            }
        }
    }

    /// From a confirmed tab box, trace to the opposite tab vector on the
    /// same text line. Success registers the partnership and returns the
    /// fitted baseline with the line's x-extent on both vectors.
    fn trace_textline(&mut self, blobs: &mut BlobSet, seed: BlobId) -> Option<(Point, Point, i32, i32)> {
        let right_to_left = blobs.get(seed).left_tab != TabState::Confirmed;
        let bounds = blobs.bounds(seed);
        let page_bottom = self.grid.bleft().y;
        let page_top = self.grid.tright().y;
        let mut left_vector: Option<VectorId> = None;
        let mut right_vector: Option<VectorId> = None;
        if right_to_left {
            right_vector = self.store.right_tab_for_box(
                bounds,
                self.vertical_skew,
                page_bottom,
                page_top,
                true,
                false,
            );
            match right_vector {
                Some(v) if !self.store.get(v).is_left_tab() => {}
                _ => return None,
            }
        } else {
            left_vector = self.store.left_tab_for_box(
                bounds,
                self.vertical_skew,
                page_bottom,
                page_top,
                true,
                false,
            );
            match left_vector {
                Some(v) if !self.store.get(v).is_right_tab() => {}
                _ => return None,
            }
        }
        let segment = self.find_textline_segment(
            blobs,
            right_to_left,
            seed,
            &mut left_vector,
            &mut right_vector,
        )?;
        let left_vector = left_vector?;
        let right_vector = right_vector?;
        self.add_partner_vector(
            blobs,
            segment.left_blob,
            segment.right_blob,
            left_vector,
            right_vector,
        );
        let line_left = self
            .store
            .get(left_vector)
            .x_at_y(blobs.bounds(segment.left_blob).bottom);
        let line_right = self
            .store
            .get(right_vector)
            .x_at_y(blobs.bounds(segment.right_blob).bottom);
        Some((segment.start_pt, segment.end_pt, line_left, line_right))
    }

    /// Walk blob to blob along a text line until a tab vector or a big gap
    /// ends it, fitting a least-squares baseline as it goes. Strict mode:
    /// the walk starts with one end vector known and must reach the other.
    fn find_textline_segment(
        &self,
        blobs: &BlobSet,
        right_to_left: bool,
        seed: BlobId,
        left_vector: &mut Option<VectorId>,
        right_vector: &mut Option<VectorId>,
    ) -> Option<TextlineSegment> {
        let seed_bounds = blobs.bounds(seed);
        // Top and bottom of the current line move alpha-smoothed, in
        // lock-step.
        let mut top_y = seed_bounds.top;
        let mut bottom_y = seed_bounds.bottom;
        let mut left_blob = seed;
        let mut right_blob = seed;
        let mut coverage = 0i64;
        let mut lsq = LeastSquares::new();
        let mut pts: Vec<Point> = Vec::new();
        let mut total_height = 0i64;
        let mut height_count = 0i64;
        let first_pt = Point::new(
            if right_to_left {
                seed_bounds.right
            } else {
                seed_bounds.left
            },
            seed_bounds.bottom,
        );
        lsq.add(first_pt);
        pts.push(first_pt);
        let mut last_pt = first_pt;
        let mut end_coord = if right_to_left {
            self.grid.bleft().x
        } else {
            self.grid.tright().x
        };
        let gap_limit = (MAX_HORIZONTAL_GAP * f64::from(seed_bounds.height())) as i32;
        let page_bottom = self.grid.bleft().y;
        let page_top = self.grid.tright().y;
        let mut current = Some(seed);
        while let Some(b) = current {
            let bounds = blobs.bounds(b);
            let mid_x = bounds.mid_x();
            if right_to_left {
                let mut v = self.store.left_tab_for_box(
                    bounds,
                    self.vertical_skew,
                    page_bottom,
                    page_top,
                    true,
                    false,
                );
                if (v.is_some() && v == *right_vector)
                    || (v.is_some_and(|v| b == right_blob && self.store.get(v).is_right_tab()))
                {
                    v = self.store.left_tab_for_box(
                        bounds,
                        self.vertical_skew,
                        page_bottom,
                        page_top,
                        false,
                        false,
                    );
                }
                if bounds.right <= end_coord {
                    break; // Passed through the end vector.
                }
                let pt = Point::new(mid_x, bounds.bottom);
                lsq.add(pt);
                pts.push(pt);
                coverage += i64::from(bounds.width());
                total_height += i64::from(bounds.height());
                height_count += 1;
                left_blob = b;
                last_pt = Point::new(bounds.left, bounds.bottom);
                if let Some(v) = v {
                    let starting = b == right_blob && !self.store.get(v).is_left_tab();
                    if Some(v) != *right_vector && !starting {
                        let x_at_y = self.store.get(v).x_at_y(bottom_y);
                        if x_at_y > bounds.left - gap_limit {
                            // Crossing end_coord stops the search.
                            if x_at_y > end_coord {
                                end_coord = x_at_y;
                            }
                            if self.store.get(v).is_left_tab() {
                                *left_vector = Some(v);
                            }
                        }
                    }
                }
                if blobs.get(b).left_tab == TabState::Confirmed {
                    break; // Hit another tab point.
                }
            } else {
                let mut v = self.store.right_tab_for_box(
                    bounds,
                    self.vertical_skew,
                    page_bottom,
                    page_top,
                    true,
                    false,
                );
                if (v.is_some() && v == *left_vector)
                    || (v.is_some_and(|v| b == left_blob && self.store.get(v).is_left_tab()))
                {
                    v = self.store.right_tab_for_box(
                        bounds,
                        self.vertical_skew,
                        page_bottom,
                        page_top,
                        false,
                        false,
                    );
                }
                if bounds.left >= end_coord {
                    break;
                }
                let pt = Point::new(mid_x, bounds.bottom);
                lsq.add(pt);
                pts.push(pt);
                coverage += i64::from(bounds.width());
                total_height += i64::from(bounds.height());
                height_count += 1;
                right_blob = b;
                last_pt = Point::new(bounds.right, bounds.bottom);
                if let Some(v) = v {
                    let starting = b == left_blob && !self.store.get(v).is_right_tab();
                    if Some(v) != *left_vector && !starting {
                        let x_at_y = self.store.get(v).x_at_y(bottom_y);
                        if x_at_y < bounds.right + gap_limit {
                            if x_at_y < end_coord {
                                end_coord = x_at_y;
                            }
                            if self.store.get(v).is_right_tab() {
                                *right_vector = Some(v);
                            }
                        }
                    }
                }
                if blobs.get(b).right_tab == TabState::Confirmed {
                    break;
                }
            }
            // Keep top and bottom a fixed distance apart by applying the
            // mean smoothing delta to both.
            let top_delta = f64::from(bounds.top - top_y) * SMOOTH_FACTOR;
            let bottom_delta = f64::from(bounds.bottom - bottom_y) * SMOOTH_FACTOR;
            let mean_delta = ((top_delta + bottom_delta) / 2.0) as i32;
            top_y += mean_delta;
            bottom_y += mean_delta;
            let dir = if right_to_left {
                SideDir::Left
            } else {
                SideDir::Right
            };
            current = self.adjacent_blob(
                blobs,
                b,
                dir,
                false,
                CHAR_VERTICAL_OVERLAP_FRACTION,
                gap_limit,
                top_y,
                bottom_y,
            );
            if let Some(next) = current {
                if !blobs.get(next).region.is_text_like() {
                    current = None; // Next box is an image region.
                }
            }
        }
        if height_count == 0 {
            return None;
        }
        // Strict searches must have found both end vectors.
        if left_vector.is_none() || right_vector.is_none() {
            return None;
        }
        lsq.add(last_pt);
        pts.push(last_pt);
        let max_error = MAX_BASELINE_ERROR * total_height as f64 / height_count as f64;
        let (m, c) = lsq.solve_y_on_x()?;
        let error = LeastSquares::baseline_error(&pts, m, c);
        let width = blobs.bounds(right_blob).right - blobs.bounds(left_blob).left;
        let x_min = pts.iter().map(|p| p.x).min()?;
        let x_max = pts.iter().map(|p| p.x).max()?;
        let line = lsq.fit_baseline(x_min, x_max)?;
        let good_fit = error < max_error
            && line.start.x != line.end.x
            && coverage >= (MIN_BASELINE_COVERAGE * f64::from(width)) as i64;
        if !good_fit {
            return None;
        }
        Some(TextlineSegment {
            start_pt: line.start,
            end_pt: line.end,
            left_blob,
            right_blob,
        })
    }

    /// Register a bidirectional partnership. A separator standing in for a
    /// real tab is first replaced: by extending a nearby true tab vector
    /// over the blob, or by cloning a ragged vector from the separator.
    fn add_partner_vector(
        &mut self,
        blobs: &BlobSet,
        left_blob: BlobId,
        right_blob: BlobId,
        left: VectorId,
        right: VectorId,
    ) {
        let page_bottom = self.grid.bleft().y;
        let page_top = self.grid.tright().y;
        let mut left = left;
        let mut right = right;
        if self.store.get(left).is_separator() {
            let left_box = blobs.bounds(left_blob);
            let candidate = self.store.left_tab_for_box(
                left_box,
                self.vertical_skew,
                page_bottom,
                page_top,
                true,
                true,
            );
            let replacement = candidate.filter(|&v| {
                v != left
                    && self.store.get(v).is_left_tab()
                    && self.store.get(v).x_at_y(left_box.top)
                        > self.store.get(left).x_at_y(left_box.top)
            });
            match replacement {
                Some(v) => {
                    self.store.get_mut(v).extend_to_box(left_blob, blobs);
                    left = v;
                }
                None => {
                    let clone = TabVector::ragged_from(
                        self.store.get(left),
                        Alignment::LeftRagged,
                        self.vertical_skew,
                        left_blob,
                        blobs,
                    );
                    left = self.store.push(clone);
                    self.store.sort();
                }
            }
        }
        if self.store.get(right).is_separator() {
            let right_box = blobs.bounds(right_blob);
            let candidate = self.store.right_tab_for_box(
                right_box,
                self.vertical_skew,
                page_bottom,
                page_top,
                true,
                true,
            );
            let replacement = candidate.filter(|&v| {
                v != right
                    && self.store.get(v).is_right_tab()
                    && self.store.get(v).x_at_y(right_box.top)
                        < self.store.get(right).x_at_y(right_box.top)
            });
            match replacement {
                Some(v) => {
                    self.store.get_mut(v).extend_to_box(right_blob, blobs);
                    right = v;
                }
                None => {
                    let clone = TabVector::ragged_from(
                        self.store.get(right),
                        Alignment::RightRagged,
                        self.vertical_skew,
                        right_blob,
                        blobs,
                    );
                    right = self.store.push(clone);
                    self.store.sort();
                }
            }
        }
        self.store.add_partners(left, right);
    }

    // ------------------------------------------------------------------
    // Cleanup, deskew and constraints.
    // ------------------------------------------------------------------

    /// Move separators and partnerless vectors to the dead list; refit and
    /// re-evaluate survivors whose geometry changed.
    fn clean_up_tabs(&mut self, blobs: &BlobSet) {
        for id in self.store.ordered_ids().to_vec() {
            let v = self.store.get(id);
            if v.is_separator() || v.partnerless() {
                self.store.kill(id);
            } else {
                self.fit_and_evaluate_if_needed(id, blobs);
            }
        }
    }

    /// Rotate the page so the fitted vertical becomes true vertical.
    ///
    /// Fails without touching anything when the implied rotation is too
    /// large to be real skew.
    fn deskew_page(&mut self, blobs: &mut BlobSet) -> Result<(Rotation, Rotation)> {
        let skew = self.vertical_skew;
        let length = (skew.dot(skew) as f64).sqrt();
        let deskew = Rotation::new(f64::from(skew.y) / length, f64::from(skew.x) / length);
        let reskew = deskew.inverse();
        if deskew.cos < self.config.min_skew_cosine {
            return Err(TabFindError::ExcessiveSkew {
                cos_angle: deskew.cos,
                threshold: self.config.min_skew_cosine,
            });
        }
        for id in blobs.ids().collect::<Vec<_>>() {
            let blob = blobs.get_mut(id);
            blob.bounds = blob.bounds.rotated(deskew);
        }
        for dead in self.store.dead_vectors_mut() {
            dead.rotate(deskew);
        }
        // Live vectors don't rotate; they are refitted to true vertical.
        self.set_vertical_skew_and_parallelize(Point::new(0, 1), blobs);
        let grid_box = BBox::new(
            self.grid.bleft().x,
            self.grid.bleft().y,
            self.grid.tright().x,
            self.grid.tright().y,
        )
        .rotated(deskew);
        self.grid = BucketGrid::new(
            self.grid.gridsize(),
            Point::new(grid_box.left, grid_box.bottom),
            Point::new(grid_box.right, grid_box.top),
        );
        self.insert_blobs(blobs);
        Ok((deskew, reskew))
    }

    /// Propagate endpoint constraints so partners end together wherever
    /// their ranges allow it.
    fn apply_tab_constraints(&mut self) {
        let mut pool = ConstraintPool::new();
        let ids = self.store.ordered_ids().to_vec();
        for &id in &ids {
            pool.create(&mut self.store, id, false);
            pool.create(&mut self.store, id, true);
        }
        // The first partner shares our bottom and the last our top;
        // between each pair of successive partners, the lower one's top
        // meets the upper one's bottom.
        for &id in &ids {
            let partners: Vec<VectorId> = self
                .store
                .get(id)
                .partners
                .iter()
                .copied()
                .filter(|p| self.store.contains(*p))
                .collect();
            let mut prev: Option<VectorId> = None;
            for (i, &partner) in partners.iter().enumerate() {
                match prev {
                    None => pool.merge_if_compatible(&mut self.store, id, partner, false, false),
                    Some(prev) => {
                        pool.merge_if_compatible(&mut self.store, prev, partner, true, false)
                    }
                }
                prev = Some(partner);
                if i + 1 == partners.len() {
                    pool.merge_if_compatible(&mut self.store, id, partner, true, true);
                }
            }
        }
        // Facing left/right pairs that overlap try for a common top and
        // bottom directly.
        for &id in &ids {
            if !self.store.get(id).is_right_tab() {
                continue;
            }
            for &other in &ids {
                if other == id
                    || !self.store.get(other).is_left_tab()
                    || self.store.get(id).v_overlap(self.store.get(other)) <= 0
                {
                    continue;
                }
                pool.merge_if_compatible(&mut self.store, id, other, false, false);
                pool.merge_if_compatible(&mut self.store, id, other, true, true);
            }
        }
        pool.apply(&mut self.store);
    }
}

/// Shrink a direction sum so both components fit comfortably in 16 bits,
/// keeping the direction.
fn shrunk(v: Point) -> Point {
    let max = v.x.abs().max(v.y.abs());
    if max <= i32::from(i16::MAX) {
        return v;
    }
    let factor = max / i32::from(i16::MAX) + 1;
    Point::new(v.x / factor, v.y / factor)
}

/// True if the sizes differ by more than a factor of 2.
fn different_sizes(a: i32, b: i32) -> bool {
    a > b * 2 || b > a * 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::Blob;

    fn finder(bleft: Point, tright: Point) -> TabFinder {
        TabFinder::new(
            bleft,
            tright,
            300,
            FinderConfig::default(),
            DebugContext::INACTIVE,
        )
        .unwrap()
    }

    /// Two columns of left-and-right aligned text lines, one blob per
    /// line, as the textline merger would deliver them.
    fn two_column_page() -> (BlobSet, Vec<BlobId>) {
        let mut blobs = BlobSet::new();
        let mut ids = Vec::new();
        // Column 1 spans x 100..500, column 2 spans x 600..1000; 14 lines
        // 20 px high with 40 px pitch.
        for line in 0..14 {
            let y = 100 + line * 40;
            ids.push(blobs.push(Blob::new(BBox::new(100, y, 500, y + 20))));
            ids.push(blobs.push(Blob::new(BBox::new(600, y, 1000, y + 20))));
        }
        (blobs, ids)
    }

    #[test]
    fn test_two_column_page_finds_column_edges() {
        let (mut blobs, _) = two_column_page();
        let mut finder = finder(Point::new(0, 0), Point::new(1100, 800));
        let outcome = finder.find_tab_vectors(&mut blobs, Vec::new()).unwrap();
        // No skew in the synthetic page.
        assert!((outcome.deskew.cos - 1.0).abs() < 1e-6);
        assert_eq!(outcome.vertical_skew, Point::new(0, 1));
        // The surviving vectors must include a left edge near x=100 and a
        // right edge near x=1000.
        let positions: Vec<(i32, bool)> = finder
            .vectors()
            .iter_live()
            .map(|(_, v)| (v.x_at_y(400), v.is_left_tab()))
            .collect();
        assert!(
            positions
                .iter()
                .any(|&(x, left)| left && (95..=105).contains(&x)),
            "no left tab near x=100 in {positions:?}"
        );
        assert!(
            positions
                .iter()
                .any(|&(x, left)| !left && (995..=1005).contains(&x)),
            "no right tab near x=1000 in {positions:?}"
        );
        // Both columns are 400 wide: the quantized width 20 must be the
        // accepted common width.
        assert!(finder.is_common_width(400));
        assert!(!finder.is_common_width(150));
    }

    #[test]
    fn test_partners_are_symmetric_after_run() {
        let (mut blobs, _) = two_column_page();
        let mut finder = finder(Point::new(0, 0), Point::new(1100, 800));
        finder.find_tab_vectors(&mut blobs, Vec::new()).unwrap();
        let store = finder.vectors();
        for (id, v) in store.iter_live() {
            for &p in &v.partners {
                assert!(
                    store.contains(p) && store.get(p).partners.contains(&id),
                    "asymmetric partner link {id:?} -> {p:?}"
                );
            }
        }
    }

    #[test]
    fn test_constraint_resolution_soundness() {
        let (mut blobs, _) = two_column_page();
        let mut finder = finder(Point::new(0, 0), Point::new(1100, 800));
        finder.find_tab_vectors(&mut blobs, Vec::new()).unwrap();
        for (_, v) in finder.vectors().iter_live() {
            if v.partners.is_empty() {
                continue;
            }
            assert!(v.start.y <= v.end.y);
            assert!(v.extended_ymin <= v.start.y);
            assert!(v.extended_ymax >= v.end.y);
        }
    }

    #[test]
    fn test_width_histogram_determinism() {
        let mut finder = finder(Point::new(0, 0), Point::new(1100, 800));
        // 20 runs at exactly 400 wide, 2 at 150.
        let mut hist = Histogram::new(0, 1100 / COLUMN_WIDTH_FACTOR + 1);
        for _ in 0..20 {
            hist.add(400 / COLUMN_WIDTH_FACTOR, 1);
        }
        for _ in 0..2 {
            hist.add(150 / COLUMN_WIDTH_FACTOR, 1);
        }
        finder.extract_width_peaks(hist);
        assert_eq!(finder.common_widths().len(), 1);
        assert_eq!(finder.common_widths()[0].width, 400 / COLUMN_WIDTH_FACTOR);
        assert!(finder.is_common_width(400));
        assert!(!finder.is_common_width(150));
    }

    #[test]
    fn test_excessive_skew_is_an_error() {
        let mut finder = finder(Point::new(0, 0), Point::new(1000, 1000));
        // Force a 45-degree skew estimate, far past the gate.
        finder.vertical_skew = Point::new(100, 100);
        let mut blobs = BlobSet::new();
        blobs.push(Blob::new(BBox::new(10, 10, 30, 30)));
        let err = finder.deskew_page(&mut blobs).unwrap_err();
        assert!(matches!(err, TabFindError::ExcessiveSkew { .. }));
        // The blob was left untouched.
        assert_eq!(blobs.bounds(BlobId(0)), BBox::new(10, 10, 30, 30));
    }

    #[test]
    fn test_deskew_round_trip_within_a_pixel() {
        // A direction estimate just inside the gate.
        let skew = Point::new(20, 100);
        let length = (skew.dot(skew) as f64).sqrt();
        let deskew = Rotation::new(f64::from(skew.y) / length, f64::from(skew.x) / length);
        assert!(deskew.cos > 0.866025);
        let reskew = deskew.inverse();
        for &p in &[
            Point::new(0, 0),
            Point::new(123, 456),
            Point::new(-500, 70),
            Point::new(9999, -1234),
        ] {
            let back = p.rotated(deskew).rotated(reskew);
            assert!((back.x - p.x).abs() <= 1 && (back.y - p.y).abs() <= 1);
        }
    }

    #[test]
    fn test_evidence_enum_replaces_sentinel() {
        let mut e = Evidence::Count(0);
        e.add(1);
        e.add(1);
        assert!(e.supports());
        e.disqualify();
        e.add(5);
        assert!(e.disqualified());
        assert!(!e.supports());
    }

    #[test]
    fn test_shrunk_preserves_small_vectors() {
        assert_eq!(shrunk(Point::new(3, 1000)), Point::new(3, 1000));
        let big = shrunk(Point::new(40000, 4_000_000));
        assert!(big.y <= i32::from(i16::MAX));
        assert!(big.y > 0);
    }
}
