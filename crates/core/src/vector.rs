//! Tab vectors: near-vertical lines representing tab stops and rule lines.

use smallvec::SmallVec;
use tracing::debug;

use crate::blob::{BlobId, BlobSet};
use crate::constraint::ConstraintId;
use crate::geom::{Point, Rotation};
use crate::grid::{BucketGrid, VerticalDir};
use crate::linefit::LeastSquares;

/// Pixel distance for tab vectors to be considered the same.
const SIMILAR_VECTOR_DIST: i64 = 10;
/// Pixel distance for ragged tab vectors to be considered the same if
/// nothing occupies the overlap box between them.
const SIMILAR_RAGGED_DIST: i64 = 50;

/// The alignment type that a tab vector represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    LeftAligned,
    LeftRagged,
    CenterJustified,
    RightAligned,
    RightRagged,
    Separator,
}

impl Alignment {
    pub fn is_left(self) -> bool {
        matches!(self, Alignment::LeftAligned | Alignment::LeftRagged)
    }

    pub fn is_right(self) -> bool {
        matches!(self, Alignment::RightAligned | Alignment::RightRagged)
    }

    pub fn is_ragged(self) -> bool {
        matches!(self, Alignment::LeftRagged | Alignment::RightRagged)
    }

    pub fn is_separator(self) -> bool {
        self == Alignment::Separator
    }
}

/// Stable handle to a vector in a [`VectorStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VectorId(pub u32);

impl VectorId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A single near-vertical line found on the page.
///
/// `start` is the bottom end, `end` the top (`start.y <= end.y`). The
/// extended y-range is the speculative span within which merging and
/// partnering may still occur.
#[derive(Debug, Clone)]
pub struct TabVector {
    pub start: Point,
    pub end: Point,
    pub extended_ymin: i32,
    pub extended_ymax: i32,
    /// Projection on the vertical direction, for ordering vectors that are
    /// not exactly parallel.
    pub sort_key: i64,
    /// Coverage score 0-100 set by evaluation.
    pub percent_score: i32,
    /// Mean blob width; meaningful only for separator lines.
    pub mean_width: i32,
    pub needs_refit: bool,
    pub needs_evaluation: bool,
    /// True if a separator line intersects at least 2 other lines.
    pub intersects_other_lines: bool,
    pub alignment: Alignment,
    /// Contributing blobs, kept sorted by bottom y. Emptied by `freeze`.
    pub boxes: Vec<BlobId>,
    /// Vectors joined to this one by a shared text line, in increasing
    /// y-order of the connecting line.
    pub partners: SmallVec<[VectorId; 4]>,
    pub top_constraint: Option<ConstraintId>,
    pub bottom_constraint: Option<ConstraintId>,
}

impl TabVector {
    /// Build a vector from an aligned chain of blobs. `boxes` must already
    /// be in increasing-y order.
    pub fn from_boxes(
        alignment: Alignment,
        extended_ymin: i32,
        extended_ymax: i32,
        boxes: Vec<BlobId>,
    ) -> Self {
        Self {
            start: Point::default(),
            end: Point::default(),
            extended_ymin,
            extended_ymax,
            sort_key: 0,
            percent_score: 0,
            mean_width: 0,
            needs_refit: true,
            needs_evaluation: true,
            intersects_other_lines: false,
            alignment,
            boxes,
            partners: SmallVec::new(),
            top_constraint: None,
            bottom_constraint: None,
        }
    }

    /// Build a ragged vector by copying another's direction, shifting it to
    /// the given blob, with its initial extent the blob's height but the
    /// extended bounds of the original.
    pub fn ragged_from(
        src: &TabVector,
        alignment: Alignment,
        vertical: Point,
        blob: BlobId,
        blobs: &BlobSet,
    ) -> Self {
        let bounds = blobs.bounds(blob);
        let (start, end) = if alignment.is_left() {
            (bounds.bot_left(), bounds.top_left())
        } else {
            (bounds.bot_right(), bounds.top_right())
        };
        let mid = Point::new((start.x + end.x) / 2, (start.y + end.y) / 2);
        Self {
            start,
            end,
            extended_ymin: src.extended_ymin,
            extended_ymax: src.extended_ymax,
            sort_key: Self::sort_key_at(vertical, mid.x, mid.y),
            percent_score: 0,
            mean_width: 0,
            needs_refit: true,
            needs_evaluation: true,
            intersects_other_lines: false,
            alignment,
            boxes: vec![blob],
            partners: SmallVec::new(),
            top_constraint: None,
            bottom_constraint: None,
        }
    }

    /// Sort key of a coordinate pair for the given vertical direction:
    /// the perpendicular projection of the point onto it, so that with a
    /// true-vertical direction the key is simply x.
    pub fn sort_key_at(vertical: Point, x: i32, y: i32) -> i64 {
        Point::new(x, y).cross(vertical)
    }

    /// x at the given y for a sort key under the given vertical direction.
    pub fn x_for_key(vertical: Point, sort_key: i64, y: i32) -> i32 {
        if vertical.y != 0 {
            ((i64::from(vertical.x) * i64::from(y) + sort_key) / i64::from(vertical.y)) as i32
        } else {
            sort_key as i32
        }
    }

    /// x-coordinate of this vector at the given y.
    pub fn x_at_y(&self, y: i32) -> i32 {
        let height = i64::from(self.end.y - self.start.y);
        if height != 0 {
            (i64::from(y - self.start.y) * i64::from(self.end.x - self.start.x) / height) as i32
                + self.start.x
        } else {
            self.start.x
        }
    }

    /// Signed vertical overlap with another vector.
    pub fn v_overlap(&self, other: &TabVector) -> i32 {
        self.end.y.min(other.end.y) - self.start.y.max(other.start.y)
    }

    /// Signed vertical overlap with the given y bounds.
    pub fn v_overlap_range(&self, top_y: i32, bottom_y: i32) -> i32 {
        self.end.y.min(top_y) - self.start.y.max(bottom_y)
    }

    /// Signed vertical overlap of the extended range with the given bounds.
    pub fn extended_overlap(&self, top_y: i32, bottom_y: i32) -> i32 {
        self.extended_ymax.min(top_y) - self.extended_ymin.max(bottom_y)
    }

    pub fn is_left_tab(&self) -> bool {
        self.alignment.is_left()
    }

    pub fn is_right_tab(&self) -> bool {
        self.alignment.is_right()
    }

    pub fn is_ragged(&self) -> bool {
        self.alignment.is_ragged()
    }

    pub fn is_separator(&self) -> bool {
        self.alignment.is_separator()
    }

    pub fn partnerless(&self) -> bool {
        self.partners.is_empty()
    }

    pub fn box_count(&self) -> usize {
        self.boxes.len()
    }

    /// Lock the vector against refits by dropping its contributing boxes.
    pub fn freeze(&mut self) {
        self.boxes.clear();
    }

    /// Move the bottom end to the given y, sliding x along the line.
    pub fn set_y_start(&mut self, y: i32) {
        self.start = Point::new(self.x_at_y(y), y);
    }

    /// Move the top end to the given y, sliding x along the line.
    pub fn set_y_end(&mut self, y: i32) {
        self.end = Point::new(self.x_at_y(y), y);
    }

    /// Rotate both ends, re-flipping them if rotation inverted the line.
    pub fn rotate(&mut self, rot: Rotation) {
        self.start = self.start.rotated(rot);
        self.end = self.end.rotated(rot);
        let d = self.end - self.start;
        if (d.y < 0 && d.y.abs() > d.x.abs()) || (d.x < 0 && d.x.abs() > d.y.abs()) {
            std::mem::swap(&mut self.start, &mut self.end);
        }
    }

    /// Add a blob to the contributing list, keeping bottom-y order. No-op
    /// if the blob is already present.
    pub fn extend_to_box(&mut self, blob: BlobId, blobs: &BlobSet) {
        if self.boxes.contains(&blob) {
            return;
        }
        let bottom = blobs.bounds(blob).bottom;
        let pos = self
            .boxes
            .partition_point(|&b| blobs.bounds(b).bottom <= bottom);
        self.boxes.insert(pos, blob);
        self.needs_refit = true;
    }

    /// (Re)fit the line to the stored blob edges. Returns false if the
    /// line is degenerate.
    ///
    /// A free fit (not `force_parallel`, not ragged) first runs a
    /// least-squares line through the edge points to get a direction; the
    /// vector is then placed parallel to that direction (or the supplied
    /// vertical) through the extreme edge point, so that every blob lies on
    /// the correct side.
    pub fn fit(&mut self, vertical: Point, force_parallel: bool, blobs: &BlobSet) -> bool {
        self.needs_refit = false;
        let mut vertical = vertical;
        if self.boxes.is_empty() {
            // Only happens when evaluation emptied the vector; keep the
            // current span but refresh the sort key.
            if !force_parallel {
                return false;
            }
            let mid = Point::new(
                (self.start.x + self.end.x) / 2,
                (self.start.y + self.end.y) / 2,
            );
            self.sort_key = Self::sort_key_at(vertical, mid.x, mid.y);
            return self.start.y != self.end.y;
        }
        let right = self.is_right_tab();
        if !force_parallel && !self.is_ragged() {
            let mut lsq = LeastSquares::new();
            for (i, &id) in self.boxes.iter().enumerate() {
                let bounds = blobs.bounds(id);
                let x = if right { bounds.right } else { bounds.left };
                lsq.add(Point::new(x, bounds.bottom));
                if i + 1 == self.boxes.len() {
                    lsq.add(Point::new(x, bounds.top));
                }
            }
            if let Some((m, c)) = lsq.solve_x_on_y() {
                let y0 = blobs.bounds(self.boxes[0]).bottom;
                let y1 = blobs.bounds(*self.boxes.last().unwrap()).top;
                if y0 != y1 {
                    let x_at = |y: i32| (m * f64::from(y) + c).round() as i32;
                    vertical = Point::new(x_at(y1) - x_at(y0), y1 - y0);
                }
            }
        }
        let mut start_y = self.start.y;
        let mut end_y = self.end.y;
        let is_left = self.is_left_tab();
        self.sort_key = if is_left { i64::MAX } else { i64::MIN };
        let mut width_sum = 0i64;
        for (i, &id) in self.boxes.iter().enumerate() {
            let bounds = blobs.bounds(id);
            width_sum += i64::from(bounds.width());
            let x = if right { bounds.right } else { bounds.left };
            // Both corners are tried, as either can be the extreme one
            // depending on the direction of skew.
            for y in [bounds.bottom, bounds.top] {
                let key = Self::sort_key_at(vertical, x, y);
                if is_left == (key < self.sort_key) {
                    self.sort_key = key;
                    self.start = Point::new(x, y);
                }
            }
            if i == 0 {
                start_y = bounds.bottom;
            }
            if i + 1 == self.boxes.len() {
                end_y = bounds.top;
            }
        }
        self.mean_width = ((width_sum + self.boxes.len() as i64 - 1) / self.boxes.len() as i64) as i32;
        self.end = self.start + vertical;
        self.needs_evaluation = true;
        if start_y != end_y {
            // Stretch the ends to cover the first and last blob.
            self.start = Point::new(Self::x_for_key(vertical, self.sort_key, start_y), start_y);
            self.end = Point::new(Self::x_for_key(vertical, self.sort_key, end_y), end_y);
            return true;
        }
        false
    }

    /// True if the other vector is the same side, overlaps at least in
    /// extensions, and is close enough to merge. Ragged pairs further apart
    /// are still similar when nothing occupies the rectangle between them.
    pub fn similar_to(
        &self,
        other: &TabVector,
        vertical: Point,
        grid: Option<&BucketGrid>,
    ) -> bool {
        if !((self.is_right_tab() && other.is_right_tab())
            || (self.is_left_tab() && other.is_left_tab()))
        {
            return false;
        }
        if self.extended_overlap(other.extended_ymax, other.extended_ymin) < 0 {
            return false;
        }
        // Fast approximation to the scale factor of the sort key.
        let v_scale = i64::from(vertical.y.abs()).max(1);
        if (self.sort_key - other.sort_key).abs() <= SIMILAR_VECTOR_DIST * v_scale {
            return true;
        }
        if !self.is_ragged()
            || !other.is_ragged()
            || (self.sort_key - other.sort_key).abs() > SIMILAR_RAGGED_DIST * v_scale
        {
            return false;
        }
        let Some(grid) = grid else {
            return true;
        };
        // The vector nearer the column interior is the one that would move;
        // check the strip it would sweep across for content.
        let mover = if self.is_right_tab() == (self.sort_key < other.sort_key) {
            self
        } else {
            other
        };
        let top_y = mover.end.y;
        let bottom_y = mover.start.y;
        let shift = ((self.sort_key - other.sort_key).abs() / v_scale) as i32;
        let mut left = mover.x_at_y(top_y).min(mover.x_at_y(bottom_y));
        let mut right = mover.x_at_y(top_y).max(mover.x_at_y(bottom_y));
        if self.is_right_tab() {
            right += shift;
        } else {
            left -= shift;
        }
        let mut vsearch = grid.search_vertical(left, right, top_y, VerticalDir::Down);
        while let Some(entry) = vsearch.next() {
            let bounds = entry.bounds;
            if bounds.top < bottom_y {
                break; // Past the strip.
            }
            if bounds.bottom > top_y {
                continue; // Doesn't overlap the strip.
            }
            let mut left_at_box = mover.x_at_y(bounds.bottom);
            let mut right_at_box = left_at_box;
            if self.is_right_tab() {
                right_at_box += shift;
            } else {
                left_at_box -= shift;
            }
            if right_at_box.min(bounds.right) > left_at_box.max(bounds.left) {
                return false;
            }
        }
        true
    }

    /// Absorb the other vector: union the extended ranges, adopt a ragged
    /// alignment, merge the box chains in y-order and refit.
    pub fn merge_with(&mut self, other: &TabVector, vertical: Point, blobs: &BlobSet) {
        self.extended_ymin = self.extended_ymin.min(other.extended_ymin);
        self.extended_ymax = self.extended_ymax.max(other.extended_ymax);
        if other.is_ragged() {
            self.alignment = other.alignment;
        }
        for &id in &other.boxes {
            self.extend_to_box(id, blobs);
        }
        self.fit(vertical, true, blobs);
    }
}

/// Arena of tab vectors with a sort-key order and a dead list.
///
/// Slots are id-stable; removed vectors leave a hole so every outstanding
/// `VectorId` stays valid for the page's lifetime.
#[derive(Debug, Default)]
pub struct VectorStore {
    slots: Vec<Option<TabVector>>,
    /// Live ids ordered by sort key (after `sort`).
    order: Vec<VectorId>,
    dead: Vec<TabVector>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, vector: TabVector) -> VectorId {
        let id = VectorId(self.slots.len() as u32);
        self.slots.push(Some(vector));
        self.order.push(id);
        id
    }

    pub fn get(&self, id: VectorId) -> &TabVector {
        self.slots[id.index()].as_ref().expect("dead vector id")
    }

    pub fn get_mut(&mut self, id: VectorId) -> &mut TabVector {
        self.slots[id.index()].as_mut().expect("dead vector id")
    }

    pub fn contains(&self, id: VectorId) -> bool {
        self.slots.get(id.index()).is_some_and(|s| s.is_some())
    }

    pub fn live_count(&self) -> usize {
        self.order.len()
    }

    /// Live ids in sort-key order.
    pub fn ordered_ids(&self) -> &[VectorId] {
        &self.order
    }

    pub fn iter_live(&self) -> impl Iterator<Item = (VectorId, &TabVector)> {
        self.order.iter().map(move |&id| (id, self.get(id)))
    }

    pub fn dead_vectors(&self) -> &[TabVector] {
        &self.dead
    }

    pub fn dead_vectors_mut(&mut self) -> &mut Vec<TabVector> {
        &mut self.dead
    }

    /// Re-sort the live order by sort key.
    pub fn sort(&mut self) {
        let slots = &self.slots;
        self.order
            .sort_by_key(|id| slots[id.index()].as_ref().map(|v| v.sort_key));
    }

    /// Refit every live vector parallel to the new vertical and re-sort.
    pub fn parallelize(&mut self, vertical: Point, blobs: &BlobSet) {
        for id in self.order.clone() {
            self.get_mut(id).fit(vertical, true, blobs);
        }
        self.sort();
    }

    /// Detach a vector from the store, re-pointing its partners at the
    /// replacement (or just dropping the back-references when None).
    pub fn remove(&mut self, id: VectorId, replacement: Option<VectorId>) -> TabVector {
        let vector = self.slots[id.index()].take().expect("dead vector id");
        self.order.retain(|&v| v != id);
        for &partner_id in &vector.partners {
            if !self.contains(partner_id) {
                continue;
            }
            // If the partner already knows the replacement, only drop the
            // stale reference; otherwise swap it in place.
            let replacement = match replacement {
                Some(r) if self.get(partner_id).partners.contains(&r) => None,
                other => other,
            };
            let partner = self.get_mut(partner_id);
            match replacement {
                Some(r) => {
                    for p in partner.partners.iter_mut() {
                        if *p == id {
                            *p = r;
                        }
                    }
                    self.add_partner(r, partner_id);
                }
                None => partner.partners.retain(|p| *p != id),
            }
        }
        vector
    }

    /// Move a vector to the dead list (kept for later rotation but unused
    /// for construction).
    pub fn kill(&mut self, id: VectorId) {
        let vector = self.remove(id, None);
        self.dead.push(vector);
    }

    /// Record a partnership on one side. Separators never partner; groups
    /// of identical consecutive partners collapse to one entry.
    pub fn add_partner(&mut self, vector: VectorId, partner: VectorId) {
        if vector == partner
            || self.get(vector).is_separator()
            || self.get(partner).is_separator()
        {
            return;
        }
        let v = self.get_mut(vector);
        if v.partners.last() == Some(&partner) {
            return;
        }
        v.partners.push(partner);
    }

    /// Record a partnership on both sides.
    pub fn add_partners(&mut self, left: VectorId, right: VectorId) {
        self.add_partner(left, right);
        self.add_partner(right, left);
    }

    /// Merge close same-side vectors that overlap. The shorter member of a
    /// similar pair is absorbed into the longer; idempotent.
    pub fn merge_similar(&mut self, vertical: Point, grid: Option<&BucketGrid>, blobs: &BlobSet) {
        let mut i = 0;
        while i < self.order.len() {
            let mut j = i + 1;
            let mut i_died = false;
            while j < self.order.len() {
                let id_a = self.order[i];
                let id_b = self.order[j];
                if self.get(id_a).similar_to(self.get(id_b), vertical, grid) {
                    let len_a = self.get(id_a).end.y - self.get(id_a).start.y;
                    let len_b = self.get(id_b).end.y - self.get(id_b).start.y;
                    let (keep, absorb) = if len_a >= len_b { (id_a, id_b) } else { (id_b, id_a) };
                    debug!(
                        keep = keep.0,
                        absorb = absorb.0,
                        "merging similar tab vectors"
                    );
                    // remove() re-points the absorbed vector's partners at
                    // the survivor.
                    let absorbed = self.remove(absorb, Some(keep));
                    self.get_mut(keep).merge_with(&absorbed, vertical, blobs);
                    if absorb == id_a {
                        i_died = true;
                        break;
                    }
                    // id_b was absorbed; order shrank, j now points at the
                    // next candidate already.
                } else {
                    j += 1;
                }
            }
            if !i_died {
                i += 1;
            }
        }
        self.sort();
    }

    /// Find the nearest tab vector left of the box (by x at its mid-y)
    /// that vertically overlaps it.
    ///
    /// Vectors are ordered by sort key, but x at a given y is not monotone
    /// in sort key when directions differ, so the scan carries a margin: a
    /// vector passing through (x, y) must have its middle between the
    /// halfway points to the top and bottom of the page, which bounds how
    /// far past the first hit the scan must look.
    pub fn left_tab_for_box(
        &self,
        bounds: crate::geom::BBox,
        vertical: Point,
        page_bottom_y: i32,
        page_top_y: i32,
        crossing: bool,
        extended: bool,
    ) -> Option<VectorId> {
        if self.order.is_empty() {
            return None;
        }
        let mid_y = bounds.mid_y();
        let left = if crossing { bounds.mid_x() } else { bounds.left };
        let (min_key, max_key) = self.search_keys(left, mid_y, vertical, page_bottom_y, page_top_y);
        // Start from the last vector with sort_key <= max_key.
        let start = self
            .order
            .partition_point(|&id| self.get(id).sort_key <= max_key);
        let mut best: Option<(VectorId, i32)> = None;
        let mut key_limit = i64::MIN;
        for idx in (0..start.min(self.order.len())).rev() {
            let id = self.order[idx];
            let v = self.get(id);
            if best.is_some() && v.sort_key < key_limit {
                break;
            }
            let x = v.x_at_y(mid_y);
            if x <= left
                && (v.v_overlap_range(bounds.top, bounds.bottom) > 0
                    || (extended && v.extended_overlap(bounds.top, bounds.bottom) > 0))
                && best.map_or(true, |(_, bx)| x > bx)
            {
                key_limit = v.sort_key - (max_key - min_key);
                best = Some((id, x));
            }
        }
        best.map(|(id, _)| id)
    }

    /// As `left_tab_for_box`, but finds the nearest vector to the right.
    pub fn right_tab_for_box(
        &self,
        bounds: crate::geom::BBox,
        vertical: Point,
        page_bottom_y: i32,
        page_top_y: i32,
        crossing: bool,
        extended: bool,
    ) -> Option<VectorId> {
        if self.order.is_empty() {
            return None;
        }
        let mid_y = bounds.mid_y();
        let right = if crossing { bounds.mid_x() } else { bounds.right };
        let (min_key, max_key) = self.search_keys(right, mid_y, vertical, page_bottom_y, page_top_y);
        let start = self
            .order
            .partition_point(|&id| self.get(id).sort_key < min_key);
        let mut best: Option<(VectorId, i32)> = None;
        let mut key_limit = i64::MAX;
        for idx in start..self.order.len() {
            let id = self.order[idx];
            let v = self.get(id);
            if best.is_some() && v.sort_key > key_limit {
                break;
            }
            let x = v.x_at_y(mid_y);
            if x >= right
                && (v.v_overlap_range(bounds.top, bounds.bottom) > 0
                    || (extended && v.extended_overlap(bounds.top, bounds.bottom) > 0))
                && best.map_or(true, |(_, bx)| x < bx)
            {
                key_limit = v.sort_key + (max_key - min_key);
                best = Some((id, x));
            }
        }
        best.map(|(id, _)| id)
    }

    fn search_keys(
        &self,
        x: i32,
        y: i32,
        vertical: Point,
        page_bottom_y: i32,
        page_top_y: i32,
    ) -> (i64, i64) {
        let key1 = TabVector::sort_key_at(vertical, x, (y + page_top_y) / 2);
        let key2 = TabVector::sort_key_at(vertical, x, (y + page_bottom_y) / 2);
        (key1.min(key2), key1.max(key2))
    }
}
