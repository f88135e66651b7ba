//! Uniform-cell spatial index over blob bounding boxes.
//!
//! The grid covers a fixed pixel extent with square cells of `gridsize`
//! pixels. Cells hold `(BlobId, BBox)` snapshots ordered by box left edge;
//! when a blob's geometry changes it must be explicitly removed and
//! re-inserted. Searches are cell-granular: they return every entry in the
//! cells they visit, so callers must re-check the exact geometry. No search
//! mutates the grid.

use crate::blob::BlobId;
use crate::geom::BBox;

/// A snapshot of one indexed blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridEntry {
    pub id: BlobId,
    pub bounds: BBox,
}

/// Which way a vertical band search walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerticalDir {
    Up,
    Down,
}

/// Which way a side search walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideDir {
    Left,
    Right,
}

/// Uniform bucket grid over axis-aligned boxes.
#[derive(Debug)]
pub struct BucketGrid {
    gridsize: i32,
    bleft: crate::geom::Point,
    tright: crate::geom::Point,
    width: i32,
    height: i32,
    cells: Vec<Vec<GridEntry>>,
}

impl BucketGrid {
    /// Create a grid of `gridsize`-pixel cells covering `bleft..tright`.
    pub fn new(gridsize: i32, bleft: crate::geom::Point, tright: crate::geom::Point) -> Self {
        let gridsize = gridsize.max(1);
        let width = (tright.x - bleft.x + gridsize - 1) / gridsize;
        let height = (tright.y - bleft.y + gridsize - 1) / gridsize;
        let width = width.max(1);
        let height = height.max(1);
        Self {
            gridsize,
            bleft,
            tright,
            width,
            height,
            cells: vec![Vec::new(); (width * height) as usize],
        }
    }

    pub fn gridsize(&self) -> i32 {
        self.gridsize
    }

    pub fn bleft(&self) -> crate::geom::Point {
        self.bleft
    }

    pub fn tright(&self) -> crate::geom::Point {
        self.tright
    }

    /// Grid cell coordinates for a pixel position, clipped into range.
    pub fn grid_coords(&self, x: i32, y: i32) -> (i32, i32) {
        let gx = ((x - self.bleft.x) / self.gridsize).clamp(0, self.width - 1);
        let gy = ((y - self.bleft.y) / self.gridsize).clamp(0, self.height - 1);
        (gx, gy)
    }

    fn cell(&self, gx: i32, gy: i32) -> &[GridEntry] {
        &self.cells[(gy * self.width + gx) as usize]
    }

    fn cell_mut(&mut self, gx: i32, gy: i32) -> &mut Vec<GridEntry> {
        &mut self.cells[(gy * self.width + gx) as usize]
    }

    /// Insert a blob. With `h_spread`/`v_spread` the entry goes into every
    /// cell the box covers in that direction, otherwise only the cell of
    /// its bottom-left corner.
    pub fn insert(&mut self, id: BlobId, bounds: BBox, h_spread: bool, v_spread: bool) {
        let (start_x, start_y) = self.grid_coords(bounds.left, bounds.bottom);
        let (mut end_x, mut end_y) = self.grid_coords(bounds.right, bounds.top);
        if !h_spread {
            end_x = start_x;
        }
        if !v_spread {
            end_y = start_y;
        }
        let entry = GridEntry { id, bounds };
        for gy in start_y..=end_y {
            for gx in start_x..=end_x {
                let cell = self.cell_mut(gx, gy);
                if cell.iter().any(|e| e.id == id) {
                    continue;
                }
                let pos = cell.partition_point(|e| e.bounds.left <= bounds.left);
                cell.insert(pos, entry);
            }
        }
    }

    /// Remove every entry for the blob. `bounds` must be the bounds it was
    /// inserted with.
    pub fn remove(&mut self, id: BlobId, bounds: BBox) {
        let (start_x, start_y) = self.grid_coords(bounds.left, bounds.bottom);
        let (end_x, end_y) = self.grid_coords(bounds.right, bounds.top);
        for gy in start_y..=end_y {
            for gx in start_x..=end_x {
                self.cell_mut(gx, gy).retain(|e| e.id != id);
            }
        }
    }

    /// Iterate every stored blob exactly once, top row first.
    pub fn search_full(&self) -> FullSearch<'_> {
        FullSearch {
            grid: self,
            gx: 0,
            gy: self.height - 1,
            idx: 0,
        }
    }

    /// Search an x-band, walking rows away from `start_y` in the given
    /// direction. The starting row itself is included.
    pub fn search_vertical(&self, xmin: i32, xmax: i32, start_y: i32, dir: VerticalDir) -> VerticalSearch<'_> {
        let radius = (xmax - xmin + self.gridsize - 1) / self.gridsize;
        let (gx, gy) = self.grid_coords(xmin, start_y);
        VerticalSearch {
            grid: self,
            x_origin: gx,
            gy,
            rad: 0,
            radius,
            idx: 0,
            dir,
            done: false,
        }
    }

    /// Search sideways from `x` for boxes vertically overlapping
    /// `[ymin, ymax]`. The strip is doubled downwards so that boxes up to
    /// twice the band height anchored in lower cells are still found.
    pub fn search_side(&self, x: i32, ymin: i32, ymax: i32, dir: SideDir) -> SideSearch<'_> {
        let radius = ((ymax - ymin) * 2 + self.gridsize - 1) / self.gridsize;
        let (gx, gy) = self.grid_coords(x, ymax);
        SideSearch {
            grid: self,
            gx,
            y_origin: gy,
            rad: 0,
            radius,
            idx: 0,
            dir,
            done: false,
        }
    }

    /// Search every cell overlapping the given rectangle.
    pub fn search_rect(&self, rect: BBox) -> RectSearch<'_> {
        let (x_min, y_min) = self.grid_coords(rect.left, rect.bottom);
        let (x_max, y_max) = self.grid_coords(rect.right, rect.top);
        RectSearch {
            grid: self,
            x_min,
            x_max,
            y_min,
            gx: x_min,
            gy: y_max,
            idx: 0,
            done: false,
        }
    }

    /// Search diamond-shaped rings of cells of increasing radius around a
    /// pixel position, out to `max_radius` cells.
    pub fn search_radius(&self, x: i32, y: i32, max_radius: i32) -> RadiusSearch<'_> {
        let (gx, gy) = self.grid_coords(x, y);
        RadiusSearch {
            grid: self,
            x_origin: gx,
            y_origin: gy,
            max_radius,
            radius: 0,
            ring_pos: 0,
            gx,
            gy,
            idx: 0,
            started: false,
            done: false,
        }
    }
}

/// Cursor over every blob in the grid, each returned exactly once.
pub struct FullSearch<'a> {
    grid: &'a BucketGrid,
    gx: i32,
    gy: i32,
    idx: usize,
}

impl FullSearch<'_> {
    pub fn next(&mut self) -> Option<GridEntry> {
        loop {
            if self.gy < 0 {
                return None;
            }
            let cell = self.grid.cell(self.gx, self.gy);
            if let Some(entry) = cell.get(self.idx) {
                self.idx += 1;
                // Spread copies are skipped: only the entry whose anchor
                // cell is the current cell counts.
                let (ax, ay) = self
                    .grid
                    .grid_coords(entry.bounds.left, entry.bounds.bottom);
                if ax == self.gx && ay == self.gy {
                    return Some(*entry);
                }
                continue;
            }
            self.idx = 0;
            self.gx += 1;
            if self.gx >= self.grid.width {
                self.gx = 0;
                self.gy -= 1;
            }
        }
    }
}

/// Cursor for a vertical band search.
pub struct VerticalSearch<'a> {
    grid: &'a BucketGrid,
    x_origin: i32,
    gy: i32,
    rad: i32,
    radius: i32,
    idx: usize,
    dir: VerticalDir,
    done: bool,
}

impl VerticalSearch<'_> {
    pub fn next(&mut self) -> Option<GridEntry> {
        loop {
            if self.done {
                return None;
            }
            let gx = self.x_origin + self.rad;
            if gx < self.grid.width {
                let cell = self.grid.cell(gx, self.gy);
                if let Some(entry) = cell.get(self.idx) {
                    self.idx += 1;
                    return Some(*entry);
                }
            }
            self.idx = 0;
            self.rad += 1;
            if self.rad > self.radius {
                self.rad = 0;
                self.gy += match self.dir {
                    VerticalDir::Up => 1,
                    VerticalDir::Down => -1,
                };
                if self.gy < 0 || self.gy >= self.grid.height {
                    self.done = true;
                }
            }
        }
    }
}

/// Cursor for a sideways search.
pub struct SideSearch<'a> {
    grid: &'a BucketGrid,
    gx: i32,
    y_origin: i32,
    rad: i32,
    radius: i32,
    idx: usize,
    dir: SideDir,
    done: bool,
}

impl SideSearch<'_> {
    pub fn next(&mut self) -> Option<GridEntry> {
        loop {
            if self.done {
                return None;
            }
            let gy = self.y_origin - self.rad;
            if gy >= 0 {
                let cell = self.grid.cell(self.gx, gy);
                if let Some(entry) = cell.get(self.idx) {
                    self.idx += 1;
                    return Some(*entry);
                }
            }
            self.idx = 0;
            self.rad += 1;
            if self.rad > self.radius {
                self.rad = 0;
                self.gx += match self.dir {
                    SideDir::Left => -1,
                    SideDir::Right => 1,
                };
                if self.gx < 0 || self.gx >= self.grid.width {
                    self.done = true;
                }
            }
        }
    }
}

/// Cursor for a rectangle search, scanned left-to-right, top-to-bottom.
pub struct RectSearch<'a> {
    grid: &'a BucketGrid,
    x_min: i32,
    x_max: i32,
    y_min: i32,
    gx: i32,
    gy: i32,
    idx: usize,
    done: bool,
}

impl RectSearch<'_> {
    pub fn next(&mut self) -> Option<GridEntry> {
        loop {
            if self.done {
                return None;
            }
            let cell = self.grid.cell(self.gx, self.gy);
            if let Some(entry) = cell.get(self.idx) {
                self.idx += 1;
                return Some(*entry);
            }
            self.idx = 0;
            self.gx += 1;
            if self.gx > self.x_max {
                self.gx = self.x_min;
                self.gy -= 1;
                if self.gy < self.y_min {
                    self.done = true;
                }
            }
        }
    }
}

/// Unit steps tracing a diamond ring, one per quadrant.
const RING_STEPS: [(i32, i32); 4] = [(0, -1), (1, 0), (0, 1), (-1, 0)];

/// Cursor for a diamond radius search.
pub struct RadiusSearch<'a> {
    grid: &'a BucketGrid,
    x_origin: i32,
    y_origin: i32,
    max_radius: i32,
    radius: i32,
    ring_pos: i32,
    gx: i32,
    gy: i32,
    idx: usize,
    started: bool,
    done: bool,
}

impl RadiusSearch<'_> {
    fn advance_cell(&mut self) {
        if !self.started {
            // Centre cell comes first, as ring radius zero.
            self.started = true;
            self.gx = self.x_origin;
            self.gy = self.y_origin;
            return;
        }
        loop {
            if self.radius == 0 {
                self.radius = 1;
                self.ring_pos = 0;
            } else {
                self.ring_pos += 1;
                if self.ring_pos >= self.radius * 4 {
                    self.radius += 1;
                    self.ring_pos = 0;
                }
            }
            if self.radius > self.max_radius {
                self.done = true;
                return;
            }
            let side = (self.ring_pos / self.radius) as usize;
            let along = self.ring_pos % self.radius;
            // Corner of this side, then walk along it.
            let (sx, sy) = RING_STEPS[side];
            let (wx, wy) = RING_STEPS[(side + 1) % 4];
            self.gx = self.x_origin + sx * (self.radius - along) + wx * along;
            self.gy = self.y_origin + sy * (self.radius - along) + wy * along;
            if self.gx >= 0 && self.gx < self.grid.width && self.gy >= 0 && self.gy < self.grid.height
            {
                return;
            }
        }
    }

    pub fn next(&mut self) -> Option<GridEntry> {
        if !self.started {
            self.advance_cell();
        }
        loop {
            if self.done {
                return None;
            }
            let cell = self.grid.cell(self.gx, self.gy);
            if let Some(entry) = cell.get(self.idx) {
                self.idx += 1;
                return Some(*entry);
            }
            self.idx = 0;
            self.advance_cell();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Point;

    fn grid_with(boxes: &[BBox], h_spread: bool, v_spread: bool) -> BucketGrid {
        let mut grid = BucketGrid::new(10, Point::new(0, 0), Point::new(100, 100));
        for (i, b) in boxes.iter().enumerate() {
            grid.insert(BlobId(i as u32), *b, h_spread, v_spread);
        }
        grid
    }

    fn collect_full(grid: &BucketGrid) -> Vec<BlobId> {
        let mut out = Vec::new();
        let mut search = grid.search_full();
        while let Some(e) = search.next() {
            out.push(e.id);
        }
        out
    }

    #[test]
    fn test_full_search_returns_each_blob_once() {
        let grid = grid_with(
            &[
                BBox::new(5, 5, 45, 15),
                BBox::new(5, 50, 8, 55),
                BBox::new(70, 70, 95, 95),
            ],
            true,
            true,
        );
        let mut ids = collect_full(&grid);
        ids.sort();
        assert_eq!(ids, vec![BlobId(0), BlobId(1), BlobId(2)]);
    }

    #[test]
    fn test_full_search_starts_at_top() {
        let grid = grid_with(&[BBox::new(5, 5, 8, 8), BBox::new(5, 90, 8, 95)], false, false);
        assert_eq!(collect_full(&grid), vec![BlobId(1), BlobId(0)]);
    }

    #[test]
    fn test_vertical_search_moves_away_from_start() {
        let grid = grid_with(
            &[
                BBox::new(20, 10, 25, 15),
                BBox::new(20, 40, 25, 45),
                BBox::new(20, 80, 25, 85),
                BBox::new(70, 40, 75, 45),
            ],
            false,
            false,
        );
        let mut up = grid.search_vertical(15, 30, 20, VerticalDir::Up);
        let mut seen = Vec::new();
        while let Some(e) = up.next() {
            seen.push(e.id);
        }
        // Band excludes the blob at x=70; both in-band blobs above the
        // start row appear, nearer row first.
        assert_eq!(seen, vec![BlobId(1), BlobId(2)]);

        let mut down = grid.search_vertical(15, 30, 90, VerticalDir::Down);
        let mut seen = Vec::new();
        while let Some(e) = down.next() {
            seen.push(e.id);
        }
        assert_eq!(seen, vec![BlobId(2), BlobId(1), BlobId(0)]);
    }

    #[test]
    fn test_side_search_walks_columns() {
        let grid = grid_with(
            &[
                BBox::new(10, 40, 15, 45),
                BBox::new(40, 40, 45, 45),
                BBox::new(80, 40, 85, 45),
            ],
            false,
            false,
        );
        let mut right = grid.search_side(20, 38, 48, SideDir::Right);
        let mut seen = Vec::new();
        while let Some(e) = right.next() {
            seen.push(e.id);
        }
        assert_eq!(seen, vec![BlobId(1), BlobId(2)]);

        let mut left = grid.search_side(90, 38, 48, SideDir::Left);
        let mut seen = Vec::new();
        while let Some(e) = left.next() {
            seen.push(e.id);
        }
        assert_eq!(seen, vec![BlobId(2), BlobId(1), BlobId(0)]);
    }

    #[test]
    fn test_rect_search_covers_overlapping_cells() {
        let grid = grid_with(
            &[BBox::new(5, 5, 8, 8), BBox::new(35, 35, 38, 38), BBox::new(90, 90, 95, 95)],
            false,
            false,
        );
        let mut search = grid.search_rect(BBox::new(0, 0, 50, 50));
        let mut seen = Vec::new();
        while let Some(e) = search.next() {
            seen.push(e.id);
        }
        seen.sort();
        assert_eq!(seen, vec![BlobId(0), BlobId(1)]);
    }

    #[test]
    fn test_radius_search_expands_outwards() {
        let grid = grid_with(
            &[BBox::new(51, 51, 55, 55), BBox::new(25, 51, 28, 55), BBox::new(5, 5, 8, 8)],
            false,
            false,
        );
        let mut search = grid.search_radius(53, 53, 3);
        let mut seen = Vec::new();
        while let Some(e) = search.next() {
            seen.push(e.id);
        }
        // Centre blob first; the blob two cells away next; far corner is
        // outside the radius.
        assert_eq!(seen, vec![BlobId(0), BlobId(1)]);
    }

    #[test]
    fn test_remove_then_search_finds_nothing() {
        let bounds = BBox::new(20, 20, 60, 30);
        let mut grid = BucketGrid::new(10, Point::new(0, 0), Point::new(100, 100));
        grid.insert(BlobId(7), bounds, true, true);
        grid.remove(BlobId(7), bounds);
        assert!(collect_full(&grid).is_empty());
    }

    #[test]
    fn test_spread_insertion_reaches_covered_cells() {
        let bounds = BBox::new(5, 5, 75, 8);
        let grid = grid_with(&[bounds], true, false);
        let mut search = grid.search_rect(BBox::new(70, 0, 75, 9));
        assert_eq!(search.next().map(|e| e.id), Some(BlobId(0)));
    }
}
