//! End-to-end tests for the tab-stop detection pipeline.
//!
//! Covers termination on pathological layouts, multi-column detection,
//! skew estimation with deskew round-trips, and column-width statistics.

use meridian_core::params::AlignParams;
use meridian_core::search::find_vertical_alignment;
use meridian_core::{
    Alignment, BBox, Blob, BlobSet, BucketGrid, DebugContext, FinderConfig, Point, TabFindError,
    TabFinder, TabState,
};

// ============================================================================
// Helpers
// ============================================================================

/// Deterministic linear congruential generator for fuzz layouts.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }

    fn range(&mut self, lo: i32, hi: i32) -> i32 {
        lo + (self.next() % (hi - lo) as u32) as i32
    }
}

fn page_finder(extent: BBox, config: FinderConfig) -> TabFinder {
    TabFinder::new(
        Point::new(extent.left - 1, extent.bottom - 1),
        Point::new(extent.right + 1, extent.top + 1),
        300,
        config,
        DebugContext::INACTIVE,
    )
    .unwrap()
}

/// A page with `columns` columns of full-width line blobs.
fn columns_page(columns: &[(i32, i32)], lines: i32, pitch: i32) -> BlobSet {
    let mut blobs = BlobSet::new();
    for line in 0..lines {
        let y = 100 + line * pitch;
        for &(x0, x1) in columns {
            blobs.push(Blob::new(BBox::new(x0, y, x1, y + 20)));
        }
    }
    blobs
}

// ============================================================================
// Termination
// ============================================================================

#[test]
fn test_alignment_search_terminates_on_random_layouts() {
    let mut rng = Lcg(0x5eed);
    for round in 0..20 {
        let mut blobs = BlobSet::new();
        let mut ids = Vec::new();
        for _ in 0..150 {
            let x = rng.range(0, 1800);
            let y = rng.range(0, 2300);
            let w = rng.range(4, 120);
            let h = rng.range(4, 40);
            ids.push(blobs.push(Blob::new(BBox::new(x, y, x + w, y + h))));
        }
        // Pathological same-y duplicates of the previous box.
        for i in 0..20 {
            let bounds = blobs.bounds(ids[i * 3]);
            ids.push(blobs.push(Blob::new(bounds)));
        }
        let extent = blobs.extent().unwrap();
        let mut grid = BucketGrid::new(
            16,
            Point::new(extent.left - 16, extent.bottom - 16),
            Point::new(extent.right + 16, extent.top + 16),
        );
        for &id in &ids {
            grid.insert(id, blobs.bounds(id), true, false);
            blobs.get_mut(id).left_tab = TabState::MaybeAligned;
            blobs.get_mut(id).right_tab = TabState::MaybeAligned;
        }
        let mut vertical_sum = Point::new(0, 1);
        for &id in &ids {
            for alignment in [
                Alignment::LeftAligned,
                Alignment::RightAligned,
                Alignment::LeftRagged,
                Alignment::RightRagged,
            ] {
                let params = AlignParams::for_tab_search(
                    Point::new(0, 1),
                    blobs.bounds(id).height(),
                    12,
                    0,
                    300,
                    alignment,
                );
                // Must return; the monotone-y guarantee bounds the walk.
                let _ = find_vertical_alignment(
                    &grid,
                    &mut blobs,
                    &params,
                    id,
                    &mut vertical_sum,
                    &DebugContext::INACTIVE,
                );
            }
        }
        let _ = round;
    }
}

#[test]
fn test_full_pipeline_terminates_on_random_layouts() {
    let mut rng = Lcg(0xfeedbeef);
    for _ in 0..5 {
        let mut blobs = BlobSet::new();
        for _ in 0..200 {
            let x = rng.range(0, 1500);
            let y = rng.range(0, 2000);
            let w = rng.range(4, 150);
            let h = rng.range(4, 40);
            blobs.push(Blob::new(BBox::new(x, y, x + w, y + h)));
        }
        let extent = blobs.extent().unwrap();
        let mut finder = page_finder(extent, FinderConfig::default());
        // Random pages may legitimately fail the skew gate; they must
        // never hang or panic.
        match finder.find_tab_vectors(&mut blobs, Vec::new()) {
            Ok(_) => {}
            Err(TabFindError::ExcessiveSkew { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}

// ============================================================================
// Multi-column detection
// ============================================================================

#[test]
fn test_three_column_page() {
    let mut blobs = columns_page(&[(100, 500), (600, 1000), (1100, 1500)], 16, 40);
    let extent = blobs.extent().unwrap();
    let mut finder = page_finder(extent, FinderConfig::default());
    let outcome = finder.find_tab_vectors(&mut blobs, Vec::new()).unwrap();
    assert_eq!(outcome.vertical_skew, Point::new(0, 1));

    let lefts: Vec<i32> = finder
        .vectors()
        .iter_live()
        .filter(|(_, v)| v.is_left_tab())
        .map(|(_, v)| v.x_at_y(400))
        .collect();
    let rights: Vec<i32> = finder
        .vectors()
        .iter_live()
        .filter(|(_, v)| v.is_right_tab())
        .map(|(_, v)| v.x_at_y(400))
        .collect();
    for expected in [100, 600, 1100] {
        assert!(
            lefts.iter().any(|&x| (x - expected).abs() <= 5),
            "missing left tab near {expected}, found {lefts:?}"
        );
    }
    for expected in [500, 1000, 1500] {
        assert!(
            rights.iter().any(|&x| (x - expected).abs() <= 5),
            "missing right tab near {expected}, found {rights:?}"
        );
    }
    // All three columns share the same width.
    assert!(finder.is_common_width(400));
}

#[test]
fn test_confirmed_states_survive_the_run() {
    let mut blobs = columns_page(&[(100, 500), (600, 1000)], 14, 40);
    let extent = blobs.extent().unwrap();
    let mut finder = page_finder(extent, FinderConfig::default());
    finder.find_tab_vectors(&mut blobs, Vec::new()).unwrap();
    let confirmed = blobs
        .iter()
        .filter(|(_, b)| {
            b.left_tab == TabState::Confirmed || b.right_tab == TabState::Confirmed
        })
        .count();
    assert!(confirmed > 0, "no blob kept a confirmed tab edge");
}

// ============================================================================
// Skew handling
// ============================================================================

#[test]
fn test_skewed_page_is_deskewed() {
    // Column edges lean 2px right per 40px of height, about 2.9 degrees.
    let mut blobs = BlobSet::new();
    for line in 0..16 {
        let y = 100 + line * 40;
        let shift = line * 2;
        blobs.push(Blob::new(BBox::new(
            100 + shift,
            y,
            500 + shift,
            y + 20,
        )));
        blobs.push(Blob::new(BBox::new(
            600 + shift,
            y,
            1000 + shift,
            y + 20,
        )));
    }
    let extent = blobs.extent().unwrap();
    let mut finder = page_finder(extent, FinderConfig::default());
    let outcome = finder.find_tab_vectors(&mut blobs, Vec::new()).unwrap();
    // The rotation leans the other way and stays within the gate.
    assert!(outcome.deskew.sin > 0.0);
    assert!(outcome.deskew.cos >= 0.866025);
    // Round trip within a pixel.
    for &p in &[Point::new(250, 380), Point::new(990, 105)] {
        let back = p.rotated(outcome.deskew).rotated(outcome.reskew);
        assert!((back.x - p.x).abs() <= 1 && (back.y - p.y).abs() <= 1);
    }
    // After deskew the page vertical is true vertical.
    assert_eq!(outcome.vertical_skew, Point::new(0, 1));
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_min_gutter_override_suppresses_candidates() {
    let mut narrow = columns_page(&[(100, 500), (540, 940)], 14, 40);
    let extent = narrow.extent().unwrap();
    // Default config happily splits the two columns.
    let mut finder = page_finder(extent, FinderConfig::default());
    finder.find_tab_vectors(&mut narrow, Vec::new()).unwrap();
    let default_vectors = finder.vectors().live_count();

    // Requiring a 200px gutter removes the evidence for the inner edges.
    let mut narrow = columns_page(&[(100, 500), (540, 940)], 14, 40);
    let mut finder = page_finder(
        extent,
        FinderConfig {
            min_gutter_width: 200,
            ..FinderConfig::default()
        },
    );
    match finder.find_tab_vectors(&mut narrow, Vec::new()) {
        Ok(_) => {
            assert!(
                finder.vectors().live_count() <= default_vectors,
                "wider gutter requirement must not add vectors"
            );
        }
        Err(TabFindError::ExcessiveSkew { .. }) => {}
        Err(e) => panic!("unexpected error: {e}"),
    }
}

#[test]
fn test_empty_grid_extent_is_an_error() {
    let result = TabFinder::new(
        Point::new(100, 100),
        Point::new(100, 100),
        300,
        FinderConfig::default(),
        DebugContext::INACTIVE,
    );
    assert!(matches!(
        result,
        Err(TabFindError::EmptyGridExtent { .. })
    ));
}
