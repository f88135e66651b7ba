//! Benchmarks for the bucket-grid search modes.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use meridian_core::{BBox, Blob, BlobSet, BucketGrid, Point};

fn build_page(cols: i32, rows: i32) -> (BucketGrid, BlobSet) {
    let mut blobs = BlobSet::new();
    let mut grid = BucketGrid::new(
        16,
        Point::new(0, 0),
        Point::new(cols * 60 + 60, rows * 30 + 60),
    );
    for row in 0..rows {
        for col in 0..cols {
            let x = 20 + col * 60;
            let y = 20 + row * 30;
            let id = blobs.push(Blob::new(BBox::new(x, y, x + 40, y + 20)));
            grid.insert(id, blobs.bounds(id), true, false);
        }
    }
    (grid, blobs)
}

fn bench_searches(c: &mut Criterion) {
    let (grid, _blobs) = build_page(30, 80);

    c.bench_function("full_search_2400", |b| {
        b.iter(|| {
            let mut count = 0;
            let mut search = grid.search_full();
            while search.next().is_some() {
                count += 1;
            }
            black_box(count)
        })
    });

    c.bench_function("vertical_band_search", |b| {
        b.iter(|| {
            let mut count = 0;
            let mut search = grid.search_vertical(
                black_box(100),
                black_box(160),
                20,
                meridian_core::grid::VerticalDir::Up,
            );
            while search.next().is_some() {
                count += 1;
            }
            black_box(count)
        })
    });

    c.bench_function("radius_search_r8", |b| {
        b.iter(|| {
            let mut count = 0;
            let mut search = grid.search_radius(black_box(900), black_box(1200), 8);
            while search.next().is_some() {
                count += 1;
            }
            black_box(count)
        })
    });
}

criterion_group!(benches, bench_searches);
criterion_main!(benches);
