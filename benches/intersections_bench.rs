use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use box_halo::exchange::pattern::{FillKey, build_fill};
use box_halo::geometry::{IndexBox, IntVect, Periodicity};
use box_halo::region::{DistributionMap, RegionSet};

fn grid(n: i32, w: i32) -> RegionSet {
    let mut boxes = Vec::with_capacity((n * n) as usize);
    for j in 0..n {
        for i in 0..n {
            let lo = IntVect::new(i * w, j * w, 0);
            boxes.push(IndexBox::cell(lo, lo + IntVect::new(w - 1, w - 1, 0)));
        }
    }
    RegionSet::new(boxes).expect("cell-centred grid")
}

fn bench_intersections(c: &mut Criterion) {
    let mut group = c.benchmark_group("intersections");

    for &n in &[16i32, 64] {
        let region = grid(n, 8);
        region.build_index();
        let q = IndexBox::cell(IntVect::new(60, 60, 0), IntVect::new(75, 75, 0));

        group.bench_with_input(BenchmarkId::new("hashed", n), &n, |b, _| {
            b.iter(|| black_box(region.intersections_with(&q, false, IntVect::new(2, 2, 0))))
        });

        let boxes: Vec<IndexBox> = region.iter().collect();
        group.bench_with_input(BenchmarkId::new("linear_scan", n), &n, |b, _| {
            b.iter(|| {
                black_box(
                    boxes
                        .iter()
                        .enumerate()
                        .filter(|(_, bx)| bx.grow(IntVect::new(2, 2, 0)).intersects(&q))
                        .count(),
                )
            })
        });
    }
    group.finish();
}

fn bench_fill_pattern(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill_pattern");
    for &n in &[8i32, 32] {
        let region = grid(n, 16);
        let dist = DistributionMap::round_robin(region.len(), 4);
        let key = FillKey::new(IntVect::new(2, 2, 0))
            .periodic(Periodicity::new(IntVect::new(16 * n, 16 * n, 0)));
        group.bench_with_input(BenchmarkId::new("build_fill", n), &n, |b, _| {
            b.iter(|| black_box(build_fill(&region, &dist, &key, 0)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_intersections, bench_fill_pattern);
criterion_main!(benches);
