use box_halo::exchange::pattern::{CopyKey, FillKey, build_copy, build_fill};
use box_halo::exchange::tags::{CommMetaData, CopyTag, check_symmetry};
use box_halo::geometry::{IndexBox, IntVect, Periodicity};
use box_halo::region::{DistributionMap, RegionSet};
use proptest::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

/// Tiling of `[0, sum(xs)) x [0, sum(ys))` with the given tile widths.
fn tiling(xs: &[i32], ys: &[i32]) -> (RegionSet, IntVect) {
    let mut boxes = Vec::new();
    let mut y0 = 0;
    for &h in ys {
        let mut x0 = 0;
        for &w in xs {
            boxes.push(IndexBox::cell(
                IntVect::new(x0, y0, 0),
                IntVect::new(x0 + w - 1, y0 + h - 1, 0),
            ));
            x0 += w;
        }
        y0 += h;
    }
    let extent = IntVect::new(xs.iter().sum(), ys.iter().sum(), 0);
    (RegionSet::new(boxes).unwrap(), extent)
}

fn random_owners(n: usize, nprocs: usize, seed: u64) -> DistributionMap {
    let mut rng = SmallRng::seed_from_u64(seed);
    DistributionMap::from_ranks((0..n).map(|_| rng.gen_range(0..nprocs)).collect())
}

/// No destination cell is written by two tags.
fn assert_first_wins(all: &[CommMetaData]) {
    let mut by_dst: BTreeMap<usize, Vec<CopyTag>> = BTreeMap::new();
    for md in all {
        for t in md.local.iter().chain(md.recvs.values().flatten()) {
            by_dst.entry(t.dst_index).or_default().push(*t);
        }
    }
    for (j, tags) in by_dst {
        for (a, ta) in tags.iter().enumerate() {
            for tb in &tags[a + 1..] {
                assert!(
                    !ta.region.intersects(&tb.region),
                    "box {j}: {ta:?} overlaps {tb:?}"
                );
            }
        }
    }
}

proptest! {
    #[test]
    fn fill_patterns_pair_up_across_ranks(
        xs in prop::collection::vec(1i32..6, 1..4),
        ys in prop::collection::vec(1i32..6, 1..4),
        nprocs in 1usize..4,
        seed in any::<u64>(),
        ghost in 0i32..3,
        periodic in any::<bool>(),
        cross in any::<bool>(),
    ) {
        let (region, extent) = tiling(&xs, &ys);
        let dist = random_owners(region.len(), nprocs, seed);
        let mut key = FillKey::new(IntVect::new(ghost, ghost, 0));
        if periodic {
            key = key.periodic(Periodicity::new(extent));
        }
        if cross {
            key = key.cross();
        }
        let all: Vec<_> = (0..nprocs).map(|r| build_fill(&region, &dist, &key, r)).collect();
        prop_assert!(check_symmetry(&all).is_ok());
        assert_first_wins(&all);
    }

    #[test]
    fn copy_patterns_pair_up_across_ranks(
        xs in prop::collection::vec(1i32..6, 1..4),
        ys in prop::collection::vec(1i32..6, 1..4),
        nprocs in 1usize..4,
        seed in any::<u64>(),
        dst_ghost in 0i32..2,
        src_ghost in 0i32..=2,
        periodic in any::<bool>(),
    ) {
        let (src, extent) = tiling(&xs, &ys);
        let (dst, _) = tiling(&[extent[0]], &ys);
        let src_dist = random_owners(src.len(), nprocs, seed);
        let dst_dist = random_owners(dst.len(), nprocs, seed.rotate_left(7));
        let mut key = CopyKey::with_ghosts(
            IntVect::new(dst_ghost, dst_ghost, 0),
            IntVect::new(src_ghost, src_ghost, 0),
        );
        if periodic {
            key = key.periodic(Periodicity::new(extent));
        }
        let all: Vec<_> = (0..nprocs)
            .map(|r| build_copy(&dst, &dst_dist, &src, &src_dist, &key, r))
            .collect();
        prop_assert!(check_symmetry(&all).is_ok());
        assert_first_wins(&all);

        // every source read stays inside its grown source box
        let sg = IntVect::new(src_ghost, src_ghost, 0);
        for t in all.iter().flat_map(|md| md.local.iter().chain(md.sends.values().flatten())) {
            prop_assert!(src.get(t.src_index).unwrap().grow(sg).contains(&t.src_region()));
        }

        // valid destination cells are each covered exactly once
        let valid: u64 = all
            .iter()
            .flat_map(|md| md.local.iter().chain(md.recvs.values().flatten()))
            .map(|t| dst.get(t.dst_index).unwrap().intersect(&t.region).num_pts())
            .sum();
        prop_assert_eq!(valid, dst.num_pts());
    }
}
