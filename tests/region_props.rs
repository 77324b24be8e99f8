use box_halo::geometry::{IndexBox, IndexType, IntVect, Periodicity};
use box_halo::region::RegionSet;
use proptest::prelude::*;

fn arb_box() -> impl Strategy<Value = IndexBox> {
    (-16i32..16, -16i32..16, 0i32..8, 0i32..8).prop_map(|(x, y, w, h)| {
        IndexBox::cell(IntVect::new(x, y, 0), IntVect::new(x + w, y + h, 0))
    })
}

fn brute(boxes: &[IndexBox], q: &IndexBox, ng: IntVect) -> Vec<(usize, IndexBox)> {
    boxes
        .iter()
        .enumerate()
        .filter_map(|(i, b)| {
            let x = b.grow(ng).intersect(q);
            (!x.is_empty()).then_some((i, x))
        })
        .collect()
}

proptest! {
    #[test]
    fn hashed_lookup_matches_a_linear_scan(
        boxes in prop::collection::vec(arb_box(), 1..32),
        q in arb_box(),
        ng in 0i32..3,
    ) {
        let r = RegionSet::new(boxes.clone()).unwrap();
        let ng = IntVect::new(ng, ng, 0);
        prop_assert_eq!(r.intersections_with(&q, false, ng), brute(&boxes, &q, ng));
        prop_assert_eq!(r.intersects(&q, ng), !brute(&boxes, &q, ng).is_empty());

        let prebuilt = RegionSet::new(boxes.clone()).unwrap();
        prop_assert!(prebuilt.build_index().has_index());
        prop_assert_eq!(prebuilt.intersections_with(&q, false, ng), r.intersections_with(&q, false, ng));

        // reversing the box list only renumbers the hits
        let reversed: Vec<IndexBox> = boxes.iter().rev().copied().collect();
        let n = boxes.len();
        let mut renumbered: Vec<(usize, IndexBox)> = RegionSet::new(reversed)
            .unwrap()
            .intersections_with(&q, false, ng)
            .into_iter()
            .map(|(i, x)| (n - 1 - i, x))
            .collect();
        renumbered.sort_unstable_by_key(|&(i, _)| i);
        prop_assert_eq!(renumbered, brute(&boxes, &q, ng));
    }

    #[test]
    fn lazy_coarsening_matches_materialized(
        boxes in prop::collection::vec(arb_box(), 1..16),
        q in arb_box(),
        ratio in 1i32..4,
    ) {
        let ratio = IntVect::new(ratio, ratio, 1);
        let lazy = RegionSet::new(boxes.clone()).unwrap().coarsen(ratio).unwrap();
        let eager = RegionSet::new(boxes.iter().map(|b| b.coarsen(ratio)).collect()).unwrap();
        let qc = q.coarsen(ratio);
        prop_assert_eq!(lazy.intersections(&qc), eager.intersections(&qc));
        prop_assert_eq!(lazy.num_pts(), eager.num_pts());
    }

    #[test]
    fn lazy_nodal_view_matches_materialized(
        boxes in prop::collection::vec(arb_box(), 1..16),
        q in arb_box(),
    ) {
        let node = IndexType::node();
        let lazy = RegionSet::new(boxes.clone()).unwrap().convert(node).unwrap();
        let eager = RegionSet::new(boxes.iter().map(|b| b.convert(node)).collect()).unwrap();
        let qn = q.convert(node);
        prop_assert_eq!(lazy.ix_type(), node);
        prop_assert_eq!(lazy.intersections(&qn), eager.intersections(&qn));
    }

    #[test]
    fn complement_and_cover_agree(
        boxes in prop::collection::vec(arb_box(), 1..16),
        q in arb_box(),
    ) {
        let r = RegionSet::new(boxes).unwrap();
        let rest = r.complement_in(&q);
        prop_assert_eq!(rest.is_empty(), r.contains_box(&q, false, IntVect::zero()));
        let covered: u64 = RegionSet::new(r.intersections(&q).into_iter().map(|(_, x)| x).collect())
            .unwrap()
            .num_pts();
        // overlapping boxes may count a cell twice, so only bound it
        prop_assert!(rest.iter().map(IndexBox::num_pts).sum::<u64>() + covered >= q.num_pts());
    }
}

#[test]
fn max_size_keeps_every_cell_once() {
    let r = RegionSet::new(vec![
        IndexBox::cell(IntVect::zero(), IntVect::new(16, 9, 0)),
        IndexBox::cell(IntVect::new(17, 0, 0), IntVect::new(20, 3, 0)),
    ])
    .unwrap();
    let chopped = r.max_size(IntVect::new(8, 4, 1)).unwrap();
    assert_eq!(chopped.num_pts(), r.num_pts());
    assert!(chopped.is_disjoint());
    assert!(chopped.iter().all(|b| b.length(0) <= 8 && b.length(1) <= 4));
    assert!(r.contains_set(&chopped) && chopped.contains_set(&r));
}

#[test]
fn periodic_cover_wraps_around() {
    let domain = RegionSet::from_box(IndexBox::line(0, 11));
    let ghosted = RegionSet::from_box(IndexBox::line(-2, 13));
    assert!(!domain.contains_set(&ghosted));
    assert!(domain.contains_periodic(&ghosted, &Periodicity::new(IntVect::new(12, 0, 0))));
    assert!(!domain.contains_periodic(&ghosted, &Periodicity::non_periodic()));
}
