#![allow(dead_code)]
use box_halo::algs::communicator::RayonComm;
use box_halo::geometry::{IndexBox, IntVect, Periodicity};
use box_halo::region::RegionSet;

/// Run `f` once per rank of an isolated `n`-rank world, ranks as threads.
pub fn on_world<R: Send>(n: usize, f: impl Fn(&RayonComm) -> R + Sync) -> Vec<R> {
    let comms = RayonComm::world(n);
    std::thread::scope(|s| {
        let f = &f;
        let hs: Vec<_> = comms.iter().map(|c| s.spawn(move || f(c))).collect();
        hs.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// The 12-cell 1-D domain split as [0,3], [4,7], [8,11].
pub fn ring() -> RegionSet {
    RegionSet::new(vec![
        IndexBox::line(0, 3),
        IndexBox::line(4, 7),
        IndexBox::line(8, 11),
    ])
    .unwrap()
}

pub fn ring_period() -> Periodicity {
    Periodicity::new(IntVect::new(12, 0, 0))
}

/// A `nx` by `ny` tiling of square tiles of side `w` (2-D).
pub fn tiles(nx: i32, ny: i32, w: i32) -> RegionSet {
    let mut boxes = Vec::new();
    for j in 0..ny {
        for i in 0..nx {
            let lo = IntVect::new(i * w, j * w, 0);
            boxes.push(IndexBox::cell(lo, lo + IntVect::new(w - 1, w - 1, 0)));
        }
    }
    RegionSet::new(boxes).unwrap()
}

/// Value of component `c` at `p`, distinct for every cell and component.
pub fn truth(p: IntVect, c: usize) -> f64 {
    (1000 * c as i32 + 100 * p[1] + p[0] + 1) as f64
}

/// `p` wrapped into `[0, period)` in every periodic direction.
pub fn wrap(p: IntVect, period: &Periodicity) -> IntVect {
    IntVect::from_fn(|d| {
        if period.is_periodic(d) {
            p[d].rem_euclid(period.period()[d])
        } else {
            p[d]
        }
    })
}
