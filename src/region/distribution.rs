//! Box-to-rank ownership maps.
//!
//! A [`DistributionMap`] is parallel to a [`RegionSet`]'s box order: entry `i`
//! is the rank owning box `i`. Like region sets, maps are shared immutable
//! handles with a process-unique id that the pattern cache keys on; dropping
//! the last handle flushes the map's patterns from the global cache.

use super::region_set::RegionSet;
use crate::exchange::PatternCache;
use crate::halo_error::HaloError;
use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_MAP_ID: AtomicU64 = AtomicU64::new(1);

struct MapRef {
    id: u64,
    ranks: Vec<usize>,
    cached: AtomicBool,
}

impl Drop for MapRef {
    fn drop(&mut self) {
        if *self.cached.get_mut() {
            PatternCache::global().flush_dist(self.id);
        }
    }
}

#[derive(Clone)]
pub struct DistributionMap {
    inner: Arc<MapRef>,
}

impl DistributionMap {
    /// Wrap an explicit owner list.
    pub fn from_ranks(ranks: Vec<usize>) -> Self {
        Self {
            inner: Arc::new(MapRef {
                id: NEXT_MAP_ID.fetch_add(1, Ordering::Relaxed),
                ranks,
                cached: AtomicBool::new(false),
            }),
        }
    }

    /// Owner list checked against `region`.
    ///
    /// # Errors
    /// `DistributionLength` if the lengths differ.
    pub fn for_region(region: &RegionSet, ranks: Vec<usize>) -> Result<Self, HaloError> {
        let dm = Self::from_ranks(ranks);
        dm.check_len(region.len())?;
        Ok(dm)
    }

    /// Box `i` goes to rank `i % nprocs`.
    pub fn round_robin(nboxes: usize, nprocs: usize) -> Self {
        let nprocs = nprocs.max(1);
        Self::from_ranks((0..nboxes).map(|i| i % nprocs).collect())
    }

    /// Every box on one rank.
    pub fn single_rank(nboxes: usize, rank: usize) -> Self {
        Self::from_ranks(vec![rank; nboxes])
    }

    /// Balance `weights` over `nprocs` ranks: heaviest first, each to the
    /// currently least-loaded rank (lowest rank on ties).
    pub fn knapsack(weights: &[u64], nprocs: usize) -> Self {
        let nprocs = nprocs.max(1);
        let mut order: Vec<usize> = (0..weights.len()).collect();
        order.sort_by_key(|&i| (Reverse(weights[i]), i));
        let mut loads = vec![0u64; nprocs];
        let mut owner = vec![0usize; weights.len()];
        for i in order {
            let (r, _) = loads
                .iter()
                .enumerate()
                .min_by_key(|&(r, &w)| (w, r))
                .unwrap_or((0, &0));
            owner[i] = r;
            loads[r] += weights[i];
        }
        log::debug!(
            "knapsack distribution of {} boxes over {} ranks, loads {:?}",
            weights.len(),
            nprocs,
            loads
        );
        Self::from_ranks(owner)
    }

    /// Knapsack over the point counts of `region`.
    pub fn by_volume(region: &RegionSet, nprocs: usize) -> Self {
        let w: Vec<u64> = region.iter().map(|b| b.num_pts()).collect();
        Self::knapsack(&w, nprocs)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.ranks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.ranks.is_empty()
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn mark_cached(&self) {
        self.inner.cached.store(true, Ordering::Relaxed);
    }

    /// Owner of box `i`.
    #[inline]
    pub fn owner(&self, i: usize) -> Option<usize> {
        self.inner.ranks.get(i).copied()
    }

    #[inline]
    pub fn ranks(&self) -> &[usize] {
        &self.inner.ranks
    }

    /// Indices of the boxes owned by `rank`, ascending.
    pub fn local_indices(&self, rank: usize) -> impl Iterator<Item = usize> + '_ {
        self.inner.ranks
            .iter()
            .enumerate()
            .filter_map(move |(i, &r)| (r == rank).then_some(i))
    }

    /// Largest rank referenced plus one.
    pub fn num_procs(&self) -> usize {
        self.inner.ranks.iter().max().map_or(0, |&r| r + 1)
    }

    pub fn check_len(&self, nboxes: usize) -> Result<(), HaloError> {
        if self.len() == nboxes {
            Ok(())
        } else {
            Err(HaloError::DistributionLength {
                expected: nboxes,
                found: self.len(),
            })
        }
    }

    #[inline]
    pub fn same_ref(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl PartialEq for DistributionMap {
    fn eq(&self, other: &Self) -> bool {
        Self::same_ref(self, other) || self.inner.ranks == other.inner.ranks
    }
}

impl Eq for DistributionMap {}

impl fmt::Debug for DistributionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributionMap")
            .field("id", &self.inner.id)
            .field("ranks", &self.inner.ranks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::IndexBox;

    #[test]
    fn round_robin_wraps() {
        let dm = DistributionMap::round_robin(5, 2);
        assert_eq!(dm.ranks(), &[0, 1, 0, 1, 0]);
        assert_eq!(dm.local_indices(1).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(dm.num_procs(), 2);
    }

    #[test]
    fn knapsack_balances_loads() {
        let dm = DistributionMap::knapsack(&[7, 5, 4, 3, 1], 2);
        let load = |r: usize| -> u64 {
            dm.local_indices(r).map(|i| [7u64, 5, 4, 3, 1][i]).sum()
        };
        assert_eq!(load(0), 10);
        assert_eq!(load(1), 10);
        assert_eq!(dm.owner(0), Some(0));
        assert_eq!(dm.owner(9), None);
    }

    #[test]
    fn length_is_checked_against_region() {
        let r = RegionSet::new(vec![IndexBox::line(0, 3), IndexBox::line(4, 7)]).unwrap();
        assert!(DistributionMap::for_region(&r, vec![0, 1]).is_ok());
        assert_eq!(
            DistributionMap::for_region(&r, vec![0]).unwrap_err(),
            HaloError::DistributionLength { expected: 2, found: 1 }
        );
    }

    #[test]
    fn ids_are_unique_but_equality_is_structural() {
        let a = DistributionMap::single_rank(3, 0);
        let b = DistributionMap::single_rank(3, 0);
        assert_ne!(a.id(), b.id());
        assert_eq!(a, b);
        assert!(!DistributionMap::same_ref(&a, &b));
        assert!(DistributionMap::same_ref(&a, &a.clone()));
    }
}
