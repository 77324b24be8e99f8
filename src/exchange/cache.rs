//! Process-wide cache of communication patterns.
//!
//! Patterns depend only on region-set identity, distribution-map identity,
//! the pattern key and the calling rank, so they are built once and shared
//! as `Arc<CommMetaData>`. Each key owns a `OnceCell`: a miss builds inside
//! that cell with no map lock held, so other keys stay available and each
//! pattern is still built exactly once.
//!
//! Dropping the last handle to a region set or distribution map that some
//! cache has seen evicts its patterns from the [global](PatternCache::global)
//! cache.

use super::pattern::{CopyKey, FillKey, build_copy, build_fill};
use super::tags::CommMetaData;
use crate::halo_error::HaloError;
use crate::region::{DistributionMap, RegionKey, RegionSet};
use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PatternKey {
    Fill {
        region: RegionKey,
        dist: u64,
        key: FillKey,
        rank: usize,
    },
    Copy {
        dst: RegionKey,
        dst_dist: u64,
        src: RegionKey,
        src_dist: u64,
        key: CopyKey,
        rank: usize,
    },
}

impl PatternKey {
    fn mentions_region(&self, id: u64) -> bool {
        match self {
            PatternKey::Fill { region, .. } => region.ref_id == id,
            PatternKey::Copy { dst, src, .. } => dst.ref_id == id || src.ref_id == id,
        }
    }

    fn mentions_dist(&self, id: u64) -> bool {
        match self {
            PatternKey::Fill { dist, .. } => *dist == id,
            PatternKey::Copy {
                dst_dist, src_dist, ..
            } => *dst_dist == id || *src_dist == id,
        }
    }
}

/// Cache counters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Debug, Default)]
pub struct PatternCache {
    map: DashMap<PatternKey, Arc<OnceCell<Arc<CommMetaData>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

static GLOBAL: Lazy<PatternCache> = Lazy::new(PatternCache::new);

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache.
    pub fn global() -> &'static PatternCache {
        &GLOBAL
    }

    /// Cached pattern for `key`, building it with `build` on a miss.
    pub fn get_or_build(
        &self,
        key: PatternKey,
        build: impl FnOnce() -> CommMetaData,
    ) -> Arc<CommMetaData> {
        // clone the cell out so no shard lock is held while building
        let found = self.map.get(&key).map(|c| Arc::clone(c.value()));
        let cell =
            found.unwrap_or_else(|| Arc::clone(self.map.entry(key).or_default().value()));
        let mut built = false;
        let md = cell.get_or_init(|| {
            built = true;
            log::debug!("pattern cache miss: {key:?}");
            Arc::new(build())
        });
        let counter = if built { &self.misses } else { &self.hits };
        counter.fetch_add(1, Ordering::Relaxed);
        Arc::clone(md)
    }

    /// Self-fill pattern of `region` for `rank`.
    pub fn fill(
        &self,
        region: &RegionSet,
        dist: &DistributionMap,
        key: &FillKey,
        rank: usize,
    ) -> Arc<CommMetaData> {
        let pk = PatternKey::Fill {
            region: region.key(),
            dist: dist.id(),
            key: *key,
            rank,
        };
        region.mark_cached();
        dist.mark_cached();
        self.get_or_build(pk, || build_fill(region, dist, key, rank))
    }

    /// Cross-copy pattern from `src` into `dst` for `rank`.
    ///
    /// # Errors
    /// `IndexTypeMismatch` if the two sets are centred differently.
    pub fn copy(
        &self,
        dst: (&RegionSet, &DistributionMap),
        src: (&RegionSet, &DistributionMap),
        key: &CopyKey,
        rank: usize,
    ) -> Result<Arc<CommMetaData>, HaloError> {
        let (dix, six) = (dst.0.ix_type(), src.0.ix_type());
        if dix != six {
            return Err(HaloError::IndexTypeMismatch { dst: dix, src: six });
        }
        let pk = PatternKey::Copy {
            dst: dst.0.key(),
            dst_dist: dst.1.id(),
            src: src.0.key(),
            src_dist: src.1.id(),
            key: *key,
            rank,
        };
        for r in [dst.0, src.0] {
            r.mark_cached();
        }
        for d in [dst.1, src.1] {
            d.mark_cached();
        }
        Ok(self.get_or_build(pk, || {
            build_copy(dst.0, dst.1, src.0, src.1, key, rank)
        }))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.map.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Evict every pattern built from region set `id`.
    pub fn flush_region(&self, id: u64) {
        self.map.retain(|k, _| !k.mentions_region(id));
    }

    /// Evict every pattern built over distribution map `id`.
    pub fn flush_dist(&self, id: u64) {
        self.map.retain(|k, _| !k.mentions_dist(id));
    }

    /// Evict everything and reset the counters.
    pub fn clear(&self) {
        self.map.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{IndexBox, IntVect};

    fn setup() -> (RegionSet, DistributionMap) {
        let r = RegionSet::new(vec![IndexBox::line(0, 3), IndexBox::line(4, 7)]).unwrap();
        (r, DistributionMap::from_ranks(vec![0, 1]))
    }

    #[test]
    fn equal_keys_share_one_pattern() {
        let cache = PatternCache::new();
        let (r, dm) = setup();
        let key = FillKey::new(IntVect::new(1, 0, 0));
        let a = cache.fill(&r, &dm, &key, 0);
        let b = cache.fill(&r.clone(), &dm, &key, 0);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(
            cache.stats(),
            CacheStats { hits: 1, misses: 1, entries: 1 }
        );
    }

    #[test]
    fn different_ghost_widths_never_share() {
        let cache = PatternCache::new();
        let (r, dm) = setup();
        let a = cache.fill(&r, &dm, &FillKey::new(IntVect::new(1, 0, 0)), 0);
        let b = cache.fill(&r, &dm, &FillKey::new(IntVect::new(2, 0, 0)), 0);
        assert!(!Arc::ptr_eq(&a, &b));
        let c = cache.fill(&r, &dm, &FillKey::new(IntVect::new(1, 0, 0)), 1);
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn flush_evicts_by_region() {
        let cache = PatternCache::new();
        let (r, dm) = setup();
        let other = RegionSet::from_box(IndexBox::line(0, 7));
        let odm = DistributionMap::single_rank(1, 0);
        cache.fill(&r, &dm, &FillKey::new(IntVect::new(1, 0, 0)), 0);
        cache.copy((&other, &odm), (&r, &dm), &CopyKey::valid(), 0).unwrap();
        cache.fill(&other, &odm, &FillKey::new(IntVect::new(1, 0, 0)), 0);
        cache.flush_region(r.ref_id());
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn building_a_pattern_leaves_the_map_usable() {
        let cache = PatternCache::new();
        let (r, dm) = setup();
        let outer = PatternKey::Fill {
            region: r.key(),
            dist: dm.id(),
            key: FillKey::new(IntVect::new(2, 0, 0)),
            rank: 0,
        };
        let md = cache.get_or_build(outer, || {
            // a nested lookup and a full-map read while the outer build runs
            let inner = cache.fill(&r, &dm, &FillKey::new(IntVect::new(1, 0, 0)), 0);
            assert_eq!(cache.len(), 2);
            (*inner).clone()
        });
        assert_eq!(*md, *cache.fill(&r, &dm, &FillKey::new(IntVect::new(1, 0, 0)), 0));
        assert_eq!(
            cache.stats(),
            CacheStats { hits: 1, misses: 2, entries: 2 }
        );
    }

    #[test]
    fn copy_rejects_mixed_centring() {
        let cache = PatternCache::new();
        let (r, dm) = setup();
        let nodal = r.convert(crate::geometry::IndexType::node()).unwrap();
        assert!(matches!(
            cache.copy((&nodal, &dm), (&r, &dm), &CopyKey::valid(), 0),
            Err(HaloError::IndexTypeMismatch { .. })
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn flush_evicts_by_distribution() {
        let cache = PatternCache::new();
        let (r, dm) = setup();
        let other = DistributionMap::single_rank(2, 0);
        let key = FillKey::new(IntVect::new(1, 0, 0));
        cache.fill(&r, &dm, &key, 0);
        cache.fill(&r, &other, &key, 0);
        cache.copy((&r, &other), (&r, &dm), &CopyKey::valid(), 0).unwrap();
        cache.flush_dist(dm.id());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_lookups_build_once() {
        let cache = PatternCache::new();
        let (r, dm) = setup();
        let key = FillKey::new(IntVect::new(1, 0, 0));
        let got: Vec<_> = std::thread::scope(|s| {
            let hs: Vec<_> = (0..8)
                .map(|_| s.spawn(|| cache.fill(&r, &dm, &key, 0)))
                .collect();
            hs.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(got.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(cache.stats().misses, 1);
    }
}
