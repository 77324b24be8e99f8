//! `BoxStore`: the payloads of one rank over a distributed region set.
//!
//! A store pairs a [`RegionSet`] and a [`DistributionMap`] and owns one
//! [`BoxData`] per box this rank owns, each allocated over the box grown by
//! the store's ghost width. Exchange sessions mark the store busy while data
//! is in flight so a second exchange cannot start on it.

use super::arena::Residency;
use super::payload::{BoxData, Element, Payload};
use crate::debug_invariants::DebugInvariants;
use crate::geometry::{IndexBox, IntVect};
use crate::halo_error::HaloError;
use crate::region::{DistributionMap, RegionSet};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct BoxStore<T: Element> {
    id: u64,
    region: RegionSet,
    dist: DistributionMap,
    rank: usize,
    ncomp: usize,
    ngrow: IntVect,
    fabs: BTreeMap<usize, BoxData<T>>,
    session_open: bool,
}

impl<T: Element> BoxStore<T> {
    /// Allocate host payloads for every box owned by `rank`.
    pub fn new(
        region: RegionSet,
        dist: DistributionMap,
        rank: usize,
        ncomp: usize,
        ngrow: IntVect,
    ) -> Result<Self, HaloError> {
        Self::with_residency(region, dist, rank, ncomp, ngrow, Residency::Host)
    }

    pub fn with_residency(
        region: RegionSet,
        dist: DistributionMap,
        rank: usize,
        ncomp: usize,
        ngrow: IntVect,
        residency: Residency,
    ) -> Result<Self, HaloError> {
        dist.check_len(region.len())?;
        let fabs = dist
            .local_indices(rank)
            .filter_map(|i| region.get(i).map(|b| (i, b)))
            .map(|(i, b)| (i, BoxData::with_residency(b.grow(ngrow), ncomp, residency)))
            .collect();
        let store = Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            region,
            dist,
            rank,
            ncomp,
            ngrow,
            fabs,
            session_open: false,
        };
        store.debug_assert_invariants();
        Ok(store)
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn region(&self) -> &RegionSet {
        &self.region
    }

    #[inline]
    pub fn dist(&self) -> &DistributionMap {
        &self.dist
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    #[inline]
    pub fn n_grow(&self) -> IntVect {
        self.ngrow
    }

    /// Indices of the boxes held here, ascending.
    pub fn local_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.fabs.keys().copied()
    }

    pub fn is_local(&self, i: usize) -> bool {
        self.fabs.contains_key(&i)
    }

    /// Valid (ungrown) box `i`.
    pub fn valid_box(&self, i: usize) -> Result<IndexBox, HaloError> {
        self.region.try_get(i)
    }

    fn not_local(&self, i: usize) -> HaloError {
        match self.dist.owner(i) {
            Some(owner) => HaloError::NotLocal {
                index: i,
                owner,
                rank: self.rank,
            },
            None => HaloError::BoxOutOfRange {
                index: i,
                len: self.region.len(),
            },
        }
    }

    pub fn fab(&self, i: usize) -> Result<&BoxData<T>, HaloError> {
        self.fabs.get(&i).ok_or_else(|| self.not_local(i))
    }

    pub fn fab_mut(&mut self, i: usize) -> Result<&mut BoxData<T>, HaloError> {
        if !self.fabs.contains_key(&i) {
            return Err(self.not_local(i));
        }
        self.fabs.get_mut(&i).ok_or(HaloError::BoxOutOfRange {
            index: i,
            len: self.region.len(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &BoxData<T>)> {
        self.fabs.iter().map(|(i, f)| (*i, f))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut BoxData<T>)> {
        self.fabs.iter_mut().map(|(i, f)| (*i, f))
    }

    /// Set every element, ghosts included.
    pub fn set_val(&mut self, v: T) {
        for f in self.fabs.values_mut() {
            f.fill(v);
        }
    }

    /// Set valid cells of component `comp` from `f(point)`; ghosts are left alone.
    pub fn set_valid_with(&mut self, comp: usize, f: impl Fn(IntVect) -> T) {
        for (&i, fab) in self.fabs.iter_mut() {
            if let Some(valid) = self.region.get(i) {
                fab.fill_with(&valid, comp, &f);
            }
        }
    }

    /// Value at `p` in component `comp` of box `i`.
    pub fn get(&self, i: usize, p: IntVect, comp: usize) -> Option<T> {
        self.fabs.get(&i).and_then(|f| f.get(p, comp))
    }

    #[inline]
    pub fn is_session_open(&self) -> bool {
        self.session_open
    }

    pub(crate) fn begin_session(&mut self) -> Result<(), HaloError> {
        if self.session_open {
            return Err(HaloError::SessionInProgress { store: self.id });
        }
        self.session_open = true;
        Ok(())
    }

    pub(crate) fn end_session(&mut self) {
        self.session_open = false;
    }

    /// Forget an exchange that was started on this store and never finished.
    /// Whatever it had in flight is lost; ghost cells may be stale.
    pub fn abandon_session(&mut self) {
        if self.session_open {
            log::warn!("abandoning unfinished exchange on store {}", self.id);
        }
        self.end_session();
    }
}

impl<T: Element> DebugInvariants for BoxStore<T> {
    fn validate_invariants(&self) -> Result<(), HaloError> {
        self.dist.check_len(self.region.len())?;
        for (&i, fab) in &self.fabs {
            if self.dist.owner(i) != Some(self.rank) {
                return Err(HaloError::InvariantViolation(format!(
                    "store {} holds box {i} owned by {:?}",
                    self.id,
                    self.dist.owner(i)
                )));
            }
            let want = self.region.try_get(i)?.grow(self.ngrow);
            if fab.fab_box() != want || fab.ncomp() != self.ncomp {
                return Err(HaloError::InvariantViolation(format!(
                    "payload {i} covers {:?} x {}, expected {want:?} x {}",
                    fab.fab_box(),
                    fab.ncomp(),
                    self.ncomp
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_boxes() -> RegionSet {
        RegionSet::new(vec![
            IndexBox::line(0, 3),
            IndexBox::line(4, 7),
            IndexBox::line(8, 11),
        ])
        .unwrap()
    }

    #[test]
    fn only_owned_boxes_are_allocated() {
        let r = three_boxes();
        let dm = DistributionMap::from_ranks(vec![0, 1, 0]);
        let s = BoxStore::<f64>::new(r, dm, 0, 2, IntVect::new(2, 0, 0)).unwrap();
        assert_eq!(s.local_indices().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(s.fab(0).unwrap().fab_box(), IndexBox::line(-2, 5));
        assert_eq!(
            s.fab(1).unwrap_err(),
            HaloError::NotLocal { index: 1, owner: 1, rank: 0 }
        );
        assert!(matches!(s.fab(7), Err(HaloError::BoxOutOfRange { .. })));
        s.validate_invariants().unwrap();
    }

    #[test]
    fn set_valid_leaves_ghosts() {
        let r = three_boxes();
        let dm = DistributionMap::single_rank(3, 0);
        let mut s = BoxStore::<i32>::new(r, dm, 0, 1, IntVect::new(1, 0, 0)).unwrap();
        s.set_val(-1);
        s.set_valid_with(0, |p| p[0]);
        assert_eq!(s.get(1, IntVect::new(4, 0, 0), 0), Some(4));
        assert_eq!(s.get(1, IntVect::new(3, 0, 0), 0), Some(-1));
    }

    #[test]
    fn session_flag_rejects_reentry() {
        let r = three_boxes();
        let mut s = BoxStore::<f32>::new(r, DistributionMap::single_rank(3, 0), 0, 1, IntVect::zero()).unwrap();
        s.begin_session().unwrap();
        assert_eq!(
            s.begin_session().unwrap_err(),
            HaloError::SessionInProgress { store: s.id() }
        );
        s.end_session();
        assert!(!s.is_session_open());
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let err = BoxStore::<f64>::new(three_boxes(), DistributionMap::single_rank(2, 0), 0, 1, IntVect::zero())
            .unwrap_err();
        assert_eq!(err, HaloError::DistributionLength { expected: 3, found: 2 });
    }
}
