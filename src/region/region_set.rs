//! `RegionSet`: a shared, ordered collection of boxes with a lazy spatial index.
//!
//! A region set is a cheap-to-clone handle (`Arc`) over an immutable list of
//! cell-centred base boxes plus a by-value [`BoxTransform`]. The spatial hash
//! is built on the first overlap query and then only read, so any number of
//! threads may query a shared set concurrently.
//!
//! Operations that change geometry never touch shared state: they return a
//! new set. Coarsening, refining back and re-centring only swap the transform
//! and keep sharing the base boxes and their index; growing, shifting and
//! chopping materialize a fresh box list.
//!
//! # Identity
//! Every base list gets a process-unique id that is never reused, so
//! [`RegionSet::key`] is a safe cache key even after the set is dropped.
//! Dropping the last handle to a base list that a pattern cache has keyed on
//! flushes its patterns from [`PatternCache::global`].

use super::hash::BoxHash;
use super::transform::{BoundaryRegister, BoxTransform, Face};
use crate::debug_invariants::DebugInvariants;
use crate::exchange::PatternCache;
use crate::geometry::{IndexBox, IndexType, IntVect, Periodicity, SPACEDIM};
use crate::halo_error::HaloError;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_REGION_ID: AtomicU64 = AtomicU64::new(1);

struct RegionRef {
    id: u64,
    boxes: Vec<IndexBox>,
    hash: OnceCell<BoxHash>,
    /// Set once a pattern cache has keyed an entry on `id`.
    cached: AtomicBool,
}

impl RegionRef {
    fn new(boxes: Vec<IndexBox>) -> Self {
        Self {
            id: NEXT_REGION_ID.fetch_add(1, Ordering::Relaxed),
            boxes,
            hash: OnceCell::new(),
            cached: AtomicBool::new(false),
        }
    }
}

impl Drop for RegionRef {
    fn drop(&mut self) {
        if *self.cached.get_mut() {
            log::trace!("region set {} dropped, flushing its patterns", self.id);
            PatternCache::global().flush_region(self.id);
        }
    }
}

/// Identity of a region set view: base list plus transform.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionKey {
    pub ref_id: u64,
    pub transform: BoxTransform,
}

#[derive(Clone)]
pub struct RegionSet {
    inner: Arc<RegionRef>,
    transform: BoxTransform,
}

impl RegionSet {
    /// Build from a list of boxes that all share one index type.
    ///
    /// # Errors
    /// `MixedIndexType` if two boxes disagree on centring.
    pub fn new(boxes: Vec<IndexBox>) -> Result<Self, HaloError> {
        let ix = boxes.first().map(|b| b.ix_type()).unwrap_or_default();
        if let Some(bad) = boxes.iter().find(|b| b.ix_type() != ix) {
            return Err(HaloError::MixedIndexType {
                expected: ix,
                found: bad.ix_type(),
            });
        }
        let base = if ix.is_cell_centered() {
            boxes
        } else {
            boxes.iter().map(|b| b.enclosed_cells()).collect()
        };
        let set = Self {
            inner: Arc::new(RegionRef::new(base)),
            transform: BoxTransform::from_index_type(ix),
        };
        #[cfg(feature = "check-invariants")]
        set.debug_assert_invariants();
        Ok(set)
    }

    /// A set holding one box.
    pub fn from_box(bx: IndexBox) -> Self {
        Self {
            inner: Arc::new(RegionRef::new(vec![bx.enclosed_cells()])),
            transform: BoxTransform::from_index_type(bx.ix_type()),
        }
    }

    /// The empty set; valid and queryable.
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(RegionRef::new(Vec::new())),
            transform: BoxTransform::Identity,
        }
    }

    fn with_transform(&self, transform: BoxTransform) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            transform,
        }
    }

    // ----------------------------------------------------------------------
    // Accessors
    // ----------------------------------------------------------------------

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.boxes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.boxes.is_empty()
    }

    /// Box `i` with the transform applied.
    #[inline]
    pub fn get(&self, i: usize) -> Option<IndexBox> {
        self.inner.boxes.get(i).map(|b| self.transform.apply(b))
    }

    /// Box `i`, or `BoxOutOfRange`.
    pub fn try_get(&self, i: usize) -> Result<IndexBox, HaloError> {
        self.get(i).ok_or(HaloError::BoxOutOfRange {
            index: i,
            len: self.len(),
        })
    }

    /// Cell-centred (coarsened but not re-centred) box `i`.
    pub fn cell_box(&self, i: usize) -> Option<IndexBox> {
        self.inner.boxes.get(i).map(|b| self.transform.coarsen(b))
    }

    pub fn iter(&self) -> impl Iterator<Item = IndexBox> + '_ {
        self.inner.boxes.iter().map(|b| self.transform.apply(b))
    }

    #[inline]
    pub fn ix_type(&self) -> IndexType {
        self.transform.index_type()
    }

    #[inline]
    pub fn crse_ratio(&self) -> IntVect {
        self.transform.coarsen_ratio()
    }

    #[inline]
    pub fn transform(&self) -> &BoxTransform {
        &self.transform
    }

    /// Process-unique id of the shared base list.
    #[inline]
    pub fn ref_id(&self) -> u64 {
        self.inner.id
    }

    /// Evict this base list's patterns from the global cache when the last
    /// handle goes away.
    pub(crate) fn mark_cached(&self) {
        self.inner.cached.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn key(&self) -> RegionKey {
        RegionKey {
            ref_id: self.inner.id,
            transform: self.transform,
        }
    }

    /// True if both handles share one base list.
    #[inline]
    pub fn same_ref(a: &RegionSet, b: &RegionSet) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Smallest box containing every box; empty for an empty set.
    pub fn bounding_box(&self) -> IndexBox {
        self.iter()
            .fold(IndexBox::empty(), |acc, b| acc.bounding(&b))
            .convert(self.ix_type())
    }

    /// Total number of points over all boxes.
    pub fn num_pts(&self) -> u64 {
        self.iter().map(|b| b.num_pts()).sum()
    }

    // ----------------------------------------------------------------------
    // Spatial index
    // ----------------------------------------------------------------------

    fn hash(&self) -> &BoxHash {
        self.inner
            .hash
            .get_or_init(|| BoxHash::build(&self.inner.boxes))
    }

    /// Whether the spatial index has been built.
    pub fn has_index(&self) -> bool {
        self.inner.hash.get().is_some()
    }

    /// Build the spatial index now instead of on the first query.
    pub fn build_index(&self) -> &Self {
        let _ = self.hash();
        self
    }

    /// Every `(index, overlap)` between `q` and the boxes, in index order.
    pub fn intersections(&self, q: &IndexBox) -> Vec<(usize, IndexBox)> {
        self.intersections_with(q, false, IntVect::zero())
    }

    /// Overlaps of `q` with every box grown by `ng`. With `first_only` the
    /// search stops at the first hit.
    pub fn intersections_with(
        &self,
        q: &IndexBox,
        first_only: bool,
        ng: IntVect,
    ) -> Vec<(usize, IndexBox)> {
        let mut out = Vec::new();
        self.intersections_into(q, first_only, ng, &mut out);
        out
    }

    /// Buffer-reusing form of [`intersections_with`](Self::intersections_with).
    pub fn intersections_into(
        &self,
        q: &IndexBox,
        first_only: bool,
        ng: IntVect,
        out: &mut Vec<(usize, IndexBox)>,
    ) {
        out.clear();
        if self.is_empty() || q.is_empty() {
            return;
        }
        debug_assert_eq!(q.ix_type(), self.ix_type(), "query index type mismatch");
        let search = self.transform.search_box(&q.grow(ng));
        let boxes = &self.inner.boxes;
        self.hash().for_each_candidate(&search, |i| {
            let isect = self.transform.apply(&boxes[i]).grow(ng).intersect(q);
            if !isect.is_empty() {
                out.push((i, isect));
                if first_only {
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        });
        out.sort_unstable_by_key(|&(i, _)| i);
    }

    /// True if `q` meets any box grown by `ng`.
    pub fn intersects(&self, q: &IndexBox, ng: IntVect) -> bool {
        !self.intersections_with(q, true, ng).is_empty()
    }

    /// True if point `p` lies in any box.
    pub fn contains_point(&self, p: IntVect) -> bool {
        self.intersects(&IndexBox::new(p, p, self.ix_type()), IntVect::zero())
    }

    /// True if `b` is covered by the boxes grown by `ng`. With
    /// `assume_disjoint` the check only sums overlap volumes.
    pub fn contains_box(&self, b: &IndexBox, assume_disjoint: bool, ng: IntVect) -> bool {
        if b.is_empty() || b.ix_type() != self.ix_type() {
            return false;
        }
        let isects = self.intersections_with(b, false, ng);
        if assume_disjoint {
            return isects.iter().map(|(_, x)| x.num_pts()).sum::<u64>() == b.num_pts();
        }
        let mut rest = vec![*b];
        for (_, x) in &isects {
            rest = rest.iter().flat_map(|r| r.diff(x)).collect();
            if rest.is_empty() {
                return true;
            }
        }
        rest.is_empty()
    }

    /// True if every box of `other` is covered by the boxes of `self`.
    pub fn contains_set(&self, other: &RegionSet) -> bool {
        other.iter().all(|b| self.contains_box(&b, false, IntVect::zero()))
    }

    /// True if every cell of `other` is covered by `self` after being moved by
    /// some periodic shift.
    pub fn contains_periodic(&self, other: &RegionSet, period: &Periodicity) -> bool {
        if other.ix_type() != self.ix_type() {
            return other.is_empty();
        }
        let shifts = period.shift_vectors(IntVect::zero());
        other.iter().all(|b| {
            let mut rest = vec![b];
            for s in &shifts {
                let mut next = Vec::new();
                for piece in &rest {
                    let mut left = vec![*piece];
                    for (_, x) in self.intersections(&piece.shift(*s)) {
                        let back = x.shift(-*s);
                        left = left.iter().flat_map(|r| r.diff(&back)).collect();
                    }
                    next.extend(left);
                }
                rest = next;
                if rest.is_empty() {
                    return true;
                }
            }
            rest.is_empty()
        })
    }

    /// Parts of `b` not covered by any box.
    pub fn complement_in(&self, b: &IndexBox) -> Vec<IndexBox> {
        let mut rest = vec![*b];
        for (_, x) in self.intersections(b) {
            rest = rest.iter().flat_map(|r| r.diff(&x)).collect();
            if rest.is_empty() {
                break;
            }
        }
        rest
    }

    /// True if no two boxes overlap.
    pub fn is_disjoint(&self) -> bool {
        self.iter().enumerate().all(|(i, b)| {
            self.intersections(&b).iter().all(|&(j, _)| j == i)
        })
    }

    /// True if every box coarsens exactly by `ratio` and stays at least `min_width` wide.
    pub fn coarsenable(&self, ratio: IntVect, min_width: i32) -> bool {
        (0..self.len()).all(|i| match self.cell_box(i) {
            Some(b) => {
                b.coarsenable(ratio)
                    && b.coarsen(ratio).size().all_ge(IntVect::splat(min_width))
            }
            None => false,
        })
    }

    // ----------------------------------------------------------------------
    // Derived sets
    // ----------------------------------------------------------------------

    fn materialize(&self, f: impl Fn(IndexBox) -> IndexBox) -> Result<Self, HaloError> {
        Self::new(self.iter().map(f).collect())
    }

    /// Every box grown by `ng`.
    pub fn grow(&self, ng: IntVect) -> Result<Self, HaloError> {
        self.materialize(|b| b.grow(ng))
    }

    /// Every box shifted by `v`.
    pub fn shift(&self, v: IntVect) -> Result<Self, HaloError> {
        self.materialize(|b| b.shift(v))
    }

    /// Coarsened view; shares the base boxes when the transform composes.
    pub fn coarsen(&self, ratio: IntVect) -> Result<Self, HaloError> {
        check_ratio(ratio)?;
        match self.transform.with_coarsen(ratio) {
            Some(t) => Ok(self.with_transform(t)),
            None => self.materialize(|b| b.coarsen(ratio)),
        }
    }

    /// Coarsened view that refuses lossy coarsening.
    ///
    /// # Errors
    /// `NotCoarsenable` unless every box coarsens exactly by `ratio` to at
    /// least `min_width` cells per axis.
    pub fn coarsen_exact(&self, ratio: IntVect, min_width: i32) -> Result<Self, HaloError> {
        check_ratio(ratio)?;
        if !self.coarsenable(ratio, min_width) {
            return Err(HaloError::NotCoarsenable(ratio));
        }
        self.coarsen(ratio)
    }

    /// Refined set; undoes an earlier lazy coarsening when the ratios divide.
    pub fn refine(&self, ratio: IntVect) -> Result<Self, HaloError> {
        check_ratio(ratio)?;
        match self.transform.with_refine(ratio) {
            Some(t) => Ok(self.with_transform(t)),
            None => self.materialize(|b| b.refine(ratio)),
        }
    }

    /// Re-centred view.
    pub fn convert(&self, ix: IndexType) -> Result<Self, HaloError> {
        match self.transform.with_index_type(ix) {
            Some(t) => Ok(self.with_transform(t)),
            None => self.materialize(|b| b.convert(ix)),
        }
    }

    /// Boundary-register view over one face of every box.
    pub fn boundary_register(
        &self,
        face: Face,
        ix: IndexType,
        in_rad: i32,
        out_rad: i32,
        extent_rad: i32,
    ) -> Result<Self, HaloError> {
        let base = if self.transform.is_identity() {
            self.clone()
        } else {
            self.materialize(|b| b.enclosed_cells())?
        };
        let br = BoundaryRegister::new(face, ix, in_rad, out_rad, extent_rad);
        Ok(base.with_transform(BoxTransform::BoundaryRegister(br)))
    }

    /// Chop every box so no side exceeds `block`, splitting as evenly as possible.
    pub fn max_size(&self, block: IntVect) -> Result<Self, HaloError> {
        check_ratio(block)?;
        let ix = self.ix_type();
        let mut out = Vec::with_capacity(self.len());
        for b in self.iter() {
            let mut pieces = vec![b.enclosed_cells()];
            for d in 0..SPACEDIM {
                pieces = pieces
                    .into_iter()
                    .flat_map(|p| split_even(p, d, block[d]))
                    .collect();
            }
            out.extend(pieces.into_iter().map(|p| p.convert(ix)));
        }
        Self::new(out)
    }
}

fn check_ratio(ratio: IntVect) -> Result<(), HaloError> {
    if ratio.all_ge(IntVect::unit()) {
        Ok(())
    } else {
        Err(HaloError::InvalidRatio(ratio))
    }
}

fn split_even(b: IndexBox, dir: usize, block: i32) -> Vec<IndexBox> {
    let len = b.length(dir);
    if len <= block {
        return vec![b];
    }
    let n = (len + block - 1) / block;
    let base = len / n;
    let extra = len % n;
    let mut out = Vec::with_capacity(n as usize);
    let mut rest = b;
    for k in 0..n - 1 {
        let w = base + i32::from(k < extra);
        let (piece, tail) = rest.chop(dir, rest.lo()[dir] + w);
        out.push(piece);
        rest = tail;
    }
    out.push(rest);
    out
}

impl Default for RegionSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for RegionSet {
    fn eq(&self, other: &Self) -> bool {
        if Self::same_ref(self, other) && self.transform == other.transform {
            return true;
        }
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl Eq for RegionSet {}

impl fmt::Debug for RegionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionSet")
            .field("id", &self.inner.id)
            .field("len", &self.len())
            .field("transform", &self.transform)
            .field("indexed", &self.has_index())
            .finish()
    }
}

impl DebugInvariants for RegionSet {
    fn validate_invariants(&self) -> Result<(), HaloError> {
        if let Some(b) = self
            .inner
            .boxes
            .iter()
            .find(|b| !b.ix_type().is_cell_centered())
        {
            return Err(HaloError::InvariantViolation(format!(
                "base box {b:?} is not cell-centred"
            )));
        }
        if let Some(h) = self.inner.hash.get() {
            if !h.is_consistent_with(&self.inner.boxes) {
                return Err(HaloError::InvariantViolation(
                    "spatial index disagrees with box list".into(),
                ));
            }
        }
        Ok(())
    }
}
