//! `IndexBox`: an axis-aligned, inclusive hyper-rectangle in index space.
//!
//! A box is a plain value: every geometric operation returns a new box. A box
//! with `hi[d] < lo[d]` on any axis is empty; empty boxes are legal values and
//! report zero points.
//!
//! Cells are enumerated with axis 0 varying fastest. That order defines both
//! [`IndexBox::index`] and [`IndexBox::iter`], and therefore the on-wire order
//! of packed halo data.

use super::index_type::IndexType;
use super::int_vect::{IntVect, SPACEDIM};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexBox {
    lo: IntVect,
    hi: IntVect,
    ix: IndexType,
}

impl IndexBox {
    #[inline]
    pub const fn new(lo: IntVect, hi: IntVect, ix: IndexType) -> Self {
        Self { lo, hi, ix }
    }

    /// Cell-centred box `[lo, hi]`.
    #[inline]
    pub const fn cell(lo: IntVect, hi: IntVect) -> Self {
        Self::new(lo, hi, IndexType::cell())
    }

    /// One-dimensional cell-centred box `[lo, hi]` along axis 0.
    #[inline]
    pub const fn line(lo: i32, hi: i32) -> Self {
        Self::cell(IntVect::new(lo, 0, 0), IntVect::new(hi, 0, 0))
    }

    /// The canonical empty box.
    #[inline]
    pub const fn empty() -> Self {
        Self::cell(IntVect::splat(0), IntVect::splat(-1))
    }

    #[inline]
    pub fn lo(&self) -> IntVect {
        self.lo
    }

    #[inline]
    pub fn hi(&self) -> IntVect {
        self.hi
    }

    #[inline]
    pub fn ix_type(&self) -> IndexType {
        self.ix
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        (0..SPACEDIM).any(|d| self.hi[d] < self.lo[d])
    }

    /// Number of points along `dir`, zero if empty along it.
    #[inline]
    pub fn length(&self, dir: usize) -> i32 {
        (self.hi[dir] - self.lo[dir] + 1).max(0)
    }

    #[inline]
    pub fn size(&self) -> IntVect {
        IntVect::from_fn(|d| self.length(d))
    }

    /// Total number of points; zero for an empty box.
    #[inline]
    pub fn num_pts(&self) -> u64 {
        if self.is_empty() { 0 } else { self.size().volume() }
    }

    #[inline]
    pub fn contains_point(&self, p: IntVect) -> bool {
        p.all_ge(self.lo) && p.all_le(self.hi)
    }

    /// True if `other` is non-empty, has the same index type and lies entirely inside `self`.
    pub fn contains(&self, other: &IndexBox) -> bool {
        !other.is_empty()
            && self.ix == other.ix
            && other.lo.all_ge(self.lo)
            && other.hi.all_le(self.hi)
    }

    /// True if the two boxes share at least one point.
    #[inline]
    pub fn intersects(&self, other: &IndexBox) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Intersection of the two boxes; may be empty. Keeps `self`'s index type.
    #[inline]
    pub fn intersect(&self, other: &IndexBox) -> IndexBox {
        IndexBox::new(self.lo.max(other.lo), self.hi.min(other.hi), self.ix)
    }

    /// Smallest box containing both.
    pub fn bounding(&self, other: &IndexBox) -> IndexBox {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        IndexBox::new(self.lo.min(other.lo), self.hi.max(other.hi), self.ix)
    }

    /// Grow by `n[d]` on both sides of each axis (negative shrinks).
    #[inline]
    pub fn grow(&self, n: IntVect) -> IndexBox {
        IndexBox::new(self.lo - n, self.hi + n, self.ix)
    }

    /// Grow along a single axis on both sides.
    #[inline]
    pub fn grow_dir(&self, dir: usize, n: i32) -> IndexBox {
        self.grow_lo(dir, n).grow_hi(dir, n)
    }

    #[inline]
    pub fn grow_lo(&self, dir: usize, n: i32) -> IndexBox {
        let mut b = *self;
        b.lo[dir] -= n;
        b
    }

    #[inline]
    pub fn grow_hi(&self, dir: usize, n: i32) -> IndexBox {
        let mut b = *self;
        b.hi[dir] += n;
        b
    }

    #[inline]
    pub fn shift(&self, v: IntVect) -> IndexBox {
        IndexBox::new(self.lo + v, self.hi + v, self.ix)
    }

    /// Coarsen by `ratio`. Nodal axes round the high end up so the coarse box
    /// still covers every fine node.
    pub fn coarsen(&self, ratio: IntVect) -> IndexBox {
        let lo = self.lo.coarsen(ratio);
        let mut hi = self.hi.coarsen(ratio);
        for d in 0..SPACEDIM {
            if self.ix.is_nodal(d) && self.hi[d].rem_euclid(ratio[d]) != 0 {
                hi[d] += 1;
            }
        }
        IndexBox::new(lo, hi, self.ix)
    }

    /// Refine by `ratio`.
    pub fn refine(&self, ratio: IntVect) -> IndexBox {
        let lo = self.lo.scale(ratio);
        let hi = IntVect::from_fn(|d| {
            if self.ix.is_nodal(d) {
                self.hi[d] * ratio[d]
            } else {
                (self.hi[d] + 1) * ratio[d] - 1
            }
        });
        IndexBox::new(lo, hi, self.ix)
    }

    /// True if coarsening then refining by `ratio` gives back the same box.
    pub fn coarsenable(&self, ratio: IntVect) -> bool {
        self.coarsen(ratio).refine(ratio) == *self
    }

    /// Change centring. Cell to node adds one point on the high side; node to cell removes it.
    pub fn convert(&self, ix: IndexType) -> IndexBox {
        let mut hi = self.hi;
        for d in 0..SPACEDIM {
            match (self.ix.is_nodal(d), ix.is_nodal(d)) {
                (false, true) => hi[d] += 1,
                (true, false) => hi[d] -= 1,
                _ => {}
            }
        }
        IndexBox::new(self.lo, hi, ix)
    }

    #[inline]
    pub fn surrounding_nodes(&self) -> IndexBox {
        self.convert(IndexType::node())
    }

    #[inline]
    pub fn enclosed_cells(&self) -> IndexBox {
        self.convert(IndexType::cell())
    }

    /// Split at `at` along `dir`: `[lo, at-1]` and `[at, hi]`.
    pub fn chop(&self, dir: usize, at: i32) -> (IndexBox, IndexBox) {
        let mut left = *self;
        let mut right = *self;
        left.hi[dir] = at - 1;
        right.lo[dir] = at;
        (left, right)
    }

    /// Linear offset of `p` within `self` (axis 0 fastest).
    #[inline]
    pub fn index(&self, p: IntVect) -> usize {
        let len = self.size();
        let mut off = 0usize;
        for d in (0..SPACEDIM).rev() {
            off = off * len[d] as usize + (p[d] - self.lo[d]) as usize;
        }
        off
    }

    /// Iterate points with axis 0 fastest.
    pub fn iter(&self) -> BoxIter {
        BoxIter {
            bx: *self,
            cur: self.lo,
            done: self.is_empty(),
        }
    }

    /// `self` minus `other`, as a list of disjoint boxes covering the difference.
    pub fn diff(&self, other: &IndexBox) -> Vec<IndexBox> {
        if self.is_empty() {
            return Vec::new();
        }
        if !self.intersects(other) {
            return vec![*self];
        }
        let mut out = Vec::with_capacity(2 * SPACEDIM);
        let mut rest = *self;
        for d in 0..SPACEDIM {
            if other.lo[d] > rest.lo[d] {
                let (below, above) = rest.chop(d, other.lo[d]);
                out.push(below);
                rest = above;
            }
            if other.hi[d] < rest.hi[d] {
                let (below, above) = rest.chop(d, other.hi[d] + 1);
                out.push(above);
                rest = below;
            }
        }
        out
    }
}

impl Default for IndexBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for IndexBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?} {:?} {:?}]", self.lo, self.hi, self.ix)
    }
}

/// Iterator over the points of an [`IndexBox`].
#[derive(Clone, Debug)]
pub struct BoxIter {
    bx: IndexBox,
    cur: IntVect,
    done: bool,
}

impl Iterator for BoxIter {
    type Item = IntVect;

    fn next(&mut self) -> Option<IntVect> {
        if self.done {
            return None;
        }
        let out = self.cur;
        let mut d = 0;
        loop {
            if d == SPACEDIM {
                self.done = true;
                break;
            }
            if self.cur[d] < self.bx.hi[d] {
                self.cur[d] += 1;
                break;
            }
            self.cur[d] = self.bx.lo[d];
            d += 1;
        }
        Some(out)
    }
}
