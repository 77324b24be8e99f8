//! Lazily applied geometric transforms for region sets.
//!
//! A [`RegionSet`](super::RegionSet) stores cell-centred base boxes once and
//! carries a [`BoxTransform`] by value. Reading box `i` applies the transform
//! to base box `i`, so coarsened or re-centred views share both the box list
//! and its spatial index with the set they were derived from.
//!
//! The set of transforms is closed; dispatch is a `match` on the variant.

use crate::geometry::{IndexBox, IndexType, IntVect, SPACEDIM};
use serde::{Deserialize, Serialize};

/// One face of the index domain: an axis plus low/high side.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Face {
    pub dir: usize,
    pub low: bool,
}

impl Face {
    pub fn low(dir: usize) -> Self {
        Self { dir, low: true }
    }

    pub fn high(dir: usize) -> Self {
        Self { dir, low: false }
    }
}

/// Boundary-register view: each base box maps to a slab hugging one face.
///
/// `in_rad` cells reach into the box, `out_rad` cells reach out of it and
/// `extent_rad` widens the slab tangentially. For a face nodal in the normal
/// direction the slab is the face itself.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundaryRegister {
    face: Face,
    ix: IndexType,
    lo_shift: IntVect,
    hi_shift: IntVect,
}

impl BoundaryRegister {
    pub fn new(face: Face, ix: IndexType, in_rad: i32, out_rad: i32, extent_rad: i32) -> Self {
        let nodal = ix.as_int_vect();
        let mut lo_shift = IntVect::splat(-extent_rad);
        let mut hi_shift = IntVect::splat(extent_rad) + nodal;
        let d = face.dir;
        if nodal[d] != 0 {
            let s = if face.low { 0 } else { 1 };
            lo_shift[d] = s;
            hi_shift[d] = s;
        } else if face.low {
            lo_shift[d] = -out_rad;
            hi_shift[d] = in_rad - 1;
        } else {
            lo_shift[d] = 1 - in_rad;
            hi_shift[d] = out_rad;
        }
        Self {
            face,
            ix,
            lo_shift,
            hi_shift,
        }
    }

    pub fn face(&self) -> Face {
        self.face
    }

    fn apply(&self, bx: &IndexBox) -> IndexBox {
        let mut lo = bx.lo();
        let mut hi = bx.hi();
        let d = self.face.dir;
        if self.face.low {
            hi[d] = lo[d];
        } else {
            lo[d] = hi[d];
        }
        IndexBox::new(lo + self.lo_shift, hi + self.hi_shift, self.ix)
    }
}

/// Transform applied to every base box on read.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BoxTransform {
    #[default]
    Identity,
    IndexType(IndexType),
    CoarsenRatio(IntVect),
    IndexTypeCoarsenRatio {
        ix: IndexType,
        ratio: IntVect,
    },
    BoundaryRegister(BoundaryRegister),
}

impl BoxTransform {
    /// Transform that only re-centres; identity for cell-centred types.
    pub fn from_index_type(ix: IndexType) -> Self {
        if ix.is_cell_centered() {
            BoxTransform::Identity
        } else {
            BoxTransform::IndexType(ix)
        }
    }

    fn from_parts(ix: IndexType, ratio: IntVect) -> Self {
        match (ix.is_cell_centered(), ratio == IntVect::unit()) {
            (true, true) => BoxTransform::Identity,
            (false, true) => BoxTransform::IndexType(ix),
            (true, false) => BoxTransform::CoarsenRatio(ratio),
            (false, false) => BoxTransform::IndexTypeCoarsenRatio { ix, ratio },
        }
    }

    /// Image of a cell-centred base box.
    pub fn apply(&self, bx: &IndexBox) -> IndexBox {
        match self {
            BoxTransform::Identity => *bx,
            BoxTransform::IndexType(ix) => bx.convert(*ix),
            BoxTransform::CoarsenRatio(r) => bx.coarsen(*r),
            BoxTransform::IndexTypeCoarsenRatio { ix, ratio } => bx.coarsen(*ratio).convert(*ix),
            BoxTransform::BoundaryRegister(br) => br.apply(bx),
        }
    }

    /// Cell-centred image of a base box: coarsening only, no re-centring.
    pub fn coarsen(&self, bx: &IndexBox) -> IndexBox {
        match self {
            BoxTransform::CoarsenRatio(r) | BoxTransform::IndexTypeCoarsenRatio { ratio: r, .. } => {
                bx.coarsen(*r)
            }
            _ => *bx,
        }
    }

    pub fn index_type(&self) -> IndexType {
        match self {
            BoxTransform::Identity | BoxTransform::CoarsenRatio(_) => IndexType::cell(),
            BoxTransform::IndexType(ix) | BoxTransform::IndexTypeCoarsenRatio { ix, .. } => *ix,
            BoxTransform::BoundaryRegister(br) => br.ix,
        }
    }

    pub fn coarsen_ratio(&self) -> IntVect {
        match self {
            BoxTransform::CoarsenRatio(r) | BoxTransform::IndexTypeCoarsenRatio { ratio: r, .. } => *r,
            _ => IntVect::unit(),
        }
    }

    /// How far below a (coarsened) base box its image may reach.
    pub fn doi_lo(&self) -> IntVect {
        match self {
            BoxTransform::BoundaryRegister(br) => (-br.lo_shift).max(IntVect::zero()),
            _ => IntVect::zero(),
        }
    }

    /// How far above a (coarsened) base box its image may reach.
    pub fn doi_hi(&self) -> IntVect {
        match self {
            BoxTransform::BoundaryRegister(br) => br.hi_shift.max(IntVect::zero()),
            other => other.index_type().as_int_vect(),
        }
    }

    #[inline]
    pub fn is_identity(&self) -> bool {
        matches!(self, BoxTransform::Identity)
    }

    /// Compose an additional coarsening. Boundary registers do not compose.
    pub fn with_coarsen(&self, ratio: IntVect) -> Option<Self> {
        match self {
            BoxTransform::BoundaryRegister(_) => None,
            _ => Some(Self::from_parts(
                self.index_type(),
                self.coarsen_ratio().scale(ratio),
            )),
        }
    }

    /// Undo part of an earlier coarsening, if `ratio` divides the stored ratio.
    pub fn with_refine(&self, ratio: IntVect) -> Option<Self> {
        let cur = self.coarsen_ratio();
        let divisible = (0..SPACEDIM).all(|d| cur[d] % ratio[d] == 0);
        match self {
            BoxTransform::BoundaryRegister(_) => None,
            _ if divisible => Some(Self::from_parts(
                self.index_type(),
                IntVect::from_fn(|d| cur[d] / ratio[d]),
            )),
            _ => None,
        }
    }

    /// Replace the centring, keeping any coarsening.
    pub fn with_index_type(&self, ix: IndexType) -> Option<Self> {
        match self {
            BoxTransform::BoundaryRegister(_) => None,
            _ => Some(Self::from_parts(ix, self.coarsen_ratio())),
        }
    }

    /// Base-space box guaranteed to contain every base box whose image meets `query`.
    pub fn search_box(&self, query: &IndexBox) -> IndexBox {
        let lo = query.lo() - self.doi_hi();
        let hi = query.hi() + self.doi_lo();
        IndexBox::cell(lo, hi).refine(self.coarsen_ratio())
    }
}
