//! Per-box field data.
//!
//! A [`Payload`] is a dense multi-component array over one box (valid cells
//! plus ghosts). Storage is component-major: component `c` occupies one
//! contiguous run of `fab_box.num_pts()` elements, and inside it cells are
//! laid out with axis 0 fastest, matching [`IndexBox::iter`].
//!
//! The provided helpers move whole sub-regions at a time. Each walks the
//! region in x-rows so the inner loop is a plain slice copy.

use super::arena::Residency;
use crate::geometry::{IndexBox, IntVect};
use crate::halo_error::HaloError;
use bytemuck::Pod;
use num_traits::NumAssign;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Scalar type a payload can hold and the exchange can ship as raw bytes.
pub trait Element: Pod + NumAssign + Default + Debug + Send + Sync + 'static {}

impl<T> Element for T where T: Pod + NumAssign + Default + Debug + Send + Sync + 'static {}

/// How arriving values combine with what is already stored.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FillOp {
    #[default]
    Copy,
    Add,
}

impl FillOp {
    #[inline]
    pub fn apply_slice<T: Element>(self, dst: &mut [T], src: &[T]) {
        match self {
            FillOp::Copy => dst.copy_from_slice(src),
            FillOp::Add => {
                for (d, s) in dst.iter_mut().zip(src) {
                    *d += *s;
                }
            }
        }
    }
}

/// Start offset (within one component) of every x-row of `region` inside `fab_box`.
pub(crate) fn row_starts(fab_box: IndexBox, region: IndexBox) -> impl Iterator<Item = usize> {
    let lo = region.lo();
    let hi = region.hi();
    let empty = region.is_empty();
    (lo[2]..=hi[2])
        .flat_map(move |k| (lo[1]..=hi[1]).map(move |j| (j, k)))
        .filter(move |_| !empty)
        .map(move |(j, k)| fab_box.index(IntVect::new(lo[0], j, k)))
}

pub trait Payload: Send + Sync {
    type Elem: Element;

    /// Box covered by the storage, ghosts included.
    fn fab_box(&self) -> IndexBox;

    fn ncomp(&self) -> usize;

    fn residency(&self) -> Residency;

    /// Whole buffer, component-major.
    fn as_slice(&self) -> &[Self::Elem];

    fn as_mut_slice(&mut self) -> &mut [Self::Elem];

    /// Linear offset of point `p` in component `comp`.
    #[inline]
    fn offset(&self, p: IntVect, comp: usize) -> usize {
        let fab = self.fab_box();
        comp * fab.num_pts() as usize + fab.index(p)
    }

    fn get(&self, p: IntVect, comp: usize) -> Option<Self::Elem> {
        if comp < self.ncomp() && self.fab_box().contains_point(p) {
            self.as_slice().get(self.offset(p, comp)).copied()
        } else {
            None
        }
    }

    fn set(&mut self, p: IntVect, comp: usize, v: Self::Elem) -> Result<(), HaloError> {
        self.check_comps(comp, 1)?;
        let fab = self.fab_box();
        if !fab.contains_point(p) {
            return Err(HaloError::RegionOutsidePayload {
                region: IndexBox::new(p, p, fab.ix_type()),
                fab_box: fab,
            });
        }
        let off = self.offset(p, comp);
        self.as_mut_slice()[off] = v;
        Ok(())
    }

    fn check_comps(&self, start: usize, count: usize) -> Result<(), HaloError> {
        if start + count <= self.ncomp() {
            Ok(())
        } else {
            Err(HaloError::ComponentRange {
                start,
                count,
                ncomp: self.ncomp(),
            })
        }
    }

    fn check_region(&self, region: &IndexBox) -> Result<(), HaloError> {
        let fab = self.fab_box();
        if region.is_empty() || fab.contains(region) {
            Ok(())
        } else {
            Err(HaloError::RegionOutsidePayload {
                region: *region,
                fab_box: fab,
            })
        }
    }

    /// Copy components `[scomp, scomp + ncomp)` of `region` into `out`,
    /// components outermost and cells x-fastest.
    fn pack_region(
        &self,
        region: &IndexBox,
        scomp: usize,
        ncomp: usize,
        out: &mut [Self::Elem],
    ) -> Result<(), HaloError> {
        self.check_comps(scomp, ncomp)?;
        self.check_region(region)?;
        let npts = region.num_pts() as usize;
        if out.len() != npts * ncomp {
            return Err(HaloError::LengthMismatch {
                expected: npts * ncomp,
                found: out.len(),
            });
        }
        let fab = self.fab_box();
        let stride = fab.num_pts() as usize;
        let row = region.length(0).max(0) as usize;
        let data = self.as_slice();
        let mut pos = 0;
        for c in scomp..scomp + ncomp {
            for start in row_starts(fab, *region) {
                let s = c * stride + start;
                out[pos..pos + row].copy_from_slice(&data[s..s + row]);
                pos += row;
            }
        }
        Ok(())
    }

    /// Inverse of [`pack_region`](Self::pack_region), combining with `op`.
    fn unpack_region(
        &mut self,
        region: &IndexBox,
        dcomp: usize,
        ncomp: usize,
        src: &[Self::Elem],
        op: FillOp,
    ) -> Result<(), HaloError> {
        self.check_comps(dcomp, ncomp)?;
        self.check_region(region)?;
        let npts = region.num_pts() as usize;
        if src.len() != npts * ncomp {
            return Err(HaloError::LengthMismatch {
                expected: npts * ncomp,
                found: src.len(),
            });
        }
        let fab = self.fab_box();
        let stride = fab.num_pts() as usize;
        let row = region.length(0).max(0) as usize;
        let data = self.as_mut_slice();
        let mut pos = 0;
        for c in dcomp..dcomp + ncomp {
            for start in row_starts(fab, *region) {
                let d = c * stride + start;
                op.apply_slice(&mut data[d..d + row], &src[pos..pos + row]);
                pos += row;
            }
        }
        Ok(())
    }

    /// Copy `src_region` of `src` onto `src_region.shift(shift)` of `self`.
    #[allow(clippy::too_many_arguments)]
    fn copy_region_from(
        &mut self,
        src: &Self,
        src_region: &IndexBox,
        shift: IntVect,
        scomp: usize,
        dcomp: usize,
        ncomp: usize,
        op: FillOp,
    ) -> Result<(), HaloError>
    where
        Self: Sized,
    {
        let dst_region = src_region.shift(shift);
        src.check_comps(scomp, ncomp)?;
        src.check_region(src_region)?;
        self.check_comps(dcomp, ncomp)?;
        self.check_region(&dst_region)?;
        let sfab = src.fab_box();
        let dfab = self.fab_box();
        let sstride = sfab.num_pts() as usize;
        let dstride = dfab.num_pts() as usize;
        let row = src_region.length(0).max(0) as usize;
        let sdata = src.as_slice();
        let ddata = self.as_mut_slice();
        for n in 0..ncomp {
            let rows = row_starts(sfab, *src_region).zip(row_starts(dfab, dst_region));
            for (s0, d0) in rows {
                let s = (scomp + n) * sstride + s0;
                let d = (dcomp + n) * dstride + d0;
                op.apply_slice(&mut ddata[d..d + row], &sdata[s..s + row]);
            }
        }
        Ok(())
    }
}

/// Dense, owned payload: the default [`Payload`].
#[derive(Clone, Debug, PartialEq)]
pub struct BoxData<T: Element> {
    fab_box: IndexBox,
    ncomp: usize,
    residency: Residency,
    data: Vec<T>,
}

impl<T: Element> BoxData<T> {
    pub fn new(fab_box: IndexBox, ncomp: usize) -> Self {
        Self::with_residency(fab_box, ncomp, Residency::Host)
    }

    pub fn with_residency(fab_box: IndexBox, ncomp: usize, residency: Residency) -> Self {
        Self {
            fab_box,
            ncomp,
            residency,
            data: vec![T::default(); fab_box.num_pts() as usize * ncomp],
        }
    }

    pub fn fill(&mut self, v: T) {
        self.data.fill(v);
    }

    /// Set every point of `region` (clipped to the payload) in component `comp` from `f`.
    pub fn fill_with(&mut self, region: &IndexBox, comp: usize, mut f: impl FnMut(IntVect) -> T) {
        if comp >= self.ncomp {
            return;
        }
        let clipped = region.intersect(&self.fab_box);
        for p in clipped.iter() {
            let off = self.offset(p, comp);
            self.data[off] = f(p);
        }
    }
}

impl<T: Element> Payload for BoxData<T> {
    type Elem = T;

    #[inline]
    fn fab_box(&self) -> IndexBox {
        self.fab_box
    }

    #[inline]
    fn ncomp(&self) -> usize {
        self.ncomp
    }

    #[inline]
    fn residency(&self) -> Residency {
        self.residency
    }

    #[inline]
    fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(b: IndexBox, ncomp: usize) -> BoxData<f64> {
        let mut d = BoxData::new(b, ncomp);
        for c in 0..ncomp {
            d.fill_with(&b, c, |p| (c * 1000) as f64 + (p[0] + 10 * p[1]) as f64);
        }
        d
    }

    #[test]
    fn pack_is_component_major_x_fastest() {
        let b = IndexBox::cell(IntVect::zero(), IntVect::new(3, 2, 0));
        let d = ramp(b, 2);
        let r = IndexBox::cell(IntVect::new(1, 1, 0), IntVect::new(2, 2, 0));
        let mut out = vec![0.0; 8];
        d.pack_region(&r, 0, 2, &mut out).unwrap();
        assert_eq!(
            out,
            vec![11.0, 12.0, 21.0, 22.0, 1011.0, 1012.0, 1021.0, 1022.0]
        );
    }

    #[test]
    fn unpack_with_add_accumulates() {
        let b = IndexBox::line(0, 3);
        let mut d = BoxData::<i64>::new(b, 1);
        d.fill(5);
        let r = IndexBox::line(1, 2);
        d.unpack_region(&r, 0, 1, &[1, 2], FillOp::Add).unwrap();
        assert_eq!(d.as_slice(), &[5, 6, 7, 5]);
        d.unpack_region(&r, 0, 1, &[1, 2], FillOp::Copy).unwrap();
        assert_eq!(d.as_slice(), &[5, 1, 2, 5]);
    }

    #[test]
    fn shifted_copy_between_payloads() {
        let src = ramp(IndexBox::line(0, 7), 1);
        let mut dst = BoxData::<f64>::new(IndexBox::line(-2, 1), 1);
        dst.copy_region_from(&src, &IndexBox::line(6, 7), IntVect::new(-8, 0, 0), 0, 0, 1, FillOp::Copy)
            .unwrap();
        assert_eq!(dst.get(IntVect::new(-2, 0, 0), 0), Some(6.0));
        assert_eq!(dst.get(IntVect::new(-1, 0, 0), 0), Some(7.0));
        assert_eq!(dst.get(IntVect::new(0, 0, 0), 0), Some(0.0));
    }

    #[test]
    fn helpers_reject_bad_input() {
        let d = ramp(IndexBox::line(0, 3), 1);
        let mut out = vec![0.0; 2];
        assert!(matches!(
            d.pack_region(&IndexBox::line(3, 4), 0, 1, &mut out),
            Err(HaloError::RegionOutsidePayload { .. })
        ));
        assert!(matches!(
            d.pack_region(&IndexBox::line(0, 1), 1, 1, &mut out),
            Err(HaloError::ComponentRange { .. })
        ));
        assert!(matches!(
            d.pack_region(&IndexBox::line(0, 2), 0, 1, &mut out),
            Err(HaloError::LengthMismatch { expected: 3, found: 2 })
        ));
    }
}
