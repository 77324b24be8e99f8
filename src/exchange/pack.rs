//! Buffer packing: moving tag regions between payloads and message spans.
//!
//! Host-resident payloads are packed with a sequential row loop. Device and
//! managed payloads go through a bulk path that first lists every source row
//! and then copies all rows in one pass, in parallel with the `rayon`
//! feature.

use super::tags::CopyTag;
use crate::algs::wire::{aligned_size, message_len, slot_align};
use crate::data::arena::Residency;
use crate::data::payload::{Element, FillOp, Payload, row_starts};
use crate::data::store::BoxStore;
use crate::geometry::IndexBox;
use crate::halo_error::HaloError;

/// Where one peer's message sits inside a transfer span.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PeerSlot {
    pub peer: usize,
    /// Byte offset in the span.
    pub offset: usize,
    /// Payload elements carried.
    pub nelems: usize,
    /// Bytes on the wire, padded to the transport unit.
    pub nbytes: usize,
}

/// Lay out one slot per peer with a non-zero cell count; returns the slots
/// and the span length.
pub fn layout<T>(cells: impl IntoIterator<Item = (usize, usize)>, ncomp: usize) -> (Vec<PeerSlot>, usize) {
    let mut slots = Vec::new();
    let mut total = 0;
    for (peer, n) in cells {
        let nelems = n * ncomp;
        if nelems == 0 {
            continue;
        }
        let offset = aligned_size(slot_align::<T>(), total);
        let nbytes = message_len::<T>(nelems);
        slots.push(PeerSlot {
            peer,
            offset,
            nelems,
            nbytes,
        });
        total = offset + nbytes;
    }
    (slots, total)
}

fn check_len(region: &IndexBox, ncomp: usize, len: usize) -> Result<(), HaloError> {
    let want = region.num_pts() as usize * ncomp;
    if want == len {
        Ok(())
    } else {
        Err(HaloError::LengthMismatch {
            expected: want,
            found: len,
        })
    }
}

fn rows<P: Payload>(p: &P, region: &IndexBox, comp0: usize, ncomp: usize) -> Vec<usize> {
    let fab = p.fab_box();
    let stride = fab.num_pts() as usize;
    let region = *region;
    (comp0..comp0 + ncomp)
        .flat_map(|c| row_starts(fab, region).map(move |s| c * stride + s))
        .collect()
}

fn pack_bulk<P: Payload>(
    src: &P,
    region: &IndexBox,
    scomp: usize,
    ncomp: usize,
    out: &mut [P::Elem],
) -> Result<(), HaloError> {
    src.check_comps(scomp, ncomp)?;
    src.check_region(region)?;
    check_len(region, ncomp, out.len())?;
    let row = region.length(0) as usize;
    if out.is_empty() {
        return Ok(());
    }
    let starts = rows(src, region, scomp, ncomp);
    let data = src.as_slice();
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        out.par_chunks_mut(row)
            .zip(starts.par_iter())
            .for_each(|(o, &s)| o.copy_from_slice(&data[s..s + row]));
    }
    #[cfg(not(feature = "rayon"))]
    for (o, &s) in out.chunks_mut(row).zip(&starts) {
        o.copy_from_slice(&data[s..s + row]);
    }
    Ok(())
}

fn unpack_bulk<P: Payload>(
    dst: &mut P,
    region: &IndexBox,
    dcomp: usize,
    ncomp: usize,
    src: &[P::Elem],
    op: FillOp,
) -> Result<(), HaloError> {
    dst.check_comps(dcomp, ncomp)?;
    dst.check_region(region)?;
    check_len(region, ncomp, src.len())?;
    let row = region.length(0) as usize;
    if src.is_empty() {
        return Ok(());
    }
    let starts = rows(dst, region, dcomp, ncomp);
    let data = dst.as_mut_slice();
    // rows are disjoint, so each destination slice is split off once
    let mut parts: Vec<(usize, &[P::Elem])> = starts.into_iter().zip(src.chunks(row)).collect();
    parts.sort_unstable_by_key(|&(s, _)| s);
    let mut rest: &mut [P::Elem] = data;
    let mut base = 0;
    let mut targets = Vec::with_capacity(parts.len());
    for (s, chunk) in parts {
        let (_, tail) = std::mem::take(&mut rest).split_at_mut(s - base);
        let (cur, tail) = tail.split_at_mut(row);
        targets.push((cur, chunk));
        rest = tail;
        base = s + row;
    }
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        targets
            .into_par_iter()
            .for_each(|(d, s)| op.apply_slice(d, s));
    }
    #[cfg(not(feature = "rayon"))]
    for (d, s) in targets {
        op.apply_slice(d, s);
    }
    Ok(())
}

/// Pack `region` of `src` into `out`, choosing the path by residency.
pub fn pack<P: Payload>(
    src: &P,
    region: &IndexBox,
    scomp: usize,
    ncomp: usize,
    out: &mut [P::Elem],
) -> Result<(), HaloError> {
    match src.residency() {
        Residency::Host | Residency::Pinned => src.pack_region(region, scomp, ncomp, out),
        Residency::Device | Residency::Managed => pack_bulk(src, region, scomp, ncomp, out),
    }
}

/// Unpack `src` into `region` of `dst`, choosing the path by residency.
pub fn unpack<P: Payload>(
    dst: &mut P,
    region: &IndexBox,
    dcomp: usize,
    ncomp: usize,
    src: &[P::Elem],
    op: FillOp,
) -> Result<(), HaloError> {
    match dst.residency() {
        Residency::Host | Residency::Pinned => dst.unpack_region(region, dcomp, ncomp, src, op),
        Residency::Device | Residency::Managed => unpack_bulk(dst, region, dcomp, ncomp, src, op),
    }
}

/// Pack the source cells of `tags`, one after another, into `out`.
pub fn pack_tags<T: Element>(
    store: &BoxStore<T>,
    tags: &[CopyTag],
    scomp: usize,
    ncomp: usize,
    out: &mut [T],
) -> Result<(), HaloError> {
    let mut pos = 0;
    for t in tags {
        let n = t.num_pts() * ncomp;
        let found = out.len();
        let dst = out.get_mut(pos..pos + n).ok_or(HaloError::LengthMismatch {
            expected: pos + n,
            found,
        })?;
        pack(store.fab(t.src_index)?, &t.src_region(), scomp, ncomp, dst)?;
        pos += n;
    }
    Ok(())
}

/// Unpack data laid out by [`pack_tags`] into the destination cells of `tags`.
pub fn unpack_tags<T: Element>(
    store: &mut BoxStore<T>,
    tags: &[CopyTag],
    dcomp: usize,
    ncomp: usize,
    src: &[T],
    op: FillOp,
) -> Result<(), HaloError> {
    let mut pos = 0;
    for t in tags {
        let n = t.num_pts() * ncomp;
        let chunk = src.get(pos..pos + n).ok_or(HaloError::LengthMismatch {
            expected: pos + n,
            found: src.len(),
        })?;
        unpack(store.fab_mut(t.dst_index)?, &t.region, dcomp, ncomp, chunk, op)?;
        pos += n;
    }
    Ok(())
}

/// Execute local tags whose source and destination live in the same store.
pub fn copy_local_within<T: Element>(
    store: &mut BoxStore<T>,
    tags: &[CopyTag],
    scomp: usize,
    dcomp: usize,
    ncomp: usize,
    op: FillOp,
) -> Result<(), HaloError> {
    let mut scratch = Vec::new();
    for t in tags {
        scratch.clear();
        scratch.resize(t.num_pts() * ncomp, T::default());
        pack(store.fab(t.src_index)?, &t.src_region(), scomp, ncomp, &mut scratch)?;
        unpack(store.fab_mut(t.dst_index)?, &t.region, dcomp, ncomp, &scratch, op)?;
    }
    Ok(())
}

/// Execute local tags from `src` into `dst`.
pub fn copy_local_between<T: Element>(
    dst: &mut BoxStore<T>,
    src: &BoxStore<T>,
    tags: &[CopyTag],
    scomp: usize,
    dcomp: usize,
    ncomp: usize,
    op: FillOp,
) -> Result<(), HaloError> {
    for t in tags {
        let s = src.fab(t.src_index)?;
        dst.fab_mut(t.dst_index)?
            .copy_region_from(s, &t.src_region(), t.shift, scomp, dcomp, ncomp, op)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::payload::BoxData;
    use crate::geometry::IntVect;
    use crate::region::{DistributionMap, RegionSet};

    fn ramp(b: IndexBox, ncomp: usize, res: Residency) -> BoxData<f64> {
        let mut d = BoxData::with_residency(b, ncomp, res);
        for c in 0..ncomp {
            d.fill_with(&b, c, |p| (100 * c as i32 + p[0] + 10 * p[1]) as f64);
        }
        d
    }

    #[test]
    fn bulk_and_sequential_paths_agree() {
        let b = IndexBox::cell(IntVect::new(-1, -1, 0), IntVect::new(4, 3, 1));
        let r = IndexBox::cell(IntVect::new(0, 1, 0), IntVect::new(2, 3, 1));
        let host = ramp(b, 3, Residency::Host);
        let dev = ramp(b, 3, Residency::Device);
        let n = r.num_pts() as usize * 2;
        let (mut a, mut d) = (vec![0.0; n], vec![0.0; n]);
        pack(&host, &r, 1, 2, &mut a).unwrap();
        pack(&dev, &r, 1, 2, &mut d).unwrap();
        assert_eq!(a, d);

        let mut h2 = BoxData::<f64>::with_residency(b, 3, Residency::Host);
        let mut d2 = BoxData::<f64>::with_residency(b, 3, Residency::Managed);
        unpack(&mut h2, &r, 0, 2, &a, FillOp::Add).unwrap();
        unpack(&mut d2, &r, 0, 2, &a, FillOp::Add).unwrap();
        assert_eq!(h2.as_slice(), d2.as_slice());
    }

    #[test]
    fn short_pack_buffer_is_rejected() {
        let region = RegionSet::new(vec![IndexBox::line(0, 3), IndexBox::line(4, 7)]).unwrap();
        let mut store = BoxStore::<f64>::new(
            region,
            DistributionMap::single_rank(2, 0),
            0,
            2,
            IntVect::zero(),
        )
        .unwrap();
        store.fab_mut(0).unwrap().fill_with(&IndexBox::line(0, 3), 1, |p| p[0] as f64);
        let tag = CopyTag {
            region: IndexBox::line(5, 6),
            src_index: 0,
            dst_index: 1,
            shift: IntVect::new(4, 0, 0),
        };
        let mut out = vec![0.0; 3];
        assert_eq!(
            pack_tags(&store, &[tag, tag], 1, 1, &mut out),
            Err(HaloError::LengthMismatch { expected: 4, found: 3 })
        );
        let mut out = vec![0.0; 4];
        pack_tags(&store, &[tag, tag], 1, 1, &mut out).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn slots_are_aligned_and_skip_empty_peers() {
        let (slots, total) = layout::<f64>([(1, 3), (2, 0), (4, 1)], 2);
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0], PeerSlot { peer: 1, offset: 0, nelems: 6, nbytes: 48 });
        assert_eq!(slots[1], PeerSlot { peer: 4, offset: 48, nelems: 2, nbytes: 16 });
        assert_eq!(total, 64);
        let (none, zero) = layout::<u8>([(0, 0)], 4);
        assert!(none.is_empty());
        assert_eq!(zero, 0);
    }
}
