//! Copy tags and the per-rank communication metadata built from them.

use crate::debug_invariants::DebugInvariants;
use crate::geometry::{IndexBox, IntVect};
use crate::halo_error::HaloError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One rectangular copy: destination cells `region` of box `dst_index` come
/// from cells `region - shift` of box `src_index`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CopyTag {
    pub region: IndexBox,
    pub src_index: usize,
    pub dst_index: usize,
    pub shift: IntVect,
}

impl CopyTag {
    /// Source cells, in source index space.
    #[inline]
    pub fn src_region(&self) -> IndexBox {
        self.region.shift(-self.shift)
    }

    #[inline]
    pub fn num_pts(&self) -> usize {
        self.region.num_pts() as usize
    }
}

/// Everything one rank does in one exchange.
///
/// `sends[p]` and rank `p`'s `recvs[self]` list the same tags in the same
/// order; message layouts are derived from that order on both ends.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommMetaData {
    pub local: Vec<CopyTag>,
    pub sends: BTreeMap<usize, Vec<CopyTag>>,
    pub recvs: BTreeMap<usize, Vec<CopyTag>>,
}

impl CommMetaData {
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.sends.is_empty() && self.recvs.is_empty()
    }

    /// True if nothing crosses a rank boundary.
    pub fn is_local_only(&self) -> bool {
        self.sends.is_empty() && self.recvs.is_empty()
    }

    /// Cells sent to each peer, in peer order.
    pub fn send_cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.sends
            .iter()
            .map(|(&p, tags)| (p, tags.iter().map(CopyTag::num_pts).sum()))
    }

    /// Cells received from each peer, in peer order.
    pub fn recv_cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.recvs
            .iter()
            .map(|(&p, tags)| (p, tags.iter().map(CopyTag::num_pts).sum()))
    }

    pub fn num_tags(&self) -> usize {
        self.local.len()
            + self.sends.values().map(Vec::len).sum::<usize>()
            + self.recvs.values().map(Vec::len).sum::<usize>()
    }
}

impl DebugInvariants for CommMetaData {
    fn validate_invariants(&self) -> Result<(), HaloError> {
        let lists = std::iter::once(&self.local)
            .chain(self.sends.values())
            .chain(self.recvs.values());
        for tags in lists {
            if let Some(t) = tags.iter().find(|t| t.region.is_empty()) {
                return Err(HaloError::InvariantViolation(format!(
                    "empty copy tag {t:?}"
                )));
            }
        }
        if let Some((p, _)) = self
            .sends
            .iter()
            .chain(self.recvs.iter())
            .find(|(_, v)| v.is_empty())
        {
            return Err(HaloError::InvariantViolation(format!(
                "peer {p} listed with no tags"
            )));
        }
        Ok(())
    }
}

/// Check tag symmetry across the metadata of every rank (`all[r]` is rank `r`'s).
pub fn check_symmetry(all: &[CommMetaData]) -> Result<(), HaloError> {
    for (s, md) in all.iter().enumerate() {
        for (&r, sent) in &md.sends {
            let got = all
                .get(r)
                .and_then(|m| m.recvs.get(&s))
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            if got != sent.as_slice() {
                return Err(HaloError::InvariantViolation(format!(
                    "rank {s} sends {} tags to rank {r}, which expects {}",
                    sent.len(),
                    got.len()
                )));
            }
        }
        for &p in md.recvs.keys() {
            let posted = all.get(p).is_some_and(|m| m.sends.contains_key(&s));
            if !posted {
                return Err(HaloError::InvariantViolation(format!(
                    "rank {s} expects data from rank {p}, which sends none"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(lo: i32, hi: i32, src: usize, dst: usize) -> CopyTag {
        CopyTag {
            region: IndexBox::line(lo, hi),
            src_index: src,
            dst_index: dst,
            shift: IntVect::zero(),
        }
    }

    #[test]
    fn source_region_undoes_shift() {
        let t = CopyTag {
            region: IndexBox::line(-2, -1),
            src_index: 2,
            dst_index: 0,
            shift: IntVect::new(-12, 0, 0),
        };
        assert_eq!(t.src_region(), IndexBox::line(10, 11));
        assert_eq!(t.num_pts(), 2);
    }

    #[test]
    fn symmetry_checker_spots_mismatch() {
        let mut a = CommMetaData::default();
        let mut b = CommMetaData::default();
        a.sends.insert(1, vec![tag(4, 5, 0, 1)]);
        b.recvs.insert(0, vec![tag(4, 5, 0, 1)]);
        assert!(check_symmetry(&[a.clone(), b.clone()]).is_ok());
        assert_eq!(a.send_cells().collect::<Vec<_>>(), vec![(1, 2)]);

        b.recvs.insert(0, vec![tag(4, 4, 0, 1)]);
        assert!(check_symmetry(&[a.clone(), b.clone()]).is_err());
        b.recvs.clear();
        assert!(check_symmetry(&[a, b]).is_err());
    }
}
