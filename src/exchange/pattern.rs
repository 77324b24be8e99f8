//! Construction of communication patterns.
//!
//! Two families share one assembly routine:
//! * self-fill ([`FillKey`]): a region set fills the ghost cells of its own
//!   boxes from their neighbours and periodic images;
//! * cross-copy ([`CopyKey`]): one distributed region set is filled from
//!   another, optionally only into ghost cells.
//!
//! For a destination box the tag list is a pure function of the global
//! region sets: periodic shifts are visited zero shift first, source hits in
//! index order, and each candidate only claims cells no earlier candidate
//! claimed. Both the receiving rank (which owns the destination) and every
//! sending rank (which owns a source) rebuild the same list, so the two ends
//! agree tag for tag without exchanging metadata.

use super::tags::{CommMetaData, CopyTag};
use crate::debug_invariants::DebugInvariants;
use crate::geometry::{IndexBox, IntVect, Periodicity, SPACEDIM};
use crate::region::{DistributionMap, RegionSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which ghost cells a self-fill covers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Stencil {
    /// Every ghost cell, corners included.
    #[default]
    Full,
    /// Face-adjacent slabs only.
    Cross,
}

/// Which sources a self-fill accepts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FillPolicy {
    /// Ghost cells from neighbours and periodic images.
    #[default]
    GhostCells,
    /// Only periodic images, valid cells included. Used to make data on
    /// periodic boundaries agree.
    PeriodicImagesOnly,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FillKey {
    pub ghost: IntVect,
    pub period: Periodicity,
    pub stencil: Stencil,
    pub policy: FillPolicy,
}

impl FillKey {
    pub fn new(ghost: IntVect) -> Self {
        Self {
            ghost,
            ..Self::default()
        }
    }

    pub fn periodic(mut self, period: Periodicity) -> Self {
        self.period = period;
        self
    }

    pub fn cross(mut self) -> Self {
        self.stencil = Stencil::Cross;
        self
    }

    pub fn periodic_images_only(mut self) -> Self {
        self.policy = FillPolicy::PeriodicImagesOnly;
        self
    }

    /// True if the fill moves no data whatever the region set.
    pub fn is_noop(&self) -> bool {
        match self.policy {
            FillPolicy::GhostCells => self.ghost.is_zero(),
            FillPolicy::PeriodicImagesOnly => !self.period.is_any_periodic(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CopyKey {
    pub dst_ghost: IntVect,
    pub src_ghost: IntVect,
    pub period: Periodicity,
    pub ghost_only: bool,
}

impl CopyKey {
    /// Valid cells to valid cells, no periodicity.
    pub fn valid() -> Self {
        Self::default()
    }

    pub fn with_ghosts(dst_ghost: IntVect, src_ghost: IntVect) -> Self {
        Self {
            dst_ghost,
            src_ghost,
            ..Self::default()
        }
    }

    /// Only destination ghost cells `dst_ghost` wide.
    pub fn to_ghost(dst_ghost: IntVect, src_ghost: IntVect) -> Self {
        Self {
            dst_ghost,
            src_ghost,
            ghost_only: true,
            ..Self::default()
        }
    }

    pub fn periodic(mut self, period: Periodicity) -> Self {
        self.period = period;
        self
    }
}

/// Pieces of `cand` not already in `claimed`; the pieces are then claimed.
fn claim(claimed: &mut Vec<IndexBox>, cand: IndexBox) -> Vec<IndexBox> {
    let mut pieces = vec![cand];
    for c in claimed.iter() {
        pieces = pieces.iter().flat_map(|p| p.diff(c)).collect();
        if pieces.is_empty() {
            return pieces;
        }
    }
    claimed.extend_from_slice(&pieces);
    pieces
}

/// Ghost regions of `valid` for a self-fill.
fn fill_regions(valid: &IndexBox, key: &FillKey) -> Vec<IndexBox> {
    match (key.policy, key.stencil) {
        (FillPolicy::PeriodicImagesOnly, _) => vec![valid.grow(key.ghost)],
        (FillPolicy::GhostCells, Stencil::Full) => valid.grow(key.ghost).diff(valid),
        (FillPolicy::GhostCells, Stencil::Cross) => {
            let mut out = Vec::with_capacity(2 * SPACEDIM);
            for d in 0..SPACEDIM {
                let g = key.ghost[d];
                if g <= 0 {
                    continue;
                }
                let (lo, hi) = (valid.lo()[d], valid.hi()[d]);
                let grown = valid.grow_dir(d, g);
                let (below, _) = grown.chop(d, lo);
                let (_, above) = grown.chop(d, hi + 1);
                out.push(below);
                out.push(above);
            }
            out
        }
    }
}

/// Tags filling box `j` of `region` from the region itself.
pub fn fill_tags_for(region: &RegionSet, j: usize, key: &FillKey) -> Vec<CopyTag> {
    let Some(valid) = region.get(j) else {
        return Vec::new();
    };
    let targets = fill_regions(&valid, key);
    let skip_zero = key.policy == FillPolicy::PeriodicImagesOnly;
    let mut claimed = Vec::new();
    let mut tags = Vec::new();
    let mut hits = Vec::new();
    for s in key.period.shift_vectors(key.ghost) {
        if skip_zero && s.is_zero() {
            continue;
        }
        for f in &targets {
            region.intersections_into(&f.shift(-s), false, IntVect::zero(), &mut hits);
            for &(i, isect) in &hits {
                if i == j && s.is_zero() {
                    continue;
                }
                for piece in claim(&mut claimed, isect.shift(s)) {
                    tags.push(CopyTag {
                        region: piece,
                        src_index: i,
                        dst_index: j,
                        shift: s,
                    });
                }
            }
        }
    }
    tags
}

fn copy_shift_reach(key: &CopyKey) -> IntVect {
    key.dst_ghost + key.src_ghost
}

/// Tags filling box `j` of `dst` from the boxes of `src`.
pub fn copy_tags_for(dst: &RegionSet, src: &RegionSet, j: usize, key: &CopyKey) -> Vec<CopyTag> {
    let Some(valid) = dst.get(j) else {
        return Vec::new();
    };
    let grown = valid.grow(key.dst_ghost);
    let targets = if key.ghost_only {
        grown.diff(&valid)
    } else {
        vec![grown]
    };
    let mut claimed = Vec::new();
    let mut tags = Vec::new();
    let mut hits = Vec::new();
    for s in key.period.shift_vectors(copy_shift_reach(key)) {
        for f in &targets {
            src.intersections_into(&f.shift(-s), false, key.src_ghost, &mut hits);
            for &(i, isect) in &hits {
                for piece in claim(&mut claimed, isect.shift(s)) {
                    tags.push(CopyTag {
                        region: piece,
                        src_index: i,
                        dst_index: j,
                        shift: s,
                    });
                }
            }
        }
    }
    tags
}

/// Split per-destination tag lists into this rank's local, send and receive work.
fn assemble(
    rank: usize,
    dst_dist: &DistributionMap,
    src_dist: &DistributionMap,
    mut targets_of: impl FnMut(usize, &mut BTreeSet<usize>),
    tags_for: impl Fn(usize) -> Vec<CopyTag>,
) -> CommMetaData {
    let mut md = CommMetaData::default();

    // 1) destinations owned here: local copies and receives
    for j in dst_dist.local_indices(rank) {
        for t in tags_for(j) {
            match src_dist.owner(t.src_index) {
                Some(o) if o == rank => md.local.push(t),
                Some(o) => md.recvs.entry(o).or_default().push(t),
                None => {}
            }
        }
    }

    // 2) remote destinations our sources may touch, in index order
    let mut targets = BTreeSet::new();
    for i in src_dist.local_indices(rank) {
        targets_of(i, &mut targets);
    }
    for j in targets {
        let Some(owner) = dst_dist.owner(j) else {
            continue;
        };
        if owner == rank {
            continue;
        }
        for t in tags_for(j) {
            if src_dist.owner(t.src_index) == Some(rank) {
                md.sends.entry(owner).or_default().push(t);
            }
        }
    }
    md
}

/// Self-fill metadata for `rank`.
pub fn build_fill(
    region: &RegionSet,
    dist: &DistributionMap,
    key: &FillKey,
    rank: usize,
) -> CommMetaData {
    let shifts = key.period.shift_vectors(key.ghost);
    let mut hits = Vec::new();
    let md = assemble(
        rank,
        dist,
        dist,
        |i, out| {
            let Some(b) = region.get(i) else { return };
            for s in &shifts {
                region.intersections_into(&b.shift(*s), false, key.ghost, &mut hits);
                out.extend(hits.iter().map(|&(j, _)| j));
            }
        },
        |j| fill_tags_for(region, j, key),
    );
    log::debug!(
        "fill pattern rank {rank} key {key:?}: {} local, {} send peers, {} recv peers",
        md.local.len(),
        md.sends.len(),
        md.recvs.len()
    );
    md.debug_assert_invariants();
    md
}

/// Cross-copy metadata for `rank`.
pub fn build_copy(
    dst: &RegionSet,
    dst_dist: &DistributionMap,
    src: &RegionSet,
    src_dist: &DistributionMap,
    key: &CopyKey,
    rank: usize,
) -> CommMetaData {
    let shifts = key.period.shift_vectors(copy_shift_reach(key));
    let mut hits = Vec::new();
    let md = assemble(
        rank,
        dst_dist,
        src_dist,
        |i, out| {
            let Some(b) = src.get(i) else { return };
            let reach = b.grow(key.src_ghost);
            for s in &shifts {
                dst.intersections_into(&reach.shift(*s), false, key.dst_ghost, &mut hits);
                out.extend(hits.iter().map(|&(j, _)| j));
            }
        },
        |j| copy_tags_for(dst, src, j, key),
    );
    log::debug!(
        "copy pattern rank {rank} key {key:?}: {} local, {} send peers, {} recv peers",
        md.local.len(),
        md.sends.len(),
        md.recvs.len()
    );
    md.debug_assert_invariants();
    md
}
