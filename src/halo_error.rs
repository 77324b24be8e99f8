//! HaloError: Unified error type for box-halo public APIs
//!
//! Every fallible operation in the crate returns this error. Programmer misuse,
//! transport inconsistencies and arena exhaustion are all reported here rather
//! than by panicking, so callers decide whether to abort.

use crate::geometry::index_box::IndexBox;
use crate::geometry::index_type::IndexType;
use crate::geometry::int_vect::IntVect;
use thiserror::Error;

/// Unified error type for box-halo operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HaloError {
    /// Boxes handed to a region set disagree on their index type.
    #[error("Mixed index types in region set: expected {expected:?}, found {found:?}")]
    MixedIndexType { expected: IndexType, found: IndexType },
    /// Source and destination of a copy do not share an index type.
    #[error("Index type mismatch: destination {dst:?}, source {src:?}")]
    IndexTypeMismatch { dst: IndexType, src: IndexType },
    /// An operation required two region sets with the same boxes.
    #[error("Region sets differ: {0}")]
    RegionMismatch(String),
    /// A distribution map does not cover the region set it is paired with.
    #[error("Distribution map has {found} entries but the region set has {expected} boxes")]
    DistributionLength { expected: usize, found: usize },
    /// A coarsening or refinement ratio had a non-positive component.
    #[error("Invalid ratio {0:?}: every component must be >= 1")]
    InvalidRatio(IntVect),
    /// The region set cannot be coarsened by the requested ratio.
    #[error("Region set is not coarsenable by {0:?}")]
    NotCoarsenable(IntVect),
    /// A box index was outside `0..len`.
    #[error("Box index {index} out of range for region set of {len} boxes")]
    BoxOutOfRange { index: usize, len: usize },
    /// The box is not owned by this rank, so no payload exists for it.
    #[error("Box {index} is owned by rank {owner}, not by rank {rank}")]
    NotLocal { index: usize, owner: usize, rank: usize },
    /// A component window `[start, start + count)` exceeded the payload's components.
    #[error("Components [{start}, {}) out of range for {ncomp} components", start + count)]
    ComponentRange { start: usize, count: usize, ncomp: usize },
    /// A region was not contained in the payload box it was read from or written to.
    #[error("Region {region:?} is not inside payload box {fab_box:?}")]
    RegionOutsidePayload { region: IndexBox, fab_box: IndexBox },
    /// A slice passed to a pack/unpack helper had the wrong length.
    #[error("Expected {expected} elements, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    /// `start_*` was called on a store that already has an exchange in flight.
    #[error("An exchange session is already in progress on store {store}")]
    SessionInProgress { store: u64 },
    /// `finish` was called with a store other than the one the session started on.
    #[error("Session started on store {expected} but finished on store {found}")]
    StoreMismatch { expected: u64, found: u64 },
    /// The ghost width requested exceeds what the store allocated.
    #[error("Requested ghost width {requested:?} exceeds store ghost width {available:?}")]
    GhostWidth { requested: IntVect, available: IntVect },
    /// A received message does not have the size both ends agreed on.
    #[error("Message from rank {peer} has {got} bytes, expected {expected}")]
    MessageSizeMismatch { peer: usize, expected: usize, got: usize },
    /// A posted receive completed without delivering data.
    #[error("Receive from rank {peer} completed without data")]
    MissingMessage { peer: usize },
    /// A byte buffer could not be reinterpreted as the payload element type.
    #[error("Wire error: {0}")]
    Wire(String),
    /// The transfer-buffer arena cannot satisfy an allocation.
    #[error("Arena exhausted: requested {requested} bytes with {in_use} in use (limit {limit})")]
    ArenaExhausted {
        requested: usize,
        in_use: usize,
        limit: usize,
    },
    /// A data structure failed its invariant checks.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}
