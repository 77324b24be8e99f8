#![cfg_attr(docsrs, feature(doc_cfg))]
//! # box-halo
//!
//! box-halo is the distributed-data core of a block-structured PDE code. It
//! describes a domain as a list of rectangular index-space boxes, assigns
//! each box to a rank and keeps the ghost cells around every box consistent
//! with their neighbours through cached, asynchronous halo exchanges.
//!
//! ## Layers
//! - [`geometry`]: `IntVect`, `IndexType`, `IndexBox` and `Periodicity`.
//! - [`region`]: `RegionSet`, an immutable shared box list with a lazily
//!   built spatial hash, and `DistributionMap`, its box-to-rank assignment.
//! - [`data`]: per-box payloads, the per-rank `BoxStore` and the pooled
//!   arena that backs message buffers.
//! - [`algs`]: the `Communicator` abstraction (serial, threads, MPI) and
//!   wire helpers.
//! - [`exchange`]: copy tags, the process-wide pattern cache, buffer
//!   packing and the two-phase `ExchangeEngine`.
//!
//! ## Determinism
//!
//! Communication patterns are pure functions of the region set, the
//! distribution map, the pattern key and the rank, so every rank derives
//! matching send and receive lists without negotiating. Exchange tags come
//! from each communicator's own sequence, so exchanges issued in the same
//! order on every rank pair up.
//!
//! ## Features
//! - `rayon`: parallel bulk pack and unpack for device-resident payloads.
//! - `mpi-support`: an MPI-backed communicator.
//! - `check-invariants`: run invariant checks in release builds too.

pub mod algs;
pub mod data;
pub mod debug_invariants;
pub mod exchange;
pub mod geometry;
pub mod halo_error;
pub mod region;

pub use debug_invariants::DebugInvariants;
pub use halo_error::HaloError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, NoComm, RayonComm, Wait};
    pub use crate::data::{BoxData, BoxStore, Element, FillOp, Payload, Residency};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::exchange::{
        CopyKey, ExchangeConfig, ExchangeEngine, ExchangeSession, FillKey, PatternCache,
    };
    pub use crate::geometry::{IndexBox, IndexType, IntVect, Periodicity};
    pub use crate::halo_error::HaloError;
    pub use crate::region::{DistributionMap, RegionSet};
}
