//! Data module: transfer arena, per-box payloads and the per-rank store.

pub mod arena;
pub mod payload;
pub mod store;

pub use arena::{Arena, ArenaBuffer, Chunk, PoolArena, Residency, comms_arena};
pub use payload::{BoxData, Element, FillOp, Payload};
pub use store::BoxStore;
