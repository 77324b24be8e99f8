//! Halo exchange: copy tags, cached communication patterns, buffer packing
//! and the two-phase exchange engine.

pub mod cache;
pub mod engine;
pub mod pack;
pub mod pattern;
pub mod tags;

pub use cache::{CacheStats, PatternCache, PatternKey};
pub use engine::{ExchangeConfig, ExchangeEngine, ExchangeSession};
pub use pattern::{CopyKey, FillKey, FillPolicy, Stencil};
pub use tags::{CommMetaData, CopyTag};
