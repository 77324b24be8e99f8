//! Box collections and their ownership.
//!
//! [`RegionSet`] is the shared box list with its spatial index,
//! [`DistributionMap`] assigns each box to a rank.

pub mod distribution;
pub(crate) mod hash;
pub mod region_set;
pub mod transform;

pub use distribution::DistributionMap;
pub use region_set::{RegionKey, RegionSet};
pub use transform::{BoundaryRegister, BoxTransform, Face};
