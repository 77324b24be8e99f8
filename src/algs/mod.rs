//! Message passing and wire helpers.

pub mod communicator;
pub mod wire;

pub use communicator::{CommTag, Communicator, NoComm, RayonComm, Wait};
