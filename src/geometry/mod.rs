//! Index-space geometry: integer vectors, centring, boxes and periodicity.
//!
//! These are the value types every other module is built on. None of them
//! allocate except [`IndexBox::diff`] and [`Periodicity::shift_vectors`].

pub mod index_box;
pub mod index_type;
pub mod int_vect;
pub mod periodicity;

pub use index_box::IndexBox;
pub use index_type::IndexType;
pub use int_vect::{IntVect, SPACEDIM};
pub use periodicity::Periodicity;
