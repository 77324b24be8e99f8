//! Byte-level helpers for halo messages.
//!
//! Halo messages carry raw element data with no header: one tag after
//! another, each `cells × ncomp` elements with components outermost and
//! cells in destination-region order. Both ends compute every size and
//! offset from the same communication pattern, so nothing is self-describing.
//! The format is only valid between processes of one co-running job.

use crate::halo_error::HaloError;
use bytemuck::Pod;
use std::mem::{align_of, size_of};

/// Transport unit: message lengths and span offsets are multiples of this.
pub const COMM_UNIT: usize = 16;

/// Round `n` up to a multiple of `align` (a power of two).
#[inline]
pub const fn aligned_size(align: usize, n: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Alignment of a peer's slot in a transfer span holding `T` elements.
#[inline]
pub const fn slot_align<T>() -> usize {
    if align_of::<T>() > COMM_UNIT {
        align_of::<T>()
    } else {
        COMM_UNIT
    }
}

/// Bytes on the wire for `nelems` elements of `T`, padded to the transport unit.
#[inline]
pub const fn message_len<T>(nelems: usize) -> usize {
    aligned_size(COMM_UNIT, nelems * size_of::<T>())
}

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// View bytes as elements; fails on misalignment or a ragged length.
pub fn try_cast_from<T: Pod>(v: &[u8]) -> Result<&[T], HaloError> {
    bytemuck::try_cast_slice(v).map_err(|e| HaloError::Wire(format!("{e:?}")))
}

pub fn try_cast_from_mut<T: Pod>(v: &mut [u8]) -> Result<&mut [T], HaloError> {
    bytemuck::try_cast_slice_mut(v).map_err(|e| HaloError::Wire(format!("{e:?}")))
}

pub fn expect_exact_len(peer: usize, actual: usize, expected: usize) -> Result<(), HaloError> {
    if actual == expected {
        Ok(())
    } else {
        Err(HaloError::MessageSizeMismatch {
            peer,
            expected,
            got: actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_rounds_up() {
        assert_eq!(aligned_size(16, 0), 0);
        assert_eq!(aligned_size(16, 1), 16);
        assert_eq!(aligned_size(16, 32), 32);
        assert_eq!(message_len::<f64>(3), 32);
        assert_eq!(slot_align::<u8>(), COMM_UNIT);
    }

    #[test]
    fn casting_checks_length() {
        let v = [1.0f64, 2.0];
        let bytes = cast_slice(&v);
        assert_eq!(try_cast_from::<f64>(bytes).unwrap(), &v);
        assert!(matches!(
            try_cast_from::<f64>(&bytes[..12]),
            Err(HaloError::Wire(_))
        ));
        assert!(expect_exact_len(3, 8, 8).is_ok());
        assert_eq!(
            expect_exact_len(3, 4, 8),
            Err(HaloError::MessageSizeMismatch { peer: 3, expected: 8, got: 4 })
        );
    }
}
