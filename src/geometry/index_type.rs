//! Cell/node centring of a box, one flag per axis.

use super::int_vect::{IntVect, SPACEDIM};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-axis centring. Bit `d` set means the box is nodal along axis `d`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct IndexType(u8);

impl IndexType {
    /// Cell-centred on every axis.
    #[inline]
    pub const fn cell() -> Self {
        IndexType(0)
    }

    /// Nodal on every axis.
    #[inline]
    pub const fn node() -> Self {
        IndexType((1 << SPACEDIM) - 1)
    }

    /// Build from a 0/1 vector (non-zero means nodal).
    pub fn from_int_vect(iv: IntVect) -> Self {
        let mut bits = 0u8;
        for d in 0..SPACEDIM {
            if iv[d] != 0 {
                bits |= 1 << d;
            }
        }
        IndexType(bits)
    }

    /// Nodal along the listed axes only.
    pub fn nodal_in(dirs: &[usize]) -> Self {
        let mut bits = 0u8;
        for &d in dirs {
            bits |= 1 << d;
        }
        IndexType(bits)
    }

    #[inline]
    pub fn is_nodal(self, dir: usize) -> bool {
        self.0 & (1 << dir) != 0
    }

    #[inline]
    pub fn is_cell_centered(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_all_nodal(self) -> bool {
        self == Self::node()
    }

    /// 0/1 vector form, 1 on nodal axes.
    pub fn as_int_vect(self) -> IntVect {
        IntVect::from_fn(|d| self.is_nodal(d) as i32)
    }
}

impl fmt::Debug for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s: String = (0..SPACEDIM)
            .map(|d| if self.is_nodal(d) { 'N' } else { 'C' })
            .collect();
        write!(f, "IndexType({s})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodal_flags() {
        let t = IndexType::nodal_in(&[0, 2]);
        assert!(t.is_nodal(0) && !t.is_nodal(1) && t.is_nodal(2));
        assert_eq!(t.as_int_vect(), IntVect::new(1, 0, 1));
        assert_eq!(IndexType::from_int_vect(t.as_int_vect()), t);
        assert!(IndexType::cell().is_cell_centered());
        assert!(IndexType::node().is_all_nodal());
    }
}
