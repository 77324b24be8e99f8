//! `IntVect`: an integer point (or per-axis quantity) in index space.
//!
//! Index space is fixed at [`SPACEDIM`] axes. One- and two-dimensional
//! problems leave the unused axes at zero extent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Index, IndexMut, Mul, Neg, Sub, SubAssign};

/// Number of index-space axes.
pub const SPACEDIM: usize = 3;

/// An integer vector in index space.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct IntVect(pub [i32; SPACEDIM]);

impl IntVect {
    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        IntVect([x, y, z])
    }

    /// Same value on every axis.
    #[inline]
    pub const fn splat(v: i32) -> Self {
        IntVect([v; SPACEDIM])
    }

    #[inline]
    pub const fn zero() -> Self {
        Self::splat(0)
    }

    #[inline]
    pub const fn unit() -> Self {
        Self::splat(1)
    }

    /// Unit vector along axis `dir`.
    #[inline]
    pub fn basis(dir: usize) -> Self {
        let mut v = Self::zero();
        v.0[dir] = 1;
        v
    }

    /// Copy of `self` with axis `dir` replaced by `value`.
    #[inline]
    pub fn with(mut self, dir: usize, value: i32) -> Self {
        self.0[dir] = value;
        self
    }

    #[inline]
    pub fn min(self, other: Self) -> Self {
        Self::from_fn(|d| self.0[d].min(other.0[d]))
    }

    #[inline]
    pub fn max(self, other: Self) -> Self {
        Self::from_fn(|d| self.0[d].max(other.0[d]))
    }

    #[inline]
    pub fn max_component(self) -> i32 {
        self.0.iter().copied().max().unwrap_or(0)
    }

    #[inline]
    pub fn min_component(self) -> i32 {
        self.0.iter().copied().min().unwrap_or(0)
    }

    #[inline]
    pub fn all_ge(self, other: Self) -> bool {
        (0..SPACEDIM).all(|d| self.0[d] >= other.0[d])
    }

    #[inline]
    pub fn all_le(self, other: Self) -> bool {
        (0..SPACEDIM).all(|d| self.0[d] <= other.0[d])
    }

    #[inline]
    pub fn all_gt(self, other: Self) -> bool {
        (0..SPACEDIM).all(|d| self.0[d] > other.0[d])
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == [0; SPACEDIM]
    }

    /// Componentwise product.
    #[inline]
    pub fn scale(self, ratio: Self) -> Self {
        Self::from_fn(|d| self.0[d] * ratio.0[d])
    }

    /// Componentwise floor division; `ratio` must be positive.
    #[inline]
    pub fn coarsen(self, ratio: Self) -> Self {
        Self::from_fn(|d| self.0[d].div_euclid(ratio.0[d]))
    }

    /// Componentwise remainder of floor division.
    #[inline]
    pub fn rem_euclid(self, ratio: Self) -> Self {
        Self::from_fn(|d| self.0[d].rem_euclid(ratio.0[d]))
    }

    #[inline]
    pub fn from_fn(f: impl FnMut(usize) -> i32) -> Self {
        IntVect(std::array::from_fn(f))
    }

    /// Product of all components as `u64`; zero if any component is non-positive.
    #[inline]
    pub fn volume(self) -> u64 {
        self.0
            .iter()
            .map(|&c| if c > 0 { c as u64 } else { 0 })
            .product()
    }
}

impl fmt::Debug for IntVect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.0[0], self.0[1], self.0[2])
    }
}

impl fmt::Display for IntVect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Index<usize> for IntVect {
    type Output = i32;
    #[inline]
    fn index(&self, dir: usize) -> &i32 {
        &self.0[dir]
    }
}

impl IndexMut<usize> for IntVect {
    #[inline]
    fn index_mut(&mut self, dir: usize) -> &mut i32 {
        &mut self.0[dir]
    }
}

impl Add for IntVect {
    type Output = IntVect;
    #[inline]
    fn add(self, rhs: IntVect) -> IntVect {
        Self::from_fn(|d| self.0[d] + rhs.0[d])
    }
}

impl AddAssign for IntVect {
    #[inline]
    fn add_assign(&mut self, rhs: IntVect) {
        *self = *self + rhs;
    }
}

impl Sub for IntVect {
    type Output = IntVect;
    #[inline]
    fn sub(self, rhs: IntVect) -> IntVect {
        Self::from_fn(|d| self.0[d] - rhs.0[d])
    }
}

impl SubAssign for IntVect {
    #[inline]
    fn sub_assign(&mut self, rhs: IntVect) {
        *self = *self - rhs;
    }
}

impl Neg for IntVect {
    type Output = IntVect;
    #[inline]
    fn neg(self) -> IntVect {
        Self::from_fn(|d| -self.0[d])
    }
}

impl Mul<i32> for IntVect {
    type Output = IntVect;
    #[inline]
    fn mul(self, rhs: i32) -> IntVect {
        Self::from_fn(|d| self.0[d] * rhs)
    }
}

impl From<[i32; SPACEDIM]> for IntVect {
    fn from(v: [i32; SPACEDIM]) -> Self {
        IntVect(v)
    }
}
