//! Per-axis periodic wraparound of the index domain.
//!
//! A period of zero means the axis is not periodic. Periodic domains are
//! assumed to start at index 0, so axis `d` wraps over `[0, period[d] - 1]`.

use super::int_vect::{IntVect, SPACEDIM};
use itertools::iproduct;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Periodicity {
    period: IntVect,
}

impl Periodicity {
    pub fn new(period: IntVect) -> Self {
        Self {
            period: period.max(IntVect::zero()),
        }
    }

    /// No wraparound on any axis.
    pub const fn non_periodic() -> Self {
        Self {
            period: IntVect::zero(),
        }
    }

    #[inline]
    pub fn period(&self) -> IntVect {
        self.period
    }

    #[inline]
    pub fn is_periodic(&self, dir: usize) -> bool {
        self.period[dir] > 0
    }

    #[inline]
    pub fn is_any_periodic(&self) -> bool {
        (0..SPACEDIM).any(|d| self.is_periodic(d))
    }

    #[inline]
    pub fn is_all_periodic(&self) -> bool {
        (0..SPACEDIM).all(|d| self.is_periodic(d))
    }

    /// Every lattice shift that can bring a cell within `nghost` of the domain
    /// back onto it. The zero shift comes first; the rest follow in
    /// lexicographic order. Non-periodic domains yield only the zero shift.
    pub fn shift_vectors(&self, nghost: IntVect) -> Vec<IntVect> {
        let reach = |d: usize| -> i32 {
            if self.is_periodic(d) {
                let p = self.period[d];
                ((nghost[d].max(0) + p - 1) / p).max(1)
            } else {
                0
            }
        };
        let (rx, ry, rz) = (reach(0), reach(1), reach(2));
        let mut out = vec![IntVect::zero()];
        out.extend(
            iproduct!(-rx..=rx, -ry..=ry, -rz..=rz)
                .map(|(i, j, k)| {
                    IntVect::new(i * self.period[0], j * self.period[1], k * self.period[2])
                })
                .filter(|v| !v.is_zero()),
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_periodic_has_single_shift() {
        let p = Periodicity::non_periodic();
        assert!(!p.is_any_periodic());
        assert_eq!(p.shift_vectors(IntVect::splat(3)), vec![IntVect::zero()]);
    }

    #[test]
    fn one_axis_periodic_shifts() {
        let p = Periodicity::new(IntVect::new(12, 0, 0));
        let s = p.shift_vectors(IntVect::new(2, 0, 0));
        assert_eq!(
            s,
            vec![IntVect::zero(), IntVect::new(-12, 0, 0), IntVect::new(12, 0, 0)]
        );
        // ghost wider than the period needs two images on each side
        assert_eq!(p.shift_vectors(IntVect::new(13, 0, 0)).len(), 5);
    }

    #[test]
    fn fully_periodic_3d_has_27_shifts() {
        let p = Periodicity::new(IntVect::splat(8));
        let s = p.shift_vectors(IntVect::unit());
        assert_eq!(s.len(), 27);
        assert_eq!(s[0], IntVect::zero());
        assert!(p.is_all_periodic());
    }
}
