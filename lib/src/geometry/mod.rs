//! Axis-indexed geometry primitives.
//!
//! All machine geometry is carried as fixed-length per-axis vectors in
//! machine millimeters. Planes select the two circular axes and the linear
//! (helical) axis for arc and canned-cycle motion, and [`AxisMask`] is the
//! compact per-axis bit set used for homing groups, limit states and
//! backlash direction memory.

use serde::{Deserialize, Serialize};
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

use crate::{N_AXIS, X_AXIS, Y_AXIS, Z_AXIS};

/// A machine position, one `f32` per axis, in millimeters.
pub type Position = [f32; N_AXIS];

/// Selects the working plane for circular motion.
///
/// `axis_0` and `axis_1` span the circle; `axis_linear` is the direction of
/// helical travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plane {
    pub axis_0: usize,
    pub axis_1: usize,
    pub axis_linear: usize,
}

impl Plane {
    /// G17: circle in XY, helix along Z.
    pub const XY: Plane = Plane {
        axis_0: X_AXIS,
        axis_1: Y_AXIS,
        axis_linear: Z_AXIS,
    };

    /// G18: circle in XZ, helix along Y.
    pub const XZ: Plane = Plane {
        axis_0: X_AXIS,
        axis_1: Z_AXIS,
        axis_linear: Y_AXIS,
    };

    /// G19: circle in YZ, helix along X.
    pub const YZ: Plane = Plane {
        axis_0: Y_AXIS,
        axis_1: Z_AXIS,
        axis_linear: X_AXIS,
    };
}

/// A per-axis bit set.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AxisMask(pub u8);

impl AxisMask {
    /// The empty mask.
    pub const NONE: AxisMask = AxisMask(0);

    /// All configured axes.
    pub const ALL: AxisMask = AxisMask((1 << N_AXIS) - 1);

    /// Mask with a single axis bit set.
    #[inline]
    pub const fn bit(axis: usize) -> Self {
        AxisMask(1 << axis)
    }

    #[inline]
    pub const fn has(self, axis: usize) -> bool {
        self.0 & (1 << axis) != 0
    }

    #[inline]
    pub fn set(&mut self, axis: usize) {
        self.0 |= 1 << axis;
    }

    #[inline]
    pub fn clear(&mut self, axis: usize) {
        self.0 &= !(1 << axis);
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate the set axis indices.
    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..N_AXIS).filter(move |axis| self.has(*axis))
    }
}

impl BitOr for AxisMask {
    type Output = AxisMask;

    fn bitor(self, rhs: AxisMask) -> AxisMask {
        AxisMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for AxisMask {
    fn bitor_assign(&mut self, rhs: AxisMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for AxisMask {
    type Output = AxisMask;

    fn bitand(self, rhs: AxisMask) -> AxisMask {
        AxisMask(self.0 & rhs.0)
    }
}

impl BitAndAssign for AxisMask {
    fn bitand_assign(&mut self, rhs: AxisMask) {
        self.0 &= rhs.0;
    }
}

impl Not for AxisMask {
    type Output = AxisMask;

    fn not(self) -> AxisMask {
        AxisMask(!self.0 & Self::ALL.0)
    }
}

/// Convert a machine step vector to millimeter coordinates.
#[inline]
pub fn steps_to_mpos(steps: &[i32; N_AXIS], steps_per_mm: &[f32; N_AXIS]) -> Position {
    let mut mpos = [0.0; N_AXIS];
    for idx in 0..N_AXIS {
        mpos[idx] = steps[idx] as f32 / steps_per_mm[idx];
    }
    mpos
}

/// Convert a millimeter position to the nearest machine step vector.
#[inline]
pub fn mpos_to_steps(mpos: &Position, steps_per_mm: &[f32; N_AXIS]) -> [i32; N_AXIS] {
    let mut steps = [0; N_AXIS];
    for idx in 0..N_AXIS {
        steps[idx] = (mpos[idx] * steps_per_mm[idx]).round() as i32;
    }
    steps
}
