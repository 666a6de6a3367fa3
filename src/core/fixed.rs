//! Q16.16 Fixed-Point Arithmetic
//!
//! Integer-only math for rule-sets that need bit-identical results on the
//! server and on every predicting client. Floats may enter at the input
//! boundary (joystick axes) but are converted once, here, and never again.
//!
//! ```text
//! [S][IIIIIIIIIIIIIII][FFFFFFFFFFFFFFFF]
//!     15 int bits      16 fraction bits
//! range ±32768, precision 1/65536
//! ```

use std::fmt;
use std::ops::{Add, Neg, Sub};

/// Q16.16 fixed-point number stored as i32.
pub type Fixed = i32;

/// Number of fractional bits.
pub const FIXED_SCALE: i32 = 16;

/// 1.0 in fixed-point.
pub const FIXED_ONE: Fixed = 1 << FIXED_SCALE;

/// 0.5 in fixed-point.
pub const FIXED_HALF: Fixed = FIXED_ONE >> 1;

/// Convert a compile-time constant to fixed-point.
///
/// ```
/// use floe_sync::core::fixed::{to_fixed, FIXED_ONE};
/// const HALF: i32 = to_fixed(0.5);
/// assert_eq!(HALF, FIXED_ONE / 2);
/// ```
#[inline]
pub const fn to_fixed(f: f64) -> Fixed {
    (f * (FIXED_ONE as f64)) as Fixed
}

/// Convert a runtime `f32` (e.g. a joystick axis) to fixed-point.
///
/// Non-finite values map to zero; out-of-range values saturate to
/// `±i32::MAX`, so negating the result can never overflow.
#[inline]
pub fn from_f32(f: f32) -> Fixed {
    if !f.is_finite() {
        return 0;
    }
    let wide = (f as f64) * (FIXED_ONE as f64);
    wide.clamp(-(i32::MAX as f64), i32::MAX as f64) as Fixed
}

/// Convert fixed-point to float for display only.
#[inline]
pub fn to_float(f: Fixed) -> f32 {
    f as f32 / FIXED_ONE as f32
}

/// Multiply two fixed-point numbers through an i64 intermediate.
#[inline]
pub fn fixed_mul(a: Fixed, b: Fixed) -> Fixed {
    (((a as i64) * (b as i64)) >> FIXED_SCALE) as Fixed
}

/// Divide two fixed-point numbers. Division by zero yields 0.
#[inline]
pub fn fixed_div(a: Fixed, b: Fixed) -> Fixed {
    if b == 0 {
        return 0;
    }
    (((a as i64) << FIXED_SCALE) / b as i64) as Fixed
}

/// Square root, exact to the last fractional bit.
///
/// Works on the widened value `x << 16` with an integer square root, so
/// there is no iteration count to keep in sync between platforms.
#[inline]
pub fn fixed_sqrt(x: Fixed) -> Fixed {
    if x <= 0 {
        return 0;
    }
    isqrt_u64((x as u64) << FIXED_SCALE) as Fixed
}

fn isqrt_u64(n: u64) -> u64 {
    if n < 2 {
        return n;
    }
    // Bit-by-bit method, no division.
    let mut rem = n;
    let mut root = 0u64;
    let mut bit = 1u64 << 62;
    while bit > rem {
        bit >>= 2;
    }
    while bit != 0 {
        if rem >= root + bit {
            rem -= root + bit;
            root = (root >> 1) + bit;
        } else {
            root >>= 1;
        }
        bit >>= 2;
    }
    root
}

/// Clamp a fixed-point number to `[min, max]`.
#[inline]
pub fn fixed_clamp(value: Fixed, min: Fixed, max: Fixed) -> Fixed {
    value.max(min).min(max)
}

// =============================================================================
// 2D VECTOR
// =============================================================================

/// 2D vector with Q16.16 components.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FixedVec2 {
    /// X component
    pub x: Fixed,
    /// Y component
    pub y: Fixed,
}

impl FixedVec2 {
    /// Zero vector
    pub const ZERO: Self = Self { x: 0, y: 0 };

    /// Create from raw fixed-point components.
    #[inline]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Scale both components by a fixed-point factor.
    #[inline]
    pub fn scale(self, factor: Fixed) -> Self {
        Self::new(fixed_mul(self.x, factor), fixed_mul(self.y, factor))
    }

    /// Raw squared length in 2^-32 units. Each term is at most 2^62, so
    /// the sum fits a u64 for every component value.
    #[inline]
    fn raw_length_squared(self) -> u64 {
        let x = self.x.unsigned_abs() as u64;
        let y = self.y.unsigned_abs() as u64;
        x * x + y * y
    }

    /// Squared length, widened so large arenas cannot overflow.
    #[inline]
    pub fn length_squared_wide(self) -> i64 {
        (self.raw_length_squared() >> FIXED_SCALE) as i64
    }

    /// Length (magnitude), saturating at `i32::MAX`.
    #[inline]
    pub fn length(self) -> Fixed {
        isqrt_u64(self.raw_length_squared()).min(i32::MAX as u64) as Fixed
    }

    /// Squared distance to another point.
    #[inline]
    pub fn distance_squared_wide(self, other: Self) -> i64 {
        (self - other).length_squared_wide()
    }

    /// Shrink the vector to unit length if it is longer; shorter vectors
    /// are returned unchanged.
    ///
    /// The divisor is the length rounded up and the division runs in i64,
    /// so the result never exceeds length 1 whatever the input magnitude.
    pub fn clamp_length_to_one(self) -> Self {
        let raw = self.raw_length_squared();
        if raw <= 1u64 << (2 * FIXED_SCALE) {
            return self;
        }
        let mut len = isqrt_u64(raw);
        if len * len < raw {
            len += 1;
        }
        let len = len as i64;
        let unit = |c: Fixed| (((c as i64) << FIXED_SCALE) / len) as Fixed;
        Self::new(unit(self.x), unit(self.y))
    }

    /// Convert to floats for display.
    #[inline]
    pub fn to_floats(self) -> (f32, f32) {
        (to_float(self.x), to_float(self.y))
    }
}

impl Add for FixedVec2 {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self::new(self.x.wrapping_add(other.x), self.y.wrapping_add(other.y))
    }
}

impl Sub for FixedVec2 {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Self::new(self.x.wrapping_sub(other.x), self.y.wrapping_sub(other.y))
    }
}

impl Neg for FixedVec2 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(self.x.wrapping_neg(), self.y.wrapping_neg())
    }
}

impl fmt::Debug for FixedVec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (x, y) = self.to_floats();
        write!(f, "FixedVec2({:.4}, {:.4})", x, y)
    }
}
