//! Integer interval domain.
//!
//! An [`Interval`] is a closed range `[low, high]` whose endpoints may be
//! unbounded. It is the numeric half of the abstract value domain: every
//! integer expression on a taint path is approximated by the smallest interval
//! known to contain all of its runtime values.
//!
//! # Lattice Structure
//!
//! ```text
//!              [-inf, +inf]   (top: nothing known)
//!             /            \
//!      [-inf, k]   ...   [k, +inf]
//!             \            /
//!               [a, b]  a <= b
//!                  |
//!                empty        (bottom: unreachable)
//! ```
//!
//! - `join` is the interval hull (used for ternaries and merges)
//! - `meet` is the intersection (used for branch refinement)
//!
//! Arithmetic never panics. A finite result that does not fit in `i64`
//! saturates to the infinity in the direction of the overflow, which keeps
//! every operation sound (the result still contains every concrete value).

use serde::{Deserialize, Serialize};
use std::cmp::{max, min};
use std::fmt;

// =============================================================================
// Bounds
// =============================================================================

/// One endpoint of an interval.
///
/// The derived ordering is the natural one: `NegInf < Finite(_) < PosInf`,
/// with finite bounds compared by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Bound {
    /// Unbounded below.
    NegInf,
    /// A concrete 64-bit bound.
    Finite(i64),
    /// Unbounded above.
    PosInf,
}

impl Bound {
    /// Get the finite value, if any.
    #[inline]
    #[must_use]
    pub const fn finite(self) -> Option<i64> {
        match self {
            Bound::Finite(v) => Some(v),
            _ => None,
        }
    }

    /// Sign of the bound: -1, 0 or 1.
    const fn signum(self) -> i8 {
        match self {
            Bound::NegInf => -1,
            Bound::PosInf => 1,
            Bound::Finite(v) => {
                if v < 0 {
                    -1
                } else if v > 0 {
                    1
                } else {
                    0
                }
            }
        }
    }

    /// Infinity carrying the given sign (`0` is never passed in).
    const fn infinity(sign: i8) -> Bound {
        if sign < 0 {
            Bound::NegInf
        } else {
            Bound::PosInf
        }
    }

    #[must_use]
    pub fn neg(self) -> Bound {
        match self {
            Bound::NegInf => Bound::PosInf,
            Bound::PosInf => Bound::NegInf,
            // -i64::MIN does not fit
            Bound::Finite(v) => v.checked_neg().map_or(Bound::PosInf, Bound::Finite),
        }
    }

    /// Saturating addition. `conflict` is returned for `-inf + +inf`, which
    /// callers resolve toward the side of the interval they are computing.
    fn add(self, other: Bound, conflict: Bound) -> Bound {
        match (self, other) {
            (Bound::Finite(a), Bound::Finite(b)) => a
                .checked_add(b)
                .map_or_else(|| Bound::infinity(if b > 0 { 1 } else { -1 }), Bound::Finite),
            (Bound::NegInf, Bound::PosInf) | (Bound::PosInf, Bound::NegInf) => conflict,
            (Bound::NegInf, _) | (_, Bound::NegInf) => Bound::NegInf,
            (Bound::PosInf, _) | (_, Bound::PosInf) => Bound::PosInf,
        }
    }

    fn mul(self, other: Bound) -> Bound {
        match (self, other) {
            (Bound::Finite(a), Bound::Finite(b)) => a.checked_mul(b).map_or_else(
                || Bound::infinity(self.signum() * other.signum()),
                Bound::Finite,
            ),
            _ => {
                let sign = self.signum() * other.signum();
                if sign == 0 {
                    Bound::Finite(0)
                } else {
                    Bound::infinity(sign)
                }
            }
        }
    }

    /// Truncating division. The divisor is never zero here.
    fn div(self, divisor: Bound) -> Bound {
        match (self, divisor) {
            (Bound::Finite(a), Bound::Finite(b)) => a
                .checked_div(b)
                // i64::MIN / -1
                .map_or(Bound::PosInf, Bound::Finite),
            (Bound::Finite(_), _) => Bound::Finite(0),
            _ => {
                let sign = self.signum() * divisor.signum();
                Bound::infinity(sign)
            }
        }
    }

    fn shr(self, amount: u32) -> Bound {
        match self {
            Bound::Finite(v) => Bound::Finite(v >> amount),
            other => other,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::NegInf => write!(f, "-inf"),
            Bound::PosInf => write!(f, "+inf"),
            Bound::Finite(v) => write!(f, "{}", v),
        }
    }
}

// =============================================================================
// Integer Types
// =============================================================================

/// Target type of a parse-to-integer conversion.
///
/// Parsing an unconstrained string yields the full representable range of
/// the target type, which is finite but far above any sane loop ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
}

impl IntType {
    /// Full representable range of the type.
    #[must_use]
    pub const fn range(self) -> Interval {
        let (lo, hi) = match self {
            IntType::I8 => (i8::MIN as i64, i8::MAX as i64),
            IntType::I16 => (i16::MIN as i64, i16::MAX as i64),
            IntType::I32 => (i32::MIN as i64, i32::MAX as i64),
            IntType::I64 => (i64::MIN, i64::MAX),
            IntType::U8 => (0, u8::MAX as i64),
            IntType::U16 => (0, u16::MAX as i64),
            IntType::U32 => (0, u32::MAX as i64),
        };
        Interval {
            low: Bound::Finite(lo),
            high: Bound::Finite(hi),
        }
    }
}

// =============================================================================
// Interval
// =============================================================================

/// Closed integer interval `[low, high]`.
///
/// The canonical empty interval is `[+inf, -inf]`; any interval with
/// `low > high` is treated as empty (unreachable code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub low: Bound,
    pub high: Bound,
}

impl Interval {
    /// Build an interval from two bounds. Inverted bounds give `empty()`.
    ///
    /// A low bound of `+inf` (or high bound of `-inf`) only arises from
    /// saturation and is pulled back to the largest finite value.
    #[must_use]
    pub fn new(low: Bound, high: Bound) -> Self {
        if low > high {
            return Self::empty();
        }
        let low = if low == Bound::PosInf { Bound::Finite(i64::MAX) } else { low };
        let high = if high == Bound::NegInf { Bound::Finite(i64::MIN) } else { high };
        Self { low, high }
    }

    /// Interval with finite endpoints.
    #[must_use]
    pub fn range(low: i64, high: i64) -> Self {
        Self::new(Bound::Finite(low), Bound::Finite(high))
    }

    /// Singleton interval `[v, v]`.
    #[must_use]
    pub const fn constant(v: i64) -> Self {
        Self {
            low: Bound::Finite(v),
            high: Bound::Finite(v),
        }
    }

    /// `[-inf, +inf]`.
    #[must_use]
    pub const fn top() -> Self {
        Self {
            low: Bound::NegInf,
            high: Bound::PosInf,
        }
    }

    /// The unreachable interval.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            low: Bound::PosInf,
            high: Bound::NegInf,
        }
    }

    /// `[low, +inf]`.
    #[must_use]
    pub fn at_least(low: i64) -> Self {
        Self::new(Bound::Finite(low), Bound::PosInf)
    }

    /// `[-inf, high]`.
    #[must_use]
    pub fn at_most(high: i64) -> Self {
        Self::new(Bound::NegInf, Bound::Finite(high))
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.low > self.high
    }

    #[inline]
    #[must_use]
    pub fn is_top(&self) -> bool {
        self.low == Bound::NegInf && self.high == Bound::PosInf
    }

    /// The single value of a singleton interval.
    #[must_use]
    pub fn as_constant(&self) -> Option<i64> {
        match (self.low, self.high) {
            (Bound::Finite(a), Bound::Finite(b)) if a == b => Some(a),
            _ => None,
        }
    }

    #[must_use]
    pub fn contains(&self, v: i64) -> bool {
        !self.is_empty() && self.low <= Bound::Finite(v) && Bound::Finite(v) <= self.high
    }

    /// Every value is `>= 0`.
    #[must_use]
    pub fn is_non_negative(&self) -> bool {
        !self.is_empty() && self.low >= Bound::Finite(0)
    }

    /// Interval hull of both operands.
    #[must_use]
    pub fn join(&self, other: &Interval) -> Interval {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Interval {
            low: min(self.low, other.low),
            high: max(self.high, other.high),
        }
    }

    /// Intersection of both operands.
    #[must_use]
    pub fn meet(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::empty();
        }
        Interval::new(max(self.low, other.low), min(self.high, other.high))
    }

    // -------------------------------------------------------------------------
    // Arithmetic
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn add(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::empty();
        }
        Interval::new(
            self.low.add(other.low, Bound::NegInf),
            self.high.add(other.high, Bound::PosInf),
        )
    }

    #[must_use]
    pub fn sub(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::empty();
        }
        Interval::new(
            self.low.add(other.high.neg(), Bound::NegInf),
            self.high.add(other.low.neg(), Bound::PosInf),
        )
    }

    #[must_use]
    pub fn neg(&self) -> Interval {
        if self.is_empty() {
            return Interval::empty();
        }
        Interval::new(self.high.neg(), self.low.neg())
    }

    #[must_use]
    pub fn mul(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::empty();
        }
        let products = [
            self.low.mul(other.low),
            self.low.mul(other.high),
            self.high.mul(other.low),
            self.high.mul(other.high),
        ];
        hull(&products)
    }

    /// Truncating division. A divisor that may be zero gives `top()`.
    #[must_use]
    pub fn div(&self, divisor: &Interval) -> Interval {
        if self.is_empty() || divisor.is_empty() {
            return Interval::empty();
        }
        if divisor.contains(0) {
            return Interval::top();
        }
        let quotients = [
            self.low.div(divisor.low),
            self.low.div(divisor.high),
            self.high.div(divisor.low),
            self.high.div(divisor.high),
        ];
        hull(&quotients)
    }

    /// Remainder.
    ///
    /// A positive constant modulus `m` bounds the result to `[0, m-1]` no
    /// matter what the dividend is. Any other divisor is bounded by its own
    /// magnitude: `[-m_max+1, m_max-1]`.
    #[must_use]
    pub fn rem(&self, divisor: &Interval) -> Interval {
        if self.is_empty() || divisor.is_empty() {
            return Interval::empty();
        }
        if let Some(m) = divisor.as_constant() {
            if m > 0 {
                return Interval::range(0, m - 1);
            }
            if m == 0 {
                return Interval::top();
            }
        }
        let magnitude = max(divisor.low.neg(), divisor.high);
        match magnitude {
            Bound::Finite(m) if m > 0 => Interval::range(-(m - 1), m - 1),
            _ => Interval::top(),
        }
    }

    /// Bitwise AND.
    ///
    /// ANDing with a non-negative value clears the sign bit and every bit
    /// above that value's high bit, so the result lies in `[0, mask]`.
    #[must_use]
    pub fn bitand(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::empty();
        }
        let bound_of = |iv: &Interval| {
            if iv.is_non_negative() {
                iv.high.finite()
            } else {
                None
            }
        };
        match (bound_of(self), bound_of(other)) {
            (Some(a), Some(b)) => Interval::range(0, min(a, b)),
            (Some(m), None) | (None, Some(m)) => Interval::range(0, m),
            (None, None) => Interval::top(),
        }
    }

    /// Arithmetic shift right by an amount interval.
    #[must_use]
    pub fn shr(&self, amount: &Interval) -> Interval {
        if self.is_empty() || amount.is_empty() {
            return Interval::empty();
        }
        let (Some(s_lo), Some(s_hi)) = (amount.low.finite(), amount.high.finite()) else {
            return Interval::top();
        };
        if s_lo < 0 || s_hi > 63 {
            return Interval::top();
        }
        let (s_lo, s_hi) = (s_lo as u32, s_hi as u32);
        let shifted = [
            self.low.shr(s_lo),
            self.low.shr(s_hi),
            self.high.shr(s_lo),
            self.high.shr(s_hi),
        ];
        hull(&shifted)
    }

    #[must_use]
    pub fn abs(&self) -> Interval {
        if self.is_empty() {
            return Interval::empty();
        }
        if self.low >= Bound::Finite(0) {
            *self
        } else if self.high <= Bound::Finite(0) {
            self.neg()
        } else {
            Interval::new(Bound::Finite(0), max(self.low.neg(), self.high))
        }
    }

    #[must_use]
    pub fn min(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::empty();
        }
        Interval::new(min(self.low, other.low), min(self.high, other.high))
    }

    #[must_use]
    pub fn max(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::empty();
        }
        Interval::new(max(self.low, other.low), max(self.high, other.high))
    }

    /// `clamp(x, lo, hi)` = `min(max(x, lo), hi)`.
    #[must_use]
    pub fn clamp(&self, lo: &Interval, hi: &Interval) -> Interval {
        self.max(lo).min(hi)
    }

    /// Number of iterations a `for (i = 0; i < n; i++)` loop governed by this
    /// interval can execute: negative counts run zero times.
    #[must_use]
    pub fn iteration_count(&self) -> Interval {
        if self.is_empty() {
            return Interval::empty();
        }
        self.max(&Interval::constant(0))
    }
}

/// Hull of a set of candidate bounds.
fn hull(bounds: &[Bound]) -> Interval {
    let lo = bounds.iter().copied().min().unwrap_or(Bound::NegInf);
    let hi = bounds.iter().copied().max().unwrap_or(Bound::PosInf);
    Interval::new(lo, hi)
}

impl Default for Interval {
    fn default() -> Self {
        Interval::top()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "empty")
        } else {
            write!(f, "[{}, {}]", self.low, self.high)
        }
    }
}
