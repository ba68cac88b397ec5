//! Exact-rational façade.
//!
//! The engine works over arbitrary-precision rationals but only ever
//! needs a narrow slice of functionality on top of [`BigRational`]:
//! gcd/lcm over integer-valued rationals and truncated division with
//! remainder. Concentrating those here keeps the rest of the crate
//! independent of the number representation.

use num_bigint::BigInt;
use num_integer::Integer;
use num_rational::BigRational;
use num_traits::{Signed, Zero};

/// Exact rational number used throughout the engine.
pub type Rational = BigRational;

/// Greatest common divisor of two integer-valued rationals.
///
/// The result is non-negative; `gcd(0, 0) = 0`.
pub fn gcd(a: &Rational, b: &Rational) -> Rational {
    debug_assert!(a.is_integer() && b.is_integer());
    Rational::from_integer(a.to_integer().gcd(&b.to_integer()))
}

/// Least common multiple of two integer-valued rationals.
pub fn lcm(a: &Rational, b: &Rational) -> Rational {
    debug_assert!(a.is_integer() && b.is_integer());
    Rational::from_integer(a.to_integer().lcm(&b.to_integer()))
}

/// Denominator of `a` as an integer-valued rational.
pub fn denominator(a: &Rational) -> Rational {
    Rational::from_integer(a.denom().clone())
}

/// Truncated division with remainder: `a = q*b + r` with `|r| < |b|`
/// and `r` sharing the sign of `a` (or zero).
///
/// Both arguments must be integer-valued and `b` nonzero. This is the
/// convention that keeps every row coefficient integral across the
/// fresh-variable step.
pub fn machine_div_rem(a: &Rational, b: &Rational) -> (Rational, Rational) {
    debug_assert!(a.is_integer() && b.is_integer() && !b.is_zero());
    let (q, r) = a.to_integer().div_rem(&b.to_integer());
    (Rational::from_integer(q), Rational::from_integer(r))
}

/// `s` as a rational; `s` is a pivot sign, so `s ∈ {-1, 1}`.
pub fn rational_sign(s: i32) -> Rational {
    debug_assert!(s == 1 || s == -1);
    Rational::from_integer(BigInt::from(s))
}

/// Sign of a nonzero rational as an `i32`.
pub fn sign_of(a: &Rational) -> i32 {
    debug_assert!(!a.is_zero());
    if a.is_positive() {
        1
    } else {
        -1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::One;

    fn rat(n: i64) -> Rational {
        Rational::from_integer(BigInt::from(n))
    }

    #[test]
    fn gcd_is_positive_and_divides() {
        assert_eq!(gcd(&rat(-4), &rat(6)), rat(2));
        assert_eq!(gcd(&rat(0), &rat(-7)), rat(7));
        assert_eq!(gcd(&rat(0), &rat(0)), rat(0));
        assert!(gcd(&rat(9), &rat(14)).is_one());
    }

    #[test]
    fn machine_div_rem_truncates_toward_zero() {
        // Sign of the remainder follows the dividend.
        let cases = [
            (7, 3, 2, 1),
            (-7, 3, -2, -1),
            (7, -3, -2, 1),
            (-7, -3, 2, -1),
            (6, 3, 2, 0),
        ];
        for (a, b, q, r) in cases {
            let (qq, rr) = machine_div_rem(&rat(a), &rat(b));
            assert_eq!((qq, rr), (rat(q), rat(r)), "{}/{}", a, b);
        }
    }

    #[test]
    fn lcm_of_denominators() {
        let a = Rational::new(BigInt::from(1), BigInt::from(6));
        let b = Rational::new(BigInt::from(5), BigInt::from(4));
        assert_eq!(lcm(&denominator(&a), &denominator(&b)), rat(12));
    }
}
