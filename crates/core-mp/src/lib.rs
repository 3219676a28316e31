//! Multi-precision arithmetic kernel.
//!
//! A long number is `[status, exponent, digit_0 .. digit_{d-1}]` with
//! digits in `[0, RADIX)` and `RADIX^2 < 2^53` so digit products stay
//! exact in `f64`. This crate stores the status/sign and exponent as
//! plain fields on [`MpNumber`] rather than packing them into the digit
//! array itself — the packed layout is `mp.c`'s C-array convention, not
//! something a Rust value type gains anything from imitating.
//!
//! `LONG` callers fix `d` once and keep reusing it; `LONG LONG` callers
//! derive `d` from a user precision via [`digits_for_precision`]. Both
//! go through the same [`MpNumber`] type, parameterized by `d` at each
//! call rather than carried in the type.

mod bits;
mod number;
mod transcendental;

pub use bits::{pack_bits, unpack_bits, BitsError};
pub use number::{digits_for_precision, guard_digits, MpError, MpNumber, RADIX};
pub use transcendental::{acos, asin, atan, cos, curt, exp, ln, sin, sqrt, tan, PiCache};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digits_for_precision_covers_requested_decimal_digits() {
        let d = digits_for_precision(50);
        let effective = (d - 1) as f64 * (RADIX as f64).log10() + 1.0;
        assert!(effective >= 50.0);
    }

    #[test]
    fn guard_digits_differ_by_caller_kind() {
        assert_eq!(guard_digits(false), 1);
        assert!(guard_digits(true) >= 2);
    }
}
