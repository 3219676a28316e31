//! Extended operations built on top of the four basic ones in
//! [`crate::number`]: roots by Newton's method, `exp`/`ln` by halving
//! and Taylor summation, `sin`/`cos`/`tan`/`asin`/`acos`/`atan` by
//! argument reduction and the classic identities between them, and a
//! monotonic cache for pi.

use crate::number::{guard_digits, MpError, MpNumber};

fn newton_rounds(work: usize) -> usize {
    (work.max(1) as f64).log2().ceil() as usize + 6
}

/// Newton's method `x <- (x + a/x) / 2`, seeded from an `f64` estimate.
pub fn sqrt(a: &MpNumber, d: usize) -> Result<MpNumber, MpError> {
    if a.is_zero() {
        return Ok(MpNumber::zero(d));
    }
    if a.sign() < 0 {
        return Err(MpError::NegativeRadicand);
    }
    let work = d + guard_digits(false);
    let two = MpNumber::from_i64(2, work);
    let mut x = MpNumber::from_f64(a.to_f64().sqrt(), work);
    for _ in 0..newton_rounds(work) {
        let quotient = a.div(&x, work)?;
        x = x.add(&quotient, work).div(&two, work)?;
    }
    Ok(x.with_precision(d))
}

/// Newton's method `x <- (2x + a/x^2) / 3`, seeded from an `f64` estimate.
pub fn curt(a: &MpNumber, d: usize) -> Result<MpNumber, MpError> {
    if a.is_zero() {
        return Ok(MpNumber::zero(d));
    }
    let work = d + guard_digits(false);
    let two = MpNumber::from_i64(2, work);
    let three = MpNumber::from_i64(3, work);
    let mut x = MpNumber::from_f64(a.to_f64().cbrt(), work);
    for _ in 0..newton_rounds(work) {
        let x2 = x.mul(&x, work);
        let term = a.div(&x2, work)?;
        let numerator = x.mul(&two, work).add(&term, work);
        x = numerator.div(&three, work)?;
    }
    Ok(x.with_precision(d))
}

/// Reduces by repeated halving until `|x| <= 1e-2`, sums the Taylor
/// series there, then squares the result back up.
pub fn exp(x: &MpNumber, d: usize) -> MpNumber {
    let work = d + guard_digits(false);
    if x.is_zero() {
        return MpNumber::from_i64(1, d);
    }
    let mut halvings = 0u32;
    let mut probe = x.to_f64();
    while probe.abs() > 0.01 {
        probe /= 2.0;
        halvings += 1;
    }
    let two = MpNumber::from_i64(2, work);
    let mut reduced = x.with_precision(work);
    for _ in 0..halvings {
        reduced = reduced.div(&two, work).expect("nonzero divisor");
    }
    let mut term = MpNumber::from_i64(1, work);
    let mut sum = MpNumber::from_i64(1, work);
    let mut n: i64 = 1;
    loop {
        term = term.mul(&reduced, work);
        term = term.div(&MpNumber::from_i64(n, work), work).expect("nonzero factorial term");
        let next_sum = sum.add(&term, work);
        let negligible = term.is_negligible_relative_to(&next_sum, work);
        sum = next_sum;
        if negligible {
            break;
        }
        n += 1;
        if n > work as i64 * 8 {
            break;
        }
    }
    for _ in 0..halvings {
        sum = sum.mul(&sum, work);
    }
    sum.with_precision(d)
}

/// Newton's method on `y <- y - 1 + x/exp(y)`, seeded from an `f64`
/// estimate and refined with the `exp` above.
pub fn ln(x: &MpNumber, d: usize) -> Result<MpNumber, MpError> {
    if x.is_zero() || x.sign() < 0 {
        return Err(MpError::NonPositiveLogarithm);
    }
    let work = d + guard_digits(false);
    let one = MpNumber::from_i64(1, work);
    let mut y = MpNumber::from_f64(x.to_f64().ln(), work);
    for _ in 0..newton_rounds(work) {
        let e = exp(&y, work);
        let ratio = x.div(&e, work)?;
        y = y.sub(&one, work).add(&ratio, work);
    }
    Ok(y.with_precision(d))
}

fn taylor_sin(x: &MpNumber, work: usize) -> MpNumber {
    if x.is_zero() {
        return MpNumber::zero(work);
    }
    let x2 = x.mul(x, work);
    let mut term = x.with_precision(work);
    let mut sum = x.with_precision(work);
    let mut n: i64 = 1;
    loop {
        term = term.mul(&x2, work);
        let denom = MpNumber::from_i64((2 * n) * (2 * n + 1), work);
        term = term.div(&denom, work).expect("nonzero factorial term");
        term = term.neg();
        let next_sum = sum.add(&term, work);
        let negligible = term.is_negligible_relative_to(&next_sum, work);
        sum = next_sum;
        if negligible {
            break;
        }
        n += 1;
        if n > work as i64 * 8 {
            break;
        }
    }
    sum
}

fn taylor_atan(x: &MpNumber, work: usize) -> MpNumber {
    if x.is_zero() {
        return MpNumber::zero(work);
    }
    let x2 = x.mul(x, work);
    let mut power = x.with_precision(work);
    let mut sum = x.with_precision(work);
    let mut n: i64 = 1;
    loop {
        power = power.mul(&x2, work);
        let denom = MpNumber::from_i64(2 * n + 1, work);
        let mut term = power.div(&denom, work).expect("nonzero odd denominator");
        if n % 2 == 1 {
            term = term.neg();
        }
        let next_sum = sum.add(&term, work);
        let negligible = term.is_negligible_relative_to(&next_sum, work);
        sum = next_sum;
        if negligible {
            break;
        }
        n += 1;
        // the Leibniz-style series converges slowly near |x| = 1, so it
        // gets a longer leash than the factorial-damped series above.
        if n > work as i64 * 50 {
            break;
        }
    }
    sum
}

fn agm_pi(work: usize) -> MpNumber {
    let one = MpNumber::from_i64(1, work);
    let two = MpNumber::from_i64(2, work);
    let four = MpNumber::from_i64(4, work);
    let mut a = one.clone();
    let mut b = MpNumber::from_f64(std::f64::consts::FRAC_1_SQRT_2, work);
    let mut t = MpNumber::from_f64(0.25, work);
    let mut p = one;
    for _ in 0..newton_rounds(work) {
        let a_next = a.add(&b, work).div(&two, work).expect("nonzero divisor");
        let ab = a.mul(&b, work);
        let b_next = sqrt(&ab, work).expect("AGM operands stay non-negative");
        let diff = a.sub(&a_next, work);
        let diff_sq = diff.mul(&diff, work);
        t = t.sub(&p.mul(&diff_sq, work), work);
        p = p.mul(&two, work);
        a = a_next;
        b = b_next;
    }
    let sum = a.add(&b, work);
    let numerator = sum.mul(&sum, work);
    let denominator = t.mul(&four, work);
    numerator.div(&denominator, work).expect("t stays positive through the AGM iteration")
}

/// A monotonic cache of pi: once computed to some precision, later
/// requests for that precision or less are served from the cache, and
/// only a request for strictly more digits recomputes (and replaces) it.
#[derive(Debug, Default)]
pub struct PiCache {
    value: Option<MpNumber>,
}

impl PiCache {
    pub fn new() -> Self {
        Self { value: None }
    }

    pub fn pi(&mut self, d: usize) -> MpNumber {
        if let Some(cached) = &self.value {
            if cached.precision() >= d {
                return cached.with_precision(d);
            }
        }
        let computed = agm_pi(d + guard_digits(false));
        let result = computed.with_precision(d);
        self.value = Some(computed);
        result
    }

    pub fn two_pi(&mut self, d: usize) -> MpNumber {
        let work = d + 1;
        let pi = self.pi(work);
        pi.mul(&MpNumber::from_i64(2, work), work).with_precision(d)
    }

    pub fn half_pi(&mut self, d: usize) -> MpNumber {
        let work = d + 1;
        let pi = self.pi(work);
        pi.div(&MpNumber::from_i64(2, work), work).expect("nonzero divisor").with_precision(d)
    }
}

fn reduce_mod_two_pi(x: &MpNumber, work: usize, pi_cache: &mut PiCache) -> MpNumber {
    let two_pi = pi_cache.two_pi(work);
    let k = match x.div(&two_pi, work) {
        Ok(q) => q.trunc(),
        Err(_) => return x.with_precision(work),
    };
    x.sub(&k.mul(&two_pi, work), work)
}

pub fn sin(x: &MpNumber, d: usize, pi_cache: &mut PiCache) -> MpNumber {
    let work = d + guard_digits(false);
    let reduced = reduce_mod_two_pi(x, work, pi_cache);
    taylor_sin(&reduced, work).with_precision(d)
}

/// `cos(x) = sin(pi/2 - (x mod 2*pi))`.
pub fn cos(x: &MpNumber, d: usize, pi_cache: &mut PiCache) -> MpNumber {
    let work = d + guard_digits(false);
    let reduced = reduce_mod_two_pi(x, work, pi_cache);
    let half_pi = pi_cache.half_pi(work);
    taylor_sin(&half_pi.sub(&reduced, work), work).with_precision(d)
}

pub fn tan(x: &MpNumber, d: usize, pi_cache: &mut PiCache) -> Result<MpNumber, MpError> {
    let work = d + guard_digits(false);
    let s = sin(x, work, pi_cache);
    let c = cos(x, work, pi_cache);
    Ok(s.div(&c, work)?.with_precision(d))
}

/// `atan(x)` directly from its series for `|x| <= 1`; otherwise via
/// `atan(x) = sign(x)*pi/2 - atan(1/x)`.
pub fn atan(x: &MpNumber, d: usize, pi_cache: &mut PiCache) -> MpNumber {
    let work = d + guard_digits(false);
    let one = MpNumber::from_i64(1, work);
    let xw = x.with_precision(work);
    let within_unit_disc = xw.abs().compare(&one) != std::cmp::Ordering::Greater;
    if within_unit_disc {
        return taylor_atan(&xw, work).with_precision(d);
    }
    let recip = one.div(&xw, work).expect("|x| > 1 so x is nonzero");
    let base = taylor_atan(&recip, work);
    let half_pi = pi_cache.half_pi(work);
    let result = if xw.sign() > 0 {
        half_pi.sub(&base, work)
    } else {
        half_pi.neg().sub(&base, work)
    };
    result.with_precision(d)
}

/// `asin(x) = atan(x / sqrt(1 - x^2))`, with the `|x| = 1` edge handled
/// directly as `+-pi/2`.
pub fn asin(x: &MpNumber, d: usize, pi_cache: &mut PiCache) -> Result<MpNumber, MpError> {
    let work = d + guard_digits(false);
    let one = MpNumber::from_i64(1, work);
    let xw = x.with_precision(work);
    let x2 = xw.mul(&xw, work);
    let complement = one.sub(&x2, work);
    if complement.sign() < 0 {
        return Err(MpError::OutOfDomain);
    }
    if complement.is_zero() {
        let half_pi = pi_cache.half_pi(d);
        return Ok(if xw.sign() < 0 { half_pi.neg() } else { half_pi });
    }
    let denom = sqrt(&complement, work)?;
    let ratio = xw.div(&denom, work)?;
    Ok(atan(&ratio, work, pi_cache).with_precision(d))
}

/// `acos(x) = pi/2 - asin(x)`.
pub fn acos(x: &MpNumber, d: usize, pi_cache: &mut PiCache) -> Result<MpNumber, MpError> {
    let work = d + guard_digits(false);
    let half_pi = pi_cache.half_pi(work);
    let a = asin(x, work, pi_cache)?;
    Ok(half_pi.sub(&a, work).with_precision(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRECISION: usize = 10;

    #[test]
    fn sqrt_of_two_matches_f64() {
        let two = MpNumber::from_i64(2, PRECISION);
        let root = sqrt(&two, PRECISION).unwrap();
        assert!((root.to_f64() - std::f64::consts::SQRT_2).abs() < 1e-9);
    }

    #[test]
    fn sqrt_rejects_negative_radicand() {
        let neg = MpNumber::from_i64(-4, PRECISION);
        assert_eq!(sqrt(&neg, PRECISION), Err(MpError::NegativeRadicand));
    }

    #[test]
    fn curt_of_twenty_seven_is_three() {
        let value = MpNumber::from_i64(27, PRECISION);
        let root = curt(&value, PRECISION).unwrap();
        assert!((root.to_f64() - 3.0).abs() < 1e-8);
    }

    #[test]
    fn exp_of_one_matches_eulers_number() {
        let one = MpNumber::from_i64(1, PRECISION);
        let result = exp(&one, PRECISION);
        assert!((result.to_f64() - std::f64::consts::E).abs() < 1e-8);
    }

    #[test]
    fn ln_undoes_exp() {
        let two = MpNumber::from_i64(2, PRECISION);
        let e = exp(&two, PRECISION);
        let back = ln(&e, PRECISION).unwrap();
        assert!((back.to_f64() - 2.0).abs() < 1e-7);
    }

    #[test]
    fn ln_of_non_positive_is_rejected() {
        let zero = MpNumber::zero(PRECISION);
        assert_eq!(ln(&zero, PRECISION), Err(MpError::NonPositiveLogarithm));
    }

    #[test]
    fn pi_cache_matches_known_value() {
        let mut cache = PiCache::new();
        let pi = cache.pi(PRECISION);
        assert!((pi.to_f64() - std::f64::consts::PI).abs() < 1e-9);
    }

    #[test]
    fn pi_cache_reuses_value_for_smaller_precision_request() {
        let mut cache = PiCache::new();
        let wide = cache.pi(PRECISION);
        let narrow = cache.pi(4);
        assert_eq!(narrow.precision(), 4);
        assert!((wide.to_f64() - narrow.to_f64()).abs() < 1e-3);
    }

    #[test]
    fn sin_and_cos_satisfy_pythagorean_identity() {
        let mut cache = PiCache::new();
        let x = MpNumber::from_f64(0.7, PRECISION);
        let s = sin(&x, PRECISION, &mut cache);
        let c = cos(&x, PRECISION, &mut cache);
        let identity = s.mul(&s, PRECISION).add(&c.mul(&c, PRECISION), PRECISION);
        assert!((identity.to_f64() - 1.0).abs() < 1e-8);
    }

    #[test]
    fn atan_of_one_is_pi_over_four() {
        let mut cache = PiCache::new();
        let one = MpNumber::from_i64(1, PRECISION);
        let result = atan(&one, PRECISION, &mut cache);
        assert!((result.to_f64() - std::f64::consts::FRAC_PI_4).abs() < 1e-8);
    }

    #[test]
    fn asin_rejects_values_outside_unit_interval() {
        let mut cache = PiCache::new();
        let two = MpNumber::from_i64(2, PRECISION);
        assert_eq!(asin(&two, PRECISION, &mut cache), Err(MpError::OutOfDomain));
    }

    #[test]
    fn acos_of_zero_is_half_pi() {
        let mut cache = PiCache::new();
        let zero = MpNumber::zero(PRECISION);
        let result = acos(&zero, PRECISION, &mut cache).unwrap();
        assert!((result.to_f64() - std::f64::consts::FRAC_PI_2).abs() < 1e-8);
    }
}
