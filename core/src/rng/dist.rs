//! Distribution sampling over the seeded generator.
//!
//! All sampling funnels through `SeededRng` primitives. Monetary samples are
//! clamped to at least 1 cent before use; Poisson counts are exact
//! non-negative integers (Knuth's product method for small rates, the PTRS
//! transformed-rejection sampler for large ones).

use super::SeededRng;

/// Standard normal draw via Box-Muller.
pub fn standard_normal(rng: &mut SeededRng) -> f64 {
    // ln(0) guard: next_f64 can return exactly 0.
    let mut u1 = rng.next_f64();
    if u1 == 0.0 {
        u1 = f64::MIN_POSITIVE;
    }
    let u2 = rng.next_f64();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Uniform integer amount in [min, max], inclusive.
pub fn uniform_amount(rng: &mut SeededRng, min: i64, max: i64) -> i64 {
    rng.range_i64(min, max + 1)
}

/// Normal amount, clamped to >= 1 cent.
pub fn normal_amount(rng: &mut SeededRng, mean: i64, std_dev: i64) -> i64 {
    let z = standard_normal(rng);
    let sampled = mean as f64 + std_dev as f64 * z;
    (sampled as i64).max(1)
}

/// Log-normal amount: round(exp(z·sigma + mu)), clamped to >= 1 cent.
pub fn log_normal_amount(rng: &mut SeededRng, mu: f64, sigma: f64) -> i64 {
    let z = standard_normal(rng);
    let sampled = (z * sigma + mu).exp().round();
    if sampled >= i64::MAX as f64 {
        i64::MAX
    } else {
        (sampled as i64).max(1)
    }
}

/// Exponential amount: -ln(U)/lambda, clamped to >= 1 cent.
pub fn exponential_amount(rng: &mut SeededRng, lambda: f64) -> i64 {
    let mut u = rng.next_f64();
    if u == 0.0 {
        u = f64::MIN_POSITIVE;
    }
    let sampled = -u.ln() / lambda;
    if sampled >= i64::MAX as f64 {
        i64::MAX
    } else {
        (sampled as i64).max(1)
    }
}

/// Rate threshold above which Poisson sampling switches to PTRS.
const POISSON_PTRS_THRESHOLD: f64 = 30.0;

/// Poisson-distributed count with rate `lambda`.
///
/// `lambda <= 0` yields zero arrivals. Small rates use Knuth's product
/// method (O(lambda) uniforms); rates >= 30 use the PTRS rejection sampler
/// of Hörmann, which needs O(1) uniforms per draw.
pub fn poisson(rng: &mut SeededRng, lambda: f64) -> u64 {
    if !(lambda > 0.0) {
        return 0;
    }
    if lambda < POISSON_PTRS_THRESHOLD {
        poisson_knuth(rng, lambda)
    } else {
        poisson_ptrs(rng, lambda)
    }
}

fn poisson_knuth(rng: &mut SeededRng, lambda: f64) -> u64 {
    let limit = (-lambda).exp();
    let mut k: u64 = 0;
    let mut product = 1.0;
    loop {
        product *= rng.next_f64();
        if product <= limit {
            return k;
        }
        k += 1;
    }
}

/// PTRS ("transformed rejection with squeeze") for lambda >= 10.
fn poisson_ptrs(rng: &mut SeededRng, lambda: f64) -> u64 {
    let slam = lambda.sqrt();
    let loglam = lambda.ln();
    let b = 0.931 + 2.53 * slam;
    let a = -0.059 + 0.02483 * b;
    let inv_alpha = 1.1239 + 1.1328 / (b - 3.4);
    let v_r = 0.9277 - 3.6224 / (b - 2.0);

    loop {
        let u = rng.next_f64() - 0.5;
        let v = rng.next_f64();
        let us = 0.5 - u.abs();
        let k = ((2.0 * a / us + b) * u + lambda + 0.43).floor();

        if us >= 0.07 && v <= v_r {
            return k as u64;
        }
        if k < 0.0 || (us < 0.013 && v > us) {
            continue;
        }
        let lhs = v.ln() + inv_alpha.ln() - (a / (us * us) + b).ln();
        let rhs = -lambda + k * loglam - ln_factorial(k);
        if lhs <= rhs {
            return k as u64;
        }
    }
}

/// Stirling-series ln(k!) used by the PTRS acceptance test.
fn ln_factorial(k: f64) -> f64 {
    if k < 10.0 {
        let mut acc = 0.0f64;
        let mut i = 2.0f64;
        while i <= k {
            acc += i.ln();
            i += 1.0;
        }
        return acc;
    }
    let k1 = k + 1.0;
    k1 * k1.ln() - k1 + 0.5 * (2.0 * std::f64::consts::PI * k1).ln().max(0.0)
        + 1.0 / (12.0 * k1)
}
