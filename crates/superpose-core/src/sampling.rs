//! Hash-seeded truncation sampling
//!
//! When interference leaves more survivors than the memory budget allows,
//! the engine keeps the `max_num_object` candidates with the smallest
//! selector `r = ln(-ln(1 - u) / |amp|²)`, where `u` is a pseudo-uniform
//! derived from the object's hash. This is the Gumbel construction of
//! Poisson sampling with inclusion probability proportional to `|amp|²`:
//! renormalization afterwards makes the truncated state an unbiased
//! estimator of the deterministic outcome, and deriving `u` from the hash
//! makes the survivor set reproducible for fixed tunables.

/// Map a hash to a well-mixed pseudo-uniform in the open interval (0, 1).
pub fn uniform01_from_hash(hash: u64) -> f64 {
    // splitmix64 finalizer; the raw hash may carry structure in its low bits.
    let mut z = hash.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;

    // 53 mantissa bits, offset by half a step to exclude both endpoints.
    ((z >> 11) as f64 + 0.5) * (1.0 / (1u64 << 53) as f64)
}

/// Survival selector for one candidate; smaller sorts into the kept set.
pub fn survival_selector(hash: u64, norm_sqr: f64) -> f64 {
    let u = uniform01_from_hash(hash);
    (-(1.0 - u).ln() / norm_sqr).ln()
}
