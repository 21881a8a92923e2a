//! Thin helpers over the [`fhe_math`] ring-element type.
//!
//! Everything here is a small convenience on top of the external polynomial
//! arithmetic: sampling the per-party secret distributions, sampling the
//! large flooding noise used by partial decryptions, scaling noise by the
//! scheme's noise-scale constant, and fingerprinting the shared randomness.

use core::f64::consts::PI;

use fhe_math::rq::{traits::TryConvertFrom, Context, Poly, Representation};
use fhe_traits::Serialize;
use num_bigint::BigUint;
use rand::{CryptoRng, Rng, RngCore};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::Result;

/// Sample a vector with coefficients uniform in `{-1, 0, 1}`.
pub(crate) fn sample_ternary_vec<R: RngCore + CryptoRng>(n: usize, rng: &mut R) -> Vec<i64> {
    (0..n).map(|_| rng.gen_range(-1i64..=1)).collect()
}

/// Sample a ternary vector with exactly `hamming_weight` nonzero
/// coefficients, each `1` or `-1` with equal probability.
pub(crate) fn sample_sparse_ternary_vec<R: RngCore + CryptoRng>(
    n: usize,
    hamming_weight: usize,
    rng: &mut R,
) -> Result<Vec<i64>> {
    if hamming_weight > n {
        return Err(crate::Error::InvalidParameter(format!(
            "Hamming weight {hamming_weight} exceeds the ring dimension {n}"
        )));
    }
    let mut v = vec![0i64; n];
    for i in rand::seq::index::sample(rng, n, hamming_weight) {
        v[i] = if rng.gen_bool(0.5) { 1 } else { -1 };
    }
    Ok(v)
}

/// Draw a standard normal deviate with the Box-Muller transform.
fn box_muller<R: RngCore + CryptoRng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Sample `n` coefficients from a centered normal with standard deviation
/// `std_dev`. This is the flooding distribution: `std_dev` is orders of
/// magnitude above the error distribution, so rounding to the nearest
/// integer is immaterial.
pub(crate) fn sample_flooding_vec<R: RngCore + CryptoRng>(
    n: usize,
    std_dev: u64,
    rng: &mut R,
) -> Vec<i64> {
    (0..n)
        .map(|_| (box_muller(rng) * std_dev as f64).round() as i64)
        .collect()
}

/// Sample a flooding-noise polynomial in NTT form, already scaled by the
/// scheme's noise-scale constant. A zero `std_dev` yields the zero
/// polynomial.
pub(crate) fn flooding_noise<R: RngCore + CryptoRng>(
    ctx: &Arc<Context>,
    degree: usize,
    std_dev: u64,
    noise_scale: u64,
    rng: &mut R,
) -> Result<Poly> {
    if std_dev == 0 {
        return Ok(Poly::zero(ctx, Representation::Ntt));
    }
    let coeffs = sample_flooding_vec(degree, std_dev, rng);
    let mut e = Poly::try_convert_from(
        coeffs.as_slice(),
        ctx,
        false,
        Representation::PowerBasis,
    )?;
    e.change_representation(Representation::Ntt);
    Ok(scale_noise(e, noise_scale))
}

/// Multiply a noise polynomial by the noise-scale constant `ns`.
///
/// `ns` is 1 for BFV-style schemes and the plaintext modulus for BGV-style
/// schemes; the common case is a no-op.
pub(crate) fn scale_noise(e: Poly, noise_scale: u64) -> Poly {
    if noise_scale == 1 {
        e
    } else {
        &BigUint::from(noise_scale) * &e
    }
}

/// Fingerprint of a ring element, used to verify that two keys were produced
/// against the same shared randomness.
pub(crate) fn fingerprint(p: &Poly) -> [u8; 32] {
    Sha256::digest(p.to_bytes()).into()
}
