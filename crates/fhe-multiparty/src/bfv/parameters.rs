//! Parameters shared by every party of a threshold scheme instance.

use crate::{Error, ParametersError, Result};
use fhe_math::{
    ntt::NttOperator,
    rns::{RnsContext, ScalingFactor},
    rq::{scaler::Scaler, traits::TryConvertFrom, Context, Poly, Representation},
    zq::{primes::generate_prime, Modulus},
};
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use std::fmt::Debug;
use std::sync::Arc;

/// The distribution the per-party secret shares are sampled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDistribution {
    /// Centered binomial distribution with the error variance.
    Rlwe,
    /// Uniform ternary coefficients.
    Optimized,
    /// Ternary coefficients with a fixed Hamming weight of 64.
    Sparse,
}

/// The Hamming weight of secrets sampled under [`KeyDistribution::Sparse`].
pub const SPARSE_HAMMING_WEIGHT: usize = 64;

/// Parameters for a threshold BFV scheme instance.
///
/// Immutable for the lifetime of the instance and shared (behind an [`Arc`])
/// by every party; all protocol inputs must have been produced under the
/// same parameters.
pub struct BfvParameters {
    /// Number of coefficients in a polynomial.
    polynomial_degree: usize,

    /// Modulus of the plaintext space.
    plaintext_modulus: u64,

    /// Coprime moduli q_i of the ciphertext space.
    pub(crate) moduli: Box<[u64]>,

    /// Variance of the centered binomial error distribution.
    pub(crate) variance: usize,

    /// Standard deviation of the flooding noise added by partial
    /// decryptions. Orders of magnitude above the error distribution so the
    /// aggregate flooding statistically hides each party's share.
    flooding_std_dev: u64,

    /// Noise scale `ns`: 1 for BFV-style noise placement, the plaintext
    /// modulus for BGV-style.
    noise_scale: u64,

    /// Distribution of the per-party secret shares.
    key_distribution: KeyDistribution,

    /// Number of plaintext slots covered by the inner-sum keys.
    batch_size: usize,

    /// Context of the ciphertext polynomials.
    pub(crate) ctx: Arc<Context>,

    /// Single-modulus context the decryption scaler maps into.
    pub(crate) plaintext_ctx: Arc<Context>,

    /// NTT operator over the plaintext modulus, when it supports SIMD.
    pub(crate) op: Option<Arc<NttOperator>>,

    /// Scaling polynomial for the plaintext encoding.
    pub(crate) delta: Poly,

    /// Q modulo the plaintext modulus.
    pub(crate) q_mod_t: u64,

    /// Down scaler by t/Q for decryption.
    pub(crate) scaler: Scaler,

    /// Plaintext modulus operator.
    pub(crate) plaintext: Modulus,

    /// Garner constants of the RNS basis, used by the key-switching
    /// decomposition.
    pub(crate) garner: Box<[BigUint]>,

    /// Slot-ordering map for the SIMD encoding, built on the same generator
    /// as the rotation indices.
    pub(crate) matrix_reps_index_map: Box<[usize]>,
}

impl Debug for BfvParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BfvParameters")
            .field("polynomial_degree", &self.polynomial_degree)
            .field("plaintext_modulus", &self.plaintext_modulus)
            .field("moduli", &self.moduli)
            .field("key_distribution", &self.key_distribution)
            .finish()
    }
}

impl PartialEq for BfvParameters {
    fn eq(&self, other: &Self) -> bool {
        self.polynomial_degree == other.polynomial_degree
            && self.plaintext_modulus == other.plaintext_modulus
            && self.moduli == other.moduli
            && self.variance == other.variance
            && self.flooding_std_dev == other.flooding_std_dev
            && self.noise_scale == other.noise_scale
            && self.key_distribution == other.key_distribution
            && self.batch_size == other.batch_size
    }
}

impl Eq for BfvParameters {}

impl BfvParameters {
    /// Returns the polynomial degree `N`.
    pub const fn degree(&self) -> usize {
        self.polynomial_degree
    }

    /// Returns the cyclotomic order `M = 2N`.
    pub const fn cyclotomic_order(&self) -> usize {
        self.polynomial_degree << 1
    }

    /// Returns the number of slots in one row of the SIMD plaintext matrix.
    pub const fn row_size(&self) -> usize {
        self.polynomial_degree >> 1
    }

    /// Returns a reference to the ciphertext moduli.
    pub fn moduli(&self) -> &[u64] {
        &self.moduli
    }

    /// Returns the plaintext modulus.
    pub const fn plaintext(&self) -> u64 {
        self.plaintext_modulus
    }

    /// Returns the error variance.
    pub const fn variance(&self) -> usize {
        self.variance
    }

    /// Returns the flooding standard deviation used by partial decryptions.
    pub const fn flooding_std_dev(&self) -> u64 {
        self.flooding_std_dev
    }

    /// Returns the noise scale `ns`.
    pub const fn noise_scale(&self) -> u64 {
        self.noise_scale
    }

    /// Returns the secret share distribution.
    pub const fn key_distribution(&self) -> KeyDistribution {
        self.key_distribution
    }

    /// Returns the number of slots covered by the inner-sum keys.
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns the context of the ciphertext polynomials.
    pub fn ctx(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Whether the plaintext modulus supports the SIMD encoding.
    pub fn supports_simd(&self) -> bool {
        self.op.is_some()
    }

    #[cfg(test)]
    pub(crate) fn default_arc(num_moduli: usize, degree: usize) -> Arc<Self> {
        BfvParametersBuilder::new()
            .set_degree(degree)
            .set_plaintext_modulus(1153)
            .set_moduli_sizes(&vec![62usize; num_moduli])
            .build_arc()
            .unwrap()
    }
}

/// Builder for [`BfvParameters`].
#[derive(Debug)]
pub struct BfvParametersBuilder {
    degree: usize,
    plaintext: u64,
    variance: usize,
    flooding_std_dev: u64,
    noise_scale: u64,
    key_distribution: KeyDistribution,
    batch_size: Option<usize>,
    ciphertext_moduli: Vec<u64>,
    ciphertext_moduli_sizes: Vec<usize>,
}

impl BfvParametersBuilder {
    /// Creates a new instance of the builder.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            degree: Default::default(),
            plaintext: Default::default(),
            variance: 10,
            flooding_std_dev: 1 << 20,
            noise_scale: 1,
            key_distribution: KeyDistribution::Optimized,
            batch_size: None,
            ciphertext_moduli: Default::default(),
            ciphertext_moduli_sizes: Default::default(),
        }
    }

    /// Sets the polynomial degree. Must be a power of two larger or equal
    /// to 8.
    pub fn set_degree(&mut self, degree: usize) -> &mut Self {
        self.degree = degree;
        self
    }

    /// Sets the plaintext modulus.
    pub fn set_plaintext_modulus(&mut self, plaintext: u64) -> &mut Self {
        self.plaintext = plaintext;
        self
    }

    /// Sets the sizes of the ciphertext moduli. Only one of
    /// `set_moduli_sizes` and `set_moduli` can be specified.
    pub fn set_moduli_sizes(&mut self, sizes: &[usize]) -> &mut Self {
        self.ciphertext_moduli_sizes = sizes.to_owned();
        self
    }

    /// Sets the ciphertext moduli to use. Only one of `set_moduli_sizes`
    /// and `set_moduli` can be specified.
    pub fn set_moduli(&mut self, moduli: &[u64]) -> &mut Self {
        self.ciphertext_moduli = moduli.to_owned();
        self
    }

    /// Sets the error variance. Must be between one and sixteen.
    pub fn set_variance(&mut self, variance: usize) -> &mut Self {
        self.variance = variance;
        self
    }

    /// Sets the flooding standard deviation for partial decryptions.
    ///
    /// This is a scheme parameter, not an implementation choice: it must be
    /// chosen large enough that the aggregate flooding noise statistically
    /// hides the individual shares.
    pub fn set_flooding_std_dev(&mut self, std_dev: u64) -> &mut Self {
        self.flooding_std_dev = std_dev;
        self
    }

    /// Sets the noise scale; 1 (the default) or the plaintext modulus.
    pub fn set_noise_scale(&mut self, noise_scale: u64) -> &mut Self {
        self.noise_scale = noise_scale;
        self
    }

    /// Sets the distribution of the secret shares.
    pub fn set_key_distribution(&mut self, key_distribution: KeyDistribution) -> &mut Self {
        self.key_distribution = key_distribution;
        self
    }

    /// Sets the number of slots covered by the inner-sum keys. Must be a
    /// power of two no larger than half the degree. Defaults to half the
    /// degree.
    pub fn set_batch_size(&mut self, batch_size: usize) -> &mut Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Generate ciphertext moduli with the specified sizes.
    fn generate_moduli(moduli_sizes: &[usize], degree: usize) -> Result<Vec<u64>> {
        let mut moduli = vec![];
        for size in moduli_sizes {
            if *size > 62 || *size < 10 {
                return Err(Error::ParametersError(ParametersError::InvalidModulusSize(
                    *size, 10, 62,
                )));
            }

            let mut upper_bound = 1 << size;
            loop {
                if let Some(prime) = generate_prime(*size, 2 * degree as u64, upper_bound) {
                    if !moduli.contains(&prime) {
                        moduli.push(prime);
                        break;
                    } else {
                        upper_bound = prime;
                    }
                } else {
                    return Err(Error::ParametersError(ParametersError::NotEnoughPrimes(
                        *size, degree,
                    )));
                }
            }
        }

        Ok(moduli)
    }

    /// Build a new [`BfvParameters`] inside an [`Arc`].
    pub fn build_arc(&self) -> Result<Arc<BfvParameters>> {
        self.build().map(Arc::new)
    }

    /// Build a new [`BfvParameters`].
    pub fn build(&self) -> Result<BfvParameters> {
        if self.degree < 8 || !self.degree.is_power_of_two() {
            return Err(Error::ParametersError(ParametersError::InvalidDegree(
                self.degree,
            )));
        }

        if !(1..=16).contains(&self.variance) {
            return Err(Error::InvalidParameter(
                "The error variance must be between 1 and 16".to_string(),
            ));
        }

        let plaintext_modulus = Modulus::new(self.plaintext).map_err(|e| {
            Error::ParametersError(ParametersError::InvalidPlaintext(e.to_string()))
        })?;

        if self.noise_scale != 1 && self.noise_scale != self.plaintext {
            return Err(Error::InvalidParameter(
                "The noise scale must be 1 or the plaintext modulus".to_string(),
            ));
        }

        if !self.ciphertext_moduli.is_empty() && !self.ciphertext_moduli_sizes.is_empty() {
            return Err(Error::ParametersError(ParametersError::TooManySpecified(
                "Only one of `ciphertext_moduli` and `ciphertext_moduli_sizes` can be specified"
                    .to_string(),
            )));
        } else if self.ciphertext_moduli.is_empty() && self.ciphertext_moduli_sizes.is_empty() {
            return Err(Error::ParametersError(ParametersError::TooFewSpecified(
                "One of `ciphertext_moduli` and `ciphertext_moduli_sizes` must be specified"
                    .to_string(),
            )));
        }

        let mut moduli = self.ciphertext_moduli.clone();
        if !self.ciphertext_moduli_sizes.is_empty() {
            moduli = Self::generate_moduli(&self.ciphertext_moduli_sizes, self.degree)?
        }

        let row_size = self.degree >> 1;
        let batch_size = self.batch_size.unwrap_or(row_size);
        if !batch_size.is_power_of_two() || batch_size > row_size {
            return Err(Error::InvalidParameter(format!(
                "The batch size must be a power of two at most {row_size}"
            )));
        }

        let op = NttOperator::new(&plaintext_modulus, self.degree);

        let ctx = Context::new_arc(&moduli, self.degree)?;
        let plaintext_ctx = Context::new_arc(&moduli[..1], self.degree)?;

        let rns = RnsContext::new(&moduli)?;
        let garner = (0..moduli.len())
            .map(|i| rns.get_garner(i).unwrap().clone())
            .collect::<Vec<_>>();

        // Constant polynomial (-t)^{-1} mod Q, used to realize the Delta = Q/t
        // scaling of the plaintext.
        let mut delta_rests = vec![];
        for m in &moduli {
            let q = Modulus::new(*m)?;
            delta_rests.push(q.inv(q.neg(q.reduce(*plaintext_modulus))).unwrap())
        }
        let delta_lift = [rns.lift((&delta_rests).into())];
        let mut delta = Poly::try_convert_from(
            delta_lift.as_slice(),
            &ctx,
            true,
            Representation::PowerBasis,
        )?;
        delta.change_representation(Representation::NttShoup);

        let q_mod_t = (rns.modulus() % *plaintext_modulus)
            .to_u64()
            .unwrap();

        let scaler = Scaler::new(
            &ctx,
            &plaintext_ctx,
            ScalingFactor::new(
                &BigUint::from(*plaintext_modulus),
                ctx.modulus(),
            ),
        )?;

        // Slot ordering of the SIMD encoding. The generator is 5, the same
        // power-of-five subgroup the rotation and inner-sum automorphism
        // indices are drawn from.
        let m = self.degree << 1;
        let gen = 5usize;
        let mut pos = 1usize;
        let mut matrix_reps_index_map = vec![0usize; self.degree];
        for i in 0..row_size {
            let index1 = (pos - 1) >> 1;
            let index2 = (m - pos - 1) >> 1;
            matrix_reps_index_map[i] =
                index1.reverse_bits() >> (self.degree.leading_zeros() + 1);
            matrix_reps_index_map[i | row_size] =
                index2.reverse_bits() >> (self.degree.leading_zeros() + 1);
            pos = (pos * gen) & (m - 1);
        }

        Ok(BfvParameters {
            polynomial_degree: self.degree,
            plaintext_modulus: self.plaintext,
            moduli: moduli.into_boxed_slice(),
            variance: self.variance,
            flooding_std_dev: self.flooding_std_dev,
            noise_scale: self.noise_scale,
            key_distribution: self.key_distribution,
            batch_size,
            ctx,
            plaintext_ctx,
            op: op.map(Arc::new),
            delta,
            q_mod_t,
            scaler,
            plaintext: plaintext_modulus,
            garner: garner.into_boxed_slice(),
            matrix_reps_index_map: matrix_reps_index_map.into_boxed_slice(),
        })
    }
}
