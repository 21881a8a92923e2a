//! Per-party secret key shares.

use crate::bfv::{BfvParameters, KeyDistribution, SPARSE_HAMMING_WEIGHT};
use crate::{ring, Error, Result};
use fhe_math::rq::{traits::TryConvertFrom, Poly, Representation};
use fhe_util::sample_vec_cbd;
use rand::{CryptoRng, RngCore};
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

use super::Aggregate;

/// A party's share of the joint secret key.
///
/// Created once per party at protocol start and read-only thereafter; the
/// underlying polynomial is zeroized when the share is dropped. The joint
/// secret is the sum of all shares, but no honest party ever computes it.
#[derive(Clone)]
pub struct SecretShare {
    pub(crate) par: Arc<BfvParameters>,
    pub(crate) s: Zeroizing<Poly>,
}

impl fmt::Debug for SecretShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretShare")
            .field("par", &self.par)
            .finish_non_exhaustive()
    }
}

impl SecretShare {
    /// Sample a fresh share from the distribution selected by the
    /// parameters' key distribution mode.
    pub fn random<R: RngCore + CryptoRng>(par: &Arc<BfvParameters>, rng: &mut R) -> Result<Self> {
        let coeffs = match par.key_distribution() {
            KeyDistribution::Rlwe => sample_vec_cbd(par.degree(), par.variance, rng)
                .map_err(|_| {
                    Error::SamplingFailure("centered binomial sampling failed".to_string())
                })?,
            KeyDistribution::Optimized => ring::sample_ternary_vec(par.degree(), rng),
            KeyDistribution::Sparse => {
                ring::sample_sparse_ternary_vec(par.degree(), SPARSE_HAMMING_WEIGHT, rng)?
            }
        };
        Self::from_coefficients(&coeffs, par)
    }

    /// Build a share from signed coefficients. Exposed to the crate for
    /// tests and for reconstructing deterministic shares.
    pub(crate) fn from_coefficients(coeffs: &[i64], par: &Arc<BfvParameters>) -> Result<Self> {
        let mut s = Zeroizing::new(Poly::try_convert_from(
            coeffs,
            &par.ctx,
            false,
            Representation::PowerBasis,
        )?);
        s.change_representation(Representation::Ntt);
        Ok(Self {
            par: par.clone(),
            s,
        })
    }

    /// The share as a ring element in evaluation form.
    pub(crate) fn as_poly(&self) -> &Poly {
        &self.s
    }

    /// The parameters this share was sampled under.
    pub fn par(&self) -> &Arc<BfvParameters> {
        &self.par
    }
}

/// Summing shares reconstructs the joint secret. Only meaningful for tests
/// and for trusted-dealer setups where one entity holds every share.
impl Aggregate<SecretShare> for SecretShare {
    fn from_shares<T>(iter: T) -> Result<Self>
    where
        T: IntoIterator<Item = SecretShare>,
    {
        let mut shares = iter.into_iter();
        let first = shares.next().ok_or(Error::TooFewValues(0, 1))?;
        let mut s = first.s;
        for sh in shares {
            if sh.par != first.par {
                return Err(Error::ParameterMismatch(
                    "Shares sampled under different parameters".to_string(),
                ));
            }
            *s += sh.s.as_ref();
        }
        Ok(Self { par: first.par, s })
    }
}

#[cfg(test)]
mod tests {
    use super::SecretShare;
    use crate::bfv::{BfvParameters, BfvParametersBuilder, KeyDistribution};
    use fhe_math::rq::Representation;
    use rand::thread_rng;

    #[test]
    fn random_share_is_in_evaluation_form() {
        let mut rng = thread_rng();
        let par = BfvParameters::default_arc(1, 8);
        let sk = SecretShare::random(&par, &mut rng).unwrap();
        assert_eq!(sk.as_poly().representation(), &Representation::Ntt);
    }

    #[test]
    fn all_distributions_sample() {
        let mut rng = thread_rng();
        for mode in [
            KeyDistribution::Rlwe,
            KeyDistribution::Optimized,
            KeyDistribution::Sparse,
        ] {
            let par = BfvParametersBuilder::new()
                .set_degree(128)
                .set_plaintext_modulus(1153)
                .set_moduli_sizes(&[62])
                .set_key_distribution(mode)
                .build_arc()
                .unwrap();
            assert!(SecretShare::random(&par, &mut rng).is_ok());
        }
    }

    #[test]
    fn sparse_rejected_below_hamming_weight() {
        let mut rng = thread_rng();
        let par = BfvParametersBuilder::new()
            .set_degree(32)
            .set_plaintext_modulus(1153)
            .set_moduli_sizes(&[62])
            .set_key_distribution(KeyDistribution::Sparse)
            .build_arc()
            .unwrap();
        assert!(SecretShare::random(&par, &mut rng).is_err());
    }
}
