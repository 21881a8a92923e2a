//! Public key type and encryption under it.

use crate::bfv::{BfvParameters, Ciphertext, Plaintext};
use crate::{ring, Result};
use fhe_math::rq::{Poly, Representation};
use rand::{CryptoRng, RngCore};
use std::sync::Arc;
use zeroize::Zeroizing;

/// A public key `(b, a)` satisfying `b = ns*e - a*s mod Q` for the secret
/// `s` and some small noise `e`.
///
/// In the threshold protocols `s` is the sum of the per-party shares and the
/// key is produced by chaining [`PublicKey::keygen_lead`] and
/// [`PublicKey::keygen_join`], or by aggregating independently generated
/// contributions with [`PublicKey::add`]. The key carries a fingerprint of
/// the shared polynomial `a`; aggregation refuses keys whose fingerprints
/// differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    /// The parameters of the scheme instance.
    pub(crate) par: Arc<BfvParameters>,
    /// The key element `b = ns*e - a*s`.
    pub(crate) b: Poly,
    /// The shared uniform polynomial `a`.
    pub(crate) a: Poly,
    /// Fingerprint of `a`, checked when keys are aggregated.
    pub(crate) crp_digest: [u8; 32],
}

impl PublicKey {
    pub(crate) fn from_parts(par: &Arc<BfvParameters>, b: Poly, a: Poly) -> Self {
        let crp_digest = ring::fingerprint(&a);
        Self {
            par: par.clone(),
            b,
            a,
            crp_digest,
        }
    }

    /// Returns the fingerprint of the shared polynomial `a`.
    pub fn crp_digest(&self) -> &[u8; 32] {
        &self.crp_digest
    }

    /// Encrypt a plaintext under this key.
    pub fn try_encrypt<R: RngCore + CryptoRng>(
        &self,
        pt: &Plaintext,
        rng: &mut R,
    ) -> Result<Ciphertext> {
        if pt.par != self.par {
            return Err(crate::Error::ParameterMismatch(
                "The plaintext and the key use different parameters".to_string(),
            ));
        }
        let ctx = &self.par.ctx;

        let u = Zeroizing::new(Poly::small(
            ctx,
            Representation::Ntt,
            self.par.variance,
            rng,
        )?);
        let e1 = Zeroizing::new(Poly::small(
            ctx,
            Representation::Ntt,
            self.par.variance,
            rng,
        )?);
        let e2 = Zeroizing::new(Poly::small(
            ctx,
            Representation::Ntt,
            self.par.variance,
            rng,
        )?);

        let m = Zeroizing::new(pt.to_poly());
        let mut c0 = u.as_ref() * &self.b;
        c0 += e1.as_ref();
        c0 += m.as_ref();
        let mut c1 = u.as_ref() * &self.a;
        c1 += e2.as_ref();

        unsafe {
            c0.allow_variable_time_computations();
            c1.allow_variable_time_computations()
        }

        Ok(Ciphertext {
            par: self.par.clone(),
            c: vec![c0, c1],
        })
    }
}
