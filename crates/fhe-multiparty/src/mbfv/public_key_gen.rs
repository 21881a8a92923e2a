//! Threshold generation of the joint public key.
//!
//! The lead party samples the shared uniform polynomial `a` and publishes
//! `(b_1, a)`. Every subsequent party reuses `a` — this is the invariant the
//! whole protocol rests on — and either extends the running joint key
//! (`fresh = false`) or produces a standalone key for its own share
//! (`fresh = true`, used for proxy re-encryption where the previous key only
//! supplies `a`). After chaining through parties `1..k`,
//! `b_k = ns*sum(e_j) - a*sum(s_j)`, so the joint secret is `sum(s_j)`.
//!
//! Chaining is a transport convention, not a correctness requirement: the
//! mathematically equivalent alternative is for every party to publish a
//! `fresh` contribution and to aggregate them with [`PublicKey::add`].

use crate::bfv::PublicKey;
use crate::{ring, Error, Result};
use fhe_math::rq::{Poly, Representation};
use rand::{CryptoRng, RngCore};

use super::{Aggregate, SecretShare};

impl PublicKey {
    /// Generate the lead party's key pair element: samples the shared
    /// polynomial `a` and returns `(b, a)` with `b = ns*e - a*s`.
    pub fn keygen_lead<R: RngCore + CryptoRng>(
        sk: &SecretShare,
        rng: &mut R,
    ) -> Result<PublicKey> {
        let par = sk.par.clone();
        let a = Poly::random(&par.ctx, Representation::Ntt, rng);
        let b = Self::key_element(sk, &a, None, rng)?;
        Ok(PublicKey::from_parts(&par, b, a))
    }

    /// Generate a subsequent party's key, reusing the shared polynomial of
    /// `prev`.
    ///
    /// With `fresh = false` the returned key extends the running joint key:
    /// it is the joint public key of all parties through this one. With
    /// `fresh = true` the previous key is used only for its `a` and the
    /// result is a standalone key for this party's share.
    pub fn keygen_join<R: RngCore + CryptoRng>(
        sk: &SecretShare,
        prev: &PublicKey,
        fresh: bool,
        rng: &mut R,
    ) -> Result<PublicKey> {
        if sk.par != prev.par {
            return Err(Error::ParameterMismatch(
                "The share and the previous key use different parameters".to_string(),
            ));
        }
        let chained = if fresh { None } else { Some(&prev.b) };
        let b = Self::key_element(sk, &prev.a, chained, rng)?;
        Ok(PublicKey::from_parts(&sk.par, b, prev.a.clone()))
    }

    /// `ns*e - a*s`, plus the previous key element when chaining.
    fn key_element<R: RngCore + CryptoRng>(
        sk: &SecretShare,
        a: &Poly,
        prev_b: Option<&Poly>,
        rng: &mut R,
    ) -> Result<Poly> {
        let par = &sk.par;
        let e = Poly::small(&par.ctx, Representation::Ntt, par.variance, rng)?;
        let e = ring::scale_noise(e, par.noise_scale());

        let mut b = -a.clone();
        b.disallow_variable_time_computations();
        b *= sk.as_poly();
        b += &e;
        if let Some(prev) = prev_b {
            b += prev;
        }
        unsafe { b.allow_variable_time_computations() }
        Ok(b)
    }

    /// Sum two public keys produced against the same shared polynomial.
    ///
    /// Pure, commutative and associative. Fails with a parameter mismatch if
    /// the keys were produced under different parameters or different shared
    /// randomness.
    pub fn add(&self, other: &PublicKey) -> Result<PublicKey> {
        if self.par != other.par {
            return Err(Error::ParameterMismatch(
                "The keys use different parameters".to_string(),
            ));
        }
        if self.crp_digest != other.crp_digest {
            return Err(Error::ParameterMismatch(
                "The keys were produced against different shared polynomials".to_string(),
            ));
        }
        let b = &self.b + &other.b;
        Ok(PublicKey::from_parts(&self.par, b, self.a.clone()))
    }
}

impl Aggregate<PublicKey> for PublicKey {
    fn from_shares<T>(iter: T) -> Result<Self>
    where
        T: IntoIterator<Item = PublicKey>,
    {
        let mut keys = iter.into_iter();
        let mut sum = keys.next().ok_or(Error::TooFewValues(0, 1))?;
        for key in keys {
            sum = sum.add(&key)?;
        }
        Ok(sum)
    }
}
