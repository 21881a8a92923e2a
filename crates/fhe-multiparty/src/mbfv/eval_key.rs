//! Evaluation keys (key-switching keys) and their threshold aggregation.
//!
//! An evaluation key switching `s_old -> s_new` is a pair of equal-length
//! vectors `(a_vec, b_vec)` over the RNS decomposition, satisfying for each
//! level `i`
//!
//! ```text
//! b_vec[i] + a_vec[i]*s_new  ≈  ns*e_i + g_i*s_old
//! ```
//!
//! where `g_i` is the i-th garner constant of the basis. The `a_vec`
//! polynomials are expanded from a ChaCha8 seed; in the threshold protocols
//! one party's key acts as the template whose seed every other party reuses,
//! so the per-party keys aggregate under element-wise sums of `b_vec`.

use crate::bfv::{BfvParameters, Ciphertext};
use crate::{ring, Error, Result};
use fhe_math::rq::{traits::TryConvertFrom, Poly, Representation};
use rand::{CryptoRng, Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use zeroize::Zeroizing;

use super::{Aggregate, SecretShare};

/// Seed expanding to the shared `a_vec` of an evaluation key.
pub type KeySwitchSeed = <ChaCha8Rng as SeedableRng>::Seed;

/// An evaluation key: a relinearization, rotation or inner-sum key share, or
/// an aggregation of such shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalKey {
    pub(crate) par: Arc<BfvParameters>,
    /// The seed `a_vec` derives from; `None` once the key has been combined
    /// in a way that leaves the shared randomness behind.
    pub(crate) seed: Option<KeySwitchSeed>,
    pub(crate) a_vec: Box<[Poly]>,
    pub(crate) b_vec: Box<[Poly]>,
}

impl EvalKey {
    /// Generate a key switching `from -> sk` with freshly sampled shared
    /// randomness. The result serves as the template other parties pass to
    /// [`EvalKey::multi_keyswitch_gen`].
    ///
    /// `from` is the old secret in coefficient form over the ciphertext
    /// context.
    pub fn keyswitch_gen<R: RngCore + CryptoRng>(
        sk: &SecretShare,
        from: &Poly,
        rng: &mut R,
    ) -> Result<Self> {
        let mut seed = KeySwitchSeed::default();
        rng.fill(&mut seed);
        Self::generate(sk, from, seed, rng)
    }

    /// Generate a key switching `from -> sk` against the shared randomness
    /// of `template`, so that the results of all parties aggregate under
    /// [`EvalKey::add`].
    pub fn multi_keyswitch_gen<R: RngCore + CryptoRng>(
        sk: &SecretShare,
        from: &Poly,
        template: &EvalKey,
        rng: &mut R,
    ) -> Result<Self> {
        if sk.par != template.par {
            return Err(Error::ParameterMismatch(
                "The share and the template use different parameters".to_string(),
            ));
        }
        let seed = template.seed.ok_or_else(|| {
            Error::PreconditionFailed(
                "The template no longer carries its shared randomness".to_string(),
            )
        })?;
        Self::generate(sk, from, seed, rng)
    }

    fn generate<R: RngCore + CryptoRng>(
        sk: &SecretShare,
        from: &Poly,
        seed: KeySwitchSeed,
        rng: &mut R,
    ) -> Result<Self> {
        let par = &sk.par;
        if par.moduli.len() < 2 {
            return Err(Error::InvalidParameter(
                "These parameters do not support key switching".to_string(),
            ));
        }
        if from.representation() != &Representation::PowerBasis {
            return Err(Error::PreconditionFailed(
                "The old secret must be in coefficient form".to_string(),
            ));
        }

        let a_vec = Self::expand_seed(par, seed);
        let mut b_vec = Vec::with_capacity(a_vec.len());
        for (i, a_i) in a_vec.iter().enumerate() {
            let mut a_s = Zeroizing::new(a_i.clone());
            a_s.disallow_variable_time_computations();
            *a_s.as_mut() *= sk.as_poly();

            let e = Poly::small(&par.ctx, Representation::PowerBasis, par.variance, rng)?;
            let mut b = ring::scale_noise(e, par.noise_scale());
            b += &(&par.garner[i] * from);
            b.change_representation(Representation::Ntt);
            b -= a_s.as_ref();
            unsafe { b.allow_variable_time_computations() }
            b_vec.push(b);
        }

        Ok(Self {
            par: par.clone(),
            seed: Some(seed),
            a_vec: a_vec.into_boxed_slice(),
            b_vec: b_vec.into_boxed_slice(),
        })
    }

    /// Expand the seed into one uniform polynomial per RNS level.
    fn expand_seed(par: &Arc<BfvParameters>, seed: KeySwitchSeed) -> Vec<Poly> {
        let mut seeder = ChaCha8Rng::from_seed(seed);
        (0..par.moduli.len())
            .map(|_| {
                let mut seed_i = KeySwitchSeed::default();
                seeder.fill(&mut seed_i);
                let mut a = Poly::random_from_seed(&par.ctx, Representation::Ntt, seed_i);
                unsafe { a.allow_variable_time_computations() }
                a
            })
            .collect()
    }

    /// Sum two keys sharing the same `a_vec`: element-wise sum of `b_vec`,
    /// `a_vec` carried over. Pure, commutative and associative. Used to
    /// combine rotation and inner-sum key shares.
    pub fn add(&self, other: &EvalKey) -> Result<EvalKey> {
        if self.par != other.par {
            return Err(Error::ParameterMismatch(
                "The keys use different parameters".to_string(),
            ));
        }
        match (self.seed, other.seed) {
            (Some(s1), Some(s2)) if s1 == s2 => (),
            _ => {
                return Err(Error::ParameterMismatch(
                    "The keys were produced against different shared randomness".to_string(),
                ))
            }
        }
        let b_vec = self
            .b_vec
            .iter()
            .zip(other.b_vec.iter())
            .map(|(b1, b2)| b1 + b2)
            .collect::<Vec<_>>();
        Ok(EvalKey {
            par: self.par.clone(),
            seed: self.seed,
            a_vec: self.a_vec.clone(),
            b_vec: b_vec.into_boxed_slice(),
        })
    }

    /// Sum two keys element-wise in **both** vectors. Used to combine the
    /// per-party contributions to the joint relinearization key, whose
    /// `a_vec` components differ by construction.
    pub fn add_mult(&self, other: &EvalKey) -> Result<EvalKey> {
        if self.par != other.par {
            return Err(Error::ParameterMismatch(
                "The keys use different parameters".to_string(),
            ));
        }
        let a_vec = self
            .a_vec
            .iter()
            .zip(other.a_vec.iter())
            .map(|(a1, a2)| a1 + a2)
            .collect::<Vec<_>>();
        let b_vec = self
            .b_vec
            .iter()
            .zip(other.b_vec.iter())
            .map(|(b1, b2)| b1 + b2)
            .collect::<Vec<_>>();
        Ok(EvalKey {
            par: self.par.clone(),
            seed: None,
            a_vec: a_vec.into_boxed_slice(),
            b_vec: b_vec.into_boxed_slice(),
        })
    }

    /// A party's multiplicative contribution to the joint relinearization
    /// key: both vectors of the aggregated base key are multiplied by the
    /// party's share, with fresh noise on every level. The contributions of
    /// all parties combine under [`EvalKey::add_mult`].
    pub fn multi_mult<R: RngCore + CryptoRng>(
        &self,
        sk: &SecretShare,
        rng: &mut R,
    ) -> Result<EvalKey> {
        if self.par != sk.par {
            return Err(Error::ParameterMismatch(
                "The key and the share use different parameters".to_string(),
            ));
        }
        let par = &self.par;
        let mut a_vec = Vec::with_capacity(self.a_vec.len());
        let mut b_vec = Vec::with_capacity(self.b_vec.len());
        for (a_i, b_i) in self.a_vec.iter().zip(self.b_vec.iter()) {
            let e1 = Poly::small(&par.ctx, Representation::Ntt, par.variance, rng)?;
            let e2 = Poly::small(&par.ctx, Representation::Ntt, par.variance, rng)?;

            let mut a = a_i.clone();
            a.disallow_variable_time_computations();
            a *= sk.as_poly();
            a += &ring::scale_noise(e1, par.noise_scale());
            unsafe { a.allow_variable_time_computations() }

            let mut b = b_i.clone();
            b.disallow_variable_time_computations();
            b *= sk.as_poly();
            b += &ring::scale_noise(e2, par.noise_scale());
            unsafe { b.allow_variable_time_computations() }

            a_vec.push(a);
            b_vec.push(b);
        }
        Ok(EvalKey {
            par: par.clone(),
            seed: None,
            a_vec: a_vec.into_boxed_slice(),
            b_vec: b_vec.into_boxed_slice(),
        })
    }

    /// Key-switch a polynomial in coefficient form: returns `(d0, d1)` with
    /// `d0 + d1*s_new ≈ p*s_old`.
    pub(crate) fn key_switch(&self, p: &Poly) -> Result<(Poly, Poly)> {
        if p.representation() != &Representation::PowerBasis {
            return Err(Error::PreconditionFailed(
                "The input must be in coefficient form".to_string(),
            ));
        }
        let ctx = &self.par.ctx;
        let mut d0 = Poly::zero(ctx, Representation::Ntt);
        let mut d1 = Poly::zero(ctx, Representation::Ntt);
        for (i, digit) in p.coefficients().outer_iter().enumerate() {
            // The i-th decomposition digit of p, lifted back to the full
            // basis.
            let digit = digit.iter().map(|c| *c as i64).collect::<Vec<_>>();
            let mut p_i = Poly::try_convert_from(
                digit.as_slice(),
                ctx,
                false,
                Representation::PowerBasis,
            )?;
            p_i.change_representation(Representation::Ntt);
            d0 += &(&p_i * &self.b_vec[i]);
            p_i *= &self.a_vec[i];
            d1 += &p_i;
        }
        Ok((d0, d1))
    }

    /// Collapse a three-element ciphertext back to two elements using this
    /// key as a relinearization key (`s^2 -> s`).
    pub fn relinearize(&self, ct: &Ciphertext) -> Result<Ciphertext> {
        if ct.c.len() != 3 {
            return Err(Error::PreconditionFailed(format!(
                "Relinearization expects a three-element ciphertext, got {}",
                ct.c.len()
            )));
        }
        let mut c2 = ct.c[2].clone();
        c2.change_representation(Representation::PowerBasis);
        let (d0, d1) = self.key_switch(&c2)?;
        Ciphertext::new(vec![&ct.c[0] + &d0, &ct.c[1] + &d1], &self.par)
    }
}

impl Aggregate<EvalKey> for EvalKey {
    fn from_shares<T>(iter: T) -> Result<Self>
    where
        T: IntoIterator<Item = EvalKey>,
    {
        let mut keys = iter.into_iter();
        let mut sum = keys.next().ok_or(Error::TooFewValues(0, 1))?;
        for key in keys {
            sum = sum.add(&key)?;
        }
        Ok(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bfv::{BfvParameters, Encoding, PublicKey};
    use crate::mbfv::{AggregateIter, DecryptionShare};
    use rand::thread_rng;

    /// Build the joint key-switching key `s -> s` out of per-party shares:
    /// each party switches its own share to itself against the lead's
    /// template.
    fn joint_self_switch_key(shares: &[SecretShare]) -> EvalKey {
        let mut rng = thread_rng();
        let mut from0 = shares[0].as_poly().clone();
        from0.change_representation(Representation::PowerBasis);
        let template = EvalKey::keyswitch_gen(&shares[0], &from0, &mut rng).unwrap();

        let mut keys = vec![template.clone()];
        for sk in &shares[1..] {
            let mut from = sk.as_poly().clone();
            from.change_representation(Representation::PowerBasis);
            keys.push(EvalKey::multi_keyswitch_gen(sk, &from, &template, &mut rng).unwrap());
        }
        keys.into_iter().aggregate().unwrap()
    }

    #[test]
    fn aggregated_key_preserves_switch_identity() {
        let mut rng = thread_rng();
        let par = BfvParameters::default_arc(3, 16);
        for _ in 0..10 {
            let shares = (0..3)
                .map(|_| SecretShare::random(&par, &mut rng).unwrap())
                .collect::<Vec<_>>();
            let joint: SecretShare = shares.iter().cloned().aggregate().unwrap();
            let ksk = joint_self_switch_key(&shares);

            // Build (c0, c1) = (m - c1*s + e, c1) under the joint secret,
            // then key-switch c1 and check the result still decrypts to m.
            let v = par.plaintext.random_vec(par.degree(), &mut rng);
            let pt = crate::bfv::Plaintext::try_encode(&v, Encoding::Poly, &par).unwrap();
            let m = pt.to_poly();
            let c1 = Poly::random(&par.ctx, Representation::Ntt, &mut rng);
            let mut e = Poly::small(&par.ctx, Representation::Ntt, par.variance, &mut rng).unwrap();
            e += &m;
            e -= &(&c1 * joint.as_poly());
            let c0 = e;

            let mut c1_coeff = c1.clone();
            c1_coeff.change_representation(Representation::PowerBasis);
            let (d0, d1) = ksk.key_switch(&c1_coeff).unwrap();
            let ct = Ciphertext::new(vec![&c0 + &d0, d1], &par).unwrap();

            let decrypted: crate::bfv::Plaintext =
                [DecryptionShare::new_lead(&ct, &joint, &mut rng)]
                    .into_iter()
                    .aggregate()
                    .unwrap();
            assert_eq!(decrypted.try_decode(Encoding::Poly).unwrap(), v);
        }
    }

    #[test]
    fn add_rejects_mismatched_randomness() {
        let mut rng = thread_rng();
        let par = BfvParameters::default_arc(2, 16);
        let sk1 = SecretShare::random(&par, &mut rng).unwrap();
        let sk2 = SecretShare::random(&par, &mut rng).unwrap();

        let mut from1 = sk1.as_poly().clone();
        from1.change_representation(Representation::PowerBasis);
        let mut from2 = sk2.as_poly().clone();
        from2.change_representation(Representation::PowerBasis);

        // Independent templates do not share a seed.
        let k1 = EvalKey::keyswitch_gen(&sk1, &from1, &mut rng).unwrap();
        let k2 = EvalKey::keyswitch_gen(&sk2, &from2, &mut rng).unwrap();
        assert!(matches!(k1.add(&k2), Err(Error::ParameterMismatch(_))));

        let k2 = EvalKey::multi_keyswitch_gen(&sk2, &from2, &k1, &mut rng).unwrap();
        assert!(k1.add(&k2).is_ok());
    }

    #[test]
    fn single_modulus_rejected() {
        let mut rng = thread_rng();
        let par = BfvParameters::default_arc(1, 16);
        let sk = SecretShare::random(&par, &mut rng).unwrap();
        let mut from = sk.as_poly().clone();
        from.change_representation(Representation::PowerBasis);
        assert!(EvalKey::keyswitch_gen(&sk, &from, &mut rng).is_err());
    }

    #[test]
    fn threshold_relinearization() {
        let mut rng = thread_rng();
        let par = BfvParameters::default_arc(3, 16);
        let shares = (0..2)
            .map(|_| SecretShare::random(&par, &mut rng).unwrap())
            .collect::<Vec<_>>();
        let joint: SecretShare = shares.iter().cloned().aggregate().unwrap();

        // Round 1: the joint base key encrypting g_i*s under s.
        let base = joint_self_switch_key(&shares);

        // Round 2: every party multiplies the base key by its share; the
        // contributions aggregate into a key for s^2 -> s.
        let rk = shares
            .iter()
            .map(|sk| base.multi_mult(sk, &mut rng).unwrap())
            .reduce(|acc, k| acc.add_mult(&k).unwrap())
            .unwrap();

        // Manually build a degree-2 ciphertext of zero under the joint
        // secret: c0 = e - c1*s - c2*s^2.
        let s = joint.as_poly();
        let s2 = s * s;
        let c2 = Poly::random(&par.ctx, Representation::Ntt, &mut rng);
        let c1 = Poly::random(&par.ctx, Representation::Ntt, &mut rng);
        let mut c0 = Poly::small(&par.ctx, Representation::Ntt, par.variance, &mut rng).unwrap();
        c0 -= &(&c1 * s);
        c0 -= &(&c2 * &s2);
        let ct = Ciphertext {
            par: par.clone(),
            c: vec![c0, c1, c2],
        };

        let ct = rk.relinearize(&ct).unwrap();
        assert_eq!(ct.len(), 2);

        let decrypted: crate::bfv::Plaintext = shares
            .iter()
            .enumerate()
            .map(|(i, sk)| {
                if i == 0 {
                    DecryptionShare::new_lead(&ct, sk, &mut rng)
                } else {
                    DecryptionShare::new_main(&ct, sk, &mut rng)
                }
            })
            .aggregate()
            .unwrap();
        assert_eq!(
            decrypted.try_decode(Encoding::Poly).unwrap(),
            vec![0u64; par.degree()]
        );
    }

    #[test]
    fn relinearize_checks_arity() {
        let mut rng = thread_rng();
        let par = BfvParameters::default_arc(2, 16);
        let sk = SecretShare::random(&par, &mut rng).unwrap();
        let mut from = sk.as_poly().clone();
        from.change_representation(Representation::PowerBasis);
        let key = EvalKey::keyswitch_gen(&sk, &from, &mut rng).unwrap();

        let pk = PublicKey::keygen_lead(&sk, &mut rng).unwrap();
        let pt = crate::bfv::Plaintext::zero(Encoding::Poly, &par).unwrap();
        let ct = pk.try_encrypt(&pt, &mut rng).unwrap();
        assert!(matches!(
            key.relinearize(&ct),
            Err(Error::PreconditionFailed(_))
        ));
    }
}
