//! Threshold decryption: noise-flooded partial decryptions and their fusion.
//!
//! A two-element ciphertext under the joint secret `s = sum(s_i)` satisfies
//! `c0 + c1*s ≈ ns*m`. Exactly one party computes the lead partial
//! `c0 + c1*s_i + ns*e`, every other party computes `c1*s_i + ns*e`, and the
//! fusion step sums the partials and extracts the plaintext. The flooding
//! noise `e` is sampled at the multiparty standard deviation, far above the
//! error distribution, so a partial reveals nothing about the share beyond
//! the decryption noise.

use crate::bfv::{Ciphertext, Plaintext};
use crate::{ring, Error, Result};
use fhe_math::rq::{Poly, Representation};
use rand::{CryptoRng, RngCore};
use std::sync::Arc;

use super::{Aggregate, BfvFlavor, SchemeFlavor, SecretShare};

/// A party's partial decryption of one ciphertext. Ephemeral: produced,
/// sent to the fusing party, and consumed by [`DecryptionShare::fuse`].
#[derive(Debug, Clone)]
pub struct DecryptionShare {
    pub(crate) par: Arc<crate::bfv::BfvParameters>,
    pub(crate) d: Poly,
}

impl DecryptionShare {
    fn check_inputs(ct: &Ciphertext, sk: &SecretShare) -> Result<()> {
        if ct.par != sk.par {
            return Err(Error::ParameterMismatch(
                "The ciphertext and the share use different parameters".to_string(),
            ));
        }
        if ct.c.len() != 2 {
            return Err(Error::PreconditionFailed(format!(
                "Partial decryption expects a two-element ciphertext, got {}",
                ct.c.len()
            )));
        }
        Ok(())
    }

    /// The lead partial decryption `c0 + c1*s_i + ns*e`, in coefficient
    /// form. Exactly one party per decryption produces this.
    pub fn new_lead<R: RngCore + CryptoRng>(
        ct: &Ciphertext,
        sk: &SecretShare,
        rng: &mut R,
    ) -> Result<Self> {
        Self::check_inputs(ct, sk)?;
        let par = &sk.par;
        let e = ring::flooding_noise(
            &par.ctx,
            par.degree(),
            par.flooding_std_dev(),
            par.noise_scale(),
            rng,
        )?;

        let mut d = ct.c[1].clone();
        d.disallow_variable_time_computations();
        d *= sk.as_poly();
        d += &ct.c[0];
        d += &e;
        d.change_representation(Representation::PowerBasis);
        unsafe { d.allow_variable_time_computations() }

        Ok(Self {
            par: par.clone(),
            d,
        })
    }

    /// A main partial decryption `c1*s_i + ns*e`, left in evaluation form;
    /// fusion re-aligns the formats.
    pub fn new_main<R: RngCore + CryptoRng>(
        ct: &Ciphertext,
        sk: &SecretShare,
        rng: &mut R,
    ) -> Result<Self> {
        Self::check_inputs(ct, sk)?;
        let par = &sk.par;
        let e = ring::flooding_noise(
            &par.ctx,
            par.degree(),
            par.flooding_std_dev(),
            par.noise_scale(),
            rng,
        )?;

        let mut d = ct.c[1].clone();
        d.disallow_variable_time_computations();
        d *= sk.as_poly();
        d += &e;
        unsafe { d.allow_variable_time_computations() }

        Ok(Self {
            par: par.clone(),
            d,
        })
    }

    /// Fuse the partial decryptions of all parties into the plaintext.
    ///
    /// Expects exactly one lead partial among the shares. Each summand is
    /// switched to coefficient form at sum time; the plaintext is extracted
    /// through the scheme flavor.
    pub fn fuse<F, T>(iter: T, flavor: &F) -> Result<Plaintext>
    where
        F: SchemeFlavor,
        T: IntoIterator<Item = DecryptionShare>,
    {
        let mut shares = iter.into_iter();
        let first = shares.next().ok_or(Error::TooFewValues(0, 1))?;
        let par = first.par;

        let mut b = first.d;
        if b.representation() != &Representation::PowerBasis {
            b.change_representation(Representation::PowerBasis);
        }
        for share in shares {
            if share.par != par {
                return Err(Error::ParameterMismatch(
                    "The partial decryptions use different parameters".to_string(),
                ));
            }
            let mut d = share.d;
            if d.representation() != &Representation::PowerBasis {
                d.change_representation(Representation::PowerBasis);
            }
            b += &d;
        }

        flavor.extract_plaintext(&b, &par)
    }
}

impl Aggregate<DecryptionShare> for Plaintext {
    fn from_shares<T>(iter: T) -> Result<Self>
    where
        T: IntoIterator<Item = DecryptionShare>,
    {
        DecryptionShare::fuse(iter, &BfvFlavor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bfv::{
        BfvParameters, BfvParametersBuilder, Encoding, KeyDistribution, PublicKey,
    };
    use crate::mbfv::AggregateIter;
    use rand::thread_rng;

    const NUM_PARTIES: usize = 5;

    struct Party {
        sk: SecretShare,
    }

    fn setup(par: &Arc<BfvParameters>, n: usize) -> (Vec<Party>, PublicKey) {
        let mut rng = thread_rng();
        let mut parties = vec![];
        let sk = SecretShare::random(par, &mut rng).unwrap();
        let mut pk = PublicKey::keygen_lead(&sk, &mut rng).unwrap();
        parties.push(Party { sk });
        for _ in 1..n {
            let sk = SecretShare::random(par, &mut rng).unwrap();
            pk = PublicKey::keygen_join(&sk, &pk, false, &mut rng).unwrap();
            parties.push(Party { sk });
        }
        (parties, pk)
    }

    fn partials(
        parties: &[Party],
        ct: &Ciphertext,
    ) -> Vec<crate::Result<DecryptionShare>> {
        let mut rng = thread_rng();
        parties
            .iter()
            .enumerate()
            .map(|(i, p)| {
                if i == 0 {
                    DecryptionShare::new_lead(ct, &p.sk, &mut rng)
                } else {
                    DecryptionShare::new_main(ct, &p.sk, &mut rng)
                }
            })
            .collect()
    }

    #[test]
    fn encrypt_threshold_decrypt() {
        let mut rng = thread_rng();
        for par in [
            BfvParameters::default_arc(1, 8),
            BfvParameters::default_arc(3, 16),
        ] {
            for _ in 0..20 {
                let (parties, pk) = setup(&par, NUM_PARTIES);

                let v = par.plaintext.random_vec(par.degree(), &mut rng);
                let pt = Plaintext::try_encode(&v, Encoding::Poly, &par).unwrap();
                let ct = pk.try_encrypt(&pt, &mut rng).unwrap();

                let decrypted: Plaintext =
                    partials(&parties, &ct).into_iter().aggregate().unwrap();
                assert_eq!(decrypted.try_decode(Encoding::Poly).unwrap(), v);
            }
        }
    }

    #[test]
    fn homomorphic_addition_under_joint_key() {
        let mut rng = thread_rng();
        let par = BfvParameters::default_arc(3, 16);
        let (parties, pk) = setup(&par, NUM_PARTIES);

        let a = par.plaintext.random_vec(par.degree(), &mut rng);
        let b = par.plaintext.random_vec(par.degree(), &mut rng);
        let mut expected = a.clone();
        par.plaintext.add_vec(&mut expected, &b);

        let ct_a = pk
            .try_encrypt(&Plaintext::try_encode(&a, Encoding::Poly, &par).unwrap(), &mut rng)
            .unwrap();
        let ct_b = pk
            .try_encrypt(&Plaintext::try_encode(&b, Encoding::Poly, &par).unwrap(), &mut rng)
            .unwrap();
        let ct = &ct_a + &ct_b;

        let decrypted: Plaintext = partials(&parties, &ct).into_iter().aggregate().unwrap();
        assert_eq!(decrypted.try_decode(Encoding::Poly).unwrap(), expected);
    }

    #[test]
    fn single_party_threshold_equals_plain_decryption() {
        let mut rng = thread_rng();
        let par = BfvParameters::default_arc(2, 16);
        let (parties, pk) = setup(&par, 1);

        let v = par.plaintext.random_vec(par.degree(), &mut rng);
        let pt = Plaintext::try_encode(&v, Encoding::Poly, &par).unwrap();
        let ct = pk.try_encrypt(&pt, &mut rng).unwrap();

        let decrypted: Plaintext = partials(&parties, &ct).into_iter().aggregate().unwrap();
        assert_eq!(decrypted.try_decode(Encoding::Poly).unwrap(), v);
    }

    #[test]
    fn threshold_matches_decryption_under_summed_shares() {
        let mut rng = thread_rng();
        let par = BfvParameters::default_arc(3, 16);
        let (parties, pk) = setup(&par, 3);

        let v = par.plaintext.random_vec(par.degree(), &mut rng);
        let pt = Plaintext::try_encode(&v, Encoding::Poly, &par).unwrap();
        let ct = pk.try_encrypt(&pt, &mut rng).unwrap();

        // Decrypting with the reconstructed joint secret must agree with
        // the threshold decryption, up to noise.
        let joint: SecretShare = parties
            .iter()
            .map(|p| p.sk.clone())
            .aggregate()
            .unwrap();
        let direct: Plaintext = [DecryptionShare::new_lead(&ct, &joint, &mut rng)]
            .into_iter()
            .aggregate()
            .unwrap();
        let threshold: Plaintext = partials(&parties, &ct).into_iter().aggregate().unwrap();
        assert_eq!(direct, threshold);
    }

    #[test]
    fn three_party_scenario_n1024() {
        let mut rng = thread_rng();
        let par = BfvParametersBuilder::new()
            .set_degree(1024)
            .set_plaintext_modulus(65537)
            .set_moduli_sizes(&[50, 50, 50])
            .set_key_distribution(KeyDistribution::Optimized)
            .build_arc()
            .unwrap();
        let (parties, pk) = setup(&par, 3);

        let m = vec![1u64, 2, 3];
        let pt = Plaintext::try_encode(&m, Encoding::Poly, &par).unwrap();
        let ct = pk.try_encrypt(&pt, &mut rng).unwrap();

        let decrypted: Plaintext = partials(&parties, &ct).into_iter().aggregate().unwrap();
        let mut expected = vec![0u64; par.degree()];
        expected[..3].copy_from_slice(&m);
        assert_eq!(decrypted.try_decode(Encoding::Poly).unwrap(), expected);
    }

    #[test]
    fn empty_partial_set_rejected() {
        let shares: Vec<DecryptionShare> = vec![];
        assert!(matches!(
            DecryptionShare::fuse(shares, &BfvFlavor),
            Err(Error::TooFewValues(0, 1))
        ));
    }

    #[test]
    fn mismatched_parameters_rejected() {
        let mut rng = thread_rng();
        let par1 = BfvParameters::default_arc(2, 16);
        let par2 = BfvParameters::default_arc(3, 16);
        let (parties1, pk1) = setup(&par1, 1);
        let (parties2, pk2) = setup(&par2, 1);

        let pt1 = Plaintext::zero(Encoding::Poly, &par1).unwrap();
        let pt2 = Plaintext::zero(Encoding::Poly, &par2).unwrap();
        let ct1 = pk1.try_encrypt(&pt1, &mut rng).unwrap();
        let ct2 = pk2.try_encrypt(&pt2, &mut rng).unwrap();

        let s1 = DecryptionShare::new_lead(&ct1, &parties1[0].sk, &mut rng).unwrap();
        let s2 = DecryptionShare::new_main(&ct2, &parties2[0].sk, &mut rng).unwrap();
        assert!(matches!(
            DecryptionShare::fuse([s1, s2], &BfvFlavor),
            Err(Error::ParameterMismatch(_))
        ));

        // A share against a foreign ciphertext is rejected up front.
        assert!(DecryptionShare::new_main(&ct1, &parties2[0].sk, &mut rng).is_err());
    }

    #[test]
    fn unrelinearized_ciphertext_rejected() {
        let mut rng = thread_rng();
        let par = BfvParameters::default_arc(2, 16);
        let (parties, pk) = setup(&par, 1);

        let pt = Plaintext::zero(Encoding::Poly, &par).unwrap();
        let mut ct = pk.try_encrypt(&pt, &mut rng).unwrap();
        ct.c.push(ct.c[0].clone());

        assert!(matches!(
            DecryptionShare::new_lead(&ct, &parties[0].sk, &mut rng),
            Err(Error::PreconditionFailed(_))
        ));
    }

    #[test]
    fn flooding_noise_randomizes_partials() {
        let mut rng = thread_rng();

        // With a zero flooding deviation, partial decryptions are a
        // deterministic function of the share and leak it.
        let par = BfvParametersBuilder::new()
            .set_degree(16)
            .set_plaintext_modulus(1153)
            .set_moduli_sizes(&[62, 62])
            .set_flooding_std_dev(0)
            .build_arc()
            .unwrap();
        let (parties, pk) = setup(&par, 2);
        let pt = Plaintext::zero(Encoding::Poly, &par).unwrap();
        let ct = pk.try_encrypt(&pt, &mut rng).unwrap();
        let d1 = DecryptionShare::new_main(&ct, &parties[1].sk, &mut rng).unwrap();
        let d2 = DecryptionShare::new_main(&ct, &parties[1].sk, &mut rng).unwrap();
        assert_eq!(d1.d, d2.d);

        // With the multiparty deviation, two partials of the same
        // ciphertext by the same party differ: the flooding noise hides the
        // share's contribution.
        let par = BfvParameters::default_arc(2, 16);
        let (parties, pk) = setup(&par, 2);
        let pt = Plaintext::zero(Encoding::Poly, &par).unwrap();
        let ct = pk.try_encrypt(&pt, &mut rng).unwrap();
        let d1 = DecryptionShare::new_main(&ct, &parties[1].sk, &mut rng).unwrap();
        let d2 = DecryptionShare::new_main(&ct, &parties[1].sk, &mut rng).unwrap();
        assert_ne!(d1.d, d2.d);

        // The spread of the difference of two partials is the flooding
        // scale, not the error scale: the difference is exactly the
        // difference of the two flooding samples.
        let mut diff = d1.d.clone();
        diff -= &d2.d;
        diff.change_representation(Representation::PowerBasis);
        let q0 = par.moduli()[0] as i128;
        let sigma = par.flooding_std_dev() as f64;
        let centered = Vec::<u64>::from(&diff)[..par.degree()]
            .iter()
            .map(|c| {
                let c = *c as i128;
                if c > q0 / 2 {
                    (c - q0) as f64
                } else {
                    c as f64
                }
            })
            .collect::<Vec<_>>();
        let spread = (centered.iter().map(|c| c * c).sum::<f64>()
            / centered.len() as f64)
            .sqrt();
        // Two independent flooding samples: expected spread sigma*sqrt(2).
        assert!(spread > 0.25 * sigma && spread < 6.0 * sigma);
    }
}
