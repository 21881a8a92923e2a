//! Multiparty (threshold) protocols over the BFV types.
//!
//! A fixed set of honest-but-curious parties jointly holds the secret key
//! `s = sum(s_i)`; the shares `s_i` never leave their owners. The protocols
//! exchange only public material: the shared uniform polynomial `a`
//! (broadcast once by the lead party), per-party public-key and
//! evaluation-key contributions, and noise-flooded partial decryptions.
//!
//! All aggregation operations are pure, commutative and associative, so
//! parties may contribute in any order. Key-generation operations sample
//! their randomness from per-task CSPRNGs and never share generators across
//! threads.

mod automorphism;
mod decrypt;
mod eval_key;
mod public_key_gen;
mod secret_share;

pub use automorphism::{
    eval_at_index_keygen, eval_automorphism_keygen, eval_sum_indices, eval_sum_keygen,
    multi_eval_at_index_keygen, multi_eval_automorphism_keygen, multi_eval_sum_keygen,
    EvalKeyMap, MergePolicy,
};
pub use decrypt::DecryptionShare;
pub use eval_key::{EvalKey, KeySwitchSeed};
pub use secret_share::SecretShare;

use crate::bfv::{BfvParameters, Plaintext};
use crate::{Error, Result};
use fhe_math::{rq::Poly, zq::Modulus};
use itertools::Itertools;
use std::sync::Arc;
use zeroize::Zeroizing;

/// A type that can be constructed by aggregating the shares submitted by
/// each party.
pub trait Aggregate<A>: Sized {
    /// Aggregate the shares into the joint value.
    fn from_shares<T>(iter: T) -> Result<Self>
    where
        T: IntoIterator<Item = A>;
}

impl<A, B: Aggregate<A>> Aggregate<Result<A>> for B {
    fn from_shares<T>(iter: T) -> Result<Self>
    where
        T: IntoIterator<Item = Result<A>>,
    {
        B::from_shares(iter.into_iter().collect::<Result<Vec<A>>>()?)
    }
}

/// Convenience extension to aggregate any iterator of shares.
pub trait AggregateIter: IntoIterator + Sized {
    /// Aggregate the items of this iterator into the joint value.
    fn aggregate<A>(self) -> Result<A>
    where
        A: Aggregate<Self::Item>,
    {
        A::from_shares(self)
    }
}

impl<I: IntoIterator> AggregateIter for I {}

/// The two scheme-specific behaviors of the protocol layer: mapping a slot
/// rotation to an automorphism index, and extracting the plaintext from the
/// fused decryption polynomial.
pub trait SchemeFlavor {
    /// Map a signed slot rotation to the automorphism index realizing it.
    fn automorphism_index(&self, rotation: i64, cyclotomic_order: usize) -> Result<usize>;

    /// Extract the plaintext from a fused coefficient-form polynomial.
    fn extract_plaintext(&self, b: &Poly, par: &Arc<BfvParameters>) -> Result<Plaintext>;
}

/// The BFV flavor: power-of-five rotation indices and t/Q plaintext
/// extraction.
#[derive(Debug, Default, Clone, Copy)]
pub struct BfvFlavor;

fn mod_pow(base: u64, mut exp: u64, modulus: u64) -> u64 {
    let m = modulus as u128;
    let mut result = 1u128;
    let mut b = base as u128 % m;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result * b % m;
        }
        b = b * b % m;
        exp >>= 1;
    }
    result as u64
}

impl SchemeFlavor for BfvFlavor {
    fn automorphism_index(&self, rotation: i64, cyclotomic_order: usize) -> Result<usize> {
        if rotation == 0 {
            return Err(Error::InvalidParameter(
                "The rotation index must be nonzero".to_string(),
            ));
        }
        let m = cyclotomic_order as u64;
        if rotation.unsigned_abs() >= m / 4 {
            return Err(Error::OutOfRange(format!(
                "The rotation {rotation} exceeds the number of slots in a row"
            )));
        }
        // The subgroup of rotations is generated by 5; negative rotations
        // use its inverse, 5^(m/4 - 1) since the order of 5 divides m/4.
        let g = if rotation < 0 {
            mod_pow(5, m / 4 - 1, m)
        } else {
            5
        };
        Ok(mod_pow(g, rotation.unsigned_abs(), m) as usize)
    }

    fn extract_plaintext(&self, b: &Poly, par: &Arc<BfvParameters>) -> Result<Plaintext> {
        let mut c = Zeroizing::new(b.clone());
        if c.representation() != &fhe_math::rq::Representation::PowerBasis {
            c.change_representation(fhe_math::rq::Representation::PowerBasis);
        }

        // Scale by t/Q, then center and reduce into the plaintext space.
        let d = Zeroizing::new(c.scale(&par.scaler)?);
        let v = Zeroizing::new(
            Vec::<u64>::from(d.as_ref())
                .iter_mut()
                .map(|vi| *vi + *par.plaintext)
                .collect_vec(),
        );
        let mut w = v[..par.degree()].to_vec();
        let q = Modulus::new(par.moduli[0]).map_err(Error::MathError)?;
        q.reduce_vec(&mut w);
        par.plaintext.reduce_vec(&mut w);

        Ok(Plaintext {
            par: par.clone(),
            value: w.into_boxed_slice(),
            encoding: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{BfvFlavor, SchemeFlavor};

    #[test]
    fn rotation_indices() {
        let flavor = BfvFlavor;
        assert_eq!(flavor.automorphism_index(1, 32).unwrap(), 5);
        assert_eq!(flavor.automorphism_index(2, 32).unwrap(), 25);
        assert_eq!(flavor.automorphism_index(3, 32).unwrap(), 29);

        // A negative rotation composes with its positive counterpart to the
        // identity automorphism.
        let fwd = flavor.automorphism_index(2, 2048).unwrap();
        let bwd = flavor.automorphism_index(-2, 2048).unwrap();
        assert_eq!(fwd * bwd % 2048, 1);

        assert!(flavor.automorphism_index(0, 32).is_err());
        assert!(flavor.automorphism_index(8, 32).is_err());
    }
}
