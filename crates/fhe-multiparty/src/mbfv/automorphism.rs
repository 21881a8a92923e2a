//! Threshold generation of automorphism, rotation and inner-sum keys.
//!
//! Each key enables the homomorphic evaluation of the ring automorphism
//! `x -> x^k` and is a key-switching key from the permuted secret to the
//! secret itself. The lead party generates a fresh-seed map that acts as the
//! template; every other party regenerates the same index set against the
//! template's seeds, and the per-index keys aggregate under
//! [`EvalKey::add`].
//!
//! Generation is independent across indices and runs on the rayon pool when
//! the index set is large enough to amortize the fork; a failure on any
//! index discards the whole map.

use crate::bfv::{BfvParameters, Ciphertext};
use crate::{Error, Result};
use fhe_math::rq::{Representation, SubstitutionExponent};
use rand::thread_rng;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use zeroize::Zeroizing;

use super::{Aggregate, EvalKey, SchemeFlavor, SecretShare};

/// Number of indices below which generation stays on the calling thread.
const PARALLEL_THRESHOLD: usize = 4;

/// How [`EvalKeyMap::add_with_policy`] treats indices present in only one of
/// the maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Keep only indices every contributor submitted; others are dropped
    /// (and logged). The default: a key missing any party's contribution
    /// cannot decrypt correctly and must not be trusted.
    Intersection,
    /// Keep unmatched indices as-is. Only sound when the caller knows the
    /// unmatched keys are already fully aggregated.
    Union,
}

/// A map from automorphism index to evaluation key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalKeyMap {
    pub(crate) par: Arc<BfvParameters>,
    pub(crate) map: HashMap<usize, EvalKey>,
}

impl EvalKeyMap {
    /// The key for an automorphism index, if present.
    pub fn get(&self, index: usize) -> Option<&EvalKey> {
        self.map.get(&index)
    }

    /// The automorphism indices present in the map, sorted.
    pub fn indices(&self) -> Vec<usize> {
        let mut v = self.map.keys().copied().collect::<Vec<_>>();
        v.sort_unstable();
        v
    }

    /// The number of keys in the map.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the map holds no key.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Sum two maps index-wise with the default intersection policy.
    pub fn add(&self, other: &EvalKeyMap) -> Result<EvalKeyMap> {
        self.add_with_policy(other, MergePolicy::Intersection)
    }

    /// Sum two maps index-wise under the given merge policy. Pure,
    /// commutative and associative for maps over the same index set.
    pub fn add_with_policy(&self, other: &EvalKeyMap, policy: MergePolicy) -> Result<EvalKeyMap> {
        if self.par != other.par {
            return Err(Error::ParameterMismatch(
                "The maps use different parameters".to_string(),
            ));
        }
        let mut map = HashMap::with_capacity(self.map.len());
        for (index, key) in &self.map {
            match other.map.get(index) {
                Some(other_key) => {
                    map.insert(*index, key.add(other_key)?);
                }
                None => match policy {
                    MergePolicy::Intersection => {
                        tracing::debug!(index, "dropping automorphism key missing a contribution")
                    }
                    MergePolicy::Union => {
                        map.insert(*index, key.clone());
                    }
                },
            }
        }
        if policy == MergePolicy::Union {
            for (index, key) in &other.map {
                map.entry(*index).or_insert_with(|| key.clone());
            }
        }
        Ok(EvalKeyMap {
            par: self.par.clone(),
            map,
        })
    }

    /// Homomorphically evaluate the automorphism `x -> x^index` on a
    /// two-element ciphertext, using the key stored under `index`.
    pub fn automorphism(&self, ct: &Ciphertext, index: usize) -> Result<Ciphertext> {
        if ct.c.len() != 2 {
            return Err(Error::PreconditionFailed(format!(
                "The automorphism expects a two-element ciphertext, got {}",
                ct.c.len()
            )));
        }
        let key = self.map.get(&index).ok_or_else(|| {
            Error::PreconditionFailed(format!("No key for automorphism index {index}"))
        })?;
        let element = SubstitutionExponent::new(&self.par.ctx, index)
            .map_err(|e| Error::OutOfRange(e.to_string()))?;

        let mut c1 = ct.c[1].substitute(&element)?;
        c1.change_representation(Representation::PowerBasis);
        let (mut d0, d1) = key.key_switch(&c1)?;
        d0 += &ct.c[0].substitute(&element)?;
        Ciphertext::new(vec![d0, d1], &self.par)
    }

    /// Rotate the plaintext slots by `steps` (positive rotates left within
    /// each row), using the flavor's rotation-to-automorphism mapping.
    pub fn rotate<F: SchemeFlavor>(
        &self,
        flavor: &F,
        ct: &Ciphertext,
        steps: i64,
    ) -> Result<Ciphertext> {
        let index = flavor.automorphism_index(steps, self.par.cyclotomic_order())?;
        self.automorphism(ct, index)
    }

    /// Sum the first `batch_size` slots of every row into each slot, by the
    /// baby-step/giant-step chain of power-of-five automorphisms.
    pub fn inner_sum(&self, ct: &Ciphertext) -> Result<Ciphertext> {
        let mut acc = ct.clone();
        for index in eval_sum_indices(&self.par) {
            let rotated = self.automorphism(&acc, index)?;
            acc = &acc + &rotated;
        }
        Ok(acc)
    }
}

impl Aggregate<EvalKeyMap> for EvalKeyMap {
    fn from_shares<T>(iter: T) -> Result<Self>
    where
        T: IntoIterator<Item = EvalKeyMap>,
    {
        let mut maps = iter.into_iter();
        let mut sum = maps.next().ok_or(Error::TooFewValues(0, 1))?;
        for map in maps {
            sum = sum.add(&map)?;
        }
        Ok(sum)
    }
}

fn validate_indices(par: &Arc<BfvParameters>, indices: &[usize]) -> Result<()> {
    if indices.len() > par.degree() - 1 {
        return Err(Error::TooManyValues(indices.len(), par.degree() - 1));
    }
    let m = par.cyclotomic_order();
    for index in indices {
        if *index % 2 == 0 || *index >= m {
            return Err(Error::OutOfRange(format!(
                "The automorphism index {index} is not an odd integer below {m}"
            )));
        }
    }
    Ok(())
}

/// Generate the key for one automorphism index: a key switch from the
/// permuted secret to the secret, against the template's shared randomness
/// when one is given.
fn keygen_one(
    sk: &SecretShare,
    index: usize,
    template: Option<&EvalKey>,
) -> Result<(usize, EvalKey)> {
    let element = SubstitutionExponent::new(&sk.par.ctx, index)
        .map_err(|e| Error::OutOfRange(e.to_string()))?;
    let mut s_permuted = Zeroizing::new(sk.as_poly().substitute(&element)?);
    s_permuted.change_representation(Representation::PowerBasis);

    // Randomness is seeded per task and never shared across threads.
    let mut rng = thread_rng();
    let key = match template {
        Some(template) => EvalKey::multi_keyswitch_gen(sk, &s_permuted, template, &mut rng)?,
        None => EvalKey::keyswitch_gen(sk, &s_permuted, &mut rng)?,
    };
    Ok((index, key))
}

fn keygen_map(
    sk: &SecretShare,
    indices: &[usize],
    template: Option<&EvalKeyMap>,
) -> Result<EvalKeyMap> {
    validate_indices(&sk.par, indices)?;

    let task = |index: &usize| -> Result<(usize, EvalKey)> {
        let template_key = match template {
            Some(map) => Some(map.map.get(index).ok_or_else(|| {
                Error::PreconditionFailed(format!(
                    "The template is missing automorphism index {index}"
                ))
            })?),
            None => None,
        };
        keygen_one(sk, *index, template_key)
    };

    // Collecting into a Result makes the map all-or-nothing: a failed index
    // discards every other task's output.
    let entries: Result<Vec<(usize, EvalKey)>> = if indices.len() >= PARALLEL_THRESHOLD {
        indices.par_iter().map(task).collect()
    } else {
        indices.iter().map(task).collect()
    };

    Ok(EvalKeyMap {
        par: sk.par.clone(),
        map: entries?.into_iter().collect(),
    })
}

/// Generate a fresh-randomness automorphism key map for the given indices.
/// The result is this party's contribution and the template for every other
/// party's [`multi_eval_automorphism_keygen`].
pub fn eval_automorphism_keygen(sk: &SecretShare, indices: &[usize]) -> Result<EvalKeyMap> {
    keygen_map(sk, indices, None)
}

/// Generate a party's automorphism key map against the template map, so
/// that the per-index keys aggregate across parties.
///
/// Fails if the template is missing one of the requested indices.
pub fn multi_eval_automorphism_keygen(
    sk: &SecretShare,
    template: &EvalKeyMap,
    indices: &[usize],
) -> Result<EvalKeyMap> {
    if sk.par != template.par {
        return Err(Error::ParameterMismatch(
            "The share and the template use different parameters".to_string(),
        ));
    }
    keygen_map(sk, indices, Some(template))
}

fn rotation_indices<F: SchemeFlavor>(
    flavor: &F,
    par: &Arc<BfvParameters>,
    rotations: &[i64],
) -> Result<Vec<usize>> {
    rotations
        .iter()
        .map(|r| flavor.automorphism_index(*r, par.cyclotomic_order()))
        .collect()
}

/// Generate a fresh-randomness rotation key map for the given signed slot
/// rotations.
pub fn eval_at_index_keygen<F: SchemeFlavor>(
    flavor: &F,
    sk: &SecretShare,
    rotations: &[i64],
) -> Result<EvalKeyMap> {
    let indices = rotation_indices(flavor, &sk.par, rotations)?;
    eval_automorphism_keygen(sk, &indices)
}

/// Generate a party's rotation key map against the template map.
pub fn multi_eval_at_index_keygen<F: SchemeFlavor>(
    flavor: &F,
    sk: &SecretShare,
    template: &EvalKeyMap,
    rotations: &[i64],
) -> Result<EvalKeyMap> {
    let indices = rotation_indices(flavor, &sk.par, rotations)?;
    multi_eval_automorphism_keygen(sk, template, &indices)
}

/// The automorphism indices `5^(2^j) mod M` for `j = 0..ceil(log2(batch))`,
/// the power-of-five chain the inner sum is evaluated along.
pub fn eval_sum_indices(par: &Arc<BfvParameters>) -> Vec<usize> {
    let m = par.cyclotomic_order();
    let rounds = par.batch_size().ilog2() as usize;
    let mut indices = Vec::with_capacity(rounds);
    let mut g = 5usize;
    for _ in 0..rounds {
        indices.push(g);
        g = g * g % m;
    }
    indices
}

/// Generate a fresh-randomness inner-sum key map covering the batch size.
pub fn eval_sum_keygen(sk: &SecretShare) -> Result<EvalKeyMap> {
    eval_automorphism_keygen(sk, &eval_sum_indices(&sk.par))
}

/// Generate a party's inner-sum key map against the template map.
pub fn multi_eval_sum_keygen(sk: &SecretShare, template: &EvalKeyMap) -> Result<EvalKeyMap> {
    multi_eval_automorphism_keygen(sk, template, &eval_sum_indices(&sk.par))
}
