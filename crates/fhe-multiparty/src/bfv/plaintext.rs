//! Plaintext type and encodings.

use crate::bfv::BfvParameters;
use crate::{Error, Result};
use fhe_math::rq::{traits::TryConvertFrom, Poly, Representation};
use std::sync::Arc;
use zeroize::{Zeroize, Zeroizing};

/// An encoding for the plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// A vector of coefficients of the plaintext polynomial.
    Poly,
    /// A vector of values batched into the plaintext slots; element-wise
    /// operations and slot rotations apply to this encoding.
    Simd,
}

/// A plaintext value, possibly with a known encoding.
#[derive(Debug, Clone)]
pub struct Plaintext {
    /// The parameters of the scheme instance.
    pub(crate) par: Arc<BfvParameters>,
    /// The plaintext polynomial coefficients.
    pub(crate) value: Box<[u64]>,
    /// The encoding of the plaintext, if known.
    pub(crate) encoding: Option<Encoding>,
}

impl PartialEq for Plaintext {
    fn eq(&self, other: &Self) -> bool {
        self.par == other.par && self.value == other.value
    }
}

impl Eq for Plaintext {}

impl Zeroize for Plaintext {
    fn zeroize(&mut self) {
        self.value.zeroize();
    }
}

impl Plaintext {
    /// Encode a vector of values, reduced modulo the plaintext modulus.
    ///
    /// The vector may contain at most `degree` values; missing values encode
    /// as zero. The SIMD encoding requires a plaintext modulus supporting
    /// the negacyclic NTT at this degree.
    pub fn try_encode(
        value: &[u64],
        encoding: Encoding,
        par: &Arc<BfvParameters>,
    ) -> Result<Self> {
        if value.len() > par.degree() {
            return Err(Error::TooManyValues(value.len(), par.degree()));
        }

        let mut v = vec![0u64; par.degree()];
        v[..value.len()].copy_from_slice(value);
        par.plaintext.reduce_vec(&mut v);

        let w = match encoding {
            Encoding::Poly => v,
            Encoding::Simd => {
                if let Some(op) = par.op.as_ref() {
                    let mut w = vec![0u64; par.degree()];
                    for (i, vi) in v.iter().enumerate() {
                        w[par.matrix_reps_index_map[i]] = *vi;
                    }
                    op.backward(&mut w);
                    w
                } else {
                    return Err(Error::InvalidParameter(
                        "The plaintext modulus does not support the SIMD encoding".to_string(),
                    ));
                }
            }
        };

        Ok(Self {
            par: par.clone(),
            value: w.into_boxed_slice(),
            encoding: Some(encoding),
        })
    }

    /// The zero plaintext.
    pub fn zero(encoding: Encoding, par: &Arc<BfvParameters>) -> Result<Self> {
        Self::try_encode(&[], encoding, par)
    }

    /// Decode the plaintext under the given encoding.
    pub fn try_decode(&self, encoding: Encoding) -> Result<Vec<u64>> {
        if let Some(e) = self.encoding {
            if e != encoding {
                return Err(Error::PreconditionFailed(
                    "Mismatched encoding".to_string(),
                ));
            }
        }
        let mut w = self.value.to_vec();
        match encoding {
            Encoding::Poly => Ok(w),
            Encoding::Simd => {
                if let Some(op) = self.par.op.as_ref() {
                    op.forward(&mut w);
                    let mut v = vec![0u64; self.par.degree()];
                    for (i, vi) in v.iter_mut().enumerate() {
                        *vi = w[self.par.matrix_reps_index_map[i]];
                    }
                    Ok(v)
                } else {
                    Err(Error::InvalidParameter(
                        "The plaintext modulus does not support the SIMD encoding".to_string(),
                    ))
                }
            }
        }
    }

    /// The plaintext scaled into the ciphertext space: `Delta * m mod Q`,
    /// realized as `(-t)^{-1} * (Q mod t) * m` in the RNS basis.
    pub(crate) fn to_poly(&self) -> Poly {
        let mut m_v = Zeroizing::new(self.value.to_vec());
        self.par
            .plaintext
            .scalar_mul_vec(&mut m_v, self.par.q_mod_t);
        let mut m = Poly::try_convert_from(
            m_v.as_slice(),
            &self.par.ctx,
            false,
            Representation::PowerBasis,
        )
        .unwrap();
        m.change_representation(Representation::Ntt);
        m *= &self.par.delta;
        m
    }
}
