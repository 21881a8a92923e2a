//! Ciphertext type.

use crate::bfv::BfvParameters;
use crate::{Error, Result};
use fhe_math::rq::{Poly, Representation};
use std::ops::Add;
use std::sync::Arc;

/// A ciphertext encrypting a plaintext.
///
/// A fresh encryption has exactly two elements; homomorphic multiplication
/// (out of scope here) temporarily produces a third one, which
/// relinearization collapses back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ciphertext {
    /// The parameters of the scheme instance.
    pub(crate) par: Arc<BfvParameters>,

    /// The ciphertext elements, in NTT representation.
    pub c: Vec<Poly>,
}

impl Ciphertext {
    /// Create a ciphertext from a vector of polynomials. All polynomials
    /// must be in NTT representation over the ciphertext context.
    pub fn new(c: Vec<Poly>, par: &Arc<BfvParameters>) -> Result<Self> {
        if c.len() < 2 {
            return Err(Error::TooFewValues(c.len(), 2));
        }
        for ci in c.iter() {
            if ci.representation() != &Representation::Ntt {
                return Err(Error::MathError(fhe_math::Error::IncorrectRepresentation(
                    ci.representation().clone(),
                    Representation::Ntt,
                )));
            }
            if ci.ctx() != &par.ctx {
                return Err(Error::MathError(fhe_math::Error::InvalidContext));
            }
        }
        Ok(Self {
            par: par.clone(),
            c,
        })
    }

    /// Get the i-th polynomial of the ciphertext.
    pub fn get(&self, i: usize) -> Option<&Poly> {
        self.c.get(i)
    }

    /// The number of polynomials in the ciphertext.
    pub fn len(&self) -> usize {
        self.c.len()
    }

    /// Whether the ciphertext holds no polynomial.
    pub fn is_empty(&self) -> bool {
        self.c.is_empty()
    }
}

impl Add<&Ciphertext> for &Ciphertext {
    type Output = Ciphertext;

    fn add(self, rhs: &Ciphertext) -> Ciphertext {
        assert_eq!(self.par, rhs.par);
        assert_eq!(self.c.len(), rhs.c.len());
        Ciphertext {
            par: self.par.clone(),
            c: self
                .c
                .iter()
                .zip(rhs.c.iter())
                .map(|(a, b)| a + b)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Ciphertext;
    use crate::bfv::BfvParameters;
    use fhe_math::rq::{Poly, Representation};
    use rand::thread_rng;

    #[test]
    fn new_checks_arity_and_representation() {
        let mut rng = thread_rng();
        let par = BfvParameters::default_arc(2, 8);
        let p0 = Poly::random(&par.ctx, Representation::Ntt, &mut rng);
        let p1 = Poly::random(&par.ctx, Representation::Ntt, &mut rng);

        assert!(Ciphertext::new(vec![p0.clone()], &par).is_err());
        assert!(Ciphertext::new(vec![p0.clone(), p1.clone()], &par).is_ok());

        let mut coeff = p1.clone();
        coeff.change_representation(Representation::PowerBasis);
        assert!(Ciphertext::new(vec![p0, coeff], &par).is_err());
    }
}
