//! Error types for the multiparty protocols.

use thiserror::Error;

/// The errors surfaced by the protocol layer.
///
/// Nothing is retried internally: every failure is returned to the caller,
/// and since all operations produce their results by value, no partial state
/// is ever committed on error.
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    /// An error in the underlying ring arithmetic or samplers.
    #[error("{0}")]
    MathError(fhe_math::Error),

    /// An input was rejected before the operation started.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Inputs were produced under different ring parameters or different
    /// shared randomness.
    #[error("Parameter mismatch: {0}")]
    ParameterMismatch(String),

    /// The operation's precondition does not hold for the given inputs.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// An automorphism index outside the unit group of the cyclotomic ring.
    #[error("Index out of range: {0}")]
    OutOfRange(String),

    /// A sampler collaborator failed.
    #[error("Sampling failure: {0}")]
    SamplingFailure(String),

    /// Too many values were provided.
    #[error("Too many values provided: {0} exceeds limit {1}")]
    TooManyValues(usize, usize),

    /// Too few values were provided.
    #[error("Too few values provided: {0} is below limit {1}")]
    TooFewValues(usize, usize),

    /// An error during parameter construction.
    #[error("Invalid parameters: {0}")]
    ParametersError(ParametersError),
}

impl From<fhe_math::Error> for Error {
    fn from(e: fhe_math::Error) -> Self {
        Error::MathError(e)
    }
}

/// Errors raised while building [`crate::bfv::BfvParameters`].
#[derive(Debug, Error, PartialEq)]
pub enum ParametersError {
    /// The degree is invalid.
    #[error("Invalid degree: {0} is not a power of two larger than 8")]
    InvalidDegree(usize),

    /// The plaintext modulus is invalid.
    #[error("Invalid plaintext modulus: {0}")]
    InvalidPlaintext(String),

    /// The modulus size is invalid.
    #[error("Invalid modulus size: {0}, expected an integer between {1} and {2}")]
    InvalidModulusSize(usize, usize, usize),

    /// Not enough primes of the requested size exist.
    #[error("Not enough primes of size {0} for degree {1}")]
    NotEnoughPrimes(usize, usize),

    /// Too many fields were specified.
    #[error("{0}")]
    TooManySpecified(String),

    /// Too few fields were specified.
    #[error("{0}")]
    TooFewSpecified(String),
}

/// The `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn error_strings() {
        assert_eq!(
            Error::ParameterMismatch("shared polynomials differ".to_string()).to_string(),
            "Parameter mismatch: shared polynomials differ"
        );
        assert_eq!(
            Error::TooFewValues(0, 1).to_string(),
            "Too few values provided: 0 is below limit 1"
        );
    }
}
