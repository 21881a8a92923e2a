//! The single-party surface of the scheme: parameters, plaintexts,
//! ciphertexts and the public-key encryption they support.
//!
//! The threshold protocols in [`crate::mbfv`] produce and consume these
//! types; individual key generation, homomorphic evaluation and the rest of
//! the single-party scheme are out of scope.

mod ciphertext;
mod parameters;
mod plaintext;
mod public_key;

pub use ciphertext::Ciphertext;
pub use parameters::{
    BfvParameters, BfvParametersBuilder, KeyDistribution, SPARSE_HAMMING_WEIGHT,
};
pub use plaintext::{Encoding, Plaintext};
pub use public_key::PublicKey;
