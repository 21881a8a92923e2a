#![crate_name = "fhe_multiparty"]
#![crate_type = "lib"]
#![warn(missing_docs, unused_imports)]

//! Threshold (multiparty) protocols for RLWE-based homomorphic encryption.
//!
//! Several mutually distrustful parties jointly hold a secret key whose
//! shares never leave their owners. The parties cooperatively produce a
//! joint public key, joint evaluation (relinearization, rotation, inner-sum)
//! keys, and — given a ciphertext encrypted under the joint key — decrypt it
//! cooperatively without any single party learning the shared secret.
//!
//! The polynomial arithmetic (double-CRT ring elements, NTT, RNS scaling,
//! samplers) is provided by the [`fhe_math`] crate; this crate contains the
//! protocol layer: key-generation chaining, algebraic aggregation of key
//! shares, and noise-flooded partial decryption.

mod errors;
pub use errors::{Error, ParametersError, Result};

mod ring;

pub mod bfv;
pub mod mbfv;
