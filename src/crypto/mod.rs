// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core cryptographic algorithms and random number generator.
//!
//! Algorithms:
//! - X25519 ECDH
//! - Ed25519 (SHA512) DSA
//! - AES-256-CBC with PKCS#7 padding
//! - SHA256 HMAC and HKDF
//!
//! Random Number Generator:
//! - ChaCha20 stream cipher, seeded via `getrandom`
pub mod aes256;
pub mod base64;
pub mod ed25519;
pub mod kdf;
mod rng;
mod secret;
pub mod sha2;
pub mod x25519;

pub use rng::{Rng, RngError};
pub use secret::Secret;
