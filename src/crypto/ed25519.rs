// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ed25519 digital signatures.
use std::fmt;

use ed25519_dalek::{Signer, Verifier};
use thiserror::Error;

pub const SIGNATURE_SIZE: usize = 64;

pub const PUBLIC_KEY_SIZE: usize = 32;

pub const SECRET_KEY_SIZE: usize = 32;

/// Ed25519 signing key pair, holding the 32 byte seed of the secret part.
///
/// Zeroes it's key material on drop.
#[derive(Clone)]
pub struct SigningKeyPair(ed25519_dalek::SigningKey);

impl SigningKeyPair {
    pub fn from_bytes(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&bytes))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; SECRET_KEY_SIZE] {
        self.0.as_bytes()
    }

    /// Returns the public counter-part of this key pair.
    pub fn public_key(&self) -> SigningPublicKey {
        SigningPublicKey(self.0.verifying_key())
    }

    /// Signs the message with our secret key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message))
    }
}

#[cfg(not(test))]
impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("value", &"***")
            .finish()
    }
}

#[cfg(test)]
impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SigningKeyPair")
            .field(&self.0.as_bytes())
            .finish()
    }
}

/// Ed25519 public key used to verify signatures.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SigningPublicKey(ed25519_dalek::VerifyingKey);

impl SigningPublicKey {
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_SIZE]) -> Result<Self, Ed25519Error> {
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|_| Ed25519Error::InvalidPublicKey)?;
        Ok(Self(verifying_key))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        self.0.as_bytes()
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Verifies their signature on provided message using their public key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), Ed25519Error> {
        self.0
            .verify(message, &signature.0)
            .map_err(|_| Ed25519Error::BadSignature)
    }
}

impl fmt::Display for SigningPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// 512-bit Ed25519 signature.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl Signature {
    pub fn from_bytes(bytes: &[u8; SIGNATURE_SIZE]) -> Self {
        Self(ed25519_dalek::Signature::from_bytes(bytes))
    }

    pub fn to_bytes(self) -> [u8; SIGNATURE_SIZE] {
        self.0.to_bytes()
    }
}

#[derive(Debug, Error)]
pub enum Ed25519Error {
    #[error("bytes do not form a valid ed25519 public key")]
    InvalidPublicKey,

    #[error("signature verification failed")]
    BadSignature,
}
