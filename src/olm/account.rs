// SPDX-License-Identifier: MIT OR Apache-2.0

//! Long-term identity of a single participant with it's supply of one-time keys.
use thiserror::Error;

use crate::crypto::ed25519::{Signature, SigningKeyPair, SigningPublicKey};
use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::crypto::{Rng, RngError};

/// Public identity keys of an account.
///
/// The Ed25519 key is the stable cryptographic identity (the "fingerprint") used for signing,
/// the X25519 key takes part in the triple Diffie-Hellman handshake.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IdentityKeys {
    pub ed25519: SigningPublicKey,
    pub curve25519: PublicKey,
}

/// A one-time key, used exactly once to establish an inbound session.
#[derive(Clone, Debug)]
pub struct OneTimeKey {
    id: u32,
    published: bool,
    key: SecretKey,
}

impl OneTimeKey {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_published(&self) -> bool {
        self.published
    }

    pub fn public_key(&self) -> PublicKey {
        self.key.public_key()
    }

    pub(crate) fn secret_key(&self) -> &SecretKey {
        &self.key
    }
}

/// An account holds the long-term identity key pairs of a single participant together with an
/// ordered supply of one-time keys.
///
/// One-time keys are generated in batches, published (uploaded wherever peers can discover them)
/// and looked up again by their public part when a pre-key message referencing them arrives. When
/// an inbound session was established from one of them the key should be removed so it can never
/// be used again.
#[derive(Clone, Debug)]
pub struct Account {
    signing_key_pair: SigningKeyPair,
    diffie_hellman_key_pair: SecretKey,
    one_time_keys: Vec<OneTimeKey>,
    next_one_time_key_id: u32,
}

impl Account {
    /// Creates a new account with fresh identity key pairs and no one-time keys.
    pub fn new(rng: &Rng) -> Result<Self, AccountError> {
        Ok(Self {
            signing_key_pair: SigningKeyPair::from_bytes(rng.random_bytes()?),
            diffie_hellman_key_pair: SecretKey::from_bytes(rng.random_bytes()?),
            one_time_keys: Vec::new(),
            next_one_time_key_id: 1,
        })
    }

    /// Returns the public identity keys of this account.
    pub fn identity_keys(&self) -> IdentityKeys {
        IdentityKeys {
            ed25519: self.signing_key_pair.public_key(),
            curve25519: self.diffie_hellman_key_pair.public_key(),
        }
    }

    /// Returns the X25519 identity public key.
    pub fn curve25519_key(&self) -> PublicKey {
        self.diffie_hellman_key_pair.public_key()
    }

    /// Returns the Ed25519 identity public key.
    pub fn ed25519_key(&self) -> SigningPublicKey {
        self.signing_key_pair.public_key()
    }

    /// Signs the message with the Ed25519 identity key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key_pair.sign(message)
    }

    /// Generates a batch of new one-time keys, to be published by the caller.
    pub fn generate_one_time_keys(&mut self, count: usize, rng: &Rng) -> Result<(), AccountError> {
        for _ in 0..count {
            let id = self.next_one_time_key_id;
            self.next_one_time_key_id = self.next_one_time_key_id.wrapping_add(1);
            self.one_time_keys.push(OneTimeKey {
                id,
                published: false,
                key: SecretKey::from_bytes(rng.random_bytes()?),
            });
        }
        Ok(())
    }

    /// All currently held one-time keys, oldest first.
    pub fn one_time_keys(&self) -> impl Iterator<Item = &OneTimeKey> {
        self.one_time_keys.iter()
    }

    /// One-time keys which have not been marked as published yet.
    pub fn unpublished_one_time_keys(&self) -> impl Iterator<Item = &OneTimeKey> {
        self.one_time_keys.iter().filter(|key| !key.published)
    }

    /// Marks all one-time keys as published.
    pub fn mark_one_time_keys_as_published(&mut self) {
        for key in &mut self.one_time_keys {
            key.published = true;
        }
    }

    /// Looks up the one-time key with the given public part.
    pub(crate) fn lookup_one_time_key(&self, public_key: &PublicKey) -> Option<&OneTimeKey> {
        self.one_time_keys
            .iter()
            .find(|key| key.key.public_key() == *public_key)
    }

    /// Removes the one-time key with the given public part, retiring it for good.
    ///
    /// Returns `true` if the key was known.
    pub fn remove_one_time_key(&mut self, public_key: &PublicKey) -> bool {
        let len_before = self.one_time_keys.len();
        self.one_time_keys
            .retain(|key| key.key.public_key() != *public_key);
        self.one_time_keys.len() != len_before
    }

    pub(crate) fn diffie_hellman_key_pair(&self) -> &SecretKey {
        &self.diffie_hellman_key_pair
    }

    pub(crate) fn signing_key_pair(&self) -> &SigningKeyPair {
        &self.signing_key_pair
    }

    pub(crate) fn next_one_time_key_id(&self) -> u32 {
        self.next_one_time_key_id
    }

    pub(crate) fn from_parts(
        signing_key_pair: SigningKeyPair,
        diffie_hellman_key_pair: SecretKey,
        one_time_keys: Vec<(u32, bool, SecretKey)>,
        next_one_time_key_id: u32,
    ) -> Self {
        Self {
            signing_key_pair,
            diffie_hellman_key_pair,
            one_time_keys: one_time_keys
                .into_iter()
                .map(|(id, published, key)| OneTimeKey {
                    id,
                    published,
                    key,
                })
                .collect(),
            next_one_time_key_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error(transparent)]
    Rng(#[from] RngError),
}
