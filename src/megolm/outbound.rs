// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sending half of a group session.
use tracing::debug;
use zeroize::Zeroize;

use crate::crypto::Rng;
use crate::crypto::base64::base64_encode;
use crate::crypto::ed25519::SigningKeyPair;
use crate::megolm::message::{encode_group_message, encode_session_key};
use crate::megolm::ratchet::{Megolm, RATCHET_SIZE};
use crate::megolm::{GROUP_MESSAGE_CIPHER, GroupSessionError};

/// Outbound group session: a hash ratchet advanced once per message plus an Ed25519 key pair
/// signing every message sent with it.
///
/// The matching [`InboundGroupSession`](crate::megolm::InboundGroupSession) is created on the
/// receiving side from the [`session_key`](Self::session_key) export.
#[derive(Clone, Debug)]
pub struct OutboundGroupSession {
    ratchet: Megolm,
    signing_key_pair: SigningKeyPair,
}

impl OutboundGroupSession {
    /// Creates a new group session with a random ratchet seed and a fresh signing key pair.
    pub fn new(rng: &Rng) -> Result<Self, GroupSessionError> {
        let mut seed: [u8; RATCHET_SIZE] = rng.random_bytes()?;
        let ratchet = Megolm::new(&seed, 0);
        seed.zeroize();

        let session = Self {
            ratchet,
            signing_key_pair: SigningKeyPair::from_bytes(rng.random_bytes()?),
        };
        debug!(session_id = %session.session_id(), "created new outbound group session");
        Ok(session)
    }

    /// Identifier of this session, the base64-encoded public signing key.
    pub fn session_id(&self) -> String {
        base64_encode(self.signing_key_pair.public_key().as_bytes())
    }

    /// Index the next encrypted message will use.
    pub fn message_index(&self) -> u32 {
        self.ratchet.counter()
    }

    /// Exports the current ratchet state as a signed, base64-encoded session key.
    ///
    /// Receivers initialised from this export can decrypt every message from the current index
    /// onwards, but none before it.
    pub fn session_key(&self) -> String {
        let mut encoded = encode_session_key(
            self.ratchet.counter(),
            self.ratchet.data(),
            &self.signing_key_pair,
        );
        let session_key = base64_encode(&encoded);
        encoded.zeroize();
        session_key
    }

    /// Encrypts the plaintext into a signed, base64-encoded group message and advances the
    /// ratchet.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> String {
        let key = self.ratchet.data();

        let ciphertext = GROUP_MESSAGE_CIPHER.encrypt(key, plaintext);
        let mut message = encode_group_message(self.ratchet.counter(), &ciphertext);
        let mac = GROUP_MESSAGE_CIPHER.mac(key, &message);
        message.extend_from_slice(&mac);
        let signature = self.signing_key_pair.sign(&message);
        message.extend_from_slice(&signature.to_bytes());

        self.ratchet.advance();
        base64_encode(message)
    }

    pub(crate) fn ratchet(&self) -> &Megolm {
        &self.ratchet
    }

    pub(crate) fn signing_key_pair(&self) -> &SigningKeyPair {
        &self.signing_key_pair
    }

    pub(crate) fn from_parts(ratchet: Megolm, signing_key_pair: SigningKeyPair) -> Self {
        Self {
            ratchet,
            signing_key_pair,
        }
    }
}
