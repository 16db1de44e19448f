// SPDX-License-Identifier: MIT OR Apache-2.0

//! Receiving half of a group session.
use tracing::debug;
use zeroize::Zeroize;

use crate::crypto::base64::{base64_decode, base64_encode};
use crate::crypto::ed25519::SigningPublicKey;
use crate::megolm::message::{
    decode_exported_session_key, decode_group_message, decode_session_key,
    encode_exported_session_key,
};
use crate::megolm::ratchet::Megolm;
use crate::megolm::{GROUP_MESSAGE_CIPHER, GroupSessionError};

/// A decrypted group message together with the ratchet index it was encrypted at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptedGroupMessage {
    pub plaintext: Vec<u8>,
    pub message_index: u32,
}

/// Inbound group session: decrypts messages of exactly one outbound session.
///
/// The session retains the earliest ratchet state it has seen next to the most recently used
/// one. Messages older than the initial state cannot be decrypted; messages at or past it are
/// reachable by advancing a copy of the nearest retained state.
#[derive(Clone, Debug)]
pub struct InboundGroupSession {
    initial_ratchet: Megolm,
    latest_ratchet: Megolm,
    signing_key: SigningPublicKey,
}

impl InboundGroupSession {
    /// Creates an inbound session from the signed session key exported by an outbound session.
    ///
    /// The embedded signature is verified against the embedded signing key.
    pub fn new(session_key: &str) -> Result<Self, GroupSessionError> {
        let mut bytes = base64_decode(session_key)?;
        let result = Self::from_session_key_bytes(&bytes, true);
        bytes.zeroize();
        result
    }

    /// Creates an inbound session from the unsigned export of another inbound session, taken at
    /// some index with [`Self::export_at`].
    pub fn import(exported_session_key: &str) -> Result<Self, GroupSessionError> {
        let mut bytes = base64_decode(exported_session_key)?;
        let result = Self::from_session_key_bytes(&bytes, false);
        bytes.zeroize();
        result
    }

    fn from_session_key_bytes(bytes: &[u8], signed: bool) -> Result<Self, GroupSessionError> {
        let decoded = if signed {
            let decoded = decode_session_key(bytes)?;
            let signing_key = SigningPublicKey::from_bytes(decoded.signing_key_bytes)?;
            let (signed_bytes, signature) = decoded
                .signature
                .as_ref()
                .expect("signed session key carries a signature");
            signing_key.verify(signed_bytes, signature)?;
            decoded
        } else {
            decode_exported_session_key(bytes)?
        };

        let signing_key = SigningPublicKey::from_bytes(decoded.signing_key_bytes)?;
        let ratchet = Megolm::new(decoded.ratchet_data, decoded.counter);

        debug!(
            session_id = %base64_encode(signing_key.as_bytes()),
            first_known_index = decoded.counter,
            "created new inbound group session"
        );

        Ok(Self {
            initial_ratchet: ratchet.clone(),
            latest_ratchet: ratchet,
            signing_key,
        })
    }

    /// Identifier of this session, the base64-encoded public signing key.
    ///
    /// Matches the identifier of the outbound session it was created from.
    pub fn session_id(&self) -> String {
        base64_encode(self.signing_key.as_bytes())
    }

    /// Earliest message index this session can decrypt.
    pub fn first_known_index(&self) -> u32 {
        self.initial_ratchet.counter()
    }

    /// Decrypts a base64-encoded group message.
    ///
    /// The Ed25519 signature is checked against the session's signing key before anything else;
    /// ratchet state only moves forward after the message fully authenticated.
    pub fn decrypt(&mut self, message: &str) -> Result<DecryptedGroupMessage, GroupSessionError> {
        let bytes = base64_decode(message)?;
        let decoded = decode_group_message(&bytes)?;

        self.signing_key
            .verify(decoded.signature_material, &decoded.signature)?;

        let message_index = decoded.message_index;
        let newer_than_latest =
            message_index.wrapping_sub(self.latest_ratchet.counter()) < 1 << 31;

        // Work on a copy of the nearest retained ratchet state; it is only committed once the
        // message authenticated.
        let mut ratchet = if newer_than_latest {
            self.latest_ratchet.clone()
        } else if message_index.wrapping_sub(self.initial_ratchet.counter()) >= 1 << 31 {
            return Err(GroupSessionError::UnknownMessageIndex {
                index: message_index,
                first_known_index: self.initial_ratchet.counter(),
            });
        } else {
            self.initial_ratchet.clone()
        };
        ratchet.advance_to(message_index)?;

        let plaintext = GROUP_MESSAGE_CIPHER.decrypt(
            ratchet.data(),
            decoded.mac_material,
            decoded.mac,
            decoded.ciphertext,
        )?;

        if newer_than_latest {
            self.latest_ratchet = ratchet;
        }

        Ok(DecryptedGroupMessage {
            plaintext,
            message_index,
        })
    }

    /// Exports the ratchet state at the given index as an unsigned, base64-encoded session key.
    ///
    /// Fails for indices before [`Self::first_known_index`].
    pub fn export_at(&self, index: u32) -> Result<String, GroupSessionError> {
        if index.wrapping_sub(self.initial_ratchet.counter()) >= 1 << 31 {
            return Err(GroupSessionError::UnknownMessageIndex {
                index,
                first_known_index: self.initial_ratchet.counter(),
            });
        }

        let mut ratchet = if index.wrapping_sub(self.latest_ratchet.counter()) < 1 << 31 {
            self.latest_ratchet.clone()
        } else {
            self.initial_ratchet.clone()
        };
        ratchet.advance_to(index)?;

        let mut encoded = encode_exported_session_key(index, ratchet.data(), &self.signing_key);
        let exported = base64_encode(&encoded);
        encoded.zeroize();
        Ok(exported)
    }

    pub(crate) fn ratchets(&self) -> (&Megolm, &Megolm) {
        (&self.initial_ratchet, &self.latest_ratchet)
    }

    pub(crate) fn signing_key(&self) -> &SigningPublicKey {
        &self.signing_key
    }

    pub(crate) fn from_parts(
        initial_ratchet: Megolm,
        latest_ratchet: Megolm,
        signing_key: SigningPublicKey,
    ) -> Self {
        Self {
            initial_ratchet,
            latest_ratchet,
            signing_key,
        }
    }
}
