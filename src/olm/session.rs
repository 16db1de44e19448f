// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pairwise encrypted session, established through a triple Diffie-Hellman pre-key handshake.
//!
//! The side creating the session ("Alice") agrees on a shared secret from her identity key, a
//! fresh base key and the remote one-time key, and starts sending pre-key messages. The receiving
//! side ("Bob") reconstructs the same secret from the pre-key message and answers with normal
//! messages. Once a message from the remote side decrypted successfully the session is fully
//! established and pre-key framing is no longer used.
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroize;

use crate::crypto::sha2::{SHA256_DIGEST_SIZE, sha2_256};
use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::crypto::{Rng, RngError, Secret};
use crate::olm::account::Account;
use crate::olm::message::{decode_message, decode_prekey_message, encode_prekey_message};
use crate::olm::ratchet::{DoubleRatchet, RatchetError, TRIPLE_AGREEMENT_SIZE};
use crate::wire::DecodeError;

/// Unique identifier of a session, the SHA256 digest of the three handshake public keys.
///
/// Both sides of a session derive the same identifier.
pub type SessionId = [u8; SHA256_DIGEST_SIZE];

/// Kind of framing a session uses for it's messages.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageType {
    /// Handshake framing carrying the public keys needed to establish the inbound session.
    PreKey,

    /// Plain ratchet message framing.
    Normal,
}

/// An encrypted message together with it's framing kind.
///
/// The bytes are the raw binary frame; transports encode them as needed (usually base64).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OlmMessage {
    PreKey(Vec<u8>),
    Normal(Vec<u8>),
}

impl OlmMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            OlmMessage::PreKey(_) => MessageType::PreKey,
            OlmMessage::Normal(_) => MessageType::Normal,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            OlmMessage::PreKey(bytes) | OlmMessage::Normal(bytes) => bytes,
        }
    }

    /// Reassembles a message from it's framing kind and raw bytes.
    pub fn from_parts(message_type: MessageType, bytes: Vec<u8>) -> Self {
        match message_type {
            MessageType::PreKey => OlmMessage::PreKey(bytes),
            MessageType::Normal => OlmMessage::Normal(bytes),
        }
    }
}

/// Pairwise encrypted session.
#[derive(Clone, Debug)]
pub struct Session {
    received_message: bool,
    alice_identity_key: PublicKey,
    alice_base_key: PublicKey,
    bob_one_time_key: PublicKey,
    ratchet: DoubleRatchet,
}

/// Concatenates three X25519 agreements into the handshake secret.
fn triple_agreement(
    first: Secret<32>,
    second: Secret<32>,
    third: Secret<32>,
) -> Secret<TRIPLE_AGREEMENT_SIZE> {
    let mut bytes = [0u8; TRIPLE_AGREEMENT_SIZE];
    bytes[..32].copy_from_slice(first.expose());
    bytes[32..64].copy_from_slice(second.expose());
    bytes[64..].copy_from_slice(third.expose());
    let secret = Secret::from_bytes(bytes);
    bytes.zeroize();
    secret
}

impl Session {
    /// Creates a new outbound session towards the owner of the given identity and one-time key.
    pub fn new_outbound(
        account: &Account,
        their_identity_key: &PublicKey,
        their_one_time_key: &PublicKey,
        rng: &Rng,
    ) -> Result<Self, SessionError> {
        let base_key = SecretKey::from_bytes(rng.random_bytes()?);
        let ratchet_key = SecretKey::from_bytes(rng.random_bytes()?);

        let our_identity_key = account.diffie_hellman_key_pair();
        let shared_secret = triple_agreement(
            our_identity_key.calculate_agreement(their_one_time_key),
            base_key.calculate_agreement(their_identity_key),
            base_key.calculate_agreement(their_one_time_key),
        );

        debug!(
            their_identity_key = %their_identity_key,
            their_one_time_key = %their_one_time_key,
            base_key = %base_key.public_key(),
            "creating new outbound session"
        );

        Ok(Self {
            received_message: false,
            alice_identity_key: our_identity_key.public_key(),
            alice_base_key: base_key.public_key(),
            bob_one_time_key: *their_one_time_key,
            ratchet: DoubleRatchet::new_alice(&shared_secret, ratchet_key),
        })
    }

    /// Creates a new inbound session from a received pre-key message.
    ///
    /// When the remote identity key is already known it is checked against the key embedded in
    /// the message. The one-time key referenced by the message stays in the account; the caller
    /// decides when to retire it with [`Account::remove_one_time_key`].
    pub fn new_inbound(
        account: &Account,
        their_identity_key: Option<&PublicKey>,
        prekey_message: &[u8],
    ) -> Result<Self, SessionError> {
        let decoded = decode_prekey_message(prekey_message)?;

        let alice_identity_key = match (their_identity_key, decoded.identity_key) {
            (Some(expected), Some(embedded)) if *expected != embedded => {
                return Err(SessionError::MismatchedIdentityKey);
            }
            (Some(expected), _) => *expected,
            (None, Some(embedded)) => embedded,
            (None, None) => return Err(SessionError::MissingIdentityKey),
        };

        // The embedded message carries the remote ratchet key T(0).
        let inner = decode_message(decoded.message)?;

        let one_time_key = account
            .lookup_one_time_key(&decoded.one_time_key)
            .ok_or(SessionError::UnknownOneTimeKey)?;

        let our_identity_key = account.diffie_hellman_key_pair();
        let shared_secret = triple_agreement(
            one_time_key
                .secret_key()
                .calculate_agreement(&alice_identity_key),
            our_identity_key.calculate_agreement(&decoded.base_key),
            one_time_key
                .secret_key()
                .calculate_agreement(&decoded.base_key),
        );

        debug!(
            their_identity_key = %alice_identity_key,
            their_base_key = %decoded.base_key,
            our_one_time_key = %decoded.one_time_key,
            "creating new inbound session"
        );

        Ok(Self {
            received_message: false,
            alice_identity_key,
            alice_base_key: decoded.base_key,
            bob_one_time_key: decoded.one_time_key,
            ratchet: DoubleRatchet::new_bob(&shared_secret, inner.ratchet_key),
        })
    }

    /// Returns the session identifier, stable across the lifetime of the session and equal on
    /// both sides.
    pub fn session_id(&self) -> SessionId {
        sha2_256(&[
            self.alice_identity_key.as_bytes(),
            self.alice_base_key.as_bytes(),
            self.bob_one_time_key.as_bytes(),
        ])
    }

    /// Returns true once a message from the remote side has decrypted successfully.
    pub fn has_received_message(&self) -> bool {
        self.received_message
    }

    /// Framing the next [`Self::encrypt`] call will use.
    pub fn encrypt_message_type(&self) -> MessageType {
        if self.received_message {
            MessageType::Normal
        } else {
            MessageType::PreKey
        }
    }

    /// Returns true if the pre-key message was sent to establish exactly this session.
    ///
    /// Never mutates state. Undecodable messages simply don't match.
    pub fn matches_inbound_session(
        &self,
        their_identity_key: Option<&PublicKey>,
        prekey_message: &[u8],
    ) -> bool {
        let Ok(decoded) = decode_prekey_message(prekey_message) else {
            return false;
        };

        if their_identity_key.is_none() && decoded.identity_key.is_none() {
            return false;
        }
        let mut same = true;
        if let Some(embedded) = decoded.identity_key {
            same = same && embedded == self.alice_identity_key;
        }
        if let Some(expected) = their_identity_key {
            same = same && *expected == self.alice_identity_key;
        }
        same && decoded.base_key == self.alice_base_key
            && decoded.one_time_key == self.bob_one_time_key
    }

    /// Encrypts the plaintext, wrapping it in pre-key framing until the session is fully
    /// established.
    pub fn encrypt(&mut self, plaintext: &[u8], rng: &Rng) -> Result<OlmMessage, SessionError> {
        let message = self.ratchet.encrypt(plaintext, rng)?;

        if self.received_message {
            Ok(OlmMessage::Normal(message))
        } else {
            Ok(OlmMessage::PreKey(encode_prekey_message(
                &self.bob_one_time_key,
                &self.alice_base_key,
                &self.alice_identity_key,
                &message,
            )))
        }
    }

    /// Decrypts a message, unwrapping pre-key framing where present.
    ///
    /// The first success flips the session into the fully established state.
    pub fn decrypt(&mut self, message: &OlmMessage) -> Result<Vec<u8>, SessionError> {
        let body = match message {
            OlmMessage::Normal(bytes) => bytes.as_slice(),
            OlmMessage::PreKey(bytes) => decode_prekey_message(bytes)?.message,
        };

        let plaintext = self.ratchet.decrypt(body)?;
        self.received_message = true;
        Ok(plaintext)
    }

    pub(crate) fn ratchet(&self) -> &DoubleRatchet {
        &self.ratchet
    }

    pub(crate) fn handshake_keys(&self) -> (bool, PublicKey, PublicKey, PublicKey) {
        (
            self.received_message,
            self.alice_identity_key,
            self.alice_base_key,
            self.bob_one_time_key,
        )
    }

    pub(crate) fn from_parts(
        received_message: bool,
        alice_identity_key: PublicKey,
        alice_base_key: PublicKey,
        bob_one_time_key: PublicKey,
        ratchet: DoubleRatchet,
    ) -> Self {
        Self {
            received_message,
            alice_identity_key,
            alice_base_key,
            bob_one_time_key,
            ratchet,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Ratchet(#[from] RatchetError),

    #[error(transparent)]
    Rng(#[from] RngError),

    #[error("identity key in the pre-key message does not match the expected remote identity")]
    MismatchedIdentityKey,

    #[error("neither the pre-key message nor the caller provided a remote identity key")]
    MissingIdentityKey,

    #[error("one-time key in the pre-key message is not known to this account")]
    UnknownOneTimeKey,
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;
    use crate::crypto::x25519::PublicKey;
    use crate::olm::account::Account;

    use super::{MessageType, OlmMessage, Session, SessionError};

    fn session_pair(rng: &Rng) -> (Account, Account, Session) {
        let alice_account = Account::new(rng).unwrap();
        let mut bob_account = Account::new(rng).unwrap();
        bob_account.generate_one_time_keys(1, rng).unwrap();
        let one_time_key = bob_account.one_time_keys().next().unwrap().public_key();

        let session = Session::new_outbound(
            &alice_account,
            &bob_account.curve25519_key(),
            &one_time_key,
            rng,
        )
        .unwrap();
        (alice_account, bob_account, session)
    }

    #[test]
    fn handshake_agreement() {
        let rng = Rng::from_seed([1; 32]);
        let (alice_account, bob_account, mut alice_session) = session_pair(&rng);

        let message = alice_session.encrypt(b"hello bob", &rng).unwrap();
        let OlmMessage::PreKey(prekey_bytes) = &message else {
            panic!("first message must use pre-key framing");
        };

        let mut bob_session = Session::new_inbound(
            &bob_account,
            Some(&alice_account.curve25519_key()),
            prekey_bytes,
        )
        .unwrap();

        assert_eq!(alice_session.session_id(), bob_session.session_id());
        assert_eq!(bob_session.decrypt(&message).unwrap(), b"hello bob");
    }

    #[test]
    fn message_type_transitions_on_first_decrypt() {
        let rng = Rng::from_seed([2; 32]);
        let (_, bob_account, mut alice_session) = session_pair(&rng);

        assert_eq!(alice_session.encrypt_message_type(), MessageType::PreKey);

        let message = alice_session.encrypt(b"first", &rng).unwrap();
        let OlmMessage::PreKey(prekey_bytes) = &message else {
            panic!("first message must use pre-key framing");
        };
        let mut bob_session = Session::new_inbound(&bob_account, None, prekey_bytes).unwrap();
        bob_session.decrypt(&message).unwrap();

        // Until Alice hears back she keeps sending pre-key messages.
        let second = alice_session.encrypt(b"second", &rng).unwrap();
        assert_eq!(second.message_type(), MessageType::PreKey);
        bob_session.decrypt(&second).unwrap();

        let reply = bob_session.encrypt(b"got it", &rng).unwrap();
        assert_eq!(reply.message_type(), MessageType::Normal);
        assert_eq!(alice_session.decrypt(&reply).unwrap(), b"got it");

        // Now the handshake is complete on both sides.
        assert_eq!(alice_session.encrypt_message_type(), MessageType::Normal);
        assert!(alice_session.has_received_message());
    }

    #[test]
    fn matches_inbound_session() {
        let rng = Rng::from_seed([3; 32]);
        let (alice_account, bob_account, mut alice_session) = session_pair(&rng);

        let message = alice_session.encrypt(b"knock knock", &rng).unwrap();
        let OlmMessage::PreKey(prekey_bytes) = &message else {
            panic!("first message must use pre-key framing");
        };

        let bob_session = Session::new_inbound(&bob_account, None, prekey_bytes).unwrap();
        assert!(bob_session.matches_inbound_session(None, prekey_bytes));
        assert!(
            bob_session
                .matches_inbound_session(Some(&alice_account.curve25519_key()), prekey_bytes)
        );

        // A different identity key does not match.
        let wrong_key = PublicKey::from_bytes([9; 32]);
        assert!(!bob_session.matches_inbound_session(Some(&wrong_key), prekey_bytes));

        // Garbage does not match either.
        assert!(!bob_session.matches_inbound_session(None, b"not a message"));
    }

    #[test]
    fn unknown_one_time_key_is_rejected() {
        let rng = Rng::from_seed([4; 32]);
        let (_, mut bob_account, mut alice_session) = session_pair(&rng);

        let message = alice_session.encrypt(b"too late", &rng).unwrap();
        let OlmMessage::PreKey(prekey_bytes) = &message else {
            panic!("first message must use pre-key framing");
        };

        // Bob retired the one-time key before the message arrived.
        let one_time_key = bob_account.one_time_keys().next().unwrap().public_key();
        assert!(bob_account.remove_one_time_key(&one_time_key));

        assert!(matches!(
            Session::new_inbound(&bob_account, None, prekey_bytes),
            Err(SessionError::UnknownOneTimeKey)
        ));
    }

    #[test]
    fn mismatched_identity_key_is_rejected() {
        let rng = Rng::from_seed([5; 32]);
        let (_, bob_account, mut alice_session) = session_pair(&rng);

        let message = alice_session.encrypt(b"it's me", &rng).unwrap();
        let OlmMessage::PreKey(prekey_bytes) = &message else {
            panic!("first message must use pre-key framing");
        };

        let wrong_key = PublicKey::from_bytes([9; 32]);
        assert!(matches!(
            Session::new_inbound(&bob_account, Some(&wrong_key), prekey_bytes),
            Err(SessionError::MismatchedIdentityKey)
        ));
    }
}
