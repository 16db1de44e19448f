// SPDX-License-Identifier: MIT OR Apache-2.0

//! Encrypted, versioned serialisation ("pickling") of account and session state.
//!
//! Pickles use a fixed, order-sensitive byte layout: big-endian integers of fixed width, one
//! byte booleans, raw fixed-length arrays and `u32`-count-prefixed lists, concatenated in the
//! declared field order with a `u32` version in front. The raw bytes are wrapped in an
//! authenticated, encrypted container keyed by a caller-supplied passphrase and transported as
//! unpadded base64.
use std::collections::VecDeque;

use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroize;

use crate::crypto::Secret;
use crate::crypto::aes256::{aes256_cbc_decrypt, aes256_cbc_encrypt};
use crate::crypto::base64::{Base64DecodeError, base64_decode, base64_encode};
use crate::crypto::ed25519::{SigningKeyPair, SigningPublicKey};
use crate::crypto::kdf::{hkdf_sha256, hmac_sha256};
use crate::crypto::sha2::SHA256_DIGEST_SIZE;
use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::megolm::ratchet::{Megolm, RATCHET_SIZE};
use crate::megolm::{InboundGroupSession, OutboundGroupSession};
use crate::olm::account::Account;
use crate::olm::ratchet::{
    ChainKey, DoubleRatchet, MAX_RECEIVER_CHAINS, MAX_SKIPPED_MESSAGE_KEYS, MessageKey,
    ReceiverChain, SenderChain, SkippedMessageKey,
};
use crate::olm::session::Session;

const PICKLE_KDF_INFO: &[u8] = b"Pickle";

const ACCOUNT_PICKLE_VERSION: u32 = 1;
const SESSION_PICKLE_VERSION: u32 = 1;
const INBOUND_GROUP_PICKLE_VERSION: u32 = 1;
const OUTBOUND_GROUP_PICKLE_VERSION: u32 = 1;

/// Builder for the raw pickle byte layout.
struct PickleEncoder {
    buf: Vec<u8>,
}

impl PickleEncoder {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over the raw pickle byte layout.
struct PickleDecoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> PickleDecoder<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read_slice(&mut self, length: usize) -> Result<&'a [u8], PickleError> {
        let end = self
            .pos
            .checked_add(length)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(PickleError::Corrupted)?;
        let bytes = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u32(&mut self) -> Result<u32, PickleError> {
        let bytes = self.read_slice(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().expect("u32 size")))
    }

    fn read_bool(&mut self) -> Result<bool, PickleError> {
        Ok(self.read_slice(1)?[0] != 0)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], PickleError> {
        Ok(self.read_slice(N)?.try_into().expect("array size"))
    }

    /// All bytes must be consumed by the expected structure.
    fn finish(&self) -> Result<(), PickleError> {
        if self.pos == self.bytes.len() {
            Ok(())
        } else {
            Err(PickleError::Corrupted)
        }
    }
}

/// Encrypts raw pickle bytes into the base64-encoded container.
///
/// The raw buffer is zeroed before returning.
fn encrypt_pickle(key: &[u8], mut raw: Vec<u8>) -> String {
    let salt = [0u8; SHA256_DIGEST_SIZE];
    let mut expanded = [0u8; 80];
    hkdf_sha256(&salt, key, PICKLE_KDF_INFO, &mut expanded);
    let aes_key: [u8; 32] = expanded[..32].try_into().expect("aes key size");
    let mac_key: [u8; 32] = expanded[32..64].try_into().expect("mac key size");
    let iv: [u8; 16] = expanded[64..].try_into().expect("iv size");

    let mut ciphertext = aes256_cbc_encrypt(&aes_key, &iv, &raw);
    raw.zeroize();

    let mac = hmac_sha256(&mac_key, &ciphertext);
    ciphertext.extend_from_slice(&mac);
    expanded.zeroize();

    base64_encode(ciphertext)
}

/// Decrypts the base64-encoded container back into raw pickle bytes, verifying the MAC in
/// constant time.
fn decrypt_pickle(key: &[u8], pickled: &str) -> Result<Vec<u8>, PickleError> {
    let bytes = base64_decode(pickled)?;
    if bytes.len() < SHA256_DIGEST_SIZE {
        return Err(PickleError::Corrupted);
    }
    let (ciphertext, mac) = bytes.split_at(bytes.len() - SHA256_DIGEST_SIZE);

    let salt = [0u8; SHA256_DIGEST_SIZE];
    let mut expanded = [0u8; 80];
    hkdf_sha256(&salt, key, PICKLE_KDF_INFO, &mut expanded);
    let aes_key: [u8; 32] = expanded[..32].try_into().expect("aes key size");
    let mac_key: [u8; 32] = expanded[32..64].try_into().expect("mac key size");
    let iv: [u8; 16] = expanded[64..].try_into().expect("iv size");

    let mut expected = hmac_sha256(&mac_key, ciphertext);
    let matches = bool::from(expected[..].ct_eq(mac));
    expected.zeroize();
    let result = if !matches {
        Err(PickleError::BadPickleKey)
    } else {
        aes256_cbc_decrypt(&aes_key, &iv, ciphertext).map_err(|_| PickleError::Corrupted)
    };
    expanded.zeroize();
    result
}

fn pickle_chain_key(enc: &mut PickleEncoder, chain_key: &ChainKey) {
    enc.write_u32(chain_key.index);
    enc.write_bytes(chain_key.key.expose());
}

fn unpickle_chain_key(dec: &mut PickleDecoder<'_>) -> Result<ChainKey, PickleError> {
    Ok(ChainKey {
        index: dec.read_u32()?,
        key: Secret::from_bytes(dec.read_array()?),
    })
}

fn pickle_ratchet(enc: &mut PickleEncoder, ratchet: &DoubleRatchet) {
    enc.write_bytes(ratchet.root_key.expose());

    match &ratchet.sender_chain {
        Some(chain) => {
            enc.write_u32(1);
            enc.write_bytes(chain.ratchet_key.public_key().as_bytes());
            enc.write_bytes(chain.ratchet_key.as_bytes());
            pickle_chain_key(enc, &chain.chain_key);
        }
        None => enc.write_u32(0),
    }

    enc.write_u32(ratchet.receiver_chains.len() as u32);
    for chain in &ratchet.receiver_chains {
        enc.write_bytes(chain.ratchet_key.as_bytes());
        pickle_chain_key(enc, &chain.chain_key);
    }

    enc.write_u32(ratchet.skipped_message_keys.len() as u32);
    for skipped in &ratchet.skipped_message_keys {
        enc.write_bytes(skipped.ratchet_key.as_bytes());
        enc.write_u32(skipped.message_key.index);
        enc.write_bytes(skipped.message_key.key.expose());
    }
}

fn unpickle_ratchet(dec: &mut PickleDecoder<'_>) -> Result<DoubleRatchet, PickleError> {
    let root_key = Secret::from_bytes(dec.read_array()?);

    let sender_chain = match dec.read_u32()? {
        0 => None,
        1 => {
            // The public part is stored for layout stability but re-derived from the secret.
            let _public: [u8; 32] = dec.read_array()?;
            let ratchet_key = SecretKey::from_bytes(dec.read_array()?);
            let chain_key = unpickle_chain_key(dec)?;
            Some(SenderChain {
                ratchet_key,
                chain_key,
            })
        }
        _ => return Err(PickleError::Corrupted),
    };

    let receiver_count = dec.read_u32()? as usize;
    if receiver_count > MAX_RECEIVER_CHAINS {
        return Err(PickleError::Corrupted);
    }
    let mut receiver_chains = VecDeque::with_capacity(receiver_count);
    for _ in 0..receiver_count {
        receiver_chains.push_back(ReceiverChain {
            ratchet_key: PublicKey::from_bytes(dec.read_array()?),
            chain_key: unpickle_chain_key(dec)?,
        });
    }

    let skipped_count = dec.read_u32()? as usize;
    if skipped_count > MAX_SKIPPED_MESSAGE_KEYS {
        return Err(PickleError::Corrupted);
    }
    let mut skipped_message_keys = VecDeque::with_capacity(skipped_count);
    for _ in 0..skipped_count {
        skipped_message_keys.push_back(SkippedMessageKey {
            ratchet_key: PublicKey::from_bytes(dec.read_array()?),
            message_key: MessageKey {
                index: dec.read_u32()?,
                key: Secret::from_bytes(dec.read_array()?),
            },
        });
    }

    Ok(DoubleRatchet {
        root_key,
        sender_chain,
        receiver_chains,
        skipped_message_keys,
    })
}

fn pickle_megolm(enc: &mut PickleEncoder, megolm: &Megolm) {
    enc.write_bytes(megolm.data());
    enc.write_u32(megolm.counter());
}

fn unpickle_megolm(dec: &mut PickleDecoder<'_>) -> Result<Megolm, PickleError> {
    let mut data: [u8; RATCHET_SIZE] = dec.read_array()?;
    let counter = dec.read_u32()?;
    let megolm = Megolm::new(&data, counter);
    data.zeroize();
    Ok(megolm)
}

impl Session {
    /// Serialises the session into an encrypted pickle.
    pub fn pickle(&self, key: &[u8]) -> String {
        let mut enc = PickleEncoder::new();
        enc.write_u32(SESSION_PICKLE_VERSION);
        let (received_message, alice_identity_key, alice_base_key, bob_one_time_key) =
            self.handshake_keys();
        enc.write_bool(received_message);
        enc.write_bytes(alice_identity_key.as_bytes());
        enc.write_bytes(alice_base_key.as_bytes());
        enc.write_bytes(bob_one_time_key.as_bytes());
        pickle_ratchet(&mut enc, self.ratchet());
        encrypt_pickle(key, enc.into_bytes())
    }

    /// Restores a session from an encrypted pickle.
    pub fn from_pickle(pickled: &str, key: &[u8]) -> Result<Self, PickleError> {
        let mut raw = decrypt_pickle(key, pickled)?;
        let result = (|| {
            let mut dec = PickleDecoder::new(&raw);
            let version = dec.read_u32()?;
            if version != SESSION_PICKLE_VERSION {
                return Err(PickleError::UnknownVersion(version));
            }
            let received_message = dec.read_bool()?;
            let alice_identity_key = PublicKey::from_bytes(dec.read_array()?);
            let alice_base_key = PublicKey::from_bytes(dec.read_array()?);
            let bob_one_time_key = PublicKey::from_bytes(dec.read_array()?);
            let ratchet = unpickle_ratchet(&mut dec)?;
            dec.finish()?;
            Ok(Session::from_parts(
                received_message,
                alice_identity_key,
                alice_base_key,
                bob_one_time_key,
                ratchet,
            ))
        })();
        raw.zeroize();
        result
    }
}

impl Account {
    /// Serialises the account into an encrypted pickle.
    pub fn pickle(&self, key: &[u8]) -> String {
        let mut enc = PickleEncoder::new();
        enc.write_u32(ACCOUNT_PICKLE_VERSION);
        enc.write_bytes(self.signing_key_pair().as_bytes());
        enc.write_bytes(self.diffie_hellman_key_pair().as_bytes());
        let one_time_keys: Vec<_> = self.one_time_keys().collect();
        enc.write_u32(one_time_keys.len() as u32);
        for one_time_key in one_time_keys {
            enc.write_u32(one_time_key.id());
            enc.write_bool(one_time_key.is_published());
            enc.write_bytes(one_time_key.secret_key().as_bytes());
        }
        enc.write_u32(self.next_one_time_key_id());
        encrypt_pickle(key, enc.into_bytes())
    }

    /// Restores an account from an encrypted pickle.
    pub fn from_pickle(pickled: &str, key: &[u8]) -> Result<Self, PickleError> {
        let mut raw = decrypt_pickle(key, pickled)?;
        let result = (|| {
            let mut dec = PickleDecoder::new(&raw);
            let version = dec.read_u32()?;
            if version != ACCOUNT_PICKLE_VERSION {
                return Err(PickleError::UnknownVersion(version));
            }
            let signing_key_pair = SigningKeyPair::from_bytes(dec.read_array()?);
            let diffie_hellman_key_pair = SecretKey::from_bytes(dec.read_array()?);
            let count = dec.read_u32()?;
            let mut one_time_keys = Vec::new();
            for _ in 0..count {
                let id = dec.read_u32()?;
                let published = dec.read_bool()?;
                let key = SecretKey::from_bytes(dec.read_array()?);
                one_time_keys.push((id, published, key));
            }
            let next_one_time_key_id = dec.read_u32()?;
            dec.finish()?;
            Ok(Account::from_parts(
                signing_key_pair,
                diffie_hellman_key_pair,
                one_time_keys,
                next_one_time_key_id,
            ))
        })();
        raw.zeroize();
        result
    }
}

impl InboundGroupSession {
    /// Serialises the session into an encrypted pickle.
    pub fn pickle(&self, key: &[u8]) -> String {
        let mut enc = PickleEncoder::new();
        enc.write_u32(INBOUND_GROUP_PICKLE_VERSION);
        let (initial_ratchet, latest_ratchet) = self.ratchets();
        pickle_megolm(&mut enc, initial_ratchet);
        pickle_megolm(&mut enc, latest_ratchet);
        enc.write_bytes(self.signing_key().as_bytes());
        encrypt_pickle(key, enc.into_bytes())
    }

    /// Restores a session from an encrypted pickle.
    pub fn from_pickle(pickled: &str, key: &[u8]) -> Result<Self, PickleError> {
        let mut raw = decrypt_pickle(key, pickled)?;
        let result = (|| {
            let mut dec = PickleDecoder::new(&raw);
            let version = dec.read_u32()?;
            if version != INBOUND_GROUP_PICKLE_VERSION {
                return Err(PickleError::UnknownVersion(version));
            }
            let initial_ratchet = unpickle_megolm(&mut dec)?;
            let latest_ratchet = unpickle_megolm(&mut dec)?;
            let signing_key = SigningPublicKey::from_bytes(&dec.read_array()?)
                .map_err(|_| PickleError::Corrupted)?;
            dec.finish()?;
            Ok(InboundGroupSession::from_parts(
                initial_ratchet,
                latest_ratchet,
                signing_key,
            ))
        })();
        raw.zeroize();
        result
    }
}

impl OutboundGroupSession {
    /// Serialises the session into an encrypted pickle.
    pub fn pickle(&self, key: &[u8]) -> String {
        let mut enc = PickleEncoder::new();
        enc.write_u32(OUTBOUND_GROUP_PICKLE_VERSION);
        pickle_megolm(&mut enc, self.ratchet());
        enc.write_bytes(self.signing_key_pair().as_bytes());
        encrypt_pickle(key, enc.into_bytes())
    }

    /// Restores a session from an encrypted pickle.
    pub fn from_pickle(pickled: &str, key: &[u8]) -> Result<Self, PickleError> {
        let mut raw = decrypt_pickle(key, pickled)?;
        let result = (|| {
            let mut dec = PickleDecoder::new(&raw);
            let version = dec.read_u32()?;
            if version != OUTBOUND_GROUP_PICKLE_VERSION {
                return Err(PickleError::UnknownVersion(version));
            }
            let ratchet = unpickle_megolm(&mut dec)?;
            let signing_key_pair = SigningKeyPair::from_bytes(dec.read_array()?);
            dec.finish()?;
            Ok(OutboundGroupSession::from_parts(ratchet, signing_key_pair))
        })();
        raw.zeroize();
        result
    }
}

#[derive(Debug, Error)]
pub enum PickleError {
    #[error(transparent)]
    Base64(#[from] Base64DecodeError),

    #[error("pickle MAC verification failed, wrong pickle key")]
    BadPickleKey,

    #[error("unknown pickle version {0}")]
    UnknownVersion(u32),

    #[error("pickle is corrupted or truncated")]
    Corrupted,
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;
    use crate::megolm::{InboundGroupSession, OutboundGroupSession};
    use crate::olm::account::Account;
    use crate::olm::session::{OlmMessage, Session};

    use super::PickleError;

    const PICKLE_KEY: &[u8] = b"it's a secret to everybody";

    fn established_session_pair(rng: &Rng) -> (Session, Session) {
        let alice_account = Account::new(rng).unwrap();
        let mut bob_account = Account::new(rng).unwrap();
        bob_account.generate_one_time_keys(1, rng).unwrap();
        let one_time_key = bob_account.one_time_keys().next().unwrap().public_key();

        let mut alice = Session::new_outbound(
            &alice_account,
            &bob_account.curve25519_key(),
            &one_time_key,
            rng,
        )
        .unwrap();

        let message = alice.encrypt(b"handshake", rng).unwrap();
        let OlmMessage::PreKey(prekey_bytes) = &message else {
            panic!("first message must use pre-key framing");
        };
        let mut bob = Session::new_inbound(&bob_account, None, prekey_bytes).unwrap();
        bob.decrypt(&message).unwrap();

        (alice, bob)
    }

    #[test]
    fn session_pickle_round_trip() {
        let rng = Rng::from_seed([1; 32]);
        let (mut alice, bob) = established_session_pair(&rng);

        let restored = Session::from_pickle(&bob.pickle(PICKLE_KEY), PICKLE_KEY).unwrap();
        assert_eq!(restored.session_id(), bob.session_id());
        assert_eq!(restored.has_received_message(), bob.has_received_message());

        // The restored session behaves byte-identically to the original.
        let mut bob = bob;
        let mut restored = restored;
        let rng_1 = Rng::from_seed([7; 32]);
        let rng_2 = Rng::from_seed([7; 32]);
        assert_eq!(
            bob.encrypt(b"deterministic", &rng_1).unwrap(),
            restored.encrypt(b"deterministic", &rng_2).unwrap()
        );

        // And can keep talking to the peer.
        let message = restored.encrypt(b"rise and shine", &rng_1).unwrap();
        assert_eq!(alice.decrypt(&message).unwrap(), b"rise and shine");
    }

    #[test]
    fn session_pickle_preserves_skipped_keys() {
        let rng = Rng::from_seed([2; 32]);
        let (mut alice, mut bob) = established_session_pair(&rng);

        let skipped = alice.encrypt(b"skipped", &rng).unwrap();
        let later = alice.encrypt(b"later", &rng).unwrap();
        assert_eq!(bob.decrypt(&later).unwrap(), b"later");

        // The key for the undelivered message survives the pickle round trip.
        let mut restored = Session::from_pickle(&bob.pickle(PICKLE_KEY), PICKLE_KEY).unwrap();
        assert_eq!(restored.decrypt(&skipped).unwrap(), b"skipped");
    }

    #[test]
    fn account_pickle_round_trip() {
        let rng = Rng::from_seed([3; 32]);
        let mut account = Account::new(&rng).unwrap();
        account.generate_one_time_keys(3, &rng).unwrap();
        account.mark_one_time_keys_as_published();
        account.generate_one_time_keys(1, &rng).unwrap();

        let restored = Account::from_pickle(&account.pickle(PICKLE_KEY), PICKLE_KEY).unwrap();
        assert_eq!(restored.identity_keys(), account.identity_keys());
        assert_eq!(
            restored.one_time_keys().count(),
            account.one_time_keys().count()
        );
        assert_eq!(
            restored.unpublished_one_time_keys().count(),
            account.unpublished_one_time_keys().count()
        );

        let signature = account.sign(b"stable identity");
        assert!(
            restored
                .ed25519_key()
                .verify(b"stable identity", &signature)
                .is_ok()
        );
    }

    #[test]
    fn group_session_pickle_round_trips() {
        let rng = Rng::from_seed([4; 32]);
        let mut outbound = OutboundGroupSession::new(&rng).unwrap();
        outbound.encrypt(b"advance the ratchet once");

        let mut restored_outbound =
            OutboundGroupSession::from_pickle(&outbound.pickle(PICKLE_KEY), PICKLE_KEY).unwrap();
        assert_eq!(restored_outbound.session_id(), outbound.session_id());
        assert_eq!(restored_outbound.message_index(), outbound.message_index());
        assert_eq!(restored_outbound.session_key(), outbound.session_key());

        let mut inbound = InboundGroupSession::new(&outbound.session_key()).unwrap();
        let restored_inbound =
            InboundGroupSession::from_pickle(&inbound.pickle(PICKLE_KEY), PICKLE_KEY).unwrap();
        assert_eq!(restored_inbound.session_id(), inbound.session_id());
        assert_eq!(
            restored_inbound.first_known_index(),
            inbound.first_known_index()
        );

        // Both ends keep working after restoration.
        let message = restored_outbound.encrypt(b"hello from the other side");
        assert_eq!(
            inbound.decrypt(&message).unwrap().plaintext,
            b"hello from the other side"
        );
    }

    #[test]
    fn wrong_pickle_key_is_rejected() {
        let rng = Rng::from_seed([5; 32]);
        let account = Account::new(&rng).unwrap();

        let pickled = account.pickle(PICKLE_KEY);
        assert!(matches!(
            Account::from_pickle(&pickled, b"not the pickle key"),
            Err(PickleError::BadPickleKey)
        ));
    }

    #[test]
    fn corrupted_pickle_is_rejected() {
        assert!(matches!(
            Account::from_pickle("definitely-not!base64", PICKLE_KEY),
            Err(PickleError::Base64(_))
        ));
        assert!(matches!(
            Account::from_pickle("c2hvcnQ", PICKLE_KEY),
            Err(PickleError::Corrupted)
        ));
    }
}
