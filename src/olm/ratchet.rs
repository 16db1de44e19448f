// SPDX-License-Identifier: MIT OR Apache-2.0

//! Double Ratchet state machine.
//!
//! A root chain is advanced by fresh X25519 outputs whenever the remote side starts using a new
//! ratchet key; each root step seeds a symmetric message-key chain. At most one sending chain
//! exists (present when we are the active sender of the current ratchet epoch), received epochs
//! are kept in a bounded queue together with message keys that were skipped over by out-of-order
//! deliveries.
use std::collections::VecDeque;

use thiserror::Error;
use tracing::trace;
use zeroize::Zeroize;

use crate::cipher::{AesSha256Cipher, CipherError};
use crate::crypto::kdf::{hkdf_sha256, hmac_sha256};
use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::crypto::{Rng, RngError, Secret};
use crate::olm::message::{DecodedMessage, decode_message, encode_message};
use crate::wire::DecodeError;

const ROOT_KDF_INFO: &[u8] = b"OLM_ROOT";
const RATCHET_KDF_INFO: &[u8] = b"OLM_RATCHET";
const CIPHER_KDF_INFO: &[u8] = b"OLM_KEYS";

/// Cipher used for all ratchet messages.
pub(crate) const MESSAGE_CIPHER: AesSha256Cipher = AesSha256Cipher::new(CIPHER_KDF_INFO);

/// Seed byte for deriving a message key out of a chain key.
const MESSAGE_KEY_SEED: [u8; 1] = [0x01];

/// Seed byte for advancing a chain key.
const CHAIN_KEY_SEED: [u8; 1] = [0x02];

pub const CHAIN_KEY_SIZE: usize = 32;

pub const ROOT_KEY_SIZE: usize = 32;

/// Size of the initial handshake secret, the concatenation of three X25519 agreements.
pub(crate) const TRIPLE_AGREEMENT_SIZE: usize = 96;

/// Number of historic receiving chains kept around, oldest evicted first.
pub const MAX_RECEIVER_CHAINS: usize = 5;

/// Number of skipped message keys kept around, oldest evicted first.
pub const MAX_SKIPPED_MESSAGE_KEYS: usize = 40;

/// Upper bound on how far a single message may advance a receiving chain.
///
/// Bounds the CPU spent on one hostile or corrupted counter value.
pub const MAX_MESSAGE_GAP: u32 = 2000;

/// Chain key of a message-key chain, advanced once per message.
#[derive(Clone, Debug)]
pub(crate) struct ChainKey {
    pub index: u32,
    pub key: Secret<CHAIN_KEY_SIZE>,
}

impl ChainKey {
    fn advance(&mut self) {
        self.key = Secret::from_bytes(hmac_sha256(self.key.expose(), &CHAIN_KEY_SEED));
        self.index = self.index.wrapping_add(1);
    }

    fn message_key(&self) -> MessageKey {
        MessageKey {
            index: self.index,
            key: Secret::from_bytes(hmac_sha256(self.key.expose(), &MESSAGE_KEY_SEED)),
        }
    }
}

/// Key for exactly one message.
#[derive(Clone, Debug)]
pub(crate) struct MessageKey {
    pub index: u32,
    pub key: Secret<CHAIN_KEY_SIZE>,
}

/// The chain we encrypt with, keyed by our current ratchet key pair.
#[derive(Clone, Debug)]
pub(crate) struct SenderChain {
    pub ratchet_key: SecretKey,
    pub chain_key: ChainKey,
}

/// A chain we decrypt with, keyed by a ratchet public key the remote side used.
#[derive(Clone, Debug)]
pub(crate) struct ReceiverChain {
    pub ratchet_key: PublicKey,
    pub chain_key: ChainKey,
}

/// A message key that was derived but not yet consumed, retained for a late delivery.
#[derive(Clone, Debug)]
pub(crate) struct SkippedMessageKey {
    pub ratchet_key: PublicKey,
    pub message_key: MessageKey,
}

/// Double Ratchet over a root chain and per-epoch message-key chains.
#[derive(Clone, Debug)]
pub(crate) struct DoubleRatchet {
    pub root_key: Secret<ROOT_KEY_SIZE>,
    pub sender_chain: Option<SenderChain>,
    /// Most recent chain at the front, oldest evicted from the back.
    pub receiver_chains: VecDeque<ReceiverChain>,
    /// Newest keys pushed to the back, oldest evicted from the front.
    pub skipped_message_keys: VecDeque<SkippedMessageKey>,
}

/// Splits 64 bytes of expanded key material into a root key and a fresh chain key.
fn split_root_and_chain(expanded: &mut [u8; 64]) -> (Secret<ROOT_KEY_SIZE>, ChainKey) {
    let root_key = Secret::from_bytes(expanded[..32].try_into().expect("root key size"));
    let chain_key = ChainKey {
        index: 0,
        key: Secret::from_bytes(expanded[32..].try_into().expect("chain key size")),
    };
    expanded.zeroize();
    (root_key, chain_key)
}

/// Derives the initial root and chain key from the handshake secret.
fn derive_initial_keys(
    shared_secret: &Secret<TRIPLE_AGREEMENT_SIZE>,
) -> (Secret<ROOT_KEY_SIZE>, ChainKey) {
    let salt = [0u8; 32];
    let mut expanded = [0u8; 64];
    hkdf_sha256(&salt, shared_secret.expose(), ROOT_KDF_INFO, &mut expanded);
    split_root_and_chain(&mut expanded)
}

/// Advances the root chain with a fresh X25519 agreement, seeding a new message-key chain.
fn advance_root_key(
    root_key: &Secret<ROOT_KEY_SIZE>,
    our_ratchet_key: &SecretKey,
    their_ratchet_key: &PublicKey,
) -> (Secret<ROOT_KEY_SIZE>, ChainKey) {
    let shared_secret = our_ratchet_key.calculate_agreement(their_ratchet_key);
    let mut expanded = [0u8; 64];
    hkdf_sha256(
        root_key.expose(),
        shared_secret.expose(),
        RATCHET_KDF_INFO,
        &mut expanded,
    );
    split_root_and_chain(&mut expanded)
}

impl DoubleRatchet {
    /// Initialises the ratchet for the side which created the outbound session ("Alice").
    ///
    /// Starts with a sending chain under the freshly generated ratchet key and no receiving
    /// chains.
    pub fn new_alice(
        shared_secret: &Secret<TRIPLE_AGREEMENT_SIZE>,
        ratchet_key: SecretKey,
    ) -> Self {
        let (root_key, chain_key) = derive_initial_keys(shared_secret);
        Self {
            root_key,
            sender_chain: Some(SenderChain {
                ratchet_key,
                chain_key,
            }),
            receiver_chains: VecDeque::new(),
            skipped_message_keys: VecDeque::new(),
        }
    }

    /// Initialises the ratchet for the side which received the pre-key message ("Bob").
    ///
    /// Starts with a receiving chain under the remote ratchet key and no sending chain.
    pub fn new_bob(
        shared_secret: &Secret<TRIPLE_AGREEMENT_SIZE>,
        their_ratchet_key: PublicKey,
    ) -> Self {
        let (root_key, chain_key) = derive_initial_keys(shared_secret);
        let mut receiver_chains = VecDeque::new();
        receiver_chains.push_front(ReceiverChain {
            ratchet_key: their_ratchet_key,
            chain_key,
        });
        Self {
            root_key,
            sender_chain: None,
            receiver_chains,
            skipped_message_keys: VecDeque::new(),
        }
    }

    /// Encrypts the plaintext into a complete, authenticated ratchet message.
    pub fn encrypt(&mut self, plaintext: &[u8], rng: &Rng) -> Result<Vec<u8>, RatchetError> {
        if self.sender_chain.is_none() {
            // We replied after receiving: start a new ratchet epoch against the most recent
            // remote ratchet key.
            let their_ratchet_key = self
                .receiver_chains
                .front()
                .ok_or(RatchetError::MissingReceiverChain)?
                .ratchet_key;
            let ratchet_key = SecretKey::from_bytes(rng.random_bytes()?);
            trace!(
                ratchet_key = %ratchet_key.public_key(),
                "starting new sending chain"
            );
            let (root_key, chain_key) =
                advance_root_key(&self.root_key, &ratchet_key, &their_ratchet_key);
            self.root_key = root_key;
            self.sender_chain = Some(SenderChain {
                ratchet_key,
                chain_key,
            });
        }

        let sender_chain = self
            .sender_chain
            .as_mut()
            .expect("sender chain was installed above");

        let message_key = sender_chain.chain_key.message_key();
        sender_chain.chain_key.advance();

        let ciphertext = MESSAGE_CIPHER.encrypt(message_key.key.expose(), plaintext);
        let mut message = encode_message(
            &sender_chain.ratchet_key.public_key(),
            message_key.index,
            &ciphertext,
        );
        let mac = MESSAGE_CIPHER.mac(message_key.key.expose(), &message);
        message.extend_from_slice(&mac);
        Ok(message)
    }

    /// Decrypts a ratchet message.
    ///
    /// State is only committed after the message authenticated: a failed decryption leaves the
    /// ratchet exactly as it was.
    pub fn decrypt(&mut self, message: &[u8]) -> Result<Vec<u8>, RatchetError> {
        let decoded = decode_message(message)?;

        let position = self
            .receiver_chains
            .iter()
            .position(|chain| chain.ratchet_key == decoded.ratchet_key);

        match position {
            None => self.decrypt_with_new_chain(&decoded),
            Some(position)
                if decoded.counter < self.receiver_chains[position].chain_key.index =>
            {
                self.decrypt_with_skipped_key(&decoded)
            }
            Some(position) => self.decrypt_with_existing_chain(position, &decoded),
        }
    }

    /// The message continues a known chain, at or past it's current index.
    fn decrypt_with_existing_chain(
        &mut self,
        position: usize,
        decoded: &DecodedMessage<'_>,
    ) -> Result<Vec<u8>, RatchetError> {
        let chain = &self.receiver_chains[position];
        let (skipped, message_key, advanced_chain_key) =
            derive_message_key(&chain.chain_key, &chain.ratchet_key, decoded.counter)?;

        let plaintext = MESSAGE_CIPHER.decrypt(
            message_key.key.expose(),
            decoded.mac_material,
            decoded.mac,
            decoded.ciphertext,
        )?;

        self.receiver_chains[position].chain_key = advanced_chain_key;
        self.store_skipped_message_keys(skipped);
        Ok(plaintext)
    }

    /// The message index lies behind the chain: it can only be decrypted with a retained key.
    fn decrypt_with_skipped_key(
        &mut self,
        decoded: &DecodedMessage<'_>,
    ) -> Result<Vec<u8>, RatchetError> {
        let position = self
            .skipped_message_keys
            .iter()
            .position(|skipped| {
                skipped.ratchet_key == decoded.ratchet_key
                    && skipped.message_key.index == decoded.counter
            })
            .ok_or(RatchetError::UnknownMessageIndex)?;

        let plaintext = {
            let skipped = &self.skipped_message_keys[position];
            MESSAGE_CIPHER.decrypt(
                skipped.message_key.key.expose(),
                decoded.mac_material,
                decoded.mac,
                decoded.ciphertext,
            )?
        };

        // The key is single use, drop it now that it's message arrived.
        self.skipped_message_keys.remove(position);
        Ok(plaintext)
    }

    /// The remote side started a new ratchet epoch: advance the root chain and install a fresh
    /// receiving chain, retiring our sending chain.
    fn decrypt_with_new_chain(
        &mut self,
        decoded: &DecodedMessage<'_>,
    ) -> Result<Vec<u8>, RatchetError> {
        let sender_chain = self
            .sender_chain
            .as_ref()
            .ok_or(RatchetError::MissingSenderChain)?;

        let (root_key, chain_key) = advance_root_key(
            &self.root_key,
            &sender_chain.ratchet_key,
            &decoded.ratchet_key,
        );
        let (skipped, message_key, advanced_chain_key) =
            derive_message_key(&chain_key, &decoded.ratchet_key, decoded.counter)?;

        let plaintext = MESSAGE_CIPHER.decrypt(
            message_key.key.expose(),
            decoded.mac_material,
            decoded.mac,
            decoded.ciphertext,
        )?;

        trace!(ratchet_key = %decoded.ratchet_key, "starting new receiving chain");
        self.root_key = root_key;
        self.receiver_chains.push_front(ReceiverChain {
            ratchet_key: decoded.ratchet_key,
            chain_key: advanced_chain_key,
        });
        self.receiver_chains.truncate(MAX_RECEIVER_CHAINS);
        // Our ratchet key is outdated now, a new one is generated on the next encrypt.
        self.sender_chain = None;
        self.store_skipped_message_keys(skipped);
        Ok(plaintext)
    }

    fn store_skipped_message_keys(&mut self, skipped: Vec<SkippedMessageKey>) {
        for key in skipped {
            self.skipped_message_keys.push_back(key);
        }
        while self.skipped_message_keys.len() > MAX_SKIPPED_MESSAGE_KEYS {
            self.skipped_message_keys.pop_front();
        }
    }
}

/// Derives the message key at `counter` from a scratch copy of the chain, collecting the keys of
/// all skipped indices on the way.
///
/// Leaves the caller's state untouched; the advanced chain key is returned for committing after
/// the message authenticated.
fn derive_message_key(
    chain_key: &ChainKey,
    ratchet_key: &PublicKey,
    counter: u32,
) -> Result<(Vec<SkippedMessageKey>, MessageKey, ChainKey), RatchetError> {
    let gap = counter - chain_key.index;
    if gap > MAX_MESSAGE_GAP {
        return Err(RatchetError::TooLargeMessageGap);
    }

    let mut chain_key = chain_key.clone();
    let mut skipped = Vec::with_capacity(gap as usize);
    while chain_key.index < counter {
        skipped.push(SkippedMessageKey {
            ratchet_key: *ratchet_key,
            message_key: chain_key.message_key(),
        });
        chain_key.advance();
    }

    let message_key = chain_key.message_key();
    chain_key.advance();
    Ok((skipped, message_key, chain_key))
}

#[derive(Debug, Error)]
pub enum RatchetError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Rng(#[from] RngError),

    #[error("no retained key for an already advanced message index")]
    UnknownMessageIndex,

    #[error("message would advance the receiving chain by more than {MAX_MESSAGE_GAP} steps")]
    TooLargeMessageGap,

    #[error("ratchet has no receiving chain to start a sending chain from")]
    MissingReceiverChain,

    #[error("received a new ratchet key but no sending chain exists to derive from")]
    MissingSenderChain,
}

#[cfg(test)]
mod tests {
    use crate::crypto::x25519::SecretKey;
    use crate::crypto::{Rng, Secret};

    use super::{
        DoubleRatchet, MAX_MESSAGE_GAP, MAX_SKIPPED_MESSAGE_KEYS, RatchetError,
    };

    fn ratchet_pair(rng: &Rng) -> (DoubleRatchet, DoubleRatchet) {
        let shared_secret = Secret::from_bytes(rng.random_bytes().unwrap());
        let ratchet_key = SecretKey::from_bytes(rng.random_bytes().unwrap());
        let alice = DoubleRatchet::new_alice(&shared_secret, ratchet_key.clone());
        let bob = DoubleRatchet::new_bob(&shared_secret, ratchet_key.public_key());
        (alice, bob)
    }

    #[test]
    fn initialisation_shapes() {
        let rng = Rng::from_seed([1; 32]);
        let (alice, bob) = ratchet_pair(&rng);

        assert!(alice.sender_chain.is_some());
        assert!(alice.receiver_chains.is_empty());
        assert!(bob.sender_chain.is_none());
        assert_eq!(bob.receiver_chains.len(), 1);
    }

    #[test]
    fn ping_pong() {
        let rng = Rng::from_seed([1; 32]);
        let (mut alice, mut bob) = ratchet_pair(&rng);

        for round in 0..4 {
            let message = alice
                .encrypt(format!("ping {round}").as_bytes(), &rng)
                .unwrap();
            assert_eq!(
                bob.decrypt(&message).unwrap(),
                format!("ping {round}").as_bytes()
            );

            let message = bob
                .encrypt(format!("pong {round}").as_bytes(), &rng)
                .unwrap();
            assert_eq!(
                alice.decrypt(&message).unwrap(),
                format!("pong {round}").as_bytes()
            );
        }

        // Each reply after a receive starts a new epoch, old ones are retained.
        assert!(alice.receiver_chains.len() > 1);
    }

    #[test]
    fn out_of_order_within_chain() {
        let rng = Rng::from_seed([2; 32]);
        let (mut alice, mut bob) = ratchet_pair(&rng);

        let messages: Vec<Vec<u8>> = (0..5)
            .map(|i| alice.encrypt(format!("msg {i}").as_bytes(), &rng).unwrap())
            .collect();

        // Deliver in reverse order.
        for (i, message) in messages.iter().enumerate().rev() {
            assert_eq!(bob.decrypt(message).unwrap(), format!("msg {i}").as_bytes());
        }

        // Every skipped key was consumed again.
        assert!(bob.skipped_message_keys.is_empty());
    }

    #[test]
    fn replay_is_rejected() {
        let rng = Rng::from_seed([3; 32]);
        let (mut alice, mut bob) = ratchet_pair(&rng);

        let first = alice.encrypt(b"first", &rng).unwrap();
        let second = alice.encrypt(b"second", &rng).unwrap();

        assert_eq!(bob.decrypt(&second).unwrap(), b"second");
        assert_eq!(bob.decrypt(&first).unwrap(), b"first");

        // The skipped key was removed on use, a replay finds nothing.
        assert!(matches!(
            bob.decrypt(&first),
            Err(RatchetError::UnknownMessageIndex)
        ));
    }

    #[test]
    fn skipped_keys_are_bounded() {
        let rng = Rng::from_seed([4; 32]);
        let (mut alice, mut bob) = ratchet_pair(&rng);

        let early = alice.encrypt(b"early", &rng).unwrap();
        for _ in 0..MAX_SKIPPED_MESSAGE_KEYS {
            alice.encrypt(b"dropped by the network", &rng).unwrap();
        }
        let late = alice.encrypt(b"late", &rng).unwrap();

        // Decrypting the late message skips over more keys than the cache holds; the earliest
        // one (for "early") has been evicted.
        assert_eq!(bob.decrypt(&late).unwrap(), b"late");
        assert_eq!(bob.skipped_message_keys.len(), MAX_SKIPPED_MESSAGE_KEYS);
        assert!(matches!(
            bob.decrypt(&early),
            Err(RatchetError::UnknownMessageIndex)
        ));
    }

    #[test]
    fn excessive_gap_is_rejected() {
        let rng = Rng::from_seed([5; 32]);
        let (mut alice, mut bob) = ratchet_pair(&rng);

        // Forge the counter far beyond the hardening bound by re-encoding the frame.
        let message = alice.encrypt(b"x", &rng).unwrap();
        let decoded = crate::olm::message::decode_message(&message).unwrap();
        let mut forged = crate::olm::message::encode_message(
            &decoded.ratchet_key,
            MAX_MESSAGE_GAP + 1,
            decoded.ciphertext,
        );
        forged.extend_from_slice(decoded.mac);

        assert!(matches!(
            bob.decrypt(&forged),
            Err(RatchetError::TooLargeMessageGap)
        ));
    }

    #[test]
    fn failed_mac_leaves_state_unchanged() {
        let rng = Rng::from_seed([6; 32]);
        let (mut alice, mut bob) = ratchet_pair(&rng);

        let mut message = alice.encrypt(b"genuine", &rng).unwrap();
        let last = message.len() - 1;
        message[last] ^= 0x01;

        assert!(matches!(
            bob.decrypt(&message),
            Err(RatchetError::Cipher(crate::cipher::CipherError::BadMessageMac))
        ));
        assert_eq!(bob.receiver_chains[0].chain_key.index, 0);
        assert!(bob.skipped_message_keys.is_empty());

        // The genuine message still decrypts afterwards.
        message[last] ^= 0x01;
        assert_eq!(bob.decrypt(&message).unwrap(), b"genuine");
    }
}
