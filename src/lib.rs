// SPDX-License-Identifier: MIT OR Apache-2.0

//! `starling-encryption` is the cryptographic core of an end-to-end-encrypted messaging stack:
//! pairwise sessions of the "Double Ratchet with pre-key handshake" family and a group ratchet
//! for encrypting towards many recipients at once, together with encrypted persistence
//! ("pickling") of all session state.
//!
//! ## Pairwise sessions
//!
//! Every participant owns an [`Account`] holding their long-term identity key pairs and a supply
//! of one-time keys. Publishing the one-time keys is up to the application; the crate only needs
//! them back for look-up when sessions are established.
//!
//! A [`Session`] between two accounts is created asynchronously: the initiating side combines
//! it's identity key and a fresh base key with a published one-time key of the receiving side
//! (triple Diffie-Hellman) and can start sending immediately, producing self-contained pre-key
//! messages. The receiving side establishes it's own session from the first such message. From
//! then on a Double Ratchet derives a fresh key for every single message, giving forward secrecy
//! in both directions, and tolerates out-of-order and lost messages within configured bounds.
//!
//! ```
//! use starling_encryption::{Account, OlmMessage, Rng, Session};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rng = Rng::new()?;
//!
//! let alice = Account::new(&rng)?;
//! let mut bob = Account::new(&rng)?;
//! bob.generate_one_time_keys(1, &rng)?;
//! let bob_one_time_key = bob.one_time_keys().next().unwrap().public_key();
//!
//! let mut alice_session =
//!     Session::new_outbound(&alice, &bob.curve25519_key(), &bob_one_time_key, &rng)?;
//! let message = alice_session.encrypt(b"keep it between us", &rng)?;
//!
//! let OlmMessage::PreKey(prekey_bytes) = &message else {
//!     unreachable!("the first message uses pre-key framing");
//! };
//! let mut bob_session = Session::new_inbound(&bob, Some(&alice.curve25519_key()), prekey_bytes)?;
//! assert_eq!(bob_session.decrypt(&message)?, b"keep it between us");
//! assert_eq!(alice_session.session_id(), bob_session.session_id());
//! # Ok(())
//! # }
//! ```
//!
//! ## Group sessions
//!
//! For groups, each sender owns an [`OutboundGroupSession`]: a one-way hash ratchet advanced
//! once per message, with every message signed by a per-session Ed25519 key. The ratchet state
//! is shared with group members as a signed session key (usually through the pairwise sessions
//! above); members decrypt with an [`InboundGroupSession`]. Receivers can jump forward to any
//! future message index cheaply, and state exported at a chosen index lets late joiners read
//! exactly the history the sharer intends.
//!
//! ## Persistence
//!
//! Accounts and all session types serialise into encrypted, authenticated, versioned pickles
//! keyed by a caller-supplied passphrase, see for example [`Session::pickle`] and
//! [`Session::from_pickle`].
//!
//! ## Scope
//!
//! The crate is a protocol engine: single-threaded, non-blocking and transport-agnostic.
//! Network delivery, key distribution and identity verification policy live in the layers above.
pub mod cipher;
mod crypto;
pub mod megolm;
pub mod olm;
mod pickle;
#[cfg(test)]
mod tests;
mod wire;

pub use crypto::ed25519::{Ed25519Error, Signature, SigningPublicKey};
pub use crypto::x25519::PublicKey as Curve25519PublicKey;
pub use crypto::{Rng, RngError};
pub use megolm::{
    DecryptedGroupMessage, GroupSessionError, InboundGroupSession, OutboundGroupSession,
};
pub use olm::{
    Account, AccountError, IdentityKeys, MessageType, OlmMessage, OneTimeKey, RatchetError,
    Session, SessionError, SessionId,
};
pub use pickle::PickleError;
pub use wire::DecodeError;
