// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pairwise encryption with a triple Diffie-Hellman pre-key handshake and a Double Ratchet,
//! offering forward secrecy for every message.
//!
//! An [`Account`] owns the long-term identity key pairs and the supply of one-time keys.
//! Sessions towards a remote account are represented by [`Session`]: the initiating side creates
//! one with [`Session::new_outbound`] against a published one-time key, the receiving side with
//! [`Session::new_inbound`] from the first received pre-key message. Afterwards both sides
//! [`encrypt`](Session::encrypt) and [`decrypt`](Session::decrypt) freely; messages may arrive
//! out of order within the configured limits.
pub mod account;
pub mod message;
pub mod ratchet;
pub mod session;

pub use account::{Account, AccountError, IdentityKeys, OneTimeKey};
pub use ratchet::{
    MAX_MESSAGE_GAP, MAX_RECEIVER_CHAINS, MAX_SKIPPED_MESSAGE_KEYS, RatchetError,
};
pub use session::{MessageType, OlmMessage, Session, SessionError, SessionId};
