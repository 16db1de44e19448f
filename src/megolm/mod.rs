// SPDX-License-Identifier: MIT OR Apache-2.0

//! Group encryption over a one-way hash ratchet, shared with the group through a signed
//! session-key export.
//!
//! The sender owns an [`OutboundGroupSession`] and broadcasts its
//! [`session_key`](OutboundGroupSession::session_key) to every member (typically through
//! pairwise [`olm`](crate::olm) sessions). Members feed it into an [`InboundGroupSession`] and
//! can then decrypt every message from that ratchet index onwards; earlier messages stay
//! unreadable. Inbound state at a chosen index can be re-shared with late joiners via
//! [`export_at`](InboundGroupSession::export_at) and [`import`](InboundGroupSession::import).
//!
//! Unlike the pairwise ratchet there is no backwards secrecy within a session: anybody holding a
//! ratchet value can compute all following ones. Senders rotate their group session whenever
//! membership changes.
pub mod inbound;
pub mod message;
pub mod outbound;
pub mod ratchet;

use thiserror::Error;

use crate::cipher::{AesSha256Cipher, CipherError};
use crate::crypto::RngError;
use crate::crypto::base64::Base64DecodeError;
use crate::crypto::ed25519::Ed25519Error;
use crate::megolm::ratchet::MegolmError;
use crate::wire::DecodeError;

pub use inbound::{DecryptedGroupMessage, InboundGroupSession};
pub use outbound::OutboundGroupSession;
pub use ratchet::RATCHET_SIZE;

/// Cipher used for all group messages, keyed by the full ratchet value.
pub(crate) const GROUP_MESSAGE_CIPHER: AesSha256Cipher = AesSha256Cipher::new(b"MEGOLM_KEYS");

#[derive(Debug, Error)]
pub enum GroupSessionError {
    #[error(transparent)]
    Base64(#[from] Base64DecodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Megolm(#[from] MegolmError),

    #[error(transparent)]
    Ed25519(#[from] Ed25519Error),

    #[error(transparent)]
    Rng(#[from] RngError),

    #[error("message index {index} is before the first known ratchet index {first_known_index}")]
    UnknownMessageIndex { index: u32, first_known_index: u32 },
}
