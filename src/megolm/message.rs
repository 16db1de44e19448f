// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire codecs for group messages and the session-key sharing formats.
use crate::cipher::MAC_TRUNCATED_SIZE;
use crate::crypto::ed25519::{PUBLIC_KEY_SIZE, SIGNATURE_SIZE, Signature, SigningKeyPair, SigningPublicKey};
use crate::megolm::ratchet::RATCHET_SIZE;
use crate::wire::{DecodeError, Reader, varint_length, write_bytes, write_u32};

/// Version byte carried by every group message.
pub const PROTOCOL_VERSION: u8 = 0x03;

/// Version byte of the signed session-key export produced by outbound sessions.
pub const SESSION_KEY_VERSION: u8 = 0x02;

/// Version byte of the unsigned session-key export produced by inbound sessions.
pub const SESSION_EXPORT_VERSION: u8 = 0x01;

const MESSAGE_INDEX_TAG: u8 = 0x08;
const CIPHERTEXT_TAG: u8 = 0x12;

const SESSION_KEY_SIZE: usize = 1 + 4 + RATCHET_SIZE + PUBLIC_KEY_SIZE + SIGNATURE_SIZE;
const SESSION_EXPORT_SIZE: usize = 1 + 4 + RATCHET_SIZE + PUBLIC_KEY_SIZE;

/// Encodes a group message frame.
///
/// The buffer is complete up to the truncated MAC and the trailing Ed25519 signature, which the
/// caller computes over the growing frame and appends in that order.
pub(crate) fn encode_group_message(message_index: u32, ciphertext: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        1 + 1
            + varint_length(message_index)
            + 1
            + varint_length(ciphertext.len() as u32)
            + ciphertext.len()
            + MAC_TRUNCATED_SIZE
            + SIGNATURE_SIZE,
    );
    buf.push(PROTOCOL_VERSION);
    write_u32(&mut buf, MESSAGE_INDEX_TAG, message_index);
    write_bytes(&mut buf, CIPHERTEXT_TAG, ciphertext);
    buf
}

/// Decoded view into a group message.
#[derive(Debug)]
pub(crate) struct DecodedGroupMessage<'a> {
    pub message_index: u32,
    pub ciphertext: &'a [u8],
    /// Bytes the truncated MAC was computed over.
    pub mac_material: &'a [u8],
    pub mac: &'a [u8],
    /// Bytes the signature was computed over, i.e. everything including the MAC.
    pub signature_material: &'a [u8],
    pub signature: Signature,
}

/// Decodes a group message, exposing the MAC and signature boundaries.
pub(crate) fn decode_group_message(bytes: &[u8]) -> Result<DecodedGroupMessage<'_>, DecodeError> {
    if bytes.len() < 1 + MAC_TRUNCATED_SIZE + SIGNATURE_SIZE {
        return Err(DecodeError::MessageTooShort);
    }
    if bytes[0] != PROTOCOL_VERSION {
        return Err(DecodeError::UnknownVersion(bytes[0]));
    }

    let signature_boundary = bytes.len() - SIGNATURE_SIZE;
    let mac_boundary = signature_boundary - MAC_TRUNCATED_SIZE;
    let mut reader = Reader::new(&bytes[1..mac_boundary]);

    let mut message_index = None;
    let mut ciphertext = None;
    while !reader.is_at_end() {
        match reader.read_tag()? {
            MESSAGE_INDEX_TAG => message_index = Some(reader.read_varint()?),
            CIPHERTEXT_TAG => ciphertext = Some(reader.read_length_prefixed()?),
            tag => reader.skip_field(tag)?,
        }
    }

    let signature_bytes: &[u8; SIGNATURE_SIZE] = bytes[signature_boundary..]
        .try_into()
        .expect("signature boundary is in bounds");

    Ok(DecodedGroupMessage {
        message_index: message_index.ok_or(DecodeError::MissingField)?,
        ciphertext: ciphertext.ok_or(DecodeError::MissingField)?,
        mac_material: &bytes[..mac_boundary],
        mac: &bytes[mac_boundary..signature_boundary],
        signature_material: &bytes[..signature_boundary],
        signature: Signature::from_bytes(signature_bytes),
    })
}

/// Encodes and signs the session key shared by an outbound session.
pub(crate) fn encode_session_key(
    counter: u32,
    ratchet_data: &[u8; RATCHET_SIZE],
    signing_key_pair: &SigningKeyPair,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SESSION_KEY_SIZE);
    buf.push(SESSION_KEY_VERSION);
    buf.extend_from_slice(&counter.to_be_bytes());
    buf.extend_from_slice(ratchet_data);
    buf.extend_from_slice(signing_key_pair.public_key().as_bytes());
    let signature = signing_key_pair.sign(&buf);
    buf.extend_from_slice(&signature.to_bytes());
    buf
}

/// Encodes the unsigned session-key export of an inbound session.
pub(crate) fn encode_exported_session_key(
    counter: u32,
    ratchet_data: &[u8; RATCHET_SIZE],
    signing_key: &SigningPublicKey,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SESSION_EXPORT_SIZE);
    buf.push(SESSION_EXPORT_VERSION);
    buf.extend_from_slice(&counter.to_be_bytes());
    buf.extend_from_slice(ratchet_data);
    buf.extend_from_slice(signing_key.as_bytes());
    buf
}

/// Borrowed view into a decoded session key of either format.
#[derive(Debug)]
pub(crate) struct DecodedSessionKey<'a> {
    pub counter: u32,
    pub ratchet_data: &'a [u8; RATCHET_SIZE],
    pub signing_key_bytes: &'a [u8; PUBLIC_KEY_SIZE],
    /// Signature and signed bytes, present in the signed format only.
    pub signature: Option<(&'a [u8], Signature)>,
}

/// Decodes the signed session-key format.
pub(crate) fn decode_session_key(bytes: &[u8]) -> Result<DecodedSessionKey<'_>, DecodeError> {
    if bytes.len() != SESSION_KEY_SIZE || bytes[0] != SESSION_KEY_VERSION {
        return Err(DecodeError::BadSessionKey);
    }
    let signature_bytes: &[u8; SIGNATURE_SIZE] = bytes[SESSION_EXPORT_SIZE..]
        .try_into()
        .expect("session key length was checked");
    let mut decoded = decode_session_key_fields(&bytes[..SESSION_EXPORT_SIZE])?;
    decoded.signature = Some((
        &bytes[..SESSION_EXPORT_SIZE],
        Signature::from_bytes(signature_bytes),
    ));
    Ok(decoded)
}

/// Decodes the unsigned session-key export format.
pub(crate) fn decode_exported_session_key(
    bytes: &[u8],
) -> Result<DecodedSessionKey<'_>, DecodeError> {
    if bytes.len() != SESSION_EXPORT_SIZE || bytes[0] != SESSION_EXPORT_VERSION {
        return Err(DecodeError::BadSessionKey);
    }
    decode_session_key_fields(bytes)
}

fn decode_session_key_fields(bytes: &[u8]) -> Result<DecodedSessionKey<'_>, DecodeError> {
    let counter = u32::from_be_bytes(bytes[1..5].try_into().expect("counter field size"));
    let ratchet_data = bytes[5..5 + RATCHET_SIZE]
        .try_into()
        .expect("ratchet field size");
    let signing_key_bytes = bytes[5 + RATCHET_SIZE..5 + RATCHET_SIZE + PUBLIC_KEY_SIZE]
        .try_into()
        .expect("signing key field size");
    Ok(DecodedSessionKey {
        counter,
        ratchet_data,
        signing_key_bytes,
        signature: None,
    })
}
