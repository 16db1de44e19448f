// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire codecs for ratchet messages and pre-key messages.
use crate::cipher::MAC_TRUNCATED_SIZE;
use crate::crypto::x25519::{PUBLIC_KEY_SIZE, PublicKey};
use crate::wire::{DecodeError, Reader, varint_length, write_bytes, write_u32};

/// Version byte carried by every ratchet and pre-key message.
pub const PROTOCOL_VERSION: u8 = 0x03;

const RATCHET_KEY_TAG: u8 = 0x0a;
const COUNTER_TAG: u8 = 0x10;
const CIPHERTEXT_TAG: u8 = 0x22;

const ONE_TIME_KEY_TAG: u8 = 0x22;
const BASE_KEY_TAG: u8 = 0x32;
const IDENTITY_KEY_TAG: u8 = 0x52;
const MESSAGE_TAG: u8 = 0x42;

/// Encodes a ratchet message frame.
///
/// The returned buffer is complete up to the trailing truncated MAC, which the caller computes
/// over these exact bytes and appends.
pub(crate) fn encode_message(
    ratchet_key: &PublicKey,
    counter: u32,
    ciphertext: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        1 + 2
            + PUBLIC_KEY_SIZE
            + 1
            + varint_length(counter)
            + 1
            + varint_length(ciphertext.len() as u32)
            + ciphertext.len()
            + MAC_TRUNCATED_SIZE,
    );
    buf.push(PROTOCOL_VERSION);
    write_bytes(&mut buf, RATCHET_KEY_TAG, ratchet_key.as_bytes());
    write_u32(&mut buf, COUNTER_TAG, counter);
    write_bytes(&mut buf, CIPHERTEXT_TAG, ciphertext);
    buf
}

/// Decoded view into a ratchet message.
#[derive(Debug, PartialEq)]
pub(crate) struct DecodedMessage<'a> {
    pub ratchet_key: PublicKey,
    pub counter: u32,
    pub ciphertext: &'a [u8],
    /// Bytes the trailing MAC was computed over, i.e. everything before it.
    pub mac_material: &'a [u8],
    pub mac: &'a [u8],
}

/// Decodes a ratchet message, exposing the MAC boundary for authentication.
pub(crate) fn decode_message(bytes: &[u8]) -> Result<DecodedMessage<'_>, DecodeError> {
    if bytes.len() < 1 + MAC_TRUNCATED_SIZE {
        return Err(DecodeError::MessageTooShort);
    }
    if bytes[0] != PROTOCOL_VERSION {
        return Err(DecodeError::UnknownVersion(bytes[0]));
    }

    let mac_boundary = bytes.len() - MAC_TRUNCATED_SIZE;
    let mut reader = Reader::new(&bytes[1..mac_boundary]);

    let mut ratchet_key = None;
    let mut counter = None;
    let mut ciphertext = None;
    while !reader.is_at_end() {
        match reader.read_tag()? {
            RATCHET_KEY_TAG => {
                let field = reader.read_length_prefixed()?;
                ratchet_key =
                    Some(PublicKey::try_from(field).map_err(|_| DecodeError::MissingField)?);
            }
            COUNTER_TAG => counter = Some(reader.read_varint()?),
            CIPHERTEXT_TAG => ciphertext = Some(reader.read_length_prefixed()?),
            tag => reader.skip_field(tag)?,
        }
    }

    Ok(DecodedMessage {
        ratchet_key: ratchet_key.ok_or(DecodeError::MissingField)?,
        counter: counter.ok_or(DecodeError::MissingField)?,
        ciphertext: ciphertext.ok_or(DecodeError::MissingField)?,
        mac_material: &bytes[..mac_boundary],
        mac: &bytes[mac_boundary..],
    })
}

/// Encodes a pre-key message around an already encoded ratchet message.
///
/// Pre-key messages carry no MAC of their own, the embedded message is authenticated.
pub(crate) fn encode_prekey_message(
    one_time_key: &PublicKey,
    base_key: &PublicKey,
    identity_key: &PublicKey,
    message: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        1 + 3 * (2 + PUBLIC_KEY_SIZE) + 1 + varint_length(message.len() as u32) + message.len(),
    );
    buf.push(PROTOCOL_VERSION);
    write_bytes(&mut buf, ONE_TIME_KEY_TAG, one_time_key.as_bytes());
    write_bytes(&mut buf, BASE_KEY_TAG, base_key.as_bytes());
    write_bytes(&mut buf, IDENTITY_KEY_TAG, identity_key.as_bytes());
    write_bytes(&mut buf, MESSAGE_TAG, message);
    buf
}

/// Decoded view into a pre-key message.
#[derive(Debug)]
pub(crate) struct DecodedPreKeyMessage<'a> {
    pub one_time_key: PublicKey,
    pub base_key: PublicKey,
    pub identity_key: Option<PublicKey>,
    pub message: &'a [u8],
}

/// Decodes a pre-key message.
///
/// The identity key is optional at this layer; the session checks it against the expected remote
/// identity where one is known.
pub(crate) fn decode_prekey_message(bytes: &[u8]) -> Result<DecodedPreKeyMessage<'_>, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::MessageTooShort);
    }
    if bytes[0] != PROTOCOL_VERSION {
        return Err(DecodeError::UnknownVersion(bytes[0]));
    }

    let mut reader = Reader::new(&bytes[1..]);

    let mut one_time_key = None;
    let mut base_key = None;
    let mut identity_key = None;
    let mut message = None;
    while !reader.is_at_end() {
        match reader.read_tag()? {
            ONE_TIME_KEY_TAG => {
                let field = reader.read_length_prefixed()?;
                one_time_key =
                    Some(PublicKey::try_from(field).map_err(|_| DecodeError::MissingField)?);
            }
            BASE_KEY_TAG => {
                let field = reader.read_length_prefixed()?;
                base_key =
                    Some(PublicKey::try_from(field).map_err(|_| DecodeError::MissingField)?);
            }
            IDENTITY_KEY_TAG => {
                let field = reader.read_length_prefixed()?;
                identity_key =
                    Some(PublicKey::try_from(field).map_err(|_| DecodeError::MissingField)?);
            }
            MESSAGE_TAG => message = Some(reader.read_length_prefixed()?),
            tag => reader.skip_field(tag)?,
        }
    }

    Ok(DecodedPreKeyMessage {
        one_time_key: one_time_key.ok_or(DecodeError::MissingField)?,
        base_key: base_key.ok_or(DecodeError::MissingField)?,
        identity_key,
        message: message.ok_or(DecodeError::MissingField)?,
    })
}
