// SPDX-License-Identifier: MIT OR Apache-2.0

//! Unpadded, standard-alphabet base64 helpers used for message and pickle transport.
use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;

pub use base64::DecodeError as Base64DecodeError;

/// Encodes bytes as unpadded base64.
pub fn base64_encode(input: impl AsRef<[u8]>) -> String {
    STANDARD_NO_PAD.encode(input)
}

/// Decodes unpadded base64 into bytes.
pub fn base64_decode(input: impl AsRef<[u8]>) -> Result<Vec<u8>, Base64DecodeError> {
    STANDARD_NO_PAD.decode(input)
}
