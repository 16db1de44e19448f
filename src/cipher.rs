// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authenticated encryption construction used for ratchet messages and encrypted pickles.
//!
//! A single input key is expanded with HKDF-SHA256 into an AES-256 key, an HMAC-SHA256 key and an
//! initialisation vector. Messages are encrypted with AES-256-CBC (PKCS#7 padding) and
//! authenticated with a truncated HMAC-SHA256 tag computed over the whole framed message.
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::aes256::{
    AES256_KEY_SIZE, Aes256Error, IV_SIZE, aes256_cbc_decrypt, aes256_cbc_encrypt,
    encrypt_output_length,
};
use crate::crypto::kdf::{hkdf_sha256, hmac_sha256};
use crate::crypto::sha2::SHA256_DIGEST_SIZE;

/// Length of the truncated HMAC-SHA256 tag appended to messages.
///
/// The truncation keeps messages compact while retaining adequate unforgeability.
pub const MAC_TRUNCATED_SIZE: usize = 8;

const DERIVED_KEYS_SIZE: usize = AES256_KEY_SIZE + SHA256_DIGEST_SIZE + IV_SIZE;

/// Expanded key material for one encryption or decryption operation.
#[derive(Zeroize, ZeroizeOnDrop)]
struct DerivedKeys {
    aes_key: [u8; AES256_KEY_SIZE],
    mac_key: [u8; SHA256_DIGEST_SIZE],
    iv: [u8; IV_SIZE],
}

impl DerivedKeys {
    fn derive(key: &[u8], kdf_info: &[u8]) -> Self {
        let salt = [0u8; SHA256_DIGEST_SIZE];
        let mut expanded = [0u8; DERIVED_KEYS_SIZE];
        hkdf_sha256(&salt, key, kdf_info, &mut expanded);

        let keys = Self {
            aes_key: expanded[..32].try_into().expect("aes key size"),
            mac_key: expanded[32..64].try_into().expect("mac key size"),
            iv: expanded[64..].try_into().expect("iv size"),
        };
        expanded.zeroize();
        keys
    }
}

/// AES-256-CBC + HMAC-SHA256 cipher with keys derived through HKDF-SHA256.
///
/// The same construction serves both ratchet flavours, only distinguished by the HKDF info
/// string and the length of the input key material.
#[derive(Debug)]
pub struct AesSha256Cipher {
    kdf_info: &'static [u8],
}

impl AesSha256Cipher {
    pub const fn new(kdf_info: &'static [u8]) -> Self {
        Self { kdf_info }
    }

    pub const fn mac_length(&self) -> usize {
        MAC_TRUNCATED_SIZE
    }

    /// Length of the ciphertext plus MAC produced for a plaintext of given length.
    pub const fn encrypt_output_length(&self, plaintext_length: usize) -> usize {
        encrypt_output_length(plaintext_length) + MAC_TRUNCATED_SIZE
    }

    /// Encrypts the plaintext under the derived AES key.
    ///
    /// The caller frames the returned ciphertext and authenticates the frame with [`Self::mac`].
    pub fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Vec<u8> {
        let keys = DerivedKeys::derive(key, self.kdf_info);
        aes256_cbc_encrypt(&keys.aes_key, &keys.iv, plaintext)
    }

    /// Truncated authentication tag over the framed message.
    pub fn mac(&self, key: &[u8], message: &[u8]) -> [u8; MAC_TRUNCATED_SIZE] {
        let keys = DerivedKeys::derive(key, self.kdf_info);
        let mut mac = hmac_sha256(&keys.mac_key, message);
        let truncated = mac[..MAC_TRUNCATED_SIZE]
            .try_into()
            .expect("truncated mac size");
        mac.zeroize();
        truncated
    }

    /// Verifies the truncated authentication tag and decrypts the ciphertext.
    ///
    /// `mac_material` are the framed message bytes the tag was computed over, up to but excluding
    /// the tag itself.
    pub fn decrypt(
        &self,
        key: &[u8],
        mac_material: &[u8],
        mac: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        let keys = DerivedKeys::derive(key, self.kdf_info);

        let mut expected = hmac_sha256(&keys.mac_key, mac_material);
        let matches = mac.len() == MAC_TRUNCATED_SIZE
            && bool::from(expected[..MAC_TRUNCATED_SIZE].ct_eq(mac));
        expected.zeroize();
        if !matches {
            return Err(CipherError::BadMessageMac);
        }

        Ok(aes256_cbc_decrypt(&keys.aes_key, &keys.iv, ciphertext)?)
    }
}

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("message authentication code of the message does not match")]
    BadMessageMac,

    #[error(transparent)]
    Aes256(#[from] Aes256Error),
}
