// SPDX-License-Identifier: MIT OR Apache-2.0

//! AES-256 in CBC mode with PKCS#7 padding.
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use thiserror::Error;

pub const AES256_KEY_SIZE: usize = 32;

pub const IV_SIZE: usize = 16;

const BLOCK_SIZE: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Length of the AES-256-CBC ciphertext for an input of given length, including PKCS#7 padding.
pub const fn encrypt_output_length(input_length: usize) -> usize {
    (input_length / BLOCK_SIZE + 1) * BLOCK_SIZE
}

/// Encrypts the input with AES-256 in CBC mode, applying PKCS#7 padding.
pub fn aes256_cbc_encrypt(
    key: &[u8; AES256_KEY_SIZE],
    iv: &[u8; IV_SIZE],
    plaintext: &[u8],
) -> Vec<u8> {
    Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypts the input with AES-256 in CBC mode and strips the PKCS#7 padding.
pub fn aes256_cbc_decrypt(
    key: &[u8; AES256_KEY_SIZE],
    iv: &[u8; IV_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>, Aes256Error> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(Aes256Error::BadPadding);
    }
    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Aes256Error::BadPadding)
}

#[derive(Debug, Error)]
pub enum Aes256Error {
    #[error("ciphertext length or PKCS#7 padding is malformed")]
    BadPadding,
}

#[cfg(test)]
mod tests {
    use super::{aes256_cbc_decrypt, aes256_cbc_encrypt, encrypt_output_length};

    #[test]
    fn encrypt_decrypt() {
        let key = [7; 32];
        let iv = [3; 16];

        for length in [0, 1, 15, 16, 17, 64] {
            let plaintext = vec![0x5a; length];
            let ciphertext = aes256_cbc_encrypt(&key, &iv, &plaintext);
            assert_eq!(ciphertext.len(), encrypt_output_length(length));
            assert_eq!(
                aes256_cbc_decrypt(&key, &iv, &ciphertext).unwrap(),
                plaintext
            );
        }
    }

    #[test]
    fn malformed_input_is_rejected() {
        let key = [7; 32];
        let iv = [3; 16];

        // Ciphertexts have to span at least one full block.
        assert!(aes256_cbc_decrypt(&key, &iv, &[]).is_err());
        assert!(aes256_cbc_decrypt(&key, &iv, &[0; 15]).is_err());

        // Flipping bits in the last block breaks the padding (with overwhelming probability).
        let mut ciphertext = aes256_cbc_encrypt(&key, &iv, b"attack at dawn");
        ciphertext[15] ^= 0xff;
        assert!(aes256_cbc_decrypt(&key, &iv, &ciphertext).is_err());
    }
}
