// SPDX-License-Identifier: MIT OR Apache-2.0

//! HMAC-SHA256 and HKDF-SHA256 key derivation functions.
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::crypto::sha2::SHA256_DIGEST_SIZE;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 keyed hash as specified in RFC 2104.
pub fn hmac_sha256(key: &[u8], input: &[u8]) -> [u8; SHA256_DIGEST_SIZE] {
    let mut hmac = HmacSha256::new_from_slice(key).expect("hmac accepts any key size");
    hmac.update(input);
    let result = hmac.finalize().into_bytes();
    result[..].try_into().expect("hmac-sha256 digest size")
}

/// HKDF-SHA256 key derivation as specified in RFC 5869, filling the whole output slice with
/// expanded key material.
pub fn hkdf_sha256(salt: &[u8], ikm: &[u8], info: &[u8], okm: &mut [u8]) {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);
    hkdf.expand(info, okm)
        .expect("hkdf output length is at most 255 blocks");
}

#[cfg(test)]
mod tests {
    use super::{hkdf_sha256, hmac_sha256};

    #[test]
    fn hkdf_rfc_5869_test_case_1() {
        // Basic test case from RFC 5869, Appendix A.1.
        let ikm = [0x0b; 22];
        let salt: Vec<u8> = (0x00..=0x0c).collect();
        let info: Vec<u8> = (0xf0..=0xf9).collect();

        let mut okm = [0u8; 42];
        hkdf_sha256(&salt, &ikm, &info, &mut okm);

        assert_eq!(
            hex::encode(okm),
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
        );
    }

    #[test]
    fn hmac_rfc_4231_test_case_2() {
        let output = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            hex::encode(output),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }
}
