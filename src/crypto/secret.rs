// SPDX-License-Identifier: MIT OR Apache-2.0

//! Container for fixed-size secret key material.
use std::fmt;

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Fixed-size secret key material: a chain key, a root key or a raw Diffie-Hellman output.
///
/// The raw bytes are only reachable through the crate-internal [`expose`](Self::expose), so no
/// key material leaks into the public API surface. Values compare in constant time, never show
/// their contents in debug output and zero their memory when dropped. Scratch copies made during
/// transactional decryption get the same treatment automatically.
#[derive(Clone)]
pub struct Secret<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> Secret<N> {
    pub(crate) fn from_bytes(bytes: [u8; N]) -> Self {
        Self { bytes }
    }

    /// Grants read access to the raw key material.
    pub(crate) fn expose(&self) -> &[u8; N] {
        &self.bytes
    }
}

impl<const N: usize> Drop for Secret<N> {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl<const N: usize> PartialEq for Secret<N> {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.bytes.ct_eq(&other.bytes))
    }
}

impl<const N: usize> Eq for Secret<N> {}

impl<const N: usize> fmt::Debug for Secret<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret<{N}>(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::Secret;

    #[test]
    fn equality_and_clones() {
        let secret = Secret::from_bytes([7u8; 32]);
        let clone = secret.clone();
        assert_eq!(secret, clone);
        assert_eq!(secret.expose(), clone.expose());
        assert_ne!(secret, Secret::from_bytes([8u8; 32]));
    }

    #[test]
    fn debug_output_is_redacted() {
        let secret = Secret::from_bytes([0xaa; 16]);
        let printed = format!("{secret:?}");
        assert_eq!(printed, "Secret<16>(***)");
        assert!(!printed.contains("170"));
    }
}
