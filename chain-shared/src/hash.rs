use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::ChainError;

/// 256-bit digest used to identify blocks, transactions and UTXOs.
///
/// Bytes are big-endian; comparing two `Hash256` values lexicographically is
/// equivalent to comparing them as 256-bit unsigned integers, which is what the
/// difficulty codec relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Computes the SHA-256 digest of `data`.
    #[must_use]
    pub fn sha256(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        Self(hash)
    }

    /// Parses a hash from a hex string, with or without a `0x` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::InvalidHash`] if the string is not 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, ChainError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| ChainError::InvalidHash)?;
        if bytes.len() != 32 {
            return Err(ChainError::InvalidHash);
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        Ok(Self(hash))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl TryFrom<&str> for Hash256 {
    type Error = ChainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_hex(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_hash_displays_as_64_zeros() {
        let hash = Hash256::zero();
        assert_eq!(hash.to_string(), "0".repeat(64));
    }

    #[test]
    fn sha256_of_known_data_is_stable_and_nonzero() {
        let hash = Hash256::sha256(b"hello world");
        assert_ne!(hash, Hash256::zero());
        assert_eq!(hash, Hash256::sha256(b"hello world"));
    }

    #[test]
    fn ordering_is_lexicographic_over_bytes() {
        let small = Hash256::from_bytes([0u8; 32]);
        let mut big_bytes = [0u8; 32];
        big_bytes[0] = 1;
        let big = Hash256::from_bytes(big_bytes);
        assert!(small < big);
    }

    #[test]
    fn from_hex_round_trips_and_rejects_bad_length() {
        let hash = Hash256::sha256(b"round trip");
        let hex = hash.to_string();
        assert_eq!(Hash256::from_hex(&hex).unwrap(), hash);
        assert_eq!(Hash256::from_hex(&format!("0x{hex}")).unwrap(), hash);
        assert!(Hash256::from_hex("00").is_err());
    }
}
