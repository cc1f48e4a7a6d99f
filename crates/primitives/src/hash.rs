//! Content hash type.

use std::{fmt, str::FromStr};

/// Length of a [`ContentHash`] in bytes.
pub const HASH_LENGTH: usize = 32;

/// Error returned when bytes or text cannot form a [`ContentHash`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HashError {
    /// Wrong number of bytes.
    #[error("invalid hash length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Required length.
        expected: usize,
        /// Supplied length.
        got: usize,
    },

    /// Text was not valid hex.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Fixed-length chunk identifier.
///
/// Equality, ordering and hashing are bytewise. The hash is supplied by the
/// caller; [`ContentHash::digest`] is the function the store uses when it
/// needs to recompute a data chunk's hash from its bytes.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; HASH_LENGTH]);

impl ContentHash {
    /// Reserved sentinel, never the hash of a stored chunk.
    pub const ZERO: Self = Self([0u8; HASH_LENGTH]);

    /// Wrap raw hash bytes.
    #[inline]
    pub const fn new(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Build a hash from a slice of exactly [`HASH_LENGTH`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HashError> {
        let bytes: [u8; HASH_LENGTH] =
            bytes.try_into().map_err(|_| HashError::InvalidLength {
                expected: HASH_LENGTH,
                got: bytes.len(),
            })?;
        Ok(Self(bytes))
    }

    /// Keccak-256 of `data`.
    pub fn digest(data: &[u8]) -> Self {
        Self(alloy_primitives::keccak256(data).0)
    }

    /// The raw bytes.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    /// Whether this is the reserved all-zero sentinel.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LENGTH]
    }

    /// The byte at `depth`, used to route through the block trie.
    #[inline]
    pub fn byte_at(&self, depth: usize) -> Option<u8> {
        self.0.get(depth).copied()
    }
}

impl From<[u8; HASH_LENGTH]> for ContentHash {
    fn from(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for ContentHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", hex::encode(self.0))
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_reserved() {
        assert!(ContentHash::ZERO.is_zero());
        assert!(ContentHash::default().is_zero());
        assert!(!ContentHash::digest(b"hello").is_zero());
    }

    #[test]
    fn test_hex_roundtrip() {
        let hash = ContentHash::digest(b"strata");
        let text = hash.to_string();
        assert_eq!(text.len(), HASH_LENGTH * 2);
        assert_eq!(text.parse::<ContentHash>().unwrap(), hash);
        assert_eq!(format!("0x{text}").parse::<ContentHash>().unwrap(), hash);
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        let err = ContentHash::from_slice(&[1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            HashError::InvalidLength {
                expected: HASH_LENGTH,
                got: 3
            }
        );
        assert!("abcd".parse::<ContentHash>().is_err());
        assert!("zz".parse::<ContentHash>().is_err());
    }

    #[test]
    fn test_invalid_hex_is_reported() {
        let err = "zz".parse::<ContentHash>().unwrap_err();
        assert_eq!(
            err,
            HashError::InvalidHex(hex::FromHexError::InvalidHexCharacter { c: 'z', index: 0 })
        );
        assert!(err.to_string().starts_with("invalid hex"));
    }

    #[test]
    fn test_byte_at() {
        let mut bytes = [0u8; HASH_LENGTH];
        bytes[0] = 0xab;
        bytes[31] = 0x01;
        let hash = ContentHash::new(bytes);
        assert_eq!(hash.byte_at(0), Some(0xab));
        assert_eq!(hash.byte_at(31), Some(0x01));
        assert_eq!(hash.byte_at(32), None);
    }

    #[test]
    fn test_digest_is_keccak() {
        // keccak256("") is a well-known constant.
        assert_eq!(
            ContentHash::digest(b"").to_string(),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }
}
