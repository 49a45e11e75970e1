//! SHA-256 digests and the block hash type.
//!
//! A `BlockHash` is always exactly 32 bytes; the hex helpers exist because
//! hashes travel as lowercase hex over the wire.

use std::fmt;

use sha2::{Digest, Sha256};

pub const HASH_LENGTH: usize = 32;

/// The SHA-256 digest of a block's canonical payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHash([u8; HASH_LENGTH]);

#[derive(Debug, PartialEq, Eq)]
pub enum HashError {
    /// The input was not valid hex.
    InvalidHex,
    /// The input decoded to the wrong number of bytes.
    InvalidLength(usize),
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashError::InvalidHex => write!(f, "hash is not valid hex"),
            HashError::InvalidLength(length) => {
                write!(f, "hash is {length} bytes, expected {HASH_LENGTH}")
            }
        }
    }
}

impl BlockHash {
    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a hex string into a hash.
    pub fn from_hex(text: &str) -> Result<Self, HashError> {
        let bytes = hex::decode(text).map_err(|_| HashError::InvalidHex)?;
        Self::try_from(bytes.as_slice())
    }
}

impl From<[u8; HASH_LENGTH]> for BlockHash {
    fn from(bytes: [u8; HASH_LENGTH]) -> Self {
        BlockHash(bytes)
    }
}

impl TryFrom<&[u8]> for BlockHash {
    type Error = HashError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let array: [u8; HASH_LENGTH] = bytes
            .try_into()
            .map_err(|_| HashError::InvalidLength(bytes.len()))?;
        Ok(BlockHash(array))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Computes the SHA-256 digest of the given bytes.
pub fn sha256(data: &[u8]) -> BlockHash {
    BlockHash(Sha256::digest(data).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        // sha256("abc")
        let hash = sha256(b"abc");
        assert_eq!(
            hash.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hex_round_trip() {
        let hash = sha256(b"round trip");
        let parsed = BlockHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn test_from_hex_rejects_garbage() {
        assert_eq!(BlockHash::from_hex("zz"), Err(HashError::InvalidHex));
        assert_eq!(
            BlockHash::from_hex("abcd"),
            Err(HashError::InvalidLength(2))
        );
    }
}
