//! Content digests and their multihash wire form
//!
//! Packages are addressed by a SHA-256 digest over their source tree. The
//! public identifier is the multihash rendering: a two-byte format prefix
//! (algorithm and payload length) followed by the raw digest, hex-encoded.

use sha2::{Digest as _, Sha256};
use std::fmt;
use thiserror::Error;

/// Raw digest length in bytes (SHA-256).
pub const DIGEST_LEN: usize = 32;

/// Multihash format prefix: `0x12` (sha2-256) followed by `0x20` (32-byte payload).
pub const MULTIHASH_PREFIX: [u8; 2] = [0x12, 0x20];

/// Length of the hex-encoded multihash identifier (68 characters).
pub const HEX_DIGEST_LEN: usize = (MULTIHASH_PREFIX.len() + DIGEST_LEN) * 2;

/// Errors that can occur when parsing a hex digest
#[derive(Debug, Error)]
pub enum DigestError {
    /// Wrong identifier length
    #[error("invalid digest length: expected {HEX_DIGEST_LEN} hex characters, found {found}")]
    BadLength { found: usize },

    /// Identifier does not start with the supported multihash prefix
    #[error("unsupported multihash prefix: expected \"1220\"")]
    BadPrefix,

    /// Non-hex character in the identifier
    #[error("invalid hex digest: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// A 256-bit content digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest(pub [u8; DIGEST_LEN]);

impl ContentDigest {
    /// Finalize a streaming hasher into a digest.
    pub fn from_hasher(hasher: Sha256) -> Self {
        ContentDigest(hasher.finalize().into())
    }

    /// Render the multihash hex identifier used for cache addressing.
    pub fn to_hex(&self) -> String {
        let mut bytes = Vec::with_capacity(MULTIHASH_PREFIX.len() + DIGEST_LEN);
        bytes.extend_from_slice(&MULTIHASH_PREFIX);
        bytes.extend_from_slice(&self.0);
        hex::encode(bytes)
    }

    /// Parse a multihash hex identifier back into a digest.
    pub fn parse_hex(s: &str) -> Result<Self, DigestError> {
        if s.len() != HEX_DIGEST_LEN {
            return Err(DigestError::BadLength { found: s.len() });
        }
        let bytes = hex::decode(s)?;
        if bytes[..MULTIHASH_PREFIX.len()] != MULTIHASH_PREFIX {
            return Err(DigestError::BadPrefix);
        }
        let mut raw = [0u8; DIGEST_LEN];
        raw.copy_from_slice(&bytes[MULTIHASH_PREFIX.len()..]);
        Ok(ContentDigest(raw))
    }

    /// Check whether a string is a syntactically well-formed hex identifier.
    pub fn is_well_formed_hex(s: &str) -> bool {
        Self::parse_hex(s).is_ok()
    }

    /// Raw digest bytes, without the multihash prefix.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
