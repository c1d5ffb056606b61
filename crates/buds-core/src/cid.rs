//! Content identifiers.
//!
//! A CID is a CIDv1 over the canonical bytes of a record:
//!
//! ```text
//! 0x01 (CIDv1) || 0x71 (dag-cbor) || 0x12 (sha2-256) || 0x20 (32 bytes) || digest
//! ```
//!
//! The textual form is multibase base32 (lowercase, unpadded) with a `b`
//! prefix. Parsing rejects any other version, codec, or hash function, so a
//! future format is a parse error rather than a silent misreading.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::base32;
use crate::error::{CoreError, Result};

/// CID version byte.
pub const CID_VERSION: u8 = 0x01;
/// Multicodec for dag-cbor.
pub const CODEC_DAG_CBOR: u8 = 0x71;
/// Multihash code for sha2-256.
pub const MULTIHASH_SHA2_256: u8 = 0x12;
/// Digest length in bytes.
pub const DIGEST_LEN: u8 = 0x20;
/// Length of the binary CID.
pub const CID_LEN: usize = 36;

const MULTIBASE_BASE32: char = 'b';

/// A content identifier (sha2-256 over dag-cbor bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid([u8; 32]);

impl Cid {
    /// Address the given bytes.
    pub fn address_of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        Self(digest.into())
    }

    /// Wrap a raw sha2-256 digest.
    pub const fn from_digest(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    /// The sha2-256 digest.
    pub const fn digest(&self) -> &[u8; 32] {
        &self.0
    }

    /// Binary CIDv1 form.
    pub fn to_bytes(&self) -> [u8; CID_LEN] {
        let mut out = [0u8; CID_LEN];
        out[0] = CID_VERSION;
        out[1] = CODEC_DAG_CBOR;
        out[2] = MULTIHASH_SHA2_256;
        out[3] = DIGEST_LEN;
        out[4..].copy_from_slice(&self.0);
        out
    }

    /// Parse the binary CIDv1 form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != CID_LEN {
            return Err(CoreError::InvalidCid(format!(
                "expected {CID_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[0] != CID_VERSION {
            return Err(CoreError::InvalidCid(format!(
                "unsupported version 0x{:02x}",
                bytes[0]
            )));
        }
        if bytes[1] != CODEC_DAG_CBOR {
            return Err(CoreError::InvalidCid(format!(
                "unsupported codec 0x{:02x}",
                bytes[1]
            )));
        }
        if bytes[2] != MULTIHASH_SHA2_256 || bytes[3] != DIGEST_LEN {
            return Err(CoreError::InvalidCid("unsupported multihash".into()));
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&bytes[4..]);
        Ok(Self(digest))
    }

    /// Parse the multibase string form.
    pub fn parse(s: &str) -> Result<Self> {
        let body = s
            .strip_prefix(MULTIBASE_BASE32)
            .ok_or_else(|| CoreError::InvalidCid("unsupported multibase".into()))?;
        let bytes = base32::decode(body)
            .ok_or_else(|| CoreError::InvalidCid("invalid base32".into()))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Address canonical bytes.
pub fn address_of(bytes: &[u8]) -> Cid {
    Cid::address_of(bytes)
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", MULTIBASE_BASE32, base32::encode(&self.to_bytes()))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({}...)", &self.to_hex()[..12])
    }
}

impl FromStr for Cid {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Cid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
