//! Author and device identifiers.
//!
//! An author is identified by a DID derived from the signing key of its
//! primary device. Every installation gets its own random [`DeviceId`];
//! secondary devices join an author through a signed device-link receipt
//! issued by the primary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::base32;
use crate::crypto::Ed25519PublicKey;
use crate::error::{CoreError, Result};

/// DID method prefix for Buds authors.
pub const AUTHOR_ID_PREFIX: &str = "did:buds:";

/// Key derivation context for author ids.
const AUTHOR_ID_CONTEXT: &str = "buds/author-id/v1";

/// Number of derived bytes kept in an author id.
const AUTHOR_ID_BYTES: usize = 20;

/// Stable author identifier: `did:buds:<base32(20 bytes)>`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AuthorId(String);

impl AuthorId {
    /// Derive the author id owned by a primary device's signing key.
    pub fn derive(primary_signing_key: &Ed25519PublicKey) -> Self {
        let key = blake3::derive_key(AUTHOR_ID_CONTEXT, primary_signing_key.as_bytes());
        Self(format!(
            "{AUTHOR_ID_PREFIX}{}",
            base32::encode(&key[..AUTHOR_ID_BYTES])
        ))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let body = s
            .strip_prefix(AUTHOR_ID_PREFIX)
            .ok_or_else(|| CoreError::InvalidAuthorId(s.to_string()))?;
        match base32::decode(body) {
            Some(bytes) if bytes.len() == AUTHOR_ID_BYTES => Ok(Self(s.to_string())),
            _ => Err(CoreError::InvalidAuthorId(s.to_string())),
        }
    }

    /// Whether this id is derived from the given key (i.e. the key belongs
    /// to the author's primary device).
    pub fn is_derived_from(&self, signing_key: &Ed25519PublicKey) -> bool {
        *self == Self::derive(signing_key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthorId({})", self.0)
    }
}

impl FromStr for AuthorId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AuthorId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<AuthorId> for String {
    fn from(id: AuthorId) -> Self {
        id.0
    }
}

/// Per-installation device identifier (UUID v4).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| CoreError::InvalidDeviceId(s.to_string()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Hyphenated lowercase; this exact text is bound into wrapped keys.
        write!(f, "{}", self.0.hyphenated())
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0.hyphenated())
    }
}

impl FromStr for DeviceId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
