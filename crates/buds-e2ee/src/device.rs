//! Local device identity and remote device records.

use buds_core::{AuthorId, DeviceId, Ed25519PublicKey, Keypair};
use serde::{Deserialize, Serialize};

use crate::crypto::{X25519PublicKey, X25519StaticSecret};

/// This installation's keys. Private halves never leave the device.
#[derive(Clone)]
pub struct DeviceIdentity {
    pub device_id: DeviceId,
    /// Author this device acts for.
    pub owner_author_id: AuthorId,
    pub device_name: String,
    pub signing: Keypair,
    pub agreement: X25519StaticSecret,
}

impl DeviceIdentity {
    /// Create a primary device; the author id is derived from its signing key.
    pub fn generate_primary(device_name: impl Into<String>) -> Self {
        let signing = Keypair::generate();
        let owner_author_id = AuthorId::derive(&signing.public_key());
        Self {
            device_id: DeviceId::generate(),
            owner_author_id,
            device_name: device_name.into(),
            signing,
            agreement: X25519StaticSecret::generate(),
        }
    }

    /// Create a secondary device for an existing author. It is trusted by
    /// peers only once the primary signs a device link for it.
    pub fn generate_linked(owner_author_id: AuthorId, device_name: impl Into<String>) -> Self {
        Self {
            device_id: DeviceId::generate(),
            owner_author_id,
            device_name: device_name.into(),
            signing: Keypair::generate(),
            agreement: X25519StaticSecret::generate(),
        }
    }

    pub fn signing_key(&self) -> Ed25519PublicKey {
        self.signing.public_key()
    }

    pub fn agreement_key(&self) -> X25519PublicKey {
        self.agreement.public_key()
    }

    /// Whether this device's signing key derives its author id.
    pub fn is_primary(&self) -> bool {
        self.owner_author_id.is_derived_from(&self.signing_key())
    }

    /// The public record peers see for this device.
    pub fn to_recipient(&self) -> RecipientDevice {
        RecipientDevice {
            device_id: self.device_id,
            owner_author_id: self.owner_author_id.clone(),
            device_name: self.device_name.clone(),
            agreement_key: self.agreement_key(),
            signing_key: self.signing_key(),
            status: DeviceStatus::Active,
        }
    }
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .field("owner_author_id", &self.owner_author_id)
            .field("device_name", &self.device_name)
            .field("signing_key", &self.signing_key())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Active,
    Revoked,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

/// A remote device as published in the relay directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientDevice {
    pub device_id: DeviceId,
    /// Claimed owner; advisory until checked against a device link.
    pub owner_author_id: AuthorId,
    pub device_name: String,
    pub agreement_key: X25519PublicKey,
    pub signing_key: Ed25519PublicKey,
    pub status: DeviceStatus,
}

impl RecipientDevice {
    pub fn is_active(&self) -> bool {
        self.status == DeviceStatus::Active
    }
}
