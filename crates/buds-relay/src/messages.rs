//! Relay wire types.
//!
//! JSON bodies exchanged with the relay. Binary fields are base64 with the
//! standard alphabet; identifiers travel as their canonical text forms.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use buds_core::{AuthorId, Cid, DeviceId, Ed25519PublicKey, Ed25519Signature};
use buds_e2ee::{
    CiphertextRef, DeviceStatus, EncryptedEnvelope, MessageId, RecipientDevice, X25519PublicKey,
};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Request size limits.
pub mod limits {
    /// Max author ids in one device-list lookup.
    pub const MAX_AUTHORS_PER_LOOKUP: usize = 12;
    /// Inbox page size when none is given.
    pub const DEFAULT_INBOX_LIMIT: usize = 50;
    /// Largest inbox page the relay serves.
    pub const MAX_INBOX_LIMIT: usize = 100;
}

/// Serde adapter: bytes as standard base64 text.
mod b64 {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer, T: AsRef<[u8]>>(bytes: &T, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

fn decode_key<const N: usize>(what: &str, text: &str) -> Result<[u8; N]> {
    let bytes = STANDARD
        .decode(text)
        .map_err(|e| RelayError::Malformed(format!("{what}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| RelayError::Malformed(format!("{what}: expected {N} bytes")))
}

fn malformed(what: &str) -> impl FnOnce(buds_core::CoreError) -> RelayError + '_ {
    move |e| RelayError::Malformed(format!("{what}: {e}"))
}

/// `POST /api/devices/register`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDeviceRequest {
    pub device_id: String,
    pub device_name: String,
    pub owner_did: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_phone_hash: Option<String>,
    pub pubkey_x25519: String,
    pub pubkey_ed25519: String,
}

impl RegisterDeviceRequest {
    pub fn new(device: &RecipientDevice, contact_token: Option<&str>) -> Self {
        Self {
            device_id: device.device_id.to_string(),
            device_name: device.device_name.clone(),
            owner_did: device.owner_author_id.to_string(),
            owner_phone_hash: contact_token.map(str::to_string),
            pubkey_x25519: STANDARD.encode(device.agreement_key.as_bytes()),
            pubkey_ed25519: STANDARD.encode(device.signing_key.as_bytes()),
        }
    }
}

/// `POST /api/identity/lookup`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityLookupRequest {
    pub phone_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityLookupResponse {
    pub did: String,
}

/// `POST /api/devices/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListDevicesRequest {
    pub dids: Vec<String>,
}

/// Entries stay raw so one bad entry can be skipped; see [`parse_each`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListDevicesResponse {
    pub devices: Vec<serde_json::Value>,
}

/// A directory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDto {
    pub device_id: String,
    pub device_name: String,
    pub owner_did: String,
    pub pubkey_x25519: String,
    pub pubkey_ed25519: String,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    DeviceStatus::Active.as_str().to_string()
}

impl DeviceDto {
    pub fn from_device(device: &RecipientDevice) -> Self {
        Self {
            device_id: device.device_id.to_string(),
            device_name: device.device_name.clone(),
            owner_did: device.owner_author_id.to_string(),
            pubkey_x25519: STANDARD.encode(device.agreement_key.as_bytes()),
            pubkey_ed25519: STANDARD.encode(device.signing_key.as_bytes()),
            status: device.status.as_str().to_string(),
        }
    }

    pub fn into_device(self) -> Result<RecipientDevice> {
        Ok(RecipientDevice {
            device_id: DeviceId::parse(&self.device_id).map_err(malformed("device_id"))?,
            owner_author_id: AuthorId::parse(&self.owner_did).map_err(malformed("owner_did"))?,
            device_name: self.device_name,
            agreement_key: X25519PublicKey(decode_key("pubkey_x25519", &self.pubkey_x25519)?),
            signing_key: Ed25519PublicKey(decode_key("pubkey_ed25519", &self.pubkey_ed25519)?),
            status: DeviceStatus::parse(&self.status)
                .ok_or_else(|| RelayError::Malformed(format!("status: {}", self.status)))?,
        })
    }
}

/// Pointer to a sealed payload stored outside the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadRefDto {
    pub locator: String,
    #[serde(with = "b64")]
    pub sha256: Vec<u8>,
}

/// `POST /api/messages/send` body, and one inbox entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDto {
    pub message_id: String,
    pub receipt_cid: String,
    pub sender_did: String,
    pub sender_device_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipient_dids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_payload_ref: Option<PayloadRefDto>,
    /// Device id -> base64 wrapped content key.
    pub wrapped_keys: BTreeMap<String, String>,
    pub signature: String,
    pub created_at: i64,
    pub expires_at: i64,
}

impl MessageDto {
    pub fn from_envelope(envelope: &EncryptedEnvelope, recipients: &[AuthorId]) -> Self {
        let (encrypted_payload, encrypted_payload_ref) = match &envelope.ciphertext {
            CiphertextRef::Inline(bytes) => (Some(STANDARD.encode(bytes)), None),
            CiphertextRef::External { locator, sha256 } => (
                None,
                Some(PayloadRefDto {
                    locator: locator.clone(),
                    sha256: sha256.to_vec(),
                }),
            ),
        };
        Self {
            message_id: envelope.message_id.to_string(),
            receipt_cid: envelope.receipt_cid.to_string(),
            sender_did: envelope.sender_author_id.to_string(),
            sender_device_id: envelope.sender_device_id.to_string(),
            recipient_dids: recipients.iter().map(ToString::to_string).collect(),
            encrypted_payload,
            encrypted_payload_ref,
            wrapped_keys: envelope
                .wrapped_keys
                .iter()
                .map(|(id, key)| (id.to_string(), STANDARD.encode(key)))
                .collect(),
            signature: STANDARD.encode(envelope.signature.as_bytes()),
            created_at: envelope.created_at,
            expires_at: envelope.expires_at,
        }
    }

    pub fn into_envelope(self) -> Result<EncryptedEnvelope> {
        let ciphertext = match (self.encrypted_payload, self.encrypted_payload_ref) {
            (Some(inline), None) => CiphertextRef::Inline(Bytes::from(
                STANDARD
                    .decode(inline)
                    .map_err(|e| RelayError::Malformed(format!("encrypted_payload: {e}")))?,
            )),
            (None, Some(reference)) => CiphertextRef::External {
                locator: reference.locator,
                sha256: reference
                    .sha256
                    .try_into()
                    .map_err(|_| RelayError::Malformed("sha256: expected 32 bytes".into()))?,
            },
            _ => {
                return Err(RelayError::Malformed(
                    "exactly one of encrypted_payload and encrypted_payload_ref required".into(),
                ))
            }
        };

        let wrapped_keys = self
            .wrapped_keys
            .iter()
            .map(|(id, key)| {
                let device_id = DeviceId::parse(id).map_err(malformed("wrapped_keys"))?;
                let key = STANDARD
                    .decode(key)
                    .map_err(|e| RelayError::Malformed(format!("wrapped_keys: {e}")))?;
                Ok((device_id, key))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let signature = STANDARD
            .decode(&self.signature)
            .map_err(|e| RelayError::Malformed(format!("signature: {e}")))?;

        Ok(EncryptedEnvelope {
            message_id: MessageId::parse(&self.message_id)
                .ok_or_else(|| RelayError::Malformed(format!("message_id: {}", self.message_id)))?,
            receipt_cid: Cid::parse(&self.receipt_cid).map_err(malformed("receipt_cid"))?,
            ciphertext,
            wrapped_keys,
            sender_author_id: AuthorId::parse(&self.sender_did).map_err(malformed("sender_did"))?,
            sender_device_id: DeviceId::parse(&self.sender_device_id)
                .map_err(malformed("sender_device_id"))?,
            signature: Ed25519Signature::from_slice(&signature).map_err(malformed("signature"))?,
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}

/// `GET /api/messages/inbox` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxResponse {
    #[serde(default)]
    pub count: usize,
    pub messages: Vec<serde_json::Value>,
}

/// Decode list entries one at a time, logging and skipping bad ones.
pub fn parse_each<D, T>(
    entries: Vec<serde_json::Value>,
    what: &str,
    convert: impl Fn(D) -> Result<T>,
) -> Vec<T>
where
    D: DeserializeOwned,
{
    let mut parsed = Vec::with_capacity(entries.len());
    for raw in entries {
        let entry = serde_json::from_value::<D>(raw)
            .map_err(|e| RelayError::Malformed(e.to_string()))
            .and_then(&convert);
        match entry {
            Ok(value) => parsed.push(value),
            Err(e) => tracing::warn!(error = %e, "skipping malformed {what}"),
        }
    }
    parsed
}
