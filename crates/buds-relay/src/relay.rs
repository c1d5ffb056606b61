//! The relay contract.

use async_trait::async_trait;
use buds_core::{AuthorId, DeviceId};
use buds_e2ee::{EncryptedEnvelope, MessageId, RecipientDevice};
use bytes::Bytes;

use crate::error::{RelayError, Result};
use crate::messages::limits::MAX_AUTHORS_PER_LOOKUP;

/// An untrusted store-and-forward relay with a device directory.
///
/// Nothing returned by a relay is trusted: directory keys are checked
/// against local pins and every message is verified after decryption.
///
/// Each author has one mailbox, read by all of that author's devices.
/// A device acknowledges a message with [`Relay::delete_message`]; the relay
/// stops returning it to that device and drops it once every addressed
/// device of the author has acknowledged it.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Publish a local device in the directory. Idempotent.
    async fn register_device(
        &self,
        device: &RecipientDevice,
        contact_token: Option<&str>,
    ) -> Result<()>;

    /// Resolve a verified contact token to an author id.
    async fn lookup_identity(&self, contact_token: &str) -> Result<AuthorId>;

    /// Directory entries for up to twelve authors.
    async fn list_devices(&self, authors: &[AuthorId]) -> Result<Vec<RecipientDevice>>;

    async fn send_message(
        &self,
        envelope: &EncryptedEnvelope,
        recipients: &[AuthorId],
    ) -> Result<()>;

    /// Oldest messages in `author`'s mailbox not yet acknowledged by
    /// `device`. Delivery is at-least-once.
    async fn fetch_inbox(
        &self,
        author: &AuthorId,
        device: &DeviceId,
        limit: usize,
    ) -> Result<Vec<EncryptedEnvelope>>;

    /// Acknowledge a message on behalf of one device.
    async fn delete_message(
        &self,
        author: &AuthorId,
        device: &DeviceId,
        message_id: &MessageId,
    ) -> Result<()>;

    /// Fetch an externally stored sealed payload.
    async fn fetch_payload(&self, _locator: &str) -> Result<Bytes> {
        Err(RelayError::NotFound)
    }
}

/// Reject oversized directory lookups before any I/O.
pub fn check_author_count(authors: &[AuthorId]) -> Result<()> {
    if authors.len() > MAX_AUTHORS_PER_LOOKUP {
        return Err(RelayError::TooManyAuthors {
            count: authors.len(),
            max: MAX_AUTHORS_PER_LOOKUP,
        });
    }
    Ok(())
}
