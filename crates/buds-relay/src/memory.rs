//! In-process relay.
//!
//! Holds the directory and mailboxes in memory and routes every message
//! through its JSON wire form, so tests exercise the same encoding as the
//! HTTP relay. Delivery is at-least-once: fetching does not remove messages,
//! acknowledging does, once every addressed device of the mailbox owner has
//! acknowledged.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use buds_core::{AuthorId, DeviceId};
use buds_e2ee::{DeviceStatus, EncryptedEnvelope, MessageId, RecipientDevice};
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::error::{RelayError, Result};
use crate::messages::MessageDto;
use crate::relay::{check_author_count, Relay};

#[derive(Default)]
struct State {
    devices: BTreeMap<DeviceId, RecipientDevice>,
    contacts: HashMap<String, AuthorId>,
    mailboxes: HashMap<AuthorId, Vec<Queued>>,
    payloads: HashMap<String, Bytes>,
}

/// A message waiting in one author's mailbox.
struct Queued {
    message_id: String,
    /// The wire form, exactly as it would be served.
    json: String,
    /// Addressed devices of the mailbox owner still to acknowledge.
    pending: BTreeSet<DeviceId>,
    acknowledged: BTreeSet<DeviceId>,
}

impl State {
    fn enqueue(&mut self, author: &AuthorId, message: &MessageDto, json: String) {
        let pending = message
            .wrapped_keys
            .keys()
            .filter_map(|id| DeviceId::parse(id).ok())
            .filter(|id| {
                self.devices
                    .get(id)
                    .is_some_and(|d| d.owner_author_id == *author)
            })
            .collect();
        self.mailboxes
            .entry(author.clone())
            .or_default()
            .push(Queued {
                message_id: message.message_id.clone(),
                json,
                pending,
                acknowledged: BTreeSet::new(),
            });
    }
}

#[derive(Default)]
pub struct MemoryRelay {
    state: RwLock<State>,
    failures: AtomicU32,
}

impl MemoryRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `n` calls with [`RelayError::Unavailable`].
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    fn maybe_fail(&self) -> Result<()> {
        let took = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match took {
            Ok(_) => Err(RelayError::Unavailable("injected failure".into())),
            Err(_) => Ok(()),
        }
    }

    /// Put a directory entry in place as-is, bypassing registration.
    pub async fn publish_device(&self, device: RecipientDevice) {
        self.state
            .write()
            .await
            .devices
            .insert(device.device_id, device);
    }

    pub async fn revoke_device(&self, device_id: &DeviceId) -> bool {
        match self.state.write().await.devices.get_mut(device_id) {
            Some(device) => {
                device.status = DeviceStatus::Revoked;
                true
            }
            None => false,
        }
    }

    pub async fn add_contact(&self, contact_token: impl Into<String>, author: AuthorId) {
        self.state
            .write()
            .await
            .contacts
            .insert(contact_token.into(), author);
    }

    /// Deliver a raw wire message to an author's mailbox.
    pub async fn inject(&self, author: &AuthorId, message: &MessageDto) {
        let json = serde_json::to_string(message).unwrap_or_default();
        self.state.write().await.enqueue(author, message, json);
    }

    /// Drop a message from an author's mailbox without acknowledgement.
    pub async fn remove(&self, author: &AuthorId, message_id: &MessageId) -> bool {
        let id = message_id.to_string();
        match self.state.write().await.mailboxes.get_mut(author) {
            Some(queue) => {
                let before = queue.len();
                queue.retain(|q| q.message_id != id);
                queue.len() != before
            }
            None => false,
        }
    }

    /// Raw wire messages waiting for an author.
    pub async fn mailbox(&self, author: &AuthorId) -> Vec<MessageDto> {
        let state = self.state.read().await;
        state
            .mailboxes
            .get(author)
            .map(|queue| {
                queue
                    .iter()
                    .filter_map(|q| serde_json::from_str(&q.json).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn mailbox_len(&self, author: &AuthorId) -> usize {
        self.state
            .read()
            .await
            .mailboxes
            .get(author)
            .map_or(0, Vec::len)
    }

    /// Store an external sealed payload under `locator`.
    pub async fn put_payload(&self, locator: impl Into<String>, blob: Bytes) {
        self.state
            .write()
            .await
            .payloads
            .insert(locator.into(), blob);
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn register_device(
        &self,
        device: &RecipientDevice,
        contact_token: Option<&str>,
    ) -> Result<()> {
        self.maybe_fail()?;
        let mut state = self.state.write().await;
        state.devices.insert(device.device_id, device.clone());
        if let Some(token) = contact_token {
            state
                .contacts
                .insert(token.to_string(), device.owner_author_id.clone());
        }
        Ok(())
    }

    async fn lookup_identity(&self, contact_token: &str) -> Result<AuthorId> {
        self.maybe_fail()?;
        self.state
            .read()
            .await
            .contacts
            .get(contact_token)
            .cloned()
            .ok_or(RelayError::NotFound)
    }

    async fn list_devices(&self, authors: &[AuthorId]) -> Result<Vec<RecipientDevice>> {
        check_author_count(authors)?;
        self.maybe_fail()?;
        let state = self.state.read().await;
        Ok(state
            .devices
            .values()
            .filter(|d| authors.contains(&d.owner_author_id))
            .cloned()
            .collect())
    }

    async fn send_message(
        &self,
        envelope: &EncryptedEnvelope,
        recipients: &[AuthorId],
    ) -> Result<()> {
        self.maybe_fail()?;
        if recipients.is_empty() {
            return Err(RelayError::Rejected {
                status: 400,
                message: "no recipients".into(),
            });
        }
        let message = MessageDto::from_envelope(envelope, recipients);
        let json =
            serde_json::to_string(&message).map_err(|e| RelayError::Malformed(e.to_string()))?;
        let mut state = self.state.write().await;
        for author in recipients {
            state.enqueue(author, &message, json.clone());
        }
        Ok(())
    }

    async fn fetch_inbox(
        &self,
        author: &AuthorId,
        device: &DeviceId,
        limit: usize,
    ) -> Result<Vec<EncryptedEnvelope>> {
        self.maybe_fail()?;
        let state = self.state.read().await;
        let Some(queue) = state.mailboxes.get(author) else {
            return Ok(Vec::new());
        };
        let mut envelopes = Vec::new();
        let unacknowledged = queue.iter().filter(|q| !q.acknowledged.contains(device));
        for queued in unacknowledged.take(limit) {
            let parsed = serde_json::from_str::<MessageDto>(&queued.json)
                .map_err(|e| RelayError::Malformed(e.to_string()))
                .and_then(MessageDto::into_envelope);
            match parsed {
                Ok(envelope) => envelopes.push(envelope),
                Err(e) => tracing::warn!(error = %e, "skipping malformed inbox message"),
            }
        }
        Ok(envelopes)
    }

    async fn delete_message(
        &self,
        author: &AuthorId,
        device: &DeviceId,
        message_id: &MessageId,
    ) -> Result<()> {
        self.maybe_fail()?;
        let id = message_id.to_string();
        let mut state = self.state.write().await;
        let Some(queue) = state.mailboxes.get_mut(author) else {
            return Err(RelayError::NotFound);
        };

        let mut found = false;
        for queued in queue
            .iter_mut()
            .filter(|q| q.message_id == id && !q.acknowledged.contains(device))
        {
            queued.acknowledged.insert(*device);
            queued.pending.remove(device);
            found = true;
        }
        if !found {
            return Err(RelayError::NotFound);
        }
        queue.retain(|q| !(q.message_id == id && q.pending.is_empty()));
        Ok(())
    }

    async fn fetch_payload(&self, locator: &str) -> Result<Bytes> {
        self.maybe_fail()?;
        self.state
            .read()
            .await
            .payloads
            .get(locator)
            .cloned()
            .ok_or(RelayError::NotFound)
    }
}
