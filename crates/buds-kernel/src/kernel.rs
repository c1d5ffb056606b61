//! The Kernel: unified API for Buds.
//!
//! The Kernel ties one local device identity to a store and a relay and
//! runs the two flows:
//!
//! - **Send**: create receipt -> resolve recipient devices -> seal -> relay
//! - **Receive**: relay -> decrypt -> address check -> trust check ->
//!   signature check -> store
//!
//! Nothing received is stored, and no pin is written, unless every check
//! passed.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use buds_core::{
    create_receipt, verify_receipt, verify_receipt_with_key, AuthorId, Cid, DeviceId,
    DeviceLinkPayload, Ed25519PublicKey, Receipt, ReceiptPayload, ValidationError,
};
use buds_e2ee::{
    decrypt, encrypt_for_recipients, CiphertextRef, DeviceIdentity, EncryptedEnvelope, MessageId,
    RecipientDevice, DEFAULT_TTL_MS,
};
use buds_relay::{check_author_count, limits, with_retry, Relay, RelayError, RetryPolicy};
use buds_store::{DeviceKeyRecord, InsertResult, PinnedKey, Store, TrustState};
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorCategory, KernelError, Result};
use crate::trust::TrustStore;

/// Configuration for the Kernel.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Backoff for relay calls.
    pub retry: RetryPolicy,
    /// Messages requested per inbox fetch.
    pub inbox_batch: usize,
    /// Acknowledge settled messages for this device so the relay stops
    /// returning them.
    ///
    /// Without acknowledgement every sync reads the same first page.
    pub ack_processed: bool,
    /// How long processed message ids are remembered for dedupe.
    pub ledger_retention_ms: i64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            inbox_batch: limits::DEFAULT_INBOX_LIMIT,
            ack_processed: true,
            // past the relay TTL, so a redelivery is always recognized
            ledger_retention_ms: 2 * DEFAULT_TTL_MS,
        }
    }
}

/// Why a recipient device was left out of a share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    Revoked,
    /// Secondary device without a device link from its author.
    Unlinked,
    /// Directory keys disagree with the pin. Possible relay attack.
    KeyMismatch,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludedDevice {
    pub device_id: DeviceId,
    pub owner_author_id: AuthorId,
    pub reason: ExclusionReason,
}

/// Recipient devices after trust checks.
#[derive(Debug, Clone, Default)]
pub struct DeviceResolution {
    pub devices: Vec<RecipientDevice>,
    pub excluded: Vec<ExcludedDevice>,
}

/// Result of sharing a receipt.
#[derive(Debug, Clone)]
pub struct ShareReport {
    pub message_id: MessageId,
    pub receipt_cid: Cid,
    /// Devices holding a wrapped key.
    pub devices: Vec<DeviceId>,
    pub excluded: Vec<ExcludedDevice>,
}

/// Result of processing one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Verified and stored.
    Accepted(Receipt),
    /// Verified; the receipt was already stored.
    AlreadyStored(Cid),
    /// This message id was processed before.
    Duplicate,
    /// Past its expiry; discarded without decrypting.
    Expired,
    /// Carries no key for this device.
    NotAddressed,
}

/// A message that failed a check and was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedMessage {
    pub message_id: MessageId,
    pub sender_device_id: DeviceId,
    pub category: ErrorCategory,
    pub security_warning: bool,
}

/// Result of one inbox sync.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub fetched: usize,
    pub accepted: Vec<Cid>,
    pub already_stored: usize,
    pub duplicates: usize,
    pub expired: usize,
    pub not_addressed: usize,
    pub rejected: Vec<RejectedMessage>,
    /// Left in place after a transient failure; retried next sync.
    pub deferred: Vec<MessageId>,
}

impl SyncReport {
    fn record(&mut self, outcome: ProcessOutcome) {
        match outcome {
            ProcessOutcome::Accepted(receipt) => self.accepted.push(receipt.cid),
            ProcessOutcome::AlreadyStored(_) => self.already_stored += 1,
            ProcessOutcome::Duplicate => self.duplicates += 1,
            ProcessOutcome::Expired => self.expired += 1,
            ProcessOutcome::NotAddressed => self.not_addressed += 1,
        }
    }

    pub fn security_warnings(&self) -> impl Iterator<Item = &RejectedMessage> {
        self.rejected.iter().filter(|r| r.security_warning)
    }
}

/// The main Kernel struct.
///
/// Provides a unified API for:
/// - Creating receipts as this device
/// - Sharing receipts with other authors' devices
/// - Receiving, verifying and storing shared receipts
/// - Managing trust in remote devices
pub struct Kernel<S: Store, R: Relay> {
    identity: DeviceIdentity,
    store: Arc<S>,
    relay: Arc<R>,
    config: KernelConfig,
    cancel: Mutex<CancellationToken>,
}

impl<S: Store, R: Relay> Kernel<S, R> {
    /// Open the kernel as a primary device, creating keys on first launch.
    pub async fn open(
        store: S,
        relay: Arc<R>,
        device_name: &str,
        config: KernelConfig,
    ) -> Result<Self> {
        Self::open_with(store, relay, config, || {
            DeviceIdentity::generate_primary(device_name)
        })
        .await
    }

    /// Open the kernel as a secondary device of `owner`.
    ///
    /// Peers trust the device only after the owner's primary device calls
    /// [`Kernel::authorize_device`] for it and shares the link.
    pub async fn open_linked(
        store: S,
        relay: Arc<R>,
        owner: AuthorId,
        device_name: &str,
        config: KernelConfig,
    ) -> Result<Self> {
        Self::open_with(store, relay, config, || {
            DeviceIdentity::generate_linked(owner, device_name)
        })
        .await
    }

    async fn open_with(
        store: S,
        relay: Arc<R>,
        config: KernelConfig,
        generate: impl FnOnce() -> DeviceIdentity,
    ) -> Result<Self> {
        let record = match store.get_device_key().await? {
            Some(record) => record,
            None => {
                let fresh = DeviceKeyRecord::from_identity(&generate(), now_millis());
                // a concurrent first launch may win; adopt whatever is stored
                store.insert_device_key_if_absent(&fresh).await?
            }
        };
        let identity = record.to_identity();
        tracing::debug!(
            device_id = %identity.device_id,
            author = %identity.owner_author_id,
            primary = identity.is_primary(),
            "kernel opened"
        );

        Ok(Self {
            identity,
            store: Arc::new(store),
            relay,
            config,
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn author_id(&self) -> &AuthorId {
        &self.identity.owner_author_id
    }

    pub fn device_id(&self) -> DeviceId {
        self.identity.device_id
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }

    /// Token that aborts in-flight relay calls and their backoff.
    ///
    /// After it fires, relay calls fail with `Cancelled` until
    /// [`Kernel::reset_cancellation`] installs a fresh token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace a fired cancellation token. Returns the token now in use.
    pub fn reset_cancellation(&self) -> CancellationToken {
        let mut cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if cancel.is_cancelled() {
            *cancel = CancellationToken::new();
        }
        cancel.clone()
    }

    async fn retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = buds_relay::Result<T>>,
    {
        let cancel = self.cancellation_token();
        Ok(with_retry(&self.config.retry, &cancel, op).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Identity
    // ─────────────────────────────────────────────────────────────────────────

    /// Publish this device in the relay directory.
    pub async fn register_device(&self, contact_token: Option<&str>) -> Result<()> {
        let device = self.identity.to_recipient();
        self.retry(|| self.relay.register_device(&device, contact_token))
            .await
    }

    /// Resolve a verified contact token to an author.
    pub async fn lookup_identity(&self, contact_token: &str) -> Result<AuthorId> {
        self.retry(|| self.relay.lookup_identity(contact_token))
            .await
    }

    /// Sign a device link for a secondary device of this author.
    ///
    /// Share the returned receipt with contacts so they accept the device.
    pub async fn authorize_device(&self, device: &RecipientDevice) -> Result<Receipt> {
        if !self.identity.is_primary() {
            return Err(KernelError::NotPrimaryDevice);
        }
        if device.owner_author_id != *self.author_id() {
            return Err(KernelError::ForeignDevice(device.device_id));
        }

        let payload = ReceiptPayload::DeviceLink(DeviceLinkPayload {
            device_id: device.device_id,
            device_name: device.device_name.clone(),
            signing_key: device.signing_key,
            agreement_key: *device.agreement_key.as_bytes(),
            claimed_at_ms: now_millis(),
        });
        let receipt = self.create_receipt(payload, None).await?;
        TrustStore::new(&*self.store)
            .pin(device, now_millis())
            .await?;
        Ok(receipt)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Receipts
    // ─────────────────────────────────────────────────────────────────────────

    /// Create, sign and store a receipt, chained onto `parent` if given.
    pub async fn create_receipt(
        &self,
        payload: ReceiptPayload,
        parent: Option<&Cid>,
    ) -> Result<Receipt> {
        if matches!(payload, ReceiptPayload::DeviceLink(_)) && !self.identity.is_primary() {
            return Err(KernelError::NotPrimaryDevice);
        }

        let parent = match parent {
            Some(cid) => Some(
                self.store
                    .get_receipt(cid)
                    .await?
                    .ok_or(KernelError::ReceiptNotFound(*cid))?,
            ),
            None => None,
        };

        let receipt = create_receipt(
            &self.identity.signing,
            self.author_id(),
            payload,
            parent.as_ref(),
        )?;
        self.store
            .insert_receipt(&receipt, &receipt.preimage()?)
            .await?;
        tracing::debug!(
            cid = %receipt.cid,
            receipt_type = %receipt.receipt_type(),
            "receipt created"
        );
        Ok(receipt)
    }

    pub async fn get_receipt(&self, cid: &Cid) -> Result<Option<Receipt>> {
        Ok(self.store.get_receipt(cid).await?)
    }

    /// Every stored receipt of the chain rooted at `root`, oldest first.
    pub async fn chain(&self, root: &Cid) -> Result<Vec<Receipt>> {
        Ok(self.store.receipts_by_root(root).await?)
    }

    /// Verify a receipt against the keys pinned for its author.
    ///
    /// Returns the key that verified.
    pub async fn verify_receipt(&self, receipt: &Receipt) -> Result<Ed25519PublicKey> {
        let mut keys = TrustStore::new(&*self.store)
            .signing_keys(&receipt.author_id)
            .await?;
        if receipt.author_id == *self.author_id() {
            keys.push(self.identity.signing_key());
        }
        Ok(verify_receipt(receipt, &move |_: &AuthorId| keys.clone())?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Send
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch and trust-check the devices of up to twelve authors.
    ///
    /// Unseen devices are pinned. Devices that fail a check are excluded
    /// and reported, never silently re-pinned.
    pub async fn resolve_devices(&self, authors: &[AuthorId]) -> Result<DeviceResolution> {
        check_author_count(authors)?;
        let now = now_millis();

        let listed = match self.retry(|| self.relay.list_devices(authors)).await {
            Ok(devices) => {
                self.store.upsert_devices(&devices, now).await?;
                devices
            }
            Err(e) if e.is_retryable() => {
                let mut cached = Vec::new();
                for author in authors {
                    cached.extend(self.store.devices_for_author(author).await?);
                }
                if cached.is_empty() {
                    return Err(e);
                }
                tracing::warn!(error = %e, "directory unavailable, using cached devices");
                cached
            }
            Err(e) => return Err(e),
        };

        let trust = TrustStore::new(&*self.store);
        let mut resolution = DeviceResolution::default();
        for device in listed {
            if device.device_id == self.identity.device_id
                || !authors.contains(&device.owner_author_id)
            {
                continue;
            }

            let checked = if device.is_active() {
                trust.admit(&device, now).await
            } else {
                Err(KernelError::RevokedDevice(device.device_id))
            };

            let reason = match checked {
                Ok(_) => {
                    resolution.devices.push(device);
                    continue;
                }
                Err(KernelError::RevokedDevice(_)) => ExclusionReason::Revoked,
                Err(KernelError::UnlinkedDevice { .. }) => ExclusionReason::Unlinked,
                Err(KernelError::KeyMismatch(_)) => ExclusionReason::KeyMismatch,
                Err(KernelError::DeviceRejected(_)) => ExclusionReason::Rejected,
                Err(e) => return Err(e),
            };
            tracing::debug!(device_id = %device.device_id, ?reason, "recipient device excluded");
            resolution.excluded.push(ExcludedDevice {
                device_id: device.device_id,
                owner_author_id: device.owner_author_id,
                reason,
            });
        }
        Ok(resolution)
    }

    /// Share a stored receipt with every eligible device of `recipients`.
    pub async fn share(&self, cid: &Cid, recipients: &[AuthorId]) -> Result<ShareReport> {
        check_author_count(recipients)?;
        let receipt = self
            .store
            .get_receipt(cid)
            .await?
            .ok_or(KernelError::ReceiptNotFound(*cid))?;
        let preimage = self
            .store
            .get_preimage(cid)
            .await?
            .ok_or(KernelError::ReceiptNotFound(*cid))?;

        let resolution = self.resolve_devices(recipients).await?;
        if resolution.devices.is_empty() {
            return Err(KernelError::NoEligibleDevices);
        }

        let envelope = encrypt_for_recipients(
            &preimage,
            cid,
            receipt.signature,
            &self.identity,
            &resolution.devices,
            now_millis(),
        )?;
        self.retry(|| self.relay.send_message(&envelope, recipients))
            .await?;

        tracing::debug!(
            message_id = %envelope.message_id,
            %cid,
            devices = envelope.wrapped_keys.len(),
            excluded = resolution.excluded.len(),
            "receipt shared"
        );
        Ok(ShareReport {
            message_id: envelope.message_id,
            receipt_cid: *cid,
            devices: envelope.wrapped_keys.keys().copied().collect(),
            excluded: resolution.excluded,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Receive
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch, verify and store pending messages for this device.
    ///
    /// Reads page after page while settled messages are acknowledged, so a
    /// backlog larger than one batch drains in a single sync.
    pub async fn sync_inbox(&self) -> Result<SyncReport> {
        let author = self.author_id().clone();
        let device = self.identity.device_id;
        let batch = self.config.inbox_batch.max(1);
        let mut report = SyncReport::default();

        loop {
            let page = self
                .retry(|| self.relay.fetch_inbox(&author, &device, batch))
                .await?;
            // deferred messages stay in the mailbox; retry them next sync
            let fresh: Vec<&EncryptedEnvelope> = page
                .iter()
                .filter(|e| !report.deferred.contains(&e.message_id))
                .collect();
            if fresh.is_empty() {
                break;
            }
            report.fetched += fresh.len();
            self.refresh_senders(&fresh).await?;

            let mut acknowledged = 0;
            for envelope in fresh {
                let settled = self.settle(envelope, &mut report).await?;
                if settled && self.config.ack_processed && self.acknowledge(envelope).await {
                    acknowledged += 1;
                }
            }
            if !self.config.ack_processed || page.len() < batch || acknowledged == 0 {
                break;
            }
        }

        let cutoff = now_millis().saturating_sub(self.config.ledger_retention_ms);
        let pruned = self.store.prune_processed(cutoff).await?;
        tracing::debug!(
            fetched = report.fetched,
            accepted = report.accepted.len(),
            duplicates = report.duplicates,
            rejected = report.rejected.len(),
            deferred = report.deferred.len(),
            pruned,
            "inbox synced"
        );
        Ok(report)
    }

    /// Process one envelope into the report.
    ///
    /// Returns false if it was deferred after a transient failure.
    async fn settle(&self, envelope: &EncryptedEnvelope, report: &mut SyncReport) -> Result<bool> {
        let err = match self.process_envelope(envelope).await {
            Ok(outcome) => {
                report.record(outcome);
                return Ok(true);
            }
            Err(e) => e,
        };

        if err.is_transient() {
            tracing::warn!(message_id = %envelope.message_id, error = %err, "message deferred");
            report.deferred.push(envelope.message_id);
            return Ok(false);
        }
        if err.is_security_warning() {
            tracing::warn!(
                message_id = %envelope.message_id,
                sender_device_id = %envelope.sender_device_id,
                error = %err,
                "security warning: message rejected"
            );
        } else {
            tracing::warn!(message_id = %envelope.message_id, error = %err, "message rejected");
        }
        self.store
            .mark_processed(&envelope.message_id, now_millis())
            .await?;
        report.rejected.push(RejectedMessage {
            message_id: envelope.message_id,
            sender_device_id: envelope.sender_device_id,
            category: err.category(),
            security_warning: err.is_security_warning(),
        });
        Ok(true)
    }

    /// Refresh cached directory entries for the senders of a batch.
    async fn refresh_senders(&self, envelopes: &[&EncryptedEnvelope]) -> Result<()> {
        let mut senders: Vec<AuthorId> = envelopes
            .iter()
            .map(|e| e.sender_author_id.clone())
            .collect();
        senders.sort();
        senders.dedup();

        for chunk in senders.chunks(limits::MAX_AUTHORS_PER_LOOKUP) {
            match self.retry(|| self.relay.list_devices(chunk)).await {
                Ok(devices) => self.store.upsert_devices(&devices, now_millis()).await?,
                Err(e) => tracing::warn!(error = %e, "directory refresh failed, using cache"),
            }
        }
        Ok(())
    }

    /// Acknowledge a settled message for this device. Returns whether the
    /// relay took the acknowledgement.
    async fn acknowledge(&self, envelope: &EncryptedEnvelope) -> bool {
        let author = self.author_id();
        let device = self.identity.device_id;
        let message_id = &envelope.message_id;
        match self
            .retry(|| self.relay.delete_message(author, &device, message_id))
            .await
        {
            Ok(()) | Err(KernelError::Relay(RelayError::NotFound)) => true,
            Err(e) => {
                tracing::warn!(%message_id, error = %e, "failed to acknowledge message");
                false
            }
        }
    }

    /// Run one envelope through the receive pipeline.
    ///
    /// Duplicate, expired and unaddressed envelopes are recorded in the
    /// ledger and skipped. On success the receipt is stored, the sender
    /// device pinned and the message recorded, in one store write.
    pub async fn process_envelope(&self, envelope: &EncryptedEnvelope) -> Result<ProcessOutcome> {
        let now = now_millis();
        if self.store.is_processed(&envelope.message_id).await? {
            return Ok(ProcessOutcome::Duplicate);
        }
        if envelope.is_expired(now) {
            self.store.mark_processed(&envelope.message_id, now).await?;
            return Ok(ProcessOutcome::Expired);
        }
        if !envelope.is_addressed_to(&self.identity.device_id) {
            self.store.mark_processed(&envelope.message_id, now).await?;
            return Ok(ProcessOutcome::NotAddressed);
        }

        let sender = self.sender_device(envelope).await?;
        if !sender.is_active() {
            return Err(KernelError::RevokedDevice(sender.device_id));
        }
        let trust = TrustStore::new(&*self.store);
        trust.check(&sender).await?;
        trust.check_owner(&sender).await?;

        let plaintext = self.open_envelope(envelope, &sender).await?;
        let receipt = check_plaintext(envelope, &plaintext, &sender)?;

        let inserted = trust
            .accept_message(&receipt, &plaintext, &sender, &envelope.message_id, now)
            .await?;
        let outcome = match inserted {
            InsertResult::Inserted => ProcessOutcome::Accepted(receipt),
            InsertResult::AlreadyExists => ProcessOutcome::AlreadyStored(receipt.cid),
        };
        tracing::debug!(
            message_id = %envelope.message_id,
            cid = %envelope.receipt_cid,
            "message accepted"
        );
        Ok(outcome)
    }

    /// The directory entry for an envelope's sending device.
    async fn sender_device(&self, envelope: &EncryptedEnvelope) -> Result<RecipientDevice> {
        if let Some(device) = self.store.get_device(&envelope.sender_device_id).await? {
            return Ok(device);
        }
        let author = [envelope.sender_author_id.clone()];
        let devices = self.retry(|| self.relay.list_devices(&author)).await?;
        self.store.upsert_devices(&devices, now_millis()).await?;
        devices
            .into_iter()
            .find(|d| d.device_id == envelope.sender_device_id)
            .ok_or(KernelError::UnknownSender(envelope.sender_device_id))
    }

    async fn open_envelope(
        &self,
        envelope: &EncryptedEnvelope,
        sender: &RecipientDevice,
    ) -> Result<Vec<u8>> {
        let resolved;
        let envelope = match &envelope.ciphertext {
            CiphertextRef::Inline(_) => envelope,
            CiphertextRef::External { locator, .. } => {
                let blob = self.retry(|| self.relay.fetch_payload(locator)).await?;
                resolved = envelope.clone().resolve(blob)?;
                &resolved
            }
        };
        Ok(decrypt(
            envelope,
            &self.identity.device_id,
            &self.identity.agreement,
            &sender.agreement_key,
        )?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Trust
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn pinned_key(&self, device_id: &DeviceId) -> Result<Option<PinnedKey>> {
        Ok(self.store.get_pin(device_id).await?)
    }

    /// Mark a pinned device as verified out of band.
    pub async fn verify_device(&self, device_id: &DeviceId) -> Result<()> {
        TrustStore::new(&*self.store)
            .set_state(device_id, TrustState::Verified)
            .await
    }

    /// Stop trusting a pinned device in both directions.
    pub async fn reject_device(&self, device_id: &DeviceId) -> Result<()> {
        TrustStore::new(&*self.store)
            .set_state(device_id, TrustState::Rejected)
            .await
    }
}

/// Address, decode and verify decrypted receipt bytes.
///
/// The CID is computed over the bytes exactly as decrypted, before any
/// decoding.
fn check_plaintext(
    envelope: &EncryptedEnvelope,
    plaintext: &[u8],
    sender: &RecipientDevice,
) -> Result<Receipt> {
    let recomputed = Cid::address_of(plaintext);
    if recomputed != envelope.receipt_cid {
        return Err(ValidationError::CidMismatch {
            claimed: envelope.receipt_cid,
            recomputed,
        }
        .into());
    }

    let receipt = Receipt::from_preimage(plaintext, envelope.signature)?;
    for claimed in [&envelope.sender_author_id, &sender.owner_author_id] {
        if receipt.author_id != *claimed {
            return Err(KernelError::SenderMismatch {
                receipt: receipt.author_id.clone(),
                sender: claimed.clone(),
            });
        }
    }
    verify_receipt_with_key(&receipt, &sender.signing_key)?;

    // links are only honored from the author's primary device
    if matches!(receipt.payload, ReceiptPayload::DeviceLink(_))
        && !receipt.author_id.is_derived_from(&sender.signing_key)
    {
        return Err(KernelError::UnlinkedDevice {
            device_id: sender.device_id,
            author: receipt.author_id,
        });
    }
    Ok(receipt)
}

/// Get current time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
