//! Trust-on-first-use pinning of remote device keys.
//!
//! Per device: `Unknown -> Pinned -> {Verified | Rejected}`. The first time
//! a device is used its signing key, agreement key and owner are pinned with
//! compare-and-set; afterwards any different key set is a [`KeyMismatch`].
//! Pins are never replaced.
//!
//! [`KeyMismatch`]: crate::KernelError::KeyMismatch

use buds_core::{AuthorId, DeviceId, Ed25519PublicKey, Receipt, ReceiptPayload};
use buds_e2ee::{MessageId, RecipientDevice};
use buds_store::{AcceptOutcome, InsertResult, PinOutcome, PinnedKey, Store, TrustState};

use crate::error::{KernelError, Result};

/// Trust decisions over a [`Store`].
pub struct TrustStore<'a, S: Store> {
    store: &'a S,
}

impl<'a, S: Store> TrustStore<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Check a device against its pin without writing anything.
    ///
    /// Returns the pin if one exists.
    pub async fn check(&self, device: &RecipientDevice) -> Result<Option<PinnedKey>> {
        match self.store.get_pin(&device.device_id).await? {
            Some(pin) => Self::accept(pin, device).map(Some),
            None => Ok(None),
        }
    }

    /// Pin a device on first use, or check it against the existing pin.
    pub async fn pin(&self, device: &RecipientDevice, now_ms: i64) -> Result<PinnedKey> {
        let candidate = PinnedKey::new(device, now_ms);
        match self.store.pin_if_absent(&candidate).await? {
            PinOutcome::Pinned => {
                tracing::debug!(device_id = %device.device_id, "device pinned on first use");
                Ok(candidate)
            }
            PinOutcome::Existing(pin) => Self::accept(pin, device),
        }
    }

    /// Store a verified receipt from `device` and pin the device on first
    /// use, as one write. Nothing is written if the pin refuses the device.
    pub async fn accept_message(
        &self,
        receipt: &Receipt,
        preimage: &[u8],
        device: &RecipientDevice,
        message_id: &MessageId,
        now_ms: i64,
    ) -> Result<InsertResult> {
        let candidate = PinnedKey::new(device, now_ms);
        let outcome = self
            .store
            .accept_message(receipt, preimage, &candidate, message_id, now_ms)
            .await?;
        match outcome {
            AcceptOutcome::Accepted(inserted) => Ok(inserted),
            AcceptOutcome::PinConflict(pin) => {
                Self::accept(pin, device)?;
                // the store only reports rejected or differing pins
                Err(KernelError::KeyMismatch(device.device_id))
            }
        }
    }

    fn accept(pin: PinnedKey, device: &RecipientDevice) -> Result<PinnedKey> {
        if pin.state == TrustState::Rejected {
            return Err(KernelError::DeviceRejected(device.device_id));
        }
        if !pin.matches(device) {
            tracing::warn!(
                device_id = %device.device_id,
                pinned = %pin.signing_key.to_hex(),
                presented = %device.signing_key.to_hex(),
                "device keys differ from pin"
            );
            return Err(KernelError::KeyMismatch(device.device_id));
        }
        Ok(pin)
    }

    /// Check that a device really belongs to the author it claims.
    ///
    /// A primary device's signing key derives the author id. A secondary
    /// device needs a stored device-link receipt from that author naming
    /// exactly these keys.
    pub async fn check_owner(&self, device: &RecipientDevice) -> Result<()> {
        let author = &device.owner_author_id;
        if author.is_derived_from(&device.signing_key) {
            return Ok(());
        }

        let linked = self
            .store
            .receipts_by_author(author)
            .await?
            .into_iter()
            .any(|receipt| match receipt.payload {
                ReceiptPayload::DeviceLink(link) => {
                    link.device_id == device.device_id
                        && link.signing_key == device.signing_key
                        && link.agreement_key == *device.agreement_key.as_bytes()
                }
                _ => false,
            });

        if linked {
            Ok(())
        } else {
            Err(KernelError::UnlinkedDevice {
                device_id: device.device_id,
                author: author.clone(),
            })
        }
    }

    /// Check a device for outbound use and pin it if unseen.
    pub async fn admit(&self, device: &RecipientDevice, now_ms: i64) -> Result<PinnedKey> {
        self.check(device).await?;
        self.check_owner(device).await?;
        self.pin(device, now_ms).await
    }

    /// Signing keys of an author's devices that are pinned and not rejected.
    pub async fn signing_keys(&self, author: &AuthorId) -> Result<Vec<Ed25519PublicKey>> {
        Ok(self
            .store
            .pins_for_author(author)
            .await?
            .into_iter()
            .filter(|pin| pin.state != TrustState::Rejected)
            .map(|pin| pin.signing_key)
            .collect())
    }

    /// Record an out-of-band decision about a pinned device.
    pub async fn set_state(&self, device_id: &DeviceId, state: TrustState) -> Result<()> {
        if self.store.set_trust_state(device_id, state).await? {
            tracing::debug!(%device_id, state = state.as_str(), "trust state changed");
            Ok(())
        } else {
            Err(KernelError::UnknownDevice(*device_id))
        }
    }
}
