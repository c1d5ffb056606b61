//! In-memory implementation of the Store trait.
//!
//! Primarily for testing. Same semantics as SQLite, no persistence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use buds_core::{AuthorId, Cid, DeviceId, Receipt};
use buds_e2ee::{MessageId, RecipientDevice};

use crate::error::{Result, StoreError};
use crate::traits::{
    AcceptOutcome, DeviceKeyRecord, InsertResult, PinOutcome, PinnedKey, Store, TrustState,
};

/// In-memory store. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
    accept_failures: AtomicU32,
}

#[derive(Default)]
struct MemoryStoreInner {
    receipts: HashMap<Cid, StoredReceipt>,
    next_seq: u64,
    device_key: Option<DeviceKeyRecord>,
    pins: HashMap<DeviceId, PinnedKey>,
    devices: HashMap<DeviceId, RecipientDevice>,
    processed: HashMap<MessageId, i64>,
}

struct StoredReceipt {
    receipt: Receipt,
    preimage: Vec<u8>,
    /// Insertion order.
    seq: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
            accept_failures: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` [`Store::accept_message`] calls before they write.
    pub fn fail_next_accepts(&self, n: u32) {
        self.accept_failures.store(n, Ordering::SeqCst);
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn collect_receipts(
        inner: &MemoryStoreInner,
        filter: impl Fn(&Receipt) -> bool,
    ) -> Vec<Receipt> {
        let mut found: Vec<&StoredReceipt> = inner
            .receipts
            .values()
            .filter(|sr| filter(&sr.receipt))
            .collect();
        found.sort_by_key(|sr| sr.seq);
        found.into_iter().map(|sr| sr.receipt.clone()).collect()
    }

    fn insert_locked(
        inner: &mut MemoryStoreInner,
        receipt: &Receipt,
        preimage: &[u8],
    ) -> InsertResult {
        if inner.receipts.contains_key(&receipt.cid) {
            return InsertResult::AlreadyExists;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.receipts.insert(
            receipt.cid,
            StoredReceipt {
                receipt: receipt.clone(),
                preimage: preimage.to_vec(),
                seq,
            },
        );
        InsertResult::Inserted
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_receipt(&self, receipt: &Receipt, preimage: &[u8]) -> Result<InsertResult> {
        let mut inner = self.write()?;
        Ok(Self::insert_locked(&mut inner, receipt, preimage))
    }

    async fn get_receipt(&self, cid: &Cid) -> Result<Option<Receipt>> {
        Ok(self.read()?.receipts.get(cid).map(|sr| sr.receipt.clone()))
    }

    async fn has_receipt(&self, cid: &Cid) -> Result<bool> {
        Ok(self.read()?.receipts.contains_key(cid))
    }

    async fn get_preimage(&self, cid: &Cid) -> Result<Option<Vec<u8>>> {
        Ok(self.read()?.receipts.get(cid).map(|sr| sr.preimage.clone()))
    }

    async fn receipts_by_root(&self, root: &Cid) -> Result<Vec<Receipt>> {
        let inner = self.read()?;
        Ok(Self::collect_receipts(&inner, |r| r.root_cid == *root))
    }

    async fn receipts_by_author(&self, author: &AuthorId) -> Result<Vec<Receipt>> {
        let inner = self.read()?;
        Ok(Self::collect_receipts(&inner, |r| r.author_id == *author))
    }

    async fn insert_device_key_if_absent(
        &self,
        record: &DeviceKeyRecord,
    ) -> Result<DeviceKeyRecord> {
        let mut inner = self.write()?;
        Ok(inner.device_key.get_or_insert_with(|| record.clone()).clone())
    }

    async fn get_device_key(&self) -> Result<Option<DeviceKeyRecord>> {
        Ok(self.read()?.device_key.clone())
    }

    async fn pin_if_absent(&self, pin: &PinnedKey) -> Result<PinOutcome> {
        let mut inner = self.write()?;
        if let Some(existing) = inner.pins.get(&pin.device_id) {
            return Ok(PinOutcome::Existing(existing.clone()));
        }
        inner.pins.insert(pin.device_id, pin.clone());
        Ok(PinOutcome::Pinned)
    }

    async fn get_pin(&self, device_id: &DeviceId) -> Result<Option<PinnedKey>> {
        Ok(self.read()?.pins.get(device_id).cloned())
    }

    async fn set_trust_state(&self, device_id: &DeviceId, state: TrustState) -> Result<bool> {
        let mut inner = self.write()?;
        match inner.pins.get_mut(device_id) {
            Some(pin) => {
                pin.state = state;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn pins_for_author(&self, author: &AuthorId) -> Result<Vec<PinnedKey>> {
        let inner = self.read()?;
        let mut pins: Vec<PinnedKey> = inner
            .pins
            .values()
            .filter(|p| p.owner_author_id == *author)
            .cloned()
            .collect();
        pins.sort_by_key(|p| (p.first_seen_at, p.device_id));
        Ok(pins)
    }

    async fn upsert_devices(&self, devices: &[RecipientDevice], _fetched_at: i64) -> Result<()> {
        let mut inner = self.write()?;
        for device in devices {
            inner.devices.insert(device.device_id, device.clone());
        }
        Ok(())
    }

    async fn get_device(&self, device_id: &DeviceId) -> Result<Option<RecipientDevice>> {
        Ok(self.read()?.devices.get(device_id).cloned())
    }

    async fn devices_for_author(&self, author: &AuthorId) -> Result<Vec<RecipientDevice>> {
        let inner = self.read()?;
        let mut devices: Vec<RecipientDevice> = inner
            .devices
            .values()
            .filter(|d| d.owner_author_id == *author)
            .cloned()
            .collect();
        devices.sort_by_key(|d| d.device_id);
        Ok(devices)
    }

    async fn mark_processed(&self, message_id: &MessageId, processed_at: i64) -> Result<bool> {
        let mut inner = self.write()?;
        if inner.processed.contains_key(message_id) {
            return Ok(false);
        }
        inner.processed.insert(*message_id, processed_at);
        Ok(true)
    }

    async fn is_processed(&self, message_id: &MessageId) -> Result<bool> {
        Ok(self.read()?.processed.contains_key(message_id))
    }

    async fn prune_processed(&self, before: i64) -> Result<usize> {
        let mut inner = self.write()?;
        let len = inner.processed.len();
        inner.processed.retain(|_, at| *at >= before);
        Ok(len - inner.processed.len())
    }

    async fn accept_message(
        &self,
        receipt: &Receipt,
        preimage: &[u8],
        pin: &PinnedKey,
        message_id: &MessageId,
        processed_at: i64,
    ) -> Result<AcceptOutcome> {
        let injected = self
            .accept_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(StoreError::Task("injected failure".into()));
        }

        let mut inner = self.write()?;
        if let Some(existing) = inner.pins.get(&pin.device_id) {
            if existing.state == TrustState::Rejected || !existing.same_keys(pin) {
                return Ok(AcceptOutcome::PinConflict(existing.clone()));
            }
        } else {
            inner.pins.insert(pin.device_id, pin.clone());
        }
        let inserted = Self::insert_locked(&mut inner, receipt, preimage);
        inner.processed.entry(*message_id).or_insert(processed_at);
        Ok(AcceptOutcome::Accepted(inserted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract;

    #[tokio::test]
    async fn test_receipts() {
        contract::receipts(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_device_key_cas() {
        contract::device_key_cas(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_pins() {
        contract::pins(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_device_cache() {
        contract::device_cache(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_inbox_ledger() {
        contract::inbox_ledger(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_accept_message() {
        contract::accept_message(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_failed_accept_writes_nothing() {
        let store = MemoryStore::new();
        let receipt = contract::memory_receipt("flaky", None);
        let pin = PinnedKey::new(&contract::remote_device(), 1);
        let message_id = MessageId::generate();
        store.fail_next_accepts(1);

        let err = store
            .accept_message(&receipt, &receipt.preimage().unwrap(), &pin, &message_id, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Task(_)));
        assert!(!store.has_receipt(&receipt.cid).await.unwrap());
        assert!(store.get_pin(&pin.device_id).await.unwrap().is_none());
        assert!(!store.is_processed(&message_id).await.unwrap());

        let outcome = store
            .accept_message(&receipt, &receipt.preimage().unwrap(), &pin, &message_id, 1)
            .await
            .unwrap();
        assert_eq!(outcome, AcceptOutcome::Accepted(InsertResult::Inserted));
    }
}
