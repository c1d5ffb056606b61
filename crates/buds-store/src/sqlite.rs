//! SQLite implementation of the Store trait.
//!
//! The primary storage backend: rusqlite with bundled SQLite, wrapped in
//! async via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use buds_core::{AuthorId, Cid, DeviceId, Ed25519PublicKey, Ed25519Signature, Receipt};
use buds_e2ee::{DeviceStatus, MessageId, RecipientDevice, X25519PublicKey};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    AcceptOutcome, DeviceKeyRecord, InsertResult, PinOutcome, PinnedKey, Store, TrustState,
};

/// SQLite-based store.
///
/// Thread-safe via an internal Mutex; every query runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) and migrate a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn, now_millis())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn, now_millis())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row conversion
// ─────────────────────────────────────────────────────────────────────────────

fn key32(what: &str, bytes: Vec<u8>) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| StoreError::InvalidData(format!("{what}: expected 32 bytes")))
}

fn receipt_from_row(preimage: Vec<u8>, signature: Vec<u8>) -> Result<Receipt> {
    let signature =
        Ed25519Signature::from_slice(&signature).map_err(|e| StoreError::invalid("signature", e))?;
    Receipt::from_preimage(&preimage, signature).map_err(|e| StoreError::invalid("receipt", e))
}

fn query_receipts(conn: &Connection, sql: &str, arg: &dyn rusqlite::ToSql) -> Result<Vec<Receipt>> {
    let rows = conn
        .prepare(sql)?
        .query_map([arg], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<(Vec<u8>, Vec<u8>)>, _>>()?;
    rows.into_iter()
        .map(|(preimage, signature)| receipt_from_row(preimage, signature))
        .collect()
}

type DeviceKeyRow = (String, String, String, Vec<u8>, Vec<u8>, i64);

fn device_key_from_row(row: DeviceKeyRow) -> Result<DeviceKeyRecord> {
    let (device_id, owner, device_name, seed, secret, created_at) = row;
    Ok(DeviceKeyRecord {
        device_id: DeviceId::parse(&device_id).map_err(|e| StoreError::invalid("device_id", e))?,
        owner_author_id: AuthorId::parse(&owner).map_err(|e| StoreError::invalid("owner", e))?,
        device_name,
        signing_seed: key32("signing_seed", seed)?,
        agreement_secret: key32("agreement_secret", secret)?,
        created_at,
    })
}

fn select_device_key(conn: &Connection) -> Result<Option<DeviceKeyRecord>> {
    conn.query_row(
        "SELECT device_id, owner_author_id, device_name, signing_seed, agreement_secret, created_at
         FROM device_keys WHERE slot = 1",
        [],
        |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ))
        },
    )
    .optional()?
    .map(device_key_from_row)
    .transpose()
}

type PinRow = (String, String, Vec<u8>, Vec<u8>, i64, String);

const PIN_COLUMNS: &str =
    "device_id, owner_author_id, signing_key, agreement_key, first_seen_at, state";

fn pin_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PinRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn pin_from_row(row: PinRow) -> Result<PinnedKey> {
    let (device_id, owner, signing, agreement, first_seen_at, state) = row;
    Ok(PinnedKey {
        device_id: DeviceId::parse(&device_id).map_err(|e| StoreError::invalid("device_id", e))?,
        owner_author_id: AuthorId::parse(&owner).map_err(|e| StoreError::invalid("owner", e))?,
        signing_key: Ed25519PublicKey(key32("signing_key", signing)?),
        agreement_key: X25519PublicKey(key32("agreement_key", agreement)?),
        first_seen_at,
        state: TrustState::parse(&state)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown trust state {state}")))?,
    })
}

fn select_pin(conn: &Connection, device_id: &str) -> Result<Option<PinnedKey>> {
    conn.query_row(
        &format!("SELECT {PIN_COLUMNS} FROM pinned_keys WHERE device_id = ?1"),
        [device_id],
        pin_row,
    )
    .optional()?
    .map(pin_from_row)
    .transpose()
}

fn insert_receipt_row(conn: &Connection, receipt: &Receipt, preimage: &[u8]) -> Result<InsertResult> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO receipts
            (cid, author_id, parent_cid, root_cid, receipt_type, preimage, signature, ingested_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            receipt.cid.to_bytes().as_slice(),
            receipt.author_id.as_str(),
            receipt.parent_cid.map(|c| c.to_bytes().to_vec()),
            receipt.root_cid.to_bytes().as_slice(),
            receipt.receipt_type().tag(),
            preimage,
            receipt.signature.as_bytes().as_slice(),
            now_millis(),
        ],
    )?;
    Ok(if changed == 0 {
        InsertResult::AlreadyExists
    } else {
        InsertResult::Inserted
    })
}

fn pin_row_if_absent(conn: &Connection, pin: &PinnedKey) -> Result<PinOutcome> {
    let device_id = pin.device_id.to_string();
    let changed = conn.execute(
        "INSERT OR IGNORE INTO pinned_keys
            (device_id, owner_author_id, signing_key, agreement_key, first_seen_at, state)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            device_id,
            pin.owner_author_id.as_str(),
            pin.signing_key.as_bytes().as_slice(),
            pin.agreement_key.as_bytes().as_slice(),
            pin.first_seen_at,
            pin.state.as_str(),
        ],
    )?;
    if changed == 1 {
        return Ok(PinOutcome::Pinned);
    }
    select_pin(conn, &device_id)?
        .map(PinOutcome::Existing)
        .ok_or_else(|| StoreError::InvalidData("pin vanished during insert".into()))
}

fn mark_processed_row(conn: &Connection, message_id: &str, processed_at: i64) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO processed_messages (message_id, processed_at) VALUES (?1, ?2)",
        params![message_id, processed_at],
    )?;
    Ok(changed == 1)
}

type DeviceRow = (String, String, String, Vec<u8>, Vec<u8>, String);

const DEVICE_COLUMNS: &str =
    "device_id, owner_author_id, device_name, agreement_key, signing_key, status";

fn device_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeviceRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn device_from_row(row: DeviceRow) -> Result<RecipientDevice> {
    let (device_id, owner, device_name, agreement, signing, status) = row;
    Ok(RecipientDevice {
        device_id: DeviceId::parse(&device_id).map_err(|e| StoreError::invalid("device_id", e))?,
        owner_author_id: AuthorId::parse(&owner).map_err(|e| StoreError::invalid("owner", e))?,
        device_name,
        agreement_key: X25519PublicKey(key32("agreement_key", agreement)?),
        signing_key: Ed25519PublicKey(key32("signing_key", signing)?),
        status: DeviceStatus::parse(&status)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown device status {status}")))?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    // ─────────────────────────────────────────────────────────────────────────
    // Receipts
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_receipt(&self, receipt: &Receipt, preimage: &[u8]) -> Result<InsertResult> {
        let receipt = receipt.clone();
        let preimage = preimage.to_vec();
        self.run(move |conn| insert_receipt_row(conn, &receipt, &preimage))
            .await
    }

    async fn get_receipt(&self, cid: &Cid) -> Result<Option<Receipt>> {
        let cid = cid.to_bytes();
        self.run(move |conn| {
            conn.query_row(
                "SELECT preimage, signature FROM receipts WHERE cid = ?1",
                [cid.as_slice()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .map(|(preimage, signature)| receipt_from_row(preimage, signature))
            .transpose()
        })
        .await
    }

    async fn has_receipt(&self, cid: &Cid) -> Result<bool> {
        let cid = cid.to_bytes();
        self.run(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM receipts WHERE cid = ?1",
                    [cid.as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn get_preimage(&self, cid: &Cid) -> Result<Option<Vec<u8>>> {
        let cid = cid.to_bytes();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT preimage FROM receipts WHERE cid = ?1",
                    [cid.as_slice()],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn receipts_by_root(&self, root: &Cid) -> Result<Vec<Receipt>> {
        let root = root.to_bytes().to_vec();
        self.run(move |conn| {
            query_receipts(
                conn,
                "SELECT preimage, signature FROM receipts WHERE root_cid = ?1 ORDER BY seq",
                &root,
            )
        })
        .await
    }

    async fn receipts_by_author(&self, author: &AuthorId) -> Result<Vec<Receipt>> {
        let author = author.to_string();
        self.run(move |conn| {
            query_receipts(
                conn,
                "SELECT preimage, signature FROM receipts WHERE author_id = ?1 ORDER BY seq",
                &author,
            )
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Device Keys
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_device_key_if_absent(
        &self,
        record: &DeviceKeyRecord,
    ) -> Result<DeviceKeyRecord> {
        let record = record.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO device_keys
                    (slot, device_id, owner_author_id, device_name, signing_seed, agreement_secret, created_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.device_id.to_string(),
                    record.owner_author_id.as_str(),
                    record.device_name,
                    record.signing_seed.as_slice(),
                    record.agreement_secret.as_slice(),
                    record.created_at,
                ],
            )?;
            select_device_key(conn)?
                .ok_or_else(|| StoreError::InvalidData("device key row missing after insert".into()))
        })
        .await
    }

    async fn get_device_key(&self) -> Result<Option<DeviceKeyRecord>> {
        self.run(|conn| select_device_key(conn)).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Trust
    // ─────────────────────────────────────────────────────────────────────────

    async fn pin_if_absent(&self, pin: &PinnedKey) -> Result<PinOutcome> {
        let pin = pin.clone();
        self.run(move |conn| pin_row_if_absent(conn, &pin)).await
    }

    async fn get_pin(&self, device_id: &DeviceId) -> Result<Option<PinnedKey>> {
        let device_id = device_id.to_string();
        self.run(move |conn| select_pin(conn, &device_id)).await
    }

    async fn set_trust_state(&self, device_id: &DeviceId, state: TrustState) -> Result<bool> {
        let device_id = device_id.to_string();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE pinned_keys SET state = ?1 WHERE device_id = ?2",
                params![state.as_str(), device_id],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn pins_for_author(&self, author: &AuthorId) -> Result<Vec<PinnedKey>> {
        let author = author.to_string();
        self.run(move |conn| {
            let rows = conn
                .prepare(&format!(
                    "SELECT {PIN_COLUMNS} FROM pinned_keys
                     WHERE owner_author_id = ?1 ORDER BY first_seen_at, device_id"
                ))?
                .query_map([author], pin_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(pin_from_row).collect()
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Device Cache
    // ─────────────────────────────────────────────────────────────────────────

    async fn upsert_devices(&self, devices: &[RecipientDevice], fetched_at: i64) -> Result<()> {
        let devices = devices.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            for device in &devices {
                tx.execute(
                    &format!(
                        "INSERT OR REPLACE INTO device_cache ({DEVICE_COLUMNS}, fetched_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                    ),
                    params![
                        device.device_id.to_string(),
                        device.owner_author_id.as_str(),
                        device.device_name,
                        device.agreement_key.as_bytes().as_slice(),
                        device.signing_key.as_bytes().as_slice(),
                        device.status.as_str(),
                        fetched_at,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_device(&self, device_id: &DeviceId) -> Result<Option<RecipientDevice>> {
        let device_id = device_id.to_string();
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {DEVICE_COLUMNS} FROM device_cache WHERE device_id = ?1"),
                [device_id],
                device_row,
            )
            .optional()?
            .map(device_from_row)
            .transpose()
        })
        .await
    }

    async fn devices_for_author(&self, author: &AuthorId) -> Result<Vec<RecipientDevice>> {
        let author = author.to_string();
        self.run(move |conn| {
            let rows = conn
                .prepare(&format!(
                    "SELECT {DEVICE_COLUMNS} FROM device_cache
                     WHERE owner_author_id = ?1 ORDER BY device_id"
                ))?
                .query_map([author], device_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(device_from_row).collect()
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbox Ledger
    // ─────────────────────────────────────────────────────────────────────────

    async fn mark_processed(&self, message_id: &MessageId, processed_at: i64) -> Result<bool> {
        let message_id = message_id.to_string();
        self.run(move |conn| mark_processed_row(conn, &message_id, processed_at))
            .await
    }

    async fn is_processed(&self, message_id: &MessageId) -> Result<bool> {
        let message_id = message_id.to_string();
        self.run(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM processed_messages WHERE message_id = ?1",
                    [message_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn prune_processed(&self, before: i64) -> Result<usize> {
        self.run(move |conn| {
            Ok(conn.execute(
                "DELETE FROM processed_messages WHERE processed_at < ?1",
                [before],
            )?)
        })
        .await
    }
    // ─────────────────────────────────────────────────────────────────────────
    // Receive
    // ─────────────────────────────────────────────────────────────────────────

    async fn accept_message(
        &self,
        receipt: &Receipt,
        preimage: &[u8],
        pin: &PinnedKey,
        message_id: &MessageId,
        processed_at: i64,
    ) -> Result<AcceptOutcome> {
        let receipt = receipt.clone();
        let preimage = preimage.to_vec();
        let pin = pin.clone();
        let message_id = message_id.to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            if let PinOutcome::Existing(existing) = pin_row_if_absent(&tx, &pin)? {
                if existing.state == TrustState::Rejected || !existing.same_keys(&pin) {
                    // dropping the transaction rolls it back
                    return Ok(AcceptOutcome::PinConflict(existing));
                }
            }
            let inserted = insert_receipt_row(&tx, &receipt, &preimage)?;
            mark_processed_row(&tx, &message_id, processed_at)?;
            tx.commit()?;
            Ok(AcceptOutcome::Accepted(inserted))
        })
        .await
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
