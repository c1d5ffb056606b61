//! Database schema migrations for SQLite.
//!
//! Each migration transforms the schema from version N to N+1 and is
//! recorded in `schema_migrations`.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema. Idempotent.
pub fn migrate(conn: &mut Connection, now_ms: i64) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database is at version {current}, newer than supported {CURRENT_VERSION}"
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;
        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_ms],
            )?;
        }
        tx.commit()?;
        tracing::debug!(from = current, to = CURRENT_VERSION, "schema migrated");
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Verified receipts, keyed by CID
        CREATE TABLE receipts (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            cid BLOB NOT NULL UNIQUE,          -- 36 bytes, binary CIDv1
            author_id TEXT NOT NULL,
            parent_cid BLOB,                   -- NULL for genesis
            root_cid BLOB NOT NULL,
            receipt_type TEXT NOT NULL,
            preimage BLOB NOT NULL,            -- exact canonical bytes addressed by cid
            signature BLOB NOT NULL,           -- 64 bytes
            ingested_at INTEGER NOT NULL
        );

        -- This installation's keys; at most one row
        CREATE TABLE device_keys (
            slot INTEGER PRIMARY KEY CHECK (slot = 1),
            device_id TEXT NOT NULL,
            owner_author_id TEXT NOT NULL,
            device_name TEXT NOT NULL,
            signing_seed BLOB NOT NULL,
            agreement_secret BLOB NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- TOFU pins by remote device
        CREATE TABLE pinned_keys (
            device_id TEXT PRIMARY KEY,
            owner_author_id TEXT NOT NULL,
            signing_key BLOB NOT NULL,
            agreement_key BLOB NOT NULL,
            first_seen_at INTEGER NOT NULL,
            state TEXT NOT NULL                -- pinned | verified | rejected
        );

        -- Resolved directory entries
        CREATE TABLE device_cache (
            device_id TEXT PRIMARY KEY,
            owner_author_id TEXT NOT NULL,
            device_name TEXT NOT NULL,
            agreement_key BLOB NOT NULL,
            signing_key BLOB NOT NULL,
            status TEXT NOT NULL,              -- active | revoked
            fetched_at INTEGER NOT NULL
        );

        -- Inbox dedupe ledger
        CREATE TABLE processed_messages (
            message_id TEXT PRIMARY KEY,
            processed_at INTEGER NOT NULL
        );

        CREATE INDEX idx_receipts_root ON receipts(root_cid);
        CREATE INDEX idx_receipts_author ON receipts(author_id);
        CREATE INDEX idx_pins_author ON pinned_keys(owner_author_id);
        CREATE INDEX idx_device_cache_author ON device_cache(owner_author_id);
        CREATE INDEX idx_processed_at ON processed_messages(processed_at);
        "#,
    )?;

    Ok(())
}
