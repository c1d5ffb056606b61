//! # Buds Kernel
//!
//! The unified API for Buds: signed, content-addressed receipts shared
//! end-to-end encrypted with a small set of recipient devices through an
//! untrusted relay.
//!
//! ## Overview
//!
//! - **Receipts**: immutable signed records; edits and deletions are new
//!   receipts chained onto the old one
//! - **Sharing**: one sealed payload per share, one wrapped key per device
//! - **Trust**: remote device keys are pinned on first use; a later change
//!   is a security warning, never a silent re-pin
//! - **Relay**: store-and-forward only; it never sees plaintext
//!
//! ## Usage
//!
//! ```rust,no_run
//! use buds_kernel::{Kernel, KernelConfig};
//! use buds_kernel::core::{MemoryPayload, ReceiptPayload};
//! use buds_kernel::relay::{HttpRelay, RelayConfig};
//! use buds_kernel::store::SqliteStore;
//! use std::sync::Arc;
//!
//! async fn example() -> buds_kernel::Result<()> {
//!     let store = SqliteStore::open("buds.db")?;
//!     let relay = Arc::new(HttpRelay::new(&RelayConfig::new("https://relay.example.com"))?);
//!     let kernel = Kernel::open(store, relay, "my phone", KernelConfig::default()).await?;
//!     kernel.register_device(None).await?;
//!
//!     let note = MemoryPayload::new("first light", 1_736_870_400_000);
//!     let receipt = kernel.create_receipt(ReceiptPayload::Memory(note), None).await?;
//!
//!     let friend = kernel.lookup_identity("contact-token").await?;
//!     kernel.share(&receipt.cid, &[friend]).await?;
//!
//!     let report = kernel.sync_inbox().await?;
//!     println!("received {} receipts", report.accepted.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `buds_kernel::core` - receipts, CIDs, identifiers
//! - `buds_kernel::e2ee` - envelope encryption
//! - `buds_kernel::store` - storage abstraction, SQLite and in-memory
//! - `buds_kernel::relay` - relay contract and clients

pub mod error;
pub mod kernel;
pub mod trust;

pub use buds_core as core;
pub use buds_e2ee as e2ee;
pub use buds_relay as relay;
pub use buds_store as store;

pub use error::{ErrorCategory, KernelError, Result};
pub use kernel::{
    DeviceResolution, ExcludedDevice, ExclusionReason, Kernel, KernelConfig, ProcessOutcome,
    RejectedMessage, ShareReport, SyncReport,
};
pub use trust::TrustStore;

pub use buds_core::{AuthorId, Cid, DeviceId, Receipt, ReceiptPayload, ReceiptType};
pub use buds_e2ee::{DeviceIdentity, EncryptedEnvelope, MessageId, RecipientDevice};
