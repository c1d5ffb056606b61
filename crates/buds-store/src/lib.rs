//! # Buds Store
//!
//! Local persistence behind the [`Store`] trait, with SQLite and in-memory
//! implementations.
//!
//! ## What lives here
//!
//! - **Receipts**: verified receipts keyed by CID, stored as their exact
//!   preimage bytes plus signature
//! - **Device keys**: this installation's secret seeds (one row)
//! - **Trust**: TOFU pins per remote device, compare-and-set only
//! - **Device cache**: directory entries resolved through the relay
//! - **Inbox ledger**: message ids already processed, for dedupe
//!
//! ## Usage
//!
//! ```rust,no_run
//! use buds_store::{SqliteStore, Store};
//!
//! async fn example() {
//!     let store = SqliteStore::open("buds.db").unwrap();
//!     let key = store.get_device_key().await.unwrap();
//!     println!("provisioned: {}", key.is_some());
//! }
//! ```

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

#[cfg(test)]
mod contract;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    AcceptOutcome, DeviceKeyRecord, InsertResult, PinOutcome, PinnedKey, Store, TrustState,
};
