//! # Buds Core
//!
//! Pure primitives for Buds: canonical encoding, content addressing,
//! signed receipts, and author/device identifiers.
//!
//! This crate does no I/O. Everything here is computation over bytes and
//! keys, so it can be shared by the store, the relay client, and tests.
//!
//! ## Key Types
//!
//! - [`Receipt`] - Immutable signed record
//! - [`Cid`] - CIDv1 content address of a receipt's unsigned preimage
//! - [`AuthorId`] - `did:buds:` identifier derived from a primary device key
//! - [`DeviceId`] - Per-installation identifier
//!
//! ## Canonicalization
//!
//! Receipts are encoded as restricted CBOR. See the [`canonical`] module.

mod base32;
pub mod canonical;
pub mod cid;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod receipt;
pub mod validation;

pub use canonical::{Canonical, MapBuilder, MapReader};
pub use cid::{address_of, Cid};
pub use crypto::{Ed25519PublicKey, Ed25519Signature, Keypair};
pub use error::{CoreError, ValidationError};
pub use identity::{AuthorId, DeviceId};
pub use receipt::{
    create_receipt, DeviceLinkPayload, MemoryPayload, ParentRef, ReactionPayload, Receipt,
    ReceiptBuilder, ReceiptPayload, ReceiptType, TombstonePayload, UnsignedReceipt,
};
pub use validation::{
    validate_receipt_structure, verify_receipt, verify_receipt_with_key, KeyLookup,
};
