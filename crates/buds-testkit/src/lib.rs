//! # Buds Testkit
//!
//! Testing utilities for Buds.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: fixed receipts with their expected preimage bytes,
//!   CID and signature, for cross-platform verification
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: receipt builders and a multi-author network on an
//!   in-memory relay
//!
//! ## Golden Vectors
//!
//! ```rust
//! use buds_testkit::vectors::verify_all_vectors;
//!
//! for report in verify_all_vectors().unwrap() {
//!     assert!(report.matches, "{}: {}", report.name, report.cid);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use buds_testkit::generators::{ReceiptParams, receipt_from_params};
//!
//! proptest! {
//!     #[test]
//!     fn cid_is_deterministic(params: ReceiptParams) {
//!         let r1 = receipt_from_params(&params);
//!         let r2 = receipt_from_params(&params);
//!         prop_assert_eq!(r1.cid, r2.cid);
//!     }
//! }
//! ```
//!
//! ## Test Network
//!
//! ```rust,no_run
//! use buds_testkit::fixtures::TestNetwork;
//!
//! # async fn example() -> buds_kernel::Result<()> {
//! let network = TestNetwork::new();
//! let alice = network.primary("alice phone").await?;
//! let bob = network.primary("bob phone").await?;
//!
//! network.share_memory(&alice, "hello", &[bob.author_id().clone()]).await?;
//! let report = bob.sync_inbox().await?;
//! assert_eq!(report.accepted.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{multi_party_fixtures, TestFixture, TestKernel, TestNetwork};
pub use generators::{receipt_from_params, ReceiptParams};
pub use vectors::{
    all_vectors, generate_receipt_from_vector, verify_all_vectors, GoldenVector, VectorReport,
};
