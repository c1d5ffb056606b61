//! # Buds Relay
//!
//! Client side of the relay: an untrusted store-and-forward service with a
//! device directory. The relay sees envelopes and wrapped keys, never
//! plaintext.
//!
//! - [`Relay`]: the contract, implemented by [`HttpRelay`] and [`MemoryRelay`]
//! - [`messages`]: JSON wire shapes
//! - [`with_retry`]: bounded backoff for transient failures

pub mod error;
pub mod http;
pub mod memory;
pub mod messages;
pub mod relay;
pub mod retry;

pub use error::{classify_status, RelayError, Result};
pub use http::{HttpRelay, RelayConfig};
pub use memory::MemoryRelay;
pub use messages::{limits, MessageDto};
pub use relay::{check_author_count, Relay};
pub use retry::{with_retry, RetryPolicy};
