//! # Buds E2EE
//!
//! Hybrid encryption of receipts for a set of recipient devices.
//!
//! ## Encryption Model
//!
//! 1. **Content key**: a fresh ChaCha20-Poly1305 key seals the receipt's
//!    canonical bytes, with the receipt CID as associated data
//! 2. **Wrapped keys**: the content key is sealed once per recipient device
//!    under a key derived from X25519 between the sender's and the device's
//!    long-term agreement keys
//!
//! Agreement keys are static, so there is no forward secrecy: a leaked
//! agreement secret exposes every message exchanged with that device until
//! the key is rotated.

pub mod crypto;
pub mod device;
pub mod envelope;
pub mod error;

pub use crypto::{ContentKey, EncryptionNonce, SharedKey, X25519PublicKey, X25519StaticSecret};
pub use device::{DeviceIdentity, DeviceStatus, RecipientDevice};
pub use envelope::{
    decrypt, decrypt_blob, encrypt_for_recipients, CiphertextRef, EncryptedEnvelope, MessageId,
    DEFAULT_TTL_MS,
};
pub use error::{E2eeError, Result};
