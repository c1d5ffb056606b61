//! Error types for envelope encryption.

use buds_core::{CoreError, DeviceId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum E2eeError {
    /// The envelope carries no wrapped key for this device.
    #[error("no wrapped key for device {0}")]
    NoKeyForDevice(DeviceId),

    /// AEAD failure or malformed sealed blob.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// An externally stored ciphertext does not match its recorded digest.
    #[error("blob digest mismatch")]
    BlobDigestMismatch,

    /// The ciphertext lives outside the envelope and has not been fetched.
    #[error("ciphertext has not been resolved")]
    UnresolvedCiphertext,

    #[error("no recipient devices")]
    NoRecipients,

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, E2eeError>;
