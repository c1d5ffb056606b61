//! Error types for the Kernel.

use buds_core::{AuthorId, Cid, CoreError, DeviceId, ValidationError};
use buds_e2ee::E2eeError;
use buds_relay::RelayError;
use buds_store::StoreError;
use thiserror::Error;

/// Errors that can occur during Kernel operations.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("encryption error: {0}")]
    E2ee(#[from] E2eeError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    /// A device presented keys that differ from its pin.
    #[error("key mismatch for device {0}")]
    KeyMismatch(DeviceId),

    /// The user rejected this device's keys.
    #[error("device {0} is rejected")]
    DeviceRejected(DeviceId),

    /// A secondary device with no device link from its claimed author.
    #[error("device {device_id} is not linked to {author}")]
    UnlinkedDevice { device_id: DeviceId, author: AuthorId },

    /// The sending device has been revoked by its owner.
    #[error("device {0} is revoked")]
    RevokedDevice(DeviceId),

    /// The sending device is not in the directory.
    #[error("unknown sender device {0}")]
    UnknownSender(DeviceId),

    /// The decrypted receipt names a different author than the envelope.
    #[error("receipt author {receipt} does not match sender {sender}")]
    SenderMismatch { receipt: AuthorId, sender: AuthorId },

    #[error("receipt not found: {0}")]
    ReceiptNotFound(Cid),

    /// Every recipient device was excluded.
    #[error("no eligible recipient devices")]
    NoEligibleDevices,

    #[error("only the primary device can link devices")]
    NotPrimaryDevice,

    /// Only devices of this author can be linked.
    #[error("device {0} belongs to another author")]
    ForeignDevice(DeviceId),

    #[error("no pin for device {0}")]
    UnknownDevice(DeviceId),
}

/// Coarse error classes, for deciding how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bytes or values that cannot be encoded or decoded.
    Encoding,
    /// Content does not match its address, tag, or digest.
    Integrity,
    /// Signature, author, or pinned key does not check out.
    Authenticity,
    /// This device is not a recipient of the envelope.
    NoKeyForDevice,
    /// Transient relay failure.
    RelayUnavailable,
    Storage,
    /// The caller asked for something invalid.
    Usage,
}

impl ErrorCategory {
    /// Text safe to show a user. Never carries byte-level detail.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Encoding => "This item could not be read.",
            Self::Integrity => "This item was damaged or altered in transit and was discarded.",
            Self::Authenticity => {
                "This item could not be verified as coming from its sender and was discarded."
            }
            Self::NoKeyForDevice => "This item was not shared with this device.",
            Self::RelayUnavailable => "Can't reach the server right now. We'll try again.",
            Self::Storage => "Something went wrong saving data on this device.",
            Self::Usage => "That action isn't possible.",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RelayUnavailable)
    }
}

fn core_category(err: &CoreError) -> ErrorCategory {
    match err {
        CoreError::InvalidSignature | CoreError::InvalidPublicKey => ErrorCategory::Authenticity,
        CoreError::MissingParent(_) | CoreError::UnexpectedParent(_) => ErrorCategory::Usage,
        _ => ErrorCategory::Encoding,
    }
}

impl KernelError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Core(e) => core_category(e),
            Self::Validation(e) => match e {
                ValidationError::CidMismatch { .. } | ValidationError::GenesisRootMismatch => {
                    ErrorCategory::Integrity
                }
                ValidationError::UnknownAuthor(_) | ValidationError::SignatureFailed => {
                    ErrorCategory::Authenticity
                }
                ValidationError::Structural(_) => ErrorCategory::Encoding,
                ValidationError::Core(e) => core_category(e),
            },
            Self::E2ee(e) => match e {
                E2eeError::NoKeyForDevice(_) => ErrorCategory::NoKeyForDevice,
                E2eeError::Integrity(_)
                | E2eeError::BlobDigestMismatch
                | E2eeError::Encryption(_) => ErrorCategory::Integrity,
                E2eeError::UnresolvedCiphertext | E2eeError::NoRecipients => ErrorCategory::Usage,
                E2eeError::Core(e) => core_category(e),
            },
            Self::Store(_) => ErrorCategory::Storage,
            Self::Relay(e) => match e {
                RelayError::Unavailable(_) | RelayError::Cancelled => {
                    ErrorCategory::RelayUnavailable
                }
                RelayError::Malformed(_) => ErrorCategory::Encoding,
                RelayError::NotFound
                | RelayError::Rejected { .. }
                | RelayError::TooManyAuthors { .. }
                | RelayError::Config(_) => ErrorCategory::Usage,
            },
            Self::KeyMismatch(_)
            | Self::DeviceRejected(_)
            | Self::RevokedDevice(_)
            | Self::UnlinkedDevice { .. }
            | Self::UnknownSender(_)
            | Self::SenderMismatch { .. } => ErrorCategory::Authenticity,
            Self::ReceiptNotFound(_)
            | Self::NoEligibleDevices
            | Self::NotPrimaryDevice
            | Self::ForeignDevice(_)
            | Self::UnknownDevice(_) => ErrorCategory::Usage,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Failures that should be surfaced to the user as possible attacks.
    pub fn is_security_warning(&self) -> bool {
        matches!(self, Self::KeyMismatch(_))
    }

    /// Whether retrying the same message later could succeed.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RelayUnavailable | ErrorCategory::Storage
        )
    }
}

/// Result type for Kernel operations.
pub type Result<T> = std::result::Result<T, KernelError>;
