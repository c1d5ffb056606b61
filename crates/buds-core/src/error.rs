//! Error types for Buds core.

use thiserror::Error;

use crate::cid::Cid;
use crate::identity::AuthorId;
use crate::receipt::ReceiptType;

/// Errors raised while encoding, decoding, or signing records.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Input cannot be represented canonically, or bytes are not canonical.
    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid cid: {0}")]
    InvalidCid(String),

    #[error("invalid author id: {0}")]
    InvalidAuthorId(String),

    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("{0} receipts require a parent")]
    MissingParent(ReceiptType),

    #[error("{0} receipts cannot have a parent")]
    UnexpectedParent(ReceiptType),
}

impl CoreError {
    pub(crate) fn encoding(msg: impl Into<String>) -> Self {
        CoreError::Encoding(msg.into())
    }
}

/// Reasons a receipt fails verification.
///
/// Every variant fails closed: a receipt that produces any of these
/// must not be stored or used to update trust state.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("cid mismatch: claimed {claimed}, recomputed {recomputed}")]
    CidMismatch { claimed: Cid, recomputed: Cid },

    #[error("genesis receipt root must equal its own cid")]
    GenesisRootMismatch,

    #[error("no keys known for author {0}")]
    UnknownAuthor(AuthorId),

    #[error("signature verification failed")]
    SignatureFailed,

    #[error("structural error: {0}")]
    Structural(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
