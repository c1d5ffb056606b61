//! Store trait: the abstract interface for local persistence.
//!
//! The kernel is storage-agnostic. Implementations include SQLite (primary)
//! and in-memory (for tests); both must behave identically.

use async_trait::async_trait;
use buds_core::{AuthorId, Cid, DeviceId, Ed25519PublicKey, Keypair, Receipt};
use buds_e2ee::{DeviceIdentity, MessageId, RecipientDevice, X25519PublicKey, X25519StaticSecret};

use crate::error::Result;

/// Result of inserting a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    Inserted,
    /// Same CID already stored (idempotent - not an error).
    AlreadyExists,
}

/// Persisted secret material for this installation.
#[derive(Clone)]
pub struct DeviceKeyRecord {
    pub device_id: DeviceId,
    pub owner_author_id: AuthorId,
    pub device_name: String,
    pub signing_seed: [u8; 32],
    pub agreement_secret: [u8; 32],
    pub created_at: i64,
}

impl DeviceKeyRecord {
    pub fn from_identity(identity: &DeviceIdentity, created_at: i64) -> Self {
        Self {
            device_id: identity.device_id,
            owner_author_id: identity.owner_author_id.clone(),
            device_name: identity.device_name.clone(),
            signing_seed: identity.signing.seed(),
            agreement_secret: identity.agreement.to_bytes(),
            created_at,
        }
    }

    pub fn to_identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            device_id: self.device_id,
            owner_author_id: self.owner_author_id.clone(),
            device_name: self.device_name.clone(),
            signing: Keypair::from_seed(&self.signing_seed),
            agreement: X25519StaticSecret::from_bytes(self.agreement_secret),
        }
    }
}

impl std::fmt::Debug for DeviceKeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKeyRecord")
            .field("device_id", &self.device_id)
            .field("owner_author_id", &self.owner_author_id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Trust state of a remote device.
///
/// `Unknown` is represented by the absence of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrustState {
    /// Pinned on first contact, not yet confirmed out of band.
    Pinned,
    /// Confirmed by the user (e.g. safety number comparison).
    Verified,
    /// Refused by the user; messages from this device are dropped.
    Rejected,
}

impl TrustState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pinned => "pinned",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pinned" => Some(Self::Pinned),
            "verified" => Some(Self::Verified),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// A TOFU pin: the keys first seen for a remote device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedKey {
    pub device_id: DeviceId,
    pub owner_author_id: AuthorId,
    pub signing_key: Ed25519PublicKey,
    pub agreement_key: X25519PublicKey,
    pub first_seen_at: i64,
    pub state: TrustState,
}

impl PinnedKey {
    pub fn new(device: &RecipientDevice, first_seen_at: i64) -> Self {
        Self {
            device_id: device.device_id,
            owner_author_id: device.owner_author_id.clone(),
            signing_key: device.signing_key,
            agreement_key: device.agreement_key,
            first_seen_at,
            state: TrustState::Pinned,
        }
    }

    /// Whether a presented device record carries exactly the pinned keys.
    pub fn matches(&self, device: &RecipientDevice) -> bool {
        self.signing_key == device.signing_key
            && self.agreement_key == device.agreement_key
            && self.owner_author_id == device.owner_author_id
    }

    /// Whether two pins name the same keys and owner, ignoring state.
    pub fn same_keys(&self, other: &PinnedKey) -> bool {
        self.signing_key == other.signing_key
            && self.agreement_key == other.agreement_key
            && self.owner_author_id == other.owner_author_id
    }
}

/// Outcome of a compare-and-set pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinOutcome {
    /// No pin existed; the given one was stored.
    Pinned,
    /// A pin already existed and was left untouched.
    Existing(PinnedKey),
}

/// Outcome of [`Store::accept_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Receipt stored, sender pinned and message recorded.
    Accepted(InsertResult),
    /// The existing pin names other keys or is rejected. Nothing was written.
    PinConflict(PinnedKey),
}

/// Async interface for all local state.
///
/// All methods are async so SQLite can run on `spawn_blocking`.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Receipts
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a verified receipt together with its preimage bytes.
    async fn insert_receipt(&self, receipt: &Receipt, preimage: &[u8]) -> Result<InsertResult>;

    async fn get_receipt(&self, cid: &Cid) -> Result<Option<Receipt>>;

    async fn has_receipt(&self, cid: &Cid) -> Result<bool>;

    /// The exact preimage bytes the receipt was addressed from.
    async fn get_preimage(&self, cid: &Cid) -> Result<Option<Vec<u8>>>;

    /// All receipts sharing a root, in insertion order.
    async fn receipts_by_root(&self, root: &Cid) -> Result<Vec<Receipt>>;

    /// All receipts by an author, in insertion order.
    async fn receipts_by_author(&self, author: &AuthorId) -> Result<Vec<Receipt>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Device Keys
    // ─────────────────────────────────────────────────────────────────────────

    /// Store this installation's keys unless some already exist.
    ///
    /// Returns whichever record is stored afterwards, so concurrent first
    /// launches agree on a single identity.
    async fn insert_device_key_if_absent(&self, record: &DeviceKeyRecord)
        -> Result<DeviceKeyRecord>;

    async fn get_device_key(&self) -> Result<Option<DeviceKeyRecord>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Trust (TOFU pins)
    // ─────────────────────────────────────────────────────────────────────────

    /// Pin a device's keys if it has no pin yet. Never overwrites.
    async fn pin_if_absent(&self, pin: &PinnedKey) -> Result<PinOutcome>;

    async fn get_pin(&self, device_id: &DeviceId) -> Result<Option<PinnedKey>>;

    /// Change the trust state of an existing pin. Returns false if unpinned.
    async fn set_trust_state(&self, device_id: &DeviceId, state: TrustState) -> Result<bool>;

    async fn pins_for_author(&self, author: &AuthorId) -> Result<Vec<PinnedKey>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Device Cache
    // ─────────────────────────────────────────────────────────────────────────

    /// Cache directory results, replacing earlier entries for the same ids.
    async fn upsert_devices(&self, devices: &[RecipientDevice], fetched_at: i64) -> Result<()>;

    async fn get_device(&self, device_id: &DeviceId) -> Result<Option<RecipientDevice>>;

    async fn devices_for_author(&self, author: &AuthorId) -> Result<Vec<RecipientDevice>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Inbox Ledger
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a message as processed. Returns false if it already was.
    async fn mark_processed(&self, message_id: &MessageId, processed_at: i64) -> Result<bool>;

    async fn is_processed(&self, message_id: &MessageId) -> Result<bool>;

    /// Forget ledger entries older than `before`. Returns the number removed.
    async fn prune_processed(&self, before: i64) -> Result<usize>;

    // ─────────────────────────────────────────────────────────────────────────
    // Receive
    // ─────────────────────────────────────────────────────────────────────────

    /// Store a verified received receipt, pin its sender on first use and
    /// record the message as processed, all or nothing.
    ///
    /// An existing pin is kept; if it disagrees with `pin` or is rejected,
    /// nothing is written and the existing pin is returned.
    async fn accept_message(
        &self,
        receipt: &Receipt,
        preimage: &[u8],
        pin: &PinnedKey,
        message_id: &MessageId,
        processed_at: i64,
    ) -> Result<AcceptOutcome>;
}
