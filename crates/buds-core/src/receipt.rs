//! Receipt: the atomic unit of the event log.
//!
//! A receipt is an immutable, signed, content-addressed record. Edits and
//! deletions are new receipts that point at the prior version through
//! `parent_cid`; every receipt in a chain shares the `root_cid` of the first.
//!
//! The CID and the signature cover the same unsigned preimage: the canonical
//! bytes of `{authorId, parentCid?, rootCid?, type, payload}`. A genesis
//! receipt cannot name itself, so its preimage omits `rootCid` and its root
//! is its own CID.

use std::fmt;

use ciborium::value::Value;

use crate::canonical::{self, Canonical, MapBuilder, MapReader};
use crate::cid::Cid;
use crate::crypto::{Ed25519PublicKey, Ed25519Signature, Keypair};
use crate::error::{CoreError, Result};
use crate::identity::{AuthorId, DeviceId};

/// Domain separation prefix for receipt signatures.
pub const SIGN_DOMAIN: &[u8] = b"buds/receipt-sig/v1";

/// Highest allowed memory rating.
pub const MAX_RATING: u8 = 5;

/// Preimage map keys.
mod keys {
    pub const AUTHOR_ID: &str = "authorId";
    pub const PARENT_CID: &str = "parentCid";
    pub const ROOT_CID: &str = "rootCid";
    pub const TYPE: &str = "type";
    pub const PAYLOAD: &str = "payload";

    pub const NOTE: &str = "note";
    pub const RATING: &str = "rating";
    pub const TAGS: &str = "tags";
    pub const IMAGE_CIDS: &str = "imageCids";
    pub const CLAIMED_AT_MS: &str = "claimedAtMs";
    pub const EMOJI: &str = "emoji";
    pub const REASON: &str = "reason";
    pub const DEVICE_ID: &str = "deviceId";
    pub const DEVICE_NAME: &str = "deviceName";
    pub const SIGNING_KEY: &str = "signingKey";
    pub const AGREEMENT_KEY: &str = "agreementKey";
}

/// The closed set of receipt types.
///
/// Tags are versioned; a new payload shape gets a new tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReceiptType {
    /// A journal entry, or an edit of one when it has a parent.
    Memory,
    /// A reaction to another receipt.
    Reaction,
    /// Marks the parent receipt as deleted.
    Tombstone,
    /// A primary device authorizing a secondary device for its author.
    DeviceLink,
}

/// Whether a receipt type takes a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentRule {
    Optional,
    Required,
    Forbidden,
}

impl ReceiptType {
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Memory => "app.buds.memory.v1",
            Self::Reaction => "app.buds.reaction.v1",
            Self::Tombstone => "app.buds.tombstone.v1",
            Self::DeviceLink => "app.buds.device-link.v1",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "app.buds.memory.v1" => Some(Self::Memory),
            "app.buds.reaction.v1" => Some(Self::Reaction),
            "app.buds.tombstone.v1" => Some(Self::Tombstone),
            "app.buds.device-link.v1" => Some(Self::DeviceLink),
            _ => None,
        }
    }

    pub const fn parent_rule(self) -> ParentRule {
        match self {
            Self::Memory => ParentRule::Optional,
            Self::Reaction | Self::Tombstone => ParentRule::Required,
            Self::DeviceLink => ParentRule::Forbidden,
        }
    }

    /// Check a parent presence against this type's rule.
    pub fn check_parent(self, has_parent: bool) -> Result<()> {
        match (self.parent_rule(), has_parent) {
            (ParentRule::Required, false) => Err(CoreError::MissingParent(self)),
            (ParentRule::Forbidden, true) => Err(CoreError::UnexpectedParent(self)),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ReceiptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryPayload {
    pub note: String,
    pub rating: Option<u8>,
    pub tags: Vec<String>,
    /// CIDs of externally stored images.
    pub image_cids: Vec<Cid>,
    /// Author-claimed creation time (Unix ms). Untrusted.
    pub claimed_at_ms: i64,
}

impl MemoryPayload {
    pub fn new(note: impl Into<String>, claimed_at_ms: i64) -> Self {
        Self {
            note: note.into(),
            rating: None,
            tags: Vec::new(),
            image_cids: Vec::new(),
            claimed_at_ms,
        }
    }

    pub fn with_rating(mut self, rating: u8) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_images(mut self, image_cids: Vec<Cid>) -> Self {
        self.image_cids = image_cids;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionPayload {
    pub emoji: String,
    pub claimed_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TombstonePayload {
    pub reason: Option<String>,
    pub claimed_at_ms: i64,
}

/// Authorization of a secondary device, signed by the author's primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLinkPayload {
    pub device_id: DeviceId,
    pub device_name: String,
    pub signing_key: Ed25519PublicKey,
    /// X25519 public key bytes.
    pub agreement_key: [u8; 32],
    pub claimed_at_ms: i64,
}

/// Typed receipt payload, one variant per [`ReceiptType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptPayload {
    Memory(MemoryPayload),
    Reaction(ReactionPayload),
    Tombstone(TombstonePayload),
    DeviceLink(DeviceLinkPayload),
}

impl ReceiptPayload {
    pub fn receipt_type(&self) -> ReceiptType {
        match self {
            Self::Memory(_) => ReceiptType::Memory,
            Self::Reaction(_) => ReceiptType::Reaction,
            Self::Tombstone(_) => ReceiptType::Tombstone,
            Self::DeviceLink(_) => ReceiptType::DeviceLink,
        }
    }

    /// Reject payloads that have no valid encoding.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Memory(m) => {
                if let Some(rating) = m.rating {
                    if rating > MAX_RATING {
                        return Err(CoreError::encoding(format!(
                            "rating {rating} exceeds {MAX_RATING}"
                        )));
                    }
                }
                Ok(())
            }
            Self::Reaction(r) if r.emoji.is_empty() => {
                Err(CoreError::encoding("reaction emoji is empty"))
            }
            _ => Ok(()),
        }
    }

    /// Decode the payload map for a given type tag.
    pub fn from_cbor(ty: ReceiptType, value: &Value) -> Result<Self> {
        let payload = match ty {
            ReceiptType::Memory => {
                let mut r = MapReader::new("memory payload", value)?;
                let rating = match r.opt_int(keys::RATING)? {
                    Some(n) => Some(
                        u8::try_from(n).map_err(|_| CoreError::encoding("rating out of range"))?,
                    ),
                    None => None,
                };
                let image_cids = r
                    .bytes_array(keys::IMAGE_CIDS)?
                    .iter()
                    .map(|b| Cid::from_bytes(b))
                    .collect::<Result<Vec<_>>>()?;
                let payload = MemoryPayload {
                    note: r.text(keys::NOTE)?,
                    rating,
                    tags: r.text_array(keys::TAGS)?,
                    image_cids,
                    claimed_at_ms: r.int(keys::CLAIMED_AT_MS)?,
                };
                r.finish()?;
                Self::Memory(payload)
            }
            ReceiptType::Reaction => {
                let mut r = MapReader::new("reaction payload", value)?;
                let payload = ReactionPayload {
                    emoji: r.text(keys::EMOJI)?,
                    claimed_at_ms: r.int(keys::CLAIMED_AT_MS)?,
                };
                r.finish()?;
                Self::Reaction(payload)
            }
            ReceiptType::Tombstone => {
                let mut r = MapReader::new("tombstone payload", value)?;
                let payload = TombstonePayload {
                    reason: r.opt_text(keys::REASON)?,
                    claimed_at_ms: r.int(keys::CLAIMED_AT_MS)?,
                };
                r.finish()?;
                Self::Tombstone(payload)
            }
            ReceiptType::DeviceLink => {
                let mut r = MapReader::new("device-link payload", value)?;
                let payload = DeviceLinkPayload {
                    device_id: DeviceId::parse(&r.text(keys::DEVICE_ID)?)
                        .map_err(|e| CoreError::encoding(e.to_string()))?,
                    device_name: r.text(keys::DEVICE_NAME)?,
                    signing_key: Ed25519PublicKey(r.byte_array(keys::SIGNING_KEY)?),
                    agreement_key: r.byte_array(keys::AGREEMENT_KEY)?,
                    claimed_at_ms: r.int(keys::CLAIMED_AT_MS)?,
                };
                r.finish()?;
                Self::DeviceLink(payload)
            }
        };
        payload.validate()?;
        Ok(payload)
    }
}

impl Canonical for ReceiptPayload {
    fn to_cbor(&self) -> Value {
        match self {
            Self::Memory(m) => MapBuilder::new()
                .text(keys::NOTE, m.note.as_str())
                .opt_int(keys::RATING, m.rating.map(i64::from))
                .array(
                    keys::TAGS,
                    m.tags.iter().map(|t| Value::Text(t.clone())).collect(),
                )
                .array(
                    keys::IMAGE_CIDS,
                    m.image_cids
                        .iter()
                        .map(|c| Value::Bytes(c.to_bytes().to_vec()))
                        .collect(),
                )
                .int(keys::CLAIMED_AT_MS, m.claimed_at_ms)
                .build(),
            Self::Reaction(r) => MapBuilder::new()
                .text(keys::EMOJI, r.emoji.as_str())
                .int(keys::CLAIMED_AT_MS, r.claimed_at_ms)
                .build(),
            Self::Tombstone(t) => MapBuilder::new()
                .opt_text(keys::REASON, t.reason.as_deref())
                .int(keys::CLAIMED_AT_MS, t.claimed_at_ms)
                .build(),
            Self::DeviceLink(d) => MapBuilder::new()
                .text(keys::DEVICE_ID, d.device_id.to_string())
                .text(keys::DEVICE_NAME, d.device_name.as_str())
                .bytes(keys::SIGNING_KEY, d.signing_key.as_bytes())
                .bytes(keys::AGREEMENT_KEY, &d.agreement_key)
                .int(keys::CLAIMED_AT_MS, d.claimed_at_ms)
                .build(),
        }
    }
}

/// Link from a receipt to its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentRef {
    pub cid: Cid,
    pub root_cid: Cid,
}

/// Every receipt field covered by the CID and the signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedReceipt {
    pub author_id: AuthorId,
    pub parent: Option<ParentRef>,
    pub payload: ReceiptPayload,
}

impl UnsignedReceipt {
    /// Canonical preimage bytes.
    pub fn preimage(&self) -> Result<Vec<u8>> {
        self.payload.validate()?;
        self.canonical_bytes()
    }

    /// Strictly decode a preimage.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value = canonical::decode(bytes)?;
        let mut r = MapReader::new("receipt", &value)?;

        let author_id = AuthorId::parse(&r.text(keys::AUTHOR_ID)?)
            .map_err(|e| CoreError::encoding(e.to_string()))?;
        let tag = r.text(keys::TYPE)?;
        let ty = ReceiptType::from_tag(&tag)
            .ok_or_else(|| CoreError::encoding(format!("unknown receipt type {tag}")))?;

        let parent_cid = r.opt_bytes(keys::PARENT_CID)?;
        let root_cid = r.opt_bytes(keys::ROOT_CID)?;
        let parent = match (parent_cid, root_cid) {
            (Some(p), Some(root)) => Some(ParentRef {
                cid: Cid::from_bytes(&p).map_err(|e| CoreError::encoding(e.to_string()))?,
                root_cid: Cid::from_bytes(&root)
                    .map_err(|e| CoreError::encoding(e.to_string()))?,
            }),
            (None, None) => None,
            _ => {
                return Err(CoreError::encoding(
                    "parentCid and rootCid must appear together",
                ))
            }
        };

        let payload = ReceiptPayload::from_cbor(ty, r.value(keys::PAYLOAD)?)?;
        r.finish()?;

        Ok(Self {
            author_id,
            parent,
            payload,
        })
    }
}

impl Canonical for UnsignedReceipt {
    fn to_cbor(&self) -> Value {
        let mut map = MapBuilder::new()
            .text(keys::AUTHOR_ID, self.author_id.as_str())
            .text(keys::TYPE, self.payload.receipt_type().tag())
            .value(keys::PAYLOAD, self.payload.to_cbor());
        if let Some(parent) = &self.parent {
            map = map
                .bytes(keys::PARENT_CID, &parent.cid.to_bytes())
                .bytes(keys::ROOT_CID, &parent.root_cid.to_bytes());
        }
        map.build()
    }
}

/// An immutable, signed receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// CID of the unsigned preimage.
    pub cid: Cid,
    pub author_id: AuthorId,
    pub parent_cid: Option<Cid>,
    /// First receipt of the chain; equals `cid` for a genesis receipt.
    pub root_cid: Cid,
    pub payload: ReceiptPayload,
    /// Ed25519 signature over `SIGN_DOMAIN || preimage`.
    pub signature: Ed25519Signature,
}

impl Receipt {
    pub fn receipt_type(&self) -> ReceiptType {
        self.payload.receipt_type()
    }

    pub fn is_genesis(&self) -> bool {
        self.parent_cid.is_none()
    }

    /// The fields covered by the CID and signature.
    pub fn unsigned(&self) -> UnsignedReceipt {
        UnsignedReceipt {
            author_id: self.author_id.clone(),
            parent: self.parent_cid.map(|cid| ParentRef {
                cid,
                root_cid: self.root_cid,
            }),
            payload: self.payload.clone(),
        }
    }

    /// Recompute the preimage from this receipt's fields.
    pub fn preimage(&self) -> Result<Vec<u8>> {
        self.unsigned().preimage()
    }

    /// Reconstruct a receipt from received preimage bytes.
    ///
    /// The CID is taken from the bytes as received, never from a
    /// re-encoding of the decoded fields.
    pub fn from_preimage(bytes: &[u8], signature: Ed25519Signature) -> Result<Self> {
        let cid = Cid::address_of(bytes);
        let unsigned = UnsignedReceipt::decode(bytes)?;
        Ok(Self {
            cid,
            author_id: unsigned.author_id,
            parent_cid: unsigned.parent.map(|p| p.cid),
            root_cid: unsigned.parent.map(|p| p.root_cid).unwrap_or(cid),
            payload: unsigned.payload,
            signature,
        })
    }

    /// The tombstoned or reacted-to receipt, for types that require a parent.
    pub fn target(&self) -> Option<&Cid> {
        match self.receipt_type().parent_rule() {
            ParentRule::Required => self.parent_cid.as_ref(),
            _ => None,
        }
    }
}

/// Build the message to sign (with domain separation).
pub fn sign_message(preimage: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(SIGN_DOMAIN.len() + preimage.len());
    msg.extend_from_slice(SIGN_DOMAIN);
    msg.extend_from_slice(preimage);
    msg
}

/// Builder for creating receipts.
pub struct ReceiptBuilder {
    author_id: AuthorId,
    payload: ReceiptPayload,
    parent: Option<ParentRef>,
}

impl ReceiptBuilder {
    pub fn new(author_id: AuthorId, payload: ReceiptPayload) -> Self {
        Self {
            author_id,
            payload,
            parent: None,
        }
    }

    /// Chain onto an existing receipt; the root is inherited from it.
    pub fn parent(mut self, parent: &Receipt) -> Self {
        self.parent = Some(ParentRef {
            cid: parent.cid,
            root_cid: parent.root_cid,
        });
        self
    }

    pub fn parent_ref(mut self, parent: ParentRef) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Build, address, and sign the receipt.
    pub fn sign(self, keypair: &Keypair) -> Result<Receipt> {
        let ty = self.payload.receipt_type();
        ty.check_parent(self.parent.is_some())?;

        let unsigned = UnsignedReceipt {
            author_id: self.author_id,
            parent: self.parent,
            payload: self.payload,
        };
        let preimage = unsigned.preimage()?;
        let cid = Cid::address_of(&preimage);
        let signature = keypair.sign(&sign_message(&preimage));

        Ok(Receipt {
            cid,
            author_id: unsigned.author_id,
            parent_cid: unsigned.parent.map(|p| p.cid),
            root_cid: unsigned.parent.map(|p| p.root_cid).unwrap_or(cid),
            payload: unsigned.payload,
            signature,
        })
    }
}

/// Create a signed receipt, optionally chained onto a parent.
pub fn create_receipt(
    keypair: &Keypair,
    author_id: &AuthorId,
    payload: ReceiptPayload,
    parent: Option<&Receipt>,
) -> Result<Receipt> {
    let mut builder = ReceiptBuilder::new(author_id.clone(), payload);
    if let Some(parent) = parent {
        builder = builder.parent(parent);
    }
    builder.sign(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> (Keypair, AuthorId) {
        let keypair = Keypair::from_seed(&[0x42; 32]);
        let author_id = AuthorId::derive(&keypair.public_key());
        (keypair, author_id)
    }

    fn memory(note: &str) -> ReceiptPayload {
        ReceiptPayload::Memory(MemoryPayload::new(note, 1_736_870_400_000))
    }

    #[test]
    fn test_genesis_root_is_self() {
        let (kp, author_id) = author();
        let receipt = create_receipt(&kp, &author_id, memory("test"), None).unwrap();
        assert!(receipt.is_genesis());
        assert_eq!(receipt.root_cid, receipt.cid);
    }

    #[test]
    fn test_chain_inherits_root() {
        let (kp, author_id) = author();
        let first = create_receipt(&kp, &author_id, memory("v1"), None).unwrap();
        let second = create_receipt(&kp, &author_id, memory("v2"), Some(&first)).unwrap();
        let third = create_receipt(&kp, &author_id, memory("v3"), Some(&second)).unwrap();

        assert_eq!(second.parent_cid, Some(first.cid));
        assert_eq!(second.root_cid, first.root_cid);
        // root is the chain's first receipt, not the parent
        assert_eq!(third.root_cid, first.cid);
        assert_ne!(third.root_cid, second.cid);
    }

    #[test]
    fn test_identical_fields_identical_cid() {
        let (kp, author_id) = author();
        let a = create_receipt(&kp, &author_id, memory("same"), None).unwrap();
        let b = create_receipt(&kp, &author_id, memory("same"), None).unwrap();
        assert_eq!(a.cid, b.cid);
        assert_eq!(a.signature, b.signature);
    }

    #[test]
    fn test_cid_covers_preimage_only() {
        let (kp, author_id) = author();
        let receipt = create_receipt(&kp, &author_id, memory("x"), None).unwrap();
        let preimage = receipt.preimage().unwrap();
        assert_eq!(Cid::address_of(&preimage), receipt.cid);
    }

    #[test]
    fn test_signature_covers_domain_and_preimage() {
        let (kp, author_id) = author();
        let receipt = create_receipt(&kp, &author_id, memory("x"), None).unwrap();
        let preimage = receipt.preimage().unwrap();
        kp.public_key()
            .verify(&sign_message(&preimage), &receipt.signature)
            .unwrap();
        assert!(kp.public_key().verify(&preimage, &receipt.signature).is_err());
    }

    #[test]
    fn test_from_preimage_roundtrip() {
        let (kp, author_id) = author();
        let parent = create_receipt(&kp, &author_id, memory("p"), None).unwrap();
        let payload = ReceiptPayload::Memory(
            MemoryPayload::new("with extras", 5)
                .with_rating(4)
                .with_tags(["evening", "calm"])
                .with_images(vec![Cid::address_of(b"img")]),
        );
        let receipt = create_receipt(&kp, &author_id, payload, Some(&parent)).unwrap();

        let preimage = receipt.preimage().unwrap();
        let decoded = Receipt::from_preimage(&preimage, receipt.signature).unwrap();
        assert_eq!(decoded, receipt);
    }

    #[test]
    fn test_genesis_preimage_omits_root() {
        let (kp, author_id) = author();
        let receipt = create_receipt(&kp, &author_id, memory("x"), None).unwrap();
        let value = canonical::decode(&receipt.preimage().unwrap()).unwrap();
        let Value::Map(entries) = value else {
            panic!("expected map");
        };
        let keys: Vec<_> = entries
            .iter()
            .filter_map(|(k, _)| k.as_text())
            .collect();
        // sorted by encoded bytes: length first
        assert_eq!(keys, vec!["type", "payload", "authorId"]);
    }

    #[test]
    fn test_tombstone_requires_parent() {
        let (kp, author_id) = author();
        let tombstone = ReceiptPayload::Tombstone(TombstonePayload {
            reason: None,
            claimed_at_ms: 1,
        });
        let err = create_receipt(&kp, &author_id, tombstone.clone(), None).unwrap_err();
        assert!(matches!(err, CoreError::MissingParent(ReceiptType::Tombstone)));

        let parent = create_receipt(&kp, &author_id, memory("bye"), None).unwrap();
        let t = create_receipt(&kp, &author_id, tombstone, Some(&parent)).unwrap();
        assert_eq!(t.target(), Some(&parent.cid));
    }

    #[test]
    fn test_device_link_forbids_parent() {
        let (kp, author_id) = author();
        let parent = create_receipt(&kp, &author_id, memory("p"), None).unwrap();
        let link = ReceiptPayload::DeviceLink(DeviceLinkPayload {
            device_id: DeviceId::generate(),
            device_name: "iPad".into(),
            signing_key: Keypair::generate().public_key(),
            agreement_key: [9; 32],
            claimed_at_ms: 1,
        });
        assert!(create_receipt(&kp, &author_id, link.clone(), Some(&parent)).is_err());

        let receipt = create_receipt(&kp, &author_id, link, None).unwrap();
        let decoded =
            Receipt::from_preimage(&receipt.preimage().unwrap(), receipt.signature).unwrap();
        assert_eq!(decoded.payload, receipt.payload);
    }

    #[test]
    fn test_rating_out_of_range_rejected() {
        let (kp, author_id) = author();
        let payload = ReceiptPayload::Memory(MemoryPayload::new("x", 1).with_rating(9));
        assert!(matches!(
            create_receipt(&kp, &author_id, payload, None),
            Err(CoreError::Encoding(_))
        ));
    }

    #[test]
    fn test_unknown_type_is_encoding_error() {
        let (_, author_id) = author();
        let value = MapBuilder::new()
            .text(keys::AUTHOR_ID, author_id.as_str())
            .text(keys::TYPE, "app.buds.poll.v1")
            .value(keys::PAYLOAD, MapBuilder::new().int("x", 1).build())
            .build();
        let bytes = canonical::encode(&value).unwrap();
        let err = UnsignedReceipt::decode(&bytes).unwrap_err();
        assert!(matches!(err, CoreError::Encoding(msg) if msg.contains("unknown receipt type")));
    }

    #[test]
    fn test_payload_mismatching_type_rejected() {
        let (_, author_id) = author();
        // memory tag with a reaction-shaped payload
        let value = MapBuilder::new()
            .text(keys::AUTHOR_ID, author_id.as_str())
            .text(keys::TYPE, ReceiptType::Memory.tag())
            .value(
                keys::PAYLOAD,
                MapBuilder::new().text("emoji", "🔥").int("claimedAtMs", 1).build(),
            )
            .build();
        let bytes = canonical::encode(&value).unwrap();
        assert!(UnsignedReceipt::decode(&bytes).is_err());
    }

    #[test]
    fn test_parent_without_root_rejected() {
        let (_, author_id) = author();
        let value = MapBuilder::new()
            .text(keys::AUTHOR_ID, author_id.as_str())
            .text(keys::TYPE, ReceiptType::Memory.tag())
            .bytes(keys::PARENT_CID, &Cid::address_of(b"p").to_bytes())
            .value(
                keys::PAYLOAD,
                MapBuilder::new().text("note", "n").int("claimedAtMs", 1).build(),
            )
            .build();
        let bytes = canonical::encode(&value).unwrap();
        assert!(UnsignedReceipt::decode(&bytes).is_err());
    }

    #[test]
    fn test_type_tags_roundtrip() {
        for ty in [
            ReceiptType::Memory,
            ReceiptType::Reaction,
            ReceiptType::Tombstone,
            ReceiptType::DeviceLink,
        ] {
            assert_eq!(ReceiptType::from_tag(ty.tag()), Some(ty));
        }
        assert_eq!(ReceiptType::from_tag("app.buds.memory.v2"), None);
    }
}
