//! Proptest generators for property-based testing.

use proptest::prelude::*;

use buds_core::{
    AuthorId, Cid, DeviceId, DeviceLinkPayload, Ed25519PublicKey, Keypair, MemoryPayload,
    ParentRef, ReactionPayload, Receipt, ReceiptBuilder, ReceiptPayload, TombstonePayload,
};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random Ed25519PublicKey.
pub fn public_key() -> impl Strategy<Value = Ed25519PublicKey> {
    keypair().prop_map(|kp| kp.public_key())
}

/// Generate a random Cid.
pub fn cid() -> impl Strategy<Value = Cid> {
    any::<[u8; 32]>().prop_map(Cid::from_digest)
}

/// Generate a reasonable claimed timestamp, including pre-epoch values.
pub fn timestamp() -> impl Strategy<Value = i64> {
    -1_000_000_000_000i64..=4_102_444_800_000i64
}

/// Free text, including non-ASCII.
pub fn text(max_len: usize) -> impl Strategy<Value = String> {
    prop::collection::vec(any::<char>(), 0..=max_len).prop_map(|cs| cs.into_iter().collect())
}

pub fn memory_payload() -> impl Strategy<Value = MemoryPayload> {
    (
        text(200),
        prop::option::of(0u8..=5),
        prop::collection::vec("[a-z]{1,12}", 0..5),
        prop::collection::vec(cid(), 0..4),
        timestamp(),
    )
        .prop_map(|(note, rating, tags, image_cids, claimed_at_ms)| MemoryPayload {
            note,
            rating,
            tags,
            image_cids,
            claimed_at_ms,
        })
}

pub fn reaction_payload() -> impl Strategy<Value = ReactionPayload> {
    (
        prop::sample::select(vec!["🌿", "🔥", "❤️", "😂", "+1"]),
        timestamp(),
    )
        .prop_map(|(emoji, claimed_at_ms)| ReactionPayload {
            emoji: emoji.to_string(),
            claimed_at_ms,
        })
}

pub fn tombstone_payload() -> impl Strategy<Value = TombstonePayload> {
    (prop::option::of(text(40)), timestamp()).prop_map(|(reason, claimed_at_ms)| {
        TombstonePayload {
            reason,
            claimed_at_ms,
        }
    })
}

pub fn device_link_payload() -> impl Strategy<Value = DeviceLinkPayload> {
    (
        "[a-z ]{1,20}",
        public_key(),
        any::<[u8; 32]>(),
        timestamp(),
    )
        .prop_map(
            |(device_name, signing_key, agreement_key, claimed_at_ms)| DeviceLinkPayload {
                device_id: DeviceId::generate(),
                device_name,
                signing_key,
                agreement_key,
                claimed_at_ms,
            },
        )
}

/// Any receipt payload.
pub fn payload() -> impl Strategy<Value = ReceiptPayload> {
    prop_oneof![
        memory_payload().prop_map(ReceiptPayload::Memory),
        reaction_payload().prop_map(ReceiptPayload::Reaction),
        tombstone_payload().prop_map(ReceiptPayload::Tombstone),
        device_link_payload().prop_map(ReceiptPayload::DeviceLink),
    ]
}

/// Parameters for generating a receipt.
#[derive(Debug, Clone)]
pub struct ReceiptParams {
    pub keypair: Keypair,
    pub payload: ReceiptPayload,
    /// Set exactly when the payload type allows or requires a parent.
    pub parent: Option<ParentRef>,
}

impl Arbitrary for ReceiptParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (any::<[u8; 32]>(), payload(), any::<bool>(), cid(), cid())
            .prop_map(|(seed, payload, chained, parent_cid, root_cid)| {
                let has_parent = match &payload {
                    ReceiptPayload::Memory(_) => chained,
                    ReceiptPayload::Reaction(_) | ReceiptPayload::Tombstone(_) => true,
                    ReceiptPayload::DeviceLink(_) => false,
                };
                ReceiptParams {
                    keypair: Keypair::from_seed(&seed),
                    payload,
                    parent: has_parent.then_some(ParentRef {
                        cid: parent_cid,
                        root_cid,
                    }),
                }
            })
            .boxed()
    }
}

/// Generate a receipt from parameters, authored by the keypair's own id.
pub fn receipt_from_params(params: &ReceiptParams) -> Receipt {
    let author_id = AuthorId::derive(&params.keypair.public_key());
    let mut builder = ReceiptBuilder::new(author_id, params.payload.clone());
    if let Some(parent) = params.parent {
        builder = builder.parent_ref(parent);
    }
    builder
        .sign(&params.keypair)
        .expect("generated params respect the parent rule")
}
