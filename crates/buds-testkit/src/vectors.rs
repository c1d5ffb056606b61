//! Golden test vectors for deterministic verification.
//!
//! Each vector pins the exact preimage bytes, CID and Ed25519 signature
//! for a receipt. Any implementation that shares receipts with this one
//! must reproduce them byte for byte.
//!
//! The author id is a fixed literal so the vectors do not depend on the
//! author-id derivation.

use buds_core::{
    AuthorId, Cid, CoreError, Keypair, MemoryPayload, ParentRef, ReactionPayload, Receipt,
    ReceiptBuilder, ReceiptPayload, TombstonePayload,
};
use ed25519_dalek::{Signature, VerifyingKey};
use serde::Serialize;

/// Author id shared by every vector: the base32 of bytes `0x00..=0x13`.
pub const VECTOR_AUTHOR: &str = "did:buds:aaaqeayeaudaocajbifqydiob4ibceqt";

/// A golden test vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Seed for deterministic key generation.
    pub seed: [u8; 32],
    pub payload: fn() -> ReceiptPayload,
    /// Parent and root CIDs in text form.
    pub parent: Option<(&'static str, &'static str)>,
    /// Expected canonical preimage (hex).
    pub expected_preimage: &'static str,
    pub expected_cid: &'static str,
    /// Expected signature over the domain-separated preimage (hex).
    pub expected_signature: &'static str,
}

const GENESIS_CID: &str = "bafyreiar67mg7mcjxyj2ijoz24halialdnlz3winfwiqz26mxjrdujzmni";
const EDIT_CID: &str = "bafyreig46vrnc7qqfeq62yjz5ye42i7vv2tdoioggigpckyh66t4y2basi";

fn genesis_memory() -> ReceiptPayload {
    ReceiptPayload::Memory(MemoryPayload::new("first light", 1_736_870_400_000))
}

fn rich_memory() -> ReceiptPayload {
    // bafyreiam6rl6essht4bp2tjukqbyt5za6cah3t7zfj2weeebmwzgg7vif4
    let image = Cid::address_of(b"image-1");
    ReceiptPayload::Memory(
        MemoryPayload::new("sunset walk", 1_736_870_460_000)
            .with_rating(4)
            .with_tags(["beach", "sunset"])
            .with_images(vec![image]),
    )
}

fn edited_memory() -> ReceiptPayload {
    ReceiptPayload::Memory(MemoryPayload::new(
        "first light, edited",
        1_736_870_500_000,
    ))
}

fn reaction() -> ReceiptPayload {
    ReceiptPayload::Reaction(ReactionPayload {
        emoji: "\u{1F33F}".to_string(),
        claimed_at_ms: 1_736_870_600_000,
    })
}

fn tombstone() -> ReceiptPayload {
    ReceiptPayload::Tombstone(TombstonePayload {
        reason: None,
        claimed_at_ms: -1,
    })
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "genesis memory",
            seed: [0x42; 32],
            payload: genesis_memory,
            parent: None,
            expected_preimage: "a36474797065726170702e627564732e6d656d6f72792e7631677061796c6f6164a2646e6f74656b6669727374206c696768746b636c61696d656441744d731b00000194658b100068617574686f72496478296469643a627564733a6161617165617965617564616f63616a626966717964696f6234696263657174",
            expected_cid: GENESIS_CID,
            expected_signature: "ca3ac037add4172f4e5841b0772be9128afc6499e3f61183da99f9bd4938ec35ad403c7de401a298dcacaecf5290a648270d0e7af1b609cf5b6c52950ecf1c0d",
        },
        GoldenVector {
            name: "memory with rating, tags and image",
            seed: [0x42; 32],
            payload: rich_memory,
            parent: None,
            expected_preimage: "a36474797065726170702e627564732e6d656d6f72792e7631677061796c6f6164a5646e6f74656b73756e7365742077616c6b6474616773826562656163686673756e73657466726174696e671b000000000000000469696d61676543696473815824017112200cf457e24a479f02fd4d34540389f720f0807dcff92a7562108165b2637ea82f6b636c61696d656441744d731b00000194658bfa6068617574686f72496478296469643a627564733a6161617165617965617564616f63616a626966717964696f6234696263657174",
            expected_cid: "bafyreifjge6twk6od3lna2tfwvhwzf7kjwsh64kib2omdyyrommqdyq4me",
            expected_signature: "438e008a056f1d0b4dd950d4b4044c4b5544b932f0fa9f66c5b147a58a4ac011fb25f7629ca27e29ddca48c8237e02403545e0b9994e2ed306c6f83daea79706",
        },
        GoldenVector {
            name: "edit chained onto genesis",
            seed: [0x42; 32],
            payload: edited_memory,
            parent: Some((GENESIS_CID, GENESIS_CID)),
            expected_preimage: "a56474797065726170702e627564732e6d656d6f72792e7631677061796c6f6164a2646e6f7465736669727374206c696768742c206564697465646b636c61696d656441744d731b00000194658c96a067726f6f7443696458240171122011f7d86fb049be13a425d9d70e05a00b1b579dd90d2d910cebccba623a272c6a68617574686f72496478296469643a627564733a6161617165617965617564616f63616a626966717964696f623469626365717469706172656e7443696458240171122011f7d86fb049be13a425d9d70e05a00b1b579dd90d2d910cebccba623a272c6a",
            expected_cid: EDIT_CID,
            expected_signature: "f2a7374178cf2c6a9cb18f84c7e868b9fa6f083cb60bb15ab6a0e19d5b45aff03e96952d0e2348095c18ec34efbf2355a4a74eba9d684b1579be50e49c1a6d0c",
        },
        GoldenVector {
            name: "reaction to the edit, second key",
            seed: [0x07; 32],
            payload: reaction,
            parent: Some((EDIT_CID, GENESIS_CID)),
            expected_preimage: "a56474797065746170702e627564732e7265616374696f6e2e7631677061796c6f6164a265656d6f6a6964f09f8cbf6b636c61696d656441744d731b00000194658e1d4067726f6f7443696458240171122011f7d86fb049be13a425d9d70e05a00b1b579dd90d2d910cebccba623a272c6a68617574686f72496478296469643a627564733a6161617165617965617564616f63616a626966717964696f623469626365717469706172656e74436964582401711220dcf562d17e102921ed6139ee09cd23f5aea63721c6320cf12b07f7a7cc682092",
            expected_cid: "bafyreignh27iz7n6emlplyhtmo3vqhqafy4k6ssrss4kkiosryon3wbr6u",
            expected_signature: "95f77f0a4780e13e955d711f2f519c110a6593d7b4bd4a85296ef782a64dce573f61c8fd4b7da46e555485ad6a9c3c98bc4e5f82ce987f12cefbbbf340c7a100",
        },
        GoldenVector {
            name: "tombstone with negative claimed time",
            seed: [0x42; 32],
            payload: tombstone,
            parent: Some((EDIT_CID, GENESIS_CID)),
            expected_preimage: "a56474797065756170702e627564732e746f6d6273746f6e652e7631677061796c6f6164a16b636c61696d656441744d733b000000000000000067726f6f7443696458240171122011f7d86fb049be13a425d9d70e05a00b1b579dd90d2d910cebccba623a272c6a68617574686f72496478296469643a627564733a6161617165617965617564616f63616a626966717964696f623469626365717469706172656e74436964582401711220dcf562d17e102921ed6139ee09cd23f5aea63721c6320cf12b07f7a7cc682092",
            expected_cid: "bafyreiaxpsh4h4htbqtkap3kbhbr7xhxbecstyyvkjccs63zxxs2ded72y",
            expected_signature: "57efa25e1ff6ad3b25c9cb8a550b13c0d7db6c14e236f54c462c1c8616b0663a7205d6b28451c471d0b50fe421c7fdecefed1975daa0dca304bca60e37c49b00",
        },
    ]
}

/// Build and sign the receipt a vector describes.
pub fn generate_receipt_from_vector(vector: &GoldenVector) -> Result<Receipt, CoreError> {
    let keypair = Keypair::from_seed(&vector.seed);
    let mut builder = ReceiptBuilder::new(AuthorId::parse(VECTOR_AUTHOR)?, (vector.payload)());
    if let Some((parent, root)) = vector.parent {
        builder = builder.parent_ref(ParentRef {
            cid: Cid::parse(parent)?,
            root_cid: Cid::parse(root)?,
        });
    }
    builder.sign(&keypair)
}

/// Outcome of checking one vector.
#[derive(Debug, Clone, Serialize)]
pub struct VectorReport {
    pub name: String,
    pub preimage: String,
    pub cid: String,
    pub signature: String,
    pub matches: bool,
}

fn check_vector(vector: &GoldenVector) -> Result<VectorReport, CoreError> {
    let receipt = generate_receipt_from_vector(vector)?;
    let preimage = receipt.preimage()?;
    let report = VectorReport {
        name: vector.name.to_string(),
        preimage: hex::encode(&preimage),
        cid: receipt.cid.to_string(),
        signature: receipt.signature.to_hex(),
        matches: false,
    };
    let matches = report.preimage == vector.expected_preimage
        && report.cid == vector.expected_cid
        && report.signature == vector.expected_signature;
    Ok(VectorReport { matches, ..report })
}

/// Check every vector against its expected output.
pub fn verify_all_vectors() -> Result<Vec<VectorReport>, CoreError> {
    all_vectors().iter().map(check_vector).collect()
}

/// Computed outputs as JSON, for checking other implementations.
pub fn vectors_json(reports: &[VectorReport]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(reports)
}

/// Verify a vector's expected signature with ed25519-dalek directly,
/// bypassing this crate's key wrappers.
pub fn signature_verifies(vector: &GoldenVector) -> bool {
    let (Ok(preimage), Ok(signature)) = (
        hex::decode(vector.expected_preimage),
        hex::decode(vector.expected_signature),
    ) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&signature) else {
        return false;
    };
    let public = Keypair::from_seed(&vector.seed).public_key();
    let Ok(key) = VerifyingKey::from_bytes(public.as_bytes()) else {
        return false;
    };
    let message = buds_core::receipt::sign_message(&preimage);
    key.verify_strict(&message, &signature).is_ok()
}
