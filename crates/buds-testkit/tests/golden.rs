//! Golden vectors for cross-implementation verification.
//!
//! Every implementation must produce identical preimage bytes, CIDs and
//! signatures for the positive vectors, and must reject every encoding in
//! the negative list.

use buds_core::{
    canonical, verify_receipt_with_key, Ed25519Signature, Keypair, Receipt, UnsignedReceipt,
};
use buds_testkit::vectors::{all_vectors, vectors_json, verify_all_vectors, VECTOR_AUTHOR};

#[test]
fn test_positive_vectors() {
    let reports = verify_all_vectors().unwrap();
    assert_eq!(reports.len(), all_vectors().len());
    for report in &reports {
        assert!(report.matches, "vector '{}' drifted", report.name);
    }

    // dump for other implementations: cargo test -- --nocapture
    println!("{}", vectors_json(&reports).unwrap());
}

#[test]
fn test_vector_author_is_literal() {
    for vector in all_vectors() {
        let preimage = hex::decode(vector.expected_preimage).unwrap();
        let unsigned = UnsignedReceipt::decode(&preimage).unwrap();
        assert_eq!(unsigned.author_id.as_str(), VECTOR_AUTHOR);
    }
}

/// Encodings of `{"a": ...}`-style values that must never be accepted.
const NON_CANONICAL: &[(&str, &str)] = &[
    ("short integer", "a1616101"),
    ("unsorted keys", "a261621b000000000000000161611b0000000000000002"),
    ("duplicate key", "a261611b000000000000000161611b0000000000000001"),
    ("half float", "a16161f93c00"),
    ("null", "a16161f6"),
    ("tag", "a16161c11b0000000000000001"),
    ("indefinite text", "a161617f6161ff"),
    ("non-shortest length", "a17801611b0000000000000001"),
    ("trailing byte", "a161611b000000000000000100"),
    ("truncated", "a161611b0000"),
];

#[test]
fn test_negative_vectors() {
    for (name, encoded) in NON_CANONICAL {
        let bytes = hex::decode(encoded).unwrap();
        assert!(
            canonical::decode(&bytes).is_err(),
            "non-canonical '{name}' was accepted"
        );
    }
}

#[test]
fn test_canonical_reference_accepted() {
    // the single accepted form of {"a": 1}
    let bytes = hex::decode("a161611b0000000000000001").unwrap();
    assert_eq!(canonical::encode(&canonical::decode(&bytes).unwrap()).unwrap(), bytes);
}

#[test]
fn test_altered_vector_changes_cid() {
    let vector = &all_vectors()[0];
    let mut preimage = hex::decode(vector.expected_preimage).unwrap();
    let signature =
        Ed25519Signature::from_slice(&hex::decode(vector.expected_signature).unwrap()).unwrap();

    // "first light" -> "first night"
    let at = preimage.windows(5).position(|w| w == b"light").unwrap();
    preimage[at] = b'n';

    let receipt = Receipt::from_preimage(&preimage, signature).unwrap();
    assert_ne!(receipt.cid.to_string(), vector.expected_cid);
    let key = Keypair::from_seed(&vector.seed).public_key();
    assert!(verify_receipt_with_key(&receipt, &key).is_err());
}
