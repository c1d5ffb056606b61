//! Receipt validation: content address, structure, and signature.

use crate::cid::Cid;
use crate::crypto::Ed25519PublicKey;
use crate::error::ValidationError;
use crate::identity::AuthorId;
use crate::receipt::{sign_message, Receipt};

/// Source of candidate signing keys for an author.
///
/// An author may own several devices, so verification accepts a signature
/// from any key returned here.
pub trait KeyLookup {
    fn signing_keys(&self, author: &AuthorId) -> Vec<Ed25519PublicKey>;
}

impl<F> KeyLookup for F
where
    F: Fn(&AuthorId) -> Vec<Ed25519PublicKey>,
{
    fn signing_keys(&self, author: &AuthorId) -> Vec<Ed25519PublicKey> {
        self(author)
    }
}

/// Check parent/root rules without touching keys.
pub fn validate_receipt_structure(receipt: &Receipt) -> Result<(), ValidationError> {
    receipt
        .receipt_type()
        .check_parent(receipt.parent_cid.is_some())
        .map_err(|e| ValidationError::Structural(e.to_string()))?;

    // a receipt cannot be its own parent
    if receipt.parent_cid == Some(receipt.cid) {
        return Err(ValidationError::Structural(
            "receipt names itself as parent".into(),
        ));
    }

    if receipt.is_genesis() && receipt.root_cid != receipt.cid {
        return Err(ValidationError::GenesisRootMismatch);
    }

    receipt.payload.validate()?;
    Ok(())
}

/// Verify a receipt end to end.
///
/// 1. Structural rules
/// 2. The claimed CID equals the address of the recomputed preimage
/// 3. At least one of the author's keys verifies the signature
///
/// Returns the key that verified.
pub fn verify_receipt(
    receipt: &Receipt,
    keys: &impl KeyLookup,
) -> Result<Ed25519PublicKey, ValidationError> {
    validate_receipt_structure(receipt)?;

    let preimage = receipt.preimage()?;
    let recomputed = Cid::address_of(&preimage);
    if recomputed != receipt.cid {
        return Err(ValidationError::CidMismatch {
            claimed: receipt.cid,
            recomputed,
        });
    }

    let candidates = keys.signing_keys(&receipt.author_id);
    if candidates.is_empty() {
        return Err(ValidationError::UnknownAuthor(receipt.author_id.clone()));
    }

    let message = sign_message(&preimage);
    candidates
        .into_iter()
        .find(|key| key.verify(&message, &receipt.signature).is_ok())
        .ok_or(ValidationError::SignatureFailed)
}

/// Verify against a single known key.
pub fn verify_receipt_with_key(
    receipt: &Receipt,
    key: &Ed25519PublicKey,
) -> Result<(), ValidationError> {
    let key = *key;
    verify_receipt(receipt, &move |_: &AuthorId| vec![key]).map(|_| ())
}
