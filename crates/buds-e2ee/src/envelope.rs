//! Encrypted envelopes: one sealed payload, one wrapped key per device.
//!
//! The payload is sealed once under a fresh content key with the receipt
//! CID as associated data. The content key is then sealed separately for
//! every recipient device under a key derived from static-static X25519,
//! binding the CID and the recipient's device id.

use std::collections::BTreeMap;
use std::fmt;

use buds_core::{AuthorId, Cid, DeviceId, Ed25519Signature};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::crypto::{ContentKey, X25519PublicKey, X25519StaticSecret, KEY_LEN, WRAPPED_KEY_LEN};
use crate::device::{DeviceIdentity, RecipientDevice};
use crate::error::{E2eeError, Result};

/// Relay retention period: 30 days in milliseconds.
pub const DEFAULT_TTL_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Relay message identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0.hyphenated())
    }
}

/// Where the sealed payload lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiphertextRef {
    /// Sealed bytes carried in the envelope.
    Inline(Bytes),
    /// Sealed bytes stored elsewhere; must be fetched and digest-checked.
    External { locator: String, sha256: [u8; 32] },
}

/// A sealed receipt addressed to a set of devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    pub message_id: MessageId,
    pub receipt_cid: Cid,
    pub ciphertext: CiphertextRef,
    /// One 60-byte sealed content key per recipient device.
    pub wrapped_keys: BTreeMap<DeviceId, Vec<u8>>,
    pub sender_author_id: AuthorId,
    pub sender_device_id: DeviceId,
    /// The receipt's signature over its preimage.
    pub signature: Ed25519Signature,
    /// Unix ms.
    pub created_at: i64,
    pub expires_at: i64,
}

impl EncryptedEnvelope {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }

    pub fn is_addressed_to(&self, device_id: &DeviceId) -> bool {
        self.wrapped_keys.contains_key(device_id)
    }

    /// Move the inline ciphertext out of the envelope.
    ///
    /// Returns the envelope pointing at `locator` and the bytes to upload.
    pub fn into_external(self, locator: impl Into<String>) -> Result<(Self, Bytes)> {
        let CiphertextRef::Inline(blob) = self.ciphertext else {
            return Err(E2eeError::UnresolvedCiphertext);
        };
        let sha256: [u8; 32] = Sha256::digest(&blob).into();
        let envelope = Self {
            ciphertext: CiphertextRef::External {
                locator: locator.into(),
                sha256,
            },
            ..self
        };
        Ok((envelope, blob))
    }

    /// Attach a fetched external blob after checking its digest.
    pub fn resolve(self, blob: Bytes) -> Result<Self> {
        let expected = match &self.ciphertext {
            CiphertextRef::Inline(_) => return Ok(self),
            CiphertextRef::External { sha256, .. } => *sha256,
        };
        let actual: [u8; 32] = Sha256::digest(&blob).into();
        if actual != expected {
            return Err(E2eeError::BlobDigestMismatch);
        }
        Ok(Self {
            ciphertext: CiphertextRef::Inline(blob),
            ..self
        })
    }
}

/// Associated data for a wrapped key: CID bytes followed by the device id text.
fn wrap_aad(receipt_cid: &Cid, device_id: &DeviceId) -> Vec<u8> {
    let device = device_id.to_string();
    let mut aad = Vec::with_capacity(buds_core::cid::CID_LEN + device.len());
    aad.extend_from_slice(&receipt_cid.to_bytes());
    aad.extend_from_slice(device.as_bytes());
    aad
}

/// Seal a receipt's canonical bytes for a set of recipient devices.
///
/// Duplicate device ids collapse to a single wrapped key.
pub fn encrypt_for_recipients(
    plaintext: &[u8],
    receipt_cid: &Cid,
    signature: Ed25519Signature,
    sender: &DeviceIdentity,
    recipients: &[RecipientDevice],
    created_at: i64,
) -> Result<EncryptedEnvelope> {
    if recipients.is_empty() {
        return Err(E2eeError::NoRecipients);
    }

    let content_key = ContentKey::generate();
    let sealed = content_key.seal(plaintext, &receipt_cid.to_bytes())?;

    let sender_pk = sender.agreement_key();
    let mut wrapped_keys = BTreeMap::new();
    for recipient in recipients {
        if wrapped_keys.contains_key(&recipient.device_id) {
            tracing::debug!(device_id = %recipient.device_id, "duplicate recipient collapsed");
            continue;
        }
        let shared = sender.agreement.diffie_hellman(&recipient.agreement_key)?;
        let wrapping_key = shared.derive_wrapping_key(&sender_pk, &recipient.agreement_key);
        let wrapped = wrapping_key.seal(
            content_key.as_bytes(),
            &wrap_aad(receipt_cid, &recipient.device_id),
        )?;
        debug_assert_eq!(wrapped.len(), WRAPPED_KEY_LEN);
        wrapped_keys.insert(recipient.device_id, wrapped);
    }

    Ok(EncryptedEnvelope {
        message_id: MessageId::generate(),
        receipt_cid: *receipt_cid,
        ciphertext: CiphertextRef::Inline(Bytes::from(sealed)),
        wrapped_keys,
        sender_author_id: sender.owner_author_id.clone(),
        sender_device_id: sender.device_id,
        signature,
        created_at,
        expires_at: created_at.saturating_add(DEFAULT_TTL_MS),
    })
}

/// Recover the canonical bytes addressed to `my_device_id`.
///
/// The caller must still check that the plaintext addresses to
/// `envelope.receipt_cid` before decoding it.
pub fn decrypt(
    envelope: &EncryptedEnvelope,
    my_device_id: &DeviceId,
    my_secret: &X25519StaticSecret,
    sender_agreement_key: &X25519PublicKey,
) -> Result<Vec<u8>> {
    let wrapped = envelope
        .wrapped_keys
        .get(my_device_id)
        .ok_or(E2eeError::NoKeyForDevice(*my_device_id))?;

    let sealed = match &envelope.ciphertext {
        CiphertextRef::Inline(bytes) => bytes,
        CiphertextRef::External { .. } => return Err(E2eeError::UnresolvedCiphertext),
    };

    let shared = my_secret.diffie_hellman(sender_agreement_key)?;
    let wrapping_key = shared.derive_wrapping_key(sender_agreement_key, &my_secret.public_key());
    let key_bytes = wrapping_key.open(wrapped, &wrap_aad(&envelope.receipt_cid, my_device_id))?;
    let key_bytes: [u8; KEY_LEN] = key_bytes
        .try_into()
        .map_err(|_| E2eeError::Integrity("wrapped key has wrong length".into()))?;

    ContentKey::from_bytes(key_bytes).open(sealed, &envelope.receipt_cid.to_bytes())
}

/// Decrypt an envelope whose ciphertext is stored externally.
pub fn decrypt_blob(
    envelope: EncryptedEnvelope,
    blob: Bytes,
    my_device_id: &DeviceId,
    my_secret: &X25519StaticSecret,
    sender_agreement_key: &X25519PublicKey,
) -> Result<Vec<u8>> {
    let resolved = envelope.resolve(blob)?;
    decrypt(&resolved, my_device_id, my_secret, sender_agreement_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use buds_core::Keypair;

    struct Setup {
        sender: DeviceIdentity,
        d1: DeviceIdentity,
        d2: DeviceIdentity,
        cid: Cid,
        plaintext: Vec<u8>,
    }

    fn setup() -> Setup {
        let plaintext = b"canonical receipt bytes".to_vec();
        Setup {
            sender: DeviceIdentity::generate_primary("alice phone"),
            d1: DeviceIdentity::generate_primary("bob phone"),
            d2: DeviceIdentity::generate_primary("carol phone"),
            cid: Cid::address_of(&plaintext),
            plaintext,
        }
    }

    fn seal(s: &Setup, recipients: &[RecipientDevice]) -> EncryptedEnvelope {
        let signature = Keypair::generate().sign(b"unused");
        encrypt_for_recipients(&s.plaintext, &s.cid, signature, &s.sender, recipients, 1_000)
            .unwrap()
    }

    #[test]
    fn test_each_recipient_decrypts() {
        let s = setup();
        let env = seal(&s, &[s.d1.to_recipient(), s.d2.to_recipient()]);
        assert_eq!(env.wrapped_keys.len(), 2);

        for device in [&s.d1, &s.d2] {
            let pt = decrypt(
                &env,
                &device.device_id,
                &device.agreement,
                &s.sender.agreement_key(),
            )
            .unwrap();
            assert_eq!(pt, s.plaintext);
        }
    }

    #[test]
    fn test_unaddressed_device() {
        let s = setup();
        let env = seal(&s, &[s.d1.to_recipient()]);
        let outsider = DeviceIdentity::generate_primary("eve");
        let err = decrypt(
            &env,
            &outsider.device_id,
            &outsider.agreement,
            &s.sender.agreement_key(),
        )
        .unwrap_err();
        assert!(matches!(err, E2eeError::NoKeyForDevice(id) if id == outsider.device_id));
    }

    #[test]
    fn test_wrapped_key_bound_to_device_id() {
        let s = setup();
        let mut env = seal(&s, &[s.d1.to_recipient()]);
        // move d1's key under another id held by the same secret
        let stolen = env.wrapped_keys.remove(&s.d1.device_id).unwrap();
        let other_id = DeviceId::generate();
        env.wrapped_keys.insert(other_id, stolen);

        assert!(matches!(
            decrypt(&env, &other_id, &s.d1.agreement, &s.sender.agreement_key()),
            Err(E2eeError::Integrity(_))
        ));
    }

    #[test]
    fn test_tampered_payload_fails_closed() {
        let s = setup();
        let env = seal(&s, &[s.d1.to_recipient()]);
        let CiphertextRef::Inline(blob) = &env.ciphertext else {
            panic!("expected inline ciphertext");
        };

        for i in 0..blob.len() {
            let mut tampered = blob.to_vec();
            tampered[i] ^= 0x01;
            let mut env2 = env.clone();
            env2.ciphertext = CiphertextRef::Inline(Bytes::from(tampered));
            assert!(decrypt(
                &env2,
                &s.d1.device_id,
                &s.d1.agreement,
                &s.sender.agreement_key()
            )
            .is_err());
        }
    }

    #[test]
    fn test_swapped_cid_fails() {
        let s = setup();
        let mut env = seal(&s, &[s.d1.to_recipient()]);
        env.receipt_cid = Cid::address_of(b"other");
        assert!(decrypt(&env, &s.d1.device_id, &s.d1.agreement, &s.sender.agreement_key()).is_err());
    }

    #[test]
    fn test_wrong_sender_key_fails() {
        let s = setup();
        let env = seal(&s, &[s.d1.to_recipient()]);
        let imposter = X25519StaticSecret::generate().public_key();
        assert!(decrypt(&env, &s.d1.device_id, &s.d1.agreement, &imposter).is_err());
    }

    #[test]
    fn test_duplicates_collapse() {
        let s = setup();
        let r = s.d1.to_recipient();
        let env = seal(&s, &[r.clone(), r.clone(), s.d2.to_recipient(), r]);
        assert_eq!(env.wrapped_keys.len(), 2);
        assert!(env
            .wrapped_keys
            .values()
            .all(|k| k.len() == WRAPPED_KEY_LEN));
    }

    #[test]
    fn test_empty_recipients_rejected() {
        let s = setup();
        let signature = Keypair::generate().sign(b"x");
        assert!(matches!(
            encrypt_for_recipients(&s.plaintext, &s.cid, signature, &s.sender, &[], 0),
            Err(E2eeError::NoRecipients)
        ));
    }

    #[test]
    fn test_ttl() {
        let s = setup();
        let env = seal(&s, &[s.d1.to_recipient()]);
        assert_eq!(env.expires_at - env.created_at, DEFAULT_TTL_MS);
        assert!(!env.is_expired(env.created_at));
        assert!(env.is_expired(env.expires_at));
    }

    #[test]
    fn test_external_blob() {
        let s = setup();
        let env = seal(&s, &[s.d1.to_recipient()]);
        let (external, blob) = env.into_external("blob://1").unwrap();

        assert!(matches!(
            decrypt(&external, &s.d1.device_id, &s.d1.agreement, &s.sender.agreement_key()),
            Err(E2eeError::UnresolvedCiphertext)
        ));

        let mut corrupted = blob.to_vec();
        corrupted[0] ^= 1;
        assert!(matches!(
            external.clone().resolve(Bytes::from(corrupted)),
            Err(E2eeError::BlobDigestMismatch)
        ));

        let pt = decrypt_blob(
            external,
            blob,
            &s.d1.device_id,
            &s.d1.agreement,
            &s.sender.agreement_key(),
        )
        .unwrap();
        assert_eq!(pt, s.plaintext);
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(16))]

        #[test]
        fn prop_one_wrapped_key_per_device(n in 1usize..6, plaintext in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..256)) {
            let sender = DeviceIdentity::generate_primary("sender");
            let devices: Vec<_> = (0..n).map(|_| DeviceIdentity::generate_primary("d")).collect();
            let recipients: Vec<_> = devices.iter().map(DeviceIdentity::to_recipient).collect();
            let cid = Cid::address_of(&plaintext);
            let signature = Keypair::from_seed(&[3; 32]).sign(&plaintext);

            let env = encrypt_for_recipients(&plaintext, &cid, signature, &sender, &recipients, 0).unwrap();
            proptest::prop_assert_eq!(env.wrapped_keys.len(), n);
            for d in &devices {
                let pt = decrypt(&env, &d.device_id, &d.agreement, &sender.agreement_key()).unwrap();
                proptest::prop_assert_eq!(&pt, &plaintext);
            }
        }
    }
}
