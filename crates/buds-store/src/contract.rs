//! Behaviour every `Store` implementation must share.

use buds_core::{create_receipt, AuthorId, Keypair, MemoryPayload, Receipt, ReceiptPayload};
use buds_e2ee::{DeviceIdentity, DeviceStatus, MessageId, RecipientDevice};

use crate::traits::{
    AcceptOutcome, DeviceKeyRecord, InsertResult, PinOutcome, PinnedKey, Store, TrustState,
};

fn author_keypair() -> Keypair {
    Keypair::from_seed(&[0x42; 32])
}

pub fn memory_receipt(note: &str, parent: Option<&Receipt>) -> Receipt {
    let kp = author_keypair();
    let author = AuthorId::derive(&kp.public_key());
    let payload = ReceiptPayload::Memory(MemoryPayload::new(note, 1_736_870_400_000));
    create_receipt(&kp, &author, payload, parent).unwrap()
}

pub fn device_record() -> DeviceKeyRecord {
    DeviceKeyRecord::from_identity(&DeviceIdentity::generate_primary("test phone"), 1_000)
}

pub fn remote_device() -> RecipientDevice {
    DeviceIdentity::generate_primary("remote phone").to_recipient()
}

pub async fn receipts(store: &impl Store) {
    let genesis = memory_receipt("v1", None);
    let edit = memory_receipt("v2", Some(&genesis));
    let other = memory_receipt("unrelated", None);

    for r in [&genesis, &edit, &other] {
        let result = store.insert_receipt(r, &r.preimage().unwrap()).await.unwrap();
        assert_eq!(result, InsertResult::Inserted);
    }
    let again = store
        .insert_receipt(&genesis, &genesis.preimage().unwrap())
        .await
        .unwrap();
    assert_eq!(again, InsertResult::AlreadyExists);

    assert!(store.has_receipt(&edit.cid).await.unwrap());
    assert_eq!(store.get_receipt(&edit.cid).await.unwrap(), Some(edit.clone()));
    assert_eq!(
        store.get_preimage(&genesis.cid).await.unwrap(),
        Some(genesis.preimage().unwrap())
    );

    let chain = store.receipts_by_root(&genesis.cid).await.unwrap();
    assert_eq!(chain, vec![genesis.clone(), edit.clone()]);

    let by_author = store.receipts_by_author(&genesis.author_id).await.unwrap();
    assert_eq!(by_author.len(), 3);
    assert_eq!(by_author[0], genesis);

    let missing = memory_receipt("never stored", None);
    assert!(!store.has_receipt(&missing.cid).await.unwrap());
    assert_eq!(store.get_receipt(&missing.cid).await.unwrap(), None);
}

pub async fn device_key_cas(store: &impl Store) {
    assert!(store.get_device_key().await.unwrap().is_none());

    let first = device_record();
    let second = device_record();

    let winner = store.insert_device_key_if_absent(&first).await.unwrap();
    assert_eq!(winner.device_id, first.device_id);

    // a second launch racing the first must adopt the stored identity
    let loser = store.insert_device_key_if_absent(&second).await.unwrap();
    assert_eq!(loser.device_id, first.device_id);
    assert_eq!(loser.signing_seed, first.signing_seed);

    let identity = store.get_device_key().await.unwrap().unwrap().to_identity();
    assert_eq!(identity.signing_key(), first.to_identity().signing_key());
    assert_eq!(identity.agreement_key(), first.to_identity().agreement_key());
}

pub async fn pins(store: &impl Store) {
    let device = DeviceIdentity::generate_primary("bob phone").to_recipient();
    let pin = PinnedKey::new(&device, 10);

    assert_eq!(store.pin_if_absent(&pin).await.unwrap(), PinOutcome::Pinned);

    // a different key for the same device never replaces the pin
    let mut impostor = device.clone();
    impostor.signing_key = Keypair::generate().public_key();
    let outcome = store
        .pin_if_absent(&PinnedKey::new(&impostor, 20))
        .await
        .unwrap();
    assert_eq!(outcome, PinOutcome::Existing(pin.clone()));

    let stored = store.get_pin(&device.device_id).await.unwrap().unwrap();
    assert!(stored.matches(&device));
    assert!(!stored.matches(&impostor));

    assert!(store
        .set_trust_state(&device.device_id, TrustState::Verified)
        .await
        .unwrap());
    assert_eq!(
        store.get_pin(&device.device_id).await.unwrap().unwrap().state,
        TrustState::Verified
    );

    let unknown = DeviceIdentity::generate_primary("x").device_id;
    assert!(!store
        .set_trust_state(&unknown, TrustState::Rejected)
        .await
        .unwrap());

    let pins = store.pins_for_author(&device.owner_author_id).await.unwrap();
    assert_eq!(pins.len(), 1);
}

pub async fn device_cache(store: &impl Store) {
    let primary = DeviceIdentity::generate_primary("phone");
    let ipad = DeviceIdentity::generate_linked(primary.owner_author_id.clone(), "ipad");
    let mut devices = vec![primary.to_recipient(), ipad.to_recipient()];

    store.upsert_devices(&devices, 1).await.unwrap();
    let cached = store
        .devices_for_author(&primary.owner_author_id)
        .await
        .unwrap();
    assert_eq!(cached.len(), 2);

    devices[1].status = DeviceStatus::Revoked;
    store.upsert_devices(&devices[1..], 2).await.unwrap();
    let ipad_cached = store.get_device(&ipad.device_id).await.unwrap().unwrap();
    assert_eq!(ipad_cached.status, DeviceStatus::Revoked);
    assert_eq!(
        store
            .devices_for_author(&primary.owner_author_id)
            .await
            .unwrap()
            .len(),
        2
    );
}

pub async fn inbox_ledger(store: &impl Store) {
    let old = MessageId::generate();
    let new = MessageId::generate();

    assert!(!store.is_processed(&old).await.unwrap());
    assert!(store.mark_processed(&old, 100).await.unwrap());
    assert!(!store.mark_processed(&old, 150).await.unwrap());
    assert!(store.mark_processed(&new, 200).await.unwrap());
    assert!(store.is_processed(&old).await.unwrap());

    assert_eq!(store.prune_processed(150).await.unwrap(), 1);
    assert!(!store.is_processed(&old).await.unwrap());
    assert!(store.is_processed(&new).await.unwrap());
}

pub async fn accept_message(store: &impl Store) {
    let device = remote_device();
    let pin = PinnedKey::new(&device, 10);
    let first = memory_receipt("first", None);
    let first_msg = MessageId::generate();

    let outcome = store
        .accept_message(&first, &first.preimage().unwrap(), &pin, &first_msg, 100)
        .await
        .unwrap();
    assert_eq!(outcome, AcceptOutcome::Accepted(InsertResult::Inserted));
    assert!(store.has_receipt(&first.cid).await.unwrap());
    assert_eq!(store.get_pin(&device.device_id).await.unwrap(), Some(pin.clone()));
    assert!(store.is_processed(&first_msg).await.unwrap());

    // same receipt again under a new message id
    let again = MessageId::generate();
    let outcome = store
        .accept_message(&first, &first.preimage().unwrap(), &pin, &again, 110)
        .await
        .unwrap();
    assert_eq!(outcome, AcceptOutcome::Accepted(InsertResult::AlreadyExists));
    assert!(store.is_processed(&again).await.unwrap());

    // other keys for a pinned device: nothing is written
    let mut impostor = device.clone();
    impostor.signing_key = Keypair::generate().public_key();
    let forged = memory_receipt("forged", None);
    let forged_msg = MessageId::generate();
    let outcome = store
        .accept_message(
            &forged,
            &forged.preimage().unwrap(),
            &PinnedKey::new(&impostor, 20),
            &forged_msg,
            120,
        )
        .await
        .unwrap();
    assert_eq!(outcome, AcceptOutcome::PinConflict(pin.clone()));
    assert!(!store.has_receipt(&forged.cid).await.unwrap());
    assert!(!store.is_processed(&forged_msg).await.unwrap());

    // a rejected pin refuses even matching keys
    store
        .set_trust_state(&device.device_id, TrustState::Rejected)
        .await
        .unwrap();
    let later = memory_receipt("later", None);
    let outcome = store
        .accept_message(&later, &later.preimage().unwrap(), &pin, &MessageId::generate(), 130)
        .await
        .unwrap();
    assert!(matches!(outcome, AcceptOutcome::PinConflict(p) if p.state == TrustState::Rejected));
    assert!(!store.has_receipt(&later.cid).await.unwrap());
}
