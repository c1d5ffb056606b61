//! End-to-end sharing scenarios over the in-memory relay.

use std::time::{SystemTime, UNIX_EPOCH};

use buds_core::{create_receipt, AuthorId, Cid};
use buds_e2ee::{decrypt, encrypt_for_recipients, CiphertextRef, E2eeError, DEFAULT_TTL_MS};
use buds_kernel::{ErrorCategory, ExclusionReason, Kernel, KernelError};
use buds_relay::{limits, MessageDto, Relay};
use buds_store::{SqliteStore, Store};
use buds_testkit::fixtures::{impersonator, memory, TestKernel, TestNetwork};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

#[tokio::test]
async fn test_linked_devices_receive_identical_bytes() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let alice = network.primary("alice phone").await?;
    let bob = network.primary("bob phone").await?;
    let (ipad, link) = network.linked(&bob, "bob ipad").await?;

    // alice learns about the ipad from the link receipt
    bob.share(&link.cid, &[alice.author_id().clone()]).await?;
    let report = alice.sync_inbox().await?;
    assert_eq!(report.accepted, vec![link.cid]);

    let receipt = alice.create_receipt(memory("dinner at the lake"), None).await?;
    let shared = alice.share(&receipt.cid, &[bob.author_id().clone()]).await?;
    assert_eq!(shared.devices.len(), 2);
    assert!(shared.devices.contains(&bob.device_id()));
    assert!(shared.devices.contains(&ipad.device_id()));
    assert!(shared.excluded.is_empty());

    // a device added after the share holds no key
    let (laptop, _) = network.linked(&bob, "bob laptop").await?;

    let envelope = network
        .relay
        .fetch_inbox(bob.author_id(), &laptop.device_id(), 10)
        .await?
        .remove(0);
    let err = decrypt(
        &envelope,
        &laptop.device_id(),
        &laptop.identity().agreement,
        &alice.identity().agreement_key(),
    )
    .unwrap_err();
    assert!(matches!(err, E2eeError::NoKeyForDevice(id) if id == laptop.device_id()));

    let on_laptop = laptop.sync_inbox().await?;
    assert_eq!(on_laptop.fetched, 1);
    assert_eq!(on_laptop.not_addressed, 1);
    assert!(laptop.get_receipt(&receipt.cid).await?.is_none());

    let on_phone = bob.sync_inbox().await?;
    let on_ipad = ipad.sync_inbox().await?;
    assert_eq!(on_phone.accepted, vec![receipt.cid]);
    assert_eq!(on_ipad.accepted, vec![receipt.cid]);

    let sent = alice.store().get_preimage(&receipt.cid).await?.unwrap();
    let phone_bytes = bob.store().get_preimage(&receipt.cid).await?.unwrap();
    let ipad_bytes = ipad.store().get_preimage(&receipt.cid).await?.unwrap();
    assert_eq!(phone_bytes, sent);
    assert_eq!(ipad_bytes, sent);
    assert_eq!(bob.get_receipt(&receipt.cid).await?, Some(receipt.clone()));

    // both addressed devices acknowledged
    assert_eq!(network.relay.mailbox_len(bob.author_id()).await, 0);
    Ok(())
}

#[tokio::test]
async fn test_chain_keeps_root_on_receiver() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let alice = network.primary("alice phone").await?;
    let bob = network.primary("bob phone").await?;
    let to_bob = [bob.author_id().clone()];

    let genesis = alice.create_receipt(memory("v1"), None).await?;
    let edit = alice
        .create_receipt(memory("v2"), Some(&genesis.cid))
        .await?;
    alice.share(&genesis.cid, &to_bob).await?;
    alice.share(&edit.cid, &to_bob).await?;
    let delivered = network.relay.mailbox(bob.author_id()).await;

    let report = bob.sync_inbox().await?;
    assert_eq!(report.accepted.len(), 2);

    let received = bob.get_receipt(&edit.cid).await?.unwrap();
    assert_eq!(received.parent_cid, Some(genesis.cid));
    assert_eq!(received.root_cid, genesis.cid);

    let chain: Vec<_> = bob.chain(&genesis.cid).await?.iter().map(|r| r.cid).collect();
    assert_eq!(chain, vec![genesis.cid, edit.cid]);

    // the relay redelivers both; the ledger recognizes them
    for message in &delivered {
        network.relay.inject(bob.author_id(), message).await;
    }
    let again = bob.sync_inbox().await?;
    assert_eq!(again.duplicates, 2);
    assert!(again.accepted.is_empty());
    assert_eq!(network.relay.mailbox_len(bob.author_id()).await, 0);
    Ok(())
}

#[tokio::test]
async fn test_changed_device_keys_are_a_security_warning() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let alice = network.primary("alice phone").await?;
    let bob = network.primary("bob phone").await?;
    let to_alice = [alice.author_id().clone()];

    network.share_memory(&bob, "hi alice", &to_alice).await?;
    assert_eq!(alice.sync_inbox().await?.accepted.len(), 1);
    let pin = alice.pinned_key(&bob.device_id()).await?.unwrap();

    // the relay swaps bob's directory entry for attacker keys
    let mallory = impersonator(bob.identity());
    network.relay.publish_device(mallory.to_recipient()).await;

    let forged = create_receipt(
        &mallory.signing,
        bob.author_id(),
        memory("please send the code"),
        None,
    )?;
    let envelope = encrypt_for_recipients(
        &forged.preimage()?,
        &forged.cid,
        forged.signature,
        &mallory,
        &[alice.identity().to_recipient()],
        now_ms(),
    )?;
    network.relay.send_message(&envelope, &to_alice).await?;

    let report = alice.sync_inbox().await?;
    assert_eq!(report.fetched, 1);
    assert!(report.accepted.is_empty());
    let warnings: Vec<_> = report.security_warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].message_id, envelope.message_id);
    assert_eq!(warnings[0].category, ErrorCategory::Authenticity);
    assert!(alice.get_receipt(&forged.cid).await?.is_none());
    assert_eq!(alice.pinned_key(&bob.device_id()).await?, Some(pin));

    // outbound, the substituted entry is excluded rather than re-pinned
    let resolution = alice.resolve_devices(&[bob.author_id().clone()]).await?;
    assert!(resolution.devices.is_empty());
    assert_eq!(resolution.excluded.len(), 1);
    assert_eq!(resolution.excluded[0].reason, ExclusionReason::KeyMismatch);

    let reply = alice.create_receipt(memory("who is this?"), None).await?;
    let err = alice
        .share(&reply.cid, &[bob.author_id().clone()])
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::NoEligibleDevices));
    Ok(())
}

#[tokio::test]
async fn test_tampered_ciphertext_is_discarded() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let alice = network.primary("alice phone").await?;
    let bob = network.primary("bob phone").await?;
    let cid = network
        .share_memory(&alice, "untouched", &[bob.author_id().clone()])
        .await?;

    let original = network.relay.mailbox(bob.author_id()).await.remove(0);
    let mut envelope = original.into_envelope()?;
    let CiphertextRef::Inline(sealed) = &envelope.ciphertext else {
        panic!("memory relay keeps ciphertext inline");
    };
    let mut sealed = sealed.to_vec();
    sealed[20] ^= 0x01;
    envelope.ciphertext = CiphertextRef::Inline(sealed.into());

    assert!(network.relay.remove(bob.author_id(), &envelope.message_id).await);
    network
        .relay
        .inject(
            bob.author_id(),
            &MessageDto::from_envelope(&envelope, &[bob.author_id().clone()]),
        )
        .await;

    let report = bob.sync_inbox().await?;
    assert!(report.accepted.is_empty());
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].category, ErrorCategory::Integrity);
    assert!(!report.rejected[0].security_warning);

    // nothing stored, nothing pinned
    assert!(bob.get_receipt(&cid).await?.is_none());
    assert!(bob.pinned_key(&alice.device_id()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_one_wrapped_key_per_device() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let alice = network.primary("alice phone").await?;
    let mut friends = Vec::new();
    for name in ["bob", "carol", "dave"] {
        friends.push(network.primary(name).await?);
    }
    let authors: Vec<AuthorId> = friends.iter().map(|k| k.author_id().clone()).collect();

    let receipt = alice.create_receipt(memory("group photo"), None).await?;
    let report = alice.share(&receipt.cid, &authors).await?;
    assert_eq!(report.devices.len(), 3);

    for friend in &friends {
        let inbox = network
            .relay
            .fetch_inbox(friend.author_id(), &friend.device_id(), 10)
            .await?;
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].wrapped_keys.len(), 3);
        assert!(inbox[0].wrapped_keys.values().all(|k| k.len() == 60));
        assert_eq!(inbox[0].expires_at - inbox[0].created_at, DEFAULT_TTL_MS);

        assert_eq!(friend.sync_inbox().await?.accepted, vec![receipt.cid]);
    }
    Ok(())
}

#[tokio::test]
async fn test_processed_ledger_survives_restart() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("bob.db");

    let network = TestNetwork::new();
    let alice = network.primary("alice phone").await?;
    let bob = network
        .primary_on(SqliteStore::open(&path)?, "bob phone")
        .await?;
    let bob_device = bob.device_id();
    let cid = network
        .share_memory(&alice, "persisted", &[bob.author_id().clone()])
        .await?;
    let delivered = network.relay.mailbox(bob.author_id()).await.remove(0);

    assert_eq!(bob.sync_inbox().await?.accepted, vec![cid]);
    drop(bob);

    let reopened = Kernel::open(
        SqliteStore::open(&path)?,
        network.relay.clone(),
        "bob phone",
        network.config.clone(),
    )
    .await?;
    assert_eq!(reopened.device_id(), bob_device);

    network.relay.inject(reopened.author_id(), &delivered).await;
    let report = reopened.sync_inbox().await?;
    assert_eq!(report.fetched, 1);
    assert_eq!(report.duplicates, 1);
    assert!(reopened.get_receipt(&cid).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_expired_envelope_is_dropped() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let alice = network.primary("alice phone").await?;
    let bob = network.primary("bob phone").await?;

    let receipt = alice.create_receipt(memory("old news"), None).await?;
    let stale = encrypt_for_recipients(
        &receipt.preimage()?,
        &receipt.cid,
        receipt.signature,
        alice.identity(),
        &[bob.identity().to_recipient()],
        0,
    )?;
    network
        .relay
        .send_message(&stale, &[bob.author_id().clone()])
        .await?;

    let delivered = network.relay.mailbox(bob.author_id()).await.remove(0);

    let report = bob.sync_inbox().await?;
    assert_eq!(report.expired, 1);
    assert!(bob.get_receipt(&receipt.cid).await?.is_none());
    assert_eq!(network.relay.mailbox_len(bob.author_id()).await, 0);

    network.relay.inject(bob.author_id(), &delivered).await;
    assert_eq!(bob.sync_inbox().await?.duplicates, 1);
    Ok(())
}

#[tokio::test]
async fn test_revoked_device_is_excluded_both_ways() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let alice = network.primary("alice phone").await?;
    let bob = network.primary("bob phone").await?;
    let (ipad, link) = network.linked(&bob, "bob ipad").await?;
    bob.share(&link.cid, &[alice.author_id().clone()]).await?;
    alice.sync_inbox().await?;

    assert!(network.relay.revoke_device(&ipad.device_id()).await);

    let receipt = alice.create_receipt(memory("only the phone"), None).await?;
    let report = alice.share(&receipt.cid, &[bob.author_id().clone()]).await?;
    assert_eq!(report.devices, vec![bob.device_id()]);
    assert_eq!(report.excluded.len(), 1);
    assert_eq!(report.excluded[0].device_id, ipad.device_id());
    assert_eq!(report.excluded[0].reason, ExclusionReason::Revoked);

    // the revoked ipad can still send, but alice refuses it
    network
        .share_memory(&ipad, "from a lost ipad", &[alice.author_id().clone()])
        .await?;
    let inbound = alice.sync_inbox().await?;
    assert!(inbound.accepted.is_empty());
    assert_eq!(inbound.rejected.len(), 1);
    assert_eq!(inbound.rejected[0].sender_device_id, ipad.device_id());
    assert_eq!(inbound.rejected[0].category, ErrorCategory::Authenticity);
    Ok(())
}

#[tokio::test]
async fn test_unlinked_secondary_is_not_trusted() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let alice = network.primary("alice phone").await?;
    let bob = network.primary("bob phone").await?;
    // linked on bob's side, but the link never reaches alice
    let (ipad, _link) = network.linked(&bob, "bob ipad").await?;

    let resolution = alice.resolve_devices(&[bob.author_id().clone()]).await?;
    assert_eq!(resolution.devices.len(), 1);
    assert_eq!(resolution.excluded[0].device_id, ipad.device_id());
    assert_eq!(resolution.excluded[0].reason, ExclusionReason::Unlinked);

    network
        .share_memory(&ipad, "trust me", &[alice.author_id().clone()])
        .await?;
    let report = alice.sync_inbox().await?;
    assert_eq!(report.rejected.len(), 1);
    assert!(alice.pinned_key(&ipad.device_id()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_backlog_beyond_one_batch_drains() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let alice = network.primary("alice phone").await?;
    let bob = network.primary("bob phone").await?;
    let to_bob = [bob.author_id().clone()];

    let backlog = 2 * limits::DEFAULT_INBOX_LIMIT + 1;
    let mut sent = Vec::with_capacity(backlog);
    for n in 0..backlog {
        sent.push(network.share_memory(&alice, &format!("memory {n}"), &to_bob).await?);
    }

    let report = bob.sync_inbox().await?;
    assert_eq!(report.fetched, backlog);
    assert_eq!(report.accepted, sent);
    assert_eq!(network.relay.mailbox_len(bob.author_id()).await, 0);

    assert!(bob.get_receipt(&sent[backlog - 1]).await?.is_some());
    assert_eq!(bob.sync_inbox().await?.fetched, 0);
    Ok(())
}

#[tokio::test]
async fn test_each_device_drains_a_shared_backlog() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let alice = network.primary("alice phone").await?;
    let bob = network.primary("bob phone").await?;
    let (ipad, link) = network.linked(&bob, "bob ipad").await?;
    bob.share(&link.cid, &[alice.author_id().clone()]).await?;
    alice.sync_inbox().await?;

    let to_bob = [bob.author_id().clone()];
    let backlog = limits::DEFAULT_INBOX_LIMIT + 1;
    for n in 0..backlog {
        network.share_memory(&alice, &format!("memory {n}"), &to_bob).await?;
    }

    // the phone drains first; the ipad still gets every message
    assert_eq!(bob.sync_inbox().await?.accepted.len(), backlog);
    assert_eq!(network.relay.mailbox_len(bob.author_id()).await, backlog);
    assert_eq!(ipad.sync_inbox().await?.accepted.len(), backlog);
    assert_eq!(network.relay.mailbox_len(bob.author_id()).await, 0);
    Ok(())
}

/// Seal `note` for bob with the ciphertext stored at `locator`.
async fn share_external(
    network: &TestNetwork,
    alice: &TestKernel,
    bob: &TestKernel,
    note: &str,
    locator: &str,
) -> anyhow::Result<(Cid, Vec<u8>)> {
    let receipt = alice.create_receipt(memory(note), None).await?;
    let envelope = encrypt_for_recipients(
        &receipt.preimage()?,
        &receipt.cid,
        receipt.signature,
        alice.identity(),
        &[bob.identity().to_recipient()],
        now_ms(),
    )?;
    let (envelope, blob) = envelope.into_external(locator)?;
    network
        .relay
        .send_message(&envelope, &[bob.author_id().clone()])
        .await?;
    Ok((receipt.cid, blob.to_vec()))
}

#[tokio::test]
async fn test_external_ciphertext_is_fetched_and_checked() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let alice = network.primary("alice phone").await?;
    let bob = network.primary("bob phone").await?;

    let (cid, blob) = share_external(&network, &alice, &bob, "big photo", "blob://ok").await?;
    network.relay.put_payload("blob://ok", blob.into()).await;
    assert_eq!(bob.sync_inbox().await?.accepted, vec![cid]);

    // a blob that does not match the digest in the envelope
    let (swapped, mut altered) =
        share_external(&network, &alice, &bob, "second", "blob://swap").await?;
    altered[0] ^= 0x01;
    network.relay.put_payload("blob://swap", altered.into()).await;

    let report = bob.sync_inbox().await?;
    assert!(report.accepted.is_empty());
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].category, ErrorCategory::Integrity);
    assert!(bob.get_receipt(&swapped).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_missing_external_ciphertext_is_rejected() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let alice = network.primary("alice phone").await?;
    let bob = network.primary("bob phone").await?;

    let (cid, _) = share_external(&network, &alice, &bob, "lost", "blob://gone").await?;
    let report = bob.sync_inbox().await?;
    assert!(report.accepted.is_empty());
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].category, ErrorCategory::Usage);
    assert!(!report.rejected[0].security_warning);
    assert!(bob.get_receipt(&cid).await?.is_none());
    assert!(bob.pinned_key(&alice.device_id()).await?.is_none());
    Ok(())
}
