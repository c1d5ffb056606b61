//! Kernels on SQLite files, talking through the in-memory relay.

use std::sync::Arc;

use buds_kernel::core::{MemoryPayload, ReactionPayload, ReceiptPayload};
use buds_kernel::relay::{MemoryRelay, RetryPolicy};
use buds_kernel::store::{SqliteStore, Store, TrustState};
use buds_kernel::{Kernel, KernelConfig, KernelError};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn config() -> KernelConfig {
    KernelConfig {
        retry: RetryPolicy::none(),
        ..KernelConfig::default()
    }
}

async fn open(
    dir: &tempfile::TempDir,
    name: &str,
    relay: &Arc<MemoryRelay>,
) -> anyhow::Result<Kernel<SqliteStore, MemoryRelay>> {
    let store = SqliteStore::open(dir.path().join(format!("{name}.db")))?;
    let kernel = Kernel::open(store, relay.clone(), name, config()).await?;
    kernel
        .register_device(Some(format!("{name}-token").as_str()))
        .await?;
    Ok(kernel)
}

#[tokio::test]
async fn test_share_and_react() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let relay = MemoryRelay::new();
    let alice = open(&dir, "alice", &relay).await?;
    let bob = open(&dir, "bob", &relay).await?;

    let bob_id = alice.lookup_identity("bob-token").await?;
    assert_eq!(bob_id, *bob.author_id());

    let note = MemoryPayload::new("pancakes", 1_736_870_400_000).with_rating(5);
    let memory = alice
        .create_receipt(ReceiptPayload::Memory(note), None)
        .await?;
    alice.share(&memory.cid, &[bob_id]).await?;
    assert_eq!(bob.sync_inbox().await?.accepted, vec![memory.cid]);

    // bob reacts on his own copy and sends it back
    let reaction = bob
        .create_receipt(
            ReceiptPayload::Reaction(ReactionPayload {
                emoji: "🥞".into(),
                claimed_at_ms: 1_736_870_500_000,
            }),
            Some(&memory.cid),
        )
        .await?;
    assert_eq!(reaction.root_cid, memory.cid);
    bob.share(&reaction.cid, &[alice.author_id().clone()]).await?;

    assert_eq!(alice.sync_inbox().await?.accepted, vec![reaction.cid]);
    assert_eq!(alice.chain(&memory.cid).await?.len(), 2);
    alice.verify_receipt(&reaction).await?;
    Ok(())
}

#[tokio::test]
async fn test_rejected_device_is_refused() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let relay = MemoryRelay::new();
    let alice = open(&dir, "alice", &relay).await?;
    let bob = open(&dir, "bob", &relay).await?;

    let memory = bob
        .create_receipt(
            ReceiptPayload::Memory(MemoryPayload::new("hello", 1)),
            None,
        )
        .await?;
    bob.share(&memory.cid, &[alice.author_id().clone()]).await?;
    alice.sync_inbox().await?;

    alice.verify_device(&bob.device_id()).await?;
    let pin = alice.pinned_key(&bob.device_id()).await?.unwrap();
    assert_eq!(pin.state, TrustState::Verified);

    alice.reject_device(&bob.device_id()).await?;
    let resolution = alice.resolve_devices(&[bob.author_id().clone()]).await?;
    assert!(resolution.devices.is_empty());

    // receipts already stored no longer verify against a rejected key
    let stored = alice.get_receipt(&memory.cid).await?.unwrap();
    assert!(matches!(
        alice.verify_receipt(&stored).await,
        Err(KernelError::Validation(_))
    ));
    assert!(alice.store().has_receipt(&memory.cid).await?);
    Ok(())
}
