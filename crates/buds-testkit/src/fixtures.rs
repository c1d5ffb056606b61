//! Test fixtures and helpers.
//!
//! [`TestFixture`] builds receipts for one author without any I/O.
//! [`TestNetwork`] wires kernels for several authors to one shared
//! in-memory relay.

use std::sync::Arc;

use buds_core::{
    create_receipt, AuthorId, Cid, Keypair, MemoryPayload, ReactionPayload, Receipt,
    ReceiptPayload, TombstonePayload,
};
use buds_e2ee::{DeviceIdentity, X25519StaticSecret};
use buds_kernel::{Kernel, KernelConfig, Result};
use buds_relay::{MemoryRelay, RetryPolicy};
use buds_store::{MemoryStore, Store};

/// Claimed time used by fixture payloads: 2025-01-14T16:00:00Z.
pub const FIXTURE_TIME_MS: i64 = 1_736_870_400_000;

/// A kernel on the in-memory store and relay.
pub type TestKernel = Kernel<MemoryStore, MemoryRelay>;

/// A single author's signing key and a memory store.
pub struct TestFixture {
    pub keypair: Keypair,
    pub author_id: AuthorId,
    pub store: MemoryStore,
}

impl TestFixture {
    /// Create a new test fixture with a random keypair.
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// Create with a deterministic keypair from seed.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        let keypair = Keypair::from_seed(&seed);
        let author_id = AuthorId::derive(&keypair.public_key());
        Self {
            keypair,
            author_id,
            store: MemoryStore::new(),
        }
    }

    /// Sign a receipt as this author.
    pub fn make(&self, payload: ReceiptPayload, parent: Option<&Receipt>) -> Receipt {
        create_receipt(&self.keypair, &self.author_id, payload, parent)
            .expect("fixture payloads are valid")
    }

    /// A genesis memory.
    pub fn make_memory(&self, note: &str) -> Receipt {
        self.make(memory(note), None)
    }

    /// An edit of `parent`, chained onto it.
    pub fn make_edit(&self, parent: &Receipt, note: &str) -> Receipt {
        self.make(memory(note), Some(parent))
    }

    pub fn make_reaction(&self, target: &Receipt, emoji: &str) -> Receipt {
        self.make(
            ReceiptPayload::Reaction(ReactionPayload {
                emoji: emoji.to_string(),
                claimed_at_ms: FIXTURE_TIME_MS,
            }),
            Some(target),
        )
    }

    pub fn make_tombstone(&self, target: &Receipt) -> Receipt {
        self.make(
            ReceiptPayload::Tombstone(TombstonePayload {
                reason: None,
                claimed_at_ms: FIXTURE_TIME_MS,
            }),
            Some(target),
        )
    }

    /// A chain of `len` edits, genesis first.
    pub fn make_chain(&self, len: usize) -> Vec<Receipt> {
        let mut chain: Vec<Receipt> = Vec::with_capacity(len);
        for i in 0..len {
            let receipt = self.make(memory(&format!("version {i}")), chain.last());
            chain.push(receipt);
        }
        chain
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A memory payload at the fixture time.
pub fn memory(note: &str) -> ReceiptPayload {
    ReceiptPayload::Memory(MemoryPayload::new(note, FIXTURE_TIME_MS))
}

/// A primary device identity with keys derived from `seed`.
///
/// The device id is still random.
pub fn primary_identity(seed: u8, device_name: &str) -> DeviceIdentity {
    let mut identity = DeviceIdentity::generate_primary(device_name);
    identity.signing = Keypair::from_seed(&[seed; 32]);
    identity.agreement = X25519StaticSecret::from_bytes([seed.wrapping_add(0x80); 32]);
    identity.owner_author_id = AuthorId::derive(&identity.signing_key());
    identity
}

/// A device claiming to be `victim`: same device id and owner, fresh keys.
pub fn impersonator(victim: &DeviceIdentity) -> DeviceIdentity {
    let mut fake = DeviceIdentity::generate_linked(victim.owner_author_id.clone(), "mallory");
    fake.device_id = victim.device_id;
    fake.device_name = victim.device_name.clone();
    fake
}

/// Kernels sharing one in-memory relay.
pub struct TestNetwork {
    pub relay: Arc<MemoryRelay>,
    pub config: KernelConfig,
}

impl TestNetwork {
    /// A network whose kernels make a single attempt per relay call.
    pub fn new() -> Self {
        Self::with_config(KernelConfig {
            retry: RetryPolicy::none(),
            ..KernelConfig::default()
        })
    }

    pub fn with_config(config: KernelConfig) -> Self {
        Self {
            relay: MemoryRelay::new(),
            config,
        }
    }

    /// Open and register a primary device for a new author.
    pub async fn primary(&self, device_name: &str) -> Result<TestKernel> {
        self.primary_on(MemoryStore::new(), device_name).await
    }

    /// Open and register a primary device on a caller-supplied store.
    pub async fn primary_on<S: Store>(
        &self,
        store: S,
        device_name: &str,
    ) -> Result<Kernel<S, MemoryRelay>> {
        let kernel = Kernel::open(store, self.relay.clone(), device_name, self.config.clone())
            .await?;
        kernel.register_device(None).await?;
        Ok(kernel)
    }

    /// Open, register and link a secondary device of `owner`.
    ///
    /// Returns the new kernel and the device-link receipt, which the owner
    /// still has to share with contacts.
    pub async fn linked<S: Store>(
        &self,
        owner: &Kernel<S, MemoryRelay>,
        device_name: &str,
    ) -> Result<(TestKernel, Receipt)> {
        let kernel = Kernel::open_linked(
            MemoryStore::new(),
            self.relay.clone(),
            owner.author_id().clone(),
            device_name,
            self.config.clone(),
        )
        .await?;
        kernel.register_device(None).await?;
        let link = owner
            .authorize_device(&kernel.identity().to_recipient())
            .await?;
        Ok((kernel, link))
    }

    /// Create a memory as `from` and share it with `to`.
    pub async fn share_memory<S: Store>(
        &self,
        from: &Kernel<S, MemoryRelay>,
        note: &str,
        to: &[AuthorId],
    ) -> Result<Cid> {
        let receipt = from.create_receipt(memory(note), None).await?;
        from.share(&receipt.cid, to).await?;
        Ok(receipt.cid)
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Create multiple fixtures for multi-author testing.
pub fn multi_party_fixtures(count: usize) -> Vec<TestFixture> {
    (0..count)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[0] = i as u8;
            seed[31] = (i >> 8) as u8;
            TestFixture::with_seed(seed)
        })
        .collect()
}
