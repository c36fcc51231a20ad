//! Shared fixtures: memory-backed collaborators and fault-injecting fakes.

#![allow(dead_code)]

use async_trait::async_trait;
use custody_core::{CustodyError, CustodyResult, EvidenceRecord, LedgerEntry};
use custody_crypto::{derive_master_key, Vault};
use custody_ledger::{ChainLedger, Confirmation, Ledger, Submission};
use custody_pipeline::{Custody, JsonRepository, MetadataRepository, RepositoryRow, UploadRequest};
use custody_storage::{memory_operator, ContentStore, OperatorStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const STORE_PREFIX: &str = "evidence";

pub fn vault() -> Vault {
    Vault::new(derive_master_key(b"test-operator-secret"))
}

/// Real collaborators over OpenDAL's memory service.
pub struct Fixture {
    pub custody: Custody,
    pub store: Arc<OperatorStore>,
    pub ledger: Arc<ChainLedger>,
    pub repository: Arc<JsonRepository>,
}

pub async fn fixture() -> Fixture {
    let store = Arc::new(OperatorStore::new(
        memory_operator().expect("memory operator"),
        STORE_PREFIX,
    ));
    let ledger = Arc::new(
        ChainLedger::open(memory_operator().expect("memory operator"), "ledger", "test-station")
            .await
            .expect("open ledger"),
    );
    let repository = Arc::new(JsonRepository::in_memory());
    let custody = Custody::new(store.clone(), ledger.clone(), repository.clone(), vault());
    Fixture {
        custody,
        store,
        ledger,
        repository,
    }
}

impl Fixture {
    /// Overwrite the stored ciphertext for `cid`.
    pub async fn overwrite_blob(&self, cid: &str, bytes: Vec<u8>) {
        self.store
            .operator()
            .write(&format!("{STORE_PREFIX}/blobs/{cid}"), bytes)
            .await
            .expect("overwrite blob");
    }

    pub async fn read_blob(&self, cid: &str) -> Vec<u8> {
        self.store.get(cid).await.expect("read blob")
    }

    /// Drop the filename recorded next to a blob.
    pub async fn delete_filename(&self, cid: &str) {
        self.store
            .operator()
            .delete(&format!("{STORE_PREFIX}/names/{cid}"))
            .await
            .expect("delete filename");
    }

    pub async fn delete_blob(&self, cid: &str) {
        self.store
            .operator()
            .delete(&format!("{STORE_PREFIX}/blobs/{cid}"))
            .await
            .expect("delete blob");
    }
}

pub fn request(container: &str, evidence: &str, mime: &str, bytes: &[u8]) -> UploadRequest {
    UploadRequest {
        container_id: container.into(),
        evidence_id: evidence.into(),
        evidence_type: None,
        mime_type: mime.into(),
        filename: None,
        bytes: bytes.to_vec(),
    }
}

// ── Counting fakes ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Calls(AtomicUsize);

impl Calls {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Content store that counts calls and can be told to fail or stall.
pub struct FakeStore {
    pub inner: OperatorStore,
    pub puts: Calls,
    pub gets: Calls,
    pub fail_put: bool,
    pub stall: Option<Duration>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            inner: OperatorStore::new(memory_operator().expect("memory operator"), STORE_PREFIX),
            puts: Calls::default(),
            gets: Calls::default(),
            fail_put: false,
            stall: None,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_put: true,
            ..Self::new()
        }
    }

    pub fn stalling(d: Duration) -> Self {
        Self {
            stall: Some(d),
            ..Self::new()
        }
    }
}

#[async_trait]
impl ContentStore for FakeStore {
    async fn put(&self, bytes: &[u8], filename: &str) -> CustodyResult<String> {
        self.puts.hit();
        if let Some(d) = self.stall {
            tokio::time::sleep(d).await;
        }
        if self.fail_put {
            return Err(CustodyError::StoreUnavailable("injected put failure".into()));
        }
        self.inner.put(bytes, filename).await
    }

    async fn get(&self, cid: &str) -> CustodyResult<Vec<u8>> {
        self.gets.hit();
        if let Some(d) = self.stall {
            tokio::time::sleep(d).await;
        }
        self.inner.get(cid).await
    }

    async fn filename(&self, cid: &str) -> CustodyResult<Option<String>> {
        self.inner.filename(cid).await
    }
}

/// Ledger that counts calls and can be told to reject writes.
pub struct FakeLedger {
    pub inner: ChainLedger,
    pub records: Calls,
    pub gets: Calls,
    pub fail_record: bool,
}

impl FakeLedger {
    pub async fn new() -> Self {
        Self {
            inner: ChainLedger::open(memory_operator().expect("memory operator"), "ledger", "fake")
                .await
                .expect("open ledger"),
            records: Calls::default(),
            gets: Calls::default(),
            fail_record: false,
        }
    }

    pub async fn failing() -> Self {
        Self {
            fail_record: true,
            ..Self::new().await
        }
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn record_evidence(&self, submission: Submission) -> CustodyResult<LedgerEntry> {
        self.records.hit();
        if self.fail_record {
            return Err(CustodyError::LedgerUnavailable("injected record failure".into()));
        }
        self.inner.record_evidence(submission).await
    }

    async fn get_evidence(
        &self,
        container_id: &str,
        evidence_id: &str,
    ) -> CustodyResult<LedgerEntry> {
        self.gets.hit();
        self.inner.get_evidence(container_id, evidence_id).await
    }

    async fn evidence_at(&self, container_id: &str, index: u64) -> CustodyResult<LedgerEntry> {
        self.inner.evidence_at(container_id, index).await
    }

    async fn evidence_count(&self, container_id: &str) -> CustodyResult<u64> {
        self.inner.evidence_count(container_id).await
    }

    async fn confirm_evidence(
        &self,
        container_id: &str,
        index: u64,
    ) -> CustodyResult<Confirmation> {
        self.inner.confirm_evidence(container_id, index).await
    }
}

/// Repository that counts calls.
pub struct FakeRepository {
    pub inner: JsonRepository,
    pub inserts: Calls,
    pub gets: Calls,
}

impl FakeRepository {
    pub fn new() -> Self {
        Self {
            inner: JsonRepository::in_memory(),
            inserts: Calls::default(),
            gets: Calls::default(),
        }
    }
}

#[async_trait]
impl MetadataRepository for FakeRepository {
    async fn insert(&self, record: &EvidenceRecord) -> CustodyResult<()> {
        self.inserts.hit();
        self.inner.insert(record).await
    }

    async fn get(
        &self,
        container_id: &str,
        evidence_id: &str,
    ) -> CustodyResult<Option<EvidenceRecord>> {
        self.gets.hit();
        self.inner.get(container_id, evidence_id).await
    }

    async fn list(&self) -> CustodyResult<Vec<RepositoryRow>> {
        self.inner.list().await
    }
}

pub struct Fakes {
    pub custody: Custody,
    pub store: Arc<FakeStore>,
    pub ledger: Arc<FakeLedger>,
    pub repository: Arc<FakeRepository>,
}

pub fn with_fakes(store: FakeStore, ledger: FakeLedger) -> Fakes {
    let store = Arc::new(store);
    let ledger = Arc::new(ledger);
    let repository = Arc::new(FakeRepository::new());
    let custody = Custody::new(store.clone(), ledger.clone(), repository.clone(), vault());
    Fakes {
        custody,
        store,
        ledger,
        repository,
    }
}
