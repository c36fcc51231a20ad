//! The custody service: explicitly wired collaborators, no globals.

use custody_core::config::CustodyConfig;
use custody_core::{CustodyError, CustodyResult, MediaPolicy};
use custody_crypto::Vault;
use custody_ledger::{ChainLedger, Confirmation, Ledger};
use custody_storage::{build_operator, ContentStore, OperatorSpec, OperatorStore};
use std::sync::Arc;
use tracing::info;

use crate::deadline::{bounded, Timeouts};
use crate::filename::FilenameCache;
use crate::repository::{JsonRepository, MetadataRepository};

/// Entry point for upload, retrieval, confirmation and reconciliation.
///
/// Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct Custody {
    pub(crate) store: Arc<dyn ContentStore>,
    pub(crate) ledger: Arc<dyn Ledger>,
    pub(crate) repository: Arc<dyn MetadataRepository>,
    pub(crate) vault: Arc<Vault>,
    pub(crate) policy: Arc<MediaPolicy>,
    pub(crate) timeouts: Timeouts,
    pub(crate) filenames: Arc<FilenameCache>,
    pub(crate) workers: usize,
}

impl Custody {
    pub fn new(
        store: Arc<dyn ContentStore>,
        ledger: Arc<dyn Ledger>,
        repository: Arc<dyn MetadataRepository>,
        vault: Vault,
    ) -> Self {
        Self {
            store,
            ledger,
            repository,
            vault: Arc::new(vault),
            policy: Arc::new(MediaPolicy::default()),
            timeouts: Timeouts::default(),
            filenames: Arc::new(FilenameCache::default()),
            workers: 4,
        }
    }

    pub fn with_policy(mut self, policy: MediaPolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_filename_cache(mut self, cache: FilenameCache) -> Self {
        self.filenames = Arc::new(cache);
        self
    }

    /// Build every collaborator from configuration.
    pub async fn from_config(cfg: &CustodyConfig) -> CustodyResult<Self> {
        let vault = Vault::from_config(&cfg.vault)?;

        let store_op = build_operator(&OperatorSpec::from(&cfg.storage))
            .map_err(|e| CustodyError::Config(format!("content store: {e:#}")))?;
        let store = OperatorStore::new(store_op, &cfg.storage.prefix);

        let ledger_op = build_operator(&OperatorSpec::from(&cfg.ledger))
            .map_err(|e| CustodyError::Config(format!("ledger: {e:#}")))?;
        let ledger = ChainLedger::open(ledger_op, &cfg.ledger.prefix, &cfg.ledger.submitter).await?;

        let repository = JsonRepository::open(&cfg.repository.path).await?;

        info!(
            storage = ?cfg.storage.backend,
            ledger = ?cfg.ledger.backend,
            repository = %cfg.repository.path.display(),
            "custody service ready"
        );

        Ok(Self::new(
            Arc::new(store),
            Arc::new(ledger),
            Arc::new(repository),
            vault,
        )
        .with_policy(MediaPolicy::from_config(&cfg.policy))
        .with_timeouts(Timeouts::from_config(cfg))
        .with_workers(cfg.reconcile.workers))
    }

    pub fn policy(&self) -> &MediaPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn repository(&self) -> &Arc<dyn MetadataRepository> {
        &self.repository
    }

    /// Readiness: the content store must be reachable.
    pub async fn ready(&self) -> CustodyResult<()> {
        bounded("store check", self.timeouts.store, self.store.check()).await
    }

    /// Flip the ledger's `confirmed` flag for the entry at `index`.
    pub async fn confirm(&self, container_id: &str, index: u64) -> CustodyResult<Confirmation> {
        let container_id = custody_core::types::require_id("container_id", container_id)?;
        let outcome = bounded(
            "ledger confirm",
            self.timeouts.ledger,
            self.ledger.confirm_evidence(container_id, index),
        )
        .await?;
        info!(container = container_id, index, outcome = ?outcome, "evidence confirmation");
        Ok(outcome)
    }
}
