use async_trait::async_trait;
use custody_core::{CustodyResult, EvidenceType, LedgerEntry};
use serde::{Deserialize, Serialize};

/// Fields anchored for one evidence item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub container_id: String,
    pub evidence_id: String,
    pub cid: String,
    pub hash_original: String,
    pub evidence_type: EvidenceType,
}

/// Outcome of a confirmation call. Confirming twice is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    Confirmed,
    AlreadyConfirmed,
}

/// Client interface to an append-only ledger.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Append an entry. Must only be called once the blob is stored.
    ///
    /// Re-submitting an identical entry returns the existing one; a conflicting
    /// entry for the same evidence id is `Duplicate`.
    async fn record_evidence(&self, submission: Submission) -> CustodyResult<LedgerEntry>;

    /// `NotFound` if no entry exists for the pair.
    async fn get_evidence(&self, container_id: &str, evidence_id: &str)
        -> CustodyResult<LedgerEntry>;

    /// Entry at a position within a container. `NotFound` if out of range.
    async fn evidence_at(&self, container_id: &str, index: u64) -> CustodyResult<LedgerEntry>;

    async fn evidence_count(&self, container_id: &str) -> CustodyResult<u64>;

    /// One-way `confirmed = true` transition.
    async fn confirm_evidence(&self, container_id: &str, index: u64)
        -> CustodyResult<Confirmation>;
}
