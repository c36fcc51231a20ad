//! Reconciliation job: re-verify every metadata row against store and ledger.
//!
//! Per-record failures are classified, never propagated. Rows are checked
//! concurrently by a bounded worker pool; detail order is not significant.

use custody_core::{CustodyError, CustodyResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::deadline::bounded;
use crate::repository::RepositoryRow;
use crate::service::Custody;
use crate::verify::{Stage, VerifyFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Valid,
    HashMismatch,
    MissingOnChain,
    MissingInStore,
    Error,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Valid => "valid",
            RecordStatus::HashMismatch => "hash_mismatch",
            RecordStatus::MissingOnChain => "missing_on_chain",
            RecordStatus::MissingInStore => "missing_in_store",
            RecordStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDetail {
    pub container_id: String,
    pub evidence_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    pub status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub total: usize,
    pub valid: usize,
    pub hash_mismatch: usize,
    pub missing_on_chain: usize,
    pub missing_in_store: usize,
    pub errors: usize,
}

impl ReconcileSummary {
    fn count(&mut self, status: RecordStatus) {
        self.total += 1;
        match status {
            RecordStatus::Valid => self.valid += 1,
            RecordStatus::HashMismatch => self.hash_mismatch += 1,
            RecordStatus::MissingOnChain => self.missing_on_chain += 1,
            RecordStatus::MissingInStore => self.missing_in_store += 1,
            RecordStatus::Error => self.errors += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub summary: ReconcileSummary,
    pub details: Vec<RecordDetail>,
}

impl ReconcileReport {
    fn from_details(details: Vec<RecordDetail>) -> Self {
        let mut summary = ReconcileSummary::default();
        for d in &details {
            summary.count(d.status);
        }
        Self { summary, details }
    }

    /// True when every record verified.
    pub fn is_clean(&self) -> bool {
        self.summary.valid == self.summary.total
    }
}

/// Map a verification failure onto a reconciliation status.
///
/// A padding failure on the file decrypt means the ciphertext no longer
/// decrypts under its key, which is reported alongside digest mismatches.
/// A failed key unwrap points at the metadata row, not the blob.
pub(crate) fn classify(failure: &VerifyFailure) -> RecordStatus {
    match (failure.stage, &failure.error) {
        (Stage::Digest, _) => RecordStatus::HashMismatch,
        (Stage::Decrypt, CustodyError::Crypto(_)) => RecordStatus::HashMismatch,
        (Stage::Ledger, CustodyError::NotFound { .. }) => RecordStatus::MissingOnChain,
        (Stage::Store, CustodyError::NotFound { .. }) => RecordStatus::MissingInStore,
        _ => RecordStatus::Error,
    }
}

impl Custody {
    /// Verify every row in the metadata repository.
    ///
    /// Only a failure to list the repository fails the job.
    pub async fn reconcile(&self) -> CustodyResult<ReconcileReport> {
        let rows = bounded(
            "repository list",
            self.timeouts.repository,
            self.repository.list(),
        )
        .await?;
        info!(rows = rows.len(), workers = self.workers, "reconciliation started");

        let semaphore = Arc::new(Semaphore::new(self.workers.max(1)));
        let mut handles = Vec::with_capacity(rows.len());
        for row in rows {
            let ids = (row.container_id.clone(), row.evidence_id.clone());
            let permit = semaphore.clone().acquire_owned().await.ok();
            let svc = self.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                svc.check_row(row).await
            });
            handles.push((ids, handle));
        }

        let mut details = Vec::with_capacity(handles.len());
        for ((container_id, evidence_id), handle) in handles {
            match handle.await {
                Ok(detail) => details.push(detail),
                Err(e) => {
                    error!(
                        container = %container_id,
                        evidence = %evidence_id,
                        "reconcile task failed: {e}"
                    );
                    details.push(RecordDetail {
                        container_id,
                        evidence_id,
                        cid: None,
                        status: RecordStatus::Error,
                        error: Some(format!("verification task failed: {e}")),
                    });
                }
            }
        }

        let report = ReconcileReport::from_details(details);
        let s = &report.summary;
        if report.is_clean() {
            info!(total = s.total, "reconciliation complete: all records valid");
        } else {
            warn!(
                total = s.total,
                valid = s.valid,
                hash_mismatch = s.hash_mismatch,
                missing_on_chain = s.missing_on_chain,
                missing_in_store = s.missing_in_store,
                errors = s.errors,
                "reconciliation complete: discrepancies found"
            );
        }
        Ok(report)
    }

    async fn check_row(&self, row: RepositoryRow) -> RecordDetail {
        let record = match row.record {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    container = %row.container_id,
                    evidence = %row.evidence_id,
                    error = %e,
                    "skipping malformed metadata row"
                );
                return RecordDetail {
                    container_id: row.container_id,
                    evidence_id: row.evidence_id,
                    cid: None,
                    status: RecordStatus::Error,
                    error: Some(e.to_string()),
                };
            }
        };

        let (status, error) = match self.verify(&record).await {
            Ok(_) => (RecordStatus::Valid, None),
            Err(failure) => (classify(&failure), Some(failure.error.to_string())),
        };
        RecordDetail {
            container_id: record.container_id,
            evidence_id: record.evidence_id,
            cid: Some(record.cid),
            status,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(stage: Stage, error: CustodyError) -> VerifyFailure {
        VerifyFailure { stage, error }
    }

    #[test]
    fn classification_table() {
        let cases = [
            (
                failure(
                    Stage::Digest,
                    CustodyError::IntegrityViolation {
                        expected: "a".into(),
                        actual: "b".into(),
                    },
                ),
                RecordStatus::HashMismatch,
            ),
            (
                failure(Stage::Decrypt, CustodyError::Crypto("bad padding".into())),
                RecordStatus::HashMismatch,
            ),
            (
                failure(Stage::Ledger, CustodyError::not_found("entry")),
                RecordStatus::MissingOnChain,
            ),
            (
                failure(Stage::Store, CustodyError::not_found("blob")),
                RecordStatus::MissingInStore,
            ),
            (
                failure(Stage::Unwrap, CustodyError::Crypto("bad key".into())),
                RecordStatus::Error,
            ),
            (
                failure(Stage::Store, CustodyError::StoreUnavailable("down".into())),
                RecordStatus::Error,
            ),
            (
                failure(
                    Stage::Ledger,
                    CustodyError::Timeout {
                        operation: "ledger get".into(),
                    },
                ),
                RecordStatus::Error,
            ),
        ];
        for (f, expected) in cases {
            assert_eq!(classify(&f), expected, "{:?} at {:?}", f.error, f.stage);
        }
    }

    #[test]
    fn summary_counts() {
        let detail = |status| RecordDetail {
            container_id: "C".into(),
            evidence_id: "E".into(),
            cid: None,
            status,
            error: None,
        };
        let report = ReconcileReport::from_details(vec![
            detail(RecordStatus::Valid),
            detail(RecordStatus::Valid),
            detail(RecordStatus::HashMismatch),
            detail(RecordStatus::MissingInStore),
            detail(RecordStatus::Error),
        ]);
        assert_eq!(
            report.summary,
            ReconcileSummary {
                total: 5,
                valid: 2,
                hash_mismatch: 1,
                missing_on_chain: 0,
                missing_in_store: 1,
                errors: 1,
            }
        );
        assert!(!report.is_clean());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&RecordStatus::MissingOnChain).unwrap();
        assert_eq!(json, "\"missing_on_chain\"");
    }
}
