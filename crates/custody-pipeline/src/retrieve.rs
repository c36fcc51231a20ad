//! Retrieval pipeline.

use custody_core::types::require_id;
use custody_core::{CustodyError, CustodyResult, EvidenceRecord, EvidenceType};
use tracing::{debug, info, warn};

use crate::deadline::bounded;
use crate::filename::{content_disposition, fallback_filename, sanitize_filename, with_extension};
use crate::service::Custody;

/// Verified plaintext plus what a caller needs to hand it out.
#[derive(Debug, Clone)]
pub struct RetrievedEvidence {
    pub container_id: String,
    pub evidence_id: String,
    pub cid: String,
    pub hash_original: String,
    pub evidence_type: EvidenceType,
    pub filename: String,
    /// `Content-Disposition` header value
    pub content_disposition: String,
    pub bytes: Vec<u8>,
}

impl Custody {
    /// Decrypt one evidence item and verify it against the ledger.
    ///
    /// Returns `IntegrityViolation` if the plaintext digest differs from the
    /// anchored one; the plaintext is dropped in that case.
    pub async fn retrieve(
        &self,
        container_id: &str,
        evidence_id: &str,
    ) -> CustodyResult<RetrievedEvidence> {
        let container_id = require_id("container_id", container_id)?;
        let evidence_id = require_id("evidence_id", evidence_id)?;

        let record = bounded(
            "repository get",
            self.timeouts.repository,
            self.repository.get(container_id, evidence_id),
        )
        .await?
        .ok_or_else(|| CustodyError::not_found(format!("evidence {container_id}/{evidence_id}")))?;

        let verified = self.verify(&record).await.map_err(|f| f.error)?;

        let filename = self.download_filename(&verified.entry.cid, &record).await;
        info!(
            container = container_id,
            evidence = evidence_id,
            cid = %verified.entry.cid,
            bytes = verified.plaintext.len(),
            "evidence retrieved"
        );

        Ok(RetrievedEvidence {
            container_id: container_id.to_string(),
            evidence_id: evidence_id.to_string(),
            cid: verified.entry.cid,
            hash_original: verified.entry.hash_original,
            evidence_type: verified.entry.evidence_type,
            content_disposition: content_disposition(&filename),
            filename,
            bytes: verified.plaintext,
        })
    }

    /// Store metadata first (cached), then the recorded name, then the
    /// evidence id. Lookup failures only cost the nicer name.
    async fn download_filename(&self, cid: &str, record: &EvidenceRecord) -> String {
        if let Some(name) = self.filenames.get(cid) {
            debug!(cid, "filename cache hit");
            return name;
        }

        let from_store =
            match bounded("store filename", self.timeouts.store, self.store.filename(cid)).await {
                Ok(name) => name,
                Err(e) => {
                    warn!(cid, error = %e, "filename lookup failed");
                    None
                }
            };

        let candidate = from_store
            .or_else(|| record.original_filename.clone())
            .map(|n| sanitize_filename(&n))
            .filter(|n| !n.is_empty());

        match candidate {
            Some(name) => {
                let name = with_extension(&name);
                self.filenames.insert(cid, &name);
                name
            }
            None => fallback_filename(&record.evidence_id),
        }
    }
}
