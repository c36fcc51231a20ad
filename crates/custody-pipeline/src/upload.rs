//! Upload pipeline.
//!
//! Order matters: nothing is encrypted before the policy check, and nothing
//! is recorded anywhere until the ciphertext is stored. A failure after the
//! store write leaves an orphaned blob (harmless) or a metadata row with no
//! ledger entry, which reconciliation reports as `missing_on_chain`.

use chrono::Utc;
use custody_core::types::require_id;
use custody_core::{CustodyResult, EvidenceRecord, EvidenceType};
use custody_crypto::{encrypt, generate_data_key, generate_iv, sha256_hex};
use custody_ledger::Submission;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::deadline::bounded;
use crate::filename::{sanitize_filename, stored_filename};
use crate::service::Custody;

/// One file submitted for custody.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub container_id: String,
    pub evidence_id: String,
    /// Inferred from `mime_type` when absent
    pub evidence_type: Option<EvidenceType>,
    /// Declared by the caller; checked against the allow-list
    pub mime_type: String,
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub container_id: String,
    pub evidence_id: String,
    pub cid: String,
    pub hash_original: String,
    pub evidence_type: EvidenceType,
    pub filename: String,
    /// Position of the new entry within its container on the ledger
    pub ledger_index: u64,
}

impl Custody {
    pub async fn upload(&self, req: UploadRequest) -> CustodyResult<UploadReceipt> {
        let container_id = require_id("container_id", &req.container_id)?.to_string();
        let evidence_id = require_id("evidence_id", &req.evidence_id)?.to_string();
        self.policy.check(&req.mime_type, req.bytes.len())?;

        let evidence_type = req
            .evidence_type
            .unwrap_or_else(|| EvidenceType::from_mime(&req.mime_type));
        let filename = stored_filename(req.filename.as_deref(), &evidence_id);

        let data_key = generate_data_key();
        let iv = generate_iv();
        let key_iv = generate_iv();
        let ciphertext = encrypt(&req.bytes, &data_key, &iv);

        let cid = bounded(
            "store put",
            self.timeouts.store,
            self.store.put(&ciphertext, &filename),
        )
        .await?;

        let hash_original = sha256_hex(&req.bytes);
        let key_wrapped = self.vault.wrap_hex(&data_key, &key_iv);

        let record = EvidenceRecord {
            container_id: container_id.clone(),
            evidence_id: evidence_id.clone(),
            cid: cid.clone(),
            hash_original: hash_original.clone(),
            key_wrapped,
            iv: iv.to_hex(),
            key_iv: Some(key_iv.to_hex()),
            evidence_type,
            original_filename: req.filename.as_deref().and_then(sanitize_or_none),
            created_at: Utc::now(),
        };
        bounded(
            "repository insert",
            self.timeouts.repository,
            self.repository.insert(&record),
        )
        .await?;

        let submission = Submission {
            container_id: container_id.clone(),
            evidence_id: evidence_id.clone(),
            cid: cid.clone(),
            hash_original: hash_original.clone(),
            evidence_type,
        };
        let entry = match bounded(
            "ledger record",
            self.timeouts.ledger,
            self.ledger.record_evidence(submission),
        )
        .await
        {
            Ok(entry) => entry,
            Err(e) => {
                error!(
                    container = %container_id,
                    evidence = %evidence_id,
                    cid = %cid,
                    error = %e,
                    "ledger write failed after metadata insert; row is unanchored"
                );
                return Err(e);
            }
        };

        self.filenames.insert(&cid, &filename);
        info!(
            container = %container_id,
            evidence = %evidence_id,
            cid = %cid,
            bytes = req.bytes.len(),
            evidence_type = %evidence_type,
            index = entry.index,
            "evidence uploaded"
        );

        Ok(UploadReceipt {
            container_id,
            evidence_id,
            cid,
            hash_original,
            evidence_type,
            filename,
            ledger_index: entry.index,
        })
    }
}

fn sanitize_or_none(name: &str) -> Option<String> {
    Some(sanitize_filename(name)).filter(|n| !n.is_empty())
}
