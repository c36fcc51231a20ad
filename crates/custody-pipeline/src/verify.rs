//! Decrypt-and-verify shared by retrieval and reconciliation.

use custody_core::{CustodyError, EvidenceRecord, LedgerEntry};
use custody_crypto::{decrypt, digests_match, sha256_hex, Iv};
use tracing::{debug, error, warn};

use crate::deadline::bounded;
use crate::service::Custody;

/// Step at which verification stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Unwrap,
    Ledger,
    Store,
    Decrypt,
    Digest,
}

#[derive(Debug)]
pub(crate) struct VerifyFailure {
    pub stage: Stage,
    pub error: CustodyError,
}

impl VerifyFailure {
    fn at(stage: Stage) -> impl FnOnce(CustodyError) -> Self {
        move |error| VerifyFailure { stage, error }
    }
}

pub(crate) struct Verified {
    pub entry: LedgerEntry,
    pub plaintext: Vec<u8>,
}

impl Custody {
    /// Unwrap, fetch the anchored fingerprint, fetch, decrypt, compare.
    ///
    /// Plaintext is only returned when the digest matches the ledger entry.
    pub(crate) async fn verify(&self, record: &EvidenceRecord) -> Result<Verified, VerifyFailure> {
        let wrap_iv = Iv::from_hex(record.wrap_iv()).map_err(VerifyFailure::at(Stage::Unwrap))?;
        let data_key = self
            .vault
            .unwrap_hex(&record.key_wrapped, &wrap_iv)
            .map_err(VerifyFailure::at(Stage::Unwrap))?;

        let entry = bounded(
            "ledger get",
            self.timeouts.ledger,
            self.ledger
                .get_evidence(&record.container_id, &record.evidence_id),
        )
        .await
        .map_err(VerifyFailure::at(Stage::Ledger))?;

        if entry.cid != record.cid {
            warn!(
                container = %record.container_id,
                evidence = %record.evidence_id,
                metadata_cid = %record.cid,
                ledger_cid = %entry.cid,
                "metadata cid disagrees with ledger; using ledger"
            );
        }

        let ciphertext = bounded("store get", self.timeouts.store, self.store.get(&entry.cid))
            .await
            .map_err(VerifyFailure::at(Stage::Store))?;

        let file_iv = Iv::from_hex(&record.iv).map_err(VerifyFailure::at(Stage::Decrypt))?;
        let plaintext =
            decrypt(&ciphertext, &data_key, &file_iv).map_err(VerifyFailure::at(Stage::Decrypt))?;

        let actual = sha256_hex(&plaintext);
        if !digests_match(&entry.hash_original, &actual) {
            error!(
                container = %record.container_id,
                evidence = %record.evidence_id,
                cid = %entry.cid,
                expected = %entry.hash_original,
                actual = %actual,
                "integrity violation: plaintext does not match anchored hash"
            );
            return Err(VerifyFailure {
                stage: Stage::Digest,
                error: CustodyError::IntegrityViolation {
                    expected: entry.hash_original.clone(),
                    actual,
                },
            });
        }

        debug!(
            container = %record.container_id,
            evidence = %record.evidence_id,
            bytes = plaintext.len(),
            "evidence verified"
        );
        Ok(Verified { entry, plaintext })
    }
}
