use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CustodyError, CustodyResult};

/// Length in hex chars of a SHA-256 digest
pub const HASH_HEX_LEN: usize = 64;

/// Length in hex chars of a 16-byte IV
pub const IV_HEX_LEN: usize = 32;

/// Category of an evidence item, as anchored on the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvidenceType {
    Image,
    Video,
    Document,
    Other,
}

impl EvidenceType {
    /// Best-effort category for a MIME type.
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.trim().to_ascii_lowercase();
        if mime.starts_with("image/") {
            EvidenceType::Image
        } else if mime.starts_with("video/") {
            EvidenceType::Video
        } else if mime == "application/pdf"
            || mime.starts_with("application/vnd.openxmlformats-officedocument")
        {
            EvidenceType::Document
        } else {
            EvidenceType::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceType::Image => "Image",
            EvidenceType::Video => "Video",
            EvidenceType::Document => "Document",
            EvidenceType::Other => "Other",
        }
    }
}

impl fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvidenceType {
    type Err = CustodyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(EvidenceType::Image),
            "video" => Ok(EvidenceType::Video),
            "document" => Ok(EvidenceType::Document),
            "other" => Ok(EvidenceType::Other),
            other => Err(CustodyError::InvalidRequest(format!(
                "invalid evidence type '{other}' (expected Image, Video, Document or Other)"
            ))),
        }
    }
}

/// Per-evidence decryption material and linkage, owned by the metadata repository.
///
/// Not trusted for integrity: the ledger's `(cid, hash_original)` is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    /// Case or FIR the evidence is filed under
    pub container_id: String,
    /// Unique within `container_id`
    pub evidence_id: String,
    /// Content identifier of the ciphertext blob
    pub cid: String,
    /// Hex SHA-256 of the plaintext, computed before encryption
    pub hash_original: String,
    /// Hex ciphertext of the per-file data key under the vault master key
    pub key_wrapped: String,
    /// Hex IV used for the file encryption
    pub iv: String,
    /// Hex IV used for the key wrap. Absent on legacy records, which reuse `iv`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_iv: Option<String>,
    pub evidence_type: EvidenceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EvidenceRecord {
    /// Check the shape of every field. Applied to each row read from a repository.
    pub fn validate(&self) -> CustodyResult<()> {
        require_id("container_id", &self.container_id)?;
        require_id("evidence_id", &self.evidence_id)?;
        if self.cid.trim().is_empty() {
            return Err(malformed(self, "cid is empty"));
        }
        check_hex(self, "hash_original", &self.hash_original, Some(HASH_HEX_LEN))?;
        check_hex(self, "iv", &self.iv, Some(IV_HEX_LEN))?;
        if let Some(key_iv) = &self.key_iv {
            check_hex(self, "key_iv", key_iv, Some(IV_HEX_LEN))?;
        }
        check_hex(self, "key_wrapped", &self.key_wrapped, None)?;
        if self.key_wrapped.is_empty() {
            return Err(malformed(self, "key_wrapped is empty"));
        }
        Ok(())
    }

    /// IV to use for unwrapping the data key.
    pub fn wrap_iv(&self) -> &str {
        self.key_iv.as_deref().unwrap_or(&self.iv)
    }
}

/// One anchored evidence entry as reported by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub container_id: String,
    pub evidence_id: String,
    /// Position of the entry within its container (0-based)
    pub index: u64,
    pub cid: String,
    pub hash_original: String,
    pub evidence_type: EvidenceType,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
    /// Flips false → true once, via an explicit confirmation
    pub confirmed: bool,
}

/// Reject empty identifiers; returns the trimmed id.
pub fn require_id<'a>(field: &str, value: &'a str) -> CustodyResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CustodyError::InvalidRequest(format!("{field} is required")));
    }
    Ok(trimmed)
}

fn check_hex(
    record: &EvidenceRecord,
    field: &str,
    value: &str,
    expected_len: Option<usize>,
) -> CustodyResult<()> {
    if !value.chars().all(|c| c.is_ascii_hexdigit()) || value.len() % 2 != 0 {
        return Err(malformed(record, &format!("{field} is not valid hex")));
    }
    if let Some(len) = expected_len {
        if value.len() != len {
            return Err(malformed(
                record,
                &format!("{field} has {} hex chars (expected {len})", value.len()),
            ));
        }
    }
    Ok(())
}

fn malformed(record: &EvidenceRecord, reason: &str) -> CustodyError {
    CustodyError::InvalidRequest(format!(
        "malformed evidence record {}/{}: {reason}",
        record.container_id, record.evidence_id
    ))
}
