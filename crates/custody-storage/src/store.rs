//! Content store client: opaque ciphertext in, content identifier out.
//!
//! Layout under `{prefix}`:
//! ```text
//! blobs/{cid}   ciphertext bytes
//! names/{cid}   JSON BlobMeta { name, size, stored_at }
//! ```
//!
//! The CID is the BLAKE3 hex digest of the stored bytes, so re-uploading
//! identical ciphertext is idempotent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use custody_core::{CustodyError, CustodyResult};
use opendal::{ErrorKind, Operator};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Narrow interface to a content-addressed object network.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `bytes`, recording `filename` as descriptive metadata. Returns the CID.
    async fn put(&self, bytes: &[u8], filename: &str) -> CustodyResult<String>;

    /// Fetch a blob by CID. `NotFound` if missing.
    async fn get(&self, cid: &str) -> CustodyResult<Vec<u8>>;

    /// Filename recorded at `put`, if any.
    async fn filename(&self, cid: &str) -> CustodyResult<Option<String>>;

    /// Readiness check. `StoreUnavailable` if the backend cannot be reached.
    async fn check(&self) -> CustodyResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlobMeta {
    name: String,
    size: u64,
    stored_at: DateTime<Utc>,
}

/// Content identifier for a byte string (BLAKE3, 64 lowercase hex chars).
pub fn content_id(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Map an OpenDAL error onto the custody taxonomy.
pub fn map_opendal_error(e: opendal::Error, what: &str) -> CustodyError {
    match e.kind() {
        ErrorKind::NotFound => CustodyError::not_found(what.to_string()),
        _ => CustodyError::StoreUnavailable(format!("{what}: {e}")),
    }
}

/// `ContentStore` over any OpenDAL operator.
#[derive(Clone)]
pub struct OperatorStore {
    op: Operator,
    prefix: String,
}

impl OperatorStore {
    pub fn new(op: Operator, prefix: &str) -> Self {
        Self {
            op,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    fn blob_key(&self, cid: &str) -> String {
        format!("{}/blobs/{cid}", self.prefix)
    }

    fn name_key(&self, cid: &str) -> String {
        format!("{}/names/{cid}", self.prefix)
    }
}

/// CIDs are used as object keys; reject anything that is not a BLAKE3 hex digest.
fn validate_cid(cid: &str) -> CustodyResult<()> {
    if cid.len() == 64 && cid.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(CustodyError::not_found(format!("blob {cid} (not a valid content id)")))
    }
}

#[async_trait]
impl ContentStore for OperatorStore {
    async fn put(&self, bytes: &[u8], filename: &str) -> CustodyResult<String> {
        let cid = content_id(bytes);
        let key = self.blob_key(&cid);

        let present = self
            .op
            .exists(&key)
            .await
            .map_err(|e| map_opendal_error(e, &format!("blob {cid}")))?;
        if present {
            debug!(cid = %cid, "dedup: blob already stored");
        } else {
            self.op
                .write(&key, bytes.to_vec())
                .await
                .map_err(|e| map_opendal_error(e, &format!("blob {cid}")))?;
        }

        let meta = BlobMeta {
            name: filename.to_string(),
            size: bytes.len() as u64,
            stored_at: Utc::now(),
        };
        let meta_bytes = serde_json::to_vec(&meta)
            .map_err(|e| CustodyError::Other(anyhow::anyhow!("serializing blob metadata: {e}")))?;
        self.op
            .write(&self.name_key(&cid), meta_bytes)
            .await
            .map_err(|e| map_opendal_error(e, &format!("blob metadata {cid}")))?;

        info!(cid = %cid, bytes = bytes.len(), "blob stored");
        Ok(cid)
    }

    async fn get(&self, cid: &str) -> CustodyResult<Vec<u8>> {
        validate_cid(cid)?;
        let buf = self
            .op
            .read(&self.blob_key(cid))
            .await
            .map_err(|e| map_opendal_error(e, &format!("blob {cid}")))?;
        Ok(buf.to_vec())
    }

    async fn filename(&self, cid: &str) -> CustodyResult<Option<String>> {
        validate_cid(cid)?;
        match self.op.read(&self.name_key(cid)).await {
            Ok(buf) => {
                let meta: BlobMeta = serde_json::from_slice(&buf.to_vec()).map_err(|e| {
                    CustodyError::StoreUnavailable(format!("malformed blob metadata {cid}: {e}"))
                })?;
                Ok(Some(meta.name).filter(|n| !n.is_empty()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(map_opendal_error(e, &format!("blob metadata {cid}"))),
        }
    }

    async fn check(&self) -> CustodyResult<()> {
        crate::health::check_health(&self.op, &format!("{}/", self.prefix)).await
    }
}
