use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CustodyError, CustodyResult};
use crate::policy::{DEFAULT_ALLOWED_MIME, DEFAULT_MAX_UPLOAD_BYTES};

/// Top-level configuration (loaded from custody.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CustodyConfig {
    pub daemon: DaemonConfig,
    pub storage: StorageConfig,
    pub ledger: LedgerConfig,
    pub repository: RepositoryConfig,
    pub vault: VaultConfig,
    pub policy: PolicyConfig,
    pub reconcile: ReconcileConfig,
}

impl CustodyConfig {
    /// Read and parse a config file.
    pub fn from_file(path: &Path) -> CustodyResult<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| CustodyError::Config(format!("parsing {}: {e}", path.display())))
    }
}

/// Backend an OpenDAL operator is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Local directory (`root`)
    Fs,
    /// S3-compatible endpoint
    S3,
    /// Process-local, lost on exit. Tests and demos only.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// HTTP listen address (default: 127.0.0.1:4000)
    pub listen: String,
    /// Serve Prometheus metrics on /metrics
    pub metrics: bool,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

/// Content store for ciphertext blobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// S3 bucket name
    pub bucket: String,
    /// Key prefix for blobs and their metadata
    pub prefix: String,
    /// Enforce HTTPS for S3 connections (warn/error on HTTP endpoints)
    pub enforce_tls: bool,
    /// Bound on each put/get call
    pub timeout_secs: u64,
}

/// Append-only ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: Backend,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// S3 endpoint (s3 backend)
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    /// Key prefix for ledger events
    pub prefix: String,
    /// Identity recorded as `submitted_by` on each entry
    pub submitter: String,
    /// Bound on each ledger call
    pub timeout_secs: u64,
}

/// Metadata repository (wrapped keys, IVs, linkage)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// JSON table file
    pub path: PathBuf,
    /// Bound on each repository call
    pub timeout_secs: u64,
}

/// Master key source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Environment variable holding the operator secret
    pub secret_env: String,
    /// File holding the operator secret (takes precedence over `secret_env`)
    pub secret_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Accepted declared MIME types
    pub allowed_mime: Vec<String>,
    /// Largest accepted upload in bytes
    pub max_upload_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Records verified concurrently
    pub workers: usize,
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl LedgerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl RepositoryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:4000".into(),
            metrics: true,
            log_level: "info".into(),
            log_format: "json".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Fs,
            root: PathBuf::from("/var/lib/custody/blobs"),
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "custody".into(),
            prefix: "evidence".into(),
            enforce_tls: false,
            timeout_secs: 30,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Fs,
            root: PathBuf::from("/var/lib/custody/ledger"),
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "custody-ledger".into(),
            prefix: "ledger".into(),
            submitter: "custodyd".into(),
            timeout_secs: 30,
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/custody/evidence.json"),
            timeout_secs: 10,
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            secret_env: "CUSTODY_MASTER_SECRET".into(),
            secret_file: None,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_mime: DEFAULT_ALLOWED_MIME.iter().map(|m| m.to_string()).collect(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[daemon]
listen = "0.0.0.0:8080"
metrics = false
log_level = "debug"
log_format = "text"

[storage]
backend = "s3"
endpoint = "https://s3.example.com:8333"
region = "eu-west-1"
bucket = "evidence-bucket"
enforce_tls = true
timeout_secs = 5

[ledger]
backend = "fs"
root = "/srv/ledger"
submitter = "station-12"

[repository]
path = "/srv/custody/evidence.json"

[vault]
secret_env = "STATION_SECRET"

[policy]
allowed_mime = ["image/png", "application/pdf"]
max_upload_bytes = 1048576

[reconcile]
workers = 8
"#;
        let config: CustodyConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.daemon.listen, "0.0.0.0:8080");
        assert!(!config.daemon.metrics);
        assert_eq!(config.storage.backend, Backend::S3);
        assert_eq!(config.storage.bucket, "evidence-bucket");
        assert!(config.storage.enforce_tls);
        assert_eq!(config.storage.timeout(), Duration::from_secs(5));
        assert_eq!(config.ledger.root, PathBuf::from("/srv/ledger"));
        assert_eq!(config.ledger.submitter, "station-12");
        assert_eq!(config.vault.secret_env, "STATION_SECRET");
        assert_eq!(config.policy.allowed_mime.len(), 2);
        assert_eq!(config.policy.max_upload_bytes, 1048576);
        assert_eq!(config.reconcile.workers, 8);
    }

    #[test]
    fn test_parse_defaults() {
        let config: CustodyConfig = toml::from_str("").unwrap();

        assert_eq!(config.daemon.listen, "127.0.0.1:4000");
        assert_eq!(config.storage.backend, Backend::Fs);
        assert_eq!(config.storage.prefix, "evidence");
        assert_eq!(config.ledger.prefix, "ledger");
        assert_eq!(config.vault.secret_env, "CUSTODY_MASTER_SECRET");
        assert_eq!(config.policy.allowed_mime.len(), DEFAULT_ALLOWED_MIME.len());
        assert_eq!(config.policy.max_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(config.reconcile.workers, 4);
    }

    #[test]
    fn test_zero_timeout_clamped() {
        let toml_str = r#"
[repository]
timeout_secs = 0
"#;
        let config: CustodyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.repository.timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custody.toml");
        std::fs::write(&path, "[ledger]\nsubmitter = \"lab-3\"\n").unwrap();

        let config = CustodyConfig::from_file(&path).unwrap();
        assert_eq!(config.ledger.submitter, "lab-3");
        assert_eq!(config.storage.region, "us-east-1");
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = CustodyConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: CustodyConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.storage.root, parsed.storage.root);
        assert_eq!(config.ledger.backend, parsed.ledger.backend);
        assert_eq!(config.policy.allowed_mime, parsed.policy.allowed_mime);
    }
}
