//! OpenDAL Operator factory for custody backends

use anyhow::{Context, Result};
use custody_core::config::{Backend, LedgerConfig, StorageConfig};
use opendal::Operator;
use std::path::PathBuf;

/// Minimal description of where an operator points.
///
/// Both the content store and the ledger are built from one of these.
#[derive(Debug, Clone)]
pub struct OperatorSpec {
    pub backend: Backend,
    pub root: PathBuf,
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub enforce_tls: bool,
}

impl From<&StorageConfig> for OperatorSpec {
    fn from(cfg: &StorageConfig) -> Self {
        Self {
            backend: cfg.backend,
            root: cfg.root.clone(),
            endpoint: cfg.endpoint.clone(),
            region: cfg.region.clone(),
            bucket: cfg.bucket.clone(),
            enforce_tls: cfg.enforce_tls,
        }
    }
}

impl From<&LedgerConfig> for OperatorSpec {
    fn from(cfg: &LedgerConfig) -> Self {
        Self {
            backend: cfg.backend,
            root: cfg.root.clone(),
            endpoint: cfg.endpoint.clone(),
            region: cfg.region.clone(),
            bucket: cfg.bucket.clone(),
            // the ledger has no TLS knob of its own; HTTP endpoints only warn
            enforce_tls: false,
        }
    }
}

/// Build an operator for the given spec.
///
/// S3 credentials are read from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`
/// (or the `CUSTODY_` prefixed equivalents).
pub fn build_operator(spec: &OperatorSpec) -> Result<Operator> {
    match spec.backend {
        Backend::Memory => {
            tracing::warn!("using in-memory backend: contents are lost on exit");
            memory_operator()
        }
        Backend::Fs => {
            std::fs::create_dir_all(&spec.root)
                .with_context(|| format!("creating storage root: {}", spec.root.display()))?;
            let root = spec.root.to_string_lossy();
            let builder = opendal::services::Fs::default().root(&root);
            Ok(Operator::new(builder)
                .context("creating OpenDAL fs operator")?
                .layer(opendal::layers::LoggingLayer::default())
                .finish())
        }
        Backend::S3 => {
            let access_key = env_either("AWS_ACCESS_KEY_ID", "CUSTODY_ACCESS_KEY_ID")
                .context("S3 credentials not set: export AWS_ACCESS_KEY_ID")?;
            let secret_key = env_either("AWS_SECRET_ACCESS_KEY", "CUSTODY_SECRET_ACCESS_KEY")
                .context("AWS_SECRET_ACCESS_KEY not set")?;
            build_s3(spec, &access_key, &secret_key)
        }
    }
}

/// Build an S3 operator with explicit credentials.
///
/// If `enforce_tls` is true and the endpoint uses HTTP, this returns an error.
/// Otherwise, a warning is logged for non-HTTPS endpoints.
pub fn build_s3(
    spec: &OperatorSpec,
    access_key_id: &str,
    secret_access_key: &str,
) -> Result<Operator> {
    if spec.endpoint.starts_with("http://") {
        if spec.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                spec.endpoint
            );
        }
        tracing::warn!(
            endpoint = %spec.endpoint,
            "S3 endpoint uses plaintext HTTP; credentials are transmitted unencrypted"
        );
    }

    // opendal 0.55: S3 builder uses consuming pattern (methods take `self`, return `Self`)
    let builder = opendal::services::S3::default()
        .endpoint(&spec.endpoint)
        .region(&spec.region)
        .bucket(&spec.bucket)
        .access_key_id(access_key_id)
        .secret_access_key(secret_access_key);

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(3)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}

/// Process-local operator; used by tests and the `memory` backend.
pub fn memory_operator() -> Result<Operator> {
    Ok(Operator::new(opendal::services::Memory::default())
        .context("creating OpenDAL memory operator")?
        .finish())
}

fn env_either(primary: &str, fallback: &str) -> Result<String> {
    std::env::var(primary)
        .or_else(|_| std::env::var(fallback))
        .map_err(|_| anyhow::anyhow!("neither {primary} nor {fallback} is set"))
}
