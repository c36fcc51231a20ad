//! Bounded external calls.
//!
//! Every store, ledger and repository call goes through [`bounded`], which
//! turns an elapsed deadline into `CustodyError::Timeout`. The pipelines
//! never retry on their own.

use custody_core::config::CustodyConfig;
use custody_core::{CustodyError, CustodyResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Per-collaborator call deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub store: Duration,
    pub ledger: Duration,
    pub repository: Duration,
}

impl Timeouts {
    pub fn from_config(cfg: &CustodyConfig) -> Self {
        Self {
            store: cfg.storage.timeout(),
            ledger: cfg.ledger.timeout(),
            repository: cfg.repository.timeout(),
        }
    }

    /// Same deadline for every collaborator.
    pub fn uniform(limit: Duration) -> Self {
        Self {
            store: limit,
            ledger: limit,
            repository: limit,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from_config(&CustodyConfig::default())
    }
}

/// Await `fut`, failing with `Timeout { operation }` once `limit` elapses.
pub async fn bounded<T, F>(operation: &str, limit: Duration, fut: F) -> CustodyResult<T>
where
    F: Future<Output = CustodyResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                operation,
                timeout_ms = limit.as_millis() as u64,
                "external call timed out"
            );
            Err(CustodyError::Timeout {
                operation: operation.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fast_call_passes_through() {
        let out = bounded("noop", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(out.unwrap(), 7);
    }

    #[tokio::test]
    async fn inner_error_is_preserved() {
        let out: CustodyResult<()> = bounded("store get", Duration::from_secs(1), async {
            Err(CustodyError::not_found("blob x"))
        })
        .await;
        assert!(matches!(out, Err(CustodyError::NotFound { .. })));
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let out: CustodyResult<()> = bounded("ledger record", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        match out {
            Err(CustodyError::Timeout { operation }) => assert_eq!(operation, "ledger record"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn defaults_follow_config() {
        let t = Timeouts::default();
        assert_eq!(t.store, Duration::from_secs(30));
        assert_eq!(t.repository, Duration::from_secs(10));
    }
}
