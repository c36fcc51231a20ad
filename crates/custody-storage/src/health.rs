//! Reachability check for the daemon's readiness endpoint

use custody_core::{CustodyError, CustodyResult};
use opendal::Operator;

/// Check a backend with a shallow listing of `path`.
///
/// A missing directory still counts as reachable.
pub async fn check_health(op: &Operator, path: &str) -> CustodyResult<()> {
    match op.list(path).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CustodyError::StoreUnavailable(format!(
            "health check on {path}: {e}"
        ))),
    }
}
