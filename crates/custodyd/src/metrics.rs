//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  Prometheus text format
//!   GET /healthz  Liveness check (always 200 if process is running)
//!   GET /readyz   Readiness check (200 if the content store is reachable)

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use custody_pipeline::ReconcileReport;
use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

use crate::api::AppState;

type Labels = Vec<(String, String)>;

/// Counters for the custody endpoints.
#[derive(Clone, Default)]
pub struct CustodyMetrics {
    uploads: Family<Labels, Counter>,
    retrievals: Family<Labels, Counter>,
    integrity_violations: Counter,
    reconciled_records: Family<Labels, Counter>,
}

impl CustodyMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "custody_uploads",
            "Upload requests by outcome",
            metrics.uploads.clone(),
        );
        registry.register(
            "custody_retrievals",
            "Retrieval requests by outcome",
            metrics.retrievals.clone(),
        );
        registry.register(
            "custody_integrity_violations",
            "Retrievals refused because the plaintext did not match the ledger",
            metrics.integrity_violations.clone(),
        );
        registry.register(
            "custody_reconciled_records",
            "Records checked by reconciliation, by status",
            metrics.reconciled_records.clone(),
        );
        metrics
    }

    fn outcome(outcome: &str) -> Labels {
        vec![("outcome".to_string(), outcome.to_string())]
    }

    pub fn upload(&self, outcome: &str) {
        self.uploads.get_or_create(&Self::outcome(outcome)).inc();
    }

    pub fn retrieval(&self, outcome: &str) {
        self.retrievals.get_or_create(&Self::outcome(outcome)).inc();
        if outcome == "integrity_violation" {
            self.integrity_violations.inc();
        }
    }

    pub fn reconciled(&self, report: &ReconcileReport) {
        for detail in &report.details {
            let labels = vec![("status".to_string(), detail.status.as_str().to_string())];
            self.reconciled_records.get_or_create(&labels).inc();
        }
    }
}

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut body = String::new();
    match encode(&mut body, &state.registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness check: returns 200 if the process is running.
pub async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check: returns 200 if the content store is reachable, 503 otherwise.
pub async fn readyz_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.custody.ready().await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "content store unreachable")
        }
    }
}
