//! HTTP surface of the custody service.
//!
//! Routes:
//!   POST /case/{container}/upload       multipart: file, evidenceId, evidenceType
//!   POST /fir/{container}/upload        same, for FIR containers
//!   POST /case/{container}/confirm      JSON { "index": n }
//!   GET  /retrieve/{container}/{evidence}
//!   GET  /sync                          reconciliation report

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use custody_core::{CustodyError, EvidenceType};
use custody_pipeline::{Custody, UploadRequest};
use prometheus_client::registry::Registry;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::metrics::{self, CustodyMetrics};

/// Multipart framing allowance on top of the file size limit
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub custody: Custody,
    pub metrics: CustodyMetrics,
    pub registry: Arc<Registry>,
}

impl AppState {
    pub fn new(custody: Custody) -> Self {
        let mut registry = Registry::default();
        let metrics = CustodyMetrics::new(&mut registry);
        Self {
            custody,
            metrics,
            registry: Arc::new(registry),
        }
    }
}

pub fn router(state: AppState, with_metrics: bool) -> Router {
    let upload_limit = usize::try_from(state.custody.policy().max_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let uploads = Router::new()
        .route("/case/{container}/upload", post(upload_case))
        .route("/fir/{container}/upload", post(upload_fir))
        .layer(DefaultBodyLimit::max(upload_limit));

    let mut app = Router::new()
        .merge(uploads)
        .route("/case/{container}/confirm", post(confirm))
        .route("/retrieve/{container}/{evidence}", get(retrieve))
        .route("/sync", get(sync))
        .route("/healthz", get(metrics::healthz_handler))
        .route("/readyz", get(metrics::readyz_handler));
    if with_metrics {
        app = app.route("/metrics", get(metrics::metrics_handler));
    }
    app.with_state(state)
}

/// `CustodyError` rendered as `{ "error": …, "kind": … }` with a matching status.
pub struct ApiError(pub CustodyError);

impl From<CustodyError> for ApiError {
    fn from(e: CustodyError) -> Self {
        ApiError(e)
    }
}

pub fn status_for(e: &CustodyError) -> StatusCode {
    match e {
        CustodyError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        CustodyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        CustodyError::NotFound { .. } => StatusCode::NOT_FOUND,
        CustodyError::IntegrityViolation { .. } => StatusCode::FORBIDDEN,
        CustodyError::Duplicate(_) => StatusCode::CONFLICT,
        CustodyError::Crypto(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CustodyError::StoreUnavailable(_)
        | CustodyError::LedgerUnavailable(_)
        | CustodyError::RepositoryUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        CustodyError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        CustodyError::Config(_) | CustodyError::Io(_) | CustodyError::Other(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let message = match &self.0 {
            // digests stay in the server log
            CustodyError::IntegrityViolation { .. } => {
                "evidence integrity verification failed; download not permitted".to_string()
            }
            other => other.to_string(),
        };
        if status.is_server_error() {
            warn!(kind = self.0.kind(), error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": message, "kind": self.0.kind() }))).into_response()
    }
}

async fn upload_case(
    State(state): State<AppState>,
    Path(container): Path<String>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    upload(state, "case", container, multipart).await
}

async fn upload_fir(
    State(state): State<AppState>,
    Path(container): Path<String>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    upload(state, "fir", container, multipart).await
}

async fn upload(
    state: AppState,
    container_kind: &str,
    container: String,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let result = async {
        let req = read_upload(container, multipart).await?;
        state.custody.upload(req).await
    }
    .await;

    match result {
        Ok(receipt) => {
            state.metrics.upload("ok");
            info!(
                container_kind,
                container = %receipt.container_id,
                evidence = %receipt.evidence_id,
                cid = %receipt.cid,
                "upload accepted"
            );
            Ok((StatusCode::OK, Json(receipt)).into_response())
        }
        Err(e) => {
            state.metrics.upload(e.kind());
            Err(e.into())
        }
    }
}

/// Pull `file`, `evidenceId` and `evidenceType` out of a multipart body.
async fn read_upload(
    container: String,
    mut multipart: Multipart,
) -> Result<UploadRequest, CustodyError> {
    let bad = |e: axum::extract::multipart::MultipartError| {
        CustodyError::InvalidRequest(format!("malformed multipart body: {e}"))
    };

    let mut evidence_id = None;
    let mut evidence_type = None;
    let mut file = None;

    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().map(str::to_string);
                let mime = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(bad)?;
                file = Some((filename, mime, bytes.to_vec()));
            }
            "evidenceId" => evidence_id = Some(field.text().await.map_err(bad)?),
            "evidenceType" => {
                let text = field.text().await.map_err(bad)?;
                if !text.trim().is_empty() {
                    evidence_type = Some(text.parse::<EvidenceType>()?);
                }
            }
            _ => {}
        }
    }

    let (filename, mime_type, bytes) =
        file.ok_or_else(|| CustodyError::InvalidRequest("no file uploaded".into()))?;
    Ok(UploadRequest {
        container_id: container,
        evidence_id: evidence_id.unwrap_or_default(),
        evidence_type,
        mime_type,
        filename,
        bytes,
    })
}

#[derive(Debug, Deserialize)]
struct ConfirmBody {
    index: u64,
}

async fn confirm(
    State(state): State<AppState>,
    Path(container): Path<String>,
    Json(body): Json<ConfirmBody>,
) -> Result<Response, ApiError> {
    let outcome = state.custody.confirm(&container, body.index).await?;
    Ok(Json(json!({
        "container_id": container.trim(),
        "index": body.index,
        "status": outcome,
    }))
    .into_response())
}

async fn retrieve(
    State(state): State<AppState>,
    Path((container, evidence)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    match state.custody.retrieve(&container, &evidence).await {
        Ok(evidence) => {
            state.metrics.retrieval("ok");
            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (header::CONTENT_DISPOSITION, evidence.content_disposition),
                ],
                evidence.bytes,
            )
                .into_response())
        }
        Err(e) => {
            state.metrics.retrieval(e.kind());
            Err(e.into())
        }
    }
}

async fn sync(State(state): State<AppState>) -> Result<Response, ApiError> {
    let report = state.custody.reconcile().await?;
    state.metrics.reconciled(&report);
    Ok(Json(report).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use custody_crypto::{derive_master_key, Vault};
    use custody_ledger::ChainLedger;
    use custody_pipeline::JsonRepository;
    use custody_storage::{memory_operator, OperatorStore};
    use tower::ServiceExt;

    const BOUNDARY: &str = "custody-test-boundary";

    async fn app() -> Router {
        let store = OperatorStore::new(memory_operator().unwrap(), "evidence");
        let ledger = ChainLedger::open(memory_operator().unwrap(), "ledger", "api-test")
            .await
            .unwrap();
        let custody = Custody::new(
            Arc::new(store),
            Arc::new(ledger),
            Arc::new(JsonRepository::in_memory()),
            Vault::new(derive_master_key(b"api test secret")),
        );
        router(AppState::new(custody), true)
    }

    fn multipart_body(
        evidence_id: &str,
        evidence_type: Option<&str>,
        mime: &str,
        data: &[u8],
    ) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"evidenceId\"\r\n\r\n{evidence_id}\r\n"
            )
            .as_bytes(),
        );
        if let Some(t) = evidence_type {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"evidenceType\"\r\n\r\n{t}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"scene.png\"\r\nContent-Type: {mime}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(path: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn upload_then_retrieve() {
        let app = app().await;

        let resp = app
            .clone()
            .oneshot(upload_request(
                "/case/CASE-1/upload",
                multipart_body("EV-1", Some("Image"), "image/png", b"0123456789"),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let receipt = json_body(resp).await;
        assert_eq!(receipt["cid"].as_str().unwrap().len(), 64);
        assert_eq!(receipt["filename"], "scene.png");

        let resp = app
            .clone()
            .oneshot(
                Request::get("/retrieve/CASE-1/EV-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let disposition = resp
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment; filename=\"scene.png\""));
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"0123456789");
    }

    #[tokio::test]
    async fn fir_upload_route() {
        let app = app().await;
        let resp = app
            .oneshot(upload_request(
                "/fir/FIR-2/upload",
                multipart_body("EV-1", None, "application/pdf", b"%PDF-1.4"),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["evidence_type"], "Document");
    }

    #[tokio::test]
    async fn disallowed_mime_is_415() {
        let app = app().await;
        let resp = app
            .oneshot(upload_request(
                "/case/CASE-1/upload",
                multipart_body("EV-1", None, "text/html", b"<html>"),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(json_body(resp).await["kind"], "unsupported_media_type");
    }

    #[tokio::test]
    async fn bad_evidence_type_is_400() {
        let app = app().await;
        let resp = app
            .oneshot(upload_request(
                "/case/CASE-1/upload",
                multipart_body("EV-1", Some("Hologram"), "image/png", b"png"),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_evidence_is_404() {
        let app = app().await;
        let resp = app
            .oneshot(Request::get("/retrieve/CASE-1/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(resp).await["kind"], "not_found");
    }

    #[tokio::test]
    async fn confirm_reports_outcome() {
        let app = app().await;
        app.clone()
            .oneshot(upload_request(
                "/case/CASE-1/upload",
                multipart_body("EV-1", None, "image/png", b"png bytes"),
            ))
            .await
            .unwrap();

        let confirm = |index: u64| {
            Request::post("/case/CASE-1/confirm")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(format!("{{\"index\":{index}}}")))
                .unwrap()
        };

        let first = json_body(app.clone().oneshot(confirm(0)).await.unwrap()).await;
        assert_eq!(first["status"], "confirmed");
        let second = json_body(app.clone().oneshot(confirm(0)).await.unwrap()).await;
        assert_eq!(second["status"], "already_confirmed");

        let resp = app.oneshot(confirm(9)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sync_returns_summary() {
        let app = app().await;
        app.clone()
            .oneshot(upload_request(
                "/case/CASE-1/upload",
                multipart_body("EV-1", None, "image/png", b"png bytes"),
            ))
            .await
            .unwrap();

        let resp = app
            .oneshot(Request::get("/sync").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let report = json_body(resp).await;
        assert_eq!(report["summary"]["total"], 1);
        assert_eq!(report["summary"]["valid"], 1);
        assert_eq!(report["details"][0]["status"], "valid");
    }

    #[tokio::test]
    async fn health_and_metrics() {
        let app = app().await;
        for path in ["/healthz", "/readyz"] {
            let resp = app
                .clone()
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{path}");
        }

        app.clone()
            .oneshot(Request::get("/retrieve/CASE-1/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let resp = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let text = String::from_utf8(to_bytes(resp.into_body(), usize::MAX).await.unwrap().to_vec())
            .unwrap();
        assert!(text.contains("custody_retrievals_total{outcome=\"not_found\"} 1"));
    }

    #[test]
    fn error_status_mapping() {
        let cases = [
            (CustodyError::UnsupportedMediaType("x".into()), 415),
            (CustodyError::InvalidRequest("x".into()), 400),
            (CustodyError::not_found("x"), 404),
            (
                CustodyError::IntegrityViolation {
                    expected: "a".into(),
                    actual: "b".into(),
                },
                403,
            ),
            (CustodyError::Duplicate("x".into()), 409),
            (CustodyError::Crypto("x".into()), 422),
            (CustodyError::StoreUnavailable("x".into()), 503),
            (CustodyError::LedgerUnavailable("x".into()), 503),
            (
                CustodyError::Timeout {
                    operation: "store put".into(),
                },
                504,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(status_for(&err).as_u16(), code, "{err}");
        }
    }
}
