// Ledger Audit - Web Server
// REST API with Axum: POST a ledger, get the full analysis back
//
// Environment:
//   LEDGER_AUDIT_ADDR          bind address (default 0.0.0.0:3000)
//   LEDGER_AUDIT_TIMEOUT_SECS  per-request analysis timeout (default 30)
//   RUST_LOG                   log filter (default info)

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use ledger_audit::ingest::ledger_from_rows;
use ledger_audit::{
    AnalysisConfig, AnalysisPipeline, AnalysisResult, AuditError, CancellationToken, EntryRow,
    VERSION,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Shared application state
#[derive(Clone)]
struct AppState {
    pipeline: Arc<AnalysisPipeline>,
    timeout: Duration,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// POST /api/analyze body
#[derive(Deserialize)]
struct AnalyzeRequest {
    entries: Vec<EntryRow>,
    #[serde(default)]
    config: Option<AnalysisConfig>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::<()>::err(message))).into_response()
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok(HealthResponse {
        status: "OK",
        version: VERSION,
    }))
}

/// GET /api/config/default - Default analysis configuration
async fn default_config() -> impl IntoResponse {
    Json(ApiResponse::ok(AnalysisConfig::default()))
}

/// POST /api/analyze - Run the full pipeline over the posted entries
async fn analyze(State(state): State<AppState>, Json(request): Json<AnalyzeRequest>) -> Response {
    let ledger = match ledger_from_rows(request.entries) {
        Ok(ledger) => ledger,
        Err(e) => return failure(StatusCode::BAD_REQUEST, format!("{:#}", e)),
    };
    let config = request.config.unwrap_or_default();

    info!(entries = ledger.len(), "analysis requested");

    let pipeline = Arc::clone(&state.pipeline);
    let token = CancellationToken::with_timeout(state.timeout);
    let outcome = tokio::task::spawn_blocking(move || {
        pipeline.run_with_cancellation(&ledger, &config, &token)
    })
    .await;

    match outcome {
        Ok(Ok(result)) => (StatusCode::OK, Json(ApiResponse::<AnalysisResult>::ok(result))).into_response(),
        Ok(Err(e)) => {
            let status = match e {
                AuditError::Configuration { .. } => StatusCode::BAD_REQUEST,
                AuditError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                AuditError::Cancelled { .. } => StatusCode::REQUEST_TIMEOUT,
            };
            failure(status, e.to_string())
        }
        Err(e) => {
            error!("analysis task failed: {}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, "analysis task failed")
        }
    }
}

fn app(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/config/default", get(default_config))
        .route("/analyze", post(analyze))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let addr = std::env::var("LEDGER_AUDIT_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let timeout_secs = match std::env::var("LEDGER_AUDIT_TIMEOUT_SECS") {
        Ok(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("Invalid LEDGER_AUDIT_TIMEOUT_SECS: {}", raw))?,
        Err(_) => 30,
    };

    let state = AppState {
        pipeline: Arc::new(AnalysisPipeline::new()),
        timeout: Duration::from_secs(timeout_secs),
    };

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    println!("🌐 Ledger Audit - Web Server v{}", VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("🚀 Listening on http://{}", addr);
    println!("   POST /api/analyze");
    println!("   GET  /api/health");
    println!("   GET  /api/config/default");

    axum::serve(listener, app(state))
        .await
        .context("Server error")?;

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_app() -> Router {
        app(AppState {
            pipeline: Arc::new(AnalysisPipeline::new()),
            timeout: Duration::from_secs(30),
        })
    }

    async fn send(request: Request<Body>) -> (StatusCode, Value) {
        let response = test_app().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/analyze")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let request = Request::builder()
            .uri("/api/health")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "OK");
    }

    #[tokio::test]
    async fn test_default_config() {
        let request = Request::builder()
            .uri("/api/config/default")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["duplicate"]["window_days"], 3);
    }

    #[tokio::test]
    async fn test_analyze_flags_duplicate() {
        let body = json!({
            "entries": [
                {"entry_id": "A", "posted_at": "2024-06-03T10:00:00", "amount": 5000,
                 "account_code": "6000", "user_id": "alice"},
                {"entry_id": "B", "posted_at": "2024-06-04T10:00:00", "amount": 5000,
                 "account_code": "6000", "user_id": "alice"}
            ],
            "config": { "duplicate": { "window_days": 2 } }
        });
        let (status, body) = send(post_json(body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["summary"]["total_entries"], 2);
        assert_eq!(body["data"]["summary"]["flags_by_detector"]["duplicate"], 1);
    }

    #[tokio::test]
    async fn test_invalid_config_is_bad_request() {
        let body = json!({
            "entries": [],
            "config": { "risk": { "saturation_k": 0.0 } }
        });
        let (status, body) = send(post_json(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("saturation_k"));
    }

    #[tokio::test]
    async fn test_bad_row_is_bad_request() {
        let body = json!({
            "entries": [
                {"entry_id": "A", "posted_at": "someday", "amount": 1,
                 "account_code": "6000", "user_id": "alice"}
            ]
        });
        let (status, _) = send(post_json(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
