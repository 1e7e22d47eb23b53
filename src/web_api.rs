//! HTTP API server.
//!
//! ## Endpoints
//!
//! - `POST /register-client` — register a client, mint an API key
//! - `POST /analyze-performance` — run the analysis pipeline (bearer auth)
//! - `POST /client-metrics` — analyze against the registered domain (bearer auth)
//! - `POST /register-webhook` — register a notification URL (bearer auth)
//! - `POST /test-webhook` — send a test notification (bearer auth)
//! - `GET  /health` — health check
//! - `GET  /metrics` — Prometheus metrics
//!
//! Authentication is static API-key equality: the `Authorization` header
//! is matched against `clients.api_key`, with an optional `Bearer ` prefix.
//! An unknown or missing key is rejected before the pipeline runs.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::pipeline::AnalysisPipeline;
use crate::store::{ClientRecord, Store};
use crate::webhook::{self, WebhookNotifier};
use crate::{metrics, AnalysisReport, MetricsSnapshot};

/// Service name reported by the health endpoint.
pub const SERVICE_NAME: &str = "clientpulse";

// ============================================================================
// Types & Configuration
// ============================================================================

/// Configuration for the HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address or hostname to bind to (e.g. `"0.0.0.0"` for all interfaces).
    pub host: String,
    /// TCP port the server listens on.
    pub port: u16,
    /// Maximum allowed request body size in bytes.
    pub max_request_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_request_size: 1024 * 1024, // 1MB
        }
    }
}

/// Shared application state available to all handlers.
///
/// Collaborators are injected at construction; none hold mutable state, so
/// one `AppState` serves all concurrent requests.
pub struct AppState {
    /// Client / experiment / webhook persistence.
    pub store: Store,
    /// The analysis pipeline run per authenticated submission.
    pub pipeline: AnalysisPipeline,
    /// Outbound webhook delivery.
    pub notifier: WebhookNotifier,
}

/// JSON body for `POST /register-client`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterClientRequest {
    /// Client display name.
    pub client_name: String,
    /// Business domain the client operates in.
    pub domain: String,
}

/// JSON response for `POST /register-client`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterClientResponse {
    /// Generated client id.
    pub client_id: i64,
    /// Minted API key; presented as a bearer token on later calls.
    pub api_key: String,
    /// Human-readable confirmation.
    pub message: String,
}

/// JSON body for `POST /analyze-performance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    /// Business domain tag to analyze under.
    pub domain: String,
    /// Named numeric metrics; may be empty.
    pub metrics: MetricsSnapshot,
}

/// JSON response for `POST /analyze-performance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    /// Always `"success"` on 200.
    pub status: String,
    /// Name of the authenticated client.
    pub client: String,
    /// The full analysis report.
    pub analysis: AnalysisReport,
}

/// JSON body for `POST /client-metrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMetricsRequest {
    /// Named numeric metrics; must be non-empty.
    pub metrics: MetricsSnapshot,
}

/// JSON response for `POST /client-metrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMetricsResponse {
    /// Always `"success"` on 200.
    pub status: String,
    /// Name of the authenticated client.
    pub client: String,
    /// Opaque identifier for this analysis.
    pub analysis_id: String,
    /// Identified performance gaps.
    pub performance_gaps: Vec<String>,
    /// Implement/reject recommendations.
    pub recommendations: Vec<String>,
    /// Names of the metrics that were received.
    pub metrics_received: Vec<String>,
    /// RFC 3339 completion time.
    pub analysis_timestamp: String,
}

/// JSON body for `POST /register-webhook`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWebhookRequest {
    /// URL to POST notifications to.
    pub webhook_url: String,
    /// Event kinds the client wants; defaults to `"all"`.
    #[serde(default)]
    pub event_types: Option<String>,
}

// ============================================================================
// Errors
// ============================================================================

/// HTTP-boundary errors, mapped to status codes with JSON bodies.
enum ApiError {
    Unauthorized(&'static str),
    BadRequest(&'static str),
    NotFound(&'static str),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.to_string()),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.to_string()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.to_string()),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

// ============================================================================
// Server
// ============================================================================

/// Start the HTTP server.
///
/// Binds to `config.host:config.port` and serves until shutdown.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
///
/// # Panics
///
/// This function never panics.
pub async fn start_server(
    config: ServerConfig,
    state: AppState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("{}:{}", config.host, config.port);

    info!(target: "clientpulse::web", "Starting API server on http://{addr}");

    let state = Arc::new(state);

    let app = Router::new()
        .route("/register-client", post(register_client_handler))
        .route("/analyze-performance", post(analyze_handler))
        .route("/client-metrics", post(client_metrics_handler))
        .route("/register-webhook", post(register_webhook_handler))
        .route("/test-webhook", post(test_webhook_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn_with_state(
            config.max_request_size,
            body_size_middleware,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(target: "clientpulse::web", "API ready on http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Middleware
// ============================================================================

/// Adds a unique `X-Request-ID` header to every response.
///
/// A client-supplied `X-Request-ID` is preserved; otherwise a new UUID v4
/// is generated.
async fn request_id_middleware(req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    response
}

/// Rejects requests whose `Content-Length` exceeds `max_size` with 413.
async fn body_size_middleware(
    State(max_size): State<usize>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(content_length) = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<usize>().ok())
    {
        if content_length > max_size {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(serde_json::json!({"error": "Request body too large"})),
            )
                .into_response();
        }
    }

    next.run(req).await
}

// ============================================================================
// Authentication
// ============================================================================

/// Resolve the `Authorization` header to an active client.
///
/// Accepts the raw key or a `Bearer `-prefixed one. Runs before any
/// pipeline work; an unknown key never reaches the analysis stages.
fn authenticate(store: &Store, headers: &HeaderMap) -> Result<ClientRecord, ApiError> {
    let raw = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized("Missing API key"))?;

    let api_key = raw.strip_prefix("Bearer ").unwrap_or(raw);

    store
        .client_by_api_key(api_key)
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::Unauthorized("Invalid API key"))
}

// ============================================================================
// Handlers
// ============================================================================

/// `POST /register-client`
async fn register_client_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterClientRequest>,
) -> Result<Json<RegisterClientResponse>, ApiError> {
    if req.client_name.is_empty() {
        return Err(ApiError::BadRequest("client_name must not be empty"));
    }

    let client = state
        .store
        .register_client(&req.client_name, &req.domain)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    info!(
        target: "clientpulse::web",
        client_id = client.id,
        domain = %client.domain,
        "client registered"
    );

    Ok(Json(RegisterClientResponse {
        client_id: client.id,
        api_key: client.api_key,
        message: "Client registered successfully".to_string(),
    }))
}

/// `POST /analyze-performance`
async fn analyze_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let client = authenticate(&state.store, &headers)?;

    let analysis = state
        .pipeline
        .analyze(client.id, &req.domain, &req.metrics)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    notify_new_recommendation(&state, &client, &analysis);

    Ok(Json(AnalyzeResponse {
        status: "success".to_string(),
        client: client.name,
        analysis,
    }))
}

/// `POST /client-metrics`
///
/// Like `/analyze-performance`, but analyzes against the domain the client
/// registered under and logs one audit experiment row for the call.
async fn client_metrics_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ClientMetricsRequest>,
) -> Result<Json<ClientMetricsResponse>, ApiError> {
    let client = authenticate(&state.store, &headers)?;

    if req.metrics.is_empty() {
        return Err(ApiError::BadRequest("No metrics provided"));
    }

    let metric_names: Vec<String> = req.metrics.keys().cloned().collect();

    let analysis = state
        .pipeline
        .analyze(client.id, &client.domain, &req.metrics)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    state
        .store
        .insert_experiment(
            client.id,
            "API-driven metric analysis",
            "api_analysis",
            "completed",
            &format!("Metrics analyzed: {metric_names:?}"),
        )
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    notify_new_recommendation(&state, &client, &analysis);

    let now = chrono::Utc::now();
    Ok(Json(ClientMetricsResponse {
        status: "success".to_string(),
        client: client.name,
        analysis_id: format!("analysis_{}_{}", client.id, now.format("%Y%m%d_%H%M%S")),
        performance_gaps: analysis.performance_gaps,
        recommendations: analysis.recommendations,
        metrics_received: metric_names,
        analysis_timestamp: now.to_rfc3339(),
    }))
}

/// `POST /register-webhook`
async fn register_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RegisterWebhookRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let client = authenticate(&state.store, &headers)?;

    if req.webhook_url.is_empty() {
        return Err(ApiError::BadRequest("webhook_url must not be empty"));
    }

    let event_types = req.event_types.as_deref().unwrap_or("all");
    let webhook_id = state
        .store
        .register_webhook(client.id, &req.webhook_url, event_types)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "message": "Webhook registered successfully",
        "webhook_id": webhook_id,
    })))
}

/// `POST /test-webhook`
async fn test_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let client = authenticate(&state.store, &headers)?;

    let hook = state
        .store
        .webhook_for_client(client.id)
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::NotFound("No webhook registered"))?;

    let payload = webhook::new_recommendation_alert(
        &client.name,
        "Test recommendation - your webhook is working!",
    );

    if state.notifier.deliver(&hook.webhook_url, &payload).await {
        Ok(Json(serde_json::json!({
            "status": "success",
            "message": "Test webhook sent successfully",
        })))
    } else {
        Ok(Json(serde_json::json!({
            "status": "error",
            "message": "Failed to send test webhook",
        })))
    }
}

/// `GET /health`
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy", "service": SERVICE_NAME }))
}

/// `GET /metrics`
async fn metrics_handler() -> String {
    metrics::gather_metrics()
}

// ============================================================================
// Webhook notification
// ============================================================================

/// Fire-and-forget `new_recommendation` notification after a successful run.
///
/// Spawned and never awaited: delivery failures are logged by the notifier
/// and cannot affect the HTTP response. Best effort, single attempt.
fn notify_new_recommendation(state: &Arc<AppState>, client: &ClientRecord, report: &AnalysisReport) {
    let Some(first) = report.recommendations.first() else {
        return;
    };

    let hook = match state.store.webhook_for_client(client.id) {
        Ok(Some(hook)) => hook,
        Ok(None) => return,
        Err(e) => {
            warn!(target: "clientpulse::web", error = %e, "webhook lookup failed");
            return;
        }
    };

    let notifier = state.notifier.clone();
    let payload = webhook::new_recommendation_alert(&client.name, first);
    tokio::spawn(async move {
        notifier.deliver(&hook.webhook_url, &payload).await;
    });
}
