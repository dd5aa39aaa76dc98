//! HTTP surface for the usage meter

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::{MeterConfig, StoreBackend};
use crate::error::{MeterError, Result};
use crate::meter::{Decision, Outcome, QuotaPolicy, UsageMeter};
use crate::store::{MemoryStore, QuotaStore, RestStore};

/// Shared server state
pub struct AppState {
    pub meter: Arc<UsageMeter>,
}

/// Usage meter HTTP server
pub struct MeterServer {
    config: MeterConfig,
    state: Arc<AppState>,
}

/// Query for a read-only decision
#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub email: Option<String>,
}

/// Body for a record-use decision
#[derive(Debug, Default, Deserialize)]
pub struct RecordRequest {
    #[serde(default)]
    pub email: Option<String>,
}

/// JSON shape of a decision
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionBody {
    pub email: String,
    pub count: u64,
    pub allowed: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub exempt: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub write_error: bool,
}

impl From<&Decision> for DecisionBody {
    fn from(decision: &Decision) -> Self {
        Self {
            email: decision.identity.to_string(),
            count: decision.count,
            allowed: decision.allowed,
            exempt: decision.outcome == Outcome::Exempt,
            fallback: decision.outcome == Outcome::FailOpen,
            write_error: decision.outcome == Outcome::WriteFailed,
        }
    }
}

/// Response with error details
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

impl MeterServer {
    /// Create a new server from configuration
    pub fn new(config: MeterConfig) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn QuotaStore> = match config.store.backend {
            StoreBackend::Rest => Arc::new(RestStore::from_config(&config.store)?),
            StoreBackend::Memory => {
                warn!("Using in-memory quota store; usage is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        let meter = UsageMeter::new(store, QuotaPolicy::from_config(&config.quota))
            .with_key_prefix(config.store.key_prefix.clone());

        Ok(Self::with_meter(config, Arc::new(meter)))
    }

    /// Create a server around an existing meter
    pub fn with_meter(config: MeterConfig, meter: Arc<UsageMeter>) -> Self {
        Self {
            config,
            state: Arc::new(AppState { meter }),
        }
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Run the server until the listener fails
    pub async fn run(&self) -> Result<()> {
        let addr = &self.config.server.listen_addr;
        let meter = &self.state.meter;

        info!("Starting usage meter on {}", addr);
        info!(
            "Quota: {} free uses, store backend: {} ({})",
            meter.policy().max_free_uses(),
            meter.store().backend_name(),
            if meter.store().is_configured() {
                "configured"
            } else {
                "not configured, failing open"
            }
        );

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, self.router())
            .await
            .map_err(|e| MeterError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        Ok(())
    }
}

/// Build the router over shared state
pub fn router(state: Arc<AppState>) -> Router {
    // Answers every OPTIONS on /usage, with or without an Origin header
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_endpoint))
        .route("/ready", get(readiness_endpoint))
        .route(
            "/usage",
            get(check_usage)
                .post(record_usage)
                .fallback(method_not_allowed),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn client_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ApiError {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Catch-all reply when a request cannot be tracked at all
fn tracking_unavailable() -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "count": 0,
            "allowed": true,
            "error": "tracking_unavailable",
        })),
    )
        .into_response()
}

fn decision_response(result: Result<Decision>, missing_message: &str) -> Response {
    match result {
        Ok(decision) => (StatusCode::OK, Json(DecisionBody::from(&decision))).into_response(),
        Err(MeterError::InvalidIdentity(_)) => {
            client_error(StatusCode::BAD_REQUEST, missing_message)
        }
        Err(e) => {
            error!("Usage tracking error: {}", e);
            tracking_unavailable()
        }
    }
}

/// GET /usage?email=... - read-only decision
async fn check_usage(
    State(state): State<Arc<AppState>>,
    query: std::result::Result<Query<UsageQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(e) => {
            warn!("Unreadable usage query: {}", e);
            return client_error(StatusCode::BAD_REQUEST, "invalid query string");
        }
    };
    let email = query.email.unwrap_or_default();
    decision_response(
        state.meter.check(&email).await,
        "email parameter required",
    )
}

/// POST /usage {"email": ...} - count one use, then decide
async fn record_usage(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        RecordRequest::default()
    } else {
        match serde_json::from_slice::<RecordRequest>(&body) {
            Ok(request) => request,
            Err(e) => {
                warn!("Unreadable usage request body: {}", e);
                return tracking_unavailable();
            }
        }
    };

    let email = request.email.unwrap_or_default();
    decision_response(
        state.meter.record_and_check(&email).await,
        "email required in body",
    )
}

async fn method_not_allowed() -> Response {
    client_error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

/// Health check endpoint
async fn health_endpoint() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "meter-rs",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness endpoint - reports whether quotas are being enforced
async fn readiness_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.meter.store().is_configured() {
        (StatusCode::OK, "Ready")
    } else {
        (StatusCode::OK, "Degraded")
    }
}
