//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, provider status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks provider connections)
//! - `GET /metrics` - Prometheus metrics in text format
//!
//! Connectors start lazily, so a provider nobody has asked for yet counts
//! as ready.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::gateway::GatewayState;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::upstream::{ConnectionState, FeedSnapshot, ProviderHandle};

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Gateway version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Per-provider status.
    pub providers: Vec<ProviderInfo>,
    /// Open client sessions.
    pub sessions: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Some systems degraded but functional.
    Degraded,
    /// Critical systems unavailable.
    Unhealthy,
}

/// One provider's status.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    /// Whether the connection loop has been started.
    pub running: bool,
    /// Connection details.
    #[serde(flatten)]
    pub feed: FeedSnapshot,
    /// Subscription counts.
    pub subscriptions: SubscriptionInfo,
}

impl ProviderInfo {
    fn from_handle(handle: &ProviderHandle) -> Self {
        let stats = handle.registry.stats();
        Self {
            running: handle.connector.is_running(),
            feed: handle.connector.state().snapshot(),
            subscriptions: SubscriptionInfo {
                symbols: stats.symbols,
                routes: stats.routes,
                receivers: stats.receivers,
            },
        }
    }

    const fn is_connected(&self) -> bool {
        matches!(self.feed.state, ConnectionState::Connected)
    }

    /// Connected, or idle because nobody has subscribed yet.
    const fn is_ready(&self) -> bool {
        self.is_connected() || !self.running
    }
}

/// Subscription counts for one provider.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SubscriptionInfo {
    /// Symbols with at least one session.
    pub symbols: usize,
    /// Provider routes registered.
    pub routes: usize,
    /// Live channel receivers.
    pub receivers: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    gateway: Arc<GatewayState>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, gateway: Arc<GatewayState>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            gateway,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the health router.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);

    if response.providers.iter().all(ProviderInfo::is_ready) {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let providers: Vec<ProviderInfo> = state
        .gateway
        .providers()
        .iter()
        .map(ProviderInfo::from_handle)
        .collect();

    HealthResponse {
        status: determine_health_status(&providers),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        sessions: state.gateway.active_sessions(),
        providers,
    }
}

/// Healthy when every provider is ready and available, unhealthy when
/// running providers exist and none is connected, degraded otherwise.
fn determine_health_status(providers: &[ProviderInfo]) -> HealthStatus {
    let running = providers.iter().filter(|p| p.running).count();
    let connected = providers.iter().filter(|p| p.is_connected()).count();

    if providers.iter().all(|p| p.is_ready() && p.feed.available) {
        HealthStatus::Healthy
    } else if running > 0 && connected == 0 {
        HealthStatus::Unhealthy
    } else {
        HealthStatus::Degraded
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
