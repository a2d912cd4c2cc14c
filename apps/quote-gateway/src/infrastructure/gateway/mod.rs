//! Client-facing WebSocket Gateway
//!
//! Serves realtime quotes over `GET /ws/quotes`.
//!
//! # Query parameters
//!
//! - `tickers` - comma-separated symbols (required)
//! - `exchange` - suffix applied to every symbol that lacks one
//! - `intervalSec` - heartbeat period, never below 2 seconds
//!
//! # Frames
//!
//! ```text
//! {"symbol":"005930.KS","price":71200.0,"dp":-0.0042}
//! {"hb":1}
//! {"error":"tickers required"}
//! ```

pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State, ws::WebSocketUpgrade},
    response::Response,
    routing::get,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use session::{EMPTY_TICKERS_ERROR, SessionRequest};

use crate::application::ports::TickerResolver;
use crate::application::services::ResolutionLimits;
use crate::infrastructure::upstream::ProviderHandle;

/// Smallest heartbeat period a client may ask for.
pub const MIN_HEARTBEAT: Duration = Duration::from_secs(2);

// =============================================================================
// Query Parsing
// =============================================================================

/// Raw query string of `/ws/quotes`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuoteParams {
    /// Comma-separated tickers.
    pub tickers: Option<String>,
    /// Exchange override.
    pub exchange: Option<String>,
    /// Heartbeat hint in seconds.
    #[serde(rename = "intervalSec")]
    pub interval_sec: Option<String>,
}

impl QuoteParams {
    /// Tickers, trimmed, with blanks removed.
    #[must_use]
    pub fn tickers(&self) -> Vec<String> {
        self.tickers
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Exchange override, if one was given.
    #[must_use]
    pub fn exchange(&self) -> Option<String> {
        self.exchange
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
    }

    /// Heartbeat period: the hint clamped to [`MIN_HEARTBEAT`], or `default`.
    #[must_use]
    pub fn heartbeat(&self, default: Duration) -> Duration {
        self.interval_sec
            .as_deref()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, |secs| Duration::from_secs(secs).max(MIN_HEARTBEAT))
    }

    /// Build the session request.
    #[must_use]
    pub fn into_request(self, default_heartbeat: Duration) -> SessionRequest {
        SessionRequest {
            tickers: self.tickers(),
            exchange: self.exchange(),
            heartbeat: self.heartbeat(default_heartbeat),
        }
    }
}

// =============================================================================
// Gateway State
// =============================================================================

/// Everything a session needs.
pub struct GatewayState {
    providers: Vec<ProviderHandle>,
    resolver: Arc<dyn TickerResolver>,
    limits: ResolutionLimits,
    heartbeat: Duration,
    sessions: AtomicUsize,
    cancel: CancellationToken,
}

impl GatewayState {
    /// Create gateway state.
    #[must_use]
    pub fn new(
        providers: Vec<ProviderHandle>,
        resolver: Arc<dyn TickerResolver>,
        limits: ResolutionLimits,
        heartbeat: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            providers,
            resolver,
            limits,
            heartbeat: heartbeat.max(MIN_HEARTBEAT),
            sessions: AtomicUsize::new(0),
            cancel,
        }
    }

    /// Wired providers, in preference order.
    #[must_use]
    pub fn providers(&self) -> &[ProviderHandle] {
        &self.providers
    }

    /// Default heartbeat period.
    #[must_use]
    pub const fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    /// Open client sessions.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }

    fn session_opened(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    fn session_closed(&self) {
        self.sessions.fetch_sub(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("providers", &self.providers)
            .field("limits", &self.limits)
            .field("heartbeat", &self.heartbeat)
            .field("sessions", &self.active_sessions())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Gateway Server
// =============================================================================

/// Build the gateway router.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/ws/quotes", get(quotes_handler))
        .with_state(state)
}

async fn quotes_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<QuoteParams>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    let request = params.into_request(state.heartbeat);
    ws.on_upgrade(move |socket| session::run(socket, request, state))
}

/// WebSocket gateway server.
pub struct GatewayServer {
    port: u16,
    state: Arc<GatewayState>,
    cancel: CancellationToken,
}

impl GatewayServer {
    /// Create a new gateway server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<GatewayState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Bind the configured port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `GatewayServerError` if binding fails or the server stops
    /// with an error.
    pub async fn run(self) -> Result<(), GatewayServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayServerError::BindFailed(self.port, e.to_string()))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `GatewayServerError` if the server stops with an error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), GatewayServerError> {
        let local = listener
            .local_addr()
            .map_err(|e| GatewayServerError::ServerFailed(e.to_string()))?;
        tracing::info!(addr = %local, "Quote gateway listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| GatewayServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Quote gateway stopped");
        Ok(())
    }
}

/// Gateway server errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
