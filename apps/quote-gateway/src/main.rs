//! Quote Gateway Binary
//!
//! Starts the realtime quote gateway.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-gateway
//! ```
//!
//! # Environment Variables
//!
//! ## Providers (each is enabled only when its credentials are set)
//! - `KIS_APP_KEY`, `KIS_APP_SECRET`: KIS application credentials
//! - `KIS_WS_ENABLED`: Set to "false" to skip KIS (default: true)
//! - `KIS_WS_URL`, `KIS_REST_URL`, `KIS_APPROVAL_PATH`, `KIS_MAX_SYMBOLS`
//! - `FINNHUB_API_KEY`, `FINNHUB_WS_URL`
//!
//! ## Servers
//! - `GATEWAY_PORT`: WebSocket gateway port (default: 8080)
//! - `GATEWAY_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `GATEWAY_HEARTBEAT_SECS`: Default client heartbeat (default: 15)
//!
//! ## Telemetry
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: quote-gateway)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use quote_gateway::application::services::ResolutionLimits;
use quote_gateway::infrastructure::gateway::{GatewayServer, GatewayState};
use quote_gateway::infrastructure::health::{HealthServer, HealthServerState};
use quote_gateway::infrastructure::resolver::RuleBasedTickerResolver;
use quote_gateway::infrastructure::telemetry;
use quote_gateway::infrastructure::upstream::{ProviderHandle, Transport, WsTransport};
use quote_gateway::infrastructure::{finnhub, kis};
use quote_gateway::{GatewayConfig, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// How long connectors get to unsubscribe and close after shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
#[allow(clippy::expect_used)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Quote Gateway");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = GatewayConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let providers = build_providers(&config, shutdown_token.child_token())?;
    if providers.is_empty() {
        tracing::warn!("No realtime provider configured, sessions will only receive heartbeats");
    }

    let gateway_state = Arc::new(GatewayState::new(
        providers.clone(),
        Arc::new(RuleBasedTickerResolver::new()),
        ResolutionLimits {
            per_symbol: config.gateway.resolve_timeout,
            batch: config.gateway.resolve_batch_timeout,
        },
        config.gateway.heartbeat_interval,
        shutdown_token.clone(),
    ));

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&gateway_state),
    ));
    let health_server = HealthServer::new(
        config.gateway.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn gateway server
    let gateway_server = GatewayServer::new(
        config.gateway.port,
        gateway_state,
        shutdown_token.clone(),
    );
    let gateway_task = tokio::spawn(async move {
        if let Err(e) = gateway_server.run().await {
            tracing::error!(error = %e, "Gateway server error");
        }
    });

    tracing::info!("Quote gateway ready");

    await_shutdown(shutdown_token).await;

    for handle in &providers {
        if !handle.connector.join(SHUTDOWN_TIMEOUT).await {
            tracing::warn!(provider = %handle.provider(), "Connector did not stop in time");
        }
    }
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, gateway_task).await;

    tracing::info!("Quote gateway stopped");
    Ok(())
}

/// Wire every configured provider. KIS comes first so it is preferred.
fn build_providers(
    config: &GatewayConfig,
    cancel: CancellationToken,
) -> Result<Vec<ProviderHandle>, Box<dyn std::error::Error>> {
    let transport: Arc<dyn Transport> = Arc::new(WsTransport);
    let capacity = config.gateway.channel_capacity;
    let mut providers = Vec::new();

    if config.kis.is_active() {
        providers.push(kis::build_provider(
            &config.kis,
            &config.upstream,
            capacity,
            Arc::clone(&transport),
            cancel.clone(),
        )?);
    } else {
        tracing::info!("KIS provider disabled");
    }

    if config.finnhub.is_active() {
        providers.push(finnhub::build_provider(
            &config.finnhub,
            &config.upstream,
            capacity,
            transport,
            cancel,
        ));
    } else {
        tracing::info!("Finnhub provider disabled");
    }

    Ok(providers)
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &GatewayConfig) {
    tracing::info!(
        providers = ?config.active_providers(),
        port = config.gateway.port,
        health_port = config.gateway.health_port,
        heartbeat_secs = config.gateway.heartbeat_interval.as_secs(),
        channel_capacity = config.gateway.channel_capacity,
        "Configuration loaded"
    );
    tracing::debug!(
        kis_ws_url = %config.kis.ws_url,
        kis_rest_url = %config.kis.rest_url,
        finnhub_ws_url = %config.finnhub.ws_url,
        "Upstream endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
