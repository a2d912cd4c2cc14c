#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Quote Gateway - Realtime Quote Multiplexer
//!
//! A WebSocket gateway that holds one upstream connection per realtime
//! provider (KIS, Finnhub) and fans ticks out to any number of client
//! sessions. Upstream subscriptions are reference counted: the first
//! session asking for a symbol subscribes it upstream, the last one to
//! leave unsubscribes it.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and logic
//!   - `symbol`: Symbol to provider route mapping
//!   - `quote`: Ticks and client frames
//!   - `subscription`: Reference-counted subscription book
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Approval key issuer, ticker resolver
//!   - `services`: Batch ticker resolution, tick de-duplication
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `upstream`: Generic connector, transport, backoff, heartbeat
//!   - `kis`, `finnhub`: Provider codecs and wiring
//!   - `broadcast`: Per-symbol channels and leases
//!   - `gateway`: Client WebSocket server
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! KIS WS ─────► Connector ──► Registry ──┐
//!                                         ├──► Session ──► Client 1
//! Finnhub WS ─► Connector ──► Registry ──┤
//!                                         └──► Session ──► Client N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core quote types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::quote::{ClientFrame, Tick};
pub use domain::subscription::{SubscriptionBook, UpstreamCommand};
pub use domain::symbol::{Route, Symbol, SymbolRouter, TrId};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, FinnhubSettings, GatewayConfig, GatewaySettings, KisSettings, UpstreamSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Gateway server
pub use infrastructure::gateway::{GatewayServer, GatewayServerError, GatewayState};

// Subscription registry (for integration tests)
pub use infrastructure::broadcast::{RegistryStats, SubscriptionLease, SubscriptionRegistry};

// Upstream connectivity (for integration tests)
pub use infrastructure::upstream::{
    ConnectionState, ConnectorConfig, Coverage, Provider, ProviderHandle, UpstreamConnector,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
