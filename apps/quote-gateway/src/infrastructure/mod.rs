//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Provider-independent upstream connection machinery.
pub mod upstream;

/// KIS realtime feed adapter.
pub mod kis;

/// Finnhub trade feed adapter.
pub mod finnhub;

/// Reference-counted symbol channels.
pub mod broadcast;

/// Client-facing WebSocket server.
pub mod gateway;

/// Rule-based ticker normalization.
pub mod resolver;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
