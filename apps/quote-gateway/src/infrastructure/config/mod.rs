//! Configuration Module
//!
//! Configuration loading for the quote gateway.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_FINNHUB_WS_URL, DEFAULT_KIS_MAX_SYMBOLS, FinnhubSettings, GatewayConfig,
    GatewaySettings, KisSettings, UpstreamSettings,
};
