//! Ticker Resolver Port (Driven Port)
//!
//! Interface for normalizing raw client tickers into canonical symbols.

use async_trait::async_trait;

/// Ticker resolution error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// The input was empty after trimming.
    #[error("Ticker is blank")]
    Blank,

    /// The resolver could not map the input.
    #[error("Ticker {raw} could not be resolved: {message}")]
    Unresolvable { raw: String, message: String },
}

/// Port for ticker normalization.
#[async_trait]
pub trait TickerResolver: Send + Sync {
    /// Resolve `raw` to a canonical symbol, optionally forcing an exchange suffix.
    async fn resolve(&self, raw: &str, exchange: Option<&str>) -> Result<String, ResolveError>;
}
