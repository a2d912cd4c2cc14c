//! Provider identity, coverage, and the handle sessions use to reach a feed.

use std::fmt;
use std::sync::Arc;

use super::connector::UpstreamConnector;
use crate::domain::symbol::Market;
use crate::infrastructure::broadcast::SubscriptionRegistry;

/// Upstream realtime providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// Korea Investment & Securities realtime feed.
    Kis,
    /// Finnhub trade feed.
    Finnhub,
}

impl Provider {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Kis => "kis",
            Self::Finnhub => "finnhub",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which symbols a provider is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// Every symbol.
    All,
    /// Only symbols outside the domestic market.
    ForeignOnly,
}

impl Coverage {
    /// Whether `symbol` is covered.
    #[must_use]
    pub fn covers(self, symbol: &str) -> bool {
        match self {
            Self::All => true,
            Self::ForeignOnly => Market::of(symbol) == Market::Foreign,
        }
    }
}

/// A wired provider: its registry, its connector, and what it covers.
#[derive(Clone)]
pub struct ProviderHandle {
    /// Registry sessions subscribe through.
    pub registry: Arc<SubscriptionRegistry>,
    /// Connector feeding the registry.
    pub connector: Arc<UpstreamConnector>,
    /// Symbols this provider is asked for.
    pub coverage: Coverage,
}

impl ProviderHandle {
    /// Provider name.
    #[must_use]
    pub fn provider(&self) -> Provider {
        self.connector.provider()
    }

    /// Whether a session should subscribe `symbol` here right now.
    #[must_use]
    pub fn accepts(&self, symbol: &str) -> bool {
        self.coverage.covers(symbol) && self.connector.is_available()
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("provider", &self.provider())
            .field("coverage", &self.coverage)
            .finish_non_exhaustive()
    }
}
