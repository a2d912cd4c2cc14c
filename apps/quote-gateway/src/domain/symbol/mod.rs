//! Symbol Key Mapping
//!
//! Pure mapping from canonical client symbols (`005930.KS`, `AAPL`) to the
//! transaction id and transaction key a provider uses to identify a realtime
//! feed registration.
//!
//! # Rules
//!
//! - A symbol is domestic when its suffix is `KS`/`KQ` or when the part left
//!   of the first `.` is all digits. Only the recognised domestic suffixes
//!   count, so `7203.T` is domestic purely because `7203` is numeric.
//! - Domestic keys keep digits only, truncated to six.
//! - Foreign keys drop the suffix and are uppercased.

use std::fmt;
use std::str::FromStr;

// =============================================================================
// Types
// =============================================================================

/// A canonical client-facing symbol (e.g. `005930.KS`, `AAPL`).
pub type Symbol = String;

/// Length of a domestic KIS transaction key.
pub const DOMESTIC_KEY_LEN: usize = 6;

/// KIS realtime transaction identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrId {
    /// Domestic trade ticks.
    DomesticTrade,
    /// Domestic quotes.
    DomesticQuote,
    /// Foreign trade ticks.
    ForeignTrade,
    /// Foreign quotes.
    ForeignQuote,
}

impl TrId {
    /// Wire name of the transaction id.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DomesticTrade => "H0STCNT0",
            Self::DomesticQuote => "H0GSCNI0",
            Self::ForeignTrade => "HDFSCNT0",
            Self::ForeignQuote => "HDFSASP0",
        }
    }

    /// All transaction ids, in candidate-endpoint order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::DomesticTrade,
            Self::DomesticQuote,
            Self::ForeignTrade,
            Self::ForeignQuote,
        ]
    }
}

impl fmt::Display for TrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown transaction id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transaction id: {0}")]
pub struct UnknownTrId(pub String);

impl FromStr for TrId {
    type Err = UnknownTrId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| UnknownTrId(s.to_string()))
    }
}

/// Exchange suffix of a canonical symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeSuffix {
    /// KOSPI.
    Ks,
    /// KOSDAQ.
    Kq,
    /// NASDAQ.
    Nasdaq,
    /// NYSE.
    Nyse,
    /// NYSE American.
    Amex,
    /// Any other exchange.
    Other,
}

impl ExchangeSuffix {
    /// Parse a suffix case-insensitively. Unknown suffixes map to `Other`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "KS" => Self::Ks,
            "KQ" => Self::Kq,
            "NASDAQ" => Self::Nasdaq,
            "NYSE" => Self::Nyse,
            "AMEX" => Self::Amex,
            _ => Self::Other,
        }
    }

    /// Whether the suffix denotes a domestic (Korean) market.
    #[must_use]
    pub const fn is_domestic(self) -> bool {
        matches!(self, Self::Ks | Self::Kq)
    }
}

/// Market classification of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Market {
    /// Korean exchanges.
    Domestic,
    /// Everything else.
    Foreign,
}

impl Market {
    /// Classify a canonical symbol.
    #[must_use]
    pub fn of(symbol: &str) -> Self {
        let (left, suffix) = split_symbol(symbol);
        let by_suffix = suffix.is_some_and(|s| ExchangeSuffix::parse(s).is_domestic());
        let numeric = !left.is_empty() && left.chars().all(|c| c.is_ascii_digit());
        if by_suffix || numeric {
            Self::Domestic
        } else {
            Self::Foreign
        }
    }
}

/// A provider registration: transaction id plus transaction key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Route {
    /// Provider transaction id (`H0STCNT0`, `trade`, ...).
    pub tr_id: String,
    /// Provider transaction key (`005930`, `AAPL`, ...).
    pub tr_key: String,
}

impl Route {
    /// Create a route.
    #[must_use]
    pub fn new(tr_id: impl Into<String>, tr_key: impl Into<String>) -> Self {
        Self {
            tr_id: tr_id.into(),
            tr_key: tr_key.into(),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tr_id, self.tr_key)
    }
}

// =============================================================================
// Mapping Functions
// =============================================================================

fn split_symbol(symbol: &str) -> (&str, Option<&str>) {
    let trimmed = symbol.trim();
    match trimmed.split_once('.') {
        Some((left, suffix)) => (left, Some(suffix)),
        None => (trimmed, None),
    }
}

/// Transaction id for a canonical symbol.
#[must_use]
pub fn transaction_id(symbol: &str) -> TrId {
    match Market::of(symbol) {
        Market::Domestic => TrId::DomesticTrade,
        Market::Foreign => TrId::ForeignTrade,
    }
}

/// Transaction key for a canonical symbol.
#[must_use]
pub fn transaction_key(symbol: &str) -> String {
    let (left, _) = split_symbol(symbol);
    match Market::of(symbol) {
        Market::Domestic => {
            let digits: String = left
                .chars()
                .filter(char::is_ascii_digit)
                .take(DOMESTIC_KEY_LEN)
                .collect();
            if digits.is_empty() {
                left.to_ascii_uppercase()
            } else {
                digits
            }
        }
        Market::Foreign => left.to_ascii_uppercase(),
    }
}

// =============================================================================
// Routers
// =============================================================================

/// Maps symbols to provider routes.
pub trait SymbolRouter: Send + Sync {
    /// Route for a canonical symbol.
    fn route(&self, symbol: &str) -> Route;
}

/// Router for the KIS realtime feed.
#[derive(Debug, Clone, Copy, Default)]
pub struct KisRouter;

impl SymbolRouter for KisRouter {
    fn route(&self, symbol: &str) -> Route {
        Route::new(transaction_id(symbol).as_str(), transaction_key(symbol))
    }
}

/// Router for the Finnhub trade feed. Keys are the uppercased symbol.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinnhubRouter;

/// Transaction id used for every Finnhub route.
pub const FINNHUB_TRADE: &str = "trade";

impl SymbolRouter for FinnhubRouter {
    fn route(&self, symbol: &str) -> Route {
        Route::new(FINNHUB_TRADE, symbol.trim().to_ascii_uppercase())
    }
}
