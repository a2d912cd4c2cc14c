//! Rule-based ticker resolver.
//!
//! Normalizes user input into canonical symbols without any lookup:
//!
//! | Input            | Exchange | Result      |
//! |------------------|----------|-------------|
//! | ` aapl `         |          | `AAPL`      |
//! | `005930`         |          | `005930.KS` |
//! | `035720`         | `kq`     | `035720.KQ` |
//! | `7203.T`         | `KS`     | `7203.T`    |
//! | `^ks11`          |          | `^KS11`     |

use async_trait::async_trait;

use crate::application::ports::{ResolveError, TickerResolver};
use crate::domain::symbol::DOMESTIC_KEY_LEN;

/// Resolver that applies fixed normalization rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedTickerResolver;

impl RuleBasedTickerResolver {
    /// Create a resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Apply the rules synchronously.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Blank`] for blank input.
    pub fn normalize(raw: &str, exchange: Option<&str>) -> Result<String, ResolveError> {
        let ticker = raw.trim().to_uppercase();
        if ticker.is_empty() {
            return Err(ResolveError::Blank);
        }

        if ticker.contains('.') || ticker.starts_with('^') {
            return Ok(ticker);
        }

        let exchange = exchange
            .map(|e| e.trim().trim_start_matches('.').to_uppercase())
            .filter(|e| !e.is_empty());
        if let Some(exchange) = exchange {
            return Ok(format!("{ticker}.{exchange}"));
        }

        if ticker.len() == DOMESTIC_KEY_LEN && ticker.chars().all(|c| c.is_ascii_digit()) {
            return Ok(format!("{ticker}.KS"));
        }

        Ok(ticker)
    }
}

#[async_trait]
impl TickerResolver for RuleBasedTickerResolver {
    async fn resolve(&self, raw: &str, exchange: Option<&str>) -> Result<String, ResolveError> {
        Self::normalize(raw, exchange)
    }
}
