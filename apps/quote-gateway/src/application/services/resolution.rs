//! Batch ticker resolution.
//!
//! Every ticker is resolved concurrently under its own timeout, and the whole
//! batch under an aggregate deadline. Anything that fails, times out, or is
//! still pending at the deadline falls back to the raw input.

use std::collections::HashSet;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::time::{Instant, timeout, timeout_at};

use crate::application::ports::TickerResolver;
use crate::domain::symbol::Symbol;

/// Timeouts applied to a resolution batch.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionLimits {
    /// Timeout for each individual ticker.
    pub per_symbol: Duration,
    /// Deadline for the whole batch.
    pub batch: Duration,
}

impl Default for ResolutionLimits {
    fn default() -> Self {
        Self {
            per_symbol: Duration::from_secs(5),
            batch: Duration::from_secs(10),
        }
    }
}

/// Outcome of a resolution batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedTickers {
    /// Canonical symbols, de-duplicated, in request order.
    pub symbols: Vec<Symbol>,
    /// How many inputs fell back to their raw value.
    pub fallbacks: usize,
}

/// Resolve `raws` through `resolver`.
pub async fn resolve_tickers(
    resolver: &dyn TickerResolver,
    raws: &[String],
    exchange: Option<&str>,
    limits: ResolutionLimits,
) -> ResolvedTickers {
    let deadline = Instant::now() + limits.batch;
    let mut resolved: Vec<Option<Symbol>> = vec![None; raws.len()];

    let mut pending: FuturesUnordered<_> = raws
        .iter()
        .enumerate()
        .map(|(index, raw)| async move {
            let outcome = timeout(limits.per_symbol, resolver.resolve(raw, exchange)).await;
            (index, outcome)
        })
        .collect();

    loop {
        match timeout_at(deadline, pending.next()).await {
            Ok(Some((index, Ok(Ok(symbol))))) => resolved[index] = Some(symbol),
            Ok(Some((index, Ok(Err(e))))) => {
                tracing::debug!(ticker = %raws[index], error = %e, "Ticker resolution failed, using raw symbol");
            }
            Ok(Some((index, Err(_)))) => {
                tracing::debug!(ticker = %raws[index], "Ticker resolution timed out, using raw symbol");
            }
            Ok(None) => break,
            Err(_) => {
                tracing::warn!(
                    pending = pending.len(),
                    "Ticker resolution batch deadline reached, using raw symbols"
                );
                break;
            }
        }
    }

    let mut seen = HashSet::new();
    let mut outcome = ResolvedTickers::default();
    for (raw, symbol) in raws.iter().zip(resolved) {
        let symbol = symbol.unwrap_or_else(|| {
            outcome.fallbacks += 1;
            raw.trim().to_string()
        });
        if !symbol.is_empty() && seen.insert(symbol.clone()) {
            outcome.symbols.push(symbol);
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::ResolveError;

    /// Resolver that appends `.KS`, fails on `BAD`, and hangs on `SLOW`.
    struct FakeResolver;

    #[async_trait]
    impl TickerResolver for FakeResolver {
        async fn resolve(&self, raw: &str, _exchange: Option<&str>) -> Result<String, ResolveError> {
            match raw {
                "BAD" => Err(ResolveError::Unresolvable {
                    raw: raw.to_string(),
                    message: "nope".to_string(),
                }),
                "SLOW" => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok("NEVER".to_string())
                }
                other => Ok(format!("{other}.KS")),
            }
        }
    }

    fn raws(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn resolves_all_in_order() {
        let out = resolve_tickers(
            &FakeResolver,
            &raws(&["005930", "000660"]),
            None,
            ResolutionLimits::default(),
        )
        .await;
        assert_eq!(out.symbols, vec!["005930.KS", "000660.KS"]);
        assert_eq!(out.fallbacks, 0);
    }

    #[tokio::test]
    async fn failure_falls_back_to_raw() {
        let out = resolve_tickers(
            &FakeResolver,
            &raws(&["BAD", "005930"]),
            None,
            ResolutionLimits::default(),
        )
        .await;
        assert_eq!(out.symbols, vec!["BAD", "005930.KS"]);
        assert_eq!(out.fallbacks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn per_symbol_timeout_falls_back() {
        let limits = ResolutionLimits {
            per_symbol: Duration::from_millis(50),
            batch: Duration::from_secs(10),
        };
        let out = resolve_tickers(&FakeResolver, &raws(&["SLOW", "1"]), None, limits).await;
        assert_eq!(out.symbols, vec!["SLOW", "1.KS"]);
        assert_eq!(out.fallbacks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_deadline_falls_back() {
        let limits = ResolutionLimits {
            per_symbol: Duration::from_secs(3600 * 2),
            batch: Duration::from_millis(100),
        };
        let out = resolve_tickers(&FakeResolver, &raws(&["SLOW", "1"]), None, limits).await;
        assert_eq!(out.symbols, vec!["SLOW", "1.KS"]);
    }

    #[tokio::test]
    async fn duplicates_collapse() {
        let out = resolve_tickers(
            &FakeResolver,
            &raws(&["005930", "005930", "BAD", "BAD"]),
            None,
            ResolutionLimits::default(),
        )
        .await;
        assert_eq!(out.symbols, vec!["005930.KS", "BAD"]);
    }
}
