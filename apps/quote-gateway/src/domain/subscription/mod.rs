//! Subscription Book
//!
//! Reference counting for symbol interest, plus the provider-route mapping
//! used to fan a tick out to every canonical symbol that routes to the same
//! transaction id and key.
//!
//! # Design
//!
//! The book tracks:
//! - How many leases are held for each canonical symbol
//! - Which provider route each active symbol maps to
//! - Which canonical symbols share a provider route
//!
//! Upstream commands are decided per route: a route is subscribed when its
//! symbol set becomes non-empty and unsubscribed when it empties again. Two
//! symbols with the same key on different transaction ids (`ABC.KS` and
//! `ABC`) are separate routes.
//! With a one-to-one mapping this is exactly one command per symbol 0→1/1→0.
//!
//! The book itself is not synchronized; the registry owns it behind a lock.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::domain::symbol::{Route, Symbol};

// =============================================================================
// Upstream Commands
// =============================================================================

/// A registration change to send to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UpstreamCommand {
    /// Start receiving ticks for a route.
    Subscribe(Route),
    /// Stop receiving ticks for a route.
    Unsubscribe(Route),
}

impl UpstreamCommand {
    /// The route the command applies to.
    #[must_use]
    pub const fn route(&self) -> &Route {
        match self {
            Self::Subscribe(route) | Self::Unsubscribe(route) => route,
        }
    }

    /// Metric label for the command.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
        }
    }
}

// =============================================================================
// Transitions
// =============================================================================

/// Result of acquiring interest in a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquired {
    /// Refcount after the call.
    pub refcount: usize,
    /// Route to subscribe upstream, if it just became active.
    pub subscribe: Option<Route>,
}

impl Acquired {
    /// Whether this call created the symbol entry (0→1).
    #[must_use]
    pub const fn is_first(&self) -> bool {
        self.refcount == 1
    }
}

/// Result of releasing interest in a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Released {
    /// The symbol was not tracked.
    Unknown,
    /// Refcount decremented but still positive.
    Remaining(usize),
    /// Refcount reached zero and the symbol entry was removed.
    Last {
        /// Route to unsubscribe upstream, if it became idle.
        unsubscribe: Option<Route>,
    },
}

// =============================================================================
// Book
// =============================================================================

/// Refcount and provider-route bookkeeping for one provider.
#[derive(Debug, Default)]
pub struct SubscriptionBook {
    refcounts: HashMap<Symbol, usize>,
    symbol_routes: HashMap<Symbol, Route>,
    routes: HashMap<Route, HashSet<Symbol>>,
}

impl SubscriptionBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one more holder of `symbol`, which routes to `route`.
    pub fn acquire(&mut self, symbol: &str, route: &Route) -> Acquired {
        let refcount = self.refcounts.entry(symbol.to_string()).or_insert(0);
        *refcount += 1;
        let refcount = *refcount;

        if refcount > 1 {
            return Acquired {
                refcount,
                subscribe: None,
            };
        }

        self.symbol_routes
            .insert(symbol.to_string(), route.clone());
        let symbols = self.routes.entry(route.clone()).or_default();
        let route_was_idle = symbols.is_empty();
        symbols.insert(symbol.to_string());

        Acquired {
            refcount,
            subscribe: route_was_idle.then(|| route.clone()),
        }
    }

    /// Drop one holder of `symbol`.
    pub fn release(&mut self, symbol: &str) -> Released {
        let Some(refcount) = self.refcounts.get_mut(symbol) else {
            return Released::Unknown;
        };

        *refcount = refcount.saturating_sub(1);
        if *refcount > 0 {
            return Released::Remaining(*refcount);
        }

        self.refcounts.remove(symbol);
        let Some(route) = self.symbol_routes.remove(symbol) else {
            return Released::Last { unsubscribe: None };
        };

        let mut unsubscribe = None;
        if let Some(symbols) = self.routes.get_mut(&route) {
            symbols.remove(symbol);
            if symbols.is_empty() {
                self.routes.remove(&route);
                unsubscribe = Some(route);
            }
        }

        Released::Last { unsubscribe }
    }

    /// Canonical symbols subscribed through `route`.
    #[must_use]
    pub fn symbols_for_route(&self, route: &Route) -> Vec<&Symbol> {
        self.routes
            .get(route)
            .map(|symbols| symbols.iter().collect())
            .unwrap_or_default()
    }

    /// Current refcount for a symbol (0 when untracked).
    #[must_use]
    pub fn refcount(&self, symbol: &str) -> usize {
        self.refcounts.get(symbol).copied().unwrap_or(0)
    }

    /// Routes with at least one holder, in stable order.
    #[must_use]
    pub fn active_routes(&self) -> BTreeSet<Route> {
        self.routes.keys().cloned().collect()
    }

    /// Symbols with at least one holder.
    #[must_use]
    pub fn active_symbols(&self) -> Vec<Symbol> {
        self.refcounts.keys().cloned().collect()
    }

    /// Number of tracked symbols.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.refcounts.len()
    }

    /// Number of active provider routes.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.refcounts.is_empty()
    }
}
