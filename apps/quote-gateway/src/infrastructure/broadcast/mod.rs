//! Subscription Registry
//!
//! Per-provider fan-out built on tokio broadcast channels. Each subscribed
//! canonical symbol owns one channel; upstream ticks arrive keyed by provider
//! transaction key and are copied to every symbol mapped from that key.
//!
//! # Architecture
//!
//! - One `parking_lot` mutex guards the refcount book and the channel table.
//!   It is the only synchronization point between sessions and the connector.
//! - Upstream commands are queued inside the critical section, so the order
//!   the connector sees matches the order the book changed in.
//! - Channels are bounded. A session that falls behind skips the oldest
//!   ticks (`RecvError::Lagged`); the decode loop never blocks.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::domain::quote::Tick;
use crate::domain::subscription::{Released, SubscriptionBook, UpstreamCommand};
use crate::domain::symbol::{Route, Symbol, SymbolRouter};
use crate::infrastructure::metrics;
use crate::infrastructure::upstream::{Provider, RawTick};

/// Default per-symbol channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
struct RegistryState {
    book: SubscriptionBook,
    channels: HashMap<Symbol, broadcast::Sender<Tick>>,
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Symbols with at least one holder.
    pub symbols: usize,
    /// Active provider routes.
    pub routes: usize,
    /// Live broadcast receivers across all channels.
    pub receivers: usize,
}

/// Reference-counted symbol subscriptions for one provider.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use quote_gateway::domain::symbol::KisRouter;
/// use quote_gateway::infrastructure::broadcast::SubscriptionRegistry;
/// use quote_gateway::infrastructure::upstream::Provider;
///
/// let (registry, mut commands) = SubscriptionRegistry::new(Provider::Kis, Arc::new(KisRouter), 16);
/// let _rx = registry.subscribe("005930.KS");
/// assert!(commands.try_recv().is_ok()); // Subscribe(H0STCNT0:005930)
/// assert!(registry.unsubscribe("005930.KS"));
/// ```
pub struct SubscriptionRegistry {
    provider: Provider,
    router: Arc<dyn SymbolRouter>,
    capacity: usize,
    state: Mutex<RegistryState>,
    commands: mpsc::UnboundedSender<UpstreamCommand>,
}

impl SubscriptionRegistry {
    /// Create a registry and the command stream its connector consumes.
    #[must_use]
    pub fn new(
        provider: Provider,
        router: Arc<dyn SymbolRouter>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<UpstreamCommand>) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            provider,
            router,
            capacity: capacity.max(1),
            state: Mutex::new(RegistryState::default()),
            commands,
        });
        (registry, commands_rx)
    }

    /// Provider this registry feeds.
    #[must_use]
    pub const fn provider(&self) -> Provider {
        self.provider
    }

    /// Route a symbol maps to on this provider.
    #[must_use]
    pub fn route(&self, symbol: &str) -> Route {
        self.router.route(symbol)
    }

    /// Add a holder for `symbol` and return a receiver on its channel.
    pub fn subscribe(&self, symbol: &str) -> broadcast::Receiver<Tick> {
        let route = self.router.route(symbol);
        let mut state = self.state.lock();

        let acquired = state.book.acquire(symbol, &route);
        let receiver = if let Some(sender) = state.channels.get(symbol) {
            sender.subscribe()
        } else {
            let (sender, receiver) = broadcast::channel(self.capacity);
            state.channels.insert(symbol.to_string(), sender);
            receiver
        };

        if let Some(route) = acquired.subscribe {
            tracing::debug!(provider = %self.provider, symbol, route = %route, "Upstream subscribe queued");
            self.send_command(UpstreamCommand::Subscribe(route));
        }
        metrics::set_active_symbols(self.provider, state.book.symbol_count());

        receiver
    }

    /// Drop a holder for `symbol`. Returns `false` if the symbol was not held.
    pub fn unsubscribe(&self, symbol: &str) -> bool {
        let mut state = self.state.lock();

        match state.book.release(symbol) {
            Released::Unknown => {
                tracing::warn!(provider = %self.provider, symbol, "Unsubscribe for untracked symbol");
                return false;
            }
            Released::Remaining(_) => {}
            Released::Last { unsubscribe } => {
                state.channels.remove(symbol);
                if let Some(route) = unsubscribe {
                    tracing::debug!(provider = %self.provider, symbol, route = %route, "Upstream unsubscribe queued");
                    self.send_command(UpstreamCommand::Unsubscribe(route));
                }
            }
        }
        metrics::set_active_symbols(self.provider, state.book.symbol_count());

        true
    }

    /// Subscribe and wrap the holder in a lease that unsubscribes on drop.
    #[must_use]
    pub fn lease(self: &Arc<Self>, symbol: &str) -> (SubscriptionLease, broadcast::Receiver<Tick>) {
        let receiver = self.subscribe(symbol);
        let lease = SubscriptionLease {
            registry: Arc::clone(self),
            symbol: symbol.to_string(),
        };
        (lease, receiver)
    }

    /// Publish a provider tick to every symbol mapped from its route.
    ///
    /// Returns the number of channels the tick was published on. Unmapped
    /// routes are expected after an unsubscribe and are dropped.
    pub fn dispatch(&self, raw: &RawTick) -> usize {
        let route = raw.route();
        let targets: Vec<(Symbol, broadcast::Sender<Tick>)> = {
            let state = self.state.lock();
            state
                .book
                .symbols_for_route(&route)
                .into_iter()
                .filter_map(|symbol| {
                    state
                        .channels
                        .get(symbol)
                        .map(|sender| (symbol.clone(), sender.clone()))
                })
                .collect()
        };

        if targets.is_empty() {
            tracing::trace!(provider = %self.provider, tr_id = %raw.tr_id, tr_key = %raw.tr_key, "Tick for unmapped route dropped");
            return 0;
        }

        for (symbol, sender) in &targets {
            // No receivers is fine: the last session may be between drop and unsubscribe.
            let _ = sender.send(raw.to_tick(symbol));
        }
        metrics::record_ticks_dispatched(self.provider, targets.len());
        targets.len()
    }

    /// Routes the connector must hold upstream.
    #[must_use]
    pub fn active_routes(&self) -> BTreeSet<Route> {
        self.state.lock().book.active_routes()
    }

    /// Current refcount for a symbol.
    #[must_use]
    pub fn refcount(&self, symbol: &str) -> usize {
        self.state.lock().book.refcount(symbol)
    }

    /// Whether a channel currently exists for a symbol.
    #[must_use]
    pub fn has_channel(&self, symbol: &str) -> bool {
        self.state.lock().channels.contains_key(symbol)
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.lock();
        RegistryStats {
            symbols: state.book.symbol_count(),
            routes: state.book.route_count(),
            receivers: state
                .channels
                .values()
                .map(broadcast::Sender::receiver_count)
                .sum(),
        }
    }

    fn send_command(&self, command: UpstreamCommand) {
        if self.commands.send(command).is_err() {
            tracing::debug!(provider = %self.provider, "Connector gone, upstream command discarded");
        }
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("provider", &self.provider)
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Lease
// =============================================================================

/// A held subscription. Dropping it unsubscribes exactly once.
pub struct SubscriptionLease {
    registry: Arc<SubscriptionRegistry>,
    symbol: Symbol,
}

impl SubscriptionLease {
    /// Symbol held by this lease.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Provider the lease is held on.
    #[must_use]
    pub fn provider(&self) -> Provider {
        self.registry.provider()
    }
}

impl Drop for SubscriptionLease {
    fn drop(&mut self) {
        self.registry.unsubscribe(&self.symbol);
    }
}

impl fmt::Debug for SubscriptionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionLease")
            .field("provider", &self.provider())
            .field("symbol", &self.symbol)
            .finish()
    }
}
