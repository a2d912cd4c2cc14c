//! Consecutive tick de-duplication.

use crate::domain::quote::Tick;
use crate::domain::symbol::Symbol;

/// Drops a tick when it repeats the previous `(symbol, price)` pair.
///
/// Only the immediately preceding tick is remembered, so an interleaved
/// tick for another symbol lets the same price through again.
#[derive(Debug, Default)]
pub struct TickDeduplicator {
    last: Option<(Symbol, u64)>,
    suppressed: u64,
}

impl TickDeduplicator {
    /// Create an empty deduplicator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the tick should be forwarded.
    pub fn admit(&mut self, tick: &Tick) -> bool {
        let bits = tick.price.to_bits();
        let repeated = self
            .last
            .as_ref()
            .is_some_and(|(symbol, price)| *symbol == tick.symbol && *price == bits);
        if repeated {
            self.suppressed += 1;
            return false;
        }
        self.last = Some((tick.symbol.clone(), bits));
        true
    }

    /// Number of ticks dropped so far.
    #[must_use]
    pub const fn suppressed(&self) -> u64 {
        self.suppressed
    }
}
