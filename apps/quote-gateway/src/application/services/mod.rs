//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `resolve_tickers`: time-bounded batch ticker resolution with raw fallback
//! - `TickDeduplicator`: suppresses consecutive identical ticks on a session

mod dedup;
mod resolution;

pub use dedup::TickDeduplicator;
pub use resolution::{ResolutionLimits, ResolvedTickers, resolve_tickers};
