//! Port Interfaces
//!
//! Defines the interfaces (ports) for external collaborators following
//! the Hexagonal Architecture pattern. Infrastructure adapters implement
//! these contracts.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ApprovalKeyIssuer`: issues the token an upstream connection authenticates with
//! - `TickerResolver`: normalizes raw client tickers into canonical symbols

mod approval_key_port;
mod ticker_resolver_port;

pub use approval_key_port::{ApprovalKey, ApprovalKeyError, ApprovalKeyIssuer, StaticApprovalKey};
pub use ticker_resolver_port::{ResolveError, TickerResolver};
