//! Domain Layer - Core quote and subscription types.
//!
//! This layer contains the pure types and logic of the gateway: symbol
//! routing, normalized ticks, and reference-counted subscription tracking.
//! Nothing here performs I/O.

/// Normalized ticks and client-facing frames.
pub mod quote;

/// Subscription tracking and management.
pub mod subscription;

/// Symbol to provider route mapping.
pub mod symbol;
