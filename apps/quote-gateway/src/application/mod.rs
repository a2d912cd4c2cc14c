//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (approval keys, ticker lookup).
pub mod ports;

/// Application services for ticker resolution and tick de-duplication.
pub mod services;
