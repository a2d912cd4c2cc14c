//! Feed State Tracking
//!
//! Shared, lock-light view of one upstream connection. The connector writes
//! it; the health server and gateway sessions read it.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::provider::Provider;
use crate::infrastructure::metrics;

/// Connection lifecycle of an upstream feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No socket.
    Disconnected,
    /// Obtaining a key or dialing candidates.
    Connecting,
    /// Socket open; commands are written through.
    Connected,
}

impl ConnectionState {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }

    /// Gauge value (0, 1, 2).
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
        }
    }
}

/// Tracks the state of an upstream feed connection.
#[derive(Debug)]
pub struct FeedState {
    provider: Provider,
    state: parking_lot::RwLock<ConnectionState>,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    error_message: parking_lot::RwLock<Option<String>>,
    available: AtomicBool,
    live_routes: AtomicUsize,
    parked_routes: AtomicUsize,
    reconnect_attempts: AtomicU32,
    conflicts: AtomicU64,
    messages_received: AtomicU64,
    malformed_frames: AtomicU64,
}

/// Point-in-time copy of a [`FeedState`].
#[derive(Debug, Clone, Serialize)]
pub struct FeedSnapshot {
    /// Provider name.
    pub provider: &'static str,
    /// Connection state.
    pub state: ConnectionState,
    /// Whether new subscriptions are routed to this provider.
    pub available: bool,
    /// Last time the connection came up.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last connection error.
    pub last_error: Option<String>,
    /// Routes registered on the live session.
    pub live_routes: usize,
    /// Routes waiting for capacity.
    pub parked_routes: usize,
    /// Reconnect attempts since the last successful connection.
    pub reconnect_attempts: u32,
    /// Approval key conflicts seen.
    pub conflicts: u64,
    /// Inbound text frames.
    pub messages_received: u64,
    /// Inbound frames that failed to parse.
    pub malformed_frames: u64,
}

impl FeedState {
    /// Create state for a provider in `Disconnected`.
    #[must_use]
    pub const fn new(provider: Provider) -> Self {
        Self {
            provider,
            state: parking_lot::RwLock::new(ConnectionState::Disconnected),
            last_connected_at: parking_lot::RwLock::new(None),
            error_message: parking_lot::RwLock::new(None),
            available: AtomicBool::new(true),
            live_routes: AtomicUsize::new(0),
            parked_routes: AtomicUsize::new(0),
            reconnect_attempts: AtomicU32::new(0),
            conflicts: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            malformed_frames: AtomicU64::new(0),
        }
    }

    /// Provider this state belongs to.
    #[must_use]
    pub const fn provider(&self) -> Provider {
        self.provider
    }

    /// Set the connection state.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            *self.error_message.write() = None;
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            self.available.store(true, Ordering::Relaxed);
        }
        metrics::set_connection_state(self.provider, state);
    }

    /// Record the last connection error.
    pub fn set_error(&self, message: String) {
        *self.error_message.write() = Some(message);
    }

    /// Mark the provider unavailable (or available again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Update route counters.
    pub fn set_routes(&self, live: usize, parked: usize) {
        self.live_routes.store(live, Ordering::Relaxed);
        self.parked_routes.store(parked, Ordering::Relaxed);
    }

    /// Increment reconnect attempts.
    pub fn increment_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        metrics::record_reconnect(self.provider);
    }

    /// Increment conflict counter.
    pub fn increment_conflicts(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
        metrics::record_conflict(self.provider);
    }

    /// Increment messages received counter.
    pub fn increment_messages(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment malformed frame counter.
    pub fn increment_malformed(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the provider accepts new subscriptions.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Messages received so far.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Malformed frames so far.
    #[must_use]
    pub fn malformed_frames(&self) -> u64 {
        self.malformed_frames.load(Ordering::Relaxed)
    }

    /// Conflicts so far.
    #[must_use]
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Snapshot for reporting.
    #[must_use]
    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            provider: self.provider.as_str(),
            state: self.state(),
            available: self.is_available(),
            last_connected_at: *self.last_connected_at.read(),
            last_error: self.error_message.read().clone(),
            live_routes: self.live_routes.load(Ordering::Relaxed),
            parked_routes: self.parked_routes.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            conflicts: self.conflicts(),
            messages_received: self.messages_received(),
            malformed_frames: self.malformed_frames(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected_and_available() {
        let state = FeedState::new(Provider::Kis);
        assert_eq!(state.state(), ConnectionState::Disconnected);
        assert!(state.is_available());
    }

    #[test]
    fn connecting_clears_error_and_restores_availability() {
        let state = FeedState::new(Provider::Kis);
        state.set_error("boom".to_string());
        state.set_available(false);
        state.increment_reconnect_attempts();

        state.set_state(ConnectionState::Connected);

        let snapshot = state.snapshot();
        assert!(snapshot.available);
        assert!(snapshot.last_error.is_none());
        assert!(snapshot.last_connected_at.is_some());
        assert_eq!(snapshot.reconnect_attempts, 0);
    }

    #[test]
    fn state_serializes_lowercase() {
        let json = serde_json::to_string(&ConnectionState::Connected).unwrap();
        assert_eq!(json, "\"connected\"");
    }
}
