//! Reconnection Policy
//!
//! Exponential backoff with jitter for transient upstream failures, plus the
//! separate, slower policy applied when a provider reports that the approval
//! key is already bound to another session.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::UpstreamSettings;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each attempt).
    pub multiplier: f64,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl ReconnectConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        jitter_factor: f64,
    ) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter_factor,
        }
    }

    /// Create configuration from `UpstreamSettings`.
    #[must_use]
    pub const fn from_settings(settings: &UpstreamSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: 0.1,
        }
    }
}

/// Reconnection policy implementing exponential backoff with jitter.
///
/// Retries never run out; the connector keeps trying for the life of the
/// process and calls [`ReconnectPolicy::reset`] once a connection is up.
///
/// # Example
///
/// ```rust
/// use quote_gateway::infrastructure::upstream::reconnect::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
/// let first = policy.next_delay();
/// assert!(first.as_millis() >= 900);
///
/// // Simulate successful connection
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Get the next delay duration, applying exponential backoff with jitter.
    #[must_use]
    pub fn next_delay(&mut self) -> Duration {
        self.attempt_count = self.attempt_count.saturating_add(1);

        let delay_with_jitter = self.apply_jitter(self.current_delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        delay_with_jitter
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

// =============================================================================
// Approval Key Conflicts
// =============================================================================

/// Configuration for approval-key conflict handling.
#[derive(Debug, Clone)]
pub struct ConflictConfig {
    /// Wait before reconnecting after a conflict.
    pub cooldown: Duration,
    /// Conflicts tolerated before the provider is marked unavailable.
    pub max_retries: u32,
    /// How long an unavailable provider is parked before trying again.
    pub recovery: Duration,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(60),
            max_retries: 3,
            recovery: Duration::from_secs(300),
        }
    }
}

impl ConflictConfig {
    /// Create configuration from `UpstreamSettings`.
    #[must_use]
    pub const fn from_settings(settings: &UpstreamSettings) -> Self {
        Self {
            cooldown: settings.conflict_cooldown,
            max_retries: settings.conflict_max_retries,
            recovery: settings.unavailable_recovery,
        }
    }
}

/// What to do after a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    /// Wait out the cool-down, then reconnect with a fresh key.
    CoolDown {
        /// Conflict number within the current streak.
        retry: u32,
        /// How long to wait.
        delay: Duration,
    },
    /// Retries exhausted; mark the provider unavailable and park.
    Unavailable {
        /// How long to park.
        delay: Duration,
    },
}

/// Counts consecutive conflicts and decides when to escalate.
#[derive(Debug)]
pub struct ConflictTracker {
    config: ConflictConfig,
    streak: u32,
}

impl ConflictTracker {
    /// Create a tracker.
    #[must_use]
    pub const fn new(config: ConflictConfig) -> Self {
        Self { config, streak: 0 }
    }

    /// Record a conflict.
    pub const fn record(&mut self) -> ConflictAction {
        self.streak = self.streak.saturating_add(1);
        if self.streak > self.config.max_retries {
            self.streak = 0;
            ConflictAction::Unavailable {
                delay: self.config.recovery,
            }
        } else {
            ConflictAction::CoolDown {
                retry: self.streak,
                delay: self.config.cooldown,
            }
        }
    }

    /// Clear the streak once a connection has proven healthy.
    pub const fn reset(&mut self) {
        self.streak = 0;
    }

    /// Conflicts in the current streak.
    #[must_use]
    pub const fn streak(&self) -> u32 {
        self.streak
    }
}
