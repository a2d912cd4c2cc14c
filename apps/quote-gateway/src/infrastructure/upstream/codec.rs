//! Provider Codec Interface
//!
//! A `FeedCodec` knows one provider's wire format: where to connect, how to
//! phrase subscribe/unsubscribe commands, and how to classify inbound frames.
//! The connector is written against this trait only.

use std::time::Duration;

use super::provider::Provider;
use super::transport::Endpoint;
use crate::application::ports::ApprovalKey;
use crate::domain::quote::Tick;
use crate::domain::subscription::UpstreamCommand;
use crate::domain::symbol::Route;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A tick keyed by the provider route it arrived on, before fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTick {
    /// Transaction id of the feed that carried the tick.
    pub tr_id: String,
    /// Provider transaction key the tick arrived under.
    pub tr_key: String,
    /// Last trade price.
    pub price: f64,
    /// Absolute change.
    pub change: Option<f64>,
    /// Fractional change.
    pub change_percent: Option<f64>,
}

impl RawTick {
    /// The provider route this tick belongs to.
    #[must_use]
    pub fn route(&self) -> Route {
        Route::new(self.tr_id.as_str(), self.tr_key.as_str())
    }

    /// Publish this tick under a canonical symbol.
    #[must_use]
    pub fn to_tick(&self, symbol: &str) -> Tick {
        Tick {
            symbol: symbol.to_string(),
            price: self.price,
            change: self.change,
            change_percent: self.change_percent,
        }
    }
}

/// Classification of one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    /// One or more ticks.
    Ticks(Vec<RawTick>),
    /// Positive acknowledgement of a command.
    Ack,
    /// Provider-reported error.
    ControlError {
        /// Provider message code.
        code: String,
        /// Provider message.
        message: String,
    },
    /// The approval key is already bound to another session.
    Conflict,
    /// Keepalive that must be echoed back verbatim.
    KeepAlive(String),
    /// Well-formed frame this gateway does not consume.
    Ignored,
    /// Frame that could not be parsed.
    Malformed {
        /// Why parsing failed.
        reason: String,
    },
}

impl DecodedFrame {
    /// Metric label for this frame kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Ticks(_) => "tick",
            Self::Ack => "ack",
            Self::ControlError { .. } => "error",
            Self::Conflict => "conflict",
            Self::KeepAlive(_) => "keepalive",
            Self::Ignored => "ignored",
            Self::Malformed { .. } => "malformed",
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

/// Provider wire format.
pub trait FeedCodec: Send + Sync {
    /// Which provider this codec speaks to.
    fn provider(&self) -> Provider;

    /// Candidate endpoints, tried in order.
    fn endpoints(&self, key: &ApprovalKey) -> Vec<Endpoint>;

    /// Encode a subscribe/unsubscribe command.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    fn encode(&self, key: &ApprovalKey, command: &UpstreamCommand) -> Result<String, CodecError>;

    /// Classify an inbound text frame. Never fails; bad input is `Malformed`.
    fn decode(&self, raw: &str) -> DecodedFrame;

    /// Application-level keepalive text. `None` means a WebSocket ping is used.
    fn keepalive(&self) -> Option<String> {
        None
    }

    /// Delay between connecting and replaying subscriptions.
    fn settle_delay(&self) -> Duration {
        Duration::ZERO
    }
}
