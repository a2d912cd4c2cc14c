//! Quote Types
//!
//! Normalized ticks produced by the provider codecs and the JSON frames sent
//! to gateway clients.

use serde::Serialize;

use super::symbol::Symbol;

/// A normalized price tick for one canonical symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    /// Canonical symbol the tick is published under.
    pub symbol: Symbol,
    /// Last trade price.
    pub price: f64,
    /// Absolute change versus the previous close.
    pub change: Option<f64>,
    /// Fractional change versus the previous close (`-0.0042` = -0.42%).
    pub change_percent: Option<f64>,
}

impl Tick {
    /// Create a tick with only a price.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            change: None,
            change_percent: None,
        }
    }

    /// Copy of this tick published under a different symbol.
    #[must_use]
    pub fn for_symbol(&self, symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ..self.clone()
        }
    }
}

/// A JSON text frame sent to a gateway client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClientFrame {
    /// `{"symbol":..,"price":..,"dp":..}`
    Tick {
        /// Canonical symbol.
        symbol: Symbol,
        /// Last price.
        price: f64,
        /// Fractional change, `null` when the provider does not send one.
        dp: Option<f64>,
    },
    /// `{"hb":1}`
    Heartbeat {
        /// Always `1`.
        hb: u8,
    },
    /// `{"error":".."}`
    Error {
        /// Human readable message.
        error: String,
    },
}

impl ClientFrame {
    /// The heartbeat frame.
    #[must_use]
    pub const fn heartbeat() -> Self {
        Self::Heartbeat { hb: 1 }
    }

    /// An error frame.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// Serialize to a JSON text payload.
    #[must_use]
    pub fn to_json(&self) -> String {
        // Serializing these shapes cannot fail; fall back to a heartbeat if it ever does.
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"hb":1}"#.to_string())
    }
}

impl From<&Tick> for ClientFrame {
    fn from(tick: &Tick) -> Self {
        Self::Tick {
            symbol: tick.symbol.clone(),
            price: tick.price,
            dp: tick.change_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_frame_shape() {
        let tick = Tick {
            symbol: "005930.KS".to_string(),
            price: 71200.0,
            change: Some(-300.0),
            change_percent: Some(-0.0042),
        };
        let json = ClientFrame::from(&tick).to_json();
        assert_eq!(json, r#"{"symbol":"005930.KS","price":71200.0,"dp":-0.0042}"#);
    }

    #[test]
    fn tick_frame_without_percent_is_null() {
        let json = ClientFrame::from(&Tick::new("AAPL", 190.5)).to_json();
        assert_eq!(json, r#"{"symbol":"AAPL","price":190.5,"dp":null}"#);
    }

    #[test]
    fn heartbeat_and_error_frames() {
        assert_eq!(ClientFrame::heartbeat().to_json(), r#"{"hb":1}"#);
        assert_eq!(
            ClientFrame::error("tickers required").to_json(),
            r#"{"error":"tickers required"}"#
        );
    }

    #[test]
    fn for_symbol_keeps_price_fields() {
        let tick = Tick {
            symbol: "005930".to_string(),
            price: 1.0,
            change: Some(2.0),
            change_percent: Some(0.5),
        };
        let copy = tick.for_symbol("005930.KS");
        assert_eq!(copy.symbol, "005930.KS");
        assert_eq!(copy.change, Some(2.0));
    }
}
