//! Finnhub Trade Feed Codec
//!
//! ```text
//! → {"type":"subscribe","symbol":"AAPL"}
//! ← {"type":"trade","data":[{"s":"AAPL","p":189.5,"t":1700000000000,"v":10}]}
//! ← {"type":"ping"}
//! ← {"type":"error","msg":"Invalid symbol"}
//! ```

use serde::{Deserialize, Serialize};

use crate::application::ports::ApprovalKey;
use crate::domain::subscription::UpstreamCommand;
use crate::domain::symbol::FINNHUB_TRADE;
use crate::infrastructure::upstream::{
    CodecError, DecodedFrame, Endpoint, FeedCodec, Provider, RawTick,
};

/// Client keepalive frame.
pub const KEEPALIVE_FRAME: &str = r#"{"type":"ping"}"#;

#[derive(Serialize)]
struct Command<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    symbol: &'a str,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Inbound {
    Trade {
        #[serde(default)]
        data: Vec<serde_json::Value>,
    },
    Ping,
    Error {
        #[serde(default)]
        msg: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct Trade {
    #[serde(default)]
    s: String,
    #[serde(default)]
    p: Option<f64>,
}

impl Trade {
    fn into_raw(self) -> Option<RawTick> {
        let price = self.p.filter(|p| p.is_finite())?;
        if self.s.is_empty() {
            return None;
        }
        Some(RawTick {
            tr_id: FINNHUB_TRADE.to_string(),
            tr_key: self.s.to_uppercase(),
            price,
            change: None,
            change_percent: None,
        })
    }
}

/// Codec for the Finnhub trade WebSocket.
#[derive(Debug, Clone)]
pub struct FinnhubCodec {
    ws_url: String,
}

impl FinnhubCodec {
    /// Create a codec for `ws_url`.
    #[must_use]
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }

    /// Decode one inbound frame.
    #[must_use]
    pub fn decode_frame(raw: &str) -> DecodedFrame {
        let inbound: Inbound = match serde_json::from_str(raw) {
            Ok(inbound) => inbound,
            Err(e) => return DecodedFrame::malformed(e.to_string()),
        };

        match inbound {
            Inbound::Trade { data } => {
                let entries = data.len();
                // Unusable entries are skipped individually.
                let ticks: Vec<RawTick> = data
                    .into_iter()
                    .filter_map(|entry| serde_json::from_value::<Trade>(entry).ok())
                    .filter_map(Trade::into_raw)
                    .collect();
                match (entries, ticks.is_empty()) {
                    (0, _) => DecodedFrame::Ignored,
                    (_, true) => DecodedFrame::malformed("no usable trade entries"),
                    (_, false) => DecodedFrame::Ticks(ticks),
                }
            }
            Inbound::Ping => DecodedFrame::Ack,
            Inbound::Error { msg } => DecodedFrame::ControlError {
                code: "error".to_string(),
                message: msg,
            },
            Inbound::Other => DecodedFrame::Ignored,
        }
    }
}

impl FeedCodec for FinnhubCodec {
    fn provider(&self) -> Provider {
        Provider::Finnhub
    }

    fn endpoints(&self, key: &ApprovalKey) -> Vec<Endpoint> {
        let separator = if self.ws_url.contains('?') { '&' } else { '?' };
        vec![Endpoint::new(format!(
            "{}{separator}token={}",
            self.ws_url,
            key.value()
        ))]
    }

    fn encode(&self, _key: &ApprovalKey, command: &UpstreamCommand) -> Result<String, CodecError> {
        let kind = match command {
            UpstreamCommand::Subscribe(_) => "subscribe",
            UpstreamCommand::Unsubscribe(_) => "unsubscribe",
        };
        let frame = serde_json::to_string(&Command {
            kind,
            symbol: &command.route().tr_key,
        })?;
        Ok(frame)
    }

    fn decode(&self, raw: &str) -> DecodedFrame {
        Self::decode_frame(raw)
    }

    fn keepalive(&self) -> Option<String> {
        Some(KEEPALIVE_FRAME.to_string())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::domain::symbol::{FinnhubRouter, SymbolRouter};

    #[test]
    fn encodes_subscribe_and_unsubscribe() {
        let codec = FinnhubCodec::new("wss://ws.finnhub.io");
        let key = ApprovalKey::new("token");
        let route = FinnhubRouter.route("aapl");

        let sub = codec
            .encode(&key, &UpstreamCommand::Subscribe(route.clone()))
            .unwrap();
        assert_eq!(sub, r#"{"type":"subscribe","symbol":"AAPL"}"#);

        let unsub = codec
            .encode(&key, &UpstreamCommand::Unsubscribe(route))
            .unwrap();
        assert_eq!(unsub, r#"{"type":"unsubscribe","symbol":"AAPL"}"#);
    }

    #[test]
    fn decodes_trades_into_ticks() {
        let frame = FinnhubCodec::decode_frame(
            r#"{"type":"trade","data":[{"s":"AAPL","p":189.5,"v":10},{"s":"MSFT","p":410.25}]}"#,
        );
        let DecodedFrame::Ticks(ticks) = frame else {
            panic!("expected ticks, got {frame:?}");
        };
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].tr_key, "AAPL");
        assert_eq!(ticks[0].price, 189.5);
        assert_eq!(ticks[0].change, None);
        assert_eq!(ticks[1].tr_key, "MSFT");
        assert!(ticks.iter().all(|tick| tick.tr_id == FINNHUB_TRADE));
    }

    #[test_case(r#"{"s":"MSFT","p":null}"# ; "null price")]
    #[test_case(r#"{"s":"MSFT"}"# ; "missing price")]
    #[test_case(r#"{"s":"MSFT","p":"abc"}"# ; "string price")]
    #[test_case(r#"{"p":410.25}"# ; "missing symbol")]
    fn bad_entry_does_not_drop_batch(bad: &str) {
        let raw = format!(r#"{{"type":"trade","data":[{{"s":"AAPL","p":190.5}},{bad}]}}"#);
        let DecodedFrame::Ticks(ticks) = FinnhubCodec::decode_frame(&raw) else {
            panic!("expected ticks for {raw}");
        };
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].tr_key, "AAPL");
        assert_eq!(ticks[0].price, 190.5);
    }

    #[test_case(r#"{"type":"ping"}"#, &DecodedFrame::Ack ; "server ping")]
    #[test_case(r#"{"type":"news","data":[]}"#, &DecodedFrame::Ignored ; "other type")]
    #[test_case(r#"{"type":"trade","data":[]}"#, &DecodedFrame::Ignored ; "empty trade")]
    fn decodes_control_frames(raw: &str, expected: &DecodedFrame) {
        assert_eq!(&FinnhubCodec::decode_frame(raw), expected);
    }

    #[test]
    fn decodes_error_frame() {
        let frame = FinnhubCodec::decode_frame(r#"{"type":"error","msg":"Invalid symbol"}"#);
        assert_eq!(
            frame,
            DecodedFrame::ControlError {
                code: "error".to_string(),
                message: "Invalid symbol".to_string(),
            }
        );
    }

    #[test_case("not json" ; "garbage")]
    #[test_case(r#"{"type":"trade","data":[{"s":"AAPL","p":"abc"}]}"# ; "only entry unusable")]
    #[test_case(r#"{"data":[]}"# ; "missing type")]
    fn unparsable_frames_are_malformed(raw: &str) {
        assert!(matches!(
            FinnhubCodec::decode_frame(raw),
            DecodedFrame::Malformed { .. }
        ));
    }

    #[test]
    fn endpoint_carries_token() {
        let codec = FinnhubCodec::new("wss://ws.finnhub.io");
        let endpoints = codec.endpoints(&ApprovalKey::new("abc"));
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].url, "wss://ws.finnhub.io?token=abc");
    }

    #[test]
    fn keepalive_is_json_ping() {
        let codec = FinnhubCodec::new("wss://ws.finnhub.io");
        assert_eq!(codec.keepalive().as_deref(), Some(r#"{"type":"ping"}"#));
    }
}
