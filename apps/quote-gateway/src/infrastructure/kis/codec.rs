//! KIS Realtime Codec
//!
//! # Outbound
//!
//! Subscribe and unsubscribe share one JSON envelope, distinguished by
//! `tr_type` (`"1"` registers, `"2"` releases):
//!
//! ```json
//! {"header":{"approval_key":"..","custtype":"P","tr_type":"1","content-type":"utf-8"},
//!  "body":{"input":{"tr_id":"H0STCNT0","tr_key":"005930"}}}
//! ```
//!
//! # Inbound
//!
//! - Tick frames are pipe-delimited: `0|TR_ID|COUNT|f0^f1^price^f3^change^pct*100^...`.
//!   `COUNT` records share the `^` list in equal-length slices. A leading `1`
//!   marks an encrypted payload, which this gateway does not decrypt.
//! - Control frames are JSON carrying `rt_cd`/`msg_cd`.
//! - `PINGPONG` frames are JSON keepalives echoed back verbatim.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::application::ports::ApprovalKey;
use crate::domain::subscription::UpstreamCommand;
use crate::domain::symbol::TrId;
use crate::infrastructure::upstream::{CodecError, DecodedFrame, Endpoint, FeedCodec, Provider, RawTick};

/// Default realtime endpoint.
pub const DEFAULT_WS_URL: &str = "ws://ops.koreainvestment.com:21000";

/// Control message marking an approval key bound to another session.
const CONFLICT_MARKER: &str = "ALREADY IN USE appkey";

/// Message code of a successful (un)subscribe.
const ACK_MSG_CD: &str = "OPSP0000";

/// Keepalive transaction id.
const PINGPONG: &str = "PINGPONG";

/// Field positions inside one tick record.
const FIELD_KEY: usize = 0;
const FIELD_PRICE: usize = 2;
const FIELD_CHANGE: usize = 4;
const FIELD_CHANGE_PCT: usize = 5;
const MIN_FIELDS: usize = 6;

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Serialize)]
struct Envelope<'a> {
    header: Header<'a>,
    body: Body<'a>,
}

#[derive(Serialize)]
struct Header<'a> {
    approval_key: &'a str,
    custtype: &'a str,
    tr_type: &'a str,
    #[serde(rename = "content-type")]
    content_type: &'a str,
}

#[derive(Serialize)]
struct Body<'a> {
    input: Input<'a>,
}

#[derive(Serialize)]
struct Input<'a> {
    tr_id: &'a str,
    tr_key: &'a str,
}

// =============================================================================
// Codec
// =============================================================================

/// Codec for the KIS realtime WebSocket.
#[derive(Clone)]
pub struct KisCodec {
    ws_url: String,
    app_key: String,
    settle_delay: Duration,
}

impl std::fmt::Debug for KisCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KisCodec")
            .field("ws_url", &self.ws_url)
            .field("app_key", &"[REDACTED]")
            .field("settle_delay", &self.settle_delay)
            .finish()
    }
}

impl KisCodec {
    /// Create a codec for `ws_url`, sending `app_key` in the handshake.
    #[must_use]
    pub fn new(ws_url: impl Into<String>, app_key: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            app_key: app_key.into(),
            settle_delay: Duration::from_secs(1),
        }
    }

    /// Override the delay between connect and subscription replay.
    #[must_use]
    pub const fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    /// Encode a subscribe (`unsubscribe = false`) or unsubscribe envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode_subscribe(
        approval_key: &str,
        tr_id: &str,
        tr_key: &str,
        unsubscribe: bool,
    ) -> Result<String, CodecError> {
        let envelope = Envelope {
            header: Header {
                approval_key,
                custtype: "P",
                tr_type: if unsubscribe { "2" } else { "1" },
                content_type: "utf-8",
            },
            body: Body {
                input: Input { tr_id, tr_key },
            },
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Classify one inbound frame.
    #[must_use]
    pub fn decode_frame(raw: &str) -> DecodedFrame {
        let text = raw.trim();
        if text.is_empty() {
            return DecodedFrame::malformed("empty frame");
        }
        if text.starts_with('{') {
            return Self::decode_control(text);
        }
        if text.starts_with("1|") {
            return DecodedFrame::malformed("encrypted payload");
        }
        if text.starts_with("0|") {
            return Self::decode_ticks(text);
        }
        DecodedFrame::malformed("unrecognised frame")
    }

    fn decode_control(text: &str) -> DecodedFrame {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => return DecodedFrame::malformed(format!("invalid JSON: {e}")),
        };

        if value.pointer("/header/tr_id").and_then(Value::as_str) == Some(PINGPONG) {
            return DecodedFrame::KeepAlive(text.to_string());
        }

        let body = value.get("body").unwrap_or(&value);
        let field = |name: &str| body.get(name).and_then(Value::as_str);
        let (Some(rt_cd), Some(msg_cd)) = (field("rt_cd"), field("msg_cd")) else {
            return DecodedFrame::Ignored;
        };
        let message = field("msg1").unwrap_or_default();

        if text.contains(CONFLICT_MARKER) {
            DecodedFrame::Conflict
        } else if msg_cd == ACK_MSG_CD || rt_cd == "0" {
            DecodedFrame::Ack
        } else {
            DecodedFrame::ControlError {
                code: msg_cd.to_string(),
                message: message.to_string(),
            }
        }
    }

    fn decode_ticks(text: &str) -> DecodedFrame {
        let mut parts = text.splitn(4, '|');
        let (Some(_flag), Some(tr_id), Some(count), Some(payload)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return DecodedFrame::malformed("too few segments");
        };

        let Ok(tr_id) = tr_id.parse::<TrId>() else {
            return DecodedFrame::Ignored;
        };
        let Ok(count) = count.trim().parse::<usize>() else {
            return DecodedFrame::malformed(format!("invalid record count: {count}"));
        };

        let fields: Vec<&str> = payload.split('^').collect();
        let records: Vec<&[&str]> = if count > 1 && fields.len() % count == 0 {
            fields.chunks(fields.len() / count).collect()
        } else {
            vec![fields.as_slice()]
        };

        let mut ticks = Vec::with_capacity(records.len());
        let mut last_error = None;
        for record in records {
            match parse_record(tr_id, record) {
                Ok(tick) => ticks.push(tick),
                Err(reason) => last_error = Some(reason),
            }
        }

        match (ticks.is_empty(), last_error) {
            (true, Some(reason)) => DecodedFrame::Malformed { reason },
            (true, None) => DecodedFrame::malformed("no records"),
            (false, _) => DecodedFrame::Ticks(ticks),
        }
    }
}

fn parse_number(field: &str) -> Option<f64> {
    field.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_record(tr_id: TrId, fields: &[&str]) -> Result<RawTick, String> {
    if fields.len() < MIN_FIELDS {
        return Err(format!("too few fields: {}", fields.len()));
    }
    let tr_key = fields[FIELD_KEY].trim();
    if tr_key.is_empty() {
        return Err("empty transaction key".to_string());
    }
    let price = parse_number(fields[FIELD_PRICE])
        .ok_or_else(|| format!("non-numeric price: {}", fields[FIELD_PRICE]))?;

    Ok(RawTick {
        tr_id: tr_id.as_str().to_string(),
        tr_key: tr_key.to_string(),
        price,
        change: parse_number(fields[FIELD_CHANGE]),
        change_percent: parse_number(fields[FIELD_CHANGE_PCT]).map(|pct| pct / 100.0),
    })
}

impl FeedCodec for KisCodec {
    fn provider(&self) -> Provider {
        Provider::Kis
    }

    fn endpoints(&self, key: &ApprovalKey) -> Vec<Endpoint> {
        let base = self.ws_url.trim_end_matches('/');
        let mut urls = vec![self.ws_url.clone()];
        urls.extend(
            TrId::all()
                .iter()
                .map(|tr_id| format!("{base}/tryitout/{tr_id}")),
        );

        urls.into_iter()
            .map(|url| {
                Endpoint::new(url)
                    .with_header("appkey", self.app_key.as_str())
                    .with_header("approval_key", key.value())
                    .with_header("custtype", "P")
                    .with_header("tr_type", "1")
                    .with_header("content-type", "utf-8")
            })
            .collect()
    }

    fn encode(&self, key: &ApprovalKey, command: &UpstreamCommand) -> Result<String, CodecError> {
        let route = command.route();
        let unsubscribe = matches!(command, UpstreamCommand::Unsubscribe(_));
        Self::encode_subscribe(key.value(), &route.tr_id, &route.tr_key, unsubscribe)
    }

    fn decode(&self, raw: &str) -> DecodedFrame {
        Self::decode_frame(raw)
    }

    fn settle_delay(&self) -> Duration {
        self.settle_delay
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::domain::symbol::Route;

    fn tick(tr_id: &str, tr_key: &str, price: f64, change: Option<f64>, pct: Option<f64>) -> RawTick {
        RawTick {
            tr_id: tr_id.to_string(),
            tr_key: tr_key.to_string(),
            price,
            change,
            change_percent: pct,
        }
    }

    #[test]
    fn encodes_subscribe_envelope() {
        let json = KisCodec::encode_subscribe("key-1", "H0STCNT0", "005930", false).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["header"]["approval_key"], "key-1");
        assert_eq!(value["header"]["custtype"], "P");
        assert_eq!(value["header"]["tr_type"], "1");
        assert_eq!(value["header"]["content-type"], "utf-8");
        assert_eq!(value["body"]["input"]["tr_id"], "H0STCNT0");
        assert_eq!(value["body"]["input"]["tr_key"], "005930");
    }

    #[test]
    fn unsubscribe_uses_tr_type_two() {
        let codec = KisCodec::new(DEFAULT_WS_URL, "app");
        let json = codec
            .encode(
                &ApprovalKey::new("k"),
                &UpstreamCommand::Unsubscribe(Route::new("HDFSCNT0", "AAPL")),
            )
            .unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["header"]["tr_type"], "2");
        assert_eq!(value["body"]["input"]["tr_key"], "AAPL");
    }

    #[test]
    fn decodes_domestic_tick() {
        let frame = "0|H0STCNT0|1|005930^093015^71200^5^-300^-0.42^71100^71500";
        assert_eq!(
            KisCodec::decode_frame(frame),
            DecodedFrame::Ticks(vec![tick("H0STCNT0", "005930", 71200.0, Some(-300.0), Some(-0.0042))])
        );
    }

    #[test]
    fn decodes_multiple_records() {
        let frame = "0|H0STCNT0|2|005930^t^100^5^1^0.5^000660^t^200^5^2^1.0";
        let DecodedFrame::Ticks(ticks) = KisCodec::decode_frame(frame) else {
            panic!("expected ticks");
        };
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].tr_key, "005930");
        assert_eq!(ticks[1].tr_key, "000660");
        assert!((ticks[1].price - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn uneven_record_count_uses_first_record() {
        let frame = "0|H0STCNT0|2|005930^t^100^5^1^0.5^extra";
        let DecodedFrame::Ticks(ticks) = KisCodec::decode_frame(frame) else {
            panic!("expected ticks");
        };
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].tr_key, "005930");
    }

    #[test]
    fn non_numeric_change_fields_are_none() {
        let frame = "0|HDFSCNT0|1|AAPL^t^190.5^x^--^n/a";
        assert_eq!(
            KisCodec::decode_frame(frame),
            DecodedFrame::Ticks(vec![tick("HDFSCNT0", "AAPL", 190.5, None, None)])
        );
    }

    #[test_case("0|H0STCNT0|1|005930^t^abc^5^1^1" ; "non numeric price")]
    #[test_case("0|H0STCNT0|1|005930^t^100" ; "too few fields")]
    #[test_case("0|H0STCNT0|x|005930^t^100^5^1^1" ; "bad count")]
    #[test_case("0|H0STCNT0" ; "too few segments")]
    #[test_case("1|H0STCNT0|1|ENCRYPTED" ; "encrypted")]
    #[test_case("{not json" ; "broken json")]
    #[test_case("garbage" ; "unrecognised")]
    #[test_case("   " ; "blank")]
    fn malformed_frames(frame: &str) {
        assert!(matches!(
            KisCodec::decode_frame(frame),
            DecodedFrame::Malformed { .. }
        ));
    }

    #[test]
    fn unknown_tr_id_is_ignored() {
        assert_eq!(
            KisCodec::decode_frame("0|H0STASP0|1|005930^a^b^c^d^e"),
            DecodedFrame::Ignored
        );
    }

    #[test]
    fn conflict_is_detected() {
        let frame = r#"{"header":{"tr_id":"H0STCNT0"},"body":{"rt_cd":"1","msg_cd":"OPSP8996","msg1":"ALREADY IN USE appkey"}}"#;
        assert_eq!(KisCodec::decode_frame(frame), DecodedFrame::Conflict);
    }

    #[test_case(r#"{"header":{"tr_id":"H0STCNT0"},"body":{"rt_cd":"0","msg_cd":"OPSP0000","msg1":"SUBSCRIBE SUCCESS"}}"# ; "subscribe success")]
    #[test_case(r#"{"header":{"tr_id":"H0STCNT0"},"body":{"rt_cd":"1","msg_cd":"OPSP0000","msg1":"UNSUBSCRIBE SUCCESS"}}"# ; "ack by msg code")]
    #[test_case(r#"{"rt_cd":"0","msg_cd":"OPSP0002","msg1":"ok"}"# ; "top level fields")]
    fn acks(frame: &str) {
        assert_eq!(KisCodec::decode_frame(frame), DecodedFrame::Ack);
    }

    #[test]
    fn control_error() {
        let frame = r#"{"header":{"tr_id":"H0STCNT0"},"body":{"rt_cd":"1","msg_cd":"OPSP0011","msg1":"invalid approval"}}"#;
        assert_eq!(
            KisCodec::decode_frame(frame),
            DecodedFrame::ControlError {
                code: "OPSP0011".to_string(),
                message: "invalid approval".to_string()
            }
        );
    }

    #[test]
    fn pingpong_is_echoed_verbatim() {
        let frame = r#"{"header":{"tr_id":"PINGPONG","datetime":"20240102093000"}}"#;
        assert_eq!(
            KisCodec::decode_frame(frame),
            DecodedFrame::KeepAlive(frame.to_string())
        );
    }

    #[test]
    fn json_without_control_fields_is_ignored() {
        assert_eq!(KisCodec::decode_frame(r#"{"hello":"world"}"#), DecodedFrame::Ignored);
    }

    #[test]
    fn endpoints_follow_candidate_order_with_headers() {
        let codec = KisCodec::new("ws://kis.test:21000/", "app-key");
        let endpoints = codec.endpoints(&ApprovalKey::new("approval"));
        let urls: Vec<_> = endpoints.iter().map(|e| e.url.as_str()).collect();

        assert_eq!(
            urls,
            vec![
                "ws://kis.test:21000/",
                "ws://kis.test:21000/tryitout/H0STCNT0",
                "ws://kis.test:21000/tryitout/H0GSCNI0",
                "ws://kis.test:21000/tryitout/HDFSCNT0",
                "ws://kis.test:21000/tryitout/HDFSASP0",
            ]
        );
        let headers = &endpoints[0].headers;
        assert!(headers.contains(&("appkey".to_string(), "app-key".to_string())));
        assert!(headers.contains(&("approval_key".to_string(), "approval".to_string())));
        assert!(headers.contains(&("custtype".to_string(), "P".to_string())));
    }

    #[test]
    fn debug_redacts_app_key() {
        let codec = KisCodec::new(DEFAULT_WS_URL, "secret-app-key");
        assert!(!format!("{codec:?}").contains("secret-app-key"));
    }
}
