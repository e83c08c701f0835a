use serde_json::Value;

/// Fixed vocabulary of envelope types pushed by the gateway. Unrecognized
/// type tags are preserved in `Other` so they still route through the cache
/// and subscriber registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Positions,
    PositionMetrics,
    Orders,
    AccountMetrics,
    Instruments,
    Limits,
    /// Trade-log and notification messages.
    TradeLog,
    /// Chart/OHLC feed, further discriminated by a `subtopic` body field.
    ChartFeed,
    Other(String),
}

impl EnvelopeKind {
    pub fn from_wire(wire: &str) -> Self {
        match wire {
            "POSITIONS" => Self::Positions,
            "POSITION_METRICS" => Self::PositionMetrics,
            "ORDERS" => Self::Orders,
            "ACCOUNT_METRICS" => Self::AccountMetrics,
            "INSTRUMENTS" => Self::Instruments,
            "LIMITS" => Self::Limits,
            "MESSAGE" => Self::TradeLog,
            "CHART_FEED" => Self::ChartFeed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Self::Positions => "POSITIONS",
            Self::PositionMetrics => "POSITION_METRICS",
            Self::Orders => "ORDERS",
            Self::AccountMetrics => "ACCOUNT_METRICS",
            Self::Instruments => "INSTRUMENTS",
            Self::Limits => "LIMITS",
            Self::TradeLog => "MESSAGE",
            Self::ChartFeed => "CHART_FEED",
            Self::Other(wire) => wire,
        }
    }
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Decoded business unit of the duplex stream.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub account_id: Option<String>,
    pub body: Value,
}

/// One decoded frame: either a typed envelope, or protocol noise
/// (heartbeats, tracking-id preambles) that business logic never sees.
#[derive(Debug, Clone)]
pub enum Frame {
    Envelope(Envelope),
    Control(String),
}

/// Length of the connection tracking id embedded in the first frame.
const TRACKING_ID_LEN: usize = 36;

/// Decode a raw text frame of the form `<byteLength>|<payload>`. The payload
/// is an envelope only when it parses as a JSON object with a `type` tag;
/// everything else is returned verbatim as a control frame. Pure function.
pub fn decode_frame(raw: &str) -> Frame {
    let Some(pipe) = raw.find('|') else {
        return Frame::Control(raw.to_string());
    };
    let payload = &raw[pipe + 1..];

    let Ok(value) = serde_json::from_str::<Value>(payload) else {
        return Frame::Control(raw.to_string());
    };
    let Some(object) = value.as_object() else {
        return Frame::Control(raw.to_string());
    };
    let Some(wire_type) = object.get("type").and_then(Value::as_str) else {
        return Frame::Control(raw.to_string());
    };

    Frame::Envelope(Envelope {
        kind: EnvelopeKind::from_wire(wire_type),
        account_id: object
            .get("accountId")
            .and_then(Value::as_str)
            .map(str::to_string),
        body: object.get("body").cloned().unwrap_or(Value::Null),
    })
}

/// Extract the connection tracking id from a raw frame. The gateway embeds
/// a 36-character identifier in the pre-`|` prefix of the first frame of
/// every fresh connection; later frames carry a numeric byte length there.
pub fn extract_tracking_id(raw: &str) -> Option<String> {
    let prefix = match raw.find('|') {
        Some(pipe) => &raw[..pipe],
        None => raw,
    };
    let prefix = prefix.trim();
    (prefix.len() == TRACKING_ID_LEN).then(|| prefix.to_string())
}

/// Build a wire frame from an envelope payload. Test and tooling helper; the
/// client itself never sends frames.
pub fn encode_frame(payload: &Value) -> String {
    let json = payload.to_string();
    format!("{}|{}", json.len(), json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame_for(value: &Value) -> String {
        encode_frame(value)
    }

    #[test]
    fn decodes_envelope_frames() {
        let raw = frame_for(&json!({
            "type": "POSITIONS",
            "accountId": "ACC-1",
            "body": [{"positionCode": "POS-1"}]
        }));

        match decode_frame(&raw) {
            Frame::Envelope(envelope) => {
                assert_eq!(envelope.kind, EnvelopeKind::Positions);
                assert_eq!(envelope.account_id.as_deref(), Some("ACC-1"));
                assert_eq!(envelope.body[0]["positionCode"], "POS-1");
            }
            Frame::Control(_) => panic!("expected envelope"),
        }
    }

    #[test]
    fn null_account_id_decodes_as_none() {
        let raw = frame_for(&json!({"type": "ORDERS", "accountId": null, "body": []}));
        match decode_frame(&raw) {
            Frame::Envelope(envelope) => assert!(envelope.account_id.is_none()),
            Frame::Control(_) => panic!("expected envelope"),
        }
    }

    #[test]
    fn heartbeats_are_control_frames() {
        assert!(matches!(decode_frame("X"), Frame::Control(_)));
        assert!(matches!(decode_frame("2|13"), Frame::Control(_)));
        assert!(matches!(decode_frame("no pipe here"), Frame::Control(_)));
    }

    #[test]
    fn non_envelope_json_is_control() {
        // Valid JSON but no type tag.
        assert!(matches!(decode_frame(r#"10|{"a": 1}"#), Frame::Control(_)));
        assert!(matches!(decode_frame("7|[1,2,3]"), Frame::Control(_)));
    }

    #[test]
    fn unknown_types_are_preserved() {
        let raw = frame_for(&json!({"type": "QUOTES", "body": {}}));
        match decode_frame(&raw) {
            Frame::Envelope(envelope) => {
                assert_eq!(envelope.kind, EnvelopeKind::Other("QUOTES".into()));
                assert_eq!(envelope.kind.as_wire(), "QUOTES");
            }
            Frame::Control(_) => panic!("expected envelope"),
        }
    }

    #[test]
    fn tracking_id_from_first_frame_prefix() {
        let id = "4f0c42a1-9e7b-4d2f-8a3c-5b6d7e8f9a0b";
        let raw = format!("{id}|0|X");
        assert_eq!(extract_tracking_id(&raw).as_deref(), Some(id));

        // Ordinary frames carry a byte length prefix, not a tracking id.
        assert_eq!(extract_tracking_id("123|{}"), None);
        assert_eq!(extract_tracking_id("X"), None);
    }
}
