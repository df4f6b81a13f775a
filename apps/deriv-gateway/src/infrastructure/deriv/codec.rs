//! Frame Codec
//!
//! Decodes each inbound text frame exactly once into an [`InboundFrame`]
//! variant. Frames carrying a `req_id` are responses; frames carrying a
//! `subscription` object are pushes; standalone `error` objects become
//! error frames. Anything else is a protocol error, which the reader
//! loop logs and drops without affecting pending requests.

use super::messages::{BalancePush, ErrorFrame, InboundFrame, Response, Tick, TickPush};

/// Malformed or unrecognized frame. Logged and dropped; the connection
/// continues.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON.
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame is valid JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// A required field is missing or has the wrong type.
    #[error("frame is missing field: {0}")]
    MissingField(&'static str),

    /// The frame matches no known message shape.
    #[error("unrecognized frame shape")]
    UnrecognizedFrame,
}

/// JSON codec for the Deriv wire protocol.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame into its tagged variant.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] for malformed or unrecognized frames.
    pub fn decode(&self, text: &str) -> Result<InboundFrame, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let obj = value.as_object().ok_or(ProtocolError::NotAnObject)?;

        if let Some(req_id) = obj.get("req_id").and_then(serde_json::Value::as_u64) {
            return Ok(InboundFrame::Response(Response { req_id, body: value }));
        }

        if obj.contains_key("subscription") {
            let subscription_id = obj
                .get("subscription")
                .and_then(|s| s.get("id"))
                .and_then(serde_json::Value::as_str)
                .ok_or(ProtocolError::MissingField("subscription.id"))?
                .to_string();

            if let Some(tick) = obj.get("tick") {
                let tick: Tick = serde_json::from_value(tick.clone())?;
                return Ok(InboundFrame::PushTick(TickPush {
                    subscription_id,
                    tick,
                }));
            }

            if let Some(balance) = obj.get("balance") {
                let balance = serde_json::from_value(balance.clone())?;
                return Ok(InboundFrame::PushBalance(BalancePush {
                    subscription_id,
                    balance,
                }));
            }

            return Err(ProtocolError::UnrecognizedFrame);
        }

        if let Some(error) = obj.get("error") {
            let error = serde_json::from_value(error.clone())?;
            return Ok(InboundFrame::Error(ErrorFrame { error }));
        }

        Err(ProtocolError::UnrecognizedFrame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_response_by_req_id() {
        let codec = JsonCodec::new();
        let frame = codec
            .decode(r#"{"req_id": 42, "msg_type": "ping", "ping": "pong"}"#)
            .unwrap();
        match frame {
            InboundFrame::Response(resp) => {
                assert_eq!(resp.req_id, 42);
                assert_eq!(resp.msg_type(), Some("ping"));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn decode_tick_push() {
        let codec = JsonCodec::new();
        let frame = codec
            .decode(
                r#"{"subscription": {"id": "sub-7"},
                    "tick": {"symbol": "R_100", "quote": 612.34, "epoch": 1700000000}}"#,
            )
            .unwrap();
        match frame {
            InboundFrame::PushTick(push) => {
                assert_eq!(push.subscription_id, "sub-7");
                assert_eq!(push.tick.symbol, "R_100");
                assert!((push.tick.quote - 612.34).abs() < f64::EPSILON);
            }
            other => panic!("expected tick push, got {other:?}"),
        }
    }

    #[test]
    fn decode_balance_push() {
        let codec = JsonCodec::new();
        let frame = codec
            .decode(
                r#"{"subscription": {"id": "sub-2"},
                    "balance": {"balance": 1000.0, "currency": "USD"}}"#,
            )
            .unwrap();
        match frame {
            InboundFrame::PushBalance(push) => {
                assert_eq!(push.balance.currency, "USD");
            }
            other => panic!("expected balance push, got {other:?}"),
        }
    }

    #[test]
    fn decode_standalone_error() {
        let codec = JsonCodec::new();
        let frame = codec
            .decode(r#"{"error": {"code": "RateLimit", "message": "slow down"}}"#)
            .unwrap();
        match frame {
            InboundFrame::Error(err) => assert_eq!(err.error.code, "RateLimit"),
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[test]
    fn response_with_subscription_is_a_response() {
        // A subscribe acknowledgement carries both a correlation id and
        // a subscription id; correlation wins.
        let codec = JsonCodec::new();
        let frame = codec
            .decode(
                r#"{"req_id": 5, "msg_type": "tick",
                    "subscription": {"id": "sub-1"},
                    "tick": {"symbol": "R_100", "quote": 1.0, "epoch": 1}}"#,
            )
            .unwrap();
        match frame {
            InboundFrame::Response(resp) => {
                assert_eq!(resp.subscription_id(), Some("sub-1"));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_rejected() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode("{not json"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn non_object_is_rejected() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode("[1, 2, 3]"),
            Err(ProtocolError::NotAnObject)
        ));
    }

    #[test]
    fn unknown_shape_is_rejected() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode(r#"{"hello": "world"}"#),
            Err(ProtocolError::UnrecognizedFrame)
        ));
    }

    #[test]
    fn push_without_subscription_id_is_rejected() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode(r#"{"subscription": {}, "tick": {"symbol": "R_100", "quote": 1.0, "epoch": 1}}"#),
            Err(ProtocolError::MissingField("subscription.id"))
        ));
    }
}
