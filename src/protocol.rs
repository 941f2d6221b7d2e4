//! The wire protocol codec: one self-delimited JSON object per message, trimmed of surrounding
//! whitespace, with a fixed envelope shape and a free-form payload body.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// The `payload.type` discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    Rts,
    Cts,
    Request,
    Response,
}

impl PayloadType {
    pub fn as_str(self) -> &'static str {
        match self {
            PayloadType::Rts => "rts",
            PayloadType::Cts => "cts",
            PayloadType::Request => "request",
            PayloadType::Response => "response",
        }
    }
}

/// Which side stamped the envelope's timestamp field. The client always sends `clientTime`; the
/// server always sends `serverTime`. Both are accepted on receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    Client(i64),
    Server(i64),
}

impl Stamp {
    pub fn seconds(self) -> i64 {
        match self {
            Stamp::Client(t) | Stamp::Server(t) => t,
        }
    }
}

/// Either a `payload` object or an `error` string, the two mutually exclusive envelope bodies.
#[derive(Debug, Clone)]
pub enum Body {
    Payload(Value),
    Error(String),
}

/// A single decoded (or to-be-encoded) wire message.
#[derive(Debug, Clone)]
pub struct Message {
    pub stamp: Stamp,
    pub label: String,
    pub body: Body,
}

#[derive(Serialize, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "clientTime", skip_serializing_if = "Option::is_none")]
    client_time: Option<i64>,
    #[serde(rename = "serverTime", skip_serializing_if = "Option::is_none")]
    server_time: Option<i64>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Message {
    /// Build a client-originated message carrying a payload, inserting `type` into the payload
    /// object.
    pub fn client_payload(
        time: i64,
        label: impl Into<String>,
        payload_type: PayloadType,
        mut fields: Map<String, Value>,
    ) -> Self {
        fields.insert("type".to_string(), Value::String(payload_type.as_str().into()));
        Message {
            stamp: Stamp::Client(time),
            label: label.into(),
            body: Body::Payload(Value::Object(fields)),
        }
    }

    /// Build a client-originated error reply.
    pub fn client_error(time: i64, label: impl Into<String>, text: impl Into<String>) -> Self {
        Message {
            stamp: Stamp::Client(time),
            label: label.into(),
            body: Body::Error(text.into()),
        }
    }

    /// Encode this message to its wire representation: a single JSON object, no trailing
    /// newline (the receiver delimits on chunk boundaries, not on newlines).
    pub fn encode(&self) -> Vec<u8> {
        let (client_time, server_time) = match self.stamp {
            Stamp::Client(t) => (Some(t), None),
            Stamp::Server(t) => (None, Some(t)),
        };
        let raw = RawEnvelope {
            client_time,
            server_time,
            message: self.label.clone(),
            payload: match &self.body {
                Body::Payload(v) => Some(v.clone()),
                Body::Error(_) => None,
            },
            error: match &self.body {
                Body::Error(e) => Some(e.clone()),
                Body::Payload(_) => None,
            },
        };
        serde_json::to_vec(&raw).expect("envelope is always representable as JSON")
    }

    /// Decode a single message from a chunk of bytes, trimming surrounding whitespace first.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let trimmed = trim_whitespace(bytes);
        let raw: RawEnvelope = serde_json::from_slice(trimmed)?;

        let stamp = match (raw.client_time, raw.server_time) {
            (Some(t), _) => Stamp::Client(t),
            (None, Some(t)) => Stamp::Server(t),
            (None, None) => return Err(ProtocolError::MissingField("clientTime/serverTime")),
        };

        let body = match (raw.payload, raw.error) {
            (Some(payload), None) => Body::Payload(payload),
            (None, Some(error)) => Body::Error(error),
            (Some(_), Some(_)) | (None, None) => {
                return Err(ProtocolError::MissingField("payload/error"))
            }
        };

        Ok(Message {
            stamp,
            label: raw.message,
            body,
        })
    }

    /// True iff the message carries a top-level `error`.
    pub fn is_error(&self) -> bool {
        matches!(self.body, Body::Error(_))
    }

    /// Compare the message label case-insensitively, as required on receive.
    pub fn label_is(&self, expected: &str) -> bool {
        self.label.eq_ignore_ascii_case(expected)
    }

    pub fn error_text(&self) -> Option<&str> {
        match &self.body {
            Body::Error(text) => Some(text),
            Body::Payload(_) => None,
        }
    }

    pub fn payload(&self) -> Result<&Value, ProtocolError> {
        match &self.body {
            Body::Payload(v) => Ok(v),
            Body::Error(e) => Err(ProtocolError::PeerError(e.clone())),
        }
    }

    /// The `payload.type` field, if this message carries a payload.
    pub fn payload_type(&self) -> Result<&str, ProtocolError> {
        self.payload()?
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingField("payload.type"))
    }

    /// Assert that `payload.type` equals `expected`, case-sensitively (the wire emits it
    /// lowercase and the server is expected to echo it verbatim).
    pub fn expect_payload_type(&self, expected: PayloadType) -> Result<&Value, ProtocolError> {
        let got = self.payload_type()?;
        if got == expected.as_str() {
            self.payload()
        } else {
            Err(ProtocolError::UnexpectedPayloadType {
                expected: expected.as_str(),
                got: got.to_string(),
            })
        }
    }

    /// Assert that `payload.result == "ok"`.
    pub fn expect_result_ok(&self) -> Result<(), ProtocolError> {
        let ok = self
            .payload()?
            .get("result")
            .and_then(Value::as_str)
            .map(|s| s == "ok")
            .unwrap_or(false);
        if ok {
            Ok(())
        } else {
            Err(ProtocolError::InvalidPayload("result"))
        }
    }
}

fn trim_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|p| p + 1)
        .unwrap_or(start);
    &bytes[start..end]
}

/// Build a `Map` for the `id` field carried by `rts`/`cts` payloads.
pub fn rts_cts_fields(id: u32) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("id".to_string(), Value::from(id));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_well_formed_message() {
        let fields = rts_cts_fields(42);
        let msg = Message::client_payload(1700000000, "ping", PayloadType::Rts, fields);
        let bytes = msg.encode();
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded.label, "ping");
        assert_eq!(decoded.stamp.seconds(), 1700000000);
        assert_eq!(decoded.expect_payload_type(PayloadType::Rts).unwrap()["id"], 42);
    }

    #[test]
    fn decode_rejects_missing_message() {
        let err = Message::decode(br#"{"clientTime":1,"payload":{"type":"rts","id":1}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn decode_rejects_missing_time() {
        let err = Message::decode(br#"{"message":"ping","payload":{"type":"rts","id":1}}"#);
        assert!(matches!(err, Err(ProtocolError::MissingField("clientTime/serverTime"))));
    }

    #[test]
    fn decode_rejects_missing_payload_and_error() {
        let err = Message::decode(br#"{"clientTime":1,"message":"ping"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn decode_trims_surrounding_whitespace() {
        let msg = Message::decode(b"  \n\t{\"clientTime\":1,\"message\":\"ping\",\"error\":\"boom\"}\t\n  ").unwrap();
        assert!(msg.is_error());
        assert_eq!(msg.error_text(), Some("boom"));
    }

    #[test]
    fn label_compares_case_insensitively() {
        let msg = Message::decode(br#"{"clientTime":1,"message":"PiNg","error":"x"}"#).unwrap();
        assert!(msg.label_is("ping"));
    }
}
