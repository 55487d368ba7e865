// src/codec.rs

//! JSON wire codec for [`Envelope`].
//!
//! The middleware speaks JSON objects with PascalCase field names:
//!
//! ```text
//! { "Type": 0, "RequestId": "...", "Command": "...", "Channel": "...",
//!   "DestinationId": "...", "SourceId": "...", "Payload": "..." }
//! ```
//!
//! [`encode`] always writes every field with `Type` as an integer.
//! [`decode`] is lenient in the ways peers actually differ:
//!
//! - `Type` may be an integer or a numeric string (`"3"`).
//! - Missing or `null` string fields decode as empty strings; the server's
//!   own replies carry little more than `Type`, `RequestId` and `Payload`.
//! - Unknown fields are ignored.
//!
//! It is strict where the dispatcher needs it to be: the text must be a JSON
//! object, `Type` must be present and in `0..=3`, and a response must carry a
//! `RequestId`. Anything else is [`Error::MalformedMessage`].

use serde::{Deserialize, Deserializer, Serialize};

use crate::{Envelope, Error, MessageKind, Result};

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireOut<'a> {
    #[serde(rename = "Type")]
    kind: u8,
    request_id: &'a str,
    command: &'a str,
    channel: &'a str,
    destination_id: &'a str,
    source_id: &'a str,
    payload: &'a str,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireKind {
    Number(i64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireIn {
    #[serde(rename = "Type")]
    kind: Option<WireKind>,
    #[serde(default, deserialize_with = "null_as_empty")]
    request_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    command: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    channel: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    destination_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    source_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    payload: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn kind_from_wire(kind: Option<WireKind>) -> Result<MessageKind> {
    // ---
    let value = match kind {
        Some(WireKind::Number(n)) => n,
        Some(WireKind::Text(text)) => text.trim().parse::<i64>().map_err(|_| {
            Error::MalformedMessage(format!("message type is not numeric: {text:?}"))
        })?,
        None => return Err(Error::MalformedMessage("missing field `Type`".into())),
    };

    MessageKind::try_from(value)
}

/// Encode an envelope as a JSON object string.
pub fn encode(envelope: &Envelope) -> Result<String> {
    // ---
    let wire = WireOut {
        kind: envelope.kind.as_wire(),
        request_id: &envelope.request_id,
        command: &envelope.command,
        channel: &envelope.channel,
        destination_id: &envelope.destination_id,
        source_id: &envelope.source_id,
        payload: &envelope.payload,
    };

    Ok(serde_json::to_string(&wire)?)
}

/// Decode a JSON object string into an envelope.
///
/// # Errors
///
/// Returns [`Error::MalformedMessage`] if the text is not a JSON object, if
/// `Type` is absent or unknown, or if a response has an empty `RequestId`.
pub fn decode(text: &str) -> Result<Envelope> {
    // ---
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| Error::MalformedMessage(e.to_string()))?;

    if !value.is_object() {
        return Err(Error::MalformedMessage("expected a JSON object".into()));
    }

    let wire = WireIn::deserialize(value).map_err(|e| Error::MalformedMessage(e.to_string()))?;
    let kind = kind_from_wire(wire.kind)?;

    if kind.is_response() && wire.request_id.is_empty() {
        return Err(Error::MalformedMessage(format!(
            "{kind} without a RequestId"
        )));
    }

    Ok(Envelope {
        kind,
        request_id: wire.request_id,
        command: wire.command,
        channel: wire.channel,
        destination_id: wire.destination_id,
        source_id: wire.source_id,
        payload: wire.payload,
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::CorrelationId;

    fn full_envelope(kind: MessageKind) -> Envelope {
        Envelope {
            kind,
            request_id: "req-1".into(),
            command: "SENDREQUEST".into(),
            channel: "TestChannel".into(),
            destination_id: "xyz".into(),
            source_id: "peer1".into(),
            payload: "{\"nested\": \"json \\\" text\"}".into(),
        }
    }

    #[test]
    fn test_round_trip_preserves_every_field() {
        // ---
        for kind in [
            MessageKind::Request,
            MessageKind::Update,
            MessageKind::ResponseError,
            MessageKind::ResponseSuccess,
        ] {
            let env = full_envelope(kind);
            let text = encode(&env).unwrap();
            assert_eq!(decode(&text).unwrap(), env);
        }
    }

    #[test]
    fn test_round_trip_update_with_empty_fields() {
        // ---
        let env = Envelope::update("PUBLISHMESSAGE", "", "");
        assert_eq!(decode(&encode(&env).unwrap()).unwrap(), env);
    }

    #[test]
    fn test_encode_uses_pascal_case_and_integer_type() {
        // ---
        let env = Envelope::request(CorrelationId::from("42"), "ADDLISTENER", "chan", "");
        let value: serde_json::Value = serde_json::from_str(&encode(&env).unwrap()).unwrap();

        assert_eq!(value["Type"], 0);
        assert_eq!(value["RequestId"], "42");
        assert_eq!(value["Command"], "ADDLISTENER");
        assert_eq!(value["Channel"], "chan");
        assert_eq!(value["DestinationId"], "");
        assert_eq!(value["SourceId"], "");
        assert_eq!(value["Payload"], "");
    }

    #[test]
    fn test_decode_accepts_string_type() {
        // ---
        let text = r#"{"Type": "1", "RequestId": "123", "Command": "PUBLISHMESSAGE",
                       "Channel": "TestChannel", "DestinationId": "xyz", "Payload": "goodbye"}"#;
        let env = decode(text).unwrap();

        assert_eq!(env.kind, MessageKind::Update);
        assert_eq!(env.payload, "goodbye");
        assert_eq!(env.source_id, "");
    }

    #[test]
    fn test_decode_sparse_server_reply() {
        // ---
        let env = decode(r#"{"Type":3,"RequestId":"abc","Command":null,"Payload":"ok"}"#).unwrap();

        assert_eq!(env.kind, MessageKind::ResponseSuccess);
        assert_eq!(env.request_id, "abc");
        assert_eq!(env.command, "");
        assert_eq!(env.channel, "");
        assert_eq!(env.payload, "ok");
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        // ---
        let env = decode(r#"{"Type":1,"BinaryPayload":null,"Extra":[1,2]}"#).unwrap();
        assert_eq!(env.kind, MessageKind::Update);
    }

    #[test]
    fn test_decode_rejects_malformed_input() {
        // ---
        let cases = [
            "",
            "not json",
            "[0, \"abc\"]",
            "42",
            r#"{"RequestId":"abc"}"#,
            r#"{"Type":7,"RequestId":"abc"}"#,
            r#"{"Type":"three","RequestId":"abc"}"#,
            r#"{"Type":3,"Payload":"orphan"}"#,
            r#"{"Type":2,"RequestId":""}"#,
            r#"{"Type":0,"Payload":5}"#,
        ];

        for text in cases {
            assert!(
                matches!(decode(text), Err(Error::MalformedMessage(_))),
                "expected MalformedMessage for {text:?}"
            );
        }
    }
}
