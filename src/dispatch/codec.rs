//! Wire encodings for payloads.
//!
//! Consumers expect one JSON object per text message with a `"tipo"` tag:
//!
//! ```text
//! {"tipo":"peso","valor":480,"timestamp":"2024-03-01T10:15:02.123456"}
//! {"tipo":"fruta","nombre":"manzana"}
//! ```
//!
//! Older consumers read the bare value instead, see [`LegacyLabelCodec`].

use crate::config::CodecKind;
use crate::error::DispatchError;
use crate::types::{Payload, PayloadKind};
use serde::Serialize;

/// Local time with microseconds and no offset, as the consumers parse it.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Turns a payload into the text of one websocket message.
pub trait MessageCodec: Send + Sync {
    fn encode(&self, payload: &Payload) -> Result<String, DispatchError>;
}

impl<C: MessageCodec + ?Sized> MessageCodec for Box<C> {
    fn encode(&self, payload: &Payload) -> Result<String, DispatchError> {
        (**self).encode(payload)
    }
}

#[derive(Serialize)]
#[serde(tag = "tipo")]
enum Envelope<'a> {
    #[serde(rename = "peso")]
    Weight { valor: u64, timestamp: String },
    #[serde(rename = "fruta")]
    Classification { nombre: &'a str },
}

/// Tagged JSON envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEnvelopeCodec;

impl MessageCodec for JsonEnvelopeCodec {
    fn encode(&self, payload: &Payload) -> Result<String, DispatchError> {
        let envelope = match &payload.kind {
            PayloadKind::Weight { grams } => Envelope::Weight {
                valor: *grams,
                timestamp: payload.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            },
            PayloadKind::Classification { label, .. } => Envelope::Classification { nombre: label },
        };
        Ok(serde_json::to_string(&envelope)?)
    }
}

/// Bare label or bare integer, without an envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyLabelCodec;

impl MessageCodec for LegacyLabelCodec {
    fn encode(&self, payload: &Payload) -> Result<String, DispatchError> {
        Ok(match &payload.kind {
            PayloadKind::Weight { grams } => grams.to_string(),
            PayloadKind::Classification { label, .. } => label.clone(),
        })
    }
}

/// Codec selected in the configuration.
pub fn codec_for(kind: CodecKind) -> Box<dyn MessageCodec> {
    match kind {
        CodecKind::Envelope => Box::new(JsonEnvelopeCodec),
        CodecKind::Legacy => Box::new(LegacyLabelCodec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use serde_json::json;

    fn timestamp() -> chrono::DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 1, 10, 15, 2)
            .single()
            .unwrap()
    }

    #[test]
    fn test_weight_envelope() {
        let text = JsonEnvelopeCodec
            .encode(&Payload::weight(480, timestamp()))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"tipo": "peso", "valor": 480, "timestamp": "2024-03-01T10:15:02.000000"})
        );
    }

    #[test]
    fn test_classification_envelope_has_only_name() {
        let text = JsonEnvelopeCodec
            .encode(&Payload::classification("manzana", 3, timestamp()))
            .unwrap();
        assert_eq!(text, r#"{"tipo":"fruta","nombre":"manzana"}"#);
    }

    #[test]
    fn test_legacy_codec() {
        let codec = codec_for(CodecKind::Legacy);
        assert_eq!(
            codec.encode(&Payload::classification("banana", 1, timestamp())).unwrap(),
            "banana"
        );
        assert_eq!(codec.encode(&Payload::weight(12345, timestamp())).unwrap(), "12345");
    }
}
