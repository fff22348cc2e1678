use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    codec::EnvelopeCodec,
    error::{PipelineError, PipelineResult},
    types::{Envelope, TraceId},
};

/// JSON wire form of an envelope.
///
/// `attempt` travels as a wide signed integer so that a corrupted counter,
/// negative or oversized, is detectable on decode instead of wrapping
/// silently.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    trace_id: TraceId,
    payload: Value,
    attempt: i64,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    not_before: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dead_letter_reason: Option<String>,
}

/// JSON codec for notification envelopes
#[derive(Debug, Clone, Default)]
pub struct JsonCodec;

impl EnvelopeCodec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> PipelineResult<Vec<u8>> {
        let wire = WireEnvelope {
            trace_id: envelope.trace_id,
            payload: envelope.payload.clone(),
            attempt: i64::from(envelope.attempt),
            created_at: envelope.created_at,
            last_attempt_at: envelope.last_attempt_at,
            not_before: envelope.not_before,
            dead_letter_reason: envelope.dead_letter_reason.clone(),
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    fn decode(&self, bytes: &[u8]) -> PipelineResult<Envelope> {
        let wire: WireEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| PipelineError::MalformedEnvelope(e.to_string()))?;

        // Rejects both negative and oversized counters; truncating here would
        // hand a corrupted envelope a fresh retry budget
        let attempt = u32::try_from(wire.attempt).map_err(|_| {
            PipelineError::MalformedEnvelope(format!(
                "attempt counter out of range: {}",
                wire.attempt
            ))
        })?;

        Ok(Envelope {
            trace_id: wire.trace_id,
            payload: wire.payload,
            attempt,
            created_at: wire.created_at,
            last_attempt_at: wire.last_attempt_at,
            not_before: wire.not_before,
            dead_letter_reason: wire.dead_letter_reason,
        })
    }

    fn codec_id(&self) -> &'static str {
        "json"
    }

    fn recover_trace_id(&self, bytes: &[u8]) -> Option<TraceId> {
        recover_trace_id(bytes)
    }
}

/// Best-effort trace ID recovery from bytes that failed to decode.
///
/// Used for dead-letter ledger entries when a malformed message still carries
/// a readable trace ID.
pub fn recover_trace_id(bytes: &[u8]) -> Option<TraceId> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    value
        .get("traceId")
        .and_then(Value::as_str)
        .and_then(TraceId::parse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_roundtrip_preserves_trace_payload_and_attempt() {
        let codec = JsonCodec;
        let envelope = Envelope::new(json!({"recipient": "a@b.c", "body": "hi"}));

        let bytes = codec.encode(&envelope).unwrap();
        let decoded = codec.decode(&bytes).unwrap();

        assert_eq!(decoded.trace_id, envelope.trace_id);
        assert_eq!(decoded.payload, envelope.payload);
        assert_eq!(decoded.attempt, 0);
    }

    #[test]
    fn test_decode_rejects_negative_attempt() {
        let codec = JsonCodec;
        let bytes = serde_json::to_vec(&json!({
            "traceId": TraceId::new().to_string(),
            "payload": {"x": 1},
            "attempt": -1,
            "createdAt": Utc::now(),
        }))
        .unwrap();

        let result = codec.decode(&bytes);
        assert!(matches!(result, Err(PipelineError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_decode_rejects_attempt_above_u32_range() {
        let codec = JsonCodec;
        let bytes = serde_json::to_vec(&json!({
            "traceId": TraceId::new().to_string(),
            "payload": {"x": 1},
            "attempt": i64::from(u32::MAX) + 1,
            "createdAt": Utc::now(),
        }))
        .unwrap();

        let result = codec.decode(&bytes);
        assert!(matches!(result, Err(PipelineError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let codec = JsonCodec;
        let bytes = serde_json::to_vec(&json!({"payload": {"x": 1}})).unwrap();

        let result = codec.decode(&bytes);
        assert!(matches!(result, Err(PipelineError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_decode_rejects_non_json() {
        let codec = JsonCodec;
        let result = codec.decode(b"\x00\x01not json");
        assert!(matches!(result, Err(PipelineError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_terminal_marker_survives_roundtrip() {
        let codec = JsonCodec;
        let mut envelope = Envelope::new(json!({}));
        envelope.mark_terminal("max attempts exceeded");

        let decoded = codec.decode(&codec.encode(&envelope).unwrap()).unwrap();
        assert_eq!(
            decoded.dead_letter_reason.as_deref(),
            Some("max attempts exceeded")
        );
    }

    #[test]
    fn test_recover_trace_id_from_partial_message() {
        let trace_id = TraceId::new();
        // Missing attempt/createdAt - undecodable as an envelope
        let bytes =
            serde_json::to_vec(&json!({"traceId": trace_id.to_string(), "payload": {}})).unwrap();

        assert!(JsonCodec.decode(&bytes).is_err());
        assert_eq!(recover_trace_id(&bytes), Some(trace_id));
        assert_eq!(recover_trace_id(b"garbage"), None);
    }
}
