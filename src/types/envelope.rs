use chrono::{DateTime, Utc};
use serde_json::Value;

use super::TraceId;

/// Wire-level unit carrying a notification payload plus pipeline metadata.
///
/// The payload is opaque application data - the pipeline never inspects it.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Trace identifier, assigned at ingress, immutable thereafter
    pub trace_id: TraceId,

    /// Opaque application payload (recipient, message content, ...)
    pub payload: Value,

    /// Delivery attempt counter - starts at 0, incremented exactly once
    /// per failed delivery before requeue, never reset
    pub attempt: u32,

    /// When the envelope was created
    pub created_at: DateTime<Utc>,

    /// When the last delivery attempt happened (if any)
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Earliest time the envelope is eligible for redelivery (backoff)
    pub not_before: Option<DateTime<Utc>>,

    /// Terminal marker set when the envelope is routed to dead-letter
    pub dead_letter_reason: Option<String>,
}

impl Envelope {
    /// Create a new envelope with a freshly generated trace ID and attempt 0
    pub fn new(payload: Value) -> Self {
        Self::with_trace_id(payload, TraceId::new())
    }

    /// Create a new envelope with a caller-supplied trace ID
    pub fn with_trace_id(payload: Value, trace_id: TraceId) -> Self {
        Self {
            trace_id,
            payload,
            attempt: 0,
            created_at: Utc::now(),
            last_attempt_at: None,
            not_before: None,
            dead_letter_reason: None,
        }
    }

    /// Record one failed delivery attempt.
    ///
    /// Called exactly once per failure, before the envelope is requeued.
    pub fn record_attempt(&mut self) {
        self.attempt += 1;
        self.last_attempt_at = Some(Utc::now());
    }

    /// Check whether the attempt budget is exhausted
    pub fn attempts_exhausted(&self, max_attempts: u32) -> bool {
        self.attempt >= max_attempts
    }

    /// Schedule the envelope for redelivery no earlier than the given time
    pub fn defer_until(&mut self, not_before: DateTime<Utc>) {
        self.not_before = Some(not_before);
    }

    /// Mark the envelope terminal before routing it to dead-letter
    pub fn mark_terminal(&mut self, reason: impl Into<String>) {
        self.dead_letter_reason = Some(reason.into());
    }

    /// Check if the envelope carries the dead-letter terminal marker
    pub fn is_terminal(&self) -> bool {
        self.dead_letter_reason.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_envelope_starts_at_attempt_zero() {
        let envelope = Envelope::new(json!({"recipient": "a@b.c"}));
        assert_eq!(envelope.attempt, 0);
        assert!(envelope.last_attempt_at.is_none());
        assert!(!envelope.is_terminal());
    }

    #[test]
    fn test_record_attempt_increments_once() {
        let mut envelope = Envelope::new(json!({}));
        envelope.record_attempt();
        envelope.record_attempt();
        assert_eq!(envelope.attempt, 2);
        assert!(envelope.last_attempt_at.is_some());
    }

    #[test]
    fn test_attempts_exhausted_at_max() {
        let mut envelope = Envelope::new(json!({}));
        assert!(!envelope.attempts_exhausted(3));
        envelope.attempt = 3;
        assert!(envelope.attempts_exhausted(3));
        envelope.attempt = 4;
        assert!(envelope.attempts_exhausted(3));
    }

    #[test]
    fn test_terminal_marker() {
        let mut envelope = Envelope::new(json!({}));
        envelope.mark_terminal("max attempts exceeded");
        assert!(envelope.is_terminal());
        assert_eq!(
            envelope.dead_letter_reason.as_deref(),
            Some("max attempts exceeded")
        );
    }
}
