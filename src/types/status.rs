use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TraceId;

/// Notification status lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NotificationStatus {
    /// Notification accepted and queued on the input queue
    Received,

    /// A worker is currently attempting delivery
    Processing,

    /// Delivery failed and the envelope is queued for another attempt
    RetryScheduled { retry_at: DateTime<Utc> },

    /// Delivery succeeded
    Delivered { delivered_at: DateTime<Utc> },

    /// Retries exhausted or envelope malformed - permanently quarantined
    DeadLettered {
        dead_lettered_at: DateTime<Utc>,
        reason: String,
    },
}

impl NotificationStatus {
    /// Check if the notification is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered { .. } | Self::DeadLettered { .. })
    }

    /// Get the status name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Processing => "processing",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::Delivered { .. } => "delivered",
            Self::DeadLettered { .. } => "dead_lettered",
        }
    }
}

/// Ledger entry - mutable per-notification status record.
///
/// One entry per trace ID, created on first ingress, mutated in place by
/// whichever worker or router currently owns the envelope, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Trace identifier this entry is keyed by
    pub trace_id: TraceId,

    /// Current notification status
    pub status: NotificationStatus,

    /// Current attempt number (starts at 0, monotonically non-decreasing)
    pub attempt: u32,

    /// Last delivery error (if any)
    pub last_error: Option<String>,

    /// When the entry was created
    pub created_at: DateTime<Utc>,

    /// When the entry was last updated
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Create a new entry in the `Received` state
    pub fn new(trace_id: TraceId) -> Self {
        let now = Utc::now();
        Self {
            trace_id,
            status: NotificationStatus::Received,
            attempt: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A worker picked the envelope up for a delivery attempt
    pub fn mark_processing(&mut self, attempt: u32) {
        self.status = NotificationStatus::Processing;
        self.attempt = self.attempt.max(attempt);
        self.updated_at = Utc::now();
    }

    /// Delivery failed, another attempt is scheduled
    pub fn schedule_retry(&mut self, attempt: u32, retry_at: DateTime<Utc>, error: &str) {
        self.status = NotificationStatus::RetryScheduled { retry_at };
        self.attempt = self.attempt.max(attempt);
        self.last_error = Some(error.to_string());
        self.updated_at = Utc::now();
    }

    /// Delivery succeeded
    pub fn deliver(&mut self) {
        self.status = NotificationStatus::Delivered {
            delivered_at: Utc::now(),
        };
        self.updated_at = Utc::now();
    }

    /// Envelope was quarantined on the dead-letter queue
    pub fn dead_letter(&mut self, attempt: u32, reason: &str) {
        self.status = NotificationStatus::DeadLettered {
            dead_lettered_at: Utc::now(),
            reason: reason.to_string(),
        };
        self.attempt = self.attempt.max(attempt);
        self.last_error = Some(reason.to_string());
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!NotificationStatus::Received.is_terminal());
        assert!(!NotificationStatus::Processing.is_terminal());
        assert!(!NotificationStatus::RetryScheduled { retry_at: Utc::now() }.is_terminal());
        assert!(NotificationStatus::Delivered { delivered_at: Utc::now() }.is_terminal());
        assert!(NotificationStatus::DeadLettered {
            dead_lettered_at: Utc::now(),
            reason: "boom".to_string(),
        }
        .is_terminal());
    }

    #[test]
    fn test_attempt_is_monotone() {
        let mut entry = LedgerEntry::new(TraceId::new());
        entry.schedule_retry(2, Utc::now(), "fail");
        assert_eq!(entry.attempt, 2);

        // A stale lower attempt never rolls the counter back
        entry.mark_processing(1);
        assert_eq!(entry.attempt, 2);
    }

    #[test]
    fn test_dead_letter_records_reason() {
        let mut entry = LedgerEntry::new(TraceId::new());
        entry.dead_letter(3, "max attempts exceeded");
        assert_eq!(entry.attempt, 3);
        assert_eq!(entry.last_error.as_deref(), Some("max attempts exceeded"));
        assert!(entry.status.is_terminal());
    }
}
