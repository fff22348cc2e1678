use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TraceId;

/// Minimal stable event protocol for structured observability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// Notification was accepted and queued for delivery
    Submitted { trace_id: TraceId, at: DateTime<Utc> },

    /// A worker started a delivery attempt
    Processing {
        trace_id: TraceId,
        attempt: u32,
        at: DateTime<Utc>,
    },

    /// Delivery failed, a retry is scheduled
    RetryScheduled {
        trace_id: TraceId,
        attempt: u32,
        retry_at: DateTime<Utc>,
        error: String,
        at: DateTime<Utc>,
    },

    /// Delivery succeeded
    Delivered { trace_id: TraceId, at: DateTime<Utc> },

    /// Envelope was quarantined on the dead-letter queue
    DeadLettered {
        trace_id: TraceId,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Submitted { .. } => "submitted",
            Self::Processing { .. } => "processing",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::Delivered { .. } => "delivered",
            Self::DeadLettered { .. } => "dead_lettered",
        }
    }

    /// Get the trace ID from any event
    pub fn trace_id(&self) -> &TraceId {
        match self {
            Self::Submitted { trace_id, .. } => trace_id,
            Self::Processing { trace_id, .. } => trace_id,
            Self::RetryScheduled { trace_id, .. } => trace_id,
            Self::Delivered { trace_id, .. } => trace_id,
            Self::DeadLettered { trace_id, .. } => trace_id,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Submitted { at, .. } => at,
            Self::Processing { at, .. } => at,
            Self::RetryScheduled { at, .. } => at,
            Self::Delivered { at, .. } => at,
            Self::DeadLettered { at, .. } => at,
        }
    }
}
