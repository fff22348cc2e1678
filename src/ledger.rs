use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::broker::BoxStream;
use crate::types::{LedgerEntry, PipelineEvent, TraceId};

/// Process-wide status store keyed by trace identifier.
///
/// Injected into every component that mutates status, so tests can substitute
/// their own store without losing the single-instance semantics. Transition
/// methods create a minimal entry when none exists - status fidelity is
/// best-effort, delivery correctness never depends on it.
pub trait TraceLedger: Send + Sync {
    /// Create an entry if absent. Returns false when the trace ID was
    /// already known (entries are never duplicated or replaced).
    fn create(&self, entry: LedgerEntry) -> bool;

    /// Read-only lookup by trace ID
    fn get(&self, trace_id: &TraceId) -> Option<LedgerEntry>;

    /// A worker started a delivery attempt
    fn mark_processing(&self, trace_id: &TraceId, attempt: u32);

    /// Delivery failed, another attempt is scheduled
    fn mark_retry_scheduled(
        &self,
        trace_id: &TraceId,
        attempt: u32,
        retry_at: DateTime<Utc>,
        error: &str,
    );

    /// Delivery succeeded
    fn mark_delivered(&self, trace_id: &TraceId);

    /// Envelope was quarantined on the dead-letter queue
    fn mark_dead_lettered(&self, trace_id: &TraceId, attempt: u32, reason: &str);

    /// Event stream for observability (boxed for stable Rust)
    fn event_stream(&self) -> BoxStream<PipelineEvent>;
}

/// In-memory trace ledger with process-lifetime retention
pub struct InMemoryLedger {
    entries: RwLock<HashMap<TraceId, LedgerEntry>>,
    event_broadcaster: broadcast::Sender<PipelineEvent>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        let (event_broadcaster, _) = broadcast::channel(1024);
        Self {
            entries: RwLock::new(HashMap::new()),
            event_broadcaster,
        }
    }

    /// Number of entries currently held
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Mutate the entry for a trace ID under the write lock, creating a
    /// minimal entry first when none exists. Terminal entries are left
    /// untouched so the per-trace status sequence stays monotonic.
    fn transition<F>(&self, trace_id: &TraceId, f: F) -> Option<PipelineEvent>
    where
        F: FnOnce(&mut LedgerEntry) -> PipelineEvent,
    {
        let mut entries = self.entries.write();
        let entry = entries.entry(*trace_id).or_insert_with(|| {
            debug!(%trace_id, "Recreating missing ledger entry");
            LedgerEntry::new(*trace_id)
        });

        if entry.status.is_terminal() {
            return None;
        }

        Some(f(entry))
    }

    fn emit(&self, event: Option<PipelineEvent>) {
        if let Some(event) = event {
            let _ = self.event_broadcaster.send(event);
        }
    }
}

impl TraceLedger for InMemoryLedger {
    fn create(&self, entry: LedgerEntry) -> bool {
        let trace_id = entry.trace_id;
        let inserted = {
            let mut entries = self.entries.write();
            if entries.contains_key(&trace_id) {
                false
            } else {
                entries.insert(trace_id, entry);
                true
            }
        };

        if inserted {
            self.emit(Some(PipelineEvent::Submitted {
                trace_id,
                at: Utc::now(),
            }));
        }
        inserted
    }

    fn get(&self, trace_id: &TraceId) -> Option<LedgerEntry> {
        self.entries.read().get(trace_id).cloned()
    }

    fn mark_processing(&self, trace_id: &TraceId, attempt: u32) {
        let event = self.transition(trace_id, |entry| {
            entry.mark_processing(attempt);
            PipelineEvent::Processing {
                trace_id: *trace_id,
                attempt: entry.attempt,
                at: Utc::now(),
            }
        });
        self.emit(event);
    }

    fn mark_retry_scheduled(
        &self,
        trace_id: &TraceId,
        attempt: u32,
        retry_at: DateTime<Utc>,
        error: &str,
    ) {
        let event = self.transition(trace_id, |entry| {
            entry.schedule_retry(attempt, retry_at, error);
            PipelineEvent::RetryScheduled {
                trace_id: *trace_id,
                attempt: entry.attempt,
                retry_at,
                error: error.to_string(),
                at: Utc::now(),
            }
        });
        self.emit(event);
    }

    fn mark_delivered(&self, trace_id: &TraceId) {
        let event = self.transition(trace_id, |entry| {
            entry.deliver();
            PipelineEvent::Delivered {
                trace_id: *trace_id,
                at: Utc::now(),
            }
        });
        self.emit(event);
    }

    fn mark_dead_lettered(&self, trace_id: &TraceId, attempt: u32, reason: &str) {
        let event = self.transition(trace_id, |entry| {
            entry.dead_letter(attempt, reason);
            PipelineEvent::DeadLettered {
                trace_id: *trace_id,
                reason: reason.to_string(),
                at: Utc::now(),
            }
        });
        self.emit(event);
    }

    fn event_stream(&self) -> BoxStream<PipelineEvent> {
        let receiver = self.event_broadcaster.subscribe();
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};
        let stream = BroadcastStream::new(receiver).filter_map(|result| result.ok());
        Box::pin(stream)
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}
