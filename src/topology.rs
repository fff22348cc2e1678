use std::sync::Arc;

use tracing::info;

use crate::broker::Broker;
use crate::error::{PipelineError, PipelineResult};

/// Logical queue names for the pipeline stages.
///
/// There is no separate processing queue - consumers read directly from
/// input and retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    /// Queue new notifications are published to
    pub input: String,
    /// Queue failed deliveries are requeued to with backoff
    pub retry: String,
    /// Terminal quarantine queue
    pub dead_letter: String,
}

impl Default for QueueTopology {
    fn default() -> Self {
        Self {
            input: "notification.input".to_string(),
            retry: "notification.retry".to_string(),
            dead_letter: "notification.dead-letter".to_string(),
        }
    }
}

impl QueueTopology {
    /// All queue names in declaration order
    pub fn all(&self) -> [&str; 3] {
        [&self.input, &self.retry, &self.dead_letter]
    }

    /// Set the input queue name
    pub fn with_input(mut self, name: impl Into<String>) -> Self {
        self.input = name.into();
        self
    }

    /// Set the retry queue name
    pub fn with_retry(mut self, name: impl Into<String>) -> Self {
        self.retry = name.into();
        self
    }

    /// Set the dead-letter queue name
    pub fn with_dead_letter(mut self, name: impl Into<String>) -> Self {
        self.dead_letter = name.into();
        self
    }
}

/// Declares the pipeline queues on a broker connection
pub struct TopologyManager {
    topology: QueueTopology,
}

impl TopologyManager {
    pub fn new(topology: QueueTopology) -> Self {
        Self { topology }
    }

    /// Declare all pipeline queues. Idempotent - safe to call on every
    /// process start.
    ///
    /// Scoped acquisition: on success the connection handle is handed back
    /// to the caller; on any declaration error the handle is dropped and
    /// `TopologyError` is returned.
    pub async fn ensure(&self, broker: Arc<dyn Broker>) -> PipelineResult<Arc<dyn Broker>> {
        for queue in self.topology.all() {
            if let Err(e) = broker.declare_queue(queue).await {
                return Err(PipelineError::TopologyError(format!(
                    "declaring queue {}: {}",
                    queue, e
                )));
            }
        }

        info!(
            input = %self.topology.input,
            retry = %self.topology.retry,
            dead_letter = %self.topology.dead_letter,
            "Queue topology ensured"
        );
        Ok(broker)
    }
}
