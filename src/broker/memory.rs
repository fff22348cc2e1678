use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::broker::{AckToken, BoxStream, Broker, Delivery};
use crate::error::{PipelineError, PipelineResult};

struct QueueSlot {
    tx: mpsc::UnboundedSender<Delivery>,
    /// Receiver parked until a consumer attaches (one consumer per queue)
    rx: Option<mpsc::UnboundedReceiver<Delivery>>,
}

/// In-memory broker for testing and single-process deployments.
///
/// Each queue is an unbounded channel, which provides the one-consumer-holds-
/// one-message mutual exclusion the pipeline relies on. Unacked deliveries
/// are tracked so tests can assert release behavior; a closed broker fails
/// every operation with `TransportFault`.
pub struct InMemoryBroker {
    queues: RwLock<HashMap<String, QueueSlot>>,
    in_flight: RwLock<HashMap<AckToken, String>>,
    closed: RwLock<bool>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            in_flight: RwLock::new(HashMap::new()),
            closed: RwLock::new(false),
        }
    }

    /// Names of all declared queues
    pub fn declared_queues(&self) -> Vec<String> {
        self.queues.read().keys().cloned().collect()
    }

    /// Number of deliveries published but not yet acked
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.read().len()
    }

    /// Simulate connection loss: every subsequent operation fails with
    /// `TransportFault` and attached consume streams end.
    pub fn close(&self) {
        *self.closed.write() = true;
        self.queues.write().clear();
        debug!("In-memory broker closed");
    }

    fn check_open(&self) -> PipelineResult<()> {
        if *self.closed.read() {
            Err(PipelineError::TransportFault(
                "broker connection closed".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_queue(&self, queue: &str) -> PipelineResult<()> {
        self.check_open()?;

        let mut queues = self.queues.write();
        if !queues.contains_key(queue) {
            let (tx, rx) = mpsc::unbounded_channel();
            queues.insert(queue.to_string(), QueueSlot { tx, rx: Some(rx) });
            debug!(queue, "Queue declared");
        }
        Ok(())
    }

    async fn publish(&self, queue: &str, bytes: Vec<u8>) -> PipelineResult<()> {
        self.check_open()?;

        let token = AckToken::new();
        let delivery = Delivery {
            queue: queue.to_string(),
            bytes,
            ack_token: token.clone(),
        };

        let queues = self.queues.read();
        let slot = queues
            .get(queue)
            .ok_or_else(|| PipelineError::QueueNotFound(queue.to_string()))?;

        self.in_flight.write().insert(token.clone(), queue.to_string());
        slot.tx.send(delivery).map_err(|_| {
            self.in_flight.write().remove(&token);
            PipelineError::TransportFault(format!("queue {} channel closed", queue))
        })
    }

    async fn consume(&self, queue: &str) -> PipelineResult<BoxStream<Delivery>> {
        self.check_open()?;

        let mut queues = self.queues.write();
        let slot = queues
            .get_mut(queue)
            .ok_or_else(|| PipelineError::QueueNotFound(queue.to_string()))?;

        let rx = slot.rx.take().ok_or_else(|| {
            PipelineError::Internal(format!("queue {} already has a consumer", queue))
        })?;

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn ack(&self, token: AckToken) -> PipelineResult<()> {
        self.check_open()?;

        self.in_flight
            .write()
            .remove(&token)
            .map(|_| ())
            .ok_or(PipelineError::InvalidAckToken)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}
