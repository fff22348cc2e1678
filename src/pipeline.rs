use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use crate::broker::{BoxStream, Broker};
use crate::codec::{EnvelopeCodec, JsonCodec};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::ledger::{InMemoryLedger, TraceLedger};
use crate::router::RetryRouter;
use crate::topology::TopologyManager;
use crate::types::{Envelope, LedgerEntry, PipelineEvent, TraceId};
use crate::worker::{ConsumerWorker, Deliver};

/// Handle for managing worker lifecycle
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    join_handles: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Gracefully shut down all workers and wait for them to stop
    pub async fn shutdown(self) -> PipelineResult<()> {
        let _ = self.shutdown_tx.send(true);
        for handle in self.join_handles {
            handle
                .await
                .map_err(|e| PipelineError::Internal(format!("Worker join error: {}", e)))?;
        }
        Ok(())
    }
}

/// Notification pipeline facade.
///
/// Owns the broker handle, the trace ledger, the codec, and the delivery
/// handler; exposes the submit/status boundary consumed by an API layer and
/// the worker lifecycle.
pub struct Pipeline {
    broker: Arc<dyn Broker>,
    ledger: Arc<dyn TraceLedger>,
    codec: Arc<dyn EnvelopeCodec>,
    handler: Arc<dyn Deliver>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a pipeline with default config, JSON codec, and in-memory ledger
    pub fn new(broker: Arc<dyn Broker>, handler: Arc<dyn Deliver>) -> Self {
        Self {
            broker,
            ledger: Arc::new(InMemoryLedger::new()),
            codec: Arc::new(JsonCodec),
            handler,
            config: PipelineConfig::default(),
        }
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the trace ledger (tests substitute their own store)
    pub fn with_ledger(mut self, ledger: Arc<dyn TraceLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    /// Replace the envelope codec
    pub fn with_codec(mut self, codec: Arc<dyn EnvelopeCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Declare the pipeline queues. Idempotent, safe on every process start.
    pub async fn ensure_topology(&self) -> PipelineResult<()> {
        TopologyManager::new(self.config.topology.clone())
            .ensure(self.broker.clone())
            .await
            .map(|_| ())
    }

    /// Accept a notification payload for asynchronous delivery.
    ///
    /// Creates the `Received` ledger entry, publishes the envelope to the
    /// input queue, and returns the trace ID immediately - it never waits for
    /// processing.
    #[instrument(skip(self, payload))]
    pub async fn submit(&self, payload: Value) -> PipelineResult<TraceId> {
        let envelope = Envelope::new(payload);
        let trace_id = envelope.trace_id;

        self.ledger.create(LedgerEntry::new(trace_id));
        let bytes = self.codec.encode(&envelope)?;
        self.broker
            .publish(&self.config.topology.input, bytes)
            .await?;

        info!(%trace_id, "Notification accepted");
        Ok(trace_id)
    }

    /// Read-only status lookup by trace ID.
    ///
    /// Surfaces the last recorded ledger state; never blocks on in-flight
    /// processing.
    pub fn status(&self, trace_id: &TraceId) -> Option<LedgerEntry> {
        self.ledger.get(trace_id)
    }

    /// Subscribe to pipeline lifecycle events
    pub fn event_stream(&self) -> BoxStream<PipelineEvent> {
        self.ledger.event_stream()
    }

    /// Start one consumer worker per source queue (input and retry).
    pub fn start_workers(&self) -> PipelineResult<WorkerHandle> {
        let router = Arc::new(RetryRouter::new(
            self.broker.clone(),
            self.ledger.clone(),
            self.codec.clone(),
            self.config.clone(),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut join_handles = Vec::new();

        for queue in [
            self.config.topology.input.clone(),
            self.config.topology.retry.clone(),
        ] {
            let worker = Arc::new(ConsumerWorker::new(
                queue,
                self.broker.clone(),
                router.clone(),
                self.ledger.clone(),
                self.codec.clone(),
                self.handler.clone(),
                self.config.clone(),
            ));
            join_handles.push(tokio::spawn(worker.run(shutdown_rx.clone())));
        }

        info!("Started input and retry workers");
        Ok(WorkerHandle {
            shutdown_tx,
            join_handles,
        })
    }

    /// Get configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}
