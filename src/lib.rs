//! # notify-pipeline: Asynchronous Notification Delivery
//!
//! **Message pipeline with bounded retries and dead-letter quarantine**
//!
//! notify-pipeline accepts notification payloads, queues them for
//! asynchronous delivery, and guarantees that a failed delivery is retried a
//! bounded number of times before being permanently quarantined:
//!
//! - **At-Least-Once Delivery**: idempotent-safe retries with an attempt
//!   counter that increases exactly once per failure and never resets
//! - **Retry/DLQ State Machine**: exponential backoff between attempts, then
//!   terminal quarantine on the dead-letter queue
//! - **Trace Ledger**: in-memory status store keyed by trace identifier,
//!   updated at every pipeline transition, queryable at any time
//! - **Non-Blocking Workers**: every envelope is processed on its own task
//!   with a per-attempt timeout, so one slow delivery never stalls the rest
//! - **Explicit Ack Contract**: the broker's one-consumer-per-message
//!   guarantee is modeled as an acknowledgment handle, not implicit queue
//!   semantics
//! - **Structured Observability**: a broadcast event stream plus `tracing`
//!   instrumentation across the worker and router paths
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use notify_pipeline::prelude::*;
//! use std::sync::Arc;
//!
//! struct EmailDelivery;
//!
//! #[async_trait::async_trait]
//! impl Deliver for EmailDelivery {
//!     async fn deliver(&self, payload: &serde_json::Value) -> Result<(), DeliveryError> {
//!         // hand the payload to the real delivery mechanism
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> PipelineResult<()> {
//! let broker = Arc::new(InMemoryBroker::new());
//! let pipeline = Pipeline::new(broker, Arc::new(EmailDelivery))
//!     .with_config(PipelineConfig::default().with_max_attempts(3));
//!
//! pipeline.ensure_topology().await?;
//! let workers = pipeline.start_workers()?;
//!
//! let trace_id = pipeline.submit(serde_json::json!({
//!     "recipient": "ops@example.com",
//!     "contentMessage": "disk usage above 90%",
//! })).await?;
//!
//! let entry = pipeline.status(&trace_id);
//!
//! workers.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod codec;
pub mod config;
pub mod error;
pub mod ledger;
pub mod pipeline;
pub mod router;
pub mod topology;
pub mod types;
pub mod worker;

// Core API exports
pub use broker::{AckToken, BoxStream, Broker, Delivery, InMemoryBroker};
pub use codec::{EnvelopeCodec, JsonCodec};
pub use config::PipelineConfig;
pub use error::{DeliveryError, PipelineError, PipelineResult};
pub use ledger::{InMemoryLedger, TraceLedger};
pub use pipeline::{Pipeline, WorkerHandle};
pub use router::RetryRouter;
pub use topology::{QueueTopology, TopologyManager};
pub use types::{Envelope, LedgerEntry, NotificationStatus, PipelineEvent, TraceId};
pub use worker::{ConsumerWorker, Deliver};

/// Prelude for wiring a notification pipeline
pub mod prelude {
    // Facade and lifecycle
    pub use crate::{Pipeline, PipelineConfig, WorkerHandle};

    // Essential types
    pub use crate::{Envelope, LedgerEntry, NotificationStatus, TraceId};

    // Seams
    pub use crate::{Broker, Deliver, EnvelopeCodec, TraceLedger};

    // In-tree implementations
    pub use crate::{InMemoryBroker, InMemoryLedger, JsonCodec};

    // Errors
    pub use crate::{DeliveryError, PipelineError, PipelineResult};

    // Topology
    pub use crate::QueueTopology;

    // Essential traits
    pub use async_trait::async_trait;
}
