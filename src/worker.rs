use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, Delivery};
use crate::codec::EnvelopeCodec;
use crate::config::PipelineConfig;
use crate::error::{DeliveryError, PipelineError};
use crate::ledger::TraceLedger;
use crate::router::RetryRouter;

/// Delivery mechanism boundary.
///
/// Must be safely callable multiple times for the same payload - idempotency
/// is the delivery mechanism's responsibility, not the pipeline's.
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, payload: &serde_json::Value) -> Result<(), DeliveryError>;
}

/// Consumer worker bound to exactly one source queue.
///
/// Each delivery is handled on its own task, so one slow or failing envelope
/// never delays independent envelopes. Per-message failures are contained -
/// the consume loop survives anything short of shutdown.
pub struct ConsumerWorker {
    source_queue: String,
    broker: Arc<dyn Broker>,
    router: Arc<RetryRouter>,
    ledger: Arc<dyn TraceLedger>,
    codec: Arc<dyn EnvelopeCodec>,
    handler: Arc<dyn Deliver>,
    config: PipelineConfig,
}

impl ConsumerWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_queue: String,
        broker: Arc<dyn Broker>,
        router: Arc<RetryRouter>,
        ledger: Arc<dyn TraceLedger>,
        codec: Arc<dyn EnvelopeCodec>,
        handler: Arc<dyn Deliver>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source_queue,
            broker,
            router,
            ledger,
            codec,
            handler,
            config,
        }
    }

    /// Run the consume loop until shutdown is signaled.
    ///
    /// Losing the consume stream is a transport fault, not a crash: in-flight
    /// unacked envelopes are treated as not-yet-delivered (the broker's
    /// redelivery semantics apply) and the worker re-attaches with a delay,
    /// without double-counting any attempt.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(queue = %self.source_queue, "Worker started");
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            let mut stream = match self.broker.consume(&self.source_queue).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(
                        queue = %self.source_queue,
                        "Failed to attach consumer, will retry: {}", e
                    );
                    if self.wait_or_shutdown(&mut shutdown_rx).await {
                        break;
                    }
                    continue;
                }
            };
            debug!(queue = %self.source_queue, "Consumer attached");

            let reconnect = loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break false;
                        }
                    }

                    delivery = stream.next() => {
                        match delivery {
                            Some(delivery) => {
                                let worker = self.clone();
                                in_flight.spawn(async move {
                                    worker.handle_delivery(delivery).await;
                                });
                            }
                            None => {
                                warn!(
                                    queue = %self.source_queue,
                                    "Consume stream ended, reconnecting"
                                );
                                break true;
                            }
                        }
                    }

                    // Reap finished delivery tasks as they complete
                    Some(_) = in_flight.join_next() => {}
                }
            };

            if !reconnect || self.wait_or_shutdown(&mut shutdown_rx).await {
                break;
            }
        }

        // Drain deliveries still mid-route so shutdown is actually graceful
        while in_flight.join_next().await.is_some() {}

        info!(queue = %self.source_queue, "Worker stopped");
    }

    /// Wait out the reconnect delay. Returns true if shutdown arrived first.
    async fn wait_or_shutdown(&self, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                changed.is_err() || *shutdown_rx.borrow()
            }
            _ = tokio::time::sleep(self.config.reconnect_delay) => false,
        }
    }

    /// Process one delivery end to end: decode, deliver with a per-attempt
    /// timeout, report the outcome to the router.
    async fn handle_delivery(&self, delivery: Delivery) {
        let ack = delivery.ack_token;

        let envelope = match self.codec.decode(&delivery.bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Undecodable messages carry untrustworthy attempt state and
                // go straight to dead-letter
                if let Err(route_err) = self
                    .router
                    .on_malformed(delivery.bytes, &e.to_string(), ack)
                    .await
                {
                    error!(
                        queue = %self.source_queue,
                        "Failed to dead-letter malformed envelope: {}", route_err
                    );
                }
                return;
            }
        };

        // Honor the backoff schedule without blocking the consume loop
        if let Some(not_before) = envelope.not_before {
            let now = Utc::now();
            if not_before > now {
                if let Ok(wait) = (not_before - now).to_std() {
                    tokio::time::sleep(wait).await;
                }
            }
        }

        let trace_id = envelope.trace_id;
        self.ledger.mark_processing(&trace_id, envelope.attempt);
        debug!(%trace_id, attempt = envelope.attempt, "Delivery attempt started");

        let outcome = tokio::time::timeout(
            self.config.per_attempt_timeout,
            self.handler.deliver(&envelope.payload),
        )
        .await;

        let routed = match outcome {
            Ok(Ok(())) => self.router.on_success(&envelope, ack).await,
            Ok(Err(delivery_error)) => {
                self.router
                    .on_failure(
                        envelope,
                        &PipelineError::DeliveryFailure(delivery_error.reason().to_string()),
                        ack,
                    )
                    .await
            }
            // Timed-out attempts are failures; the dropped future frees the
            // task promptly
            Err(_elapsed) => {
                self.router
                    .on_failure(envelope, &PipelineError::DeliveryTimeout, ack)
                    .await
            }
        };

        if let Err(e) = routed {
            error!(%trace_id, "Failed to route delivery outcome: {}", e);
        }
    }
}
