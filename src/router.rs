use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{error, info, warn};

use crate::broker::{AckToken, Broker};
use crate::codec::EnvelopeCodec;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::ledger::TraceLedger;
use crate::types::Envelope;

/// State machine deciding, on each delivery outcome, whether an envelope is
/// done, requeued with backoff, or quarantined.
///
/// The router owns the attempt increment: exactly once per failed delivery,
/// before requeue. It acks the source message on every outcome so nothing is
/// redelivered from a queue it already left.
pub struct RetryRouter {
    broker: Arc<dyn Broker>,
    ledger: Arc<dyn TraceLedger>,
    codec: Arc<dyn EnvelopeCodec>,
    config: PipelineConfig,
}

impl RetryRouter {
    pub fn new(
        broker: Arc<dyn Broker>,
        ledger: Arc<dyn TraceLedger>,
        codec: Arc<dyn EnvelopeCodec>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            broker,
            ledger,
            codec,
            config,
        }
    }

    /// Successful delivery: record it and release the source message
    pub async fn on_success(&self, envelope: &Envelope, ack: AckToken) -> PipelineResult<()> {
        self.ledger.mark_delivered(&envelope.trace_id);
        self.broker.ack(ack).await?;
        info!(
            trace_id = %envelope.trace_id,
            attempt = envelope.attempt,
            "Notification delivered"
        );
        Ok(())
    }

    /// Failed delivery: requeue with backoff while the attempt budget lasts,
    /// otherwise quarantine with a terminal marker
    pub async fn on_failure(
        &self,
        mut envelope: Envelope,
        error: &PipelineError,
        ack: AckToken,
    ) -> PipelineResult<()> {
        envelope.record_attempt();
        let trace_id = envelope.trace_id;

        if envelope.attempts_exhausted(self.config.max_attempts) {
            let reason = format!("max attempts ({}) exceeded: {}", self.config.max_attempts, error);
            envelope.mark_terminal(&reason);
            let bytes = self.codec.encode(&envelope)?;
            // Ledger before publish: once the envelope is on a queue another
            // consumer may own it
            self.ledger
                .mark_dead_lettered(&trace_id, envelope.attempt, &reason);
            self.broker
                .publish(&self.config.topology.dead_letter, bytes)
                .await?;
            error!(
                %trace_id,
                attempt = envelope.attempt,
                "Notification dead-lettered: {}", error
            );
        } else {
            let delay = self.backoff_delay(envelope.attempt);
            let retry_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            envelope.defer_until(retry_at);
            let bytes = self.codec.encode(&envelope)?;
            // Ledger before publish: the retry worker must never observe a
            // Processing -> RetryScheduled inversion
            self.ledger.mark_retry_scheduled(
                &trace_id,
                envelope.attempt,
                retry_at,
                &error.to_string(),
            );
            self.broker
                .publish(&self.config.topology.retry, bytes)
                .await?;
            warn!(
                %trace_id,
                attempt = envelope.attempt,
                retry_at = %retry_at,
                "Delivery failed, retry scheduled: {}", error
            );
        }

        self.broker.ack(ack).await
    }

    /// Undecodable message: forward the raw bytes to dead-letter, never retry.
    ///
    /// Bypasses the delivery path entirely since the attempt state cannot be
    /// trusted; the ledger entry is best-effort when a trace ID is readable.
    pub async fn on_malformed(
        &self,
        bytes: Vec<u8>,
        reason: &str,
        ack: AckToken,
    ) -> PipelineResult<()> {
        match self.codec.recover_trace_id(&bytes) {
            Some(trace_id) => {
                self.ledger.mark_dead_lettered(&trace_id, 0, reason);
                warn!(%trace_id, "Malformed envelope dead-lettered: {}", reason);
            }
            None => {
                warn!("Malformed envelope without readable trace id dead-lettered: {}", reason);
            }
        }

        self.broker
            .publish(&self.config.topology.dead_letter, bytes)
            .await?;
        self.broker.ack(ack).await
    }

    /// Exponential backoff with equal jitter, capped at the configured max.
    ///
    /// `attempt` is the just-incremented counter, so the first retry waits
    /// around `base_delay`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.config.base_delay.as_millis() as u64;
        let exp_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let capped_ms = exp_ms.min(self.config.max_delay.as_millis() as u64);

        let half = capped_ms / 2;
        let jitter = if half > 0 {
            rand::thread_rng().gen_range(0..=half)
        } else {
            0
        };
        Duration::from_millis(half + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::codec::JsonCodec;
    use crate::ledger::InMemoryLedger;
    use crate::types::{LedgerEntry, NotificationStatus};
    use serde_json::json;
    use tokio_stream::StreamExt;

    fn create_router(
        broker: Arc<InMemoryBroker>,
        ledger: Arc<InMemoryLedger>,
        config: PipelineConfig,
    ) -> RetryRouter {
        RetryRouter::new(broker, ledger, Arc::new(JsonCodec), config)
    }

    async fn declared_broker() -> Arc<InMemoryBroker> {
        let broker = Arc::new(InMemoryBroker::new());
        for queue in PipelineConfig::default().topology.all() {
            broker.declare_queue(queue).await.unwrap();
        }
        broker
    }

    #[tokio::test]
    async fn test_on_success_marks_delivered_and_acks() {
        let broker = declared_broker().await;
        let ledger = Arc::new(InMemoryLedger::new());
        let router = create_router(broker.clone(), ledger.clone(), PipelineConfig::default());

        let envelope = Envelope::new(json!({"x": 1}));
        ledger.create(LedgerEntry::new(envelope.trace_id));
        broker.publish("notification.input", b"raw".to_vec()).await.unwrap();
        let mut input = broker.consume("notification.input").await.unwrap();
        let delivery = input.next().await.unwrap();

        router.on_success(&envelope, delivery.ack_token).await.unwrap();

        let entry = ledger.get(&envelope.trace_id).unwrap();
        assert!(matches!(entry.status, NotificationStatus::Delivered { .. }));
        assert_eq!(broker.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_on_failure_below_budget_requeues_to_retry() {
        let broker = declared_broker().await;
        let ledger = Arc::new(InMemoryLedger::new());
        let router = create_router(broker.clone(), ledger.clone(), PipelineConfig::default());

        let envelope = Envelope::new(json!({"x": 1}));
        let trace_id = envelope.trace_id;
        ledger.create(LedgerEntry::new(trace_id));
        broker.publish("notification.input", b"raw".to_vec()).await.unwrap();
        let mut input = broker.consume("notification.input").await.unwrap();
        let delivery = input.next().await.unwrap();

        router
            .on_failure(
                envelope,
                &PipelineError::DeliveryFailure("smtp refused".to_string()),
                delivery.ack_token,
            )
            .await
            .unwrap();

        // Envelope landed on retry with the attempt incremented once
        let mut retry = broker.consume("notification.retry").await.unwrap();
        let requeued = retry.next().await.unwrap();
        let decoded = JsonCodec.decode(&requeued.bytes).unwrap();
        assert_eq!(decoded.trace_id, trace_id);
        assert_eq!(decoded.attempt, 1);
        assert!(decoded.not_before.is_some());

        let entry = ledger.get(&trace_id).unwrap();
        assert!(matches!(entry.status, NotificationStatus::RetryScheduled { .. }));
        assert_eq!(entry.attempt, 1);
        assert!(entry.last_error.as_deref().unwrap().contains("smtp refused"));
    }

    #[tokio::test]
    async fn test_on_failure_at_budget_dead_letters() {
        let broker = declared_broker().await;
        let ledger = Arc::new(InMemoryLedger::new());
        let router = create_router(broker.clone(), ledger.clone(), PipelineConfig::default());

        let mut envelope = Envelope::new(json!({"x": 1}));
        envelope.attempt = 2; // third failure exhausts a budget of 3
        let trace_id = envelope.trace_id;
        ledger.create(LedgerEntry::new(trace_id));
        broker.publish("notification.retry", b"raw".to_vec()).await.unwrap();
        let mut retry = broker.consume("notification.retry").await.unwrap();
        let delivery = retry.next().await.unwrap();

        router
            .on_failure(
                envelope,
                &PipelineError::DeliveryTimeout,
                delivery.ack_token,
            )
            .await
            .unwrap();

        let mut dlq = broker.consume("notification.dead-letter").await.unwrap();
        let quarantined = dlq.next().await.unwrap();
        let decoded = JsonCodec.decode(&quarantined.bytes).unwrap();
        assert_eq!(decoded.attempt, 3);
        assert!(decoded.is_terminal());

        let entry = ledger.get(&trace_id).unwrap();
        assert!(matches!(entry.status, NotificationStatus::DeadLettered { .. }));
        assert_eq!(entry.attempt, 3);
    }

    #[tokio::test]
    async fn test_on_failure_recreates_missing_ledger_entry() {
        let broker = declared_broker().await;
        let ledger = Arc::new(InMemoryLedger::new());
        let router = create_router(broker.clone(), ledger.clone(), PipelineConfig::default());

        // No ledger entry exists for this trace
        let envelope = Envelope::new(json!({}));
        let trace_id = envelope.trace_id;
        broker.publish("notification.input", b"raw".to_vec()).await.unwrap();
        let mut input = broker.consume("notification.input").await.unwrap();
        let delivery = input.next().await.unwrap();

        router
            .on_failure(
                envelope,
                &PipelineError::DeliveryFailure("boom".to_string()),
                delivery.ack_token,
            )
            .await
            .unwrap();

        assert!(ledger.get(&trace_id).is_some());
    }

    #[tokio::test]
    async fn test_on_malformed_forwards_raw_bytes_without_retry() {
        let broker = declared_broker().await;
        let ledger = Arc::new(InMemoryLedger::new());
        let router = create_router(broker.clone(), ledger.clone(), PipelineConfig::default());

        let trace_id = crate::types::TraceId::new();
        let bytes =
            serde_json::to_vec(&json!({"traceId": trace_id.to_string(), "attempt": -5})).unwrap();
        broker.publish("notification.input", bytes.clone()).await.unwrap();
        let mut input = broker.consume("notification.input").await.unwrap();
        let delivery = input.next().await.unwrap();

        router
            .on_malformed(bytes.clone(), "negative attempt counter", delivery.ack_token)
            .await
            .unwrap();

        // Raw bytes land on dead-letter unchanged, nothing on retry
        let mut dlq = broker.consume("notification.dead-letter").await.unwrap();
        assert_eq!(dlq.next().await.unwrap().bytes, bytes);

        let entry = ledger.get(&trace_id).unwrap();
        assert!(matches!(entry.status, NotificationStatus::DeadLettered { .. }));
        assert_eq!(entry.attempt, 0);
    }

    #[test]
    fn test_backoff_delay_is_bounded_and_capped() {
        let config = PipelineConfig::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(800));
        let router = RetryRouter::new(
            Arc::new(InMemoryBroker::new()),
            Arc::new(InMemoryLedger::new()),
            Arc::new(JsonCodec),
            config,
        );

        for attempt in 1..=10 {
            let delay = router.backoff_delay(attempt);
            let exp = 100u64.saturating_mul(2u64.saturating_pow(attempt - 1)).min(800);
            assert!(delay.as_millis() as u64 >= exp / 2, "attempt {}", attempt);
            assert!(delay.as_millis() as u64 <= exp, "attempt {}", attempt);
        }

        // Deep attempts never exceed the cap
        assert!(router.backoff_delay(32).as_millis() <= 800);
    }
}
