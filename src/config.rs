use std::time::Duration;

use crate::topology::QueueTopology;

/// Configuration surface consumed by the pipeline core.
///
/// All values are operational parameters - the retry curve in particular is
/// deliberately configuration, not a fixed constant.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum delivery attempts before dead-lettering (>= 1)
    pub max_attempts: u32,
    /// Base retry backoff duration
    pub base_delay: Duration,
    /// Maximum retry backoff duration (cap)
    pub max_delay: Duration,
    /// Per-attempt delivery timeout - an attempt exceeding it counts as failed
    pub per_attempt_timeout: Duration,
    /// Delay before a worker re-attaches after losing its consume stream
    pub reconnect_delay: Duration,
    /// Logical queue names for input, retry, and dead-letter
    pub topology: QueueTopology,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60), // 1 minute cap
            per_attempt_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(1),
            topology: QueueTopology::default(),
        }
    }
}

impl PipelineConfig {
    /// Set the maximum delivery attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the base retry backoff duration
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set the maximum retry backoff duration
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the per-attempt delivery timeout
    pub fn with_per_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = timeout;
        self
    }

    /// Set the worker reconnect delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the queue topology
    pub fn with_topology(mut self, topology: QueueTopology) -> Self {
        self.topology = topology;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert!(config.base_delay <= config.max_delay);
    }

    #[test]
    fn test_max_attempts_floor_is_one() {
        let config = PipelineConfig::default().with_max_attempts(0);
        assert_eq!(config.max_attempts, 1);
    }
}
