use thiserror::Error;

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Infrastructure errors for pipeline operations
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailure(String),

    #[error("Delivery attempt timed out")]
    DeliveryTimeout,

    #[error("Topology declaration failed: {0}")]
    TopologyError(String),

    #[error("Broker transport fault: {0}")]
    TransportFault(String),

    #[error("Queue not declared: {0}")]
    QueueNotFound(String),

    #[error("Invalid ack token")]
    InvalidAckToken,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Worker shutdown")]
    WorkerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Outcome reported by the delivery mechanism - always retryable up to the
/// configured attempt budget
#[derive(Error, Debug, Clone)]
pub enum DeliveryError {
    #[error("{0}")]
    Failed(String),
}

impl DeliveryError {
    /// Create a delivery failure with the given reason
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// Get the failure reason
    pub fn reason(&self) -> &str {
        match self {
            Self::Failed(reason) => reason,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
