pub mod json;

pub use json::JsonCodec;

use crate::{Envelope, PipelineResult, TraceId};

/// Trait for envelope wire codecs.
///
/// `decode` must fail with `PipelineError::MalformedEnvelope` when required
/// fields are absent or the attempt counter falls outside the `u32` range -
/// such messages are routed straight to dead-letter because their attempt
/// state cannot be trusted.
pub trait EnvelopeCodec: Send + Sync {
    /// Encode an envelope into wire bytes
    fn encode(&self, envelope: &Envelope) -> PipelineResult<Vec<u8>>;

    /// Decode wire bytes into an envelope
    fn decode(&self, bytes: &[u8]) -> PipelineResult<Envelope>;

    /// Get codec identifier
    fn codec_id(&self) -> &'static str;

    /// Best-effort trace ID recovery from bytes that failed to decode, so a
    /// malformed message can still get a dead-letter ledger entry
    fn recover_trace_id(&self, _bytes: &[u8]) -> Option<TraceId> {
        None
    }
}
