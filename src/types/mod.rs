pub mod ids;
pub mod envelope;
pub mod status;
pub mod events;

pub use ids::TraceId;
pub use envelope::Envelope;
pub use status::{LedgerEntry, NotificationStatus};
pub use events::PipelineEvent;
