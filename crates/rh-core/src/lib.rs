//! rh-core: shared types, IDs, errors, configuration, and the progress model.
//!
//! Every other rh-* crate depends on this one. It holds the unified error
//! type, typed identifiers, the status enums with their transition tables,
//! the event payloads that flow out of processes and the job queue, and the
//! smoothed ETA estimator those events are built from.

pub mod config;
pub mod error;
pub mod eta;
pub mod events;
pub mod ids;
pub mod status;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use eta::EtaCalculator;
pub use events::{CommandEvent, ExitError, JobPayload, ProgressSample, QueueEvent};
pub use ids::*;
pub use status::*;
