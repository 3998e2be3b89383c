//! # rh-pipeline
//!
//! From probe result to finished conversion.
//!
//! - [`select`] -- the deterministic audio/subtitle selection policy.
//! - [`producer`] -- turns a selection into a bound ffmpeg [`ProcessCommand`](rh_av::ProcessCommand).
//! - [`queue`] -- actor-style job queue with a fixed worker pool and
//!   per-job cancellation.
//! - [`conversion`] -- service tying probe, producer, queue and the job
//!   store together.
//! - [`store`] -- persistence collaborator for conversion jobs.

pub mod conversion;
pub mod producer;
pub mod queue;
pub mod select;
pub mod store;

pub use conversion::{ConversionRequest, ConversionService};
pub use producer::{encoder_threads, CommandProducer, Plan};
pub use queue::{Job, JobQueue};
pub use select::{
    select, select_audio, select_subtitle, FilterKind, Preferences, SelectionPreference,
    Selections, TrackSelection, PICTURE_TEXT_THRESHOLD,
};
pub use store::{JobRow, JobStore, MemoryJobStore};
