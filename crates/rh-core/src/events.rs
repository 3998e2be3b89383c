//! Event types emitted by running processes and by the job queue.
//!
//! Both streams are closed sum types: a consumer matching on
//! [`CommandEvent`] or [`JobPayload`] gets exhaustiveness checking, and the
//! terminal outcome is always carried exactly once per process or job.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::ids::JobId;

// ---------------------------------------------------------------------------
// ProgressSample
// ---------------------------------------------------------------------------

/// Snapshot derived from an [`EtaCalculator`](crate::EtaCalculator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressSample {
    /// 0..=100.
    pub progress_pct: u8,
    pub elapsed_secs: u64,
    /// `-1` when no estimate is available.
    pub eta_secs: i64,
    /// Smoothed rate in progress units (seconds of media, frames, bytes) per second.
    pub speed: u64,
}

impl ProgressSample {
    /// True when the calculator could not produce an estimate.
    pub fn eta_unknown(&self) -> bool {
        self.eta_secs < 0
    }
}

// ---------------------------------------------------------------------------
// ExitError
// ---------------------------------------------------------------------------

/// Terminal failure of a process or job.
///
/// Kept separate from [`Error`] because it travels inside events, which
/// must be cloneable and comparable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ExitError {
    /// The user cancelled the job.
    #[error("cancelled")]
    Cancelled,
    /// The process exited unsuccessfully.
    #[error("process exited with {0}")]
    Status(String),
    /// The process could not be spawned.
    #[error("failed to spawn process: {0}")]
    Spawn(String),
    /// Waiting on the process or reading its pipes failed.
    #[error("process I/O failed: {0}")]
    Io(String),
}

impl ExitError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExitError::Cancelled)
    }
}

impl From<ExitError> for Error {
    fn from(err: ExitError) -> Self {
        match err {
            ExitError::Cancelled => Error::Cancelled,
            other => Error::tool("process", other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// CommandEvent
// ---------------------------------------------------------------------------

/// Event produced by one asynchronous process execution.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandEvent {
    /// A raw output line that carried no progress counter.
    Line(String),
    /// A progress line, already run through the ETA calculator.
    Progress(ProgressSample),
    /// The process finished. Always the last event.
    Exit(Result<(), ExitError>),
}

// ---------------------------------------------------------------------------
// Queue events
// ---------------------------------------------------------------------------

/// What happened to a queued job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum JobPayload {
    Started,
    Line(String),
    Progress(ProgressSample),
    Terminal(Result<(), ExitError>),
}

impl JobPayload {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPayload::Terminal(_))
    }
}

impl From<CommandEvent> for JobPayload {
    fn from(event: CommandEvent) -> Self {
        match event {
            CommandEvent::Line(line) => JobPayload::Line(line),
            CommandEvent::Progress(sample) => JobPayload::Progress(sample),
            CommandEvent::Exit(outcome) => JobPayload::Terminal(outcome),
        }
    }
}

/// One event on the queue's shared output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEvent {
    pub job_id: JobId,
    pub payload: JobPayload,
}

impl QueueEvent {
    pub fn new(job_id: JobId, payload: JobPayload) -> Self {
        Self { job_id, payload }
    }
}
