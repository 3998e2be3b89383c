//! Unified error type for reelhaul.
//!
//! All library crates funnel their failures into [`Error`]. The domain
//! sentinels (`Cancelled`, `VideoStreamNotFound`, ...) are separate variants
//! so callers can match on them instead of comparing strings.

use std::fmt;

/// Unified error type covering all failure modes in reelhaul.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The probed file has no qualifying (non-cover) video track.
    #[error("video stream not found")]
    VideoStreamNotFound,

    /// The probed file has more than one qualifying video track.
    #[error("more than one video stream")]
    MoreThanOneVideoStream,

    /// A byte-size summary carried a unit suffix outside the known table.
    #[error("unknown byte length string: {0}")]
    UnknownByteLengthStr(String),

    /// The transcoder summary line did not contain a size for the track kind.
    #[error("invalid stream size: {0}")]
    InvalidStreamSize(String),

    /// The subtitle selection cannot be expressed as a filter graph.
    #[error("unsupported subtitles: {0}")]
    UnsupportedSubs(String),

    /// The operation was cancelled by the user.
    #[error("cancelled")]
    Cancelled,

    /// A job queue was configured with zero workers.
    #[error("queue parallelism must be greater than zero")]
    QueueParallelismInvalid,

    /// The job queue coordinator is no longer running.
    #[error("job queue is closed")]
    QueueClosed,

    /// An acquisition is already downloading.
    #[error("acquisition {0} already started")]
    AlreadyStarted(String),

    /// An acquisition has no live transfer to stop.
    #[error("acquisition {0} already stopped")]
    AlreadyStopped(String),

    /// A status change not allowed by the transition table.
    #[error("invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        /// The kind of entity (e.g. "job", "acquisition").
        entity: String,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job", "acquisition").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration could not be loaded.
    #[error("Config error: {0}")]
    Config(String),

    /// A persistence collaborator call failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The download engine reported a failure.
    #[error("Engine error: {0}")]
    Engine(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// JSON decoding failed.
    #[error("JSON error: {source}")]
    Json {
        /// The underlying serde_json error.
        #[from]
        source: serde_json::Error,
    },

    /// An external tool (ffmpeg, ffprobe) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Media probing failed.
    #[error("Probe error: {0}")]
    Probe(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Convenience constructor for [`Error::Persistence`].
    pub fn persistence(message: impl fmt::Display) -> Self {
        Error::Persistence(message.to_string())
    }

    /// Convenience constructor for [`Error::InvalidTransition`].
    pub fn invalid_transition(
        entity: impl Into<String>,
        from: impl fmt::Display,
        to: impl fmt::Display,
    ) -> Self {
        Error::InvalidTransition {
            entity: entity.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// True for the user-cancellation sentinel.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = Error::not_found("job", 42);
        assert_eq!(err.to_string(), "job not found: 42");
    }

    #[test]
    fn tool_display() {
        let err = Error::tool("ffmpeg", "exit code 1");
        assert_eq!(err.to_string(), "Tool error [ffmpeg]: exit code 1");
    }

    #[test]
    fn sentinel_display() {
        assert_eq!(Error::Cancelled.to_string(), "cancelled");
        assert_eq!(Error::VideoStreamNotFound.to_string(), "video stream not found");
        assert_eq!(
            Error::UnknownByteLengthStr("12qb".into()).to_string(),
            "unknown byte length string: 12qb"
        );
    }

    #[test]
    fn invalid_transition_display() {
        let err = Error::invalid_transition("job", "finished", "running");
        assert_eq!(err.to_string(), "invalid transition for job: finished -> running");
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn cancelled_is_distinct() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::tool("ffmpeg", "killed").is_cancelled());
    }
}
