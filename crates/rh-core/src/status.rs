//! Closed status enumerations and their transition tables.
//!
//! Every status change in the queue, the conversion service and the
//! acquisition service goes through [`Transition::transition_to`], so an
//! illegal move surfaces as [`Error::InvalidTransition`] instead of silently
//! corrupting persisted state.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Shared behaviour of the status enums.
pub trait Transition: Copy + PartialEq + fmt::Display {
    /// Entity name used in error messages.
    const ENTITY: &'static str;

    /// Whether moving from `self` to `next` is allowed.
    fn can_transition_to(self, next: Self) -> bool;

    /// Validate and perform the transition.
    fn transition_to(self, next: Self) -> Result<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::invalid_transition(Self::ENTITY, self, next))
        }
    }
}

macro_rules! status_display {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// ---------------------------------------------------------------------------
// JobState (queue-owned)
// ---------------------------------------------------------------------------

/// Lifecycle of a job inside the queue registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Finished,
}

status_display!(JobState {
    Pending => "pending",
    Running => "running",
    Finished => "finished",
});

impl Transition for JobState {
    const ENTITY: &'static str = "job";

    fn can_transition_to(self, next: Self) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Finished) | (Running, Finished)
        )
    }
}

// ---------------------------------------------------------------------------
// ConversionStatus (persisted)
// ---------------------------------------------------------------------------

/// Persisted status of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Created,
    Processing,
    Finished,
    Error,
    Cancelled,
}

status_display!(ConversionStatus {
    Created => "created",
    Processing => "processing",
    Finished => "finished",
    Error => "error",
    Cancelled => "cancelled",
});

impl ConversionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConversionStatus::Finished | ConversionStatus::Error | ConversionStatus::Cancelled
        )
    }
}

impl Transition for ConversionStatus {
    const ENTITY: &'static str = "conversion";

    fn can_transition_to(self, next: Self) -> bool {
        use ConversionStatus::*;
        matches!(
            (self, next),
            (Created, Processing)
                | (Created, Cancelled)
                | (Created, Error)
                | (Processing, Finished)
                | (Processing, Error)
                | (Processing, Cancelled)
        )
    }
}

// ---------------------------------------------------------------------------
// AcquisitionStatus
// ---------------------------------------------------------------------------

/// Lifecycle of an acquisition entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionStatus {
    Creating,
    Idle,
    Downloading,
    Ready,
    Error,
}

status_display!(AcquisitionStatus {
    Creating => "creating",
    Idle => "idle",
    Downloading => "downloading",
    Ready => "ready",
    Error => "error",
});

impl AcquisitionStatus {
    /// Statuses that only make sense while this process supervises the
    /// entity. They are forced to `Error` on startup.
    pub fn is_in_flight(self) -> bool {
        matches!(self, AcquisitionStatus::Creating | AcquisitionStatus::Downloading)
    }
}

impl Transition for AcquisitionStatus {
    const ENTITY: &'static str = "acquisition";

    fn can_transition_to(self, next: Self) -> bool {
        use AcquisitionStatus::*;
        match (self, next) {
            (Creating, Idle) | (Creating, Error) => true,
            (Idle | Error | Ready, Downloading) => true,
            (Downloading, Idle | Ready | Error) => true,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// FileStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a single file inside an acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Idle,
    Downloading,
    Ready,
    Error,
}

status_display!(FileStatus {
    Idle => "idle",
    Downloading => "downloading",
    Ready => "ready",
    Error => "error",
});

impl Transition for FileStatus {
    const ENTITY: &'static str = "acquisition file";

    fn can_transition_to(self, next: Self) -> bool {
        use FileStatus::*;
        match (self, next) {
            (Idle | Error | Ready, Downloading) => true,
            (Downloading, Idle | Ready | Error) => true,
            (Error | Ready, Idle) => true,
            _ => false,
        }
    }
}
