//! Progress counters embedded in transcoder status lines.

use regex::Regex;
use rh_core::{Error, EtaCalculator, Result};
use serde::{Deserialize, Serialize};

/// What a job's progress counter measures and its expected total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "unit", content = "total", rename_all = "snake_case")]
pub enum ProgressUnit {
    /// Seconds of media, read from `time=HH:MM:SS`.
    Duration(u64),
    /// Frame count, read from `frame=N`.
    Frames(u64),
    /// Total unknown; time codes are still read.
    #[default]
    Unknown,
}

impl ProgressUnit {
    /// `Duration(secs)`, or `Unknown` for a zero duration.
    pub fn from_duration_secs(secs: u64) -> Self {
        if secs == 0 {
            ProgressUnit::Unknown
        } else {
            ProgressUnit::Duration(secs)
        }
    }

    /// A fresh calculator sized for this unit.
    pub fn calculator(&self) -> EtaCalculator {
        match *self {
            ProgressUnit::Duration(total) | ProgressUnit::Frames(total) if total > 0 => {
                EtaCalculator::bounded(0, total)
            }
            _ => EtaCalculator::unbounded(),
        }
    }
}

/// Extracts the progress counter from a single output line.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    unit: ProgressUnit,
    pattern: Regex,
}

impl ProgressParser {
    pub fn new(unit: ProgressUnit) -> Result<Self> {
        let raw = match unit {
            ProgressUnit::Frames(_) => r"frame=\s*(\d+)",
            ProgressUnit::Duration(_) | ProgressUnit::Unknown => r"time=(\d+):(\d+):(\d+)",
        };
        let pattern =
            Regex::new(raw).map_err(|e| Error::Internal(format!("progress pattern: {e}")))?;
        Ok(Self { unit, pattern })
    }

    pub fn unit(&self) -> ProgressUnit {
        self.unit
    }

    /// The counter carried by `line`, if any. A zero counter is treated as
    /// absent since ffmpeg prints it before any work is done.
    pub fn parse(&self, line: &str) -> Option<u64> {
        let caps = self.pattern.captures(line)?;
        let field = |i: usize| -> Option<u64> { caps.get(i)?.as_str().parse().ok() };

        let value = match self.unit {
            ProgressUnit::Frames(_) => field(1)?,
            ProgressUnit::Duration(_) | ProgressUnit::Unknown => field(1)?
                .checked_mul(3600)?
                .checked_add(field(2)?.checked_mul(60)?)?
                .checked_add(field(3)?)?,
        };
        (value > 0).then_some(value)
    }
}
