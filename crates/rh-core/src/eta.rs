//! Smoothed progress, speed and ETA estimation.
//!
//! The calculator is fed monotonic counter values (seconds of media
//! transcoded, frames, bytes downloaded) and blends the instantaneous rate
//! into an exponentially smoothed one. It reads the clock through
//! [`tokio::time::Instant`], so tests can drive it with a paused runtime.

use std::time::Duration;

use tokio::time::Instant;

use crate::events::ProgressSample;

/// Weight of the newest instantaneous rate in the smoothed rate.
pub const SMOOTHING_FACTOR: f64 = 0.2;

/// Samples arriving closer together than this are ignored.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Exponentially smoothed ETA estimator.
#[derive(Debug, Clone)]
pub struct EtaCalculator {
    start_value: u64,
    /// `None` for an unbounded calculator.
    end_value: Option<u64>,
    last_value: u64,
    smoothed_rate: f64,
    started_at: Option<Instant>,
    last_sample_at: Option<Instant>,
    finished_at: Option<Instant>,
}

impl EtaCalculator {
    /// Calculator for a counter running from `start` to `end`.
    pub fn bounded(start: u64, end: u64) -> Self {
        Self {
            start_value: start,
            end_value: Some(end),
            last_value: start,
            smoothed_rate: 0.0,
            started_at: None,
            last_sample_at: None,
            finished_at: None,
        }
    }

    /// Calculator for a counter with no known total. It still tracks speed
    /// and elapsed time but never reports a percentage or an ETA.
    pub fn unbounded() -> Self {
        Self {
            end_value: None,
            ..Self::bounded(0, 0)
        }
    }

    /// Record the origin timestamp. Calling it again restarts the estimate.
    pub fn start(&mut self) {
        let now = Instant::now();
        self.started_at = Some(now);
        self.last_sample_at = Some(now);
        self.finished_at = None;
        self.last_value = self.start_value;
        self.smoothed_rate = 0.0;
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn is_bounded(&self) -> bool {
        self.end_value.is_some()
    }

    /// Feed a new counter value.
    ///
    /// Reaching the end value finishes the calculator and freezes elapsed
    /// time. Values arriving less than [`MIN_SAMPLE_INTERVAL`] after the
    /// previous accepted sample are dropped.
    pub fn update(&mut self, value: u64) {
        if self.started_at.is_none() || self.finished_at.is_some() {
            return;
        }
        let now = Instant::now();

        if let Some(end) = self.end_value {
            if value >= end {
                self.last_value = end;
                self.finished_at = Some(now);
                return;
            }
        }

        let last_at = self.last_sample_at.unwrap_or(now);
        let dt = now.saturating_duration_since(last_at);
        if dt < MIN_SAMPLE_INTERVAL {
            return;
        }

        let delta = value.saturating_sub(self.last_value) as f64;
        let instant_rate = delta / dt.as_secs_f64();
        self.smoothed_rate =
            self.smoothed_rate * (1.0 - SMOOTHING_FACTOR) + instant_rate * SMOOTHING_FACTOR;
        self.last_value = value;
        self.last_sample_at = Some(now);
    }

    /// Derive the current progress snapshot.
    pub fn progress(&self) -> ProgressSample {
        let Some(started_at) = self.started_at else {
            return ProgressSample {
                eta_secs: -1,
                ..ProgressSample::default()
            };
        };

        let until = self.finished_at.unwrap_or_else(Instant::now);
        let elapsed_secs = until.saturating_duration_since(started_at).as_secs();
        let speed = self.smoothed_rate.round() as u64;

        if self.finished_at.is_some() {
            return ProgressSample {
                progress_pct: 100,
                elapsed_secs,
                eta_secs: 0,
                speed,
            };
        }

        let Some(end) = self.end_value else {
            return ProgressSample {
                progress_pct: 0,
                elapsed_secs,
                eta_secs: -1,
                speed,
            };
        };

        let span = end.saturating_sub(self.start_value);
        let done = self.last_value.saturating_sub(self.start_value);
        let progress_pct = if span == 0 {
            0
        } else {
            (done.saturating_mul(100) / span).min(100) as u8
        };

        let eta_secs = if self.smoothed_rate > 0.0 {
            let remaining = end.saturating_sub(self.last_value) as f64;
            (remaining / self.smoothed_rate).ceil() as i64
        } else {
            -1
        };

        ProgressSample {
            progress_pct,
            elapsed_secs,
            eta_secs,
            speed,
        }
    }
}
