//! The probe orchestrator.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rh_av::ToolRegistry;
use rh_core::config::ProbeConfig;
use rh_core::{Error, Result};

use crate::ffprobe::{inventory_command, parse_ffprobe_output};
use crate::subtitle::extract_text_length;
use crate::types::{ProbeResult, TrackKind};
use crate::weight::{measure_command, parse_stream_size};

/// Trait implemented by media probers.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Human-readable name identifying this prober implementation.
    fn name(&self) -> &'static str;

    /// Inspect `path` and return its measured tracks.
    async fn probe(&self, path: &Path) -> Result<ProbeResult>;
}

/// Prober backed by the ffprobe and ffmpeg CLIs.
#[derive(Debug, Clone)]
pub struct StreamProbe {
    ffprobe: PathBuf,
    ffmpeg: PathBuf,
    probe_timeout: Duration,
    measure_timeout: Duration,
}

impl StreamProbe {
    pub fn new(ffprobe: PathBuf, ffmpeg: PathBuf, config: &ProbeConfig) -> Self {
        Self {
            ffprobe,
            ffmpeg,
            probe_timeout: Duration::from_secs(config.timeout_secs),
            measure_timeout: Duration::from_secs(config.measure_timeout_secs),
        }
    }

    /// Build a prober from discovered tools; fails if either tool is missing.
    pub fn from_registry(tools: &ToolRegistry, config: &ProbeConfig) -> Result<Self> {
        Ok(Self::new(
            tools.ffprobe()?.to_path_buf(),
            tools.ffmpeg()?.to_path_buf(),
            config,
        ))
    }

    async fn measure(&self, input: &Path, kind: TrackKind, index: usize) -> Result<u64> {
        let output = measure_command(&self.ffmpeg, input, kind, index, self.measure_timeout)
            .execute_sync()
            .await?;
        parse_stream_size(&String::from_utf8_lossy(&output), kind)
    }
}

#[async_trait]
impl Prober for StreamProbe {
    fn name(&self) -> &'static str {
        "ffprobe"
    }

    async fn probe(&self, path: &Path) -> Result<ProbeResult> {
        let raw = inventory_command(&self.ffprobe, path, self.probe_timeout)
            .execute_sync()
            .await?;
        // ffprobe -v quiet keeps stderr empty, so the capture is the JSON.
        let json = String::from_utf8(raw)
            .map_err(|e| Error::Probe(format!("ffprobe output is not UTF-8: {e}")))?;
        let mut result = parse_ffprobe_output(&json)?;

        let mut audio = Vec::with_capacity(result.audio.len());
        for mut track in std::mem::take(&mut result.audio) {
            match self.measure(path, TrackKind::Audio, track.relative_index).await {
                Ok(size) => {
                    track.byte_size = size;
                    audio.push(track);
                }
                Err(e) => {
                    tracing::debug!(
                        file = %path.display(),
                        index = track.relative_index,
                        error = %e,
                        "Dropping audio track that could not be measured"
                    );
                }
            }
        }
        result.audio = audio;

        for track in &mut result.subtitle {
            match extract_text_length(&self.ffmpeg, path, track.relative_index, self.measure_timeout)
                .await
            {
                Ok(len) => track.text_length = len,
                Err(e) => tracing::warn!(
                    file = %path.display(),
                    index = track.relative_index,
                    error = %e,
                    "Subtitle text extraction failed"
                ),
            }
            match self.measure(path, TrackKind::Subtitle, track.relative_index).await {
                Ok(size) => track.byte_size = size,
                Err(e) => tracing::warn!(
                    file = %path.display(),
                    index = track.relative_index,
                    error = %e,
                    "Subtitle size measurement failed"
                ),
            }
        }

        tracing::info!(
            file = %path.display(),
            audio = result.audio.len(),
            subtitles = result.subtitle.len(),
            duration_secs = result.duration_secs,
            "Probe complete"
        );
        Ok(result)
    }
}
