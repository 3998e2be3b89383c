//! Probe output types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Elementary stream kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
    Subtitle,
}

impl TrackKind {
    /// Name used by ffmpeg in its size summary (`audio:123kB`).
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
            TrackKind::Subtitle => "subtitle",
        }
    }

    /// Stream specifier letter (`0:a:1`).
    pub fn specifier(&self) -> char {
        match self {
            TrackKind::Video => 'v',
            TrackKind::Audio => 'a',
            TrackKind::Subtitle => 's',
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a subtitle track is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleKind {
    /// Dialogue stored as text (SubRip, ASS).
    Text,
    /// Bitmaps (PGS, VobSub).
    Picture,
    #[default]
    Unknown,
}

/// One track of a probed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub kind: TrackKind,
    /// Index among tracks of the same kind, as used in `0:a:N`.
    pub relative_index: usize,
    pub codec: Option<String>,
    pub language: Option<String>,
    pub title: Option<String>,
    /// Measured encoded size of the track; 0 when not measured.
    pub byte_size: u64,
    /// Bytes of extracted subtitle text; 0 for non-subtitles and failures.
    pub text_length: usize,
    pub subtitle_kind: SubtitleKind,
}

impl TrackDescriptor {
    pub fn new(kind: TrackKind, relative_index: usize) -> Self {
        Self {
            kind,
            relative_index,
            codec: None,
            language: None,
            title: None,
            byte_size: 0,
            text_length: 0,
            subtitle_kind: SubtitleKind::Unknown,
        }
    }

    /// Case-insensitive language match.
    pub fn has_language(&self, language: &str) -> bool {
        self.language
            .as_deref()
            .is_some_and(|l| l.eq_ignore_ascii_case(language))
    }
}

/// Result of probing one media file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub video: TrackDescriptor,
    pub audio: Vec<TrackDescriptor>,
    pub subtitle: Vec<TrackDescriptor>,
    pub duration_secs: u64,
}

impl ProbeResult {
    /// Subtitle track with the given relative index.
    pub fn subtitle_at(&self, relative_index: usize) -> Option<&TrackDescriptor> {
        self.subtitle
            .iter()
            .find(|t| t.relative_index == relative_index)
    }
}
