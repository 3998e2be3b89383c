//! ffprobe stream inventory.
//!
//! Shells out to `ffprobe -v quiet -print_format json -show_format -show_streams`
//! and maps the JSON output into an unmeasured [`ProbeResult`].

use std::path::Path;
use std::time::Duration;

use rh_av::{ProcessCommand, ProgressUnit};
use rh_core::{Error, Result};
use serde::Deserialize;

use crate::subtitle::classify_subtitle;
use crate::types::{ProbeResult, TrackDescriptor, TrackKind};

/// Video codecs that only ever carry cover art.
const STILL_IMAGE_CODECS: &[&str] = &["mjpeg", "png", "bmp", "gif", "webp"];

const FFPROBE_TEMPLATE: &str =
    "-v quiet -print_format json -show_format -show_streams $INPUT";

/// Build the inventory command for `input`.
pub fn inventory_command(ffprobe: &Path, input: &Path, timeout: Duration) -> ProcessCommand {
    let mut cmd = ProcessCommand::new(ffprobe, FFPROBE_TEMPLATE, ProgressUnit::Unknown);
    cmd.add_var("INPUT", [input.to_string_lossy()]).timeout(timeout);
    cmd
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    #[serde(default)]
    disposition: FfprobeDisposition,
    #[serde(default)]
    tags: FfprobeTags,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeDisposition {
    #[serde(default)]
    attached_pic: u8,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    language: Option<String>,
    title: Option<String>,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn is_cover(stream: &FfprobeStream) -> bool {
    stream.disposition.attached_pic == 1
        || stream
            .codec_name
            .as_deref()
            .is_some_and(|c| STILL_IMAGE_CODECS.contains(&c))
}

/// Parse ffprobe JSON into a [`ProbeResult`] with zero weights.
///
/// Relative indexes count every stream of a kind, covers included, so they
/// line up with ffmpeg's `0:v:N` / `0:a:N` / `0:s:N` specifiers.
pub fn parse_ffprobe_output(json: &str) -> Result<ProbeResult> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| Error::Probe(format!("ffprobe JSON parse error: {e}")))?;

    let mut videos = Vec::new();
    let mut audio = Vec::new();
    let mut subtitle = Vec::new();
    let (mut v_idx, mut a_idx, mut s_idx) = (0usize, 0usize, 0usize);

    for stream in output.streams {
        let kind = match stream.codec_type.as_deref() {
            Some("video") => TrackKind::Video,
            Some("audio") => TrackKind::Audio,
            Some("subtitle") => TrackKind::Subtitle,
            _ => continue,
        };
        let counter = match kind {
            TrackKind::Video => &mut v_idx,
            TrackKind::Audio => &mut a_idx,
            TrackKind::Subtitle => &mut s_idx,
        };
        let relative_index = *counter;
        *counter += 1;

        if kind == TrackKind::Video && is_cover(&stream) {
            tracing::debug!(index = relative_index, codec = ?stream.codec_name, "Skipping cover art stream");
            continue;
        }

        let mut track = TrackDescriptor::new(kind, relative_index);
        if kind == TrackKind::Subtitle {
            track.subtitle_kind = classify_subtitle(stream.codec_name.as_deref().unwrap_or(""));
        }
        track.codec = stream.codec_name;
        track.language = stream.tags.language;
        track.title = stream.tags.title;

        match kind {
            TrackKind::Video => videos.push(track),
            TrackKind::Audio => audio.push(track),
            TrackKind::Subtitle => subtitle.push(track),
        }
    }

    let mut videos = videos.into_iter();
    let video = match (videos.next(), videos.next()) {
        (None, _) => return Err(Error::VideoStreamNotFound),
        (Some(_), Some(_)) => return Err(Error::MoreThanOneVideoStream),
        (Some(v), None) => v,
    };

    let duration_secs = output
        .format
        .duration
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(|d| d as u64)
        .unwrap_or(0);

    Ok(ProbeResult {
        video,
        audio,
        subtitle,
        duration_secs,
    })
}
