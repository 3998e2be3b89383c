//! Per-track byte weight.
//!
//! A track is re-muxed on its own to a null sink; ffmpeg then prints a
//! summary such as `video:0kB audio:18619kB subtitle:0kB other streams:0kB`
//! whose entry for the track's kind is its encoded size.

use std::path::Path;
use std::time::Duration;

use regex::Regex;
use rh_av::{ProcessCommand, ProgressUnit};
use rh_core::{Error, Result};

use crate::types::TrackKind;

const MEASURE_TEMPLATE: &str = "-hide_banner -y -stats_period 2 \
     -analyzeduration 2147483647 -probesize 2147483647 \
     -i $INPUT -map $MAP -c copy -f null -";

/// Build the measurement command for one track.
pub fn measure_command(
    ffmpeg: &Path,
    input: &Path,
    kind: TrackKind,
    relative_index: usize,
    timeout: Duration,
) -> ProcessCommand {
    let mut cmd = ProcessCommand::new(ffmpeg, MEASURE_TEMPLATE, ProgressUnit::Unknown);
    cmd.add_var("INPUT", [input.to_string_lossy()])
        .add_var(
            "MAP",
            [format!("0:{}:{}", kind.specifier(), relative_index)],
        )
        .timeout(timeout);
    cmd
}

/// Bytes per unit suffix. ffmpeg 7 prints binary prefixes (`KiB`), older
/// releases print `kB` with the same meaning.
fn unit_multiplier(unit: &str) -> Option<u64> {
    match unit {
        "b" | "byte" | "bytes" => Some(1),
        "kb" | "kib" => Some(1024),
        "mb" | "mib" => Some(1024 * 1024),
        "gb" | "gib" => Some(1024 * 1024 * 1024),
        _ => None,
    }
}

/// Extract the size of `kind` from the last summary line of `output`.
///
/// ffmpeg 6.1 and later print one more stats line after the summary, so the
/// output is scanned backwards for the last line carrying a `kind:` size.
///
/// # Errors
///
/// - [`Error::InvalidStreamSize`] if no line has an entry for `kind`.
/// - [`Error::UnknownByteLengthStr`] if the entry's unit is not recognised.
pub fn parse_stream_size(output: &str, kind: TrackKind) -> Result<u64> {
    let pattern = Regex::new(&format!(r"{}:(\d+)([a-z]+)", kind.as_str()))
        .map_err(|e| Error::Internal(format!("size pattern: {e}")))?;

    let lines: Vec<String> = output
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_lowercase)
        .collect();
    let summary = lines
        .iter()
        .rev()
        .find(|l| pattern.is_match(l))
        .ok_or_else(|| Error::InvalidStreamSize(lines.last().cloned().unwrap_or_default()))?;
    let caps = pattern
        .captures(summary)
        .ok_or_else(|| Error::InvalidStreamSize(summary.clone()))?;

    let amount: u64 = caps[1]
        .parse()
        .map_err(|_| Error::InvalidStreamSize(caps[0].to_string()))?;
    let multiplier =
        unit_multiplier(&caps[2]).ok_or_else(|| Error::UnknownByteLengthStr(caps[0].to_string()))?;

    amount
        .checked_mul(multiplier)
        .ok_or_else(|| Error::InvalidStreamSize(caps[0].to_string()))
}
