//! Subtitle text extraction and codec classification.

use std::path::Path;
use std::time::Duration;

use rh_av::{ProcessCommand, ProgressUnit};
use rh_core::{Error, Result};

use crate::types::SubtitleKind;

const EXTRACT_TEMPLATE: &str = "-hide_banner -y -i $INPUT -map $MAP -f srt $OUTPUT";

/// Map a subtitle codec name to its encoding kind.
pub fn classify_subtitle(codec: &str) -> SubtitleKind {
    match codec {
        "hdmv_pgs_subtitle" | "dvd_subtitle" => SubtitleKind::Picture,
        "ass" | "subrip" | "srt" => SubtitleKind::Text,
        _ => SubtitleKind::Unknown,
    }
}

/// Build the command converting one subtitle track to SubRip at `output`.
pub fn extract_command(
    ffmpeg: &Path,
    input: &Path,
    relative_index: usize,
    output: &Path,
    timeout: Duration,
) -> ProcessCommand {
    let mut cmd = ProcessCommand::new(ffmpeg, EXTRACT_TEMPLATE, ProgressUnit::Unknown);
    cmd.add_var("INPUT", [input.to_string_lossy()])
        .add_var("MAP", [format!("0:s:{relative_index}")])
        .add_var("OUTPUT", [output.to_string_lossy()])
        .timeout(timeout);
    cmd
}

/// Byte length of the dialogue carried by subtitle track `relative_index`.
///
/// The track is written to a SubRip file inside a scratch directory that
/// is removed when this function returns, on every path.
pub async fn extract_text_length(
    ffmpeg: &Path,
    input: &Path,
    relative_index: usize,
    timeout: Duration,
) -> Result<usize> {
    let scratch = tempfile::Builder::new().prefix("rh-sub-").tempdir()?;
    let srt = scratch.path().join(format!("track-{relative_index}.srt"));

    extract_command(ffmpeg, input, relative_index, &srt, timeout)
        .execute_sync()
        .await?;

    let bytes = tokio::fs::read(&srt).await?;
    let text = String::from_utf8(bytes)
        .map_err(|e| Error::Probe(format!("subtitle track {relative_index} is not UTF-8: {e}")))?;
    Ok(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_table() {
        assert_eq!(classify_subtitle("hdmv_pgs_subtitle"), SubtitleKind::Picture);
        assert_eq!(classify_subtitle("dvd_subtitle"), SubtitleKind::Picture);
        assert_eq!(classify_subtitle("ass"), SubtitleKind::Text);
        assert_eq!(classify_subtitle("subrip"), SubtitleKind::Text);
        assert_eq!(classify_subtitle("srt"), SubtitleKind::Text);
        assert_eq!(classify_subtitle("mov_text"), SubtitleKind::Unknown);
        assert_eq!(classify_subtitle(""), SubtitleKind::Unknown);
    }

    #[test]
    fn extract_command_targets_srt() {
        let cmd = extract_command(
            Path::new("ffmpeg"),
            Path::new("in.mkv"),
            3,
            Path::new("/tmp/x/track-3.srt"),
            Duration::from_secs(5),
        );
        let args = cmd.args();
        assert!(args.windows(2).any(|w| w == ["-map", "0:s:3"]));
        assert!(args.windows(2).any(|w| w == ["-f", "srt"]));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/x/track-3.srt"));
    }

    #[tokio::test]
    async fn failed_extraction_leaves_no_scratch() {
        let before = std::fs::read_dir(std::env::temp_dir())
            .map(|d| {
                d.filter_map(|e| e.ok())
                    .filter(|e| e.file_name().to_string_lossy().starts_with("rh-sub-"))
                    .count()
            })
            .unwrap_or(0);
        let result = extract_text_length(
            Path::new("nonexistent_tool_xyz_12345"),
            Path::new("in.mkv"),
            0,
            Duration::from_secs(5),
        )
        .await;
        assert!(result.is_err());
        let after = std::fs::read_dir(std::env::temp_dir())
            .map(|d| {
                d.filter_map(|e| e.ok())
                    .filter(|e| e.file_name().to_string_lossy().starts_with("rh-sub-"))
                    .count()
            })
            .unwrap_or(0);
        assert!(after <= before);
    }
}
