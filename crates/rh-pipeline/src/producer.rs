//! Conversion command production.
//!
//! Binds every variable of the conversion template: input, output and
//! thread count always; the extra input, filter graph and stream maps
//! depending on the selections.

use std::path::{Path, PathBuf};

use rh_av::{ProcessCommand, ProgressUnit, ToolRegistry};
use rh_core::config::{expand_path, ConversionConfig};
use rh_core::{Error, Result};
use rh_probe::ProbeResult;
use serde::Serialize;

use crate::select::{select, FilterKind, Preferences, Selections, TrackSelection};

/// Upper bound on encoder threads.
const MAX_THREADS: usize = 16;
/// Cores left to the rest of the host.
const RESERVED_CPUS: usize = 2;

/// Encoder thread count for a host with `cpus` cores.
pub fn encoder_threads(cpus: usize) -> usize {
    cpus.saturating_sub(RESERVED_CPUS).clamp(1, MAX_THREADS)
}

/// Selections plus the command that realises them.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub selections: Selections,
    pub command: ProcessCommand,
}

/// Builds conversion commands from a template.
#[derive(Debug, Clone)]
pub struct CommandProducer {
    ffmpeg: PathBuf,
    template: String,
    fonts_dir: Option<PathBuf>,
    threads: usize,
}

impl CommandProducer {
    pub fn new(ffmpeg: PathBuf, template: impl Into<String>, fonts_dir: Option<PathBuf>) -> Self {
        Self {
            ffmpeg,
            template: template.into(),
            fonts_dir,
            threads: encoder_threads(num_cpus::get()),
        }
    }

    pub fn from_config(tools: &ToolRegistry, config: &ConversionConfig) -> Result<Self> {
        Ok(Self::new(
            tools.ffmpeg()?.to_path_buf(),
            config.template.clone(),
            config.fonts_dir.as_deref().map(expand_path),
        ))
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Select tracks and build the command in one step.
    pub fn plan(
        &self,
        input: &Path,
        output: &Path,
        probe: &ProbeResult,
        prefs: &Preferences,
    ) -> Result<Plan> {
        let selections = select(probe, prefs);
        let command = self.build(input, output, probe, &selections)?;
        Ok(Plan {
            selections,
            command,
        })
    }

    /// Reject selections that cannot be expressed as a filter graph.
    pub fn validate(&self, selections: &Selections) -> Result<()> {
        if let Some(sub) = &selections.subtitle {
            self.subtitle_filter(Path::new(""), 0, sub)?;
        }
        Ok(())
    }

    /// Bind the template for `input` -> `output`.
    pub fn build(
        &self,
        input: &Path,
        output: &Path,
        probe: &ProbeResult,
        selections: &Selections,
    ) -> Result<ProcessCommand> {
        let mut cmd = ProcessCommand::new(
            &self.ffmpeg,
            &self.template,
            ProgressUnit::from_duration_secs(probe.duration_secs),
        );
        cmd.add_var("INPUT", [input.to_string_lossy()])
            .add_var("OUTPUT", [output.to_string_lossy()])
            .add_var("THREADS", [self.threads.to_string()]);

        match &selections.subtitle {
            Some(sub) => {
                let graph = self.subtitle_filter(input, probe.video.relative_index, sub)?;
                cmd.add_var("FILTER_SUB", ["-filter_complex".to_string(), graph])
                    .add_var("MAP_SUB", ["-map", "[vo]"]);
            }
            None => {
                cmd.add_var(
                    "MAP_SUB",
                    ["-map".to_string(), format!("0:v:{}", probe.video.relative_index)],
                );
            }
        }

        if let Some(audio) = &selections.audio {
            match (&audio.external_file, audio.track_index) {
                (Some(file), _) => {
                    cmd.add_var("EXTRA_INPUT", ["-i".to_string(), file.to_string_lossy().into_owned()])
                        .add_var("MAP_AUDIO", ["-map", "1:a:0"]);
                }
                (None, Some(index)) => {
                    cmd.add_var("MAP_AUDIO", ["-map".to_string(), format!("0:a:{index}")]);
                }
                (None, None) => {}
            }
        }

        Ok(cmd)
    }

    fn fonts_option(&self) -> String {
        match &self.fonts_dir {
            Some(dir) => format!(":fontsdir={}", filter_quote(&dir.to_string_lossy())),
            None => String::new(),
        }
    }

    /// Filter graph feeding video stream `video` of the first input
    /// through the subtitle selection. The output pad is always `[vo]`.
    fn subtitle_filter(&self, input: &Path, video: usize, sub: &TrackSelection) -> Result<String> {
        let kind = sub.filter_kind.unwrap_or(FilterKind::Subtitles);
        match (kind, &sub.external_file, sub.track_index) {
            (FilterKind::Subtitles, Some(file), _) => Ok(format!(
                "[0:v:{video}]subtitles=f={}{}[vo]",
                filter_quote(&file.to_string_lossy()),
                self.fonts_option()
            )),
            (FilterKind::Subtitles, None, Some(index)) => Ok(format!(
                "[0:v:{video}]subtitles=f={}:si={index}{}[vo]",
                filter_quote(&input.to_string_lossy()),
                self.fonts_option()
            )),
            (FilterKind::Overlay, None, Some(index)) => {
                Ok(format!("[0:v:{video}][0:s:{index}]overlay[vo]"))
            }
            (FilterKind::Overlay, Some(file), _) => Err(Error::UnsupportedSubs(format!(
                "overlay of external file {}",
                file.display()
            ))),
            (_, None, None) => Err(Error::UnsupportedSubs(
                "subtitle selection has neither a track nor a file".into(),
            )),
        }
    }
}

/// Quote a value for use inside a filter graph option.
fn filter_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
