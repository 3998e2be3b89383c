//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from TOML. Every section
//! defaults sensibly so an empty file is valid, and [`Config::validate`]
//! reports non-fatal problems for the `validate` command.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default ffmpeg argument template used for conversions.
pub const DEFAULT_CONVERT_TEMPLATE: &str = "-hide_banner -y -hwaccel auto -stats_period 2 \
     -i $INPUT $EXTRA_INPUT $FILTER_SUB $MAP_SUB $MAP_AUDIO \
     -c:v libx264 -preset fast -crf 23 -pix_fmt yuv420p -threads $THREADS \
     -c:a aac -b:a 192k -ac 2 -sn -movflags +faststart -f mp4 $OUTPUT";

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub probe: ProbeConfig,
    pub conversion: ConversionConfig,
    pub acquisition: AcquisitionConfig,
}

impl Config {
    /// Deserialize a `Config` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Config(format!("config parse error: {e}")))
    }

    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.conversion.workers == 0 {
            warnings.push("conversion.workers is 0; the job queue will refuse to start".into());
        }

        let template = &self.conversion.template;
        if template.trim().is_empty() {
            warnings.push("conversion.template is empty".into());
        } else {
            for var in ["$INPUT", "$OUTPUT"] {
                if !template.split_whitespace().any(|t| t == var) {
                    warnings.push(format!("conversion.template does not reference {var}"));
                }
            }
        }

        if self.probe.timeout_secs == 0 {
            warnings.push("probe.timeout_secs is 0; every probe will time out".into());
        }

        if self.acquisition.poll_interval_secs == 0 {
            warnings.push("acquisition.poll_interval_secs is 0; using 1 second".into());
        }

        if let Some(ref fonts) = self.conversion.fonts_dir {
            if !fonts.is_dir() {
                warnings.push(format!(
                    "conversion.fonts_dir {} is not a directory",
                    fonts.display()
                ));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Explicit locations of external tools. Unset entries are looked up on `PATH`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Hard deadline for the metadata probe.
    pub timeout_secs: u64,
    /// Deadline for a single track measurement (re-mux to a null sink).
    pub measure_timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            measure_timeout_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Size of the job queue's worker pool.
    pub workers: usize,
    /// Root under which each job gets its own folder.
    pub output_dir: PathBuf,
    /// Font directory hint for burned-in text subtitles.
    pub fonts_dir: Option<PathBuf>,
    /// ffmpeg argument template, see [`DEFAULT_CONVERT_TEMPLATE`].
    pub template: String,
    /// Preferred audio language for automatic conversions.
    pub audio_language: Option<String>,
    /// Preferred subtitle language for automatic conversions.
    pub subtitle_language: Option<String>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            output_dir: PathBuf::from("data/conversions"),
            fonts_dir: None,
            template: DEFAULT_CONVERT_TEMPLATE.to_string(),
            audio_language: None,
            subtitle_language: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Root holding the `info`, `downloads` and `ready` folders.
    pub data_dir: PathBuf,
    pub poll_interval_secs: u64,
    /// Submit every relocated file for conversion once an acquisition is ready.
    pub auto_convert: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/acquisitions"),
            poll_interval_secs: 3,
            auto_convert: false,
        }
    }
}

impl AcquisitionConfig {
    pub fn info_dir(&self) -> PathBuf {
        self.data_dir.join("info")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }

    pub fn ready_dir(&self) -> PathBuf {
        self.data_dir.join("ready")
    }

    /// Poll interval, never shorter than one second.
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// Expand a leading `~` in a configured path.
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}
