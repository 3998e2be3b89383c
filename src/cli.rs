use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use rh_pipeline::{Preferences, SelectionPreference};

#[derive(Parser)]
#[command(name = "reelhaul")]
#[command(author, version, about = "Probe, plan and convert media files")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe a media file and list its tracks with their weights
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show which tracks would be selected and the resulting command
    Plan {
        /// Input file
        #[arg(required = true)]
        file: PathBuf,

        /// Output path used when rendering the command
        #[arg(short, long, default_value = "output.mp4")]
        output: PathBuf,

        #[command(flatten)]
        selection: SelectionArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Convert a file, printing progress until it finishes
    Convert {
        /// Input file
        #[arg(required = true)]
        file: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

/// Track selection overrides shared by `plan` and `convert`.
#[derive(Args, Debug, Default, Clone)]
pub struct SelectionArgs {
    /// Preferred audio language
    #[arg(long)]
    pub audio_lang: Option<String>,

    /// Preferred subtitle language
    #[arg(long)]
    pub sub_lang: Option<String>,

    /// Use this audio track (relative index)
    #[arg(long)]
    pub audio_index: Option<usize>,

    /// Use this subtitle track (relative index)
    #[arg(long)]
    pub sub_index: Option<usize>,

    /// Use an external audio file
    #[arg(long)]
    pub audio_file: Option<PathBuf>,

    /// Burn in an external subtitle file
    #[arg(long)]
    pub sub_file: Option<PathBuf>,

    /// Drop audio entirely
    #[arg(long)]
    pub no_audio: bool,

    /// Do not burn in subtitles
    #[arg(long)]
    pub no_subs: bool,
}

impl SelectionArgs {
    /// Merge the flags over the configured language defaults.
    pub fn preferences(
        &self,
        audio_language: Option<&str>,
        subtitle_language: Option<&str>,
    ) -> Preferences {
        Preferences {
            audio: SelectionPreference {
                disabled: self.no_audio,
                external_file: self.audio_file.clone(),
                explicit_index: self.audio_index,
                language: self
                    .audio_lang
                    .clone()
                    .or_else(|| audio_language.map(str::to_string)),
            },
            subtitle: SelectionPreference {
                disabled: self.no_subs,
                external_file: self.sub_file.clone(),
                explicit_index: self.sub_index,
                language: self
                    .sub_lang
                    .clone()
                    .or_else(|| subtitle_language.map(str::to_string)),
            },
        }
    }
}
