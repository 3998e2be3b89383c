//! # rh-av
//!
//! External process plumbing for the reelhaul pipeline.
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find ffmpeg and ffprobe.
//! - **Templated commands** ([`ProcessCommand`]) -- `$VAR` interpolation,
//!   synchronous capture and cancellable streaming execution.
//! - **Line splitting** ([`LineCodec`]) -- treats `\r` and `\n` alike so
//!   overwritten status lines arrive one by one.
//! - **Progress parsing** ([`ProgressParser`]) -- time code and frame
//!   counters fed through an ETA calculator.

pub mod command;
pub mod lines;
pub mod progress;
pub mod tools;
pub mod transcript;

// ---- Re-exports for convenience ----

pub use command::{split_command_line, Execution, ProcessCommand, VAR_SIGIL};
pub use lines::LineCodec;
pub use progress::{ProgressParser, ProgressUnit};
pub use tools::{ToolInfo, ToolRegistry};
pub use transcript::TranscriptWriter;
