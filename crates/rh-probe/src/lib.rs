//! # rh-probe
//!
//! Media inspection for track selection.
//!
//! [`StreamProbe`] runs ffprobe for the stream inventory, then measures
//! each audio and subtitle track with ffmpeg: the encoded byte weight of
//! the track and, for subtitles, how much text the track carries.
//!
//! ## Quick start
//!
//! ```no_run
//! use rh_av::ToolRegistry;
//! use rh_core::config::{ProbeConfig, ToolsConfig};
//! use rh_probe::{Prober, StreamProbe};
//! use std::path::Path;
//!
//! # async fn example() -> rh_core::Result<()> {
//! let tools = ToolRegistry::discover(&ToolsConfig::default());
//! let probe = StreamProbe::from_registry(&tools, &ProbeConfig::default())?;
//! let result = probe.probe(Path::new("movie.mkv")).await?;
//! for track in &result.audio {
//!     println!("audio #{} {:?} {} bytes", track.relative_index, track.language, track.byte_size);
//! }
//! # Ok(())
//! # }
//! ```

pub mod ffprobe;
pub mod prober;
pub mod subtitle;
pub mod types;
pub mod weight;

// Re-export key types at crate root for convenience.
pub use prober::{Prober, StreamProbe};
pub use subtitle::classify_subtitle;
pub use types::{ProbeResult, SubtitleKind, TrackDescriptor, TrackKind};
pub use weight::parse_stream_size;
