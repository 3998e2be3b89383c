//! reelhaul: probe media files, pick their audio and subtitle tracks,
//! convert them under a supervised job queue and hand finished downloads
//! over to conversion.
//!
//! This library crate exposes the CLI wiring for integration testing.

pub mod config;
pub mod context;
