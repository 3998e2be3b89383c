//! Download acquisition for reelhaul.
//!
//! An acquisition is one metainfo file handed to a [`DownloadEngine`]. The
//! [`AcquisitionService`] imports it, starts and stops the transfer of a
//! subset of its files, polls byte counters while it runs and, once every
//! selected byte is on disk, moves the selected files under the `ready`
//! root and flips the acquisition to `Ready`.
//!
//! The engine and the persistence layer are collaborators behind traits, so
//! the service can be driven by a real client or by an in-memory fake.

pub mod engine;
pub mod episode;
pub mod handles;
pub mod relocate;
pub mod store;
pub mod watcher;

pub use engine::{DownloadEngine, FileHandle, Priority, TransferHandle};
pub use episode::{EpisodeKey, EpisodeParser};
pub use handles::HandleMap;
pub use store::{
    Acquisition, AcquisitionFile, AcquisitionStore, MemoryAcquisitionStore, NewFile,
};
pub use watcher::{AcquisitionService, ReadyListener};
