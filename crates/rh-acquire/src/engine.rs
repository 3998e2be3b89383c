//! Download-engine collaborator.
//!
//! These traits describe the small surface the acquisition service needs
//! from a download client: load a metainfo file, list its files, watch
//! per-file byte counters, toggle whether a file is fetched at all, and
//! tear the transfer down.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rh_core::Result;

/// Whether the engine should fetch a file's pieces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Do not download.
    None,
    Normal,
}

/// One file inside a transfer.
pub trait FileHandle: Send + Sync {
    /// Path relative to the transfer root, as reported by the engine.
    fn display_path(&self) -> String;

    fn length(&self) -> u64;

    fn bytes_completed(&self) -> u64;

    fn set_priority(&self, priority: Priority);
}

/// A live transfer owned by the engine.
#[async_trait]
pub trait TransferHandle: Send + Sync {
    /// Best display name; multi-file transfers download under a folder of
    /// this name.
    fn name(&self) -> String;

    /// Files in engine order. The order is stable across calls.
    fn files(&self) -> Vec<Arc<dyn FileHandle>>;

    /// Stop the transfer and release its resources. Idempotent.
    fn drop_transfer(&self);

    /// Resolves once the transfer has been dropped.
    async fn closed(&self);
}

#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Load a metainfo file and return a handle once its file list is known.
    async fn add_from_file(&self, metainfo: &Path) -> Result<Arc<dyn TransferHandle>>;
}
