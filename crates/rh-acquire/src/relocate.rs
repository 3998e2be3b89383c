//! Moving finished downloads under the `ready` root.

use std::path::{Path, PathBuf};

use rh_core::{AcquisitionFileId, AcquisitionId, Error, Result};
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::Acquisition;

/// Fresh path under `folder` that keeps the extension of `original`.
pub fn unique_path(folder: &Path, original: &str) -> PathBuf {
    let ext = Path::new(original)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    folder.join(format!("{}{ext}", Uuid::new_v4()))
}

/// Folder holding the ready files of one acquisition.
pub fn ready_folder(ready_root: &Path, id: AcquisitionId) -> PathBuf {
    ready_root.join(id.to_string())
}

/// Where the engine put `relative` for a transfer called `name`.
///
/// Multi-file transfers live under a folder named after the transfer;
/// single-file ones sit directly in the downloads root.
pub fn downloaded_path(downloads_root: &Path, name: Option<&str>, relative: &str) -> PathBuf {
    if let Some(name) = name {
        let nested = downloads_root.join(name).join(relative);
        if nested.exists() {
            return nested;
        }
    }
    downloads_root.join(relative)
}

/// A relocation that stopped part way through.
#[derive(Debug)]
pub struct PartialRelocation {
    /// Files already under the ready root when the error happened.
    pub moved: Vec<(AcquisitionFileId, PathBuf)>,
    pub error: Error,
}

/// Move every selected file of `acquisition` under the ready root and
/// delete the unselected ones.
///
/// Stops at the first filesystem error and hands back what was moved so
/// far. Files already carrying a ready path are left alone so a retry only
/// moves what is still missing.
pub async fn relocate(
    acquisition: &Acquisition,
    downloads_root: &Path,
    ready_root: &Path,
) -> std::result::Result<Vec<(AcquisitionFileId, PathBuf)>, PartialRelocation> {
    let folder = ready_folder(ready_root, acquisition.id);
    let name = acquisition.name.as_deref();
    let mut moved = Vec::new();

    for file in &acquisition.files {
        let source = downloaded_path(downloads_root, name, &file.path);

        if !file.selected {
            if let Err(e) = tokio::fs::remove_file(&source).await {
                debug!(path = %source.display(), error = %e, "Unselected file not removed");
            }
            continue;
        }
        if let Some(existing) = &file.ready_path {
            moved.push((file.id, existing.clone()));
            continue;
        }

        let target = unique_path(&folder, &file.path);
        if let Err(error) = move_file(&source, &target).await {
            return Err(PartialRelocation { moved, error });
        }
        debug!(
            acquisition_id = %acquisition.id,
            from = %source.display(),
            to = %target.display(),
            "Moved ready file"
        );
        moved.push((file.id, target));
    }

    info!(
        acquisition_id = %acquisition.id,
        files = moved.len(),
        "Relocated acquisition files"
    );
    Ok(moved)
}

async fn move_file(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::rename(source, target).await?;
    Ok(())
}

/// Best-effort removal of everything an acquisition left on disk.
pub async fn remove_artifacts(acquisition: &Acquisition, downloads_root: &Path, ready_root: &Path) {
    let name = acquisition.name.as_deref();
    for file in &acquisition.files {
        let _ = tokio::fs::remove_file(downloaded_path(downloads_root, name, &file.path)).await;
        if let Some(ready) = &file.ready_path {
            let _ = tokio::fs::remove_file(ready).await;
        }
    }
    let _ = tokio::fs::remove_file(&acquisition.metainfo).await;
    let _ = tokio::fs::remove_dir_all(ready_folder(ready_root, acquisition.id)).await;
    if let Some(name) = name {
        let _ = tokio::fs::remove_dir_all(downloads_root.join(name)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rh_core::{AcquisitionStatus, FileStatus, ProgressSample};

    use crate::store::AcquisitionFile;

    fn file(id: u64, path: &str, selected: bool) -> AcquisitionFile {
        AcquisitionFile {
            id: AcquisitionFileId::new(id),
            parent_id: AcquisitionId::new(9),
            torrent_local_index: id as usize,
            client_order_index: id as usize,
            path: path.into(),
            length: 4,
            selected,
            status: FileStatus::Downloading,
            ready_path: None,
        }
    }

    fn acquisition(files: Vec<AcquisitionFile>) -> Acquisition {
        Acquisition {
            id: AcquisitionId::new(9),
            name: Some("Show".into()),
            status: AcquisitionStatus::Downloading,
            metainfo: PathBuf::from("/nowhere.torrent"),
            total_length: 8,
            total_selected_length: 4,
            bytes_read: 4,
            progress: ProgressSample::default(),
            error: None,
            files,
        }
    }

    #[test]
    fn unique_path_keeps_extension() {
        let a = unique_path(Path::new("/r"), "dir/Episode 1.mkv");
        let b = unique_path(Path::new("/r"), "dir/Episode 1.mkv");
        assert_ne!(a, b);
        assert_eq!(a.extension().unwrap(), "mkv");
        assert_eq!(a.parent().unwrap(), Path::new("/r"));
        assert!(unique_path(Path::new("/r"), "README").extension().is_none());
    }

    #[tokio::test]
    async fn moves_selected_and_deletes_rest() {
        let dir = tempfile::tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        let ready = dir.path().join("ready");
        std::fs::create_dir_all(downloads.join("Show/sub")).unwrap();
        std::fs::write(downloads.join("Show/sub/ep.mkv"), b"data").unwrap();
        std::fs::write(downloads.join("Show/info.nfo"), b"nfo!").unwrap();

        let acq = acquisition(vec![file(1, "sub/ep.mkv", true), file(2, "info.nfo", false)]);
        let moved = relocate(&acq, &downloads, &ready).await.unwrap();

        assert_eq!(moved.len(), 1);
        let (id, path) = &moved[0];
        assert_eq!(*id, AcquisitionFileId::new(1));
        assert!(path.starts_with(ready.join("9")));
        assert_eq!(std::fs::read(path).unwrap(), b"data");
        assert!(!downloads.join("Show/sub/ep.mkv").exists());
        assert!(!downloads.join("Show/info.nfo").exists());
    }

    #[tokio::test]
    async fn missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let acq = acquisition(vec![file(1, "gone.mkv", true)]);
        let failure = relocate(&acq, dir.path(), &dir.path().join("ready"))
            .await
            .unwrap_err();
        assert!(failure.moved.is_empty());
        assert_matches!(failure.error, Error::Io { .. });
    }

    #[tokio::test]
    async fn failure_reports_files_already_moved() {
        let dir = tempfile::tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        let ready = dir.path().join("ready");
        std::fs::create_dir_all(downloads.join("Show")).unwrap();
        std::fs::write(downloads.join("Show/ep1.mkv"), b"one!").unwrap();

        let mut done = file(3, "ep0.mkv", true);
        done.ready_path = Some(ready.join("9/earlier.mkv"));
        let acq = acquisition(vec![
            done,
            file(1, "ep1.mkv", true),
            file(2, "ep2.mkv", true),
        ]);
        let failure = relocate(&acq, &downloads, &ready).await.unwrap_err();

        assert_eq!(failure.moved.len(), 2);
        assert_eq!(failure.moved[0], (AcquisitionFileId::new(3), ready.join("9/earlier.mkv")));
        let (id, path) = &failure.moved[1];
        assert_eq!(*id, AcquisitionFileId::new(1));
        assert_eq!(std::fs::read(path).unwrap(), b"one!");
    }

    #[tokio::test]
    async fn artifacts_include_whole_ready_folder() {
        let dir = tempfile::tempdir().unwrap();
        let ready = dir.path().join("ready");
        std::fs::create_dir_all(ready.join("9")).unwrap();
        std::fs::write(ready.join("9/orphan.mkv"), b"left").unwrap();

        let acq = acquisition(vec![file(1, "ep.mkv", true)]);
        remove_artifacts(&acq, dir.path(), &ready).await;
        assert!(!ready.join("9").exists());
    }
}
