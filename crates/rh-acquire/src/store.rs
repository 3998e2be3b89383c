//! Persistence collaborator for acquisitions.
//!
//! Status changes go through the [`Transition`] tables in `rh-core`, and
//! every multi-row update (start, stop, ready) is applied atomically: it is
//! validated in full before anything is written.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use rh_core::{
    AcquisitionFileId, AcquisitionId, AcquisitionStatus, Error, FileStatus, ProgressSample,
    Result, Transition,
};
use serde::Serialize;

/// Persisted view of one acquisition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Acquisition {
    pub id: AcquisitionId,
    pub name: Option<String>,
    pub status: AcquisitionStatus,
    /// Copy of the metainfo file under the `info` folder.
    pub metainfo: PathBuf,
    pub total_length: u64,
    pub total_selected_length: u64,
    pub bytes_read: u64,
    pub progress: ProgressSample,
    pub error: Option<String>,
    /// Ordered by `client_order_index`.
    pub files: Vec<AcquisitionFile>,
}

impl Acquisition {
    pub fn file(&self, id: AcquisitionFileId) -> Option<&AcquisitionFile> {
        self.files.iter().find(|f| f.id == id)
    }

    pub fn selected_files(&self) -> impl Iterator<Item = &AcquisitionFile> {
        self.files.iter().filter(|f| f.selected)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcquisitionFile {
    pub id: AcquisitionFileId,
    pub parent_id: AcquisitionId,
    /// Position in the engine's file list.
    pub torrent_local_index: usize,
    /// Position in the episode-ordered list shown to users.
    pub client_order_index: usize,
    pub path: String,
    pub length: u64,
    pub selected: bool,
    pub status: FileStatus,
    pub ready_path: Option<PathBuf>,
}

/// File description gathered at import time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    pub torrent_local_index: usize,
    pub client_order_index: usize,
    pub path: String,
    pub length: u64,
}

#[async_trait]
pub trait AcquisitionStore: Send + Sync {
    /// Create a record in `Creating`.
    async fn create(&self, metainfo: &Path) -> Result<AcquisitionId>;

    /// Record the file list and move `Creating → Idle`.
    async fn init_files(
        &self,
        id: AcquisitionId,
        name: &str,
        total_length: u64,
        files: Vec<NewFile>,
    ) -> Result<()>;

    /// Entity to `Downloading`; `selected` files to `Downloading`, the rest
    /// unselected and `Idle`.
    async fn start(
        &self,
        id: AcquisitionId,
        selected: &[AcquisitionFileId],
        target: u64,
    ) -> Result<()>;

    async fn update_progress(
        &self,
        id: AcquisitionId,
        sample: ProgressSample,
        bytes_read: u64,
    ) -> Result<()>;

    /// Entity and every file back to `Idle`, nothing selected.
    async fn stop(&self, id: AcquisitionId) -> Result<()>;

    /// Entity to `Ready` and each listed file to `Ready` with its path.
    async fn set_ready(
        &self,
        id: AcquisitionId,
        ready: &[(AcquisitionFileId, PathBuf)],
    ) -> Result<()>;

    async fn set_error(&self, id: AcquisitionId, message: &str) -> Result<()>;

    /// Entity `Downloading → Error` after a completion attempt failed.
    /// Files listed in `moved` keep their ready path; file statuses are left
    /// alone so the completion can be resumed.
    async fn fail_completion(
        &self,
        id: AcquisitionId,
        moved: &[(AcquisitionFileId, PathBuf)],
        message: &str,
    ) -> Result<()>;

    /// Entity `Error → Downloading` ahead of another completion attempt.
    async fn resume_completion(&self, id: AcquisitionId) -> Result<()>;

    /// Force `Creating`/`Downloading` entities and `Downloading` files to
    /// `Error`. Returns the number of entities changed.
    async fn reset_in_flight(&self) -> Result<usize>;

    /// Remove the record and return what it held.
    async fn delete(&self, id: AcquisitionId) -> Result<Acquisition>;

    async fn get(&self, id: AcquisitionId) -> Result<Option<Acquisition>>;

    async fn list(&self) -> Result<Vec<Acquisition>>;

    async fn ready_path(&self, file_id: AcquisitionFileId) -> Result<Option<PathBuf>>;
}

/// Move `current` to `next`, treating "already there" as success.
fn settle<T: Transition>(current: T, next: T) -> Result<T> {
    if current == next {
        Ok(current)
    } else {
        current.transition_to(next)
    }
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    next_file_id: u64,
    rows: BTreeMap<AcquisitionId, Acquisition>,
}

impl Inner {
    fn row_mut(&mut self, id: AcquisitionId) -> Result<&mut Acquisition> {
        self.rows
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("acquisition", id))
    }
}

/// [`AcquisitionStore`] kept in memory.
#[derive(Debug, Default)]
pub struct MemoryAcquisitionStore {
    inner: Mutex<Inner>,
}

impl MemoryAcquisitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record as-is, e.g. one loaded from a previous run.
    pub fn insert(&self, row: Acquisition) {
        let mut inner = self.inner.lock();
        inner.next_id = inner.next_id.max(row.id.get());
        let max_file = row.files.iter().map(|f| f.id.get()).max().unwrap_or(0);
        inner.next_file_id = inner.next_file_id.max(max_file);
        inner.rows.insert(row.id, row);
    }
}

#[async_trait]
impl AcquisitionStore for MemoryAcquisitionStore {
    async fn create(&self, metainfo: &Path) -> Result<AcquisitionId> {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = AcquisitionId::new(inner.next_id);
        inner.rows.insert(
            id,
            Acquisition {
                id,
                name: None,
                status: AcquisitionStatus::Creating,
                metainfo: metainfo.to_path_buf(),
                total_length: 0,
                total_selected_length: 0,
                bytes_read: 0,
                progress: ProgressSample::default(),
                error: None,
                files: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn init_files(
        &self,
        id: AcquisitionId,
        name: &str,
        total_length: u64,
        mut files: Vec<NewFile>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let first_file_id = inner.next_file_id;
        inner.next_file_id += files.len() as u64;

        let row = inner.row_mut(id)?;
        let status = row.status.transition_to(AcquisitionStatus::Idle)?;

        files.sort_by_key(|f| f.client_order_index);
        row.files = files
            .into_iter()
            .enumerate()
            .map(|(n, f)| AcquisitionFile {
                id: AcquisitionFileId::new(first_file_id + n as u64 + 1),
                parent_id: id,
                torrent_local_index: f.torrent_local_index,
                client_order_index: f.client_order_index,
                path: f.path,
                length: f.length,
                selected: false,
                status: FileStatus::Idle,
                ready_path: None,
            })
            .collect();
        row.name = Some(name.to_string());
        row.total_length = total_length;
        row.status = status;
        Ok(())
    }

    async fn start(
        &self,
        id: AcquisitionId,
        selected: &[AcquisitionFileId],
        target: u64,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let row = inner.row_mut(id)?;

        let status = row.status.transition_to(AcquisitionStatus::Downloading)?;
        let mut next = Vec::with_capacity(row.files.len());
        for file in &row.files {
            let pick = selected.contains(&file.id);
            let target_status = if pick {
                FileStatus::Downloading
            } else {
                FileStatus::Idle
            };
            next.push((pick, settle(file.status, target_status)?));
        }

        for (file, (pick, status)) in row.files.iter_mut().zip(next) {
            file.selected = pick;
            file.status = status;
            if pick {
                file.ready_path = None;
            }
        }
        row.status = status;
        row.total_selected_length = target;
        row.bytes_read = 0;
        row.progress = ProgressSample::default();
        row.error = None;
        Ok(())
    }

    async fn update_progress(
        &self,
        id: AcquisitionId,
        sample: ProgressSample,
        bytes_read: u64,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let row = inner.row_mut(id)?;
        row.progress = sample;
        row.bytes_read = bytes_read;
        Ok(())
    }

    async fn stop(&self, id: AcquisitionId) -> Result<()> {
        let mut inner = self.inner.lock();
        let row = inner.row_mut(id)?;

        let status = settle(row.status, AcquisitionStatus::Idle)?;
        let files = row
            .files
            .iter()
            .map(|f| settle(f.status, FileStatus::Idle))
            .collect::<Result<Vec<_>>>()?;

        for (file, status) in row.files.iter_mut().zip(files) {
            file.selected = false;
            file.status = status;
        }
        row.status = status;
        Ok(())
    }

    async fn set_ready(
        &self,
        id: AcquisitionId,
        ready: &[(AcquisitionFileId, PathBuf)],
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let row = inner.row_mut(id)?;

        let status = row.status.transition_to(AcquisitionStatus::Ready)?;
        for (file_id, _) in ready {
            let file = row
                .file(*file_id)
                .ok_or_else(|| Error::not_found("acquisition file", file_id))?;
            if !file.selected {
                return Err(Error::validation(format!(
                    "file {file_id} is not selected and cannot become ready"
                )));
            }
            file.status.transition_to(FileStatus::Ready)?;
        }

        for (file_id, path) in ready {
            if let Some(file) = row.files.iter_mut().find(|f| f.id == *file_id) {
                file.status = FileStatus::Ready;
                file.ready_path = Some(path.clone());
            }
        }
        row.status = status;
        row.progress.progress_pct = 100;
        row.bytes_read = row.total_selected_length;
        Ok(())
    }

    async fn set_error(&self, id: AcquisitionId, message: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let row = inner.row_mut(id)?;
        row.status = row.status.transition_to(AcquisitionStatus::Error)?;
        row.error = Some(message.to_string());
        Ok(())
    }

    async fn fail_completion(
        &self,
        id: AcquisitionId,
        moved: &[(AcquisitionFileId, PathBuf)],
        message: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let row = inner.row_mut(id)?;

        let status = row.status.transition_to(AcquisitionStatus::Error)?;
        for (file_id, _) in moved {
            let file = row
                .file(*file_id)
                .ok_or_else(|| Error::not_found("acquisition file", file_id))?;
            if !file.selected {
                return Err(Error::validation(format!(
                    "file {file_id} is not selected and cannot hold a ready path"
                )));
            }
        }

        for (file_id, path) in moved {
            if let Some(file) = row.files.iter_mut().find(|f| f.id == *file_id) {
                file.ready_path = Some(path.clone());
            }
        }
        row.status = status;
        row.error = Some(message.to_string());
        Ok(())
    }

    async fn resume_completion(&self, id: AcquisitionId) -> Result<()> {
        let mut inner = self.inner.lock();
        let row = inner.row_mut(id)?;
        row.status = row.status.transition_to(AcquisitionStatus::Downloading)?;
        row.error = None;
        Ok(())
    }

    async fn reset_in_flight(&self) -> Result<usize> {
        let mut inner = self.inner.lock();
        let mut count = 0;
        for row in inner.rows.values_mut() {
            for file in row
                .files
                .iter_mut()
                .filter(|f| f.status == FileStatus::Downloading)
            {
                file.status = FileStatus::Error;
                file.selected = false;
            }
            if row.status.is_in_flight() {
                row.status = AcquisitionStatus::Error;
                row.error = Some("interrupted by restart".into());
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete(&self, id: AcquisitionId) -> Result<Acquisition> {
        self.inner
            .lock()
            .rows
            .remove(&id)
            .ok_or_else(|| Error::not_found("acquisition", id))
    }

    async fn get(&self, id: AcquisitionId) -> Result<Option<Acquisition>> {
        Ok(self.inner.lock().rows.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Acquisition>> {
        Ok(self.inner.lock().rows.values().cloned().collect())
    }

    async fn ready_path(&self, file_id: AcquisitionFileId) -> Result<Option<PathBuf>> {
        let inner = self.inner.lock();
        let file = inner
            .rows
            .values()
            .flat_map(|r| r.files.iter())
            .find(|f| f.id == file_id)
            .ok_or_else(|| Error::not_found("acquisition file", file_id))?;
        Ok(file.ready_path.clone())
    }
}
