//! Persistence collaborator for conversion jobs.
//!
//! The pipeline never talks to a database directly; it calls a [`JobStore`].
//! [`MemoryJobStore`] is the in-process implementation used by the CLI and
//! the tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use rh_core::{ConversionStatus, Error, JobId, ProgressSample, Result, Transition};
use serde::Serialize;

/// Persisted view of one conversion job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRow {
    pub id: JobId,
    pub input: PathBuf,
    pub status: ConversionStatus,
    pub progress: ProgressSample,
    /// Rendered command line, for auditing.
    pub command: Option<String>,
    pub output: Option<PathBuf>,
    pub error: Option<String>,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a record in `Created` and return its id.
    async fn create_job(&self, input: &Path) -> Result<JobId>;

    async fn set_command(&self, id: JobId, command: &str, output: &Path) -> Result<()>;

    /// Validated status change; `error` is recorded for failures.
    async fn update_status(
        &self,
        id: JobId,
        status: ConversionStatus,
        error: Option<String>,
    ) -> Result<()>;

    async fn update_progress(&self, id: JobId, sample: ProgressSample) -> Result<()>;

    async fn get(&self, id: JobId) -> Result<Option<JobRow>>;

    /// Force every `Created`/`Processing` job to `Error`. Returns how many
    /// rows changed.
    async fn reset_in_flight(&self) -> Result<usize>;
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    rows: BTreeMap<JobId, JobRow>,
}

/// [`JobStore`] kept in memory.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row, ordered by id.
    pub fn rows(&self) -> Vec<JobRow> {
        self.inner.lock().rows.values().cloned().collect()
    }

    /// Insert a row as-is, e.g. one loaded from a previous run.
    pub fn insert(&self, row: JobRow) {
        let mut inner = self.inner.lock();
        inner.next_id = inner.next_id.max(row.id.get());
        inner.rows.insert(row.id, row);
    }

    fn with_row<T>(&self, id: JobId, f: impl FnOnce(&mut JobRow) -> Result<T>) -> Result<T> {
        let mut inner = self.inner.lock();
        let row = inner
            .rows
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("job", id))?;
        f(row)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, input: &Path) -> Result<JobId> {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = JobId::new(inner.next_id);
        inner.rows.insert(
            id,
            JobRow {
                id,
                input: input.to_path_buf(),
                status: ConversionStatus::Created,
                progress: ProgressSample {
                    eta_secs: -1,
                    ..Default::default()
                },
                command: None,
                output: None,
                error: None,
            },
        );
        Ok(id)
    }

    async fn set_command(&self, id: JobId, command: &str, output: &Path) -> Result<()> {
        self.with_row(id, |row| {
            row.command = Some(command.to_string());
            row.output = Some(output.to_path_buf());
            Ok(())
        })
    }

    async fn update_status(
        &self,
        id: JobId,
        status: ConversionStatus,
        error: Option<String>,
    ) -> Result<()> {
        self.with_row(id, |row| {
            row.status = row.status.transition_to(status)?;
            if error.is_some() {
                row.error = error;
            }
            Ok(())
        })
    }

    async fn update_progress(&self, id: JobId, sample: ProgressSample) -> Result<()> {
        self.with_row(id, |row| {
            row.progress = sample;
            Ok(())
        })
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRow>> {
        Ok(self.inner.lock().rows.get(&id).cloned())
    }

    async fn reset_in_flight(&self) -> Result<usize> {
        let mut inner = self.inner.lock();
        let mut changed = 0;
        for row in inner.rows.values_mut() {
            if !row.status.is_terminal() {
                row.status = ConversionStatus::Error;
                row.error = Some("interrupted by restart".into());
                changed += 1;
            }
        }
        Ok(changed)
    }
}
