//! Acquisition service and completion watcher.
//!
//! [`AcquisitionService`] owns the engine handles of running transfers
//! through a [`HandleMap`]. Each started acquisition gets a poller task that
//! sums the selected files' byte counters on a fixed interval, feeds an
//! [`EtaCalculator`] and persists progress. When every selected byte is in,
//! the poller drops the transfer, relocates the files and marks the
//! acquisition `Ready`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rh_core::config::AcquisitionConfig;
use rh_core::{
    AcquisitionFileId, AcquisitionId, AcquisitionStatus, Error, EtaCalculator, Result,
};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::engine::{DownloadEngine, Priority, TransferHandle};
use crate::episode::EpisodeParser;
use crate::handles::HandleMap;
use crate::relocate::{relocate, remove_artifacts, unique_path};
use crate::store::{Acquisition, AcquisitionStore, NewFile};

/// Notified after an acquisition has been relocated and marked ready.
#[async_trait]
pub trait ReadyListener: Send + Sync {
    async fn on_ready(&self, acquisition: &Acquisition);
}

struct Shared {
    engine: Arc<dyn DownloadEngine>,
    store: Arc<dyn AcquisitionStore>,
    handles: HandleMap,
    info_dir: PathBuf,
    downloads_dir: PathBuf,
    ready_dir: PathBuf,
    poll_interval: Duration,
    listener: Option<Arc<dyn ReadyListener>>,
}

/// Import, start, stop and delete acquisitions.
#[derive(Clone)]
pub struct AcquisitionService {
    shared: Arc<Shared>,
}

impl AcquisitionService {
    /// Create the data folders and recover from a previous run.
    pub async fn new(
        engine: Arc<dyn DownloadEngine>,
        store: Arc<dyn AcquisitionStore>,
        config: &AcquisitionConfig,
        listener: Option<Arc<dyn ReadyListener>>,
    ) -> Result<Self> {
        let info_dir = config.info_dir();
        let downloads_dir = config.downloads_dir();
        let ready_dir = config.ready_dir();
        for dir in [&info_dir, &downloads_dir, &ready_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }

        let reset = store.reset_in_flight().await?;
        if reset > 0 {
            warn!(count = reset, "Marked acquisitions interrupted by restart as failed");
        }

        Ok(Self {
            shared: Arc::new(Shared {
                engine,
                store,
                handles: HandleMap::new(),
                info_dir,
                downloads_dir,
                ready_dir,
                poll_interval: config.poll_interval(),
                listener,
            }),
        })
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.shared.downloads_dir
    }

    pub fn ready_dir(&self) -> &Path {
        &self.shared.ready_dir
    }

    /// Whether a transfer handle is live for `id`.
    pub fn is_active(&self, id: AcquisitionId) -> bool {
        self.shared.handles.contains(id)
    }

    pub async fn get(&self, id: AcquisitionId) -> Result<Acquisition> {
        self.shared
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("acquisition", id))
    }

    pub async fn list(&self) -> Result<Vec<Acquisition>> {
        self.shared.store.list().await
    }

    pub async fn ready_path(&self, file_id: AcquisitionFileId) -> Result<Option<PathBuf>> {
        self.shared.store.ready_path(file_id).await
    }

    /// Copy `metainfo` into the info folder, record it and enumerate its
    /// files. Every file starts deselected.
    pub async fn import(&self, metainfo: &Path) -> Result<AcquisitionId> {
        let shared = &self.shared;
        let file_name = metainfo
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let copy = unique_path(&shared.info_dir, &file_name);
        tokio::fs::copy(metainfo, &copy).await?;

        let id = match shared.store.create(&copy).await {
            Ok(id) => id,
            Err(e) => {
                let _ = tokio::fs::remove_file(&copy).await;
                return Err(e);
            }
        };
        info!(acquisition_id = %id, metainfo = %copy.display(), "Acquisition created");

        if let Err(e) = self.enumerate(id, &copy).await {
            error!(acquisition_id = %id, error = %e, "Acquisition import failed");
            shared.handles.release(id).await;
            if let Err(store_err) = shared.store.set_error(id, &e.to_string()).await {
                warn!(acquisition_id = %id, error = %store_err, "Failed to record import error");
            }
            return Err(e);
        }
        Ok(id)
    }

    async fn enumerate(&self, id: AcquisitionId, metainfo: &Path) -> Result<()> {
        let shared = &self.shared;
        let handle = shared.engine.add_from_file(metainfo).await?;
        shared.handles.install(id, Arc::clone(&handle)).await;

        let engine_files = handle.files();
        let mut files: Vec<NewFile> = engine_files
            .iter()
            .enumerate()
            .map(|(index, f)| NewFile {
                torrent_local_index: index,
                client_order_index: 0,
                path: f.display_path(),
                length: f.length(),
            })
            .collect();
        let parser = EpisodeParser::new()?;
        files.sort_by_cached_key(|f| parser.key(&f.path));
        for (order, file) in files.iter_mut().enumerate() {
            file.client_order_index = order;
        }

        let mut total_length = 0;
        for file in &engine_files {
            file.set_priority(Priority::None);
            total_length += file.length();
        }

        let name = handle.name();
        shared
            .store
            .init_files(id, &name, total_length, files)
            .await?;
        shared.handles.release(id).await;

        info!(
            acquisition_id = %id,
            name = %name,
            files = engine_files.len(),
            total_length,
            "Acquisition initialised"
        );
        Ok(())
    }

    /// Start downloading. `file_indices` are client order indexes; `None`
    /// selects every file.
    pub async fn start(&self, id: AcquisitionId, file_indices: Option<&[usize]>) -> Result<()> {
        let shared = &self.shared;
        let acquisition = self.get(id).await?;
        if acquisition.status == AcquisitionStatus::Downloading {
            return Err(Error::AlreadyStarted(id.to_string()));
        }

        let handle = shared.engine.add_from_file(&acquisition.metainfo).await?;
        shared.handles.install(id, Arc::clone(&handle)).await;

        let engine_files = handle.files();
        for file in &engine_files {
            file.set_priority(Priority::None);
        }

        let mut selected_ids = Vec::new();
        let mut selected_indexes = Vec::new();
        let mut target = 0;
        for file in &acquisition.files {
            let wanted = file_indices.map_or(true, |ids| ids.contains(&file.client_order_index));
            if !wanted {
                continue;
            }
            let Some(engine_file) = engine_files.get(file.torrent_local_index) else {
                shared.handles.release(id).await;
                return Err(Error::Engine(format!(
                    "engine has no file at index {} for acquisition {id}",
                    file.torrent_local_index
                )));
            };
            engine_file.set_priority(Priority::Normal);
            target += engine_file.length();
            selected_ids.push(file.id);
            selected_indexes.push(file.torrent_local_index);
        }

        if let Err(e) = shared.store.start(id, &selected_ids, target).await {
            shared.handles.release(id).await;
            return Err(e);
        }

        info!(
            acquisition_id = %id,
            files = selected_ids.len(),
            target,
            "Acquisition started"
        );
        tokio::spawn(watch(
            Arc::clone(shared),
            id,
            handle,
            selected_indexes,
            target,
        ));
        Ok(())
    }

    /// Drop the live transfer and return everything to `Idle`.
    pub async fn stop(&self, id: AcquisitionId) -> Result<()> {
        if !self.shared.handles.release(id).await {
            return Err(Error::AlreadyStopped(id.to_string()));
        }
        self.shared.store.stop(id).await?;
        info!(acquisition_id = %id, "Acquisition stopped");
        Ok(())
    }

    /// Finish an acquisition whose download completed but whose files could
    /// not be relocated. Files moved by the earlier attempt stay where they
    /// are.
    pub async fn retry_completion(&self, id: AcquisitionId) -> Result<()> {
        let acquisition = self.get(id).await?;
        if self.shared.handles.contains(id) {
            return Err(Error::AlreadyStarted(id.to_string()));
        }
        let finished = acquisition.status == AcquisitionStatus::Error
            && acquisition.selected_files().next().is_some()
            && acquisition.bytes_read >= acquisition.total_selected_length;
        if !finished {
            return Err(Error::validation(format!(
                "acquisition {id} has no finished download awaiting relocation"
            )));
        }

        self.shared.store.resume_completion(id).await?;
        info!(acquisition_id = %id, "Retrying acquisition completion");
        complete(&self.shared, id).await
    }

    /// Stop if needed, remove the record and clean the disk in the
    /// background.
    pub async fn delete(&self, id: AcquisitionId) -> Result<()> {
        let shared = &self.shared;
        shared.handles.release(id).await;
        let acquisition = shared.store.delete(id).await?;
        info!(acquisition_id = %id, "Acquisition deleted");

        let downloads = shared.downloads_dir.clone();
        let ready = shared.ready_dir.clone();
        tokio::spawn(async move {
            remove_artifacts(&acquisition, &downloads, &ready).await;
            debug!(acquisition_id = %acquisition.id, "Acquisition artifacts removed");
        });
        Ok(())
    }
}

/// Poll byte counters until the selected files are complete or the
/// transfer is dropped by someone else.
async fn watch(
    shared: Arc<Shared>,
    id: AcquisitionId,
    handle: Arc<dyn TransferHandle>,
    selected: Vec<usize>,
    target: u64,
) {
    let files = handle.files();
    let mut eta = EtaCalculator::bounded(0, target);
    eta.start();

    let period = shared.poll_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut closed = handle.closed();

    loop {
        tokio::select! {
            _ = &mut closed => {
                info!(acquisition_id = %id, cause = "closed", "Acquisition watcher exited");
                return;
            }
            _ = ticker.tick() => {
                let bytes_read: u64 = selected
                    .iter()
                    .filter_map(|&index| files.get(index))
                    .map(|f| f.bytes_completed())
                    .sum();
                eta.update(bytes_read);
                let sample = eta.progress();
                if let Err(e) = shared.store.update_progress(id, sample, bytes_read).await {
                    warn!(acquisition_id = %id, error = %e, "Failed to persist acquisition progress");
                }
                if bytes_read >= target {
                    break;
                }
            }
        }
    }
    drop(closed);

    // Only the task that evicts the handle may complete the acquisition.
    let Some(live) = shared.handles.take_if_current(id, &handle) else {
        debug!(acquisition_id = %id, "Handle replaced before completion");
        return;
    };
    live.drop_transfer();
    live.closed().await;

    if let Err(e) = complete(&shared, id).await {
        error!(acquisition_id = %id, error = %e, "Acquisition completion failed");
    }
}

/// Relocate the files of a finished download and mark it ready.
///
/// On failure the acquisition moves to `Error` with the paths of any files
/// already moved, so [`AcquisitionService::retry_completion`] can finish it.
async fn complete(shared: &Shared, id: AcquisitionId) -> Result<()> {
    let acquisition = shared
        .store
        .get(id)
        .await?
        .ok_or_else(|| Error::not_found("acquisition", id))?;

    let (moved, failure) =
        match relocate(&acquisition, &shared.downloads_dir, &shared.ready_dir).await {
            Ok(moved) => {
                let marked = shared.store.set_ready(id, &moved).await;
                (moved, marked.err())
            }
            Err(partial) => (partial.moved, Some(partial.error)),
        };

    if let Some(e) = failure {
        let message = format!("relocation failed: {e}");
        if let Err(store_err) = shared.store.fail_completion(id, &moved, &message).await {
            warn!(acquisition_id = %id, error = %store_err, "Failed to record completion failure");
        }
        return Err(e);
    }
    info!(acquisition_id = %id, files = moved.len(), "Acquisition ready");

    if let Some(listener) = &shared.listener {
        match shared.store.get(id).await {
            Ok(Some(ready)) => listener.on_ready(&ready).await,
            Ok(None) => {}
            Err(e) => warn!(acquisition_id = %id, error = %e, "Failed to reload ready acquisition"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FileHandle;
    use crate::store::MemoryAcquisitionStore;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use rh_core::FileStatus;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct FakeFile {
        path: String,
        length: u64,
        completed: AtomicU64,
        priority: Mutex<Priority>,
    }

    impl FileHandle for FakeFile {
        fn display_path(&self) -> String {
            self.path.clone()
        }
        fn length(&self) -> u64 {
            self.length
        }
        fn bytes_completed(&self) -> u64 {
            self.completed.load(Ordering::SeqCst)
        }
        fn set_priority(&self, priority: Priority) {
            *self.priority.lock() = priority;
        }
    }

    struct FakeTransfer {
        files: Vec<Arc<FakeFile>>,
        closed: CancellationToken,
    }

    #[async_trait]
    impl TransferHandle for FakeTransfer {
        fn name(&self) -> String {
            "Show".into()
        }
        fn files(&self) -> Vec<Arc<dyn FileHandle>> {
            self.files
                .iter()
                .map(|f| Arc::clone(f) as Arc<dyn FileHandle>)
                .collect()
        }
        fn drop_transfer(&self) {
            self.closed.cancel();
        }
        async fn closed(&self) {
            self.closed.cancelled().await
        }
    }

    /// Engine order is deliberately not path order.
    #[derive(Default)]
    struct FakeEngine {
        transfers: Mutex<Vec<Arc<FakeTransfer>>>,
    }

    impl FakeEngine {
        fn latest(&self) -> Arc<FakeTransfer> {
            Arc::clone(self.transfers.lock().last().unwrap())
        }

        fn complete_all(&self) {
            for f in &self.latest().files {
                f.completed.store(f.length, Ordering::SeqCst);
            }
        }
    }

    #[async_trait]
    impl DownloadEngine for FakeEngine {
        async fn add_from_file(&self, _metainfo: &Path) -> Result<Arc<dyn TransferHandle>> {
            let file = |path: &str, length| {
                Arc::new(FakeFile {
                    path: path.into(),
                    length,
                    completed: AtomicU64::new(0),
                    priority: Mutex::new(Priority::Normal),
                })
            };
            let transfer = Arc::new(FakeTransfer {
                files: vec![file("b.nfo", 4), file("a.mkv", 8)],
                closed: CancellationToken::new(),
            });
            self.transfers.lock().push(Arc::clone(&transfer));
            Ok(transfer)
        }
    }

    struct ChannelListener(mpsc::UnboundedSender<Acquisition>);

    #[async_trait]
    impl ReadyListener for ChannelListener {
        async fn on_ready(&self, acquisition: &Acquisition) {
            let _ = self.0.send(acquisition.clone());
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: Arc<FakeEngine>,
        store: Arc<MemoryAcquisitionStore>,
        service: AcquisitionService,
        ready_rx: mpsc::UnboundedReceiver<Acquisition>,
        metainfo: PathBuf,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = AcquisitionConfig {
            data_dir: dir.path().join("data"),
            poll_interval_secs: 3,
            auto_convert: false,
        };
        let metainfo = dir.path().join("show.torrent");
        std::fs::write(&metainfo, b"d4:infoe").unwrap();

        let engine = Arc::new(FakeEngine::default());
        let store = Arc::new(MemoryAcquisitionStore::new());
        let (tx, ready_rx) = mpsc::unbounded_channel();
        let service = AcquisitionService::new(
            engine.clone(),
            store.clone(),
            &config,
            Some(Arc::new(ChannelListener(tx))),
        )
        .await
        .unwrap();

        Fixture {
            _dir: dir,
            engine,
            store,
            service,
            ready_rx,
            metainfo,
        }
    }

    fn write_downloads(service: &AcquisitionService) {
        let root = service.downloads_dir().join("Show");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.mkv"), b"12345678").unwrap();
        std::fs::write(root.join("b.nfo"), b"info").unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn import_sorts_files_and_deselects() {
        let f = fixture().await;
        let id = f.service.import(&f.metainfo).await.unwrap();

        let acq = f.service.get(id).await.unwrap();
        assert_eq!(acq.status, AcquisitionStatus::Idle);
        assert_eq!(acq.name.as_deref(), Some("Show"));
        assert_eq!(acq.total_length, 12);
        assert_eq!(acq.files[0].path, "a.mkv");
        assert_eq!(acq.files[0].torrent_local_index, 1);
        assert_eq!(acq.files[1].client_order_index, 1);
        assert!(acq.metainfo.starts_with(f.service.shared.info_dir.as_path()));
        assert!(acq.metainfo.exists());

        for file in &f.engine.latest().files {
            assert_eq!(*file.priority.lock(), Priority::None);
        }
        assert!(!f.service.is_active(id));
    }

    #[tokio::test(start_paused = true)]
    async fn download_completes_and_relocates() {
        let mut f = fixture().await;
        let id = f.service.import(&f.metainfo).await.unwrap();
        f.service.start(id, Some(&[0])).await.unwrap();

        let transfer = f.engine.latest();
        assert_eq!(*transfer.files[1].priority.lock(), Priority::Normal);
        assert_eq!(*transfer.files[0].priority.lock(), Priority::None);

        write_downloads(&f.service);
        f.engine.complete_all();

        let ready = f.ready_rx.recv().await.unwrap();
        assert_eq!(ready.id, id);
        assert_eq!(ready.status, AcquisitionStatus::Ready);
        assert_eq!(ready.bytes_read, 8);

        let video = &ready.files[0];
        assert_eq!(video.status, FileStatus::Ready);
        let path = video.ready_path.clone().unwrap();
        assert!(path.starts_with(f.service.ready_dir().join(id.to_string())));
        assert_eq!(std::fs::read(&path).unwrap(), b"12345678");
        assert_eq!(f.service.ready_path(video.id).await.unwrap(), Some(path));

        assert_eq!(ready.files[1].status, FileStatus::Idle);
        assert!(!f.service.downloads_dir().join("Show/b.nfo").exists());
        assert!(!f.service.is_active(id));
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_persisted_while_downloading() {
        let f = fixture().await;
        let id = f.service.import(&f.metainfo).await.unwrap();
        f.service.start(id, None).await.unwrap();
        f.engine.latest().files[1].completed.store(6, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(4)).await;

        let acq = f.service.get(id).await.unwrap();
        assert_eq!(acq.status, AcquisitionStatus::Downloading);
        assert_eq!(acq.total_selected_length, 12);
        assert_eq!(acq.bytes_read, 6);
        assert_eq!(acq.progress.progress_pct, 50);
        assert!(f.service.is_active(id));
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_and_stop_twice() {
        let f = fixture().await;
        let id = f.service.import(&f.metainfo).await.unwrap();
        f.service.start(id, None).await.unwrap();

        assert_matches!(f.service.start(id, None).await, Err(Error::AlreadyStarted(_)));

        let transfer = f.engine.latest();
        f.service.stop(id).await.unwrap();
        assert!(transfer.closed.is_cancelled());
        assert_matches!(f.service.stop(id).await, Err(Error::AlreadyStopped(_)));

        let acq = f.service.get(id).await.unwrap();
        assert_eq!(acq.status, AcquisitionStatus::Idle);
        assert!(acq.files.iter().all(|f| !f.selected));

        // A stopped acquisition can be restarted.
        f.service.start(id, None).await.unwrap();
        assert!(f.service.is_active(id));
    }

    /// Yields until `id` reaches `status`, bounded by wall-clock time since
    /// relocation runs on the blocking pool while virtual time races ahead.
    async fn wait_for_status(
        service: &AcquisitionService,
        id: AcquisitionId,
        status: AcquisitionStatus,
    ) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while service.get(id).await.unwrap().status != status {
            assert!(std::time::Instant::now() < deadline, "never reached {status:?}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_relocation_can_be_retried() {
        let mut f = fixture().await;
        let id = f.service.import(&f.metainfo).await.unwrap();
        assert_matches!(f.service.retry_completion(id).await, Err(Error::Validation(_)));

        f.service.start(id, None).await.unwrap();
        // Only the video reaches the disk, so the second move fails.
        let root = f.service.downloads_dir().join("Show");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.mkv"), b"12345678").unwrap();
        f.engine.complete_all();

        wait_for_status(&f.service, id, AcquisitionStatus::Error).await;
        let failed = f.service.get(id).await.unwrap();
        assert!(failed.error.as_deref().unwrap().starts_with("relocation failed"));
        assert!(!f.service.is_active(id));
        let video_path = failed.files[0].ready_path.clone().unwrap();
        assert_eq!(std::fs::read(&video_path).unwrap(), b"12345678");
        assert_eq!(failed.files[1].ready_path, None);
        assert!(f.ready_rx.try_recv().is_err());

        std::fs::write(root.join("b.nfo"), b"info").unwrap();
        f.service.retry_completion(id).await.unwrap();

        let ready = f.ready_rx.recv().await.unwrap();
        assert_eq!(ready.status, AcquisitionStatus::Ready);
        assert_eq!(ready.error, None);
        assert_eq!(ready.files[0].ready_path, Some(video_path));
        assert!(ready.files.iter().all(|f| f.status == FileStatus::Ready));
        let nfo = ready.files[1].ready_path.clone().unwrap();
        assert_eq!(std::fs::read(nfo).unwrap(), b"info");

        assert_matches!(f.service.retry_completion(id).await, Err(Error::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_marks_in_flight_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryAcquisitionStore::new());
        let id = store.create(Path::new("/info/x.torrent")).await.unwrap();

        let config = AcquisitionConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let service = AcquisitionService::new(
            Arc::new(FakeEngine::default()),
            store.clone(),
            &config,
            None,
        )
        .await
        .unwrap();

        assert_eq!(
            service.get(id).await.unwrap().status,
            AcquisitionStatus::Error
        );
        assert!(dir.path().join("ready").is_dir());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_drops_handle_and_record() {
        let f = fixture().await;
        let id = f.service.import(&f.metainfo).await.unwrap();
        f.service.start(id, None).await.unwrap();
        let transfer = f.engine.latest();

        f.service.delete(id).await.unwrap();

        assert!(transfer.closed.is_cancelled());
        assert!(!f.service.is_active(id));
        assert_matches!(f.service.get(id).await, Err(Error::NotFound { .. }));
        assert!(f.store.list().await.unwrap().is_empty());
    }
}
