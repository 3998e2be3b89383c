//! Shared fixtures for integration tests.
//!
//! Provides a [`FixedProber`] that skips ffprobe, a [`scripted_producer`]
//! whose "encoder" is a shell script, and a [`FakeEngine`] standing in for
//! a download client.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rh_acquire::{DownloadEngine, FileHandle, Priority, TransferHandle};
use rh_core::{Error, Result};
use rh_pipeline::CommandProducer;
use rh_probe::{ProbeResult, Prober, TrackDescriptor, TrackKind};
use tokio_util::sync::CancellationToken;

/// True when a POSIX shell is available to run scripted encoders.
pub fn has_sh() -> bool {
    which::which("sh").is_ok()
}

// ---------------------------------------------------------------------------
// Probing
// ---------------------------------------------------------------------------

/// Returns the same result for every path, or `VideoStreamNotFound`.
pub struct FixedProber(pub Option<ProbeResult>);

#[async_trait]
impl Prober for FixedProber {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn probe(&self, _path: &Path) -> Result<ProbeResult> {
        self.0.clone().ok_or(Error::VideoStreamNotFound)
    }
}

/// One video, two audio tracks (English light, Japanese heavy), no subs.
pub fn ten_second_clip() -> ProbeResult {
    let mut eng = TrackDescriptor::new(TrackKind::Audio, 0);
    eng.language = Some("eng".into());
    eng.byte_size = 100;
    let mut jpn = TrackDescriptor::new(TrackKind::Audio, 1);
    jpn.language = Some("jpn".into());
    jpn.byte_size = 500;

    ProbeResult {
        video: TrackDescriptor::new(TrackKind::Video, 0),
        audio: vec![eng, jpn],
        subtitle: vec![],
        duration_secs: 10,
    }
}

// ---------------------------------------------------------------------------
// Scripted encoder
// ---------------------------------------------------------------------------

/// Encoder that prints ffmpeg-style progress and writes its output file.
pub const ENCODER_OK: &str = r#"
out=""
for arg in "$@"; do out="$arg"; done
echo "ffmpeg version test" >&2
printf 'frame=  10 fps=0.0 q=-1.0 size=0kB time=00:00:05.00 bitrate=0.0kbits/s speed=1x\r' >&2
printf 'frame=  20 fps=0.0 q=-1.0 size=0kB time=00:00:10.00 bitrate=0.0kbits/s speed=1x\n' >&2
echo converted > "$out"
"#;

/// Encoder that fails after one line of output.
pub const ENCODER_FAIL: &str = r#"
echo "Invalid data found when processing input" >&2
exit 1
"#;

/// Encoder that runs until killed.
pub const ENCODER_HANG: &str = r#"
echo "started" >&2
exec sleep 30
"#;

/// Write `body` to `dir/name.sh` and return a producer that runs it through
/// `sh` with the last argument set to the output path.
pub fn scripted_producer(dir: &Path, name: &str, body: &str) -> CommandProducer {
    let script = dir.join(format!("{name}.sh"));
    std::fs::write(&script, body).unwrap();
    let template = format!("{} $INPUT $MAP_SUB $MAP_AUDIO $OUTPUT", script.display());
    CommandProducer::new(PathBuf::from("sh"), template, None).with_threads(1)
}

// ---------------------------------------------------------------------------
// Download engine
// ---------------------------------------------------------------------------

pub struct FakeFile {
    pub path: String,
    pub length: u64,
    pub completed: AtomicU64,
    pub priority: Mutex<Priority>,
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

pub struct FakeTransfer {
    pub name: String,
    pub files: Vec<Arc<FakeFile>>,
    pub closed: CancellationToken,
}

#[async_trait]
impl TransferHandle for FakeTransfer {
    fn name(&self) -> String {
        self.name.clone()
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

/// Every `add_from_file` yields a fresh transfer with the same file list.
pub struct FakeEngine {
    name: String,
    layout: Vec<(String, u64)>,
    transfers: Mutex<Vec<Arc<FakeTransfer>>>,
}

impl FakeEngine {
    pub fn new(name: &str, layout: &[(&str, u64)]) -> Self {
        Self {
            name: name.to_string(),
            layout: layout.iter().map(|(p, l)| (p.to_string(), *l)).collect(),
            transfers: Mutex::new(Vec::new()),
        }
    }

    pub fn latest(&self) -> Arc<FakeTransfer> {
        Arc::clone(self.transfers.lock().last().expect("no transfer added"))
    }

    /// Write every file of the layout under `downloads/<name>/` and mark
    /// the latest transfer complete.
    pub fn finish_download(&self, downloads: &Path) {
        let root = downloads.join(&self.name);
        for (path, length) in &self.layout {
            let target = root.join(path);
            std::fs::create_dir_all(target.parent().unwrap()).unwrap();
            std::fs::write(&target, vec![b'x'; *length as usize]).unwrap();
        }
        for file in &self.latest().files {
            file.completed.store(file.length, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl DownloadEngine for FakeEngine {
    async fn add_from_file(&self, _metainfo: &Path) -> Result<Arc<dyn TransferHandle>> {
        let transfer = Arc::new(FakeTransfer {
            name: self.name.clone(),
            files: self
                .layout
                .iter()
                .map(|(path, length)| {
                    Arc::new(FakeFile {
                        path: path.clone(),
                        length: *length,
                        completed: AtomicU64::new(0),
                        priority: Mutex::new(Priority::Normal),
                    })
                })
                .collect(),
            closed: CancellationToken::new(),
        });
        self.transfers.lock().push(Arc::clone(&transfer));
        Ok(transfer)
    }
}
