//! Background writer persisting a process transcript line by line.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Handle to the transcript task. Lines are discarded when no path is set.
#[derive(Debug)]
pub struct TranscriptWriter {
    tx: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl TranscriptWriter {
    pub fn spawn(path: Option<PathBuf>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(write_lines(path, rx));
        Self { tx, task }
    }

    pub fn write(&self, line: &str) {
        let _ = self.tx.send(line.to_string());
    }

    /// Close the channel and wait until every queued line is on disk.
    pub async fn finish(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Transcript task failed");
        }
    }
}

async fn open(path: &Path) -> std::io::Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(BufWriter::new(File::create(path).await?))
}

async fn write_lines(path: Option<PathBuf>, mut rx: mpsc::UnboundedReceiver<String>) {
    let mut out = match path {
        Some(ref p) => match open(p).await {
            Ok(w) => Some(w),
            Err(e) => {
                tracing::warn!(path = %p.display(), error = %e, "Cannot open transcript");
                None
            }
        },
        None => None,
    };

    while let Some(line) = rx.recv().await {
        let Some(writer) = out.as_mut() else {
            continue;
        };
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::warn!(error = %e, "Transcript write failed; discarding the rest");
            out = None;
        }
    }
}
