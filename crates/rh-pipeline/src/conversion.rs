//! Conversion service.
//!
//! Ties the pieces together: probe the input, select tracks, record the
//! job, bind the command and hand it to the [`JobQueue`]. A background task
//! consumes the queue's event stream, mirrors each event into the
//! [`JobStore`] and re-broadcasts it to subscribers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rh_core::{ConversionStatus, ExitError, JobId, JobPayload, QueueEvent, Result};
use rh_probe::Prober;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::producer::CommandProducer;
use crate::queue::JobQueue;
use crate::select::{select, Preferences};
use crate::store::JobStore;

/// Capacity of the subscriber broadcast channel.
const BROADCAST_CAPACITY: usize = 256;

/// File names inside each job folder.
const VIDEO_FILE: &str = "video.mp4";
const LOG_FILE: &str = "log.txt";

/// A request to convert one file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub input: PathBuf,
    #[serde(default)]
    pub preferences: Preferences,
    /// Explicit output path. Defaults to `<output_dir>/<job id>/video.mp4`.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

/// Front door for conversions.
pub struct ConversionService {
    queue: JobQueue,
    store: Arc<dyn JobStore>,
    prober: Arc<dyn Prober>,
    producer: CommandProducer,
    output_dir: PathBuf,
    events: broadcast::Sender<QueueEvent>,
}

impl ConversionService {
    /// Recover from a previous run, start the queue and its event consumer.
    pub async fn start(
        workers: usize,
        store: Arc<dyn JobStore>,
        prober: Arc<dyn Prober>,
        producer: CommandProducer,
        output_dir: PathBuf,
    ) -> Result<Self> {
        let reset = store.reset_in_flight().await?;
        if reset > 0 {
            warn!(count = reset, "Marked conversions interrupted by restart as failed");
        }

        let (queue, queue_events) = JobQueue::start(workers)?;
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        tokio::spawn(persist_events(
            Arc::clone(&store),
            queue_events,
            events.clone(),
        ));

        Ok(Self {
            queue,
            store,
            prober,
            producer,
            output_dir,
            events,
        })
    }

    /// Receive every queue event after it has been persisted.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Probe, plan, record and enqueue a conversion.
    ///
    /// Probe and selection failures surface here and nothing is recorded.
    /// Once the record exists, later failures mark it `Error`.
    pub async fn submit(&self, request: ConversionRequest) -> Result<JobId> {
        let probe = self.prober.probe(&request.input).await?;
        let selections = select(&probe, &request.preferences);
        self.producer.validate(&selections)?;

        let id = self.store.create_job(&request.input).await?;
        info!(job_id = %id, input = %request.input.display(), "Conversion created");

        match self.prepare_and_enqueue(id, &request, &probe, &selections).await {
            Ok(()) => Ok(id),
            Err(e) => {
                if let Err(store_err) = self
                    .store
                    .update_status(id, ConversionStatus::Error, Some(e.to_string()))
                    .await
                {
                    warn!(job_id = %id, error = %store_err, "Failed to record conversion error");
                }
                Err(e)
            }
        }
    }

    async fn prepare_and_enqueue(
        &self,
        id: JobId,
        request: &ConversionRequest,
        probe: &rh_probe::ProbeResult,
        selections: &crate::select::Selections,
    ) -> Result<()> {
        let folder = self.output_dir.join(id.to_string());
        tokio::fs::create_dir_all(&folder).await?;
        let output = request
            .output
            .clone()
            .unwrap_or_else(|| folder.join(VIDEO_FILE));

        let mut command = self
            .producer
            .build(&request.input, &output, probe, selections)?;
        command.log_path(folder.join(LOG_FILE));

        if let Err(e) = self
            .store
            .set_command(id, &command.to_string(), &output)
            .await
        {
            warn!(job_id = %id, error = %e, "Failed to persist command line");
        }

        self.queue.enqueue(id, command).await
    }

    /// Cancel a queued or running conversion.
    pub async fn cancel(&self, id: JobId) -> Result<()> {
        info!(job_id = %id, "Conversion cancel requested");
        self.queue.cancel(id).await
    }

    /// Folder holding the output and transcript of `id`.
    pub fn job_folder(&self, id: JobId) -> PathBuf {
        self.output_dir.join(id.to_string())
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

async fn record(store: &dyn JobStore, event: &QueueEvent) -> Result<()> {
    let id = event.job_id;
    match &event.payload {
        JobPayload::Started => {
            store
                .update_status(id, ConversionStatus::Processing, None)
                .await
        }
        JobPayload::Line(line) => {
            debug!(job_id = %id, line = %line, "ffmpeg");
            Ok(())
        }
        JobPayload::Progress(sample) => store.update_progress(id, *sample).await,
        JobPayload::Terminal(Ok(())) => {
            info!(job_id = %id, "Conversion finished");
            store
                .update_status(id, ConversionStatus::Finished, None)
                .await
        }
        JobPayload::Terminal(Err(ExitError::Cancelled)) => {
            info!(job_id = %id, "Conversion cancelled");
            store
                .update_status(id, ConversionStatus::Cancelled, None)
                .await
        }
        JobPayload::Terminal(Err(e)) => {
            error!(job_id = %id, error = %e, "Conversion failed");
            store
                .update_status(id, ConversionStatus::Error, Some(e.to_string()))
                .await
        }
    }
}

/// Mirror queue events into the store. Store failures are logged and the
/// loop carries on.
async fn persist_events(
    store: Arc<dyn JobStore>,
    mut queue_events: mpsc::Receiver<QueueEvent>,
    subscribers: broadcast::Sender<QueueEvent>,
) {
    while let Some(event) = queue_events.recv().await {
        if let Err(e) = record(store.as_ref(), &event).await {
            warn!(job_id = %event.job_id, error = %e, "Failed to persist conversion event");
        }
        let _ = subscribers.send(event);
    }
    debug!("Conversion event loop stopped");
}
