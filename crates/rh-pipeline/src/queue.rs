//! Bounded-concurrency job queue with per-job cancellation.
//!
//! A single coordinator task owns the job registry (id -> cancel token and
//! state). It receives `enqueue`/`cancel` messages from [`JobQueue`]
//! handles and start/finish acknowledgements from the workers, and forwards
//! accepted jobs into a bounded work channel shared by a fixed pool of
//! worker tasks. Workers relay every event of their job, tagged with its id,
//! onto one output stream.
//!
//! Per job the output is `Started`, zero or more `Line`/`Progress`, then
//! exactly one `Terminal`. A job cancelled before a worker picks it up emits
//! only `Terminal(Err(Cancelled))`.
//!
//! # Example
//!
//! ```rust,ignore
//! let (queue, mut events) = JobQueue::start(1)?;
//! queue.enqueue(JobId::new(1), command).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{} {:?}", event.job_id, event.payload);
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use rh_av::{Execution, ProcessCommand};
use rh_core::{
    CommandEvent, Error, ExitError, JobId, JobPayload, JobState, QueueEvent, Result, Transition,
};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the handle -> coordinator channel.
const INPUT_CAPACITY: usize = 64;
/// Capacity of the coordinator -> workers channel.
const WORK_CAPACITY: usize = 1024;
/// Capacity of the shared output stream.
const OUTPUT_CAPACITY: usize = 256;

/// Something the queue can run.
pub trait Job: Send + Sync + 'static {
    /// Start the work. The execution must end with one
    /// [`CommandEvent::Exit`] and stop when its token is cancelled.
    fn start(&self) -> Execution;
}

impl Job for ProcessCommand {
    fn start(&self) -> Execution {
        self.execute()
    }
}

enum Input {
    Enqueue { id: JobId, job: Box<dyn Job> },
    Cancel(JobId),
    Snapshot(oneshot::Sender<Vec<(JobId, JobState)>>),
}

enum Feedback {
    Started(JobId),
    Finished(JobId),
}

struct WorkItem {
    id: JobId,
    job: Box<dyn Job>,
    cancel: CancellationToken,
}

struct JobRecord {
    cancel: CancellationToken,
    state: JobState,
}

/// Handle to a running queue. Cheap to clone; the queue shuts down once
/// every handle is dropped and all accepted jobs are done.
#[derive(Debug, Clone)]
pub struct JobQueue {
    input: mpsc::Sender<Input>,
}

impl JobQueue {
    /// Spawn the coordinator and `workers` worker tasks.
    ///
    /// Returns the handle and the receiver of the shared event stream.
    pub fn start(workers: usize) -> Result<(Self, mpsc::Receiver<QueueEvent>)> {
        if workers == 0 {
            return Err(Error::QueueParallelismInvalid);
        }

        let (input_tx, input_rx) = mpsc::channel(INPUT_CAPACITY);
        let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
        let (work_tx, work_rx) = mpsc::channel(WORK_CAPACITY);
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CAPACITY);

        let work_rx = Arc::new(Mutex::new(work_rx));
        for worker in 0..workers {
            tokio::spawn(run_worker(
                worker,
                Arc::clone(&work_rx),
                feedback_tx.clone(),
                output_tx.clone(),
            ));
        }
        drop(feedback_tx);
        drop(output_tx);

        tokio::spawn(coordinate(input_rx, feedback_rx, work_tx));
        info!(workers, "Job queue started");

        Ok((Self { input: input_tx }, output_rx))
    }

    /// Submit a job under `id`. Ids already in the registry are rejected
    /// with a warning.
    pub async fn enqueue(&self, id: JobId, job: impl Job) -> Result<()> {
        self.send(Input::Enqueue {
            id,
            job: Box::new(job),
        })
        .await
    }

    /// Cancel `id`. Unknown ids and repeated calls are ignored.
    pub async fn cancel(&self, id: JobId) -> Result<()> {
        self.send(Input::Cancel(id)).await
    }

    /// Registry contents, for diagnostics.
    pub async fn jobs(&self) -> Result<Vec<(JobId, JobState)>> {
        let (tx, rx) = oneshot::channel();
        self.send(Input::Snapshot(tx)).await?;
        rx.await.map_err(|_| Error::QueueClosed)
    }

    async fn send(&self, msg: Input) -> Result<()> {
        self.input.send(msg).await.map_err(|_| Error::QueueClosed)
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

async fn coordinate(
    mut input: mpsc::Receiver<Input>,
    mut feedback: mpsc::UnboundedReceiver<Feedback>,
    work_tx: mpsc::Sender<WorkItem>,
) {
    let mut registry: HashMap<JobId, JobRecord> = HashMap::new();
    let mut work_tx = Some(work_tx);

    loop {
        tokio::select! {
            msg = input.recv(), if work_tx.is_some() => match msg {
                Some(Input::Enqueue { id, job }) => {
                    if registry.contains_key(&id) {
                        warn!(job_id = %id, "Job already queued; ignoring duplicate");
                        continue;
                    }
                    let Some(tx) = work_tx.as_ref() else { continue };
                    let cancel = CancellationToken::new();
                    registry.insert(
                        id,
                        JobRecord { cancel: cancel.clone(), state: JobState::Pending },
                    );
                    debug!(job_id = %id, "Job queued");
                    if tx.send(WorkItem { id, job, cancel }).await.is_err() {
                        warn!(job_id = %id, "No workers left; dropping job");
                        registry.remove(&id);
                    }
                }
                Some(Input::Cancel(id)) => match registry.get(&id) {
                    Some(record) => {
                        info!(job_id = %id, state = %record.state, "Cancelling job");
                        record.cancel.cancel();
                    }
                    None => debug!(job_id = %id, "Cancel for unknown job ignored"),
                },
                Some(Input::Snapshot(reply)) => {
                    let mut jobs: Vec<_> =
                        registry.iter().map(|(id, r)| (*id, r.state)).collect();
                    jobs.sort_by_key(|(id, _)| *id);
                    let _ = reply.send(jobs);
                }
                None => {
                    debug!("All queue handles dropped; draining workers");
                    work_tx = None;
                }
            },
            Some(fb) = feedback.recv() => match fb {
                Feedback::Started(id) => {
                    if let Some(record) = registry.get_mut(&id) {
                        match record.state.transition_to(JobState::Running) {
                            Ok(state) => record.state = state,
                            Err(e) => warn!(job_id = %id, error = %e, "Unexpected start"),
                        }
                    }
                }
                Feedback::Finished(id) => {
                    registry.remove(&id);
                    debug!(job_id = %id, "Job removed from registry");
                }
            },
            else => break,
        }
    }

    info!("Job queue stopped");
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

async fn run_worker(
    worker: usize,
    work: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    feedback: mpsc::UnboundedSender<Feedback>,
    output: mpsc::Sender<QueueEvent>,
) {
    debug!(worker, "Queue worker started");
    loop {
        let item = {
            let mut rx = work.lock().await;
            rx.recv().await
        };
        let Some(item) = item else { break };

        let id = item.id;
        run_job(item, &feedback, &output).await;
        let _ = feedback.send(Feedback::Finished(id));
    }
    debug!(worker, "Queue worker stopped");
}

async fn emit(output: &mpsc::Sender<QueueEvent>, id: JobId, payload: JobPayload) {
    // Nobody listening is not a reason to stop the job.
    let _ = output.send(QueueEvent::new(id, payload)).await;
}

async fn run_job(
    item: WorkItem,
    feedback: &mpsc::UnboundedSender<Feedback>,
    output: &mpsc::Sender<QueueEvent>,
) {
    let WorkItem { id, job, cancel } = item;

    if cancel.is_cancelled() {
        info!(job_id = %id, "Job cancelled before start");
        emit(output, id, JobPayload::Terminal(Err(ExitError::Cancelled))).await;
        return;
    }

    let _ = feedback.send(Feedback::Started(id));
    emit(output, id, JobPayload::Started).await;
    info!(job_id = %id, "Job started");

    let mut execution = job.start();
    let stop = execution.cancel_token();
    let mut cancelled = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled(), if !cancelled => {
                cancelled = true;
                stop.cancel();
            }
            event = execution.next() => match event {
                Some(CommandEvent::Exit(outcome)) => {
                    let outcome = match outcome {
                        Err(_) if cancelled => Err(ExitError::Cancelled),
                        other => other,
                    };
                    match &outcome {
                        Ok(()) => info!(job_id = %id, "Job finished"),
                        Err(ExitError::Cancelled) => info!(job_id = %id, "Job cancelled"),
                        Err(e) => warn!(job_id = %id, error = %e, "Job failed"),
                    }
                    emit(output, id, JobPayload::Terminal(outcome)).await;
                    return;
                }
                Some(event) => emit(output, id, event.into()).await,
                None => {
                    let outcome = if cancelled {
                        Err(ExitError::Cancelled)
                    } else {
                        Err(ExitError::Io("job ended without an exit event".into()))
                    };
                    emit(output, id, JobPayload::Terminal(outcome)).await;
                    return;
                }
            },
        }
    }
}
