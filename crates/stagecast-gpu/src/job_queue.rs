//! Timestamp-keyed kernel batching.
//!
//! Every kernel a stage wants to run for a frame is added under the key
//! `(source_id, timestamp)`. [`JobQueue::run_queue`] then takes the whole
//! batch for that key and hands it to a single run loop, which executes the
//! jobs in registration order, waits for the device, and only then invokes
//! each job's completion callback. A batch is never executed partially and
//! no job can join a batch once it has been taken.

use crate::device::ComputeDevice;
use crate::kernel::{Kernel, KernelArgs};
use parking_lot::Mutex;
use stagecast_core::{Result, StageError};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

/// Identity of a batch: one source's work for one frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobKey {
    pub source_id: String,
    pub timestamp: i64,
}

impl JobKey {
    pub fn new(source_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            source_id: source_id.into(),
            timestamp,
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.source_id, self.timestamp)
    }
}

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// One kernel invocation waiting in a batch.
pub struct Job {
    name: String,
    kernel: Arc<dyn Kernel>,
    args: KernelArgs,
    on_complete: Callback,
}

impl Job {
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct RunRequest {
    key: JobKey,
    jobs: Vec<Job>,
    reply: oneshot::Sender<Result<()>>,
}

struct QueueInner {
    device: Arc<dyn ComputeDevice>,
    pending: Mutex<HashMap<JobKey, Vec<Job>>>,
    requests: mpsc::UnboundedSender<RunRequest>,
    batches_run: AtomicU64,
    jobs_run: Arc<AtomicU64>,
}

/// Handle to the job queue. Clones share the same queue and run loop.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    /// Start the run loop on the current tokio runtime.
    pub fn spawn(device: Arc<dyn ComputeDevice>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let jobs_run = Arc::new(AtomicU64::new(0));
        tokio::spawn(run_loop(device.clone(), rx, jobs_run.clone()));
        Self {
            inner: Arc::new(QueueInner {
                device,
                pending: Mutex::new(HashMap::new()),
                requests: tx,
                batches_run: AtomicU64::new(0),
                jobs_run,
            }),
        }
    }

    pub fn device(&self) -> &Arc<dyn ComputeDevice> {
        &self.inner.device
    }

    /// Append a job to the batch for `key`, creating the batch if needed.
    pub fn add(
        &self,
        key: JobKey,
        name: impl Into<String>,
        kernel: Arc<dyn Kernel>,
        args: KernelArgs,
        on_complete: impl FnOnce() + Send + 'static,
    ) {
        let job = Job {
            name: name.into(),
            kernel,
            args,
            on_complete: Box::new(on_complete),
        };
        self.inner.pending.lock().entry(key).or_default().push(job);
    }

    /// Execute every job added under `key`.
    ///
    /// The batch is taken from the pending map before this returns, so jobs
    /// added for the same key afterwards form a new batch. The returned
    /// future resolves after the device has finished and all completion
    /// callbacks have run. Callbacks run even when a job fails.
    ///
    /// # Panics
    ///
    /// Panics if nothing was added under `key`. Running an unknown batch is a
    /// caller bug.
    pub fn run_queue(&self, key: &JobKey) -> impl Future<Output = Result<()>> + Send + 'static {
        let jobs = self.inner.pending.lock().remove(key);
        let Some(jobs) = jobs else {
            panic!("run_queue called for {key} before any job was added");
        };

        let (reply, done) = oneshot::channel();
        let request = RunRequest {
            key: key.clone(),
            jobs,
            reply,
        };
        let sent = match self.inner.requests.send(request) {
            Ok(()) => {
                self.inner.batches_run.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::SendError(request)) => {
                error!(key = %request.key, "job queue run loop has stopped");
                run_callbacks(request.jobs);
                Err(StageError::Gpu("job queue run loop has stopped".into()))
            }
        };

        async move {
            sent?;
            done.await
                .map_err(|_| StageError::Gpu("job batch dropped without completing".into()))?
        }
    }

    /// Drop every pending batch for `source_id`, running the dropped jobs'
    /// callbacks so the buffers they hold are released. Returns the number
    /// of jobs dropped.
    pub fn clear_queue(&self, source_id: &str) -> usize {
        let dropped: Vec<Job> = {
            let mut pending = self.inner.pending.lock();
            let keys: Vec<JobKey> = pending
                .keys()
                .filter(|k| k.source_id == source_id)
                .cloned()
                .collect();
            keys.iter()
                .filter_map(|k| pending.remove(k))
                .flatten()
                .collect()
        };
        let count = dropped.len();
        if count > 0 {
            debug!(source_id, jobs = count, "cleared pending jobs");
        }
        run_callbacks(dropped);
        count
    }

    /// Keys with jobs waiting, in order.
    pub fn pending_keys(&self) -> Vec<JobKey> {
        let mut keys: Vec<JobKey> = self.inner.pending.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn batches_run(&self) -> u64 {
        self.inner.batches_run.load(Ordering::Relaxed)
    }

    pub fn jobs_run(&self) -> u64 {
        self.inner.jobs_run.load(Ordering::Relaxed)
    }
}

fn run_callbacks(jobs: Vec<Job>) {
    for job in jobs {
        (job.on_complete)();
    }
}

async fn run_loop(
    device: Arc<dyn ComputeDevice>,
    mut requests: mpsc::UnboundedReceiver<RunRequest>,
    jobs_run: Arc<AtomicU64>,
) {
    while let Some(RunRequest { key, jobs, reply }) = requests.recv().await {
        let device = device.clone();
        let counter = jobs_run.clone();
        let task_key = key.clone();
        let outcome =
            tokio::task::spawn_blocking(move || execute_batch(&*device, &task_key, jobs, &counter))
                .await;
        let result = outcome.unwrap_or_else(|e| {
            error!(%key, error = %e, "job batch task failed");
            Err(StageError::Internal(format!("job batch {key} aborted: {e}")))
        });
        if reply.send(result).is_err() {
            warn!(%key, "job batch finished after its caller went away");
        }
    }
    debug!("job queue run loop stopped");
}

fn execute_batch(
    device: &dyn ComputeDevice,
    key: &JobKey,
    jobs: Vec<Job>,
    counter: &AtomicU64,
) -> Result<()> {
    let mut result = Ok(());
    for job in &jobs {
        if let Err(e) = device.run_kernel(job.kernel.as_ref(), &job.args) {
            error!(%key, job = %job.name, error = %e, "GPU job batch failed");
            result = Err(e);
            break;
        }
        counter.fetch_add(1, Ordering::Relaxed);
    }
    let finished = device.wait_finish();
    run_callbacks(jobs);
    result.and(finished)
}
