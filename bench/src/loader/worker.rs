//! Pooled insert worker.
//!
//! Each worker is a named OS thread that owns a private backend connection.
//! The pool talks to it over a bounded per-worker request channel; results
//! come back over one channel shared by every worker and carry the job id
//! they answer.

use bench_core::backend::{Backend, BackendFactory};
use bench_core::types::Record;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// A batch handed to a worker.
#[derive(Debug)]
pub struct InsertJob {
    pub job_id: u64,
    pub backend_id: String,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Succeeded,
    Failed(String),
}

/// A worker's answer to one [`InsertJob`].
#[derive(Debug, Clone, PartialEq)]
pub struct InsertResult {
    pub job_id: u64,
    /// Index of the worker that ran the job.
    pub worker: usize,
    pub record_count: usize,
    pub duration_ms: f64,
    pub outcome: InsertOutcome,
}

impl InsertResult {
    pub fn success(&self) -> bool {
        matches!(self.outcome, InsertOutcome::Succeeded)
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            InsertOutcome::Succeeded => None,
            InsertOutcome::Failed(e) => Some(e),
        }
    }
}

pub(crate) enum WorkerRequest {
    Insert(InsertJob),
    /// Disconnect and exit once the current job (if any) is done.
    Shutdown,
}

/// Pool-side handle for one worker thread.
pub(crate) struct WorkerHandle {
    pub index: usize,
    requests: SyncSender<WorkerRequest>,
    handle: Option<JoinHandle<()>>,
    /// Job currently running on this worker and when it was handed over.
    pub busy: Option<(u64, Instant)>,
    /// Set once a job on this worker exceeded its timeout; the thread may
    /// still be stuck inside the backend call.
    pub timed_out: bool,
}

impl WorkerHandle {
    pub fn is_idle(&self) -> bool {
        self.busy.is_none() && !self.timed_out
    }

    /// Hand a job to the worker. Only valid while the worker is idle, so the
    /// single-slot channel never blocks.
    pub fn send(&mut self, job: InsertJob) -> Result<(), String> {
        let job_id = job.job_id;
        self.requests
            .send(WorkerRequest::Insert(job))
            .map_err(|_| format!("worker {} has exited", self.index))?;
        self.busy = Some((job_id, Instant::now()));
        Ok(())
    }

    /// Ask the thread to stop and wait for it. A worker stuck in a timed-out
    /// job is detached instead, since joining it could block indefinitely.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if self.timed_out {
            log::warn!(
                "Detaching loader worker {} (job still running after timeout)",
                self.index
            );
            return;
        }
        let _ = self.requests.send(WorkerRequest::Shutdown);
        if let Err(e) = handle.join() {
            log::error!("Loader worker {} panicked: {e:?}", self.index);
        }
    }

    /// Detach without joining; used when a worker never finished starting.
    pub fn detach(mut self) {
        self.handle.take();
    }

    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawn worker `index`.
///
/// The returned receiver yields exactly one message once the worker's
/// connection is up (`Ok`) or failed to open (`Err`).
pub(crate) fn spawn(
    index: usize,
    factory: Arc<dyn BackendFactory>,
    results: Sender<InsertResult>,
) -> std::io::Result<(WorkerHandle, Receiver<Result<(), String>>)> {
    let (request_tx, request_rx) = mpsc::sync_channel::<WorkerRequest>(1);
    let (ready_tx, ready_rx) = mpsc::channel();

    let handle = thread::Builder::new()
        .name(format!("loader-worker-{index}"))
        .spawn(move || {
            worker_main(index, factory.create(), request_rx, results, ready_tx);
        })?;

    Ok((
        WorkerHandle {
            index,
            requests: request_tx,
            handle: Some(handle),
            busy: None,
            timed_out: false,
        },
        ready_rx,
    ))
}

fn worker_main(
    index: usize,
    mut backend: Box<dyn Backend>,
    requests: Receiver<WorkerRequest>,
    results: Sender<InsertResult>,
    ready: Sender<Result<(), String>>,
) {
    if let Err(e) = backend.connect() {
        let _ = ready.send(Err(e.to_string()));
        return;
    }
    let _ = ready.send(Ok(()));
    log::debug!("Loader worker {index} connected to {}", backend.id());

    while let Ok(request) = requests.recv() {
        let job = match request {
            WorkerRequest::Insert(job) => job,
            WorkerRequest::Shutdown => break,
        };

        let t = Instant::now();
        let outcome = match backend.insert_batch(&job.records) {
            Ok(()) => InsertOutcome::Succeeded,
            Err(e) => InsertOutcome::Failed(e.to_string()),
        };
        let result = InsertResult {
            job_id: job.job_id,
            worker: index,
            record_count: job.records.len(),
            duration_ms: t.elapsed().as_secs_f64() * 1000.0,
            outcome,
        };
        if results.send(result).is_err() {
            // Pool is gone; nobody is waiting for more work from us.
            break;
        }
    }

    if let Err(e) = backend.disconnect() {
        log::warn!("Loader worker {index}: disconnect failed: {e}");
    }
}
