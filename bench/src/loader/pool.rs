//! Bounded worker pool for batch inserts.

use super::worker::{self, InsertJob, InsertOutcome, InsertResult, WorkerHandle};
use super::LoaderSettings;
use bench_core::backend::BackendFactory;
use bench_core::types::Record;
use bench_core::{BenchError, BenchResult};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

/// At most `settings.worker_count` workers, created lazily and reused for
/// every batch. Never more than one job per worker, so never more than
/// `worker_count` jobs in flight.
pub(crate) struct WorkerPool {
    factory: Arc<dyn BackendFactory>,
    settings: LoaderSettings,
    workers: Vec<WorkerHandle>,
    results_tx: Sender<InsertResult>,
    results_rx: Receiver<InsertResult>,
    next_job_id: u64,
    in_flight: usize,
    pub max_in_flight: usize,
    pub records_inserted: u64,
    pub batches_completed: u64,
}

impl WorkerPool {
    pub fn new(factory: Arc<dyn BackendFactory>, settings: LoaderSettings) -> Self {
        let (results_tx, results_rx) = mpsc::channel();
        Self {
            factory,
            settings,
            workers: Vec::new(),
            results_tx,
            results_rx,
            next_job_id: 1,
            in_flight: 0,
            max_in_flight: 0,
            records_inserted: 0,
            batches_completed: 0,
        }
    }

    pub fn workers_spawned(&self) -> usize {
        self.workers.len()
    }

    /// Reuse an idle worker, else create one if under the cap, else wait
    /// for a running job to finish.
    pub fn acquire(&mut self) -> BenchResult<usize> {
        loop {
            if let Some(idx) = self.workers.iter().position(WorkerHandle::is_idle) {
                return Ok(idx);
            }
            if self.workers.len() < self.settings.effective_workers() {
                return self.spawn_worker();
            }
            self.poll(self.settings.poll_interval)?;
        }
    }

    fn spawn_worker(&mut self) -> BenchResult<usize> {
        let index = self.workers.len();
        let (handle, ready) = worker::spawn(
            index,
            Arc::clone(&self.factory),
            self.results_tx.clone(),
        )
        .map_err(|e| {
            BenchError::ResourceExhaustion(format!("failed to spawn loader worker {index}: {e}"))
        })?;

        match ready.recv_timeout(self.settings.worker_startup_timeout) {
            Ok(Ok(())) => {
                log::debug!("Loader worker {index} started");
                self.workers.push(handle);
                Ok(index)
            }
            Ok(Err(e)) => {
                handle.join();
                Err(BenchError::ResourceExhaustion(format!(
                    "loader worker {index} failed to connect: {e}"
                )))
            }
            Err(RecvTimeoutError::Timeout) => {
                handle.detach();
                Err(BenchError::ResourceExhaustion(format!(
                    "loader worker {index} did not start within {:?}",
                    self.settings.worker_startup_timeout
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                handle.join();
                Err(BenchError::ResourceExhaustion(format!(
                    "loader worker {index} exited during startup"
                )))
            }
        }
    }

    /// Send a batch to worker `idx`, which must be idle.
    pub fn dispatch(&mut self, idx: usize, records: Vec<Record>) -> BenchResult<()> {
        let job = InsertJob {
            job_id: self.next_job_id,
            backend_id: self.factory.id().to_string(),
            records,
        };
        self.next_job_id += 1;

        self.workers[idx]
            .send(job)
            .map_err(BenchError::FatalConfiguration)?;
        self.in_flight += 1;
        self.max_in_flight = self.max_in_flight.max(self.in_flight);
        Ok(())
    }

    /// Wait up to `wait` for one result, then enforce job timeouts.
    fn poll(&mut self, wait: Duration) -> BenchResult<()> {
        match self.results_rx.recv_timeout(wait) {
            Ok(result) => self.complete(result)?,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                // We hold a sender ourselves, so this cannot happen while
                // the pool is alive.
                return Err(BenchError::FatalConfiguration(
                    "loader result channel closed".into(),
                ));
            }
        }
        self.check_timeouts()
    }

    fn complete(&mut self, result: InsertResult) -> BenchResult<()> {
        let worker = &mut self.workers[result.worker];
        match worker.busy {
            Some((job_id, _)) if job_id == result.job_id => {
                worker.busy = None;
                self.in_flight -= 1;
            }
            _ => {
                // Late answer for a job we already failed on timeout.
                log::debug!(
                    "Ignoring late result for job {} from worker {}",
                    result.job_id,
                    result.worker
                );
                return Ok(());
            }
        }

        match result.outcome {
            InsertOutcome::Succeeded => {
                self.records_inserted += result.record_count as u64;
                self.batches_completed += 1;
                log::debug!(
                    "Batch {} ({} records) done on worker {} in {:.2}ms",
                    result.job_id,
                    result.record_count,
                    result.worker,
                    result.duration_ms
                );
                Ok(())
            }
            InsertOutcome::Failed(e) => Err(BenchError::FatalConfiguration(format!(
                "batch {} failed on worker {}: {e}",
                result.job_id, result.worker
            ))),
        }
    }

    fn check_timeouts(&mut self) -> BenchResult<()> {
        let limit = self.settings.job_timeout;
        for worker in &mut self.workers {
            let Some((job_id, started)) = worker.busy else {
                continue;
            };
            if started.elapsed() > limit {
                // Release the slot; the worker thread itself is abandoned.
                worker.busy = None;
                worker.timed_out = true;
                self.in_flight -= 1;
                return Err(BenchError::FatalConfiguration(format!(
                    "batch {job_id} on worker {} timed out after {limit:?}",
                    worker.index
                )));
            }
        }
        Ok(())
    }

    /// Block until every dispatched job has answered.
    pub fn drain(&mut self) -> BenchResult<()> {
        while self.in_flight > 0 {
            self.poll(self.settings.poll_interval)?;
        }
        Ok(())
    }

    /// Wait for in-flight jobs after the load has already failed. Further
    /// batch errors are only logged; job timeouts still apply, so a stuck
    /// worker is marked and later detached instead of joined.
    pub fn abort(&mut self) {
        while self.in_flight > 0 {
            if let Err(e) = self.poll(self.settings.poll_interval) {
                log::warn!("While aborting load: {e}");
            }
        }
    }

    /// Stop every worker. Idle workers are joined, timed-out ones detached.
    pub fn shutdown(&mut self) {
        for worker in &mut self.workers {
            worker.shutdown();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
