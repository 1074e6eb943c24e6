//! Bulk insertion engine.
//!
//! [`ParallelLoader`] streams synthetic records in bounded chunks, splits each
//! chunk into batches and hands the batches to a pool of at most
//! `worker_count` workers, each with its own connection. The next chunk is
//! only generated once every batch of the current one has been dispatched,
//! so peak memory is one chunk plus the batches in flight.
//!
//! [`load_sequential`] is the degraded path: same chunking, one batch at a
//! time on the caller's connection.
//!
//! Both paths look at the cancellation token between chunks, not only
//! between configurations, so a long load stops early. In-flight batches
//! still finish, and the configuration stays pending either way.

mod pool;
pub mod worker;

use crate::cancel::CancellationToken;
use crate::datagen::RecordGenerator;
use bench_core::backend::{Backend, BackendFactory};
use bench_core::types::Record;
use bench_core::{BenchError, BenchResult};
use pool::WorkerPool;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Hard upper bound on pooled workers, whatever the settings say.
pub const MAX_WORKERS: usize = 16;

pub const DEFAULT_WORKER_COUNT: usize = 4;
pub const DEFAULT_BATCH_SIZE: usize = 1_000;
/// Upper bound on records generated per chunk.
pub const DEFAULT_MEMORY_CAP: usize = 100_000;
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_WORKER_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderSettings {
    pub worker_count: usize,
    pub batch_size: usize,
    pub memory_cap: usize,
    /// Per-batch execution timeout.
    pub job_timeout: Duration,
    /// How long a new worker may take to connect.
    pub worker_startup_timeout: Duration,
    /// How often a blocked dispatcher re-checks for a free worker.
    pub poll_interval: Duration,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            batch_size: DEFAULT_BATCH_SIZE,
            memory_cap: DEFAULT_MEMORY_CAP,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            worker_startup_timeout: DEFAULT_WORKER_STARTUP_TIMEOUT,
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl LoaderSettings {
    pub fn validate(&self) -> BenchResult<()> {
        if self.worker_count == 0 {
            return Err(BenchError::InvalidSettings(
                "worker count must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(BenchError::InvalidSettings(
                "batch size must be at least 1".into(),
            ));
        }
        if self.memory_cap == 0 {
            return Err(BenchError::InvalidSettings(
                "memory cap must be at least 1 record".into(),
            ));
        }
        Ok(())
    }

    pub fn effective_workers(&self) -> usize {
        self.worker_count.clamp(1, MAX_WORKERS)
    }

    /// `min(memoryCap, batchSize · W · 2)` records.
    pub fn chunk_size(&self) -> usize {
        self.memory_cap
            .min(self.batch_size.saturating_mul(self.effective_workers() * 2))
    }
}

/// What a load did.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub records_inserted: u64,
    pub batches: u64,
    pub workers_spawned: usize,
    /// Highest number of batches that were in flight at once.
    pub max_in_flight: usize,
    pub duration: Duration,
    pub sequential: bool,
}

impl LoadReport {
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }
}

/// Consume `chunk` in order, `batch_size` records at a time.
fn into_batches(chunk: Vec<Record>, batch_size: usize) -> impl Iterator<Item = Vec<Record>> {
    let mut records = chunk.into_iter();
    std::iter::from_fn(move || {
        let batch: Vec<Record> = records.by_ref().take(batch_size).collect();
        (!batch.is_empty()).then_some(batch)
    })
}

pub struct ParallelLoader {
    factory: Arc<dyn BackendFactory>,
    settings: LoaderSettings,
    cancel: CancellationToken,
}

impl ParallelLoader {
    pub fn new(
        factory: Arc<dyn BackendFactory>,
        settings: LoaderSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            factory,
            settings,
            cancel,
        }
    }

    /// Insert `row_count` synthetic records.
    ///
    /// Fails fast: the first worker-creation failure, batch failure or batch
    /// timeout aborts the load. Batches already running get until their own
    /// job timeout to finish; workers still stuck after that are detached.
    pub fn load(&self, row_count: u64) -> BenchResult<LoadReport> {
        self.settings.validate()?;
        let started = Instant::now();
        let mut pool = WorkerPool::new(Arc::clone(&self.factory), self.settings);
        let mut generator = RecordGenerator::new(row_count);

        let outcome = self.run(&mut pool, &mut generator);
        if outcome.is_err() {
            pool.abort();
        }
        pool.shutdown();
        outcome?;

        if pool.records_inserted != row_count {
            return Err(BenchError::FatalConfiguration(format!(
                "inserted {} records, expected {row_count}",
                pool.records_inserted
            )));
        }

        let report = LoadReport {
            records_inserted: pool.records_inserted,
            batches: pool.batches_completed,
            workers_spawned: pool.workers_spawned(),
            max_in_flight: pool.max_in_flight,
            duration: started.elapsed(),
            sequential: false,
        };
        log::info!(
            "{}: loaded {} records in {} batches using {} workers ({:.2?})",
            self.factory.id(),
            report.records_inserted,
            report.batches,
            report.workers_spawned,
            report.duration
        );
        Ok(report)
    }

    fn run(&self, pool: &mut WorkerPool, generator: &mut RecordGenerator) -> BenchResult<()> {
        let chunk_size = self.settings.chunk_size();
        while !generator.is_exhausted() {
            if self.cancel.is_cancelled() {
                pool.drain()?;
                return Err(BenchError::Interrupted);
            }

            let chunk = generator.next_chunk(chunk_size);
            for batch in into_batches(chunk, self.settings.batch_size) {
                let worker = pool.acquire()?;
                pool.dispatch(worker, batch)?;
            }
        }
        pool.drain()
    }
}

/// Insert `row_count` records one batch at a time on `backend`.
pub fn load_sequential(
    backend: &mut dyn Backend,
    row_count: u64,
    settings: &LoaderSettings,
    cancel: &CancellationToken,
) -> BenchResult<LoadReport> {
    settings.validate()?;
    let started = Instant::now();
    let mut generator = RecordGenerator::new(row_count);
    let mut inserted = 0u64;
    let mut batches = 0u64;

    while !generator.is_exhausted() {
        cancel.check()?;
        let chunk = generator.next_chunk(settings.chunk_size());
        for batch in into_batches(chunk, settings.batch_size) {
            backend.insert_batch(&batch).map_err(|e| {
                BenchError::FatalConfiguration(format!("sequential batch {} failed: {e}", batches + 1))
            })?;
            inserted += batch.len() as u64;
            batches += 1;
        }
    }

    log::info!(
        "{}: loaded {inserted} records sequentially in {batches} batches ({:.2?})",
        backend.id(),
        started.elapsed()
    );
    Ok(LoadReport {
        records_inserted: inserted,
        batches,
        workers_spawned: 0,
        max_in_flight: usize::from(batches > 0),
        duration: started.elapsed(),
        sequential: true,
    })
}
