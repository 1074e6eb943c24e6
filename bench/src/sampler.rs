//! Timeout-bounded query sampling.
//!
//! Runs full passes over an ordered query set, strictly one query at a time,
//! until either the requested number of passes is reached or the time limit
//! expires. A pass that is already running when the deadline hits is allowed
//! to finish, but it only counts if it finished in time.
//!
//! Cancellation is observed before every pass, not only between
//! configurations. A cancelled configuration is never recorded, so stopping
//! here leaves the same checkpoint as stopping before it started.

use crate::cancel::CancellationToken;
use bench_core::backend::Backend;
use bench_core::types::{QueryDescriptor, QueryResult};
use bench_core::{BenchError, BenchResult};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingSettings {
    pub iterations: u32,
    pub time_limit: Duration,
}

impl SamplingSettings {
    /// Rejects `iterations <= 0` and a zero time limit.
    pub fn new(iterations: i64, time_limit: Duration) -> BenchResult<Self> {
        if iterations <= 0 {
            return Err(BenchError::InvalidSettings(format!(
                "iterations must be positive, got {iterations}"
            )));
        }
        let iterations = u32::try_from(iterations).map_err(|_| {
            BenchError::InvalidSettings(format!("iterations out of range: {iterations}"))
        })?;
        if time_limit.is_zero() {
            return Err(BenchError::InvalidSettings(
                "time limit must be greater than zero".into(),
            ));
        }
        Ok(Self {
            iterations,
            time_limit,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SamplingOutcome {
    /// One entry per counted pass, each holding one result per query.
    pub all_passes: Vec<Vec<QueryResult>>,
    pub completed_iterations: u32,
    pub timed_out: bool,
}

fn run_pass(backend: &mut dyn Backend, queries: &[QueryDescriptor]) -> BenchResult<Vec<QueryResult>> {
    let mut pass = Vec::with_capacity(queries.len());
    for query in queries {
        let t = Instant::now();
        let rows = backend.query(&query.text).map_err(|e| {
            BenchError::FatalConfiguration(format!("query '{}' failed: {e}", query.name))
        })?;
        pass.push(QueryResult {
            name: query.name.clone(),
            duration_ms: t.elapsed().as_secs_f64() * 1000.0,
            row_count: rows.len(),
        });
    }
    Ok(pass)
}

/// Sample `queries` against an already connected `backend`.
pub fn sample(
    backend: &mut dyn Backend,
    queries: &[QueryDescriptor],
    settings: &SamplingSettings,
    cancel: &CancellationToken,
) -> BenchResult<SamplingOutcome> {
    if queries.is_empty() {
        return Err(BenchError::InvalidSettings(format!(
            "{} has no benchmark queries",
            backend.id()
        )));
    }

    let started = Instant::now();
    let mut outcome = SamplingOutcome::default();

    while outcome.completed_iterations < settings.iterations {
        cancel.check()?;
        if started.elapsed() >= settings.time_limit {
            outcome.timed_out = true;
            break;
        }

        let pass = run_pass(backend, queries)?;
        if started.elapsed() > settings.time_limit {
            log::debug!(
                "{}: pass {} finished after the {:?} limit, discarding",
                backend.id(),
                outcome.completed_iterations + 1,
                settings.time_limit
            );
            outcome.timed_out = true;
            break;
        }

        outcome.all_passes.push(pass);
        outcome.completed_iterations += 1;
        log::debug!(
            "{}: pass {}/{} done ({:.2?} elapsed)",
            backend.id(),
            outcome.completed_iterations,
            settings.iterations,
            started.elapsed()
        );
    }

    if outcome.timed_out {
        log::warn!(
            "{}: time limit of {:?} reached after {} of {} iterations",
            backend.id(),
            settings.time_limit,
            outcome.completed_iterations,
            settings.iterations
        );
    }
    Ok(outcome)
}
