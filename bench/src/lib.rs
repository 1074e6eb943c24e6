//! Resumable Query Benchmark
//!
//! Loads synthetic rows into one or more database backends and times a fixed,
//! ordered query set against every (backend, index variant, row count)
//! configuration. Progress is checkpointed after each configuration so a run
//! that takes hours can be interrupted with Ctrl-C and picked up later.
//!
//! - `planner`: settings to ordered configuration list
//! - `checkpoint`: durable run state
//! - `loader`: bounded worker-pool bulk inserts
//! - `sampler` / `statistics`: timing loop and reducer
//! - `orchestrator`: the resumable state machine tying it all together
//!
//! Run benchmarks: `cargo bench`
//! Run tests: `cargo test`

pub mod backends;
pub mod cancel;
pub mod checkpoint;
pub mod datagen;
pub mod loader;
pub mod orchestrator;
pub mod planner;
pub mod report;
pub mod retry;
pub mod sampler;
pub mod settings;
pub mod statistics;

#[cfg(test)]
mod testing;
