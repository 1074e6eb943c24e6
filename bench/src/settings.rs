//! Command line and environment configuration.
//!
//! Every flag can also be set through a `QBENCH_*` environment variable; a
//! `.env` file in the working directory is read before parsing. [`Cli`] is
//! the raw form, [`RunSettings`] the validated one the engine consumes.

use crate::checkpoint::{QueryOnlySettings, DEFAULT_CHECKPOINT_PATH};
use crate::loader::{self, LoaderSettings, MAX_WORKERS};
use crate::planner::PlanSettings;
use crate::retry::RetryPolicy;
use crate::sampler::SamplingSettings;
use bench_core::types::TestType;
use bench_core::{BenchError, BenchResult};
use clap::{Parser, ValueEnum};
use log::LevelFilter;
use std::path::PathBuf;
use std::time::Duration;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestTypeArg {
    /// Recreate tables, load synthetic rows, then sample.
    Load,
    /// Sample against tables that are already populated.
    QueryOnly,
}

impl From<TestTypeArg> for TestType {
    fn from(arg: TestTypeArg) -> Self {
        match arg {
            TestTypeArg::Load => TestType::Load,
            TestTypeArg::QueryOnly => TestType::QueryOnly,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "query-bench",
    about = "Resumable query benchmark: loads synthetic rows into each backend and times a fixed query set"
)]
pub struct Cli {
    /// Backends to benchmark (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "sqlite", env = "QBENCH_BACKENDS")]
    pub backends: Vec<String>,

    /// Dataset sizes in rows (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "10000,100000", env = "QBENCH_ROWS")]
    pub rows: Vec<u64>,

    /// Index variants to test (comma-separated booleans).
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "false,true",
        env = "QBENCH_INDEX_VARIANTS"
    )]
    pub index_variants: Vec<bool>,

    /// Backends that also get a sharded variant (comma-separated).
    #[arg(long, value_delimiter = ',', env = "QBENCH_SHARDED_BACKENDS")]
    pub sharded_backends: Vec<String>,

    #[arg(long, value_enum, default_value = "load", env = "QBENCH_TEST_TYPE")]
    pub test_type: TestTypeArg,

    /// Passes over the query set per configuration.
    #[arg(long, default_value = "10", allow_negative_numbers = true, env = "QBENCH_ITERATIONS")]
    pub iterations: i64,

    /// Sampling time limit per configuration.
    #[arg(long, default_value = "5", env = "QBENCH_TIME_LIMIT_MINUTES")]
    pub time_limit_minutes: u32,

    /// Loader workers (capped at 16).
    #[arg(long, default_value_t = loader::DEFAULT_WORKER_COUNT, env = "QBENCH_WORKERS")]
    pub workers: usize,

    #[arg(long, default_value_t = loader::DEFAULT_BATCH_SIZE, env = "QBENCH_BATCH_SIZE")]
    pub batch_size: usize,

    /// Maximum records generated per chunk.
    #[arg(long, default_value_t = loader::DEFAULT_MEMORY_CAP, env = "QBENCH_MEMORY_CAP")]
    pub memory_cap: usize,

    #[arg(long, default_value = "300", env = "QBENCH_JOB_TIMEOUT_SECS")]
    pub job_timeout_secs: u64,

    #[arg(long, default_value = "30", env = "QBENCH_WORKER_STARTUP_TIMEOUT_SECS")]
    pub worker_startup_timeout_secs: u64,

    #[arg(long, default_value = DEFAULT_CHECKPOINT_PATH, env = "QBENCH_CHECKPOINT")]
    pub checkpoint: PathBuf,

    #[arg(long, default_value = "results", env = "QBENCH_RESULTS_DIR")]
    pub results_dir: PathBuf,

    /// SQLite database file.
    #[arg(long, default_value = "query-bench.db", env = "QBENCH_SQLITE_PATH")]
    pub sqlite_path: PathBuf,

    /// Discard any existing checkpoint before starting.
    #[arg(long, env = "QBENCH_FRESH")]
    pub fresh: bool,

    /// off, error, warn, info, debug or trace.
    #[arg(long, default_value = "info", env = "QBENCH_LOG_LEVEL")]
    pub log_level: String,

    /// Log file path; an empty value disables file logging.
    #[arg(long, default_value = "query-bench.log", env = "QBENCH_LOG_FILE")]
    pub log_file: Option<String>,
}

impl Cli {
    /// Read `.env` (if any), then parse the process arguments.
    pub fn load() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => eprintln!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => eprintln!("Ignoring unreadable .env file: {e}"),
        }
        Self::parse()
    }

    /// Console log level, falling back to `info` on an unknown name.
    pub fn log_level(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or_else(|_| {
            eprintln!("Unknown log level '{}', using info", self.log_level);
            LevelFilter::Info
        })
    }

    pub fn log_file(&self) -> Option<&str> {
        self.log_file
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
    }
}

/// Validated run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub plan: PlanSettings,
    pub test_type: TestType,
    pub iterations: u32,
    pub time_limit_minutes: u32,
    pub loader: LoaderSettings,
    pub retry: RetryPolicy,
    pub checkpoint_path: PathBuf,
    pub results_dir: PathBuf,
    pub sqlite_path: PathBuf,
    pub fresh: bool,
}

impl RunSettings {
    pub fn from_cli(cli: &Cli) -> BenchResult<Self> {
        let sampling = SamplingSettings::new(
            cli.iterations,
            Duration::from_secs(u64::from(cli.time_limit_minutes) * 60),
        )?;

        let mut workers = cli.workers;
        if workers > MAX_WORKERS {
            log::warn!("{workers} loader workers requested, capping at {MAX_WORKERS}");
            workers = MAX_WORKERS;
        }
        if cli.job_timeout_secs == 0 || cli.worker_startup_timeout_secs == 0 {
            return Err(BenchError::InvalidSettings(
                "timeouts must be greater than zero".into(),
            ));
        }

        let loader = LoaderSettings {
            worker_count: workers,
            batch_size: cli.batch_size,
            memory_cap: cli.memory_cap,
            job_timeout: Duration::from_secs(cli.job_timeout_secs),
            worker_startup_timeout: Duration::from_secs(cli.worker_startup_timeout_secs),
            ..LoaderSettings::default()
        };
        loader.validate()?;

        Ok(Self {
            plan: PlanSettings {
                row_counts: cli.rows.clone(),
                backends: cli.backends.iter().map(|b| b.trim().to_lowercase()).collect(),
                index_variants: cli.index_variants.clone(),
                sharded_backends: cli
                    .sharded_backends
                    .iter()
                    .map(|b| b.trim().to_lowercase())
                    .filter(|b| !b.is_empty())
                    .collect(),
            },
            test_type: cli.test_type.into(),
            iterations: sampling.iterations,
            time_limit_minutes: cli.time_limit_minutes,
            loader,
            retry: RetryPolicy::default(),
            checkpoint_path: cli.checkpoint.clone(),
            results_dir: cli.results_dir.clone(),
            sqlite_path: cli.sqlite_path.clone(),
            fresh: cli.fresh,
        })
    }

    pub fn sampling(&self) -> BenchResult<SamplingSettings> {
        SamplingSettings::new(
            i64::from(self.iterations),
            Duration::from_secs(u64::from(self.time_limit_minutes) * 60),
        )
    }

    /// Sampling settings recorded in the checkpoint. Only query-only runs
    /// carry them; load runs are matched on test type alone.
    pub fn query_only_settings(&self) -> Option<QueryOnlySettings> {
        match self.test_type {
            TestType::QueryOnly => Some(QueryOnlySettings {
                iterations: self.iterations,
                time_limit_minutes: self.time_limit_minutes,
            }),
            TestType::Load => None,
        }
    }
}
