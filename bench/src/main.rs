//! Benchmark runner.
//!
//! Usage:
//!   query-bench                                   # sqlite, 10k + 100k rows, both index variants
//!   query-bench --rows 1000000 --workers 8        # bigger load
//!   query-bench --test-type query-only --iterations 50
//!   query-bench --fresh                           # ignore any saved checkpoint
//!
//! Interrupt with Ctrl-C at any time; the next invocation with the same
//! settings resumes where this one stopped.

use anyhow::Context;
use query_bench::backends;
use query_bench::cancel::CancellationToken;
use query_bench::checkpoint::CheckpointStore;
use query_bench::orchestrator::{Orchestrator, RunOutcome};
use query_bench::report::print_report;
use query_bench::settings::{Cli, RunSettings};
use std::process::ExitCode;

fn run(cli: &Cli) -> anyhow::Result<RunOutcome> {
    let settings = RunSettings::from_cli(cli).context("invalid settings")?;

    let cancel = CancellationToken::new();
    cancel
        .install_signal_handler()
        .context("failed to install signal handler")?;

    let store = CheckpointStore::new(settings.checkpoint_path.clone());
    let factories = backends::registry(&settings.sqlite_path);
    let mut orchestrator = Orchestrator::new(factories, store, settings, cancel);
    let outcome = orchestrator.run()?;
    Ok(outcome)
}

fn main() -> ExitCode {
    let cli = Cli::load();

    if let Err(e) = bench_core::initialize_logger(cli.log_level(), cli.log_file()) {
        eprintln!("Failed to initialize logger: {e}. Exiting.");
        return ExitCode::FAILURE;
    }

    log::info!("Starting query-bench v{}", env!("CARGO_PKG_VERSION"));

    match run(&cli) {
        Ok(RunOutcome::Complete {
            results,
            results_path,
            ..
        }) => {
            print_report(&results);
            println!("Results written to {}", results_path.display());
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Interrupted {
            checkpoint,
            partial_results_path,
        }) => {
            println!(
                "Interrupted: {}/{} configurations complete. Run again with the same settings to resume.",
                checkpoint.completed_configurations.len(),
                checkpoint.total_configurations
            );
            println!("Partial results written to {}", partial_results_path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Benchmark failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}
