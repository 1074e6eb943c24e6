//! Report module: per-configuration results, the human-readable summary and
//! the results JSON file.

use crate::statistics::QueryStatistics;
use bench_core::types::{TestConfiguration, TestType};
use bench_core::BenchResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Everything recorded for one fully finished configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationResult {
    pub configuration: TestConfiguration,
    /// Query names in sampling order; indexes line up with the statistics arrays.
    pub query_names: Vec<String>,
    pub statistics: QueryStatistics,
    pub completed_iterations: u32,
    pub timed_out: bool,
    pub rows_loaded: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_duration_ms: Option<f64>,
}

impl ConfigurationResult {
    /// Rows per second achieved by the setup phase, when data was loaded.
    pub fn load_throughput(&self) -> Option<f64> {
        let ms = self.load_duration_ms?;
        if ms <= 0.0 {
            return None;
        }
        Some(self.rows_loaded as f64 / (ms / 1000.0))
    }
}

/// Document written once a run completes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResultsDocument {
    pub session_id: String,
    pub test_type: TestType,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<ConfigurationResult>,
}

/// Write `doc` to `<dir>/results-<sessionId>.json` and return the path.
pub fn write_results(dir: &Path, doc: &ResultsDocument) -> BenchResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("results-{}.json", doc.session_id));
    let json = serde_json::to_string_pretty(doc)?;
    fs::write(&path, format!("{json}\n"))?;
    Ok(path)
}

/// Print a formatted report of every configuration's results.
pub fn print_report(results: &[ConfigurationResult]) {
    println!("\n{}", "=".repeat(80));
    println!("  Query Benchmark Report");
    println!("  Configurations: {}", results.len());
    println!("{}", "=".repeat(80));

    for result in results {
        println!("\n  Configuration: {}", result.configuration);
        println!("  {}", "-".repeat(60));
        match (result.load_duration_ms, result.load_throughput()) {
            (Some(ms), Some(rps)) => println!(
                "  Load:            {:>10} rows in {:.2}s  ({:.0} rows/s)",
                result.rows_loaded,
                ms / 1000.0,
                rps
            ),
            _ => println!("  Load:            skipped (query-only)"),
        }
        println!(
            "  Iterations:      {:>10}{}",
            result.completed_iterations,
            if result.timed_out { "  (time limit hit)" } else { "" }
        );

        if result.statistics.query_count() == 0 {
            println!("  No completed passes.");
            continue;
        }

        println!(
            "\n  {:24} {:>10} {:>10} {:>10} {:>10} {:>21}",
            "Query", "Mean (ms)", "Median", "Min", "StdDev", "95% CI"
        );
        println!("  {}", "-".repeat(90));
        let stats = &result.statistics;
        for (i, name) in result.query_names.iter().enumerate() {
            if i >= stats.query_count() {
                break;
            }
            println!(
                "  {:24} {:>10.3} {:>10.3} {:>10.3} {:>10.3}   [{:>8.3}, {:>8.3}]",
                name,
                stats.mean[i],
                stats.median[i],
                stats.min[i],
                stats.std_dev[i],
                stats.ci95[i].lower,
                stats.ci95[i].upper,
            );
        }
    }

    println!("\n{}", "=".repeat(80));

    // Comparison table: total mean pass time per configuration
    if results.len() >= 2 {
        println!("\n  Comparison Summary:");
        println!(
            "  {:36} {:>14} {:>12} {:>10}",
            "Configuration", "Pass (ms)", "Iterations", "Rows/s"
        );
        println!("  {}", "-".repeat(76));
        for r in results {
            let pass_ms: f64 = r.statistics.mean.iter().sum();
            let rps = r
                .load_throughput()
                .map(|v| format!("{v:.0}"))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {:36} {:>14.3} {:>12} {:>10}",
                r.configuration.to_string(),
                pass_ms,
                r.completed_iterations,
                rps
            );
        }
    }

    println!();
}
