//! Statistics reducer: raw per-pass timings → descriptive statistics.
//!
//! Everything here is pure. The 95% confidence interval deliberately uses a
//! coarse critical value (1.96 above 30 samples, 2.0 otherwise) instead of the
//! Student-t quantile, so results stay comparable with earlier runs.

use bench_core::types::QueryResult;
use serde::{Deserialize, Serialize};

/// Critical value used when more than [`LARGE_SAMPLE_THRESHOLD`] samples exist.
pub const Z_LARGE_SAMPLE: f64 = 1.96;
/// Critical value used for small samples.
pub const T_SMALL_SAMPLE: f64 = 2.0;
pub const LARGE_SAMPLE_THRESHOLD: usize = 30;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Per-query statistics. Every array has one entry per distinct query, in
/// query order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatistics {
    pub mean: Vec<f64>,
    pub median: Vec<f64>,
    pub min: Vec<f64>,
    pub max: Vec<f64>,
    pub std_dev: Vec<f64>,
    pub ci95: Vec<ConfidenceInterval>,
}

impl QueryStatistics {
    pub fn query_count(&self) -> usize {
        self.mean.len()
    }
}

/// Statistics for one series of samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
    pub ci95: ConfidenceInterval,
}

fn mean(data: &[f64]) -> Option<f64> {
    match data.len() {
        0 => None,
        count => Some(data.iter().sum::<f64>() / count as f64),
    }
}

/// Population standard deviation (divides by N).
fn std_deviation(data: &[f64], data_mean: f64) -> f64 {
    let variance = data
        .iter()
        .map(|value| {
            let diff = data_mean - *value;
            diff * diff
        })
        .sum::<f64>()
        / data.len() as f64;
    variance.sqrt()
}

fn median(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

pub fn critical_value(sample_count: usize) -> f64 {
    if sample_count > LARGE_SAMPLE_THRESHOLD {
        Z_LARGE_SAMPLE
    } else {
        T_SMALL_SAMPLE
    }
}

/// Summarize one series. Returns `None` for an empty series.
pub fn summarize(samples: &[f64]) -> Option<Summary> {
    let data_mean = mean(samples)?;
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = samples.len();
    let std_dev = std_deviation(samples, data_mean);
    let margin = critical_value(n) * (std_dev / (n as f64).sqrt());

    Some(Summary {
        mean: data_mean,
        median: median(&sorted),
        min: sorted[0],
        max: sorted[n - 1],
        std_dev,
        ci95: ConfidenceInterval {
            // Durations are never negative.
            lower: (data_mean - margin).max(0.0),
            upper: data_mean + margin,
        },
    })
}

/// Reduce every pass of a sampling run into per-query statistics.
///
/// Query `i` of each pass contributes to column `i`. The number of columns is
/// taken from the first pass; zero passes reduce to empty arrays.
pub fn reduce(all_passes: &[Vec<QueryResult>]) -> QueryStatistics {
    let query_count = all_passes.first().map_or(0, Vec::len);
    let mut stats = QueryStatistics::default();

    for q in 0..query_count {
        let samples: Vec<f64> = all_passes
            .iter()
            .filter_map(|pass| pass.get(q))
            .map(|r| r.duration_ms)
            .collect();

        let Some(summary) = summarize(&samples) else {
            continue;
        };
        stats.mean.push(summary.mean);
        stats.median.push(summary.median);
        stats.min.push(summary.min);
        stats.max.push(summary.max);
        stats.std_dev.push(summary.std_dev);
        stats.ci95.push(summary.ci95);
    }

    stats
}
