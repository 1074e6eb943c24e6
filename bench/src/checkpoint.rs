//! Durable orchestration state.
//!
//! The checkpoint document is rewritten as a whole after every finished
//! configuration. Unreadable, invalid or stale documents are treated exactly
//! like a missing one: the file is removed, a warning is logged and the run
//! starts fresh.

use crate::report::ConfigurationResult;
use bench_core::types::{TestConfiguration, TestType};
use bench_core::{BenchError, BenchResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const DEFAULT_CHECKPOINT_PATH: &str = "benchmark-checkpoint.json";

/// Checkpoints older than this are never resumed.
pub const STALE_AFTER_HOURS: i64 = 24;

/// Sampling settings a query-only checkpoint was created with.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueryOnlySettings {
    pub iterations: u32,
    pub time_limit_minutes: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestCheckpoint {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub total_configurations: usize,
    pub completed_configurations: Vec<TestConfiguration>,
    pub pending_configurations: Vec<TestConfiguration>,
    pub partial_results: Vec<ConfigurationResult>,
    pub test_type: TestType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_only_settings: Option<QueryOnlySettings>,
}

/// Session ids look like `20261016T093000-1a2b3c4d`.
pub fn new_session_id() -> String {
    format!(
        "{}-{:08x}",
        Utc::now().format("%Y%m%dT%H%M%S"),
        rand::random::<u32>()
    )
}

impl TestCheckpoint {
    /// A fresh checkpoint with every planned configuration pending.
    pub fn new(
        session_id: String,
        planned: Vec<TestConfiguration>,
        test_type: TestType,
        query_only_settings: Option<QueryOnlySettings>,
    ) -> Self {
        Self {
            session_id,
            timestamp: Utc::now(),
            total_configurations: planned.len(),
            completed_configurations: Vec::new(),
            pending_configurations: planned,
            partial_results: Vec::new(),
            test_type,
            query_only_settings,
        }
    }

    /// Check the partition invariant: completed and pending are disjoint,
    /// duplicate free, and together account for every configuration. Each
    /// completed configuration has exactly one result and vice versa.
    pub fn validate(&self) -> BenchResult<()> {
        let mut seen = HashSet::new();
        for cfg in self
            .completed_configurations
            .iter()
            .chain(self.pending_configurations.iter())
        {
            if !seen.insert(cfg) {
                return Err(BenchError::CorruptState(format!(
                    "configuration {cfg} appears more than once"
                )));
            }
        }
        if seen.len() != self.total_configurations {
            return Err(BenchError::CorruptState(format!(
                "{} configurations recorded but total is {}",
                seen.len(),
                self.total_configurations
            )));
        }

        if self.partial_results.len() != self.completed_configurations.len() {
            return Err(BenchError::CorruptState(format!(
                "{} results recorded for {} completed configurations",
                self.partial_results.len(),
                self.completed_configurations.len()
            )));
        }
        let completed: HashSet<&TestConfiguration> =
            self.completed_configurations.iter().collect();
        let mut with_result = HashSet::new();
        for result in &self.partial_results {
            let cfg = &result.configuration;
            if !completed.contains(cfg) || !with_result.insert(cfg) {
                return Err(BenchError::CorruptState(format!(
                    "result for {cfg} does not match a completed configuration"
                )));
            }
        }
        Ok(())
    }

    /// Whether this checkpoint was produced by a run with the same test type
    /// and sampling settings.
    pub fn is_compatible_with(
        &self,
        test_type: TestType,
        query_only_settings: Option<QueryOnlySettings>,
    ) -> bool {
        self.test_type == test_type && self.query_only_settings == query_only_settings
    }

    /// Whether the checkpoint tracks exactly the planned configuration set.
    pub fn covers(&self, planned: &[TestConfiguration]) -> bool {
        let ours: HashSet<&TestConfiguration> = self
            .completed_configurations
            .iter()
            .chain(self.pending_configurations.iter())
            .collect();
        let theirs: HashSet<&TestConfiguration> = planned.iter().collect();
        planned.len() == self.total_configurations && ours == theirs
    }

    /// Move a finished configuration from pending to completed and record
    /// its result. The configuration must currently be pending.
    pub fn complete(&mut self, result: ConfigurationResult) -> BenchResult<()> {
        let Some(pos) = self
            .pending_configurations
            .iter()
            .position(|c| *c == result.configuration)
        else {
            return Err(BenchError::CorruptState(format!(
                "configuration {} is not pending",
                result.configuration
            )));
        };
        let cfg = self.pending_configurations.remove(pos);
        self.completed_configurations.push(cfg);
        self.partial_results.push(result);
        self.timestamp = Utc::now();
        Ok(())
    }

    pub fn is_pending(&self, cfg: &TestConfiguration) -> bool {
        self.pending_configurations.contains(cfg)
    }
}

/// Load/save/clear of the checkpoint document at a fixed path.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
    max_age: chrono::Duration,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_age: chrono::Duration::hours(STALE_AFTER_HOURS),
        }
    }

    /// Override the staleness threshold.
    pub fn with_max_age(mut self, max_age: chrono::Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<stem>.partial.json` next to the checkpoint.
    pub fn partial_results_path(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("benchmark-checkpoint");
        self.path.with_file_name(format!("{stem}.partial.json"))
    }

    /// Replace the checkpoint document atomically (write temp file, rename).
    pub fn save(&self, checkpoint: &TestCheckpoint) -> BenchResult<()> {
        let json = serde_json::to_string_pretty(checkpoint)?;
        write_atomically(&self.path, &json)?;
        log::debug!(
            "Checkpoint saved: {}/{} configurations complete",
            checkpoint.completed_configurations.len(),
            checkpoint.total_configurations
        );
        Ok(())
    }

    /// Load a resumable checkpoint, or `None` when there is nothing usable.
    ///
    /// Never fails: an unreadable, invalid or stale file is deleted and
    /// reported as a warning.
    pub fn load(&self) -> Option<TestCheckpoint> {
        match self.read_checkpoint() {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                log::warn!(
                    "Discarding checkpoint {}: {e}",
                    self.path.display()
                );
                if let Err(e) = self.clear() {
                    log::warn!("Failed to delete checkpoint {}: {e}", self.path.display());
                }
                None
            }
        }
    }

    fn read_checkpoint(&self) -> BenchResult<Option<TestCheckpoint>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("No checkpoint at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(BenchError::CorruptState(format!("unreadable: {e}"))),
        };

        let checkpoint: TestCheckpoint = serde_json::from_str(&raw)
            .map_err(|e| BenchError::CorruptState(format!("invalid JSON: {e}")))?;
        checkpoint.validate()?;

        let age = Utc::now() - checkpoint.timestamp;
        if age > self.max_age {
            return Err(BenchError::CorruptState(format!(
                "stale, last written {} hours ago",
                age.num_hours()
            )));
        }

        Ok(Some(checkpoint))
    }

    /// Delete the checkpoint. Missing files are fine.
    pub fn clear(&self) -> BenchResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the results gathered so far to the partial-results file.
    pub fn save_partial_results(&self, results: &[ConfigurationResult]) -> BenchResult<PathBuf> {
        let path = self.partial_results_path();
        let json = serde_json::to_string_pretty(results)?;
        write_atomically(&path, &json)?;
        Ok(path)
    }
}

fn write_atomically(path: &Path, contents: &str) -> BenchResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, format!("{contents}\n"))?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
