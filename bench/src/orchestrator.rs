//! Resumable run orchestration.
//!
//! One run walks every planned configuration through setup (drop, create,
//! load) and sampling, one configuration at a time. Progress is persisted
//! after each finished configuration, so a crash or Ctrl-C loses at most the
//! configuration that was in progress.

use crate::cancel::CancellationToken;
use crate::checkpoint::{new_session_id, CheckpointStore, TestCheckpoint};
use crate::loader::{load_sequential, LoadReport, ParallelLoader};
use crate::planner;
use crate::report::{write_results, ConfigurationResult, ResultsDocument};
use crate::retry::connect_with_retry;
use crate::sampler;
use crate::settings::RunSettings;
use crate::statistics;
use bench_core::backend::{Backend, BackendFactory};
use bench_core::types::{TestConfiguration, TestType};
use bench_core::{BenchError, BenchResult};
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug)]
pub enum RunOutcome {
    /// Every configuration finished. The checkpoint has been removed.
    Complete {
        session_id: String,
        results: Vec<ConfigurationResult>,
        results_path: PathBuf,
    },
    /// Stopped on request. The returned checkpoint is what was persisted.
    Interrupted {
        checkpoint: TestCheckpoint,
        partial_results_path: PathBuf,
    },
}

pub struct Orchestrator {
    factories: Vec<Arc<dyn BackendFactory>>,
    store: CheckpointStore,
    settings: RunSettings,
    cancel: CancellationToken,
    /// One long-lived connection per backend, opened on first use.
    roles: HashMap<String, Box<dyn Backend>>,
}

impl Orchestrator {
    pub fn new(
        factories: Vec<Arc<dyn BackendFactory>>,
        store: CheckpointStore,
        settings: RunSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            factories,
            store,
            settings,
            cancel,
            roles: HashMap::new(),
        }
    }

    fn factory(&self, backend_id: &str) -> BenchResult<Arc<dyn BackendFactory>> {
        self.factories
            .iter()
            .find(|f| f.id() == backend_id)
            .cloned()
            .ok_or_else(|| BenchError::InvalidSettings(format!("unknown backend '{backend_id}'")))
    }

    fn check_backends(&self) -> BenchResult<()> {
        for id in &self.settings.plan.backends {
            self.factory(id)?;
        }
        for id in &self.settings.plan.sharded_backends {
            let factory = self.factory(id)?;
            if !factory.supports_sharding() {
                return Err(BenchError::InvalidSettings(format!(
                    "backend '{id}' does not support sharding"
                )));
            }
        }
        Ok(())
    }

    /// Resume the stored checkpoint when it belongs to this exact run,
    /// otherwise start a new session.
    fn reconcile(&self, planned: &[TestConfiguration]) -> BenchResult<TestCheckpoint> {
        let test_type = self.settings.test_type;
        let query_only = self.settings.query_only_settings();

        if self.settings.fresh {
            log::info!("Fresh start requested, removing any existing checkpoint");
            self.store.clear()?;
        } else if let Some(checkpoint) = self.store.load() {
            if !checkpoint.is_compatible_with(test_type, query_only) {
                log::warn!(
                    "Checkpoint {} was created for a different test type or sampling settings, starting fresh",
                    checkpoint.session_id
                );
            } else if !checkpoint.covers(planned) {
                log::warn!(
                    "Checkpoint {} tracks a different set of configurations, starting fresh",
                    checkpoint.session_id
                );
            } else {
                log::info!(
                    "Resuming session {}: {}/{} configurations already complete",
                    checkpoint.session_id,
                    checkpoint.completed_configurations.len(),
                    checkpoint.total_configurations
                );
                return Ok(checkpoint);
            }
        }

        let session_id = new_session_id();
        log::info!(
            "Starting session {session_id}: {} configurations ({test_type})",
            planned.len()
        );
        Ok(TestCheckpoint::new(
            session_id,
            planned.to_vec(),
            test_type,
            query_only,
        ))
    }

    pub fn run(&mut self) -> BenchResult<RunOutcome> {
        self.check_backends()?;
        // Validate before touching any backend.
        self.settings.sampling()?;
        self.settings.loader.validate()?;
        let planned = planner::plan(&self.settings.plan)?;

        let mut checkpoint = self.reconcile(&planned)?;
        self.store.save(&checkpoint)?;

        let outcome = self.run_pending(&planned, &mut checkpoint);
        self.disconnect_all();
        outcome
    }

    fn run_pending(
        &mut self,
        planned: &[TestConfiguration],
        checkpoint: &mut TestCheckpoint,
    ) -> BenchResult<RunOutcome> {
        let total = checkpoint.total_configurations;
        for cfg in planned {
            if !checkpoint.is_pending(cfg) {
                continue;
            }
            if self.cancel.is_cancelled() {
                return self.interrupt(checkpoint);
            }

            log::info!(
                "[{}/{total}] Running configuration {cfg}",
                checkpoint.completed_configurations.len() + 1
            );
            match self.run_configuration(cfg) {
                Ok(_) if self.cancel.is_cancelled() => {
                    log::info!("{cfg}: interrupted before it could be recorded, leaving it pending");
                    return self.interrupt(checkpoint);
                }
                Ok(result) => {
                    checkpoint.complete(result)?;
                    self.store.save(checkpoint)?;
                    log::info!(
                        "{cfg}: done, {}/{total} configurations complete",
                        checkpoint.completed_configurations.len()
                    );
                }
                Err(BenchError::Interrupted) => {
                    log::info!("{cfg}: interrupted, leaving it pending");
                    return self.interrupt(checkpoint);
                }
                Err(e) => {
                    log::error!("{cfg}: {e}");
                    if let Err(save_err) = self.store.save(checkpoint) {
                        log::error!("Failed to persist checkpoint: {save_err}");
                    }
                    return Err(e);
                }
            }
        }

        self.finish(checkpoint)
    }

    fn interrupt(&self, checkpoint: &TestCheckpoint) -> BenchResult<RunOutcome> {
        self.store.save(checkpoint)?;
        let partial_results_path = self.store.save_partial_results(&checkpoint.partial_results)?;
        log::info!(
            "Checkpoint saved to {} ({} of {} configurations complete), partial results in {}",
            self.store.path().display(),
            checkpoint.completed_configurations.len(),
            checkpoint.total_configurations,
            partial_results_path.display()
        );
        Ok(RunOutcome::Interrupted {
            checkpoint: checkpoint.clone(),
            partial_results_path,
        })
    }

    fn finish(&self, checkpoint: &TestCheckpoint) -> BenchResult<RunOutcome> {
        let doc = ResultsDocument {
            session_id: checkpoint.session_id.clone(),
            test_type: checkpoint.test_type,
            finished_at: Utc::now(),
            results: checkpoint.partial_results.clone(),
        };
        let results_path = write_results(&self.settings.results_dir, &doc)?;
        self.store.clear()?;
        log::info!(
            "Session {} complete, results written to {}",
            doc.session_id,
            results_path.display()
        );
        Ok(RunOutcome::Complete {
            session_id: doc.session_id,
            results: doc.results,
            results_path,
        })
    }

    fn run_configuration(&mut self, cfg: &TestConfiguration) -> BenchResult<ConfigurationResult> {
        let factory = self.factory(&cfg.backend_id)?;
        let sampling = self.settings.sampling()?;
        let settings = &self.settings;
        let cancel = &self.cancel;
        let backend = role_connection(&mut self.roles, &factory, settings)?;

        if cfg.is_sharded() {
            log::debug!("{cfg}: sharded variant");
        }

        let load = match settings.test_type {
            TestType::Load => Some(setup(backend, &factory, cfg, settings, cancel)?),
            TestType::QueryOnly => None,
        };

        let queries = factory.benchmark_queries();
        let outcome = sampler::sample(backend, &queries, &sampling, cancel)?;
        if outcome.completed_iterations == 0 {
            log::warn!("{cfg}: no pass finished within the time limit, statistics are empty");
        }

        Ok(ConfigurationResult {
            configuration: cfg.clone(),
            query_names: queries.into_iter().map(|q| q.name).collect(),
            statistics: statistics::reduce(&outcome.all_passes),
            completed_iterations: outcome.completed_iterations,
            timed_out: outcome.timed_out,
            rows_loaded: load.as_ref().map_or(0, |l| l.records_inserted),
            load_duration_ms: load.as_ref().map(LoadReport::duration_ms),
        })
    }

    fn disconnect_all(&mut self) {
        for (id, mut backend) in self.roles.drain() {
            match backend.disconnect() {
                Ok(()) => log::debug!("Disconnected from {id}"),
                Err(e) => log::warn!("Failed to disconnect from {id}: {e}"),
            }
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}

/// The long-lived connection for `factory`'s backend, opened on first use.
fn role_connection<'a>(
    roles: &'a mut HashMap<String, Box<dyn Backend>>,
    factory: &Arc<dyn BackendFactory>,
    settings: &RunSettings,
) -> BenchResult<&'a mut dyn Backend> {
    let id = factory.id();
    if !roles.contains_key(id) {
        let mut backend = factory.create();
        connect_with_retry(backend.as_mut(), &settings.retry)?;
        if let Err(e) = backend.ensure_database_exists() {
            let _ = backend.disconnect();
            return Err(e);
        }
        log::info!("Connected to {id}");
        roles.insert(id.to_string(), backend);
    }
    match roles.get_mut(id) {
        Some(backend) => Ok(backend.as_mut()),
        None => Err(BenchError::Connection(format!("no connection for {id}"))),
    }
}

fn prepare_table(backend: &mut dyn Backend, with_index: bool) -> BenchResult<()> {
    backend.drop_table()?;
    if with_index {
        backend.create_table_with_index()
    } else {
        backend.create_table()
    }
}

/// Recreate the table and load `cfg.row_count` rows, falling back to
/// sequential inserts when the worker pool cannot be brought up.
fn setup(
    backend: &mut dyn Backend,
    factory: &Arc<dyn BackendFactory>,
    cfg: &TestConfiguration,
    settings: &RunSettings,
    cancel: &CancellationToken,
) -> BenchResult<LoadReport> {
    prepare_table(backend, cfg.with_index)?;

    let loader = ParallelLoader::new(Arc::clone(factory), settings.loader, cancel.clone());
    match loader.load(cfg.row_count) {
        Ok(report) => Ok(report),
        Err(BenchError::ResourceExhaustion(e)) => {
            log::warn!("{cfg}: parallel load failed ({e}), falling back to sequential inserts");
            prepare_table(backend, cfg.with_index)?;
            load_sequential(backend, cfg.row_count, &settings.loader, cancel)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::QueryOnlySettings;
    use crate::loader::LoaderSettings;
    use crate::planner::PlanSettings;
    use crate::retry::RetryPolicy;
    use crate::testing::{Behavior, MemoryFactory, MemoryState};
    use bench_core::types::QueryDescriptor;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::TempDir;

    fn run_settings(dir: &TempDir, test_type: TestType) -> RunSettings {
        RunSettings {
            plan: PlanSettings {
                row_counts: vec![20, 40],
                backends: vec!["memory".into()],
                index_variants: vec![false, true],
                sharded_backends: vec![],
            },
            test_type,
            iterations: 3,
            time_limit_minutes: 5,
            loader: LoaderSettings {
                worker_count: 2,
                batch_size: 5,
                poll_interval: Duration::from_millis(1),
                ..LoaderSettings::default()
            },
            retry: RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            checkpoint_path: dir.path().join("checkpoint.json"),
            results_dir: dir.path().join("results"),
            sqlite_path: dir.path().join("unused.db"),
            fresh: false,
        }
    }

    fn orchestrator(
        factory: MemoryFactory,
        settings: RunSettings,
        cancel: CancellationToken,
    ) -> (Orchestrator, Arc<MemoryState>) {
        let state = factory.state();
        let store = CheckpointStore::new(settings.checkpoint_path.clone());
        let factories: Vec<Arc<dyn BackendFactory>> = vec![Arc::new(factory)];
        (Orchestrator::new(factories, store, settings, cancel), state)
    }

    #[test]
    fn fresh_run_completes_every_configuration() {
        let dir = TempDir::new().unwrap();
        let settings = run_settings(&dir, TestType::Load);
        let store = CheckpointStore::new(settings.checkpoint_path.clone());
        let (mut orch, state) =
            orchestrator(MemoryFactory::new("memory"), settings, CancellationToken::new());

        let RunOutcome::Complete {
            results,
            results_path,
            ..
        } = orch.run().unwrap()
        else {
            panic!("run did not complete");
        };

        assert_eq!(results.len(), 4);
        let order: Vec<String> = results.iter().map(|r| r.configuration.to_string()).collect();
        assert_eq!(
            order,
            vec!["memory/noindex/20", "memory/index/20", "memory/noindex/40", "memory/index/40"]
        );
        for r in &results {
            assert_eq!(r.completed_iterations, 3);
            assert_eq!(r.rows_loaded, r.configuration.row_count);
            assert!(r.load_duration_ms.is_some());
            assert_eq!(r.query_names, vec!["count_all", "sum_amount"]);
            assert_eq!(r.statistics.query_count(), 2);
        }

        assert!(results_path.exists());
        assert!(store.load().is_none());
        assert_eq!(
            state.ddl(),
            vec![
                "ensure_database",
                "drop",
                "create",
                "drop",
                "create_with_index",
                "drop",
                "create",
                "drop",
                "create_with_index",
            ]
        );
        assert_eq!(state.open_connections.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn resume_skips_completed_configurations() {
        let dir = TempDir::new().unwrap();
        let settings = run_settings(&dir, TestType::Load);
        let store = CheckpointStore::new(settings.checkpoint_path.clone());
        let planned = planner::plan(&settings.plan).unwrap();

        let mut checkpoint =
            TestCheckpoint::new("resumed-session".into(), planned.clone(), TestType::Load, None);
        let mut done = crate::testing::sample_result(20);
        done.configuration = planned[0].clone();
        checkpoint.complete(done).unwrap();
        store.save(&checkpoint).unwrap();

        let (mut orch, state) =
            orchestrator(MemoryFactory::new("memory"), settings, CancellationToken::new());
        let RunOutcome::Complete {
            session_id,
            results,
            ..
        } = orch.run().unwrap()
        else {
            panic!("run did not complete");
        };

        assert_eq!(session_id, "resumed-session");
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].configuration, planned[0]);
        // Only the three pending configurations were set up again.
        let creates = state.ddl().iter().filter(|s| s.starts_with("create")).count();
        assert_eq!(creates, 3);
    }

    #[test]
    fn incompatible_checkpoint_is_discarded() {
        let dir = TempDir::new().unwrap();
        let settings = run_settings(&dir, TestType::QueryOnly);
        let store = CheckpointStore::new(settings.checkpoint_path.clone());
        let planned = planner::plan(&settings.plan).unwrap();

        let stale_settings = QueryOnlySettings {
            iterations: 99,
            time_limit_minutes: 5,
        };
        let mut checkpoint = TestCheckpoint::new(
            "old-session".into(),
            planned.clone(),
            TestType::QueryOnly,
            Some(stale_settings),
        );
        let mut done = crate::testing::sample_result(20);
        done.configuration = planned[0].clone();
        checkpoint.complete(done).unwrap();
        store.save(&checkpoint).unwrap();

        let (mut orch, _) =
            orchestrator(MemoryFactory::new("memory"), settings, CancellationToken::new());
        let RunOutcome::Complete {
            session_id,
            results,
            ..
        } = orch.run().unwrap()
        else {
            panic!("run did not complete");
        };
        assert_ne!(session_id, "old-session");
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.load_duration_ms.is_none()));
    }

    #[test]
    fn different_plan_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let settings = run_settings(&dir, TestType::Load);
        let store = CheckpointStore::new(settings.checkpoint_path.clone());
        let other = vec![TestConfiguration::new("memory", false, 999)];
        store
            .save(&TestCheckpoint::new("other-plan".into(), other, TestType::Load, None))
            .unwrap();

        let (mut orch, _) =
            orchestrator(MemoryFactory::new("memory"), settings, CancellationToken::new());
        match orch.run().unwrap() {
            RunOutcome::Complete { session_id, results, .. } => {
                assert_ne!(session_id, "other-plan");
                assert_eq!(results.len(), 4);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn interrupt_mid_configuration_keeps_it_pending() {
        let dir = TempDir::new().unwrap();
        let settings = run_settings(&dir, TestType::Load);
        let store = CheckpointStore::new(settings.checkpoint_path.clone());
        let cancel = CancellationToken::new();
        // Three passes of two queries per configuration: the token flips
        // during the first pass of the second configuration.
        let factory = MemoryFactory::new("memory").with_behavior(Behavior {
            cancel_after_queries: Some((7, cancel.clone())),
            ..Behavior::default()
        });
        let (mut orch, _) = orchestrator(factory, settings, cancel);

        let RunOutcome::Interrupted {
            checkpoint,
            partial_results_path,
        } = orch.run().unwrap()
        else {
            panic!("run was not interrupted");
        };

        assert_eq!(checkpoint.completed_configurations.len(), 1);
        assert_eq!(checkpoint.pending_configurations.len(), 3);
        assert!(checkpoint.is_pending(&TestConfiguration::new("memory", true, 20)));
        assert_eq!(checkpoint.partial_results.len(), 1);
        assert!(partial_results_path.exists());

        let persisted = store.load().unwrap();
        assert_eq!(persisted, checkpoint);
    }

    #[test]
    fn failed_configuration_is_not_recorded() {
        let dir = TempDir::new().unwrap();
        let settings = run_settings(&dir, TestType::Load);
        let store = CheckpointStore::new(settings.checkpoint_path.clone());
        let factory = MemoryFactory::new("memory").with_behavior(Behavior {
            fail_query: Some("SELECT SUM(amount) FROM records".into()),
            ..Behavior::default()
        });
        let (mut orch, state) = orchestrator(factory, settings, CancellationToken::new());

        let err = orch.run().unwrap_err();
        assert!(matches!(err, BenchError::FatalConfiguration(_)), "{err}");

        let persisted = store.load().unwrap();
        assert!(persisted.completed_configurations.is_empty());
        assert_eq!(persisted.pending_configurations.len(), 4);
        assert_eq!(state.open_connections.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn worker_exhaustion_falls_back_to_sequential_load() {
        let dir = TempDir::new().unwrap();
        let mut settings = run_settings(&dir, TestType::Load);
        settings.plan.row_counts = vec![20];
        settings.plan.index_variants = vec![true];
        // The role connection takes the only slot, so no worker can connect.
        let factory = MemoryFactory::new("memory").with_behavior(Behavior {
            max_connections: Some(1),
            ..Behavior::default()
        });
        let (mut orch, state) = orchestrator(factory, settings, CancellationToken::new());

        let RunOutcome::Complete { results, .. } = orch.run().unwrap() else {
            panic!("run did not complete");
        };
        assert_eq!(results[0].rows_loaded, 20);
        assert_eq!(state.inserted().len(), 20);
        assert_eq!(
            state.ddl(),
            vec!["ensure_database", "drop", "create_with_index", "drop", "create_with_index"]
        );
    }

    #[test]
    fn unknown_backend_is_rejected_up_front() {
        let dir = TempDir::new().unwrap();
        let mut settings = run_settings(&dir, TestType::Load);
        settings.plan.backends = vec!["postgres".into()];
        let (mut orch, state) =
            orchestrator(MemoryFactory::new("memory"), settings, CancellationToken::new());

        assert!(matches!(orch.run(), Err(BenchError::InvalidSettings(_))));
        assert_eq!(state.connect_attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn transient_connect_failures_are_retried() {
        let dir = TempDir::new().unwrap();
        let mut settings = run_settings(&dir, TestType::QueryOnly);
        settings.plan.row_counts = vec![20];
        settings.plan.index_variants = vec![false];
        let factory = MemoryFactory::new("memory");
        factory.state().failing_connects.store(2, Ordering::SeqCst);
        let (mut orch, state) = orchestrator(factory, settings, CancellationToken::new());

        assert!(matches!(orch.run().unwrap(), RunOutcome::Complete { .. }));
        assert_eq!(state.connect_attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn sharding_a_backend_without_shard_support_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut settings = run_settings(&dir, TestType::Load);
        settings.plan.sharded_backends = vec!["memory".into()];
        let (mut orch, state) =
            orchestrator(MemoryFactory::new("memory"), settings, CancellationToken::new());

        assert!(matches!(orch.run(), Err(BenchError::InvalidSettings(_))));
        assert_eq!(state.connect_attempts.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("checkpoint.json").exists());
    }

    #[test]
    fn shardable_backend_runs_both_shard_modes() {
        let dir = TempDir::new().unwrap();
        let mut settings = run_settings(&dir, TestType::Load);
        settings.plan.row_counts = vec![20];
        settings.plan.index_variants = vec![true];
        settings.plan.sharded_backends = vec!["memory".into()];
        let factory = MemoryFactory::new("memory")
            .shardable()
            .with_queries(vec![QueryDescriptor::new("by_id", "SELECT * FROM records WHERE id = 7")]);
        let (mut orch, state) = orchestrator(factory, settings, CancellationToken::new());

        let RunOutcome::Complete { results, .. } = orch.run().unwrap() else {
            panic!("run did not complete");
        };

        let names: Vec<String> = results.iter().map(|r| r.configuration.to_string()).collect();
        assert_eq!(names, vec!["memory/index/20/single", "memory/index/20/sharded"]);
        for r in &results {
            assert_eq!(r.query_names, vec!["by_id"]);
            assert_eq!(r.rows_loaded, 20);
            assert_eq!(r.completed_iterations, 3);
        }
        assert!(state.table_exists.load(Ordering::SeqCst));
        assert!(state.indexed.load(Ordering::SeqCst));
        assert_eq!(state.inserted().len(), 20);
        assert!(!dir.path().join("checkpoint.json").exists());
    }
}
