//! Configuration planner: settings → ordered list of configurations.
//!
//! Pure. Checkpoint reconciliation compares a persisted plan against a fresh
//! one, so the same settings must always produce the same list in the same
//! order.

use bench_core::types::TestConfiguration;
use bench_core::{BenchError, BenchResult};

/// Inputs to [`plan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSettings {
    /// Dataset sizes, outermost loop.
    pub row_counts: Vec<u64>,
    /// Enabled backend ids.
    pub backends: Vec<String>,
    /// Index variants to test (`false` = no secondary index).
    pub index_variants: Vec<bool>,
    /// Backends that get an extra sharded variant per configuration.
    pub sharded_backends: Vec<String>,
}

fn dedup_preserving_order<T: PartialEq + Clone>(items: &[T]) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

/// Expand the settings into the ordered configuration list.
///
/// Order is row count, then backend, then index variant, then shard mode.
/// Duplicate inputs are collapsed keeping the first occurrence.
pub fn plan(settings: &PlanSettings) -> BenchResult<Vec<TestConfiguration>> {
    if settings.row_counts.is_empty() {
        return Err(BenchError::InvalidSettings(
            "at least one row count is required".into(),
        ));
    }
    if settings.row_counts.contains(&0) {
        return Err(BenchError::InvalidSettings(
            "row counts must be greater than zero".into(),
        ));
    }
    if settings.backends.is_empty() {
        return Err(BenchError::InvalidSettings(
            "at least one backend is required".into(),
        ));
    }
    if settings.index_variants.is_empty() {
        return Err(BenchError::InvalidSettings(
            "at least one index variant is required".into(),
        ));
    }

    let row_counts = dedup_preserving_order(&settings.row_counts);
    let backends = dedup_preserving_order(&settings.backends);
    let index_variants = dedup_preserving_order(&settings.index_variants);

    let mut configurations = Vec::new();
    for &row_count in &row_counts {
        for backend in &backends {
            let shardable = settings.sharded_backends.contains(backend);
            for &with_index in &index_variants {
                let base = TestConfiguration::new(backend, with_index, row_count);
                if shardable {
                    configurations.push(base.clone().with_sharding(false));
                    configurations.push(base.with_sharding(true));
                } else {
                    configurations.push(base);
                }
            }
        }
    }

    Ok(configurations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn settings() -> PlanSettings {
        PlanSettings {
            row_counts: vec![1_000, 10_000],
            backends: vec!["sqlite".into(), "memory".into()],
            index_variants: vec![false, true],
            sharded_backends: vec![],
        }
    }

    #[test]
    fn plan_is_idempotent() {
        let s = settings();
        assert_eq!(plan(&s).unwrap(), plan(&s).unwrap());

        let mut sharded = settings();
        sharded.sharded_backends = vec!["memory".into()];
        assert_eq!(plan(&sharded).unwrap(), plan(&sharded).unwrap());
    }

    #[test]
    fn plan_orders_rows_then_backend_then_index() {
        let configs = plan(&settings()).unwrap();
        assert_eq!(configs.len(), 8);
        assert_eq!(configs[0], TestConfiguration::new("sqlite", false, 1_000));
        assert_eq!(configs[1], TestConfiguration::new("sqlite", true, 1_000));
        assert_eq!(configs[2], TestConfiguration::new("memory", false, 1_000));
        assert_eq!(configs[4], TestConfiguration::new("sqlite", false, 10_000));
        assert_eq!(configs[7], TestConfiguration::new("memory", true, 10_000));
    }

    #[test]
    fn shardable_backends_get_both_shard_modes() {
        let mut s = settings();
        s.row_counts = vec![100];
        s.index_variants = vec![true];
        s.sharded_backends = vec!["memory".into()];
        let configs = plan(&s).unwrap();
        assert_eq!(
            configs,
            vec![
                TestConfiguration::new("sqlite", true, 100),
                TestConfiguration::new("memory", true, 100).with_sharding(false),
                TestConfiguration::new("memory", true, 100).with_sharding(true),
            ]
        );
    }

    #[test]
    fn duplicate_inputs_never_produce_duplicate_configurations() {
        let s = PlanSettings {
            row_counts: vec![10, 10, 20],
            backends: vec!["sqlite".into(), "sqlite".into()],
            index_variants: vec![true, false, true],
            sharded_backends: vec![],
        };
        let configs = plan(&s).unwrap();
        let unique: HashSet<_> = configs.iter().cloned().collect();
        assert_eq!(unique.len(), configs.len());
        assert_eq!(configs.len(), 4);
        assert!(configs[0].with_index);
    }

    #[test]
    fn empty_or_zero_inputs_are_rejected() {
        let mut s = settings();
        s.row_counts.clear();
        assert!(matches!(plan(&s), Err(BenchError::InvalidSettings(_))));

        let mut s = settings();
        s.row_counts.push(0);
        assert!(matches!(plan(&s), Err(BenchError::InvalidSettings(_))));

        let mut s = settings();
        s.backends.clear();
        assert!(matches!(plan(&s), Err(BenchError::InvalidSettings(_))));

        let mut s = settings();
        s.index_variants.clear();
        assert!(matches!(plan(&s), Err(BenchError::InvalidSettings(_))));
    }
}
