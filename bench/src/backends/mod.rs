//! Bundled backend implementations.

pub mod sqlite;

use bench_core::backend::BackendFactory;
use std::path::Path;
use std::sync::Arc;

/// Every backend this binary knows how to drive.
pub fn registry(sqlite_path: &Path) -> Vec<Arc<dyn BackendFactory>> {
    vec![Arc::new(sqlite::SqliteFactory::new(sqlite_path))]
}
