//! The backend capability: the only surface through which the benchmark
//! engine touches a database.
//!
//! The engine never depends on anything backend specific beyond these two
//! traits and the backend's string id, which doubles as the key for
//! checkpoint equality and statistics bucketing.

use crate::error::BenchResult;
use crate::types::{QueryDescriptor, Record, Row};

/// A single connection-owning handle to one database system.
///
/// Implementations are created unconnected by a [`BackendFactory`]. The
/// orchestrator keeps one long-lived instance per backend role; the parallel
/// loader creates one private instance per pooled worker.
pub trait Backend: Send {
    /// Stable identifier, e.g. `"sqlite"`.
    fn id(&self) -> &str;

    fn connect(&mut self) -> BenchResult<()>;

    fn disconnect(&mut self) -> BenchResult<()>;

    /// Run a read query and return every row it produced.
    fn query(&mut self, text: &str) -> BenchResult<Vec<Row>>;

    /// Insert a batch of records as one unit of work.
    fn insert_batch(&mut self, records: &[Record]) -> BenchResult<()>;

    fn create_table(&mut self) -> BenchResult<()>;

    fn create_table_with_index(&mut self) -> BenchResult<()>;

    fn drop_table(&mut self) -> BenchResult<()>;

    /// Create the database if it does not exist yet. Must be idempotent.
    fn ensure_database_exists(&mut self) -> BenchResult<()>;
}

/// Produces fresh, unconnected [`Backend`] instances for one backend id.
pub trait BackendFactory: Send + Sync {
    fn id(&self) -> &str;

    /// Whether the planner should emit sharded variants for this backend.
    fn supports_sharding(&self) -> bool {
        false
    }

    /// Ordered query set sampled against every configuration of this backend.
    fn benchmark_queries(&self) -> Vec<QueryDescriptor>;

    fn create(&self) -> Box<dyn Backend>;
}
