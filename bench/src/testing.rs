//! In-memory backend used by the unit tests.
//!
//! Every instance created by one [`MemoryFactory`] shares a [`MemoryState`],
//! so tests can observe what the pooled workers did: which ids were
//! inserted, how many inserts ran at the same time, how many connections
//! were opened.

use crate::cancel::CancellationToken;
use crate::report::ConfigurationResult;
use crate::statistics;
use bench_core::backend::{Backend, BackendFactory};
use bench_core::types::{QueryDescriptor, QueryResult, Record, Row, TestConfiguration, Value};
use bench_core::{BenchError, BenchResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Default)]
pub struct MemoryState {
    pub inserted_ids: Mutex<Vec<u64>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub connect_attempts: AtomicUsize,
    pub open_connections: AtomicUsize,
    pub queries_run: AtomicUsize,
    pub failing_connects: AtomicUsize,
    pub table_exists: AtomicBool,
    pub indexed: AtomicBool,
    pub ddl_log: Mutex<Vec<String>>,
}

impl MemoryState {
    pub fn inserted(&self) -> Vec<u64> {
        self.inserted_ids.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn ddl(&self) -> Vec<String> {
        self.ddl_log.lock().unwrap().clone()
    }
}

#[derive(Clone, Default)]
pub struct Behavior {
    pub insert_delay: Duration,
    pub query_delay: Duration,
    pub connect_delay: Duration,
    /// Connections beyond this many concurrently open ones are refused.
    pub max_connections: Option<usize>,
    /// Any batch containing this id fails.
    pub fail_insert_id: Option<u64>,
    /// Any batch containing this id sleeps this long before inserting.
    pub stall_insert: Option<(u64, Duration)>,
    pub fail_query: Option<String>,
    /// Cancel the token once this many queries have run.
    pub cancel_after_queries: Option<(usize, CancellationToken)>,
}

pub struct MemoryBackend {
    id: String,
    state: Arc<MemoryState>,
    behavior: Behavior,
    connected: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            id: "memory".into(),
            state: Arc::new(MemoryState::default()),
            behavior: Behavior::default(),
            connected: false,
        }
    }

    pub fn fail_connects(&mut self, n: usize) {
        self.state.failing_connects.store(n, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> BenchResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(BenchError::Connection("not connected".into()))
        }
    }

    fn log_ddl(&self, statement: &str) {
        self.state.ddl_log.lock().unwrap().push(statement.to_string());
    }
}

impl Backend for MemoryBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn connect(&mut self) -> BenchResult<()> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.behavior.connect_delay.is_zero() {
            thread::sleep(self.behavior.connect_delay);
        }
        let failing = self.state.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.state.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(BenchError::Connection("connection refused".into()));
        }
        let open = self.state.open_connections.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(max) = self.behavior.max_connections {
            if open > max {
                self.state.open_connections.fetch_sub(1, Ordering::SeqCst);
                return Err(BenchError::Connection("too many connections".into()));
            }
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> BenchResult<()> {
        if self.connected {
            self.state.open_connections.fetch_sub(1, Ordering::SeqCst);
            self.connected = false;
        }
        Ok(())
    }

    fn query(&mut self, text: &str) -> BenchResult<Vec<Row>> {
        self.ensure_connected()?;
        if !self.behavior.query_delay.is_zero() {
            thread::sleep(self.behavior.query_delay);
        }
        if self.behavior.fail_query.as_deref() == Some(text) {
            return Err(BenchError::Backend(format!("query failed: {text}")));
        }
        let run = self.state.queries_run.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.behavior.cancel_after_queries {
            if run >= *after {
                token.cancel();
            }
        }
        let count = self.state.inserted_ids.lock().unwrap().len();
        Ok(vec![vec![Value::Integer(count as i64)]])
    }

    fn insert_batch(&mut self, records: &[Record]) -> BenchResult<()> {
        self.ensure_connected()?;
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.behavior.insert_delay.is_zero() {
            thread::sleep(self.behavior.insert_delay);
        }
        if let Some((id, stall)) = self.behavior.stall_insert {
            if records.iter().any(|r| r.id == id) {
                thread::sleep(stall);
            }
        }

        let result = match self.behavior.fail_insert_id {
            Some(bad) if records.iter().any(|r| r.id == bad) => {
                Err(BenchError::Backend(format!("constraint violation on id {bad}")))
            }
            _ => {
                let mut ids = self.state.inserted_ids.lock().unwrap();
                ids.extend(records.iter().map(|r| r.id));
                Ok(())
            }
        };

        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn create_table(&mut self) -> BenchResult<()> {
        self.ensure_connected()?;
        self.log_ddl("create");
        self.state.table_exists.store(true, Ordering::SeqCst);
        self.state.indexed.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn create_table_with_index(&mut self) -> BenchResult<()> {
        self.ensure_connected()?;
        self.log_ddl("create_with_index");
        self.state.table_exists.store(true, Ordering::SeqCst);
        self.state.indexed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn drop_table(&mut self) -> BenchResult<()> {
        self.ensure_connected()?;
        self.log_ddl("drop");
        self.state.table_exists.store(false, Ordering::SeqCst);
        self.state.inserted_ids.lock().unwrap().clear();
        Ok(())
    }

    fn ensure_database_exists(&mut self) -> BenchResult<()> {
        self.ensure_connected()?;
        self.log_ddl("ensure_database");
        Ok(())
    }
}

pub struct MemoryFactory {
    id: String,
    state: Arc<MemoryState>,
    behavior: Behavior,
    queries: Vec<QueryDescriptor>,
    shardable: bool,
}

impl MemoryFactory {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: Arc::new(MemoryState::default()),
            behavior: Behavior::default(),
            queries: vec![
                QueryDescriptor::new("count_all", "SELECT COUNT(*) FROM records"),
                QueryDescriptor::new("sum_amount", "SELECT SUM(amount) FROM records"),
            ],
            shardable: false,
        }
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_queries(mut self, queries: Vec<QueryDescriptor>) -> Self {
        self.queries = queries;
        self
    }

    pub fn shardable(mut self) -> Self {
        self.shardable = true;
        self
    }

    pub fn state(&self) -> Arc<MemoryState> {
        Arc::clone(&self.state)
    }
}

impl BackendFactory for MemoryFactory {
    fn id(&self) -> &str {
        &self.id
    }

    fn supports_sharding(&self) -> bool {
        self.shardable
    }

    fn benchmark_queries(&self) -> Vec<QueryDescriptor> {
        self.queries.clone()
    }

    fn create(&self) -> Box<dyn Backend> {
        Box::new(MemoryBackend {
            id: self.id.clone(),
            state: Arc::clone(&self.state),
            behavior: self.behavior.clone(),
            connected: false,
        })
    }
}

/// A finished single-query result for `sqlite/index/<row_count>`.
pub fn sample_result(row_count: u64) -> ConfigurationResult {
    let passes = vec![vec![QueryResult {
        name: "count_all".into(),
        duration_ms: 1.25,
        row_count: 1,
    }]];
    ConfigurationResult {
        configuration: TestConfiguration::new("sqlite", true, row_count),
        query_names: vec!["count_all".into()],
        statistics: statistics::reduce(&passes),
        completed_iterations: 1,
        timed_out: false,
        rows_loaded: row_count,
        load_duration_ms: Some(500.0),
    }
}
