//! SQLite backend (via rusqlite).
//!
//! File database in WAL mode. Loader workers each open their own connection
//! to the same file; `busy_timeout` makes concurrent writers queue instead of
//! failing with `SQLITE_BUSY`.

use bench_core::backend::{Backend, BackendFactory};
use bench_core::types::{QueryDescriptor, Record, Row, Value};
use bench_core::{BenchError, BenchResult};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const BACKEND_ID: &str = "sqlite";
pub const TABLE: &str = "bench_records";

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const INSERT_SQL: &str = "INSERT INTO bench_records (id, timestamp, category, amount, quantity, description)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

/// The query set sampled against every SQLite configuration, in order.
pub fn benchmark_queries() -> Vec<QueryDescriptor> {
    vec![
        QueryDescriptor::new("count_all", "SELECT COUNT(*) FROM bench_records"),
        QueryDescriptor::new(
            "filter_amount",
            "SELECT COUNT(*) FROM bench_records WHERE amount > 5000.0",
        ),
        QueryDescriptor::new(
            "group_by_category",
            "SELECT category, COUNT(*), AVG(amount) FROM bench_records GROUP BY category ORDER BY category",
        ),
        QueryDescriptor::new(
            "range_timestamp",
            "SELECT COUNT(*) FROM bench_records WHERE timestamp BETWEEN 1700000000 AND 1702592000",
        ),
        QueryDescriptor::new(
            "top_amounts",
            "SELECT id, amount FROM bench_records ORDER BY amount DESC LIMIT 10",
        ),
        QueryDescriptor::new(
            "category_lookup",
            "SELECT id, amount, quantity FROM bench_records WHERE category = 'books' LIMIT 100",
        ),
    ]
}

pub struct SqliteBackend {
    path: PathBuf,
    conn: Option<Connection>,
}

impl SqliteBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: None,
        }
    }

    fn conn(&mut self) -> BenchResult<&mut Connection> {
        self.conn
            .as_mut()
            .ok_or_else(|| BenchError::Connection(format!("{} is not connected", self.path.display())))
    }

    fn execute_ddl(&mut self, what: &str, sql: &str) -> BenchResult<()> {
        self.conn()?
            .execute_batch(sql)
            .map_err(|e| BenchError::Backend(format!("{what}: {e}")))
    }
}

/// Connection tuning shared by the role connection and every loader worker.
fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -64000;
         PRAGMA temp_store = MEMORY;",
    )
}

fn to_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

impl Backend for SqliteBackend {
    fn id(&self) -> &str {
        BACKEND_ID
    }

    fn connect(&mut self) -> BenchResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)
            .map_err(|e| BenchError::Connection(format!("SQLite open {}: {e}", self.path.display())))?;
        configure_connection(&conn)
            .map_err(|e| BenchError::Connection(format!("SQLite pragma: {e}")))?;
        self.conn = Some(conn);
        Ok(())
    }

    fn disconnect(&mut self) -> BenchResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .map_err(|(_, e)| BenchError::Backend(format!("SQLite close: {e}")))?;
        }
        Ok(())
    }

    fn query(&mut self, text: &str) -> BenchResult<Vec<Row>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached(text)
            .map_err(|e| BenchError::Backend(format!("prepare: {e}")))?;
        let columns = stmt.column_count();
        let mut rows = stmt
            .query([])
            .map_err(|e| BenchError::Backend(format!("query: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| BenchError::Backend(format!("fetch: {e}")))?
        {
            let mut values = Vec::with_capacity(columns);
            for i in 0..columns {
                let value = row
                    .get_ref(i)
                    .map_err(|e| BenchError::Backend(format!("column {i}: {e}")))?;
                values.push(to_value(value));
            }
            out.push(values);
        }
        Ok(out)
    }

    fn insert_batch(&mut self, records: &[Record]) -> BenchResult<()> {
        let conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| BenchError::Backend(format!("begin: {e}")))?;
        {
            let mut stmt = tx
                .prepare_cached(INSERT_SQL)
                .map_err(|e| BenchError::Backend(format!("prepare batch: {e}")))?;
            for r in records {
                stmt.execute(params![
                    r.id as i64,
                    r.timestamp,
                    r.category,
                    r.amount,
                    r.quantity,
                    r.description
                ])
                .map_err(|e| BenchError::Backend(format!("insert id {}: {e}", r.id)))?;
            }
        }
        tx.commit()
            .map_err(|e| BenchError::Backend(format!("commit: {e}")))
    }

    fn create_table(&mut self) -> BenchResult<()> {
        self.execute_ddl(
            "create table",
            "CREATE TABLE IF NOT EXISTS bench_records (
                id          INTEGER PRIMARY KEY,
                timestamp   INTEGER NOT NULL,
                category    TEXT    NOT NULL,
                amount      REAL    NOT NULL,
                quantity    INTEGER NOT NULL,
                description TEXT
            );",
        )
    }

    fn create_table_with_index(&mut self) -> BenchResult<()> {
        self.create_table()?;
        self.execute_ddl(
            "create indexes",
            "CREATE INDEX IF NOT EXISTS idx_bench_records_category  ON bench_records(category);
             CREATE INDEX IF NOT EXISTS idx_bench_records_timestamp ON bench_records(timestamp);
             CREATE INDEX IF NOT EXISTS idx_bench_records_amount    ON bench_records(amount);",
        )
    }

    fn drop_table(&mut self) -> BenchResult<()> {
        self.execute_ddl("drop table", "DROP TABLE IF EXISTS bench_records;")
    }

    /// Opening the file already creates the database, so this only checks
    /// that the schema can be read.
    fn ensure_database_exists(&mut self) -> BenchResult<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| BenchError::Backend(format!("SQLite schema check: {e}")))?;
        Ok(())
    }
}

/// Creates [`SqliteBackend`]s that all point at one database file.
pub struct SqliteFactory {
    path: PathBuf,
}

impl SqliteFactory {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl BackendFactory for SqliteFactory {
    fn id(&self) -> &str {
        BACKEND_ID
    }

    fn benchmark_queries(&self) -> Vec<QueryDescriptor> {
        benchmark_queries()
    }

    fn create(&self) -> Box<dyn Backend> {
        Box::new(SqliteBackend::new(self.path.clone()))
    }
}
