use serde::{Deserialize, Serialize};
use std::fmt;

/// One (backend, index variant, row count, shard mode) tuple under test.
///
/// Equality is structural. The checkpoint store relies on that to reconcile
/// a persisted run against a freshly planned one.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct TestConfiguration {
    pub backend_id: String,
    pub with_index: bool,
    pub row_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharded: Option<bool>,
}

impl TestConfiguration {
    pub fn new(backend_id: &str, with_index: bool, row_count: u64) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            with_index,
            row_count,
            sharded: None,
        }
    }

    pub fn with_sharding(mut self, sharded: bool) -> Self {
        self.sharded = Some(sharded);
        self
    }

    pub fn is_sharded(&self) -> bool {
        self.sharded.unwrap_or(false)
    }
}

impl fmt::Display for TestConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let index = if self.with_index { "index" } else { "noindex" };
        write!(f, "{}/{}/{}", self.backend_id, index, self.row_count)?;
        match self.sharded {
            Some(true) => write!(f, "/sharded"),
            Some(false) => write!(f, "/single"),
            None => Ok(()),
        }
    }
}

/// Which kind of run a checkpoint belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestType {
    /// Tables are recreated and loaded before every configuration is sampled.
    #[serde(rename = "load")]
    Load,
    /// Data is assumed present; only the sampling phase runs.
    #[serde(rename = "query-only")]
    QueryOnly,
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestType::Load => write!(f, "load"),
            TestType::QueryOnly => write!(f, "query-only"),
        }
    }
}
