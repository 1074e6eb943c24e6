//! Data model shared by the planner, loader, sampler and checkpoint store.

mod configuration;
mod query;
mod record;

pub use configuration::{TestConfiguration, TestType};
pub use query::{QueryDescriptor, QueryResult, Row, Value};
pub use record::Record;
