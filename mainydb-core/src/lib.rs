// src/lib.rs
// Pure Rust API - embedded document database engine.

#![allow(clippy::too_many_arguments)]
#![allow(clippy::should_implement_trait)]
#![allow(clippy::only_used_in_recursion)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::ptr_arg)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::nonminimal_bool)]
#![allow(clippy::field_reassign_with_default)]
#![allow(clippy::redundant_comparisons)]
#![allow(clippy::result_large_err)]
#![allow(clippy::manual_unwrap_or_default)]
#![allow(clippy::manual_unwrap_or)]
#![allow(clippy::single_match)]
#![cfg_attr(test, allow(dead_code))]
#![cfg_attr(test, allow(unused_variables))]

pub mod aggregation;
pub mod collection;
pub mod cursor;
pub mod database;
pub mod document;
pub mod error;
pub mod find_options;
pub mod hooks;
pub mod index;
pub mod logging;
pub mod options;
pub mod query;
pub mod query_cache;
pub mod query_planner;
pub mod store;
pub mod update;
pub mod value;

pub use aggregation::LookupSource;
pub use collection::{BulkOp, BulkWriteResult, Collection, InsertManyResult, Stats, UpdateOutcome, UpdateSummary};
pub use cursor::{CancelToken, Cursor};
pub use database::{DatabaseHandle, Engine};
pub use document::{Document, DocumentId};
pub use error::{MainyDbError, Result};
pub use find_options::FindOptions;
pub use hooks::{EncryptionHook, MediaHook, MediaValue, NoEncryption, NoMediaHook};
pub use index::{IndexDefinition, IndexManager};
pub use logging::{get_log_level, set_log_level, LogLevel};
pub use options::EngineOptions;
pub use query::Filter;
pub use query_cache::{CacheStats, QueryCache, QueryHash};
pub use query_planner::{QueryPlan, QueryPlanExplanation};
pub use value::{OrderedValue, Value};

/// `DatabaseHandle::collection` / `collection_or_create` return
/// `Arc<Collection>`, so aggregation's `$lookup` can resolve a sibling
/// collection's documents without holding the source collection's lock
/// while doing so (§5's `$lookup` lock-ordering rule).
impl aggregation::LookupSource for DatabaseHandle {
    fn documents_in(&self, collection: &str) -> Result<Vec<Value>> {
        match self.collection(collection) {
            Some(coll) => Ok(coll.documents_as_values()),
            None => Ok(Vec::new()),
        }
    }
}
