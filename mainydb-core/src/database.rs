// src/database.rs
//! Persisted root shape (§6) plus the live engine that opens a Store and
//! lazily creates databases/collections on first write.
//!
//! Grounded on the teacher's `DatabaseCore<S>`, minus its transaction/WAL
//! recovery branch (dropped with the rest of that subsystem, see DESIGN.md).
//! The root lock here guards only the *set* of open databases/collections;
//! each collection's own data lives behind its own lock in `collection.rs`,
//! matching the two-level hierarchy of §5.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::collection::Collection;
use crate::document::Document;
use crate::error::{MainyDbError, Result};
use crate::index::IndexDefinition;
use crate::options::EngineOptions;
use crate::store::Store;
use crate::value::Value;
use crate::log_info;

/// On-disk shape of one collection (§6): definitions persist, index
/// *entries* are rebuilt from `docs` on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionData {
    pub options: Value,
    pub docs: Vec<Document>,
    pub indexes: Vec<IndexDefinition>,
}

/// On-disk shape of one logical database: a named map of collections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Database {
    pub collections: BTreeMap<String, CollectionData>,
}

/// The file's root shape: `{ v, dbs: { name: Database } }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Root {
    pub v: u32,
    pub databases: BTreeMap<String, Database>,
}

/// Live handle for one logical database: a lock over its collection set.
/// Creating or dropping a collection takes this lock exclusively; looking
/// one up to run an operation takes it only long enough to clone the `Arc`.
pub struct DatabaseHandle {
    collections: RwLock<BTreeMap<String, Arc<Collection>>>,
}

impl DatabaseHandle {
    fn from_data(data: Database) -> Result<Self> {
        let mut collections = BTreeMap::new();
        for (name, coll_data) in data.collections {
            collections.insert(name.clone(), Arc::new(Collection::from_data(name, coll_data)?));
        }
        Ok(DatabaseHandle {
            collections: RwLock::new(collections),
        })
    }

    pub fn collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.read().get(name).cloned()
    }

    /// Lazily create the collection if it does not exist yet.
    pub fn collection_or_create(&self, name: &str) -> Arc<Collection> {
        if let Some(c) = self.collection(name) {
            return c;
        }
        let mut guard = self.collections.write();
        guard
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Collection::new(name.to_string())))
            .clone()
    }

    pub fn drop_collection(&self, name: &str) -> Result<()> {
        self.collections
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| MainyDbError::CollectionNotFound(name.to_string()))
    }

    pub fn rename_collection(&self, from: &str, to: &str) -> Result<()> {
        let mut guard = self.collections.write();
        let coll = guard.remove(from).ok_or_else(|| MainyDbError::CollectionNotFound(from.to_string()))?;
        coll.rename(to.to_string());
        guard.insert(to.to_string(), coll);
        Ok(())
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    fn snapshot(&self) -> Database {
        let guard = self.collections.read();
        let collections = guard.iter().map(|(name, coll)| (name.clone(), coll.snapshot())).collect();
        Database { collections }
    }
}

/// Top-level engine: one opened Store plus the lazily-populated map of
/// logical databases.
pub struct Engine {
    store: Store,
    options: EngineOptions,
    databases: RwLock<BTreeMap<String, Arc<DatabaseHandle>>>,
}

impl Engine {
    pub fn open(path: impl Into<PathBuf>, options: EngineOptions) -> Result<Self> {
        let store = Store::new(path);
        let root = store.load()?;
        let mut databases = BTreeMap::new();
        for (name, data) in root.databases {
            databases.insert(name, Arc::new(DatabaseHandle::from_data(data)?));
        }
        log_info!("engine opened with {} database(s)", databases.len());
        Ok(Engine {
            store,
            options,
            databases: RwLock::new(databases),
        })
    }

    pub fn database(&self, name: &str) -> Option<Arc<DatabaseHandle>> {
        self.databases.read().get(name).cloned()
    }

    pub fn database_or_create(&self, name: &str) -> Arc<DatabaseHandle> {
        if let Some(d) = self.database(name) {
            return d;
        }
        let mut guard = self.databases.write();
        guard
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(DatabaseHandle {
                    collections: RwLock::new(BTreeMap::new()),
                })
            })
            .clone()
    }

    pub fn database_names(&self) -> Vec<String> {
        self.databases.read().keys().cloned().collect()
    }

    /// Checkpoint: take the root lock, then each collection lock in turn
    /// (shared), snapshot, release, and write (§5: "Flush coordination").
    pub fn checkpoint(&self) -> Result<()> {
        let guard = self.databases.read();
        let databases = guard.iter().map(|(name, handle)| (name.clone(), handle.snapshot())).collect();
        let root = Root { v: 1, databases };
        drop(guard);
        self.store.checkpoint(&root)
    }

    pub fn checkpoint_if_due(&self) -> Result<()> {
        if !self.store.checkpoint_due(&self.options) {
            return Ok(());
        }
        self.checkpoint()
    }

    /// Close the engine: a blocking checkpoint, unconditional of the usual
    /// op-count/interval triggers (§4.1's fourth trigger, "explicit close").
    /// Distinct from `checkpoint_if_due`, which only writes when due.
    pub fn close(&self) -> Result<()> {
        self.checkpoint()
    }

    pub fn note_op(&self) {
        self.store.journal.record_op();
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use tempfile::tempdir;

    #[test]
    fn lazy_database_and_collection_creation() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(dir.path().join("t.mdb"), EngineOptions::default()).unwrap();
        assert!(engine.database("app").is_none());
        let db = engine.database_or_create("app");
        let coll = db.collection_or_create("users");
        coll.insert_one(Value::Document(vec![("name".into(), Value::String("a".into()))])).unwrap();
        assert_eq!(coll.count_documents(&Value::Document(vec![])).unwrap(), 1);
    }

    #[test]
    fn checkpoint_then_reopen_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.mdb");
        {
            let engine = Engine::open(&path, EngineOptions::default()).unwrap();
            let db = engine.database_or_create("app");
            let coll = db.collection_or_create("users");
            for i in 0..5 {
                coll.insert_one(Value::Document(vec![("n".into(), Value::Int(i))])).unwrap();
            }
            engine.checkpoint().unwrap();
        }
        let engine2 = Engine::open(&path, EngineOptions::default()).unwrap();
        let db2 = engine2.database("app").unwrap();
        let coll2 = db2.collection("users").unwrap();
        assert_eq!(coll2.count_documents(&Value::Document(vec![])).unwrap(), 5);
    }

    #[test]
    fn close_checkpoints_regardless_of_triggers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.mdb");
        let opts = EngineOptions { checkpoint_ops: u64::MAX, checkpoint_interval_secs: u64::MAX, ..EngineOptions::default() };
        {
            let engine = Engine::open(&path, opts).unwrap();
            let db = engine.database_or_create("app");
            db.collection_or_create("users").insert_one(Value::Document(vec![("n".into(), Value::Int(1))])).unwrap();
            // neither checkpoint trigger is due, but close must still write.
            engine.close().unwrap();
        }
        let engine2 = Engine::open(&path, EngineOptions::default()).unwrap();
        let coll2 = engine2.database("app").unwrap().collection("users").unwrap();
        assert_eq!(coll2.count_documents(&Value::Document(vec![])).unwrap(), 1);
    }
}
