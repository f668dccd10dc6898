// src/collection.rs
//! Collection API (§4.8): the public surface callers actually use.
//!
//! Grounded on the teacher's `CollectionCore` method set (`insert_one`,
//! `find`, `update_one`, `bulk_write`, ...); the per-collection
//! `parking_lot::RwLock` here plays the role of the teacher's lock plus its
//! now-dropped transaction coordinator — readers share, writers exclude,
//! matching §5's two-level hierarchy with the collection as the inner level.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::aggregation::{run_pipeline, LookupSource};
use crate::cursor::{CancelToken, Cursor};
use crate::database::CollectionData;
use crate::document::{get_value_path, Document, DocumentId};
use crate::error::{MainyDbError, Result};
use crate::find_options::{apply_projection, apply_sort, FindOptions};
use crate::index::{IndexDefinition, IndexManager};
use crate::query::operators::matches_filter_value;
use crate::query_cache::{hash_filter, QueryCache};
use crate::query_planner::{plan_query, sort_pushdown_possible, QueryPlan, QueryPlanExplanation};
use crate::update::apply_update;
use crate::value::{OrderedValue, Value};

const DEFAULT_CACHE_CAPACITY: usize = 1000;

struct CollectionState {
    docs: BTreeMap<DocumentId, Document>,
    indexes: IndexManager,
    options: Value,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<DocumentId>,
    pub errors: Vec<(usize, String)>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct UpdateSummary {
    pub matched: u64,
    pub modified: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<DocumentId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub document_count: usize,
    pub index_count: usize,
}

/// One operation inside a `bulk_write` batch.
pub enum BulkOp {
    InsertOne(Value),
    UpdateOne { filter: Value, update: Value, upsert: bool },
    UpdateMany { filter: Value, update: Value },
    ReplaceOne { filter: Value, replacement: Value, upsert: bool },
    DeleteOne(Value),
    DeleteMany(Value),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkWriteResult {
    pub inserted: u64,
    pub matched: u64,
    pub modified: u64,
    pub deleted: u64,
    pub upserted_ids: Vec<DocumentId>,
    pub errors: Vec<(usize, String)>,
}

pub struct Collection {
    name: RwLock<String>,
    state: RwLock<CollectionState>,
    cache: QueryCache,
    op_counter: AtomicU64,
}

impl Collection {
    pub fn new(name: String) -> Self {
        Collection {
            name: RwLock::new(name),
            state: RwLock::new(CollectionState {
                docs: BTreeMap::new(),
                indexes: IndexManager::new(),
                options: Value::Document(Vec::new()),
            }),
            cache: QueryCache::new(DEFAULT_CACHE_CAPACITY),
            op_counter: AtomicU64::new(0),
        }
    }

    pub fn from_data(name: String, data: CollectionData) -> Result<Self> {
        let docs: Vec<Document> = data.docs;
        let mut indexes = IndexManager::new();
        for def in data.indexes {
            indexes.create_index(def, &docs)?;
        }
        let mut map = BTreeMap::new();
        for doc in docs {
            map.insert(doc.id.clone(), doc);
        }
        Ok(Collection {
            name: RwLock::new(name),
            state: RwLock::new(CollectionState {
                docs: map,
                indexes,
                options: data.options,
            }),
            cache: QueryCache::new(DEFAULT_CACHE_CAPACITY),
            op_counter: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn rename(&self, new_name: String) {
        *self.name.write() = new_name;
    }

    pub fn snapshot(&self) -> CollectionData {
        let guard = self.state.read();
        CollectionData {
            options: guard.options.clone(),
            docs: guard.docs.values().cloned().collect(),
            indexes: guard.indexes.definitions(),
        }
    }

    // -- inserts ---------------------------------------------------------

    fn value_to_new_document(value: &Value) -> Result<Document> {
        let fields = value
            .as_document()
            .ok_or_else(|| MainyDbError::BadUpdate("document to insert must be an object".into()))?;
        let id = fields
            .iter()
            .find(|(k, _)| k == "_id")
            .and_then(|(_, v)| DocumentId::from_value(v))
            .unwrap_or_else(DocumentId::new_object_id);
        let rest: Vec<(String, Value)> = fields.iter().filter(|(k, _)| k != "_id").cloned().collect();
        Ok(Document::new(id, rest))
    }

    pub fn insert_one(&self, value: Value) -> Result<DocumentId> {
        let doc = Self::value_to_new_document(&value)?;
        let mut guard = self.state.write();
        if guard.docs.contains_key(&doc.id) {
            return Err(MainyDbError::DuplicateKey {
                index: "_id_".into(),
                key: doc.id.to_string(),
            });
        }
        guard.indexes.insert_doc(&doc)?;
        let id = doc.id.clone();
        guard.docs.insert(doc.id.clone(), doc);
        drop(guard);
        self.cache.invalidate_all();
        self.op_counter.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    pub fn insert_many(&self, values: Vec<Value>, ordered: bool) -> Result<InsertManyResult> {
        let mut result = InsertManyResult::default();
        for (i, value) in values.into_iter().enumerate() {
            match self.insert_one(value) {
                Ok(id) => result.inserted_ids.push(id),
                Err(e) => {
                    result.errors.push((i, e.to_string()));
                    if ordered {
                        break;
                    }
                }
            }
        }
        Ok(result)
    }

    // -- reads -------------------------------------------------------------

    fn plan_and_collect(&self, filter: &Value) -> Result<Vec<Document>> {
        let guard = self.state.read();
        let plan = plan_query(filter, &guard.indexes);
        let docs = match &plan {
            QueryPlan::IndexScan { ids, .. } => {
                let mut out = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(doc) = guard.docs.get(id) {
                        if matches_filter_value(&doc.to_value(), filter)? {
                            out.push(doc.clone());
                        }
                    }
                }
                out
            }
            QueryPlan::FullScan => {
                let mut out = Vec::new();
                for doc in guard.docs.values() {
                    if matches_filter_value(&doc.to_value(), filter)? {
                        out.push(doc.clone());
                    }
                }
                out
            }
        };
        Ok(docs)
    }

    /// Resolve `id` against the live document map under a short read lock
    /// (§5's cursor semantics: yield-time content, not snapshot-time).
    pub(crate) fn document_by_id(&self, id: &DocumentId) -> Option<Value> {
        self.state.read().docs.get(id).map(Document::to_value)
    }

    /// Plan, sort, skip, and limit to get the final id order, then hand out
    /// a lazy `Cursor` over it. Sorting needs each candidate's content, so
    /// that ordering is computed once here from a snapshot read; each
    /// subsequent `next()` still re-resolves the live document (§5).
    pub fn find_cursor(&self, filter: &Value, options: &FindOptions, cancel: CancelToken) -> Result<Cursor<'_>> {
        let hash = hash_filter(filter);
        let docs = if let Some(ids) = self.cache.get(hash) {
            let guard = self.state.read();
            ids.into_iter().filter_map(|id| guard.docs.get(&id).cloned()).collect()
        } else {
            let docs = self.plan_and_collect(filter)?;
            self.cache.put(hash, docs.iter().map(|d| d.id.clone()).collect());
            docs
        };

        let mut values: Vec<Value> = docs.iter().map(Document::to_value).collect();
        apply_sort(&mut values, &options.sort);
        let values = values.into_iter().skip(options.skip);
        let values: Vec<Value> = match options.limit {
            Some(n) => values.take(n).collect(),
            None => values.collect(),
        };
        let ids: Vec<DocumentId> = values
            .iter()
            .filter_map(|v| v.as_document().and_then(|fields| fields.iter().find(|(k, _)| k == "_id")).and_then(|(_, v)| DocumentId::from_value(v)))
            .collect();
        Ok(Cursor::new(self, ids, options.projection.clone(), cancel))
    }

    pub fn find(&self, filter: &Value, options: &FindOptions) -> Result<Vec<Value>> {
        self.find_cursor(filter, options, CancelToken::new())?.collect()
    }

    pub fn find_one(&self, filter: &Value) -> Result<Option<Value>> {
        let opts = FindOptions::new().limit(1);
        Ok(self.find(filter, &opts)?.into_iter().next())
    }

    pub fn explain(&self, filter: &Value) -> QueryPlanExplanation {
        let guard = self.state.read();
        plan_query(filter, &guard.indexes).explain()
    }

    pub fn count_documents(&self, filter: &Value) -> Result<u64> {
        Ok(self.plan_and_collect(filter)?.len() as u64)
    }

    pub fn distinct(&self, field: &str, filter: &Value) -> Result<Vec<Value>> {
        let docs = self.plan_and_collect(filter)?;
        let mut seen: Vec<OrderedValue> = Vec::new();
        let mut out = Vec::new();
        for doc in &docs {
            let value = doc.to_value();
            let found = get_value_path(&value, field);
            let candidates: Vec<Value> = match found {
                Some(Value::Array(items)) => items.clone(),
                Some(other) => vec![other.clone()],
                None => continue,
            };
            for v in candidates {
                let key = OrderedValue(v.clone());
                if !seen.contains(&key) {
                    seen.push(key);
                    out.push(v);
                }
            }
        }
        Ok(out)
    }

    // -- updates -----------------------------------------------------------

    fn seed_from_equality_filter(filter: &Value) -> Document {
        let mut fields = Vec::new();
        if let Some(filter_fields) = filter.as_document() {
            for (k, v) in filter_fields {
                if k.starts_with('$') {
                    continue;
                }
                match v {
                    Value::Document(ops) if !ops.is_empty() && ops.iter().all(|(op, _)| op.starts_with('$')) => {
                        if let Some((_, eq_val)) = ops.iter().find(|(op, _)| op == "$eq") {
                            fields.push((k.clone(), eq_val.clone()));
                        }
                    }
                    literal => fields.push((k.clone(), literal.clone())),
                }
            }
        }
        let id = fields
            .iter()
            .position(|(k, _)| k == "_id")
            .map(|i| fields.remove(i))
            .and_then(|(_, v)| DocumentId::from_value(&v))
            .unwrap_or_else(DocumentId::new_object_id);
        Document::new(id, fields)
    }

    pub fn update_one(&self, filter: &Value, update: &Value, upsert: bool) -> Result<UpdateOutcome> {
        let mut guard = self.state.write();
        let target_id = {
            let mut found = None;
            for (id, doc) in guard.docs.iter() {
                if matches_filter_value(&doc.to_value(), filter)? {
                    found = Some(id.clone());
                    break;
                }
            }
            found
        };

        let Some(id) = target_id else {
            if !upsert {
                return Ok(UpdateOutcome::default());
            }
            let mut seed = Self::seed_from_equality_filter(filter);
            apply_update(&mut seed, update)?;
            guard.indexes.insert_doc(&seed)?;
            let new_id = seed.id.clone();
            guard.docs.insert(seed.id.clone(), seed);
            drop(guard);
            self.cache.invalidate_all();
            self.op_counter.fetch_add(1, Ordering::Relaxed);
            return Ok(UpdateOutcome {
                matched: 0,
                modified: 0,
                upserted_id: Some(new_id),
            });
        };

        let old = guard.docs.get(&id).unwrap().clone();
        let mut new_doc = old.clone();
        let outcome = apply_update(&mut new_doc, update)?;
        if outcome.modified {
            guard.indexes.update_doc(&old, &new_doc)?;
            guard.docs.insert(id, new_doc);
        }
        drop(guard);
        if outcome.modified {
            self.cache.invalidate_all();
        }
        self.op_counter.fetch_add(1, Ordering::Relaxed);
        Ok(UpdateOutcome {
            matched: 1,
            modified: if outcome.modified { 1 } else { 0 },
            upserted_id: None,
        })
    }

    pub fn update_many(&self, filter: &Value, update: &Value) -> Result<UpdateSummary> {
        let mut guard = self.state.write();
        let ids: Vec<DocumentId> = guard
            .docs
            .iter()
            .filter(|(_, doc)| matches_filter_value(&doc.to_value(), filter).unwrap_or(false))
            .map(|(id, _)| id.clone())
            .collect();

        let mut summary = UpdateSummary::default();
        for id in ids {
            let old = guard.docs.get(&id).unwrap().clone();
            let mut new_doc = old.clone();
            let outcome = apply_update(&mut new_doc, update)?;
            summary.matched += 1;
            if outcome.modified {
                guard.indexes.update_doc(&old, &new_doc)?;
                guard.docs.insert(id, new_doc);
                summary.modified += 1;
            }
        }
        drop(guard);
        if summary.modified > 0 {
            self.cache.invalidate_all();
        }
        self.op_counter.fetch_add(1, Ordering::Relaxed);
        Ok(summary)
    }

    pub fn replace_one(&self, filter: &Value, replacement: Value, upsert: bool) -> Result<UpdateOutcome> {
        let wrapped = Value::Document(vec![("$set".into(), replacement_without_id(&replacement)?)]);
        self.update_one(filter, &wrapped, upsert)
    }

    // -- deletes -------------------------------------------------------------

    pub fn delete_one(&self, filter: &Value) -> Result<u64> {
        let mut guard = self.state.write();
        let target = guard
            .docs
            .iter()
            .find(|(_, doc)| matches_filter_value(&doc.to_value(), filter).unwrap_or(false))
            .map(|(id, _)| id.clone());
        let Some(id) = target else { return Ok(0) };
        if let Some(doc) = guard.docs.remove(&id) {
            guard.indexes.remove_doc(&doc);
        }
        drop(guard);
        self.cache.invalidate_all();
        self.op_counter.fetch_add(1, Ordering::Relaxed);
        Ok(1)
    }

    pub fn delete_many(&self, filter: &Value) -> Result<u64> {
        let mut guard = self.state.write();
        let ids: Vec<DocumentId> = guard
            .docs
            .iter()
            .filter(|(_, doc)| matches_filter_value(&doc.to_value(), filter).unwrap_or(false))
            .map(|(id, _)| id.clone())
            .collect();
        let count = ids.len() as u64;
        for id in ids {
            if let Some(doc) = guard.docs.remove(&id) {
                guard.indexes.remove_doc(&doc);
            }
        }
        drop(guard);
        if count > 0 {
            self.cache.invalidate_all();
        }
        self.op_counter.fetch_add(1, Ordering::Relaxed);
        Ok(count)
    }

    // -- bulk ------------------------------------------------------------

    pub fn bulk_write(&self, ops: Vec<BulkOp>, ordered: bool) -> Result<BulkWriteResult> {
        let mut result = BulkWriteResult::default();
        for (i, op) in ops.into_iter().enumerate() {
            let outcome: Result<()> = (|| {
                match op {
                    BulkOp::InsertOne(v) => {
                        self.insert_one(v)?;
                        result.inserted += 1;
                    }
                    BulkOp::UpdateOne { filter, update, upsert } => {
                        let o = self.update_one(&filter, &update, upsert)?;
                        result.matched += o.matched;
                        result.modified += o.modified;
                        if let Some(id) = o.upserted_id {
                            result.upserted_ids.push(id);
                        }
                    }
                    BulkOp::UpdateMany { filter, update } => {
                        let o = self.update_many(&filter, &update)?;
                        result.matched += o.matched;
                        result.modified += o.modified;
                    }
                    BulkOp::ReplaceOne { filter, replacement, upsert } => {
                        let o = self.replace_one(&filter, replacement, upsert)?;
                        result.matched += o.matched;
                        result.modified += o.modified;
                        if let Some(id) = o.upserted_id {
                            result.upserted_ids.push(id);
                        }
                    }
                    BulkOp::DeleteOne(filter) => {
                        result.deleted += self.delete_one(&filter)?;
                    }
                    BulkOp::DeleteMany(filter) => {
                        result.deleted += self.delete_many(&filter)?;
                    }
                }
                Ok(())
            })();
            if let Err(e) = outcome {
                result.errors.push((i, e.to_string()));
                if ordered {
                    break;
                }
            }
        }
        Ok(result)
    }

    // -- aggregation -------------------------------------------------------

    pub fn aggregate(&self, pipeline: &[Value], lookup: &dyn LookupSource) -> Result<Vec<Value>> {
        self.aggregate_cancellable(pipeline, lookup, CancelToken::new())
    }

    /// Run `pipeline`, checking `cancel` between stage boundaries and
    /// periodically within blocking stages (§5). A caller on another thread
    /// can call `cancel.cancel()` to abort a long-running aggregation.
    pub fn aggregate_cancellable(&self, pipeline: &[Value], lookup: &dyn LookupSource, cancel: CancelToken) -> Result<Vec<Value>> {
        let guard = self.state.read();
        let docs: Vec<Value> = guard.docs.values().map(Document::to_value).collect();
        drop(guard);
        run_pipeline(Box::new(docs.into_iter()), pipeline, lookup, &cancel)
    }

    pub fn documents_as_values(&self) -> Vec<Value> {
        self.state.read().docs.values().map(Document::to_value).collect()
    }

    // -- indexes -------------------------------------------------------------

    pub fn create_index(&self, def: IndexDefinition) -> Result<()> {
        let mut guard = self.state.write();
        let docs: Vec<Document> = guard.docs.values().cloned().collect();
        guard.indexes.create_index(def, &docs)
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.state.write().indexes.drop_index(name)
    }

    pub fn drop_indexes(&self) -> Result<()> {
        let mut guard = self.state.write();
        for def in guard.indexes.definitions() {
            guard.indexes.drop_index(&def.name)?;
        }
        Ok(())
    }

    pub fn index_names(&self) -> Vec<String> {
        self.state.read().indexes.list().into_iter().map(|d| d.name.clone()).collect()
    }

    pub fn supports_sort_pushdown(&self, filter: &Value, sort_keys: &[(String, i32)]) -> bool {
        let guard = self.state.read();
        let plan = plan_query(filter, &guard.indexes);
        sort_pushdown_possible(&plan, sort_keys, &guard.indexes)
    }

    pub fn stats(&self) -> Stats {
        let guard = self.state.read();
        Stats {
            document_count: guard.docs.len(),
            index_count: guard.indexes.list().len(),
        }
    }
}

fn replacement_without_id(replacement: &Value) -> Result<Value> {
    let fields = replacement
        .as_document()
        .ok_or_else(|| MainyDbError::BadUpdate("replacement must be an object".into()))?;
    if fields.iter().any(|(k, _)| k == "_id") {
        return Err(MainyDbError::BadUpdate("_id is immutable".into()));
    }
    Ok(replacement.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoLookup;
    impl LookupSource for NoLookup {
        fn documents_in(&self, _collection: &str) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn scenario_1_insert_and_find() {
        let coll = Collection::new("people".into());
        coll.insert_one(Value::Document(vec![("name".into(), Value::String("John".into())), ("age".into(), Value::Int(30))])).unwrap();
        coll.insert_one(Value::Document(vec![("name".into(), Value::String("Jane".into())), ("age".into(), Value::Int(25))])).unwrap();

        let filter = Value::Document(vec![("age".into(), Value::Document(vec![("$gt".into(), Value::Int(27))]))]);
        let results = coll.find(&filter, &FindOptions::new()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(get_value_path(&results[0], "name"), Some(&Value::String("John".into())));
    }

    #[test]
    fn scenario_2_index_range_sort() {
        let coll = Collection::new("nums".into());
        for i in 0..100 {
            coll.insert_one(Value::Document(vec![("n".into(), Value::Int(i))])).unwrap();
        }
        coll.create_index(IndexDefinition { name: "n_1".into(), keys: vec![("n".into(), 1)], unique: false }).unwrap();

        let filter = Value::Document(vec![(
            "n".into(),
            Value::Document(vec![("$gte".into(), Value::Int(10)), ("$lt".into(), Value::Int(15))]),
        )]);
        let opts = FindOptions::new().sort(vec![("n".to_string(), 1)]);
        let results = coll.find(&filter, &opts).unwrap();
        let ns: Vec<i64> = results
            .iter()
            .map(|d| match get_value_path(d, "n") {
                Some(Value::Int(i)) => *i,
                _ => panic!(),
            })
            .collect();
        assert_eq!(ns, vec![10, 11, 12, 13, 14]);

        let explanation = coll.explain(&filter);
        assert_eq!(explanation.strategy, "IndexScan");
    }

    #[test]
    fn scenario_5_unique_index_violation() {
        let coll = Collection::new("users".into());
        coll.create_index(IndexDefinition { name: "email_1".into(), keys: vec![("email".into(), 1)], unique: true }).unwrap();
        coll.insert_one(Value::Document(vec![("email".into(), Value::String("a@x".into()))])).unwrap();
        let second = coll.insert_one(Value::Document(vec![("email".into(), Value::String("a@x".into()))]));
        assert!(second.is_err());
        assert_eq!(coll.count_documents(&Value::Document(vec![])).unwrap(), 1);
    }

    #[test]
    fn scenario_6_upsert() {
        let coll = Collection::new("people".into());
        let filter = Value::Document(vec![("name".into(), Value::String("Z".into()))]);
        let update = Value::Document(vec![("$set".into(), Value::Document(vec![("age".into(), Value::Int(1))]))]);
        let outcome = coll.update_one(&filter, &update, true).unwrap();
        assert!(outcome.upserted_id.is_some());
        let found = coll.find_one(&filter).unwrap().unwrap();
        assert_eq!(get_value_path(&found, "age"), Some(&Value::Int(1)));
    }

    #[test]
    fn no_op_update_reports_zero_modified() {
        let coll = Collection::new("people".into());
        coll.insert_one(Value::Document(vec![("a".into(), Value::Int(1))])).unwrap();
        let filter = Value::Document(vec![("a".into(), Value::Int(1))]);
        let update = Value::Document(vec![("$set".into(), Value::Document(vec![("a".into(), Value::Int(1))]))]);
        let outcome = coll.update_one(&filter, &update, false).unwrap();
        assert_eq!(outcome.matched, 1);
        assert_eq!(outcome.modified, 0);
    }

    #[test]
    fn aggregate_runs_pipeline() {
        let coll = Collection::new("items".into());
        coll.insert_one(Value::Document(vec![("cat".into(), Value::String("A".into())), ("v".into(), Value::Int(1))])).unwrap();
        coll.insert_one(Value::Document(vec![("cat".into(), Value::String("A".into())), ("v".into(), Value::Int(3))])).unwrap();
        let pipeline = vec![Value::Document(vec![(
            "$group".into(),
            Value::Document(vec![
                ("_id".into(), Value::String("$cat".into())),
                ("s".into(), Value::Document(vec![("$sum".into(), Value::String("$v".into()))])),
            ]),
        )])];
        let out = coll.aggregate(&pipeline, &NoLookup).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(get_value_path(&out[0], "s"), Some(&Value::Int(4)));
    }
}
