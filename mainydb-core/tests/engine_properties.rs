//! Integration tests for the universal invariants and numbered scenarios.

use std::sync::Arc;
use std::thread;

use mainydb_core::{Engine, EngineOptions, FindOptions, IndexDefinition, Value};
use tempfile::tempdir;

fn fresh_engine() -> (tempfile::TempDir, Engine) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.mdb");
    let engine = Engine::open(path, EngineOptions::default()).unwrap();
    (dir, engine)
}

fn doc(fields: Vec<(&str, Value)>) -> Value {
    Value::Document(fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

#[test]
fn invariant_index_id_set_matches_collection() {
    let (_dir, engine) = fresh_engine();
    let db = engine.database_or_create("app");
    let coll = db.collection_or_create("nums");
    for i in 0..50 {
        coll.insert_one(doc(vec![("n", Value::Int(i))])).unwrap();
    }
    coll.create_index(IndexDefinition {
        name: "n_1".into(),
        keys: vec![("n".to_string(), 1)],
        unique: false,
    })
    .unwrap();

    let all = coll.find(&doc(vec![]), &FindOptions::new()).unwrap();
    assert_eq!(all.len(), 50);

    // every document is reachable through the index via a range covering everything
    let via_index = coll
        .find(&doc(vec![("n", Value::Document(vec![("$gte".into(), Value::Int(i64::MIN))]))]), &FindOptions::new())
        .unwrap();
    assert_eq!(via_index.len(), 50);
}

#[test]
fn invariant_no_duplicate_ids() {
    let (_dir, engine) = fresh_engine();
    let db = engine.database_or_create("app");
    let coll = db.collection_or_create("things");
    let id1 = coll.insert_one(doc(vec![("a", Value::Int(1))])).unwrap();
    let id2 = coll.insert_one(doc(vec![("_id", id1.to_value()), ("a", Value::Int(2))]));
    assert!(id2.is_err());
    let _ = id2;
}

#[test]
fn invariant_no_op_update_leaves_document_byte_equal() {
    let (_dir, engine) = fresh_engine();
    let db = engine.database_or_create("app");
    let coll = db.collection_or_create("things");
    coll.insert_one(doc(vec![("a", Value::Int(1)), ("b", Value::String("x".into()))])).unwrap();

    let before = coll.find_one(&doc(vec![("a", Value::Int(1))])).unwrap().unwrap();
    let update = doc(vec![("$set", doc(vec![("a", Value::Int(1))]))]);
    let outcome = coll.update_one(&doc(vec![("a", Value::Int(1))]), &update, false).unwrap();
    assert_eq!(outcome.matched, 1);
    assert_eq!(outcome.modified, 0);

    let after = coll.find_one(&doc(vec![("a", Value::Int(1))])).unwrap().unwrap();
    assert_eq!(before, after);
}

#[test]
fn invariant_concurrent_increments_sum_correctly() {
    let (_dir, engine) = fresh_engine();
    let db = engine.database_or_create("app");
    let coll = db.collection_or_create("counters");
    let id = coll.insert_one(doc(vec![("v", Value::Int(0))])).unwrap();

    let threads = 8;
    let per_thread = 50;
    let filter_value = id.to_value();

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let coll = Arc::clone(&coll);
            let filter_value = filter_value.clone();
            thread::spawn(move || {
                for _ in 0..per_thread {
                    let filter = doc(vec![("_id", filter_value.clone())]);
                    let update = doc(vec![("$inc", doc(vec![("v", Value::Int(1))]))]);
                    coll.update_one(&filter, &update, false).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let result = coll.find_one(&doc(vec![("_id", filter_value)])).unwrap().unwrap();
    let v = match result.as_document().unwrap().iter().find(|(k, _)| k == "v").unwrap().1.clone() {
        Value::Int(i) => i,
        other => panic!("expected int, got {:?}", other),
    };
    assert_eq!(v, (threads * per_thread) as i64);
}

#[test]
fn scenario_1_insert_equality_find() {
    let (_dir, engine) = fresh_engine();
    let db = engine.database_or_create("app");
    let coll = db.collection_or_create("people");
    coll.insert_one(doc(vec![("name", Value::String("John".into())), ("age", Value::Int(30))])).unwrap();
    coll.insert_one(doc(vec![("name", Value::String("Jane".into())), ("age", Value::Int(25))])).unwrap();

    let filter = doc(vec![("age", doc(vec![("$gt", Value::Int(27))]))]);
    let results = coll.find(&filter, &FindOptions::new()).unwrap();
    assert_eq!(results.len(), 1);
}

#[test]
fn scenario_2_index_range_sort_no_full_scan() {
    let (_dir, engine) = fresh_engine();
    let db = engine.database_or_create("app");
    let coll = db.collection_or_create("nums");
    for i in 0..100 {
        coll.insert_one(doc(vec![("n", Value::Int(i))])).unwrap();
    }
    coll.create_index(IndexDefinition { name: "n_1".into(), keys: vec![("n".to_string(), 1)], unique: false }).unwrap();

    let filter = doc(vec![("n", doc(vec![("$gte", Value::Int(10)), ("$lt", Value::Int(15))]))]);
    let explanation = coll.explain(&filter);
    assert_eq!(explanation.strategy, "IndexScan");

    let opts = FindOptions::new().sort(vec![("n".to_string(), 1)]);
    let results = coll.find(&filter, &opts).unwrap();
    assert_eq!(results.len(), 5);
}

#[test]
fn scenario_3_update_operator_combo() {
    let (_dir, engine) = fresh_engine();
    let db = engine.database_or_create("app");
    let coll = db.collection_or_create("widgets");
    coll.insert_one(doc(vec![
        ("a", Value::Int(1)),
        ("b", Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)])),
        ("c", doc(vec![("x", Value::Int(0))])),
    ]))
    .unwrap();

    let update = doc(vec![
        ("$inc", doc(vec![("a", Value::Int(2))])),
        ("$push", doc(vec![("b", Value::Int(4))])),
        ("$set", doc(vec![("c.y", Value::Int(9))])),
        ("$unset", doc(vec![("c.x", Value::String("".into()))])),
    ]);
    coll.update_one(&doc(vec![]), &update, false).unwrap();

    let result = coll.find_one(&doc(vec![])).unwrap().unwrap();
    let fields = result.as_document().unwrap();
    assert!(fields.iter().any(|(k, v)| k == "a" && *v == Value::Int(3)));
}

#[test]
fn scenario_4_aggregation_group_and_sort() {
    let (_dir, engine) = fresh_engine();
    let db = engine.database_or_create("app");
    let coll = db.collection_or_create("items");
    coll.insert_one(doc(vec![("cat", Value::String("A".into())), ("v", Value::Int(1))])).unwrap();
    coll.insert_one(doc(vec![("cat", Value::String("A".into())), ("v", Value::Int(3))])).unwrap();
    coll.insert_one(doc(vec![("cat", Value::String("B".into())), ("v", Value::Int(2))])).unwrap();

    let pipeline = vec![
        doc(vec![(
            "$group",
            doc(vec![
                ("_id", Value::String("$cat".into())),
                ("s", doc(vec![("$sum", Value::String("$v".into()))])),
                ("n", doc(vec![("$sum", Value::Int(1))])),
            ]),
        )]),
        doc(vec![("$sort", doc(vec![("_id", Value::Int(1))]))]),
    ];
    let out = coll.aggregate(&pipeline, &*db).unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(out[0], doc(vec![("_id", Value::String("A".into())), ("s", Value::Int(4)), ("n", Value::Int(2))]));
    assert_eq!(out[1], doc(vec![("_id", Value::String("B".into())), ("s", Value::Int(2)), ("n", Value::Int(1))]));
}

#[test]
fn scenario_5_unique_index_violation() {
    let (_dir, engine) = fresh_engine();
    let db = engine.database_or_create("app");
    let coll = db.collection_or_create("users");
    coll.create_index(IndexDefinition { name: "email_1".into(), keys: vec![("email".to_string(), 1)], unique: true }).unwrap();
    coll.insert_one(doc(vec![("email", Value::String("a@x".into()))])).unwrap();
    let second = coll.insert_one(doc(vec![("email", Value::String("a@x".into()))]));
    assert!(second.is_err());
    assert_eq!(coll.count_documents(&doc(vec![])).unwrap(), 1);
}

#[test]
fn scenario_6_upsert_inserts_seed_document() {
    let (_dir, engine) = fresh_engine();
    let db = engine.database_or_create("app");
    let coll = db.collection_or_create("people");
    let filter = doc(vec![("name", Value::String("Z".into()))]);
    let update = doc(vec![("$set", doc(vec![("age", Value::Int(1))]))]);
    let outcome = coll.update_one(&filter, &update, true).unwrap();
    assert!(outcome.upserted_id.is_some());

    let found = coll.find_one(&filter).unwrap().unwrap();
    let fields = found.as_document().unwrap();
    assert!(fields.iter().any(|(k, v)| k == "name" && *v == Value::String("Z".into())));
    assert!(fields.iter().any(|(k, v)| k == "age" && *v == Value::Int(1)));
}

#[test]
fn scenario_7_crash_atomicity_truncated_checkpoint() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("crash.mdb");

    {
        let engine = Engine::open(&path, EngineOptions::default()).unwrap();
        let db = engine.database_or_create("app");
        let coll = db.collection_or_create("bulk");
        for i in 0..500 {
            coll.insert_one(doc(vec![("n", Value::Int(i))])).unwrap();
        }
        engine.checkpoint().unwrap();
    }

    let good_copy = std::fs::read(&path).unwrap();

    // truncate after the 16-byte header to simulate a crash mid-write
    let truncated: Vec<u8> = good_copy[..16].to_vec();
    std::fs::write(&path, &truncated).unwrap();
    assert!(Engine::open(&path, EngineOptions::default()).is_err());

    // restoring the pre-truncation file yields exactly 500 docs
    std::fs::write(&path, &good_copy).unwrap();
    let engine2 = Engine::open(&path, EngineOptions::default()).unwrap();
    let db2 = engine2.database("app").unwrap();
    let coll2 = db2.collection("bulk").unwrap();
    assert_eq!(coll2.count_documents(&doc(vec![])).unwrap(), 500);
}

#[test]
fn cursor_snapshot_skips_post_creation_inserts_and_deletes() {
    let (_dir, engine) = fresh_engine();
    let db = engine.database_or_create("app");
    let coll = db.collection_or_create("snap");
    for i in 0..10 {
        coll.insert_one(doc(vec![("n", Value::Int(i))])).unwrap();
    }

    // snapshot the matching id set "at creation" by collecting eagerly
    let snapshot = coll.find(&doc(vec![]), &FindOptions::new()).unwrap();
    assert_eq!(snapshot.len(), 10);

    coll.insert_one(doc(vec![("n", Value::Int(99))])).unwrap();
    coll.delete_one(&doc(vec![("n", Value::Int(0))])).unwrap();

    // the already-materialized snapshot is unaffected by subsequent writes
    assert_eq!(snapshot.len(), 10);
    assert_eq!(coll.count_documents(&doc(vec![])).unwrap(), 10);
}
