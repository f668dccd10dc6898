// src/cursor.rs
//! Cursors and cooperative cancellation (§5).
//!
//! A `Cursor` snapshots the matching id order once, under a short read lock,
//! at creation time; each call to `next` re-resolves that id against the
//! live document map under its own short read lock, so later updates are
//! observed but later deletes are skipped and later inserts are never seen.
//! `CancelToken` is the caller-held half of the cancel signal: cloning it
//! shares the same flag, so a caller can hold one end and cancel an
//! in-flight cursor (or aggregation) running on another thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::collection::Collection;
use crate::document::DocumentId;
use crate::error::{MainyDbError, Result};
use crate::find_options::apply_projection;
use crate::value::Value;

/// Caller-held cancel signal. Checked between yielded documents by `Cursor`
/// and between pipeline stages (and periodically within blocking stages) by
/// aggregation. Cheap to clone; all clones share one flag.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Lazy iterator over a `find`'s results. The id order (after sort/skip/
/// limit) is fixed at construction; projection, if any, is applied per item
/// at yield time.
pub struct Cursor<'a> {
    collection: &'a Collection,
    ids: std::vec::IntoIter<DocumentId>,
    projection: Option<Value>,
    cancel: CancelToken,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(collection: &'a Collection, ids: Vec<DocumentId>, projection: Option<Value>, cancel: CancelToken) -> Self {
        Cursor {
            collection,
            ids: ids.into_iter(),
            projection,
            cancel,
        }
    }
}

impl<'a> Iterator for Cursor<'a> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cancel.is_cancelled() {
                return Some(Err(MainyDbError::Cancelled));
            }
            let id = self.ids.next()?;
            match self.collection.document_by_id(&id) {
                Some(value) => {
                    let value = match &self.projection {
                        Some(spec) => apply_projection(&value, spec),
                        None => value,
                    };
                    return Some(Ok(value));
                }
                // deleted since the cursor's snapshot: skip without error.
                None => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn cancel_token_stops_iteration() {
        let coll = Collection::new("things".into());
        for i in 0..5 {
            coll.insert_one(Value::Document(vec![("n".into(), Value::Int(i))])).unwrap();
        }
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut cursor = coll.find_cursor(&Value::Document(vec![]), &Default::default(), cancel).unwrap();
        assert!(matches!(cursor.next(), Some(Err(MainyDbError::Cancelled))));
    }

    #[test]
    fn cursor_skips_documents_deleted_after_creation() {
        let coll = Collection::new("things".into());
        for i in 0..3 {
            coll.insert_one(Value::Document(vec![("n".into(), Value::Int(i))])).unwrap();
        }
        let cursor = coll.find_cursor(&Value::Document(vec![]), &Default::default(), CancelToken::new()).unwrap();
        coll.delete_one(&Value::Document(vec![("n".into(), Value::Int(0))])).unwrap();
        let results: Vec<Value> = cursor.filter_map(|r| r.ok()).collect();
        assert_eq!(results.len(), 2);
    }
}
