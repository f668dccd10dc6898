// src/document.rs
//! The document model and the dotted-path resolver (§3, §4.2).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::{Fields, Value};

/// A document identifier. `_id` is immutable once assigned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentId {
    Int(i64),
    String(String),
    ObjectId(String),
}

impl DocumentId {
    /// Auto-generate a fresh object identifier (128-bit random value
    /// rendered as 32-char hex, §6).
    pub fn new_object_id() -> Self {
        DocumentId::ObjectId(Uuid::new_v4().simple().to_string())
    }

    pub fn to_value(&self) -> Value {
        match self {
            DocumentId::Int(i) => Value::Int(*i),
            DocumentId::String(s) => Value::String(s.clone()),
            DocumentId::ObjectId(s) => Value::ObjectId(s.clone()),
        }
    }

    pub fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Int(i) => Some(DocumentId::Int(*i)),
            Value::String(s) => Some(DocumentId::String(s.clone())),
            Value::ObjectId(s) => Some(DocumentId::ObjectId(s.clone())),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentId::Int(i) => write!(f, "{}", i),
            DocumentId::String(s) => write!(f, "{}", s),
            DocumentId::ObjectId(s) => write!(f, "{}", s),
        }
    }
}

/// A document: `_id` plus an insertion-ordered field list. `_id` is kept out
/// of `fields` so it can never be walked by the path resolver or clobbered
/// by an update operator — both are forbidden by §3/§4.4.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: DocumentId, fields: Fields) -> Self {
        Document { id, fields }
    }

    /// Render as a `Value::Document` with `_id` first, for projection,
    /// aggregation, and equality comparisons that want the whole document.
    pub fn to_value(&self) -> Value {
        let mut out = Vec::with_capacity(self.fields.len() + 1);
        out.push(("_id".to_string(), self.id.to_value()));
        out.extend(self.fields.iter().cloned());
        Value::Document(out)
    }

    /// Read at a dotted path. Returns `None` (the absent marker) when any
    /// segment is missing, distinct from a present `Value::Null`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        if path == "_id" {
            return None; // handled via id field; callers use `get_any`
        }
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.fields.iter().find(|(k, _)| k == first).map(|(_, v)| v)?;
        for seg in segments {
            current = get_segment(current, seg)?;
        }
        Some(current)
    }

    /// Read `_id` or a dotted field path uniformly as a `Value`.
    pub fn get_any(&self, path: &str) -> Option<Value> {
        if path == "_id" {
            return Some(self.id.to_value());
        }
        self.get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get_any(path).is_some()
    }

    /// Write at a dotted path, auto-creating missing intermediate documents
    /// (never arrays). Fails if `_id` is targeted or an intermediate segment
    /// resolves through a non-document, non-array scalar.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), String> {
        if path == "_id" {
            return Err("_id is immutable".to_string());
        }
        let mut segments: Vec<&str> = path.split('.').collect();
        let first = segments.remove(0);
        if segments.is_empty() {
            upsert_field(&mut self.fields, first, value);
            return Ok(());
        }
        let slot = get_or_create_field(&mut self.fields, first);
        set_segment(slot, &segments, value)
    }

    /// Remove the value at a dotted path; no-op if absent.
    pub fn unset(&mut self, path: &str) {
        if path == "_id" {
            return;
        }
        let mut segments: Vec<&str> = path.split('.').collect();
        let first = segments.remove(0);
        if segments.is_empty() {
            self.fields.retain(|(k, _)| k != first);
            return;
        }
        if let Some((_, v)) = self.fields.iter_mut().find(|(k, _)| k == first) {
            unset_segment(v, &segments);
        }
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut Value> {
        if path == "_id" {
            return None;
        }
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.fields.iter_mut().find(|(k, _)| k == first).map(|(_, v)| v)?;
        for seg in segments {
            current = get_segment_mut(current, seg)?;
        }
        Some(current)
    }
}

// ---------------------------------------------------------------------
// Path walking primitives.
//
// Open question (§9) resolved: prefer array-index interpretation when the
// parent is an array, document-key interpretation when the parent is a
// document; never guess across types.
// ---------------------------------------------------------------------

/// Walk a dotted path starting from an arbitrary `Value` (not just a whole
/// `Document`) — used by the predicate engine's `$elemMatch` and by the
/// aggregation expression evaluator, both of which need to resolve paths
/// into values that are not necessarily top-level documents.
pub fn get_value_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for seg in path.split('.') {
        current = get_segment(current, seg)?;
    }
    Some(current)
}

fn get_segment<'a>(value: &'a Value, seg: &str) -> Option<&'a Value> {
    match value {
        Value::Array(items) => {
            let idx: usize = seg.parse().ok()?;
            items.get(idx)
        }
        Value::Document(fields) => fields.iter().find(|(k, _)| k == seg).map(|(_, v)| v),
        _ => None,
    }
}

fn get_segment_mut<'a>(value: &'a mut Value, seg: &str) -> Option<&'a mut Value> {
    match value {
        Value::Array(items) => {
            let idx: usize = seg.parse().ok()?;
            items.get_mut(idx)
        }
        Value::Document(fields) => fields.iter_mut().find(|(k, _)| k == seg).map(|(_, v)| v),
        _ => None,
    }
}

fn upsert_field(fields: &mut Fields, key: &str, value: Value) {
    if let Some((_, slot)) = fields.iter_mut().find(|(k, _)| k == key) {
        *slot = value;
    } else {
        fields.push((key.to_string(), value));
    }
}

fn get_or_create_field<'a>(fields: &'a mut Fields, key: &str) -> &'a mut Value {
    if let Some(pos) = fields.iter().position(|(k, _)| k == key) {
        &mut fields[pos].1
    } else {
        fields.push((key.to_string(), Value::Document(Vec::new())));
        let last = fields.len() - 1;
        &mut fields[last].1
    }
}

fn set_segment(current: &mut Value, segments: &[&str], value: Value) -> Result<(), String> {
    let seg = segments[0];
    let rest = &segments[1..];

    match current {
        Value::Array(items) => {
            let idx: usize = seg
                .parse()
                .map_err(|_| format!("non-numeric path segment '{}' into array", seg))?;
            if idx >= items.len() {
                items.resize(idx + 1, Value::Null);
            }
            if rest.is_empty() {
                items[idx] = value;
                Ok(())
            } else {
                if matches!(items[idx], Value::Null) {
                    items[idx] = Value::Document(Vec::new());
                }
                set_segment(&mut items[idx], rest, value)
            }
        }
        Value::Document(fields) => {
            if rest.is_empty() {
                upsert_field(fields, seg, value);
                Ok(())
            } else {
                let slot = get_or_create_field(fields, seg);
                set_segment(slot, rest, value)
            }
        }
        Value::Null => {
            *current = Value::Document(Vec::new());
            set_segment(current, segments, value)
        }
        other => Err(format!(
            "cannot create path through scalar value of type '{}'",
            other.type_name()
        )),
    }
}

fn unset_segment(current: &mut Value, segments: &[&str]) {
    let seg = segments[0];
    let rest = &segments[1..];
    match current {
        Value::Array(items) => {
            if let Ok(idx) = seg.parse::<usize>() {
                if rest.is_empty() {
                    if idx < items.len() {
                        items[idx] = Value::Null;
                    }
                } else if let Some(v) = items.get_mut(idx) {
                    unset_segment(v, rest);
                }
            }
        }
        Value::Document(fields) => {
            if rest.is_empty() {
                fields.retain(|(k, _)| k != seg);
            } else if let Some((_, v)) = fields.iter_mut().find(|(k, _)| k == seg) {
                unset_segment(v, rest);
            }
        }
        _ => {}
    }
}
