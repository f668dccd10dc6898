// src/find_options.rs
//! Cursor-shaping options for `find` (§4.8): projection, sort, skip, limit,
//! applied in that logical order after planning and iteration.

use crate::document::get_value_path;
use crate::value::Value;

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub projection: Option<Value>,
    pub sort: Vec<(String, i32)>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn projection(mut self, spec: Value) -> Self {
        self.projection = Some(spec);
        self
    }

    pub fn sort(mut self, keys: Vec<(String, i32)>) -> Self {
        self.sort = keys;
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }
}

/// Stable sort by the composite key, using the §3 total order per field.
pub fn apply_sort(docs: &mut [Value], keys: &[(String, i32)]) {
    if keys.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for (field, dir) in keys {
            let av = get_value_path(a, field).cloned().unwrap_or(Value::Null);
            let bv = get_value_path(b, field).cloned().unwrap_or(Value::Null);
            let ord = av.cmp_total(&bv);
            let ord = if *dir < 0 { ord.reverse() } else { ord };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Inclusion/exclusion projection over a whole-document `Value` (mirrors
/// `$project`'s literal-only subset: no computed expressions at the find
/// API surface, only field selection).
pub fn apply_projection(doc: &Value, spec: &Value) -> Value {
    let spec_fields = match spec.as_document() {
        Some(f) => f,
        None => return doc.clone(),
    };
    let doc_fields = doc.as_document().cloned().unwrap_or_default();
    let include_id = !spec_fields.iter().any(|(k, v)| k == "_id" && matches!(v, Value::Int(0) | Value::Bool(false)));
    let non_id: Vec<&(String, Value)> = spec_fields.iter().filter(|(k, _)| k != "_id").collect();
    let is_exclusion = !non_id.is_empty() && non_id.iter().all(|(_, v)| matches!(v, Value::Int(0) | Value::Bool(false)));

    if is_exclusion {
        let excluded: Vec<&str> = non_id.iter().map(|(k, _)| k.as_str()).collect();
        let out: Vec<(String, Value)> = doc_fields
            .into_iter()
            .filter(|(k, _)| if k == "_id" { include_id } else { !excluded.contains(&k.as_str()) })
            .collect();
        return Value::Document(out);
    }

    let mut out = Vec::new();
    if include_id {
        if let Some((_, id_val)) = doc_fields.iter().find(|(k, _)| k == "_id") {
            out.push(("_id".to_string(), id_val.clone()));
        }
    }
    for (k, v) in non_id {
        if matches!(v, Value::Int(1) | Value::Bool(true)) {
            if let Some(val) = get_value_path(doc, k) {
                out.push((k.clone(), val.clone()));
            }
        }
    }
    Value::Document(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_ascending_stable() {
        let mut docs = vec![
            Value::Document(vec![("n".into(), Value::Int(3))]),
            Value::Document(vec![("n".into(), Value::Int(1))]),
            Value::Document(vec![("n".into(), Value::Int(2))]),
        ];
        apply_sort(&mut docs, &[("n".to_string(), 1)]);
        let ns: Vec<i64> = docs
            .iter()
            .map(|d| match get_value_path(d, "n") {
                Some(Value::Int(i)) => *i,
                _ => panic!(),
            })
            .collect();
        assert_eq!(ns, vec![1, 2, 3]);
    }

    #[test]
    fn projection_inclusion_keeps_id() {
        let d = Value::Document(vec![("_id".into(), Value::Int(1)), ("a".into(), Value::Int(2)), ("b".into(), Value::Int(3))]);
        let spec = Value::Document(vec![("a".into(), Value::Int(1))]);
        let out = apply_projection(&d, &spec);
        assert_eq!(out, Value::Document(vec![("_id".into(), Value::Int(1)), ("a".into(), Value::Int(2))]));
    }
}
