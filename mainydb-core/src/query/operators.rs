// src/query/operators.rs
//! Strategy-pattern predicate operators (§4.3), evaluated over the
//! document-as-value tree so the same matcher serves top-level filters,
//! `$match` aggregation stages, and `$elemMatch` sub-predicates alike.
//!
//! Grounded on the teacher's `query/operators.rs` registry approach; kept
//! the `lru`-cached regex compilation, retargeted from `serde_json::Value`
//! to this crate's `Value`.

use std::cmp::Ordering;
use std::sync::Mutex;

use lazy_static::lazy_static;
use lru::LruCache;
use regex::Regex;

use crate::document::{get_value_path, Document};
use crate::error::{MainyDbError, Result};
use crate::value::Value;

lazy_static! {
    static ref REGEX_CACHE: Mutex<LruCache<String, Regex>> =
        Mutex::new(LruCache::new(std::num::NonZeroUsize::new(100).unwrap()));
}

fn get_or_compile_regex(pattern: &str, options: &str) -> Result<Regex> {
    let cache_key = format!("{}\u{0}{}", pattern, options);
    if let Some(re) = REGEX_CACHE.lock().unwrap().get(&cache_key) {
        return Ok(re.clone());
    }
    let mut builder_pattern = String::new();
    if options.contains('i') {
        builder_pattern.push_str("(?i)");
    }
    if options.contains('m') {
        builder_pattern.push_str("(?m)");
    }
    if options.contains('s') {
        builder_pattern.push_str("(?s)");
    }
    if options.contains('x') {
        builder_pattern.push_str("(?x)");
    }
    builder_pattern.push_str(pattern);
    let re = Regex::new(&builder_pattern)
        .map_err(|e| MainyDbError::BadQuery(format!("invalid $regex: {}", e)))?;
    REGEX_CACHE.lock().unwrap().put(cache_key, re.clone());
    Ok(re)
}

/// Entry point: compile-and-run a filter against a whole document.
pub fn matches_filter(document: &Document, filter: &Value) -> Result<bool> {
    matches_filter_value(&document.to_value(), filter)
}

/// Same, but over an arbitrary document-shaped `Value` (used by `$match`
/// aggregation stages and recursively by `$or`/`$and`/`$nor`).
pub fn matches_filter_value(doc_value: &Value, filter: &Value) -> Result<bool> {
    let fields = match filter {
        Value::Document(f) => f,
        _ => return Err(MainyDbError::BadQuery("filter must be a document".into())),
    };

    for (key, cond) in fields {
        if key == "$and" {
            let branches = cond
                .as_array()
                .ok_or_else(|| MainyDbError::BadQuery("$and requires an array".into()))?;
            for branch in branches {
                if !matches_filter_value(doc_value, branch)? {
                    return Ok(false);
                }
            }
        } else if key == "$or" {
            let branches = cond
                .as_array()
                .ok_or_else(|| MainyDbError::BadQuery("$or requires an array".into()))?;
            if branches.is_empty() {
                return Err(MainyDbError::BadQuery("$or requires at least one branch".into()));
            }
            let mut any = false;
            for branch in branches {
                if matches_filter_value(doc_value, branch)? {
                    any = true;
                    break;
                }
            }
            if !any {
                return Ok(false);
            }
        } else if key == "$nor" {
            let branches = cond
                .as_array()
                .ok_or_else(|| MainyDbError::BadQuery("$nor requires an array".into()))?;
            for branch in branches {
                if matches_filter_value(doc_value, branch)? {
                    return Ok(false);
                }
            }
        } else {
            let field_value = get_value_path(doc_value, key);
            if !evaluate_field_condition(field_value, cond)? {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

fn is_operator_document(fields: &[(String, Value)]) -> bool {
    !fields.is_empty() && fields.iter().all(|(k, _)| k.starts_with('$'))
}

fn evaluate_field_condition(field_value: Option<&Value>, cond: &Value) -> Result<bool> {
    match cond {
        Value::Document(fields) if is_operator_document(fields) => {
            let mut options: Option<&str> = None;
            for (k, v) in fields {
                if k == "$options" {
                    options = v.as_str();
                }
            }
            for (op, val) in fields {
                if op == "$options" {
                    continue;
                }
                if !apply_operator(op, field_value, val, options)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        literal => Ok(value_matches_literal(field_value, literal)),
    }
}

fn value_matches_literal(field_value: Option<&Value>, literal: &Value) -> bool {
    match field_value {
        None => literal.is_null(),
        Some(v) => array_aware_eq(v, literal),
    }
}

fn array_aware_eq(v: &Value, literal: &Value) -> bool {
    if let Value::Array(elems) = v {
        if elems.iter().any(|e| e.query_eq(literal)) {
            return true;
        }
    }
    v.query_eq(literal)
}

fn array_aware_eq_opt(field_value: Option<&Value>, literal: &Value) -> bool {
    match field_value {
        None => literal.is_null(),
        Some(v) => array_aware_eq(v, literal),
    }
}

fn compare_with_predicate(field_value: Option<&Value>, val: &Value, op: &str) -> bool {
    let check = |v: &Value| -> bool {
        let ord = v.cmp_total(val);
        match op {
            "$gt" => ord == Ordering::Greater,
            "$gte" => ord != Ordering::Less,
            "$lt" => ord == Ordering::Less,
            "$lte" => ord != Ordering::Greater,
            _ => false,
        }
    };
    match field_value {
        Some(Value::Array(elems)) => elems.iter().any(check),
        Some(v) => check(v),
        None => false,
    }
}

fn elem_matches(elem: &Value, subpred: &Value) -> Result<bool> {
    match subpred {
        Value::Document(fields) if is_operator_document(fields) => {
            for (op, val) in fields {
                if !apply_operator(op, Some(elem), val, None)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Value::Document(_) => matches_filter_value(elem, subpred),
        _ => Ok(false),
    }
}

fn apply_operator(op: &str, field_value: Option<&Value>, val: &Value, regex_opts: Option<&str>) -> Result<bool> {
    match op {
        "$eq" => Ok(array_aware_eq_opt(field_value, val)),
        "$ne" => Ok(!array_aware_eq_opt(field_value, val)),
        "$gt" | "$gte" | "$lt" | "$lte" => Ok(compare_with_predicate(field_value, val, op)),
        "$in" => {
            let items = val
                .as_array()
                .ok_or_else(|| MainyDbError::BadQuery("$in requires an array".into()))?;
            Ok(items.iter().any(|item| array_aware_eq_opt(field_value, item)))
        }
        "$nin" => {
            let items = val
                .as_array()
                .ok_or_else(|| MainyDbError::BadQuery("$nin requires an array".into()))?;
            Ok(!items.iter().any(|item| array_aware_eq_opt(field_value, item)))
        }
        "$all" => {
            let wanted = val
                .as_array()
                .ok_or_else(|| MainyDbError::BadQuery("$all requires an array".into()))?;
            match field_value {
                Some(Value::Array(elems)) => {
                    Ok(wanted.iter().all(|w| elems.iter().any(|e| e.query_eq(w))))
                }
                _ => Ok(false),
            }
        }
        "$elemMatch" => match field_value {
            Some(Value::Array(elems)) => {
                for e in elems {
                    if elem_matches(e, val)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Ok(false),
        },
        "$size" => {
            let wanted = val
                .as_f64()
                .ok_or_else(|| MainyDbError::BadQuery("$size requires a number".into()))?
                as usize;
            match field_value {
                Some(Value::Array(elems)) => Ok(elems.len() == wanted),
                _ => Ok(false),
            }
        }
        "$exists" => {
            let wanted = matches!(val, Value::Bool(true));
            Ok(field_value.is_some() == wanted)
        }
        "$type" => {
            let wanted = val
                .as_str()
                .ok_or_else(|| MainyDbError::BadQuery("$type requires a string".into()))?;
            Ok(field_value.map(|v| v.type_name() == wanted).unwrap_or(false))
        }
        "$regex" => {
            let pattern = match val {
                Value::String(s) => s.as_str(),
                _ => return Err(MainyDbError::BadQuery("$regex requires a string".into())),
            };
            let re = get_or_compile_regex(pattern, regex_opts.unwrap_or(""))?;
            match field_value {
                Some(Value::String(s)) => Ok(re.is_match(s)),
                _ => Ok(false),
            }
        }
        "$not" => Ok(!evaluate_field_condition(field_value, val)?),
        other => Err(MainyDbError::BadQuery(format!("unknown operator '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentId;

    fn doc(fields: Vec<(&str, Value)>) -> Document {
        Document::new(
            DocumentId::Int(1),
            fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        )
    }

    fn filter_doc(fields: Vec<(&str, Value)>) -> Value {
        Value::Document(fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn scenario_1_equality_and_gt() {
        let john = doc(vec![("name", Value::String("John".into())), ("age", Value::Int(30))]);
        let jane = doc(vec![("name", Value::String("Jane".into())), ("age", Value::Int(25))]);
        let filter = filter_doc(vec![(
            "age",
            Value::Document(vec![("$gt".into(), Value::Int(27))]),
        )]);
        assert!(matches_filter(&john, &filter).unwrap());
        assert!(!matches_filter(&jane, &filter).unwrap());
    }

    #[test]
    fn implicit_array_traversal() {
        let d = doc(vec![("tags", Value::Array(vec![Value::String("a".into()), Value::String("b".into())]))]);
        let filter = filter_doc(vec![("tags", Value::String("b".into()))]);
        assert!(matches_filter(&d, &filter).unwrap());
    }

    #[test]
    fn elem_match_disables_collapse() {
        let d = doc(vec![(
            "items",
            Value::Array(vec![
                Value::Document(vec![("x".into(), Value::Int(1)), ("y".into(), Value::Int(2))]),
                Value::Document(vec![("x".into(), Value::Int(5)), ("y".into(), Value::Int(5))]),
            ]),
        )]);
        let filter = filter_doc(vec![(
            "items",
            Value::Document(vec![(
                "$elemMatch".into(),
                Value::Document(vec![
                    ("x".into(), Value::Document(vec![("$gt".into(), Value::Int(4))])),
                    ("y".into(), Value::Document(vec![("$gt".into(), Value::Int(4))])),
                ]),
            )]),
        )]);
        assert!(matches_filter(&d, &filter).unwrap());
    }

    #[test]
    fn and_or_nor_not() {
        let d = doc(vec![("age", Value::Int(30)), ("city", Value::String("NYC".into()))]);
        let filter = filter_doc(vec![(
            "$and",
            Value::Array(vec![
                filter_doc(vec![("age", Value::Document(vec![("$gte".into(), Value::Int(18))]))]),
                filter_doc(vec![("city", Value::String("NYC".into()))]),
            ]),
        )]);
        assert!(matches_filter(&d, &filter).unwrap());

        let not_filter = filter_doc(vec![(
            "age",
            Value::Document(vec![("$not".into(), Value::Document(vec![("$lt".into(), Value::Int(18))]))]),
        )]);
        assert!(matches_filter(&d, &not_filter).unwrap());
    }

    #[test]
    fn unknown_operator_is_bad_query() {
        let d = doc(vec![("age", Value::Int(30))]);
        let filter = filter_doc(vec![("age", Value::Document(vec![("$bogus".into(), Value::Int(1))]))]);
        assert!(matches_filter(&d, &filter).is_err());
    }
}
