// src/aggregation/mod.rs
//! Aggregation pipeline (§4.7): stage N consumes stage N−1's cursor.
//!
//! Unlike the teacher's eager `Vec`-fold pipeline, non-blocking stages here
//! are lazy iterator adapters over boxed `Value` iterators; only the
//! documented blocking stages (`$group`, `$sort`, `$count`) materialize.

pub mod expr;

use std::collections::BTreeMap;

use crate::cursor::CancelToken;
use crate::document::get_value_path;
use crate::error::{MainyDbError, Result};
use crate::query::operators::matches_filter_value;
use crate::value::{OrderedValue, Value};
use expr::eval_expr;

type Stream<'a> = Box<dyn Iterator<Item = Value> + 'a>;

/// Row-count period at which blocking stages (`$group`, `$sort`) re-check
/// the cancel token (§5: "within blocking stages... at periodic row
/// counts").
const CANCEL_CHECK_PERIOD: usize = 1000;

/// Collection lookup callback for `$lookup`: given a collection name,
/// returns every document in it as a `Value`. The collection layer supplies
/// this (it alone knows how to take the foreign collection's read lock
/// after releasing the source lock, per §5's lock-ordering rule).
pub trait LookupSource {
    fn documents_in(&self, collection: &str) -> Result<Vec<Value>>;
}

pub fn run_pipeline<'a>(
    input: Box<dyn Iterator<Item = Value> + 'a>,
    pipeline: &[Value],
    lookup: &dyn LookupSource,
    cancel: &CancelToken,
) -> Result<Vec<Value>> {
    let mut stream: Stream<'a> = input;
    for stage in pipeline {
        if cancel.is_cancelled() {
            return Err(MainyDbError::Cancelled);
        }
        stream = apply_stage(stream, stage, lookup, cancel)?;
    }
    if cancel.is_cancelled() {
        return Err(MainyDbError::Cancelled);
    }
    Ok(stream.collect())
}

fn single_stage_field(stage: &Value) -> Result<(&str, &Value)> {
    let fields = stage
        .as_document()
        .ok_or_else(|| MainyDbError::BadPipeline("stage must be a document".into()))?;
    if fields.len() != 1 {
        return Err(MainyDbError::BadPipeline("stage must have exactly one operator".into()));
    }
    Ok((fields[0].0.as_str(), &fields[0].1))
}

fn apply_stage<'a>(stream: Stream<'a>, stage: &Value, lookup: &dyn LookupSource, cancel: &CancelToken) -> Result<Stream<'a>> {
    let (op, arg) = single_stage_field(stage)?;
    match op {
        "$match" => {
            let filter = arg.clone();
            Ok(Box::new(stream.filter(move |doc| matches_filter_value(doc, &filter).unwrap_or(false))))
        }
        "$project" => {
            let spec = arg.clone();
            Ok(Box::new(stream.map(move |doc| project(&doc, &spec).unwrap_or(Value::Null))))
        }
        "$addFields" => {
            let spec = arg.clone();
            Ok(Box::new(stream.map(move |doc| add_fields(&doc, &spec).unwrap_or(doc.clone()))))
        }
        "$group" => {
            let groups = run_group(stream, arg, cancel)?;
            Ok(Box::new(groups.into_iter()))
        }
        "$sort" => {
            let sorted = run_sort(stream, arg, cancel)?;
            Ok(Box::new(sorted.into_iter()))
        }
        "$limit" => {
            let n = non_negative_i64(arg, "$limit")?;
            Ok(Box::new(stream.take(n as usize)))
        }
        "$skip" => {
            let n = non_negative_i64(arg, "$skip")?;
            Ok(Box::new(stream.skip(n as usize)))
        }
        "$unwind" => {
            let path = arg
                .as_str()
                .map(|s| s.trim_start_matches('$').to_string())
                .ok_or_else(|| MainyDbError::BadPipeline("$unwind requires a field reference string".into()))?;
            Ok(Box::new(stream.flat_map(move |doc| unwind_one(doc, &path))))
        }
        "$count" => {
            let field = arg
                .as_str()
                .ok_or_else(|| MainyDbError::BadPipeline("$count requires a field name string".into()))?
                .to_string();
            let n = stream.count() as i64;
            let out = Value::Document(vec![(field, Value::Int(n))]);
            Ok(Box::new(std::iter::once(out)))
        }
        "$lookup" => {
            let spec = run_lookup_spec(arg)?;
            let foreign_docs = lookup.documents_in(&spec.from)?;
            Ok(Box::new(stream.map(move |doc| apply_lookup(doc, &spec, &foreign_docs))))
        }
        other => Err(MainyDbError::BadPipeline(format!("unknown stage '{}'", other))),
    }
}

fn non_negative_i64(v: &Value, op: &str) -> Result<i64> {
    match v.as_f64() {
        Some(f) if f >= 0.0 => Ok(f as i64),
        _ => Err(MainyDbError::BadPipeline(format!("{} requires a non-negative integer", op))),
    }
}

fn project(doc: &Value, spec: &Value) -> Result<Value> {
    let spec_fields = spec
        .as_document()
        .ok_or_else(|| MainyDbError::BadPipeline("$project spec must be a document".into()))?;
    let doc_fields = doc.as_document().cloned().unwrap_or_default();

    let include_id = !spec_fields
        .iter()
        .any(|(k, v)| k == "_id" && matches!(v, Value::Int(0) | Value::Bool(false)));

    let non_id_fields: Vec<&(String, Value)> = spec_fields.iter().filter(|(k, _)| k != "_id").collect();
    let is_exclusion = !non_id_fields.is_empty() && non_id_fields.iter().all(|(_, v)| matches!(v, Value::Int(0) | Value::Bool(false)));

    let mut out = Vec::new();
    if is_exclusion {
        // exclusion projection: keep everything except listed fields
        let excluded: Vec<&str> = non_id_fields.iter().map(|(k, _)| k.as_str()).collect();
        for (k, v) in &doc_fields {
            if k == "_id" {
                if include_id {
                    out.push((k.clone(), v.clone()));
                }
                continue;
            }
            if !excluded.contains(&k.as_str()) {
                out.push((k.clone(), v.clone()));
            }
        }
        return Ok(Value::Document(out));
    }

    // inclusion projection: only listed fields (plus `_id` unless excluded)
    if include_id {
        if let Some((_, id_val)) = doc_fields.iter().find(|(k, _)| k == "_id") {
            out.push(("_id".to_string(), id_val.clone()));
        }
    }
    for (k, v) in spec_fields {
        if k == "_id" {
            continue;
        }
        match v {
            Value::Int(1) | Value::Bool(true) => {
                if let Some(val) = get_value_path(doc, k) {
                    out.push((k.clone(), val.clone()));
                }
            }
            Value::Int(0) | Value::Bool(false) => {}
            expression => out.push((k.clone(), eval_expr(expression, doc)?)),
        }
    }
    Ok(Value::Document(out))
}

fn add_fields(doc: &Value, spec: &Value) -> Result<Value> {
    let spec_fields = spec
        .as_document()
        .ok_or_else(|| MainyDbError::BadPipeline("$addFields spec must be a document".into()))?;
    let mut out = doc.as_document().cloned().unwrap_or_default();
    for (k, expression) in spec_fields {
        let value = eval_expr(expression, doc)?;
        if let Some(slot) = out.iter_mut().find(|(key, _)| key == k) {
            slot.1 = value;
        } else {
            out.push((k.clone(), value));
        }
    }
    Ok(Value::Document(out))
}

#[derive(Default)]
struct Accumulator {
    sum: f64,
    count: i64,
    min: Option<Value>,
    max: Option<Value>,
    first: Option<Value>,
    last: Option<Value>,
    list: Vec<Value>,
    set: Vec<Value>,
}

fn run_group<'a>(stream: Stream<'a>, arg: &Value, cancel: &CancelToken) -> Result<Vec<Value>> {
    let spec = arg
        .as_document()
        .ok_or_else(|| MainyDbError::BadPipeline("$group requires a document spec".into()))?;
    let id_expr = spec
        .iter()
        .find(|(k, _)| k == "_id")
        .map(|(_, v)| v)
        .ok_or_else(|| MainyDbError::BadPipeline("$group requires an _id expression".into()))?;
    let field_specs: Vec<(&str, &str, &Value)> = spec
        .iter()
        .filter(|(k, _)| k != "_id")
        .map(|(k, v)| {
            let fields = v.as_document().ok_or_else(|| MainyDbError::BadPipeline(format!("accumulator for '{}' must be a document", k)))?;
            if fields.len() != 1 {
                return Err(MainyDbError::BadPipeline(format!("accumulator for '{}' must have exactly one operator", k)));
            }
            Ok((k.as_str(), fields[0].0.as_str(), &fields[0].1))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut order: Vec<Value> = Vec::new();
    let mut groups: BTreeMap<OrderedValue, Vec<(String, Accumulator)>> = BTreeMap::new();

    for (i, doc) in stream.enumerate() {
        if i % CANCEL_CHECK_PERIOD == 0 && cancel.is_cancelled() {
            return Err(MainyDbError::Cancelled);
        }
        let key = eval_expr(id_expr, &doc)?;
        let ordered = OrderedValue(key.clone());
        if !groups.contains_key(&ordered) {
            order.push(key.clone());
            let accs = field_specs.iter().map(|(name, _, _)| (name.to_string(), Accumulator::default())).collect();
            groups.insert(ordered.clone(), accs);
        }
        let accs = groups.get_mut(&ordered).unwrap();
        for ((_, op, expr_v), (_, acc)) in field_specs.iter().zip(accs.iter_mut()) {
            accumulate(acc, op, expr_v, &doc)?;
        }
    }

    let mut out = Vec::with_capacity(order.len());
    for key in order {
        let ordered = OrderedValue(key.clone());
        let accs = groups.remove(&ordered).unwrap();
        let mut fields = vec![("_id".to_string(), key)];
        for (name, acc) in accs {
            fields.push((name, finalize_accumulator(acc)));
        }
        out.push(Value::Document(fields));
    }
    Ok(out)
}

fn accumulate(acc: &mut Accumulator, op: &str, expr_v: &Value, doc: &Value) -> Result<()> {
    let value = eval_expr(expr_v, doc)?;
    match op {
        "$sum" => {
            acc.sum += value.as_f64().unwrap_or(0.0);
        }
        "$avg" => {
            if let Some(n) = value.as_f64() {
                acc.sum += n;
                acc.count += 1;
            }
        }
        "$min" => {
            if acc.min.as_ref().map(|m| value.cmp_total(m) == std::cmp::Ordering::Less).unwrap_or(true) {
                acc.min = Some(value);
            }
        }
        "$max" => {
            if acc.max.as_ref().map(|m| value.cmp_total(m) == std::cmp::Ordering::Greater).unwrap_or(true) {
                acc.max = Some(value);
            }
        }
        "$first" => {
            if acc.first.is_none() {
                acc.first = Some(value);
            }
        }
        "$last" => {
            acc.last = Some(value);
        }
        "$push" => acc.list.push(value),
        "$addToSet" => {
            if !acc.set.iter().any(|e| e.query_eq(&value)) {
                acc.set.push(value);
            }
        }
        other => return Err(MainyDbError::BadPipeline(format!("unknown accumulator '{}'", other))),
    }
    Ok(())
}

fn finalize_accumulator(acc: Accumulator) -> Value {
    if acc.count > 0 || acc.first.is_some() || acc.last.is_some() || !acc.list.is_empty() || !acc.set.is_empty() || acc.min.is_some() || acc.max.is_some() {
        if let Some(v) = acc.min {
            return v;
        }
        if let Some(v) = acc.max {
            return v;
        }
        if let Some(v) = acc.first {
            return v;
        }
        if let Some(v) = acc.last {
            return v;
        }
        if !acc.list.is_empty() {
            return Value::Array(acc.list);
        }
        if !acc.set.is_empty() {
            return Value::Array(acc.set);
        }
        if acc.count > 0 {
            return Value::Float(acc.sum / acc.count as f64);
        }
    }
    if acc.sum.fract() == 0.0 {
        Value::Int(acc.sum as i64)
    } else {
        Value::Float(acc.sum)
    }
}

fn run_sort<'a>(stream: Stream<'a>, arg: &Value, cancel: &CancelToken) -> Result<Vec<Value>> {
    let spec = arg
        .as_document()
        .ok_or_else(|| MainyDbError::BadPipeline("$sort requires a document spec".into()))?;
    let keys: Vec<(String, i32)> = spec
        .iter()
        .map(|(k, v)| {
            let dir = v.as_f64().unwrap_or(1.0) as i32;
            (k.clone(), dir)
        })
        .collect();
    let mut items: Vec<Value> = Vec::new();
    for (i, doc) in stream.enumerate() {
        if i % CANCEL_CHECK_PERIOD == 0 && cancel.is_cancelled() {
            return Err(MainyDbError::Cancelled);
        }
        items.push(doc);
    }
    if cancel.is_cancelled() {
        return Err(MainyDbError::Cancelled);
    }
    items.sort_by(|a, b| {
        for (field, dir) in &keys {
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
    Ok(items)
}

fn unwind_one(doc: Value, path: &str) -> Vec<Value> {
    let array = match get_value_path(&doc, path) {
        Some(Value::Array(items)) if !items.is_empty() => items.clone(),
        _ => return Vec::new(),
    };
    array
        .into_iter()
        .map(|elem| {
            let mut fields = doc.as_document().cloned().unwrap_or_default();
            if let Some(slot) = fields.iter_mut().find(|(k, _)| k == path) {
                slot.1 = elem;
            }
            Value::Document(fields)
        })
        .collect()
}

struct LookupSpec {
    from: String,
    local_field: String,
    foreign_field: String,
    as_field: String,
}

fn run_lookup_spec(arg: &Value) -> Result<LookupSpec> {
    let fields = arg
        .as_document()
        .ok_or_else(|| MainyDbError::BadPipeline("$lookup requires a document spec".into()))?;
    let get_str = |name: &str| -> Result<String> {
        fields
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| MainyDbError::BadPipeline(format!("$lookup requires '{}'", name)))
    };
    Ok(LookupSpec {
        from: get_str("from")?,
        local_field: get_str("localField")?,
        foreign_field: get_str("foreignField")?,
        as_field: get_str("as")?,
    })
}

fn apply_lookup(doc: Value, spec: &LookupSpec, foreign_docs: &[Value]) -> Value {
    let local_value = get_value_path(&doc, &spec.local_field).cloned();
    let matches: Vec<Value> = match &local_value {
        Some(local) => foreign_docs
            .iter()
            .filter(|fdoc| get_value_path(fdoc, &spec.foreign_field).map(|f| f.query_eq(local)).unwrap_or(false))
            .cloned()
            .collect(),
        None => Vec::new(),
    };
    let mut fields = doc.as_document().cloned().unwrap_or_default();
    fields.push((spec.as_field.clone(), Value::Array(matches)));
    Value::Document(fields)
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

    fn doc(fields: Vec<(&str, Value)>) -> Value {
        Value::Document(fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn scenario_4_group_and_sort() {
        let docs = vec![
            doc(vec![("cat", Value::String("A".into())), ("v", Value::Int(1))]),
            doc(vec![("cat", Value::String("A".into())), ("v", Value::Int(3))]),
            doc(vec![("cat", Value::String("B".into())), ("v", Value::Int(2))]),
        ];
        let pipeline = vec![
            Value::Document(vec![(
                "$group".into(),
                Value::Document(vec![
                    ("_id".into(), Value::String("$cat".into())),
                    ("s".into(), Value::Document(vec![("$sum".into(), Value::String("$v".into()))])),
                    ("n".into(), Value::Document(vec![("$sum".into(), Value::Int(1))])),
                ]),
            )]),
            Value::Document(vec![("$sort".into(), Value::Document(vec![("_id".into(), Value::Int(1))]))]),
        ];
        let out = run_pipeline(Box::new(docs.into_iter()), &pipeline, &NoLookup, &CancelToken::new()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], doc(vec![("_id", Value::String("A".into())), ("s", Value::Int(4)), ("n", Value::Int(2))]));
        assert_eq!(out[1], doc(vec![("_id", Value::String("B".into())), ("s", Value::Int(2)), ("n", Value::Int(1))]));
    }

    #[test]
    fn unwind_skips_empty_arrays() {
        let docs = vec![doc(vec![("tags", Value::Array(vec![]))]), doc(vec![("tags", Value::Array(vec![Value::Int(1), Value::Int(2)]))])];
        let pipeline = vec![Value::Document(vec![("$unwind".into(), Value::String("$tags".into()))])];
        let out = run_pipeline(Box::new(docs.into_iter()), &pipeline, &NoLookup, &CancelToken::new()).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn project_inclusion_and_exclusion() {
        let d = doc(vec![("a", Value::Int(1)), ("b", Value::Int(2))]);
        let inc = Value::Document(vec![("a".into(), Value::Int(1))]);
        assert_eq!(project(&d, &inc).unwrap(), doc(vec![("a", Value::Int(1))]));

        let exc = Value::Document(vec![("b".into(), Value::Int(0))]);
        assert_eq!(project(&d, &exc).unwrap(), doc(vec![("a", Value::Int(1))]));
    }
}
