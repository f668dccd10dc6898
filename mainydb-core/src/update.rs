// src/update.rs
//! The update-operator engine (§4.4).
//!
//! Extracted into its own module (the teacher inlines this logic in
//! `collection_core::apply_update_operators`) since it is a distinct
//! component in §2's dependency list; the per-operator dispatch shape is
//! grounded on that method.

use chrono::Utc;

use crate::document::Document;
use crate::error::{MainyDbError, Result};
use crate::value::Value;

/// Outcome of applying an update document to one target document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub matched: bool,
    pub modified: bool,
}

/// Apply either a replacement document or an operator document to `doc`.
/// Mixing the two shapes, or touching `_id`, is `BadUpdate`.
pub fn apply_update(doc: &mut Document, update: &Value) -> Result<ApplyOutcome> {
    let fields = match update {
        Value::Document(f) => f,
        _ => return Err(MainyDbError::BadUpdate("update must be a document".into())),
    };

    let is_operator_shape = fields.iter().any(|(k, _)| k.starts_with('$'));
    let is_replacement_shape = fields.iter().any(|(k, _)| !k.starts_with('$'));
    if is_operator_shape && is_replacement_shape {
        return Err(MainyDbError::BadUpdate(
            "cannot mix replacement and operator update shapes".into(),
        ));
    }

    if !is_operator_shape {
        // Replacement: keep `_id`, replace every other field.
        if fields.iter().any(|(k, _)| k == "_id") {
            return Err(MainyDbError::BadUpdate("_id is immutable".into()));
        }
        let before = doc.clone();
        doc.fields = fields.clone();
        return Ok(ApplyOutcome {
            matched: true,
            modified: *doc != before,
        });
    }

    let before = doc.clone();
    for (op, arg) in fields {
        apply_operator(doc, op, arg)?;
    }
    Ok(ApplyOutcome {
        matched: true,
        modified: *doc != before,
    })
}

fn operand_fields(arg: &Value, op: &str) -> Result<&[(String, Value)]> {
    match arg {
        Value::Document(f) => Ok(f),
        _ => Err(MainyDbError::BadUpdate(format!("{} requires a document operand", op))),
    }
}

/// Whether `path` names `_id` itself or a path rooted at it (`_id.x`); both
/// must be rejected since `Document::set`/`unset` treat `_id` as just
/// another top-level field name and would otherwise create a second,
/// divergent `_id` entry alongside `self.id` (§3, §4.4).
fn is_id_path(path: &str) -> bool {
    path == "_id" || path.starts_with("_id.")
}

fn apply_operator(doc: &mut Document, op: &str, arg: &Value) -> Result<()> {
    match op {
        "$set" => {
            for (path, value) in operand_fields(arg, "$set")? {
                if is_id_path(path) {
                    return Err(MainyDbError::BadUpdate("_id is immutable".into()));
                }
                doc.set(path, value.clone()).map_err(MainyDbError::BadUpdate)?;
            }
            Ok(())
        }
        "$unset" => {
            for (path, _) in operand_fields(arg, "$unset")? {
                if is_id_path(path) {
                    return Err(MainyDbError::BadUpdate("_id is immutable".into()));
                }
                doc.unset(path);
            }
            Ok(())
        }
        "$inc" => {
            for (path, delta) in operand_fields(arg, "$inc")? {
                if !delta.is_numeric() {
                    return Err(MainyDbError::BadUpdate("$inc requires a numeric operand".into()));
                }
                let current = doc.get(path).cloned();
                match current {
                    None => doc.set(path, delta.clone()).map_err(MainyDbError::BadUpdate)?,
                    Some(v) if v.is_numeric() => {
                        let sum = v.numeric_add(delta).unwrap();
                        doc.set(path, sum).map_err(MainyDbError::BadUpdate)?;
                    }
                    Some(_) => return Err(MainyDbError::BadUpdate(format!("$inc on non-numeric field '{}'", path))),
                }
            }
            Ok(())
        }
        "$mul" => {
            for (path, factor) in operand_fields(arg, "$mul")? {
                if !factor.is_numeric() {
                    return Err(MainyDbError::BadUpdate("$mul requires a numeric operand".into()));
                }
                let current = doc.get(path).cloned();
                match current {
                    None => {
                        let zero = if matches!(factor, Value::Int(_)) { Value::Int(0) } else { Value::Float(0.0) };
                        doc.set(path, zero).map_err(MainyDbError::BadUpdate)?;
                    }
                    Some(v) if v.is_numeric() => {
                        let prod = v.numeric_mul(factor).unwrap();
                        doc.set(path, prod).map_err(MainyDbError::BadUpdate)?;
                    }
                    Some(_) => return Err(MainyDbError::BadUpdate(format!("$mul on non-numeric field '{}'", path))),
                }
            }
            Ok(())
        }
        "$min" => minmax(doc, arg, true),
        "$max" => minmax(doc, arg, false),
        "$rename" => {
            for (src, dst) in operand_fields(arg, "$rename")? {
                if is_id_path(src) {
                    return Err(MainyDbError::BadUpdate("_id is immutable".into()));
                }
                let dst_path = dst
                    .as_str()
                    .ok_or_else(|| MainyDbError::BadUpdate("$rename target must be a string path".into()))?;
                if is_id_path(dst_path) {
                    return Err(MainyDbError::BadUpdate("_id is immutable".into()));
                }
                if let Some(value) = doc.get(src).cloned() {
                    doc.unset(src);
                    doc.set(dst_path, value).map_err(MainyDbError::BadUpdate)?;
                }
            }
            Ok(())
        }
        "$currentDate" => {
            for (path, _) in operand_fields(arg, "$currentDate")? {
                doc.set(path, Value::Timestamp(Utc::now().timestamp_millis()))
                    .map_err(MainyDbError::BadUpdate)?;
            }
            Ok(())
        }
        "$push" => {
            for (path, value) in operand_fields(arg, "$push")? {
                match doc.get_mut(path) {
                    Some(Value::Array(items)) => items.push(value.clone()),
                    Some(_) => return Err(MainyDbError::BadUpdate(format!("$push on non-array field '{}'", path))),
                    None => doc.set(path, Value::Array(vec![value.clone()])).map_err(MainyDbError::BadUpdate)?,
                }
            }
            Ok(())
        }
        "$pop" => {
            for (path, dir) in operand_fields(arg, "$pop")? {
                if let Some(Value::Array(items)) = doc.get_mut(path) {
                    match dir {
                        Value::Int(1) => {
                            items.pop();
                        }
                        Value::Int(-1) => {
                            if !items.is_empty() {
                                items.remove(0);
                            }
                        }
                        _ => return Err(MainyDbError::BadUpdate("$pop requires 1 or -1".into())),
                    }
                }
            }
            Ok(())
        }
        "$pull" => {
            for (path, operand) in operand_fields(arg, "$pull")? {
                if let Some(Value::Array(items)) = doc.get_mut(path) {
                    match operand {
                        Value::Document(fields) if !fields.is_empty() && fields.iter().all(|(k, _)| k.starts_with('$')) => {
                            items.retain(|item| {
                                !fields.iter().all(|(op, v)| match_single_operator(item, op, v))
                            });
                        }
                        literal => items.retain(|item| !item.query_eq(literal)),
                    }
                }
            }
            Ok(())
        }
        "$pullAll" => {
            for (path, operand) in operand_fields(arg, "$pullAll")? {
                let remove_set = operand
                    .as_array()
                    .ok_or_else(|| MainyDbError::BadUpdate("$pullAll requires an array".into()))?;
                if let Some(Value::Array(items)) = doc.get_mut(path) {
                    items.retain(|item| !remove_set.iter().any(|r| item.query_eq(r)));
                }
            }
            Ok(())
        }
        "$addToSet" => {
            for (path, value) in operand_fields(arg, "$addToSet")? {
                match doc.get_mut(path) {
                    Some(Value::Array(items)) => {
                        if !items.iter().any(|e| e.query_eq(value)) {
                            items.push(value.clone());
                        }
                    }
                    Some(_) => return Err(MainyDbError::BadUpdate(format!("$addToSet on non-array field '{}'", path))),
                    None => doc.set(path, Value::Array(vec![value.clone()])).map_err(MainyDbError::BadUpdate)?,
                }
            }
            Ok(())
        }
        other => Err(MainyDbError::BadUpdate(format!("unknown update operator '{}'", other))),
    }
}

fn minmax(doc: &mut Document, arg: &Value, is_min: bool) -> Result<()> {
    for (path, operand) in operand_fields(arg, if is_min { "$min" } else { "$max" })? {
        let current = doc.get(path);
        let should_assign = match current {
            None => true,
            Some(v) => {
                let ord = operand.cmp_total(v);
                if is_min {
                    ord == std::cmp::Ordering::Less
                } else {
                    ord == std::cmp::Ordering::Greater
                }
            }
        };
        if should_assign {
            doc.set(path, operand.clone()).map_err(MainyDbError::BadUpdate)?;
        }
    }
    Ok(())
}

fn match_single_operator(value: &Value, op: &str, arg: &Value) -> bool {
    use std::cmp::Ordering;
    match op {
        "$eq" => value.query_eq(arg),
        "$ne" => !value.query_eq(arg),
        "$gt" => value.cmp_total(arg) == Ordering::Greater,
        "$gte" => value.cmp_total(arg) != Ordering::Less,
        "$lt" => value.cmp_total(arg) == Ordering::Less,
        "$lte" => value.cmp_total(arg) != Ordering::Greater,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentId;

    #[test]
    fn scenario_3_combo() {
        let mut d = Document::new(
            DocumentId::Int(1),
            vec![
                ("a".into(), Value::Int(1)),
                ("b".into(), Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)])),
                ("c".into(), Value::Document(vec![("x".into(), Value::Int(0))])),
            ],
        );
        let update = Value::Document(vec![
            ("$inc".into(), Value::Document(vec![("a".into(), Value::Int(2))])),
            ("$push".into(), Value::Document(vec![("b".into(), Value::Int(4))])),
            ("$set".into(), Value::Document(vec![("c.y".into(), Value::Int(9))])),
            ("$unset".into(), Value::Document(vec![("c.x".into(), Value::String("".into()))])),
        ]);
        let outcome = apply_update(&mut d, &update).unwrap();
        assert!(outcome.matched && outcome.modified);
        assert_eq!(d.get("a"), Some(&Value::Int(3)));
        assert_eq!(
            d.get("b"),
            Some(&Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)]))
        );
        assert_eq!(d.get("c.y"), Some(&Value::Int(9)));
        assert_eq!(d.get("c.x"), None);
    }

    #[test]
    fn no_op_update_reports_unmodified() {
        let mut d = Document::new(DocumentId::Int(1), vec![("a".into(), Value::Int(1))]);
        let before = d.clone();
        let update = Value::Document(vec![("$set".into(), Value::Document(vec![("a".into(), Value::Int(1))]))]);
        let outcome = apply_update(&mut d, &update).unwrap();
        assert!(outcome.matched && !outcome.modified);
        assert_eq!(d, before);
    }

    #[test]
    fn mixed_shape_is_bad_update() {
        let mut d = Document::new(DocumentId::Int(1), vec![]);
        let update = Value::Document(vec![
            ("$set".into(), Value::Document(vec![("a".into(), Value::Int(1))])),
            ("b".into(), Value::Int(2)),
        ]);
        assert!(apply_update(&mut d, &update).is_err());
    }

    #[test]
    fn id_mutation_rejected() {
        let mut d = Document::new(DocumentId::Int(1), vec![]);
        let update = Value::Document(vec![("$set".into(), Value::Document(vec![("_id".into(), Value::Int(2))]))]);
        assert!(apply_update(&mut d, &update).is_err());
    }
}
