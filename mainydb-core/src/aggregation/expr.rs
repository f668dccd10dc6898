// src/aggregation/expr.rs
//! Expression language used inside `$project`/`$addFields`/`$group` values
//! (§4.7 final paragraph).

use crate::document::get_value_path;
use crate::error::{MainyDbError, Result};
use crate::value::Value;

/// Evaluate an expression against a document-shaped `Value`. Field
/// references resolve via the dotted-path walker; an unresolved reference is
/// the absent marker, which propagates as `BadExpression`-flavored
/// `BadPipeline` through arithmetic and as `false` through comparison.
pub fn eval_expr(expr: &Value, doc: &Value) -> Result<Value> {
    match expr {
        Value::String(s) if s.starts_with('$') => {
            let path = &s[1..];
            Ok(get_value_path(doc, path).cloned().unwrap_or(Value::Null))
        }
        Value::Document(fields) if fields.len() == 1 && fields[0].0.starts_with('$') => {
            let (op, args) = &fields[0];
            eval_operator(op, args, doc)
        }
        other => Ok(other.clone()),
    }
}

fn eval_args(args: &Value, doc: &Value) -> Result<Vec<Value>> {
    match args {
        Value::Array(items) => items.iter().map(|a| eval_expr(a, doc)).collect(),
        other => Ok(vec![eval_expr(other, doc)?]),
    }
}

fn as_numeric(v: &Value, op: &str) -> Result<f64> {
    v.as_f64()
        .ok_or_else(|| MainyDbError::BadPipeline(format!("{} requires numeric operands, got absent or non-numeric", op)))
}

fn eval_operator(op: &str, args: &Value, doc: &Value) -> Result<Value> {
    match op {
        "$add" => {
            let vals = eval_args(args, doc)?;
            let mut all_int = true;
            let mut sum = 0.0;
            for v in &vals {
                sum += as_numeric(v, "$add")?;
                if !matches!(v, Value::Int(_)) {
                    all_int = false;
                }
            }
            Ok(if all_int { Value::Int(sum as i64) } else { Value::Float(sum) })
        }
        "$subtract" => {
            let vals = eval_args(args, doc)?;
            if vals.len() != 2 {
                return Err(MainyDbError::BadPipeline("$subtract requires exactly 2 operands".into()));
            }
            let a = as_numeric(&vals[0], "$subtract")?;
            let b = as_numeric(&vals[1], "$subtract")?;
            if matches!((&vals[0], &vals[1]), (Value::Int(_), Value::Int(_))) {
                Ok(Value::Int((a - b) as i64))
            } else {
                Ok(Value::Float(a - b))
            }
        }
        "$multiply" => {
            let vals = eval_args(args, doc)?;
            let mut all_int = true;
            let mut prod = 1.0;
            for v in &vals {
                prod *= as_numeric(v, "$multiply")?;
                if !matches!(v, Value::Int(_)) {
                    all_int = false;
                }
            }
            Ok(if all_int { Value::Int(prod as i64) } else { Value::Float(prod) })
        }
        "$divide" => {
            let vals = eval_args(args, doc)?;
            if vals.len() != 2 {
                return Err(MainyDbError::BadPipeline("$divide requires exactly 2 operands".into()));
            }
            let a = as_numeric(&vals[0], "$divide")?;
            let b = as_numeric(&vals[1], "$divide")?;
            Ok(Value::Float(a / b))
        }
        "$mod" => {
            let vals = eval_args(args, doc)?;
            if vals.len() != 2 {
                return Err(MainyDbError::BadPipeline("$mod requires exactly 2 operands".into()));
            }
            let a = as_numeric(&vals[0], "$mod")?;
            let b = as_numeric(&vals[1], "$mod")?;
            if matches!((&vals[0], &vals[1]), (Value::Int(_), Value::Int(_))) {
                Ok(Value::Int((a as i64) % (b as i64)))
            } else {
                Ok(Value::Float(a % b))
            }
        }
        "$concat" => {
            let vals = eval_args(args, doc)?;
            let mut out = String::new();
            for v in &vals {
                match v {
                    Value::String(s) => out.push_str(s),
                    _ => return Err(MainyDbError::BadPipeline("$concat requires string operands".into())),
                }
            }
            Ok(Value::String(out))
        }
        "$size" => {
            let vals = eval_args(args, doc)?;
            match vals.first() {
                Some(Value::Array(items)) => Ok(Value::Int(items.len() as i64)),
                _ => Err(MainyDbError::BadPipeline("$size requires an array operand".into())),
            }
        }
        "$cond" => {
            let vals = eval_args(args, doc)?;
            if vals.len() != 3 {
                return Err(MainyDbError::BadPipeline("$cond requires exactly 3 operands".into()));
            }
            let cond_true = matches!(&vals[0], Value::Bool(true));
            Ok(if cond_true { vals[1].clone() } else { vals[2].clone() })
        }
        "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
            let vals = eval_args(args, doc)?;
            if vals.len() != 2 {
                return Err(MainyDbError::BadPipeline(format!("{} requires exactly 2 operands", op)));
            }
            let ord = vals[0].cmp_total(&vals[1]);
            use std::cmp::Ordering;
            let result = match op {
                "$eq" => ord == Ordering::Equal,
                "$ne" => ord != Ordering::Equal,
                "$gt" => ord == Ordering::Greater,
                "$gte" => ord != Ordering::Less,
                "$lt" => ord == Ordering::Less,
                "$lte" => ord != Ordering::Greater,
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        other => Err(MainyDbError::BadPipeline(format!("unknown expression operator '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(fields: Vec<(&str, Value)>) -> Value {
        Value::Document(fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn field_reference_resolves() {
        let d = doc(vec![("v", Value::Int(4))]);
        assert_eq!(eval_expr(&Value::String("$v".into()), &d).unwrap(), Value::Int(4));
    }

    #[test]
    fn missing_reference_is_absent_not_error() {
        let d = doc(vec![]);
        assert_eq!(eval_expr(&Value::String("$missing".into()), &d).unwrap(), Value::Null);
    }

    #[test]
    fn arithmetic_on_absent_is_bad_pipeline() {
        let d = doc(vec![]);
        let expr = Value::Document(vec![("$add".into(), Value::Array(vec![Value::String("$missing".into()), Value::Int(1)]))]);
        assert!(eval_expr(&expr, &d).is_err());
    }

    #[test]
    fn comparison_propagates_false() {
        let d = doc(vec![]);
        let expr = Value::Document(vec![(
            "$eq".into(),
            Value::Array(vec![Value::String("$missing".into()), Value::Int(1)]),
        )]);
        assert_eq!(eval_expr(&expr, &d).unwrap(), Value::Bool(false));
    }
}
