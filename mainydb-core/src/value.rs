// src/value.rs
//! The tagged value universe and the total comparison order used by
//! queries, sorts, and indexes.
//!
//! `Value` intentionally is not `serde_json::Value`: JSON collapses `1` and
//! `1.0` into the same `Number`, which loses the int/float tag across a
//! round trip. Every variant here is serialized by `bincode`, which encodes
//! enum discriminants directly, so the tag survives save/load untouched.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A document's fields, insertion-ordered. Order matters for projection and
/// round-trip output but not for equality or ordering (§3).
pub type Fields = Vec<(String, Value)>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// UTC, millisecond precision.
    Timestamp(i64),
    /// Opaque token rendered as a printable string; equality/hashing is
    /// string-based.
    ObjectId(String),
    Binary(Vec<u8>),
    Array(Vec<Value>),
    Document(Fields),
}

impl Eq for Value {}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "double",
            Value::String(_) => "string",
            Value::Timestamp(_) => "timestamp",
            Value::ObjectId(_) => "objectId",
            Value::Binary(_) => "binData",
            Value::Array(_) => "array",
            Value::Document(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Fields> {
        match self {
            Value::Document(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_document_mut(&mut self) -> Option<&mut Fields> {
        match self {
            Value::Document(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Numeric addition used by `$inc`/`$mul`. Keeps `Int` results `Int` when
    /// both operands are integral, matching MongoDB's numeric-type promotion.
    pub fn numeric_add(&self, other: &Value) -> Option<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(Value::Int(a + b)),
            _ => Some(Value::Float(self.as_f64()? + other.as_f64()?)),
        }
    }

    pub fn numeric_mul(&self, other: &Value) -> Option<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(Value::Int(a * b)),
            _ => Some(Value::Float(self.as_f64()? * other.as_f64()?)),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int(_) | Value::Float(_) => 1,
            Value::String(_) => 2,
            Value::Document(_) => 3,
            Value::Array(_) => 4,
            Value::Binary(_) => 5,
            Value::ObjectId(_) => 6,
            Value::Bool(_) => 7,
            Value::Timestamp(_) => 8,
        }
    }

    /// The total order of §3: null < numeric < string < document < array <
    /// binary < object-id < boolean < timestamp, with arrays compared
    /// against non-arrays via their minimum element (MongoDB convention).
    pub fn cmp_total(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => cmp_arrays(a, b),
            (Value::Array(a), _) => match array_min(a) {
                Some(min) => min.cmp_total(other),
                None => self.type_rank().cmp(&other.type_rank()),
            },
            (_, Value::Array(b)) => match array_min(b) {
                Some(min) => self.cmp_total(min),
                None => self.type_rank().cmp(&other.type_rank()),
            },
            (Value::Document(a), Value::Document(b)) => cmp_documents(a, b),
            _ if self.is_numeric() && other.is_numeric() => cmp_numeric(self, other),
            _ => {
                let rank_cmp = self.type_rank().cmp(&other.type_rank());
                if rank_cmp != Ordering::Equal {
                    return rank_cmp;
                }
                match (self, other) {
                    (Value::Null, Value::Null) => Ordering::Equal,
                    (Value::String(a), Value::String(b)) => a.cmp(b),
                    (Value::Binary(a), Value::Binary(b)) => a.cmp(b),
                    (Value::ObjectId(a), Value::ObjectId(b)) => a.cmp(b),
                    (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
                    (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
                    _ => Ordering::Equal,
                }
            }
        }
    }

    /// Query-equality: `$eq` semantics, numeric cross-type, tag-insensitive.
    pub fn query_eq(&self, other: &Value) -> bool {
        self.cmp_total(other) == Ordering::Equal
    }
}

fn cmp_numeric(a: &Value, b: &Value) -> Ordering {
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        return x.cmp(y);
    }
    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    cmp_f64_nan_greatest(x, y)
}

fn cmp_f64_nan_greatest(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

fn cmp_arrays(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let c = x.cmp_total(y);
        if c != Ordering::Equal {
            return c;
        }
    }
    a.len().cmp(&b.len())
}

fn cmp_documents(a: &Fields, b: &Fields) -> Ordering {
    for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
        let kc = ka.cmp(kb);
        if kc != Ordering::Equal {
            return kc;
        }
        let vc = va.cmp_total(vb);
        if vc != Ordering::Equal {
            return vc;
        }
    }
    a.len().cmp(&b.len())
}

fn array_min(a: &[Value]) -> Option<&Value> {
    a.iter().min_by(|x, y| x.cmp_total(y))
}

/// Ordering wrapper for use as a `BTreeMap`/`BTreeSet` key, implementing the
/// §3 total order (derived `Ord` would be wrong here: it would order by enum
/// declaration order and tag rather than by value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderedValue(pub Value);

impl PartialEq for OrderedValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.cmp_total(&other.0) == Ordering::Equal
    }
}
impl Eq for OrderedValue {}
impl PartialOrd for OrderedValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrderedValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp_total(&other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_cross_type_equality() {
        assert!(Value::Int(1).query_eq(&Value::Float(1.0)));
        assert_ne!(Value::Int(1), Value::Float(1.0)); // structural tag survives
    }

    #[test]
    fn nan_sorts_greatest() {
        assert_eq!(Value::Float(f64::NAN).cmp_total(&Value::Int(1000)), Ordering::Greater);
    }

    #[test]
    fn type_order() {
        assert_eq!(Value::Null.cmp_total(&Value::Int(0)), Ordering::Less);
        assert_eq!(Value::Int(0).cmp_total(&Value::String("".into())), Ordering::Less);
        assert_eq!(
            Value::String("z".into()).cmp_total(&Value::Document(vec![])),
            Ordering::Less
        );
        assert_eq!(Value::Bool(true).cmp_total(&Value::Timestamp(0)), Ordering::Less);
    }

    #[test]
    fn array_min_used_against_scalar() {
        let arr = Value::Array(vec![Value::Int(5), Value::Int(1), Value::Int(9)]);
        assert_eq!(arr.cmp_total(&Value::Int(1)), Ordering::Equal);
        assert_eq!(arr.cmp_total(&Value::Int(2)), Ordering::Less);
    }

    #[test]
    fn array_lexicographic_prefix() {
        let a = Value::Array(vec![Value::Int(1)]);
        let b = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(a.cmp_total(&b), Ordering::Less);
    }
}
