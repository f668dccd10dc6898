// src/query_planner.rs
//! Query planner (§4.6): decide whether a filter can use a secondary index,
//! pick the most selective candidate, and report the residual predicate that
//! still needs re-evaluation after the index narrows the candidate set.
//!
//! No teacher equivalent survives the B+Tree rewrite (the teacher's planner
//! was wired to its page store); this module is written fresh against
//! `IndexManager`, following the teacher's `IndexMetadata`/cost-by-cardinality
//! shape for naming and the explain-output style.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::document::DocumentId;
use crate::index::{Index, IndexManager};
use crate::value::Value;

/// One field's usable bound, extracted from a top-level equality or range
/// operator document.
#[derive(Debug, Clone, Default)]
struct FieldBounds {
    eq: Option<Value>,
    in_set: Option<Vec<Value>>,
    gt: Option<Value>,
    gte: Option<Value>,
    lt: Option<Value>,
    lte: Option<Value>,
}

impl FieldBounds {
    fn is_usable(&self) -> bool {
        self.eq.is_some() || self.in_set.is_some() || self.gt.is_some() || self.gte.is_some() || self.lt.is_some() || self.lte.is_some()
    }
}

/// How a `find`/`update`/`delete` will actually run.
#[derive(Debug, Clone, Serialize)]
pub enum QueryPlan {
    IndexScan {
        index_name: String,
        field: String,
        #[serde(skip)]
        ids: BTreeSet<DocumentId>,
    },
    FullScan,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryPlanExplanation {
    pub strategy: String,
    pub index_used: Option<String>,
    pub candidate_count: Option<usize>,
}

impl QueryPlan {
    pub fn explain(&self) -> QueryPlanExplanation {
        match self {
            QueryPlan::IndexScan { index_name, ids, .. } => QueryPlanExplanation {
                strategy: "IndexScan".into(),
                index_used: Some(index_name.clone()),
                candidate_count: Some(ids.len()),
            },
            QueryPlan::FullScan => QueryPlanExplanation {
                strategy: "FullScan".into(),
                index_used: None,
                candidate_count: None,
            },
        }
    }
}

/// Extract single-field equality/range/`$in` bounds from a top-level filter
/// document. Only direct field conditions are considered usable; `$and`
/// branches are merged (intersecting bounds on the same field).
fn extract_bounds(filter: &Value, field: &str) -> FieldBounds {
    let mut bounds = FieldBounds::default();
    let fields = match filter.as_document() {
        Some(f) => f,
        None => return bounds,
    };

    for (key, cond) in fields {
        if key == "$and" {
            if let Some(branches) = cond.as_array() {
                for branch in branches {
                    merge_bounds(&mut bounds, extract_bounds(branch, field));
                }
            }
            continue;
        }
        if key != field {
            continue;
        }
        match cond {
            Value::Document(op_fields) if !op_fields.is_empty() && op_fields.iter().all(|(k, _)| k.starts_with('$')) => {
                for (op, val) in op_fields {
                    match op.as_str() {
                        "$eq" => bounds.eq = Some(val.clone()),
                        "$in" => bounds.in_set = val.as_array().map(|a| a.to_vec()),
                        "$gt" => bounds.gt = Some(val.clone()),
                        "$gte" => bounds.gte = Some(val.clone()),
                        "$lt" => bounds.lt = Some(val.clone()),
                        "$lte" => bounds.lte = Some(val.clone()),
                        _ => {}
                    }
                }
            }
            literal => bounds.eq = Some(literal.clone()),
        }
    }
    bounds
}

fn merge_bounds(into: &mut FieldBounds, other: FieldBounds) {
    if into.eq.is_none() {
        into.eq = other.eq;
    }
    if into.in_set.is_none() {
        into.in_set = other.in_set;
    }
    if into.gt.is_none() {
        into.gt = other.gt;
    }
    if into.gte.is_none() {
        into.gte = other.gte;
    }
    if into.lt.is_none() {
        into.lt = other.lt;
    }
    if into.lte.is_none() {
        into.lte = other.lte;
    }
}

fn ids_for_bounds(index: &Index, bounds: &FieldBounds) -> BTreeSet<DocumentId> {
    if let Some(eq) = &bounds.eq {
        index.ids_for_equality(eq)
    } else if let Some(set) = &bounds.in_set {
        index.ids_for_in(set)
    } else {
        index.ids_for_range(bounds.gte.as_ref(), bounds.gt.as_ref(), bounds.lte.as_ref(), bounds.lt.as_ref())
    }
}

/// Candidate ids for `field` on `index`, or `None` if `filter` cannot use
/// this index at all. A bare `$or` filter is usable only if every branch is
/// independently usable on `field` (§4.6 rule 1); its candidates are the
/// union of each branch's candidates.
fn candidate_ids_for_field(filter: &Value, field: &str, index: &Index) -> Option<BTreeSet<DocumentId>> {
    if let Some(fields) = filter.as_document() {
        if fields.len() == 1 && fields[0].0 == "$or" {
            let branches = fields[0].1.as_array()?;
            if branches.is_empty() {
                return None;
            }
            let mut union = BTreeSet::new();
            for branch in branches {
                let bounds = extract_bounds(branch, field);
                if !bounds.is_usable() {
                    return None;
                }
                union.extend(ids_for_bounds(index, &bounds));
            }
            return Some(union);
        }
    }
    let bounds = extract_bounds(filter, field);
    if !bounds.is_usable() {
        return None;
    }
    Some(ids_for_bounds(index, &bounds))
}

/// Choose a plan for `filter` given the collection's available indexes.
/// Picks the narrowest usable candidate set (matching the teacher's
/// cost-by-cardinality tie-break); falls back to `FullScan` when nothing
/// applies.
pub fn plan_query(filter: &Value, indexes: &IndexManager) -> QueryPlan {
    let mut best: Option<(QueryPlan, usize)> = None;

    let mut seen_fields = BTreeSet::new();
    for def in indexes.list() {
        seen_fields.insert(def.first_field().to_string());
    }

    for field in seen_fields {
        for index in indexes.indexes_on_first_field(&field) {
            let ids = match candidate_ids_for_field(filter, &field, index) {
                Some(ids) => ids,
                None => continue,
            };
            let candidate_count = ids.len();
            let plan = QueryPlan::IndexScan {
                index_name: index.def.name.clone(),
                field: field.clone(),
                ids,
            };
            match &best {
                None => best = Some((plan, candidate_count)),
                Some((_, best_count)) if candidate_count < *best_count => best = Some((plan, candidate_count)),
                _ => {}
            }
        }
    }

    best.map(|(p, _)| p).unwrap_or(QueryPlan::FullScan)
}

/// Whether `sort_keys` (field, direction) can be served by `plan`'s index
/// without an in-memory sort: the sort keys must be a prefix of the index's
/// key list with matching directions (§4.6).
pub fn sort_pushdown_possible(plan: &QueryPlan, sort_keys: &[(String, i32)], indexes: &IndexManager) -> bool {
    let index_name = match plan {
        QueryPlan::IndexScan { index_name, .. } => index_name,
        QueryPlan::FullScan => return false,
    };
    let def = match indexes.list().into_iter().find(|d| &d.name == index_name) {
        Some(d) => d,
        None => return false,
    };
    if sort_keys.len() > def.keys.len() {
        return false;
    }
    sort_keys.iter().zip(def.keys.iter()).all(|(s, k)| s.0 == k.0 && s.1 == k.1)
}
