//! `where`-clause filter tree (§4.8 stage 2), shared between the query
//! pipeline (C10) and the mutation pipeline's `updateMany`/`deleteMany`
//! predicate and `upsert`'s `where` matching (C8).
//!
//! Per the "dynamic operator dispatch -> tagged variants" design note, a
//! `where` expression compiles once into a `Where` tree of tagged
//! `FieldOp` variants rather than being re-inspected key-by-key on every
//! row; `matches` is a pure, non-suspending predicate over one entity.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::config::RelationshipConfig;
use crate::value::{Entity, Value};

/// A single field-scoped comparison.
#[derive(Debug, Clone)]
pub enum FieldOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    StartsWith(String),
    EndsWith(String),
    /// `$contains`: substring for strings, membership for arrays.
    Contains(Value),
    /// `$search`: case-insensitive substring search over a string field.
    Search(String),
    /// `$all`: array field contains every listed value.
    All(Vec<Value>),
    /// `$size`: array field has exactly this length.
    Size(usize),
}

/// A compiled `where` tree. Field paths may be dotted (`"author.name"`) to
/// traverse one hop through a declared relationship, resolved on demand
/// against the owning collection's peers (§4.8: "Nested field conditions
/// traverse through populated peers resolved on demand").
#[derive(Debug, Clone)]
pub enum Where {
    /// Vacuous truth over an empty list (§8 boundary behavior).
    And(Vec<Where>),
    /// False over an empty list (§8 boundary behavior).
    Or(Vec<Where>),
    /// `$not` of a non-object input compiles to `Not(And(vec![]))`, which is
    /// false, matching "$not of a non-object is false".
    Not(Box<Where>),
    Field(String, FieldOp),
}

impl Where {
    pub fn field(path: impl Into<String>, op: FieldOp) -> Self {
        Where::Field(path.into(), op)
    }

    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Where::field(path, FieldOp::Eq(value.into()))
    }

    pub fn and(conds: Vec<Where>) -> Self {
        Where::And(conds)
    }

    pub fn or(conds: Vec<Where>) -> Self {
        Where::Or(conds)
    }

    pub fn not(cond: Where) -> Self {
        Where::Not(Box::new(cond))
    }

    /// Multiple field conditions combined with the default `$and`.
    pub fn all_fields(conds: Vec<(String, FieldOp)>) -> Self {
        Where::And(conds.into_iter().map(|(f, op)| Where::Field(f, op)).collect())
    }
}

/// Read-only access to peer collections' live state, for one-hop traversal
/// through a declared relationship. Implemented by the database façade.
pub trait PeerReader {
    fn get(&self, collection: &str, id: &str) -> Option<Entity>;
    fn scan_by_fk(&self, collection: &str, fk_field: &str, id: &str) -> Vec<Entity>;
}

/// Everything a filter evaluation needs besides the candidate entity:
/// this collection's declared relationships (to resolve a dotted path's
/// first segment) and a way to read peer collections.
pub struct FilterCtx<'a> {
    pub relationships: &'a [RelationshipConfig],
    pub peers: Option<&'a dyn PeerReader>,
}

impl<'a> FilterCtx<'a> {
    pub fn new(relationships: &'a [RelationshipConfig]) -> Self {
        Self { relationships, peers: None }
    }

    pub fn with_peers(relationships: &'a [RelationshipConfig], peers: &'a dyn PeerReader) -> Self {
        Self { relationships, peers: Some(peers) }
    }
}

pub fn matches(node: &Where, entity: &Entity, ctx: &FilterCtx) -> bool {
    match node {
        Where::And(conds) => conds.iter().all(|c| matches(c, entity, ctx)),
        Where::Or(conds) => {
            if conds.is_empty() {
                false
            } else {
                conds.iter().any(|c| matches(c, entity, ctx))
            }
        }
        Where::Not(inner) => !matches(inner, entity, ctx),
        Where::Field(path, op) => {
            let value = resolve_path(entity, path, ctx).unwrap_or(Value::Null);
            apply_op(&value, op)
        }
    }
}

/// Resolve a (possibly dotted) field path against an entity, traversing one
/// relationship hop if the path's first segment names a declared
/// relationship and peer access is available. Returns `None` if the field
/// is absent or the relationship target can't be resolved.
fn resolve_path(entity: &Entity, path: &str, ctx: &FilterCtx) -> Option<Value> {
    match path.split_once('.') {
        None => Some(field_value(entity, path)),
        Some((head, rest)) => {
            let rel = ctx.relationships.iter().find(|r| r.name == head)?;
            let peers = ctx.peers?;
            if rel.is_ref() {
                let fk = field_value(entity, &rel.fk_field());
                let id = fk.as_str()?;
                let peer = peers.get(&rel.target, id)?;
                Some(field_value(&peer, rest))
            } else {
                // Inverse: "any peer satisfies" semantics for nested traversal.
                let fk_field = rel.fk_field();
                let peer_entities = peers.scan_by_fk(&rel.target, &fk_field, &entity.id);
                for peer in &peer_entities {
                    if let Some(v) = resolve_path(peer, rest, ctx) {
                        return Some(v);
                    }
                }
                None
            }
        }
    }
}

fn field_value(entity: &Entity, field: &str) -> Value {
    match field {
        "id" => Value::String(entity.id.clone()),
        "createdAt" => Value::String(entity.created_at.to_rfc3339()),
        "updatedAt" => Value::String(entity.updated_at.to_rfc3339()),
        "deletedAt" => entity
            .deleted_at
            .map(|d| Value::String(d.to_rfc3339()))
            .unwrap_or(Value::Null),
        other => entity.get(other).cloned().unwrap_or(Value::Null),
    }
}

pub(crate) fn apply_op(value: &Value, op: &FieldOp) -> bool {
    match op {
        FieldOp::Eq(target) => values_equal(value, target),
        FieldOp::Ne(target) => !values_equal(value, target),
        FieldOp::Gt(target) => matches!(value.compare(target), Some(std::cmp::Ordering::Greater)),
        FieldOp::Gte(target) => matches!(
            value.compare(target),
            Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
        ),
        FieldOp::Lt(target) => matches!(value.compare(target), Some(std::cmp::Ordering::Less)),
        FieldOp::Lte(target) => matches!(
            value.compare(target),
            Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
        ),
        FieldOp::In(options) => options.iter().any(|o| values_equal(value, o)),
        FieldOp::Nin(options) => !options.iter().any(|o| values_equal(value, o)),
        FieldOp::StartsWith(prefix) => value.as_str().map(|s| s.starts_with(prefix.as_str())).unwrap_or(false),
        FieldOp::EndsWith(suffix) => value.as_str().map(|s| s.ends_with(suffix.as_str())).unwrap_or(false),
        FieldOp::Contains(needle) => match (value, needle) {
            (Value::String(s), Value::String(n)) => s.contains(n.as_str()),
            (Value::Array(items), _) => items.iter().any(|i| values_equal(i, needle)),
            _ => false,
        },
        FieldOp::Search(needle) => value
            .as_str()
            .map(|s| s.to_lowercase().contains(&needle.to_lowercase()))
            .unwrap_or(false),
        FieldOp::All(required) => match value {
            Value::Array(items) => required.iter().all(|r| items.iter().any(|i| values_equal(i, r))),
            _ => false,
        },
        FieldOp::Size(n) => matches!(value, Value::Array(items) if items.len() == *n),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a.compare(b) == Some(std::cmp::Ordering::Equal) || a == b
}

/// Compiles a predicate closure from a `Where` tree plus its evaluation
/// context, for callers (`updateMany`, `deleteMany`) that want a reusable
/// `Fn(&Entity) -> bool` rather than re-walking the tree with a fresh `ctx`
/// each time.
pub fn compile<'a>(
    node: Where,
    relationships: &'a [RelationshipConfig],
    peers: Option<&'a dyn PeerReader>,
) -> impl Fn(&Entity) -> bool + 'a {
    move |entity: &Entity| {
        let ctx = FilterCtx { relationships, peers };
        matches(&node, entity, &ctx)
    }
}

/// Extracts the literal equality value for `field` at the top level of a
/// `where` tree, if one is directly and unambiguously present (used by the
/// query pipeline's index-probe fast path and by `upsert`'s `where`
/// resolution). Only looks at a top-level `Field`/`And` shape; does not
/// attempt to prove equivalence through `Or`/`Not`.
pub fn top_level_eq<'a>(node: &'a Where, field: &str) -> Option<&'a Value> {
    match node {
        Where::Field(f, FieldOp::Eq(v)) if f == field => Some(v),
        Where::And(conds) => conds.iter().find_map(|c| top_level_eq(c, field)),
        _ => None,
    }
}

/// Compiles a single-key operator object (e.g. `{"$gt": 5}`) into a
/// `FieldOp`, for callers that evaluate a predicate directly against a bare
/// `Value` rather than an entity field (the mutation pipeline's `$remove`
/// array predicate). Returns `None` if `map` isn't shaped like one of these
/// operator objects, so callers can fall back to value-equality semantics.
pub(crate) fn field_op_from_object(map: &IndexMap<String, Value>) -> Option<FieldOp> {
    if map.len() != 1 {
        return None;
    }
    let (key, arg) = map.iter().next()?;
    let op = match key.as_str() {
        "$eq" => FieldOp::Eq(arg.clone()),
        "$ne" => FieldOp::Ne(arg.clone()),
        "$gt" => FieldOp::Gt(arg.clone()),
        "$gte" => FieldOp::Gte(arg.clone()),
        "$lt" => FieldOp::Lt(arg.clone()),
        "$lte" => FieldOp::Lte(arg.clone()),
        "$in" => FieldOp::In(arg.as_array()?.to_vec()),
        "$nin" => FieldOp::Nin(arg.as_array()?.to_vec()),
        "$startsWith" => FieldOp::StartsWith(arg.as_str()?.to_string()),
        "$endsWith" => FieldOp::EndsWith(arg.as_str()?.to_string()),
        "$contains" => FieldOp::Contains(arg.clone()),
        "$search" => FieldOp::Search(arg.as_str()?.to_string()),
        "$all" => FieldOp::All(arg.as_array()?.to_vec()),
        "$size" => FieldOp::Size(arg.as_i64()? as usize),
        _ => return None,
    };
    Some(op)
}

pub fn field_map_to_where(fields: &HashMap<String, Value>) -> Where {
    Where::And(
        fields
            .iter()
            .map(|(k, v)| Where::Field(k.clone(), FieldOp::Eq(v.clone())))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdMap;

    fn entity(id: &str, year: i64) -> Entity {
        let mut fields = StdMap::new();
        fields.insert("year".to_string(), Value::Int(year));
        Entity::new(id.to_string(), fields)
    }

    #[test]
    fn or_over_empty_list_is_false() {
        let e = entity("1", 2000);
        let ctx = FilterCtx::new(&[]);
        assert!(!matches(&Where::Or(vec![]), &e, &ctx));
    }

    #[test]
    fn and_over_empty_list_is_true() {
        let e = entity("1", 2000);
        let ctx = FilterCtx::new(&[]);
        assert!(matches(&Where::And(vec![]), &e, &ctx));
    }

    #[test]
    fn gte_compares_numerically() {
        let e = entity("1", 2000);
        let ctx = FilterCtx::new(&[]);
        assert!(matches(&Where::field("year", FieldOp::Gte(Value::Int(2000))), &e, &ctx));
        assert!(!matches(&Where::field("year", FieldOp::Gt(Value::Int(2000))), &e, &ctx));
    }

    #[test]
    fn not_negates_inner() {
        let e = entity("1", 2000);
        let ctx = FilterCtx::new(&[]);
        let inner = Where::eq("year", 2000i64);
        assert!(!matches(&Where::not(inner), &e, &ctx));
    }
}
