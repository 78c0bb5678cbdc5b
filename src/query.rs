//! Query pipeline (C10) — filter -> sort -> paginate -> populate -> select,
//! plus aggregate/groupBy and cursor pagination.
//!
//! A query is compiled once into a `QuerySpec`, then run as a sequence of
//! plain, non-suspending transforms over a `Vec<Entity>` snapshot (§4.8
//! step 1: a frozen read of the state cell, so the whole pipeline runs
//! against one consistent view regardless of what mutations commit
//! meanwhile).

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::database::{Collection, DatabaseInner, DbPeerReader};
use crate::error::{ProseError, Result};
use crate::filter::{matches, FilterCtx, Where};
use crate::value::{Entity, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct SortKey {
    pub field: String,
    pub dir: SortDir,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self { field: field.into(), dir: SortDir::Asc }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self { field: field.into(), dir: SortDir::Desc }
    }
}

/// Offset/limit or cursor-based pagination (§4.8 stage 4).
#[derive(Debug, Clone)]
pub enum Pagination {
    Offset { offset: usize, limit: Option<usize> },
    Cursor(CursorSpec),
}

#[derive(Debug, Clone)]
pub struct CursorSpec {
    pub key_field: String,
    pub after: Option<String>,
    pub before: Option<String>,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

/// A populate request tree: relationship name -> optional nested populate
/// (recursion is capped at depth 5, the cycle breaker named in §9).
#[derive(Debug, Clone, Default)]
pub struct PopulateTree(pub HashMap<String, PopulateNode>);

#[derive(Debug, Clone, Default)]
pub struct PopulateNode {
    pub nested: PopulateTree,
}

impl PopulateTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, relation: impl Into<String>, nested: PopulateTree) -> Self {
        self.0.insert(relation.into(), PopulateNode { nested });
        self
    }

    pub fn leaf(relation: impl Into<String>) -> Self {
        Self::new().with(relation, PopulateTree::new())
    }
}

const MAX_POPULATE_DEPTH: usize = 5;

#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub where_: Option<Where>,
    pub sort: Vec<SortKey>,
    pub pagination: Option<Pagination>,
    pub populate: Option<PopulateTree>,
    pub select: Option<Vec<String>>,
    /// Dangling populate refs raise `DanglingReferenceError` instead of
    /// being silently stripped.
    pub strict_populate: bool,
}

impl Default for QuerySpec {
    fn default() -> Self {
        Self {
            where_: None,
            sort: Vec::new(),
            pagination: None,
            populate: None,
            select: None,
            strict_populate: false,
        }
    }
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, where_: Where) -> Self {
        self.where_ = Some(where_);
        self
    }

    pub fn sort_by(mut self, keys: Vec<SortKey>) -> Self {
        self.sort = keys;
        self
    }

    pub fn offset_limit(mut self, offset: usize, limit: Option<usize>) -> Self {
        self.pagination = Some(Pagination::Offset { offset, limit });
        self
    }

    pub fn cursor(mut self, spec: CursorSpec) -> Self {
        self.pagination = Some(Pagination::Cursor(spec));
        self
    }

    pub fn populate(mut self, tree: PopulateTree) -> Self {
        self.populate = Some(tree);
        self
    }

    pub fn select_fields(mut self, fields: Vec<String>) -> Self {
        self.select = Some(fields);
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict_populate = true;
        self
    }
}

pub struct QueryResult {
    pub items: Vec<IndexMap<String, Value>>,
    pub page_info: Option<PageInfo>,
}

impl Collection {
    /// Run a compiled query against this collection's current snapshot.
    pub fn query(&self, spec: &QuerySpec) -> Result<QueryResult> {
        let db = self.database();
        let peer_reader = db.as_ref().map(|d| DbPeerReader { db: d.as_ref() });
        let ctx = match &peer_reader {
            Some(r) => FilterCtx::with_peers(&self.config.relationships, r),
            None => FilterCtx::new(&self.config.relationships),
        };

        // Stage 1: source. An index-probe fast path replaces the full scan
        // when the top-level `where` is a direct equality on an indexed
        // field; order is still the map's insertion order since `IndexSet`
        // doesn't promise any ordering of its own (acceleration is
        // observable only through speed, never through results, per §3).
        let snapshot = self.state.snapshot();
        let mut entities: Vec<Entity> = match self.indexed_source(spec.where_.as_ref()) {
            Some(ids) => ids.iter().filter_map(|id| snapshot.get(id)).cloned().collect(),
            None => snapshot.values().cloned().collect(),
        };

        // Stage 2: filter.
        if let Some(where_) = &spec.where_ {
            entities.retain(|e| matches(where_, e, &ctx));
        }

        // Stage 3: sort.
        sort_entities(&mut entities, &spec.sort);

        // Stage 4: paginate.
        let page_info = match &spec.pagination {
            None => None,
            Some(Pagination::Offset { offset, limit }) => {
                entities = entities.into_iter().skip(*offset).take(limit.unwrap_or(usize::MAX)).collect();
                None
            }
            Some(Pagination::Cursor(cursor_spec)) => {
                if spec.sort.is_empty() {
                    sort_entities(&mut entities, &[SortKey::asc(cursor_spec.key_field.clone())]);
                }
                let (page, info) = paginate_cursor(entities, cursor_spec)?;
                entities = page;
                Some(info)
            }
        };

        // Stage 5 + 6: populate, then select.
        let mut items = Vec::with_capacity(entities.len());
        for entity in &entities {
            let mut obj = entity.to_object();
            if let Some(tree) = &spec.populate {
                populate_into(&mut obj, entity, tree, db.as_deref(), self, 0, spec.strict_populate)?;
            }
            if let Some(fields) = &spec.select {
                project(&mut obj, fields, spec.populate.as_ref());
            }
            items.push(obj);
        }

        Ok(QueryResult { items, page_info })
    }

    /// If `where_` is a direct equality on a field this collection has a
    /// secondary index for, probe it instead of scanning the whole map.
    fn indexed_source(&self, where_: Option<&Where>) -> Option<Vec<String>> {
        let where_ = where_?;
        for field in &self.config.indexes {
            if let Some(value) = crate::filter::top_level_eq(where_, field) {
                let index = self.indexes.get(field)?;
                return Some(index.probe(value));
            }
        }
        None
    }

    pub fn aggregate(&self, where_: Option<&Where>, spec: &AggregateSpec) -> Result<AggregateResult> {
        let db = self.database();
        let peer_reader = db.as_ref().map(|d| DbPeerReader { db: d.as_ref() });
        let ctx = match &peer_reader {
            Some(r) => FilterCtx::with_peers(&self.config.relationships, r),
            None => FilterCtx::new(&self.config.relationships),
        };
        let snapshot = self.state.snapshot();
        let mut entities: Vec<&Entity> = snapshot.values().collect();
        if let Some(w) = where_ {
            entities.retain(|e| matches(w, e, &ctx));
        }

        if spec.group_by.is_empty() {
            let aggs = compute_aggregates(&entities, &spec.aggregates);
            return Ok(AggregateResult::Scalar(aggs));
        }

        let mut groups: IndexMap<Vec<String>, Vec<&Entity>> = IndexMap::new();
        for e in entities {
            let key: Vec<String> = spec
                .group_by
                .iter()
                .map(|f| display_value(&field_or_reserved(e, f)))
                .collect();
            groups.entry(key).or_default().push(e);
        }

        let mut buckets = Vec::with_capacity(groups.len());
        for (key_values, members) in groups {
            let mut key_obj = IndexMap::new();
            for (field, value) in spec.group_by.iter().zip(key_values.iter()) {
                key_obj.insert(field.clone(), Value::String(value.clone()));
            }
            let aggs = compute_aggregates(&members, &spec.aggregates);
            buckets.push((key_obj, aggs));
        }
        Ok(AggregateResult::Grouped(buckets))
    }
}

#[derive(Debug, Clone)]
pub enum AggFn {
    Count,
    Sum(String),
    Avg(String),
    Min(String),
    Max(String),
}

impl AggFn {
    fn output_key(&self) -> String {
        match self {
            AggFn::Count => "count".to_string(),
            AggFn::Sum(f) => format!("sum_{f}"),
            AggFn::Avg(f) => format!("avg_{f}"),
            AggFn::Min(f) => format!("min_{f}"),
            AggFn::Max(f) => format!("max_{f}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregateSpec {
    pub aggregates: Vec<AggFn>,
    pub group_by: Vec<String>,
}

pub enum AggregateResult {
    Scalar(IndexMap<String, Value>),
    Grouped(Vec<(IndexMap<String, Value>, IndexMap<String, Value>)>),
}

fn compute_aggregates(entities: &[&Entity], aggs: &[AggFn]) -> IndexMap<String, Value> {
    let mut out = IndexMap::new();
    for agg in aggs {
        let value = match agg {
            AggFn::Count => Value::Int(entities.len() as i64),
            AggFn::Sum(field) => Value::Float(numeric_values(entities, field).sum()),
            AggFn::Avg(field) => {
                let values: Vec<f64> = numeric_values(entities, field).collect();
                if values.is_empty() {
                    Value::Null
                } else {
                    Value::Float(values.iter().sum::<f64>() / values.len() as f64)
                }
            }
            AggFn::Min(field) => numeric_values(entities, field)
                .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))))
                .map(Value::Float)
                .unwrap_or(Value::Null),
            AggFn::Max(field) => numeric_values(entities, field)
                .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
                .map(Value::Float)
                .unwrap_or(Value::Null),
        };
        out.insert(agg.output_key(), value);
    }
    out
}

fn numeric_values<'a>(entities: &'a [&'a Entity], field: &'a str) -> impl Iterator<Item = f64> + 'a {
    entities.iter().filter_map(move |e| field_or_reserved(e, field).as_f64())
}

fn field_or_reserved(entity: &Entity, field: &str) -> Value {
    match field {
        "id" => Value::String(entity.id.clone()),
        "createdAt" => Value::String(entity.created_at.to_rfc3339()),
        "updatedAt" => Value::String(entity.updated_at.to_rfc3339()),
        other => entity.get(other).cloned().unwrap_or(Value::Null),
    }
}

fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_json().to_string(),
    }
}

/// Stable multi-key sort; ties fall through to the next key, and finally to
/// `id` ascending (§4.8 stage 3).
fn sort_entities(entities: &mut [Entity], keys: &[SortKey]) {
    entities.sort_by(|a, b| {
        for key in keys {
            let va = field_or_reserved(a, &key.field);
            let vb = field_or_reserved(b, &key.field);
            if let Some(ord) = va.compare(&vb) {
                let ord = if key.dir == SortDir::Desc { ord.reverse() } else { ord };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
        }
        a.id.cmp(&b.id)
    });
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// Encodes the cursor for one entity: the key field's canonical bytes plus
/// the entity's id, so the cursor round-trips to an exact (value, id) pair
/// even when the key field is not itself unique.
fn encode_cursor(entity: &Entity, key_field: &str) -> String {
    let value = field_or_reserved(entity, key_field);
    format!("{}.{}", hex_encode(&value.canonical_bytes()), hex_encode(entity.id.as_bytes()))
}

fn decode_cursor(cursor: &str) -> Option<(Vec<u8>, String)> {
    let (value_hex, id_hex) = cursor.split_once('.')?;
    let value_bytes = hex_decode(value_hex)?;
    let id_bytes = hex_decode(id_hex)?;
    let id = String::from_utf8(id_bytes).ok()?;
    Some((value_bytes, id))
}

fn position_of(entities: &[Entity], key_field: &str, cursor: &str) -> Option<usize> {
    let (value_bytes, id) = decode_cursor(cursor)?;
    entities
        .iter()
        .position(|e| e.id == id && field_or_reserved(e, key_field).canonical_bytes() == value_bytes)
}

/// Cursor pagination: the page is computed by peeking one extra element
/// past `limit` so `has_next_page`/`has_previous_page` never need a second
/// pass over the full collection (§4.8 stage 4).
fn paginate_cursor(entities: Vec<Entity>, spec: &CursorSpec) -> Result<(Vec<Entity>, PageInfo)> {
    let limit = spec.limit.max(0);

    if let Some(after) = &spec.after {
        let start = position_of(&entities, &spec.key_field, after).map(|p| p + 1).unwrap_or(0);
        let slice = &entities[start.min(entities.len())..];
        let has_next_page = slice.len() > limit;
        let page: Vec<Entity> = slice.iter().take(limit).cloned().collect();
        let info = PageInfo {
            start_cursor: page.first().map(|e| encode_cursor(e, &spec.key_field)),
            end_cursor: page.last().map(|e| encode_cursor(e, &spec.key_field)),
            has_next_page,
            has_previous_page: start > 0,
        };
        return Ok((page, info));
    }

    if let Some(before) = &spec.before {
        let end = position_of(&entities, &spec.key_field, before).unwrap_or(entities.len());
        let slice = &entities[..end.min(entities.len())];
        let has_previous_page = slice.len() > limit;
        let start = slice.len().saturating_sub(limit);
        let page: Vec<Entity> = slice[start..].to_vec();
        let info = PageInfo {
            start_cursor: page.first().map(|e| encode_cursor(e, &spec.key_field)),
            end_cursor: page.last().map(|e| encode_cursor(e, &spec.key_field)),
            has_next_page: end < entities.len(),
            has_previous_page,
        };
        return Ok((page, info));
    }

    let has_next_page = entities.len() > limit;
    let page: Vec<Entity> = entities.into_iter().take(limit).collect();
    let info = PageInfo {
        start_cursor: page.first().map(|e| encode_cursor(e, &spec.key_field)),
        end_cursor: page.last().map(|e| encode_cursor(e, &spec.key_field)),
        has_next_page,
        has_previous_page: false,
    };
    Ok((page, info))
}

/// Resolve a populate tree into `obj`, recursing through nested populate
/// requests up to `MAX_POPULATE_DEPTH`. A `ref` relationship with a null/
/// absent FK yields `Value::Null` ("populating a relationship whose FK is
/// null yields undefined", §8); `inverse` always yields an array, empty
/// when no peers match.
fn populate_into(
    obj: &mut IndexMap<String, Value>,
    entity: &Entity,
    tree: &PopulateTree,
    db: Option<&DatabaseInner>,
    owner: &Collection,
    depth: usize,
    strict: bool,
) -> Result<()> {
    if depth >= MAX_POPULATE_DEPTH {
        return Ok(());
    }
    let Some(db) = db else {
        for name in tree.0.keys() {
            obj.insert(name.clone(), Value::Null);
        }
        return Ok(());
    };

    for (name, node) in &tree.0 {
        let Some(rel) = owner.config.relationship(name) else {
            continue;
        };
        if rel.is_ref() {
            let fk = entity.get(&rel.fk_field()).cloned().unwrap_or(Value::Null);
            let id = match &fk {
                Value::String(s) if !s.is_empty() => s.clone(),
                _ => {
                    obj.insert(name.clone(), Value::Null);
                    continue;
                }
            };
            let Some(target_coll) = db.collections.get(&rel.target) else {
                continue;
            };
            match target_coll.get(&id) {
                Some(peer) => {
                    let mut peer_obj = peer.to_object();
                    if !node.nested.0.is_empty() {
                        populate_into(&mut peer_obj, &peer, &node.nested, Some(db), target_coll.as_ref(), depth + 1, strict)?;
                    }
                    obj.insert(name.clone(), Value::Object(peer_obj));
                }
                None => {
                    if strict {
                        return Err(ProseError::DanglingReference {
                            collection: owner.name.clone(),
                            field: rel.fk_field(),
                            value: id,
                        });
                    }
                    obj.insert(name.clone(), Value::Null);
                }
            }
        } else {
            let fk_field = rel.fk_field();
            let Some(target_coll) = db.collections.get(&rel.target) else {
                obj.insert(name.clone(), Value::Array(Vec::new()));
                continue;
            };
            let mut peers: Vec<Value> = Vec::new();
            for peer in target_coll.state.snapshot().values() {
                if peer.get(&fk_field).and_then(|v| v.as_str()) == Some(entity.id.as_str()) {
                    let mut peer_obj = peer.to_object();
                    if !node.nested.0.is_empty() {
                        populate_into(&mut peer_obj, peer, &node.nested, Some(db), target_coll.as_ref(), depth + 1, strict)?;
                    }
                    peers.push(Value::Object(peer_obj));
                }
            }
            obj.insert(name.clone(), Value::Array(peers));
        }
    }
    Ok(())
}

/// Select stage: keep only the listed fields, plus whatever the populate
/// stage already wrote (§4.8 step 6: "projected fields include explicitly
/// populated peers").
fn project(obj: &mut IndexMap<String, Value>, fields: &[String], populate: Option<&PopulateTree>) {
    let keep: std::collections::HashSet<&str> = fields.iter().map(|s| s.as_str()).chain(
        populate.into_iter().flat_map(|t| t.0.keys().map(|s| s.as_str())),
    ).collect();
    obj.retain(|k, _| keep.contains(k.as_str()));
}
