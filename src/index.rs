//! Unique-index manager (C6).
//!
//! Normalizes a collection's declared unique constraints into field-tuples
//! and maintains, per tuple, a hash map from the tuple's canonical byte
//! encoding to the holding entity's id. Grounded in the teacher's
//! `HashIndex` (`index/mod.rs`) shape, generalized from a single-field
//! byte-key index to one index per declared tuple.

use dashmap::DashMap;
use std::collections::HashMap;

use crate::value::{Entity, EntityId, Value};

/// Reserved fields (`id`) live on `Entity` itself rather than in
/// `Entity::fields`; constraints/indexes declared over them need a
/// synthetic lookup that returns an owned value.
fn field_value(entity: &Entity, field: &str) -> Option<Value> {
    if field == "id" {
        return Some(Value::String(entity.id.clone()));
    }
    entity.fields.get(field).cloned()
}

/// One maintained unique-constraint index, keyed by the tuple's canonical
/// byte encoding.
struct ConstraintIndex {
    fields: Vec<String>,
    entries: DashMap<Vec<u8>, EntityId>,
}

/// Maintains every declared unique constraint for one collection.
pub struct UniqueIndexManager {
    constraints: Vec<ConstraintIndex>,
}

impl UniqueIndexManager {
    pub fn new(constraints: &[Vec<String>]) -> Self {
        Self {
            constraints: constraints
                .iter()
                .map(|fields| ConstraintIndex {
                    fields: fields.clone(),
                    entries: DashMap::new(),
                })
                .collect(),
        }
    }

    pub fn constraints(&self) -> impl Iterator<Item = &[String]> {
        self.constraints.iter().map(|c| c.fields.as_slice())
    }

    /// Extract the tuple of values for a constraint from an entity. Returns
    /// `None` if any slot is null/absent — per invariant 3, such entities
    /// are excluded from that constraint's index entirely.
    fn tuple_values(entity: &Entity, fields: &[String]) -> Option<Vec<Value>> {
        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            let value = field_value(entity, field)?;
            if value.is_null() {
                return None;
            }
            values.push(value);
        }
        Some(values)
    }

    fn encode(values: &[Value]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for v in values {
            let encoded = v.canonical_bytes();
            bytes.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
            bytes.extend_from_slice(&encoded);
        }
        bytes
    }

    /// Probe a constraint by explicit field/value pairs (used by `upsert`'s
    /// `where` resolution and by the unique-constraint validator).
    pub fn probe(&self, fields: &[String], values: &[Value]) -> Option<EntityId> {
        let idx = self.constraints.iter().find(|c| c.fields == fields)?;
        if values.iter().any(|v| v.is_null()) {
            return None;
        }
        idx.entries.get(&Self::encode(values)).map(|e| e.clone())
    }

    /// Record an inserted entity in every constraint it fills.
    pub fn observe_insert(&self, entity: &Entity) {
        for idx in &self.constraints {
            if let Some(values) = Self::tuple_values(entity, &idx.fields) {
                idx.entries.insert(Self::encode(&values), entity.id.clone());
            }
        }
    }

    /// Record a replacement: remove the old tuple binding (if it pointed at
    /// `old`), then insert the new one.
    pub fn observe_replace(&self, old: &Entity, new: &Entity) {
        for idx in &self.constraints {
            if let Some(values) = Self::tuple_values(old, &idx.fields) {
                let key = Self::encode(&values);
                if idx.entries.get(&key).map(|v| v.clone()).as_deref() == Some(old.id.as_str()) {
                    idx.entries.remove(&key);
                }
            }
            if let Some(values) = Self::tuple_values(new, &idx.fields) {
                idx.entries.insert(Self::encode(&values), new.id.clone());
            }
        }
    }

    pub fn observe_delete(&self, entity: &Entity) {
        for idx in &self.constraints {
            if let Some(values) = Self::tuple_values(entity, &idx.fields) {
                let key = Self::encode(&values);
                if idx.entries.get(&key).map(|v| v.clone()).as_deref() == Some(entity.id.as_str()) {
                    idx.entries.remove(&key);
                }
            }
        }
    }

    /// Drop every tracked tuple binding and reinsert from `entities`. Used
    /// after a whole-map replace (external-change reload, migration rewrite)
    /// where there is no well-defined "old" entity per constraint to diff
    /// against.
    pub fn rebuild<'a>(&self, entities: impl Iterator<Item = &'a Entity>) {
        for idx in &self.constraints {
            idx.entries.clear();
        }
        for entity in entities {
            self.observe_insert(entity);
        }
    }
}

/// A secondary, single-field equality-probe index (§3 "zero or more
/// indexes"), observable only through query speed. Built on the same
/// `DashMap<bytes, Vec<id>>` shape as the teacher's `SecondaryIndex`.
pub struct FieldIndex {
    field: String,
    entries: DashMap<Vec<u8>, Vec<EntityId>>,
}

impl FieldIndex {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            entries: DashMap::new(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn rebuild(&self, entities: impl Iterator<Item = Entity>) {
        self.entries.clear();
        for e in entities {
            self.observe_insert(&e);
        }
    }

    pub fn observe_insert(&self, entity: &Entity) {
        if let Some(value) = field_value(entity, &self.field) {
            if !value.is_null() {
                self.entries
                    .entry(value.canonical_bytes())
                    .or_default()
                    .push(entity.id.clone());
            }
        }
    }

    pub fn observe_delete(&self, entity: &Entity) {
        if let Some(value) = field_value(entity, &self.field) {
            if let Some(mut ids) = self.entries.get_mut(&value.canonical_bytes()) {
                ids.retain(|id| id != &entity.id);
            }
        }
    }

    pub fn observe_replace(&self, old: &Entity, new: &Entity) {
        self.observe_delete(old);
        self.observe_insert(new);
    }

    pub fn probe(&self, value: &Value) -> Vec<EntityId> {
        self.entries.get(&value.canonical_bytes()).map(|v| v.clone()).unwrap_or_default()
    }
}

/// Keeps a `FieldIndex` per declared indexed field for a collection.
pub struct IndexSet {
    indexes: HashMap<String, FieldIndex>,
}

impl IndexSet {
    pub fn new(fields: &[String]) -> Self {
        Self {
            indexes: fields
                .iter()
                .map(|f| (f.clone(), FieldIndex::new(f.clone())))
                .collect(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldIndex> {
        self.indexes.get(field)
    }

    pub fn observe_insert(&self, entity: &Entity) {
        for idx in self.indexes.values() {
            idx.observe_insert(entity);
        }
    }

    pub fn observe_delete(&self, entity: &Entity) {
        for idx in self.indexes.values() {
            idx.observe_delete(entity);
        }
    }

    pub fn observe_replace(&self, old: &Entity, new: &Entity) {
        for idx in self.indexes.values() {
            idx.observe_replace(old, new);
        }
    }

    pub fn rebuild(&self, entities: impl Iterator<Item = Entity> + Clone) {
        for idx in self.indexes.values() {
            idx.rebuild(entities.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdMap;

    fn entity(id: &str, email: &str) -> Entity {
        let mut fields = StdMap::new();
        fields.insert("email".to_string(), Value::String(email.to_string()));
        Entity::new(id.to_string(), fields)
    }

    #[test]
    fn string_and_int_never_collide() {
        let a = Value::String("1".to_string());
        let b = Value::Int(1);
        assert_ne!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn unique_index_tracks_insert_and_delete() {
        let mgr = UniqueIndexManager::new(&[vec!["email".to_string()]]);
        let e = entity("1", "a@x.com");
        mgr.observe_insert(&e);
        assert_eq!(
            mgr.probe(&["email".to_string()], &[Value::String("a@x.com".to_string())]),
            Some("1".to_string())
        );
        mgr.observe_delete(&e);
        assert_eq!(
            mgr.probe(&["email".to_string()], &[Value::String("a@x.com".to_string())]),
            None
        );
    }

    #[test]
    fn null_value_skips_index_insertion() {
        let mgr = UniqueIndexManager::new(&[vec!["email".to_string()]]);
        let mut fields = StdMap::new();
        fields.insert("email".to_string(), Value::Null);
        let e = Entity::new("1".to_string(), fields);
        mgr.observe_insert(&e);
        assert_eq!(mgr.probe(&["email".to_string()], &[Value::Null]), None);
    }
}
