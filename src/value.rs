//! Core value and entity types shared by every ProseQL collection.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Entity identifier. Opaque from the engine's point of view; callers may
/// supply their own or let `create` generate one.
pub type EntityId = String;

/// Collection name.
pub type CollectionName = String;

/// Schema-neutral runtime representation of a decoded field value.
///
/// Field order within `Object` is preserved (`IndexMap`-backed) so that
/// re-serialized documents are stable across load/save cycles, which matters
/// for line-oriented and diff-friendly formats.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Byte-unambiguous canonical encoding used by the unique-index manager
    /// so that e.g. the string `"1"` and the number `1` never collide.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            Value::Null => vec![0x00],
            Value::Bool(b) => vec![0x01, if *b { 1 } else { 0 }],
            Value::Int(i) => {
                let mut v = vec![0x02];
                v.extend_from_slice(&i.to_be_bytes());
                v
            }
            Value::Float(f) => {
                let mut v = vec![0x03];
                v.extend_from_slice(&f.to_be_bytes());
                v
            }
            Value::String(s) => {
                let mut v = vec![0x04];
                v.extend_from_slice(s.as_bytes());
                v
            }
            Value::Array(items) => {
                let mut v = vec![0x05];
                for item in items {
                    let bytes = item.canonical_bytes();
                    v.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                    v.extend_from_slice(&bytes);
                }
                v
            }
            Value::Object(map) => {
                let mut v = vec![0x06];
                for (k, val) in map {
                    v.extend_from_slice(&(k.len() as u32).to_be_bytes());
                    v.extend_from_slice(k.as_bytes());
                    let bytes = val.canonical_bytes();
                    v.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                    v.extend_from_slice(&bytes);
                }
                v
            }
        }
    }

    /// Convert to a `serde_json::Value`, the lingua franca most serializer
    /// backends (json5, jsonc, hjson, toml) already speak.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl Value {
    /// Ordering for `$gt`/`$gte`/`$lt`/`$lte` and for sort keys. `None` when
    /// the two values are not order-comparable (e.g. a string against a
    /// number), which the query pipeline treats as "condition not satisfied"
    /// / "keys tie, fall through to the next sort key".
    pub fn compare(&self, other: &Value) -> Option<std::cmp::Ordering> {
        use std::cmp::Ordering;
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// A decoded entity: the reserved identity/timestamp fields plus an open map
/// of schema-defined fields.
///
/// Mirrors the teacher's `Document` (which reserves `_id`/`_rev`/`_created`/
/// `_updated`) but with ProseQL's own reserved names and a `deleted_at` slot
/// that is only meaningful when the owning collection's schema declares it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
}

impl Entity {
    pub fn new(id: EntityId, fields: HashMap<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            fields,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    pub fn is_soft_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Project this entity to the canonical document shape (reserved fields
    /// first, in declaration order, followed by the schema-defined fields)
    /// used by query results, populate, and select. Distinct from
    /// `persistence::entity_to_object`: this never runs the fields through
    /// the schema's `encode`, since query output is the decoded form.
    pub fn to_object(&self) -> IndexMap<String, Value> {
        let mut obj = IndexMap::new();
        obj.insert("id".to_string(), Value::String(self.id.clone()));
        obj.insert("createdAt".to_string(), Value::String(self.created_at.to_rfc3339()));
        obj.insert("updatedAt".to_string(), Value::String(self.updated_at.to_rfc3339()));
        if let Some(deleted) = self.deleted_at {
            obj.insert("deletedAt".to_string(), Value::String(deleted.to_rfc3339()));
        }
        for (k, v) in &self.fields {
            obj.insert(k.clone(), v.clone());
        }
        obj
    }
}
