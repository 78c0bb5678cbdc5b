//! Schema bridge (C2) — decode/encode entities, mapping parse failures to
//! `ValidationError`.
//!
//! Per the "deeply reflective record handling -> schema-driven codecs"
//! design note, the engine never inspects `unknown`-typed data ad hoc: a
//! `Schema` converts the raw decoded field map into a validated field map
//! exactly once on the way in, and does the inverse on the way out. Most
//! collections use the permissive default; `StructSchema` is the
//! declarative, typed alternative for collections that want field-level
//! enforcement.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ProseError, Result, ValidationIssue};
use crate::value::Value;

/// Runtime type tag a `FieldSpec` can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Null,
    Bool,
    Int,
    Float,
    Number,
    String,
    Array,
    Object,
    Any,
}

impl FieldType {
    fn matches(self, value: &Value) -> bool {
        match (self, value) {
            (FieldType::Any, _) => true,
            (FieldType::Null, Value::Null) => true,
            (FieldType::Bool, Value::Bool(_)) => true,
            (FieldType::Int, Value::Int(_)) => true,
            (FieldType::Float, Value::Float(_)) => true,
            (FieldType::Number, Value::Int(_)) | (FieldType::Number, Value::Float(_)) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Array, Value::Array(_)) => true,
            (FieldType::Object, Value::Object(_)) => true,
            _ => false,
        }
    }
}

/// A single declared field in a `StructSchema`.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
    pub required: bool,
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: false,
        }
    }
}

/// Decode/encode contract for a collection: the source of truth for shape
/// and types.
pub trait Schema: Send + Sync {
    /// Validate and normalize a raw field map into its decoded form.
    fn decode(&self, raw: HashMap<String, Value>) -> Result<HashMap<String, Value>>;

    /// Project a decoded field map back to its on-disk encoded form.
    /// Default is the identity conversion (most collections don't need a
    /// distinct wire shape from their in-memory shape).
    fn encode(&self, fields: &HashMap<String, Value>) -> HashMap<String, Value> {
        fields.clone()
    }
}

/// The permissive default: accepts any fields, requires nothing. Used by
/// collections that don't declare a `StructSchema`.
pub struct PermissiveSchema;

impl Schema for PermissiveSchema {
    fn decode(&self, raw: HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        Ok(raw)
    }
}

/// A declarative, field-level schema: required/optional fields with a
/// runtime type tag. Extra undeclared fields pass through unchanged.
pub struct StructSchema {
    pub fields: Vec<FieldSpec>,
}

impl StructSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }
}

impl Schema for StructSchema {
    fn decode(&self, raw: HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        let mut issues = Vec::new();
        for spec in &self.fields {
            match raw.get(&spec.name) {
                Some(value) => {
                    if !spec.ty.matches(value) {
                        issues.push(ValidationIssue::new(
                            spec.name.clone(),
                            format!("expected {:?}, got {:?}", spec.ty, value),
                        ));
                    }
                }
                None if spec.required => {
                    issues.push(ValidationIssue::new(spec.name.clone(), "required field missing"));
                }
                None => {}
            }
        }
        if issues.is_empty() {
            Ok(raw)
        } else {
            Err(ProseError::Validation { issues })
        }
    }
}

/// Shared handle to a collection's schema, defaulting to permissive.
pub fn permissive() -> Arc<dyn Schema> {
    Arc::new(PermissiveSchema)
}
