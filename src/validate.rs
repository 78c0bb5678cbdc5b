//! Validator suite (C7) — three pure predicates, each producing a typed
//! error on rejection. None of these mutate; all read from snapshots.

use std::collections::HashMap;

use crate::config::RelationshipConfig;
use crate::error::{ProseError, Result};
use crate::index::UniqueIndexManager;
use crate::value::{Entity, Value};

/// Cross-collection lookups the FK validator needs. Implemented by the
/// database façade; kept as a trait here so the validator stays decoupled
/// from `Database`'s concrete shape.
pub trait PeerResolver {
    fn collection_exists(&self, name: &str) -> bool;
    fn entity_exists(&self, collection: &str, id: &str) -> bool;
}

/// `updates` must not mention `id` or `createdAt`.
pub fn check_immutable_fields(updates: &HashMap<String, Value>) -> Result<()> {
    let mut issues = Vec::new();
    if updates.contains_key("id") {
        issues.push(crate::error::ValidationIssue::new("id", "id is immutable"));
    }
    if updates.contains_key("createdAt") {
        issues.push(crate::error::ValidationIssue::new(
            "createdAt",
            "createdAt is immutable",
        ));
    }
    if issues.is_empty() {
        Ok(())
    } else {
        Err(ProseError::Validation { issues })
    }
}

/// For each constraint tuple the candidate fills, either no existing entity
/// holds that tuple, or the holder is the candidate itself (identity by id).
pub fn check_unique_constraints(
    collection: &str,
    candidate: &Entity,
    unique: &UniqueIndexManager,
) -> Result<()> {
    for fields in unique.constraints().map(|f| f.to_vec()).collect::<Vec<_>>() {
        let values: Vec<Value> = fields
            .iter()
            .map(|f| field_value(candidate, f))
            .collect();
        if values.iter().any(|v| v.is_null()) {
            continue;
        }
        if let Some(holder) = unique.probe(&fields, &values) {
            if holder != candidate.id {
                return Err(ProseError::UniqueConstraint {
                    collection: collection.to_string(),
                    constraint: fields,
                    values: values.iter().map(value_display).collect(),
                    holder_id: holder,
                });
            }
        }
    }
    Ok(())
}

/// For each `ref` field whose value is non-null, the target collection must
/// exist and contain an entity with that id.
pub fn check_foreign_keys(
    collection: &str,
    candidate: &Entity,
    relationships: &[RelationshipConfig],
    peers: &dyn PeerResolver,
) -> Result<()> {
    for rel in relationships.iter().filter(|r| r.is_ref()) {
        let field = rel.fk_field();
        let value = candidate.get(&field);
        let id = match value {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Null) | None => continue,
            Some(other) => {
                return Err(ProseError::ForeignKey {
                    collection: collection.to_string(),
                    field,
                    value: value_display(other),
                    target_collection: rel.target.clone(),
                })
            }
        };
        if !peers.collection_exists(&rel.target) {
            return Err(ProseError::ForeignKey {
                collection: collection.to_string(),
                field,
                value: id,
                target_collection: rel.target.clone(),
            });
        }
        if !peers.entity_exists(&rel.target, &id) {
            return Err(ProseError::ForeignKey {
                collection: collection.to_string(),
                field,
                value: id,
                target_collection: rel.target.clone(),
            });
        }
    }
    Ok(())
}

pub(crate) fn field_value(entity: &Entity, field: &str) -> Value {
    if field == "id" {
        Value::String(entity.id.clone())
    } else {
        entity.get(field).cloned().unwrap_or(Value::Null)
    }
}

fn value_display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_json().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdMap;

    #[test]
    fn rejects_immutable_field_in_update() {
        let mut updates = StdMap::new();
        updates.insert("id".to_string(), Value::String("x".to_string()));
        assert!(check_immutable_fields(&updates).is_err());
    }

    #[test]
    fn allows_other_fields_in_update() {
        let mut updates = StdMap::new();
        updates.insert("name".to_string(), Value::String("x".to_string()));
        assert!(check_immutable_fields(&updates).is_ok());
    }
}
