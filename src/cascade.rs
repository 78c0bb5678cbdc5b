//! Cascade engine (C9) — create-with-relationships (§4.6) and
//! delete-with-relationships (§4.7).
//!
//! Relationships are stored as ids, not pointers (§9 "cyclic relationship
//! graphs -> id-referenced arenas"), so every cascade operation here is a
//! plain collection-to-collection id lookup rather than a graph traversal.
//!
//! A relationship's declared `on_delete` (`config.rs`) is the *default*
//! cascade policy applied when a `delete`/`deleteMany` call doesn't name an
//! override for that relationship; `preserve` is the field-level default
//! when a collection config doesn't care, but ordinary deletes rely on
//! whichever policy the relationship declares (commonly `restrict` for a
//! required foreign key) to get the referential-integrity guard described
//! in §4.4. A call-supplied override (`overrides` below; `include` in the
//! prose spec) replaces the declared policy for that one call only.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::config::CascadeOption;
use crate::database::{Collection, DatabaseInner, DbPeerReader};
use crate::error::{ProseError, Result, ValidationIssue};
use crate::filter::{matches, FilterCtx, Where};
use crate::value::{Entity, EntityId, Value};

/// One relationship operation attached to a `create` call.
pub enum RelationshipInput {
    /// Attach an existing entity, selected by id or by `{ id }`.
    Connect(Value),
    /// Create a new nested entity and link it.
    Create(HashMap<String, Value>),
    /// Probe by `where`; connect if found, else create.
    ConnectOrCreate { where_: Where, create: HashMap<String, Value> },
}

fn selector_id(selector: &Value) -> Option<String> {
    match selector {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("id").and_then(|v| v.as_str()).map(|s| s.to_string()),
        _ => None,
    }
}

fn find_one(target: &Collection, where_: &Where, db: &DatabaseInner) -> Option<Entity> {
    let reader = DbPeerReader { db };
    let ctx = FilterCtx::with_peers(&target.config().relationships, &reader);
    target
        .state
        .snapshot()
        .values()
        .find(|e| matches(where_, e, &ctx))
        .cloned()
}

impl Collection {
    /// `create`, extended with relationship operations per declared
    /// relationship (§4.6). Execution order: parent id generated up front,
    /// then `$create`, then `$connectOrCreate`, then `$connect`, then the
    /// parent itself is validated and inserted, and finally inverse
    /// `$connect`s write the parent's id back onto the connected peers.
    pub fn create_with_relationships(
        &self,
        mut fields: HashMap<String, Value>,
        relationships: HashMap<String, RelationshipInput>,
        id: Option<String>,
    ) -> Result<Entity> {
        let db = self
            .database()
            .ok_or_else(|| ProseError::Internal("database handle dropped".to_string()))?;
        let parent_id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut inverse_connects: Vec<(Arc<Collection>, String, EntityId)> = Vec::new();

        for (name, op) in &relationships {
            let RelationshipInput::Create(child_fields) = op else { continue };
            let rel = self
                .config()
                .relationship(name)
                .ok_or_else(|| ProseError::Operation(format!("{}: no such relationship {name}", self.name())))?;
            let target = db
                .collections
                .get(&rel.target)
                .ok_or_else(|| ProseError::CollectionNotFound(rel.target.clone()))?
                .clone();
            if rel.is_ref() {
                let child = target.create(child_fields.clone(), None)?;
                fields.insert(rel.fk_field(), Value::String(child.id));
            } else {
                let mut child_fields = child_fields.clone();
                child_fields.insert(rel.fk_field(), Value::String(parent_id.clone()));
                target.create(child_fields, None)?;
            }
        }

        for (name, op) in &relationships {
            let RelationshipInput::ConnectOrCreate { where_, create } = op else { continue };
            let rel = self
                .config()
                .relationship(name)
                .ok_or_else(|| ProseError::Operation(format!("{}: no such relationship {name}", self.name())))?;
            let target = db
                .collections
                .get(&rel.target)
                .ok_or_else(|| ProseError::CollectionNotFound(rel.target.clone()))?
                .clone();
            let resolved_id = match find_one(&target, where_, db.as_ref()) {
                Some(existing) => existing.id,
                None if rel.is_ref() => target.create(create.clone(), None)?.id,
                None => {
                    let mut c = create.clone();
                    c.insert(rel.fk_field(), Value::String(parent_id.clone()));
                    target.create(c, None)?.id
                }
            };
            if rel.is_ref() {
                fields.insert(rel.fk_field(), Value::String(resolved_id));
            }
        }

        for (name, op) in &relationships {
            let RelationshipInput::Connect(selector) = op else { continue };
            let rel = self
                .config()
                .relationship(name)
                .ok_or_else(|| ProseError::Operation(format!("{}: no such relationship {name}", self.name())))?;
            let target = db
                .collections
                .get(&rel.target)
                .ok_or_else(|| ProseError::CollectionNotFound(rel.target.clone()))?
                .clone();
            let target_id = selector_id(selector).ok_or_else(|| ProseError::Operation(format!("{name}: invalid connect selector")))?;
            if target.get(&target_id).is_none() {
                return Err(ProseError::ForeignKey {
                    collection: self.name().to_string(),
                    field: name.clone(),
                    value: target_id,
                    target_collection: rel.target.clone(),
                });
            }
            if rel.is_ref() {
                fields.insert(rel.fk_field(), Value::String(target_id));
            } else {
                inverse_connects.push((target, rel.fk_field(), target_id));
            }
        }

        let parent = self.insert_validated(Entity::new(parent_id.clone(), fields))?;

        for (target, fk_field, child_id) in inverse_connects {
            if let Some(before) = target.state.get(&child_id) {
                let mut after = before.clone();
                after.set(fk_field, Value::String(parent.id.clone()));
                after.updated_at = Utc::now();
                target.state.replace(|map| {
                    let mut next = map.clone();
                    next.insert(child_id.clone(), after.clone());
                    ((), next)
                });
                target.unique.observe_replace(&before, &after);
                target.indexes.observe_replace(&before, &after);
                target.publish(crate::events::ChangeEvent::Updated {
                    collection: target.name().to_string(),
                    before,
                    after,
                });
                target.schedule_save();
            }
        }

        Ok(parent)
    }
}

struct RestrictViolation {
    peer_collection: String,
    count: usize,
}

enum PeerAction {
    Cascade,
    CascadeSoft,
    SetNull { fk_field: String },
}

/// Evaluate and apply every relationship across the database that targets
/// `target_collection`, for a batch delete of `target_ids`. Restrict
/// violations are computed for the whole batch before any writes occur
/// (§4.7: "all targets' restrict-checks are evaluated and combined before
/// any writes occur").
pub(crate) fn apply_delete_cascades(
    db: &DatabaseInner,
    target_collection: &str,
    target_ids: &[EntityId],
    overrides: &HashMap<String, CascadeOption>,
) -> Result<()> {
    if target_ids.is_empty() {
        return Ok(());
    }

    let mut violations: Vec<RestrictViolation> = Vec::new();
    let mut actions: Vec<(Arc<Collection>, PeerAction, Vec<EntityId>)> = Vec::new();

    for entry in db.collections.iter() {
        let peer = entry.value().clone();
        for rel in peer.config().relationships.iter().filter(|r| r.is_ref() && r.target == target_collection) {
            // `include` is keyed by the peer collection's name (e.g.
            // `{ comments: "set_null" }`), not the relationship's own name,
            // matching how callers name the collection they want to affect.
            let effective = overrides.get(peer.name()).copied().unwrap_or(rel.on_delete);
            if effective == CascadeOption::Preserve {
                continue;
            }
            let fk_field = rel.fk_field();
            let ids: Vec<String> = target_ids.to_vec();
            let matching: Vec<EntityId> = peer
                .state
                .snapshot()
                .values()
                .filter(|e| e.get(&fk_field).and_then(|v| v.as_str()).map(|v| ids.contains(&v.to_string())).unwrap_or(false))
                .map(|e| e.id.clone())
                .collect();
            if matching.is_empty() {
                continue;
            }
            match effective {
                CascadeOption::Restrict => violations.push(RestrictViolation {
                    peer_collection: peer.name().to_string(),
                    count: matching.len(),
                }),
                CascadeOption::Cascade => actions.push((peer.clone(), PeerAction::Cascade, matching)),
                CascadeOption::CascadeSoft => actions.push((peer.clone(), PeerAction::CascadeSoft, matching)),
                CascadeOption::SetNull => actions.push((peer.clone(), PeerAction::SetNull { fk_field }, matching)),
                CascadeOption::Preserve => unreachable!(),
            }
        }
    }

    if !violations.is_empty() {
        let issues = violations
            .into_iter()
            .map(|v| {
                ValidationIssue::new(
                    v.peer_collection.clone(),
                    format!("{} related {} still reference this entity", v.count, v.peer_collection),
                )
            })
            .collect();
        return Err(ProseError::Validation { issues });
    }

    for (peer, action, ids) in actions {
        for id in ids {
            match &action {
                PeerAction::Cascade => {
                    peer.hard_delete_unchecked(&id);
                }
                PeerAction::CascadeSoft => {
                    peer.soft_delete_unchecked(&id);
                }
                PeerAction::SetNull { fk_field } => {
                    if let Some(before) = peer.state.get(&id) {
                        let mut after = before.clone();
                        after.set(fk_field.clone(), Value::Null);
                        after.updated_at = Utc::now();
                        peer.state.replace(|map| {
                            let mut next = map.clone();
                            next.insert(id.clone(), after.clone());
                            ((), next)
                        });
                        peer.unique.observe_replace(&before, &after);
                        peer.indexes.observe_replace(&before, &after);
                        peer.publish(crate::events::ChangeEvent::Updated {
                            collection: peer.name().to_string(),
                            before,
                            after,
                        });
                        peer.schedule_save();
                    }
                }
            }
        }
    }

    Ok(())
}
