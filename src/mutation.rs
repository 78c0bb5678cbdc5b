//! Mutation pipeline (C8) — `create`/`createMany`/`update`/`updateMany`/
//! `delete`/`deleteMany`/`upsert`/`upsertMany`.
//!
//! Each operation follows the same shape: validate against a snapshot, then
//! commit through exactly one `StateCell::replace` call, re-checking
//! whatever the commit-time snapshot actually holds (§5's optimistic
//! concurrency: a mutation sees a validation snapshot and a commit snapshot
//! that may differ between suspension points, even though this
//! implementation has no `await` between them today — the re-check is kept
//! so a future suspending validator doesn't silently reintroduce write-skew).

use std::collections::{HashMap, HashSet};

use chrono::Utc;

use crate::config::CascadeOption;
use crate::database::{Collection, DbPeerReader};
use crate::error::{ProseError, Result};
use crate::events::ChangeEvent;
use crate::filter::{matches, FilterCtx, Where};
use crate::index::UniqueIndexManager;
use crate::operators::apply_field_update;
use crate::validate::{check_foreign_keys, check_immutable_fields, check_unique_constraints};
use crate::value::{Entity, EntityId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Created,
    Updated,
}

pub struct UpsertResult {
    pub entity: Entity,
    pub action: UpsertAction,
}

#[derive(Debug, Clone)]
pub struct CreateManyOptions {
    pub skip_duplicates: bool,
    /// Foreign-key validation is on by default, same as `create`; set to
    /// `false` to skip `check_foreign_keys` for this batch (spec.md `createMany`
    /// options: `{ skipDuplicates?, validateRelationships? }`).
    pub validate_relationships: bool,
}

impl Default for CreateManyOptions {
    fn default() -> Self {
        Self {
            skip_duplicates: false,
            validate_relationships: true,
        }
    }
}

pub struct CreateManyResult {
    pub created: Vec<Entity>,
    pub skipped: Vec<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub soft: bool,
    /// `None` or non-positive means "no limit" (§8: limit 0 or negative
    /// deletes everything matching).
    pub limit: Option<i64>,
    /// Per-call cascade override (§4.7's `include`), keyed by the name of
    /// the peer collection whose policy should change for this call only.
    /// Peer collections not named here keep their relationship's declared
    /// `on_delete` policy.
    pub include: HashMap<String, CascadeOption>,
}

impl Collection {
    /// A peer resolver over the live database, or `None` when this
    /// collection declares no relationships — the common case never needs
    /// to touch the database handle at all.
    fn peers_for_fk_check(&self) -> Result<Option<std::sync::Arc<crate::database::DatabaseInner>>> {
        if self.config.relationships.is_empty() {
            return Ok(None);
        }
        self.database()
            .map(Some)
            .ok_or_else(|| ProseError::Internal("database handle dropped".to_string()))
    }

    fn check_against(&self, candidate: &Entity, unique: &UniqueIndexManager) -> Result<()> {
        check_unique_constraints(&self.name, candidate, unique)?;
        if let Some(db) = self.peers_for_fk_check()? {
            check_foreign_keys(&self.name, candidate, &self.config.relationships, db.as_ref())?;
        }
        Ok(())
    }

    fn filter_ctx<'a>(&'a self, reader: &'a Option<DbPeerReader<'a>>) -> FilterCtx<'a> {
        match reader {
            Some(r) => FilterCtx::with_peers(&self.config.relationships, r),
            None => FilterCtx::new(&self.config.relationships),
        }
    }

    /// Validate and insert an already-constructed entity. Shared with the
    /// cascade engine's child/parent inserts (§4.6).
    pub(crate) fn insert_validated(&self, mut entity: Entity) -> Result<Entity> {
        if self.state.get(&entity.id).is_some() {
            return Err(ProseError::DuplicateKey {
                collection: self.name.clone(),
                id: entity.id,
            });
        }
        entity.fields = self.schema.decode(entity.fields)?;
        self.check_against(&entity, &self.unique)?;

        let commit = self.state.replace(|map| {
            if map.contains_key(&entity.id) {
                return (
                    Err(ProseError::Concurrency {
                        collection: self.name.clone(),
                        id: entity.id.clone(),
                    }),
                    map.clone(),
                );
            }
            let mut next = map.clone();
            next.insert(entity.id.clone(), entity.clone());
            (Ok(entity.clone()), next)
        })?;

        self.unique.observe_insert(&commit);
        self.indexes.observe_insert(&commit);
        self.publish(ChangeEvent::Created {
            collection: self.name.clone(),
            entity: commit.clone(),
        });
        self.schedule_save();
        Ok(commit)
    }

    pub fn create(&self, fields: HashMap<String, Value>, id: Option<String>) -> Result<Entity> {
        check_immutable_fields(&fields)?;
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.insert_validated(Entity::new(id, fields))
    }

    /// All-or-nothing batch create: every candidate is checked against the
    /// pre-existing state and against its batch-mates (§9 open question 3)
    /// before any write occurs.
    pub fn create_many(
        &self,
        candidates: Vec<HashMap<String, Value>>,
        options: CreateManyOptions,
    ) -> Result<CreateManyResult> {
        for c in &candidates {
            check_immutable_fields(c)?;
        }

        let existing = self.state.snapshot();
        let constraints: Vec<Vec<String>> = self.unique.constraints().map(|f| f.to_vec()).collect();
        let mut shadow = UniqueIndexManager::new(&constraints);
        for e in existing.values() {
            shadow.observe_insert(e);
        }

        let mut seen_ids: HashSet<EntityId> = HashSet::new();
        let mut entities = Vec::with_capacity(candidates.len());
        let mut skipped = Vec::new();

        for fields in candidates {
            let id = fields
                .get("id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let decoded = self.schema.decode(fields)?;
            let entity = Entity::new(id, decoded);

            let duplicate_id = existing.contains_key(&entity.id) || seen_ids.contains(&entity.id);
            let unique_err = if duplicate_id {
                None
            } else {
                check_unique_constraints(&self.name, &entity, &shadow).err()
            };

            if duplicate_id || unique_err.is_some() {
                if options.skip_duplicates {
                    skipped.push(entity.fields);
                    continue;
                }
                return Err(unique_err.unwrap_or(ProseError::DuplicateKey {
                    collection: self.name.clone(),
                    id: entity.id,
                }));
            }

            if options.validate_relationships && !self.config.relationships.is_empty() {
                if let Some(db) = self.peers_for_fk_check()? {
                    check_foreign_keys(&self.name, &entity, &self.config.relationships, db.as_ref())?;
                }
            }

            shadow.observe_insert(&entity);
            seen_ids.insert(entity.id.clone());
            entities.push(entity);
        }

        if entities.is_empty() {
            return Ok(CreateManyResult { created: entities, skipped });
        }

        self.state.replace(|map| {
            let mut next = map.clone();
            for e in &entities {
                next.insert(e.id.clone(), e.clone());
            }
            ((), next)
        });
        for e in &entities {
            self.unique.observe_insert(e);
            self.indexes.observe_insert(e);
            self.publish(ChangeEvent::Created {
                collection: self.name.clone(),
                entity: e.clone(),
            });
        }
        self.schedule_save();
        Ok(CreateManyResult { created: entities, skipped })
    }

    fn apply_updates(current: &Entity, updates: &HashMap<String, Value>) -> Entity {
        let mut next = current.clone();
        for (field, update) in updates {
            let new_value = apply_field_update(next.fields.get(field), update);
            next.fields.insert(field.clone(), new_value);
        }
        next.updated_at = Utc::now();
        next
    }

    pub fn update(&self, id: &str, updates: &HashMap<String, Value>) -> Result<Entity> {
        check_immutable_fields(updates)?;
        let current = self.state.get(id).ok_or_else(|| ProseError::NotFound {
            collection: self.name.clone(),
            id: id.to_string(),
        })?;
        let mut updated = Self::apply_updates(&current, updates);
        updated.fields = self.schema.decode(updated.fields)?;
        self.check_against(&updated, &self.unique)?;

        let before = current;
        let after = self.state.replace(|map| match map.get(id) {
            Some(existing) if existing.updated_at == before.updated_at => {
                let mut next = map.clone();
                next.insert(id.to_string(), updated.clone());
                (Ok(updated.clone()), next)
            }
            Some(_) => (
                Err(ProseError::Concurrency {
                    collection: self.name.clone(),
                    id: id.to_string(),
                }),
                map.clone(),
            ),
            None => (
                Err(ProseError::NotFound {
                    collection: self.name.clone(),
                    id: id.to_string(),
                }),
                map.clone(),
            ),
        })?;

        self.unique.observe_replace(&before, &after);
        self.indexes.observe_replace(&before, &after);
        self.publish(ChangeEvent::Updated {
            collection: self.name.clone(),
            before,
            after: after.clone(),
        });
        self.schedule_save();
        Ok(after)
    }

    pub fn update_many(&self, where_: &Where, updates: &HashMap<String, Value>) -> Result<Vec<Entity>> {
        check_immutable_fields(updates)?;
        let db = self.database();
        let reader = db.as_ref().map(|d| DbPeerReader { db: d.as_ref() });
        let ctx = self.filter_ctx(&reader);

        let snapshot = self.state.snapshot();
        let matched: Vec<Entity> = snapshot.values().filter(|e| matches(where_, e, &ctx)).cloned().collect();

        let mut pairs = Vec::with_capacity(matched.len());
        for before in matched {
            let mut after = Self::apply_updates(&before, updates);
            after.fields = self.schema.decode(after.fields)?;
            self.check_against(&after, &self.unique)?;
            pairs.push((before, after));
        }

        self.state.replace(|map| {
            let mut next = map.clone();
            for (_, after) in &pairs {
                next.insert(after.id.clone(), after.clone());
            }
            ((), next)
        });

        for (before, after) in &pairs {
            self.unique.observe_replace(before, after);
            self.indexes.observe_replace(before, after);
            self.publish(ChangeEvent::Updated {
                collection: self.name.clone(),
                before: before.clone(),
                after: after.clone(),
            });
        }
        if !pairs.is_empty() {
            self.schedule_save();
        }
        Ok(pairs.into_iter().map(|(_, after)| after).collect())
    }

    /// Hard-remove an entity with no referential-integrity check. Used by
    /// `delete`/`deleteMany` after the cascade engine has already cleared
    /// (or been told to ignore) restrict violations, and by the cascade
    /// engine's own `cascade` peer actions.
    pub(crate) fn hard_delete_unchecked(&self, id: &str) -> Option<Entity> {
        let removed = self.state.replace(|map| {
            let mut next = map.clone();
            let removed = next.shift_remove(id);
            (removed, next)
        })?;
        self.unique.observe_delete(&removed);
        self.indexes.observe_delete(&removed);
        self.publish(ChangeEvent::Deleted {
            collection: self.name.clone(),
            entity: removed.clone(),
        });
        self.schedule_save();
        Some(removed)
    }

    /// Soft-remove: stamp `deletedAt`/`updatedAt`, preserving the original
    /// `deletedAt` if already set (§8: repeated soft-delete is idempotent on
    /// the timestamp; §9 open question 2 follows the source in leaving
    /// `updatedAt` unstamped too in that case).
    pub(crate) fn soft_delete_unchecked(&self, id: &str) -> Option<Entity> {
        let before = self.state.get(id)?;
        let mut after = before.clone();
        if after.deleted_at.is_none() {
            let now = Utc::now();
            after.deleted_at = Some(now);
            after.updated_at = now;
        }
        self.state.replace(|map| {
            let mut next = map.clone();
            next.insert(id.to_string(), after.clone());
            ((), next)
        });
        self.unique.observe_replace(&before, &after);
        self.indexes.observe_replace(&before, &after);
        self.publish(ChangeEvent::Updated {
            collection: self.name.clone(),
            before,
            after: after.clone(),
        });
        self.schedule_save();
        Some(after)
    }

    pub fn delete(&self, id: &str, options: &DeleteOptions) -> Result<Entity> {
        if options.soft && !self.config.soft_delete {
            return Err(ProseError::Operation(format!(
                "{}: soft delete requested but collection has no deletedAt field",
                self.name
            )));
        }
        self.state.get(id).ok_or_else(|| ProseError::NotFound {
            collection: self.name.clone(),
            id: id.to_string(),
        })?;

        if let Some(db) = self.database() {
            crate::cascade::apply_delete_cascades(db.as_ref(), &self.name, std::slice::from_ref(&id.to_string()), &options.include)?;
        }

        if options.soft {
            self.soft_delete_unchecked(id)
                .ok_or_else(|| ProseError::NotFound { collection: self.name.clone(), id: id.to_string() })
        } else {
            self.hard_delete_unchecked(id)
                .ok_or_else(|| ProseError::NotFound { collection: self.name.clone(), id: id.to_string() })
        }
    }

    pub fn delete_many(&self, where_: &Where, options: &DeleteOptions) -> Result<Vec<Entity>> {
        if options.soft && !self.config.soft_delete {
            return Err(ProseError::Operation(format!(
                "{}: soft delete requested but collection has no deletedAt field",
                self.name
            )));
        }
        let db = self.database();
        let reader = db.as_ref().map(|d| DbPeerReader { db: d.as_ref() });
        let ctx = self.filter_ctx(&reader);

        let snapshot = self.state.snapshot();
        let mut matched: Vec<EntityId> = snapshot.values().filter(|e| matches(where_, e, &ctx)).map(|e| e.id.clone()).collect();

        // limit <= 0 means "no limit" (§8).
        if let Some(limit) = options.limit {
            if limit > 0 {
                matched.truncate(limit as usize);
            }
        }

        if let Some(db) = &db {
            crate::cascade::apply_delete_cascades(db.as_ref(), &self.name, &matched, &options.include)?;
        }

        let mut removed = Vec::with_capacity(matched.len());
        for id in matched {
            let entity = if options.soft {
                self.soft_delete_unchecked(&id)
            } else {
                self.hard_delete_unchecked(&id)
            };
            if let Some(e) = entity {
                removed.push(e);
            }
        }
        Ok(removed)
    }

    /// Resolve `where`'s addressed unique key, returning the currently
    /// matching entity (at most one) or `None`. `where` must fully cover a
    /// declared unique constraint (`id` counts as one); extra fields act as
    /// additional filter predicates evaluated against that single match.
    fn resolve_upsert_target(&self, where_: &Where) -> Result<Option<Entity>> {
        if let Some(id_value) = crate::filter::top_level_eq(where_, "id") {
            if let Some(id) = id_value.as_str() {
                let db = self.database();
                let reader = db.as_ref().map(|d| DbPeerReader { db: d.as_ref() });
                let ctx = self.filter_ctx(&reader);
                return Ok(self.state.get(id).filter(|e| matches(where_, e, &ctx)));
            }
        }

        for fields in self.unique.constraints().map(|f| f.to_vec()).collect::<Vec<_>>() {
            let values: Vec<Value> = fields
                .iter()
                .filter_map(|f| crate::filter::top_level_eq(where_, f).cloned())
                .collect();
            if values.len() != fields.len() {
                continue;
            }
            if let Some(holder_id) = self.unique.probe(&fields, &values) {
                let db = self.database();
                let reader = db.as_ref().map(|d| DbPeerReader { db: d.as_ref() });
                let ctx = self.filter_ctx(&reader);
                return Ok(self.state.get(&holder_id).filter(|e| matches(where_, e, &ctx)));
            }
            return Ok(None);
        }

        Err(ProseError::Validation {
            issues: vec![crate::error::ValidationIssue::new(
                "where",
                "upsert where must fully address a declared unique key (id, a unique field, or a complete unique tuple)",
            )],
        })
    }

    pub fn upsert(
        &self,
        where_: &Where,
        create_fields: HashMap<String, Value>,
        update_fields: HashMap<String, Value>,
    ) -> Result<UpsertResult> {
        match self.resolve_upsert_target(where_)? {
            Some(existing) => {
                let entity = self.update(&existing.id, &update_fields)?;
                Ok(UpsertResult { entity, action: UpsertAction::Updated })
            }
            None => {
                let mut fields = create_fields;
                merge_where_equalities(where_, &mut fields);
                let id = match fields.remove("id") {
                    Some(Value::String(s)) => Some(s),
                    _ => None,
                };
                let entity = self.create(fields, id)?;
                Ok(UpsertResult { entity, action: UpsertAction::Created })
            }
        }
    }

    /// Same contract as `upsert`, applied per batch element; every `where`
    /// is validated up front so the first invalid one fails the whole batch
    /// with no partial commits.
    pub fn upsert_many(
        &self,
        items: Vec<(Where, HashMap<String, Value>, HashMap<String, Value>)>,
    ) -> Result<Vec<UpsertResult>> {
        for (where_, _, _) in &items {
            self.resolve_upsert_target(where_)?;
        }
        items
            .into_iter()
            .map(|(where_, create_fields, update_fields)| self.upsert(&where_, create_fields, update_fields))
            .collect()
    }
}

/// Merge `where`'s top-level field equalities into `fields`, so a created
/// entity matches the `where` that failed to find it (§4.4 upsert).
fn merge_where_equalities(where_: &Where, fields: &mut HashMap<String, Value>) {
    if let Where::And(conds) = where_ {
        for cond in conds {
            if let Where::Field(name, crate::filter::FieldOp::Eq(value)) = cond {
                fields.entry(name.clone()).or_insert_with(|| value.clone());
            }
        }
    } else if let Where::Field(name, crate::filter::FieldOp::Eq(value)) = where_ {
        fields.entry(name.clone()).or_insert_with(|| value.clone());
    }
}
