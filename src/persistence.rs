//! Persistence (C11) — schema-versioned load/migrate/save.
//!
//! Load: read bytes -> deserialize by extension -> tell apart array-of-records
//! (line-delimited) from map-keyed-by-id formats -> extract `_version` ->
//! migrate if the file is older than the configured version -> decode each
//! entity through the schema -> optionally write back the migrated form.
//! Save is the mirror: encode -> assemble the envelope -> serialize ->
//! atomic write through the storage adapter.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::Path;

use crate::config::CollectionConfig;
use crate::error::{ProseError, Result};
use crate::schema::Schema;
use crate::serializer::{Format, SerializerRegistry};
use crate::state::EntityMap;
use crate::storage::StorageAdapter;
use crate::value::{Entity, EntityId, Value};

pub struct LoadResult {
    pub entities: EntityMap,
    pub migrated: bool,
}

/// Raw, undecoded field map for one entity as found on disk (includes the
/// reserved `id`/`createdAt`/`updatedAt`/`deletedAt` keys). Migrations
/// operate on a `Vec` of these, matching `config::Migration`'s signature.
type RawEntity = HashMap<String, Value>;

pub async fn load_collection(
    storage: &dyn StorageAdapter,
    path: &Path,
    format: Format,
    config: &CollectionConfig,
    schema: &dyn Schema,
) -> Result<LoadResult> {
    if !storage.exists(path).await? {
        return Ok(LoadResult {
            entities: EntityMap::new(),
            migrated: false,
        });
    }

    let bytes = storage.read(path).await?;
    let serializer = SerializerRegistry::for_format(format)?;
    let value = serializer.deserialize(&bytes)?;

    let (raw_entities, file_version) = if format.is_record_array() {
        (split_record_array(value)?, 0)
    } else {
        split_map_envelope(value)?
    };

    let config_version = config.schema_version.unwrap_or(0);
    if file_version > config_version {
        return Err(ProseError::Migration(format!(
            "{}: file version {file_version} is newer than configured version {config_version}",
            config.name
        )));
    }

    let migrated = file_version < config_version && !config.migrations.is_empty();
    let raw_entities = if migrated {
        apply_migrations(raw_entities, config, file_version, config_version)
    } else {
        raw_entities
    };

    let mut entities = EntityMap::new();
    for raw in raw_entities {
        let entity = decode_entity(raw, schema, migrated)?;
        entities.insert(entity.id.clone(), entity);
    }

    if migrated {
        let bytes = encode_collection(&entities, config, schema, format)?;
        storage.write(path, &bytes).await?;
        tracing::info!(collection = %config.name, from = file_version, to = config_version, "migrated collection file");
    }

    Ok(LoadResult { entities, migrated })
}

pub async fn save_collection(
    storage: &dyn StorageAdapter,
    path: &Path,
    format: Format,
    config: &CollectionConfig,
    schema: &dyn Schema,
    entities: &EntityMap,
) -> Result<()> {
    let bytes = encode_collection(entities, config, schema, format)?;
    storage.write(path, &bytes).await
}

pub fn encode_collection(
    entities: &EntityMap,
    config: &CollectionConfig,
    schema: &dyn Schema,
    format: Format,
) -> Result<Vec<u8>> {
    let serializer = SerializerRegistry::for_format(format)?;
    let top = if format.is_record_array() {
        Value::Array(
            entities
                .values()
                .map(|e| Value::Object(entity_to_object(e, schema)))
                .collect(),
        )
    } else {
        let mut map = IndexMap::new();
        if let Some(v) = config.schema_version {
            map.insert("_version".to_string(), Value::Int(v as i64));
        }
        for e in entities.values() {
            map.insert(e.id.clone(), Value::Object(entity_to_object(e, schema)));
        }
        Value::Object(map)
    };
    serializer.serialize(&top)
}

/// Multi-collection file load (`loadCollectionsFromFile`): keyed by
/// collection name at the top level, each carrying its own `_version`.
/// Shares the version-stamping/migration logic above through
/// `split_map_envelope`/`apply_migrations`/`decode_entity`.
pub async fn load_collections_from_file(
    storage: &dyn StorageAdapter,
    path: &Path,
    format: Format,
    configs: &HashMap<String, CollectionConfig>,
    schemas: &HashMap<String, std::sync::Arc<dyn Schema>>,
) -> Result<HashMap<String, LoadResult>> {
    if !storage.exists(path).await? {
        return Ok(HashMap::new());
    }

    let bytes = storage.read(path).await?;
    let serializer = SerializerRegistry::for_format(format)?;
    let top = match serializer.deserialize(&bytes)? {
        Value::Object(map) => map,
        _ => return Err(ProseError::Serialization("expected an object keyed by collection name".into())),
    };

    let mut results = HashMap::new();
    let mut any_migrated = false;

    for (name, value) in top {
        let config = configs
            .get(&name)
            .ok_or_else(|| ProseError::CollectionNotFound(name.clone()))?;
        let permissive = crate::schema::permissive();
        let schema = schemas.get(&name).cloned().unwrap_or(permissive);

        let (raw_entities, file_version) = split_map_envelope(value)?;
        let config_version = config.schema_version.unwrap_or(0);
        if file_version > config_version {
            return Err(ProseError::Migration(format!(
                "{name}: file version {file_version} is newer than configured version {config_version}"
            )));
        }
        let migrated = file_version < config_version && !config.migrations.is_empty();
        let raw_entities = if migrated {
            apply_migrations(raw_entities, config, file_version, config_version)
        } else {
            raw_entities
        };

        let mut entities = EntityMap::new();
        for raw in raw_entities {
            let entity = decode_entity(raw, schema.as_ref(), migrated)?;
            entities.insert(entity.id.clone(), entity);
        }
        any_migrated |= migrated;
        results.insert(name, LoadResult { entities, migrated });
    }

    if any_migrated {
        let mut top_out = IndexMap::new();
        for (name, result) in &results {
            let config = configs.get(name).expect("checked above");
            let permissive = crate::schema::permissive();
            let schema = schemas.get(name).cloned().unwrap_or(permissive);
            let mut map = IndexMap::new();
            if let Some(v) = config.schema_version {
                map.insert("_version".to_string(), Value::Int(v as i64));
            }
            for e in result.entities.values() {
                map.insert(e.id.clone(), Value::Object(entity_to_object(e, schema.as_ref())));
            }
            top_out.insert(name.clone(), Value::Object(map));
        }
        let bytes = serializer.serialize(&Value::Object(top_out))?;
        storage.write(path, &bytes).await?;
    }

    Ok(results)
}

fn apply_migrations(
    data: Vec<RawEntity>,
    config: &CollectionConfig,
    file_version: u32,
    config_version: u32,
) -> Vec<RawEntity> {
    let mut steps: Vec<&crate::config::Migration> = config
        .migrations
        .iter()
        .filter(|m| m.from >= file_version && m.from < config_version)
        .collect();
    steps.sort_by_key(|m| m.from);

    let mut data = data;
    for step in steps {
        data = (step.transform)(data);
    }
    data
}

fn decode_entity(mut raw: RawEntity, schema: &dyn Schema, migrated: bool) -> Result<Entity> {
    let id: EntityId = match raw.remove("id") {
        Some(Value::String(s)) => s,
        _ => return Err(ProseError::Serialization("entity missing id".into())),
    };
    let created_at = take_timestamp(&mut raw, "createdAt");
    let updated_at = take_timestamp(&mut raw, "updatedAt");
    let deleted_at = raw.remove("deletedAt").and_then(|v| match v {
        Value::String(s) => DateTime::parse_from_rfc3339(&s).ok().map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    });

    let decoded = schema.decode(raw).map_err(|e| {
        if migrated {
            ProseError::Migration(format!("post-migration schema decode failed: {e}"))
        } else {
            e
        }
    })?;

    Ok(Entity {
        id,
        created_at,
        updated_at,
        deleted_at,
        fields: decoded,
    })
}

fn take_timestamp(raw: &mut RawEntity, key: &str) -> DateTime<Utc> {
    raw.remove(key)
        .and_then(|v| match v {
            Value::String(s) => DateTime::parse_from_rfc3339(&s).ok().map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        })
        .unwrap_or_else(Utc::now)
}

fn entity_to_object(entity: &Entity, schema: &dyn Schema) -> IndexMap<String, Value> {
    let encoded = schema.encode(&entity.fields);
    let mut obj = IndexMap::new();
    obj.insert("id".to_string(), Value::String(entity.id.clone()));
    obj.insert("createdAt".to_string(), Value::String(entity.created_at.to_rfc3339()));
    obj.insert("updatedAt".to_string(), Value::String(entity.updated_at.to_rfc3339()));
    if let Some(deleted) = entity.deleted_at {
        obj.insert("deletedAt".to_string(), Value::String(deleted.to_rfc3339()));
    }
    for (k, v) in encoded {
        obj.insert(k, v);
    }
    obj
}

fn split_record_array(value: Value) -> Result<Vec<RawEntity>> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map.into_iter().collect()),
                _ => Err(ProseError::Serialization("record array entry must be an object".into())),
            })
            .collect(),
        _ => Err(ProseError::Serialization("expected a record array at top level".into())),
    }
}

fn split_map_envelope(value: Value) -> Result<(Vec<RawEntity>, u32)> {
    match value {
        Value::Object(mut map) => {
            let version = map
                .shift_remove("_version")
                .and_then(|v| v.as_i64())
                .map(|v| v as u32)
                .unwrap_or(0);
            let mut out = Vec::with_capacity(map.len());
            for (id, entry) in map {
                match entry {
                    Value::Object(fields) => {
                        let mut raw: RawEntity = fields.into_iter().collect();
                        raw.entry("id".to_string()).or_insert_with(|| Value::String(id));
                        out.push(raw);
                    }
                    _ => return Err(ProseError::Serialization("entity entries must be objects".into())),
                }
            }
            Ok((out, version))
        }
        _ => Err(ProseError::Serialization("expected an object keyed by id".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectionConfig;
    use crate::schema::permissive;
    use crate::storage::MemoryAdapter;
    use std::path::PathBuf;

    #[tokio::test]
    async fn missing_file_loads_empty_without_migrating() {
        let storage = MemoryAdapter::new();
        let config = CollectionConfig::new("books");
        let result = load_collection(
            &storage,
            &PathBuf::from("books.json"),
            Format::Json,
            &config,
            permissive().as_ref(),
        )
        .await
        .unwrap();
        assert!(result.entities.is_empty());
        assert!(!result.migrated);
    }

    #[tokio::test]
    async fn migration_bumps_version_and_rewrites_file() {
        let storage = MemoryAdapter::new();
        let path = PathBuf::from("books.json");
        storage
            .write(
                &path,
                br#"{"_version":1,"1":{"id":"1","createdAt":"2020-01-01T00:00:00Z","updatedAt":"2020-01-01T00:00:00Z","title":"Dune"}}"#,
            )
            .await
            .unwrap();

        let config = CollectionConfig::new("books")
            .with_schema_version(2)
            .with_migration(1, |rows| {
                rows.into_iter()
                    .map(|mut r| {
                        r.entry("year".to_string()).or_insert(Value::Int(0));
                        r
                    })
                    .collect()
            });

        let result = load_collection(&storage, &path, Format::Json, &config, permissive().as_ref())
            .await
            .unwrap();
        assert!(result.migrated);
        let entity = result.entities.get("1").unwrap();
        assert_eq!(entity.get("year"), Some(&Value::Int(0)));

        let rewritten = storage.read(&path).await.unwrap();
        let text = String::from_utf8(rewritten).unwrap();
        assert!(text.contains("\"_version\": 2"));
    }

    #[tokio::test]
    async fn future_file_version_fails_migration_error() {
        let storage = MemoryAdapter::new();
        let path = PathBuf::from("books.json");
        storage.write(&path, br#"{"_version":5}"#).await.unwrap();
        let config = CollectionConfig::new("books").with_schema_version(1);
        let err = load_collection(&storage, &path, Format::Json, &config, permissive().as_ref())
            .await
            .unwrap_err();
        assert!(matches!(err, ProseError::Migration(_)));
    }
}
