//! Configuration for a ProseQL database and its collections.
//!
//! Follows the teacher's nested-struct-with-`Default`-impl idiom: one
//! top-level config, composed of per-concern sub-configs, every field
//! `Serialize + Deserialize` so a host application can load the whole thing
//! from its own config file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::schema::Schema;
use crate::value::Value;

/// Kind of relationship a collection declares toward a peer collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationshipKind {
    /// This side stores the foreign key.
    Ref {
        /// Field name holding the FK. Defaults to `<relName>Id` when absent.
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
    /// The peer side stores a back-reference to this collection.
    Inverse {
        /// Field name on the peer holding the back-reference.
        field: String,
    },
}

/// Per-relationship delete cascade policy (§4.7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CascadeOption {
    /// Leave peers untouched. Default.
    #[default]
    Preserve,
    /// Abort the delete if any peer still refers to the target.
    Restrict,
    /// Hard-delete peers that refer to the target.
    Cascade,
    /// Soft-delete peers that refer to the target.
    CascadeSoft,
    /// Null out the peer's FK field.
    SetNull,
}

/// A declared relationship from this collection to a named peer collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipConfig {
    pub name: String,
    pub target: String,
    pub kind: RelationshipKind,
    #[serde(default)]
    pub on_delete: CascadeOption,
}

impl RelationshipConfig {
    /// The FK field name, resolving the `ref` default of `<name>Id`.
    pub fn fk_field(&self) -> String {
        match &self.kind {
            RelationshipKind::Ref { field: Some(f) } => f.clone(),
            RelationshipKind::Ref { field: None } => format!("{}Id", self.name),
            RelationshipKind::Inverse { field } => field.clone(),
        }
    }

    pub fn is_ref(&self) -> bool {
        matches!(self.kind, RelationshipKind::Ref { .. })
    }
}

/// A single migration step, applied to the raw decoded-entity map loaded
/// from disk before schema decode of the final form.
pub struct Migration {
    pub from: u32,
    pub transform: Box<dyn Fn(Vec<HashMap<String, Value>>) -> Vec<HashMap<String, Value>> + Send + Sync>,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration").field("from", &self.from).finish()
    }
}

/// File binding for a collection: path plus the format inferred from its
/// extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileBinding {
    pub path: PathBuf,
}

impl FileBinding {
    /// Format key inferred from the file extension (§6 Serializer capability).
    pub fn format(&self) -> crate::serializer::Format {
        crate::serializer::Format::from_extension(
            self.path.extension().and_then(|e| e.to_str()).unwrap_or(""),
        )
    }
}

/// Per-collection configuration.
pub struct CollectionConfig {
    pub name: String,
    pub file: Option<FileBinding>,
    pub relationships: Vec<RelationshipConfig>,
    /// Declared unique constraints; each entry is a tuple of field names
    /// (length 1 = single-field uniqueness).
    pub unique: Vec<Vec<String>>,
    /// Fields with an optional hash index for equality-probe acceleration.
    pub indexes: Vec<String>,
    /// Soft delete requires the schema to carry `deletedAt`.
    pub soft_delete: bool,
    pub schema_version: Option<u32>,
    pub migrations: Vec<Migration>,
    /// Decode/encode contract for this collection (§3 "a schema"). Defaults
    /// to the permissive schema, which accepts any shape.
    pub schema: Arc<dyn Schema>,
}

impl std::fmt::Debug for CollectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionConfig")
            .field("name", &self.name)
            .field("file", &self.file)
            .field("relationships", &self.relationships)
            .field("unique", &self.unique)
            .field("indexes", &self.indexes)
            .field("soft_delete", &self.soft_delete)
            .field("schema_version", &self.schema_version)
            .field("migrations", &self.migrations)
            .finish()
    }
}

impl CollectionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file: None,
            relationships: Vec::new(),
            unique: Vec::new(),
            indexes: Vec::new(),
            soft_delete: false,
            schema_version: None,
            migrations: Vec::new(),
            schema: crate::schema::permissive(),
        }
    }

    /// Attach a declarative or custom schema. Collections that never call
    /// this keep the permissive default.
    pub fn with_schema(mut self, schema: Arc<dyn Schema>) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(FileBinding { path: path.into() });
        self
    }

    pub fn with_relationship(mut self, rel: RelationshipConfig) -> Self {
        self.relationships.push(rel);
        self
    }

    pub fn with_unique(mut self, fields: Vec<String>) -> Self {
        self.unique.push(fields);
        self
    }

    pub fn with_index(mut self, field: impl Into<String>) -> Self {
        self.indexes.push(field.into());
        self
    }

    pub fn with_soft_delete(mut self, enabled: bool) -> Self {
        self.soft_delete = enabled;
        self
    }

    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = Some(version);
        self
    }

    pub fn with_migration(
        mut self,
        from: u32,
        transform: impl Fn(Vec<HashMap<String, Value>>) -> Vec<HashMap<String, Value>> + Send + Sync + 'static,
    ) -> Self {
        self.migrations.push(Migration {
            from,
            transform: Box::new(transform),
        });
        self
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipConfig> {
        self.relationships.iter().find(|r| r.name == name)
    }
}

/// Top-level database configuration: a map of collection configs plus the
/// tunables for the debounced writer, file watcher, and reactive bus.
#[derive(Debug)]
pub struct DatabaseConfig {
    pub collections: HashMap<String, CollectionConfig>,
    pub writer_debounce: Duration,
    pub watcher_debounce: Duration,
    pub bus_capacity: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            collections: HashMap::new(),
            writer_debounce: Duration::from_millis(100),
            watcher_debounce: Duration::from_millis(50),
            bus_capacity: 1024,
        }
    }
}

impl DatabaseConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, config: CollectionConfig) -> Self {
        self.collections.insert(config.name.clone(), config);
        self
    }

    pub fn with_writer_debounce(mut self, d: Duration) -> Self {
        self.writer_debounce = d;
        self
    }

    pub fn with_watcher_debounce(mut self, d: Duration) -> Self {
        self.watcher_debounce = d;
        self
    }

    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity;
        self
    }
}
