#![allow(dead_code)]
//! ProseQL — an embedded, schema-driven, document-style database.
//!
//! The primary persistence target is a single human-readable file per
//! collection (JSON, YAML, TOML, JSON5, JSONC, Hjson, TOON, or
//! line-delimited records). The library exposes typed CRUD, relational
//! queries with population, aggregation, upsert, and cross-collection
//! cascade operations against a dataset held entirely in process memory,
//! with durable writes mirrored to storage through a pluggable adapter.
//!
//! The hard engineering lives in the collection engine: the in-memory state
//! model ([`state`]), the transactional mutation pipeline ([`mutation`]),
//! the streaming query pipeline ([`query`]), the relational cascade
//! machinery ([`cascade`]), the debounced durable writer ([`writer`]), the
//! external-change file watcher ([`watcher`]), and the schema-versioned
//! load/migrate/save path ([`persistence`]). [`database`] wires all of this
//! into the [`Database`]/[`Collection`] handles applications actually hold.

pub mod cascade;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod filter;
pub mod index;
pub mod mutation;
pub mod operators;
pub mod persistence;
pub mod query;
pub mod schema;
pub mod serializer;
pub mod state;
pub mod storage;
pub mod validate;
pub mod value;
pub mod watcher;
pub mod writer;

pub use cascade::RelationshipInput;
pub use config::{
    CascadeOption, CollectionConfig, DatabaseConfig, FileBinding, Migration, RelationshipConfig, RelationshipKind,
};
pub use database::{Collection, Database};
pub use error::{ProseError, Result, ValidationIssue};
pub use events::{ChangeEvent, EventBus, Subscription};
pub use filter::{FieldOp, Where};
pub use mutation::{CreateManyOptions, CreateManyResult, DeleteOptions, UpsertAction, UpsertResult};
pub use query::{AggFn, AggregateResult, AggregateSpec, CursorSpec, PageInfo, Pagination, PopulateNode, PopulateTree, QueryResult, QuerySpec, SortDir, SortKey};
pub use schema::{FieldSpec, FieldType, PermissiveSchema, Schema, StructSchema};
pub use storage::StorageAdapter;
pub use value::{CollectionName, Entity, EntityId, Value};
