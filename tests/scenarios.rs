//! End-to-end scenarios S1-S8 (spec.md §8), each exercised against a
//! constructed `Database` rather than a single module in isolation.
//!
//! S1-S6 run against `MemoryAdapter` for determinism and speed; S7 and S8
//! are inherently filesystem-shaped and run against `FsAdapter` over a
//! `tempfile` temp directory.

mod common;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use proseql::storage::{FsAdapter, MemoryAdapter, WatchHandle};
use proseql::{
    CascadeOption, CollectionConfig, CreateManyOptions, Database, DatabaseConfig, DeleteOptions,
    ProseError, RelationshipConfig, RelationshipKind, StorageAdapter, Value, Where,
};

fn fields(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
}

/// S1 - simple create/read: on empty `books`, create an entity and read it
/// back; `createdAt == updatedAt` on a freshly created entity.
#[tokio::test]
async fn s1_simple_create_read() {
    common::init_tracing();

    let config = DatabaseConfig::new().with_collection(CollectionConfig::new("books"));
    let db = Database::open(config, Arc::new(MemoryAdapter::new())).await.unwrap();
    let books = db.collection("books").unwrap();

    let created = books
        .create(
            fields(&[
                ("title", "Dune".into()),
                ("year", Value::Int(1965)),
                ("author", "Frank Herbert".into()),
            ]),
            Some("1".to_string()),
        )
        .unwrap();
    assert_eq!(created.created_at, created.updated_at);

    let fetched = books.get("1").unwrap();
    assert_eq!(fetched.get("title"), Some(&Value::String("Dune".to_string())));
    assert_eq!(fetched.created_at, fetched.updated_at);
}

/// S2 - FK violation: with `companies` empty, creating a `users` row with a
/// dangling `companyId` fails with `ForeignKey`, and the collection is left
/// untouched.
#[tokio::test]
async fn s2_foreign_key_violation() {
    common::init_tracing();

    let config = DatabaseConfig::new()
        .with_collection(CollectionConfig::new("companies"))
        .with_collection(CollectionConfig::new("users").with_relationship(RelationshipConfig {
            name: "company".to_string(),
            target: "companies".to_string(),
            kind: RelationshipKind::Ref { field: Some("companyId".to_string()) },
            on_delete: CascadeOption::Preserve,
        }));
    let db = Database::open(config, Arc::new(MemoryAdapter::new())).await.unwrap();
    let users = db.collection("users").unwrap();

    let err = users
        .create(
            fields(&[("companyId", "c".into())]),
            Some("u".to_string()),
        )
        .unwrap_err();
    match err {
        ProseError::ForeignKey { field, value, target_collection, .. } => {
            assert_eq!(field, "companyId");
            assert_eq!(value, "c");
            assert_eq!(target_collection, "companies");
        }
        other => panic!("expected ForeignKey, got {other:?}"),
    }

    assert!(users.is_empty());
}

/// S2b - `createMany` with `validateRelationships: false` skips the FK check
/// that `create` always runs, so a batch with a dangling `companyId` commits.
#[tokio::test]
async fn s2b_create_many_skips_fk_check_when_disabled() {
    common::init_tracing();

    let config = DatabaseConfig::new()
        .with_collection(CollectionConfig::new("companies"))
        .with_collection(CollectionConfig::new("users").with_relationship(RelationshipConfig {
            name: "company".to_string(),
            target: "companies".to_string(),
            kind: RelationshipKind::Ref { field: Some("companyId".to_string()) },
            on_delete: CascadeOption::Preserve,
        }));
    let db = Database::open(config, Arc::new(MemoryAdapter::new())).await.unwrap();
    let users = db.collection("users").unwrap();

    let result = users
        .create_many(
            vec![fields(&[("companyId", "missing".into())])],
            CreateManyOptions { validate_relationships: false, ..Default::default() },
        )
        .unwrap();
    assert_eq!(result.created.len(), 1);
    assert!(result.skipped.is_empty());
}

/// S3 - cascade restrict: deleting a user referenced by a post fails and
/// leaves both collections unchanged.
#[tokio::test]
async fn s3_cascade_restrict() {
    common::init_tracing();

    let config = DatabaseConfig::new()
        .with_collection(CollectionConfig::new("users"))
        .with_collection(CollectionConfig::new("posts").with_relationship(RelationshipConfig {
            name: "author".to_string(),
            target: "users".to_string(),
            kind: RelationshipKind::Ref { field: Some("authorId".to_string()) },
            on_delete: CascadeOption::Restrict,
        }));
    let db = Database::open(config, Arc::new(MemoryAdapter::new())).await.unwrap();
    let users = db.collection("users").unwrap();
    let posts = db.collection("posts").unwrap();

    users.create(HashMap::new(), Some("u1".to_string())).unwrap();
    posts
        .create(fields(&[("authorId", "u1".into())]), Some("p1".to_string()))
        .unwrap();

    let err = users.delete("u1", &DeleteOptions::default()).unwrap_err();
    assert!(matches!(err, ProseError::Validation { .. }));

    assert!(users.get("u1").is_some());
    assert!(posts.get("p1").is_some());
}

/// S4 - cascade set_null: deleting a post with a per-call `comments: set_null`
/// override nulls out every comment's `postId` and bumps its `updatedAt`,
/// while the post itself is removed.
#[tokio::test]
async fn s4_cascade_set_null() {
    common::init_tracing();

    let config = DatabaseConfig::new()
        .with_collection(CollectionConfig::new("posts"))
        .with_collection(CollectionConfig::new("comments").with_relationship(RelationshipConfig {
            name: "post".to_string(),
            target: "posts".to_string(),
            kind: RelationshipKind::Ref { field: Some("postId".to_string()) },
            on_delete: CascadeOption::Preserve,
        }));
    let db = Database::open(config, Arc::new(MemoryAdapter::new())).await.unwrap();
    let posts = db.collection("posts").unwrap();
    let comments = db.collection("comments").unwrap();

    posts.create(HashMap::new(), Some("p1".to_string())).unwrap();
    let comment = comments
        .create(fields(&[("postId", "p1".into())]), Some("c1".to_string()))
        .unwrap();

    let mut include = HashMap::new();
    include.insert("comments".to_string(), CascadeOption::SetNull);
    let options = DeleteOptions { soft: false, limit: None, include };
    posts.delete("p1", &options).unwrap();

    assert!(posts.get("p1").is_none());
    let after = comments.get("c1").unwrap();
    assert_eq!(after.get("postId"), Some(&Value::Null));
    assert!(after.updated_at > comment.updated_at);
}

/// S5 - upsert by a unique field twice: the first call creates, the second
/// updates the same entity.
#[tokio::test]
async fn s5_upsert_by_unique_field_twice() {
    common::init_tracing();

    let config = DatabaseConfig::new()
        .with_collection(CollectionConfig::new("users").with_unique(vec!["email".to_string()]));
    let db = Database::open(config, Arc::new(MemoryAdapter::new())).await.unwrap();
    let users = db.collection("users").unwrap();

    let where_ = Where::eq("email", "a@x");
    let first = users
        .upsert(
            &where_,
            fields(&[("id", "u".into()), ("email", "a@x".into()), ("name", "A".into())]),
            fields(&[("name", "A'".into())]),
        )
        .unwrap();
    assert_eq!(first.action, proseql::UpsertAction::Created);
    assert_eq!(first.entity.get("name"), Some(&Value::String("A".to_string())));

    let second = users
        .upsert(
            &where_,
            fields(&[("id", "u".into()), ("email", "a@x".into()), ("name", "A".into())]),
            fields(&[("name", "A'".into())]),
        )
        .unwrap();
    assert_eq!(second.action, proseql::UpsertAction::Updated);
    assert_eq!(second.entity.get("name"), Some(&Value::String("A'".to_string())));
}

/// Counts `write` calls against a wrapped adapter, to assert debounce
/// coalescing without relying on timing alone.
struct CountingAdapter {
    inner: MemoryAdapter,
    writes: AtomicUsize,
}

impl CountingAdapter {
    fn new() -> Self {
        Self { inner: MemoryAdapter::new(), writes: AtomicUsize::new(0) }
    }

    fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageAdapter for CountingAdapter {
    async fn read(&self, path: &Path) -> proseql::Result<Vec<u8>> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> proseql::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(path, bytes).await
    }

    async fn exists(&self, path: &Path) -> proseql::Result<bool> {
        self.inner.exists(path).await
    }

    async fn remove(&self, path: &Path) -> proseql::Result<()> {
        self.inner.remove(path).await
    }

    async fn ensure_dir(&self, path: &Path) -> proseql::Result<()> {
        self.inner.ensure_dir(path).await
    }

    fn watch(
        &self,
        path: &Path,
        on_change: Box<dyn Fn() + Send + Sync>,
    ) -> proseql::Result<Box<dyn WatchHandle>> {
        self.inner.watch(path, on_change)
    }
}

/// S6 - debounced persist: five updates to the same entity within 10ms,
/// with a 100ms writer debounce, collapse into exactly one file write
/// observing the final state.
#[tokio::test]
async fn s6_debounced_persist_collapses_writes() {
    common::init_tracing();

    let storage = Arc::new(CountingAdapter::new());
    let config = DatabaseConfig::new()
        .with_collection(CollectionConfig::new("counters").with_file("counters.json"))
        .with_writer_debounce(Duration::from_millis(100));
    let db = Database::open(config, storage.clone()).await.unwrap();
    let counters = db.collection("counters").unwrap();

    counters.create(fields(&[("n", Value::Int(0))]), Some("c".to_string())).unwrap();
    assert_eq!(storage.write_count(), 0, "create schedules a debounced save, not an immediate one");

    for i in 1i64..=5 {
        counters
            .update("c", &fields(&[("n", Value::Int(i))]))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(storage.write_count(), 1);

    let bytes = storage.inner.read(Path::new("counters.json")).await.unwrap();
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("\"n\": 5") || text.contains("\"n\":5"));
}

/// S6b - `flush()` forces an immediate write during the debounce window,
/// and a trigger after flush starts a fresh timer.
#[tokio::test]
async fn s6b_flush_forces_immediate_write_and_restarts_timer() {
    common::init_tracing();

    let storage = Arc::new(CountingAdapter::new());
    let config = DatabaseConfig::new()
        .with_collection(CollectionConfig::new("counters").with_file("counters.json"))
        .with_writer_debounce(Duration::from_millis(100));
    let db = Database::open(config, storage.clone()).await.unwrap();
    let counters = db.collection("counters").unwrap();

    counters.create(fields(&[("n", Value::Int(0))]), Some("c".to_string())).unwrap();
    db.flush().await.unwrap();
    assert_eq!(storage.write_count(), 1);

    counters.update("c", &fields(&[("n", Value::Int(1))])).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(storage.write_count(), 2);
}

/// S7 - migration: loading a file at an older schema version rewrites it at
/// the configured version, applying the declared migration to every row.
#[tokio::test]
async fn s7_migration_on_load() {
    common::init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("books.json");
    std::fs::write(
        &path,
        br#"{"_version":1,"1":{"id":"1","createdAt":"2020-01-01T00:00:00Z","updatedAt":"2020-01-01T00:00:00Z","title":"Dune"}}"#,
    )
    .unwrap();

    let config = DatabaseConfig::new().with_collection(
        CollectionConfig::new("books")
            .with_file(path.clone())
            .with_schema_version(2)
            .with_migration(1, |rows| {
                rows.into_iter()
                    .map(|mut r| {
                        r.entry("year".to_string()).or_insert(Value::Int(0));
                        r
                    })
                    .collect()
            }),
    );
    let db = Database::open(config, Arc::new(FsAdapter::new())).await.unwrap();
    let books = db.collection("books").unwrap();

    let entity = books.get("1").unwrap();
    assert_eq!(entity.get("title"), Some(&Value::String("Dune".to_string())));
    assert_eq!(entity.get("year"), Some(&Value::Int(0)));

    let rewritten = std::fs::read_to_string(&path).unwrap();
    assert!(rewritten.contains("\"_version\": 2"));
}

/// S8 - external watcher: an out-of-process rewrite of `books.json` is
/// picked up within the watcher's debounce window, replacing the in-memory
/// state and publishing a `Reload` event.
#[tokio::test]
async fn s8_external_watcher_reloads() {
    common::init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("books.json");
    std::fs::write(&path, br#"{"1":{"id":"1","createdAt":"2020-01-01T00:00:00Z","updatedAt":"2020-01-01T00:00:00Z","title":"Dune"}}"#).unwrap();

    let config = DatabaseConfig::new()
        .with_collection(CollectionConfig::new("books").with_file(path.clone()))
        .with_watcher_debounce(Duration::from_millis(50));
    let db = Database::open(config, Arc::new(FsAdapter::new())).await.unwrap();
    let books = db.collection("books").unwrap();
    let mut sub = books.subscribe();

    assert!(books.get("1").is_some());
    assert!(books.get("2").is_none());

    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(&path, br#"{"2":{"id":"2","createdAt":"2021-01-01T00:00:00Z","updatedAt":"2021-01-01T00:00:00Z","title":"Dune Messiah"}}"#).unwrap();

    let reloaded = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match sub.recv().await {
                Some(proseql::ChangeEvent::Reload { .. }) => return true,
                Some(_) => continue,
                None => return false,
            }
        }
    })
    .await
    .expect("reload event within timeout");
    assert!(reloaded);

    assert!(books.get("2").is_some());
    assert!(books.get("1").is_none());
}
