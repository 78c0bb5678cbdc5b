//! Database factory (C15) — wires config, storage, the reactive bus, the
//! debounced writer, and per-collection file watchers into a set of live
//! collection handles.
//!
//! `Collection` holds a `Weak<DatabaseInner>` back-reference rather than an
//! `Arc`, since `DatabaseInner` owns an `Arc<Collection>` per collection;
//! an `Arc` back-reference would make the pair uncollectable. Cross-collection
//! lookups (foreign-key checks, cascades) upgrade the weak reference for the
//! duration of the call.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

use crate::config::{CollectionConfig, DatabaseConfig};
use crate::error::Result;
use crate::events::{ChangeEvent, EventBus, Subscription};
use crate::index::{IndexSet, UniqueIndexManager};
use crate::schema::Schema;
use crate::state::StateCell;
use crate::storage::StorageAdapter;
use crate::validate::PeerResolver;
use crate::watcher::FileWatcher;
use crate::writer::DebouncedWriter;

/// One open collection: its schema, authoritative state, maintained indexes,
/// and the shared services (storage, writer, bus) it persists and publishes
/// through. Mutation (C8), cascade (C9), and query (C10) methods are
/// implemented as additional `impl Collection` blocks in their own modules.
pub struct Collection {
    pub(crate) name: String,
    pub(crate) config: Arc<CollectionConfig>,
    pub(crate) schema: Arc<dyn Schema>,
    pub(crate) state: StateCell,
    pub(crate) unique: UniqueIndexManager,
    pub(crate) indexes: IndexSet,
    pub(crate) storage: Arc<dyn StorageAdapter>,
    pub(crate) writer: Arc<DebouncedWriter>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) db: Weak<DatabaseInner>,
    pub(crate) watcher: Mutex<Option<FileWatcher>>,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn get(&self, id: &str) -> Option<crate::value::Entity> {
        self.state.get(id)
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    /// Encode the collection's current snapshot in `format`, for an external
    /// CLI's `convert` subcommand to write out under a new extension without
    /// this crate implementing subcommand parsing itself (§6 CLI surface).
    pub fn export_snapshot(&self, format: crate::serializer::Format) -> Result<Vec<u8>> {
        let snapshot = self.state.snapshot();
        crate::persistence::encode_collection(&snapshot, self.config.as_ref(), self.schema.as_ref(), format)
    }

    /// Upgrade the back-reference to the owning database, for cross-collection
    /// lookups. `None` once the database has been dropped.
    pub(crate) fn database(&self) -> Option<Arc<DatabaseInner>> {
        self.db.upgrade()
    }

    pub(crate) fn publish(&self, event: ChangeEvent) {
        self.bus.publish(event);
    }

    /// Schedule a debounced persist of the current snapshot, keyed by this
    /// collection's configured file path. A collection with no file binding
    /// is purely in-memory and never persists.
    pub(crate) fn schedule_save(&self) {
        let Some(binding) = self.config.file.clone() else {
            return;
        };
        let format = binding.format();
        let config = self.config.clone();
        let schema = self.schema.clone();
        let snapshot = self.state.snapshot();
        self.writer.trigger_save(binding.path, move || {
            crate::persistence::encode_collection(&snapshot, config.as_ref(), schema.as_ref(), format)
        });
    }
}

/// Shared state behind every `Collection` in one database: storage adapter,
/// reactive bus, debounced writer, and the collection registry itself.
pub struct DatabaseInner {
    pub(crate) config: DatabaseConfig,
    pub(crate) storage: Arc<dyn StorageAdapter>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) writer: Arc<DebouncedWriter>,
    pub(crate) collections: DashMap<String, Arc<Collection>>,
}

impl PeerResolver for DatabaseInner {
    fn collection_exists(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    fn entity_exists(&self, collection: &str, id: &str) -> bool {
        self.collections
            .get(collection)
            .map(|c| c.state.get(id).is_some())
            .unwrap_or(false)
    }
}

/// Shared `filter::PeerReader` view over a live database, for one-hop
/// relationship traversal in `where` clauses and nested-populate lookups.
/// Reused by the query pipeline, `updateMany`/`deleteMany` predicates, and
/// `upsert`'s `where` matching.
pub(crate) struct DbPeerReader<'a> {
    pub(crate) db: &'a DatabaseInner,
}

impl<'a> crate::filter::PeerReader for DbPeerReader<'a> {
    fn get(&self, collection: &str, id: &str) -> Option<crate::value::Entity> {
        self.db.collections.get(collection).and_then(|c| c.get(id))
    }

    fn scan_by_fk(&self, collection: &str, fk_field: &str, id: &str) -> Vec<crate::value::Entity> {
        let Some(coll) = self.db.collections.get(collection) else {
            return Vec::new();
        };
        coll.state
            .snapshot()
            .values()
            .filter(|e| e.get(fk_field).and_then(|v| v.as_str()) == Some(id))
            .cloned()
            .collect()
    }
}

/// The public entry point: a handle to an open set of collections sharing
/// one storage adapter, reactive bus, and debounced writer.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Open a database against `storage`, constructing one `Collection` per
    /// entry in `config.collections`, loading each from its bound file (if
    /// any) and starting its file watcher (if its adapter supports one).
    pub async fn open(mut config: DatabaseConfig, storage: Arc<dyn StorageAdapter>) -> Result<Self> {
        let bus = Arc::new(EventBus::new(config.bus_capacity));
        let writer = DebouncedWriter::new(storage.clone(), config.writer_debounce);
        let collection_configs = std::mem::take(&mut config.collections);

        let inner = Arc::new(DatabaseInner {
            config,
            storage: storage.clone(),
            bus: bus.clone(),
            writer: writer.clone(),
            collections: DashMap::new(),
        });

        for (name, coll_config) in collection_configs {
            let collection = Self::open_collection(&inner, coll_config, storage.clone(), bus.clone(), writer.clone())
                .await?;
            inner.collections.insert(name, collection);
        }

        Ok(Self { inner })
    }

    async fn open_collection(
        db: &Arc<DatabaseInner>,
        coll_config: CollectionConfig,
        storage: Arc<dyn StorageAdapter>,
        bus: Arc<EventBus>,
        writer: Arc<DebouncedWriter>,
    ) -> Result<Arc<Collection>> {
        let name = coll_config.name.clone();
        let schema = coll_config.schema.clone();
        let coll_config = Arc::new(coll_config);
        let watcher_debounce = db.config.watcher_debounce;

        let state = if let Some(binding) = &coll_config.file {
            let result = crate::persistence::load_collection(
                storage.as_ref(),
                &binding.path,
                binding.format(),
                coll_config.as_ref(),
                schema.as_ref(),
            )
            .await?;
            StateCell::from_map(result.entities)
        } else {
            StateCell::new()
        };

        let unique = UniqueIndexManager::new(&coll_config.unique);
        let indexes = IndexSet::new(&coll_config.indexes);
        for entity in state.snapshot().values() {
            unique.observe_insert(entity);
            indexes.observe_insert(entity);
        }

        tracing::info!(collection = %name, "collection opened");

        let collection = Arc::new(Collection {
            name: name.clone(),
            config: coll_config.clone(),
            schema,
            state,
            unique,
            indexes,
            storage: storage.clone(),
            writer,
            bus: bus.clone(),
            db: Arc::downgrade(db),
            watcher: Mutex::new(None),
        });

        if let Some(binding) = &coll_config.file {
            let path = binding.path.clone();
            let weak = Arc::downgrade(&collection);
            let reload_storage = storage.clone();
            let reload_format = binding.format();
            let reload_config = coll_config.clone();
            let on_change: crate::watcher::ReloadFn = Arc::new(move || {
                let weak = weak.clone();
                let storage = reload_storage.clone();
                let config = reload_config.clone();
                let format = reload_format;
                Box::pin(async move {
                    let Some(collection) = weak.upgrade() else {
                        return Ok(());
                    };
                    let path = config.file.as_ref().expect("watched collection has a file").path.clone();
                    match crate::persistence::load_collection(
                        storage.as_ref(),
                        &path,
                        format,
                        config.as_ref(),
                        collection.schema.as_ref(),
                    )
                    .await
                    {
                        Ok(result) => {
                            collection.state.replace(|_| ((), result.entities));
                            let snapshot = collection.state.snapshot();
                            collection.unique.rebuild(snapshot.values());
                            collection.indexes.rebuild(snapshot.values().cloned());
                            collection.publish(ChangeEvent::Reload {
                                collection: collection.name.clone(),
                            });
                            Ok(())
                        }
                        Err(e) => {
                            collection.publish(ChangeEvent::ReloadFailed {
                                collection: collection.name.clone(),
                                message: e.to_string(),
                            });
                            Err(e)
                        }
                    }
                })
            });
            match FileWatcher::spawn(storage.clone(), path, watcher_debounce, on_change) {
                Ok(watcher) => *collection.watcher.lock() = Some(watcher),
                Err(e) => tracing::warn!(collection = %name, error = %e, "could not start file watcher"),
            }
        }

        Ok(collection)
    }

    pub fn collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.inner.collections.get(name).map(|e| e.clone())
    }

    pub fn list_collections(&self) -> Vec<String> {
        self.inner.collections.iter().map(|e| e.key().clone()).collect()
    }

    /// Force every outstanding debounced write to complete immediately.
    pub async fn flush(&self) -> Result<()> {
        self.inner.writer.flush().await
    }

    /// Stop every collection's file watcher and flush outstanding writes.
    pub async fn close(&self) -> Result<()> {
        for entry in self.inner.collections.iter() {
            if let Some(watcher) = entry.value().watcher.lock().take() {
                watcher.stop();
            }
        }
        self.flush().await
    }
}
