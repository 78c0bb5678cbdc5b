//! In-process `StorageAdapter`, for tests and for embedding without a
//! filesystem. Atomicity is trivial: a `DashMap` entry replace is already
//! indivisible from a reader's point of view.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{StorageAdapter, WatchHandle};
use crate::error::{ProseError, Result};

type Watchers = Arc<Mutex<Vec<Box<dyn Fn() + Send + Sync>>>>;

pub struct MemoryAdapter {
    files: DashMap<PathBuf, Vec<u8>>,
    watchers: DashMap<PathBuf, Watchers>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self {
            files: DashMap::new(),
            watchers: DashMap::new(),
        }
    }

    /// Test/embedding hook: simulate an external write to `path`, firing
    /// any registered watchers.
    pub fn external_write(&self, path: &Path, bytes: Vec<u8>) {
        self.files.insert(path.to_path_buf(), bytes);
        if let Some(watchers) = self.watchers.get(path) {
            for w in watchers.lock().iter() {
                w();
            }
        }
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.files
            .get(path)
            .map(|v| v.clone())
            .ok_or_else(|| ProseError::Storage(format!("no such file: {}", path.display())))
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.files.insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.files.contains_key(path))
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        self.files.remove(path);
        Ok(())
    }

    async fn ensure_dir(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn watch(
        &self,
        path: &Path,
        on_change: Box<dyn Fn() + Send + Sync>,
    ) -> Result<Box<dyn WatchHandle>> {
        let entry = self
            .watchers
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone();
        entry.lock().push(on_change);
        Ok(Box::new(NoopWatchHandle))
    }
}

struct NoopWatchHandle;

impl WatchHandle for NoopWatchHandle {
    fn stop(&self) {}
}
