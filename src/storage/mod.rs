//! Storage capability (C3) — `read/write/exists/remove/ensure_dir/watch`,
//! with atomic writes. An external collaborator per the spec's scope: the
//! engine depends only on the `StorageAdapter` trait. Two concrete
//! implementations ship for running/testing the engine end-to-end without a
//! host-supplied adapter: `FsAdapter` (temp-file + rename) and
//! `MemoryAdapter` (in-process, for tests and filesystem-free embedding).

mod fs;
mod memory;

pub use fs::FsAdapter;
pub use memory::MemoryAdapter;

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

/// A handle to a registered external-change watch; dropping or calling
/// `stop` releases it.
pub trait WatchHandle: Send + Sync {
    fn stop(&self);
}

/// Durable byte storage for one collection file, plus a way to be notified
/// of external changes to it.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Atomic write: either the previous content or the new content is
    /// observable, never a partial byte sequence.
    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()>;

    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Idempotent; removing a missing path is not an error.
    async fn remove(&self, path: &Path) -> Result<()>;

    async fn ensure_dir(&self, path: &Path) -> Result<()>;

    /// Register a callback fired when `path`'s content changes externally.
    /// Returns a handle whose `stop()` releases the watch.
    fn watch(
        &self,
        path: &Path,
        on_change: Box<dyn Fn() + Send + Sync>,
    ) -> Result<Box<dyn WatchHandle>>;
}
