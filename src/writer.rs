//! Debounced writer (C12) — per-file save coalescing.
//!
//! Keyed by file path. Each `trigger_save` cancels any outstanding timer for
//! that key and replaces the pending bytes-computation closure, so a burst of
//! mutations against the same file collapses into a single adapter write of
//! the *final* state once the debounce window elapses.

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::storage::StorageAdapter;

type ComputeFn = dyn Fn() -> Result<Vec<u8>> + Send + Sync;

struct PendingEntry {
    compute: Arc<ComputeFn>,
    task: tokio::task::JoinHandle<()>,
}

pub struct DebouncedWriter {
    storage: Arc<dyn StorageAdapter>,
    delay: Duration,
    pending: DashMap<PathBuf, PendingEntry>,
}

impl DebouncedWriter {
    pub fn new(storage: Arc<dyn StorageAdapter>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            storage,
            delay,
            pending: DashMap::new(),
        })
    }

    /// Schedule (or reschedule) a save of `key`. `compute` is invoked at
    /// timer-fire time, not at call time, so it must snapshot whatever state
    /// it needs to encode rather than close over a reference that could go
    /// stale.
    pub fn trigger_save(
        self: &Arc<Self>,
        key: PathBuf,
        compute: impl Fn() -> Result<Vec<u8>> + Send + Sync + 'static,
    ) {
        let compute: Arc<ComputeFn> = Arc::new(compute);
        if let Some(existing) = self.pending.get(&key) {
            existing.task.abort();
        }

        let this = self.clone();
        let fire_key = key.clone();
        let fire_compute = compute.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(this.delay).await;
            this.fire(&fire_key, &fire_compute).await;
        });

        self.pending.insert(key, PendingEntry { compute, task });
    }

    async fn fire(&self, key: &Path, compute: &Arc<ComputeFn>) {
        self.pending.remove(key);
        match compute() {
            Ok(bytes) => {
                if let Err(e) = self.storage.write(key, &bytes).await {
                    tracing::error!(path = %key.display(), error = %e, "debounced write failed");
                }
            }
            Err(e) => {
                tracing::error!(path = %key.display(), error = %e, "encode before debounced write failed");
            }
        }
    }

    /// Cancel every outstanding timer and execute its write immediately,
    /// awaiting completion. Returns the first error encountered, if any.
    pub async fn flush(&self) -> Result<()> {
        let keys: Vec<PathBuf> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        let mut first_err = None;
        for key in keys {
            let Some((_, entry)) = self.pending.remove(&key) else {
                continue;
            };
            entry.task.abort();
            let outcome = match (entry.compute)() {
                Ok(bytes) => self.storage.write(&key, &bytes).await,
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
