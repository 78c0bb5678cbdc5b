//! Filesystem `StorageAdapter`: temp-file + rename for atomic writes, and
//! `notify` for external-change watches.

use async_trait::async_trait;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;

use super::{StorageAdapter, WatchHandle};
use crate::error::{ProseError, Result};

pub struct FsAdapter;

impl FsAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageAdapter for FsAdapter {
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| ProseError::Storage(format!("read {}: {e}", path.display())))
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ProseError::Storage(format!("mkdir {}: {e}", dir.display())))?;

        let tmp = dir.join(format!(
            ".{}.tmp-{}",
            path.file_name().and_then(|f| f.to_str()).unwrap_or("data"),
            uuid::Uuid::new_v4()
        ));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| ProseError::Storage(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| ProseError::Storage(format!("rename into {}: {e}", path.display())))?;
        Ok(())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await.unwrap_or(false))
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProseError::Storage(format!("remove {}: {e}", path.display()))),
        }
    }

    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| ProseError::Storage(format!("mkdir {}: {e}", path.display())))
    }

    fn watch(
        &self,
        path: &Path,
        on_change: Box<dyn Fn() + Send + Sync>,
    ) -> Result<Box<dyn WatchHandle>> {
        let (tx, rx) = channel();
        let mut watcher: RecommendedWatcher = notify::recommended_watcher(tx)
            .map_err(|e| ProseError::Storage(format!("watcher init: {e}")))?;

        let watch_dir = path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| ProseError::Storage(format!("watch {}: {e}", watch_dir.display())))?;

        let target = path.to_path_buf();
        let (stop_tx, stop_rx) = channel::<()>();
        std::thread::spawn(move || {
            let _watcher = watcher; // keep alive for the thread's lifetime
            loop {
                if stop_rx.try_recv().is_ok() {
                    break;
                }
                match rx.recv_timeout(std::time::Duration::from_millis(200)) {
                    Ok(Ok(event)) => {
                        if event.paths.iter().any(|p| p == &target) {
                            on_change();
                        }
                    }
                    Ok(Err(_)) => {}
                    Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                    Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        Ok(Box::new(FsWatchHandle { stop_tx }))
    }
}

struct FsWatchHandle {
    stop_tx: std::sync::mpsc::Sender<()>,
}

impl WatchHandle for FsWatchHandle {
    fn stop(&self) {
        let _ = self.stop_tx.send(());
    }
}
