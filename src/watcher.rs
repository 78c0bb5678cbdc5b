//! File watcher (C13) — debounced consumer of external-change signals.
//!
//! Generic over what "reload" means: this module only owns the adapter
//! watch handle, the signal queue, and the debounce/consumer loop. The
//! actual reload-through-schema-and-replace-state-cell sequence is supplied
//! by the caller (the database façade, C15) as a boxed future factory, since
//! it needs access to a specific collection's schema and state cell.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::storage::StorageAdapter;

pub type ReloadFuture = Pin<Box<dyn std::future::Future<Output = Result<()>> + Send>>;
pub type ReloadFn = Arc<dyn Fn() -> ReloadFuture + Send + Sync>;

/// A running watch scope. Dropping without calling `stop` leaves the
/// consumer task and adapter watch running in the background; call `stop`
/// to interrupt the consumer and release the adapter watch deterministically.
pub struct FileWatcher {
    stop_tx: tokio::sync::mpsc::UnboundedSender<()>,
    watch_handle: Box<dyn crate::storage::WatchHandle>,
    consumer: tokio::task::JoinHandle<()>,
}

impl FileWatcher {
    pub fn spawn(
        storage: Arc<dyn StorageAdapter>,
        path: PathBuf,
        debounce: Duration,
        on_change: ReloadFn,
    ) -> Result<Self> {
        let (queue_tx, mut queue_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        let (stop_tx, mut stop_rx) = tokio::sync::mpsc::unbounded_channel::<()>();

        let watch_handle = storage.watch(
            &path,
            Box::new(move || {
                let _ = queue_tx.send(());
            }),
        )?;

        let consumer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    signal = queue_rx.recv() => {
                        if signal.is_none() {
                            break;
                        }
                        tokio::time::sleep(debounce).await;
                        while queue_rx.try_recv().is_ok() {}
                        if let Err(e) = (on_change)().await {
                            tracing::error!(error = %e, "file watcher reload failed");
                        }
                    }
                }
            }
        });

        Ok(Self {
            stop_tx,
            watch_handle,
            consumer,
        })
    }

    /// Interrupt the consumer and release the adapter watch.
    pub fn stop(self) {
        let _ = self.stop_tx.send(());
        self.watch_handle.stop();
        self.consumer.abort();
    }
}
