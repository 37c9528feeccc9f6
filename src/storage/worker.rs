//! Periodic autosave worker.
//!
//! The worker ticks every `autosaveInterval` and asks the orchestrator to persist its state.
//! The orchestrator only writes when something changed since the last save, so an idle wallet
//! costs one timestamp comparison per tick. The worker holds a weak reference to the orchestrator:
//! once every `Storage` handle is dropped the next tick ends the task.

use crate::storage::orchestrator::{Storage, StorageInner};

use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error};

/// Handle on a running autosave task.
pub struct AutosaveWorker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl AutosaveWorker {
    /// Spawn the worker on the current Tokio runtime.
    ///
    /// Returns `None` when called outside of a runtime.
    pub(crate) fn spawn(storage: Weak<StorageInner>, period: Duration) -> Option<Self> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Cannot start autosave worker outside of a Tokio runtime: {}", e);
                return None;
            }
        };

        let (tx, mut rx) = watch::channel(false);
        let handle = runtime.spawn(async move {
            // First tick one full period after arming.
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(storage) = Storage::upgrade(&storage) else {
                            debug!("Storage dropped, autosave worker exiting");
                            break;
                        };
                        if let Err(e) = storage.autosave_tick().await {
                            error!("Autosave failed: {}", e);
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Autosave worker stopped");
        });

        debug!("Autosave worker started with a {:?} interval", period);
        Some(Self {
            shutdown: tx,
            handle,
        })
    }

    /// Ask the task to stop. An in-flight save completes first.
    pub(crate) fn stop(self) {
        if self.shutdown.send(true).is_err() {
            // Receiver gone: the task already exited.
            return;
        }
        drop(self.handle);
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
