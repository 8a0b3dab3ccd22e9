//! Listener bridge: post-commit fan-out of change records.
//!
//! Changes are queued on a bounded channel and delivered on a
//! dedicated thread, in journal order, observer by observer. A
//! failing observer is logged and skipped; delivery never runs under
//! the index lock and never blocks a commit.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use pacs_core::traits::listener::ChangeListener;
use pacs_core::types::change::Change;

const CHANNEL_BOUND: usize = 1024;

#[derive(Debug)]
pub(crate) enum BridgeCommand {
    Deliver(Vec<Change>),
    Shutdown,
}

/// Owns the delivery thread.
pub(crate) struct ChangeBridge {
    tx: Sender<BridgeCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeBridge {
    pub fn spawn(listeners: Vec<Arc<dyn ChangeListener>>) -> Self {
        let (tx, rx) = bounded(CHANNEL_BOUND);
        let handle = thread::Builder::new()
            .name("pacs-change-bridge".to_string())
            .spawn(move || delivery_loop(rx, listeners))
            .expect("failed to spawn change bridge thread");
        Self {
            tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queue a batch for delivery. Blocks only if the channel is full,
    /// which keeps a slow observer from accumulating unbounded memory.
    pub fn deliver(&self, changes: Vec<Change>) {
        if changes.is_empty() {
            return;
        }
        if self.tx.send(BridgeCommand::Deliver(changes)).is_err() {
            tracing::warn!("change bridge is gone; dropping change batch");
        }
    }

    /// Sender handle for the housekeeping threads.
    pub fn sender(&self) -> Sender<BridgeCommand> {
        self.tx.clone()
    }

    /// Drain the queue and stop the delivery thread.
    pub fn shutdown(&self) {
        let _ = self.tx.send(BridgeCommand::Shutdown);
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::warn!("change bridge thread panicked during shutdown");
            }
        }
    }
}

impl Drop for ChangeBridge {
    fn drop(&mut self) {
        let _ = self.tx.send(BridgeCommand::Shutdown);
    }
}

fn delivery_loop(rx: Receiver<BridgeCommand>, listeners: Vec<Arc<dyn ChangeListener>>) {
    while let Ok(command) = rx.recv() {
        match command {
            BridgeCommand::Deliver(changes) => {
                for change in &changes {
                    for listener in &listeners {
                        if let Err(e) = listener.on_change(change) {
                            tracing::warn!(
                                seq = change.seq,
                                error = %e,
                                "change listener failed; skipping"
                            );
                        }
                    }
                }
            }
            BridgeCommand::Shutdown => break,
        }
    }
}
