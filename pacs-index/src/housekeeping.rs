//! Housekeeping threads: periodic write-ahead flush and the stability
//! monitor.
//!
//! Both threads run until `stop()`, which signals their shutdown
//! channels and joins. Failures are logged and the thread carries on
//! at the next tick.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use pacs_core::traits::clock::Clock;

use crate::bridge::BridgeCommand;
use crate::index::{promote_step, IndexInner};

pub(crate) struct HousekeepingThreads {
    flush_stop: Sender<()>,
    monitor_stop: Sender<()>,
    flush: Option<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
}

impl HousekeepingThreads {
    pub fn spawn(
        inner: Arc<Mutex<IndexInner>>,
        clock: Arc<dyn Clock>,
        bridge_tx: Sender<BridgeCommand>,
        flush_interval: Duration,
    ) -> Self {
        let (flush_stop, flush_rx) = bounded(1);
        let (monitor_stop, monitor_rx) = bounded(1);

        let flush_inner = Arc::clone(&inner);
        let flush = thread::Builder::new()
            .name("pacs-index-flush".to_string())
            .spawn(move || flush_loop(flush_inner, flush_rx, flush_interval))
            .expect("failed to spawn flush thread");

        let monitor = thread::Builder::new()
            .name("pacs-stability-monitor".to_string())
            .spawn(move || monitor_loop(inner, clock, bridge_tx, monitor_rx))
            .expect("failed to spawn stability monitor thread");

        Self {
            flush_stop,
            monitor_stop,
            flush: Some(flush),
            monitor: Some(monitor),
        }
    }

    /// Signal both threads and join them.
    pub fn stop(&mut self) {
        let _ = self.flush_stop.send(());
        let _ = self.monitor_stop.send(());
        for handle in [self.flush.take(), self.monitor.take()].into_iter().flatten() {
            if handle.join().is_err() {
                tracing::warn!("housekeeping thread panicked during shutdown");
            }
        }
    }
}

/// Flush write-ahead state every `interval`, skipping ticks where
/// normal traffic has not written since the previous flush.
fn flush_loop(inner: Arc<Mutex<IndexInner>>, stop: Receiver<()>, interval: Duration) {
    loop {
        match stop.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let mut guard = inner.lock();
        if guard.write_generation == guard.flushed_generation {
            continue;
        }
        let generation = guard.write_generation;
        match guard.db.flush_to_disk() {
            Ok(()) => guard.flushed_generation = generation,
            Err(e) => tracing::warn!(error = %e, "write-ahead flush failed"),
        }
    }
}

/// Scan the stability tracker every second (or until the projected
/// promotion time, when that is later) and promote quiescent entries.
fn monitor_loop(
    inner: Arc<Mutex<IndexInner>>,
    clock: Arc<dyn Clock>,
    bridge_tx: Sender<BridgeCommand>,
    stop: Receiver<()>,
) {
    loop {
        let sleep = {
            let guard = inner.lock();
            let window = guard.config.effective_quiescence_window_secs();
            guard
                .stability
                .seconds_until_next(clock.unix_seconds(), window)
                .unwrap_or(window.max(1))
                .max(1)
        };

        match stop.recv_timeout(Duration::from_secs(sleep)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }

        match promote_step(&inner, clock.as_ref()) {
            Ok(changes) if !changes.is_empty() => {
                let _ = bridge_tx.send(BridgeCommand::Deliver(changes));
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "stability promotion failed"),
        }
    }
}
