//! Haptic dispatch engine
//!
//! Decouples event producers from the slow device link. Producers call
//! [`HapticManager::trigger`], which never blocks on I/O: requests go into a
//! bounded FIFO (capacity [`MAX_QUEUE_SIZE`]) and a single worker thread
//! drains it into the device link in order.
//!
//! A request that fails with a disconnect error gets exactly
//! one close/reopen/resend cycle. If that fails too, the request is dropped.
//! Nothing is ever re-enqueued.
//!
//! `stop()` lets the worker drain whatever is already queued before the link
//! is closed.
//!
//! SPDX-License-Identifier: GPL-3.0

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::device::HapticDevice;

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of pending requests
pub const MAX_QUEUE_SIZE: usize = 10;

/// Worker thread name
const WORKER_NAME: &str = "haptic-worker";

// ============================================================================
// Effect sink
// ============================================================================

/// Anything that accepts haptic effect requests without blocking
pub trait EffectSink: Send + Sync {
    /// Request an effect; never fails from the caller's perspective
    fn trigger(&self, effect_id: i32);
}

// ============================================================================
// Statistics
// ============================================================================

/// Snapshot of dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Requests written to the device
    pub delivered: u64,
    /// Requests rejected because the queue was full
    pub dropped_full: u64,
    /// Requests dropped after a failed send (or failed reconnect)
    pub dropped_failed: u64,
    /// Reconnect attempts made by the worker
    pub reconnects: u64,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    dropped_full: AtomicU64,
    dropped_failed: AtomicU64,
    reconnects: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_full: self.dropped_full.load(Ordering::Relaxed),
            dropped_failed: self.dropped_failed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Shared state
// ============================================================================

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<i32>,
    shutdown: bool,
}

/// State shared between producers and the worker
#[derive(Debug, Default)]
struct Shared {
    queue: Mutex<QueueState>,
    available: Condvar,
    counters: Counters,
}

impl Shared {
    /// Lock the queue; a panicked holder cannot leave it inconsistent
    fn lock_queue(&self) -> MutexGuard<'_, QueueState> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Worker body; returns the link when it was handed over
type Worker<D> = Box<dyn FnOnce() -> Option<D> + Send>;

/// Who currently owns the device link
enum Lifecycle<D> {
    /// Idle; the link is held here, closed
    Stopped(D),
    /// The worker owns the link and hands it back on exit
    Running(JoinHandle<Option<D>>),
    /// The worker panicked and took the link with it
    Failed,
}

// ============================================================================
// HapticManager
// ============================================================================

/// Bounded-queue dispatcher owning one device link
pub struct HapticManager<D: HapticDevice + Send + 'static> {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle<D>>,
}

impl<D: HapticDevice + Send + 'static> HapticManager<D> {
    /// Wrap a device link; no thread is started yet
    pub fn new(device: D) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            lifecycle: Mutex::new(Lifecycle::Stopped(device)),
        }
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle<D>> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the worker; no-op when already running
    pub fn start(&self) {
        self.launch(|worker| {
            thread::Builder::new()
                .name(WORKER_NAME.to_string())
                .spawn(worker)
        });
    }

    /// Hand the link to a worker started by `spawn`
    ///
    /// The link travels through a slot, so a failed spawn leaves it with the
    /// manager instead of dropping it with the closure.
    fn launch<S>(&self, spawn: S)
    where
        S: FnOnce(Worker<D>) -> io::Result<JoinHandle<Option<D>>>,
    {
        let mut lifecycle = self.lock_lifecycle();

        let device = match std::mem::replace(&mut *lifecycle, Lifecycle::Failed) {
            Lifecycle::Stopped(device) => device,
            running @ Lifecycle::Running(_) => {
                *lifecycle = running;
                return;
            }
            Lifecycle::Failed => {
                tracing::error!("Haptic worker previously failed, cannot restart");
                return;
            }
        };

        self.shared.lock_queue().shutdown = false;

        let slot = Arc::new(Mutex::new(Some(device)));
        let worker: Worker<D> = {
            let slot = Arc::clone(&slot);
            let shared = Arc::clone(&self.shared);
            Box::new(move || {
                let device = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                device.map(|device| worker_loop(device, &shared))
            })
        };

        match spawn(worker) {
            Ok(handle) => {
                *lifecycle = Lifecycle::Running(handle);
                tracing::info!("Haptic Manager started");
            }
            Err(e) => {
                let device = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                match device {
                    Some(device) => {
                        tracing::error!(error = %e, "Failed to spawn haptic worker");
                        *lifecycle = Lifecycle::Stopped(device);
                    }
                    None => {
                        tracing::error!(error = %e, "Failed to spawn haptic worker, device lost");
                    }
                }
            }
        }
    }

    /// Drain the queue, join the worker and close the link; no-op when stopped
    pub fn stop(&self) {
        let mut lifecycle = self.lock_lifecycle();

        let handle = match std::mem::replace(&mut *lifecycle, Lifecycle::Failed) {
            Lifecycle::Running(handle) => handle,
            other => {
                *lifecycle = other;
                return;
            }
        };

        self.shared.lock_queue().shutdown = true;
        self.shared.available.notify_all();

        match handle.join() {
            Ok(Some(mut device)) => {
                device.close();
                *lifecycle = Lifecycle::Stopped(device);
                tracing::info!("Haptic Manager stopped");
            }
            Ok(None) => {
                tracing::error!("Haptic worker exited without the device");
            }
            Err(_) => {
                tracing::error!("Haptic worker panicked");
            }
        }
    }

    /// Whether the worker thread is alive
    pub fn is_running(&self) -> bool {
        matches!(*self.lock_lifecycle(), Lifecycle::Running(_))
    }

    /// Number of queued, not yet dispatched requests
    pub fn pending(&self) -> usize {
        self.shared.lock_queue().pending.len()
    }

    /// Counter snapshot
    pub fn stats(&self) -> DispatchStats {
        self.shared.counters.snapshot()
    }

    /// Queue an effect; drops it with a warning when the queue is full
    ///
    /// Accepted while stopped; the next `start()` dispatches it.
    pub fn trigger(&self, effect_id: i32) {
        let mut queue = self.shared.lock_queue();

        if queue.pending.len() >= MAX_QUEUE_SIZE {
            drop(queue);
            self.shared.counters.dropped_full.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(effect_id, "Haptic queue full, dropping event");
            return;
        }

        queue.pending.push_back(effect_id);
        drop(queue);
        self.shared.available.notify_one();
        tracing::trace!(effect_id, "Haptic event queued");
    }
}

impl<D: HapticDevice + Send + 'static> EffectSink for HapticManager<D> {
    fn trigger(&self, effect_id: i32) {
        HapticManager::trigger(self, effect_id);
    }
}

impl<D: HapticDevice + Send + 'static> Drop for HapticManager<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Wait, check shutdown-and-empty, pop, dispatch; hands the link back on exit
fn worker_loop<D: HapticDevice>(mut device: D, shared: &Shared) -> D {
    tracing::debug!("Haptic worker running");

    loop {
        let effect_id = {
            let mut queue = shared.lock_queue();
            while queue.pending.is_empty() && !queue.shutdown {
                queue = shared
                    .available
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }

            match queue.pending.pop_front() {
                Some(effect_id) => effect_id,
                None => break,
            }
        };

        dispatch(&mut device, effect_id, &shared.counters);
    }

    tracing::debug!("Haptic worker exiting");
    device
}

/// Send one request with a single reconnect-and-resend on disconnect
fn dispatch<D: HapticDevice>(device: &mut D, effect_id: i32, counters: &Counters) {
    match device.send_haptic_feedback(effect_id) {
        Ok(()) => {
            counters.delivered.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(effect_id, "Haptic effect sent");
        }
        Err(e) if e.is_recoverable() => {
            tracing::warn!(error = %e, "Device disconnected, attempting reconnect...");
            counters.reconnects.fetch_add(1, Ordering::Relaxed);
            device.close();

            let resent = device
                .open()
                .and_then(|()| device.send_haptic_feedback(effect_id));

            match resent {
                Ok(()) => {
                    counters.delivered.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(effect_id, "Reconnected, haptic effect sent");
                }
                Err(e) => {
                    counters.dropped_failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(effect_id, error = %e, "Reconnect failed");
                }
            }
        }
        Err(e) => {
            counters.dropped_failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(effect_id, error = %e, "Unexpected HID error");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
