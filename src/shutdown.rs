//! Cooperative shutdown signaling and live-worker accounting.
//!
//! A single cancellation flag is set once (SIGINT handler, or anything else
//! holding the controller) and observed by every worker's loop condition.
//! Workers finish the unit of work in flight — one write, one upload, one
//! rotation — and then drop their [`WorkerGuard`], which decrements the live
//! count. [`ShutdownController::wait_all_exited`] blocks on a condition
//! variable until the count reaches zero, so shutdown can never interrupt an
//! in-flight transfer or rotation, and nothing spins while waiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Granularity at which cancellable sleeps observe the flag.
const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// Shared cancellation flag plus the live-worker registry.
pub struct ShutdownController {
    exit: AtomicBool,
    workers: Mutex<usize>,
    all_exited: Condvar,
}

impl ShutdownController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            exit: AtomicBool::new(false),
            workers: Mutex::new(0),
            all_exited: Condvar::new(),
        })
    }

    /// Raise the cancellation flag. Idempotent.
    pub fn request_shutdown(&self) {
        self.exit.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }

    /// Register a worker. Must be called *before* the worker thread is
    /// spawned, otherwise `wait_all_exited` could observe zero while threads
    /// are still starting.
    pub fn register(self: &Arc<Self>) -> WorkerGuard {
        let mut count = self.workers.lock().unwrap();
        *count += 1;
        WorkerGuard {
            controller: Arc::clone(self),
        }
    }

    /// Block until every registered worker has deregistered.
    pub fn wait_all_exited(&self) {
        let mut count = self.workers.lock().unwrap();
        while *count > 0 {
            count = self.all_exited.wait(count).unwrap();
        }
    }

    /// Number of workers currently registered.
    pub fn live_workers(&self) -> usize {
        *self.workers.lock().unwrap()
    }

    /// Sleep for `total`, waking early if shutdown is requested. Returns
    /// `false` when the sleep was cut short by cancellation.
    pub fn sleep_cancellable(&self, total: Duration) -> bool {
        let mut remaining = total;
        while !remaining.is_zero() {
            if self.is_shutdown() {
                return false;
            }
            let slice = remaining.min(SLEEP_SLICE);
            std::thread::sleep(slice);
            remaining -= slice;
        }
        !self.is_shutdown()
    }
}

/// Held by a running worker; deregisters on drop and wakes the coordinator
/// when the last worker exits.
pub struct WorkerGuard {
    controller: Arc<ShutdownController>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let mut count = self.controller.workers.lock().unwrap();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.controller.all_exited.notify_all();
        }
    }
}
