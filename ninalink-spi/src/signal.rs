//! Single-slot notifications.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A binary semaphore.
///
/// The interrupt side calls [`give`](Signal::give); the engine blocks in
/// [`take`](Signal::take). Repeated gives before a take collapse into one.
#[derive(Debug, Default)]
pub struct Signal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal, waking one waiter.
    pub fn give(&self) {
        let mut raised = self.raised.lock();
        *raised = true;
        self.cond.notify_one();
    }

    /// Blocks until the signal is raised, then lowers it.
    pub fn take(&self) {
        let mut raised = self.raised.lock();
        while !*raised {
            self.cond.wait(&mut raised);
        }
        *raised = false;
    }

    /// Like [`take`](Signal::take), but gives up after `timeout`.
    ///
    /// Returns `true` if the signal was consumed.
    pub fn take_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut raised = self.raised.lock();
        while !*raised {
            if self.cond.wait_until(&mut raised, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *raised, false)
    }

    /// Lowers the signal without waiting.
    pub fn reset(&self) {
        *self.raised.lock() = false;
    }

    pub fn is_raised(&self) -> bool {
        *self.raised.lock()
    }
}
