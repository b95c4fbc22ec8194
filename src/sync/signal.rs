//! Stop flag with an interruptible sleep

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Cooperative stop request shared with a worker thread
///
/// Workers pace themselves with [`StopSignal::sleep`], which returns early as
/// soon as [`StopSignal::stop`] is called.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the worker to stop and interrupts any sleep in progress
    pub fn stop(&self) {
        let mut stopped = self.stopped.lock();
        *stopped = true;
        self.wake.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleeps for `duration` unless stopped first
    ///
    /// # Returns
    /// true if the full duration elapsed, false if a stop was requested
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.wake.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        !*stopped
    }
}
