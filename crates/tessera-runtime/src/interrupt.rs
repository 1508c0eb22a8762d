//! Cooperative interruption flag.
//!
//! Set once by a forced close; observed by the interpreter at its
//! cancellation points and by any backend that blocks on I/O (the
//! external reader bridge). Waiting on it wakes immediately when it
//! is triggered.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Flag {
    triggered: Mutex<bool>,
    wake: Condvar,
}

/// Shared, one-way interruption signal.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<Flag>,
}

impl Interrupt {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every sleeper. Idempotent.
    pub fn trigger(&self) {
        let mut triggered = self.flag.triggered.lock();
        *triggered = true;
        self.flag.wake.notify_all();
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.flag.triggered.lock()
    }

    /// Sleeps for `duration` unless triggered first.
    ///
    /// Returns `true` if the sleep was cut short by the flag.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut triggered = self.flag.triggered.lock();
        while !*triggered {
            if self
                .flag
                .wake
                .wait_until(&mut triggered, deadline)
                .timed_out()
            {
                return *triggered;
            }
        }
        true
    }
}
