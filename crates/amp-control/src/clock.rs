//! Time source for the control loop.

use std::time::{Duration, Instant};

/// Monotonic clock with blocking sleep.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by `Instant` and `thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock for tests: `sleep` advances time instantly.
#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct ManualClock {
    base: Instant,
    offset: std::rc::Rc<std::cell::Cell<Duration>>,
}

#[cfg(test)]
impl ManualClock {
    pub(crate) fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: std::rc::Rc::new(std::cell::Cell::new(Duration::ZERO)),
        }
    }

    /// Time elapsed since the clock was created.
    pub(crate) fn elapsed(&self) -> Duration {
        self.offset.get()
    }

    pub(crate) fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.offset.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
