//! Cooperative shutdown signal shared by the bus thread and the control loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

/// Cloneable shutdown flag.
///
/// Triggering drops the only sender, so every clone blocked in
/// [`ShutdownSignal::wait_timeout`] wakes at once.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<Mutex<Option<Sender<()>>>>,
    rx: Receiver<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
            rx,
        }
    }

    /// Fire the signal. Idempotent.
    pub fn trigger(&self) {
        if let Ok(mut g) = self.tx.lock() {
            g.take();
        }
    }

    pub fn is_triggered(&self) -> bool {
        matches!(
            self.rx.try_recv(),
            Err(crossbeam_channel::TryRecvError::Disconnected)
        )
    }

    /// Sleep for `timeout` or until the signal fires.
    ///
    /// Returns `true` when the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => false,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
