//! One-shot shutdown signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::debug;

use crate::state::StopReason;

struct Inner {
    triggered: AtomicBool,
    reason: Mutex<Option<StopReason>>,
    tx: Sender<StopReason>,
    rx: Receiver<StopReason>,
}

/// Settable-once stop signal shared by every party that may end the relay.
///
/// Only the first [`trigger`](Self::trigger) takes effect; later calls are
/// ignored.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(1);
        Self {
            inner: Arc::new(Inner {
                triggered: AtomicBool::new(false),
                reason: Mutex::new(None),
                tx,
                rx,
            }),
        }
    }

    /// Signal shutdown. Returns `true` only for the call that set the signal.
    pub fn trigger(&self, reason: StopReason) -> bool {
        if self
            .inner
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(?reason, "Shutdown already signalled");
            return false;
        }

        *self.inner.reason.lock() = Some(reason);
        // Capacity 1 and a single successful trigger: this never blocks.
        let _ = self.inner.tx.try_send(reason);
        debug!(?reason, "Shutdown signalled");
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Reason given by the first trigger.
    pub fn reason(&self) -> Option<StopReason> {
        *self.inner.reason.lock()
    }

    pub(crate) fn receiver(&self) -> &Receiver<StopReason> {
        &self.inner.rx
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
