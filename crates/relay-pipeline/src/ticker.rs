//! Fixed-period tick source for stats reporting.

use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

/// Emits the current instant every `period`, first one `period` after
/// construction.
///
/// The channel holds a single pending tick; ticks that fall due while one is
/// still unread are skipped.
pub struct Ticker {
    rx: Receiver<Instant>,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        Self {
            rx: crossbeam_channel::tick(period),
        }
    }

    /// A ticker that never fires.
    pub fn never() -> Self {
        Self {
            rx: crossbeam_channel::never(),
        }
    }

    /// Drive ticks from an external channel.
    pub fn from_receiver(rx: Receiver<Instant>) -> Self {
        Self { rx }
    }

    pub fn receiver(&self) -> &Receiver<Instant> {
        &self.rx
    }
}
