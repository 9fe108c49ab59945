//! Bounded FIFO between producers and the relay loop.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::PipelineError;
use crate::unit::Unit;
use crate::PipelineResult;

/// What `enqueue` does when the queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Block the producer until the relay loop frees a slot.
    #[default]
    Block,

    /// Evict the unit at the head of the queue.
    DropOldest,

    /// Discard the unit being enqueued.
    DropNewest,
}

impl OverflowPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::DropOldest => "drop-oldest",
            Self::DropNewest => "drop-newest",
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OverflowPolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "drop-oldest" => Ok(Self::DropOldest),
            "drop-newest" => Ok(Self::DropNewest),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown overflow policy {:?} (expected block, drop-oldest or drop-newest)",
                other
            ))),
        }
    }
}

struct Shared {
    capacity: usize,
    policy: OverflowPolicy,
    next_id: Mutex<u64>,
    dropped: AtomicU64,
    closed: AtomicBool,
}

/// Create a queue holding at most `capacity` units.
pub fn unit_queue(
    capacity: usize,
    policy: OverflowPolicy,
) -> PipelineResult<(UnitSender, UnitReceiver)> {
    if capacity == 0 {
        return Err(PipelineError::InvalidConfig(
            "queue capacity must be positive".to_string(),
        ));
    }

    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let shared = Arc::new(Shared {
        capacity,
        policy,
        next_id: Mutex::new(0),
        dropped: AtomicU64::new(0),
        closed: AtomicBool::new(false),
    });

    let evict = (policy == OverflowPolicy::DropOldest).then(|| rx.clone());

    Ok((
        UnitSender {
            tx,
            evict,
            shared: Arc::clone(&shared),
        },
        UnitReceiver { rx, shared },
    ))
}

/// Producer side; the ingestion entry point.
///
/// Clones share one id counter. Id assignment and insertion happen under the
/// same lock, so ids increase in queue order even with concurrent producers.
#[derive(Clone)]
pub struct UnitSender {
    tx: Sender<Unit>,
    evict: Option<Receiver<Unit>>,
    shared: Arc<Shared>,
}

impl UnitSender {
    /// Enqueue one payload.
    ///
    /// Returns the id given to the unit, or `None` when the unit was discarded
    /// under [`OverflowPolicy::DropNewest`]. With [`OverflowPolicy::Block`]
    /// this waits for a free slot. Fails with [`PipelineError::Closed`] once
    /// the pipeline has stopped accepting units.
    pub fn enqueue(&self, payload: impl Into<Bytes>) -> PipelineResult<Option<u64>> {
        if self.is_closed() {
            return Err(PipelineError::Closed);
        }

        let mut next_id = self.shared.next_id.lock();
        let id = *next_id;
        let unit = Unit::new(id, payload);

        match self.shared.policy {
            OverflowPolicy::Block => {
                self.tx.send(unit).map_err(|_| PipelineError::Closed)?;
            }
            OverflowPolicy::DropNewest => match self.tx.try_send(unit) {
                Ok(()) => {}
                Err(TrySendError::Full(unit)) => {
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!(size = unit.size(), "Queue full, dropping newest unit");
                    return Ok(None);
                }
                Err(TrySendError::Disconnected(_)) => return Err(PipelineError::Closed),
            },
            OverflowPolicy::DropOldest => self.push_evicting(unit)?,
        }

        *next_id += 1;
        Ok(Some(id))
    }

    fn push_evicting(&self, mut unit: Unit) -> PipelineResult<()> {
        loop {
            match self.tx.try_send(unit) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(back)) => {
                    unit = back;
                    if let Some(evicted) = self.evict.as_ref().and_then(|rx| rx.try_recv().ok()) {
                        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                        trace!(id = evicted.id(), "Queue full, dropping oldest unit");
                    }
                }
                Err(TrySendError::Disconnected(_)) => return Err(PipelineError::Closed),
            }
        }
    }

    /// Whether the pipeline has stopped accepting units.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Units discarded by the overflow policy so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

/// Consumer side, owned by the relay loop.
pub struct UnitReceiver {
    rx: Receiver<Unit>,
    shared: Arc<Shared>,
}

impl UnitReceiver {
    /// Block until a unit is available. `None` once every sender is gone and
    /// the queue is empty.
    pub fn dequeue(&self) -> Option<Unit> {
        self.rx.recv().ok()
    }

    pub fn try_dequeue(&self) -> Option<Unit> {
        self.rx.try_recv().ok()
    }

    /// Refuse further units; queued units stay until dequeued or discarded.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }

    /// Release every queued unit; returns how many there were.
    pub fn discard_all(&self) -> usize {
        self.rx.try_iter().count()
    }

    /// Units currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Units discarded by the overflow policy so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn channel(&self) -> &Receiver<Unit> {
        &self.rx
    }
}
