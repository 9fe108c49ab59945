//! Relay core.
//!
//! Units handed in through a [`UnitSender`] wait in a bounded queue until the
//! relay loop publishes them, one at a time and in order. A ticker drives
//! periodic throughput reports and a [`ShutdownCoordinator`] ends the loop.

mod config;
mod error;
mod queue;
mod relay;
mod shutdown;
mod state;
mod stats;
mod ticker;
mod unit;

use std::time::Duration;

pub use config::{PipelineConfig, ShutdownMode};
pub use error::PipelineError;
pub use queue::{unit_queue, OverflowPolicy, UnitReceiver, UnitSender};
pub use relay::{Pipeline, RelayExit, RelayLoop};
pub use shutdown::ShutdownCoordinator;
pub use state::{RelayState, StopReason};
pub use stats::{Clock, ManualClock, StatsAggregator, StatsReport, SystemClock};
pub use ticker::Ticker;
pub use unit::Unit;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Default bounded queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 11;

/// Default stats reporting period.
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(5);
