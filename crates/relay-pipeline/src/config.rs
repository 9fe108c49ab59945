//! Pipeline configuration, fixed once the pipeline is built.

use std::time::Duration;

use relay_transport::PublishPolicy;

use crate::error::PipelineError;
use crate::queue::OverflowPolicy;
use crate::{PipelineResult, DEFAULT_QUEUE_CAPACITY, DEFAULT_STATS_INTERVAL};

/// What happens to queued units when shutdown fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Release queued units without publishing them.
    #[default]
    Discard,

    /// Publish queued units until the queue is empty or `timeout` passes,
    /// then discard the rest.
    Drain { timeout: Duration },
}

/// Settings for one [`Pipeline`](crate::Pipeline).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bounded queue size.
    pub queue_capacity: usize,

    /// Destination every unit is published to.
    pub subject: String,

    /// Behaviour of `enqueue` on a full queue.
    pub overflow: OverflowPolicy,

    pub shutdown: ShutdownMode,

    /// Reaction to a failed publish.
    pub publish: PublishPolicy,

    /// Stop after this many units have been published.
    pub max_units: Option<u64>,

    /// Period between stats reports.
    pub stats_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            subject: "area.0.cam.0.0".to_string(),
            overflow: OverflowPolicy::default(),
            shutdown: ShutdownMode::default(),
            publish: PublishPolicy::default(),
            max_units: None,
            stats_interval: DEFAULT_STATS_INTERVAL,
        }
    }
}

impl PipelineConfig {
    /// Default settings publishing to `subject`.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.queue_capacity == 0 {
            return Err(invalid("queue capacity must be positive"));
        }
        if self.subject.is_empty() || self.subject.chars().any(char::is_whitespace) {
            return Err(invalid(format!("invalid subject {:?}", self.subject)));
        }
        if self.stats_interval.is_zero() {
            return Err(invalid("stats interval must be positive"));
        }
        if self.max_units == Some(0) {
            return Err(invalid("unit limit must be positive"));
        }
        if let ShutdownMode::Drain { timeout } = self.shutdown {
            if timeout.is_zero() {
                return Err(invalid("drain timeout must be positive"));
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> PipelineError {
    PipelineError::InvalidConfig(message.into())
}
