//! The relay loop and the pipeline instance that wires it up.

use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::select;
use relay_transport::Publisher;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{PipelineConfig, ShutdownMode};
use crate::error::PipelineError;
use crate::queue::{unit_queue, UnitReceiver, UnitSender};
use crate::shutdown::ShutdownCoordinator;
use crate::state::{RelayState, StopReason};
use crate::stats::{Clock, StatsAggregator};
use crate::ticker::Ticker;
use crate::unit::Unit;
use crate::PipelineResult;

/// How the relay loop ended, short of a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayExit {
    /// The shutdown coordinator fired.
    Shutdown {
        reason: StopReason,
        /// Queued units published during the drain phase.
        drained: usize,
        /// Queued units released without publishing.
        discarded: usize,
    },

    /// Every ingestion handle was dropped and the queue ran empty.
    SourceClosed,
}

/// A queue, a shutdown coordinator and the settings for the loop that
/// consumes them.
pub struct Pipeline {
    config: PipelineConfig,
    sender: UnitSender,
    receiver: UnitReceiver,
    shutdown: ShutdownCoordinator,
}

impl Pipeline {
    /// Validate `config` and build the queue.
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        let (sender, receiver) = unit_queue(config.queue_capacity, config.overflow)?;

        info!(
            capacity = config.queue_capacity,
            overflow = %config.overflow,
            "Queue capacity: {}",
            config.queue_capacity
        );

        Ok(Self {
            config,
            sender,
            receiver,
            shutdown: ShutdownCoordinator::new(),
        })
    }

    /// A handle for producers.
    pub fn ingest(&self) -> UnitSender {
        self.sender.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownCoordinator {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Build the relay loop, keeping the ticker and clock configurable.
    pub fn relay<P: Publisher>(self, publisher: P) -> RelayLoop<P> {
        let Pipeline {
            config,
            sender,
            receiver,
            shutdown,
        } = self;
        // Only handles given out through `ingest` keep the queue open.
        drop(sender);
        RelayLoop::new(receiver, publisher, shutdown, config)
    }

    /// Run the relay loop on the calling thread until it ends.
    pub fn run<P: Publisher>(self, publisher: P) -> PipelineResult<RelayExit> {
        self.relay(publisher).run()
    }
}

/// The single consumer: publishes units in order, reports stats on every
/// tick and stops when shutdown fires.
pub struct RelayLoop<P: Publisher> {
    receiver: UnitReceiver,
    publisher: P,
    shutdown: ShutdownCoordinator,
    config: PipelineConfig,
    ticker: Ticker,
    stats: StatsAggregator,
    state: RelayState,
    published: u64,
    reported_drops: u64,
}

impl<P: Publisher> RelayLoop<P> {
    pub fn new(
        receiver: UnitReceiver,
        publisher: P,
        shutdown: ShutdownCoordinator,
        config: PipelineConfig,
    ) -> Self {
        Self {
            receiver,
            publisher,
            shutdown,
            ticker: Ticker::new(config.stats_interval),
            config,
            stats: StatsAggregator::new(),
            state: RelayState::Running,
            published: 0,
            reported_drops: 0,
        }
    }

    pub fn with_ticker(mut self, ticker: Ticker) -> Self {
        self.ticker = ticker;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.stats = StatsAggregator::with_clock(clock);
        self
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    pub fn state(&self) -> &RelayState {
        &self.state
    }

    /// Units published so far.
    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Run until shutdown, until every producer is gone, or until a publish
    /// fails for good.
    #[instrument(name = "relay_loop", skip(self), fields(subject = %self.config.subject))]
    pub fn run(&mut self) -> PipelineResult<RelayExit> {
        if self.state.is_terminated() {
            return Err(PipelineError::Closed);
        }

        info!("Relay loop starting");

        let units = self.receiver.channel().clone();
        let mut ticks = self.ticker.receiver().clone();
        let stop = self.shutdown.receiver().clone();

        loop {
            if self.shutdown.is_triggered() {
                let reason = self.shutdown.reason().unwrap_or(StopReason::Requested);
                return self.terminate(reason);
            }

            select! {
                recv(units) -> msg => match msg {
                    Ok(unit) => self.handle_unit(unit)?,
                    Err(_) => {
                        info!(published = self.published, "All producers gone, stopping relay");
                        self.transition_to(RelayState::Terminated { reason: None });
                        return Ok(RelayExit::SourceClosed);
                    }
                },
                recv(ticks) -> tick => match tick {
                    Ok(_) => self.handle_tick(),
                    Err(_) => {
                        debug!("Ticker gone, stats reporting stopped");
                        ticks = crossbeam_channel::never();
                    }
                },
                recv(stop) -> msg => {
                    let reason = msg.unwrap_or(StopReason::Requested);
                    return self.terminate(reason);
                }
            }
        }
    }

    fn handle_unit(&mut self, unit: Unit) -> PipelineResult<()> {
        self.publish(&unit)?;
        self.stats.record(&unit);
        self.published += 1;

        if let Some(limit) = self.config.max_units {
            if self.published >= limit && self.shutdown.trigger(StopReason::UnitLimit) {
                info!(limit, "Unit limit reached");
            }
        }

        Ok(())
    }

    /// Publish one unit, retrying as the publish policy allows.
    fn publish(&mut self, unit: &Unit) -> PipelineResult<()> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match self.publisher.publish(&self.config.subject, unit.payload()) {
                Ok(()) => {
                    if attempt > 1 {
                        info!(id = unit.id(), attempt, "Publish succeeded after retry");
                    }
                    return Ok(());
                }
                Err(e) => e,
            };

            match self.config.publish.next_delay(attempt) {
                Some(delay) => {
                    warn!(
                        id = unit.id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Publish failed, retrying: {}",
                        err
                    );
                    thread::sleep(delay);
                }
                None => {
                    error!(id = unit.id(), attempt, "Publish failed: {}", err);
                    self.transition_to(RelayState::Terminated { reason: None });
                    return Err(PipelineError::Publish {
                        id: unit.id(),
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }

    fn handle_tick(&mut self) {
        self.stats.report();
        self.stats.reset();

        let dropped = self.receiver.dropped();
        if dropped > self.reported_drops {
            warn!(
                dropped = dropped - self.reported_drops,
                total = dropped,
                "Units dropped on full queue"
            );
            self.reported_drops = dropped;
        }
    }

    fn terminate(&mut self, reason: StopReason) -> PipelineResult<RelayExit> {
        info!(reason = reason.message(), published = self.published, "Terminating");
        self.receiver.close();

        let (drained, discarded) = match self.config.shutdown {
            ShutdownMode::Discard => (0, self.receiver.discard_all()),
            ShutdownMode::Drain { timeout } => self.drain(timeout)?,
        };

        if discarded > 0 {
            info!(discarded, "Discarded queued units");
        }

        self.transition_to(RelayState::Terminated {
            reason: Some(reason),
        });

        Ok(RelayExit::Shutdown {
            reason,
            drained,
            discarded,
        })
    }

    /// Publish what is queued until empty or `timeout` passes.
    fn drain(&mut self, timeout: Duration) -> PipelineResult<(usize, usize)> {
        let deadline = Instant::now() + timeout;
        let mut drained = 0;

        while Instant::now() < deadline {
            let Some(unit) = self.receiver.try_dequeue() else {
                break;
            };
            self.publish(&unit)?;
            self.stats.record(&unit);
            self.published += 1;
            drained += 1;
        }

        if let Err(e) = self.publisher.flush() {
            warn!("Flush after drain failed: {}", e);
        }

        let discarded = self.receiver.discard_all();
        info!(drained, discarded, "Drain finished");
        Ok((drained, discarded))
    }

    fn transition_to(&mut self, new_state: RelayState) {
        let previous = std::mem::replace(&mut self.state, new_state);
        debug!(
            previous = %previous.name(),
            current = %self.state.name(),
            "State transition"
        );
    }
}
