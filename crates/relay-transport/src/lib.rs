//! Message bus publishing.
//!
//! This crate provides the [`Publisher`] seam used by the relay loop and a
//! NATS implementation of it.

mod connection;
mod error;
mod nats;

pub use connection::{ConnectionState, PublishPolicy, RetryPolicy};
pub use error::TransportError;
pub use nats::{NatsOptions, NatsPublisher, ServerInfo};

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Default NATS client port.
pub const DEFAULT_NATS_PORT: u16 = 4222;

/// Default maximum publish attempts when retrying.
pub const MAX_PUBLISH_ATTEMPTS: u32 = 3;

/// Base retry delay in milliseconds.
pub const BASE_RETRY_DELAY_MS: u64 = 200;

/// Delivers one opaque payload to a named destination.
///
/// Implementations make a single best-effort attempt per call; retrying is
/// the caller's decision (see [`PublishPolicy`]).
pub trait Publisher: Send {
    /// Publish `payload` to `subject` as one message.
    fn publish(&mut self, subject: &str, payload: &[u8]) -> TransportResult<()>;

    /// Wait until everything published so far has been handed to the bus.
    fn flush(&mut self) -> TransportResult<()> {
        Ok(())
    }
}

impl<P: Publisher + ?Sized> Publisher for Box<P> {
    fn publish(&mut self, subject: &str, payload: &[u8]) -> TransportResult<()> {
        (**self).publish(subject, payload)
    }

    fn flush(&mut self) -> TransportResult<()> {
        (**self).flush()
    }
}
