//! Error types for the pipeline.

use relay_transport::TransportError;
use thiserror::Error;

/// Errors raised by the relay core.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration rejected before the pipeline was built.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The pipeline no longer accepts units.
    #[error("Pipeline is shut down")]
    Closed,

    /// Publishing a unit failed for good.
    #[error("Publish of unit {id} failed after {attempts} attempt(s): {source}")]
    Publish {
        id: u64,
        attempts: u32,
        #[source]
        source: TransportError,
    },
}

impl PipelineError {
    /// Whether this error ended the relay loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Publish { .. })
    }
}
