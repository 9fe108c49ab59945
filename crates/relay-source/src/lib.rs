//! RTSP/H.264 streaming source.
//!
//! This crate plays the H.264 track of an RTSP presentation through `retina`
//! and hands every NAL unit to a [`NalSink`].

mod error;
mod nal;
mod rtsp;

pub use error::SourceError;
pub use nal::{NalUnit, NalUnitType};
pub use rtsp::{RtspConfig, RtspSource};

/// Result type for source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Receives NAL units from a source, one call per unit.
pub trait NalSink {
    /// Accept one NAL unit. Returning `false` stops the source.
    fn push(&mut self, nal: NalUnit) -> bool;
}

impl<F> NalSink for F
where
    F: FnMut(NalUnit) -> bool,
{
    fn push(&mut self, nal: NalUnit) -> bool {
        self(nal)
    }
}

/// A source of NAL units.
pub trait UnitSource: Send {
    /// Run until the stream ends, an error occurs or the sink refuses a unit.
    ///
    /// A stream that ends on its own is reported as
    /// [`SourceError::StreamEnded`]; only a sink refusal returns `Ok`.
    fn run(&mut self, sink: &mut dyn NalSink) -> SourceResult<()>;
}
