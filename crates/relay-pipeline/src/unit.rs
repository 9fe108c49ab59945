//! The unit of work moving through the pipeline.

use bytes::Bytes;

/// One opaque payload and the sequence id it was given at enqueue time.
///
/// The payload is never modified after construction, so `size()` always
/// equals the payload length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    id: u64,
    payload: Bytes,
}

impl Unit {
    pub fn new(id: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Payload length in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Release ownership of the payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_matches_payload() {
        let unit = Unit::new(3, vec![0u8; 42]);
        assert_eq!(unit.id(), 3);
        assert_eq!(unit.size(), 42);
        assert_eq!(unit.size(), unit.payload().len());

        let empty = Unit::new(4, Bytes::new());
        assert_eq!(empty.size(), 0);
    }
}
