//! Append-only output buffer shared by the guard emitter and the backends.

use crate::error::{GenError, GenResult};

/// Generated machine code plus a single-slot error channel.
///
/// Bytes can only be appended. A fault raised through [`raise`](Self::raise)
/// replaces any earlier one (last wins); callers must check
/// [`last_error`](Self::last_error) before treating the buffer as runnable.
#[derive(Debug, Default, Clone)]
pub struct GeneratedCode {
    bytes: Vec<u8>,
    limit: Option<usize>,
    last_error: Option<GenError>,
}

impl GeneratedCode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer that refuses to grow beyond `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(limit.min(1 << 16)),
            limit: Some(limit),
            last_error: None,
        }
    }

    /// Append `data`. On overflow nothing is appended.
    pub fn append(&mut self, data: &[u8]) -> GenResult<()> {
        let needed = self.bytes.len() + data.len();
        if let Some(limit) = self.limit {
            if needed > limit {
                return Err(GenError::BufferTooSmall { needed, limit });
            }
        }
        self.bytes.extend_from_slice(data);
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Record a fault. Does not unwind.
    pub fn raise(&mut self, err: GenError) {
        if let Some(prev) = self.last_error.replace(err) {
            log::debug!("fault replaced: {prev}");
        }
    }

    pub fn last_error(&self) -> Option<&GenError> {
        self.last_error.as_ref()
    }

    /// Clear and return the recorded fault.
    pub fn take_error(&mut self) -> Option<GenError> {
        self.last_error.take()
    }

    /// True when bytes were produced and no fault is outstanding.
    pub fn is_runnable(&self) -> bool {
        self.last_error.is_none() && !self.bytes.is_empty()
    }

    /// Consume the buffer. Fails if a fault is outstanding.
    pub fn into_bytes(self) -> GenResult<Vec<u8>> {
        match self.last_error {
            Some(err) => Err(err),
            None => Ok(self.bytes),
        }
    }
}
