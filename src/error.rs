use iced_x86::IcedError;
use thiserror::Error;

use crate::descriptor::KernelKind;

/// Faults recorded in a [`GeneratedCode`](crate::code::GeneratedCode) error slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenError {
    /// The resolved architecture is outside the allow-set of the kernel kind.
    #[error("{kind} kernels are not supported on architecture `{arch}`")]
    ArchitectureUnsupported { kind: KernelKind, arch: String },
    /// Raised by a backend while emitting the kernel body.
    #[error("{kind} backend failed: {reason}")]
    BackendFailure { kind: KernelKind, reason: String },
    #[error("instruction encoding failed: {0}")]
    Encode(String),
    #[error("code buffer too small: {needed} bytes needed, limit is {limit}")]
    BufferTooSmall { needed: usize, limit: usize },
}

pub type GenResult<T> = Result<T, GenError>;

impl GenError {
    pub fn backend(kind: KernelKind, reason: impl Into<String>) -> Self {
        GenError::BackendFailure {
            kind,
            reason: reason.into(),
        }
    }

    /// Whether this fault came from the architecture gate.
    pub fn is_arch_mismatch(&self) -> bool {
        matches!(self, GenError::ArchitectureUnsupported { .. })
    }
}

impl From<IcedError> for GenError {
    fn from(err: IcedError) -> Self {
        GenError::Encode(err.to_string())
    }
}
