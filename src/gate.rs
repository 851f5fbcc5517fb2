//! Per-kind architecture admission policy.
//!
//! Two policies coexist. PGEMM and GETRF use a floor: any level at or above
//! [`PACKED_FLOOR`] is admitted, with no upper bound. TRSM and TRMM admit
//! only the fixed name set [`TRIANGULAR_ARCHES`]; that set does not grow
//! when newer architectures are added.

use crate::arch::{ArchLevel, Architecture};
use crate::descriptor::KernelKind;

/// Minimum level for the floor-gated kinds.
pub const PACKED_FLOOR: ArchLevel = ArchLevel::AVX;

/// Canonical names admitted by the membership-gated kinds.
pub const TRIANGULAR_ARCHES: [&str; 5] = ["skx", "knm", "knl", "hsw", "snb"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchGate {
    /// Admit every level `>=` the floor.
    Floor(ArchLevel),
    /// Admit exactly the listed canonical names.
    Members(&'static [&'static str]),
}

impl ArchGate {
    pub fn admits(&self, arch: &Architecture) -> bool {
        match self {
            Self::Floor(min) => arch.level() >= *min,
            Self::Members(names) => names.iter().any(|name| *name == arch.name()),
        }
    }
}

impl KernelKind {
    /// Admission policy for this kind.
    pub fn gate(self) -> ArchGate {
        match self {
            KernelKind::Pgemm | KernelKind::Getrf => ArchGate::Floor(PACKED_FLOOR),
            KernelKind::Trsm | KernelKind::Trmm => ArchGate::Members(&TRIANGULAR_ARCHES),
        }
    }
}
