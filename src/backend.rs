//! Kernel-body backends.
//!
//! The dispatcher depends only on [`PackedBackend`]; the guard pair and the
//! architecture gate are handled before and after a backend runs. A backend
//! appends the kernel body to the buffer and returns `Err` on failure. It is
//! never invoked for an architecture its kind's gate rejects.

use crate::arch::Architecture;
use crate::code::GeneratedCode;
use crate::descriptor::{GetrfDescriptor, PgemmDescriptor, PgemmTuning, TrmmDescriptor, TrsmDescriptor};
use crate::error::GenResult;
use crate::x86;

/// Emits the body of each packed kernel kind.
pub trait PackedBackend {
    /// Short identifier used in log lines.
    fn name(&self) -> &str;

    fn pgemm(
        &self,
        code: &mut GeneratedCode,
        desc: &PgemmDescriptor,
        arch: &Architecture,
        tuning: Option<&PgemmTuning>,
    ) -> GenResult<()>;

    fn getrf(&self, code: &mut GeneratedCode, desc: &GetrfDescriptor, arch: &Architecture) -> GenResult<()>;

    fn trsm(&self, code: &mut GeneratedCode, desc: &TrsmDescriptor, arch: &Architecture) -> GenResult<()>;

    fn trmm(&self, code: &mut GeneratedCode, desc: &TrmmDescriptor, arch: &Architecture) -> GenResult<()>;
}

impl<B: PackedBackend + ?Sized> PackedBackend for &B {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn pgemm(
        &self,
        code: &mut GeneratedCode,
        desc: &PgemmDescriptor,
        arch: &Architecture,
        tuning: Option<&PgemmTuning>,
    ) -> GenResult<()> {
        (**self).pgemm(code, desc, arch, tuning)
    }

    fn getrf(&self, code: &mut GeneratedCode, desc: &GetrfDescriptor, arch: &Architecture) -> GenResult<()> {
        (**self).getrf(code, desc, arch)
    }

    fn trsm(&self, code: &mut GeneratedCode, desc: &TrsmDescriptor, arch: &Architecture) -> GenResult<()> {
        (**self).trsm(code, desc, arch)
    }

    fn trmm(&self, code: &mut GeneratedCode, desc: &TrmmDescriptor, arch: &Architecture) -> GenResult<()> {
        (**self).trmm(code, desc, arch)
    }
}

/// Default backend: straight-line AVX / AVX2 / AVX-512 bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct X86Backend;

impl X86Backend {
    pub fn new() -> Self {
        Self
    }
}

impl PackedBackend for X86Backend {
    fn name(&self) -> &str {
        "x86"
    }

    fn pgemm(
        &self,
        code: &mut GeneratedCode,
        desc: &PgemmDescriptor,
        arch: &Architecture,
        tuning: Option<&PgemmTuning>,
    ) -> GenResult<()> {
        x86::gemm::emit(code, desc, arch, tuning).map(drop)
    }

    fn getrf(&self, code: &mut GeneratedCode, desc: &GetrfDescriptor, arch: &Architecture) -> GenResult<()> {
        x86::getrf::emit(code, desc, arch).map(drop)
    }

    fn trsm(&self, code: &mut GeneratedCode, desc: &TrsmDescriptor, arch: &Architecture) -> GenResult<()> {
        x86::triangular::emit_trsm(code, desc, arch).map(drop)
    }

    fn trmm(&self, code: &mut GeneratedCode, desc: &TrmmDescriptor, arch: &Architecture) -> GenResult<()> {
        x86::triangular::emit_trmm(code, desc, arch).map(drop)
    }
}
