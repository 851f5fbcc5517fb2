//! Dispatcher entry points.
//!
//! All four kinds run the same sequence:
//!
//! ```text
//! START -> header -> gate --pass--> body -> footer -> DONE
//!                        \--fail--> raise ArchitectureUnsupported -> DONE
//! ```
//!
//! Any fault is raised once on the buffer and returned; nothing is appended
//! after it. A rejected call leaves exactly the guard header behind.
//!
//! The error slot is cleared at START, so after each call it reports that
//! call alone. A backend may fail either by returning `Err` or by raising
//! on the buffer; both end the call before the footer.

use crate::arch::{ArchLevel, Architecture};
use crate::backend::{PackedBackend, X86Backend};
use crate::code::GeneratedCode;
use crate::descriptor::{GetrfDescriptor, KernelKind, PgemmDescriptor, PgemmTuning, TrmmDescriptor, TrsmDescriptor};
use crate::error::{GenError, GenResult};
use crate::guard::{emit_guard_footer, emit_guard_header};

/// One kernel to generate, borrowed from the caller.
#[derive(Debug, Clone, Copy)]
pub enum KernelRequest<'a> {
    Pgemm {
        desc: &'a PgemmDescriptor,
        tuning: Option<&'a PgemmTuning>,
    },
    Getrf(&'a GetrfDescriptor),
    Trsm(&'a TrsmDescriptor),
    Trmm(&'a TrmmDescriptor),
}

impl KernelRequest<'_> {
    pub fn kind(&self) -> KernelKind {
        match self {
            Self::Pgemm { .. } => KernelKind::Pgemm,
            Self::Getrf(_) => KernelKind::Getrf,
            Self::Trsm(_) => KernelKind::Trsm,
            Self::Trmm(_) => KernelKind::Trmm,
        }
    }
}

fn fail(code: &mut GeneratedCode, err: GenError) -> GenResult<()> {
    code.raise(err.clone());
    Err(err)
}

/// The shared state machine. `body` runs only when the gate admits `arch`.
fn generate<F>(code: &mut GeneratedCode, kind: KernelKind, arch: &Architecture, body: F) -> GenResult<()>
where
    F: FnOnce(&mut GeneratedCode, &Architecture) -> GenResult<()>,
{
    let start = code.len();
    if let Some(stale) = code.take_error() {
        log::debug!("{kind}: clearing fault from an earlier call: {stale}");
    }

    if let Err(err) = emit_guard_header(code, arch) {
        log::warn!("{kind}: guard header for `{arch}` failed: {err}");
        return fail(code, err);
    }

    if !kind.gate().admits(arch) {
        log::warn!("{kind}: architecture `{arch}` (level {}) rejected", arch.level());
        let err = GenError::ArchitectureUnsupported {
            kind,
            arch: arch.name().to_string(),
        };
        return fail(code, err);
    }

    let body_start = code.len();
    let outcome = body(code, arch).and_then(|()| match code.take_error() {
        Some(raised) => Err(raised),
        None => Ok(()),
    });
    if let Err(err) = outcome {
        log::warn!("{kind}: backend failed for `{arch}`: {err}");
        return fail(code, err);
    }
    let body_len = code.len() - body_start;

    if let Err(err) = emit_guard_footer(code, arch) {
        return fail(code, err);
    }

    log::debug!(
        "{kind} for `{arch}`: {} bytes ({body_len} body)",
        code.len() - start
    );
    Ok(())
}

/// Routes requests through the gate and guards into a backend.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher<B = X86Backend> {
    backend: B,
}

impl<B: PackedBackend> Dispatcher<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Generate `request` for an already-unified architecture.
    pub fn dispatch(&self, code: &mut GeneratedCode, request: KernelRequest<'_>, arch: &Architecture) -> GenResult<()> {
        let kind = request.kind();
        log::trace!("{kind} via backend `{}`", self.backend.name());
        generate(code, kind, arch, |code, arch| match request {
            KernelRequest::Pgemm { desc, tuning } => self.backend.pgemm(code, desc, arch, tuning),
            KernelRequest::Getrf(desc) => self.backend.getrf(code, desc, arch),
            KernelRequest::Trsm(desc) => self.backend.trsm(code, desc, arch),
            KernelRequest::Trmm(desc) => self.backend.trmm(code, desc, arch),
        })
    }

    /// Packed GEMM for a numeric ISA level. `tuning` is forwarded untouched.
    pub fn pgemm(
        &self,
        code: &mut GeneratedCode,
        desc: &PgemmDescriptor,
        level: ArchLevel,
        tuning: Option<&PgemmTuning>,
    ) -> GenResult<()> {
        self.dispatch(code, KernelRequest::Pgemm { desc, tuning }, &level.resolve())
    }

    pub fn getrf(&self, code: &mut GeneratedCode, desc: &GetrfDescriptor, level: ArchLevel) -> GenResult<()> {
        self.dispatch(code, KernelRequest::Getrf(desc), &level.resolve())
    }

    /// Packed TRSM for a canonical architecture name.
    pub fn trsm(&self, code: &mut GeneratedCode, desc: &TrsmDescriptor, arch: &str) -> GenResult<()> {
        self.dispatch(code, KernelRequest::Trsm(desc), &Architecture::from_name(arch))
    }

    pub fn trmm(&self, code: &mut GeneratedCode, desc: &TrmmDescriptor, arch: &str) -> GenResult<()> {
        self.dispatch(code, KernelRequest::Trmm(desc), &Architecture::from_name(arch))
    }
}

// ── Free entry points on the default backend ─────────────────────────

pub fn pgemm_kernel(
    code: &mut GeneratedCode,
    desc: &PgemmDescriptor,
    level: ArchLevel,
    tuning: Option<&PgemmTuning>,
) -> GenResult<()> {
    Dispatcher::new(X86Backend).pgemm(code, desc, level, tuning)
}

pub fn getrf_kernel(code: &mut GeneratedCode, desc: &GetrfDescriptor, level: ArchLevel) -> GenResult<()> {
    Dispatcher::new(X86Backend).getrf(code, desc, level)
}

pub fn trsm_kernel(code: &mut GeneratedCode, desc: &TrsmDescriptor, arch: &str) -> GenResult<()> {
    Dispatcher::new(X86Backend).trsm(code, desc, arch)
}

pub fn trmm_kernel(code: &mut GeneratedCode, desc: &TrmmDescriptor, arch: &str) -> GenResult<()> {
    Dispatcher::new(X86Backend).trmm(code, desc, arch)
}
