//! packed-jit: architecture dispatch for JIT-generated packed linear algebra.
//!
//! Four kernel kinds share one entry shape:
//! - **PGEMM / GETRF**: addressed by numeric ISA level, admitted at or above AVX
//! - **TRSM / TRMM**: addressed by canonical name, admitted only for
//!   `skx`, `knm`, `knl`, `hsw`, `snb`
//!
//! Every successful kernel is bracketed by a CPUID guard header that traps
//! on a mismatching CPU and a footer recording the target. Faults land in a
//! single-slot error channel on the output buffer.
//!
//! # Quick Start
//!
//! ```ignore
//! use packed_jit::{pgemm_kernel, ArchLevel, GeneratedCode, PgemmDescriptor, Precision};
//!
//! let mut code = GeneratedCode::new();
//! let desc = PgemmDescriptor::new(Precision::F32, 4, 4, 4);
//! pgemm_kernel(&mut code, &desc, ArchLevel::AVX2, None)?;
//! let bytes = code.into_bytes()?;
//! ```

pub mod arch;
pub mod backend;
pub mod code;
pub mod config;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod guard;
pub mod x86;

pub use arch::{ArchLevel, Architecture};
pub use backend::{PackedBackend, X86Backend};
pub use code::GeneratedCode;
pub use config::{parse_target, ConfigError, GeneratorConfig};
pub use descriptor::{
    Alpha, Beta, Diag, GetrfDescriptor, KernelKind, Layout, PgemmDescriptor, PgemmTuning, Precision, Side,
    TriangularDescriptor, TrmmDescriptor, TrsmDescriptor, Uplo,
};
pub use dispatch::{getrf_kernel, pgemm_kernel, trmm_kernel, trsm_kernel, Dispatcher, KernelRequest};
pub use error::{GenError, GenResult};
pub use gate::{ArchGate, PACKED_FLOOR, TRIANGULAR_ARCHES};
pub use guard::{emit_guard_footer, emit_guard_header, GuardRecord};
