//! x86-64 kernel bodies via iced-x86 `CodeAssembler`.
//!
//! Every generator emits straight-line code: loops over the (small) packed
//! dimensions are unrolled at generation time. Pointer arguments follow the
//! System V order:
//!
//! | kernel | rdi | rsi | rdx |
//! |--------|-----|-----|-----|
//! | PGEMM  | A   | B   | C (in/out) |
//! | GETRF  | A (in/out) | | |
//! | TRSM / TRMM | A | B (in/out) | |

pub mod gemm;
pub mod getrf;
pub mod simd;
pub mod triangular;

#[cfg(test)]
pub(crate) mod sim;

pub use simd::{KernelAsm, VReg, VecUnit};
