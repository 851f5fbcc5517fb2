//! Packed TRSM and TRMM.
//!
//! Both kernels work on "lines" of B: rows for [`Side::Left`], columns for
//! [`Side::Right`]. Line `t` depends on the lines `p` for which the
//! coefficient `coef(t, p)` of `op(A)` is inside the triangle. The sweep
//! order is chosen so every line is overwritten only after all lines that
//! still need its old value are done.

use crate::arch::Architecture;
use crate::code::GeneratedCode;
use crate::descriptor::{Diag, KernelKind, Side, TriangularDescriptor};
use crate::error::GenResult;

use super::simd::{KernelAsm, VReg, ARG0, ARG1};

const X: VReg = VReg(0);
const COEF: VReg = VReg(1);
const OTHER: VReg = VReg(2);
const ALPHA: VReg = VReg(3);

struct Lines<'a> {
    desc: &'a TriangularDescriptor,
}

impl Lines<'_> {
    /// Number of lines, equal to the order of A.
    fn count(&self) -> usize {
        self.desc.a_order()
    }

    /// Length of each line.
    fn len(&self) -> usize {
        match self.desc.side {
            Side::Left => self.desc.n,
            Side::Right => self.desc.m,
        }
    }

    /// Whether line dependencies point to lower line indices.
    fn forward(&self) -> bool {
        (self.desc.side == Side::Left) == self.desc.op_a_is_lower()
    }

    /// Index into A of `op(A)[r, c]`.
    fn op_a(&self, r: usize, c: usize) -> usize {
        let d = self.desc;
        if d.trans_a { d.layout.index(c, r, d.lda) } else { d.layout.index(r, c, d.lda) }
    }

    /// Index into A of the weight of line `p` in line `t`.
    fn coef(&self, t: usize, p: usize) -> usize {
        match self.desc.side {
            Side::Left => self.op_a(t, p),
            Side::Right => self.op_a(p, t),
        }
    }

    /// Index into B of position `q` on line `t`.
    fn b(&self, t: usize, q: usize) -> usize {
        let d = self.desc;
        match d.side {
            Side::Left => d.layout.index(t, q, d.ldb),
            Side::Right => d.layout.index(q, t, d.ldb),
        }
    }

    /// Off-diagonal lines `t` depends on.
    fn deps(&self, t: usize) -> std::ops::Range<usize> {
        if self.forward() { 0..t } else { t + 1..self.count() }
    }
}

fn ascending_or_descending(n: usize, ascending: bool) -> Box<dyn Iterator<Item = usize>> {
    if ascending { Box::new(0..n) } else { Box::new((0..n).rev()) }
}

fn load_alpha(k: &mut KernelAsm, alpha: f64) -> GenResult<bool> {
    if alpha == 1.0 {
        return Ok(false);
    }
    k.vbroadcast_const(ALPHA, alpha)?;
    Ok(true)
}

/// Solve in place: forward lines ascending, backward lines descending.
pub fn emit_trsm(code: &mut GeneratedCode, desc: &TriangularDescriptor, arch: &Architecture) -> GenResult<usize> {
    desc.validate(KernelKind::Trsm)?;
    let mut k = KernelAsm::new(KernelKind::Trsm, arch, desc.precision)?;
    let lines = Lines { desc };
    log::debug!(
        "trsm {:?}/{:?} trans={} {}x{} on {arch}",
        desc.side, desc.uplo, desc.trans_a, desc.m, desc.n
    );
    let scaled = load_alpha(&mut k, desc.alpha)?;

    for t in ascending_or_descending(lines.count(), lines.forward()) {
        for q in 0..lines.len() {
            k.vload(X, ARG1, lines.b(t, q))?;
            if scaled {
                k.vmul(X, X, ALPHA)?;
            }
            for p in lines.deps(t) {
                k.vload(COEF, ARG0, lines.coef(t, p))?;
                k.vload(OTHER, ARG1, lines.b(p, q))?;
                k.vfnma(X, COEF, OTHER)?;
            }
            if desc.diag == Diag::NonUnit {
                k.vload(COEF, ARG0, lines.coef(t, t))?;
                k.vdiv(X, X, COEF)?;
            }
            k.vstore(ARG1, lines.b(t, q), X)?;
        }
    }

    k.finish(code)
}

/// Multiply in place: the sweep runs opposite to the dependency direction.
pub fn emit_trmm(code: &mut GeneratedCode, desc: &TriangularDescriptor, arch: &Architecture) -> GenResult<usize> {
    desc.validate(KernelKind::Trmm)?;
    let mut k = KernelAsm::new(KernelKind::Trmm, arch, desc.precision)?;
    let lines = Lines { desc };
    log::debug!(
        "trmm {:?}/{:?} trans={} {}x{} on {arch}",
        desc.side, desc.uplo, desc.trans_a, desc.m, desc.n
    );
    let scaled = load_alpha(&mut k, desc.alpha)?;

    for t in ascending_or_descending(lines.count(), !lines.forward()) {
        for q in 0..lines.len() {
            k.vload(X, ARG1, lines.b(t, q))?;
            if desc.diag == Diag::NonUnit {
                k.vload(COEF, ARG0, lines.coef(t, t))?;
                k.vmul(X, X, COEF)?;
            }
            for p in lines.deps(t) {
                k.vload(COEF, ARG0, lines.coef(t, p))?;
                k.vload(OTHER, ARG1, lines.b(p, q))?;
                k.vfma(X, COEF, OTHER)?;
            }
            if scaled {
                k.vmul(X, X, ALPHA)?;
            }
            k.vstore(ARG1, lines.b(t, q), X)?;
        }
    }

    k.finish(code)
}
