//! Packed GEMM: `C = alpha op(A) op(B) + beta C`, fully unrolled.
//!
//! C is processed in `i_unroll x j_unroll` register blocks. Per block the
//! accumulators stay resident while k is walked; each step loads one A
//! column slice into `i_unroll` registers and streams B through a single
//! broadcast-free register (every element already is a vector).

use crate::arch::Architecture;
use crate::code::GeneratedCode;
use crate::descriptor::{Alpha, Beta, KernelKind, PgemmDescriptor, PgemmTuning};
use crate::error::{GenError, GenResult};

use super::simd::{KernelAsm, VReg, VecUnit, ARG0, ARG1, ARG2};

const DEFAULT_I_UNROLL: usize = 4;

fn registers_needed(unit: &VecUnit, i_unroll: usize, j_unroll: usize) -> Option<usize> {
    i_unroll
        .checked_mul(j_unroll)?
        .checked_add(i_unroll)?
        .checked_add(1 + unit.scratch_regs() as usize)
}

/// Blocking chosen when the caller gives no hints.
pub fn default_tuning(desc: &PgemmDescriptor, unit: &VecUnit) -> PgemmTuning {
    let regs = unit.num_regs() as usize;
    let i_unroll = desc.m.clamp(1, DEFAULT_I_UNROLL);
    let room = regs.saturating_sub(i_unroll + 1 + unit.scratch_regs() as usize) / i_unroll;
    let j_unroll = desc.n.min(room).max(1);
    PgemmTuning {
        i_unroll,
        j_unroll,
        i_loop: desc.m.div_ceil(i_unroll),
        j_loop: desc.n.div_ceil(j_unroll),
    }
}

/// Check caller-supplied blocking against the problem and register file.
pub fn check_tuning(desc: &PgemmDescriptor, unit: &VecUnit, t: &PgemmTuning) -> GenResult<()> {
    let fail = |reason: String| Err(GenError::backend(KernelKind::Pgemm, reason));
    if t.i_unroll == 0 || t.j_unroll == 0 || t.i_loop == 0 || t.j_loop == 0 {
        return fail(format!("tuning {t:?} has a zero factor"));
    }
    let available = unit.num_regs() as usize;
    match registers_needed(unit, t.i_unroll, t.j_unroll) {
        Some(needed) if needed <= available => {}
        needed => {
            let needed = needed.map_or_else(|| "more than usize::MAX".to_string(), |n| n.to_string());
            return fail(format!(
                "{}x{} block needs {needed} vector registers, {available} available",
                t.i_unroll, t.j_unroll
            ));
        }
    }
    if t.i_unroll.saturating_mul(t.i_loop) < desc.m || t.j_unroll.saturating_mul(t.j_loop) < desc.n {
        return fail(format!("tuning {t:?} does not cover {}x{}", desc.m, desc.n));
    }
    Ok(())
}

pub fn emit(
    code: &mut GeneratedCode,
    desc: &PgemmDescriptor,
    arch: &Architecture,
    tuning: Option<&PgemmTuning>,
) -> GenResult<usize> {
    desc.validate()?;
    let mut k = KernelAsm::new(KernelKind::Pgemm, arch, desc.precision)?;
    let unit = k.unit();
    let t = match tuning {
        Some(t) => {
            check_tuning(desc, &unit, t)?;
            *t
        }
        None => default_tuning(desc, &unit),
    };
    log::debug!(
        "pgemm {}x{}x{} on {arch}: block {}x{} loops {}x{}",
        desc.m, desc.n, desc.k, t.i_unroll, t.j_unroll, t.i_loop, t.j_loop
    );

    let acc = |ii: usize, jj: usize| VReg((ii * t.j_unroll + jj) as u8);
    let a_reg = |ii: usize| VReg((t.i_unroll * t.j_unroll + ii) as u8);
    let b_reg = VReg((t.i_unroll * t.j_unroll + t.i_unroll) as u8);

    let a_at = |i: usize, p: usize| {
        if desc.trans_a { desc.layout.index(p, i, desc.lda) } else { desc.layout.index(i, p, desc.lda) }
    };
    let b_at = |p: usize, j: usize| {
        if desc.trans_b { desc.layout.index(j, p, desc.ldb) } else { desc.layout.index(p, j, desc.ldb) }
    };
    let c_at = |i: usize, j: usize| desc.layout.index(i, j, desc.ldc);

    for ib in 0..t.i_loop {
        let i0 = ib * t.i_unroll;
        if i0 >= desc.m {
            break;
        }
        let rows = t.i_unroll.min(desc.m - i0);
        for jb in 0..t.j_loop {
            let j0 = jb * t.j_unroll;
            if j0 >= desc.n {
                break;
            }
            let cols = t.j_unroll.min(desc.n - j0);

            for ii in 0..rows {
                for jj in 0..cols {
                    match desc.beta {
                        Beta::Zero => k.vzero(acc(ii, jj))?,
                        Beta::One => k.vload(acc(ii, jj), ARG2, c_at(i0 + ii, j0 + jj))?,
                    }
                }
            }

            for p in 0..desc.k {
                for ii in 0..rows {
                    k.vload(a_reg(ii), ARG0, a_at(i0 + ii, p))?;
                }
                for jj in 0..cols {
                    k.vload(b_reg, ARG1, b_at(p, j0 + jj))?;
                    for ii in 0..rows {
                        match desc.alpha {
                            Alpha::One => k.vfma(acc(ii, jj), a_reg(ii), b_reg)?,
                            Alpha::MinusOne => k.vfnma(acc(ii, jj), a_reg(ii), b_reg)?,
                        }
                    }
                }
            }

            for ii in 0..rows {
                for jj in 0..cols {
                    k.vstore(ARG2, c_at(i0 + ii, j0 + jj), acc(ii, jj))?;
                }
            }
        }
    }

    k.finish(code)
}
