//! Packed GETRF: in-place right-looking LU without pivoting.
//!
//! After the kernel runs, the strict lower part of A holds L (unit diagonal
//! implied) and the upper part holds U. No pivot is checked for zero; a
//! zero pivot yields inf/NaN in the affected lanes only.

use crate::arch::Architecture;
use crate::code::GeneratedCode;
use crate::descriptor::{GetrfDescriptor, KernelKind};
use crate::error::GenResult;

use super::simd::{KernelAsm, VReg, ARG0};

const PIVOT: VReg = VReg(0);
const L: VReg = VReg(1);
const U: VReg = VReg(2);
const X: VReg = VReg(3);

pub fn emit(code: &mut GeneratedCode, desc: &GetrfDescriptor, arch: &Architecture) -> GenResult<usize> {
    desc.validate()?;
    let mut k = KernelAsm::new(KernelKind::Getrf, arch, desc.precision)?;
    let at = |i: usize, j: usize| desc.layout.index(i, j, desc.lda);
    let steps = desc.m.min(desc.n);
    log::debug!("getrf {}x{} on {arch}: {steps} elimination steps", desc.m, desc.n);

    for kk in 0..steps {
        if kk + 1 >= desc.m {
            break;
        }
        k.vload(PIVOT, ARG0, at(kk, kk))?;
        for i in kk + 1..desc.m {
            k.vload(L, ARG0, at(i, kk))?;
            k.vdiv(L, L, PIVOT)?;
            k.vstore(ARG0, at(i, kk), L)?;
        }
        for j in kk + 1..desc.n {
            k.vload(U, ARG0, at(kk, j))?;
            for i in kk + 1..desc.m {
                k.vload(L, ARG0, at(i, kk))?;
                k.vload(X, ARG0, at(i, j))?;
                k.vfnma(X, L, U)?;
                k.vstore(ARG0, at(i, j), X)?;
            }
        }
    }

    k.finish(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Layout, Precision};
    use crate::x86::sim::{self, Matrix};

    /// Diagonally dominant so unpivoted elimination is stable.
    fn dominant(layout: Layout, m: usize, n: usize, ld: usize) -> Matrix {
        let mut a = Matrix::seeded(layout, m, n, ld, 5);
        for d in 0..m.min(n) {
            a.set(d, d, a.get(d, d) + 4.0 * n as f64);
        }
        a
    }

    fn reference(a: &Matrix) -> Matrix {
        let mut lu = a.clone();
        for kk in 0..a.rows.min(a.cols) {
            for i in kk + 1..a.rows {
                let l = lu.get(i, kk) / lu.get(kk, kk);
                lu.set(i, kk, l);
                for j in kk + 1..a.cols {
                    lu.set(i, j, lu.get(i, j) - l * lu.get(kk, j));
                }
            }
        }
        lu
    }

    fn run(desc: &GetrfDescriptor, arch: &str) {
        let a = dominant(desc.layout, desc.m, desc.n, desc.lda);
        let arch = Architecture::from_name(arch);
        let mut code = GeneratedCode::new();
        emit(&mut code, desc, &arch).unwrap();

        let mut mem = sim::Memory::new(&arch, desc.precision);
        mem.bind(0, a.data.clone());
        sim::run(code.as_bytes(), 0, &mut mem).unwrap();
        sim::assert_close(mem.buffer(0), &reference(&a).data, 1e-9);
    }

    #[test]
    fn test_square() {
        let desc = GetrfDescriptor::new(Precision::F64, 4, 4);
        run(&desc, "snb");
        run(&desc, "skx");
    }

    #[test]
    fn test_tall_and_wide() {
        run(&GetrfDescriptor::new(Precision::F32, 5, 3), "hsw");
        run(&GetrfDescriptor::new(Precision::F32, 2, 5), "knm");
    }

    #[test]
    fn test_row_major_padded() {
        let mut desc = GetrfDescriptor::new(Precision::F32, 3, 3);
        desc.layout = Layout::RowMajor;
        desc.lda = 5;
        run(&desc, "hsw");
    }

    #[test]
    fn test_single_row_has_no_arithmetic() {
        let desc = GetrfDescriptor::new(Precision::F32, 1, 4);
        let mut code = GeneratedCode::new();
        emit(&mut code, &desc, &Architecture::from_name("hsw")).unwrap();
        assert_eq!(sim::count(code.as_bytes(), iced_x86::Mnemonic::Vdivps), 0);
        assert_eq!(sim::count(code.as_bytes(), iced_x86::Mnemonic::Ret), 1);
    }
}
