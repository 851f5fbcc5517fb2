//! Vector emitter shared by the packed kernel generators.
//!
//! Generators address registers through [`VReg`] and matrix elements through
//! a base register plus a layout index; [`KernelAsm`] maps both onto ymm
//! (AVX/AVX2) or zmm (AVX-512) instructions for the requested precision.
//! One packed element occupies exactly one vector register.

use iced_x86::code_asm::*;

use crate::arch::{ArchLevel, Architecture};
use crate::code::GeneratedCode;
use crate::descriptor::{KernelKind, Precision};
use crate::error::{GenError, GenResult};

/// Virtual vector register; index into ymm0..15 or zmm0..31.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VReg(pub u8);

const YMM: [AsmRegisterYmm; 16] = [
    ymm0, ymm1, ymm2, ymm3, ymm4, ymm5, ymm6, ymm7, ymm8, ymm9, ymm10, ymm11, ymm12, ymm13,
    ymm14, ymm15,
];

const ZMM: [AsmRegisterZmm; 32] = [
    zmm0, zmm1, zmm2, zmm3, zmm4, zmm5, zmm6, zmm7, zmm8, zmm9, zmm10, zmm11, zmm12, zmm13,
    zmm14, zmm15, zmm16, zmm17, zmm18, zmm19, zmm20, zmm21, zmm22, zmm23, zmm24, zmm25, zmm26,
    zmm27, zmm28, zmm29, zmm30, zmm31,
];

/// Pointer arguments, System V order.
pub const ARG0: AsmRegister64 = rdi;
pub const ARG1: AsmRegister64 = rsi;
pub const ARG2: AsmRegister64 = rdx;

/// Vector width and instruction flavour selected for one architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VecUnit {
    pub wide: bool,
    pub fma: bool,
    pub precision: Precision,
}

impl VecUnit {
    pub fn for_arch(kind: KernelKind, arch: &Architecture, precision: Precision) -> GenResult<Self> {
        if arch.level() < ArchLevel::AVX {
            return Err(GenError::backend(
                kind,
                format!("architecture `{arch}` has no 256-bit vector unit"),
            ));
        }
        Ok(Self {
            wide: arch.has_avx512(),
            fma: arch.has_fma(),
            precision,
        })
    }

    /// Bytes per packed element.
    pub fn vector_bytes(&self) -> usize {
        if self.wide { 64 } else { 32 }
    }

    /// Independent problems per packed element.
    pub fn lanes(&self) -> usize {
        self.vector_bytes() / self.precision.size_bytes()
    }

    pub fn num_regs(&self) -> u8 {
        if self.wide { 32 } else { 16 }
    }

    /// Registers consumed by the multiply-accumulate fallback.
    pub fn scratch_regs(&self) -> u8 {
        if self.fma { 0 } else { 1 }
    }
}

macro_rules! arith3 {
    ($(#[$doc:meta])* $name:ident, $ps:ident, $pd:ident) => {
        $(#[$doc])*
        pub fn $name(&mut self, dst: VReg, a: VReg, b: VReg) -> GenResult<()> {
            self.check(&[dst, a, b])?;
            let (d, a, b) = (dst.0 as usize, a.0 as usize, b.0 as usize);
            match (self.unit.wide, self.unit.precision) {
                (false, Precision::F32) => self.asm.$ps(YMM[d], YMM[a], YMM[b])?,
                (false, Precision::F64) => self.asm.$pd(YMM[d], YMM[a], YMM[b])?,
                (true, Precision::F32) => self.asm.$ps(ZMM[d], ZMM[a], ZMM[b])?,
                (true, Precision::F64) => self.asm.$pd(ZMM[d], ZMM[a], ZMM[b])?,
            }
            Ok(())
        }
    };
}

/// Straight-line kernel body under construction.
pub struct KernelAsm {
    asm: CodeAssembler,
    unit: VecUnit,
    kind: KernelKind,
    consts: Vec<(CodeLabel, f64)>,
}

impl KernelAsm {
    pub fn new(kind: KernelKind, arch: &Architecture, precision: Precision) -> GenResult<Self> {
        Ok(Self {
            asm: CodeAssembler::new(64)?,
            unit: VecUnit::for_arch(kind, arch, precision)?,
            kind,
            consts: Vec::new(),
        })
    }

    #[inline]
    pub fn unit(&self) -> VecUnit {
        self.unit
    }

    /// Register reserved for the non-FMA multiply-accumulate path.
    pub fn scratch(&self) -> VReg {
        VReg(self.unit.num_regs() - 1)
    }

    fn check(&self, regs: &[VReg]) -> GenResult<()> {
        match regs.iter().find(|r| r.0 >= self.unit.num_regs()) {
            Some(r) => Err(GenError::backend(
                self.kind,
                format!("vector register {} out of range", r.0),
            )),
            None => Ok(()),
        }
    }

    fn disp(&self, index: usize) -> GenResult<i32> {
        index
            .checked_mul(self.unit.vector_bytes())
            .and_then(|d| i32::try_from(d).ok())
            .ok_or_else(|| {
                GenError::backend(self.kind, format!("element offset {index} exceeds 32-bit displacement"))
            })
    }

    /// `dst = base[index]`
    pub fn vload(&mut self, dst: VReg, base: AsmRegister64, index: usize) -> GenResult<()> {
        self.check(&[dst])?;
        let mem = base + self.disp(index)?;
        let d = dst.0 as usize;
        match (self.unit.wide, self.unit.precision) {
            (false, Precision::F32) => self.asm.vmovups(YMM[d], ymmword_ptr(mem))?,
            (false, Precision::F64) => self.asm.vmovupd(YMM[d], ymmword_ptr(mem))?,
            (true, Precision::F32) => self.asm.vmovups(ZMM[d], zmmword_ptr(mem))?,
            (true, Precision::F64) => self.asm.vmovupd(ZMM[d], zmmword_ptr(mem))?,
        }
        Ok(())
    }

    /// `base[index] = src`
    pub fn vstore(&mut self, base: AsmRegister64, index: usize, src: VReg) -> GenResult<()> {
        self.check(&[src])?;
        let mem = base + self.disp(index)?;
        let s = src.0 as usize;
        match (self.unit.wide, self.unit.precision) {
            (false, Precision::F32) => self.asm.vmovups(ymmword_ptr(mem), YMM[s])?,
            (false, Precision::F64) => self.asm.vmovupd(ymmword_ptr(mem), YMM[s])?,
            (true, Precision::F32) => self.asm.vmovups(zmmword_ptr(mem), ZMM[s])?,
            (true, Precision::F64) => self.asm.vmovupd(zmmword_ptr(mem), ZMM[s])?,
        }
        Ok(())
    }

    pub fn vzero(&mut self, dst: VReg) -> GenResult<()> {
        self.check(&[dst])?;
        let d = dst.0 as usize;
        if self.unit.wide {
            // KNL has no AVX512DQ, so no vxorps on zmm.
            self.asm.vpxord(ZMM[d], ZMM[d], ZMM[d])?;
        } else {
            self.asm.vxorps(YMM[d], YMM[d], YMM[d])?;
        }
        Ok(())
    }

    /// Broadcast a compile-time scalar to every lane of `dst`.
    pub fn vbroadcast_const(&mut self, dst: VReg, value: f64) -> GenResult<()> {
        self.check(&[dst])?;
        let label = self.asm.create_label();
        self.consts.push((label, value));
        let d = dst.0 as usize;
        match (self.unit.wide, self.unit.precision) {
            (false, Precision::F32) => self.asm.vbroadcastss(YMM[d], dword_ptr(label))?,
            (false, Precision::F64) => self.asm.vbroadcastsd(YMM[d], qword_ptr(label))?,
            (true, Precision::F32) => self.asm.vbroadcastss(ZMM[d], dword_ptr(label))?,
            (true, Precision::F64) => self.asm.vbroadcastsd(ZMM[d], qword_ptr(label))?,
        }
        Ok(())
    }

    arith3!(
        /// `dst = a + b`
        vadd, vaddps, vaddpd
    );
    arith3!(
        /// `dst = a - b`
        vsub, vsubps, vsubpd
    );
    arith3!(
        /// `dst = a * b`
        vmul, vmulps, vmulpd
    );
    arith3!(
        /// `dst = a / b`
        vdiv, vdivps, vdivpd
    );
    arith3!(fmadd231, vfmadd231ps, vfmadd231pd);
    arith3!(fnmadd231, vfnmadd231ps, vfnmadd231pd);

    /// `acc += a * b`
    pub fn vfma(&mut self, acc: VReg, a: VReg, b: VReg) -> GenResult<()> {
        if self.unit.fma {
            return self.fmadd231(acc, a, b);
        }
        let tmp = self.scratch();
        self.vmul(tmp, a, b)?;
        self.vadd(acc, acc, tmp)
    }

    /// `acc -= a * b`
    pub fn vfnma(&mut self, acc: VReg, a: VReg, b: VReg) -> GenResult<()> {
        if self.unit.fma {
            return self.fnmadd231(acc, a, b);
        }
        let tmp = self.scratch();
        self.vmul(tmp, a, b)?;
        self.vsub(acc, acc, tmp)
    }

    /// Close the body with `ret`, lay out constants behind it and append.
    pub fn finish(mut self, code: &mut GeneratedCode) -> GenResult<usize> {
        self.asm.vzeroupper()?;
        self.asm.ret()?;
        for (mut label, value) in std::mem::take(&mut self.consts) {
            self.asm.set_label(&mut label)?;
            match self.unit.precision {
                Precision::F32 => self.asm.db(&(value as f32).to_le_bytes())?,
                Precision::F64 => self.asm.db(&value.to_le_bytes())?,
            }
        }
        let bytes = self.asm.assemble(code.len() as u64)?;
        code.append(&bytes)?;
        Ok(bytes.len())
    }
}
