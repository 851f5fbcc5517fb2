//! Single-lane interpreter for generated kernel bodies.
//!
//! Every lane of a packed kernel computes the same thing, so tracking one
//! scalar per vector register is enough to check the arithmetic. Only the
//! straight-line subset the generators emit is understood.

use std::collections::HashMap;

use iced_x86::{Decoder, DecoderOptions, Instruction, Mnemonic, OpKind, Register};

use crate::arch::Architecture;
use crate::descriptor::{KernelKind, Layout, Precision};

use super::simd::VecUnit;

/// Dense test matrix with its storage padding.
#[derive(Debug, Clone)]
pub struct Matrix {
    pub layout: Layout,
    pub rows: usize,
    pub cols: usize,
    pub ld: usize,
    pub data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(layout: Layout, rows: usize, cols: usize, ld: usize) -> Self {
        let len = match layout {
            Layout::ColMajor => ld * cols,
            Layout::RowMajor => rows * ld,
        };
        Self { layout, rows, cols, ld, data: vec![0.0; len] }
    }

    /// Deterministic values in [1, 3.5], padding included.
    pub fn seeded(layout: Layout, rows: usize, cols: usize, ld: usize, seed: usize) -> Self {
        let mut m = Self::zeros(layout, rows, cols, ld);
        for (i, v) in m.data.iter_mut().enumerate() {
            *v = 1.0 + ((i * 7 + seed * 13) % 11) as f64 * 0.25;
        }
        m
    }

    pub fn get(&self, r: usize, c: usize) -> f64 {
        self.data[self.layout.index(r, c, self.ld)]
    }

    pub fn set(&mut self, r: usize, c: usize, v: f64) {
        let i = self.layout.index(r, c, self.ld);
        self.data[i] = v;
    }
}

/// Buffers behind the pointer arguments (0 = rdi, 1 = rsi, 2 = rdx).
pub struct Memory {
    vector_bytes: usize,
    precision: Precision,
    buffers: HashMap<usize, Vec<f64>>,
}

impl Memory {
    pub fn new(arch: &Architecture, precision: Precision) -> Self {
        let unit = VecUnit::for_arch(KernelKind::Pgemm, arch, precision).unwrap();
        Self {
            vector_bytes: unit.vector_bytes(),
            precision,
            buffers: HashMap::new(),
        }
    }

    pub fn bind(&mut self, arg: usize, data: Vec<f64>) {
        self.buffers.insert(arg, data);
    }

    pub fn buffer(&self, arg: usize) -> &[f64] {
        &self.buffers[&arg]
    }

    fn slot(&mut self, instr: &Instruction) -> Result<&mut f64, String> {
        let arg = match instr.memory_base() {
            Register::RDI => 0,
            Register::RSI => 1,
            Register::RDX => 2,
            other => return Err(format!("unexpected base {other:?}")),
        };
        let disp = instr.memory_displacement64() as i64;
        if disp < 0 || disp as usize % self.vector_bytes != 0 {
            return Err(format!("misaligned displacement {disp}"));
        }
        let index = disp as usize / self.vector_bytes;
        let buf = self.buffers.get_mut(&arg).ok_or(format!("argument {arg} unbound"))?;
        buf.get_mut(index).ok_or(format!("element {index} outside argument {arg}"))
    }
}

fn vindex(reg: Register) -> usize {
    if reg.is_zmm() {
        reg as usize - Register::ZMM0 as usize
    } else {
        reg as usize - Register::YMM0 as usize
    }
}

fn constant(code: &[u8], addr: u64, precision: Precision) -> Result<f64, String> {
    let at = addr as usize;
    let raw = |n: usize| code.get(at..at + n).ok_or(format!("constant at {addr:#x} out of range"));
    Ok(match precision {
        Precision::F32 => f32::from_le_bytes(raw(4)?.try_into().unwrap()) as f64,
        Precision::F64 => f64::from_le_bytes(raw(8)?.try_into().unwrap()),
    })
}

/// Execute the body starting at `start` until `ret`. Returns the
/// instruction count.
pub fn run(code: &[u8], start: usize, mem: &mut Memory) -> Result<usize, String> {
    let mut decoder = Decoder::with_ip(64, &code[start..], start as u64, DecoderOptions::NONE);
    let mut regs = [0.0f64; 32];
    let mut executed = 0;

    while decoder.can_decode() {
        let instr = decoder.decode();
        executed += 1;
        let reg = |i: u32| vindex(instr.op_register(i));
        match instr.mnemonic() {
            Mnemonic::Vmovups | Mnemonic::Vmovupd => {
                if instr.op0_kind() == OpKind::Register {
                    regs[reg(0)] = *mem.slot(&instr)?;
                } else {
                    *mem.slot(&instr)? = regs[reg(1)];
                }
            }
            Mnemonic::Vxorps | Mnemonic::Vpxord => regs[reg(0)] = 0.0,
            Mnemonic::Vbroadcastss | Mnemonic::Vbroadcastsd => {
                regs[reg(0)] = constant(code, instr.ip_rel_memory_address(), mem.precision)?;
            }
            Mnemonic::Vaddps | Mnemonic::Vaddpd => regs[reg(0)] = regs[reg(1)] + regs[reg(2)],
            Mnemonic::Vsubps | Mnemonic::Vsubpd => regs[reg(0)] = regs[reg(1)] - regs[reg(2)],
            Mnemonic::Vmulps | Mnemonic::Vmulpd => regs[reg(0)] = regs[reg(1)] * regs[reg(2)],
            Mnemonic::Vdivps | Mnemonic::Vdivpd => regs[reg(0)] = regs[reg(1)] / regs[reg(2)],
            Mnemonic::Vfmadd231ps | Mnemonic::Vfmadd231pd => regs[reg(0)] += regs[reg(1)] * regs[reg(2)],
            Mnemonic::Vfnmadd231ps | Mnemonic::Vfnmadd231pd => regs[reg(0)] -= regs[reg(1)] * regs[reg(2)],
            Mnemonic::Vzeroupper => {}
            Mnemonic::Ret => return Ok(executed),
            other => return Err(format!("unsupported instruction {other:?} at {:#x}", instr.ip())),
        }
    }
    Err("body fell off the end without ret".into())
}

/// Count occurrences of `mnemonic` in the body starting at offset 0, up to `ret`.
pub fn count(code: &[u8], mnemonic: Mnemonic) -> usize {
    let mut decoder = Decoder::with_ip(64, code, 0, DecoderOptions::NONE);
    let mut n = 0;
    while decoder.can_decode() {
        let instr = decoder.decode();
        if instr.mnemonic() == mnemonic {
            n += 1;
        }
        if instr.mnemonic() == Mnemonic::Ret {
            break;
        }
    }
    n
}

pub fn assert_close(got: &[f64], want: &[f64], tol: f64) {
    assert_eq!(got.len(), want.len(), "length mismatch");
    for (i, (g, w)) in got.iter().zip(want).enumerate() {
        assert!((g - w).abs() <= tol * w.abs().max(1.0), "element {i}: got {g}, want {w}");
    }
}
