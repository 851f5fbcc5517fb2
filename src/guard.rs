//! ISA guard emission.
//!
//! Every kernel is bracketed by a guard pair:
//!
//! ```text
//! header:  jmp start
//!   fail:  ud2
//!          "PKJITHDR" level:u32 len:u8 name      (skipped data)
//!  start:  push rax/rbx/rcx/rdx
//!          cpuid / xgetbv feature checks, jne/jb fail
//!          pop rdx/rcx/rbx/rax                    (falls through into the body)
//! body:    ... ret
//! footer:  ud2 "PKJITEND" level:u32 len:u8 name body_end:u32 footer_len:u32
//! ```
//!
//! The header traps before any body instruction runs on a CPU that lacks a
//! required feature; an unknown architecture gets a header that always traps.
//! The footer is trailing data parsed from the end of the buffer. Both
//! emitters only append.

use iced_x86::code_asm::{
    eax, ebx, ecx, edx, rax, rbx, rcx, rdx, AsmRegister32, CodeAssembler, CodeLabel,
};

use crate::arch::{ArchLevel, Architecture};
use crate::code::GeneratedCode;
use crate::error::GenResult;

pub const HEADER_MAGIC: [u8; 8] = *b"PKJITHDR";
pub const FOOTER_MAGIC: [u8; 8] = *b"PKJITEND";

const UD2: [u8; 2] = [0x0F, 0x0B];
const MAX_NAME: usize = u8::MAX as usize;

// XCR0 state components.
const XCR0_SSE: u32 = 1 << 1;
const XCR0_AVX: u32 = 1 << 2;
const XCR0_OPMASK: u32 = 1 << 5;
const XCR0_ZMM_HI256: u32 = 1 << 6;
const XCR0_HI16_ZMM: u32 = 1 << 7;

// ── Feature requirements ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuidReg {
    Eax,
    Ebx,
    Ecx,
    Edx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Every bit of the mask must be set.
    AllBits(u32),
    /// Register value must be at least this (unsigned).
    AtLeast(u32),
}

/// One `cpuid` probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureCheck {
    pub leaf: u32,
    pub subleaf: u32,
    pub reg: CpuidReg,
    pub expect: Expect,
}

/// Everything a CPU must report to run code built for one architecture.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IsaRequirements {
    pub checks: Vec<FeatureCheck>,
    /// OS-enabled state components that `xgetbv(0)` must report.
    pub xcr0: u32,
}

impl IsaRequirements {
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty() && self.xcr0 == 0
    }
}

const fn bit(n: u32) -> u32 {
    1 << n
}

/// Requirements for `arch`, or `None` when the architecture is unknown.
pub fn requirements(arch: &Architecture) -> Option<IsaRequirements> {
    if !arch.is_known() {
        return None;
    }
    let level = arch.level();

    let mut leaf1_ecx = 0u32;
    let mut leaf7_ebx = 0u32;
    let mut leaf7_ecx = 0u32;
    let mut leaf7_edx = 0u32;
    let mut leaf7_1_eax = 0u32;
    let mut xcr0 = 0u32;

    if level >= ArchLevel::SSE3 {
        leaf1_ecx |= bit(0);
    }
    if level >= ArchLevel::SSE4 {
        leaf1_ecx |= bit(19) | bit(20);
    }
    if level >= ArchLevel::AVX {
        // OSXSAVE + AVX
        leaf1_ecx |= bit(27) | bit(28);
        xcr0 |= XCR0_SSE | XCR0_AVX;
    }
    if level >= ArchLevel::AVX2 {
        // FMA + AVX2
        leaf1_ecx |= bit(12);
        leaf7_ebx |= bit(5);
    }
    if level >= ArchLevel::AVX512 {
        leaf7_ebx |= bit(16);
        xcr0 |= XCR0_OPMASK | XCR0_ZMM_HI256 | XCR0_HI16_ZMM;
    }
    if (ArchLevel::AVX512_MIC..ArchLevel::AVX512_CORE).contains(&level) {
        // PF, ER, CD
        leaf7_ebx |= bit(26) | bit(27) | bit(28);
        if level >= ArchLevel::AVX512_KNM {
            // 4VNNIW, 4FMAPS
            leaf7_edx |= bit(2) | bit(3);
        }
    }
    if level >= ArchLevel::AVX512_CORE {
        // DQ, CD, BW, VL
        leaf7_ebx |= bit(17) | bit(28) | bit(30) | bit(31);
    }
    if level >= ArchLevel::AVX512_CLX {
        leaf7_ecx |= bit(11);
    }
    if level >= ArchLevel::AVX512_CPX {
        leaf7_1_eax |= bit(5);
    }

    let mut checks = Vec::new();
    let uses_leaf7 = (leaf7_ebx | leaf7_ecx | leaf7_edx | leaf7_1_eax) != 0;
    if uses_leaf7 {
        checks.push(FeatureCheck { leaf: 0, subleaf: 0, reg: CpuidReg::Eax, expect: Expect::AtLeast(7) });
    }
    if leaf1_ecx != 0 {
        checks.push(FeatureCheck { leaf: 1, subleaf: 0, reg: CpuidReg::Ecx, expect: Expect::AllBits(leaf1_ecx) });
    }
    for (reg, mask) in [(CpuidReg::Ebx, leaf7_ebx), (CpuidReg::Ecx, leaf7_ecx), (CpuidReg::Edx, leaf7_edx)] {
        if mask != 0 {
            checks.push(FeatureCheck { leaf: 7, subleaf: 0, reg, expect: Expect::AllBits(mask) });
        }
    }
    if leaf7_1_eax != 0 {
        checks.push(FeatureCheck { leaf: 7, subleaf: 0, reg: CpuidReg::Eax, expect: Expect::AtLeast(1) });
        checks.push(FeatureCheck { leaf: 7, subleaf: 1, reg: CpuidReg::Eax, expect: Expect::AllBits(leaf7_1_eax) });
    }

    Some(IsaRequirements { checks, xcr0 })
}

// ── Emission ──────────────────────────────────────────────────────────

fn reg32(reg: CpuidReg) -> AsmRegister32 {
    match reg {
        CpuidReg::Eax => eax,
        CpuidReg::Ebx => ebx,
        CpuidReg::Ecx => ecx,
        CpuidReg::Edx => edx,
    }
}

fn emit_check(asm: &mut CodeAssembler, check: &FeatureCheck, fail: CodeLabel) -> GenResult<()> {
    asm.mov(eax, check.leaf)?;
    asm.mov(ecx, check.subleaf)?;
    asm.cpuid()?;
    let reg = reg32(check.reg);
    match check.expect {
        Expect::AllBits(mask) => {
            asm.and(reg, mask)?;
            asm.cmp(reg, mask)?;
            asm.jne(fail)?;
        }
        Expect::AtLeast(min) => {
            asm.cmp(reg, min)?;
            asm.jb(fail)?;
        }
    }
    Ok(())
}

fn name_bytes(arch: &Architecture) -> &[u8] {
    let name = arch.name().as_bytes();
    &name[..name.len().min(MAX_NAME)]
}

fn record(magic: [u8; 8], arch: &Architecture) -> Vec<u8> {
    let name = name_bytes(arch);
    let mut out = Vec::with_capacity(8 + 4 + 1 + name.len());
    out.extend_from_slice(&magic);
    out.extend_from_slice(&arch.level().0.to_le_bytes());
    out.push(name.len() as u8);
    out.extend_from_slice(name);
    out
}

/// Append the guard header for `arch`. Must precede any body bytes.
pub fn emit_guard_header(code: &mut GeneratedCode, arch: &Architecture) -> GenResult<()> {
    let mut asm = CodeAssembler::new(64)?;
    let mut start = asm.create_label();
    let mut fail = asm.create_label();

    asm.jmp(start)?;
    asm.set_label(&mut fail)?;
    asm.ud2()?;
    asm.db(&record(HEADER_MAGIC, arch))?;
    asm.set_label(&mut start)?;

    match requirements(arch) {
        Some(req) => {
            // cpuid clobbers eax..edx; rcx/rdx carry kernel arguments.
            asm.push(rax)?;
            asm.push(rbx)?;
            asm.push(rcx)?;
            asm.push(rdx)?;
            for check in &req.checks {
                emit_check(&mut asm, check, fail)?;
            }
            if req.xcr0 != 0 {
                asm.xor(ecx, ecx)?;
                asm.xgetbv()?;
                asm.and(eax, req.xcr0)?;
                asm.cmp(eax, req.xcr0)?;
                asm.jne(fail)?;
            }
            asm.pop(rdx)?;
            asm.pop(rcx)?;
            asm.pop(rbx)?;
            asm.pop(rax)?;
        }
        None => {
            asm.jmp(fail)?;
        }
    }

    let bytes = asm.assemble(code.len() as u64)?;
    log::trace!("guard header for {arch}: {} bytes", bytes.len());
    code.append(&bytes)
}

/// Append the guard footer for `arch`. Must follow the body.
pub fn emit_guard_footer(code: &mut GeneratedCode, arch: &Architecture) -> GenResult<()> {
    let body_end = u32::try_from(code.len()).unwrap_or(u32::MAX);
    let mut out = Vec::with_capacity(footer_len(arch));
    out.extend_from_slice(&UD2);
    out.extend_from_slice(&record(FOOTER_MAGIC, arch));
    out.extend_from_slice(&body_end.to_le_bytes());
    let total = (out.len() + 4) as u32;
    out.extend_from_slice(&total.to_le_bytes());
    code.append(&out)
}

/// Exact byte length of the footer for `arch`.
pub fn footer_len(arch: &Architecture) -> usize {
    UD2.len() + 8 + 4 + 1 + name_bytes(arch).len() + 4 + 4
}

// ── Inspection ────────────────────────────────────────────────────────

/// Architecture recorded in a guard header or footer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardRecord {
    pub level: ArchLevel,
    pub name: String,
}

impl GuardRecord {
    fn parse(bytes: &[u8], magic: &[u8; 8]) -> Option<(Self, usize)> {
        if bytes.len() < 13 || bytes[..8] != magic[..] {
            return None;
        }
        let level = u32::from_le_bytes(bytes[8..12].try_into().ok()?);
        let len = bytes[12] as usize;
        let name = bytes.get(13..13 + len)?;
        let record = Self {
            level: ArchLevel(level),
            name: String::from_utf8_lossy(name).into_owned(),
        };
        Some((record, 13 + len))
    }

    /// First guard header record in `bytes`.
    pub fn find_header(bytes: &[u8]) -> Option<Self> {
        let at = bytes.windows(HEADER_MAGIC.len()).position(|w| w == HEADER_MAGIC)?;
        Self::parse(&bytes[at..], &HEADER_MAGIC).map(|(record, _)| record)
    }

    /// Footer at the very end of `bytes`, with the body end offset it recorded.
    ///
    /// Returns `None` unless the trailer is well formed and its recorded body
    /// end matches where it actually starts.
    pub fn parse_footer(bytes: &[u8]) -> Option<(Self, usize)> {
        let n = bytes.len();
        let total = u32::from_le_bytes(bytes.get(n.checked_sub(4)?..)?.try_into().ok()?) as usize;
        let start = n.checked_sub(total)?;
        let footer = &bytes[start..];
        if footer.len() < UD2.len() || footer[..2] != UD2 {
            return None;
        }
        let (record, used) = Self::parse(&footer[2..], &FOOTER_MAGIC)?;
        let tail = footer.get(2 + used..)?;
        if tail.len() != 8 {
            return None;
        }
        let body_end = u32::from_le_bytes(tail[..4].try_into().ok()?) as usize;
        if body_end != start {
            return None;
        }
        Some((record, body_end))
    }

    pub fn matches(&self, arch: &Architecture) -> bool {
        self.level == arch.level() && self.name.as_bytes() == name_bytes(arch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iced_x86::{Decoder, DecoderOptions, Mnemonic};

    fn header_mnemonics(bytes: &[u8]) -> Vec<Mnemonic> {
        let start = {
            // First instruction is `jmp start`; decode from its target.
            let mut decoder = Decoder::with_ip(64, bytes, 0, DecoderOptions::NONE);
            let jmp = decoder.decode();
            assert_eq!(jmp.mnemonic(), Mnemonic::Jmp);
            jmp.near_branch_target() as usize
        };
        let mut decoder = Decoder::with_ip(64, &bytes[start..], start as u64, DecoderOptions::NONE);
        let mut out = Vec::new();
        while decoder.can_decode() {
            out.push(decoder.decode().mnemonic());
        }
        out
    }

    #[test]
    fn test_snb_requirements() {
        let req = requirements(&ArchLevel::AVX.resolve()).unwrap();
        assert_eq!(req.xcr0, XCR0_SSE | XCR0_AVX);
        assert_eq!(req.checks.len(), 1);
        assert_eq!(
            req.checks[0].expect,
            Expect::AllBits(bit(0) | bit(19) | bit(20) | bit(27) | bit(28))
        );
    }

    #[test]
    fn test_knl_and_skx_differ() {
        let knl = requirements(&Architecture::from_name("knl")).unwrap();
        let skx = requirements(&Architecture::from_name("skx")).unwrap();
        let leaf7_ebx = |req: &IsaRequirements| {
            req.checks
                .iter()
                .find(|c| c.leaf == 7 && c.reg == CpuidReg::Ebx)
                .map(|c| c.expect)
        };
        assert_eq!(leaf7_ebx(&knl), Some(Expect::AllBits(bit(5) | bit(16) | bit(26) | bit(27) | bit(28))));
        assert_eq!(
            leaf7_ebx(&skx),
            Some(Expect::AllBits(bit(5) | bit(16) | bit(17) | bit(28) | bit(30) | bit(31)))
        );
        // Max-leaf probe comes first.
        assert_eq!(knl.checks[0].expect, Expect::AtLeast(7));
    }

    #[test]
    fn test_generic_has_no_checks() {
        assert!(requirements(&ArchLevel::GENERIC.resolve()).unwrap().is_empty());
        assert!(requirements(&Architecture::from_name("zzz")).is_none());
    }

    #[test]
    fn test_header_structure() {
        let arch = Architecture::from_name("hsw");
        let mut code = GeneratedCode::new();
        emit_guard_header(&mut code, &arch).unwrap();

        let record = GuardRecord::find_header(code.as_bytes()).unwrap();
        assert!(record.matches(&arch));

        let ops = header_mnemonics(code.as_bytes());
        assert_eq!(&ops[..4], &[Mnemonic::Push; 4]);
        assert_eq!(&ops[ops.len() - 4..], &[Mnemonic::Pop; 4]);
        assert!(ops.contains(&Mnemonic::Cpuid));
        assert!(ops.contains(&Mnemonic::Xgetbv));
    }

    #[test]
    fn test_unknown_header_always_traps() {
        let arch = Architecture::from_name("zzz");
        let mut code = GeneratedCode::new();
        emit_guard_header(&mut code, &arch).unwrap();

        let ops = header_mnemonics(code.as_bytes());
        assert_eq!(ops, vec![Mnemonic::Jmp]);
        assert_eq!(GuardRecord::find_header(code.as_bytes()).unwrap().name, "zzz");
    }

    #[test]
    fn test_footer_roundtrip() {
        let arch = ArchLevel::AVX512_CORE.resolve();
        let mut code = GeneratedCode::new();
        code.append(&[0xC3]).unwrap();
        emit_guard_footer(&mut code, &arch).unwrap();
        assert_eq!(code.len(), 1 + footer_len(&arch));

        let (record, body_end) = GuardRecord::parse_footer(code.as_bytes()).unwrap();
        assert!(record.matches(&arch));
        assert_eq!(record.name, "skx");
        assert_eq!(body_end, 1);
    }

    #[test]
    fn test_parse_footer_rejects_garbage() {
        assert!(GuardRecord::parse_footer(&[]).is_none());
        assert!(GuardRecord::parse_footer(&[0xC3, 0xFF, 0, 0, 0]).is_none());

        let arch = Architecture::from_name("snb");
        let mut code = GeneratedCode::new();
        emit_guard_footer(&mut code, &arch).unwrap();
        let mut bytes = code.as_bytes().to_vec();
        bytes.insert(0, 0x90);
        // Body end no longer matches the trailer position.
        assert!(GuardRecord::parse_footer(&bytes).is_none());
    }

    #[test]
    fn test_long_names_are_truncated_consistently() {
        let long = "x".repeat(400);
        let arch = Architecture::from_name(&long);
        let mut code = GeneratedCode::new();
        emit_guard_footer(&mut code, &arch).unwrap();
        let (record, _) = GuardRecord::parse_footer(code.as_bytes()).unwrap();
        assert_eq!(record.name.len(), 255);
        assert!(record.matches(&arch));
    }
}
