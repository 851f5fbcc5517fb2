//! Architecture tokens and their canonical form.
//!
//! Callers name a target either by an ordered numeric ISA level
//! ([`ArchLevel`]) or by a short micro-architecture code (`"skx"`, `"hsw"`,
//! ...). Both are folded into one [`Architecture`] value so the gates and
//! the guard emitter only ever see a single representation.
//!
//! Resolution is range based: a level maps to the name of the highest known
//! level not above it. Unknown intermediate and future levels therefore
//! still resolve to exactly one canonical name.

use std::borrow::Cow;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

// ── Numeric ISA levels ────────────────────────────────────────────────

/// Ordered ISA capability level. Higher is more capable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchLevel(pub u32);

impl ArchLevel {
    /// Level attached to names that are not in the known vocabulary.
    pub const UNKNOWN: Self = Self(0);
    pub const GENERIC: Self = Self(1);
    pub const X86_GENERIC: Self = Self(1002);
    pub const SSE3: Self = Self(1003);
    pub const SSE4: Self = Self(1004);
    /// Baseline vector ISA; the floor for packed GEMM and GETRF.
    pub const AVX: Self = Self(1005);
    pub const AVX2: Self = Self(1006);
    pub const AVX512: Self = Self(1007);
    /// Knights Landing.
    pub const AVX512_MIC: Self = Self(1010);
    /// Knights Mill.
    pub const AVX512_KNM: Self = Self(1011);
    /// Skylake-SP.
    pub const AVX512_CORE: Self = Self(1020);
    /// Cascade Lake.
    pub const AVX512_CLX: Self = Self(1021);
    /// Cooper Lake.
    pub const AVX512_CPX: Self = Self(1022);

    /// Canonical short name for this level.
    pub fn canonical_name(self) -> &'static str {
        KNOWN_LEVELS
            .iter()
            .find(|(level, _)| self >= *level)
            .map(|(_, name)| *name)
            .unwrap_or("generic")
    }

    /// Resolve this level into the unified [`Architecture`] value.
    pub fn resolve(self) -> Architecture {
        Architecture::from_level(self)
    }

    /// Next level up, saturating.
    pub fn succ(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Next level down, saturating.
    pub fn pred(self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

impl From<u32> for ArchLevel {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for ArchLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Known levels, highest first.
const KNOWN_LEVELS: [(ArchLevel, &str); 12] = [
    (ArchLevel::AVX512_CPX, "cpx"),
    (ArchLevel::AVX512_CLX, "clx"),
    (ArchLevel::AVX512_CORE, "skx"),
    (ArchLevel::AVX512_KNM, "knm"),
    (ArchLevel::AVX512_MIC, "knl"),
    (ArchLevel::AVX512, "avx3"),
    (ArchLevel::AVX2, "hsw"),
    (ArchLevel::AVX, "snb"),
    (ArchLevel::SSE4, "wsm"),
    (ArchLevel::SSE3, "sse3"),
    (ArchLevel::X86_GENERIC, "x86"),
    (ArchLevel::GENERIC, "generic"),
];

// ── Unified architecture value ────────────────────────────────────────

/// A target micro-architecture: ordered level plus canonical name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Architecture {
    level: ArchLevel,
    name: Cow<'static, str>,
}

impl Architecture {
    /// Levels below [`ArchLevel::GENERIC`] are raised to it, so every level
    /// resolves to a known architecture.
    pub fn from_level(level: ArchLevel) -> Self {
        let level = level.max(ArchLevel::GENERIC);
        Self {
            level,
            name: Cow::Borrowed(level.canonical_name()),
        }
    }

    /// Build from a canonical name. Names outside the known vocabulary are
    /// kept verbatim with [`ArchLevel::UNKNOWN`]; no case folding is done.
    pub fn from_name(name: &str) -> Self {
        match KNOWN_LEVELS.iter().find(|(_, known)| *known == name) {
            Some((level, known)) => Self {
                level: *level,
                name: Cow::Borrowed(*known),
            },
            None => Self {
                level: ArchLevel::UNKNOWN,
                name: Cow::Owned(name.to_string()),
            },
        }
    }

    #[inline]
    pub fn level(&self) -> ArchLevel {
        self.level
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the name belongs to the known vocabulary.
    pub fn is_known(&self) -> bool {
        self.level != ArchLevel::UNKNOWN
    }

    /// Whether this target executes AVX-512 foundation instructions.
    pub fn has_avx512(&self) -> bool {
        self.level >= ArchLevel::AVX512
    }

    /// Whether this target has fused multiply-add.
    pub fn has_fma(&self) -> bool {
        self.level >= ArchLevel::AVX2
    }
}

impl From<ArchLevel> for Architecture {
    fn from(level: ArchLevel) -> Self {
        Self::from_level(level)
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

// ── Host detection ────────────────────────────────────────────────────

/// Detect the ISA level of the executing CPU.
pub fn detect() -> ArchLevel {
    #[cfg(target_arch = "x86_64")]
    {
        return detect_x86();
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        ArchLevel::GENERIC
    }
}

#[cfg(target_arch = "x86_64")]
fn detect_x86() -> ArchLevel {
    use std::arch::x86_64::__cpuid_count;

    let bit = |reg: u32, n: u32| reg & (1 << n) != 0;

    if is_x86_feature_detected!("avx512f") {
        // Leaf 7 exists whenever AVX-512F is reported.
        let leaf7 = unsafe { __cpuid_count(7, 0) };
        if bit(leaf7.ebx, 26) && bit(leaf7.ebx, 27) {
            // AVX512PF + AVX512ER: Xeon Phi
            if bit(leaf7.edx, 2) && bit(leaf7.edx, 3) {
                return ArchLevel::AVX512_KNM;
            }
            return ArchLevel::AVX512_MIC;
        }
        if bit(leaf7.ebx, 17) && bit(leaf7.ebx, 30) && bit(leaf7.ebx, 31) {
            let bf16 = leaf7.eax >= 1 && bit(unsafe { __cpuid_count(7, 1) }.eax, 5);
            if bf16 {
                return ArchLevel::AVX512_CPX;
            }
            if bit(leaf7.ecx, 11) {
                return ArchLevel::AVX512_CLX;
            }
            return ArchLevel::AVX512_CORE;
        }
        ArchLevel::AVX512
    } else if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
        ArchLevel::AVX2
    } else if is_x86_feature_detected!("avx") {
        ArchLevel::AVX
    } else if is_x86_feature_detected!("sse4.2") {
        ArchLevel::SSE4
    } else if is_x86_feature_detected!("sse3") {
        ArchLevel::SSE3
    } else {
        ArchLevel::X86_GENERIC
    }
}

static HOST: OnceLock<Architecture> = OnceLock::new();

/// The executing CPU's architecture, detected once per process.
pub fn host() -> &'static Architecture {
    HOST.get_or_init(|| {
        let arch = detect().resolve();
        log::info!("detected host architecture: {} (level {})", arch, arch.level());
        arch
    })
}
