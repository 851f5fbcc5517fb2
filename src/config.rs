//! Generator configuration: target override and code size limit.
//!
//! Sources, in the order callers usually layer them: JSON (`from_json`),
//! then the process environment (`from_env`):
//!
//! - `PACKED_JIT_TARGET`: numeric level, canonical name, ISA alias, or `host`
//! - `PACKED_JIT_CODE_LIMIT`: maximum buffer size in bytes

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::arch::{self, ArchLevel, Architecture};
use crate::code::GeneratedCode;

pub const ENV_TARGET: &str = "PACKED_JIT_TARGET";
pub const ENV_CODE_LIMIT: &str = "PACKED_JIT_CODE_LIMIT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown target `{0}`")]
    UnknownTarget(String),
    #[error("invalid code limit `{0}`")]
    InvalidLimit(String),
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// ISA aliases accepted in addition to canonical names (lowercase).
const ALIASES: [(&str, ArchLevel); 10] = [
    ("sse4", ArchLevel::SSE4),
    ("sse4.2", ArchLevel::SSE4),
    ("avx", ArchLevel::AVX),
    ("avx2", ArchLevel::AVX2),
    ("avx512", ArchLevel::AVX512_CORE),
    ("avx512f", ArchLevel::AVX512),
    ("mic", ArchLevel::AVX512_MIC),
    ("core", ArchLevel::AVX512_CORE),
    ("cascadelake", ArchLevel::AVX512_CLX),
    ("cooperlake", ArchLevel::AVX512_CPX),
];

/// Parse a target token into an [`Architecture`].
pub fn parse_target(token: &str) -> ConfigResult<Architecture> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ConfigError::UnknownTarget(token.to_string()));
    }
    if let Ok(level) = token.parse::<u32>() {
        return Ok(ArchLevel(level).resolve());
    }
    let named = Architecture::from_name(token);
    if named.is_known() {
        return Ok(named);
    }
    let lower = token.to_ascii_lowercase();
    if lower == "host" || lower == "native" {
        return Ok(arch::host().clone());
    }
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, level)| level.resolve())
        .or_else(|| {
            let named = Architecture::from_name(&lower);
            named.is_known().then_some(named)
        })
        .ok_or_else(|| ConfigError::UnknownTarget(token.to_string()))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorConfig {
    /// Target override; `None` means the detected host.
    pub target: Option<String>,
    /// Upper bound on generated bytes per buffer.
    pub code_limit: Option<usize>,
}

impl GeneratorConfig {
    pub fn from_json(text: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `PACKED_JIT_TARGET` / `PACKED_JIT_CODE_LIMIT`.
    pub fn from_env() -> ConfigResult<Self> {
        Self::default().with_vars(|key| std::env::var(key).ok())
    }

    /// Overlay variables from `lookup` onto `self`.
    pub fn with_vars<F>(mut self, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(target) = lookup(ENV_TARGET) {
            log::info!("{ENV_TARGET} override: {target}");
            self.target = Some(target);
        }
        if let Some(limit) = lookup(ENV_CODE_LIMIT) {
            let parsed = limit
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidLimit(limit.clone()))?;
            log::info!("{ENV_CODE_LIMIT} override: {parsed}");
            self.code_limit = Some(parsed);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(target) = &self.target {
            parse_target(target)?;
        }
        if self.code_limit == Some(0) {
            return Err(ConfigError::InvalidLimit("0".into()));
        }
        Ok(())
    }

    /// Configured target, or the host when none is set.
    pub fn architecture(&self) -> ConfigResult<Architecture> {
        match &self.target {
            Some(target) => parse_target(target),
            None => Ok(arch::host().clone()),
        }
    }

    /// Empty buffer honoring `code_limit`.
    pub fn new_code(&self) -> GeneratedCode {
        match self.code_limit {
            Some(limit) => GeneratedCode::with_limit(limit),
            None => GeneratedCode::new(),
        }
    }
}
