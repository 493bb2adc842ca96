//! VM configuration
//!
//! Tunables an embedder (or a `sett.toml` file) can set: the scheduler
//! slice, the step-trace and profile hooks, the assertion mode, and the
//! stack limits. Every field has a default, so a partial file is fine.

use serde::Deserialize;
use std::path::Path;

/// What an `assert` instruction does with a false condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssertMode {
    /// Ignore assertions.
    #[default]
    Off,
    /// Log failures and continue.
    Log,
    /// Abend on failure.
    Fail,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Opcodes executed between scheduler checkpoints.
    pub process_slice: u32,
    /// Emit a trace event per executed instruction.
    pub step_trace: bool,
    /// Count executions per opcode.
    pub profile: bool,
    pub assert_mode: AssertMode,
    /// Program stack limit, in specifiers.
    pub max_pstack: usize,
    /// Call stack limit, in frames.
    pub max_cstack: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            process_slice: 200,
            step_trace: false,
            profile: false,
            assert_mode: AssertMode::Off,
            max_pstack: 1 << 20,
            max_cstack: 1 << 14,
        }
    }
}

impl VmConfig {
    /// Parse a TOML fragment.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load `sett.toml`-style configuration from disk.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text).map_err(std::io::Error::other)
    }
}
