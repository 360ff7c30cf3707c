//! Configuration loading
//!
//! TOML file with one section per subsystem. Every field has a default so
//! an empty file, or no file at all, yields a working configuration.

use crate::error::{Error, Result};
use crate::telemetry::LogConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Request hardware offload for admitted flows
pub const TARGET_FLAG_HW: u32 = 1 << 0;

const TARGET_FLAG_MASK: u32 = TARGET_FLAG_HW;

/// Validated per-rule target options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetOptions {
    pub hardware: bool,
}

impl TargetOptions {
    /// Validate a raw flags word. Unknown bits are rejected so old
    /// binaries cannot silently misread options from newer rules.
    pub fn from_flags(flags: u32) -> Result<Self> {
        if flags & !TARGET_FLAG_MASK != 0 {
            return Err(Error::InvalidFlags(flags));
        }
        Ok(Self {
            hardware: flags & TARGET_FLAG_HW != 0,
        })
    }
}

/// Offload subsystem settings
#[derive(Debug, Clone, Deserialize)]
pub struct OffloadConfig {
    /// Admit new flows at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Direct admitted flows to the hardware table
    #[serde(default)]
    pub hardware: bool,
    /// Raw action flags word, as carried by a rule. Validated on load
    /// and overrides `hardware` when present.
    #[serde(default)]
    pub target_flags: Option<u32>,
    /// Interval between periodic hook garbage-collection cycles
    #[serde(default = "default_gc_period_ms")]
    pub gc_period_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_gc_period_ms() -> u64 {
    1000
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            hardware: false,
            target_flags: None,
            gc_period_ms: default_gc_period_ms(),
        }
    }
}

impl OffloadConfig {
    pub fn gc_period(&self) -> Duration {
        Duration::from_millis(self.gc_period_ms)
    }

    /// Validate the raw flags word, if one was given, and fold it into
    /// the table selection. Unknown bits reject the whole config.
    pub fn apply_target_flags(&mut self) -> Result<()> {
        if let Some(flags) = self.target_flags {
            self.hardware = TargetOptions::from_flags(flags)?.hardware;
        }
        Ok(())
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub offload: OffloadConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Load configuration from a TOML file
pub fn load(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let mut config: Config =
        toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    config.offload.apply_target_flags()?;
    Ok(config)
}
