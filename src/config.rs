// SPDX-License-Identifier: AGPL-3.0-or-later

//! Observer configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.

use crate::error::{Error, Result};
use crate::mask::{MetricMask, PROCESS_ALL, SYSTEM_ALL};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Poll output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Counter binding options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    /// Bind counters by English name first when the OS supports it
    pub prefer_language_neutral: bool,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            prefer_language_neutral: true,
        }
    }
}

/// Process listing options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Enable the debug privilege before listing processes (Windows)
    pub acquire_debug_privilege: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            acquire_debug_privilege: true,
        }
    }
}

/// Polling loop options used by the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub system_mask: u32,
    pub process_mask: u32,
    pub format: OutputFormat,
    pub log_level: LogLevel,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            system_mask: SYSTEM_ALL.bits(),
            process_mask: PROCESS_ALL.bits(),
            format: OutputFormat::Text,
            log_level: LogLevel::Info,
        }
    }
}

impl PollConfig {
    pub fn system_mask(&self) -> MetricMask {
        MetricMask::from_bits(self.system_mask)
    }

    pub fn process_mask(&self) -> MetricMask {
        MetricMask::from_bits(self.process_mask)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub counters: CounterConfig,
    pub snapshot: SnapshotConfig,
    pub poll: PollConfig,
}

impl Config {
    /// Load from TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Parse from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("TOML parse error: {}", e)))?;
        if config.poll.interval_ms == 0 {
            return Err(Error::Config("poll.interval_ms must be positive".to_string()));
        }
        Ok(config)
    }

    /// Generate sample config
    pub fn sample_toml() -> String {
        r#"# Perf Observer configuration

[counters]
# Bind counters by their English names first (Vista and later)
prefer_language_neutral = true

[snapshot]
# Enable SeDebugPrivilege before listing processes (Windows)
acquire_debug_privilege = true

[poll]
interval_ms = 1000
# processes|threads|procusage|pmemusage|pmemusagekb|vmemusage|vmemusagekb|diskusage
system_mask = 255
# handles|threads|procusage|pmemusage|pmemusagekb|vmemusage|vmemusagekb
process_mask = 127
format = "text"
log_level = "info"
"#
        .into()
    }
}
