//! Kernel configuration.
//!
//! ```toml
//! mode = "live"
//! max_steps_per_tick = 100
//! max_transient_retries = 3
//!
//! [log]
//! path = "trace.jsonl"
//! sync = "flush"
//!
//! [default_quota]
//! max_ticks = 50
//! max_tool_calls = 20
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cadence_kernel_exec::{ResourceQuota, SchedulerConfig};
use cadence_kernel_failure::FailureConfig;
use cadence_kernel_log::SyncMode;
use cadence_types::KernelMode;

use crate::error::{KernelError, KernelResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub mode: KernelMode,
    pub max_steps_per_tick: u64,
    pub max_transient_retries: u32,
    pub log: LogConfig,
    /// Applied to every spawned agent.
    pub default_quota: Option<QuotaConfig>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            mode: KernelMode::Live,
            max_steps_per_tick: 100,
            max_transient_retries: 3,
            log: LogConfig::default(),
            default_quota: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// JSON Lines file backing the execution log. In-memory when unset.
    pub path: Option<PathBuf>,
    pub sync: SyncMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub max_ticks: u64,
    pub max_tool_calls: u64,
}

impl From<QuotaConfig> for ResourceQuota {
    fn from(q: QuotaConfig) -> Self {
        ResourceQuota {
            max_ticks: q.max_ticks,
            max_tool_calls: q.max_tool_calls,
        }
    }
}

impl KernelConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> KernelResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(s: &str) -> KernelResult<Self> {
        toml::from_str(s).map_err(|e| KernelError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> KernelResult<String> {
        toml::to_string(self).map_err(|e| KernelError::Config(e.to_string()))
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_steps: self.max_steps_per_tick,
        }
    }

    pub fn failure(&self) -> FailureConfig {
        FailureConfig {
            max_transient_retries: self.max_transient_retries,
        }
    }
}
