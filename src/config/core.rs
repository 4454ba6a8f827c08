use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::parallel::effective_thread_limit;

fn default_update_delay_ms() -> u64 {
    1000
}

fn default_reparse_delay_ms() -> u64 {
    1000
}

fn default_max_generation() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

/// Root configuration structure for the engine
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EngineConfig {
    /// Scan scheduling and concurrency
    #[serde(default)]
    pub scan: ScanSettings,

    /// Identity cache aging
    #[serde(default)]
    pub cache: CacheSettings,

    /// Per-framework activation and grouping, in the user's order
    #[serde(default)]
    pub frameworks: Vec<FrameworkSettings>,
}

/// Scan scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanSettings {
    /// Maximum concurrent parser calls per scan (0 = automatic)
    #[serde(default)]
    pub thread_limit: usize,

    /// Coalescing window for full update requests
    #[serde(default = "default_update_delay_ms")]
    pub update_delay_ms: u64,

    /// Postponement window for single-file change notifications
    #[serde(default = "default_reparse_delay_ms")]
    pub reparse_delay_ms: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            thread_limit: 0,
            update_delay_ms: default_update_delay_ms(),
            reparse_delay_ms: default_reparse_delay_ms(),
        }
    }
}

impl ScanSettings {
    /// Concurrency actually used for a scan.
    pub fn effective_thread_limit(&self) -> usize {
        effective_thread_limit(self.thread_limit)
    }

    pub fn update_delay(&self) -> Duration {
        Duration::from_millis(self.update_delay_ms)
    }

    pub fn reparse_delay(&self) -> Duration {
        Duration::from_millis(self.reparse_delay_ms)
    }
}

/// Identity cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSettings {
    /// Number of unread generations an entry survives before eviction
    #[serde(default = "default_max_generation")]
    pub max_generation: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_generation: default_max_generation(),
        }
    }
}

/// User settings for one framework.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameworkSettings {
    pub id: String,

    #[serde(default = "default_true")]
    pub active: bool,

    /// Group top-level tests by source directory
    #[serde(default)]
    pub grouping: bool,
}
