//! Engine configuration.
//!
//! Settings come from three layers, later layers winning:
//!
//! 1. Built-in defaults ([`EngineConfig::default`])
//! 2. The first `.testmap.toml` found walking up from the working directory
//! 3. `TESTMAP_*` environment variables ([`EnvironmentSnapshot`])
//!
//! ```toml
//! [scan]
//! thread_limit = 0        # 0 = automatic (a quarter of the CPUs, at least 1)
//! update_delay_ms = 1000  # coalescing window for full rescans
//! reparse_delay_ms = 1000 # postponement window for single-file changes
//!
//! [cache]
//! max_generation = 10
//!
//! [[frameworks]]
//! id = "qtest"
//! active = true
//! grouping = true
//! ```

mod core;
mod env;
mod loader;
mod parallel;
pub mod validation;

pub use self::core::{CacheSettings, EngineConfig, FrameworkSettings, ScanSettings};
pub use env::EnvironmentSnapshot;
pub use loader::{
    directory_ancestors, load_config, load_config_from, load_config_in,
    parse_and_validate_config, CONFIG_FILE_NAME,
};
pub use parallel::{effective_thread_limit, hardware_concurrency};
pub use validation::validate_config;
