//! Observability: logging setup, panic reporting and per-thread scan context.
//!
//! ## Usage
//!
//! ```ignore
//! use testmap::observability::{
//!     init_logging, install_panic_hook, set_current_file, set_phase, ScanPhase,
//! };
//!
//! init_logging();
//! install_panic_hook();
//! let _phase = set_phase(ScanPhase::Parsing);
//! for file in files {
//!     let _file = set_current_file(&file);
//!     // a caught panic here is reported with the phase and file
//! }
//! ```

pub mod context;
pub mod logging;
pub mod panic_hook;

pub use context::{
    current_context, set_current_file, set_phase, ContextGuard, ScanContextInfo, ScanPhase,
};
pub use logging::{init_logging, LOG_ENV_VAR};
pub use panic_hook::install_panic_hook;
