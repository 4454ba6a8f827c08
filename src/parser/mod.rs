//! Scan scheduling and execution.
//!
//! - [`controller`]: the debounced state machine deciding when and what to scan
//! - [`debounce`]: timers and the reparse buffer it uses
//! - [`pool`]: the bounded worker pool running framework parsers

pub mod controller;
pub mod debounce;
pub mod pool;

pub use controller::{
    ControllerSignal, Directive, ParserController, ParserState, ScanOutcome, ScanPlan,
};
pub use debounce::{PendingUpdate, UpdateScope};
pub use pool::{PoolMessage, ScanHandle, WorkerPool};
