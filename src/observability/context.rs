//! Thread-local context tracking for failure reports.
//!
//! Worker threads record which file they are parsing so that a panic caught
//! by the pool, or a warning logged deep inside a parser, can name the file
//! and scan phase. Guards restore the previous context on drop, which keeps
//! nested tracking (file within phase) correct on reused rayon threads.

use std::cell::RefCell;
use std::path::PathBuf;

thread_local! {
    static CURRENT_CONTEXT: RefCell<ScanContextInfo> = const { RefCell::new(ScanContextInfo::new()) };
}

/// Context snapshot for the current thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanContextInfo {
    pub phase: Option<ScanPhase>,
    pub current_file: Option<PathBuf>,
}

impl ScanContextInfo {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: None,
            current_file: None,
        }
    }
}

impl std::fmt::Display for ScanContextInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.phase, &self.current_file) {
            (Some(phase), Some(file)) => write!(f, "{phase} {}", file.display()),
            (Some(phase), None) => write!(f, "{phase}"),
            (None, Some(file)) => write!(f, "{}", file.display()),
            (None, None) => write!(f, "<no context>"),
        }
    }
}

/// Phases of one scan cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    /// Choosing files and marking stale nodes
    Planning,
    /// Running framework parsers on pool threads
    Parsing,
    /// Merging results into the tree
    Reconciling,
    /// Removing nodes left marked after a scan
    Sweeping,
}

impl std::fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Planning => write!(f, "planning"),
            Self::Parsing => write!(f, "parsing"),
            Self::Reconciling => write!(f, "reconciling"),
            Self::Sweeping => write!(f, "sweeping"),
        }
    }
}

/// RAII guard restoring the previous context on drop.
pub struct ContextGuard {
    previous: ScanContextInfo,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT_CONTEXT.with(|ctx| {
            *ctx.borrow_mut() = std::mem::take(&mut self.previous);
        });
    }
}

/// Set the current scan phase until the guard drops.
#[must_use]
pub fn set_phase(phase: ScanPhase) -> ContextGuard {
    CURRENT_CONTEXT.with(|ctx| {
        let previous = ctx.borrow().clone();
        ctx.borrow_mut().phase = Some(phase);
        ContextGuard { previous }
    })
}

/// Set the file being processed until the guard drops.
#[must_use]
pub fn set_current_file(path: impl Into<PathBuf>) -> ContextGuard {
    CURRENT_CONTEXT.with(|ctx| {
        let previous = ctx.borrow().clone();
        ctx.borrow_mut().current_file = Some(path.into());
        ContextGuard { previous }
    })
}

/// Get the current context snapshot.
#[must_use]
pub fn current_context() -> ScanContextInfo {
    CURRENT_CONTEXT.with(|ctx| ctx.borrow().clone())
}
