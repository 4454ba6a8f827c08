//! The pluggable framework parser capability.
//!
//! A framework parser turns one source file into zero or more hierarchical
//! [`ParseResult`]s. The controller, the worker pool and the reconciler only
//! ever see this trait and the [`Framework`] descriptor wrapping it; concrete
//! test technologies live outside this crate.
//!
//! # Contract
//!
//! - `init` runs once on the engine thread before a scan starts.
//! - `process_file` runs on pool threads, concurrently for distinct files.
//!   It should poll [`ScanContext::is_canceled`] during long work.
//! - `release` runs once after the scan completes to drop transient caches.

pub mod registry;

pub use registry::FrameworkRegistry;

use crate::core::{BaseType, FrameworkId, ParseResult, ScanId, ScanKind};
use crate::errors::ParseError;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Extracts test elements for one framework.
pub trait FrameworkParser: Send + Sync {
    /// File extensions (without the dot) this parser wants to see even when
    /// the project does not report the file as indexed.
    fn supported_extensions(&self) -> Vec<String>;

    /// Prepare for a scan over `files`.
    fn init(&self, _files: &BTreeSet<PathBuf>, _full_scan: bool) {}

    /// Extract results for a single file. An empty list means the file was
    /// not recognized and the next parser in priority order gets a chance.
    fn process_file(
        &self,
        path: &Path,
        ctx: &ScanContext,
    ) -> Result<Vec<ParseResult>, ParseError>;

    /// Free transient state after a scan completed.
    fn release(&self) {}
}

/// How incoming results are matched against existing tree nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPolicy {
    /// Kind and display name identify a node among its siblings.
    #[default]
    Name,
    /// Suites and cases additionally require the same source file.
    NameAndFile,
}

/// A registered framework: metadata plus its parser.
#[derive(Clone)]
pub struct Framework {
    pub id: FrameworkId,
    pub display_name: String,
    /// Lower values are tried first.
    pub priority: u32,
    pub base_type: BaseType,
    pub match_policy: MatchPolicy,
    /// Group top-level suites/cases by source directory.
    pub grouping: bool,
    pub active: bool,
    parser: Arc<dyn FrameworkParser>,
}

impl Framework {
    pub fn new(id: impl Into<FrameworkId>, priority: u32, parser: Arc<dyn FrameworkParser>) -> Self {
        let id = id.into();
        Self {
            display_name: id.to_string(),
            id,
            priority,
            base_type: BaseType::Framework,
            match_policy: MatchPolicy::default(),
            grouping: false,
            active: true,
            parser,
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    #[must_use]
    pub fn with_match_policy(mut self, policy: MatchPolicy) -> Self {
        self.match_policy = policy;
        self
    }

    #[must_use]
    pub fn with_grouping(mut self, grouping: bool) -> Self {
        self.grouping = grouping;
        self
    }

    #[must_use]
    pub fn with_base_type(mut self, base_type: BaseType) -> Self {
        self.base_type = base_type;
        self
    }

    #[must_use]
    pub fn parser(&self) -> &Arc<dyn FrameworkParser> {
        &self.parser
    }
}

impl std::fmt::Debug for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framework")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("base_type", &self.base_type)
            .field("match_policy", &self.match_policy)
            .field("grouping", &self.grouping)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

/// Per-scan information handed to parsers on worker threads.
#[derive(Debug, Clone)]
pub struct ScanContext {
    scan: ScanId,
    kind: ScanKind,
    canceled: Arc<AtomicBool>,
}

impl ScanContext {
    pub fn new(scan: ScanId, kind: ScanKind, canceled: Arc<AtomicBool>) -> Self {
        Self {
            scan,
            kind,
            canceled,
        }
    }

    #[must_use]
    pub fn scan_id(&self) -> ScanId {
        self.scan
    }

    #[must_use]
    pub fn is_full_scan(&self) -> bool {
        self.kind == ScanKind::Full
    }

    /// Cooperative cancellation flag for long-running parser work.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}
