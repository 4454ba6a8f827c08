//! Core vocabulary shared by the controller, the worker pool and the tree.
//!
//! Everything here is plain data: identifiers, node kinds, the tri-state
//! check flag and the immutable [`ParseResult`] records that cross from
//! worker threads to the engine thread.

pub mod parse_result;

pub use parse_result::ParseResult;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identifier of a test framework (e.g. `"qtest"`, `"gtest"`).
///
/// Cheap to clone; used as the owning-framework back reference of tree nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameworkId(Arc<str>);

impl FrameworkId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FrameworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FrameworkId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Category of a test base, used to scope identity cache aging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseType {
    /// Source-scanning test frameworks (the parsers driven by this crate)
    Framework,
    /// Externally driven test tools whose items are not produced by scanning
    Tool,
}

/// Kind of a discovered test element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    /// Per-framework root node
    Root,
    /// Synthetic node clustering siblings by source directory
    Group,
    Suite,
    Case,
    Function,
    /// Function providing data rows for a data-driven function
    DataFunction,
    /// One data row of a data-driven function
    DataTag,
    /// Setup/teardown style functions
    SpecialFunction,
}

impl TestKind {
    /// Kinds excluded when deriving a parent's check state from its children.
    #[must_use]
    pub fn is_auxiliary(self) -> bool {
        matches!(self, Self::DataFunction | Self::SpecialFunction)
    }

    /// Kinds whose own check state is never recomputed from children.
    #[must_use]
    pub fn skips_revalidation(self) -> bool {
        matches!(self, Self::DataTag | Self::SpecialFunction)
    }

    /// Whether a childless node of this kind is destroyed during a sweep.
    #[must_use]
    pub fn removed_when_empty(self) -> bool {
        matches!(self, Self::Group)
    }

    /// Whether a node of this kind may be placed under a group node.
    #[must_use]
    pub fn is_groupable(self) -> bool {
        matches!(self, Self::Suite | Self::Case)
    }

    /// Whether this kind contributes a segment to qualified names.
    #[must_use]
    pub fn is_named_scope(self) -> bool {
        !matches!(self, Self::Root | Self::Group)
    }
}

/// Tri-state check flag of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Unchecked,
    #[default]
    Checked,
    PartiallyChecked,
}

/// Source location of a test element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: PathBuf,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

impl Location {
    pub fn new(file: impl Into<PathBuf>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    #[must_use]
    pub fn file(&self) -> &Path {
        &self.file
    }
}

/// Whether a scan covers every project file or only a subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    Full,
    Partial,
}

/// Monotonic identifier of one scan, used to discard stale pool messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScanId(pub u64);

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scan#{}", self.0)
    }
}
