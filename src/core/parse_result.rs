use super::{FrameworkId, Location, TestKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Immutable output of scanning one file: a small tree of test elements.
///
/// Framework parsers build these on worker threads; the engine thread
/// consumes them and either updates an existing tree node or builds a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub framework: FrameworkId,
    pub kind: TestKind,
    pub name: String,
    pub location: Location,
    #[serde(default)]
    pub children: Vec<ParseResult>,
    /// Framework-specific payload carried onto the tree node untouched.
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl ParseResult {
    pub fn new(
        framework: FrameworkId,
        kind: TestKind,
        name: impl Into<String>,
        file: impl Into<PathBuf>,
        line: u32,
    ) -> Self {
        Self {
            framework,
            kind,
            name: name.into(),
            location: Location::new(file, line, 0),
            children: Vec::new(),
            extra: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_child(mut self, child: ParseResult) -> Self {
        self.children.push(child);
        self
    }

    #[must_use]
    pub fn with_children(mut self, children: impl IntoIterator<Item = ParseResult>) -> Self {
        self.children.extend(children);
        self
    }

    #[must_use]
    pub fn with_column(mut self, column: u32) -> Self {
        self.location.column = column;
        self
    }

    #[must_use]
    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = extra;
        self
    }

    #[must_use]
    pub fn file(&self) -> &Path {
        &self.location.file
    }

    /// Number of records in this result including itself.
    #[must_use]
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(ParseResult::node_count).sum::<usize>()
    }
}
