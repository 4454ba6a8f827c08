use super::NodeId;
use crate::core::{CheckState, FrameworkId, Location, ParseResult, TestKind};
use crate::framework::MatchPolicy;
use std::path::Path;

/// One element of the test tree.
///
/// Structural links (`parent`, `children`) are arena handles owned by
/// [`TestTree`](super::TestTree); nodes never point at each other directly.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub(crate) kind: TestKind,
    pub(crate) name: String,
    pub(crate) location: Option<Location>,
    pub(crate) cache_key: String,
    pub(crate) framework: FrameworkId,
    pub(crate) check_state: CheckState,
    pub(crate) marked_for_removal: bool,
    pub(crate) newly_added: bool,
    pub(crate) failed: bool,
    pub(crate) expanded: bool,
    pub(crate) extra: serde_json::Value,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl Node {
    fn bare(kind: TestKind, framework: FrameworkId, name: String, cache_key: String) -> Self {
        Self {
            kind,
            name,
            location: None,
            cache_key,
            framework,
            check_state: CheckState::Checked,
            marked_for_removal: false,
            newly_added: false,
            failed: false,
            expanded: false,
            extra: serde_json::Value::Null,
            parent: None,
            children: Vec::new(),
        }
    }

    /// Synthetic root of one framework's subtree.
    pub(crate) fn root(framework: FrameworkId, display_name: impl Into<String>) -> Self {
        let key = format!("{framework}:root");
        Self::bare(TestKind::Root, framework, display_name.into(), key)
    }

    /// Group node clustering top-level items of one source directory.
    pub(crate) fn group(framework: FrameworkId, directory: &Path) -> Self {
        let key = group_key(&framework, directory);
        let name = directory
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| directory.display().to_string());
        let mut node = Self::bare(TestKind::Group, framework, name, key);
        node.location = Some(Location::new(directory, 0, 0));
        node.newly_added = true;
        node
    }

    /// Node for one parse result, without its children.
    pub(crate) fn from_result(result: &ParseResult, cache_key: String) -> Self {
        let mut node = Self::bare(
            result.kind,
            result.framework.clone(),
            result.name.clone(),
            cache_key,
        );
        node.location = Some(result.location.clone());
        node.extra = result.extra.clone();
        node.newly_added = true;
        node
    }

    pub fn kind(&self) -> TestKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    pub fn file(&self) -> Option<&Path> {
        self.location.as_ref().map(Location::file)
    }

    /// Position-independent identity used by the identity caches.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn framework(&self) -> &FrameworkId {
        &self.framework
    }

    pub fn check_state(&self) -> CheckState {
        self.check_state
    }

    pub fn is_marked_for_removal(&self) -> bool {
        self.marked_for_removal
    }

    pub fn is_newly_added(&self) -> bool {
        self.newly_added
    }

    /// Whether the last test run reported this node as failed.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn extra(&self) -> &serde_json::Value {
        &self.extra
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Whether `result` describes this node under the given match policy.
    pub(crate) fn matches(&self, result: &ParseResult, policy: MatchPolicy) -> bool {
        if self.kind != result.kind || self.name != result.name {
            return false;
        }
        match policy {
            MatchPolicy::Name => true,
            MatchPolicy::NameAndFile if result.kind.is_groupable() => {
                self.file() == Some(result.file())
            }
            MatchPolicy::NameAndFile => true,
        }
    }
}

pub(crate) fn group_key(framework: &FrameworkId, directory: &Path) -> String {
    format!("{framework}:group:{}", directory.display())
}

/// Cache key of a named node.
///
/// `qualified` is the `::`-joined chain of named ancestors ending with the
/// node's own name.
pub(crate) fn item_key(
    framework: &FrameworkId,
    qualified: &str,
    kind: TestKind,
    file: &Path,
    policy: MatchPolicy,
) -> String {
    match policy {
        MatchPolicy::NameAndFile if kind.is_groupable() => {
            format!("{framework}:{qualified}@{}", file.display())
        }
        _ => format!("{framework}:{qualified}"),
    }
}
