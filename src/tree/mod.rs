//! The persistent test tree.
//!
//! Nodes live in an arena owned by [`TestTree`] and are addressed by
//! generational [`NodeId`] handles. A handle to a destroyed node never
//! resolves again, even after its slot is reused, so consumers holding stale
//! ids after a sweep simply get `None`.
//!
//! The tree is mutated only by the [`TreeReconciler`] on the engine thread.

pub mod cache;
pub mod check_state;
pub mod node;
pub mod reconciler;

pub use cache::{CacheSnapshot, IdentityCache};
pub use check_state::derive_check_state;
pub use node::Node;
pub use reconciler::{CacheSnapshots, TreeReconciler};

use crate::core::FrameworkId;
use std::fmt::Write as _;

/// Handle to a node in a [`TestTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: usize,
    generation: u32,
}

#[derive(Debug, Default, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena of test nodes with one root per framework.
#[derive(Debug, Default, Clone)]
pub struct TestTree {
    slots: Vec<Slot>,
    free: Vec<usize>,
    roots: Vec<NodeId>,
    len: usize,
}

impl TestTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes, roots included.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Framework roots in framework priority order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn root_for(&self, framework: &FrameworkId) -> Option<NodeId> {
        self.roots
            .iter()
            .copied()
            .find(|&id| self.get(id).is_some_and(|n| &n.framework == framework))
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map_or(&[], |n| n.children.as_slice())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent)
    }

    /// Ancestors of `id`, nearest first, ending with its framework root.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&p| self.parent(p))
    }

    /// Pre-order walk of the subtree rooted at `id`, including `id`.
    pub fn walk(&self, id: NodeId) -> Walk<'_> {
        let stack = if self.contains(id) { vec![id] } else { Vec::new() };
        Walk { tree: self, stack }
    }

    /// Pre-order walk over every framework subtree.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.roots
            .iter()
            .flat_map(move |&root| self.walk(root))
            .filter_map(move |id| self.get(id).map(|n| (id, n)))
    }

    /// First node carrying `key`.
    pub fn find_by_cache_key(&self, key: &str) -> Option<NodeId> {
        self.iter()
            .find(|(_, node)| node.cache_key == key)
            .map(|(id, _)| id)
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        self.len += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.node = Some(node);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        }
    }

    /// Insert a framework root at `position` among the roots.
    pub(crate) fn insert_root(&mut self, position: usize, mut node: Node) -> NodeId {
        node.parent = None;
        let id = self.alloc(node);
        let position = position.min(self.roots.len());
        self.roots.insert(position, id);
        id
    }

    /// Reorder the roots by a key derived from each root node.
    pub(crate) fn sort_roots<K: Ord>(&mut self, mut key: impl FnMut(&Node) -> K) {
        let mut roots = std::mem::take(&mut self.roots);
        roots.sort_by_key(|&id| self.get(id).map(&mut key));
        self.roots = roots;
    }

    /// Append `node` as the last child of `parent`.
    ///
    /// Returns `None` when `parent` no longer exists.
    pub(crate) fn append_child(&mut self, parent: NodeId, mut node: Node) -> Option<NodeId> {
        if !self.contains(parent) {
            return None;
        }
        node.parent = Some(parent);
        node.children.clear();
        let id = self.alloc(node);
        if let Some(p) = self.get_mut(parent) {
            p.children.push(id);
        }
        Some(id)
    }

    /// Destroy `id` and its whole subtree, detaching it from its parent.
    ///
    /// Returns the number of destroyed nodes.
    pub(crate) fn remove(&mut self, id: NodeId) -> usize {
        let Some(node) = self.get(id) else {
            return 0;
        };
        match node.parent {
            Some(parent) => {
                if let Some(p) = self.get_mut(parent) {
                    p.children.retain(|&c| c != id);
                }
            }
            None => self.roots.retain(|&r| r != id),
        }

        let doomed: Vec<NodeId> = self.walk(id).collect();
        for &victim in &doomed {
            let slot = &mut self.slots[victim.index];
            slot.node = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(victim.index);
        }
        self.len -= doomed.len();
        doomed.len()
    }

    /// Destroy every child of `id`, keeping `id` itself.
    pub(crate) fn remove_children(&mut self, id: NodeId) -> usize {
        let children = self.children(id).to_vec();
        children.into_iter().map(|child| self.remove(child)).sum()
    }

    /// Indented text rendering: one line per node with its check state.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        for &root in &self.roots {
            self.outline_into(root, 0, &mut out);
        }
        out
    }

    fn outline_into(&self, id: NodeId, depth: usize, out: &mut String) {
        let Some(node) = self.get(id) else {
            return;
        };
        let mark = match node.check_state {
            crate::core::CheckState::Checked => "x",
            crate::core::CheckState::Unchecked => " ",
            crate::core::CheckState::PartiallyChecked => "~",
        };
        let _ = writeln!(
            out,
            "{:indent$}[{mark}] {} ({})",
            "",
            node.name,
            node.cache_key,
            indent = depth * 2
        );
        for &child in &node.children {
            self.outline_into(child, depth + 1, out);
        }
    }
}

/// Pre-order iterator returned by [`TestTree::walk`].
pub struct Walk<'a> {
    tree: &'a TestTree,
    stack: Vec<NodeId>,
}

impl Iterator for Walk<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.tree.children(id).iter().rev().copied());
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ParseResult, TestKind};

    fn leaf(name: &str) -> Node {
        let result = ParseResult::new("A".into(), TestKind::Function, name, "a.cpp", 1);
        Node::from_result(&result, format!("A:{name}"))
    }

    #[test]
    fn test_walk_is_pre_order() {
        let mut tree = TestTree::new();
        let root = tree.insert_root(0, Node::root("A".into(), "A"));
        let a = tree.append_child(root, leaf("a")).unwrap();
        tree.append_child(a, leaf("a1")).unwrap();
        tree.append_child(root, leaf("b")).unwrap();

        let names: Vec<_> = tree
            .walk(root)
            .map(|id| tree.get(id).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["A", "a", "a1", "b"]);
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_removed_handles_never_resolve_again() {
        let mut tree = TestTree::new();
        let root = tree.insert_root(0, Node::root("A".into(), "A"));
        let a = tree.append_child(root, leaf("a")).unwrap();
        let a1 = tree.append_child(a, leaf("a1")).unwrap();

        assert_eq!(tree.remove(a), 2);
        assert!(!tree.contains(a));
        assert!(!tree.contains(a1));
        assert!(tree.children(root).is_empty());

        let b = tree.append_child(root, leaf("b")).unwrap();
        assert!(tree.contains(b));
        assert!(!tree.contains(a1));
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_roots_keep_insertion_position() {
        let mut tree = TestTree::new();
        tree.insert_root(0, Node::root("B".into(), "B"));
        tree.insert_root(0, Node::root("A".into(), "A"));
        let ids: Vec<_> = tree
            .roots()
            .iter()
            .map(|&r| tree.get(r).unwrap().framework().to_string())
            .collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert!(tree.root_for(&"B".into()).is_some());
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let mut tree = TestTree::new();
        let root = tree.insert_root(0, Node::root("A".into(), "A"));
        let a = tree.append_child(root, leaf("a")).unwrap();
        let a1 = tree.append_child(a, leaf("a1")).unwrap();
        assert_eq!(tree.ancestors(a1).collect::<Vec<_>>(), vec![a, root]);
    }
}
