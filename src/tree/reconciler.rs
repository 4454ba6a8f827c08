//! Incremental merge of parse results into the test tree.
//!
//! Scans never rebuild the tree. Before a scan the affected nodes are marked
//! for removal; every incoming [`ParseResult`] either clears the mark of the
//! node it matches (updating changed attributes) or creates a new subtree;
//! after the scan [`TreeReconciler::sweep`] destroys whatever is still
//! marked. Nodes that survive keep their check, fail and expand state, and
//! new nodes get those back from the identity caches by cache key.

use super::cache::{CacheSnapshot, IdentityCache};
use super::node::{group_key, item_key, Node};
use super::{NodeId, TestTree};
use crate::core::{BaseType, CheckState, FrameworkId, ParseResult, TestKind};
use crate::framework::{FrameworkRegistry, MatchPolicy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameworkRules {
    match_policy: MatchPolicy,
    grouping: bool,
    base_type: BaseType,
}

impl Default for FrameworkRules {
    fn default() -> Self {
        Self {
            match_policy: MatchPolicy::Name,
            grouping: false,
            base_type: BaseType::Framework,
        }
    }
}

/// Serializable contents of all three identity caches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshots {
    pub check: CacheSnapshot<CheckState>,
    pub failed: CacheSnapshot<bool>,
    pub expanded: CacheSnapshot<bool>,
}

/// Owner of the test tree and its identity caches.
#[derive(Debug, Clone)]
pub struct TreeReconciler {
    tree: TestTree,
    rules: HashMap<FrameworkId, FrameworkRules>,
    check_cache: IdentityCache<CheckState>,
    failed_cache: IdentityCache<bool>,
    expanded_cache: IdentityCache<bool>,
}

impl Default for TreeReconciler {
    fn default() -> Self {
        Self::new(super::cache::DEFAULT_MAX_GENERATION)
    }
}

/// State a node gets when nothing is cached for it.
fn inherited_state(parent: CheckState) -> CheckState {
    match parent {
        CheckState::Unchecked => CheckState::Unchecked,
        _ => CheckState::Checked,
    }
}

impl TreeReconciler {
    pub fn new(max_generation: u32) -> Self {
        Self {
            tree: TestTree::new(),
            rules: HashMap::new(),
            check_cache: IdentityCache::new(max_generation),
            failed_cache: IdentityCache::new(max_generation),
            expanded_cache: IdentityCache::new(max_generation),
        }
    }

    pub fn tree(&self) -> &TestTree {
        &self.tree
    }

    pub fn check_cache(&self) -> &IdentityCache<CheckState> {
        &self.check_cache
    }

    pub fn failed_cache(&self) -> &IdentityCache<bool> {
        &self.failed_cache
    }

    pub fn expanded_cache(&self) -> &IdentityCache<bool> {
        &self.expanded_cache
    }

    fn rules_for(&self, framework: &FrameworkId) -> FrameworkRules {
        self.rules.get(framework).copied().unwrap_or_default()
    }

    /// Make the framework roots match the active frameworks of `registry`.
    ///
    /// Roots of deactivated frameworks are destroyed, new roots are created,
    /// and roots are ordered by priority. A framework whose grouping setting
    /// changed loses its items so the next scan rebuilds them in the new
    /// layout. Returns whether the tree changed.
    pub fn sync_frameworks(&mut self, registry: &FrameworkRegistry) -> bool {
        let active: Vec<_> = registry.active().collect();
        let mut changed = false;

        for root in self.tree.roots().to_vec() {
            let Some(framework) = self.tree.get(root).map(|n| n.framework.clone()) else {
                continue;
            };
            if !active.iter().any(|f| f.id == framework) {
                debug!(%framework, "removing root of inactive framework");
                self.remember_subtree(root);
                self.tree.remove(root);
                self.rules.remove(&framework);
                changed = true;
            }
        }

        for (position, framework) in active.iter().enumerate() {
            let rules = FrameworkRules {
                match_policy: framework.match_policy,
                grouping: framework.grouping,
                base_type: framework.base_type,
            };
            let previous = self.rules.insert(framework.id.clone(), rules);

            match self.tree.root_for(&framework.id) {
                Some(root) => {
                    if previous.is_some_and(|p| p.grouping != rules.grouping) {
                        debug!(framework = %framework.id, grouping = rules.grouping, "grouping changed, dropping items");
                        self.remember_subtree(root);
                        changed |= self.tree.remove_children(root) > 0;
                    }
                    if let Some(node) = self.tree.get_mut(root) {
                        node.name.clone_from(&framework.display_name);
                    }
                }
                None => {
                    let node = Node::root(framework.id.clone(), framework.display_name.clone());
                    self.tree.insert_root(position, node);
                    changed = true;
                }
            }
        }

        let order: Vec<FrameworkId> = active.iter().map(|f| f.id.clone()).collect();
        self.tree.sort_roots(|node| {
            order
                .iter()
                .position(|id| id == &node.framework)
                .unwrap_or(usize::MAX)
        });
        changed
    }

    /// Merge one file's result into the tree. Returns whether the tree changed.
    pub fn reconcile(&mut self, result: &ParseResult) -> bool {
        let Some(root) = self.tree.root_for(&result.framework) else {
            debug!(framework = %result.framework, file = %result.file().display(), "dropping result of inactive framework");
            return false;
        };
        let rules = self.rules_for(&result.framework);
        self.merge_into(root, result, rules)
    }

    fn merge_into(&mut self, parent: NodeId, result: &ParseResult, rules: FrameworkRules) -> bool {
        match self.find_match(parent, result, rules.match_policy) {
            Some(existing) => self.update_existing(existing, result, rules),
            None => {
                self.insert_new(parent, result, rules);
                true
            }
        }
    }

    /// Find the child of `parent` matching `result`, looking inside group
    /// nodes when `parent` is a framework root.
    fn find_match(&self, parent: NodeId, result: &ParseResult, policy: MatchPolicy) -> Option<NodeId> {
        let tree = &self.tree;
        let is_match = |id: &NodeId| tree.get(*id).is_some_and(|n| n.matches(result, policy));

        if let Some(found) = tree.children(parent).iter().copied().find(is_match) {
            return Some(found);
        }
        if tree.get(parent)?.kind != TestKind::Root {
            return None;
        }
        tree.children(parent)
            .iter()
            .copied()
            .filter(|&c| tree.get(c).is_some_and(|n| n.kind == TestKind::Group))
            .flat_map(|group| tree.children(group).iter().copied())
            .find(is_match)
    }

    fn update_existing(&mut self, id: NodeId, result: &ParseResult, rules: FrameworkRules) -> bool {
        let mut changed = false;
        let mut parent = None;
        if let Some(node) = self.tree.get_mut(id) {
            node.marked_for_removal = false;
            if node.location.as_ref() != Some(&result.location) {
                node.location = Some(result.location.clone());
                changed = true;
            }
            if node.extra != result.extra {
                node.extra = result.extra.clone();
                changed = true;
            }
            parent = node.parent;
        }
        if let Some(group) = parent.and_then(|p| self.tree.get_mut(p)) {
            if group.kind == TestKind::Group {
                group.marked_for_removal = false;
            }
        }

        for child in &result.children {
            changed |= self.merge_into(id, child, rules);
        }
        changed
    }

    fn insert_new(&mut self, parent: NodeId, result: &ParseResult, rules: FrameworkRules) {
        let target = self.insertion_parent(parent, result, rules);
        let inherited = self
            .tree
            .get(target)
            .map_or(CheckState::Checked, |p| inherited_state(p.check_state));
        let Some(id) = self.build_subtree(target, result, rules, inherited) else {
            return;
        };
        self.tree.revalidate_subtree(id);
        self.tree.revalidate_upwards(target);
        if target != parent {
            // The group may itself be new.
            self.tree.revalidate_upwards(parent);
        }
    }

    /// Append `result` and its descendants under `parent` without revalidating.
    ///
    /// Uncached nodes inherit from the restored state of their new parent, so
    /// the outcome does not depend on sibling order.
    fn build_subtree(
        &mut self,
        parent: NodeId,
        result: &ParseResult,
        rules: FrameworkRules,
        inherited: CheckState,
    ) -> Option<NodeId> {
        let qualified = match self.qualified_name(parent) {
            Some(prefix) => format!("{prefix}::{}", result.name),
            None => result.name.clone(),
        };
        let key = item_key(
            &result.framework,
            &qualified,
            result.kind,
            result.file(),
            rules.match_policy,
        );
        trace!(%key, "inserting node");

        let mut node = Node::from_result(result, key);
        self.restore_cached(&mut node, inherited);
        let handed_down = inherited_state(node.check_state);

        let id = self.tree.append_child(parent, node)?;
        for child in &result.children {
            // Duplicate entries within one result merge into the first.
            match self.find_match(id, child, rules.match_policy) {
                Some(existing) => {
                    self.update_existing(existing, child, rules);
                }
                None => {
                    self.build_subtree(id, child, rules, handed_down);
                }
            }
        }
        Some(id)
    }

    /// Parent a new node is attached under, creating its group on demand.
    fn insertion_parent(&mut self, parent: NodeId, result: &ParseResult, rules: FrameworkRules) -> NodeId {
        let parent_is_root = self.tree.get(parent).is_some_and(|n| n.kind == TestKind::Root);
        if !rules.grouping || !parent_is_root || !result.kind.is_groupable() {
            return parent;
        }
        let Some(directory) = result
            .file()
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
        else {
            return parent;
        };

        let key = group_key(&result.framework, directory);
        let existing = self
            .tree
            .children(parent)
            .iter()
            .copied()
            .find(|&c| self.tree.get(c).is_some_and(|n| n.kind == TestKind::Group && n.cache_key == key));
        if let Some(group) = existing {
            if let Some(node) = self.tree.get_mut(group) {
                node.marked_for_removal = false;
            }
            return group;
        }

        let inherited = self
            .tree
            .get(parent)
            .map_or(CheckState::Checked, |p| inherited_state(p.check_state));
        let mut group = Node::group(result.framework.clone(), directory);
        self.restore_cached(&mut group, inherited);
        self.tree.append_child(parent, group).unwrap_or(parent)
    }

    fn restore_cached(&mut self, node: &mut Node, inherited: CheckState) {
        node.check_state = self.check_cache.get(&node.cache_key).unwrap_or(inherited);
        node.failed = self.failed_cache.get(&node.cache_key).unwrap_or(false);
        node.expanded = self.expanded_cache.get(&node.cache_key).unwrap_or(false);
    }

    /// `::`-joined names of `id` and its named ancestors, outermost first.
    fn qualified_name(&self, id: NodeId) -> Option<String> {
        let mut names: Vec<&str> = std::iter::once(id)
            .chain(self.tree.ancestors(id))
            .filter_map(|n| self.tree.get(n))
            .filter(|n| n.kind.is_named_scope())
            .map(|n| n.name.as_str())
            .collect();
        if names.is_empty() {
            return None;
        }
        names.reverse();
        Some(names.join("::"))
    }

    fn scoped_roots(&self, frameworks: &[FrameworkId]) -> Vec<NodeId> {
        frameworks
            .iter()
            .filter_map(|fw| self.tree.root_for(fw))
            .collect()
    }

    /// Mark every item of `frameworks` for removal ahead of a full scan.
    pub fn mark_all_for_removal(&mut self, frameworks: &[FrameworkId]) {
        for root in self.scoped_roots(frameworks) {
            let items: Vec<NodeId> = self.tree.walk(root).skip(1).collect();
            for id in items {
                if let Some(node) = self.tree.get_mut(id) {
                    node.marked_for_removal = true;
                }
            }
        }
    }

    /// Mark items of `files` for removal ahead of a partial scan.
    ///
    /// A node is marked when its own file is in the set and all of its
    /// children ended up marked; everything else is unmarked.
    pub fn mark_files_for_removal(&mut self, files: &BTreeSet<PathBuf>, frameworks: &[FrameworkId]) {
        for root in self.scoped_roots(frameworks) {
            for child in self.tree.children(root).to_vec() {
                self.mark_by_files(child, files);
            }
        }
    }

    fn mark_by_files(&mut self, id: NodeId, files: &BTreeSet<PathBuf>) -> bool {
        let mut mark = self
            .tree
            .get(id)
            .and_then(Node::file)
            .is_some_and(|f| files.contains(f));
        for child in self.tree.children(id).to_vec() {
            let child_marked = self.mark_by_files(child, files);
            mark &= child_marked;
        }
        if let Some(node) = self.tree.get_mut(id) {
            node.marked_for_removal = mark;
        }
        mark
    }

    /// Destroy marked nodes and empty groups. Returns whether the tree changed.
    pub fn sweep(&mut self) -> bool {
        let mut changed = false;
        for root in self.tree.roots().to_vec() {
            changed |= self.sweep_children(root);
        }
        debug!(changed, nodes = self.tree.len(), "swept test tree");
        changed
    }

    fn sweep_children(&mut self, id: NodeId) -> bool {
        let mut changed = false;
        for child in self.tree.children(id).to_vec().into_iter().rev() {
            let Some(node) = self.tree.get(child) else {
                continue;
            };
            let kind = node.kind;
            if kind != TestKind::Root && node.marked_for_removal {
                self.tree.remove(child);
                self.tree.revalidate_upwards(id);
                changed = true;
                continue;
            }
            if node.has_children() {
                changed |= self.sweep_children(child);
            }
            let empty = !self.tree.get(child).is_some_and(Node::has_children);
            if empty && kind.removed_when_empty() {
                self.tree.remove(child);
                self.tree.revalidate_upwards(id);
                changed = true;
            } else if let Some(node) = self.tree.get_mut(child) {
                changed |= std::mem::take(&mut node.newly_added);
            }
        }
        changed
    }

    /// Set a node's check state, cascading down and revalidating ancestors.
    ///
    /// Returns whether any node changed.
    pub fn set_check_state(&mut self, id: NodeId, state: CheckState) -> bool {
        if !self.tree.contains(id) {
            return false;
        }
        let mut changed = self.tree.cascade_check_state(id, state);
        if state == CheckState::PartiallyChecked && self.tree.revalidate(id) {
            changed.push(id);
        }
        if let Some(parent) = self.tree.parent(id) {
            changed.extend(self.tree.revalidate_upwards(parent));
        }

        for node_id in &changed {
            if let Some(node) = self.tree.get(*node_id) {
                if node.kind == TestKind::Root {
                    continue;
                }
                let base = self.rules_for(&node.framework).base_type;
                self.check_cache
                    .insert(node.cache_key.clone(), node.check_state, base);
            }
        }
        !changed.is_empty()
    }

    /// Record whether a node is expanded in the UI.
    pub fn set_expanded(&mut self, id: NodeId, expanded: bool) -> bool {
        let base = match self.tree.get(id) {
            Some(node) => self.rules_for(&node.framework).base_type,
            None => return false,
        };
        let Some(node) = self.tree.get_mut(id) else {
            return false;
        };
        let changed = node.expanded != expanded;
        node.expanded = expanded;
        self.expanded_cache.insert(node.cache_key.clone(), expanded, base);
        changed
    }

    /// Record the outcome of the last test run for a node.
    pub fn mark_failed(&mut self, id: NodeId, failed: bool) -> bool {
        let base = match self.tree.get(id) {
            Some(node) => self.rules_for(&node.framework).base_type,
            None => return false,
        };
        let Some(node) = self.tree.get_mut(id) else {
            return false;
        };
        let changed = node.failed != failed;
        node.failed = failed;
        if failed {
            self.failed_cache.insert(node.cache_key.clone(), true, base);
        } else {
            self.failed_cache.remove(&node.cache_key);
        }
        changed
    }

    /// Forget every failed mark, in the tree and in the cache.
    pub fn clear_failed_marks(&mut self) -> bool {
        let failed: Vec<NodeId> = self
            .tree
            .iter()
            .filter(|(_, n)| n.failed)
            .map(|(id, _)| id)
            .collect();
        for id in &failed {
            if let Some(node) = self.tree.get_mut(*id) {
                node.failed = false;
            }
        }
        self.failed_cache.clear();
        !failed.is_empty()
    }

    /// Age the caches, then re-insert the current values of live nodes.
    ///
    /// Runs at every scan start so entries of nodes that still exist never
    /// age out while entries of vanished nodes do.
    pub fn refresh_caches(&mut self, mask: Option<BaseType>) {
        let evicted = self.check_cache.evolve(mask)
            + self.failed_cache.evolve(mask)
            + self.expanded_cache.evolve(mask);

        for (_, node) in self.tree.iter() {
            if node.kind == TestKind::Root {
                continue;
            }
            let base = self.rules_for(&node.framework).base_type;
            if mask.is_some_and(|m| m != base) {
                continue;
            }
            self.check_cache
                .insert(node.cache_key.clone(), node.check_state, base);
            if node.failed {
                self.failed_cache.insert(node.cache_key.clone(), true, base);
            }
            if node.expanded {
                self.expanded_cache.insert(node.cache_key.clone(), true, base);
            }
        }
        debug!(evicted, cached = self.check_cache.len(), "refreshed identity caches");
    }

    /// Copy the current state of a subtree into the caches.
    fn remember_subtree(&mut self, id: NodeId) {
        for node_id in self.tree.walk(id).skip(1) {
            let Some(node) = self.tree.get(node_id) else {
                continue;
            };
            let base = self.rules_for(&node.framework).base_type;
            self.check_cache
                .insert(node.cache_key.clone(), node.check_state, base);
            if node.failed {
                self.failed_cache.insert(node.cache_key.clone(), true, base);
            }
            if node.expanded {
                self.expanded_cache.insert(node.cache_key.clone(), true, base);
            }
        }
    }

    pub fn clear_caches(&mut self) {
        self.check_cache.clear();
        self.failed_cache.clear();
        self.expanded_cache.clear();
    }

    /// Destroy every item, keeping the framework roots.
    pub fn remove_all_items(&mut self) -> bool {
        let mut removed = 0;
        for root in self.tree.roots().to_vec() {
            removed += self.tree.remove_children(root);
            if let Some(node) = self.tree.get_mut(root) {
                node.check_state = CheckState::Checked;
            }
        }
        removed > 0
    }

    pub fn cache_snapshots(&self) -> CacheSnapshots {
        CacheSnapshots {
            check: self.check_cache.snapshot(),
            failed: self.failed_cache.snapshot(),
            expanded: self.expanded_cache.snapshot(),
        }
    }

    pub fn restore_caches(&mut self, snapshots: CacheSnapshots) {
        self.check_cache.restore(snapshots.check);
        self.failed_cache.restore(snapshots.failed);
        self.expanded_cache.restore(snapshots.expanded);
    }
}
