//! Tri-state check propagation.
//!
//! A parent's state is derived from its direct children only:
//!
//! - any partially checked child, or both a checked and an unchecked child,
//!   makes the parent partially checked;
//! - otherwise the parent is unchecked if any child is unchecked, else checked.
//!
//! Data functions and special functions do not take part. Data tags and
//! special functions never have their own state recomputed.

use super::{NodeId, TestTree};
use crate::core::{CheckState, TestKind};

/// Derive a parent's state from `(kind, state)` pairs of its children.
///
/// Returns `None` when no child takes part, in which case the parent keeps
/// whatever state it has.
pub fn derive_check_state<I>(children: I) -> Option<CheckState>
where
    I: IntoIterator<Item = (TestKind, CheckState)>,
{
    let mut found_checked = false;
    let mut found_unchecked = false;
    let mut found_partial = false;
    let mut counted = false;

    for (kind, state) in children {
        if kind.is_auxiliary() {
            continue;
        }
        counted = true;
        match state {
            CheckState::Checked => found_checked = true,
            CheckState::Unchecked => found_unchecked = true,
            CheckState::PartiallyChecked => found_partial = true,
        }
    }

    if !counted {
        None
    } else if found_partial || (found_checked && found_unchecked) {
        Some(CheckState::PartiallyChecked)
    } else if found_unchecked {
        Some(CheckState::Unchecked)
    } else {
        Some(CheckState::Checked)
    }
}

impl TestTree {
    /// Recompute the state of `id` from its children. Returns whether it changed.
    pub(crate) fn revalidate(&mut self, id: NodeId) -> bool {
        let Some(node) = self.get(id) else {
            return false;
        };
        if node.kind.skips_revalidation() {
            return false;
        }
        let derived = derive_check_state(
            node.children
                .iter()
                .filter_map(|&c| self.get(c))
                .map(|c| (c.kind, c.check_state)),
        );
        match (derived, self.get_mut(id)) {
            (Some(state), Some(node)) if node.check_state != state => {
                node.check_state = state;
                true
            }
            _ => false,
        }
    }

    /// Revalidate `id` and walk up while states keep changing.
    ///
    /// Returns every node whose state changed.
    pub(crate) fn revalidate_upwards(&mut self, id: NodeId) -> Vec<NodeId> {
        let mut changed = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            if !self.revalidate(node) {
                break;
            }
            changed.push(node);
            current = self.parent(node);
        }
        changed
    }

    /// Recompute every node of the subtree rooted at `id`, children first.
    pub(crate) fn revalidate_subtree(&mut self, id: NodeId) {
        let order: Vec<NodeId> = self.walk(id).collect();
        for node in order.into_iter().rev() {
            self.revalidate(node);
        }
    }

    /// Set `state` on `id` and, unless partial, on all of its descendants.
    ///
    /// Returns the nodes whose state changed.
    pub(crate) fn cascade_check_state(&mut self, id: NodeId, state: CheckState) -> Vec<NodeId> {
        let targets: Vec<NodeId> = if state == CheckState::PartiallyChecked {
            vec![id]
        } else {
            self.walk(id).collect()
        };
        targets
            .into_iter()
            .filter(|&target| match self.get_mut(target) {
                Some(node) if node.check_state != state => {
                    node.check_state = state;
                    true
                }
                _ => false,
            })
            .collect()
    }

    /// Whether every node with counted children matches the derivation rule.
    pub fn check_states_consistent(&self) -> bool {
        self.iter().all(|(_, node)| {
            if node.kind.skips_revalidation() {
                return true;
            }
            let derived = derive_check_state(
                node.children
                    .iter()
                    .filter_map(|&c| self.get(c))
                    .map(|c| (c.kind, c.check_state)),
            );
            derived.is_none_or(|state| state == node.check_state)
        })
    }
}
