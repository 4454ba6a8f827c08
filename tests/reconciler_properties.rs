mod common;

use common::{cache_keys, registry, ScriptedParser};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::path::PathBuf;
use testmap::config::FrameworkSettings;
use testmap::{CheckState, FrameworkId, NodeId, ParseResult, TestKind, TreeReconciler};

/// Structure of a generated result; names and locations are assigned later
/// so siblings never collide.
#[derive(Debug, Clone)]
struct Shape {
    kind: TestKind,
    children: Vec<Shape>,
}

fn shape() -> impl Strategy<Value = Shape> {
    let leaf = prop_oneof![
        4 => Just(TestKind::Function),
        1 => Just(TestKind::DataTag),
        1 => Just(TestKind::DataFunction),
    ]
    .prop_map(|kind| Shape {
        kind,
        children: Vec::new(),
    });
    // Four branching levels above the leaves: trees up to depth 5.
    leaf.prop_recursive(4, 48, 4, |inner| {
        (
            prop_oneof![
                Just(TestKind::Suite),
                Just(TestKind::Case),
                Just(TestKind::Function)
            ],
            prop::collection::vec(inner, 0..4),
        )
            .prop_map(|(kind, children)| Shape { kind, children })
    })
}

fn build(shape: &Shape, name: String, file: &str, line: &mut u32) -> ParseResult {
    *line += 1;
    let result = ParseResult::new(FrameworkId::new("A"), shape.kind, name.clone(), file, *line);
    let children: Vec<ParseResult> = shape
        .children
        .iter()
        .enumerate()
        .map(|(i, child)| build(child, format!("{name}_{i}"), file, line))
        .collect();
    result.with_children(children)
}

/// One top-level result per file, spread over two directories.
fn results(shapes: &[Shape]) -> Vec<ParseResult> {
    shapes
        .iter()
        .enumerate()
        .map(|(i, shape)| {
            let file = format!("dir{}/t{i}.cpp", i % 2);
            let mut line = 0;
            build(shape, format!("T{i}"), &file, &mut line)
        })
        .collect()
}

fn reconciler(grouping: bool) -> TreeReconciler {
    let parser = ScriptedParser::new("A");
    let mut registry = registry(&[&parser]);
    registry.apply_settings(&[FrameworkSettings {
        id: "A".to_string(),
        active: true,
        grouping,
    }]);
    let mut reconciler = TreeReconciler::new(10);
    reconciler.sync_frameworks(&registry);
    reconciler
}

fn frameworks() -> Vec<FrameworkId> {
    vec![FrameworkId::new("A")]
}

fn node_ids(reconciler: &TreeReconciler) -> Vec<NodeId> {
    reconciler.tree().iter().map(|(id, _)| id).collect()
}

fn states(reconciler: &TreeReconciler) -> Vec<(String, CheckState)> {
    reconciler
        .tree()
        .iter()
        .map(|(_, n)| (n.cache_key().to_string(), n.check_state()))
        .collect()
}

fn check_state() -> impl Strategy<Value = CheckState> {
    prop_oneof![
        Just(CheckState::Checked),
        Just(CheckState::Unchecked),
        Just(CheckState::PartiallyChecked)
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_reconcile_is_idempotent(
        shapes in prop::collection::vec(shape(), 1..5),
        grouping in any::<bool>(),
    ) {
        let mut r = reconciler(grouping);
        let input = results(&shapes);
        for result in &input {
            r.reconcile(result);
        }
        let before = r.tree().outline();
        let ids = node_ids(&r);

        for result in &input {
            prop_assert!(!r.reconcile(result));
        }
        prop_assert_eq!(r.tree().outline(), before);
        prop_assert_eq!(node_ids(&r), ids);
    }

    #[test]
    fn prop_full_rescan_matches_fresh_build(
        shapes in prop::collection::vec(shape(), 1..6),
        keep in prop::collection::vec(any::<bool>(), 6),
        grouping in any::<bool>(),
    ) {
        let input = results(&shapes);
        let kept: Vec<ParseResult> = input
            .iter()
            .zip(&keep)
            .filter(|(_, keep)| **keep)
            .map(|(result, _)| result.clone())
            .collect();

        let mut r = reconciler(grouping);
        for result in &input {
            r.reconcile(result);
        }
        r.mark_all_for_removal(&frameworks());
        for result in &kept {
            r.reconcile(result);
        }
        r.sweep();

        let mut fresh = reconciler(grouping);
        for result in &kept {
            fresh.reconcile(result);
        }
        prop_assert_eq!(cache_keys(r.tree()), cache_keys(fresh.tree()));
        prop_assert!(r.tree().iter().all(|(_, n)| !n.is_marked_for_removal()));
        prop_assert!(r.tree().check_states_consistent());
    }

    #[test]
    fn prop_partial_rescan_keeps_identity(
        shapes in prop::collection::vec(shape(), 1..5),
        rescanned in 0usize..5,
        toggles in prop::collection::vec((any::<prop::sample::Index>(), check_state()), 0..8),
    ) {
        let input = results(&shapes);
        let mut r = reconciler(false);
        for result in &input {
            r.reconcile(result);
        }
        for (index, state) in &toggles {
            let ids = node_ids(&r);
            r.set_check_state(ids[index.index(ids.len())], *state);
        }
        let ids = node_ids(&r);
        let before = states(&r);

        let target = &input[rescanned % input.len()];
        let files: BTreeSet<PathBuf> = [target.file().to_path_buf()].into();
        r.mark_files_for_removal(&files, &frameworks());
        r.reconcile(target);
        r.sweep();

        prop_assert_eq!(node_ids(&r), ids);
        prop_assert_eq!(states(&r), before);
    }

    #[test]
    fn prop_check_states_stay_consistent(
        shapes in prop::collection::vec(shape(), 1..5),
        toggles in prop::collection::vec((any::<prop::sample::Index>(), check_state()), 1..16),
        grouping in any::<bool>(),
    ) {
        let mut r = reconciler(grouping);
        for result in results(&shapes) {
            r.reconcile(&result);
        }
        prop_assert!(r.tree().check_states_consistent());

        for (index, state) in toggles {
            let ids = node_ids(&r);
            r.set_check_state(ids[index.index(ids.len())], state);
            prop_assert!(r.tree().check_states_consistent());
        }
    }
}

#[test]
fn test_deleted_function_state_survives_until_evicted() {
    let mut r = reconciler(false);
    let foo = |functions: &[&str]| common::case("A", "Foo", "a.cpp", functions);

    r.reconcile(&foo(&["bar", "baz"]));
    let bar = r.tree().find_by_cache_key("A:Foo::bar").unwrap();
    r.set_check_state(bar, CheckState::Unchecked);

    // `bar` disappears from the source.
    r.refresh_caches(None);
    r.mark_all_for_removal(&frameworks());
    r.reconcile(&foo(&["baz"]));
    r.sweep();
    assert_eq!(r.tree().find_by_cache_key("A:Foo::bar"), None);

    // It comes back within the eviction window.
    r.refresh_caches(None);
    r.reconcile(&foo(&["bar", "baz"]));
    let bar = r.tree().find_by_cache_key("A:Foo::bar").unwrap();
    assert_eq!(r.tree().get(bar).unwrap().check_state(), CheckState::Unchecked);
}
