//! Node topology maps and storage-key sanitization.
//!
//! Topology is always a node-name → group-name map. `BTreeMap` keeps
//! iteration (and therefore batching) deterministic.

use std::collections::BTreeMap;

/// Node name → logical group name.
pub type NodeMap = BTreeMap<String, String>;

/// Group assigned to nodes the topology resolver did not group explicitly.
pub const DEFAULT_GROUP_NAME: &str = "default";

/// Storage keys cannot contain `.`, so persisted node names use the
/// one-dot-leader character in its place.
const DOT_REPLACEMENT: char = '\u{2024}';

/// Replace dots in a node name with the storage-safe substitute.
pub fn sanitize_node_name(name: &str) -> String {
    name.replace('.', &DOT_REPLACEMENT.to_string())
}

/// Undo [`sanitize_node_name`].
pub fn restore_node_name(name: &str) -> String {
    name.replace(DOT_REPLACEMENT, ".")
}

/// Sanitize every node name in a map, preserving group assignments.
pub fn sanitize_node_map(nodes: &NodeMap) -> NodeMap {
    nodes
        .iter()
        .map(|(node, group)| (sanitize_node_name(node), group.clone()))
        .collect()
}

/// Remove every node present in `test` from `control`.
///
/// A node cannot be its own baseline; resolvers may legitimately return
/// overlapping sets (e.g. a multi-phase rollout that reuses hosts).
pub fn strip_overlap(control: &mut NodeMap, test: &NodeMap) {
    for node in test.keys() {
        control.remove(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn nodes(names: &[&str]) -> NodeMap {
        names
            .iter()
            .map(|n| (n.to_string(), DEFAULT_GROUP_NAME.to_string()))
            .collect()
    }

    #[test]
    fn sanitize_replaces_every_dot() {
        let sanitized = sanitize_node_name("ip-10.0.3.41.ec2.internal");
        assert!(!sanitized.contains('.'));
        assert_eq!(restore_node_name(&sanitized), "ip-10.0.3.41.ec2.internal");
    }

    #[test]
    fn sanitize_map_keeps_groups() {
        let mut map = NodeMap::new();
        map.insert("pod.a".to_string(), "canary".to_string());
        let sanitized = sanitize_node_map(&map);
        assert_eq!(sanitized.values().next().unwrap(), "canary");
        assert!(!sanitized.keys().next().unwrap().contains('.'));
    }

    #[test]
    fn strip_overlap_removes_shared_nodes() {
        let test = nodes(&["host-1", "host-2"]);
        let mut control = nodes(&["host-2", "host-3"]);
        strip_overlap(&mut control, &test);
        assert_eq!(control, nodes(&["host-3"]));
    }

    #[test]
    fn strip_overlap_with_disjoint_sets_is_noop() {
        let test = nodes(&["a"]);
        let mut control = nodes(&["b", "c"]);
        strip_overlap(&mut control, &test);
        assert_eq!(control.len(), 2);
    }

    proptest! {
        #[test]
        fn sanitize_round_trips(name in "[a-z0-9.\\-]{0,40}") {
            prop_assert_eq!(restore_node_name(&sanitize_node_name(&name)), name);
        }

        #[test]
        fn stripped_control_is_disjoint_from_test(
            test_names in proptest::collection::btree_set("[a-z]{1,6}", 0..8),
            control_names in proptest::collection::btree_set("[a-z]{1,6}", 0..8),
        ) {
            let test: NodeMap = test_names
                .iter()
                .map(|n| (n.clone(), DEFAULT_GROUP_NAME.to_string()))
                .collect();
            let mut control: NodeMap = control_names
                .iter()
                .map(|n| (n.clone(), DEFAULT_GROUP_NAME.to_string()))
                .collect();
            strip_overlap(&mut control, &test);
            prop_assert!(control.keys().all(|n| !test.contains_key(n)));
        }
    }
}
