//! Human-readable package names for error messages
//!
//! Packages are identified by hash everywhere that matters; when an error
//! message needs to say *which* dependency broke, a breadth-first search
//! from the root recovers a dotted path of local names. Slow, and only used
//! on the error path.

use crate::package::{PackageGraph, PackageId};
use rustc_hash::FxHashSet;

/// Find a `root.<name>.<name>…` path from `root` to `target`.
///
/// Returns `"<unnamed>"` when the target is unreachable. When `main` differs
/// from `root` it seeds the search as a second origin.
pub fn dotted_name(
    graph: &PackageGraph,
    root: PackageId,
    main: Option<PackageId>,
    target: PackageId,
) -> String {
    if target == root {
        return "root".to_string();
    }

    // Traversal nodes live in one flat list; parent links are indices into
    // it, so the whole search frees in bulk.
    struct Node {
        package: PackageId,
        parent: Option<usize>,
    }

    let mut nodes: Vec<Node> = Vec::new();
    let mut visited: FxHashSet<PackageId> = FxHashSet::default();

    nodes.push(Node {
        package: root,
        parent: None,
    });
    visited.insert(root);
    if let Some(main) = main {
        if visited.insert(main) {
            nodes.push(Node {
                package: main,
                parent: None,
            });
        }
    }

    let mut cursor = 0;
    let found = loop {
        if cursor == nodes.len() {
            return "<unnamed>".to_string();
        }
        let package = nodes[cursor].package;
        if package == target {
            break cursor;
        }
        for &child in graph.get(package).table.values() {
            if visited.insert(child) {
                nodes.push(Node {
                    package: child,
                    parent: Some(cursor),
                });
            }
        }
        cursor += 1;
    };

    // Walk the parent chain upward, recovering each edge's local name from
    // the parent's table.
    let mut segments: Vec<&str> = Vec::new();
    let mut at = found;
    while let Some(parent) = nodes[at].parent {
        let child_id = nodes[at].package;
        let parent_pkg = graph.get(nodes[parent].package);
        let name = parent_pkg
            .table
            .iter()
            .find(|(_, &id)| id == child_id)
            .map(|(name, _)| name.as_str())
            .unwrap_or("<unnamed>");
        segments.push(name);
        at = parent;
    }

    let mut out = String::from("root");
    for segment in segments.iter().rev() {
        out.push('.');
        out.push_str(segment);
    }
    out
}
