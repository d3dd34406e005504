//! Derived view state: hidden flags and descendant counts
//!
//! Visibility is always recomputed from scratch from the collapse flags and
//! the edge set. It is never patched incrementally.

use std::collections::{HashMap, HashSet};

use crate::models::{Edge, Node, NodeId};

/// Builds a map from each node id to its direct children, in edge order
pub(crate) fn children_map(edges: &[Edge]) -> HashMap<&str, Vec<&str>> {
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        children
            .entry(edge.source_id.as_str())
            .or_default()
            .push(edge.target_id.as_str());
    }
    children
}

/// Nodes with no incoming edge, in node order
pub(crate) fn root_ids<'a>(nodes: &'a [Node], edges: &[Edge]) -> Vec<&'a str> {
    let targets: HashSet<&str> = edges.iter().map(|e| e.target_id.as_str()).collect();
    nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| !targets.contains(id))
        .collect()
}

struct Walk<'a> {
    children: HashMap<&'a str, Vec<&'a str>>,
    collapsed: HashSet<&'a str>,
    hidden: HashSet<NodeId>,
    counts: HashMap<NodeId, usize>,
    visited: HashSet<&'a str>,
}

impl<'a> Walk<'a> {
    fn traverse(&mut self, id: &'a str, ancestor_collapsed: bool) -> usize {
        // A cycle would otherwise recurse forever
        if !self.visited.insert(id) {
            return 0;
        }

        let effectively_collapsed = ancestor_collapsed || self.collapsed.contains(id);
        let children = self.children.get(id).cloned().unwrap_or_default();

        let mut total = 0;
        for child in children {
            if effectively_collapsed {
                self.hidden.insert(child.to_string());
            }
            total += 1 + self.traverse(child, effectively_collapsed);
        }

        self.counts.insert(id.to_string(), total);
        total
    }
}

/// Recomputes `hidden`, `has_children` and `descendant_count` on every node
/// and `hidden` on every edge.
pub fn sync_visibility(nodes: &mut [Node], edges: &mut [Edge]) {
    let (hidden, counts, parents) = {
        let children = children_map(edges);
        let parents: HashSet<NodeId> = children.keys().map(|id| id.to_string()).collect();
        let roots = root_ids(nodes, edges);

        let mut walk = Walk {
            children,
            collapsed: nodes
                .iter()
                .filter(|n| n.is_collapsed)
                .map(|n| n.id.as_str())
                .collect(),
            hidden: HashSet::new(),
            counts: HashMap::new(),
            visited: HashSet::new(),
        };
        for root in roots {
            walk.traverse(root, false);
        }
        (walk.hidden, walk.counts, parents)
    };

    for node in nodes.iter_mut() {
        node.hidden = hidden.contains(&node.id);
        node.has_children = parents.contains(&node.id);
        node.descendant_count = counts.get(&node.id).copied().unwrap_or(0);
    }

    for edge in edges.iter_mut() {
        edge.hidden = hidden.contains(&edge.source_id) || hidden.contains(&edge.target_id);
    }
}
