//! Top-down tree layout
//!
//! A pure function of the node and edge lists: depth decides the row,
//! leaves are spread left to right in tree order and every parent is
//! centred over its children.

use std::collections::{HashMap, HashSet};

use crate::models::{Edge, Node, NodeId, Position};
use crate::visibility::{children_map, root_ids};

/// Spacing parameters for [`layout`]
#[derive(Debug, Clone, Copy)]
pub struct LayoutConfig {
    pub left: f64,
    pub top: f64,
    pub column_width: f64,
    pub row_height: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            left: 0.0,
            top: 150.0,
            column_width: 280.0,
            row_height: 150.0,
        }
    }
}

struct Placement<'a> {
    children: HashMap<&'a str, Vec<&'a str>>,
    config: LayoutConfig,
    next_column: f64,
    positions: HashMap<NodeId, Position>,
    placed: HashSet<&'a str>,
}

impl<'a> Placement<'a> {
    /// Places `id` and its subtree, returning the node's x coordinate
    fn place(&mut self, id: &'a str, depth: usize) -> f64 {
        self.placed.insert(id);
        let children = self.children.get(id).cloned().unwrap_or_default();

        let mut child_xs = Vec::with_capacity(children.len());
        for child in children {
            // Shared descendants are placed once, under their first parent
            if self.placed.contains(child) {
                continue;
            }
            child_xs.push(self.place(child, depth + 1));
        }

        let x = match (child_xs.first(), child_xs.last()) {
            (Some(first), Some(last)) => (first + last) / 2.0,
            _ => {
                let x = self.config.left + self.next_column * self.config.column_width;
                self.next_column += 1.0;
                x
            }
        };
        let y = self.config.top + depth as f64 * self.config.row_height;
        self.positions.insert(id.to_string(), Position::new(x, y));
        x
    }
}

/// Returns a new position for every node reachable from a root.
pub fn compute_positions(
    nodes: &[Node],
    edges: &[Edge],
    config: LayoutConfig,
) -> HashMap<NodeId, Position> {
    let mut placement = Placement {
        children: children_map(edges),
        config,
        next_column: 0.0,
        positions: HashMap::new(),
        placed: HashSet::new(),
    };
    for root in root_ids(nodes, edges) {
        placement.place(root, 0);
    }
    placement.positions
}

/// Replaces node positions in place. Nodes unreachable from a root keep
/// their current position.
pub fn layout(nodes: &mut [Node], edges: &[Edge], config: LayoutConfig) {
    let positions = compute_positions(nodes, edges, config);
    for node in nodes.iter_mut() {
        if let Some(position) = positions.get(&node.id) {
            node.position = *position;
        }
    }
}
