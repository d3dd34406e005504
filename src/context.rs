//! Context handed to the generator alongside a node's text

use crate::models::{Edge, Node};

/// Returns the texts of all pinned nodes, in tree order
pub fn pinned_context(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .filter(|n| n.is_pinned)
        .map(|n| n.text.clone())
        .collect()
}

/// Walks up from `start_id` following incoming edges and returns the
/// ancestor texts root first, immediate parent last.
pub fn ancestor_context(nodes: &[Node], edges: &[Edge], start_id: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = start_id;

    while let Some(edge) = edges.iter().find(|e| e.target_id == current) {
        let Some(parent) = nodes.iter().find(|n| n.id == edge.source_id) else {
            break;
        };
        // Guard against a cycle through the start node or any visited ancestor
        if parent.id == start_id || chain.len() > nodes.len() {
            break;
        }
        chain.push(parent.text.clone());
        current = parent.id.as_str();
    }

    chain.reverse();
    chain
}

/// Pinned nodes override locality; otherwise the strict ancestor chain
pub fn get_context(nodes: &[Node], edges: &[Edge], start_id: &str) -> Vec<String> {
    let pinned = pinned_context(nodes);
    if !pinned.is_empty() {
        return pinned;
    }
    ancestor_context(nodes, edges, start_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Position;

    fn node(id: &str, text: &str) -> Node {
        Node::new(id.to_string(), text.to_string(), Position::default())
    }

    // root -> mid -> leaf, root -> other
    fn sample() -> (Vec<Node>, Vec<Edge>) {
        (
            vec![
                node("root", "Sales are down"),
                node("mid", "Fewer leads"),
                node("leaf", "Ads paused"),
                node("other", "Churn is up"),
            ],
            vec![
                Edge::between("root", "mid"),
                Edge::between("mid", "leaf"),
                Edge::between("root", "other"),
            ],
        )
    }

    #[test]
    fn test_ancestor_chain_is_root_first() {
        let (nodes, edges) = sample();
        assert_eq!(
            get_context(&nodes, &edges, "leaf"),
            vec!["Sales are down".to_string(), "Fewer leads".to_string()]
        );
    }

    #[test]
    fn test_root_without_pins_has_empty_context() {
        let (nodes, edges) = sample();
        assert!(get_context(&nodes, &edges, "root").is_empty());
    }

    #[test]
    fn test_pins_override_ancestry() {
        let (mut nodes, edges) = sample();
        nodes[3].is_pinned = true; // other
        nodes[0].is_pinned = true; // root

        assert_eq!(
            get_context(&nodes, &edges, "leaf"),
            vec!["Sales are down".to_string(), "Churn is up".to_string()]
        );
        // Even for a root node
        assert_eq!(get_context(&nodes, &edges, "root").len(), 2);
    }

    #[test]
    fn test_unknown_start_has_empty_context() {
        let (nodes, edges) = sample();
        assert!(get_context(&nodes, &edges, "missing").is_empty());
    }

    #[test]
    fn test_cycle_terminates() {
        let nodes = vec![node("a", "A"), node("b", "B")];
        let edges = vec![Edge::between("a", "b"), Edge::between("b", "a")];
        assert_eq!(ancestor_context(&nodes, &edges, "b"), vec!["A".to_string()]);
    }
}
