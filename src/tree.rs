//! The tree state engine
//!
//! [`Tree`] owns the live nodes and edges together with their undo history
//! and the single in-flight generator request. Every structural mutation
//! follows the same shape: snapshot the current state, change nodes and
//! edges, recompute visibility.
//!
//! Operations on ids that no longer exist are silent no-ops; they return
//! `false` or `None` instead of failing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use tracing::{debug, info, warn};

use crate::context::get_context;
use crate::history::History;
use crate::ids::IdGenerator;
use crate::layout::{layout, LayoutConfig};
use crate::models::{
    Edge, ExpandMode, Node, NodeId, Position, RequestKind, TreeData, DEFAULT_NODE_TEXT,
};
use crate::visibility::sync_visibility;

lazy_static! {
    static ref STATUS_MESSAGES: Vec<&'static str> = vec![
        "Analyzing context...",
        "Consulting the model...",
        "Refining expression...",
        "Polishing thoughts...",
        "Finalizing...",
    ];
}

/// How long each rotating status message is shown
const STATUS_PERIOD: Duration = Duration::from_secs(2);

/// Vertical offset of freshly generated children before layout runs
const CHILD_OFFSET: f64 = 150.0;

/// Reasons a manual connection is refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("node '{0}' does not exist")]
    MissingNode(NodeId),
    #[error("a node cannot be connected to itself")]
    SelfLoop,
    #[error("node '{0}' already has a parent")]
    TargetHasParent(NodeId),
    #[error("connecting '{source_id}' to '{target_id}' would create a cycle")]
    Cycle {
        source_id: NodeId,
        target_id: NodeId,
    },
}

/// The global in-flight gate: at most one generator request at a time
#[derive(Debug, Clone)]
pub struct InFlight {
    pub node_id: NodeId,
    pub kind: RequestKind,
    pub started: Instant,
}

/// Raised when a request is attempted while another one is in flight
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("a generation request for node '{0}' is already in flight")]
pub struct Busy(pub NodeId);

/// Everything needed to issue an expansion to the generator
#[derive(Debug, Clone, PartialEq)]
pub struct ExpansionRequest {
    pub node_id: NodeId,
    pub mode: ExpandMode,
    /// The override text when the caller had a pending edit, else the node's text
    pub text: String,
    pub context: Vec<String>,
}

/// Everything needed to issue a refinement to the generator
#[derive(Debug, Clone, PartialEq)]
pub struct RefineRequest {
    pub node_id: NodeId,
    pub text: String,
}

/// Returns every descendant of `start_id`, breadth first, without duplicates.
/// The start node itself is never included.
pub fn descendant_ids(edges: &[Edge], start_id: &str) -> Vec<NodeId> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut order = Vec::new();
    let mut queue = VecDeque::from([start_id]);

    while let Some(current) = queue.pop_front() {
        for edge in edges.iter().filter(|e| e.source_id == current) {
            let target = edge.target_id.as_str();
            if target == start_id || !seen.insert(target) {
                continue;
            }
            order.push(target.to_string());
            queue.push_back(target);
        }
    }
    order
}

/// Edges in stored data that would break the forest shape
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("node '{0}' has more than one parent")]
    SecondParent(NodeId),
    #[error("edge '{source_id}' -> '{target_id}' closes a cycle")]
    Cycle {
        source_id: NodeId,
        target_id: NodeId,
    },
}

/// Reduces stored data to a well-formed forest.
///
/// Repeated node ids keep their first occurrence and edges with a missing
/// endpoint or a repeated pair are dropped quietly. Edges that would give a
/// node a second parent or close a cycle are dropped and reported, in edge
/// order.
pub fn normalize_forest(data: TreeData) -> (TreeData, Vec<ShapeError>) {
    let mut ids: HashSet<NodeId> = HashSet::new();
    let node_count = data.nodes.len();
    let nodes: Vec<Node> = data
        .nodes
        .into_iter()
        .filter(|n| ids.insert(n.id.clone()))
        .collect();

    let edge_count = data.edges.len();
    let mut parent: HashMap<NodeId, NodeId> = HashMap::new();
    let mut edges = Vec::new();
    let mut faults = Vec::new();
    for edge in data.edges {
        if !ids.contains(&edge.source_id) || !ids.contains(&edge.target_id) {
            continue;
        }
        match parent.get(&edge.target_id) {
            Some(existing) if *existing == edge.source_id => continue,
            Some(_) => {
                faults.push(ShapeError::SecondParent(edge.target_id));
                continue;
            }
            None => {}
        }
        if is_ancestor_or_self(&parent, &edge.target_id, &edge.source_id) {
            faults.push(ShapeError::Cycle {
                source_id: edge.source_id,
                target_id: edge.target_id,
            });
            continue;
        }
        parent.insert(edge.target_id.clone(), edge.source_id.clone());
        edges.push(edge);
    }

    let dropped_nodes = node_count - nodes.len();
    let dropped_edges = edge_count - edges.len() - faults.len();
    if dropped_nodes > 0 || dropped_edges > 0 {
        debug!(dropped_nodes, dropped_edges, "dropped repeated or dangling entries");
    }
    (TreeData { nodes, edges }, faults)
}

/// Like [`normalize_forest`] but refuses data with any shape fault
pub fn check_forest(data: TreeData) -> Result<TreeData, ShapeError> {
    let (data, faults) = normalize_forest(data);
    match faults.into_iter().next() {
        Some(fault) => Err(fault),
        None => Ok(data),
    }
}

/// Walks up from `start` through accepted parents. The accepted edges are
/// always a forest so the walk ends.
fn is_ancestor_or_self(parent: &HashMap<NodeId, NodeId>, candidate: &str, start: &str) -> bool {
    let mut current = Some(start);
    while let Some(id) = current {
        if id == candidate {
            return true;
        }
        current = parent.get(id).map(String::as_str);
    }
    false
}

/// The live idea forest plus its history
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    history: History,
    ids: IdGenerator,
    layout: LayoutConfig,
    in_flight: Option<InFlight>,
}

impl Tree {
    /// Creates an empty tree
    pub fn new() -> Self {
        Self::with_ids(IdGenerator::new())
    }

    /// Creates an empty tree drawing ids from the given generator
    pub fn with_ids(ids: IdGenerator) -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            history: History::new(),
            ids,
            layout: LayoutConfig::default(),
            in_flight: None,
        }
    }

    /// Creates a tree holding a single default root and no history
    pub fn fresh(ids: IdGenerator) -> Self {
        let mut tree = Self::with_ids(ids);
        let id = tree.fresh_id();
        let node = Node::new(id, DEFAULT_NODE_TEXT.to_string(), tree.default_root_position());
        tree.nodes.push(node);
        sync_visibility(&mut tree.nodes, &mut tree.edges);
        tree
    }

    /// Restores a tree from persisted data. Expanding flags are cleared since
    /// no request can survive a reload, and visibility is recomputed. Data
    /// that is not a forest is cut down to one, see [`normalize_forest`].
    pub fn from_data(data: TreeData, ids: IdGenerator) -> Self {
        let (data, faults) = normalize_forest(data);
        for fault in &faults {
            warn!(error = %fault, "dropped edge while restoring tree");
        }
        let mut tree = Self::with_ids(ids);
        tree.nodes = data.nodes;
        tree.edges = data.edges;
        for node in tree.nodes.iter_mut() {
            node.is_expanding = false;
        }
        sync_visibility(&mut tree.nodes, &mut tree.edges);
        tree
    }

    // --- Read access --- //

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Returns the parent of a node, if it has one
    pub fn parent_of(&self, id: &str) -> Option<&Node> {
        let edge = self.edges.iter().find(|e| e.target_id == id)?;
        self.node(&edge.source_id)
    }

    /// Returns the direct children of a node, in edge order
    pub fn children_of(&self, id: &str) -> Vec<&Node> {
        self.edges
            .iter()
            .filter(|e| e.source_id == id)
            .filter_map(|e| self.node(&e.target_id))
            .collect()
    }

    /// A deep copy of the current nodes and edges
    pub fn data(&self) -> TreeData {
        TreeData {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// True while a generator request is outstanding anywhere in the tree
    pub fn any_expanding(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight(&self) -> Option<&InFlight> {
        self.in_flight.as_ref()
    }

    /// The rotating human readable status while a request is in flight
    pub fn status_message(&self, now: Instant) -> Option<&'static str> {
        let in_flight = self.in_flight.as_ref()?;
        let elapsed = now.saturating_duration_since(in_flight.started);
        let step = (elapsed.as_millis() / STATUS_PERIOD.as_millis()) as usize;
        Some(STATUS_MESSAGES[step % STATUS_MESSAGES.len()])
    }

    /// Texts handed to the generator as situational context for `id`
    pub fn context_for(&self, id: &str) -> Vec<String> {
        get_context(&self.nodes, &self.edges, id)
    }

    // --- Internal helpers --- //

    fn index_of(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Draws an id that is unused by the live tree and by every snapshot, so
    /// that undo can never resurrect a clashing id.
    fn fresh_id(&mut self) -> NodeId {
        let nodes = &self.nodes;
        let history = &self.history;
        self.ids.next_unique(|candidate| {
            nodes.iter().any(|n| n.id == candidate)
                || history
                    .snapshots()
                    .any(|s| s.nodes.iter().any(|n| n.id == candidate))
        })
    }

    fn default_root_position(&self) -> Position {
        let x = self
            .nodes
            .iter()
            .map(|n| n.position.x)
            .fold(None, |max: Option<f64>, x| Some(max.map_or(x, |m| m.max(x))))
            .map_or(self.layout.left, |max| max + self.layout.column_width);
        Position::new(x, self.layout.top)
    }

    /// Records the current state, then applies `f` and recomputes visibility
    fn transact<T>(&mut self, f: impl FnOnce(&mut Vec<Node>, &mut Vec<Edge>) -> T) -> T {
        let before = self.data();
        self.history.snapshot(&before);
        let result = f(&mut self.nodes, &mut self.edges);
        sync_visibility(&mut self.nodes, &mut self.edges);
        result
    }

    /// Installs a state taken from history. The restore guard keeps the
    /// installing transaction out of the history it came from.
    fn install(&mut self, data: TreeData) {
        let in_flight = self.in_flight.as_ref().map(|f| f.node_id.clone());
        self.history.set_restoring(true);
        self.transact(|nodes, edges| {
            *nodes = data.nodes;
            *edges = data.edges;
            for node in nodes.iter_mut() {
                node.is_expanding = in_flight.as_deref() == Some(node.id.as_str());
            }
        });
        self.history.set_restoring(false);
    }

    // --- Structural mutations --- //

    /// Adds a root node with default text and returns its id
    pub fn add_root(&mut self) -> NodeId {
        let id = self.fresh_id();
        let position = self.default_root_position();
        let node = Node::new(id.clone(), DEFAULT_NODE_TEXT.to_string(), position);
        self.transact(|nodes, _| nodes.push(node));
        info!(node = %id, "added root node");
        id
    }

    /// Deletes a node together with its whole subtree
    pub fn delete_node(&mut self, id: &str) -> bool {
        if self.index_of(id).is_none() {
            debug!(node = %id, "delete ignored, node not found");
            return false;
        }

        let mut removed: HashSet<NodeId> = descendant_ids(&self.edges, id).into_iter().collect();
        removed.insert(id.to_string());

        self.transact(|nodes, edges| {
            nodes.retain(|n| !removed.contains(&n.id));
            edges.retain(|e| !e.touches(&removed));
        });
        info!(node = %id, removed = removed.len(), "deleted subtree");
        true
    }

    /// Replaces a node's text. Null edits are ignored and leave history alone.
    pub fn edit_node(&mut self, id: &str, text: &str) -> bool {
        let text = text.trim();
        match self.node(id) {
            None => {
                debug!(node = %id, "edit ignored, node not found");
                return false;
            }
            Some(node) if node.text == text => return false,
            Some(_) => {}
        }

        let id_owned = id.to_string();
        let text_owned = text.to_string();
        self.transact(|nodes, _| {
            if let Some(node) = nodes.iter_mut().find(|n| n.id == id_owned) {
                node.text = text_owned;
            }
        });
        true
    }

    /// Adds a parent -> child edge. Targets that already have a parent are
    /// rejected rather than re-parented.
    pub fn connect(&mut self, source_id: &str, target_id: &str) -> Result<Edge, ConnectError> {
        for id in [source_id, target_id] {
            if self.index_of(id).is_none() {
                return Err(ConnectError::MissingNode(id.to_string()));
            }
        }
        if source_id == target_id {
            return Err(ConnectError::SelfLoop);
        }
        if self.edges.iter().any(|e| e.target_id == target_id) {
            return Err(ConnectError::TargetHasParent(target_id.to_string()));
        }
        if descendant_ids(&self.edges, target_id)
            .iter()
            .any(|d| d == source_id)
        {
            return Err(ConnectError::Cycle {
                source_id: source_id.to_string(),
                target_id: target_id.to_string(),
            });
        }

        let edge = Edge::between(source_id, target_id);
        let added = edge.clone();
        self.transact(|_, edges| edges.push(added));
        info!(source = %source_id, target = %target_id, "connected nodes");
        Ok(edge)
    }

    /// Flips a node's collapsed flag
    pub fn toggle_collapse(&mut self, id: &str) -> bool {
        if self.index_of(id).is_none() {
            return false;
        }
        let id_owned = id.to_string();
        self.transact(|nodes, _| {
            if let Some(node) = nodes.iter_mut().find(|n| n.id == id_owned) {
                node.is_collapsed = !node.is_collapsed;
            }
        });
        true
    }

    /// Flips a node's pinned flag. Pinning only selects context, so it is
    /// neither recorded in history nor does it touch visibility.
    pub fn toggle_pin(&mut self, id: &str) -> bool {
        match self.node_mut(id) {
            Some(node) => {
                node.is_pinned = !node.is_pinned;
                true
            }
            None => false,
        }
    }

    /// Moves a node, as at the end of a drag
    pub fn move_node(&mut self, id: &str, position: Position) -> bool {
        if self.index_of(id).is_none() {
            return false;
        }
        let id_owned = id.to_string();
        self.transact(|nodes, _| {
            if let Some(node) = nodes.iter_mut().find(|n| n.id == id_owned) {
                node.position = position;
            }
        });
        true
    }

    /// Recomputes every node position
    pub fn auto_layout(&mut self) {
        let config = self.layout;
        self.transact(|nodes, edges| layout(nodes, edges, config));
    }

    /// Removes every node and edge. Nothing happens unless `confirmed`.
    pub fn clear_all(&mut self, confirmed: bool) -> bool {
        if !confirmed {
            debug!("clear ignored, not confirmed");
            return false;
        }
        self.transact(|nodes, edges| {
            nodes.clear();
            edges.clear();
        });
        info!("cleared tree");
        true
    }

    /// Restores the state from before the most recent recorded mutation
    pub fn undo(&mut self) -> bool {
        let current = self.data();
        match self.history.undo(&current) {
            Some(previous) => {
                self.install(previous);
                true
            }
            None => false,
        }
    }

    /// Re-applies the most recently undone mutation
    pub fn redo(&mut self) -> bool {
        let current = self.data();
        match self.history.redo(&current) {
            Some(next) => {
                self.install(next);
                true
            }
            None => false,
        }
    }

    // --- Generator request protocol --- //

    fn claim(&mut self, id: &str, kind: RequestKind) -> Result<bool, Busy> {
        if let Some(in_flight) = &self.in_flight {
            return Err(Busy(in_flight.node_id.clone()));
        }
        if self.index_of(id).is_none() {
            debug!(node = %id, "request ignored, node not found");
            return Ok(false);
        }
        self.in_flight = Some(InFlight {
            node_id: id.to_string(),
            kind,
            started: Instant::now(),
        });
        Ok(true)
    }

    /// Enters the expanding state for `id` and stages the generator request.
    ///
    /// Returns `Ok(None)` when the node does not exist.
    pub fn begin_expansion(
        &mut self,
        id: &str,
        mode: ExpandMode,
        text_override: Option<&str>,
    ) -> Result<Option<ExpansionRequest>, Busy> {
        if !self.claim(id, RequestKind::Expand)? {
            return Ok(None);
        }

        let text = {
            let Some(node) = self.node_mut(id) else {
                return Ok(None);
            };
            node.is_expanding = true;
            // A node cannot be both collapsed and actively expanding
            node.is_collapsed = false;
            // A blank pending edit falls back to the committed text
            text_override
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| node.text.clone())
        };
        sync_visibility(&mut self.nodes, &mut self.edges);

        let context = self.context_for(id);
        info!(node = %id, %mode, context = context.len(), "expansion started");
        Ok(Some(ExpansionRequest {
            node_id: id.to_string(),
            mode,
            text,
            context,
        }))
    }

    /// Merges a successful expansion into the live tree.
    ///
    /// The parent's current subtree is re-read from live state, replaced by
    /// one child per idea, laid out and committed as a single history entry.
    /// Returns the new child ids, or an empty list if the parent was deleted
    /// while the request was outstanding.
    pub fn complete_expansion(
        &mut self,
        request: &ExpansionRequest,
        ideas: &[String],
    ) -> Vec<NodeId> {
        let Some(parent) = self.node(&request.node_id) else {
            info!(node = %request.node_id, "expansion discarded, node was removed");
            return Vec::new();
        };
        let origin = parent.position;

        let stale: HashSet<NodeId> = descendant_ids(&self.edges, &request.node_id)
            .into_iter()
            .collect();

        let mut children = Vec::with_capacity(ideas.len());
        for idea in ideas {
            let id = self.fresh_id();
            children.push(Node::generated(
                id,
                idea.clone(),
                Position::new(origin.x, origin.y + CHILD_OFFSET),
                request.mode,
            ));
        }
        let child_ids: Vec<NodeId> = children.iter().map(|c| c.id.clone()).collect();

        let config = self.layout;
        self.transact(|nodes, edges| {
            nodes.retain(|n| !stale.contains(&n.id));
            edges.retain(|e| !e.touches(&stale));

            for child in children {
                edges.push(Edge::between(&request.node_id, &child.id));
                nodes.push(child);
            }
            if let Some(parent) = nodes.iter_mut().find(|n| n.id == request.node_id) {
                parent.is_expanding = false;
                parent.is_collapsed = false;
                parent.text = request.text.clone();
            }
            layout(nodes, edges, config);
        });

        info!(
            node = %request.node_id,
            replaced = stale.len(),
            added = child_ids.len(),
            "expansion committed"
        );
        child_ids
    }

    /// Enters the expanding state for a refinement of `id`
    pub fn begin_refine(&mut self, id: &str) -> Result<Option<RefineRequest>, Busy> {
        if !self.claim(id, RequestKind::Refine)? {
            return Ok(None);
        }
        let Some(node) = self.node_mut(id) else {
            return Ok(None);
        };
        node.is_expanding = true;
        Ok(Some(RefineRequest {
            node_id: id.to_string(),
            text: node.text.clone(),
        }))
    }

    /// Replaces a node's text with a refined version. Returns the node's
    /// resulting text, or `None` if it was removed meanwhile.
    pub fn complete_refine(&mut self, id: &str, refined: &str) -> Option<String> {
        let refined = refined.trim();
        let current = self.node(id)?.text.clone();

        if refined.is_empty() || refined == current {
            self.clear_expanding(id);
            return Some(current);
        }

        let id_owned = id.to_string();
        let text = refined.to_string();
        self.transact(|nodes, _| {
            if let Some(node) = nodes.iter_mut().find(|n| n.id == id_owned) {
                node.text = text;
                node.is_expanding = false;
            }
        });
        Some(refined.to_string())
    }

    /// Leaves the expanding state without touching anything else
    pub fn clear_expanding(&mut self, id: &str) -> bool {
        match self.node_mut(id) {
            Some(node) => {
                node.is_expanding = false;
                true
            }
            None => false,
        }
    }

    /// Releases the global in-flight gate. Called on every exit path of a
    /// request, success or failure.
    pub fn end_request(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            self.clear_expanding(&in_flight.node_id);
            debug!(node = %in_flight.node_id, "request finished");
        }
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Tree {
        Tree::with_ids(IdGenerator::seeded(1))
    }

    /// a -> b -> c
    fn chain() -> (Tree, NodeId, NodeId, NodeId) {
        let mut tree = tree();
        let a = tree.add_root();
        let b = tree.add_root();
        let c = tree.add_root();
        tree.connect(&a, &b).unwrap();
        tree.connect(&b, &c).unwrap();
        (tree, a, b, c)
    }

    #[test]
    fn test_add_root_places_new_roots_side_by_side() {
        let mut tree = tree();
        let a = tree.add_root();
        let b = tree.add_root();

        assert_eq!(tree.node(&a).unwrap().position, Position::new(0.0, 150.0));
        assert_eq!(tree.node(&b).unwrap().position, Position::new(280.0, 150.0));
        assert_eq!(tree.node(&a).unwrap().text, DEFAULT_NODE_TEXT);
        assert_eq!(tree.history().past_len(), 2);
    }

    #[test]
    fn test_fresh_tree_has_one_root_and_no_history() {
        let tree = Tree::fresh(IdGenerator::seeded(9));
        assert_eq!(tree.nodes().len(), 1);
        assert!(!tree.can_undo());
    }

    #[test]
    fn test_delete_cascades_to_subtree() {
        let (mut tree, a, b, _c) = chain();
        assert!(tree.delete_node(&b));

        assert_eq!(tree.nodes().len(), 1);
        assert!(tree.edges().is_empty());
        let root = tree.node(&a).unwrap();
        assert!(!root.has_children);
        assert_eq!(root.descendant_count, 0);
    }

    #[test]
    fn test_delete_unknown_node_is_noop() {
        let (mut tree, ..) = chain();
        let before = tree.history().past_len();
        assert!(!tree.delete_node("nope"));
        assert_eq!(tree.history().past_len(), before);
    }

    #[test]
    fn test_null_edit_is_not_recorded() {
        let mut tree = tree();
        let a = tree.add_root();
        let before = tree.history().past_len();

        assert!(!tree.edit_node(&a, "  New Idea  "));
        assert_eq!(tree.history().past_len(), before);

        assert!(tree.edit_node(&a, " Better idea "));
        assert_eq!(tree.node(&a).unwrap().text, "Better idea");
        assert_eq!(tree.history().past_len(), before + 1);
    }

    #[test]
    fn test_connect_rejects_second_parent() {
        let (mut tree, a, _b, c) = chain();
        assert_eq!(
            tree.connect(&a, &c),
            Err(ConnectError::TargetHasParent(c.clone()))
        );
    }

    #[test]
    fn test_connect_rejects_cycles_and_self_loops() {
        let mut tree = tree();
        let a = tree.add_root();
        let b = tree.add_root();
        let c = tree.add_root();
        tree.connect(&a, &b).unwrap();
        tree.connect(&b, &c).unwrap();

        assert_eq!(tree.connect(&a, &a), Err(ConnectError::SelfLoop));
        assert!(matches!(
            tree.connect(&c, &a),
            Err(ConnectError::Cycle { .. })
        ));
        assert_eq!(
            tree.connect(&a, "ghost"),
            Err(ConnectError::MissingNode("ghost".to_string()))
        );
    }

    #[test]
    fn test_rejected_connect_leaves_history_alone() {
        let (mut tree, a, _b, c) = chain();
        let before = tree.history().past_len();
        let _ = tree.connect(&a, &c);
        assert_eq!(tree.history().past_len(), before);
    }

    #[test]
    fn test_pin_is_not_undoable() {
        let mut tree = tree();
        let a = tree.add_root();
        let before = tree.history().past_len();

        assert!(tree.toggle_pin(&a));
        assert!(tree.node(&a).unwrap().is_pinned);
        assert_eq!(tree.history().past_len(), before);
    }

    #[test]
    fn test_clear_requires_confirmation() {
        let (mut tree, ..) = chain();
        assert!(!tree.clear_all(false));
        assert_eq!(tree.nodes().len(), 3);

        assert!(tree.clear_all(true));
        assert!(tree.nodes().is_empty());
        assert!(tree.edges().is_empty());

        assert!(tree.undo());
        assert_eq!(tree.nodes().len(), 3);
    }

    #[test]
    fn test_undo_and_redo_restore_exact_states() {
        let (mut tree, _a, b, _c) = chain();
        let before = tree.data();
        tree.toggle_collapse(&b);
        let after = tree.data();

        assert!(tree.undo());
        assert_eq!(tree.data(), before);
        assert!(tree.redo());
        assert_eq!(tree.data(), after);
        assert!(!tree.redo());
    }

    #[test]
    fn test_move_node_is_undoable() {
        let mut tree = tree();
        let a = tree.add_root();
        assert!(tree.move_node(&a, Position::new(10.0, 20.0)));
        assert_eq!(tree.node(&a).unwrap().position, Position::new(10.0, 20.0));
        tree.undo();
        assert_eq!(tree.node(&a).unwrap().position, Position::new(0.0, 150.0));
    }

    #[test]
    fn test_expansion_gate_is_global() {
        let (mut tree, a, b, _c) = chain();
        let request = tree.begin_expansion(&a, ExpandMode::Why, None).unwrap();
        assert!(request.is_some());
        assert!(tree.any_expanding());

        assert_eq!(
            tree.begin_expansion(&b, ExpandMode::What, None),
            Err(Busy(a.clone()))
        );
        assert_eq!(tree.begin_refine(&b), Err(Busy(a.clone())));

        tree.end_request();
        assert!(!tree.any_expanding());
        assert!(!tree.node(&a).unwrap().is_expanding);
    }

    #[test]
    fn test_begin_expansion_on_missing_node_does_not_claim_gate() {
        let mut tree = tree();
        assert_eq!(tree.begin_expansion("nope", ExpandMode::Why, None), Ok(None));
        assert!(!tree.any_expanding());
    }

    #[test]
    fn test_begin_expansion_uncollapses_and_stages_context() {
        let (mut tree, a, b, c) = chain();
        tree.toggle_collapse(&b);
        let history_before = tree.history().past_len();

        let request = tree
            .begin_expansion(&b, ExpandMode::What, Some("Override"))
            .unwrap()
            .unwrap();

        assert_eq!(request.text, "Override");
        assert_eq!(request.context, vec![tree.node(&a).unwrap().text.clone()]);
        let node = tree.node(&b).unwrap();
        assert!(node.is_expanding);
        assert!(!node.is_collapsed);
        assert!(!tree.node(&c).unwrap().hidden);
        // Entering the expanding state is not a recorded mutation
        assert_eq!(tree.history().past_len(), history_before);
    }

    #[test]
    fn test_blank_override_keeps_committed_text() {
        let mut tree = tree();
        let a = tree.add_root();

        let request = tree
            .begin_expansion(&a, ExpandMode::Why, Some("   "))
            .unwrap()
            .unwrap();
        assert_eq!(request.text, DEFAULT_NODE_TEXT);

        tree.complete_expansion(&request, &["X".to_string()]);
        tree.end_request();
        assert_eq!(tree.node(&a).unwrap().text, DEFAULT_NODE_TEXT);

        let request = tree
            .begin_expansion(&a, ExpandMode::Why, Some(""))
            .unwrap()
            .unwrap();
        tree.complete_expansion(&request, &["Y".to_string()]);
        tree.end_request();
        assert_eq!(tree.node(&a).unwrap().text, DEFAULT_NODE_TEXT);
    }

    #[test]
    fn test_override_is_trimmed_before_commit() {
        let mut tree = tree();
        let a = tree.add_root();

        let request = tree
            .begin_expansion(&a, ExpandMode::What, Some("  Padded  "))
            .unwrap()
            .unwrap();
        assert_eq!(request.text, "Padded");

        tree.complete_expansion(&request, &["X".to_string()]);
        tree.end_request();
        assert_eq!(tree.node(&a).unwrap().text, "Padded");
    }

    #[test]
    fn test_complete_expansion_replaces_subtree() {
        let (mut tree, a, b, c) = chain();
        let request = tree
            .begin_expansion(&a, ExpandMode::Why, None)
            .unwrap()
            .unwrap();
        let history_before = tree.history().past_len();

        let ideas = vec!["X".to_string(), "Y".to_string()];
        let children = tree.complete_expansion(&request, &ideas);
        tree.end_request();

        assert_eq!(children.len(), 2);
        assert!(tree.node(&b).is_none());
        assert!(tree.node(&c).is_none());
        assert_eq!(tree.children_of(&a).len(), 2);
        for child in tree.children_of(&a) {
            assert_eq!(child.generated_by, Some(ExpandMode::Why));
        }
        assert_eq!(tree.history().past_len(), history_before + 1);

        // Undo brings back the replaced subtree
        assert!(tree.undo());
        assert!(tree.node(&b).is_some());
        assert!(tree.node(&c).is_some());
        assert!(!tree.node(&a).unwrap().is_expanding);
    }

    #[test]
    fn test_complete_expansion_after_parent_deleted_is_discarded() {
        let (mut tree, _a, b, _c) = chain();
        let request = tree
            .begin_expansion(&b, ExpandMode::Why, None)
            .unwrap()
            .unwrap();
        tree.delete_node(&b);
        let history_before = tree.history().past_len();

        let children = tree.complete_expansion(&request, &["X".to_string()]);
        tree.end_request();

        assert!(children.is_empty());
        assert_eq!(tree.nodes().len(), 1);
        assert_eq!(tree.history().past_len(), history_before);
    }

    #[test]
    fn test_undo_during_request_keeps_in_flight_flag() {
        let (mut tree, a, b, _c) = chain();
        tree.toggle_collapse(&b);
        tree.begin_expansion(&a, ExpandMode::Why, None).unwrap();

        assert!(tree.undo());
        assert!(tree.node(&a).unwrap().is_expanding);
        assert!(!tree.node(&b).unwrap().is_expanding);
        assert!(tree.any_expanding());
    }

    #[test]
    fn test_refine_replaces_text_once() {
        let mut tree = tree();
        let a = tree.add_root();
        let request = tree.begin_refine(&a).unwrap().unwrap();
        assert_eq!(request.text, DEFAULT_NODE_TEXT);
        let before = tree.history().past_len();

        assert_eq!(
            tree.complete_refine(&a, "A fresh idea"),
            Some("A fresh idea".to_string())
        );
        tree.end_request();

        assert_eq!(tree.node(&a).unwrap().text, "A fresh idea");
        assert!(!tree.node(&a).unwrap().is_expanding);
        assert_eq!(tree.history().past_len(), before + 1);
    }

    #[test]
    fn test_refine_with_same_text_is_not_recorded() {
        let mut tree = tree();
        let a = tree.add_root();
        tree.begin_refine(&a).unwrap();
        let before = tree.history().past_len();

        tree.complete_refine(&a, DEFAULT_NODE_TEXT);
        tree.end_request();
        assert_eq!(tree.history().past_len(), before);
    }

    #[test]
    fn test_status_message_rotates_every_two_seconds() {
        let mut tree = tree();
        let a = tree.add_root();
        assert_eq!(tree.status_message(Instant::now()), None);

        tree.begin_refine(&a).unwrap();
        let started = tree.in_flight().unwrap().started;
        assert_eq!(tree.status_message(started), Some("Analyzing context..."));
        assert_eq!(
            tree.status_message(started + Duration::from_millis(2100)),
            Some("Consulting the model...")
        );
        assert_eq!(
            tree.status_message(started + Duration::from_secs(10)),
            Some("Analyzing context...")
        );
    }

    fn shaped(ids: &[&str], edges: &[(&str, &str)]) -> TreeData {
        TreeData {
            nodes: ids
                .iter()
                .map(|id| Node::new(id.to_string(), id.to_uppercase(), Position::default()))
                .collect(),
            edges: edges.iter().map(|(s, t)| Edge::between(s, t)).collect(),
        }
    }

    #[test]
    fn test_normalize_forest_reports_cycles_and_second_parents() {
        let (data, faults) = normalize_forest(shaped(
            &["r", "a", "b", "q"],
            &[("r", "a"), ("a", "b"), ("b", "a"), ("q", "b")],
        ));
        assert_eq!(
            faults,
            vec![
                ShapeError::SecondParent("a".to_string()),
                ShapeError::SecondParent("b".to_string()),
            ]
        );
        assert_eq!(data.edges.len(), 2);

        let (data, faults) = normalize_forest(shaped(&["a", "b"], &[("a", "b"), ("b", "a")]));
        assert_eq!(
            faults,
            vec![ShapeError::Cycle {
                source_id: "b".to_string(),
                target_id: "a".to_string(),
            }]
        );
        assert_eq!(data.edges, vec![Edge::between("a", "b")]);

        let (_, faults) = normalize_forest(shaped(&["a"], &[("a", "a")]));
        assert_eq!(faults.len(), 1);
    }

    #[test]
    fn test_from_data_restores_a_forest_from_a_cycle() {
        let tree = Tree::from_data(
            shaped(&["r", "a", "b"], &[("r", "a"), ("a", "b"), ("b", "a")]),
            IdGenerator::seeded(2),
        );

        assert_eq!(tree.edges().len(), 2);
        assert_eq!(tree.parent_of("a").unwrap().id, "r");
        assert_eq!(tree.parent_of("b").unwrap().id, "a");
        assert_eq!(tree.node("r").unwrap().descendant_count, 2);
        assert!(tree.parent_of("r").is_none());
    }

    #[test]
    fn test_descendant_ids_is_breadth_first() {
        let edges = vec![
            Edge::between("a", "b"),
            Edge::between("b", "d"),
            Edge::between("a", "c"),
        ];
        assert_eq!(descendant_ids(&edges, "a"), vec!["b", "c", "d"]);
        assert!(descendant_ids(&edges, "d").is_empty());
    }
}
