//! Core models for the thoughtree library
//!
//! This module contains the plain data carried by the tree: nodes, edges,
//! snapshots, prompt log entries and settings. Nodes carry no behaviour; all
//! mutation goes through [`crate::tree::Tree`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Identifier of a node, unique for the lifetime of a tree
pub type NodeId = String;

/// Maximum number of prompt log entries kept, newest first
pub const MAX_LOG_ENTRIES: usize = 50;

/// Text given to a freshly added root node
pub const DEFAULT_NODE_TEXT: &str = "New Idea";

/// A point on the canvas
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// The two ways a node can be expanded by the generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpandMode {
    /// Root-cause analysis: why does this exist?
    Why,
    /// Decomposition: what is this made of?
    What,
}

impl ExpandMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpandMode::Why => "why",
            ExpandMode::What => "what",
        }
    }
}

impl fmt::Display for ExpandMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpandMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "why" => Ok(ExpandMode::Why),
            "what" => Ok(ExpandMode::What),
            other => Err(format!("unknown expand mode '{}', expected why or what", other)),
        }
    }
}

/// A vertex of the idea forest.
///
/// `hidden`, `has_children` and `descendant_count` are derived view state.
/// They are serialized so that exports and the HTTP surface can show them,
/// but they are recomputed from scratch after every structural change and
/// after every load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub text: String,
    pub position: Position,
    #[serde(default)]
    pub is_collapsed: bool,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub is_expanding: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_by: Option<ExpandMode>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub has_children: bool,
    #[serde(default)]
    pub descendant_count: usize,
}

impl Node {
    /// Creates a plain, user-authored node
    pub fn new(id: NodeId, text: String, position: Position) -> Self {
        Self {
            id,
            text,
            position,
            is_collapsed: false,
            is_pinned: false,
            is_expanding: false,
            generated_by: None,
            hidden: false,
            has_children: false,
            descendant_count: 0,
        }
    }

    /// Creates a node produced by an expansion in the given mode
    pub fn generated(id: NodeId, text: String, position: Position, mode: ExpandMode) -> Self {
        Self {
            generated_by: Some(mode),
            ..Self::new(id, text, position)
        }
    }
}

/// A directed parent -> child relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source_id: NodeId,
    pub target_id: NodeId,
    #[serde(default)]
    pub hidden: bool,
}

impl Edge {
    /// Creates an edge with the conventional `e-{source}-{target}` id
    pub fn between(source_id: &str, target_id: &str) -> Self {
        Self {
            id: format!("e-{}-{}", source_id, target_id),
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            hidden: false,
        }
    }

    /// Returns true if either endpoint is in the given set
    pub fn touches(&self, ids: &std::collections::HashSet<NodeId>) -> bool {
        ids.contains(&self.source_id) || ids.contains(&self.target_id)
    }
}

/// A deep, independent copy of the tree. This is also the persisted and
/// exported shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeData {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// The kind of generator request a log entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Expand,
    Refine,
}

/// One prompt/response exchange with the generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptLog {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: RequestKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExpandMode>,
    pub input_text: String,
    pub full_prompt_text: String,
    pub response_text: String,
}

/// Append-only prompt log, newest entry first, capped at [`MAX_LOG_ENTRIES`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptLogBook {
    entries: VecDeque<PromptLog>,
}

impl PromptLogBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an entry, evicting the oldest once the cap is exceeded
    pub fn record(&mut self, entry: PromptLog) {
        self.entries.push_front(entry);
        self.entries.truncate(MAX_LOG_ENTRIES);
    }

    /// Entries, newest first
    pub fn entries(&self) -> impl Iterator<Item = &PromptLog> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_vec(&self) -> Vec<PromptLog> {
        self.entries.iter().cloned().collect()
    }
}

/// User settings applied to every generation request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, alias = "customInstruction")]
    pub instruction: String,
}
