//! Persistent key-value storage
//!
//! The state owner keeps three blobs: the tree, the settings and the prompt
//! log. A [`Store`] only moves strings; decoding and fallbacks live in the
//! `load_*` helpers.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::models::{PromptLog, PromptLogBook, Settings, TreeData};
use crate::tree::check_forest;

/// Key of the `{nodes, edges}` tree blob
pub const TREE_KEY: &str = "thoughtree-data";
/// Key of the `{instruction}` settings blob
pub const SETTINGS_KEY: &str = "thoughtree-settings";
/// Key of the prompt log list, newest first
pub const LOGS_KEY: &str = "thoughtree-logs";

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid key '{0}'")]
    InvalidKey(String),
}

/// Blob storage surviving process restarts
pub trait Store: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn save(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// One JSON file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens a store rooted at `dir`, creating the directory if needed
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "file store opened");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl Store for FileStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // Blocking on purpose: callers hold the workspace lock so saves land in
    // mutation order, and each blob is a few kilobytes.
    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        // Write then rename so a crash never leaves a half-written blob
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// In-memory store, for tests and throwaway sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        match self.blobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Store for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.blobs().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.blobs().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Outcome of reading the tree blob
#[derive(Debug, Clone, PartialEq)]
pub enum LoadedTree {
    Found(TreeData),
    Missing,
    Corrupt,
}

/// Reads the tree blob, distinguishing a missing blob from a corrupt one.
/// A blob that parses but does not describe a forest counts as corrupt.
pub fn load_tree(store: &dyn Store) -> LoadedTree {
    match store.load(TREE_KEY) {
        Ok(Some(raw)) => match serde_json::from_str::<TreeData>(&raw) {
            Ok(data) => match check_forest(data) {
                Ok(data) => LoadedTree::Found(data),
                Err(e) => {
                    warn!(error = %e, "stored tree is not a forest, starting fresh");
                    LoadedTree::Corrupt
                }
            },
            Err(e) => {
                warn!(error = %e, "stored tree is corrupt, starting fresh");
                LoadedTree::Corrupt
            }
        },
        Ok(None) => LoadedTree::Missing,
        Err(e) => {
            warn!(error = %e, "could not read stored tree, starting fresh");
            LoadedTree::Corrupt
        }
    }
}

/// Reads the settings blob, falling back to defaults
pub fn load_settings(store: &dyn Store) -> Settings {
    match store.load(SETTINGS_KEY) {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(error = %e, "stored settings are corrupt, using defaults");
            Settings::default()
        }),
        Ok(None) => Settings::default(),
        Err(e) => {
            warn!(error = %e, "could not read settings, using defaults");
            Settings::default()
        }
    }
}

/// Reads the prompt log, falling back to an empty log
pub fn load_logs(store: &dyn Store) -> PromptLogBook {
    let entries: Vec<PromptLog> = match store.load(LOGS_KEY) {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(error = %e, "stored prompt log is corrupt, starting empty");
            Vec::new()
        }),
        Ok(None) => Vec::new(),
        Err(e) => {
            warn!(error = %e, "could not read prompt log, starting empty");
            Vec::new()
        }
    };
    // Stored newest first; recording oldest first keeps that order
    let mut book = PromptLogBook::new();
    for entry in entries.into_iter().rev() {
        book.record(entry);
    }
    book
}

pub fn save_tree(store: &dyn Store, data: &TreeData) -> Result<(), StoreError> {
    store.save(TREE_KEY, &serde_json::to_string(data)?)
}

pub fn save_settings(store: &dyn Store, settings: &Settings) -> Result<(), StoreError> {
    store.save(SETTINGS_KEY, &serde_json::to_string(settings)?)
}

pub fn save_logs(store: &dyn Store, logs: &PromptLogBook) -> Result<(), StoreError> {
    store.save(LOGS_KEY, &serde_json::to_string(logs)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Edge, ExpandMode, Node, Position, RequestKind};
    use chrono::Utc;

    #[test]
    fn test_file_store_round_trips_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("data")).unwrap();

        assert_eq!(store.load(TREE_KEY).unwrap(), None);
        store.save(TREE_KEY, "{}").unwrap();
        assert_eq!(store.load(TREE_KEY).unwrap().as_deref(), Some("{}"));
        assert!(store.dir().join("thoughtree-data.json").exists());
    }

    #[test]
    fn test_file_store_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.save("../escape", "x"),
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_corrupt_tree_is_reported() {
        let store = MemoryStore::new();
        assert_eq!(load_tree(&store), LoadedTree::Missing);

        store.save(TREE_KEY, "{not json").unwrap();
        assert_eq!(load_tree(&store), LoadedTree::Corrupt);

        let data = TreeData {
            nodes: vec![Node::new("a".into(), "A".into(), Position::default())],
            edges: Vec::new(),
        };
        save_tree(&store, &data).unwrap();
        assert_eq!(load_tree(&store), LoadedTree::Found(data));
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
    fn test_tree_that_is_not_a_forest_is_corrupt() {
        let store = MemoryStore::new();

        // r -> a -> b -> a
        let looped = shaped(&["r", "a", "b"], &[("r", "a"), ("a", "b"), ("b", "a")]);
        save_tree(&store, &looped).unwrap();
        assert_eq!(load_tree(&store), LoadedTree::Corrupt);

        // a -> b -> a with no root at all
        let ring = shaped(&["a", "b"], &[("a", "b"), ("b", "a")]);
        save_tree(&store, &ring).unwrap();
        assert_eq!(load_tree(&store), LoadedTree::Corrupt);

        let two_parents = shaped(&["p", "q", "c"], &[("p", "c"), ("q", "c")]);
        save_tree(&store, &two_parents).unwrap();
        assert_eq!(load_tree(&store), LoadedTree::Corrupt);
    }

    #[test]
    fn test_dangling_edges_and_repeated_ids_are_dropped_on_load() {
        let store = MemoryStore::new();
        let mut data = shaped(&["a", "b"], &[("a", "b"), ("a", "gone"), ("a", "b")]);
        data.nodes
            .push(Node::new("a".into(), "Shadow".into(), Position::default()));
        save_tree(&store, &data).unwrap();

        let LoadedTree::Found(loaded) = load_tree(&store) else {
            panic!("expected a usable tree");
        };
        assert_eq!(loaded, shaped(&["a", "b"], &[("a", "b")]));
    }

    #[test]
    fn test_settings_fall_back_to_default() {
        let store = MemoryStore::new();
        store.save(SETTINGS_KEY, "garbage").unwrap();
        assert_eq!(load_settings(&store), Settings::default());

        let settings = Settings {
            instruction: "Be brief.".to_string(),
        };
        save_settings(&store, &settings).unwrap();
        assert_eq!(load_settings(&store), settings);
    }

    #[test]
    fn test_logs_keep_newest_first_order() {
        let store = MemoryStore::new();
        let mut book = PromptLogBook::new();
        for n in 0..3 {
            book.record(PromptLog {
                id: format!("id{}", n),
                timestamp: Utc::now(),
                kind: RequestKind::Expand,
                mode: Some(ExpandMode::What),
                input_text: String::new(),
                full_prompt_text: String::new(),
                response_text: String::new(),
            });
        }
        save_logs(&store, &book).unwrap();

        let loaded = load_logs(&store);
        let ids: Vec<&str> = loaded.entries().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["id2", "id1", "id0"]);
    }
}
