//! The single owner of live state
//!
//! [`Core`] wraps the [`Tree`], the settings and the prompt log behind one
//! mutex, persists every change and publishes [`TreeEvent`]s. Expansion and
//! refinement are the only operations that cross an await: the lock is
//! released while the generator works, and the result is merged into the
//! tree as it exists when the answer arrives.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::generator::{clean_ideas, Generator, GeneratorError};
use crate::ids::IdGenerator;
use crate::models::{
    Edge, ExpandMode, Node, NodeId, Position, PromptLog, PromptLogBook, RequestKind, Settings,
    TreeData,
};
use crate::store::{self, LoadedTree, Store, StoreError};
use crate::tree::{Busy, ConnectError, Tree};

/// Core configuration
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Upper bound on a single generator call
    pub request_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Errors surfaced by the state owner
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Busy(#[from] Busy),

    #[error("generation failed: {0}")]
    Generation(#[from] GeneratorError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Notifications published to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeEvent {
    /// Nodes, edges, settings or the log changed
    Changed,
    ExpansionStarted { node_id: NodeId },
    ExpansionFinished { node_id: NodeId },
    /// The user-visible error signal for a failed generation
    ExpansionFailed { node_id: NodeId, message: String },
}

/// Everything a presentation layer needs to render the tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeView {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub can_undo: bool,
    pub can_redo: bool,
    pub any_expanding: bool,
    pub status: Option<String>,
}

/// A downloadable JSON export of the tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Export {
    pub file_name: String,
    pub contents: String,
}

struct Workspace {
    tree: Tree,
    settings: Settings,
    logs: PromptLogBook,
    log_ids: IdGenerator,
}

impl Workspace {
    fn view(&self) -> TreeView {
        let tree = &self.tree;
        TreeView {
            nodes: tree.nodes().to_vec(),
            edges: tree.edges().to_vec(),
            can_undo: tree.can_undo(),
            can_redo: tree.can_redo(),
            any_expanding: tree.any_expanding(),
            status: tree.status_message(Instant::now()).map(str::to_string),
        }
    }

    fn record_log(
        &mut self,
        kind: RequestKind,
        mode: Option<ExpandMode>,
        input_text: &str,
        full_prompt_text: String,
        response_text: String,
    ) {
        let entry = PromptLog {
            id: self.log_ids.next_id(),
            timestamp: Utc::now(),
            kind,
            mode,
            input_text: input_text.to_string(),
            full_prompt_text,
            response_text,
        };
        self.logs.record(entry);
    }
}

/// Releases the in-flight gate when a request future finishes, fails or is
/// dropped before completion.
struct RequestGuard {
    core: Core,
    armed: bool,
}

impl RequestGuard {
    fn new(core: Core) -> Self {
        Self { core, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        if self.armed {
            warn!("generator request abandoned, releasing in-flight gate");
            self.core.mutate(|ws| ws.tree.end_request());
        }
    }
}

#[derive(Clone)]
pub struct Core {
    inner: Arc<Mutex<Workspace>>,
    generator: Arc<dyn Generator>,
    store: Arc<dyn Store>,
    config: CoreConfig,
    update_tx: Arc<broadcast::Sender<TreeEvent>>,
}

impl Core {
    /// Creates a core around an existing tree, with default settings and an
    /// empty log
    pub fn new(
        tree: Tree,
        generator: Arc<dyn Generator>,
        store: Arc<dyn Store>,
        config: CoreConfig,
    ) -> Self {
        Self::from_parts(
            tree,
            Settings::default(),
            PromptLogBook::new(),
            generator,
            store,
            config,
        )
    }

    /// Restores tree, settings and log from the store. A missing or corrupt
    /// tree falls back to a fresh tree with a single root.
    pub fn load(
        generator: Arc<dyn Generator>,
        store: Arc<dyn Store>,
        config: CoreConfig,
    ) -> Self {
        let tree = match store::load_tree(store.as_ref()) {
            LoadedTree::Found(data) => {
                info!(nodes = data.nodes.len(), "restored stored tree");
                Tree::from_data(data, IdGenerator::new())
            }
            LoadedTree::Missing | LoadedTree::Corrupt => Tree::fresh(IdGenerator::new()),
        };
        let settings = store::load_settings(store.as_ref());
        let logs = store::load_logs(store.as_ref());

        let core = Self::from_parts(tree, settings, logs, generator, store, config);
        core.persist_tree(&core.lock());
        core
    }

    fn from_parts(
        tree: Tree,
        settings: Settings,
        logs: PromptLogBook,
        generator: Arc<dyn Generator>,
        store: Arc<dyn Store>,
        config: CoreConfig,
    ) -> Self {
        // Create a broadcast channel with capacity for 100 messages
        let (tx, _rx) = broadcast::channel(100);

        Self {
            inner: Arc::new(Mutex::new(Workspace {
                tree,
                settings,
                logs,
                log_ids: IdGenerator::new(),
            })),
            generator,
            store,
            config,
            update_tx: Arc::new(tx),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Workspace> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist_tree(&self, ws: &Workspace) {
        if let Err(e) = store::save_tree(self.store.as_ref(), &ws.tree.data()) {
            warn!(error = %e, "failed to persist tree");
        }
    }

    fn notify(&self, event: TreeEvent) {
        let _ = self.update_tx.send(event);
    }

    // Helper method to apply a change, persist the tree and notify observers
    fn mutate<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Workspace) -> R,
    {
        self.mutate_when(f, |_| true)
    }

    // Like `mutate`, but persists and notifies only when `changed` accepts
    // the result. Rejected and no-op operations leave the store untouched.
    fn mutate_when<F, R, C>(&self, f: F, changed: C) -> R
    where
        F: FnOnce(&mut Workspace) -> R,
        C: FnOnce(&R) -> bool,
    {
        let (result, changed) = {
            let mut ws = self.lock();
            let result = f(&mut ws);
            let changed = changed(&result);
            if changed {
                self.persist_tree(&ws);
            }
            (result, changed)
        };
        if changed {
            self.notify(TreeEvent::Changed);
        }
        result
    }

    /// Subscribe to state updates
    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.update_tx.subscribe()
    }

    // --- Queries --- //

    pub fn view(&self) -> TreeView {
        self.lock().view()
    }

    pub fn data(&self) -> TreeData {
        self.lock().tree.data()
    }

    pub fn node(&self, id: &str) -> Option<Node> {
        self.lock().tree.node(id).cloned()
    }

    pub fn history_len(&self) -> usize {
        self.lock().tree.history().past_len()
    }

    pub fn any_expanding(&self) -> bool {
        self.lock().tree.any_expanding()
    }

    /// The rotating status message, if a request is in flight
    pub fn status(&self) -> Option<String> {
        self.lock()
            .tree
            .status_message(Instant::now())
            .map(str::to_string)
    }

    pub fn settings(&self) -> Settings {
        self.lock().settings.clone()
    }

    /// Prompt log entries, newest first
    pub fn logs(&self) -> Vec<PromptLog> {
        self.lock().logs.to_vec()
    }

    /// Serializes the tree for download, named after today's date
    pub fn export(&self) -> Result<Export, CoreError> {
        let data = self.data();
        Ok(Export {
            file_name: format!("tree-{}.json", Utc::now().format("%Y-%m-%d")),
            contents: serde_json::to_string_pretty(&data)?,
        })
    }

    // --- Synchronous operations --- //

    pub fn add_root(&self) -> NodeId {
        self.mutate(|ws| ws.tree.add_root())
    }

    pub fn delete_node(&self, id: &str) -> bool {
        self.mutate_when(|ws| ws.tree.delete_node(id), |changed| *changed)
    }

    pub fn edit_node(&self, id: &str, text: &str) -> bool {
        self.mutate_when(|ws| ws.tree.edit_node(id, text), |changed| *changed)
    }

    pub fn connect(&self, source_id: &str, target_id: &str) -> Result<Edge, CoreError> {
        self.mutate_when(|ws| ws.tree.connect(source_id, target_id), Result::is_ok)
            .map_err(|e| {
                info!(error = %e, "connect rejected");
                CoreError::from(e)
            })
    }

    pub fn toggle_collapse(&self, id: &str) -> bool {
        self.mutate_when(|ws| ws.tree.toggle_collapse(id), |changed| *changed)
    }

    pub fn toggle_pin(&self, id: &str) -> bool {
        self.mutate_when(|ws| ws.tree.toggle_pin(id), |changed| *changed)
    }

    pub fn move_node(&self, id: &str, position: Position) -> bool {
        self.mutate_when(|ws| ws.tree.move_node(id, position), |changed| *changed)
    }

    pub fn auto_layout(&self) {
        self.mutate(|ws| ws.tree.auto_layout())
    }

    pub fn clear_all(&self, confirmed: bool) -> bool {
        self.mutate_when(|ws| ws.tree.clear_all(confirmed), |changed| *changed)
    }

    pub fn undo(&self) -> bool {
        self.mutate_when(|ws| ws.tree.undo(), |changed| *changed)
    }

    pub fn redo(&self) -> bool {
        self.mutate_when(|ws| ws.tree.redo(), |changed| *changed)
    }

    /// Replaces the instruction appended to every generation request
    pub fn set_instruction(&self, instruction: &str) -> Settings {
        let settings = {
            let mut ws = self.lock();
            ws.settings.instruction = instruction.trim().to_string();
            if let Err(e) = store::save_settings(self.store.as_ref(), &ws.settings) {
                warn!(error = %e, "failed to persist settings");
            }
            ws.settings.clone()
        };
        self.notify(TreeEvent::Changed);
        settings
    }

    fn persist_logs(&self) {
        let ws = self.lock();
        if let Err(e) = store::save_logs(self.store.as_ref(), &ws.logs) {
            warn!(error = %e, "failed to persist prompt log");
        }
    }

    async fn with_timeout<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, GeneratorError>>,
    ) -> Result<T, GeneratorError> {
        match tokio::time::timeout(self.config.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GeneratorError::Timeout(self.config.request_timeout)),
        }
    }

    // --- Generator requests --- //

    /// Replaces the subtree of `id` with freshly generated ideas.
    ///
    /// Returns the new child ids. A missing node, or a node deleted while
    /// the request was outstanding, yields an empty list. Fails with
    /// [`CoreError::Busy`] when another request is in flight and with
    /// [`CoreError::Generation`] when the generator fails, in which case the
    /// tree is left as it was.
    pub async fn expand(
        &self,
        id: &str,
        mode: ExpandMode,
        text_override: Option<&str>,
    ) -> Result<Vec<NodeId>, CoreError> {
        let (request, instruction) = self.mutate_when(
            |ws| {
                ws.tree
                    .begin_expansion(id, mode, text_override)
                    .map(|request| (request, ws.settings.instruction.clone()))
            },
            |started| matches!(started, Ok((Some(_), _))),
        )?;
        let Some(request) = request else {
            return Ok(Vec::new());
        };
        let mut guard = RequestGuard::new(self.clone());
        self.notify(TreeEvent::ExpansionStarted {
            node_id: request.node_id.clone(),
        });

        let outcome = self
            .with_timeout(self.generator.expand(
                &request.text,
                mode,
                &request.context,
                &instruction,
            ))
            .await;

        let result = self.mutate(|ws| {
            let result = match outcome {
                Ok(expansion) => {
                    let response_text =
                        serde_json::to_string(&expansion.ideas).unwrap_or_default();
                    ws.record_log(
                        RequestKind::Expand,
                        Some(mode),
                        &request.text,
                        expansion.prompt,
                        response_text,
                    );
                    let ideas = clean_ideas(expansion.ideas);
                    if ideas.is_empty() {
                        Err(GeneratorError::EmptyResponse)
                    } else {
                        Ok(ws.tree.complete_expansion(&request, &ideas))
                    }
                }
                Err(e) => Err(e),
            };
            ws.tree.end_request();
            result
        });
        guard.disarm();
        self.persist_logs();

        match result {
            Ok(children) => {
                self.notify(TreeEvent::ExpansionFinished {
                    node_id: request.node_id,
                });
                Ok(children)
            }
            Err(e) => {
                error!(node = %request.node_id, error = %e, "expansion failed");
                self.notify(TreeEvent::ExpansionFailed {
                    node_id: request.node_id,
                    message: e.to_string(),
                });
                Err(CoreError::Generation(e))
            }
        }
    }

    /// Rewrites the text of `id`.
    ///
    /// Refinement failures are silent: the original text is kept and the
    /// node leaves the expanding state. Returns the node's resulting text, or
    /// `None` if the node does not exist (or was deleted meanwhile).
    pub async fn refine(&self, id: &str) -> Result<Option<String>, CoreError> {
        let (request, instruction) = self.mutate_when(
            |ws| {
                ws.tree
                    .begin_refine(id)
                    .map(|request| (request, ws.settings.instruction.clone()))
            },
            |started| matches!(started, Ok((Some(_), _))),
        )?;
        let Some(request) = request else {
            return Ok(None);
        };
        let mut guard = RequestGuard::new(self.clone());
        self.notify(TreeEvent::ExpansionStarted {
            node_id: request.node_id.clone(),
        });

        let outcome = self
            .with_timeout(self.generator.refine(&request.text, &instruction))
            .await;

        let text = self.mutate(|ws| {
            let text = match outcome {
                Ok(refinement) => {
                    ws.record_log(
                        RequestKind::Refine,
                        None,
                        &request.text,
                        refinement.prompt,
                        refinement.text.clone(),
                    );
                    ws.tree.complete_refine(&request.node_id, &refinement.text)
                }
                Err(e) => {
                    warn!(node = %request.node_id, error = %e, "refine failed, keeping text");
                    ws.tree.node(&request.node_id).map(|n| n.text.clone())
                }
            };
            ws.tree.end_request();
            text
        });
        guard.disarm();
        self.persist_logs();

        self.notify(TreeEvent::ExpansionFinished {
            node_id: request.node_id,
        });
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{Expansion, Refinement};
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast::error::TryRecvError;

    struct FixedGenerator;

    #[async_trait::async_trait]
    impl Generator for FixedGenerator {
        async fn expand(
            &self,
            text: &str,
            _mode: ExpandMode,
            _context: &[String],
            _instruction: &str,
        ) -> Result<Expansion, GeneratorError> {
            Ok(Expansion {
                ideas: vec![format!("{} 1", text), format!("{} 2", text)],
                prompt: format!("prompt for {}", text),
            })
        }

        async fn refine(
            &self,
            text: &str,
            _instruction: &str,
        ) -> Result<Refinement, GeneratorError> {
            Ok(Refinement {
                text: text.to_uppercase(),
                prompt: String::new(),
            })
        }
    }

    struct SlowGenerator;

    #[async_trait::async_trait]
    impl Generator for SlowGenerator {
        async fn expand(
            &self,
            _text: &str,
            _mode: ExpandMode,
            _context: &[String],
            _instruction: &str,
        ) -> Result<Expansion, GeneratorError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(GeneratorError::EmptyResponse)
        }

        async fn refine(
            &self,
            _text: &str,
            _instruction: &str,
        ) -> Result<Refinement, GeneratorError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(GeneratorError::EmptyResponse)
        }
    }

    /// Counts every write so tests can tell whether anything was persisted
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        saves: AtomicUsize,
    }

    impl CountingStore {
        fn saves(&self) -> usize {
            self.saves.load(Ordering::SeqCst)
        }
    }

    impl Store for CountingStore {
        fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.load(key)
        }

        fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save(key, value)
        }
    }

    fn core_with(generator: Arc<dyn Generator>, timeout: Duration) -> (Core, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let core = Core::load(
            generator,
            store.clone(),
            CoreConfig {
                request_timeout: timeout,
            },
        );
        (core, store)
    }

    fn root_id(core: &Core) -> NodeId {
        core.data().nodes[0].id.clone()
    }

    #[tokio::test]
    async fn test_load_from_empty_store_creates_single_root() {
        let (core, store) = core_with(Arc::new(FixedGenerator), Duration::from_secs(5));
        assert_eq!(core.data().nodes.len(), 1);
        assert_eq!(core.history_len(), 0);
        assert!(store.load(store::TREE_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expand_logs_and_persists() {
        let (core, store) = core_with(Arc::new(FixedGenerator), Duration::from_secs(5));
        let root = root_id(&core);

        let children = core.expand(&root, ExpandMode::What, None).await.unwrap();
        assert_eq!(children.len(), 2);
        assert!(!core.any_expanding());

        let logs = core.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].kind, RequestKind::Expand);
        assert_eq!(logs[0].mode, Some(ExpandMode::What));
        assert_eq!(logs[0].response_text, r#"["New Idea 1","New Idea 2"]"#);
        assert!(store.load(store::LOGS_KEY).unwrap().is_some());

        let stored = match store::load_tree(store.as_ref()) {
            LoadedTree::Found(data) => data,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(stored.nodes.len(), 3);
    }

    #[tokio::test]
    async fn test_expand_timeout_is_a_generation_failure() {
        let (core, _store) = core_with(Arc::new(SlowGenerator), Duration::from_millis(20));
        let root = root_id(&core);
        let mut events = core.subscribe();

        let result = core.expand(&root, ExpandMode::Why, None).await;
        assert!(matches!(
            result,
            Err(CoreError::Generation(GeneratorError::Timeout(_)))
        ));
        assert!(!core.any_expanding());
        assert!(!core.node(&root).unwrap().is_expanding);
        assert_eq!(core.data().nodes.len(), 1);
        assert_eq!(core.history_len(), 0);

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, TreeEvent::ExpansionFailed { .. }) {
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn test_refine_timeout_keeps_text_silently() {
        let (core, _store) = core_with(Arc::new(SlowGenerator), Duration::from_millis(20));
        let root = root_id(&core);

        let text = core.refine(&root).await.unwrap();
        assert_eq!(text.as_deref(), Some("New Idea"));
        assert!(!core.any_expanding());
        assert!(core.logs().is_empty());
    }

    #[tokio::test]
    async fn test_refine_replaces_text() {
        let (core, _store) = core_with(Arc::new(FixedGenerator), Duration::from_secs(5));
        let root = root_id(&core);

        let text = core.refine(&root).await.unwrap();
        assert_eq!(text.as_deref(), Some("NEW IDEA"));
        assert_eq!(core.logs()[0].kind, RequestKind::Refine);
        assert_eq!(core.history_len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_request_releases_gate() {
        let (core, _store) = core_with(Arc::new(SlowGenerator), Duration::from_secs(3600));
        let root = root_id(&core);

        let pending = core.expand(&root, ExpandMode::Why, None);
        // Poll once so the request is in flight, then drop it
        let _ = tokio::time::timeout(Duration::from_millis(20), pending).await;

        assert!(!core.any_expanding());
        assert!(!core.node(&root).unwrap().is_expanding);
    }

    #[tokio::test]
    async fn test_noop_operations_neither_persist_nor_notify() {
        let store = Arc::new(CountingStore::default());
        let core = Core::load(
            Arc::new(SlowGenerator),
            store.clone(),
            CoreConfig {
                request_timeout: Duration::from_secs(3600),
            },
        );
        let root = root_id(&core);
        let other = core.add_root();
        let mut events = core.subscribe();
        let saves = store.saves();

        assert!(!core.delete_node("missing"));
        assert!(!core.edit_node("missing", "Text"));
        assert!(!core.edit_node(&other, " New Idea "));
        assert!(!core.toggle_collapse("missing"));
        assert!(!core.toggle_pin("missing"));
        assert!(!core.move_node("missing", Position::new(1.0, 1.0)));
        assert!(!core.clear_all(false));
        assert!(!core.redo());
        assert!(core.connect(&root, &root).is_err());
        assert!(core.expand("missing", ExpandMode::Why, None).await.unwrap().is_empty());
        assert_eq!(core.refine("missing").await.unwrap(), None);

        assert_eq!(store.saves(), saves);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        // Hold a request in flight, then try to start another
        let pending = core.expand(&root, ExpandMode::Why, None);
        tokio::pin!(pending);
        let _ = tokio::time::timeout(Duration::from_millis(20), &mut pending).await;
        assert!(core.any_expanding());
        while events.try_recv().is_ok() {}
        let saves = store.saves();

        assert!(matches!(
            core.expand(&other, ExpandMode::What, None).await,
            Err(CoreError::Busy(_))
        ));
        assert!(matches!(core.refine(&other).await, Err(CoreError::Busy(_))));

        assert_eq!(store.saves(), saves);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_instruction_is_persisted() {
        let (core, store) = core_with(Arc::new(FixedGenerator), Duration::from_secs(5));
        core.set_instruction("  Answer in German. ");
        assert_eq!(core.settings().instruction, "Answer in German.");
        assert_eq!(
            store::load_settings(store.as_ref()).instruction,
            "Answer in German."
        );
    }

    #[tokio::test]
    async fn test_export_is_named_after_today() {
        let (core, _store) = core_with(Arc::new(FixedGenerator), Duration::from_secs(5));
        let export = core.export().unwrap();
        assert_eq!(
            export.file_name,
            format!("tree-{}.json", Utc::now().format("%Y-%m-%d"))
        );
        let data: TreeData = serde_json::from_str(&export.contents).unwrap();
        assert_eq!(data, core.data());
    }
}
