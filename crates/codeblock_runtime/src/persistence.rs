//! Persistence
//!
//! Storage for authored graphs and PERSISTENT-scope variables. The engine only
//! talks to the [`PersistenceStore`] trait.
//!
//! Layout of a [`JsonFileStore`] data directory:
//!
//! ```text
//! data/
//!   graphs/<id>.graph.json
//!   variables.json
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use codeblock_types::{CodeGraph, DataValue};
use parking_lot::Mutex;
use tracing::debug;

const GRAPH_SUFFIX: &str = ".graph.json";
const VARIABLES_FILE: &str = "variables.json";

/// Error type for persistence operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid graph id: {0:?}")]
    InvalidId(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to access file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable storage for graphs and persistent variables
pub trait PersistenceStore: Send + Sync {
    fn load_graph(&self, id: &str) -> StoreResult<Option<CodeGraph>>;

    fn save_graph(&self, graph: &CodeGraph) -> StoreResult<()>;

    /// Ids of every stored graph, sorted
    fn list_graphs(&self) -> StoreResult<Vec<String>>;

    fn load_variables(&self) -> StoreResult<BTreeMap<String, DataValue>>;

    /// Stage a variable write; `None` deletes it. Durable after [`flush`].
    ///
    /// [`flush`]: PersistenceStore::flush
    fn set_variable(&self, name: &str, value: Option<DataValue>) -> StoreResult<()>;

    fn flush(&self) -> StoreResult<()>;
}

fn validate_id(id: &str) -> StoreResult<()> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.chars().any(|c| matches!(c, '/' | '\\' | ':') || c.is_control());
    if bad {
        Err(StoreError::InvalidId(id.to_string()))
    } else {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Store
// ─────────────────────────────────────────────────────────────────────────────

/// Store that keeps everything in memory
#[derive(Default)]
pub struct MemoryStore {
    graphs: Mutex<HashMap<String, CodeGraph>>,
    staged: Mutex<BTreeMap<String, DataValue>>,
    durable: Mutex<BTreeMap<String, DataValue>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with [`StoreError::Unavailable`]
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Variables made durable by the last successful flush
    pub fn durable_variables(&self) -> BTreeMap<String, DataValue> {
        self.durable.lock().clone()
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store set to fail".into()))
        } else {
            Ok(())
        }
    }
}

impl PersistenceStore for MemoryStore {
    fn load_graph(&self, id: &str) -> StoreResult<Option<CodeGraph>> {
        Ok(self.graphs.lock().get(id).cloned())
    }

    fn save_graph(&self, graph: &CodeGraph) -> StoreResult<()> {
        validate_id(&graph.id)?;
        self.check()?;
        self.graphs.lock().insert(graph.id.clone(), graph.clone());
        Ok(())
    }

    fn list_graphs(&self) -> StoreResult<Vec<String>> {
        let mut ids: Vec<String> = self.graphs.lock().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn load_variables(&self) -> StoreResult<BTreeMap<String, DataValue>> {
        Ok(self.durable.lock().clone())
    }

    fn set_variable(&self, name: &str, value: Option<DataValue>) -> StoreResult<()> {
        self.check()?;
        let mut staged = self.staged.lock();
        match value {
            Some(value) => staged.insert(name.to_string(), value),
            None => staged.remove(name),
        };
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        self.check()?;
        *self.durable.lock() = self.staged.lock().clone();
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON File Store
// ─────────────────────────────────────────────────────────────────────────────

/// Store backed by pretty-printed JSON files in a data directory
///
/// Files are written to a temporary sibling and renamed into place, so a
/// crash mid-write leaves the previous version intact.
pub struct JsonFileStore {
    root: PathBuf,
    variables: Mutex<Option<BTreeMap<String, DataValue>>>,
}

impl JsonFileStore {
    /// Open (and create if needed) a data directory
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("graphs"))?;
        debug!(path = %root.display(), "Opened JSON store");
        Ok(Self {
            root,
            variables: Mutex::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn graph_path(&self, id: &str) -> PathBuf {
        self.root.join("graphs").join(format!("{id}{GRAPH_SUFFIX}"))
    }

    fn variables_path(&self) -> PathBuf {
        self.root.join(VARIABLES_FILE)
    }

    fn read_variables(&self) -> StoreResult<BTreeMap<String, DataValue>> {
        let path = self.variables_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_atomic(path: &Path, content: &str) -> StoreResult<()> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl PersistenceStore for JsonFileStore {
    fn load_graph(&self, id: &str) -> StoreResult<Option<CodeGraph>> {
        validate_id(id)?;
        let path = self.graph_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save_graph(&self, graph: &CodeGraph) -> StoreResult<()> {
        validate_id(&graph.id)?;
        let content = serde_json::to_string_pretty(graph)?;
        Self::write_atomic(&self.graph_path(&graph.id), &content)?;
        debug!(graph_id = %graph.id, "Saved graph");
        Ok(())
    }

    fn list_graphs(&self) -> StoreResult<Vec<String>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(self.root.join("graphs"))? {
            let path = entry?.path();
            if let Some(id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(GRAPH_SUFFIX))
            {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn load_variables(&self) -> StoreResult<BTreeMap<String, DataValue>> {
        let mut cache = self.variables.lock();
        if let Some(vars) = cache.as_ref() {
            return Ok(vars.clone());
        }
        let vars = self.read_variables()?;
        *cache = Some(vars.clone());
        Ok(vars)
    }

    fn set_variable(&self, name: &str, value: Option<DataValue>) -> StoreResult<()> {
        let mut cache = self.variables.lock();
        if cache.is_none() {
            *cache = Some(self.read_variables()?);
        }
        if let Some(vars) = cache.as_mut() {
            match value {
                Some(value) => vars.insert(name.to_string(), value),
                None => vars.remove(name),
            };
        }
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        let cache = self.variables.lock();
        let Some(vars) = cache.as_ref() else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(vars)?;
        Self::write_atomic(&self.variables_path(), &content)?;
        debug!(count = vars.len(), "Flushed persistent variables");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeblock_types::CodeBlock;
    use tempfile::TempDir;

    fn sample_graph(id: &str) -> CodeGraph {
        let mut graph = CodeGraph::new(id, "Sample");
        let t = graph.add_block(CodeBlock::trigger("player_join"));
        let a = graph.add_block(CodeBlock::action("send_message").with_param("message", "Welcome"));
        graph.link_next(t, a).unwrap();
        graph
    }

    #[test]
    fn test_file_store_graph_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();

        store.save_graph(&sample_graph("lobby")).unwrap();
        store.save_graph(&sample_graph("arena")).unwrap();

        assert_eq!(store.list_graphs().unwrap(), vec!["arena", "lobby"]);
        let loaded = store.load_graph("lobby").unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(store.load_graph("missing").unwrap().is_none());
    }

    #[test]
    fn test_file_store_rejects_path_ids() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.save_graph(&sample_graph("../escape")),
            Err(StoreError::InvalidId(_))
        ));
    }

    #[test]
    fn test_file_store_variables_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = JsonFileStore::open(dir.path()).unwrap();
            store.set_variable("deaths", Some(DataValue::from(4))).unwrap();
            store.set_variable("motd", Some(DataValue::from("hi"))).unwrap();
            store.set_variable("motd", None).unwrap();
            store.flush().unwrap();
        }

        let store = JsonFileStore::open(dir.path()).unwrap();
        let vars = store.load_variables().unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars.get("deaths"), Some(&DataValue::from(4)));
    }

    #[test]
    fn test_unflushed_variables_are_not_durable() {
        let dir = TempDir::new().unwrap();
        {
            let store = JsonFileStore::open(dir.path()).unwrap();
            store.set_variable("pending", Some(DataValue::from(true))).unwrap();
        }
        let store = JsonFileStore::open(dir.path()).unwrap();
        assert!(store.load_variables().unwrap().is_empty());
    }

    #[test]
    fn test_memory_store_failure_mode() {
        let store = MemoryStore::new();
        store.set_variable("a", Some(DataValue::from(1))).unwrap();
        store.set_failing(true);
        assert!(store.flush().is_err());
        assert!(store.durable_variables().is_empty());

        store.set_failing(false);
        store.flush().unwrap();
        assert_eq!(store.durable_variables().len(), 1);
    }
}
