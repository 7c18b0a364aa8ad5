//! Thread: the durable unit of conversation state, and the registry that
//! owns the `thread_name -> Thread` map (SPEC_FULL §3, §4.3, §9).

use crate::config::resolve_threads_root;
use crate::error::Result;
use crate::store::{content_store_dir, history_path, ContentStore, DirContentStore, HistoryLog, JsonlHistoryLog};
use crate::types::ThreadName;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use uuid::Uuid;

/// The tool-config document written once per (thread, session), read by
/// the freshly spawned subprocess regardless of the host's own working
/// directory (SPEC_FULL §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(rename = "llmToolServer")]
    pub llm_tool_server: String,
    #[serde(rename = "historyLogPath")]
    pub history_log_path: String,
    #[serde(rename = "contentStorePath")]
    pub content_store_path: String,
    #[serde(rename = "sessionStorePath")]
    pub session_store_path: String,
    #[serde(rename = "agentToolServer")]
    pub agent_tool_server: String,
    #[serde(rename = "controlApiBaseUrl")]
    pub control_api_base_url: String,
    #[serde(rename = "agentName")]
    pub agent_name: String,
}

/// A named, durable conversation thread.
///
/// Lazily created on first reference, persists across host restarts
/// (its on-disk state outlives the in-memory `Thread` value), and is
/// destroyed only by explicit teardown, which removes the tool-config
/// file but leaves history/content-store state on disk.
pub struct Thread {
    pub name: ThreadName,
    pub history: Arc<dyn HistoryLog>,
    pub content_store: Arc<dyn ContentStore>,
    pub session_id: String,
    pub home: PathBuf,
    pub project_path: Option<PathBuf>,
    tool_config_path: RwLock<Option<PathBuf>>,
}

impl Thread {
    /// Open (creating on-disk state as needed) the thread named `name`
    /// under `threads_root`.
    pub async fn open(name: ThreadName, threads_root: &Path) -> Result<Self> {
        let history = Arc::new(JsonlHistoryLog::open(history_path(threads_root, name.as_str())).await?);
        let content_store =
            Arc::new(DirContentStore::open(content_store_dir(threads_root, name.as_str())).await?);
        Ok(Self {
            name,
            history,
            content_store,
            session_id: Uuid::new_v4().to_string(),
            home: threads_root.to_path_buf(),
            project_path: None,
            tool_config_path: RwLock::new(None),
        })
    }

    /// Write (or rewrite, if missing) this thread's tool-config file,
    /// returning its path. The path lives alongside, not inside, the
    /// threads root (SPEC_FULL §6: `<root>/../mcp-config-<timestamp>.json`).
    pub async fn ensure_tool_config(&self, control_api_base_url: &str, timestamp_ms: i64) -> Result<PathBuf> {
        if let Some(existing) = self.tool_config_path.read().await.clone() {
            if existing.exists() {
                return Ok(existing);
            }
        }

        let parent = self
            .home
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.home.clone());
        let path = parent.join(format!("mcp-config-{timestamp_ms}.json"));

        let config = ToolConfig {
            llm_tool_server: "builtin://llm-tools".to_string(),
            history_log_path: history_path(&self.home, self.name.as_str())
                .to_string_lossy()
                .into_owned(),
            content_store_path: content_store_dir(&self.home, self.name.as_str())
                .to_string_lossy()
                .into_owned(),
            session_store_path: self.home.join(format!("{}.sessions", self.name)).to_string_lossy().into_owned(),
            agent_tool_server: "builtin://agent-tools".to_string(),
            control_api_base_url: control_api_base_url.to_string(),
            agent_name: self.name.to_string(),
        };

        fs::write(&path, serde_json::to_string_pretty(&config)?).await?;
        *self.tool_config_path.write().await = Some(path.clone());
        Ok(path)
    }

    /// Remove this thread's tool-config file, if one was written.
    pub async fn teardown_tool_config(&self) -> Result<()> {
        let mut guard = self.tool_config_path.write().await;
        if let Some(path) = guard.take() {
            if path.exists() {
                fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }

    /// Working directory the subprocess should be spawned in: the
    /// thread's project path if set, else the user's home directory.
    pub fn working_dir<'a>(&'a self, user_home: &'a Path) -> &'a Path {
        self.project_path.as_deref().unwrap_or(user_home)
    }
}

/// The single `thread_name -> Thread` map the supervisor owns
/// (SPEC_FULL §9: all mutation to this state flows through one owner).
pub struct ThreadRegistry {
    threads_root: PathBuf,
    threads: RwLock<HashMap<String, Arc<Thread>>>,
}

impl ThreadRegistry {
    pub fn new(user_home: &Path) -> Self {
        Self {
            threads_root: resolve_threads_root(user_home),
            threads: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_threads_root(threads_root: PathBuf) -> Self {
        Self {
            threads_root,
            threads: RwLock::new(HashMap::new()),
        }
    }

    /// Return the existing thread by name, or lazily create it.
    pub async fn get_or_create(&self, name: &ThreadName) -> Result<Arc<Thread>> {
        if let Some(thread) = self.threads.read().await.get(name.as_str()) {
            return Ok(thread.clone());
        }

        let mut guard = self.threads.write().await;
        if let Some(thread) = guard.get(name.as_str()) {
            return Ok(thread.clone());
        }
        let thread = Arc::new(Thread::open(name.clone(), &self.threads_root).await?);
        guard.insert(name.as_str().to_string(), thread.clone());
        Ok(thread)
    }

    /// Return `true` if a thread by this name has ever been created in
    /// this registry instance.
    pub async fn exists(&self, name: &ThreadName) -> bool {
        self.threads.read().await.contains_key(name.as_str())
    }

    /// List every known thread name, in no particular order.
    pub async fn names(&self) -> Vec<String> {
        self.threads.read().await.keys().cloned().collect()
    }

    /// Tear down every known thread's tool-config file (SPEC_FULL §4.3:
    /// the tool-config file is removed when the Thread is torn down).
    /// Call once, from the host's shutdown path.
    pub async fn teardown_all(&self) -> Result<()> {
        let threads: Vec<Arc<Thread>> = self.threads.read().await.values().cloned().collect();
        for thread in threads {
            thread.teardown_tool_config().await?;
        }
        Ok(())
    }
}
