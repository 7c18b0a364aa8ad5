//! Persistence interfaces: the history log and content store a [`Thread`]
//! owns, plus concrete on-disk implementations.
//!
//! [`Thread`]: crate::thread::Thread

use crate::error::Result;
use crate::types::Message;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Aggregate statistics over a history log.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HistoryStats {
    pub count: usize,
    pub total_tokens: usize,
}

/// The durable, append-only conversation log a [`Thread`] owns.
///
/// [`Thread`]: crate::thread::Thread
#[async_trait::async_trait]
pub trait HistoryLog: Send + Sync {
    /// Append a message, assigning it a final id, and return the stored
    /// copy.
    async fn append(&self, message: Message) -> Result<Message>;
    /// Return the most recent `n` messages, oldest-first.
    async fn get_recent(&self, n: usize) -> Result<Vec<Message>>;
    /// Return every message, oldest-first.
    async fn get_all(&self) -> Result<Vec<Message>>;
    /// Return aggregate stats over the full log.
    async fn get_stats(&self) -> Result<HistoryStats>;
    /// Full-text search over message content, newest-first.
    async fn search(&self, query: &str) -> Result<Vec<Message>>;
    /// Truncate the log to all messages strictly before `message_id`.
    /// Returns the number of messages removed.
    async fn truncate_before(&self, message_id: &str) -> Result<usize>;
}

/// A key-addressed blob store for content externalized out of the inline
/// prompt (SPEC_FULL §4.2's `[STORED:<id>]` sentinel mechanism).
#[async_trait::async_trait]
pub trait ContentStore: Send + Sync {
    /// Store a blob, returning its id.
    async fn put(&self, blob: &str) -> Result<String>;
    /// Retrieve a blob by id.
    async fn get(&self, id: &str) -> Result<Option<String>>;
    /// Search stored blobs, returning matching ids.
    async fn search(&self, query: &str) -> Result<Vec<String>>;
}

/// A [`HistoryLog`] backed by a single append-only JSONL file, with an
/// in-memory cache of the full history loaded at construction time.
///
/// The supervisor treats this type as internally thread-safe: all mutation
/// is serialized through an internal mutex, matching SPEC_FULL §5's
/// "shared-resource policy" contract that stores are thread-safe by
/// construction regardless of how the supervisor serializes its own
/// caches.
pub struct JsonlHistoryLog {
    path: PathBuf,
    cache: tokio::sync::Mutex<Vec<Message>>,
}

impl JsonlHistoryLog {
    /// Open (creating if absent) the JSONL file at `path`, loading any
    /// existing entries into the cache.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut cache = Vec::new();
        if path.exists() {
            let content = fs::read_to_string(&path).await?;
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                if let Ok(message) = serde_json::from_str::<Message>(line) {
                    cache.push(message);
                }
            }
        }
        Ok(Self {
            path,
            cache: tokio::sync::Mutex::new(cache),
        })
    }

    async fn rewrite(&self, messages: &[Message]) -> Result<()> {
        let mut out = String::new();
        for message in messages {
            out.push_str(&serde_json::to_string(message)?);
            out.push('\n');
        }
        fs::write(&self.path, out).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl HistoryLog for JsonlHistoryLog {
    async fn append(&self, message: Message) -> Result<Message> {
        let mut cache = self.cache.lock().await;
        let line = serde_json::to_string(&message)?;
        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        cache.push(message.clone());
        Ok(message)
    }

    async fn get_recent(&self, n: usize) -> Result<Vec<Message>> {
        let cache = self.cache.lock().await;
        let start = cache.len().saturating_sub(n);
        Ok(cache[start..].to_vec())
    }

    async fn get_all(&self) -> Result<Vec<Message>> {
        let cache = self.cache.lock().await;
        Ok(cache.clone())
    }

    async fn get_stats(&self) -> Result<HistoryStats> {
        let cache = self.cache.lock().await;
        let total_tokens = cache
            .iter()
            .map(|m| m.token_count.unwrap_or_else(|| (m.content.len() + 3) / 4))
            .sum();
        Ok(HistoryStats {
            count: cache.len(),
            total_tokens,
        })
    }

    async fn search(&self, query: &str) -> Result<Vec<Message>> {
        let cache = self.cache.lock().await;
        Ok(cache
            .iter()
            .rev()
            .filter(|m| m.content.contains(query))
            .cloned()
            .collect())
    }

    async fn truncate_before(&self, message_id: &str) -> Result<usize> {
        let mut cache = self.cache.lock().await;
        let Some(pos) = cache.iter().position(|m| m.id == message_id) else {
            return Ok(0);
        };
        let removed = cache.len() - pos;
        cache.truncate(pos);
        let snapshot = cache.clone();
        drop(cache);
        self.rewrite(&snapshot).await?;
        Ok(removed)
    }
}

/// A [`ContentStore`] backed by a flat directory of one file per blob,
/// named by a UUID.
pub struct DirContentStore {
    dir: PathBuf,
}

impl DirContentStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.blob"))
    }
}

#[async_trait::async_trait]
impl ContentStore for DirContentStore {
    async fn put(&self, blob: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        fs::write(self.path_for(&id), blob).await?;
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<String>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path).await?))
    }

    async fn search(&self, query: &str) -> Result<Vec<String>> {
        let mut matches = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Ok(content) = fs::read_to_string(&path).await {
                if content.contains(query) {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        matches.push(stem.to_string());
                    }
                }
            }
        }
        Ok(matches)
    }
}

/// Resolve the standard on-disk paths for a thread under a threads root
/// (SPEC_FULL §6): `<root>/N.jsonl`, `<root>/N.content`.
pub fn history_path(threads_root: &Path, thread_name: &str) -> PathBuf {
    threads_root.join(format!("{thread_name}.jsonl"))
}

pub fn content_store_dir(threads_root: &Path, thread_name: &str) -> PathBuf {
    threads_root.join(format!("{thread_name}.content"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageRole;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_append_and_get_recent() {
        let dir = tempdir().unwrap();
        let log = JsonlHistoryLog::open(dir.path().join("t1.jsonl")).await.unwrap();
        log.append(Message::new(MessageRole::User, "one")).await.unwrap();
        log.append(Message::new(MessageRole::Assistant, "two")).await.unwrap();

        let recent = log.get_recent(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "two");
    }

    #[tokio::test]
    async fn test_get_recent_zero_or_more_than_all_returns_all() {
        let dir = tempdir().unwrap();
        let log = JsonlHistoryLog::open(dir.path().join("t1.jsonl")).await.unwrap();
        log.append(Message::new(MessageRole::User, "one")).await.unwrap();
        log.append(Message::new(MessageRole::User, "two")).await.unwrap();

        let all_via_big_n = log.get_recent(1000).await.unwrap();
        assert_eq!(all_via_big_n.len(), 2);
    }

    #[tokio::test]
    async fn test_reopen_reloads_persisted_messages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t1.jsonl");
        {
            let log = JsonlHistoryLog::open(&path).await.unwrap();
            log.append(Message::new(MessageRole::User, "persisted")).await.unwrap();
        }
        let reopened = JsonlHistoryLog::open(&path).await.unwrap();
        let all = reopened.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].content, "persisted");
    }

    #[tokio::test]
    async fn test_truncate_before_removes_target_and_after() {
        let dir = tempdir().unwrap();
        let log = JsonlHistoryLog::open(dir.path().join("t1.jsonl")).await.unwrap();
        let m1 = log.append(Message::new(MessageRole::User, "one")).await.unwrap();
        log.append(Message::new(MessageRole::Assistant, "two")).await.unwrap();
        log.append(Message::new(MessageRole::User, "three")).await.unwrap();

        let removed = log.truncate_before(&m1.id).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(log.get_all().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_truncate_before_unknown_id_is_noop() {
        let dir = tempdir().unwrap();
        let log = JsonlHistoryLog::open(dir.path().join("t1.jsonl")).await.unwrap();
        log.append(Message::new(MessageRole::User, "one")).await.unwrap();
        let removed = log.truncate_before("does-not-exist").await.unwrap();
        assert_eq!(removed, 0);
        assert_eq!(log.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_content_store_put_get_roundtrip() {
        let dir = tempdir().unwrap();
        let store = DirContentStore::open(dir.path()).await.unwrap();
        let id = store.put("large blob of text").await.unwrap();
        let fetched = store.get(&id).await.unwrap();
        assert_eq!(fetched.as_deref(), Some("large blob of text"));
    }

    #[tokio::test]
    async fn test_content_store_get_missing_returns_none() {
        let dir = tempdir().unwrap();
        let store = DirContentStore::open(dir.path()).await.unwrap();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_content_store_search() {
        let dir = tempdir().unwrap();
        let store = DirContentStore::open(dir.path()).await.unwrap();
        store.put("the quick brown fox").await.unwrap();
        let other_id = store.put("unrelated text").await.unwrap();
        let matches = store.search("quick").await.unwrap();
        assert_eq!(matches.len(), 1);
        assert!(!matches.contains(&other_id));
    }
}
