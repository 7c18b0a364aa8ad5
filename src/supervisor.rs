//! Subprocess Supervisor: spawns the external LLM CLI for a thread, routes
//! its decoded output to subscribers, and reconciles final state into the
//! thread's history log (SPEC_FULL §4.4).

use crate::config::resolve_cli_path;
use crate::context::{self, AlwaysInclude, ContextStats};
use crate::decoder::LineDecoder;
use crate::error::{Error, Result};
use crate::retrieval::Retriever;
use crate::store::HistoryLog;
use crate::subscriber::{Broadcaster, Event, Subscription};
use crate::thread::ThreadRegistry;
use crate::types::{
    Attachment, AttachmentKind, Message, MessageMetadata, MessageRole, ResolvedAttachment,
    StreamSegment, ThreadName,
};
use base64::Engine;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::Mutex;

/// Environment variable name prefix stripped from the subprocess's
/// environment (SPEC_FULL §4.4 step 7), alongside the literal legacy
/// variable `CLAUDECODE`.
const STRIPPED_ENV_PREFIX: &str = "CLAUDE_";
const STRIPPED_ENV_LITERAL: &str = "CLAUDECODE";

/// Outcome of a `revert` call.
#[derive(Debug, Clone)]
pub struct RevertOutcome {
    pub success: bool,
    pub removed_count: usize,
    pub error: Option<String>,
}

/// Owns every thread's state and the single `thread_name -> live_process`
/// map (SPEC_FULL §9). This is the only type in the crate that mutates
/// subprocess liveness; `kill_process` and the completion finalizer are
/// its sole writers.
pub struct Supervisor {
    user_home: PathBuf,
    registry: ThreadRegistry,
    active: Mutex<HashMap<String, Child>>,
    broadcasters: Mutex<HashMap<String, Broadcaster>>,
    retriever: Arc<dyn Retriever>,
    control_api_base_url: Mutex<String>,
}

impl Supervisor {
    pub fn new(user_home: PathBuf, registry: ThreadRegistry, retriever: Arc<dyn Retriever>) -> Self {
        Self {
            user_home,
            registry,
            active: Mutex::new(HashMap::new()),
            broadcasters: Mutex::new(HashMap::new()),
            retriever,
            control_api_base_url: Mutex::new("http://127.0.0.1:9223".to_string()),
        }
    }

    pub async fn set_control_api_base_url(&self, url: String) {
        *self.control_api_base_url.lock().await = url;
    }

    async fn broadcaster_for(&self, thread_name: &str) -> Broadcaster {
        let mut map = self.broadcasters.lock().await;
        map.entry(thread_name.to_string())
            .or_insert_with(Broadcaster::new)
            .clone()
    }

    /// Subscribe to events for `thread_name`.
    pub async fn subscribe(&self, thread_name: &ThreadName) -> Subscription {
        self.broadcaster_for(thread_name.as_str()).await.subscribe().await
    }

    /// `true` iff a subprocess is currently registered for this thread.
    pub async fn is_streaming(&self, thread_name: &str) -> bool {
        self.active.lock().await.contains_key(thread_name)
    }

    /// List every known agent and its status (SPEC_FULL §4.5).
    pub async fn list_agents(&self) -> Vec<crate::types::AgentInfo> {
        let names = self.registry.names().await;
        let active = self.active.lock().await;
        names
            .into_iter()
            .map(|name| {
                let status = if active.contains_key(&name) {
                    crate::types::AgentStatus::Streaming
                } else {
                    crate::types::AgentStatus::Idle
                };
                crate::types::AgentInfo { name, status }
            })
            .collect()
    }

    pub async fn thread_exists(&self, name: &ThreadName) -> bool {
        self.registry.exists(name).await
    }

    pub async fn ensure_thread(&self, name: &ThreadName) -> Result<()> {
        self.registry.get_or_create(name).await?;
        Ok(())
    }

    /// Terminate the active subprocess for `thread_name`, if any. A no-op
    /// when none is registered.
    pub async fn kill_process(&self, thread_name: &ThreadName) -> Result<()> {
        let mut active = self.active.lock().await;
        if let Some(mut child) = active.remove(thread_name.as_str()) {
            let _ = child.start_kill();
        }
        Ok(())
    }

    /// Shut down the supervisor: kill every live subprocess, then tear
    /// down each thread's tool-config file (SPEC_FULL §4.3: the
    /// tool-config file is removed when the Thread is torn down). Call
    /// once, e.g. from the host's process-exit handler.
    pub async fn shutdown(&self) -> Result<()> {
        let active_names: Vec<String> = self.active.lock().await.keys().cloned().collect();
        for name in active_names {
            if let Ok(thread_name) = ThreadName::new(name) {
                self.kill_process(&thread_name).await?;
            }
        }
        self.registry.teardown_all().await?;
        tracing::info!("supervisor shut down, all threads torn down");
        Ok(())
    }

    /// Return history for `thread_name`. `count <= 0` returns all;
    /// otherwise the most recent `count` messages. Attachments are mapped
    /// from `storedPath` to an absolute `path`.
    pub async fn get_history(&self, thread_name: &ThreadName, count: i64) -> Result<Vec<MessageView>> {
        let thread = self.registry.get_or_create(thread_name).await?;
        let messages = if count <= 0 {
            thread.history.get_all().await?
        } else {
            thread.history.get_recent(count as usize).await?
        };

        Ok(messages
            .into_iter()
            .map(|m| MessageView::from_message(m, &thread.home))
            .collect())
    }

    /// Truncate history to everything strictly before `message_id`. See
    /// `DESIGN.md` for the resolved semantics of `restore_git`.
    pub async fn revert(&self, thread_name: &ThreadName, message_id: &str, restore_git: bool) -> Result<RevertOutcome> {
        let thread = self.registry.get_or_create(thread_name).await?;
        let removed_count = match thread.history.truncate_before(message_id).await {
            Ok(n) => n,
            Err(e) => {
                return Ok(RevertOutcome {
                    success: false,
                    removed_count: 0,
                    error: Some(e.to_string()),
                });
            }
        };

        if restore_git {
            tracing::warn!(
                thread = thread_name.as_str(),
                "git restore requested but source control is an external collaborator; treating as a no-op"
            );
        }

        Ok(RevertOutcome {
            success: true,
            removed_count,
            error: None,
        })
    }

    /// Run one turn: append the user message, assemble context, spawn the
    /// CLI, and stream its output to subscribers (SPEC_FULL §4.4).
    pub async fn send_message(
        &self,
        thread_name: &ThreadName,
        user_text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<()> {
        let thread = self.registry.get_or_create(thread_name).await?;
        let broadcaster = self.broadcaster_for(thread_name.as_str()).await;

        // Step 2: build image blocks and file-reference lines.
        let mut image_blocks = Vec::new();
        let mut file_reference_lines = Vec::new();
        for attachment in &attachments {
            match attachment.kind {
                AttachmentKind::Image => {
                    let path = attachment.resolved_path(&thread.home);
                    match tokio::fs::read(&path).await {
                        Ok(bytes) => {
                            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                            image_blocks.push(serde_json::json!({
                                "type": "image",
                                "source": {
                                    "type": "base64",
                                    "media_type": attachment.mime_type,
                                    "data": encoded,
                                }
                            }));
                        }
                        Err(_) => {
                            file_reference_lines
                                .push(format!("[Attached image (unreadable): {}]", attachment.stored_path));
                        }
                    }
                }
                AttachmentKind::File => {
                    file_reference_lines.push(format!("[Attached file: {}]", attachment.stored_path));
                }
            }
        }

        let mut full_user_text = user_text.to_string();
        if !file_reference_lines.is_empty() {
            full_user_text.push('\n');
            full_user_text.push_str(&file_reference_lines.join("\n"));
        }

        // Step 3-4: append the user message and emit it.
        let user_message = Message::user(full_user_text.clone())
            .with_attachments(attachments.clone())
            .with_metadata(MessageMetadata {
                session_id: Some(thread.session_id.clone()),
                git_snapshot: None,
            });
        let stored = thread.history.append(user_message).await?;
        let emitted = MessageView::from_message(stored, &thread.home).into_message();
        broadcaster
            .emit(Event::UserMessageAppended { message: emitted })
            .await;

        // Step 5: gather stats, recent, always-include, retrieved context.
        let stats = thread.history.get_stats().await?;
        let recent = thread.history.get_recent(context::RECENT_CONTEXT_COUNT).await?;
        let always_include = AlwaysInclude::default();

        let retrieval_budget = context::rag_budget(context::estimate_tokens(&full_user_text), always_include.tokens);
        let retrieved_context = match self.retriever.retrieve(&full_user_text, &recent, retrieval_budget).await {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::warn!(thread = thread_name.as_str(), error = %e, "retrieval failed, using empty context");
                String::new()
            }
        };

        // Content-store writes are async and must happen before context
        // assembly, which only decides *whether* to externalize; the
        // sentinel it would produce is built here instead so the id it
        // embeds is the same id the blob was actually stored under.
        let final_user_text = if context::should_externalize_user_input(&full_user_text, context::RECENT_CONTEXT_BUDGET) {
            let id = thread.content_store.put(&full_user_text).await?;
            tracing::debug!(thread = thread_name.as_str(), stored_id = %id, "externalized user input");
            format!("[STORED:{id}]")
        } else {
            full_user_text.clone()
        };

        // Step 6: assemble context.
        let assembled = context::assemble_context(
            ContextStats {
                prior_message_count: stats.count,
                prior_token_total: stats.total_tokens,
            },
            &thread.session_id,
            &recent,
            &final_user_text,
            &retrieved_context,
            &always_include,
            |_| unreachable!("externalization already resolved above"),
        );

        // Step 7: resolve the CLI binary and build the spawn plan.
        let Some(cli_path) = resolve_cli_path(&self.user_home) else {
            let error = "claude CLI not found. Please install it first.".to_string();
            broadcaster.emit(Event::StreamError { error: error.clone() }).await;
            broadcaster
                .emit(Event::StreamEnd {
                    message: None,
                    fallback_text: None,
                    segments: Vec::new(),
                })
                .await;
            return Err(Error::spawn(error));
        };

        let tool_config_path = thread
            .ensure_tool_config(&self.control_api_base_url.lock().await.clone(), Utc::now().timestamp_millis())
            .await?;

        let has_images = !image_blocks.is_empty();
        let mut command = tokio::process::Command::new(&cli_path);
        command
            .arg("--print")
            .arg("--verbose")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--permission-mode")
            .arg("bypassPermissions")
            .arg("--mcp-config")
            .arg(&tool_config_path)
            .arg("--append-system-prompt")
            .arg(&assembled.prompt);

        if has_images {
            command.arg("--input-format").arg("stream-json");
            command.stdin(std::process::Stdio::piped());
        } else {
            command.arg(&assembled.user_text);
            command.stdin(std::process::Stdio::null());
        }

        command
            .current_dir(thread.working_dir(&self.user_home))
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .env_clear()
            .envs(filtered_env());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = if e.kind() == std::io::ErrorKind::NotFound {
                    Error::spawn("claude CLI not found. Please install it first.")
                } else {
                    Error::Io(e)
                };
                let error = err.to_string();
                broadcaster.emit(Event::StreamError { error: error.clone() }).await;
                broadcaster
                    .emit(Event::StreamEnd {
                        message: None,
                        fallback_text: None,
                        segments: Vec::new(),
                    })
                    .await;
                return Err(err);
            }
        };

        if has_images {
            if let Some(mut stdin) = child.stdin.take() {
                let mut content = image_blocks;
                content.push(serde_json::json!({"type": "text", "text": assembled.user_text}));
                let payload = serde_json::json!({
                    "type": "user",
                    "message": {"role": "user", "content": content}
                });
                let line = format!("{}\n", payload);
                stdin.write_all(line.as_bytes()).await?;
                stdin.shutdown().await?;
            }
        }

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        // Step 8: register the active process.
        self.active.lock().await.insert(thread_name.as_str().to_string(), child);

        // Step 10: stderr classification, running concurrently with stdout.
        let stderr_fatal: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let stderr_fatal_task = stderr_fatal.clone();
        let stderr_task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut buf = String::new();
            let _ = reader.read_to_string(&mut buf).await;
            if buf.contains("ENOENT") {
                *stderr_fatal_task.lock().await = Some(
                    "claude CLI not found. Please install it first.".to_string(),
                );
            }
        });

        // Step 9: drive the decoder loop over stdout, one decode task per
        // line. Each task only decodes its own line (pure, no shared
        // state); it does not touch the accumulator or emit events
        // itself, since concurrent tasks finish in whatever order the
        // scheduler picks, not line order.
        let mut line_handles: Vec<tokio::task::JoinHandle<Vec<StreamSegment>>> = Vec::new();

        let mut lines = BufReader::new(stdout).lines();
        let mut read_error = None;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let handle = tokio::spawn(async move {
                        // The post-processor is opaque per SPEC_FULL
                        // §4.4; this crate's default post-processing is
                        // the identity transform (no further
                        // externalization on the wire path).
                        let mut decoder = LineDecoder::new();
                        let mut segments = decoder.push(line.as_bytes());
                        segments.extend(decoder.flush());
                        segments
                    });
                    line_handles.push(handle);
                }
                Ok(None) => break,
                Err(e) => {
                    read_error = Some(e);
                    break;
                }
            }
        }

        // Step 11: await every per-line task, strictly in the order its
        // line was read, then apply accumulation and emission in that
        // same order. This is the critical ordering rule from SPEC_FULL
        // §5/§8: decoding may run concurrently, but the accumulated
        // response and the emitted stream-chunk/stream-segment sequence
        // must match decoder output order exactly. This runs even when
        // the stdout read loop ended in an error, so the active-process
        // entry is always cleaned up.
        let mut accumulated = String::new();
        let mut collected_segments = Vec::new();
        for handle in line_handles {
            let Ok(segments) = handle.await else { continue };
            for segment in segments {
                if let Some(text) = segment.as_text() {
                    let needs_separator = !accumulated.is_empty() && !accumulated.ends_with('\n');
                    let chunk = if needs_separator { format!("\n\n{text}") } else { text.to_string() };
                    accumulated.push_str(&chunk);
                    broadcaster.emit(Event::StreamChunk { text: chunk }).await;
                }
                collected_segments.push(segment.clone());
                broadcaster.emit(Event::StreamSegment { segment }).await;
            }
        }
        let _ = stderr_task.await;

        let finalize_result = self
            .finalize(thread_name, &thread.history, &broadcaster, accumulated, collected_segments, stderr_fatal, thread.session_id.clone())
            .await;

        match read_error {
            Some(e) => Err(e.into()),
            None => finalize_result,
        }
    }

    /// The completion finalizer (SPEC_FULL §4.4). Idempotent: deregisters
    /// the process and emits exactly one `stream-end`.
    #[allow(clippy::too_many_arguments)]
    async fn finalize(
        &self,
        thread_name: &ThreadName,
        history: &Arc<dyn HistoryLog>,
        broadcaster: &Broadcaster,
        accumulated: String,
        segments: Vec<StreamSegment>,
        stderr_fatal: Arc<Mutex<Option<String>>>,
        session_id: String,
    ) -> Result<()> {
        self.active.lock().await.remove(thread_name.as_str());

        if let Some(error) = stderr_fatal.lock().await.take() {
            broadcaster.emit(Event::StreamError { error: error.clone() }).await;
            broadcaster
                .emit(Event::StreamEnd {
                    message: None,
                    fallback_text: None,
                    segments,
                })
                .await;
            return Err(Error::spawn(error));
        }

        if accumulated.is_empty() {
            broadcaster
                .emit(Event::StreamEnd {
                    message: None,
                    fallback_text: None,
                    segments,
                })
                .await;
            return Ok(());
        }

        let assistant_message = Message::assistant(accumulated.clone()).with_metadata(MessageMetadata {
            session_id: Some(session_id),
            git_snapshot: None,
        });

        let appended = match history.append(assistant_message).await {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::warn!(thread = thread_name.as_str(), error = %e, "failed to append assistant message");
                None
            }
        };

        broadcaster
            .emit(Event::StreamEnd {
                message: appended,
                fallback_text: Some(accumulated),
                segments,
            })
            .await;

        Ok(())
    }
}

/// Strip any env var with the vendor prefix, plus the literal legacy
/// `CLAUDECODE` variable, from the host environment before handing it to
/// the spawned subprocess (SPEC_FULL §4.4 step 7).
fn filtered_env() -> Vec<(String, String)> {
    std::env::vars()
        .filter(|(key, _)| key != STRIPPED_ENV_LITERAL && !key.starts_with(STRIPPED_ENV_PREFIX))
        .collect()
}

/// An outward-facing view of a `Message` with attachments resolved to
/// absolute paths, as returned by `get_history`.
#[derive(Debug, Clone)]
pub struct MessageView {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: i64,
    pub attachments: Vec<ResolvedAttachment>,
}

impl MessageView {
    fn from_message(message: Message, thread_home: &std::path::Path) -> Self {
        let attachments = message
            .attachments
            .unwrap_or_default()
            .into_iter()
            .map(|a| ResolvedAttachment {
                name: a.name.clone(),
                path: a.resolved_path(thread_home).to_string_lossy().into_owned(),
                kind: a.kind,
                mime_type: a.mime_type.clone(),
            })
            .collect();
        Self {
            id: message.id,
            role: message.role,
            content: message.content,
            timestamp: message.timestamp,
            attachments,
        }
    }

    fn into_message(self) -> Message {
        Message {
            id: self.id,
            role: self.role,
            content: self.content,
            timestamp: self.timestamp,
            token_count: None,
            metadata: None,
            attachments: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::NullRetriever;
    use tempfile::tempdir;

    fn make_supervisor(home: PathBuf) -> Supervisor {
        let registry = ThreadRegistry::with_threads_root(home.join("threads"));
        Supervisor::new(home, registry, Arc::new(NullRetriever))
    }

    #[tokio::test]
    async fn test_fresh_thread_is_idle() {
        let dir = tempdir().unwrap();
        let supervisor = make_supervisor(dir.path().to_path_buf());
        let name = ThreadName::new("t1").unwrap();
        supervisor.ensure_thread(&name).await.unwrap();
        let agents = supervisor.list_agents().await;
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].status, crate::types::AgentStatus::Idle);
    }

    #[tokio::test]
    async fn test_kill_process_on_idle_thread_is_noop() {
        let dir = tempdir().unwrap();
        let supervisor = make_supervisor(dir.path().to_path_buf());
        let name = ThreadName::new("t1").unwrap();
        assert!(supervisor.kill_process(&name).await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_tears_down_every_thread_tool_config() {
        let dir = tempdir().unwrap();
        let supervisor = make_supervisor(dir.path().to_path_buf());
        let name = ThreadName::new("t1").unwrap();
        supervisor.ensure_thread(&name).await.unwrap();
        let thread = supervisor.registry.get_or_create(&name).await.unwrap();
        let config_path = thread.ensure_tool_config("http://127.0.0.1:9223", 1000).await.unwrap();
        assert!(config_path.exists());

        supervisor.shutdown().await.unwrap();
        assert!(!config_path.exists());
    }

    #[tokio::test]
    async fn test_get_history_zero_count_returns_all() {
        let dir = tempdir().unwrap();
        let supervisor = make_supervisor(dir.path().to_path_buf());
        let name = ThreadName::new("t1").unwrap();
        let thread = supervisor.registry.get_or_create(&name).await.unwrap();
        thread.history.append(Message::user("one")).await.unwrap();
        thread.history.append(Message::user("two")).await.unwrap();

        let all = supervisor.get_history(&name, 0).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_revert_unknown_message_returns_zero_removed() {
        let dir = tempdir().unwrap();
        let supervisor = make_supervisor(dir.path().to_path_buf());
        let name = ThreadName::new("t1").unwrap();
        supervisor.ensure_thread(&name).await.unwrap();
        let outcome = supervisor.revert(&name, "does-not-exist", false).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.removed_count, 0);
    }

    #[test]
    fn test_filtered_env_strips_vendor_prefix_and_legacy_var() {
        // SAFETY: test-local env vars.
        unsafe {
            std::env::set_var("CLAUDE_SECRET", "x");
            std::env::set_var("CLAUDECODE", "1");
            std::env::set_var("UNRELATED", "y");
        }
        let filtered = filtered_env();
        assert!(!filtered.iter().any(|(k, _)| k == "CLAUDE_SECRET"));
        assert!(!filtered.iter().any(|(k, _)| k == "CLAUDECODE"));
        assert!(filtered.iter().any(|(k, _)| k == "UNRELATED"));
        unsafe {
            std::env::remove_var("CLAUDE_SECRET");
            std::env::remove_var("CLAUDECODE");
            std::env::remove_var("UNRELATED");
        }
    }

}
