//! Core data model: messages, attachments, stream segments, thread identity.

use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// THREAD NAME
// ============================================================================

/// A validated, non-empty thread identifier.
///
/// Thread names double as agent names: the identity of an `Agent` is its
/// owning thread's name. Validation keeps the name usable as a path
/// component (history/content-store files are named after it).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadName(String);

impl ThreadName {
    /// Validate and construct a thread name.
    ///
    /// Must be non-empty, contain no path separators, and contain no NUL
    /// bytes.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::invalid_input("thread name cannot be empty"));
        }
        if name.contains('/') || name.contains('\\') || name.contains('\0') {
            return Err(Error::invalid_input(
                "thread name cannot contain path separators or NUL bytes",
            ));
        }
        Ok(Self(name))
    }

    /// Borrow the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ThreadName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// AGENT STATUS
// ============================================================================

/// Liveness status of an agent (thread), as reported by `list_agents`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// No subprocess registered for this thread.
    Idle,
    /// A subprocess is currently registered (actively streaming a turn).
    Streaming,
}

/// A thread exposed as an addressable peer, as returned by `list_agents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub status: AgentStatus,
}

// ============================================================================
// MESSAGE ROLE
// ============================================================================

/// The role of a `Message` within a thread's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    /// A non-conversational marker inserted into history (e.g. a revert
    /// boundary or session note). Never sent to the subprocess.
    SystemMarker,
}

// ============================================================================
// ATTACHMENTS
// ============================================================================

/// The kind of file referenced by an `Attachment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
}

/// A file attached to a user turn.
///
/// `stored_path` is the path as recorded in the history log, which may be
/// relative to the thread's home directory; `path` (produced by
/// `Attachment::resolved_path`) is always absolute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(rename = "storedPath")]
    pub stored_path: String,
    pub kind: AttachmentKind,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

impl Attachment {
    pub fn new(
        name: impl Into<String>,
        stored_path: impl Into<String>,
        kind: AttachmentKind,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            stored_path: stored_path.into(),
            kind,
            mime_type: mime_type.into(),
        }
    }

    /// Resolve `stored_path` to an absolute path against `thread_home` if
    /// it is not already absolute.
    pub fn resolved_path(&self, thread_home: &std::path::Path) -> std::path::PathBuf {
        let p = std::path::Path::new(&self.stored_path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            thread_home.join(p)
        }
    }
}

/// An outward-facing attachment shape where `storedPath` has been resolved
/// to `path`, used by `get_history` (SPEC_FULL §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedAttachment {
    pub name: String,
    pub path: String,
    pub kind: AttachmentKind,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

// ============================================================================
// MESSAGE
// ============================================================================

/// Free-form metadata carried on a `Message`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(rename = "gitSnapshot", skip_serializing_if = "Option::is_none")]
    pub git_snapshot: Option<String>,
}

/// A single message in a thread's history.
///
/// Messages are immutable once appended: every field here is set at
/// construction time and never mutated in place. Content may contain
/// `[STORED:<id>]` sentinels substituted by the context assembler when a
/// user input was externalized to the content store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: i64,
    #[serde(rename = "tokenCount", skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
}

impl Message {
    /// Build a new message. `id` is assigned here via a UUID; history logs
    /// that want their own id scheme may overwrite it on `append`.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now().timestamp_millis(),
            token_count: None,
            metadata: None,
            attachments: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn system_marker(content: impl Into<String>) -> Self {
        Self::new(MessageRole::SystemMarker, content)
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = if attachments.is_empty() {
            None
        } else {
            Some(attachments)
        };
        self
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_token_count(mut self, count: usize) -> Self {
        self.token_count = Some(count);
        self
    }
}

// ============================================================================
// STREAM SEGMENT
// ============================================================================

/// One typed event decoded from a subprocess's line-JSON output stream.
///
/// Modeled as a closed sum type (SPEC_FULL §9): consumers match
/// exhaustively rather than branching on a runtime type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StreamSegment {
    Text {
        content: String,
    },
    Thinking {
        content: String,
    },
    ToolUse {
        tool: String,
        #[serde(rename = "inputMap")]
        input_map: serde_json::Value,
    },
    ToolResult {
        content: String,
        #[serde(rename = "isError")]
        is_error: bool,
    },
    System {
        content: String,
    },
    Result {
        #[serde(rename = "durationMs")]
        duration_ms: u64,
        #[serde(rename = "inputTokens")]
        input_tokens: u64,
        #[serde(rename = "outputTokens")]
        output_tokens: u64,
    },
}

impl StreamSegment {
    /// The Text content of this segment, if it is one. Used by the
    /// supervisor's accumulator logic.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            StreamSegment::Text { content } => Some(content),
            _ => None,
        }
    }
}
