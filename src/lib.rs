//! # Agent Supervisor
//!
//! A multi-agent conversational subprocess supervisor: each named thread
//! owns a durable history log and content store, and a turn is served by
//! spawning a local LLM CLI as a child process, streaming its line-JSON
//! output back to subscribers, and reconciling the final response into
//! history.
//!
//! ## Key Features
//!
//! - **Durable threads**: history and content-store state survive host
//!   restarts; a [`Thread`] is lazily created on first reference.
//! - **Subprocess streaming**: the LLM is reached by spawning a CLI binary
//!   per turn rather than calling an HTTP endpoint; its newline-delimited
//!   JSON output is decoded into a closed [`StreamSegment`] sum type.
//! - **Budgeted context assembly**: recent history, always-include
//!   content, and retrieved context are combined under a fixed token
//!   budget, externalizing oversized user input to the content store.
//! - **Cross-agent messaging**: an [`AgentRouter`] lets one thread inject
//!   a message into another, and a loopback-only [`api`] server exposes
//!   the same capability to co-resident tools.
//!
//! ## Example
//!
//! ```rust,no_run
//! use agent_supervisor::{Supervisor, ThreadRegistry, ThreadName, NullRetriever};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let home = PathBuf::from(std::env::var("HOME")?);
//!     let registry = ThreadRegistry::new(&home);
//!     let supervisor = Supervisor::new(home, registry, Arc::new(NullRetriever));
//!
//!     let name = ThreadName::new("planner")?;
//!     let mut subscription = supervisor.subscribe(&name).await;
//!     supervisor.send_message(&name, "What's 2+2?", Vec::new()).await?;
//!
//!     while let Some(event) = subscription.recv().await {
//!         println!("{event:?}");
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The crate is organized into several modules, each with a specific
//! responsibility:
//!
//! - **types**: messages, attachments, stream segments, validated thread
//!   identity.
//! - **decoder**: stateless line-JSON decoding of subprocess stdout.
//! - **context**: budgeted context assembly and externalization policy.
//! - **store**: durable history log and content store interfaces, with
//!   on-disk implementations.
//! - **thread**: the `Thread` and `ThreadRegistry` that own that durable
//!   state.
//! - **supervisor**: the subprocess spawn/stream/finalize loop.
//! - **router**: cross-thread message injection.
//! - **subscriber**: per-thread event subscription.
//! - **retrieval**: the opaque retrieval collaborator's interface.
//! - **api**: the loopback Local Control API.
//! - **config**: environment-driven resolution of the CLI path, control
//!   port, and threads-root directory.
//! - **error**: the crate-wide error type and conversions.

mod api;
mod config;
mod context;
mod decoder;
mod error;
mod retrieval;
mod router;
mod store;
mod subscriber;
mod supervisor;
mod thread;
mod types;

// --- Core API ---

pub use supervisor::{MessageView, RevertOutcome, Supervisor};

pub use router::AgentRouter;

// --- Threads and persistence ---

pub use thread::{Thread, ThreadRegistry, ToolConfig};

pub use store::{ContentStore, DirContentStore, HistoryLog, HistoryStats, JsonlHistoryLog};

// --- Streaming and events ---

pub use decoder::LineDecoder;

pub use subscriber::{Event, Subscription};

// --- Context assembly ---

pub use context::{
    assemble_context, estimate_tokens, rag_budget, should_externalize_user_input, AlwaysInclude,
    AssembledContext, ContextStats, RECENT_CONTEXT_BUDGET, RECENT_CONTEXT_COUNT,
    RECENT_MSG_MAX_TOKENS, TOTAL_CONTEXT_BUDGET,
};

// --- Retrieval ---

pub use retrieval::{NullRetriever, Retriever};

// --- Configuration ---

pub use config::{resolve_cli_path, resolve_control_port, resolve_threads_root, DEFAULT_CONTROL_PORT};

// --- Error handling ---

pub use error::{Error, Result};

// --- Core Types ---

pub use types::{
    AgentInfo, AgentStatus, Attachment, AttachmentKind, Message, MessageMetadata, MessageRole,
    ResolvedAttachment, StreamSegment, ThreadName,
};

// --- Local Control API ---

pub use api::serve as serve_control_api;

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// Convenience module containing the most commonly used types and
/// functions. Import with `use agent_supervisor::prelude::*;` to get
/// everything needed for typical usage.
pub mod prelude {
    pub use crate::{
        AgentInfo, AgentRouter, AgentStatus, Attachment, AttachmentKind, Error, Event, Message,
        MessageRole, MessageView, NullRetriever, Result, Retriever, StreamSegment, Supervisor,
        Thread, ThreadName, ThreadRegistry,
    };
}
