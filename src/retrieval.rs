//! The retrieval collaborator is treated as opaque (SPEC_FULL §1, §4.2):
//! this module only fixes the interface the Context Assembler calls
//! through, plus a conservative default implementation.

use crate::error::Result;
use crate::types::Message;

/// Retrieves context relevant to a query against a thread's history and
/// content store, bounded by a token budget.
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    /// Return a context string relevant to `query`, spending no more than
    /// `budget` estimated tokens. Implementations decide internally how
    /// to rank and truncate; failures should be surfaced as `Err` so the
    /// supervisor can log and fall back to empty context (SPEC_FULL §7).
    async fn retrieve(&self, query: &str, history: &[Message], budget: usize) -> Result<String>;
}

/// A retriever that always returns empty context. Used as the crate's
/// conservative default and in tests that don't exercise retrieval.
#[derive(Debug, Default)]
pub struct NullRetriever;

#[async_trait::async_trait]
impl Retriever for NullRetriever {
    async fn retrieve(&self, _query: &str, _history: &[Message], _budget: usize) -> Result<String> {
        Ok(String::new())
    }
}
