//! Context Assembler: builds the per-turn system prompt under a token
//! budget, from recent messages, always-include content, and retrieved
//! context.

use crate::types::{Message, MessageRole};

/// Number of most-recent messages considered for the recent-context block.
pub const RECENT_CONTEXT_COUNT: usize = 10;
/// Per-message truncation ceiling, in estimated tokens, for the recent
/// block.
pub const RECENT_MSG_MAX_TOKENS: usize = 500;
/// Total token budget for the assembled prompt.
pub const TOTAL_CONTEXT_BUDGET: usize = 120_000;
/// Reserved budget for the recent-context block specifically.
pub const RECENT_CONTEXT_BUDGET: usize = 6_000;

/// Fixed instruction block describing available fallback retrieval tools.
/// Constant across turns.
const FALLBACK_TOOLS_BLOCK: &str = "If you need more context than is shown above, use the \
available search tools to query prior conversation history or stored content directly.";

/// Conversation statistics passed into assembly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextStats {
    pub prior_message_count: usize,
    pub prior_token_total: usize,
}

/// An always-include block (e.g. pinned files) and its precomputed token
/// cost.
#[derive(Debug, Clone, Default)]
pub struct AlwaysInclude {
    pub text: String,
    pub tokens: usize,
}

/// Result of assembling a turn's context.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    /// The final system-prompt string to pass to the subprocess.
    pub prompt: String,
    /// The user's input text, possibly rewritten to a `[STORED:<id>]`
    /// sentinel if it was externalized.
    pub user_text: String,
}

/// Character-based token approximation (1 token ~= 4 characters), matching
/// the estimator used across the recent-block truncation and
/// externalization decision so both paths agree on what "large" means.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

/// Compute the retrieval budget to hand to the opaque retriever: whatever
/// remains of the total budget after the user query, the always-include
/// block, and the reserved recent-context budget.
pub fn rag_budget(user_query_tokens: usize, always_include_tokens: usize) -> usize {
    TOTAL_CONTEXT_BUDGET
        .saturating_sub(user_query_tokens)
        .saturating_sub(always_include_tokens)
        .saturating_sub(RECENT_CONTEXT_BUDGET)
}

/// Decide whether `text` should be externalized to the content store given
/// the current recent-context budget. Resolves SPEC_FULL's open question:
/// externalize whenever the estimated token count exceeds
/// `RECENT_MSG_MAX_TOKENS`, the same threshold used to truncate individual
/// recent messages.
pub fn should_externalize_user_input(text: &str, _budget: usize) -> bool {
    estimate_tokens(text) > RECENT_MSG_MAX_TOKENS
}

/// Truncate a single message's content to `RECENT_MSG_MAX_TOKENS`,
/// appending a `... [truncated]` marker when truncation occurred.
fn truncate_for_recent_block(content: &str) -> String {
    let max_chars = RECENT_MSG_MAX_TOKENS * 3;
    if content.len() <= max_chars {
        return content.to_string();
    }

    let boundary = content
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= max_chars)
        .last()
        .unwrap_or(0);

    let mut truncated = content[..boundary].to_string();
    truncated.push_str("... [truncated]");
    truncated
}

/// Format the recent-conversation block: walk `recent` newest-to-oldest,
/// truncating and accumulating until the next message would exceed the
/// remaining recent budget (stop at first over-budget message, do not
/// skip ahead to smaller later ones), then render in original
/// oldest-first order.
fn format_recent_block(recent: &[Message]) -> String {
    let mut taken: Vec<&Message> = Vec::new();
    let mut used = 0usize;

    for message in recent.iter().rev().take(RECENT_CONTEXT_COUNT) {
        let truncated = truncate_for_recent_block(&message.content);
        let cost = estimate_tokens(&truncated);
        if used + cost > RECENT_CONTEXT_BUDGET {
            break;
        }
        used += cost;
        taken.push(message);
    }

    taken.reverse();

    taken
        .iter()
        .map(|m| {
            let role = match m.role {
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
                MessageRole::SystemMarker => "system",
            };
            format!("[{}] {}", role, truncate_for_recent_block(&m.content))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Assemble the final prompt and possibly-rewritten user text for one
/// turn.
///
/// `externalize` is called with the user text and the recent-context
/// budget when externalization is indicated; it must write the content to
/// the content store and return the `[STORED:<id>]` sentinel.
pub fn assemble_context(
    stats: ContextStats,
    session_id: &str,
    recent: &[Message],
    user_text: &str,
    retrieved_context: &str,
    always_include: &AlwaysInclude,
    externalize: impl FnOnce(&str) -> String,
) -> AssembledContext {
    let final_user_text = if should_externalize_user_input(user_text, RECENT_CONTEXT_BUDGET) {
        externalize(user_text)
    } else {
        user_text.to_string()
    };

    let recent_block = format_recent_block(recent);

    let prompt = format!(
        "Prior messages: {prior_count} (~{prior_tokens} tokens)\n\
         Session: {session_id}\n\n\
         == Always included ==\n{always}\n\n\
         == Recent context ==\n{recent}\n\n\
         == Retrieved context ==\n{retrieved}\n\n\
         {fallback}\n",
        prior_count = stats.prior_message_count,
        prior_tokens = stats.prior_token_total,
        session_id = session_id,
        always = always_include.text,
        recent = recent_block,
        retrieved = retrieved_context,
        fallback = FALLBACK_TOOLS_BLOCK,
    );

    AssembledContext {
        prompt,
        user_text: final_user_text,
    }
}
