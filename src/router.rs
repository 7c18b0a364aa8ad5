//! Agent Router: cross-thread message injection (SPEC_FULL §4.5).
//!
//! Lets one thread hand a message to another as if it arrived from a
//! collaborator rather than the user. Built on top of [`Supervisor`]
//! rather than folded into it, since injection is a policy layered over
//! the same `send_message`/`kill_process` primitives any caller can use.

use crate::error::{Error, Result};
use crate::supervisor::Supervisor;
use crate::types::{AgentInfo, ThreadName};
use std::sync::Arc;
use std::time::Duration;

/// Grace period after killing a target's in-flight turn, before injecting
/// the new message, so the subprocess has a moment to release its stdout
/// pipe (SPEC_FULL §4.5).
const KILL_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// Routes inter-agent messages over a shared [`Supervisor`].
pub struct AgentRouter {
    supervisor: Arc<Supervisor>,
}

impl AgentRouter {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }

    /// List every known agent and its status.
    pub async fn list_agents(&self) -> Vec<AgentInfo> {
        self.supervisor.list_agents().await
    }

    /// Borrow the underlying supervisor, for callers (like the control
    /// API) that need operations `AgentRouter` doesn't wrap directly.
    pub fn supervisor(&self) -> Arc<Supervisor> {
        self.supervisor.clone()
    }

    /// Inject `body`, attributed to `sender_name`, into `target_thread`.
    ///
    /// Rejects self-sends. If the target has a turn in flight, it is
    /// killed and given a short grace period before the injected message
    /// is sent, so the new turn doesn't race the old one's finalizer.
    /// Does not block on the injected turn's completion.
    pub async fn inject_message(&self, target_thread: &ThreadName, body: &str, sender_name: &str) -> Result<()> {
        if target_thread.as_str() == sender_name {
            return Err(Error::invalid_input("an agent cannot inject a message into itself"));
        }

        self.supervisor.ensure_thread(target_thread).await?;

        if self.supervisor.is_streaming(target_thread.as_str()).await {
            self.supervisor.kill_process(target_thread).await?;
            tokio::time::sleep(KILL_GRACE_PERIOD).await;
        }

        let injected_text = format!(
            "[From agent \"{sender_name}\"]:\n{body}\n\n\
             (Reply using send_to_agent(\"{sender_name}\", your_response) to respond directly. \
             Be concise and task-focused — no pleasantries or sign-offs.)"
        );

        let supervisor = self.supervisor.clone();
        let target = target_thread.clone();
        tokio::spawn(async move {
            if let Err(e) = supervisor.send_message(&target, &injected_text, Vec::new()).await {
                tracing::warn!(target = target.as_str(), error = %e, "injected message turn failed");
            }
        });

        Ok(())
    }
}
