//! Event subscription for thread activity.
//!
//! Modeled as an owned receiver handle rather than a closure stored in a
//! global listener bag (SPEC_FULL §9): a caller subscribes, gets back a
//! [`Subscription`] it owns, and unsubscribing is simply dropping it. The
//! supervisor holds only the sending half and prunes dead senders lazily
//! when a send fails, so there is no cyclic reference between the
//! supervisor and its subscribers.

use crate::types::{Message, StreamSegment};
use tokio::sync::mpsc;

/// One lifecycle or streaming event for a thread, delivered to every
/// subscriber of that thread in the order described by SPEC_FULL §5.
#[derive(Clone)]
pub enum Event {
    /// Emitted once the user's Message (plus any attachment references)
    /// has been appended to history, before any `Stream*` event for the
    /// same turn.
    UserMessageAppended { message: Message },
    /// A Text segment's content, with the same leading-separator logic
    /// applied to the response accumulator.
    StreamChunk { text: String },
    /// Every decoded segment, regardless of kind.
    StreamSegment { segment: StreamSegment },
    /// A fatal error for this turn (currently: CLI spawn `ENOENT`).
    StreamError { error: String },
    /// Exactly one per `send_message` call, after all per-line tasks have
    /// resolved.
    StreamEnd {
        message: Option<Message>,
        fallback_text: Option<String>,
        segments: Vec<StreamSegment>,
    },
}

/// A caller-owned subscription to one thread's events. Drop it to
/// unsubscribe.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl Subscription {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<Event>) -> Self {
        Self { receiver }
    }

    /// Await the next event for this thread, or `None` once the
    /// supervisor itself has shut down.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }
}

/// The supervisor-held sending half for one thread's subscribers. Sends
/// that fail (receiver dropped) are silently discarded; the caller prunes
/// the list of dead senders on its own schedule.
#[derive(Clone)]
pub(crate) struct Broadcaster {
    senders: std::sync::Arc<tokio::sync::Mutex<Vec<mpsc::UnboundedSender<Event>>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            senders: std::sync::Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }

    pub async fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().await.push(tx);
        Subscription::new(rx)
    }

    /// Deliver `event` to every live subscriber, dropping any whose
    /// receiver has gone away.
    pub async fn emit(&self, event: Event) {
        let mut senders = self.senders.lock().await;
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }
}


impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::UserMessageAppended { .. } => write!(f, "UserMessageAppended"),
            Event::StreamChunk { .. } => write!(f, "StreamChunk"),
            Event::StreamSegment { .. } => write!(f, "StreamSegment"),
            Event::StreamError { error } => write!(f, "StreamError({error})"),
            Event::StreamEnd { .. } => write!(f, "StreamEnd"),
        }
    }
}
