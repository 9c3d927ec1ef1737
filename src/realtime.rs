//! Realtime delivery of inserted message rows.
//!
//! The hub is the in-process equivalent of a "row inserted" event feed:
//! writers publish every durable insert, and each widget holds exactly one
//! subscription filtered to its session. Non-blocking: publish never awaits,
//! and a slow subscriber lags rather than stalling the writer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::models::Message;
use crate::transcript::Transcript;

const DEFAULT_CAPACITY: usize = 256;

/// Insert event carried on the feed. The row itself holds the session scope.
#[derive(Debug, Clone)]
pub struct MessageInserted {
    pub message: Message,
}

/// Broadcast feed of message inserts.
#[derive(Clone)]
pub struct RealtimeHub {
    tx: broadcast::Sender<MessageInserted>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an inserted row. Returns the number of live subscribers;
    /// zero subscribers is not an error.
    pub fn publish(&self, message: Message) -> usize {
        self.tx.send(MessageInserted { message }).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MessageInserted> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Attach a subscription for `session_id`, forwarding matching rows into the
/// transcript. Rows for other sessions are ignored; once the handle detaches,
/// nothing is forwarded again.
pub fn attach(hub: &RealtimeHub, session_id: Uuid, transcript: Transcript) -> SubscriptionHandle {
    let mut rx = hub.subscribe();
    let task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.message.session_id == session_id {
                        transcript.merge(event.message);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(%session_id, skipped, "realtime subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    SubscriptionHandle::new(session_id, task)
}

struct HandleInner {
    session_id: Uuid,
    task: JoinHandle<()>,
    detached: AtomicBool,
}

/// Handle to one live subscription. Detach is idempotent and also runs when
/// the last clone is dropped.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

impl SubscriptionHandle {
    fn new(session_id: Uuid, task: JoinHandle<()>) -> Self {
        Self { inner: Arc::new(HandleInner { session_id, task, detached: AtomicBool::new(false) }) }
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    pub fn detach(&self) {
        if self.inner.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.task.abort();
        debug!(session_id = %self.inner.session_id, "realtime subscription detached");
    }

    pub fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::Acquire)
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Owns the single active subscription for a widget. Attaching a new session
/// always detaches the previous one first, so listeners never leak across a
/// session change.
pub struct RealtimeSubscriber {
    hub: RealtimeHub,
    active: std::sync::Mutex<Option<SubscriptionHandle>>,
}

impl RealtimeSubscriber {
    pub fn new(hub: RealtimeHub) -> Self {
        Self { hub, active: std::sync::Mutex::new(None) }
    }

    pub fn attach(&self, session_id: Uuid, transcript: Transcript) -> SubscriptionHandle {
        let handle = attach(&self.hub, session_id, transcript);
        let previous = self.active.lock().unwrap().replace(handle.clone());
        if let Some(previous) = previous {
            previous.detach();
        }
        handle
    }

    pub fn detach(&self) {
        if let Some(handle) = self.active.lock().unwrap().take() {
            handle.detach();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SenderRole;
    use tokio::time::{sleep, Duration};

    fn row(session_id: Uuid, content: &str) -> Message {
        Message::confirmed(session_id, SenderRole::User, content)
    }

    async fn settle() {
        sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_fine() {
        let hub = RealtimeHub::new();
        assert_eq!(hub.publish(row(Uuid::new_v4(), "into the void")), 0);
    }

    #[tokio::test]
    async fn forwards_only_rows_for_the_attached_session() {
        let hub = RealtimeHub::new();
        let session_id = Uuid::new_v4();
        let transcript = Transcript::new();
        let handle = attach(&hub, session_id, transcript.clone());

        assert_eq!(hub.subscriber_count(), 1);
        hub.publish(row(session_id, "mine"));
        hub.publish(row(Uuid::new_v4(), "someone else's"));
        settle().await;

        let contents: Vec<_> = transcript.messages().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["mine"]);
        handle.detach();
    }

    #[tokio::test]
    async fn events_after_detach_are_dropped() {
        let hub = RealtimeHub::new();
        let session_id = Uuid::new_v4();
        let transcript = Transcript::new();
        let handle = attach(&hub, session_id, transcript.clone());

        handle.detach();
        settle().await;
        hub.publish(row(session_id, "late"));
        settle().await;

        assert!(transcript.is_empty());
    }

    #[tokio::test]
    async fn detach_is_idempotent() {
        let hub = RealtimeHub::new();
        let handle = attach(&hub, Uuid::new_v4(), Transcript::new());
        handle.detach();
        handle.detach();
        assert!(handle.is_detached());
    }

    #[tokio::test]
    async fn attaching_a_new_session_detaches_the_previous_one() {
        let hub = RealtimeHub::new();
        let subscriber = RealtimeSubscriber::new(hub.clone());

        let first_session = Uuid::new_v4();
        let first_transcript = Transcript::new();
        let first = subscriber.attach(first_session, first_transcript.clone());

        let second_session = Uuid::new_v4();
        let second_transcript = Transcript::new();
        let _second = subscriber.attach(second_session, second_transcript.clone());

        assert!(first.is_detached());
        settle().await;

        hub.publish(row(first_session, "stale"));
        hub.publish(row(second_session, "fresh"));
        settle().await;

        assert!(first_transcript.is_empty());
        assert_eq!(second_transcript.len(), 1);
    }
}
