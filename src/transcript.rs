//! The ordered, deduplicated in-memory view of the active conversation.
//!
//! Messages legitimately arrive by two independent paths: the orchestrator's
//! direct call response and the realtime push of the same row being inserted.
//! The merge rule below is the correctness contract that keeps the visible
//! sequence free of duplicate bubbles, in `created_at` order, while letting
//! optimistic entries show up before the network confirms them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::watch;

use crate::models::{Message, MessageOrigin, SenderRole};

/// Two confirmed assistant rows with identical text within this window are
/// treated as the same generated reply arriving twice. Identical text further
/// apart merges as a genuine new message.
const DUPLICATE_WINDOW_SECS: i64 = 10;

/// Optimistic entries older than this with no confirmed counterpart stop
/// being reconciliation candidates. They stay visible: a failed save must not
/// erase the visitor's bubble.
pub const OPTIMISTIC_RETIRE_SECS: i64 = 30;

struct Inner {
    entries: Mutex<Vec<Message>>,
    revision: watch::Sender<u64>,
    closed: AtomicBool,
}

/// Shared handle to the conversation view. Cheap to clone; any task may merge
/// into it, and interested parties watch `changes()` for revision bumps.
#[derive(Clone)]
pub struct Transcript {
    inner: Arc<Inner>,
}

impl Transcript {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(Vec::new()),
                revision,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Replace the view with fetched history. Entries are merged one by one,
    /// so hydrating over existing content stays duplicate-free.
    pub fn hydrate(&self, history: Vec<Message>) {
        let mut changed = false;
        {
            let mut entries = self.inner.entries.lock().unwrap();
            for message in history {
                changed |= merge_into(&mut entries, message);
            }
        }
        if changed {
            self.bump();
        }
    }

    /// Insert a locally-queued message at the tail immediately. The UI must
    /// reflect sends without waiting on the network.
    pub fn append_optimistic(&self, message: Message) {
        if self.is_closed() {
            return;
        }
        {
            let mut entries = self.inner.entries.lock().unwrap();
            entries.push(message);
            entries.sort_by_key(|m| m.created_at);
        }
        self.bump();
    }

    /// Merge a confirmed message. A no-op once the transcript is closed: a
    /// late delivery for an inactive session is dropped, not an error.
    pub fn merge(&self, message: Message) {
        if self.is_closed() {
            return;
        }
        let changed = {
            let mut entries = self.inner.entries.lock().unwrap();
            merge_into(&mut entries, message)
        };
        if changed {
            self.bump();
        }
    }

    /// Retire optimistic entries older than `max_age_secs`: they are promoted
    /// to confirmed-local so a stray late row can no longer swallow them.
    pub fn retire_expired(&self, max_age_secs: i64) {
        let now = Utc::now();
        let mut changed = false;
        {
            let mut entries = self.inner.entries.lock().unwrap();
            for entry in entries.iter_mut() {
                if entry.is_optimistic() && (now - entry.created_at).num_seconds() >= max_age_secs {
                    entry.origin = MessageOrigin::Confirmed;
                    changed = true;
                }
            }
        }
        if changed {
            self.bump();
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Revision feed. The receiver observes a bump for every visible change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Mark the view inactive. Subsequent appends and merges are dropped.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.inner.revision.send_modify(|rev| *rev += 1);
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

/// The reconciliation rule, as a pure function over the backing vec.
///
/// In order:
/// 1. a message with the same id already exists → drop;
/// 2. an optimistic entry with the same role and identical content is still
///    awaiting confirmation → the incoming row replaces it in place;
/// 3. an assistant row whose text matches a confirmed assistant entry inside
///    the duplicate window → drop (direct response vs realtime push of the
///    same reply);
/// 4. otherwise insert, keeping `created_at` order with stable ties.
///
/// Returns whether the sequence changed.
fn merge_into(entries: &mut Vec<Message>, incoming: Message) -> bool {
    if entries.iter().any(|m| m.id == incoming.id) {
        return false;
    }

    if let Some(slot) = entries.iter_mut().find(|m| {
        m.is_optimistic() && m.sender_role == incoming.sender_role && m.content == incoming.content
    }) {
        *slot = incoming;
        entries.sort_by_key(|m| m.created_at);
        return true;
    }

    if incoming.sender_role == SenderRole::Assistant {
        let duplicate = entries.iter().any(|m| {
            m.sender_role == SenderRole::Assistant
                && m.content == incoming.content
                && (incoming.created_at - m.created_at).num_seconds().abs() <= DUPLICATE_WINDOW_SECS
        });
        if duplicate {
            return false;
        }
    }

    entries.push(incoming);
    entries.sort_by_key(|m| m.created_at);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn user_msg(session_id: Uuid, content: &str) -> Message {
        Message::confirmed(session_id, SenderRole::User, content)
    }

    #[test]
    fn merge_drops_duplicate_ids() {
        let session_id = Uuid::new_v4();
        let transcript = Transcript::new();
        let row = user_msg(session_id, "hello");

        transcript.merge(row.clone());
        transcript.merge(row);

        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn confirmed_row_replaces_matching_optimistic_entry() {
        let session_id = Uuid::new_v4();
        let transcript = Transcript::new();

        let optimistic = Message::optimistic(session_id, SenderRole::User, "Hello");
        transcript.append_optimistic(optimistic.clone());

        let confirmed = user_msg(session_id, "Hello");
        transcript.merge(confirmed.clone());

        let messages = transcript.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, confirmed.id);
        assert!(!messages[0].is_optimistic());
    }

    #[test]
    fn assistant_reply_arriving_twice_shows_once() {
        let session_id = Uuid::new_v4();
        let transcript = Transcript::new();

        // direct path and realtime path carry different ids for the same text
        let direct = Message::confirmed(session_id, SenderRole::Assistant, "Hi! How can I help?");
        let realtime = Message::confirmed(session_id, SenderRole::Assistant, "Hi! How can I help?");

        transcript.merge(direct);
        transcript.merge(realtime);

        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn identical_assistant_text_outside_the_window_is_a_new_message() {
        let session_id = Uuid::new_v4();
        let transcript = Transcript::new();

        let mut earlier = Message::confirmed(session_id, SenderRole::Assistant, "Sure.");
        earlier.created_at = Utc::now() - Duration::seconds(DUPLICATE_WINDOW_SECS + 5);
        transcript.merge(earlier);
        transcript.merge(Message::confirmed(session_id, SenderRole::Assistant, "Sure."));

        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn visible_order_follows_created_at_not_arrival() {
        let session_id = Uuid::new_v4();
        let transcript = Transcript::new();

        let mut first = user_msg(session_id, "first");
        first.created_at = Utc::now() - Duration::seconds(60);
        let second = user_msg(session_id, "second");

        // deliver out of order
        transcript.merge(second);
        transcript.merge(first);

        let contents: Vec<_> = transcript.messages().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[test]
    fn ties_on_created_at_keep_insertion_order() {
        let session_id = Uuid::new_v4();
        let transcript = Transcript::new();
        let at = Utc::now();

        for content in ["a", "b", "c"] {
            let mut row = user_msg(session_id, content);
            row.created_at = at;
            transcript.merge(row);
        }

        let contents: Vec<_> = transcript.messages().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
    }

    #[test]
    fn closed_transcript_drops_merges_silently() {
        let session_id = Uuid::new_v4();
        let transcript = Transcript::new();
        transcript.merge(user_msg(session_id, "kept"));

        transcript.close();
        transcript.merge(user_msg(session_id, "late"));
        transcript.append_optimistic(Message::optimistic(session_id, SenderRole::User, "late"));

        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn retire_expired_promotes_stale_optimistic_entries() {
        let session_id = Uuid::new_v4();
        let transcript = Transcript::new();

        let mut stale = Message::optimistic(session_id, SenderRole::User, "still here");
        stale.created_at = Utc::now() - Duration::seconds(OPTIMISTIC_RETIRE_SECS + 1);
        transcript.append_optimistic(stale);
        transcript.retire_expired(OPTIMISTIC_RETIRE_SECS);

        let messages = transcript.messages();
        assert_eq!(messages.len(), 1);
        assert!(!messages[0].is_optimistic());

        // a late row with the same text is now a separate message, not a
        // replacement
        transcript.merge(user_msg(session_id, "still here"));
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn changes_feed_observes_merges() {
        let session_id = Uuid::new_v4();
        let transcript = Transcript::new();
        let rx = transcript.changes();
        assert_eq!(*rx.borrow(), 0);

        transcript.merge(user_msg(session_id, "hello"));
        assert_eq!(*rx.borrow(), 1);

        // a dropped duplicate does not bump the revision
        let row = user_msg(session_id, "hello2");
        transcript.merge(row.clone());
        transcript.merge(row);
        assert_eq!(*rx.borrow(), 2);
    }
}
