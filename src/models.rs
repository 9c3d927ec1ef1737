use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who the widget is currently speaking for.
///
/// Authentication itself happens upstream; by the time the engine sees an
/// identity it is either "some anonymous visitor" or a verified user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    Authenticated { user_id: Uuid },
}

impl Identity {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Identity::Authenticated { .. })
    }
}

/// A durable conversation session bound to exactly one identity.
///
/// Exactly one of `user_id`/`anon_id` is set; the pairing never changes after
/// creation. A session whose owner no longer matches the current identity is
/// discarded and recreated, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub anon_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn for_anonymous(anon_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            anon_id: Some(anon_id),
            created_at: Utc::now(),
        }
    }

    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: Some(user_id),
            anon_id: None,
            created_at: Utc::now(),
        }
    }

    /// Ownership check used during resolution.
    ///
    /// An authenticated visitor must match the bound user id exactly. An
    /// anonymous visitor is satisfied by any anonymous owner: the anonymous
    /// identifier rotates when client storage is cleared, so "is this an
    /// anonymous session" is the invariant, not the exact id.
    pub fn owned_by(&self, identity: &Identity) -> bool {
        match identity {
            Identity::Authenticated { user_id } => self.user_id == Some(*user_id),
            Identity::Anonymous => self.anon_id.is_some(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    User,
    Assistant,
}

impl SenderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderRole::User => "user",
            SenderRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for SenderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for SenderRole {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "user" => Ok(SenderRole::User),
            "assistant" => Ok(SenderRole::Assistant),
            other => Err(format!("Unknown sender role: {other}")),
        }
    }
}

/// Where a message entered the transcript. Transient: drives the merge
/// algorithm only and is never persisted or put on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MessageOrigin {
    /// Shown locally before the backing store acknowledged it.
    Optimistic,
    /// Acknowledged by the backing store (history fetch, realtime push, or a
    /// direct call response).
    #[default]
    Confirmed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub sender_role: SenderRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub origin: MessageOrigin,
}

impl Message {
    /// A locally-queued entry with a client-generated temporary id.
    pub fn optimistic(session_id: Uuid, sender_role: SenderRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            sender_role,
            content: content.into(),
            created_at: Utc::now(),
            origin: MessageOrigin::Optimistic,
        }
    }

    /// A durable entry carrying a server-issued id.
    pub fn confirmed(session_id: Uuid, sender_role: SenderRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            sender_role,
            content: content.into(),
            created_at: Utc::now(),
            origin: MessageOrigin::Confirmed,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        self.origin == MessageOrigin::Optimistic
    }
}

/// One (role, content) turn of the bounded context window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: SenderRole,
    pub content: String,
}

impl From<&Message> for HistoryTurn {
    fn from(message: &Message) -> Self {
        Self { role: message.sender_role, content: message.content.clone() }
    }
}

/// Request shape for the external response-generation call.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub message: String,
    pub session_id: Uuid,
    pub history: Vec<HistoryTurn>,
}

/// Commands a connected widget client may issue over the WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WidgetCommand {
    Send { content: String },
    Close,
}

/// Events pushed to a connected widget client.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WidgetEvent {
    /// Sent once after activation: the resolved session plus its history.
    SessionReady { session_id: Uuid, messages: Vec<Message> },
    /// The merged transcript after any change (optimistic insert, realtime
    /// delivery, direct reply).
    Transcript { messages: Vec<Message> },
    /// Recoverable condition, shown inline; the visitor may retry by sending
    /// again.
    Notice { message: String },
    /// Fatal condition; the widget cannot continue on this connection.
    Error { message: String },
}
