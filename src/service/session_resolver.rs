use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::SessionRepository;
use crate::errors::EngineError;
use crate::identity::IdentityStore;
use crate::models::{Identity, Session};

/// Resolves the durable session for the current identity, creating one when
/// no valid match exists.
///
/// One resolver per browser/tab context. Resolution is serialized through an
/// async mutex: if the widget is activated twice before the first resolution
/// completes, the second caller waits and then reuses the cached result
/// instead of creating a duplicate session.
pub struct SessionResolver {
    identity_store: Arc<dyn IdentityStore>,
    sessions: Arc<dyn SessionRepository>,
    resolved: Mutex<Option<Session>>,
}

impl SessionResolver {
    pub fn new(identity_store: Arc<dyn IdentityStore>, sessions: Arc<dyn SessionRepository>) -> Self {
        Self { identity_store, sessions, resolved: Mutex::new(None) }
    }

    pub async fn resolve(&self, identity: &Identity) -> Result<Session, EngineError> {
        let mut slot = self.resolved.lock().await;

        if let Some(session) = slot.as_ref() {
            if session.owned_by(identity) && self.stored_id_matches(session.id) {
                return Ok(session.clone());
            }
        }

        let session = match self.lookup_stored(identity).await {
            Ok(Some(session)) => session,
            Ok(None) => self.create(identity).await?,
            Err(err) if err.invalidates_session() => {
                debug!(error = %err, "discarding stored session");
                self.identity_store.clear_session_id();
                self.create(identity).await?
            }
            Err(err) => return Err(err),
        };

        *slot = Some(session.clone());
        Ok(session)
    }

    /// Drop the cached session and the stored identifier; the next resolve
    /// starts from scratch.
    pub async fn invalidate(&self) {
        let mut slot = self.resolved.lock().await;
        *slot = None;
        self.identity_store.clear_session_id();
    }

    /// The stored identifier is the cross-invocation shared state; the cache
    /// is only trusted while it still points at the same session.
    fn stored_id_matches(&self, id: Uuid) -> bool {
        self.identity_store
            .session_id()
            .and_then(|raw| Uuid::parse_str(&raw).ok())
            .is_some_and(|stored| stored == id)
    }

    /// Validate the stored identifier against the remote record.
    ///
    /// `Ok(None)` means nothing is stored. An `Err` that
    /// `invalidates_session()` means the stored identifier must be discarded;
    /// anything else is an infrastructure failure and propagates. A malformed
    /// identifier never reaches the remote store.
    async fn lookup_stored(&self, identity: &Identity) -> Result<Option<Session>, EngineError> {
        let Some(raw) = self.identity_store.session_id() else {
            return Ok(None);
        };

        let id = Uuid::parse_str(&raw)
            .map_err(|_| EngineError::MalformedSessionId { raw: raw.clone() })?;

        let session = self
            .sessions
            .find_by_id(id)
            .await?
            .ok_or(EngineError::SessionNotFound { id })?;

        if !session.owned_by(identity) {
            return Err(EngineError::SessionOwnershipMismatch { id });
        }

        Ok(Some(session))
    }

    /// Create a session bound to `identity` and persist its identifier.
    /// A creation conflict clears local state and retries exactly once.
    async fn create(&self, identity: &Identity) -> Result<Session, EngineError> {
        match self.create_once(identity).await {
            Err(EngineError::SessionCreationConflict) => {
                warn!("session creation conflicted, clearing local state and retrying once");
                self.identity_store.clear_session_id();
                self.create_once(identity).await.map_err(|err| match err {
                    EngineError::SessionCreationConflict => EngineError::CannotStartConversation {
                        reason: "session creation kept conflicting".to_string(),
                    },
                    other => other,
                })
            }
            other => other,
        }
    }

    async fn create_once(&self, identity: &Identity) -> Result<Session, EngineError> {
        let session = match identity {
            Identity::Authenticated { user_id } => Session::for_user(*user_id),
            Identity::Anonymous => Session::for_anonymous(self.ensure_anon_id()),
        };

        let created = self.sessions.insert(&session).await?;
        self.identity_store.set_session_id(&created.id.to_string());
        debug!(session_id = %created.id, authenticated = identity.is_authenticated(), "session created");
        Ok(created)
    }

    /// The anonymous identifier is minted lazily and persists for a year; a
    /// corrupted stored value is replaced rather than trusted.
    fn ensure_anon_id(&self) -> Uuid {
        if let Some(raw) = self.identity_store.anon_id() {
            if let Ok(id) = Uuid::parse_str(&raw) {
                return id;
            }
        }
        let id = Uuid::new_v4();
        self.identity_store.set_anon_id(&id.to_string());
        id
    }
}
