use thiserror::Error;
use uuid::Uuid;

/// Top-level engine error. All variants carry a human-readable message for
/// display/logging.
#[derive(Debug, Error)]
pub enum EngineError {
    // ── Session resolution ───────────────────────────────────────────────────
    #[error("Stored session identifier '{raw}' is not a valid UUID")]
    MalformedSessionId { raw: String },

    #[error("Session '{id}' not found")]
    SessionNotFound { id: Uuid },

    #[error("Session '{id}' does not belong to the current visitor")]
    SessionOwnershipMismatch { id: Uuid },

    #[error("Session creation conflicted with an existing record")]
    SessionCreationConflict,

    #[error("Cannot start a conversation: {reason}")]
    CannotStartConversation { reason: String },

    // ── Persistence ──────────────────────────────────────────────────────────
    #[error("Database query failed: {message}")]
    DatabaseQueryFailed {
        message: String,
        #[source]
        source: sqlx::Error,
    },

    // ── Response generation ──────────────────────────────────────────────────
    #[error("Response generator unavailable at {host}")]
    GeneratorUnavailable { host: String },

    #[error("Response generation failed: {message}")]
    ResponseGenerationFailure { message: String },

    #[error("Response generation timed out after {seconds}s")]
    ResponseTimeout { seconds: u64 },

    #[error("Response generator returned an empty reply")]
    EmptyReply,

    // ── Send validation ──────────────────────────────────────────────────────
    #[error("Message content cannot be empty")]
    EmptyMessage,

    #[error("Message exceeds max length of {max} (actual: {actual})")]
    MessageTooLong { max: usize, actual: usize },

    #[error("A send is already in flight for this conversation")]
    SendInFlight,

    // ── System ───────────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl EngineError {
    pub fn db_query(message: impl Into<String>, source: sqlx::Error) -> Self {
        EngineError::DatabaseQueryFailed { message: message.into(), source }
    }

    /// Conditions that discard the stored session and fall through to
    /// creation instead of propagating.
    pub fn invalidates_session(&self) -> bool {
        matches!(
            self,
            EngineError::MalformedSessionId { .. }
                | EngineError::SessionNotFound { .. }
                | EngineError::SessionOwnershipMismatch { .. }
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::EmptyMessage
                | EngineError::MessageTooLong { .. }
                | EngineError::SendInFlight
        )
    }

    /// Recoverable conditions are surfaced inline in the conversation and the
    /// visitor may retry by sending again. Everything that is not fatal and
    /// not pure validation falls here.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::GeneratorUnavailable { .. }
                | EngineError::ResponseGenerationFailure { .. }
                | EngineError::ResponseTimeout { .. }
                | EngineError::EmptyReply
        ) || self.is_validation()
    }

    /// Only an exhausted creation conflict is fatal to the widget.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::CannotStartConversation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_session_conditions_invalidate_but_are_not_fatal() {
        let errs = [
            EngineError::MalformedSessionId { raw: "not-a-uuid".into() },
            EngineError::SessionNotFound { id: Uuid::new_v4() },
            EngineError::SessionOwnershipMismatch { id: Uuid::new_v4() },
        ];
        for err in errs {
            assert!(err.invalidates_session());
            assert!(!err.is_fatal());
        }
    }

    #[test]
    fn generation_failures_are_recoverable() {
        assert!(EngineError::ResponseTimeout { seconds: 20 }.is_recoverable());
        assert!(EngineError::EmptyReply.is_recoverable());
        assert!(!EngineError::CannotStartConversation { reason: "conflict".into() }.is_recoverable());
    }
}
