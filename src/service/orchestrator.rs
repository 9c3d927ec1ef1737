use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::warn;
use uuid::Uuid;

use crate::agent::ResponseGenerator;
use crate::db::MessageRepository;
use crate::errors::EngineError;
use crate::models::{GenerationRequest, HistoryTurn, Message, SenderRole};
use crate::realtime::RealtimeHub;
use crate::transcript::{Transcript, OPTIMISTIC_RETIRE_SECS};

/// Trailing turns handed to the response generator.
pub const CONTEXT_WINDOW: usize = 6;

const MAX_MESSAGE_LENGTH: usize = 8000;

const GENERATION_TIMEOUT: Duration = Duration::from_secs(20);

/// Drives one outbound user message end to end: optimistic insert, durable
/// write, bounded-context generation, reply merge.
///
/// At most one send is in flight per conversation; the guard is scoped so it
/// releases on every exit path, including errors.
pub struct ResponseOrchestrator {
    session_id: Uuid,
    transcript: Transcript,
    messages: Arc<dyn MessageRepository>,
    generator: Arc<dyn ResponseGenerator>,
    hub: RealtimeHub,
    in_flight: AtomicBool,
    generation_timeout: Duration,
}

impl ResponseOrchestrator {
    pub fn new(
        session_id: Uuid,
        transcript: Transcript,
        messages: Arc<dyn MessageRepository>,
        generator: Arc<dyn ResponseGenerator>,
        hub: RealtimeHub,
    ) -> Self {
        Self {
            session_id,
            transcript,
            messages,
            generator,
            hub,
            in_flight: AtomicBool::new(false),
            generation_timeout: GENERATION_TIMEOUT,
        }
    }

    /// Override the generation timeout (embedders with slower models).
    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn is_sending(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn send(&self, content: &str) -> Result<(), EngineError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(EngineError::EmptyMessage);
        }
        if content.len() > MAX_MESSAGE_LENGTH {
            return Err(EngineError::MessageTooLong {
                max: MAX_MESSAGE_LENGTH,
                actual: content.len(),
            });
        }

        let _guard =
            InFlightGuard::acquire(&self.in_flight).ok_or(EngineError::SendInFlight)?;

        self.transcript.retire_expired(OPTIMISTIC_RETIRE_SECS);

        // the context window covers what precedes this send
        let history = self.history_window();

        self.transcript
            .append_optimistic(Message::optimistic(self.session_id, SenderRole::User, content));

        // A failed save is logged and skipped: it must not cost the visitor
        // their answer. On success the inserted row goes out on the feed and
        // reconciles the optimistic bubble.
        match self
            .messages
            .insert(&Message::confirmed(self.session_id, SenderRole::User, content))
            .await
        {
            Ok(row) => {
                self.hub.publish(row);
            }
            Err(err) => warn!(error = %err, "failed to persist user message, continuing"),
        }

        let request = GenerationRequest {
            message: content.to_string(),
            session_id: self.session_id,
            history,
        };

        let reply = match timeout(self.generation_timeout, self.generator.generate(&request)).await
        {
            Err(_) => {
                return Err(EngineError::ResponseTimeout {
                    seconds: self.generation_timeout.as_secs(),
                })
            }
            Ok(Err(err)) => return Err(err),
            Ok(Ok(reply)) => reply,
        };
        if reply.trim().is_empty() {
            return Err(EngineError::EmptyReply);
        }

        // The durable row takes the realtime path; the direct response is
        // merged locally under its own id. Whichever lands second is dropped
        // by the transcript's role+content rule.
        match self
            .messages
            .insert(&Message::confirmed(self.session_id, SenderRole::Assistant, &reply))
            .await
        {
            Ok(row) => {
                self.hub.publish(row);
            }
            Err(err) => warn!(error = %err, "failed to persist assistant reply"),
        }
        self.transcript
            .merge(Message::confirmed(self.session_id, SenderRole::Assistant, &reply));

        Ok(())
    }

    fn history_window(&self) -> Vec<HistoryTurn> {
        let messages = self.transcript.messages();
        let skip = messages.len().saturating_sub(CONTEXT_WINDOW);
        messages.iter().skip(skip).map(HistoryTurn::from).collect()
    }
}

/// Scoped in-flight flag: acquired with a compare-exchange, released on drop.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then_some(Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
