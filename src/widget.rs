//! The embeddable widget facade.
//!
//! `Widget::activate` walks the activation sequence — resolve the session for
//! the current identity, hydrate the transcript from history, attach the
//! realtime subscription — and hands back a live conversation handle. One
//! widget is one logical actor: all of its async inputs (resolution, realtime
//! deliveries, orchestrated sends) funnel into the shared transcript, whose
//! merge rule is the single synchronization point.

use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

use crate::agent::ResponseGenerator;
use crate::db::{MessageRepository, SessionRepository};
use crate::errors::EngineError;
use crate::models::{Identity, Message, Session};
use crate::realtime::{RealtimeHub, RealtimeSubscriber};
use crate::service::{ResponseOrchestrator, SessionResolver};
use crate::transcript::Transcript;

/// Shared backend collaborators, one set per process.
#[derive(Clone)]
pub struct WidgetServices {
    pub sessions: Arc<dyn SessionRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub generator: Arc<dyn ResponseGenerator>,
    pub hub: RealtimeHub,
}

/// A live conversation bound to one resolved session.
pub struct Widget {
    session: Session,
    transcript: Transcript,
    subscriber: RealtimeSubscriber,
    orchestrator: ResponseOrchestrator,
}

impl Widget {
    /// Activation: resolve (or create) the session, hydrate history, attach
    /// the realtime subscription.
    pub async fn activate(
        services: &WidgetServices,
        resolver: &SessionResolver,
        identity: &Identity,
    ) -> Result<Widget, EngineError> {
        let session = resolver.resolve(identity).await?;

        let transcript = Transcript::new();
        let history = services.messages.find_by_session_id(session.id).await?;
        transcript.hydrate(history);

        let subscriber = RealtimeSubscriber::new(services.hub.clone());
        subscriber.attach(session.id, transcript.clone());
        let orchestrator = ResponseOrchestrator::new(
            session.id,
            transcript.clone(),
            services.messages.clone(),
            services.generator.clone(),
            services.hub.clone(),
        );

        Ok(Widget { session, transcript, subscriber, orchestrator })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_id(&self) -> Uuid {
        self.session.id
    }

    /// Current merged view, ordered by `created_at`.
    pub fn messages(&self) -> Vec<Message> {
        self.transcript.messages()
    }

    /// Revision feed; bumps whenever the visible sequence changes.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.transcript.changes()
    }

    /// Send a user message. Validation and generation failures come back as
    /// recoverable errors; the optimistic bubble stays visible either way.
    pub async fn send(&self, content: &str) -> Result<(), EngineError> {
        self.orchestrator.send(content).await
    }

    pub fn is_sending(&self) -> bool {
        self.orchestrator.is_sending()
    }

    /// Tear down: detach the subscription and mark the transcript inactive.
    /// An in-flight generation is not cancelled; its late result merges into
    /// the closed transcript as a no-op.
    pub fn close(&self) {
        self.subscriber.detach();
        self.transcript.close();
    }
}

impl Drop for Widget {
    fn drop(&mut self) {
        self.close();
    }
}
