use async_trait::async_trait;
use rig::client::Nothing;
use rig::completion::Chat;
use rig::message::Message as RigMessage;
use rig::prelude::CompletionClient;
use rig::providers::ollama;
use tracing::error;

use crate::errors::EngineError;
use crate::models::{GenerationRequest, SenderRole};

const DEFAULT_MODEL: &str = "llama3.2";
const PREAMBLE: &str = "You are the support assistant for this site. \
                        Answer questions about orders, bookings and account issues. \
                        Be concise and friendly; if you cannot help, say so and \
                        suggest contacting a human agent.";

/// The external response-generation call, behind a seam so the orchestrator
/// can be driven without a live model.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Generate a reply to `request.message` given the bounded history.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, EngineError>;
}

/// Replays the bounded (role, content) window as rig chat history.
fn to_rig_history(request: &GenerationRequest) -> Vec<RigMessage> {
    request
        .history
        .iter()
        .map(|turn| match turn.role {
            SenderRole::User => RigMessage::user(&turn.content),
            SenderRole::Assistant => RigMessage::assistant(&turn.content),
        })
        .collect()
}

/// Production generator over a local Ollama model via rig. A fresh agent is
/// built per request so the trailing window is replayed each time.
#[derive(Clone)]
pub struct OllamaResponder {
    client: ollama::Client,
    base_url: String,
    model: String,
}

impl OllamaResponder {
    pub fn new(base_url: &str) -> Self {
        let client = ollama::Client::builder()
            .api_key(Nothing)
            .base_url(base_url)
            .build()
            .expect("Failed to build Ollama client");
        Self {
            client,
            base_url: base_url.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl ResponseGenerator for OllamaResponder {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, EngineError> {
        let agent = self.client.agent(&self.model).preamble(PREAMBLE).build();

        let history = to_rig_history(request);

        agent.chat(request.message.as_str(), history).await.map_err(|e| {
            error!(
                "Response generation failed for session {}: {e}",
                request.session_id
            );
            let msg = e.to_string();
            if msg.contains("Connection refused") || msg.contains("connect") {
                EngineError::GeneratorUnavailable { host: self.base_url.clone() }
            } else {
                EngineError::ResponseGenerationFailure { message: msg }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HistoryTurn;
    use uuid::Uuid;

    #[test]
    fn history_preserves_turn_order_and_roles() {
        let request = GenerationRequest {
            message: "and shipping?".to_string(),
            session_id: Uuid::new_v4(),
            history: vec![
                HistoryTurn { role: SenderRole::User, content: "do you deliver?".into() },
                HistoryTurn { role: SenderRole::Assistant, content: "yes, worldwide".into() },
            ],
        };
        let history = to_rig_history(&request);
        assert_eq!(history.len(), 2);
    }
}
