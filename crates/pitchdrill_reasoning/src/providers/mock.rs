//! Mock transport: scripted replies for tests and for running without API keys.

use crate::api_types::{SessionConfig, SessionUpdate, TurnRequest, TurnResponse};
use crate::transport::ConversationTransport;
use async_trait::async_trait;
use pitchdrill_core::{ServiceCallError, TransportError};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

type Scripted = Result<TurnResponse, ServiceCallError>;

/// Pops one scripted result per `send_turn`. When the script runs out it
/// answers with a fixed line that mentions the model name.
#[derive(Debug, Default)]
pub struct MockTransport {
    model: String,
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<TurnRequest>>,
    updates: Mutex<Vec<SessionUpdate>>,
    sessions: Mutex<Vec<SessionConfig>>,
    fail_connect: bool,
    fail_updates: bool,
    delay: Option<Duration>,
}

impl MockTransport {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..Self::default()
        }
    }

    /// Replies returned in order.
    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new("mock");
        for r in replies {
            mock.push_reply(r);
        }
        mock
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Record session updates, then reject them.
    pub fn failing_updates(mut self) -> Self {
        self.fail_updates = true;
        self
    }

    /// Sleep before answering every turn (to exercise timeouts and cancellation).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_reply(&self, text: impl Into<String>) {
        self.push(Ok(TurnResponse::text(text)));
    }

    pub fn push_error(&self, error: ServiceCallError) {
        self.push(Err(error));
    }

    pub fn push(&self, result: Scripted) {
        lock(&self.script).push_back(result);
    }

    pub fn requests(&self) -> Vec<TurnRequest> {
        lock(&self.requests).clone()
    }

    pub fn updates(&self) -> Vec<SessionUpdate> {
        lock(&self.updates).clone()
    }

    pub fn sessions(&self) -> Vec<SessionConfig> {
        lock(&self.sessions).clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ConversationTransport for MockTransport {
    async fn connect(&self, session: &SessionConfig) -> Result<(), TransportError> {
        if self.fail_connect {
            return Err(TransportError::Connect {
                endpoint: "mock://".to_string(),
                reason: "connection refused".to_string(),
            });
        }
        lock(&self.sessions).push(session.clone());
        Ok(())
    }

    async fn send_turn(&self, request: TurnRequest) -> Result<TurnResponse, ServiceCallError> {
        lock(&self.requests).push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = lock(&self.script).pop_front();
        match next {
            Some(result) => result,
            None => Ok(TurnResponse::text(format!(
                "(Mock {} reply) Go on, I'm listening.",
                self.model
            ))),
        }
    }

    async fn update_session(&self, update: SessionUpdate) -> Result<(), ServiceCallError> {
        lock(&self.updates).push(update);
        if self.fail_updates {
            return Err(ServiceCallError::Http {
                status: 503,
                body: "session update rejected".to_string(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TurnRequest {
        TurnRequest {
            instructions: "system".into(),
            messages: vec![],
            model: "m".into(),
            temperature: 0.7,
            max_tokens: 10,
            voice: None,
        }
    }

    #[tokio::test]
    async fn test_scripted_then_default() {
        let mock = MockTransport::scripted(["first"]);
        assert_eq!(mock.send_turn(request()).await.unwrap().text, "first");
        let fallback = mock.send_turn(request()).await.unwrap().text;
        assert!(fallback.contains("Mock"));
        assert_eq!(mock.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_error() {
        let mock = MockTransport::new("m");
        mock.push_error(ServiceCallError::EmptyResponse);
        assert!(mock.send_turn(request()).await.is_err());
    }
}
