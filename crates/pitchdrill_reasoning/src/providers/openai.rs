//! Request/response transport over `/chat/completions`.

use crate::api_types::{ChatMessage, SessionConfig, SessionUpdate, TurnRequest, TurnResponse};
use crate::retry::{with_retry, RetryConfig};
use crate::transport::ConversationTransport;
use anyhow::Result;
use async_trait::async_trait;
use pitchdrill_core::{ServiceCallError, TransportError};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::env;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug)]
pub struct OpenAiChatTransport {
    client: Client,
    api_key: String,
    base_url: String,
    retry: RetryConfig,
    /// Last metadata pushed by the session. Sent as the `user` tag on requests.
    metadata: Mutex<Map<String, Value>>,
}

impl OpenAiChatTransport {
    pub fn new(base_url: Option<&str>) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
        let base_url = base_url
            .map(str::to_string)
            .or_else(|| env::var("OPENAI_BASE_URL").ok())
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self::with_endpoint(client, &api_key, &base_url))
    }

    pub fn with_endpoint(client: Client, api_key: &str, base_url: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
            metadata: Mutex::new(Map::new()),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn metadata_tag(&self) -> Option<String> {
        let meta = self
            .metadata
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        meta.get("persona")
            .and_then(Value::as_str)
            .map(|p| format!("pitchdrill:{}", p))
    }

    fn payload(&self, request: &TurnRequest) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(ChatMessage::system(request.instructions.clone()));
        messages.extend(request.messages.iter().cloned());

        let mut payload = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if let Some(tag) = self.metadata_tag() {
            payload["user"] = json!(tag);
        }
        payload
    }
}

#[async_trait]
impl ConversationTransport for OpenAiChatTransport {
    async fn connect(&self, session: &SessionConfig) -> Result<(), TransportError> {
        tracing::debug!(
            "Chat transport ready for session {} ({})",
            session.session_id,
            self.base_url
        );
        *self
            .metadata
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = session.metadata.clone();
        Ok(())
    }

    async fn send_turn(&self, request: TurnRequest) -> Result<TurnResponse, ServiceCallError> {
        let payload = self.payload(&request);
        let url = format!("{}/chat/completions", self.base_url);

        let response = with_retry(&self.retry, "openai-chat", || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&payload)
                .send()
        })
        .await?;

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ServiceCallError::Network(e.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(ServiceCallError::EmptyResponse);
        }
        Ok(TurnResponse::text(text))
    }

    async fn update_session(&self, update: SessionUpdate) -> Result<(), ServiceCallError> {
        // Stateless API: instructions travel with every request, so only the
        // metadata needs keeping.
        *self
            .metadata
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = update.metadata;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_types::ChatRole;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(server: &MockServer) -> OpenAiChatTransport {
        OpenAiChatTransport::with_endpoint(Client::new(), "sk-test", &server.uri())
            .with_retry_config(RetryConfig::none())
    }

    fn request() -> TurnRequest {
        TurnRequest {
            instructions: "You are Sarah.".into(),
            messages: vec![ChatMessage {
                role: ChatRole::User,
                content: "Hello".into(),
            }],
            model: "gpt-3.5-turbo".into(),
            temperature: 0.7,
            max_tokens: 150,
            voice: None,
        }
    }

    #[tokio::test]
    async fn test_system_message_first_and_reply_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-3.5-turbo",
                "max_tokens": 150,
                "messages": [
                    {"role": "system", "content": "You are Sarah."},
                    {"role": "user", "content": "Hello"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": " Prove it. "}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = transport(&server).send_turn(request()).await.unwrap();
        assert_eq!(reply.text, "Prove it.");
        assert!(reply.audio.is_none());
    }

    #[tokio::test]
    async fn test_empty_choices_is_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = transport(&server).send_turn(request()).await.unwrap_err();
        assert!(matches!(err, ServiceCallError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_http_error_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = transport(&server).send_turn(request()).await.unwrap_err();
        assert!(matches!(err, ServiceCallError::Http { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_update_session_tags_requests() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"user": "pitchdrill:sarah-skeptic"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "ok"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let t = transport(&server);
        let mut metadata = Map::new();
        metadata.insert("persona".into(), json!("sarah-skeptic"));
        t.update_session(SessionUpdate {
            session_id: uuid::Uuid::new_v4(),
            instructions: String::new(),
            voice: pitchdrill_core::Voice::Shimmer,
            metadata,
        })
        .await
        .unwrap();
        assert_eq!(t.send_turn(request()).await.unwrap().text, "ok");
    }
}
