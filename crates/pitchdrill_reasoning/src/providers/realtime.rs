//! Realtime transport: one WebSocket per session.
//!
//! Replies are push events, so every `response.create` carries a correlation
//! id in `response.metadata`. The reader task maps the server's response id
//! back to that correlation id and resolves the waiting turn.

use crate::api_types::{
    AudioClip, ChatRole, SessionConfig, SessionUpdate, TurnRequest, TurnResponse,
};
use crate::correlation::Correlator;
use crate::transport::ConversationTransport;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use pitchdrill_core::{ServiceCallError, TransportError, Voice};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::env;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type TurnResult = Result<TurnResponse, ServiceCallError>;

const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";
/// Suffix on the `conversation.item.create` event id, so errors raised by
/// either client event map back to the same turn.
const ITEM_SUFFIX: &str = "-item";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct RealtimeTransport {
    url: Url,
    api_key: String,
    turn_timeout: Duration,
    correlator: Correlator<TurnResult>,
    outgoing: Mutex<Option<mpsc::Sender<String>>>,
    metadata: Mutex<Map<String, Value>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeTransport {
    pub fn new(base_url: Option<&str>, turn_timeout: Duration) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
        Self::with_endpoint(base_url.unwrap_or(DEFAULT_REALTIME_URL), &api_key, turn_timeout)
    }

    pub fn with_endpoint(url: &str, api_key: &str, turn_timeout: Duration) -> Result<Self> {
        let url = Url::parse(url).context("Invalid realtime WS URL")?;
        Ok(Self {
            url,
            api_key: api_key.to_string(),
            turn_timeout,
            correlator: Correlator::new(),
            outgoing: Mutex::new(None),
            metadata: Mutex::new(Map::new()),
            reader: Mutex::new(None),
        })
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.outgoing)
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    async fn send_event(&self, event: Value) -> Result<(), ServiceCallError> {
        let tx = lock(&self.outgoing)
            .as_ref()
            .filter(|tx| !tx.is_closed())
            .cloned()
            .ok_or(TransportError::Closed)?;
        tx.send(event.to_string())
            .await
            .map_err(|_| TransportError::Closed)?;
        Ok(())
    }
}

#[async_trait]
impl ConversationTransport for RealtimeTransport {
    async fn connect(&self, session: &SessionConfig) -> Result<(), TransportError> {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("model", &session.model);
        let connect_err = |reason: String| TransportError::Connect {
            endpoint: self.url.to_string(),
            reason,
        };

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| connect_err(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| connect_err(e.to_string()))?;
        request.headers_mut().insert("Authorization", auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        tracing::info!("Connecting to realtime endpoint {}...", self.url);
        let (stream, _) = tokio::time::timeout(self.turn_timeout, connect_async(request))
            .await
            .map_err(|_| connect_err(format!("no handshake within {:?}", self.turn_timeout)))?
            .map_err(|e| connect_err(e.to_string()))?;
        tracing::info!("Realtime session {} connected", session.session_id);

        let (tx, rx) = mpsc::channel::<String>(32);
        let router = EventRouter::new(self.correlator.clone());
        let handle = tokio::spawn(run_connection(stream, rx, router));
        *lock(&self.outgoing) = Some(tx);
        if let Some(previous) = lock(&self.reader).replace(handle) {
            previous.abort();
        }
        *lock(&self.metadata) = session.metadata.clone();

        self.send_event(session_update_event(&session.instructions, session.voice))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn send_turn(&self, request: TurnRequest) -> Result<TurnResponse, ServiceCallError> {
        // The server keeps the conversation, so only the newest user line goes out.
        let user_text = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.clone())
            .ok_or_else(|| TransportError::Protocol("turn has no user message".into()))?;

        let pending = self.correlator.register();
        let id = pending.id();
        let metadata = lock(&self.metadata).clone();

        self.send_event(item_create_event(&id, &user_text)).await?;
        self.send_event(response_create_event(&id, &request, &metadata))
            .await?;
        tracing::debug!("Realtime turn {} sent", id);

        pending.wait(self.turn_timeout).await?
    }

    async fn update_session(&self, update: SessionUpdate) -> Result<(), ServiceCallError> {
        *lock(&self.metadata) = update.metadata;
        self.send_event(session_update_event(&update.instructions, update.voice))
            .await
    }

    async fn close(&self) {
        // Dropping the sender makes the reader task close the socket.
        lock(&self.outgoing).take();
        self.correlator.fail_all();
        tracing::info!("Realtime session closed");
    }

    fn name(&self) -> &'static str {
        "realtime"
    }
}

fn session_update_event(instructions: &str, voice: Voice) -> Value {
    json!({
        "type": "session.update",
        "session": {
            "instructions": instructions,
            "voice": voice.as_str(),
            "modalities": ["text", "audio"],
        }
    })
}

fn item_create_event(id: &Uuid, text: &str) -> Value {
    json!({
        "type": "conversation.item.create",
        "event_id": format!("{}{}", id, ITEM_SUFFIX),
        "item": {
            "type": "message",
            "role": "user",
            "content": [{"type": "input_text", "text": text}],
        }
    })
}

/// `response.metadata` only takes string values.
fn response_create_event(id: &Uuid, request: &TurnRequest, metadata: &Map<String, Value>) -> Value {
    let mut meta = Map::new();
    meta.insert("correlation_id".into(), Value::String(id.to_string()));
    for (key, value) in metadata {
        let value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        meta.insert(key.clone(), Value::String(value));
    }

    let modalities = if request.voice.is_some() {
        json!(["text", "audio"])
    } else {
        json!(["text"])
    };
    let mut response = json!({
        "modalities": modalities,
        "instructions": request.instructions,
        "temperature": request.temperature,
        "max_output_tokens": request.max_tokens,
        "metadata": meta,
    });
    if let Some(voice) = request.voice {
        response["voice"] = json!(voice.as_str());
    }

    json!({
        "type": "response.create",
        "event_id": id.to_string(),
        "response": response,
    })
}

async fn run_connection(stream: WsStream, mut rx: mpsc::Receiver<String>, mut router: EventRouter) {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => router.handle(&text),
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("Realtime server closed the connection: {:?}", frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!("Realtime connection error: {}", e);
                    break;
                }
                None => break,
            },
            outgoing = rx.recv() => match outgoing {
                Some(payload) => {
                    if let Err(e) = write.send(Message::Text(payload)).await {
                        tracing::error!("Realtime send failed: {}", e);
                        break;
                    }
                }
                None => {
                    let _ = write.close().await;
                    break;
                }
            },
        }
    }

    router.shutdown();
}

// ============================================================================
// Server events
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated(Value),
    #[serde(rename = "session.updated")]
    SessionUpdated(Value),
    #[serde(rename = "response.created")]
    ResponseCreated { response: ResponseBody },
    #[serde(rename = "response.text.delta")]
    TextDelta { response_id: String, delta: String },
    #[serde(rename = "response.audio_transcript.delta")]
    TranscriptDelta { response_id: String, delta: String },
    #[serde(rename = "response.audio.delta")]
    AudioDelta { response_id: String, delta: String },
    #[serde(rename = "response.done")]
    ResponseDone { response: ResponseBody },
    #[serde(rename = "error")]
    Error { error: ErrorBody },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    status_details: Option<Value>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

impl ResponseBody {
    fn correlation_id(&self) -> Option<Uuid> {
        self.metadata
            .as_ref()?
            .get("correlation_id")?
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    event_id: Option<String>,
}

struct Inflight {
    correlation: Uuid,
    text: String,
    audio: Vec<u8>,
}

impl Inflight {
    fn new(correlation: Uuid) -> Self {
        Self {
            correlation,
            text: String::new(),
            audio: Vec::new(),
        }
    }
}

/// Folds server events into per-turn results.
struct EventRouter {
    correlator: Correlator<TurnResult>,
    responses: HashMap<String, Inflight>,
}

impl EventRouter {
    fn new(correlator: Correlator<TurnResult>) -> Self {
        Self {
            correlator,
            responses: HashMap::new(),
        }
    }

    fn handle(&mut self, raw: &str) {
        let event: ServerEvent = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!("Ignored unparseable realtime event: {}", e);
                return;
            }
        };

        match event {
            ServerEvent::SessionCreated(_) => tracing::debug!("Realtime session created"),
            ServerEvent::SessionUpdated(_) => tracing::debug!("Realtime session updated"),
            ServerEvent::ResponseCreated { response } => match response.correlation_id() {
                Some(correlation) => {
                    self.responses.insert(response.id, Inflight::new(correlation));
                }
                None => tracing::debug!("Response {} has no correlation id", response.id),
            },
            ServerEvent::TextDelta { response_id, delta }
            | ServerEvent::TranscriptDelta { response_id, delta } => {
                if let Some(inflight) = self.responses.get_mut(&response_id) {
                    inflight.text.push_str(&delta);
                }
            }
            ServerEvent::AudioDelta { response_id, delta } => {
                if let Some(inflight) = self.responses.get_mut(&response_id) {
                    match base64::engine::general_purpose::STANDARD.decode(delta.as_bytes()) {
                        Ok(bytes) => inflight.audio.extend_from_slice(&bytes),
                        Err(e) => tracing::warn!("Bad audio delta on {}: {}", response_id, e),
                    }
                }
            }
            ServerEvent::ResponseDone { response } => self.finish(response),
            ServerEvent::Error { error } => self.fail(error),
            ServerEvent::Other => {}
        }
    }

    fn finish(&mut self, response: ResponseBody) {
        let inflight = self
            .responses
            .remove(&response.id)
            .or_else(|| response.correlation_id().map(Inflight::new));
        let Some(inflight) = inflight else {
            tracing::debug!("response.done for unknown response {}", response.id);
            return;
        };

        let result = match response.status.as_deref() {
            Some(status @ ("failed" | "cancelled")) => Err(TransportError::Protocol(format!(
                "response {} {}: {}",
                response.id,
                status,
                response.status_details.unwrap_or(Value::Null)
            ))
            .into()),
            _ if inflight.text.trim().is_empty() => Err(ServiceCallError::EmptyResponse),
            _ => Ok(TurnResponse {
                text: inflight.text.trim().to_string(),
                audio: (!inflight.audio.is_empty()).then(|| AudioClip {
                    mime: "audio/pcm".to_string(),
                    bytes: inflight.audio,
                }),
            }),
        };
        self.correlator.resolve(&inflight.correlation, result);
    }

    fn fail(&mut self, error: ErrorBody) {
        let correlation = error.event_id.as_deref().and_then(|id| {
            let id = id.strip_suffix(ITEM_SUFFIX).unwrap_or(id);
            Uuid::parse_str(id).ok()
        });
        match correlation {
            Some(correlation) => {
                self.responses.retain(|_, r| r.correlation != correlation);
                self.correlator.resolve(
                    &correlation,
                    Err(TransportError::Protocol(error.message).into()),
                );
            }
            None => tracing::warn!("Realtime server error: {}", error.message),
        }
    }

    fn shutdown(&mut self) {
        self.responses.clear();
        self.correlator.fail_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_types::ChatMessage;

    const WAIT: Duration = Duration::from_secs(1);

    fn request() -> TurnRequest {
        TurnRequest {
            instructions: "You are Dan.".into(),
            messages: vec![ChatMessage::user("Hi Dan")],
            model: "gpt-4o-realtime-preview".into(),
            temperature: 0.8,
            max_tokens: 150,
            voice: None,
        }
    }

    fn created(response_id: &str, correlation: &Uuid) -> String {
        json!({
            "type": "response.created",
            "response": {
                "id": response_id,
                "status": "in_progress",
                "metadata": {"correlation_id": correlation.to_string()}
            }
        })
        .to_string()
    }

    fn done(response_id: &str, status: &str) -> String {
        json!({
            "type": "response.done",
            "response": {"id": response_id, "status": status}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_deltas_resolve_matching_turn() {
        let correlator = Correlator::new();
        let mut router = EventRouter::new(correlator.clone());
        let first = correlator.register();
        let second = correlator.register();

        router.handle(&created("resp_1", &first.id()));
        router.handle(&created("resp_2", &second.id()));
        router.handle(r#"{"type":"response.text.delta","response_id":"resp_2","delta":"Second"}"#);
        router.handle(r#"{"type":"response.text.delta","response_id":"resp_1","delta":"Fine, "}"#);
        router.handle(
            r#"{"type":"response.audio_transcript.delta","response_id":"resp_1","delta":"go on."}"#,
        );
        router.handle(&done("resp_1", "completed"));
        router.handle(&done("resp_2", "completed"));

        assert_eq!(first.wait(WAIT).await.unwrap().unwrap().text, "Fine, go on.");
        assert_eq!(second.wait(WAIT).await.unwrap().unwrap().text, "Second");
    }

    #[tokio::test]
    async fn test_audio_delta_is_collected() {
        let correlator = Correlator::new();
        let mut router = EventRouter::new(correlator.clone());
        let pending = correlator.register();
        let audio = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]);

        router.handle(&created("resp_a", &pending.id()));
        router.handle(
            &json!({"type": "response.audio.delta", "response_id": "resp_a", "delta": audio})
                .to_string(),
        );
        router.handle(
            r#"{"type":"response.audio_transcript.delta","response_id":"resp_a","delta":"Hello"}"#,
        );
        router.handle(&done("resp_a", "completed"));

        let reply = pending.wait(WAIT).await.unwrap().unwrap();
        let clip = reply.audio.unwrap();
        assert_eq!(clip.mime, "audio/pcm");
        assert_eq!(clip.bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failed_response_is_protocol_error() {
        let correlator = Correlator::new();
        let mut router = EventRouter::new(correlator.clone());
        let pending = correlator.register();

        router.handle(&created("resp_f", &pending.id()));
        router.handle(&done("resp_f", "failed"));

        let err = pending.wait(WAIT).await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            ServiceCallError::Transport(TransportError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_completed_response() {
        let correlator = Correlator::new();
        let mut router = EventRouter::new(correlator.clone());
        let pending = correlator.register();

        router.handle(&created("resp_e", &pending.id()));
        router.handle(&done("resp_e", "completed"));

        let err = pending.wait(WAIT).await.unwrap().unwrap_err();
        assert!(matches!(err, ServiceCallError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_error_event_maps_back_through_item_id() {
        let correlator = Correlator::new();
        let mut router = EventRouter::new(correlator.clone());
        let pending = correlator.register();
        let event = json!({
            "type": "error",
            "event_id": "event_server_1",
            "error": {
                "type": "invalid_request_error",
                "message": "bad item",
                "event_id": format!("{}{}", pending.id(), ITEM_SUFFIX)
            }
        });

        router.handle(&event.to_string());

        let err = pending.wait(WAIT).await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "protocol error: bad item");
    }

    #[tokio::test]
    async fn test_noise_and_shutdown() {
        let correlator = Correlator::new();
        let mut router = EventRouter::new(correlator.clone());
        let pending = correlator.register();

        router.handle("not json");
        router.handle(r#"{"type":"session.created","session":{"id":"sess_1"}}"#);
        router.handle(r#"{"type":"rate_limits.updated","rate_limits":[]}"#);
        router.handle(r#"{"type":"response.text.delta","response_id":"nobody","delta":"x"}"#);
        assert_eq!(correlator.in_flight(), 1);

        router.shutdown();
        let err = pending.wait(WAIT).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceCallError::Transport(TransportError::Closed)
        ));
    }

    #[test]
    fn test_response_create_stringifies_metadata() {
        let id = Uuid::new_v4();
        let mut metadata = Map::new();
        metadata.insert("persona".into(), json!("difficult-dan"));
        metadata.insert("frustration_level".into(), json!(7));

        let mut req = request();
        req.voice = Some(Voice::Onyx);
        let event = response_create_event(&id, &req, &metadata);

        assert_eq!(event["type"], "response.create");
        let meta = &event["response"]["metadata"];
        assert_eq!(meta["correlation_id"], id.to_string());
        assert_eq!(meta["frustration_level"], "7");
        assert_eq!(meta["persona"], "difficult-dan");
        assert_eq!(event["response"]["voice"], "onyx");
        assert_eq!(event["response"]["modalities"], json!(["text", "audio"]));
    }

    #[tokio::test]
    async fn test_send_before_connect_is_closed() {
        let t = RealtimeTransport::with_endpoint("ws://127.0.0.1:9/", "sk", WAIT).unwrap();
        assert!(!t.is_connected());
        let err = t.send_turn(request()).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceCallError::Transport(TransportError::Closed)
        ));
        assert_eq!(t.correlator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let t = RealtimeTransport::with_endpoint("ws://127.0.0.1:9/", "sk", WAIT).unwrap();
        let session = SessionConfig {
            session_id: Uuid::new_v4(),
            model: "gpt-4o-realtime-preview".into(),
            instructions: "x".into(),
            voice: Voice::Alloy,
            metadata: Map::new(),
        };
        let err = t.connect(&session).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_silent_server_handshake_times_out() {
        // Accepts the TCP connection but never answers the upgrade.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let url = format!("ws://{}/v1/realtime", addr);
        let t = RealtimeTransport::with_endpoint(&url, "sk", Duration::from_millis(100)).unwrap();
        let session = SessionConfig {
            session_id: Uuid::new_v4(),
            model: "gpt-4o-realtime-preview".into(),
            instructions: "x".into(),
            voice: Voice::Alloy,
            metadata: Map::new(),
        };

        let started = std::time::Instant::now();
        let err = t.connect(&session).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            TransportError::Connect { reason, .. } => assert!(reason.contains("no handshake")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!t.is_connected());
    }
}
