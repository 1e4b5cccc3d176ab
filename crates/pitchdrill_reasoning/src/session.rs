//! The persona conversation-state machine.
//!
//! One `PersonaSession` per simulated customer. It owns the history and the
//! affect level; everything that talks to the network is injected.

use crate::api_types::{ChatMessage, SessionConfig, SessionUpdate, TurnRequest, TurnResponse};
use crate::transport::ConversationTransport;
use pitchdrill_core::analysis::render_analysis;
use pitchdrill_core::config::LlmConfig;
use pitchdrill_core::{
    AffectLevel, AffectRule, AnalysisStore, AudioRef, ConversationHistory, PersonaProfile,
    PromptBuilder, Role, SavedAnalysis, ServiceCallError, SessionError, StorageError,
    TransportError, Turn,
};
use pitchdrill_voice::{AudioFormat, SpeechToText, TextToSpeech};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Assistant line recorded when the service call fails, times out or is cancelled.
pub const ERROR_REPLY: &str =
    "I'm sorry, I'm having trouble responding right now. Please try again.";

/// User line recorded when a voice turn could not be transcribed.
pub const INAUDIBLE: &str = "[inaudible]";

#[derive(Debug, Clone)]
pub enum TurnInput {
    Text(String),
    Audio { bytes: Vec<u8>, format: AudioFormat },
}

impl From<&str> for TurnInput {
    fn from(text: &str) -> Self {
        TurnInput::Text(text.to_string())
    }
}

impl From<String> for TurnInput {
    fn from(text: String) -> Self {
        TurnInput::Text(text)
    }
}

/// Per-request knobs, usually taken from `[llm]`.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub turn_timeout: Duration,
    /// Ask the service for spoken replies in the persona's voice.
    pub audio_replies: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&LlmConfig::default())
    }
}

impl From<&LlmConfig> for SessionOptions {
    fn from(config: &LlmConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            turn_timeout: config.turn_timeout(),
            audio_replies: false,
        }
    }
}

pub struct PersonaSession {
    id: Uuid,
    profile: PersonaProfile,
    rule: AffectRule,
    level: AffectLevel,
    history: ConversationHistory,
    transport: Arc<dyn ConversationTransport>,
    stt: Option<Arc<dyn SpeechToText>>,
    tts: Option<Arc<dyn TextToSpeech>>,
    options: SessionOptions,
    active: bool,
    cancel: CancellationToken,
}

impl PersonaSession {
    pub fn new(
        profile: PersonaProfile,
        transport: Arc<dyn ConversationTransport>,
        options: SessionOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule: profile.rule(),
            level: profile.initial_level,
            profile,
            history: ConversationHistory::new(),
            transport,
            stt: None,
            tts: None,
            options,
            active: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_speech_to_text(mut self, stt: Arc<dyn SpeechToText>) -> Self {
        self.stt = Some(stt);
        self
    }

    pub fn with_text_to_speech(mut self, tts: Arc<dyn TextToSpeech>) -> Self {
        self.tts = Some(tts);
        self
    }

    /// Connect the transport and announce the persona. The session only becomes
    /// active when this succeeds.
    pub async fn start(&mut self) -> Result<(), TransportError> {
        let config = SessionConfig {
            session_id: self.id,
            model: self.options.model.clone(),
            instructions: self.instructions(),
            voice: self.profile.voice,
            metadata: self.metadata(),
        };

        let timeout = self.options.turn_timeout;
        let connected = tokio::time::timeout(timeout, self.transport.connect(&config))
            .await
            .unwrap_or_else(|_| {
                Err(TransportError::Connect {
                    endpoint: self.transport.name().to_string(),
                    reason: format!("no answer within {:?}", timeout),
                })
            });

        match connected {
            Ok(()) => {
                self.active = true;
                tracing::info!(
                    "Session {} started with {} ({} level {}) over {}",
                    self.id,
                    self.profile.name,
                    self.profile.affect.label(),
                    self.level,
                    self.transport.name()
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to start session with {}: {}", self.profile.name, e);
                Err(e)
            }
        }
    }

    /// Run one exchange: record the user turn, get a reply, record it, then
    /// move the affect level based on what the persona said.
    ///
    /// Service failures never surface here. They become [`ERROR_REPLY`] and
    /// leave the level where it was.
    pub async fn respond(&mut self, input: impl Into<TurnInput>) -> Result<String, SessionError> {
        if !self.active {
            return Err(SessionError::Inactive);
        }

        let (user_turn, heard) = self.user_turn(input.into()).await;
        self.history.push(user_turn);

        let outcome = if heard {
            self.call_service().await
        } else {
            Err(ServiceCallError::Transcription("no usable transcript".into()))
        };

        let reply = match outcome {
            Ok(response) => {
                let audio = self.reply_audio(&response).await;
                let mut turn = Turn::new(Role::Assistant, response.text.clone());
                if let Some(audio) = audio {
                    turn = turn.with_audio(audio);
                }
                self.history.push(turn);
                self.adjust_level(&response.text).await;
                response.text
            }
            Err(e) => {
                tracing::warn!(
                    "{} turn failed on {}: {}",
                    self.profile.name,
                    self.transport.name(),
                    e
                );
                self.history.push(Turn::new(Role::Assistant, ERROR_REPLY));
                ERROR_REPLY.to_string()
            }
        };

        self.clear_cancel();
        Ok(reply)
    }

    /// Swap in a fresh token if the current one fired. A cancel only applies
    /// to the turn that was in flight.
    pub fn clear_cancel(&mut self) {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
    }

    /// Every outbound call of a turn shares the turn timeout and the cancel token.
    async fn bounded<T, F>(&self, call: F) -> Result<T, ServiceCallError>
    where
        F: Future<Output = Result<T, ServiceCallError>>,
    {
        let timeout = self.options.turn_timeout;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ServiceCallError::Cancelled),
            result = tokio::time::timeout(timeout, call) => {
                result.unwrap_or(Err(ServiceCallError::Timeout(timeout)))
            }
        }
    }

    async fn user_turn(&self, input: TurnInput) -> (Turn, bool) {
        match input {
            TurnInput::Text(text) => (Turn::new(Role::User, text), true),
            TurnInput::Audio { bytes, format } => {
                let audio = AudioRef::from_bytes(format.mime_type(), &bytes);
                let transcript = match &self.stt {
                    Some(stt) => self.bounded(stt.transcribe(&bytes, format)).await,
                    None => Err(ServiceCallError::Transcription(
                        "no speech-to-text configured".into(),
                    )),
                };
                match transcript {
                    Ok(text) => (Turn::new(Role::User, text).with_audio(audio), true),
                    Err(e) => {
                        tracing::warn!("Transcription failed: {}", e);
                        (Turn::new(Role::User, INAUDIBLE).with_audio(audio), false)
                    }
                }
            }
        }
    }

    async fn call_service(&self) -> Result<TurnResponse, ServiceCallError> {
        let request = TurnRequest {
            instructions: self.instructions(),
            messages: self.history.iter().map(ChatMessage::from).collect(),
            model: self.options.model.clone(),
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
            voice: self.options.audio_replies.then_some(self.profile.voice),
        };
        self.bounded(self.transport.send_turn(request)).await
    }

    /// Audio from the service if it sent any, otherwise synthesized locally.
    async fn reply_audio(&self, response: &TurnResponse) -> Option<AudioRef> {
        if let Some(clip) = &response.audio {
            return Some(AudioRef::from_bytes(&clip.mime, &clip.bytes));
        }
        let tts = self.tts.as_ref()?;
        match self
            .bounded(tts.synthesize(&response.text, self.profile.voice))
            .await
        {
            Ok(bytes) => Some(AudioRef::from_bytes(tts.output_mime(), &bytes)),
            Err(e) => {
                tracing::warn!("Speech synthesis via {} failed: {}", tts.provider_name(), e);
                None
            }
        }
    }

    async fn adjust_level(&mut self, reply: &str) {
        let previous = self.level;
        self.level = self.rule.apply(previous, reply);
        if self.level != previous {
            tracing::info!(
                "{} {} level: {} -> {}",
                self.profile.name,
                self.profile.affect.label(),
                previous,
                self.level
            );
        }

        let update = SessionUpdate {
            session_id: self.id,
            instructions: self.instructions(),
            voice: self.profile.voice,
            metadata: self.metadata(),
        };
        if let Err(e) = self.bounded(self.transport.update_session(update)).await {
            tracing::warn!("Session update for {} failed: {}", self.profile.name, e);
        }
    }

    fn metadata(&self) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("persona".into(), Value::String(self.profile.id.clone()));
        metadata.insert(
            self.profile.affect.metadata_key(),
            Value::from(self.level.value()),
        );
        metadata
    }

    pub fn generate_analysis(&self) -> String {
        render_analysis(&self.profile, self.level, &self.history)
    }

    pub fn generate_recommendation(&self) -> String {
        self.profile.render_recommendation(self.level)
    }

    /// Snapshot the session and write it under a fresh key.
    pub async fn save_analysis(
        &self,
        store: &dyn AnalysisStore,
    ) -> Result<SavedAnalysis, StorageError> {
        let record = SavedAnalysis::capture(
            &self.profile,
            self.level,
            &self.history,
            self.generate_analysis(),
            self.generate_recommendation(),
        );
        let key = record.key();
        match store.put(&key, &record).await {
            Ok(()) => {
                tracing::info!("Saved analysis {}", key);
                Ok(record)
            }
            Err(e) => {
                tracing::error!("Failed to save analysis {}: {}", key, e);
                Err(e)
            }
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn level(&self) -> AffectLevel {
        self.level
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn profile(&self) -> &PersonaProfile {
        &self.profile
    }

    /// System prompt for the current level.
    pub fn instructions(&self) -> String {
        PromptBuilder::render(&self.profile, self.level)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Token that aborts the turn currently in flight. Take a fresh clone
    /// before each `respond`; it is replaced after a cancelled turn.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn close(&mut self) {
        if self.active {
            self.transport.close().await;
            self.active = false;
            tracing::info!("Session {} with {} closed", self.id, self.profile.name);
        }
    }
}
