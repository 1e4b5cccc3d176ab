use pitchdrill_core::{Role, Turn, Voice};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        let role = match turn.role {
            Role::User => ChatRole::User,
            Role::Assistant => ChatRole::Assistant,
        };
        Self {
            role,
            content: turn.text.clone(),
        }
    }
}

/// Sent once when a session opens.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub session_id: Uuid,
    pub model: String,
    pub instructions: String,
    pub voice: Voice,
    pub metadata: Map<String, Value>,
}

/// Sent after every assistant turn. Opaque to the session logic.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdate {
    pub session_id: Uuid,
    pub instructions: String,
    pub voice: Voice,
    pub metadata: Map<String, Value>,
}

/// One completion request: system instructions plus the full history so far.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    pub instructions: String,
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub voice: Option<Voice>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnResponse {
    pub text: String,
    pub audio: Option<AudioClip>,
}

impl TurnResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            audio: None,
        }
    }
}
