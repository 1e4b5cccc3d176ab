//! OpenAI speech endpoints: `/audio/transcriptions` and `/audio/speech`.

use crate::stt::{AudioFormat, SpeechToText};
use crate::tts::TextToSpeech;
use async_trait::async_trait;
use pitchdrill_core::{ServiceCallError, Voice};
use reqwest::{multipart, Client};
use serde::Deserialize;
use serde_json::json;
use std::env;
use std::time::Duration;

fn default_base_url() -> String {
    env::var("OPENAI_BASE_URL")
        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
        .trim_end_matches('/')
        .to_string()
}

fn build_client() -> anyhow::Result<Client> {
    Ok(Client::builder().timeout(Duration::from_secs(60)).build()?)
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ServiceCallError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ServiceCallError::Http {
        status: status.as_u16(),
        body,
    })
}

fn network(e: reqwest::Error) -> ServiceCallError {
    ServiceCallError::Network(e.to_string())
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Whisper transcription client.
#[derive(Debug, Clone)]
pub struct OpenAiWhisper {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiWhisper {
    pub fn new(model: &str) -> anyhow::Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
        Ok(Self::with_endpoint(build_client()?, &api_key, &default_base_url(), model))
    }

    pub fn with_endpoint(client: Client, api_key: &str, base_url: &str, model: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl SpeechToText for OpenAiWhisper {
    async fn transcribe(
        &self,
        audio: &[u8],
        format: AudioFormat,
    ) -> Result<String, ServiceCallError> {
        let part = multipart::Part::bytes(audio.to_vec())
            .file_name(format!("audio.{}", format.extension()))
            .mime_str(format.mime_type())
            .map_err(|e| ServiceCallError::Transcription(e.to_string()))?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let url = format!("{}/audio/transcriptions", self.base_url);
        tracing::debug!("Transcribing {} bytes of {:?}", audio.len(), format);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(network)?;
        let response = check_status(response).await?;
        let parsed: TranscriptionResponse = response.json().await.map_err(network)?;
        let text = parsed.text.trim().to_string();
        if text.is_empty() {
            return Err(ServiceCallError::Transcription("empty transcript".into()));
        }
        Ok(text)
    }

    fn provider_name(&self) -> &'static str {
        "openai-whisper"
    }
}

/// `tts-1` speech synthesis client.
#[derive(Debug, Clone)]
pub struct OpenAiSpeech {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiSpeech {
    pub fn new(model: &str) -> anyhow::Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
        Ok(Self::with_endpoint(build_client()?, &api_key, &default_base_url(), model))
    }

    pub fn with_endpoint(client: Client, api_key: &str, base_url: &str, model: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl TextToSpeech for OpenAiSpeech {
    async fn synthesize(&self, text: &str, voice: Voice) -> Result<Vec<u8>, ServiceCallError> {
        let url = format!("{}/audio/speech", self.base_url);
        let payload = json!({
            "model": self.model,
            "input": text,
            "voice": voice.as_str(),
            "response_format": "mp3",
        });
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(network)?;
        let response = check_status(response).await?;
        let bytes = response.bytes().await.map_err(network)?;
        if bytes.is_empty() {
            return Err(ServiceCallError::EmptyResponse);
        }
        Ok(bytes.to_vec())
    }

    /// Matches `response_format` above.
    fn output_mime(&self) -> &'static str {
        "audio/mp3"
    }

    fn provider_name(&self) -> &'static str {
        "openai-tts"
    }
}
