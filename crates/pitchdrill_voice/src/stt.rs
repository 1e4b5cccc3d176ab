//! Transcription of recorded trainee speech.

use async_trait::async_trait;
use pitchdrill_core::ServiceCallError;

/// Container formats accepted for a recorded turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// What the console recorder writes.
    Wav,
    Mp3,
    /// WebM container, as recorded by browsers
    Webm,
    OggOpus,
}

impl AudioFormat {
    /// MIME type sent with the upload.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::Mp3 => "audio/mpeg",
            Self::Webm => "audio/webm",
            Self::OggOpus => "audio/ogg",
        }
    }

    /// File extension the transcription endpoint uses to sniff the format
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Webm => "webm",
            Self::OggOpus => "ogg",
        }
    }

    /// Guess the format from a file name.
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = path.rsplit('.').next()?.to_ascii_lowercase();
        match ext.as_str() {
            "wav" => Some(Self::Wav),
            "mp3" => Some(Self::Mp3),
            "webm" => Some(Self::Webm),
            "ogg" | "opus" => Some(Self::OggOpus),
            _ => None,
        }
    }
}

/// Turns a recorded utterance into text for the conversation history.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe raw audio bytes of the given format to text
    async fn transcribe(&self, audio: &[u8], format: AudioFormat)
        -> Result<String, ServiceCallError>;

    /// Short name used in logs.
    fn provider_name(&self) -> &'static str;
}
