//! Spoken persona replies.

use async_trait::async_trait;
use pitchdrill_core::{ServiceCallError, Voice};

/// Gives a persona reply a voice.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Synthesize text with the given voice. Returns encoded audio.
    async fn synthesize(&self, text: &str, voice: Voice) -> Result<Vec<u8>, ServiceCallError>;

    /// MIME type of the bytes returned by `synthesize`, as written into the
    /// `data:` URL of the assistant turn.
    fn output_mime(&self) -> &'static str;

    /// Short name used in logs.
    fn provider_name(&self) -> &'static str;
}
