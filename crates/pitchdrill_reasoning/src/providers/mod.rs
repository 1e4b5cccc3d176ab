pub mod mock;
pub mod openai;
pub mod realtime;

use crate::transport::ConversationTransport;
use pitchdrill_core::config::LlmConfig;
use std::sync::Arc;

/// Build the transport named by `config.provider`.
pub fn build_transport(config: &LlmConfig) -> anyhow::Result<Arc<dyn ConversationTransport>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(openai::OpenAiChatTransport::new(
            config.base_url.as_deref(),
        )?)),
        "realtime" => Ok(Arc::new(realtime::RealtimeTransport::new(
            config.base_url.as_deref(),
            config.turn_timeout(),
        )?)),
        "mock" => Ok(Arc::new(mock::MockTransport::new(&config.model))),
        other => anyhow::bail!(
            "Unknown LLM provider '{}' (expected openai, realtime or mock)",
            other
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_mock_and_unknown() {
        let mut cfg = LlmConfig {
            provider: "mock".into(),
            ..LlmConfig::default()
        };
        assert_eq!(build_transport(&cfg).unwrap().name(), "mock");

        cfg.provider = "carrier-pigeon".into();
        assert!(build_transport(&cfg).is_err());
    }
}
