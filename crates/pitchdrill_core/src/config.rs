use crate::persona::PersonaProfile;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PitchDrillConfig {
    pub llm: LlmConfig,
    pub voice: VoiceConfig,
    pub storage: StorageConfig,
    /// Extra or replacement persona rows.
    pub personas: Vec<PersonaProfile>,
}

impl PitchDrillConfig {
    /// Parse `path`, then let `LLM_*` and `PITCHDRILL_DB` variables win.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        let mut config: PitchDrillConfig =
            toml::from_str(&raw).with_context(|| format!("Invalid TOML in {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing or broken file means defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::info!("Using default config: {:#}", e);
            let mut config = Self::default();
            config.apply_env_overrides();
            config
        })
    }

    fn apply_env_overrides(&mut self) {
        let llm = &mut self.llm;
        if let Some(v) = env_var("LLM_PROVIDER") {
            llm.provider = v;
        }
        if let Some(v) = env_var("LLM_MODEL") {
            llm.model = v;
        }
        if let Some(v) = env_var("LLM_BASE_URL") {
            llm.base_url = Some(v);
        }
        env_parse("LLM_MAX_TOKENS", &mut llm.max_tokens);
        env_parse("LLM_TEMPERATURE", &mut llm.temperature);
        env_parse("LLM_TURN_TIMEOUT", &mut llm.turn_timeout_secs);
        if let Some(v) = env_var("PITCHDRILL_DB") {
            self.storage.db_path = v;
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Unparsable values are logged and ignored.
fn env_parse<T: std::str::FromStr>(name: &str, slot: &mut T) {
    let Some(raw) = env_var(name) else { return };
    match raw.trim().parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!("Ignoring {}={:?}: not a valid value", name, raw),
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// `openai`, `realtime` or `mock`.
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Upper bound on one service call. A turn that takes longer gets the error reply.
    pub turn_timeout_secs: u64,
}

impl LlmConfig {
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs.max(1))
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            base_url: None,
            max_tokens: 150,
            temperature: 0.7,
            turn_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub enabled: bool,
    pub stt_model: String,
    pub tts_model: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stt_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    /// Directory of `*.toml` persona rows merged into the catalog.
    pub persona_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "pitchdrill.db".to_string(),
            persona_dir: "personas".to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::{AffectKind, Voice};

    #[test]
    fn test_defaults() {
        let cfg = PitchDrillConfig::default();
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.llm.max_tokens, 150);
        assert_eq!(cfg.llm.turn_timeout(), Duration::from_secs(30));
        assert!(!cfg.voice.enabled);
        assert!(cfg.personas.is_empty());
    }

    #[test]
    fn test_provider_only_file() {
        let toml_str = r#"
[llm]
provider = "mock"
"#;
        let cfg: PitchDrillConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.llm.model, "gpt-3.5-turbo");
        assert_eq!(cfg.storage.db_path, "pitchdrill.db");
    }

    #[test]
    fn test_every_section() {
        let toml_str = r#"
[llm]
provider = "realtime"
model = "gpt-4o-realtime-preview"
base_url = "wss://example.test/v1/realtime"
max_tokens = 300
temperature = 0.9
turn_timeout_secs = 12

[voice]
enabled = true
stt_model = "whisper-1"
tts_model = "tts-1-hd"

[storage]
db_path = "data/drill.db"
persona_dir = "my_personas"

[[personas]]
id = "hesitant-hank"
name = "Hesitant Hank"
voice = "alloy"
affect = "caution"
initial_level = 6
escalate = ["contract"]
de_escalate = ["trial"]
intro = "You are Hesitant Hank."
"#;
        let cfg: PitchDrillConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.llm.provider, "realtime");
        assert_eq!(cfg.llm.turn_timeout(), Duration::from_secs(12));
        assert_eq!(cfg.voice.tts_model, "tts-1-hd");
        assert_eq!(cfg.storage.persona_dir, "my_personas");
        assert_eq!(cfg.personas.len(), 1);
        assert_eq!(cfg.personas[0].voice, Voice::Alloy);
        assert_eq!(cfg.personas[0].affect, AffectKind::Caution);
    }

    #[test]
    fn test_env_wins_over_defaults() {
        std::env::set_var("LLM_PROVIDER", "mock");
        std::env::set_var("LLM_TURN_TIMEOUT", "5");
        std::env::set_var("LLM_MAX_TOKENS", "lots");

        let mut cfg = PitchDrillConfig::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.llm.turn_timeout_secs, 5);
        assert_eq!(cfg.llm.max_tokens, 150);

        for key in ["LLM_PROVIDER", "LLM_TURN_TIMEOUT", "LLM_MAX_TOKENS"] {
            std::env::remove_var(key);
        }

        let cfg = PitchDrillConfig::load_or_default("/nonexistent/pitchdrill.toml");
        assert_eq!(cfg.llm.provider, "openai");
    }
}
