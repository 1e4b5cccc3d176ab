pub mod affect;
pub mod analysis;
pub mod config;
pub mod error;
pub mod history;
pub mod persona;
pub mod prompt;

pub use affect::{AffectLevel, AffectRule, AffectShift};
pub use analysis::{AudioSegment, SavedAnalysis};
pub use config::PitchDrillConfig;
pub use error::{ServiceCallError, SessionError, StorageError, TransportError};
pub use history::{AudioRef, ConversationHistory, Role, Turn};
pub use persona::{AffectKind, Difficulty, PersonaCatalog, PersonaProfile, Voice};
pub use prompt::PromptBuilder;

use async_trait::async_trait;

/// Durable key/value storage for saved analyses.
///
/// Keys are namespaced per persona: `{persona_id}_analysis_{uuid}`.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn put(&self, key: &str, analysis: &SavedAnalysis) -> Result<(), StorageError>;
    async fn get(&self, key: &str) -> Result<SavedAnalysis, StorageError>;
    /// All `(key, record)` pairs whose key starts with `prefix`, oldest first.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, SavedAnalysis)>, StorageError>;
}

/// Storage key for a saved analysis.
pub fn analysis_key(persona_id: &str, id: &uuid::Uuid) -> String {
    format!("{}_analysis_{}", persona_id, id)
}
