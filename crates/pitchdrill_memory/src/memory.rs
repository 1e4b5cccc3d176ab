use async_trait::async_trait;
use pitchdrill_core::{AnalysisStore, SavedAnalysis, StorageError};
use tokio::sync::RwLock;

/// Process-local store. Keeps insertion order, which doubles as creation order.
#[derive(Debug, Default)]
pub struct InMemoryAnalysisStore {
    records: RwLock<Vec<(String, String)>>,
}

impl InMemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl AnalysisStore for InMemoryAnalysisStore {
    async fn put(&self, key: &str, analysis: &SavedAnalysis) -> Result<(), StorageError> {
        // Stored as JSON so both stores fail the same way on bad records.
        let value = serde_json::to_string(analysis)?;
        let mut records = self.records.write().await;
        if records.iter().any(|(k, _)| k == key) {
            return Err(StorageError::Backend(format!("key '{}' already exists", key)));
        }
        records.push((key.to_string(), value));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<SavedAnalysis, StorageError> {
        let records = self.records.read().await;
        let (_, value) = records
            .iter()
            .find(|(k, _)| k == key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(serde_json::from_str(value)?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, SavedAnalysis)>, StorageError> {
        let records = self.records.read().await;
        records
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| -> Result<_, StorageError> {
                Ok((k.clone(), serde_json::from_str(v)?))
            })
            .collect()
    }
}
