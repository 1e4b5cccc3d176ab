//! Durable storage for saved session analyses.
//!
//! Records are JSON documents under string keys. Keys are namespaced per
//! persona (`{persona_id}_analysis_{uuid}`), so listing one persona's history
//! is a prefix scan.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryAnalysisStore;
pub use sqlite::SqliteAnalysisStore;
