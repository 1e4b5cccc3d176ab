use crate::AnalysesAction;
use anyhow::Context;
use pitchdrill_core::{AnalysisStore, PitchDrillConfig, SavedAnalysis};
use pitchdrill_memory::SqliteAnalysisStore;

pub async fn run(config: &PitchDrillConfig, action: AnalysesAction) -> anyhow::Result<()> {
    let store = SqliteAnalysisStore::new(&config.storage.db_path).await?;

    match action {
        AnalysesAction::List { persona } => {
            let prefix = persona
                .map(|id| format!("{}_analysis_", id))
                .unwrap_or_default();
            let records = store.list(&prefix).await?;
            if records.is_empty() {
                println!("No saved analyses.");
                return Ok(());
            }
            for (key, record) in records {
                println!(
                    "{}  {}  {}  final level {}/10",
                    key, record.date, record.persona_name, record.final_level
                );
            }
        }
        AnalysesAction::Show { key } => {
            let record = store
                .get(&key)
                .await
                .with_context(|| format!("Failed to load analysis '{}'", key))?;
            print_record(&record);
        }
    }
    Ok(())
}

fn print_record(record: &SavedAnalysis) {
    println!("{} ({})", record.persona_name, record.date);
    println!();
    println!("{}", record.analysis);
    println!();
    println!("{}", record.ai_recommendation);
    println!();
    println!("Transcript:");
    println!("{}", record.transcript);
    if !record.audio_segments.is_empty() {
        println!();
        println!("{} audio segment(s) saved", record.audio_segments.len());
    }
}
