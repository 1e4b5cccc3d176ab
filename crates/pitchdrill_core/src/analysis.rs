//! Post-call analysis text and the persisted session record.

use crate::affect::AffectLevel;
use crate::history::{ConversationHistory, Turn};
use crate::persona::PersonaProfile;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;
use uuid::Uuid;

static RE_NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\W+").unwrap());

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "that", "this", "have", "what", "your", "about", "would", "could", "from", "they", "there",
];

/// Most frequent content words across `texts`.
///
/// Words are lower-cased, must be longer than three characters and not a stop
/// word. Ties keep first-appearance order.
pub fn extract_topics<'a, I>(texts: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for text in texts {
        let lower = text.to_lowercase();
        for word in RE_NON_WORD.split(&lower) {
            if word.chars().count() <= 3 || STOP_WORDS.contains(&word) {
                continue;
            }
            match index.get(word) {
                Some(&i) => counts[i].1 += 1,
                None => {
                    index.insert(word.to_string(), counts.len());
                    counts.push((word.to_string(), 1));
                }
            }
        }
    }

    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.into_iter().take(limit).map(|(w, _)| w).collect()
}

/// Summary of a session: length, final level and keyword topics.
pub fn render_analysis(
    profile: &PersonaProfile,
    level: AffectLevel,
    history: &ConversationHistory,
) -> String {
    let topics = extract_topics(history.iter().map(|t| t.text.as_str()), 5);
    let topics = if topics.is_empty() {
        "none identified".to_string()
    } else {
        topics.join(", ")
    };
    format!(
        "Analysis for {}:\n- Exchanges: {}\n- Total messages: {}\n- Final {} level: {}/10\n- Key topics discussed: {}",
        profile.name,
        history.exchanges(),
        history.len(),
        profile.affect.label(),
        level,
        topics
    )
}

/// One playable line of a saved transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSegment {
    pub role: String,
    pub text: String,
    pub audio_url: String,
}

/// Immutable snapshot written when the trainee saves a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedAnalysis {
    pub id: Uuid,
    pub persona_id: String,
    pub persona_name: String,
    /// RFC 3339, UTC.
    pub date: String,
    pub transcript: String,
    pub audio_segments: Vec<AudioSegment>,
    pub analysis: String,
    pub ai_recommendation: String,
    pub final_level: AffectLevel,
    pub chat_messages: Vec<Turn>,
}

impl SavedAnalysis {
    pub fn capture(
        profile: &PersonaProfile,
        level: AffectLevel,
        history: &ConversationHistory,
        analysis: String,
        ai_recommendation: String,
    ) -> Self {
        let audio_segments = history
            .iter()
            .filter_map(|t| {
                t.audio.as_ref().map(|a| AudioSegment {
                    role: t.role.to_string(),
                    text: t.text.clone(),
                    audio_url: a.url.clone(),
                })
            })
            .collect();

        Self {
            id: Uuid::new_v4(),
            persona_id: profile.id.clone(),
            persona_name: profile.name.clone(),
            date: chrono::Utc::now().to_rfc3339(),
            transcript: history.transcript(),
            audio_segments,
            analysis,
            ai_recommendation,
            final_level: level,
            chat_messages: history.turns().to_vec(),
        }
    }

    pub fn key(&self) -> String {
        crate::analysis_key(&self.persona_id, &self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{AudioRef, Role};
    use crate::persona::PersonaCatalog;

    #[test]
    fn test_extract_topics_by_frequency() {
        let texts = [
            "The pricing model is flexible",
            "Pricing depends on seats. Seats are billed monthly.",
            "What about pricing for seats?",
        ];
        let topics = extract_topics(texts, 2);
        assert_eq!(topics, vec!["pricing", "seats"]);
    }

    #[test]
    fn test_extract_topics_skips_short_and_stop_words() {
        let topics = extract_topics(["this is a cat and that is the dog"], 5);
        assert!(topics.is_empty());
    }

    #[test]
    fn test_extract_topics_ties_keep_first_appearance() {
        let topics = extract_topics(["zebra apple mango"], 3);
        assert_eq!(topics, vec!["zebra", "apple", "mango"]);
    }

    #[test]
    fn test_render_analysis_reports_level_and_exchanges() {
        let catalog = PersonaCatalog::default();
        let sarah = catalog.get("sarah-skeptic").unwrap();
        let mut history = ConversationHistory::new();
        history.push(Turn::new(Role::User, "Our platform halves onboarding time"));
        history.push(Turn::new(Role::Assistant, "That sounds vague. Show me onboarding data."));

        let text = render_analysis(sarah, AffectLevel::new(6), &history);
        assert!(text.starts_with("Analysis for Sarah Skeptic:"));
        assert!(text.contains("- Exchanges: 1"));
        assert!(text.contains("- Total messages: 2"));
        assert!(text.contains("- Final skepticism level: 6/10"));
        assert!(text.contains("onboarding"));
    }

    #[test]
    fn test_capture_collects_audio_segments() {
        let catalog = PersonaCatalog::default();
        let dan = catalog.get("difficult-dan").unwrap();
        let mut history = ConversationHistory::new();
        history.push(Turn::new(Role::User, "hello"));
        history.push(
            Turn::new(Role::Assistant, "What now?")
                .with_audio(AudioRef::from_bytes("audio/mpeg", b"mp3")),
        );

        let record = SavedAnalysis::capture(
            dan,
            AffectLevel::new(7),
            &history,
            "a".into(),
            "r".into(),
        );
        assert_eq!(record.audio_segments.len(), 1);
        assert_eq!(record.audio_segments[0].role, "assistant");
        assert_eq!(record.transcript, "user: hello\nassistant: What now?");
        assert!(record.key().starts_with("difficult-dan_analysis_"));

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("aiRecommendation").is_some());
        assert!(json.get("chatMessages").is_some());
    }
}
