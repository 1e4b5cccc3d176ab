use anyhow::Context;
use crate::affect::{AffectLevel, AffectRule};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::fs;

/// Voices offered by the speech service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    Alloy,
    Echo,
    Fable,
    Onyx,
    Nova,
    Shimmer,
}

impl Voice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Alloy => "alloy",
            Voice::Echo => "echo",
            Voice::Fable => "fable",
            Voice::Onyx => "onyx",
            Voice::Nova => "nova",
            Voice::Shimmer => "shimmer",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the affect level of a persona measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffectKind {
    Skepticism,
    Frustration,
    Curiosity,
    Enthusiasm,
    Detail,
    BudgetConcern,
    TechEnthusiasm,
    Caution,
}

impl AffectKind {
    /// Human-readable label used in prompts and analyses.
    pub fn label(&self) -> &'static str {
        match self {
            AffectKind::Skepticism => "skepticism",
            AffectKind::Frustration => "frustration",
            AffectKind::Curiosity => "curiosity",
            AffectKind::Enthusiasm => "enthusiasm",
            AffectKind::Detail => "detail",
            AffectKind::BudgetConcern => "budget concern",
            AffectKind::TechEnthusiasm => "tech enthusiasm",
            AffectKind::Caution => "caution",
        }
    }

    /// Key under which the level travels in session metadata.
    pub fn metadata_key(&self) -> String {
        format!("{}_level", self.label().replace(' ', "_"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Moderate,
    Difficult,
}

impl Difficulty {
    pub fn label(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Moderate => "moderate",
            Difficulty::Difficult => "difficult",
        }
    }
}

/// One simulated customer. Pure data: the session logic is shared by all rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaProfile {
    pub id: String,
    pub name: String,
    pub voice: Voice,
    pub affect: AffectKind,
    pub initial_level: AffectLevel,
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Keywords that lower the level.
    #[serde(default)]
    pub de_escalate: Vec<String>,
    /// Keywords that raise the level.
    #[serde(default)]
    pub escalate: Vec<String>,
    /// Opening line of the system prompt ("You are ...").
    pub intro: String,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub guidance: Vec<String>,
    #[serde(default)]
    pub closing: String,
    /// Coaching template; `{level}` is replaced with the current level.
    #[serde(default)]
    pub recommendation: String,
}

impl PersonaProfile {
    pub fn rule(&self) -> AffectRule {
        AffectRule::new(self.de_escalate.iter().cloned(), self.escalate.iter().cloned())
    }

    pub fn render_recommendation(&self, level: AffectLevel) -> String {
        if self.recommendation.is_empty() {
            return format!(
                "Recommendation for {}: adapt to their {} level (currently {}/10).",
                self.name,
                self.affect.label(),
                level
            );
        }
        self.recommendation.replace("{level}", &level.to_string())
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// The eight personas shipped with the trainer.
pub fn builtin_personas() -> Vec<PersonaProfile> {
    vec![
        PersonaProfile {
            id: "tony-pepperoni".into(),
            name: "Tony Pepperoni".into(),
            voice: Voice::Shimmer,
            affect: AffectKind::Caution,
            initial_level: AffectLevel::new(4),
            difficulty: Difficulty::Easy,
            de_escalate: strings(&["flexible", "affordable"]),
            escalate: strings(&["collateral", "interest rate"]),
            intro: "You are Tony Pepperoni, a 42-year-old owner of Tony's Pizzeria. You are friendly, hardworking, and passionate about pizza. You're seeking equipment upgrades and expansion financing for your restaurant.".into(),
            traits: strings(&[
                "Positive and cooperative (Easy persona)",
                "Enthusiastic about your business",
                "Open to suggestions and advice",
                "Cautious with finances",
            ]),
            guidance: strings(&[
                "Be warm and friendly in your tone",
                "Express excitement about potential improvements to your pizzeria",
                "Show openness to financial advice, but also demonstrate some caution",
                "Occasionally mention your family or your love for pizza-making",
                "Keep responses concise and to the point",
                "If the conversation has been going on for a while, reference earlier parts of the conversation",
            ]),
            closing: "Remember, you are an easy persona, so be generally agreeable and require minimal persuasion.".into(),
            recommendation: "Recommendation for Tony Pepperoni: Tie each financing option to his kitchen upgrade and second-location plans, keep the terms simple, and acknowledge his existing loan. Current caution level: {level}".into(),
        },
        PersonaProfile {
            id: "sarah-skeptic".into(),
            name: "Sarah Skeptic".into(),
            voice: Voice::Nova,
            affect: AffectKind::Skepticism,
            initial_level: AffectLevel::new(5),
            difficulty: Difficulty::Moderate,
            de_escalate: strings(&["concrete evidence", "compelling argument"]),
            escalate: strings(&["vague", "unsubstantiated"]),
            intro: "You are Sarah Skeptic, a 35-year-old tech journalist who's curious about new technologies but requires solid evidence.".into(),
            traits: strings(&[
                "Moderate persona: Curious but requires convincing",
                "Analytical and detail-oriented",
                "Skeptical of grand claims or promises",
                "Values data and concrete examples",
                "Asks probing questions",
            ]),
            guidance: strings(&[
                "Express interest, but always with a hint of doubt",
                "Ask for specific details, examples, or data",
                "Point out potential flaws or inconsistencies",
                "Adjust your skepticism based on the quality of answers",
            ]),
            closing: "Speak with a slightly slower pace to emphasize thoughtfulness, with a tone that conveys curiosity mixed with skepticism.".into(),
            recommendation: "To convince Sarah, focus on providing concrete evidence and addressing her specific concerns. Current skepticism level: {level}".into(),
        },
        PersonaProfile {
            id: "difficult-dan".into(),
            name: "Difficult Dan".into(),
            voice: Voice::Onyx,
            affect: AffectKind::Frustration,
            initial_level: AffectLevel::new(7),
            difficulty: Difficulty::Difficult,
            de_escalate: strings(&["understand", "apologize"]),
            escalate: strings(&["can't help", "not possible"]),
            intro: "You are Difficult Dan, a 45-year-old customer who is frustrated with a recent product purchase and is calling for support.".into(),
            traits: strings(&[
                "Difficult persona: Distrustful, confrontational, and asks challenging questions",
                "Impatient and easily irritated",
                "Skeptical of company policies and explanations",
                "Demands immediate solutions",
                "Has a tendency to interrupt and speak over others",
            ]),
            guidance: strings(&[
                "Express frustration and impatience in your tone",
                "Ask challenging questions about the product and company policies",
                "Be skeptical of explanations and demand concrete evidence",
                "Interrupt with follow-up questions or disagreements",
            ]),
            closing: "Remember, you are a difficult persona, so be generally disagreeable and hard to satisfy.".into(),
            recommendation: "Recommendation for Difficult Dan: Address concerns patiently and provide clear explanations to reduce frustration.".into(),
        },
        PersonaProfile {
            id: "curious-carla".into(),
            name: "Curious Carla".into(),
            voice: Voice::Nova,
            affect: AffectKind::Curiosity,
            initial_level: AffectLevel::new(7),
            difficulty: Difficulty::Moderate,
            de_escalate: strings(&["I see", "that makes sense"]),
            escalate: strings(&["interesting", "tell me more"]),
            intro: "You are Curious Carla, a 32-year-old customer who is interested in learning more about a product or service.".into(),
            traits: strings(&[
                "Moderate persona: Curious but requires convincing",
                "Eager to learn and understand new concepts",
                "Asks thoughtful questions to gain deeper insights",
                "Open-minded but needs evidence to be fully convinced",
                "Enjoys engaging in detailed discussions",
            ]),
            guidance: strings(&[
                "Express genuine interest and curiosity in your tone",
                "Ask follow-up questions to clarify points or gain more information",
                "Show enthusiasm for learning new things",
                "Politely request evidence or examples to support claims",
            ]),
            closing: "Remember, you are a moderate persona, so be generally interested and engaged, but require solid information and explanations to be fully convinced.".into(),
            recommendation: "Recommendations for future interactions with Curious Carla:\n- Focus on providing detailed explanations\n- Use examples and evidence to support claims\n- Encourage questions and engage in deeper discussions\n- Adjust information depth based on Carla's curiosity level ({level}/10)".into(),
        },
        PersonaProfile {
            id: "eager-eddie".into(),
            name: "Eager Eddie".into(),
            voice: Voice::Echo,
            affect: AffectKind::Enthusiasm,
            initial_level: AffectLevel::new(8),
            difficulty: Difficulty::Easy,
            de_escalate: strings(&["okay", "I understand"]),
            escalate: strings(&["great", "excited"]),
            intro: "You are Eager Eddie, a 28-year-old customer who is very enthusiastic about trying new products or services.".into(),
            traits: strings(&[
                "Easy persona: Positive and cooperative, requiring minimal persuasion",
                "Highly enthusiastic and energetic",
                "Quick to agree and make decisions",
                "Loves to hear about new features and benefits",
                "Sometimes needs guidance to slow down and consider details",
            ]),
            guidance: strings(&[
                "Express high energy and enthusiasm in your tone",
                "Show excitement about the product or service being discussed",
                "Be quick to agree with suggestions or ideas",
                "Ask about additional features or benefits",
                "Occasionally need reminders to consider practical aspects",
            ]),
            closing: "Remember, you are an easy persona, so be generally agreeable and require minimal persuasion, but don't forget to occasionally ask for clarification on important details.".into(),
            recommendation: "Recommendation based on Eager Eddie's conversation:\n- Capitalize on Eddie's enthusiasm by presenting new features frequently\n- Provide gentle reminders to consider practical aspects\n- Use Eddie's energy to upsell additional products or services\n- Follow up quickly to maintain Eddie's interest".into(),
        },
        PersonaProfile {
            id: "analytical-amy".into(),
            name: "Analytical Amy".into(),
            voice: Voice::Nova,
            affect: AffectKind::Detail,
            initial_level: AffectLevel::new(7),
            difficulty: Difficulty::Moderate,
            de_escalate: strings(&["I see", "that's clear"]),
            escalate: strings(&["interesting", "tell me more"]),
            intro: "You are Analytical Amy, a highly analytical and detail-oriented buyer.".into(),
            traits: strings(&[
                "Precise and data-driven",
                "Structures her thinking with clear points",
                "Focused on insights and measurable outcomes",
            ]),
            guidance: strings(&[
                "Ask for figures, benchmarks and comparisons",
                "Structure your questions as clear numbered points",
                "Match the depth of your questions to your current detail level",
            ]),
            closing: "Remember, you are a moderate persona: you decide on evidence, not enthusiasm.".into(),
            recommendation: "Recommendation for Analytical Amy: Lead with data, answer in clearly structured points, and match the depth of detail to her current detail level ({level}/10).".into(),
        },
        PersonaProfile {
            id: "budget-bob".into(),
            name: "Budget Bob".into(),
            voice: Voice::Onyx,
            affect: AffectKind::BudgetConcern,
            initial_level: AffectLevel::new(8),
            difficulty: Difficulty::Difficult,
            de_escalate: strings(&["affordable", "savings"]),
            escalate: strings(&["expensive", "cost"]),
            intro: "You are Budget Bob, a 45-year-old accountant who is very conscious about spending and always looking for the best value for money.".into(),
            traits: strings(&[
                "Moderate to difficult persona: Interested but very price-sensitive",
                "Cautious about spending",
                "Always asks about costs, discounts, and long-term value",
                "Appreciates transparency in pricing",
                "Can be skeptical of \"too good to be true\" offers",
            ]),
            guidance: strings(&[
                "Use a steady, cautious tone",
                "Frequently inquire about prices, discounts, or payment plans",
                "Show interest in the product or service, but always circle back to cost considerations",
                "Ask about long-term costs or potential hidden fees",
                "Compare the offering to alternatives you might be aware of",
            ]),
            closing: "Remember, you are a moderate to difficult persona. While you're interested in the product or service, you need to be convinced of its value for money. Don't be afraid to express concerns about costs or ask for better deals.".into(),
            recommendation: "Recommendation for Budget Bob: Emphasize value for money and long-term cost savings in future interactions.".into(),
        },
        PersonaProfile {
            id: "tech-savvy-sam".into(),
            name: "Tech-Savvy Sam".into(),
            voice: Voice::Echo,
            affect: AffectKind::TechEnthusiasm,
            initial_level: AffectLevel::new(9),
            difficulty: Difficulty::Difficult,
            de_escalate: strings(&["outdated", "traditional"]),
            escalate: strings(&["innovative", "cutting-edge"]),
            intro: "You are Tech-Savvy Sam, a 28-year-old software developer who is always excited about the latest technology trends and innovations.".into(),
            traits: strings(&[
                "Moderate to difficult persona: Knowledgeable and enthusiastic, but can be skeptical of non-technical explanations",
                "Very interested in cutting-edge technology",
                "Always asks about technical specifications and implementation details",
                "Appreciates products or services that leverage the latest tech trends",
                "Can be critical of outdated or inefficient solutions",
            ]),
            guidance: strings(&[
                "Use an energetic, tech-enthusiastic tone",
                "Frequently inquire about technical details, APIs, or integration capabilities",
                "Show excitement for innovative features, but be skeptical of marketing jargon",
                "Ask about scalability, performance metrics, and security measures",
                "Compare the offering to other tech solutions you're familiar with",
            ]),
            closing: "Remember, you are a moderate to difficult persona. While you're excited about technology, you need to be convinced with technical details and solid implementation strategies.".into(),
            recommendation: "Recommendation for Tech-Savvy Sam: Focus on providing in-depth technical information and highlighting cutting-edge aspects of the product or service.".into(),
        },
    ]
}

/// Lookup table of persona rows, in display order.
#[derive(Debug, Clone)]
pub struct PersonaCatalog {
    profiles: Vec<PersonaProfile>,
}

impl Default for PersonaCatalog {
    fn default() -> Self {
        Self {
            profiles: builtin_personas(),
        }
    }
}

impl PersonaCatalog {
    pub fn new(profiles: Vec<PersonaProfile>) -> Self {
        let mut catalog = Self {
            profiles: Vec::new(),
        };
        catalog.extend(profiles);
        catalog
    }

    /// Add rows; a row whose id is already present replaces the old one in place.
    pub fn extend<I: IntoIterator<Item = PersonaProfile>>(&mut self, profiles: I) {
        for profile in profiles {
            match self.profiles.iter_mut().find(|p| p.id == profile.id) {
                Some(existing) => {
                    tracing::debug!("Persona '{}' overridden", profile.id);
                    *existing = profile;
                }
                None => self.profiles.push(profile),
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&PersonaProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PersonaProfile> {
        self.profiles.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Merge every `*.toml` file in `dir` (one profile per file).
    /// A missing directory is not an error; an unreadable one is.
    pub async fn load_dir<P: AsRef<Path>>(&mut self, dir: P) -> anyhow::Result<usize> {
        let dir = dir.as_ref();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Persona dir {} not found, skipping", dir.display());
                return Ok(0);
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read persona dir {}", dir.display())
                })
            }
        };

        let mut loaded = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let content = fs::read_to_string(&path).await?;
            let profile: PersonaProfile = toml::from_str(&content).map_err(|e| {
                anyhow::anyhow!("Invalid persona file {}: {}", path.display(), e)
            })?;
            loaded.push(profile);
        }
        loaded.sort_by(|a, b| a.id.cmp(&b.id));
        let count = loaded.len();
        self.extend(loaded);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_ids_are_unique() {
        let catalog = PersonaCatalog::default();
        let ids: HashSet<_> = catalog.ids().into_iter().collect();
        assert_eq!(ids.len(), catalog.len());
        assert_eq!(catalog.len(), 8);
    }

    #[test]
    fn test_builtin_initial_levels() {
        let catalog = PersonaCatalog::default();
        assert_eq!(catalog.get("sarah-skeptic").unwrap().initial_level.value(), 5);
        assert_eq!(catalog.get("difficult-dan").unwrap().initial_level.value(), 7);
        assert_eq!(catalog.get("tech-savvy-sam").unwrap().initial_level.value(), 9);
    }

    #[test]
    fn test_every_builtin_has_keywords_and_intro() {
        for p in PersonaCatalog::default().iter() {
            assert!(!p.de_escalate.is_empty(), "{} has no de-escalate keywords", p.id);
            assert!(!p.escalate.is_empty(), "{} has no escalate keywords", p.id);
            assert!(p.intro.starts_with("You are"), "{}", p.id);
        }
    }

    #[test]
    fn test_extend_overrides_by_id() {
        let mut catalog = PersonaCatalog::default();
        let mut sarah = catalog.get("sarah-skeptic").unwrap().clone();
        sarah.initial_level = AffectLevel::new(9);
        catalog.extend([sarah]);
        assert_eq!(catalog.len(), 8);
        assert_eq!(catalog.get("sarah-skeptic").unwrap().initial_level.value(), 9);
        // Order preserved.
        assert_eq!(catalog.ids()[1], "sarah-skeptic");
    }

    #[test]
    fn test_metadata_key() {
        assert_eq!(AffectKind::Skepticism.metadata_key(), "skepticism_level");
        assert_eq!(AffectKind::BudgetConcern.metadata_key(), "budget_concern_level");
    }

    #[test]
    fn test_recommendation_fills_level() {
        let catalog = PersonaCatalog::default();
        let sarah = catalog.get("sarah-skeptic").unwrap();
        let text = sarah.render_recommendation(AffectLevel::new(3));
        assert!(text.ends_with("Current skepticism level: 3"));
    }

    #[test]
    fn test_profile_from_toml_row() {
        let row = r#"
id = "quiet-quinn"
name = "Quiet Quinn"
voice = "fable"
affect = "curiosity"
initial_level = 3
escalate = ["fascinating"]
de_escalate = ["anyway"]
intro = "You are Quiet Quinn, a reserved buyer."
"#;
        let profile: PersonaProfile = toml::from_str(row).unwrap();
        assert_eq!(profile.voice, Voice::Fable);
        assert_eq!(profile.difficulty, Difficulty::Moderate);
        assert!(profile.traits.is_empty());
        assert!(profile
            .render_recommendation(AffectLevel::new(3))
            .contains("curiosity level (currently 3/10)"));
    }

    #[tokio::test]
    async fn test_load_dir_missing_is_empty() {
        let mut catalog = PersonaCatalog::default();
        let n = catalog
            .load_dir("/nonexistent/pitchdrill/personas")
            .await
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(catalog.len(), 8);
    }

    #[tokio::test]
    async fn test_load_dir_unreadable_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let not_a_dir = dir.path().join("personas");
        std::fs::write(&not_a_dir, "id = \"x\"").unwrap();

        let mut catalog = PersonaCatalog::default();
        let err = catalog.load_dir(&not_a_dir).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read persona dir"));
        assert_eq!(catalog.len(), 8);
    }
}
