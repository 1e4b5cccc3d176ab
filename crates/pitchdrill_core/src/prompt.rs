use crate::affect::AffectLevel;
use crate::persona::PersonaProfile;

/// Renders the system instructions for a persona at a given affect level.
///
/// The output depends only on the profile and the level, so re-rendering
/// after a level change is the way to refresh the service's instructions.
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn render(profile: &PersonaProfile, level: AffectLevel) -> String {
        let mut out = String::with_capacity(1024);
        out.push_str(profile.intro.trim());
        out.push_str("\n\n");

        if !profile.traits.is_empty() {
            out.push_str("Key traits:\n");
            for t in &profile.traits {
                out.push_str("- ");
                out.push_str(t);
                out.push('\n');
            }
            out.push('\n');
        }

        out.push_str(&Self::level_line(profile, level));
        out.push_str("\n\n");

        out.push_str("When responding:\n");
        for g in &profile.guidance {
            out.push_str("- ");
            out.push_str(g);
            out.push('\n');
        }
        out.push_str(&format!(
            "- Adjust your {} based on the conversation progress (current level: {})\n",
            profile.affect.label(),
            level
        ));

        if !profile.closing.is_empty() {
            out.push('\n');
            out.push_str(profile.closing.trim());
            out.push('\n');
        }
        out
    }

    pub fn level_line(profile: &PersonaProfile, level: AffectLevel) -> String {
        format!(
            "Current {} level: {} (1-10 scale)",
            profile.affect.label(),
            level
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::PersonaCatalog;

    #[test]
    fn test_render_is_deterministic() {
        let catalog = PersonaCatalog::default();
        let dan = catalog.get("difficult-dan").unwrap();
        let a = PromptBuilder::render(dan, AffectLevel::new(7));
        let b = PromptBuilder::render(dan, AffectLevel::new(7));
        assert_eq!(a, b);
    }

    #[test]
    fn test_render_embeds_level() {
        let catalog = PersonaCatalog::default();
        let sarah = catalog.get("sarah-skeptic").unwrap();
        let five = PromptBuilder::render(sarah, AffectLevel::new(5));
        let six = PromptBuilder::render(sarah, AffectLevel::new(6));
        assert!(five.contains("Current skepticism level: 5 (1-10 scale)"));
        assert!(six.contains("Current skepticism level: 6 (1-10 scale)"));
        assert_ne!(five, six);
        assert_eq!(
            five.replace("level: 5", "level: 6"),
            six,
            "only the level should differ"
        );
    }

    #[test]
    fn test_render_sections_in_order() {
        let catalog = PersonaCatalog::default();
        let carla = catalog.get("curious-carla").unwrap();
        let prompt = PromptBuilder::render(carla, AffectLevel::new(7));
        let intro = prompt.find("You are Curious Carla").unwrap();
        let traits = prompt.find("Key traits:").unwrap();
        let level = prompt.find("Current curiosity level").unwrap();
        let guidance = prompt.find("When responding:").unwrap();
        assert!(intro < traits && traits < level && level < guidance);
    }
}
