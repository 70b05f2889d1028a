//! System prompt rendering.
//!
//! The base prompt is fixed; profile fields, when available, are appended as
//! short bulleted context. Rendering must never fail: a missing or empty
//! profile yields the base prompt unchanged.

use chat_core::models::UserProfile;

const BASE_PROMPT: &str = "You are a helpful, attentive assistant. Answer \
accurately and stay grounded in the conversation. When earlier context would \
help, you can search the user's previous conversations with the \
search_conversation_history tool.";

pub fn build_system_prompt(profile: Option<&UserProfile>) -> String {
    let mut prompt = String::from(BASE_PROMPT);

    let Some(profile) = profile else {
        return prompt;
    };
    if profile.is_empty() {
        return prompt;
    }

    prompt.push_str("\n\nWhat you know about this user:");
    push_section(&mut prompt, "Preferred output style", &profile.output_preferences);
    push_section(&mut prompt, "How they want to be addressed", &profile.personal_preferences);
    push_section(&mut prompt, "Assistant preferences", &profile.assistant_preferences);
    push_section(&mut prompt, "Knowledge areas", &profile.knowledge);
    push_section(&mut prompt, "Interests", &profile.interests);
    push_section(&mut prompt, "Dislikes", &profile.dislikes);
    push_section(&mut prompt, "Family and friends", &profile.family_and_friends);
    push_section(&mut prompt, "Work", &profile.work_profile);
    push_section(&mut prompt, "Goals", &profile.goals);
    prompt
}

fn push_section(prompt: &mut String, label: &str, values: &[String]) {
    if values.is_empty() {
        return;
    }
    prompt.push_str("\n- ");
    prompt.push_str(label);
    prompt.push_str(": ");
    prompt.push_str(&values.join(", "));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::models::UserProfile;
    use chrono::Utc;

    #[test]
    fn missing_profile_yields_base_prompt() {
        let prompt = build_system_prompt(None);
        assert_eq!(prompt, BASE_PROMPT);
    }

    #[test]
    fn empty_profile_yields_base_prompt() {
        let profile = UserProfile::empty("u1", Utc::now());
        assert_eq!(build_system_prompt(Some(&profile)), BASE_PROMPT);
    }

    #[test]
    fn profile_fields_are_rendered_as_sections() {
        let mut profile = UserProfile::empty("u1", Utc::now());
        profile.interests = vec!["sailing".into(), "astronomy".into()];
        profile.personal_preferences = vec!["call me Sam".into()];

        let prompt = build_system_prompt(Some(&profile));
        assert!(prompt.starts_with(BASE_PROMPT));
        assert!(prompt.contains("Interests: sailing, astronomy"));
        assert!(prompt.contains("How they want to be addressed: call me Sam"));
        assert!(!prompt.contains("Dislikes"));
    }
}
