//! User profile storage and the merge rules applied by the memory writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured record of learned facts about a user, merged across
/// conversations. Field names are part of the stored document contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(default)]
    pub output_preferences: Vec<String>,
    #[serde(default)]
    pub personal_preferences: Vec<String>,
    #[serde(default)]
    pub assistant_preferences: Vec<String>,
    #[serde(default)]
    pub knowledge: Vec<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub dislikes: Vec<String>,
    #[serde(default)]
    pub family_and_friends: Vec<String>,
    #[serde(default)]
    pub work_profile: Vec<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    pub last_updated: DateTime<Utc>,
}

/// Per-conversation updates extracted by the LLM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdates {
    #[serde(default)]
    pub output_preferences: Vec<String>,
    #[serde(default)]
    pub personal_preferences: Vec<String>,
    #[serde(default)]
    pub assistant_preferences: Vec<String>,
    #[serde(default)]
    pub knowledge: Vec<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub dislikes: Vec<String>,
    #[serde(default)]
    pub family_and_friends: Vec<String>,
    #[serde(default)]
    pub work_profile: Vec<String>,
    #[serde(default)]
    pub goals: Vec<String>,
}

impl ProfileUpdates {
    pub fn is_empty(&self) -> bool {
        self.output_preferences.is_empty()
            && self.personal_preferences.is_empty()
            && self.assistant_preferences.is_empty()
            && self.knowledge.is_empty()
            && self.interests.is_empty()
            && self.dislikes.is_empty()
            && self.family_and_friends.is_empty()
            && self.work_profile.is_empty()
            && self.goals.is_empty()
    }
}

impl UserProfile {
    pub fn empty(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            output_preferences: Vec::new(),
            personal_preferences: Vec::new(),
            assistant_preferences: Vec::new(),
            knowledge: Vec::new(),
            interests: Vec::new(),
            dislikes: Vec::new(),
            family_and_friends: Vec::new(),
            work_profile: Vec::new(),
            goals: Vec::new(),
            last_updated: now,
        }
    }

    /// Merge extracted updates into this profile.
    ///
    /// Pure and additive: list fields become deduplicated unions, newer
    /// `personal_preferences` replace older ones wholesale, and a newly
    /// stated dislike evicts any overlapping interest (and vice versa, the
    /// newest statement winning).
    pub fn merge(mut self, updates: &ProfileUpdates, now: DateTime<Utc>) -> Self {
        union_into(&mut self.output_preferences, &updates.output_preferences);
        union_into(&mut self.assistant_preferences, &updates.assistant_preferences);
        union_into(&mut self.knowledge, &updates.knowledge);
        union_into(&mut self.family_and_friends, &updates.family_and_friends);
        union_into(&mut self.work_profile, &updates.work_profile);
        union_into(&mut self.goals, &updates.goals);

        if !updates.personal_preferences.is_empty() {
            self.personal_preferences = dedup(&updates.personal_preferences);
        }

        // A new interest retracts an overlapping dislike; a new dislike
        // retracts an overlapping interest. Dislikes are applied last, so a
        // single batch naming the same item in both lands on the dislike.
        union_into(&mut self.interests, &updates.interests);
        evict_overlapping(&mut self.dislikes, &updates.interests);
        union_into(&mut self.dislikes, &updates.dislikes);
        evict_overlapping(&mut self.interests, &updates.dislikes);

        self.last_updated = now;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.output_preferences.is_empty()
            && self.personal_preferences.is_empty()
            && self.assistant_preferences.is_empty()
            && self.knowledge.is_empty()
            && self.interests.is_empty()
            && self.dislikes.is_empty()
            && self.family_and_friends.is_empty()
            && self.work_profile.is_empty()
            && self.goals.is_empty()
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

fn overlaps(a: &str, b: &str) -> bool {
    let (a, b) = (normalize(a), normalize(b));
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || a.contains(&b) || b.contains(&a)
}

fn dedup(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    union_into(&mut out, values);
    out
}

fn union_into(target: &mut Vec<String>, additions: &[String]) {
    for addition in additions {
        if addition.trim().is_empty() {
            continue;
        }
        let norm = normalize(addition);
        if !target.iter().any(|existing| normalize(existing) == norm) {
            target.push(addition.trim().to_string());
        }
    }
}

fn evict_overlapping(target: &mut Vec<String>, newcomers: &[String]) {
    if newcomers.is_empty() {
        return;
    }
    target.retain(|existing| !newcomers.iter().any(|new| overlaps(existing, new)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn updates(interests: &[&str], dislikes: &[&str]) -> ProfileUpdates {
        ProfileUpdates {
            interests: interests.iter().map(|s| s.to_string()).collect(),
            dislikes: dislikes.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn merge_is_additive_and_deduplicates() {
        let now = Utc::now();
        let profile = UserProfile::empty("u1", now)
            .merge(&updates(&["hiking", "photography"], &[]), now)
            .merge(&updates(&["Hiking", "cooking"], &[]), now);

        assert_eq!(profile.interests, vec!["hiking", "photography", "cooking"]);
    }

    #[test]
    fn new_dislike_evicts_matching_interest() {
        let now = Utc::now();
        let profile = UserProfile::empty("u1", now)
            .merge(&updates(&["jazz music"], &[]), now)
            .merge(&updates(&[], &["jazz"]), now);

        assert!(profile.interests.is_empty());
        assert_eq!(profile.dislikes, vec!["jazz"]);
    }

    #[test]
    fn new_interest_evicts_matching_dislike() {
        let now = Utc::now();
        let profile = UserProfile::empty("u1", now)
            .merge(&updates(&[], &["opera"]), now)
            .merge(&updates(&["opera"], &[]), now);

        assert!(profile.dislikes.is_empty());
        assert_eq!(profile.interests, vec!["opera"]);
    }

    #[test]
    fn personal_preferences_are_replaced_by_newer() {
        let now = Utc::now();
        let mut first = ProfileUpdates::default();
        first.personal_preferences = vec!["call me Sam".into()];
        let mut second = ProfileUpdates::default();
        second.personal_preferences = vec!["call me Dr. Smith".into()];

        let profile = UserProfile::empty("u1", now).merge(&first, now).merge(&second, now);
        assert_eq!(profile.personal_preferences, vec!["call me Dr. Smith"]);
    }

    #[test]
    fn union_fields_commute_across_permutations() {
        let now = Utc::now();
        let batches = vec![
            updates(&["chess", "running"], &[]),
            updates(&["baking"], &[]),
            updates(&["running", "astronomy"], &[]),
        ];

        let forward = batches
            .iter()
            .fold(UserProfile::empty("u1", now), |p, u| p.merge(u, now));
        let reverse = batches
            .iter()
            .rev()
            .fold(UserProfile::empty("u1", now), |p, u| p.merge(u, now));

        let mut a: Vec<String> = forward.interests.iter().map(|s| normalize(s)).collect();
        let mut b: Vec<String> = reverse.interests.iter().map(|s| normalize(s)).collect();
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_updates_are_detected() {
        assert!(ProfileUpdates::default().is_empty());
        assert!(!updates(&["x"], &[]).is_empty());
    }
}
