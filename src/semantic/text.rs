//! Builds the canonical search string a profile is embedded under.
//!
//! The output is intermediate text for the embedding model, never displayed,
//! so no case or whitespace normalization happens here.

use crate::profiles::Profile;

/// Separator between profile parts.
const PART_SEPARATOR: &str = ". ";

/// Concatenate a profile's textual fields into one embeddable string.
///
/// Field order is fixed: name, primary skill, secondary skills, header,
/// description, graduation phrase. Empty parts are dropped entirely rather
/// than emitted as empty segments.
pub fn to_search_text(profile: &Profile) -> String {
    let grad_phrase = if profile.grad_year.is_empty() {
        String::new()
    } else {
        format!("graduates {}", profile.grad_year)
    };

    let mut parts: Vec<&str> = vec![&profile.name, &profile.skill];
    parts.extend(profile.secondary_skills.iter().map(String::as_str));
    parts.push(&profile.header);
    parts.push(&profile.description);
    parts.push(&grad_phrase);

    parts
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(PART_SEPARATOR)
}

/// Hash of the search text, used to detect stale embeddings.
pub fn search_text_hash(profile: &Profile) -> u64 {
    use std::hash::{Hash, Hasher};

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    to_search_text(profile).hash(&mut hasher);
    hasher.finish()
}
