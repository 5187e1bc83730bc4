//! The enumerated skill set profiles may pick from.

/// Every skill a profile may declare, primary or secondary.
pub const SKILLS: [&str; 10] = [
    "Design",
    "Frontend",
    "Backend",
    "Product",
    "Fullstack",
    "Mobile",
    "Hardware",
    "Marketing",
    "Venture",
    "Art",
];

/// Maximum number of secondary skills per profile.
pub const MAX_SECONDARY_SKILLS: usize = 8;

/// Canonical casing for a skill, e.g. "fullstack" -> "Fullstack".
pub fn canonical_skill(skill: &str) -> Option<&'static str> {
    SKILLS.iter().find(|s| s.eq_ignore_ascii_case(skill)).copied()
}
