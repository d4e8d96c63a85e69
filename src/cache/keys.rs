//! Cache key builders. Generation requests are deduplicated on a
//! normalized fingerprint of their parameters, so key construction lives
//! in one place.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Number of questions stored per fingerprint.
pub const QUESTION_CACHE_LIMIT: usize = 10;

/// Fingerprint for a generated question set: subject + sorted topics +
/// purpose tag. Topic order must not change the key.
pub fn question_set_key(subject: &str, topics: &[String], purpose: &str) -> String {
    let mut sorted: Vec<&str> = topics.iter().map(|t| t.as_str()).collect();
    sorted.sort_unstable();
    format!("{}_{}_{}", subject, sorted.join("-"), purpose)
}

pub fn micro_lesson_key(topic: &str, question_context: &str) -> String {
    format!("micro-lesson:{}:{:016x}", topic, digest(question_context))
}

pub fn revision_plan_key(weaknesses: &[String]) -> String {
    let mut sorted: Vec<&str> = weaknesses.iter().map(|w| w.as_str()).collect();
    sorted.sort_unstable();
    format!("revision-plan:{}", sorted.join(","))
}

pub fn profile_insight_key(mastery_summary: &str) -> String {
    format!("profile-insight:{mastery_summary}")
}

pub fn adaptive_hint_key(question: &str, student_answer: &str) -> String {
    format!(
        "adaptive-hint:{:016x}",
        digest(&format!("{question}\n{student_answer}"))
    )
}

fn digest(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_order_does_not_change_the_key() {
        let a = question_set_key(
            "Biology",
            &["Organisation".into(), "Cell Biology".into()],
            "mock",
        );
        let b = question_set_key(
            "Biology",
            &["Cell Biology".into(), "Organisation".into()],
            "mock",
        );
        assert_eq!(a, b);
        assert_eq!(a, "Biology_Cell Biology-Organisation_mock");
    }

    #[test]
    fn hint_keys_differ_by_answer() {
        let a = adaptive_hint_key("What is osmosis?", "water moves");
        let b = adaptive_hint_key("What is osmosis?", "salt moves");
        assert_ne!(a, b);
    }
}
