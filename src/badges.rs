//! Badge catalog and award detection.
//!
//! `evaluate` is the snapshot-diff path run inside every progress update;
//! streak and session-count badges are computed from direct counters via
//! `achievements` instead.

use serde::{Deserialize, Serialize};

use crate::progress::AppProgress;

const TOPIC_MASTERY_BADGE_ID: &str = "mastery_80";
const TOPIC_MASTERY_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Badge {
    pub id: String,
    pub title: String,
    pub description: String,
    pub icon: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    #[serde(flatten)]
    pub badge: Badge,
    pub unlocked: bool,
}

fn badge(id: &str, title: &str, description: &str, icon: &str) -> Badge {
    Badge {
        id: id.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        icon: icon.to_string(),
    }
}

pub fn all_badges() -> Vec<Badge> {
    vec![
        badge("streak_3", "On a Roll", "Maintain a 3-day study streak.", "🥉"),
        badge("streak_7", "Week Warrior", "Maintain a 7-day study streak.", "🥈"),
        badge("streak_21", "Habit Hero", "Maintain a 21-day study streak.", "🥇"),
        badge("first_session", "First Steps", "Complete your first practice session.", "🚀"),
        badge("first_mock", "Exam Ready", "Complete your first full mock exam.", "📜"),
        badge("mastery_80", "Topic Adept", "Achieve 80% mastery in any topic.", "🧠"),
        badge("ten_sessions", "Consistent Learner", "Complete 10 study sessions.", "📚"),
        badge("ai_tutor", "Curious Mind", "Use the AI Tutor for the first time.", "💡"),
        badge("revision_plan", "Planner Pro", "Generate your first revision plan.", "📅"),
        badge("perfect_score", "Flawless Victory", "Get a perfect score on a quiz.", "🎯"),
    ]
}

pub fn badge_by_id(id: &str) -> Option<Badge> {
    all_badges().into_iter().find(|b| b.id == id)
}

/// Compares two progress snapshots and returns any newly earned badges.
///
/// At most one topic-mastery badge is awarded per pass, however many topics
/// crossed the threshold in the same update. Grade-up badges are awarded per
/// subject whose whole-number grade rose.
pub fn evaluate(before: &AppProgress, after: &AppProgress) -> Vec<Badge> {
    let mut awarded = Vec::new();

    if let Some(mastery_badge) = badge_by_id(TOPIC_MASTERY_BADGE_ID) {
        let crossed = after.subjects.iter().any(|subject_after| {
            let Some(subject_before) = before.subjects.iter().find(|s| s.id == subject_after.id)
            else {
                return false;
            };
            subject_after.topics.iter().any(|topic_after| {
                subject_before
                    .topics
                    .iter()
                    .find(|t| t.id == topic_after.id)
                    .is_some_and(|topic_before| {
                        topic_after.current >= TOPIC_MASTERY_THRESHOLD
                            && topic_before.current < TOPIC_MASTERY_THRESHOLD
                    })
            })
        });
        if crossed {
            awarded.push(mastery_badge);
        }
    }

    for subject_after in &after.subjects {
        let Some(subject_before) = before.subjects.iter().find(|s| s.id == subject_after.id)
        else {
            continue;
        };
        let grade_after = subject_after.current_grade.floor();
        let grade_before = subject_before.current_grade.floor();
        if grade_after > grade_before {
            awarded.push(Badge {
                id: format!("grade_up_{}_{}", subject_after.id, grade_after as i64),
                title: format!("{} Grade {}!", subject_after.name, grade_after as i64),
                description: format!(
                    "You've reached the next grade level in {}.",
                    subject_after.name
                ),
                icon: "🏆".to_string(),
            });
        }
    }

    awarded
}

/// Direct counters used for the achievement listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressCounters {
    pub sessions_completed: u32,
    pub mocks_completed: u32,
    pub tutor_opens: u32,
    pub plans_generated: u32,
    pub perfect_scores: u32,
}

/// The full catalog with unlocked status computed from the current
/// aggregate and session counters.
pub fn achievements(progress: &AppProgress, counters: &ProgressCounters) -> Vec<Achievement> {
    let best_topic_mastery = progress
        .subjects
        .iter()
        .flat_map(|s| s.topics.iter())
        .map(|t| t.current)
        .fold(0.0_f64, f64::max);

    all_badges()
        .into_iter()
        .map(|badge| {
            let unlocked = match badge.id.as_str() {
                "streak_3" => progress.streak >= 3,
                "streak_7" => progress.streak >= 7,
                "streak_21" => progress.streak >= 21,
                "first_session" => counters.sessions_completed >= 1,
                "first_mock" => counters.mocks_completed >= 1,
                "mastery_80" => best_topic_mastery >= TOPIC_MASTERY_THRESHOLD,
                "ten_sessions" => counters.sessions_completed >= 10,
                "ai_tutor" => counters.tutor_opens >= 1,
                "revision_plan" => counters.plans_generated >= 1,
                "perfect_score" => counters.perfect_scores >= 1,
                _ => false,
            };
            Achievement { badge, unlocked }
        })
        .collect()
}
