//! One-way schema upgrades for stored progress documents.
//!
//! v1 documents predate derived grades, the event log and weak-topic
//! accumulation. The upgrade derives what it can and defaults the rest;
//! well-formed older data never fails to migrate.

use tracing::info;

use super::AppProgress;

pub const SCHEMA_VERSION: u32 = 2;

pub fn needs_migration(progress: &AppProgress) -> bool {
    progress.schema_version.unwrap_or(1) < SCHEMA_VERSION
}

/// Upgrades a below-current document in place and stamps the version.
/// Idempotent: re-running on already-migrated data only re-derives values
/// that are pure functions of topic mastery.
pub fn migrate(mut progress: AppProgress) -> AppProgress {
    info!(
        from = progress.schema_version.unwrap_or(1),
        to = SCHEMA_VERSION,
        "migrating progress document"
    );

    for subject in &mut progress.subjects {
        subject.recompute_grade();
    }
    progress.recompute_overall();

    // `events` and `weak_topics` deserialize to empty when absent in the
    // stored document, which is exactly the v2 default.
    progress.schema_version = Some(SCHEMA_VERSION);
    progress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{SubjectProgress, TopicProgress};

    fn v1_progress() -> AppProgress {
        let topics: Vec<TopicProgress> = [0.2, 0.4, 0.6]
            .iter()
            .enumerate()
            .map(|(i, current)| TopicProgress {
                id: format!("bio-{i}"),
                name: format!("Topic {i}"),
                current: *current,
                confidence: 0.5,
                last_tested: String::new(),
            })
            .collect();
        AppProgress {
            overall_grade_estimate: 0.0,
            target_grade: 8.0,
            streak: 0,
            subjects: vec![SubjectProgress {
                id: "biology".into(),
                name: "Biology".into(),
                current_grade: 0.0,
                topics,
            }],
            schema_version: None,
            events: Vec::new(),
            latest_grade: None,
            last_score_percent: None,
            previous_score_percent: None,
            weak_topics: Vec::new(),
        }
    }

    #[test]
    fn derives_grades_from_topics() {
        let migrated = migrate(v1_progress());
        // avg mastery 0.4 -> grade 4.2
        assert!((migrated.subjects[0].current_grade - 4.2).abs() < 1e-9);
        assert!((migrated.overall_grade_estimate - 4.2).abs() < 1e-9);
        assert_eq!(migrated.schema_version, Some(SCHEMA_VERSION));
        assert!(!needs_migration(&migrated));
    }

    #[test]
    fn migration_is_idempotent() {
        let once = migrate(v1_progress());
        let twice = migrate(once.clone());
        assert_eq!(
            serde_json::to_value(&once).unwrap(),
            serde_json::to_value(&twice).unwrap()
        );
    }

    #[test]
    fn subject_without_topics_defaults_to_grade_one() {
        let mut progress = v1_progress();
        progress.subjects[0].topics.clear();
        let migrated = migrate(progress);
        assert_eq!(migrated.subjects[0].current_grade, 1.0);
        assert_eq!(migrated.overall_grade_estimate, 1.0);
    }
}
