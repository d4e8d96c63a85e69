//! Read-only decision-making projection of `AppProgress`.
//!
//! Rebuilt on every read; the selector and hosting UI consume this view
//! and must never mutate progress through it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::AppProgress;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRef {
    pub subject: String,
    pub topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentState {
    pub subjects: Vec<String>,
    /// Topic name -> mastery on a 0-100 scale.
    pub mastery: HashMap<String, f64>,
    /// Topic name -> confidence on a 0-100 scale.
    pub confidence: HashMap<String, f64>,
    pub topics_by_subject: HashMap<String, Vec<String>>,
    pub streak: u32,
    pub trial_days_left: i64,
    pub last_activity: Option<ActivityRef>,
    /// Topic name -> most recent event's mastery delta.
    pub mastery_delta: HashMap<String, f64>,
    /// Topic name -> most recent event's confidence delta.
    pub confidence_delta: HashMap<String, f64>,
    pub weak_topics: Vec<String>,
}

impl StudentState {
    pub fn from_progress(
        progress: &AppProgress,
        last_activity: Option<ActivityRef>,
        trial_days_left: i64,
    ) -> Self {
        let mut mastery = HashMap::new();
        let mut confidence = HashMap::new();
        let mut topics_by_subject = HashMap::new();

        for subject in &progress.subjects {
            let mut names = Vec::with_capacity(subject.topics.len());
            for topic in &subject.topics {
                mastery.insert(topic.name.clone(), topic.current * 100.0);
                confidence.insert(topic.name.clone(), topic.confidence * 100.0);
                names.push(topic.name.clone());
            }
            topics_by_subject.insert(subject.name.clone(), names);
        }

        // The latest event per topic carries the deltas the overrides key
        // off; events are most-recent-last so earlier entries are
        // overwritten as we scan.
        let mut mastery_delta = HashMap::new();
        let mut confidence_delta = HashMap::new();
        for event in &progress.events {
            mastery_delta.insert(event.topic.clone(), event.delta);
            confidence_delta.insert(event.topic.clone(), event.confidence_delta);
        }

        Self {
            subjects: progress.subjects.iter().map(|s| s.name.clone()).collect(),
            mastery,
            confidence,
            topics_by_subject,
            streak: progress.streak,
            trial_days_left,
            last_activity,
            mastery_delta,
            confidence_delta,
            weak_topics: progress.weak_topics.clone(),
        }
    }

    pub fn topic_mastery(&self, topic: &str) -> f64 {
        self.mastery.get(topic).copied().unwrap_or(0.0)
    }

    pub fn subject_average_mastery(&self, subject: &str) -> Option<f64> {
        let topics = self.topics_by_subject.get(subject)?;
        if topics.is_empty() {
            return None;
        }
        let sum: f64 = topics.iter().map(|t| self.topic_mastery(t)).sum();
        Some(sum / topics.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{seed_progress, EventKind, ProgressEvent, SubjectSeed};

    #[test]
    fn projection_scales_to_percentages() {
        let progress = seed_progress(
            &[SubjectSeed {
                id: "biology".into(),
                name: "Biology".into(),
            }],
            8.0,
        );
        let state = StudentState::from_progress(&progress, None, 3);
        assert_eq!(state.subjects, vec!["Biology".to_string()]);
        assert!((state.topic_mastery("Biology Topic A") - 30.0).abs() < 1e-9);
        assert!((state.subject_average_mastery("Biology").unwrap() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn latest_event_wins_the_delta_maps() {
        let mut progress = seed_progress(
            &[SubjectSeed {
                id: "biology".into(),
                name: "Biology".into(),
            }],
            8.0,
        );
        progress.append_event(ProgressEvent::new(
            "Biology",
            "Biology Topic A",
            EventKind::MockSubmitted,
            -4.0,
            -5.0,
            None,
        ));
        progress.append_event(ProgressEvent::new(
            "Biology",
            "Biology Topic A",
            EventKind::MockSubmitted,
            6.0,
            -20.0,
            None,
        ));
        let state = StudentState::from_progress(&progress, None, 3);
        assert_eq!(state.mastery_delta.get("Biology Topic A"), Some(&6.0));
        assert_eq!(state.confidence_delta.get("Biology Topic A"), Some(&-20.0));
    }
}
