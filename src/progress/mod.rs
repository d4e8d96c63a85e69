//! The persisted student-progress aggregate.
//!
//! `AppProgress` is the single document synced per student. Grades are
//! always derived from topic mastery: `current_grade` and
//! `overall_grade_estimate` are recomputed inside every mutation and never
//! set independently.

pub mod migrate;
pub mod store;
pub mod student;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Rolling event log bound; oldest entries are dropped first.
pub const EVENT_LOG_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MockSubmitted,
    FlashcardSession,
    CoachSession,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MockSubmitted => "mock_submitted",
            Self::FlashcardSession => "flashcard_session",
            Self::CoachSession => "coach_session",
        }
    }
}

/// Append-only analytics record. Never replayed into `TopicProgress`;
/// the mastery fields and the log are written in the same serialized
/// update but remain independent facets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub id: String,
    pub ts: String,
    pub subject: String,
    pub topic: String,
    pub kind: EventKind,
    pub delta: f64,
    pub confidence_delta: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl ProgressEvent {
    pub fn new(
        subject: impl Into<String>,
        topic: impl Into<String>,
        kind: EventKind,
        delta: f64,
        confidence_delta: f64,
        meta: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ts: Utc::now().to_rfc3339(),
            subject: subject.into(),
            topic: topic.into(),
            kind,
            delta,
            confidence_delta,
            meta,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicProgress {
    pub id: String,
    pub name: String,
    /// Mastery in [0, 1]; clamped after every mutation.
    pub current: f64,
    /// Confidence in [0, 1]; clamped after every mutation.
    pub confidence: f64,
    pub last_tested: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectProgress {
    pub id: String,
    pub name: String,
    /// GCSE-style 1-9 grade, derived as `avg(topic.current) * 8 + 1`.
    pub current_grade: f64,
    pub topics: Vec<TopicProgress>,
}

impl SubjectProgress {
    pub fn average_mastery(&self) -> f64 {
        if self.topics.is_empty() {
            return 0.0;
        }
        self.topics.iter().map(|t| t.current).sum::<f64>() / self.topics.len() as f64
    }

    pub fn recompute_grade(&mut self) {
        if self.topics.is_empty() {
            self.current_grade = 1.0;
            return;
        }
        self.current_grade = self.average_mastery() * 8.0 + 1.0;
    }
}

/// Headline numbers from the most recent mock exam; not a history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSummary {
    pub score_percent: f64,
    pub predicted_grade: String,
    pub weak_topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppProgress {
    pub overall_grade_estimate: f64,
    pub target_grade: f64,
    /// Consecutive-improvement counter over mock scores.
    pub streak: u32,
    pub subjects: Vec<SubjectProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub events: Vec<ProgressEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_grade: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_score_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_score_percent: Option<f64>,
    #[serde(default)]
    pub weak_topics: Vec<String>,
}

impl AppProgress {
    /// Recomputes every derived grade from current topic mastery.
    pub fn recompute_grades(&mut self) {
        for subject in &mut self.subjects {
            subject.recompute_grade();
        }
        self.recompute_overall();
    }

    pub fn recompute_overall(&mut self) {
        if self.subjects.is_empty() {
            self.overall_grade_estimate = 1.0;
            return;
        }
        self.overall_grade_estimate =
            self.subjects.iter().map(|s| s.current_grade).sum::<f64>() / self.subjects.len() as f64;
    }

    pub fn append_event(&mut self, event: ProgressEvent) {
        self.events.push(event);
        if self.events.len() > EVENT_LOG_LIMIT {
            let excess = self.events.len() - EVENT_LOG_LIMIT;
            self.events.drain(..excess);
        }
    }

    pub fn find_subject(&self, name: &str) -> Option<&SubjectProgress> {
        self.subjects.iter().find(|s| s.name == name)
    }
}

/// A subject chosen at onboarding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSeed {
    pub id: String,
    pub name: String,
}

/// Deterministic starting aggregate for a new student. Each subject gets
/// three placeholder topics on a gentle mastery ramp so the first session
/// has something to rank against.
pub fn seed_progress(subjects: &[SubjectSeed], target_grade: f64) -> AppProgress {
    let now = Utc::now().to_rfc3339();
    let subjects: Vec<SubjectProgress> = subjects
        .iter()
        .enumerate()
        .map(|(i, seed)| {
            let topics: Vec<TopicProgress> = ["Topic A", "Topic B", "Topic C"]
                .iter()
                .enumerate()
                .map(|(j, suffix)| TopicProgress {
                    id: format!("{}-topic-{}", seed.id, j),
                    name: format!("{} {}", seed.name, suffix),
                    current: 0.3 + (j as f64) * 0.1 + (i as f64) * 0.05,
                    confidence: 0.6,
                    last_tested: now.clone(),
                })
                .collect();
            let mut subject = SubjectProgress {
                id: seed.id.clone(),
                name: seed.name.clone(),
                current_grade: 1.0,
                topics,
            };
            subject.recompute_grade();
            subject
        })
        .collect();

    let mut progress = AppProgress {
        overall_grade_estimate: 1.0,
        target_grade,
        streak: 0,
        subjects,
        schema_version: Some(migrate::SCHEMA_VERSION),
        events: Vec::new(),
        latest_grade: None,
        last_score_percent: None,
        previous_score_percent: None,
        weak_topics: Vec::new(),
    };
    progress.recompute_overall();
    progress
}
