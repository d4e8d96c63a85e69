//! Session-scoped mastery tracking.
//!
//! Each topic carries a bounded rolling history of graded events; the
//! mastery score is a weighted blend of accuracy, stated confidence,
//! micro-lesson lift and recency. Separate from the persisted
//! `TopicProgress` values: this projection is rebuilt per session and
//! feeds the micro-lesson gate and question generation prompts.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

const INITIAL_MASTERY_SCORE: f64 = 0.3;
const MASTERY_THRESHOLD: f64 = 0.75;
const REINFORCE_THRESHOLD: f64 = 0.5;
const MICRO_LESSON_TRIGGER_THRESHOLD: f64 = 0.4;

const HISTORY_LIMIT: usize = 10;
const RECENCY_WINDOW: usize = 5;
const RECENCY_HALF_LIFE_HOURS: f64 = 48.0;

// Weighted formula: M = 0.5*A + 0.2*C + 0.2*L + 0.1*R
const ACCURACY_WEIGHT: f64 = 0.5;
const CONFIDENCE_WEIGHT: f64 = 0.2;
const LIFT_WEIGHT: f64 = 0.2;
const RECENCY_WEIGHT: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum ConfidenceBand {
    Low,
    #[default]
    Medium,
    High,
}

impl ConfidenceBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Medium,
        }
    }

    pub fn value(&self) -> f64 {
        match self {
            Self::Low => 0.25,
            Self::Medium => 0.6,
            Self::High => 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasteryStatus {
    Mastered,
    Reinforce,
    Active,
}

impl MasteryStatus {
    pub fn from_score(mastery_score: f64) -> Self {
        if mastery_score >= MASTERY_THRESHOLD {
            return Self::Mastered;
        }
        if mastery_score < REINFORCE_THRESHOLD {
            return Self::Reinforce;
        }
        Self::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedEvent {
    pub topic: String,
    pub correct: bool,
    pub confidence: ConfidenceBand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lift: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub correct: bool,
    pub timestamp_ms: i64,
    pub confidence: ConfidenceBand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lift: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicMastery {
    pub topic: String,
    pub mastery_score: f64,
    pub trend: f64,
    pub last_update_ms: i64,
    pub history: VecDeque<HistoryEntry>,
}

impl TopicMastery {
    /// New topics start from an assumed baseline rather than zero, so a
    /// first wrong answer does not crater the score.
    pub fn new(topic: impl Into<String>, now_ms: i64) -> Self {
        Self {
            topic: topic.into(),
            mastery_score: INITIAL_MASTERY_SCORE,
            trend: 0.0,
            last_update_ms: now_ms,
            history: VecDeque::new(),
        }
    }

    pub fn status(&self) -> MasteryStatus {
        MasteryStatus::from_score(self.mastery_score)
    }

    /// Folds a graded event into the history and recomputes the score.
    pub fn record(&mut self, event: &GradedEvent, now_ms: i64) {
        self.history.push_back(HistoryEntry {
            correct: event.correct,
            timestamp_ms: now_ms,
            confidence: event.confidence,
            lift: event.lift,
        });
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }

        let accuracy = self.history.iter().filter(|h| h.correct).count() as f64
            / self.history.len() as f64;
        let confidence_value = event.confidence.value();

        let lifts: Vec<f64> = self
            .history
            .iter()
            .filter_map(|h| h.lift)
            .filter(|l| *l > 0.0)
            .collect();
        let avg_lift = if lifts.is_empty() {
            0.0
        } else {
            lifts.iter().sum::<f64>() / lifts.len() as f64
        };

        let recency = self.recency_score(now_ms);

        let raw = accuracy * ACCURACY_WEIGHT
            + confidence_value * CONFIDENCE_WEIGHT
            + avg_lift * LIFT_WEIGHT
            + recency * RECENCY_WEIGHT;
        let new_score = raw.clamp(0.0, 1.0);

        self.trend = new_score - self.mastery_score;
        self.mastery_score = new_score;
        self.last_update_ms = now_ms;
    }

    fn recency_score(&self, now_ms: i64) -> f64 {
        if self.history.is_empty() {
            return 0.5;
        }
        let window_start = self.history.len().saturating_sub(RECENCY_WINDOW);
        let recent: Vec<&HistoryEntry> = self.history.iter().skip(window_start).collect();
        let total: f64 = recent
            .iter()
            .map(|entry| {
                let hours_ago = (now_ms - entry.timestamp_ms) as f64 / (1000.0 * 60.0 * 60.0);
                let recency = (1.0 - hours_ago / RECENCY_HALF_LIFE_HOURS).max(0.0);
                if entry.correct {
                    recency
                } else {
                    recency * 0.5
                }
            })
            .sum();
        (total / recent.len() as f64).min(1.0)
    }
}

/// Applies a graded event to an optional existing mastery state, creating
/// the baseline state on first contact with a topic.
pub fn calculate_mastery_for_topic(
    event: &GradedEvent,
    current: Option<&TopicMastery>,
    now_ms: i64,
) -> TopicMastery {
    let mut mastery = current
        .cloned()
        .unwrap_or_else(|| TopicMastery::new(event.topic.clone(), now_ms));
    mastery.record(event, now_ms);
    mastery
}

/// Micro-lesson gate. Interrupting practice is expensive, so a lesson is
/// only offered once a pattern of recent mistakes is visible:
/// at least two interactions, the latest one incorrect, mastery below the
/// trigger threshold, and at least two misses in the last five answers.
pub fn should_show_micro_lesson(mastery: Option<&TopicMastery>) -> bool {
    let Some(mastery) = mastery else {
        return false;
    };
    if mastery.history.len() < 2 {
        return false;
    }

    let last = mastery
        .history
        .back()
        .expect("history checked non-empty above");
    if last.correct {
        return false;
    }

    if mastery.mastery_score >= MICRO_LESSON_TRIGGER_THRESHOLD {
        return false;
    }

    let window_start = mastery.history.len().saturating_sub(RECENCY_WINDOW);
    let incorrect_count = mastery
        .history
        .iter()
        .skip(window_start)
        .filter(|h| !h.correct)
        .count();
    incorrect_count >= 2
}
