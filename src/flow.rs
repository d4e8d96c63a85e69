//! Owned session-flow context.
//!
//! One `SessionFlow` lives per signed-in student session. It carries the
//! state that hands off between an interrupted session and its
//! resumption (last activity, pending finish arguments, session-scoped
//! mastery), converts finished sessions into scoring deltas, and runs
//! the blitz finish pipeline: mark, summarize, fold into progress.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::adaptive::mastery::{
    calculate_mastery_for_topic, should_show_micro_lesson, ConfidenceBand, GradedEvent,
    TopicMastery,
};
use crate::adaptive::scoring::{score_to_confidence_delta, score_to_mastery_delta};
use crate::adaptive::selector::{self, NextAction};
use crate::badges::{self, Achievement, ProgressCounters};
use crate::content::generator::ContentService;
use crate::content::{marking, ExamConfig, ExamSession, Question, SessionKind, StudentAnswer};
use crate::progress::store::{DeltaSource, ProgressStore, TopicDeltaArgs, AGGREGATE_TOPIC};
use crate::progress::student::ActivityRef;
use crate::progress::ExamSummary;

/// Marker paper name for weak-topic retests; a finished retest clears
/// the retested topics instead of accumulating new ones.
pub const RETEST_PAPER_NAME: &str = "Targeted Retest";
const RETEST_TOPIC_LIMIT: usize = 4;
const RETEST_QUESTION_COUNT: u32 = 10;

/// Quick-check outcomes after a micro-lesson map onto decisive scores.
const LESSON_PASS_SCORE: f64 = 0.9;
const LESSON_FAIL_SCORE: f64 = 0.3;

/// Session arguments stashed while a modal interrupts the finish flow.
#[derive(Debug, Clone)]
pub struct PendingFinish {
    pub config: ExamConfig,
    pub questions: Vec<Question>,
    pub answers: Vec<StudentAnswer>,
}

pub struct SessionFlow {
    store: Arc<ProgressStore>,
    content: Arc<ContentService>,
    trial_days_left: i64,
    last_activity: Option<ActivityRef>,
    session_mastery: HashMap<String, TopicMastery>,
    pending_finish: Option<PendingFinish>,
    counters: ProgressCounters,
}

impl SessionFlow {
    pub fn new(
        store: Arc<ProgressStore>,
        content: Arc<ContentService>,
        trial_days_left: i64,
    ) -> Self {
        Self {
            store,
            content,
            trial_days_left,
            last_activity: None,
            session_mastery: HashMap::new(),
            pending_finish: None,
            counters: ProgressCounters::default(),
        }
    }

    pub fn last_activity(&self) -> Option<&ActivityRef> {
        self.last_activity.as_ref()
    }

    /// Folds a graded in-session answer into the session mastery map and
    /// reports whether a micro-lesson should interrupt practice.
    pub fn record_answer(
        &mut self,
        topic: &str,
        correct: bool,
        confidence: ConfidenceBand,
        lift: Option<f64>,
    ) -> bool {
        let now_ms = Utc::now().timestamp_millis();
        let event = GradedEvent {
            topic: topic.to_string(),
            correct,
            confidence,
            lift,
        };
        let updated =
            calculate_mastery_for_topic(&event, self.session_mastery.get(topic), now_ms);
        let show_lesson = should_show_micro_lesson(Some(&updated));
        self.session_mastery.insert(topic.to_string(), updated);
        show_lesson
    }

    /// Session-scoped mastery, used to adapt generation prompts.
    pub fn topic_mastery(&self) -> Vec<TopicMastery> {
        self.session_mastery.values().cloned().collect()
    }

    /// One answered mock question: its raw score moves exactly that
    /// topic.
    pub async fn record_mock_answer(&mut self, subject: &str, topic: &str, raw_score: f64) {
        self.store
            .apply_topic_delta(TopicDeltaArgs {
                subject: subject.to_string(),
                topic: topic.to_string(),
                delta: score_to_mastery_delta(raw_score),
                confidence_delta: score_to_confidence_delta(raw_score),
                source: DeltaSource::Mock,
                meta: Some(serde_json::json!({ "rawScore": raw_score })),
            })
            .await;
        self.last_activity = Some(ActivityRef {
            subject: subject.to_string(),
            topic: topic.to_string(),
        });
    }

    /// Micro-lesson quick-check outcome, applied as a coach-session
    /// delta on the lesson's topic.
    pub async fn complete_micro_lesson(
        &mut self,
        subject: &str,
        topic: &str,
        lesson_id: &str,
        quick_check_correct: bool,
    ) {
        let raw_score = if quick_check_correct {
            LESSON_PASS_SCORE
        } else {
            LESSON_FAIL_SCORE
        };
        self.counters.tutor_opens += 1;
        self.store
            .apply_topic_delta(TopicDeltaArgs {
                subject: subject.to_string(),
                topic: topic.to_string(),
                delta: score_to_mastery_delta(raw_score),
                confidence_delta: score_to_confidence_delta(raw_score),
                source: DeltaSource::Coach,
                meta: Some(serde_json::json!({
                    "quickCheckCorrect": quick_check_correct,
                    "lessonId": lesson_id,
                })),
            })
            .await;
    }

    /// Ends an aggregate session (flashcards, coach chat). The result's
    /// accuracy becomes a subject-wide delta on the `various` topic.
    pub async fn end_session(
        &mut self,
        kind: SessionKind,
        subject: &str,
        result: Option<crate::content::SessionResult>,
    ) {
        self.counters.sessions_completed += 1;
        self.last_activity = Some(ActivityRef {
            subject: subject.to_string(),
            topic: AGGREGATE_TOPIC.to_string(),
        });

        let Some(result) = result else {
            return;
        };

        let accuracy = result.accuracy();
        if accuracy >= 1.0 && result.total > 0 {
            self.counters.perfect_scores += 1;
        }
        let source = match kind {
            SessionKind::Flashcards => DeltaSource::Flashcards,
            _ => DeltaSource::Coach,
        };
        self.store
            .apply_topic_delta(TopicDeltaArgs {
                subject: subject.to_string(),
                topic: AGGREGATE_TOPIC.to_string(),
                delta: score_to_mastery_delta(accuracy),
                confidence_delta: result
                    .confidence_delta
                    .unwrap_or_else(|| score_to_confidence_delta(accuracy)),
                source,
                meta: Some(serde_json::json!({
                    "correct": result.correct,
                    "total": result.total,
                })),
            })
            .await;
    }

    /// Stashes finish arguments while a modal interrupts the flow.
    pub fn stash_finish(&mut self, pending: PendingFinish) {
        self.pending_finish = Some(pending);
    }

    pub fn take_pending_finish(&mut self) -> Option<PendingFinish> {
        self.pending_finish.take()
    }

    /// Full blitz finish pipeline: mark the paper (AI with heuristic
    /// fallback), derive the exam summary, fold it into progress. A
    /// finished targeted retest clears its topics from the weak set
    /// instead of accumulating new ones.
    pub async fn finish_blitz(
        &mut self,
        config: ExamConfig,
        questions: Vec<Question>,
        answers: Vec<StudentAnswer>,
    ) -> ExamSession {
        let marked = self.content.mark_paper(&config, &questions, &answers).await;
        let summary = marking::summarize(&marked, Some(&config.subject));

        let is_retest = config.paper_name.as_deref() == Some(RETEST_PAPER_NAME);
        if is_retest {
            let recovered: Vec<String> = config
                .topics
                .iter()
                .filter(|t| !summary.weak_topics.contains(t))
                .cloned()
                .collect();
            if !recovered.is_empty() {
                info!(count = recovered.len(), "retest cleared weak topics");
                self.store.clear_weak_topics(&recovered).await;
            }
            let still_weak = summary.weak_topics.clone();
            self.store
                .apply_exam_summary(&summary, Some(&still_weak))
                .await;
        } else {
            self.store.apply_exam_summary(&summary, None).await;
        }

        self.counters.sessions_completed += 1;
        self.counters.mocks_completed += 1;
        self.last_activity = Some(ActivityRef {
            subject: config.subject.clone(),
            topic: AGGREGATE_TOPIC.to_string(),
        });

        ExamSession {
            config,
            questions,
            answers,
            feedback: marked.feedback,
            diagnostic_report: marked.diagnostic_report,
            total_marks: marked.total_marks,
            predicted_grade: marked.predicted_grade,
        }
    }

    /// Generates a focused paper over the accumulated weak topics.
    pub async fn retest_weak_topics(
        &self,
        subject: &str,
        board: &str,
        syllabus_version: &str,
    ) -> Vec<Question> {
        let weak_topics = self.store.snapshot().await.weak_topics;
        let topics: Vec<String> = weak_topics.into_iter().take(RETEST_TOPIC_LIMIT).collect();
        if topics.is_empty() {
            warn!("no weak topics to retest");
            return Vec::new();
        }

        let config = ExamConfig {
            board: board.to_string(),
            subject: subject.to_string(),
            paper: "Retest".to_string(),
            topics,
            question_count: RETEST_QUESTION_COUNT,
            kind: SessionKind::Blitz,
            syllabus_version: syllabus_version.to_string(),
            paper_name: Some(RETEST_PAPER_NAME.to_string()),
        };

        use tokio_stream::StreamExt;
        let questions: Vec<Question> = self
            .content
            .question_stream(config, Vec::new())
            .collect()
            .await;
        info!(count = questions.len(), "retest paper generated");
        questions
    }

    /// The single next recommended activity for this student.
    pub async fn next_action(&self) -> NextAction {
        let state = self
            .store
            .student_state(self.last_activity.clone(), self.trial_days_left)
            .await;
        selector::next_action(&state)
    }

    pub fn record_plan_generated(&mut self) {
        self.counters.plans_generated += 1;
    }

    pub async fn achievements(&self) -> Vec<Achievement> {
        let snapshot = self.store.snapshot().await;
        badges::achievements(&snapshot, &self.counters)
    }
}
