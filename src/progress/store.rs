//! Owner of the mutable `AppProgress` aggregate.
//!
//! Every mutation runs under one async mutex: snapshot, mutate, clamp,
//! re-derive grades, append the event, diff badges. Other components only
//! ever see cloned snapshots or the `StudentState` projection.
//!
//! Durable writes are debounced: the logical state is authoritative in
//! memory immediately, only the physical save is deferred until a quiet
//! period. Save failures are logged and retried on the next mutation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::badges::{self, Badge};
use crate::config::CoreConfig;
use crate::persist::ProgressRepository;

use super::migrate;
use super::student::{ActivityRef, StudentState};
use super::{AppProgress, EventKind, ExamSummary, ProgressEvent, TopicProgress};

/// Pseudo-topic for aggregate sessions (flashcards, coach) that have no
/// single topic; the delta is spread across the subject's topics.
pub const AGGREGATE_TOPIC: &str = "various";

const NEW_TOPIC_MASTERY: f64 = 0.5;
const NEW_TOPIC_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaSource {
    Mock,
    Flashcards,
    Coach,
}

impl DeltaSource {
    pub fn event_kind(&self) -> EventKind {
        match self {
            Self::Mock => EventKind::MockSubmitted,
            Self::Flashcards => EventKind::FlashcardSession,
            Self::Coach => EventKind::CoachSession,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicDeltaArgs {
    pub subject: String,
    pub topic: String,
    /// Mastery delta on the 0-100 scale.
    pub delta: f64,
    /// Confidence delta on the 0-100 scale.
    pub confidence_delta: f64,
    pub source: DeltaSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

pub struct ProgressStore {
    user_id: String,
    state: Arc<Mutex<AppProgress>>,
    badge_queue: Arc<SyncMutex<VecDeque<Badge>>>,
    repo: Arc<dyn ProgressRepository>,
    save_debounce: Duration,
    pending_save: Arc<SyncMutex<Option<JoinHandle<()>>>>,
}

impl ProgressStore {
    /// Creates the store for a brand-new student and writes the initial
    /// document through immediately.
    pub async fn create(
        user_id: impl Into<String>,
        repo: Arc<dyn ProgressRepository>,
        initial: AppProgress,
        config: &CoreConfig,
    ) -> Self {
        let user_id = user_id.into();
        if let Err(err) = repo.save(&user_id, &initial).await {
            warn!(user_id, error = %err, "failed to write initial progress");
        }
        Self::from_parts(user_id, repo, initial, config)
    }

    /// Loads and, when needed, migrates a stored document. `None` means
    /// no document exists (or the load failed) and the student should go
    /// through onboarding.
    pub async fn open(
        user_id: impl Into<String>,
        repo: Arc<dyn ProgressRepository>,
        config: &CoreConfig,
    ) -> Option<Self> {
        let user_id = user_id.into();
        let loaded = match repo.load(&user_id).await {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!(user_id, error = %err, "failed to load progress");
                None
            }
        }?;

        let progress = if migrate::needs_migration(&loaded) {
            let migrated = migrate::migrate(loaded);
            if let Err(err) = repo.save(&user_id, &migrated).await {
                warn!(user_id, error = %err, "failed to persist migrated progress");
            }
            migrated
        } else {
            loaded
        };

        Some(Self::from_parts(user_id, repo, progress, config))
    }

    fn from_parts(
        user_id: String,
        repo: Arc<dyn ProgressRepository>,
        progress: AppProgress,
        config: &CoreConfig,
    ) -> Self {
        Self {
            user_id,
            state: Arc::new(Mutex::new(progress)),
            badge_queue: Arc::new(SyncMutex::new(VecDeque::new())),
            repo,
            save_debounce: config.save_debounce,
            pending_save: Arc::new(SyncMutex::new(None)),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn snapshot(&self) -> AppProgress {
        self.state.lock().await.clone()
    }

    pub async fn student_state(
        &self,
        last_activity: Option<ActivityRef>,
        trial_days_left: i64,
    ) -> StudentState {
        let guard = self.state.lock().await;
        StudentState::from_progress(&guard, last_activity, trial_days_left)
    }

    /// Applies a mastery/confidence delta to one topic, or spreads it
    /// across the subject for aggregate sessions. Returns the post-update
    /// snapshot; an unknown subject is a defensive no-op.
    pub async fn apply_topic_delta(&self, args: TopicDeltaArgs) -> AppProgress {
        let mut guard = self.state.lock().await;
        let before = guard.clone();

        let Some(subject) = guard.subjects.iter_mut().find(|s| s.name == args.subject) else {
            warn!(subject = %args.subject, "topic delta for unknown subject ignored");
            return before;
        };

        if args.topic != AGGREGATE_TOPIC {
            let topic = match subject
                .topics
                .iter_mut()
                .find(|t| t.name == args.topic || t.id == args.topic)
            {
                Some(topic) => topic,
                None => {
                    subject.topics.push(TopicProgress {
                        id: args.topic.clone(),
                        name: args.topic.clone(),
                        current: NEW_TOPIC_MASTERY,
                        confidence: NEW_TOPIC_CONFIDENCE,
                        last_tested: String::new(),
                    });
                    subject
                        .topics
                        .last_mut()
                        .expect("topic pushed just above")
                }
            };
            topic.current = (topic.current + args.delta / 100.0).clamp(0.0, 1.0);
            topic.confidence =
                (topic.confidence + args.confidence_delta / 100.0).clamp(0.0, 1.0);
            topic.last_tested = Utc::now().to_rfc3339();
        } else if !subject.topics.is_empty() {
            let share = args.delta / subject.topics.len() as f64;
            let confidence_share = args.confidence_delta / subject.topics.len() as f64;
            for topic in &mut subject.topics {
                topic.current = (topic.current + share / 100.0).clamp(0.0, 1.0);
                topic.confidence =
                    (topic.confidence + confidence_share / 100.0).clamp(0.0, 1.0);
            }
        }

        guard.recompute_grades();
        guard.append_event(ProgressEvent::new(
            args.subject.clone(),
            args.topic.clone(),
            args.source.event_kind(),
            args.delta,
            args.confidence_delta,
            args.meta,
        ));

        let awarded = badges::evaluate(&before, &guard);
        if !awarded.is_empty() {
            debug!(count = awarded.len(), "badges awarded");
            self.badge_queue.lock().extend(awarded);
        }

        let after = guard.clone();
        drop(guard);
        self.schedule_save();
        after
    }

    /// Folds a finished mock exam into the headline fields: streak,
    /// latest grade, score history pair, and the weak-topic union.
    pub async fn apply_exam_summary(
        &self,
        summary: &ExamSummary,
        new_weak_topics: Option<&[String]>,
    ) -> AppProgress {
        let mut guard = self.state.lock().await;

        let previous = guard.last_score_percent;
        guard.streak = if summary.score_percent >= previous.unwrap_or(-1.0) {
            guard.streak + 1
        } else {
            1
        };

        let incoming = new_weak_topics.unwrap_or(&summary.weak_topics);
        for topic in incoming {
            if !guard.weak_topics.contains(topic) {
                guard.weak_topics.push(topic.clone());
            }
        }

        guard.latest_grade = Some(summary.predicted_grade.clone());
        guard.previous_score_percent = previous;
        guard.last_score_percent = Some(summary.score_percent);

        let after = guard.clone();
        drop(guard);
        self.schedule_save();
        after
    }

    /// Weak topics cleared by a successful targeted retest.
    pub async fn clear_weak_topics(&self, topics: &[String]) -> AppProgress {
        let mut guard = self.state.lock().await;
        guard.weak_topics.retain(|t| !topics.contains(t));
        let after = guard.clone();
        drop(guard);
        self.schedule_save();
        after
    }

    pub async fn set_target_grade(&self, grade: f64) -> AppProgress {
        let mut guard = self.state.lock().await;
        guard.target_grade = grade;
        let after = guard.clone();
        drop(guard);
        self.schedule_save();
        after
    }

    /// Whole-document overwrite from the remote store (last-writer-wins).
    /// Only called by the host while no mutation is in flight.
    pub async fn overwrite_from_remote(&self, progress: AppProgress) {
        let progress = if migrate::needs_migration(&progress) {
            migrate::migrate(progress)
        } else {
            progress
        };
        let mut guard = self.state.lock().await;
        *guard = progress;
    }

    /// Badges earned since the last call, oldest first.
    pub fn take_awarded_badges(&self) -> Vec<Badge> {
        self.badge_queue.lock().drain(..).collect()
    }

    /// Forces the pending debounced write out now.
    pub async fn flush(&self) {
        if let Some(handle) = self.pending_save.lock().take() {
            handle.abort();
        }
        let snapshot = self.snapshot().await;
        if let Err(err) = self.repo.save(&self.user_id, &snapshot).await {
            warn!(user_id = %self.user_id, error = %err, "progress save failed");
        }
    }

    fn schedule_save(&self) {
        let state = Arc::clone(&self.state);
        let repo = Arc::clone(&self.repo);
        let user_id = self.user_id.clone();
        let debounce = self.save_debounce;

        let mut pending = self.pending_save.lock();
        if let Some(handle) = pending.take() {
            handle.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            // Snapshot at fire time so coalesced mutations all land in
            // one write.
            let snapshot = state.lock().await.clone();
            if let Err(err) = repo.save(&user_id, &snapshot).await {
                warn!(user_id, error = %err, "progress save failed");
            }
        }));
    }
}

impl Drop for ProgressStore {
    fn drop(&mut self) {
        if let Some(handle) = self.pending_save.lock().take() {
            handle.abort();
        }
    }
}
