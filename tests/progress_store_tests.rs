//! End-to-end scenarios for the progress store: scoring through to
//! persisted state, migration on load, and serialized concurrent
//! updates.

use std::sync::Arc;
use std::time::Duration;

use gcse_coach_core::adaptive::scoring::{score_to_confidence_delta, score_to_mastery_delta};
use gcse_coach_core::config::CoreConfig;
use gcse_coach_core::persist::{MemoryRepository, ProgressRepository};
use gcse_coach_core::progress::migrate::SCHEMA_VERSION;
use gcse_coach_core::progress::store::{
    DeltaSource, ProgressStore, TopicDeltaArgs, AGGREGATE_TOPIC,
};
use gcse_coach_core::progress::{
    AppProgress, EventKind, SubjectProgress, TopicProgress,
};

fn fast_config() -> CoreConfig {
    CoreConfig {
        save_debounce: Duration::from_millis(10),
        ..Default::default()
    }
}

fn topic(id: &str, name: &str, current: f64, confidence: f64) -> TopicProgress {
    TopicProgress {
        id: id.to_string(),
        name: name.to_string(),
        current,
        confidence,
        last_tested: String::new(),
    }
}

fn biology_progress(topics: Vec<TopicProgress>) -> AppProgress {
    let mut progress = AppProgress {
        overall_grade_estimate: 1.0,
        target_grade: 8.0,
        streak: 0,
        subjects: vec![SubjectProgress {
            id: "biology".to_string(),
            name: "Biology".to_string(),
            current_grade: 1.0,
            topics,
        }],
        schema_version: Some(SCHEMA_VERSION),
        events: Vec::new(),
        latest_grade: None,
        last_score_percent: None,
        previous_score_percent: None,
        weak_topics: Vec::new(),
    };
    progress.recompute_grades();
    progress
}

async fn store_with(progress: AppProgress) -> ProgressStore {
    let repo = Arc::new(MemoryRepository::new());
    ProgressStore::create("student-1", repo, progress, &fast_config()).await
}

// Scenario A: a fully correct mock answer on a 0.5/0.5 topic.
#[tokio::test]
async fn perfect_mock_answer_moves_topic_by_ten_points() {
    let store = store_with(biology_progress(vec![topic(
        "bio-0",
        "Cell Biology",
        0.5,
        0.5,
    )]))
    .await;

    let raw_score = 1.0;
    let after = store
        .apply_topic_delta(TopicDeltaArgs {
            subject: "Biology".to_string(),
            topic: "Cell Biology".to_string(),
            delta: score_to_mastery_delta(raw_score),
            confidence_delta: score_to_confidence_delta(raw_score),
            source: DeltaSource::Mock,
            meta: None,
        })
        .await;

    let updated = &after.subjects[0].topics[0];
    assert!((updated.current - 0.6).abs() < 1e-9);
    assert!((updated.confidence - 0.6).abs() < 1e-9);
    assert!((after.subjects[0].current_grade - (0.6 * 8.0 + 1.0)).abs() < 1e-9);
    assert_eq!(after.events.len(), 1);
    assert_eq!(after.events[0].kind, EventKind::MockSubmitted);
    assert_eq!(after.events[0].delta, 10.0);
}

// Scenario B: an aggregate flashcard session across three topics.
#[tokio::test]
async fn aggregate_flashcard_delta_splits_across_topics() {
    let store = store_with(biology_progress(vec![
        topic("bio-0", "Cell Biology", 0.3, 0.5),
        topic("bio-1", "Organisation", 0.4, 0.5),
        topic("bio-2", "Bioenergetics", 0.5, 0.5),
    ]))
    .await;

    let accuracy = 8.0 / 10.0;
    let delta = score_to_mastery_delta(accuracy);
    assert!((delta - 6.0).abs() < 1e-9);

    let after = store
        .apply_topic_delta(TopicDeltaArgs {
            subject: "Biology".to_string(),
            topic: AGGREGATE_TOPIC.to_string(),
            delta,
            confidence_delta: 0.0,
            source: DeltaSource::Flashcards,
            meta: None,
        })
        .await;

    let currents: Vec<f64> = after.subjects[0].topics.iter().map(|t| t.current).collect();
    assert!((currents[0] - 0.32).abs() < 1e-9);
    assert!((currents[1] - 0.42).abs() < 1e-9);
    assert!((currents[2] - 0.52).abs() < 1e-9);
    assert_eq!(after.events[0].kind, EventKind::FlashcardSession);
}

// Scenario C: a v1 document migrates on open.
#[tokio::test]
async fn v1_document_migrates_to_derived_grades_on_open() {
    let repo = Arc::new(MemoryRepository::new());
    let mut old = biology_progress(vec![
        topic("bio-0", "Cell Biology", 0.2, 0.5),
        topic("bio-1", "Organisation", 0.4, 0.5),
        topic("bio-2", "Bioenergetics", 0.6, 0.5),
    ]);
    old.schema_version = None;
    old.subjects[0].current_grade = 0.0;
    old.overall_grade_estimate = 0.0;
    repo.insert("student-9", old);

    let store = ProgressStore::open(
        "student-9",
        Arc::clone(&repo) as Arc<dyn ProgressRepository>,
        &fast_config(),
    )
        .await
        .expect("stored document");
    let snapshot = store.snapshot().await;

    assert_eq!(snapshot.schema_version, Some(SCHEMA_VERSION));
    assert!((snapshot.subjects[0].current_grade - 4.2).abs() < 1e-9);
    assert!((snapshot.overall_grade_estimate - 4.2).abs() < 1e-9);
}

#[tokio::test]
async fn concurrent_deltas_compose_without_lost_updates() {
    let store = Arc::new(
        store_with(biology_progress(vec![topic("bio-0", "Cell Biology", 0.0, 0.0)])).await,
    );

    let mut handles = Vec::new();
    for _ in 0..30 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .apply_topic_delta(TopicDeltaArgs {
                    subject: "Biology".to_string(),
                    topic: "Cell Biology".to_string(),
                    delta: 1.0,
                    confidence_delta: 1.0,
                    source: DeltaSource::Mock,
                    meta: None,
                })
                .await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let snapshot = store.snapshot().await;
    let updated = &snapshot.subjects[0].topics[0];
    assert!((updated.current - 0.30).abs() < 1e-9);
    assert!((updated.confidence - 0.30).abs() < 1e-9);
    assert_eq!(snapshot.events.len(), 30);
}

#[tokio::test]
async fn grades_never_drift_from_topic_mastery() {
    let store = store_with(biology_progress(vec![
        topic("bio-0", "Cell Biology", 0.5, 0.5),
        topic("bio-1", "Organisation", 0.7, 0.5),
    ]))
    .await;

    let deltas = [35.0, -80.0, 12.5, 200.0, -3.0, 50.0];
    for (i, delta) in deltas.iter().enumerate() {
        let target = if i % 2 == 0 {
            "Cell Biology"
        } else {
            AGGREGATE_TOPIC
        };
        let after = store
            .apply_topic_delta(TopicDeltaArgs {
                subject: "Biology".to_string(),
                topic: target.to_string(),
                delta: *delta,
                confidence_delta: *delta,
                source: DeltaSource::Mock,
                meta: None,
            })
            .await;

        for subject in &after.subjects {
            for t in &subject.topics {
                assert!((0.0..=1.0).contains(&t.current));
                assert!((0.0..=1.0).contains(&t.confidence));
            }
            let expected = subject.topics.iter().map(|t| t.current).sum::<f64>()
                / subject.topics.len() as f64
                * 8.0
                + 1.0;
            assert!((subject.current_grade - expected).abs() < 1e-9);
        }
        let expected_overall = after.subjects.iter().map(|s| s.current_grade).sum::<f64>()
            / after.subjects.len() as f64;
        assert!((after.overall_grade_estimate - expected_overall).abs() < 1e-9);
    }
}

mod clamping_properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn arbitrary_delta_sequences_keep_values_in_unit_range(
            deltas in proptest::collection::vec((-200.0f64..200.0, -200.0f64..200.0), 1..20),
            start in 0.0f64..1.0,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let store = store_with(biology_progress(vec![topic(
                    "bio-0",
                    "Cell Biology",
                    start,
                    start,
                )]))
                .await;

                for (delta, confidence_delta) in deltas {
                    let after = store
                        .apply_topic_delta(TopicDeltaArgs {
                            subject: "Biology".to_string(),
                            topic: "Cell Biology".to_string(),
                            delta,
                            confidence_delta,
                            source: DeltaSource::Mock,
                            meta: None,
                        })
                        .await;
                    let t = &after.subjects[0].topics[0];
                    assert!((0.0..=1.0).contains(&t.current), "mastery escaped: {}", t.current);
                    assert!(
                        (0.0..=1.0).contains(&t.confidence),
                        "confidence escaped: {}",
                        t.confidence
                    );
                }
            });
        }
    }
}
