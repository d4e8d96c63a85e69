//! Robustness tests for the streaming reconciler and the full
//! generation pipeline around it: arbitrary chunk boundaries, malformed
//! payload recovery, and the zero-yield batch fallback.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use gcse_coach_core::cache::MemoryCache;
use gcse_coach_core::content::generator::ContentService;
use gcse_coach_core::content::reconciler::{parse_question, ObjectScanner};
use gcse_coach_core::content::{ExamConfig, Question, SessionKind};
use gcse_coach_core::llm::{ChunkReceiver, LlmError, TextGenerator};

fn question_json(i: usize) -> String {
    format!(
        r#"{{"id":"q{i}","questionText":"Describe the {i}th process \"fully\"","marks":{},"markScheme":"point one; point two","topic":"Cell Biology"}}"#,
        i + 1
    )
}

fn five_question_array() -> String {
    let items: Vec<String> = (0..5).map(question_json).collect();
    format!("[ {} ]", items.join(" , "))
}

#[test]
fn random_chunking_never_changes_the_result() {
    let payload = five_question_array();
    let strategy = proptest::collection::vec(1usize..30, 1..40);

    proptest!(ProptestConfig::with_cases(256), |(sizes in strategy)| {
        let mut scanner = ObjectScanner::new();
        let mut objects = Vec::new();

        let bytes = payload.as_bytes();
        let mut cursor = 0;
        let mut sizes = sizes.into_iter().cycle();
        while cursor < bytes.len() {
            let mut end = (cursor + sizes.next().unwrap()).min(bytes.len());
            while !payload.is_char_boundary(end) {
                end += 1;
            }
            objects.extend(scanner.push(&payload[cursor..end]));
            cursor = end;
        }

        prop_assert_eq!(objects.len(), 5);
        for (i, value) in objects.iter().enumerate() {
            let question = parse_question(value).expect("valid question shape");
            prop_assert_eq!(question.id, format!("q{i}"));
        }
    });
}

#[test]
fn garbage_between_objects_is_skipped() {
    let mut scanner = ObjectScanner::new();
    let mut objects = scanner.push("some leading chatter ");
    objects.extend(scanner.push(&question_json(0)));
    objects.extend(scanner.push(" , not-json , "));
    objects.extend(scanner.push(&question_json(1)));
    assert_eq!(objects.len(), 2);
}

/// Generator whose stream emits a scripted chunk sequence and whose
/// batch call returns a scripted body.
struct ScriptedGenerator {
    stream_chunks: Vec<String>,
    batch_body: Option<String>,
    batch_calls: Mutex<usize>,
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        _prompt: &str,
        _schema: Option<&serde_json::Value>,
    ) -> Result<String, LlmError> {
        *self.batch_calls.lock() += 1;
        self.batch_body.clone().ok_or(LlmError::EmptyResponse)
    }

    async fn generate_stream(
        &self,
        _prompt: &str,
        _schema: Option<&serde_json::Value>,
    ) -> Result<ChunkReceiver, LlmError> {
        let (tx, rx) = mpsc::channel(4);
        let chunks = self.stream_chunks.clone();
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

fn config() -> ExamConfig {
    ExamConfig {
        board: "AQA".into(),
        subject: "Biology".into(),
        paper: "Paper 1".into(),
        topics: vec!["Cell Biology".into()],
        question_count: 5,
        kind: SessionKind::Blitz,
        syllabus_version: "8461".into(),
        paper_name: None,
    }
}

#[tokio::test]
async fn streamed_paper_split_mid_string_yields_all_questions() {
    let payload = five_question_array();
    // Split at fixed awkward offsets: inside strings, between braces.
    let chunks: Vec<String> = payload
        .as_bytes()
        .chunks(11)
        .map(|c| String::from_utf8(c.to_vec()).unwrap())
        .collect();

    let generator = ScriptedGenerator {
        stream_chunks: chunks,
        batch_body: None,
        batch_calls: Mutex::new(0),
    };
    let service = ContentService::new(Arc::new(generator), Arc::new(MemoryCache::new()));

    let questions: Vec<Question> = service.question_stream(config(), vec![]).collect().await;
    assert_eq!(questions.len(), 5);
    for (i, question) in questions.iter().enumerate() {
        assert_eq!(question.id, format!("q{i}"));
    }
}

#[tokio::test]
async fn zero_valid_stream_objects_triggers_single_batch_fallback() {
    let batch: Vec<String> = (0..3).map(question_json).collect();
    let generator = Arc::new(ScriptedGenerator {
        stream_chunks: vec![
            r#"{"id":"", "questionText":"invalid: empty id","marks":2,"markScheme":"x","topic":"T"}"#
                .to_string(),
            "trailing noise".to_string(),
        ],
        batch_body: Some(format!(r#"{{"questions":[{}]}}"#, batch.join(","))),
        batch_calls: Mutex::new(0),
    });
    let service = ContentService::new(
        Arc::clone(&generator) as Arc<dyn TextGenerator>,
        Arc::new(MemoryCache::new()),
    );

    let questions: Vec<Question> = service.question_stream(config(), vec![]).collect().await;
    assert_eq!(questions.len(), 3);
    assert_eq!(*generator.batch_calls.lock(), 1);
}

#[tokio::test]
async fn abandoned_stream_stops_the_producer() {
    let payload = five_question_array();
    let generator = ScriptedGenerator {
        stream_chunks: vec![payload],
        batch_body: None,
        batch_calls: Mutex::new(0),
    };
    let service = ContentService::new(Arc::new(generator), Arc::new(MemoryCache::new()));

    let mut stream = service.question_stream(config(), vec![]);
    let first = stream.next().await;
    assert!(first.is_some());
    drop(stream);
    // Nothing to assert beyond not hanging: the producer task exits on
    // its next failed send.
}
