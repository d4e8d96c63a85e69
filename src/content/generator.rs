//! AI content generation: streamed question papers and marking feedback,
//! plus the batch lesson/plan/insight services.
//!
//! Streamed generation sits behind a fingerprint cache and falls back to
//! one batch request when the stream yields nothing valid. A total
//! failure produces an empty result, never an error; callers keep
//! whatever placeholder content they already show.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::adaptive::mastery::TopicMastery;
use crate::cache::keys;
use crate::cache::{ContentCache, ContentCacheExt};
use crate::llm::{LlmError, TextGenerator};

use super::marking;
use super::reconciler::{
    classify_feedback_object, parse_question, FeedbackObject, ObjectScanner,
};
use super::{
    DiagnosticReport, ExamConfig, FeedbackChunk, FeedbackItem, FinalReport, MarkedPaper,
    MicroLesson, Question, RevisionDay, RevisionPlan, RevisionTask, RevisionTaskKind,
    StudentAnswer,
};

const QUESTION_CHANNEL_CAPACITY: usize = 16;
const FEEDBACK_CHANNEL_CAPACITY: usize = 16;
const PROFILE_INSIGHT_TOPICS: usize = 5;

/// Lifecycle of one generation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GenerationPhase {
    Streaming,
    Fallback,
    Done,
}

pub struct ContentService {
    llm: Arc<dyn TextGenerator>,
    cache: Arc<dyn ContentCache>,
}

impl ContentService {
    pub fn new(llm: Arc<dyn TextGenerator>, cache: Arc<dyn ContentCache>) -> Self {
        Self { llm, cache }
    }

    /// Streams questions for a blitz/mock session. Cached sets replay
    /// without touching the collaborator; live generations are cached for
    /// next time. Dropping the returned stream abandons generation.
    pub fn question_stream(
        &self,
        config: ExamConfig,
        mastery: Vec<TopicMastery>,
    ) -> ReceiverStream<Question> {
        let (tx, rx) = mpsc::channel(QUESTION_CHANNEL_CAPACITY);
        let llm = Arc::clone(&self.llm);
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            question_task(llm, cache, config, mastery, tx).await;
        });
        ReceiverStream::new(rx)
    }

    /// Streams marking feedback for a finished paper: one verdict per
    /// question, then the final report.
    pub fn feedback_stream(
        &self,
        config: ExamConfig,
        questions: Vec<Question>,
        answers: Vec<StudentAnswer>,
    ) -> ReceiverStream<FeedbackChunk> {
        let (tx, rx) = mpsc::channel(FEEDBACK_CHANNEL_CAPACITY);
        let llm = Arc::clone(&self.llm);
        tokio::spawn(async move {
            feedback_task(llm, config, questions, answers, tx).await;
        });
        ReceiverStream::new(rx)
    }

    /// Collects the feedback stream into a marked paper, falling back to
    /// the local heuristic marker when AI marking yields nothing.
    pub async fn mark_paper(
        &self,
        config: &ExamConfig,
        questions: &[Question],
        answers: &[StudentAnswer],
    ) -> MarkedPaper {
        let mut stream =
            self.feedback_stream(config.clone(), questions.to_vec(), answers.to_vec());

        let mut feedback: Vec<FeedbackItem> = Vec::new();
        let mut report: Option<FinalReport> = None;
        while let Some(chunk) = stream.next().await {
            match chunk {
                FeedbackChunk::FeedbackItem(item) => feedback.push(*item),
                FeedbackChunk::Report(r) => report = Some(*r),
            }
        }

        if feedback.is_empty() {
            warn!("AI marking yielded nothing, using heuristic marker");
            return marking::mark_heuristically(questions, answers);
        }

        let total_marks: f64 = feedback.iter().map(|f| f.marks_awarded).sum();
        let total_available: f64 = feedback.iter().map(|f| f.max_marks).sum();
        let percentage = if total_available > 0.0 {
            total_marks / total_available * 100.0
        } else {
            0.0
        };

        let (diagnostic_report, predicted_grade, motivational_summary) = match report {
            Some(report) => (
                report.diagnostic_report,
                report.predicted_grade,
                Some(report.motivational_summary),
            ),
            None => (
                DiagnosticReport {
                    strengths: Vec::new(),
                    weaknesses: marking::weak_topics_from_feedback(&feedback),
                    suggested_resources: Vec::new(),
                },
                marking::predicted_grade_for_percent(percentage),
                None,
            ),
        };

        MarkedPaper {
            feedback,
            diagnostic_report,
            total_marks,
            predicted_grade,
            motivational_summary,
        }
    }

    /// 90-second targeted lesson for a topic the student just missed.
    pub async fn micro_lesson(
        &self,
        topic: &str,
        question_context: &str,
    ) -> Result<MicroLesson, LlmError> {
        let key = keys::micro_lesson_key(topic, question_context);
        if let Some(cached) = self.cache.get_typed::<MicroLesson>(&key) {
            return Ok(cached);
        }

        let lesson_id = format!(
            "lesson_{}_{}",
            topic.replace(char::is_whitespace, "_"),
            uuid::Uuid::new_v4()
        );
        let prompt = format!(
            "Generate a 90-second \"micro-lesson\" on the GCSE topic: \"{topic}\". \
             The student just answered this question incorrectly: \"{question_context}\". \
             The output must be a JSON object conforming to the schema. \
             The unique \"id\" field MUST be set to \"{lesson_id}\"."
        );

        let text = self.llm.generate(&prompt, Some(&micro_lesson_schema())).await?;
        let lesson: MicroLesson =
            serde_json::from_str(extract_json_object(&text).unwrap_or(text.trim()))?;
        self.cache.set_typed(&key, &lesson);
        Ok(lesson)
    }

    /// 7-day plan targeting the report's weaknesses. Parse failures fall
    /// back to a generic plan rather than erroring; the fallback is
    /// cached like any other result.
    pub async fn revision_plan(&self, report: &DiagnosticReport) -> RevisionPlan {
        let key = keys::revision_plan_key(&report.weaknesses);
        if let Some(cached) = self.cache.get_typed::<RevisionPlan>(&key) {
            return cached;
        }

        let plan = match self.request_revision_plan(report).await {
            Ok(plan) if !plan.days.is_empty() => plan,
            Ok(_) => {
                warn!("revision plan came back empty, using fallback plan");
                fallback_plan()
            }
            Err(err) => {
                warn!(error = %err, "revision plan generation failed, using fallback plan");
                fallback_plan()
            }
        };
        self.cache.set_typed(&key, &plan);
        plan
    }

    async fn request_revision_plan(
        &self,
        report: &DiagnosticReport,
    ) -> Result<RevisionPlan, LlmError> {
        let prompt = format!(
            "You are an expert curriculum planner. Create a 7-day revision plan for a GCSE \
             student with these weaknesses: {}.\n\
             Your response MUST be a single, valid JSON object with a single key \"days\", \
             which contains an array of 7 daily plan objects.\n\
             Output ONLY the raw JSON object. Do not wrap it in markdown. Do not add any \
             introductory or concluding text.",
            report.weaknesses.join(", ")
        );
        let text = self.llm.generate(&prompt, Some(&revision_plan_schema())).await?;
        let plan: RevisionPlan =
            serde_json::from_str(extract_json_object(&text).unwrap_or(text.trim()))?;
        Ok(plan)
    }

    /// One-sentence coaching insight from the weakest topics.
    pub async fn profile_insight(&self, mastery: &[TopicMastery]) -> Result<String, LlmError> {
        if mastery.is_empty() {
            return Ok("Start a practice session to get your first insights!".to_string());
        }

        let mut weakest: Vec<&TopicMastery> = mastery.iter().collect();
        weakest.sort_by(|a, b| a.mastery_score.total_cmp(&b.mastery_score));
        weakest.truncate(PROFILE_INSIGHT_TOPICS);

        let cache_summary: Vec<String> = weakest
            .iter()
            .map(|m| format!("{}:{:.2}", m.topic, m.mastery_score))
            .collect();
        let key = keys::profile_insight_key(&cache_summary.join(","));
        if let Some(cached) = self.cache.get_typed::<String>(&key) {
            return Ok(cached);
        }

        let summary_lines: Vec<String> = weakest
            .iter()
            .map(|m| format!("- {}: {}% mastery", m.topic, (m.mastery_score * 100.0).round()))
            .collect();
        let prompt = format!(
            "You are an encouraging AI Coach for a UK GCSE student.\n\
             Based on the following summary of their weakest topics, provide a single, \
             actionable, and encouraging insight (one sentence, max 25 words) for what they \
             should focus on next. Be positive and specific.\n\
             Output ONLY the sentence. Do not add conversational filler.\n\n\
             Weakest Topics:\n{}",
            summary_lines.join("\n")
        );

        let text = self.llm.generate(&prompt, None).await?;
        let insight = strip_preamble(&text).to_string();
        self.cache.set_typed(&key, &insight);
        Ok(insight)
    }

    /// Short guiding hint for a struggling answer.
    pub async fn adaptive_hint(
        &self,
        question: &str,
        student_answer: &str,
    ) -> Result<String, LlmError> {
        let key = keys::adaptive_hint_key(question, student_answer);
        if let Some(cached) = self.cache.get_typed::<String>(&key) {
            return Ok(cached);
        }

        let prompt = format!(
            "You are an AI Tutor. A student needs a hint. Provide a short, guiding hint \
             (1-2 sentences) to help them improve.\n\
             Context - Q: \"{question}\", Student's Answer: \"{student_answer}\"."
        );
        let hint = self.llm.generate(&prompt, None).await?.trim().to_string();
        self.cache.set_typed(&key, &hint);
        Ok(hint)
    }
}

async fn question_task(
    llm: Arc<dyn TextGenerator>,
    cache: Arc<dyn ContentCache>,
    config: ExamConfig,
    mastery: Vec<TopicMastery>,
    tx: mpsc::Sender<Question>,
) {
    let key = keys::question_set_key(&config.subject, &config.topics, "mock");
    if let Some(cached) = cache.get_typed::<Vec<Question>>(&key) {
        if !cached.is_empty() {
            debug!(%key, count = cached.len(), "question cache hit");
            for question in cached {
                if tx.send(question).await.is_err() {
                    return;
                }
            }
            return;
        }
    }
    debug!(%key, "question cache miss, generating");

    let mut phase = GenerationPhase::Streaming;
    let mut yielded: Vec<Question> = Vec::new();

    match llm
        .generate_stream(
            &streaming_question_prompt(&config, &mastery),
            Some(&question_array_schema()),
        )
        .await
    {
        Ok(mut chunks) => {
            let mut scanner = ObjectScanner::new();
            while let Some(chunk) = chunks.recv().await {
                for value in scanner.push(&chunk) {
                    match parse_question(&value) {
                        Ok(question) => {
                            if tx.send(question.clone()).await.is_err() {
                                return;
                            }
                            yielded.push(question);
                        }
                        Err(err) => {
                            warn!(error = %err, "discarding invalid streamed question");
                        }
                    }
                }
            }
            debug!(?phase, count = yielded.len(), "question stream ended");
        }
        Err(err) => warn!(?phase, error = %err, "question stream failed"),
    }

    if yielded.is_empty() {
        phase = GenerationPhase::Fallback;
        debug!(?phase, "stream yielded no valid questions, issuing batch request");
        match batch_questions(llm.as_ref(), &config).await {
            Ok(questions) => {
                for question in questions {
                    if tx.send(question.clone()).await.is_err() {
                        return;
                    }
                    yielded.push(question);
                }
            }
            Err(err) => warn!(error = %err, "batch question generation also failed"),
        }
    }

    if !yielded.is_empty() {
        yielded.truncate(keys::QUESTION_CACHE_LIMIT);
        cache.set_typed(&key, &yielded);
    }
    phase = GenerationPhase::Done;
    debug!(?phase, count = yielded.len(), "question generation finished");
}

async fn batch_questions(
    llm: &dyn TextGenerator,
    config: &ExamConfig,
) -> Result<Vec<Question>, LlmError> {
    let text = llm
        .generate(&batch_question_prompt(config), Some(&question_list_schema()))
        .await?;
    let value: Value = serde_json::from_str(text.trim())?;
    let Some(items) = value.get("questions").and_then(|q| q.as_array()) else {
        return Ok(Vec::new());
    };

    Ok(items
        .iter()
        .filter_map(|item| match parse_question(item) {
            Ok(question) => Some(question),
            Err(err) => {
                warn!(error = %err, "discarding invalid fallback question");
                None
            }
        })
        .collect())
}

async fn feedback_task(
    llm: Arc<dyn TextGenerator>,
    config: ExamConfig,
    questions: Vec<Question>,
    answers: Vec<StudentAnswer>,
    tx: mpsc::Sender<FeedbackChunk>,
) {
    let prompt = feedback_prompt(&config, &questions, &answers);
    let mut chunks = match llm.generate_stream(&prompt, None).await {
        Ok(chunks) => chunks,
        Err(err) => {
            warn!(error = %err, "feedback stream failed to start");
            return;
        }
    };

    let mut scanner = ObjectScanner::new();
    while let Some(chunk) = chunks.recv().await {
        for value in scanner.push(&chunk) {
            match classify_feedback_object(&value) {
                Ok(FeedbackObject::Draft(draft)) => {
                    let question = questions.iter().find(|q| q.id == draft.question_id);
                    let answer = answers.iter().find(|a| a.question_id == draft.question_id);
                    let (Some(question), Some(answer)) = (question, answer) else {
                        warn!(question_id = %draft.question_id, "feedback for unknown question discarded");
                        continue;
                    };
                    let item = FeedbackItem::from_draft(draft, question, answer);
                    if tx
                        .send(FeedbackChunk::FeedbackItem(Box::new(item)))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Ok(FeedbackObject::Report(report)) => {
                    if tx
                        .send(FeedbackChunk::Report(Box::new(report)))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Err(err) => warn!(error = %err, "discarding malformed feedback object"),
            }
        }
    }
}

fn streaming_question_prompt(config: &ExamConfig, mastery: &[TopicMastery]) -> String {
    let mastery_context: Vec<String> = config
        .topics
        .iter()
        .map(|topic| {
            let score = mastery
                .iter()
                .find(|m| &m.topic == topic)
                .map(|m| format!("{:.2}", m.mastery_score))
                .unwrap_or_else(|| "N/A".to_string());
            format!("- {topic} (Mastery: {score})")
        })
        .collect();

    format!(
        "You are an expert GCSE exam question generator for a UK student. Your top priority is speed.\n\n\
         Session Specification:\n\
         - Exam Board: {board}, Subject: {subject}, Paper: {paper}\n\
         - Total Questions to Generate: EXACTLY {count}\n\
         - Student's Weaker Topics: {topics}\n\
         - Topic Mastery:\n{mastery}\n\n\
         Your Task:\n\
         1. Immediately generate the first question from one of the weaker topics. Do not delay.\n\
         2. Then generate the remaining questions, adapting difficulty to the mastery scores.\n\
         3. Output each question as a single, complete JSON object.\n\
         4. You MUST stream the questions as a JSON array. Start with '[' and separate objects with ','.\n\
         5. Do not include any text outside of the JSON array.",
        board = config.board,
        subject = config.subject,
        paper = config.paper,
        count = config.question_count,
        topics = config.topics.join(", "),
        mastery = mastery_context.join("\n"),
    )
}

fn batch_question_prompt(config: &ExamConfig) -> String {
    format!(
        "You are an expert GCSE exam question generator for a UK student.\n\
         Generate EXACTLY {count} questions based on this spec:\n\
         - Exam Board: {board}, Subject: {subject}\n\
         - Topics: {topics}\n\
         Your response MUST be a single, valid JSON object with a key \"questions\", \
         which contains an array of question objects.\n\
         Output ONLY the raw JSON object. Do not wrap it in markdown.",
        count = config.question_count,
        board = config.board,
        subject = config.subject,
        topics = config.topics.join(", "),
    )
}

fn feedback_prompt(
    config: &ExamConfig,
    questions: &[Question],
    answers: &[StudentAnswer],
) -> String {
    let answer_lines: Vec<String> = questions
        .iter()
        .map(|q| {
            let answer_text = answers
                .iter()
                .find(|a| a.question_id == q.id)
                .map(|a| a.answer_text.as_str())
                .unwrap_or("");
            format!(
                "Q ID: {}, Topic: {}, Q: \"{}\" ({} marks), Mark Scheme: \"{}\", Student Answer: \"{}\"",
                q.id, q.topic, q.question_text, q.marks, q.mark_scheme, answer_text
            )
        })
        .collect();

    format!(
        "You are an expert GCSE examiner AI. Your task is to mark a student's test and provide feedback.\n\n\
         Exam Context: {board} {subject} {paper}.\n\
         Student's Answers:\n{answers}\n\n\
         Your Instructions:\n\
         1. Mark EACH question individually against its mark scheme.\n\
         2. For EACH question, stream a single JSON object with the feedback conforming to FEEDBACK_ITEM_SCHEMA.\n\
         3. After marking ALL questions, stream ONE final JSON object conforming to FINAL_REPORT_SCHEMA.\n\
         4. Stream the entire response as a sequence of JSON objects. Do not wrap them in an array. \
         Do not add any text between the JSON objects.\n\n\
         FEEDBACK_ITEM_SCHEMA: {item_schema}\n\
         FINAL_REPORT_SCHEMA: {report_schema}",
        board = config.board,
        subject = config.subject,
        paper = config.paper,
        answers = answer_lines.join("\n---\n"),
        item_schema = feedback_item_schema(),
        report_schema = final_report_schema(),
    )
}

fn question_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": {"type": "string", "description": "A unique ID for the question, e.g. \"bio-1-1\"."},
            "questionText": {"type": "string"},
            "marks": {"type": "number"},
            "markScheme": {"type": "string", "description": "The ideal answer or key points for marking."},
            "topic": {"type": "string", "description": "The specific topic this question covers."}
        },
        "required": ["id", "questionText", "marks", "markScheme", "topic"]
    })
}

fn question_array_schema() -> Value {
    json!({"type": "array", "items": question_schema()})
}

fn question_list_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"questions": {"type": "array", "items": question_schema()}},
        "required": ["questions"]
    })
}

fn feedback_item_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "questionId": {"type": "string"},
            "marksAwarded": {"type": "number"},
            "correctness": {"type": "string", "enum": ["correct", "partial", "incorrect"]},
            "feedback": {"type": "string", "description": "1-2 sentences of encouraging, constructive feedback."},
            "explanation": {"type": "string", "description": "How to derive the correct answer, referencing the mark scheme."},
            "explainMarks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "criterion": {"type": "string"},
                        "met": {"type": "boolean"},
                        "markValue": {"type": "number"}
                    },
                    "required": ["criterion", "met", "markValue"]
                }
            }
        },
        "required": ["questionId", "marksAwarded", "correctness", "feedback", "explanation"]
    })
}

fn final_report_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "diagnosticReport": {
                "type": "object",
                "properties": {
                    "strengths": {"type": "array", "items": {"type": "string"}},
                    "weaknesses": {"type": "array", "items": {"type": "string"}},
                    "suggestedResources": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {"title": {"type": "string"}, "url": {"type": "string"}},
                            "required": ["title", "url"]
                        }
                    }
                },
                "required": ["strengths", "weaknesses", "suggestedResources"]
            },
            "predictedGrade": {"type": "string"},
            "motivationalSummary": {"type": "string"}
        },
        "required": ["diagnosticReport", "predictedGrade", "motivationalSummary"]
    })
}

fn micro_lesson_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": {"type": "string"},
            "topic": {"type": "string"},
            "core": {"type": "string"},
            "steps": {"type": "array", "items": {"type": "string"}},
            "slip": {"type": "string"},
            "cue": {"type": "string"},
            "check": {
                "type": "object",
                "properties": {
                    "question": {"type": "string"},
                    "options": {"type": "array", "items": {"type": "string"}},
                    "answer": {"type": "string"},
                    "rationale": {"type": "string"}
                },
                "required": ["question", "options", "answer", "rationale"]
            }
        },
        "required": ["id", "topic", "core", "steps", "slip", "cue", "check"]
    })
}

fn revision_plan_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "days": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "day": {"type": "number"},
                        "topic": {"type": "string"},
                        "tasks": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "type": {"type": "string", "enum": ["review", "practice", "watch", "read"]},
                                    "description": {"type": "string"}
                                },
                                "required": ["type", "description"]
                            }
                        }
                    },
                    "required": ["day", "topic", "tasks"]
                }
            }
        },
        "required": ["days"]
    })
}

fn fallback_plan() -> RevisionPlan {
    RevisionPlan {
        is_fallback: true,
        days: vec![
            RevisionDay {
                day: 1,
                topic: "Fallback Plan: Core Concepts".to_string(),
                tasks: vec![RevisionTask {
                    kind: RevisionTaskKind::Review,
                    description: "Review the main definitions for your weakest topic.".to_string(),
                }],
            },
            RevisionDay {
                day: 2,
                topic: "Fallback Plan: Practice".to_string(),
                tasks: vec![RevisionTask {
                    kind: RevisionTaskKind::Practice,
                    description: "Complete 5 practice questions on this topic.".to_string(),
                }],
            },
            RevisionDay {
                day: 3,
                topic: "Fallback Plan: Consolidate".to_string(),
                tasks: vec![RevisionTask {
                    kind: RevisionTaskKind::Read,
                    description: "Read a study guide summary of the topic.".to_string(),
                }],
            },
        ],
    }
}

/// Strips leading/trailing model chatter around a JSON object, including
/// markdown fences.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end >= start).then(|| &text[start..=end])
}

fn strip_preamble(text: &str) -> &str {
    let trimmed = text.trim();
    for prefix in ["Here is", "Here's", "Sure,", "Okay,", "Let me"] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return rest.trim_start_matches([':', ' ']).trim();
        }
    }
    trimmed
}
