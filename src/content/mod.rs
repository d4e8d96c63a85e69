//! Session and AI-content domain types.

pub mod generator;
pub mod marking;
pub mod reconciler;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Blitz,
    Flashcards,
    Mock,
    Coach,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blitz => "blitz",
            Self::Flashcards => "flashcards",
            Self::Mock => "mock",
            Self::Coach => "coach",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamConfig {
    pub board: String,
    pub subject: String,
    pub paper: String,
    pub topics: Vec<String>,
    pub question_count: u32,
    #[serde(rename = "type")]
    pub kind: SessionKind,
    pub syllabus_version: String,
    /// Set for targeted retests so the finish path can shrink the
    /// weak-topic set instead of growing it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub question_text: String,
    pub marks: f64,
    /// The ideal answer or key points for marking.
    pub mark_scheme: String,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAnswer {
    pub question_id: String,
    pub answer_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Correctness {
    Correct,
    Partial,
    Incorrect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkExplanation {
    pub criterion: String,
    pub met: bool,
    pub mark_value: f64,
}

/// The marker's verdict on one answer as streamed back, before it is
/// joined with the question and answer it refers to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackDraft {
    pub question_id: String,
    pub marks_awarded: f64,
    pub correctness: Correctness,
    pub feedback: String,
    pub explanation: String,
    #[serde(default)]
    pub explain_marks: Vec<MarkExplanation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackItem {
    pub question_id: String,
    pub question_text: String,
    pub student_answer: String,
    pub marks_awarded: f64,
    pub max_marks: f64,
    pub correctness: Correctness,
    pub feedback: String,
    pub explanation: String,
    pub correct_answer: String,
    pub topic: String,
    #[serde(default)]
    pub explain_marks: Vec<MarkExplanation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_text: Option<String>,
}

impl FeedbackItem {
    pub fn from_draft(draft: FeedbackDraft, question: &Question, answer: &StudentAnswer) -> Self {
        Self {
            question_id: draft.question_id,
            question_text: question.question_text.clone(),
            student_answer: answer.answer_text.clone(),
            marks_awarded: draft.marks_awarded,
            max_marks: question.marks,
            correctness: draft.correctness,
            feedback: draft.feedback,
            explanation: draft.explanation,
            correct_answer: question.mark_scheme.clone(),
            topic: question.topic.clone(),
            explain_marks: draft.explain_marks,
            image_url: question.image_url.clone(),
            reference_text: question.reference_text.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedResource {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub suggested_resources: Vec<SuggestedResource>,
}

/// The one trailing report object on the feedback stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalReport {
    pub diagnostic_report: DiagnosticReport,
    pub predicted_grade: String,
    pub motivational_summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "data")]
pub enum FeedbackChunk {
    FeedbackItem(Box<FeedbackItem>),
    Report(Box<FinalReport>),
}

/// Everything the marker produced for a finished paper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkedPaper {
    pub feedback: Vec<FeedbackItem>,
    pub diagnostic_report: DiagnosticReport,
    pub total_marks: f64,
    pub predicted_grade: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motivational_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSession {
    pub config: ExamConfig,
    pub questions: Vec<Question>,
    pub answers: Vec<StudentAnswer>,
    pub feedback: Vec<FeedbackItem>,
    pub diagnostic_report: DiagnosticReport,
    pub total_marks: f64,
    pub predicted_grade: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonCheck {
    pub question: String,
    pub options: Vec<String>,
    /// The correct option letter, e.g. "A".
    pub answer: String,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicroLesson {
    pub id: String,
    pub topic: String,
    pub core: String,
    pub steps: Vec<String>,
    /// The common slip-up this lesson guards against.
    pub slip: String,
    pub cue: String,
    pub check: LessonCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionTaskKind {
    Review,
    Practice,
    Watch,
    Read,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionTask {
    #[serde(rename = "type")]
    pub kind: RevisionTaskKind,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionDay {
    pub day: u32,
    pub topic: String,
    pub tasks: Vec<RevisionTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionPlan {
    pub days: Vec<RevisionDay>,
    #[serde(default)]
    pub is_fallback: bool,
}

/// Aggregate outcome of a flashcard or coach session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub correct: u32,
    pub total: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_delta: Option<f64>,
}

impl SessionResult {
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f64 / self.total as f64
    }
}
