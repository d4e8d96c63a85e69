//! Incremental JSON object extraction from an AI text stream.
//!
//! Chunks arrive at arbitrary boundaries: mid-string, mid-brace, mid
//! escape sequence. The scanner tracks brace depth and string state
//! across chunks and surfaces each top-level object the moment it closes,
//! so callers can start using questions before the stream ends.
//! Unparseable or shape-invalid candidates are logged and discarded;
//! they never abort the stream.

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use super::{FeedbackDraft, FinalReport, Question};

#[derive(Debug, Error)]
pub enum ShapeError {
    #[error("payload does not match expected shape: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("field `{0}` is empty")]
    EmptyField(&'static str),
    #[error("marks must be positive")]
    NonPositiveMarks,
}

#[derive(Debug, Default)]
pub struct ObjectScanner {
    buffer: String,
    depth: usize,
    in_string: bool,
    escaped: bool,
    /// Byte offset where the current top-level object began.
    start: Option<usize>,
    /// Byte offset of the next unscanned character.
    scanned: usize,
}

impl ObjectScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every top-level JSON object completed
    /// by it, in input order. Candidates that fail to parse are dropped.
    pub fn push(&mut self, chunk: &str) -> Vec<Value> {
        self.buffer.push_str(chunk);
        let mut completed = Vec::new();

        // Structural characters are ASCII, so byte-wise scanning is safe:
        // UTF-8 continuation bytes can never alias `"`, `{` or `}`.
        let bytes = self.buffer.as_bytes();
        let mut i = self.scanned;
        while i < bytes.len() {
            let c = bytes[i];
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if c == b'\\' {
                    self.escaped = true;
                } else if c == b'"' {
                    self.in_string = false;
                }
            } else {
                match c {
                    b'"' => self.in_string = true,
                    b'{' => {
                        if self.depth == 0 {
                            self.start = Some(i);
                        }
                        self.depth += 1;
                    }
                    b'}' => {
                        if self.depth > 0 {
                            self.depth -= 1;
                            if self.depth == 0 {
                                let start = self.start.take().expect("depth went 0->1 earlier");
                                let candidate = &self.buffer[start..=i];
                                match serde_json::from_str::<Value>(candidate) {
                                    Ok(value) => completed.push(value),
                                    Err(err) => {
                                        warn!(error = %err, "discarding malformed streamed object");
                                    }
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            i += 1;
        }
        self.scanned = self.buffer.len();

        // Compact: everything before the in-flight object (or the whole
        // buffer, if nothing is open) has been fully consumed.
        match self.start {
            Some(start) if start > 0 => {
                self.buffer.drain(..start);
                self.scanned -= start;
                self.start = Some(0);
            }
            None => {
                self.buffer.clear();
                self.scanned = 0;
            }
            _ => {}
        }

        completed
    }

    /// Bytes currently held for the in-flight object and unscanned tail.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Validates a streamed object against the question shape: non-empty
/// id/text/mark scheme/topic and strictly positive marks.
pub fn parse_question(value: &Value) -> Result<Question, ShapeError> {
    let question: Question = serde_json::from_value(value.clone())?;
    if question.id.is_empty() {
        return Err(ShapeError::EmptyField("id"));
    }
    if question.question_text.is_empty() {
        return Err(ShapeError::EmptyField("questionText"));
    }
    if question.mark_scheme.is_empty() {
        return Err(ShapeError::EmptyField("markScheme"));
    }
    if question.topic.is_empty() {
        return Err(ShapeError::EmptyField("topic"));
    }
    if !(question.marks > 0.0) {
        return Err(ShapeError::NonPositiveMarks);
    }
    Ok(question)
}

/// A classified object from the feedback stream.
#[derive(Debug, Clone)]
pub enum FeedbackObject {
    Draft(FeedbackDraft),
    Report(FinalReport),
}

/// Routes a streamed object by its discriminating key: per-question
/// verdicts carry `questionId`, the trailing report carries
/// `diagnosticReport`. Anything else is rejected.
pub fn classify_feedback_object(value: &Value) -> Result<FeedbackObject, ShapeError> {
    if value.get("questionId").is_some() {
        let draft: FeedbackDraft = serde_json::from_value(value.clone())?;
        if draft.question_id.is_empty() {
            return Err(ShapeError::EmptyField("questionId"));
        }
        return Ok(FeedbackObject::Draft(draft));
    }
    if value.get("diagnosticReport").is_some() {
        let report: FinalReport = serde_json::from_value(value.clone())?;
        return Ok(FeedbackObject::Report(report));
    }
    Err(ShapeError::EmptyField("questionId"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn questions_json(count: usize) -> String {
        let items: Vec<String> = (0..count)
            .map(|i| {
                format!(
                    r#"{{"id":"q{i}","questionText":"Describe osmosis {i}","marks":4,"markScheme":"movement of water","topic":"Cell Biology"}}"#
                )
            })
            .collect();
        format!("[\n{}\n]", items.join("\n,\n"))
    }

    #[test]
    fn whole_payload_in_one_chunk() {
        let mut scanner = ObjectScanner::new();
        let objects = scanner.push(&questions_json(5));
        assert_eq!(objects.len(), 5);
        assert_eq!(scanner.buffered_len(), 0);
    }

    #[test]
    fn split_at_every_byte_offset_yields_identical_objects() {
        let payload = questions_json(5);
        for split in 1..payload.len() {
            if !payload.is_char_boundary(split) {
                continue;
            }
            let mut scanner = ObjectScanner::new();
            let mut objects = scanner.push(&payload[..split]);
            objects.extend(scanner.push(&payload[split..]));
            assert_eq!(objects.len(), 5, "failed at split {split}");
            for (i, value) in objects.iter().enumerate() {
                assert_eq!(value["id"], format!("q{i}"), "order lost at split {split}");
                assert!(parse_question(value).is_ok());
            }
        }
    }

    #[test]
    fn braces_inside_strings_are_not_structural() {
        let mut scanner = ObjectScanner::new();
        let payload = r#"{"id":"q1","questionText":"What does { mean in set notation} here?","marks":2,"markScheme":"a set \"literal\" {x}","topic":"Algebra"}"#;
        let objects = scanner.push(payload);
        assert_eq!(objects.len(), 1);
        assert!(parse_question(&objects[0]).is_ok());
    }

    #[test]
    fn escaped_quote_split_across_chunks() {
        let payload = r#"{"id":"q1","questionText":"say \"hi\" twice","marks":1,"markScheme":"hi hi","topic":"Speaking"}"#;
        let split = payload.find(r#"\""#).unwrap() + 1; // between backslash and quote
        let mut scanner = ObjectScanner::new();
        let mut objects = scanner.push(&payload[..split]);
        objects.extend(scanner.push(&payload[split..]));
        assert_eq!(objects.len(), 1);
    }

    #[test]
    fn malformed_candidate_is_discarded_not_fatal() {
        let mut scanner = ObjectScanner::new();
        let mut objects = scanner.push(r#"{"id":"broken",}"#);
        objects.extend(scanner.push(
            r#"{"id":"q1","questionText":"ok","marks":1,"markScheme":"ok","topic":"T"}"#,
        ));
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0]["id"], "q1");
    }

    #[test]
    fn buffer_is_compacted_between_objects() {
        let mut scanner = ObjectScanner::new();
        scanner.push(r#"{"id":"q1","questionText":"a","marks":1,"markScheme":"a","topic":"T"},"#);
        assert_eq!(scanner.buffered_len(), 0);
        scanner.push(r#"{"id":"q2","#);
        let held = scanner.buffered_len();
        assert!(held > 0);
        let objects =
            scanner.push(r#""questionText":"b","marks":1,"markScheme":"b","topic":"T"}"#);
        assert_eq!(objects.len(), 1);
        assert_eq!(scanner.buffered_len(), 0);
    }

    #[test]
    fn question_shape_is_enforced() {
        let missing_topic = serde_json::json!({
            "id": "q1", "questionText": "x", "marks": 3, "markScheme": "y", "topic": ""
        });
        assert!(matches!(
            parse_question(&missing_topic),
            Err(ShapeError::EmptyField("topic"))
        ));

        let zero_marks = serde_json::json!({
            "id": "q1", "questionText": "x", "marks": 0, "markScheme": "y", "topic": "T"
        });
        assert!(matches!(
            parse_question(&zero_marks),
            Err(ShapeError::NonPositiveMarks)
        ));
    }

    #[test]
    fn feedback_objects_route_by_discriminating_key() {
        let draft = serde_json::json!({
            "questionId": "q1", "marksAwarded": 2, "correctness": "partial",
            "feedback": "close", "explanation": "needs detail"
        });
        assert!(matches!(
            classify_feedback_object(&draft),
            Ok(FeedbackObject::Draft(_))
        ));

        let report = serde_json::json!({
            "diagnosticReport": {
                "strengths": ["effort"], "weaknesses": ["detail"], "suggestedResources": []
            },
            "predictedGrade": "7",
            "motivationalSummary": "keep going"
        });
        assert!(matches!(
            classify_feedback_object(&report),
            Ok(FeedbackObject::Report(_))
        ));

        let junk = serde_json::json!({"hello": "world"});
        assert!(classify_feedback_object(&junk).is_err());
    }
}
