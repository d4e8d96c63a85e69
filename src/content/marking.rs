//! Local heuristic marking and exam summary derivation.
//!
//! The heuristic marker stands in whenever AI feedback generation yields
//! nothing; it scores on answer length and mark-scheme keywords so a
//! finished paper always produces a marked result.

use chrono::Utc;
use rand::Rng;

use crate::progress::ExamSummary;

use super::{
    Correctness, DiagnosticReport, FeedbackItem, MarkedPaper, Question, StudentAnswer,
    SuggestedResource,
};

/// Per-topic ratio below which a topic counts as weak.
const WEAK_TOPIC_RATIO: f64 = 0.6;
/// Word count a fully detailed answer is assumed to carry.
const TARGET_ANSWER_WORDS: f64 = 30.0;

const CORRECT_PHRASES: &[&str] = &[
    "Excellent work! Your answer is comprehensive and hits all the key points from the mark scheme.",
    "Perfect! You've clearly mastered this topic. Your explanation is clear and accurate.",
    "Spot on! A well-structured answer that demonstrates a strong understanding of the material.",
];

const PARTIAL_PHRASES: &[&str] = &[
    "This is a good start, but you could add more detail about a key concept to secure full marks.",
    "You're on the right track! To improve, try to elaborate on the core idea.",
    "A solid attempt. You've grasped the main idea, but remember to include specific terminology from the mark scheme next time.",
    "You've covered some of the important points, but your explanation is missing a crucial element.",
];

const INCORRECT_PHRASES: &[&str] = &[
    "It seems there's some confusion here. The question is asking about a specific topic, but your answer focuses on something else.",
    "Not quite. It's important to review the definitions related to this topic. Let's break it down.",
    "This answer doesn't align with the mark scheme. Let's look at the key concepts for this topic again.",
];

fn correctness_for(marks_awarded: f64, max_marks: f64) -> Correctness {
    let percentage = if max_marks > 0.0 {
        marks_awarded / max_marks * 100.0
    } else {
        0.0
    };
    if percentage >= 99.0 {
        Correctness::Correct
    } else if percentage == 0.0 {
        Correctness::Incorrect
    } else {
        Correctness::Partial
    }
}

fn phrase_for(correctness: Correctness) -> &'static str {
    let phrases = match correctness {
        Correctness::Correct => CORRECT_PHRASES,
        Correctness::Partial => PARTIAL_PHRASES,
        Correctness::Incorrect => INCORRECT_PHRASES,
    };
    let mut rng = rand::rng();
    phrases[rng.random_range(0..phrases.len())]
}

/// GCSE grade band for an overall percentage.
pub fn predicted_grade_for_percent(percentage: f64) -> String {
    let grade = if percentage > 85.0 {
        "9"
    } else if percentage > 75.0 {
        "8"
    } else if percentage > 65.0 {
        "7"
    } else if percentage > 55.0 {
        "6"
    } else if percentage > 45.0 {
        "5"
    } else if percentage > 35.0 {
        "4"
    } else if percentage > 25.0 {
        "3"
    } else if percentage > 15.0 {
        "2"
    } else if percentage > 5.0 {
        "1"
    } else {
        "U"
    };
    grade.to_string()
}

fn score_answer(question: &Question, answer_text: &str) -> f64 {
    let words = answer_text.split_whitespace().count();
    if words <= 2 {
        return 0.0;
    }

    let length_ratio = (words as f64 / TARGET_ANSWER_WORDS).min(1.0);
    let mut marks = (length_ratio.powf(0.7) * question.marks).round();

    // Keyword bonus: the opening words of the mark scheme stand in for
    // the key terms the answer should mention.
    let lowered = answer_text.to_lowercase();
    let keywords: Vec<String> = question
        .mark_scheme
        .to_lowercase()
        .split_whitespace()
        .take(3)
        .map(|w| w.to_string())
        .collect();
    if keywords.iter().any(|kw| lowered.contains(kw)) && marks < question.marks {
        marks += 1.0;
    }

    marks.min(question.marks)
}

/// Marks a paper without the AI collaborator.
pub fn mark_heuristically(questions: &[Question], answers: &[StudentAnswer]) -> MarkedPaper {
    let mut total_marks = 0.0;

    let feedback: Vec<FeedbackItem> = questions
        .iter()
        .map(|question| {
            let answer_text = answers
                .iter()
                .find(|a| a.question_id == question.id)
                .map(|a| a.answer_text.trim().to_string())
                .unwrap_or_default();

            let marks_awarded = score_answer(question, &answer_text);
            total_marks += marks_awarded;

            let correctness = correctness_for(marks_awarded, question.marks);
            let explanation = format!(
                "To achieve full marks ({}), your answer should have included the following points based on the mark scheme: \"{}\". Your answer was awarded {} marks.",
                question.marks, question.mark_scheme, marks_awarded
            );

            FeedbackItem {
                question_id: question.id.clone(),
                question_text: question.question_text.clone(),
                student_answer: answer_text,
                marks_awarded,
                max_marks: question.marks,
                correctness,
                feedback: phrase_for(correctness).to_string(),
                explanation,
                correct_answer: question.mark_scheme.clone(),
                topic: question.topic.clone(),
                explain_marks: Vec::new(),
                image_url: question.image_url.clone(),
                reference_text: question.reference_text.clone(),
            }
        })
        .collect();

    let total_possible: f64 = questions.iter().map(|q| q.marks).sum();
    let percentage = if total_possible > 0.0 {
        total_marks / total_possible * 100.0
    } else {
        0.0
    };

    MarkedPaper {
        feedback,
        diagnostic_report: DiagnosticReport {
            strengths: vec![
                "Good time management on the paper.".to_string(),
                "Attempted all available questions, leaving nothing blank.".to_string(),
            ],
            weaknesses: vec![
                "Lacking specific detail in longer-answer questions.".to_string(),
                "Improve use of scientific terminology to match the mark scheme.".to_string(),
            ],
            suggested_resources: vec![
                SuggestedResource {
                    title: "GCSE Bitesize - Key Terminology Guide".to_string(),
                    url: "https://www.bbc.co.uk/bitesize/topics/z4843j6".to_string(),
                },
                SuggestedResource {
                    title: "Seneca Learning - Exam Technique".to_string(),
                    url: "https://senecalearning.com/".to_string(),
                },
            ],
        },
        total_marks,
        predicted_grade: predicted_grade_for_percent(percentage),
        motivational_summary: None,
    }
}

/// Per-topic mark ratios below the threshold become weak topics.
pub fn weak_topics_from_feedback(feedback: &[FeedbackItem]) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut totals: std::collections::HashMap<&str, (f64, f64)> = std::collections::HashMap::new();

    for item in feedback {
        if !totals.contains_key(item.topic.as_str()) {
            order.push(item.topic.clone());
        }
        let entry = totals.entry(item.topic.as_str()).or_insert((0.0, 0.0));
        entry.0 += item.marks_awarded;
        entry.1 += item.max_marks;
    }

    order
        .into_iter()
        .filter(|topic| {
            totals
                .get(topic.as_str())
                .is_some_and(|(awarded, available)| {
                    *available > 0.0 && awarded / available < WEAK_TOPIC_RATIO
                })
        })
        .collect()
}

/// Distills a marked paper into the headline numbers the Progress Store
/// keeps: score percent (1dp), predicted grade, weak topics.
pub fn summarize(marked: &MarkedPaper, subject: Option<&str>) -> ExamSummary {
    let total_available: f64 = marked.feedback.iter().map(|f| f.max_marks).sum();
    let score_percent = if total_available > 0.0 {
        (marked.total_marks / total_available * 1000.0).round() / 10.0
    } else {
        0.0
    };

    ExamSummary {
        score_percent,
        predicted_grade: marked.predicted_grade.clone(),
        weak_topics: weak_topics_from_feedback(&marked.feedback),
        subject: subject.map(|s| s.to_string()),
        timestamp: Utc::now().to_rfc3339(),
    }
}
