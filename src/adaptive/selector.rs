//! Picks the single next recommended activity for a student.
//!
//! The rules run in a fixed order and the first match wins: trial-ending
//! review, confidence-drop coaching, then the default lowest-mastery
//! selection with an interleaving guard against subject fatigue.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::progress::student::StudentState;

/// Confidence delta below which the last activity earns a coach session.
const CONFIDENCE_DROP_THRESHOLD: f64 = -15.0;
/// Interleaving only kicks in once the repeated subject is past this
/// mastery; a still-weak subject is allowed to repeat.
const INTERLEAVE_MASTERY_FLOOR: f64 = 30.0;

const EASY_CEILING: f64 = 40.0;
const MEDIUM_CEILING: f64 = 70.0;
const QUIZ_CEILING: f64 = 50.0;
const FLASHCARDS_CEILING: f64 = 75.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionType {
    Quiz,
    Flashcards,
    Mock,
    CoachChat,
    Review,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quiz => "quiz",
            Self::Flashcards => "flashcards",
            Self::Mock => "mock",
            Self::CoachChat => "coachChat",
            Self::Review => "review",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "easy" => Self::Easy,
            "hard" => Self::Hard,
            _ => Self::Medium,
        }
    }

    pub fn for_mastery(mastery: f64) -> Self {
        if mastery < EASY_CEILING {
            Self::Easy
        } else if mastery < MEDIUM_CEILING {
            Self::Medium
        } else {
            Self::Hard
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub subject: String,
    pub topic: String,
    pub difficulty: Difficulty,
    pub message: String,
}

fn action_type_for_mastery(mastery: f64) -> ActionType {
    if mastery < QUIZ_CEILING {
        ActionType::Quiz
    } else if mastery < FLASHCARDS_CEILING {
        ActionType::Flashcards
    } else {
        ActionType::Mock
    }
}

fn pick<'a>(choices: &[&'a str]) -> &'a str {
    let mut rng = rand::rng();
    choices[rng.random_range(0..choices.len())]
}

fn message_for(action_type: ActionType, subject: &str, topic: &str, difficulty: Difficulty) -> String {
    let template = match action_type {
        ActionType::Quiz => pick(&[
            "You're making great progress in {subject}! Let's tackle a quick {difficulty} quiz on {topic}.",
            "Time for a quick challenge. How about a few questions on {topic}?",
            "Let's build on your momentum. A short quiz on {topic} is next.",
        ]),
        ActionType::Flashcards => pick(&[
            "Quick win: let's do 10 {subject} cards on {topic}. Should only take a few minutes!",
            "Time for a speedy review. Let's run through some flashcards for {topic}.",
            "Let's lock in that knowledge. A flashcard session for {topic} is up next.",
        ]),
        ActionType::Mock => pick(&[
            "You're ready for a bigger challenge. Let's try some exam-style questions on {topic}.",
            "Time to test your knowledge under pressure. A mini-mock on {topic} awaits.",
        ]),
        ActionType::CoachChat => pick(&[
            "It looks like {topic} was a bit tricky. Let's review that topic together.",
            "No worries, let's break down {topic} with the AI Coach.",
        ]),
        ActionType::Review => pick(&[
            "Let's take a look at your progress. You've been working hard!",
            "Time for a progress check-in. Let's see how far you've come.",
        ]),
    };
    template
        .replace("{subject}", subject)
        .replace("{topic}", topic)
        .replace("{difficulty}", difficulty.as_str())
}

pub fn next_action(state: &StudentState) -> NextAction {
    // Trial-ending motivational override.
    if state.trial_days_left == 1 {
        let topics: Vec<&String> = state.mastery.keys().collect();
        let mastery_now: f64 = topics.iter().map(|t| state.topic_mastery(t)).sum();
        let mastery_before: f64 = topics
            .iter()
            .map(|t| {
                state.topic_mastery(t) - state.mastery_delta.get(*t).copied().unwrap_or(0.0)
            })
            .sum();
        let avg_gain = (mastery_now - mastery_before) / topics.len().max(1) as f64;

        return NextAction {
            action_type: ActionType::Review,
            subject: "Progress".to_string(),
            topic: "Summary".to_string(),
            difficulty: Difficulty::Medium,
            message: format!(
                "You've boosted mastery by {:.0}% and hit a {}-day streak! Let's review your progress.",
                avg_gain, state.streak
            ),
        };
    }

    // Confidence-drop override: a rough last session earns a coach chat
    // on exactly that subject and topic.
    if let Some(last) = &state.last_activity {
        let confidence_change = state.confidence_delta.get(&last.topic).copied();
        if confidence_change.is_some_and(|change| change < CONFIDENCE_DROP_THRESHOLD) {
            return NextAction {
                action_type: ActionType::CoachChat,
                subject: last.subject.clone(),
                topic: last.topic.clone(),
                difficulty: Difficulty::Easy,
                message: message_for(
                    ActionType::CoachChat,
                    &last.subject,
                    &last.topic,
                    Difficulty::Easy,
                ),
            };
        }
    }

    // Default: rank subjects with known topics by mean mastery, lowest
    // first.
    let mut ranked: Vec<(String, f64)> = state
        .subjects
        .iter()
        .filter_map(|subject| {
            state
                .subject_average_mastery(subject)
                .map(|avg| (subject.clone(), avg))
        })
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

    if ranked.is_empty() {
        return NextAction {
            action_type: ActionType::Quiz,
            subject: "General".to_string(),
            topic: "Mixed".to_string(),
            difficulty: Difficulty::Easy,
            message: "Let's start with some general questions to find your strengths!".to_string(),
        };
    }

    let mut chosen = &ranked[0];
    if let Some(last) = &state.last_activity {
        if chosen.0 == last.subject && chosen.1 >= INTERLEAVE_MASTERY_FLOOR && ranked.len() > 1 {
            chosen = &ranked[1];
        }
    }

    let topics = state
        .topics_by_subject
        .get(&chosen.0)
        .expect("ranked subjects always have topics");
    let chosen_topic = topics
        .iter()
        .min_by(|a, b| state.topic_mastery(a).total_cmp(&state.topic_mastery(b)))
        .expect("ranked subjects always have topics");
    let topic_mastery = state.topic_mastery(chosen_topic);

    let difficulty = Difficulty::for_mastery(topic_mastery);
    let action_type = action_type_for_mastery(topic_mastery);

    NextAction {
        action_type,
        subject: chosen.0.clone(),
        topic: chosen_topic.clone(),
        difficulty,
        message: message_for(action_type, &chosen.0, chosen_topic, difficulty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::student::ActivityRef;
    use crate::progress::{seed_progress, SubjectSeed};

    fn state_with(trial_days_left: i64, last_activity: Option<ActivityRef>) -> StudentState {
        let progress = seed_progress(
            &[
                SubjectSeed {
                    id: "biology".into(),
                    name: "Biology".into(),
                },
                SubjectSeed {
                    id: "maths".into(),
                    name: "Maths".into(),
                },
            ],
            8.0,
        );
        StudentState::from_progress(&progress, last_activity, trial_days_left)
    }

    #[test]
    fn trial_ending_returns_review() {
        let action = next_action(&state_with(1, None));
        assert_eq!(action.action_type, ActionType::Review);
        assert_eq!(action.subject, "Progress");
        assert!(!action.message.is_empty());
    }

    #[test]
    fn confidence_drop_routes_to_coach() {
        let mut state = state_with(3, Some(ActivityRef {
            subject: "Biology".into(),
            topic: "Biology Topic A".into(),
        }));
        state
            .confidence_delta
            .insert("Biology Topic A".to_string(), -20.0);
        let action = next_action(&state);
        assert_eq!(action.action_type, ActionType::CoachChat);
        assert_eq!(action.subject, "Biology");
        assert_eq!(action.topic, "Biology Topic A");
        assert!(action.message.contains("Biology Topic A"));
    }

    #[test]
    fn default_picks_lowest_mastery_subject_and_topic() {
        let action = next_action(&state_with(3, None));
        // Biology averages 40, Maths 45; Biology Topic A is weakest at 30.
        assert_eq!(action.subject, "Biology");
        assert_eq!(action.topic, "Biology Topic A");
        assert_eq!(action.difficulty, Difficulty::Easy);
        assert_eq!(action.action_type, ActionType::Quiz);
    }

    #[test]
    fn interleaving_skips_repeated_subject() {
        let state = state_with(
            3,
            Some(ActivityRef {
                subject: "Biology".into(),
                topic: "Biology Topic A".into(),
            }),
        );
        // Biology is lowest but repeated with mastery >= 30, so Maths wins.
        let action = next_action(&state);
        assert_eq!(action.subject, "Maths");
    }

    #[test]
    fn weak_subject_is_allowed_to_repeat() {
        let mut state = state_with(
            3,
            Some(ActivityRef {
                subject: "Biology".into(),
                topic: "Biology Topic A".into(),
            }),
        );
        for topic in state.topics_by_subject["Biology"].clone() {
            state.mastery.insert(topic, 10.0);
        }
        let action = next_action(&state);
        assert_eq!(action.subject, "Biology");
    }

    #[test]
    fn no_known_topics_falls_back_to_general_quiz() {
        let mut state = state_with(3, None);
        state.topics_by_subject.clear();
        let action = next_action(&state);
        assert_eq!(action.action_type, ActionType::Quiz);
        assert_eq!(action.subject, "General");
        assert_eq!(action.topic, "Mixed");
    }

    #[test]
    fn difficulty_and_type_bands() {
        assert_eq!(Difficulty::for_mastery(39.0), Difficulty::Easy);
        assert_eq!(Difficulty::for_mastery(40.0), Difficulty::Medium);
        assert_eq!(Difficulty::for_mastery(70.0), Difficulty::Hard);
        assert_eq!(action_type_for_mastery(49.0), ActionType::Quiz);
        assert_eq!(action_type_for_mastery(50.0), ActionType::Flashcards);
        assert_eq!(action_type_for_mastery(75.0), ActionType::Mock);
    }
}
