//! Read-only analytics over the progress event log: subject momentum,
//! recent history, and the heuristic study insights shown on the
//! dashboard. An AI-backed insight generator can replace `get_insights`
//! at the host level; these rules are the built-in fallback.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::progress::{AppProgress, ProgressEvent};

const MOMENTUM_WINDOW_DAYS: i64 = 7;
/// Momentum below this floor is treated as noise, not praised.
const MOMENTUM_FLOOR: f64 = 0.05;
const LOW_CONFIDENCE_THRESHOLD: f64 = 0.65;
const MAX_INSIGHTS: usize = 3;
const MAX_INSIGHT_LENGTH: usize = 120;

fn event_time(event: &ProgressEvent) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&event.ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Mean mastery delta for a subject over the trailing 7 days; 0 when the
/// window is empty.
pub fn compute_subject_momentum(
    subject: &str,
    events: &[ProgressEvent],
    now: DateTime<Utc>,
) -> f64 {
    let window_start = now - Duration::days(MOMENTUM_WINDOW_DAYS);
    let deltas: Vec<f64> = events
        .iter()
        .filter(|event| event.subject == subject)
        .filter(|event| event_time(event).is_some_and(|ts| ts >= window_start))
        .map(|event| event.delta)
        .collect();

    if deltas.is_empty() {
        return 0.0;
    }
    deltas.iter().sum::<f64>() / deltas.len() as f64
}

/// Most-recent-first events for a subject, truncated to `count`.
pub fn subject_history<'a>(
    subject: &str,
    count: usize,
    events: &'a [ProgressEvent],
) -> Vec<&'a ProgressEvent> {
    let mut matching: Vec<&ProgressEvent> = events
        .iter()
        .filter(|event| event.subject == subject)
        .collect();
    matching.sort_by(|a, b| b.ts.cmp(&a.ts));
    matching.truncate(count);
    matching
}

struct TopicRef {
    name: String,
    subject: String,
    current: f64,
}

fn weakest_topic(progress: &AppProgress, max_confidence: Option<f64>) -> Option<TopicRef> {
    let mut weakest: Option<TopicRef> = None;
    for subject in &progress.subjects {
        for topic in &subject.topics {
            if let Some(ceiling) = max_confidence {
                if topic.confidence >= ceiling {
                    continue;
                }
            }
            if weakest
                .as_ref()
                .is_none_or(|best| topic.current < best.current)
            {
                weakest = Some(TopicRef {
                    name: topic.name.clone(),
                    subject: subject.name.clone(),
                    current: topic.current,
                });
            }
        }
    }
    weakest
}

fn truncate_insight(text: String) -> String {
    if text.chars().count() <= MAX_INSIGHT_LENGTH {
        return text;
    }
    let cut: String = text.chars().take(MAX_INSIGHT_LENGTH - 3).collect();
    match cut.rfind(' ') {
        Some(pos) if pos > 0 => format!("{}...", &cut[..pos]),
        _ => format!("{cut}..."),
    }
}

/// Generates up to three short study nudges from simple heuristics.
///
/// When nothing happened in the last week the student gets a single
/// "quick win" nudge and the remaining rules are skipped.
pub fn get_insights(progress: &AppProgress, now: DateTime<Utc>) -> Vec<String> {
    let mut insights = Vec::new();

    let window_start = now - Duration::days(MOMENTUM_WINDOW_DAYS);
    let has_recent_events = progress
        .events
        .iter()
        .any(|event| event_time(event).is_some_and(|ts| ts >= window_start));

    if !has_recent_events && !progress.subjects.is_empty() {
        let target = weakest_topic(progress, None)
            .map(|t| format!("'{}'", t.name))
            .unwrap_or_else(|| "your lowest topic".to_string());
        return vec![truncate_insight(format!(
            "Quick win: do a 5-min mock in {target} to get back on track."
        ))];
    }

    let mut fastest: Option<(String, f64)> = None;
    for subject in &progress.subjects {
        let momentum = compute_subject_momentum(&subject.name, &progress.events, now);
        let floor = fastest.as_ref().map(|(_, m)| *m).unwrap_or(MOMENTUM_FLOOR);
        if momentum > floor {
            fastest = Some((subject.name.clone(), momentum));
        }
    }
    if let Some((name, _)) = &fastest {
        insights.push(truncate_insight(format!(
            "Your hard work in {name} is paying off. Keep up the momentum!"
        )));
    }

    let absolute_weakest = weakest_topic(progress, None);
    let target_topic =
        weakest_topic(progress, Some(LOW_CONFIDENCE_THRESHOLD)).or_else(|| {
            absolute_weakest.as_ref().map(|t| TopicRef {
                name: t.name.clone(),
                subject: t.subject.clone(),
                current: t.current,
            })
        });
    if let Some(topic) = &target_topic {
        insights.push(truncate_insight(format!(
            "Focus on '{}' in {}. A quick blitz could help!",
            topic.name, topic.subject
        )));
    }

    if progress.streak > 0 {
        let subject_for_nudge = absolute_weakest
            .as_ref()
            .map(|t| t.subject.clone())
            .or_else(|| progress.subjects.first().map(|s| s.name.clone()))
            .unwrap_or_else(|| "a subject".to_string());
        insights.push(truncate_insight(format!(
            "Protect your {}-day streak with a 5-min {} quiz.",
            progress.streak, subject_for_nudge
        )));
    }

    if insights.len() < 2 && !progress.subjects.is_empty() {
        let mut rng = rand::rng();
        let pick = rng.random_range(0..progress.subjects.len());
        insights.push(truncate_insight(format!(
            "Consider starting a flashcard session for {} to reinforce key concepts.",
            progress.subjects[pick].name
        )));
    }

    insights.truncate(MAX_INSIGHTS);
    insights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{seed_progress, EventKind, SubjectSeed};

    fn fixture() -> AppProgress {
        seed_progress(
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
        )
    }

    fn event_at(subject: &str, delta: f64, ts: DateTime<Utc>) -> ProgressEvent {
        let mut event = ProgressEvent::new(subject, "various", EventKind::MockSubmitted, delta, 0.0, None);
        event.ts = ts.to_rfc3339();
        event
    }

    #[test]
    fn momentum_averages_recent_deltas_only() {
        let now = Utc::now();
        let events = vec![
            event_at("Biology", 6.0, now - Duration::days(1)),
            event_at("Biology", 2.0, now - Duration::days(3)),
            event_at("Biology", 100.0, now - Duration::days(10)),
            event_at("Maths", 50.0, now - Duration::days(1)),
        ];
        let momentum = compute_subject_momentum("Biology", &events, now);
        assert!((momentum - 4.0).abs() < 1e-9);
    }

    #[test]
    fn momentum_is_zero_without_events() {
        assert_eq!(compute_subject_momentum("Biology", &[], Utc::now()), 0.0);
    }

    #[test]
    fn history_is_most_recent_first_and_bounded() {
        let now = Utc::now();
        let events: Vec<ProgressEvent> = (0..5)
            .map(|i| event_at("Biology", i as f64, now - Duration::days(i)))
            .collect();
        let history = subject_history("Biology", 3, &events);
        assert_eq!(history.len(), 3);
        assert!(history[0].ts > history[1].ts);
        assert!(history[1].ts > history[2].ts);
    }

    #[test]
    fn stale_log_produces_single_quick_win() {
        let now = Utc::now();
        let mut progress = fixture();
        progress
            .events
            .push(event_at("Biology", 5.0, now - Duration::days(20)));
        let insights = get_insights(&progress, now);
        assert_eq!(insights.len(), 1);
        assert!(insights[0].starts_with("Quick win"));
    }

    #[test]
    fn momentum_and_weak_topic_rules_fire() {
        let now = Utc::now();
        let mut progress = fixture();
        progress.streak = 4;
        progress
            .events
            .push(event_at("Maths", 8.0, now - Duration::days(1)));
        let insights = get_insights(&progress, now);
        assert_eq!(insights.len(), 3);
        assert!(insights[0].contains("Maths"));
        assert!(insights[1].starts_with("Focus on"));
        assert!(insights[2].contains("4-day streak"));
    }

    #[test]
    fn insights_stay_within_length_budget() {
        let now = Utc::now();
        let mut progress = fixture();
        progress.subjects[0].topics[0].name = "A".repeat(200);
        progress.subjects[0].topics[0].current = 0.01;
        progress
            .events
            .push(event_at("Biology", 8.0, now - Duration::days(1)));
        for insight in get_insights(&progress, now) {
            assert!(insight.chars().count() <= 120, "too long: {insight}");
        }
    }
}
