//! Personalized instruction synthesis
//!
//! The session instruction is built once, at the first user turn, from the
//! latest progress assessment and the last few learning-experience signals.
//! Every turn can additionally carry one-off system turns derived from signal
//! frequency and from feedback on similar past exchanges. Those one-off turns
//! are sent to the completion provider but never written to the window.
//!
//! Signal handling is driven by the decision tables below rather than by
//! branching code, so precedence is visible in one place.

use std::sync::Arc;

use serde_json::Value;

use crate::feedback::{FeedbackRecord, FeedbackType, LearningSignal};
use crate::ledger::FeedbackLedger;
use crate::message::Turn;

const DEFAULT_LEVEL: &str = "A2";
const DEFAULT_GRAMMAR_SCORE: f64 = 5.0;
const PROFILE_ERROR_TYPES: usize = 3;

/// An adjustment appended to the instruction or injected for one turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directive {
    Simplify,
    IncreaseComplexity,
    Clarify,
    StrongSimplify,
    StrongClarify,
    ClarifySimilarTopic,
    ExplainSimilarTopic,
}

impl Directive {
    pub fn text(&self) -> &'static str {
        match self {
            Directive::Simplify => {
                "The learner recently found replies too hard. Use shorter sentences, \
                 common vocabulary and simpler grammar."
            }
            Directive::IncreaseComplexity => {
                "The learner recently found replies too easy. Use richer vocabulary, \
                 longer sentences and more varied grammar."
            }
            Directive::Clarify => {
                "The learner was recently confused. Be explicit, give one idea at a time \
                 and check understanding."
            }
            Directive::StrongSimplify => {
                "The learner has repeatedly struggled. Keep every reply very simple, \
                 avoid idioms and rephrase anything complex."
            }
            Directive::StrongClarify => {
                "The learner has been confused several times. Explain step by step \
                 with a short example before moving on."
            }
            Directive::ClarifySimilarTopic => {
                "This topic was too hard for the learner before. Simplify and explain \
                 key words in this reply."
            }
            Directive::ExplainSimilarTopic => {
                "This topic confused the learner before. Explain it clearly, step by step, \
                 in this reply."
            }
        }
    }
}

/// A row of a decision table: `directive` applies when `signal` occurs at
/// least `min_count` times among the last `window` signals.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub signal: &'static str,
    pub window: usize,
    pub min_count: usize,
    pub directive: Directive,
}

const fn rule(signal: &'static str, window: usize, min_count: usize, directive: Directive) -> Rule {
    Rule {
        signal,
        window,
        min_count,
        directive,
    }
}

/// Session instruction: first match wins (too_hard > too_easy > confused)
pub const RECENT_SIGNAL_RULES: &[Rule] = &[
    rule("too_hard", 3, 1, Directive::Simplify),
    rule("too_easy", 3, 1, Directive::IncreaseComplexity),
    rule("confused", 3, 1, Directive::Clarify),
];

/// Per turn: first match wins (too_hard > confused)
pub const FREQUENCY_RULES: &[Rule] = &[
    rule("too_hard", 5, 2, Directive::StrongSimplify),
    rule("confused", 5, 2, Directive::StrongClarify),
];

/// Per turn, over feedback on similar exchanges: every matching row applies
pub const CONTEXT_RULES: &[Rule] = &[
    rule("too_hard", 3, 1, Directive::ClarifySimilarTopic),
    rule("confused", 3, 1, Directive::ExplainSimilarTopic),
];

impl Rule {
    fn holds(&self, signals: &[LearningSignal]) -> bool {
        let start = signals.len().saturating_sub(self.window);
        let count = signals[start..]
            .iter()
            .filter(|s| s.as_str() == self.signal)
            .count();
        count >= self.min_count
    }
}

/// First directive whose rule holds
pub fn first_match(rules: &[Rule], signals: &[LearningSignal]) -> Option<Directive> {
    rules.iter().find(|r| r.holds(signals)).map(|r| r.directive)
}

/// Every directive whose rule holds, in table order
pub fn all_matches(rules: &[Rule], signals: &[LearningSignal]) -> Vec<Directive> {
    rules
        .iter()
        .filter(|r| r.holds(signals))
        .map(|r| r.directive)
        .collect()
}

/// Base persona and task framing
pub fn base_instruction(target_lang: &str) -> String {
    format!(
        "You are a helpful conversational partner helping the user practice a target language. \
         Respond concisely. Target language: {}.",
        target_lang
    )
}

/// Records ordered oldest to newest. Equal timestamps keep ledger order.
fn chronological(records: &[FeedbackRecord]) -> Vec<&FeedbackRecord> {
    let mut ordered: Vec<&FeedbackRecord> = records.iter().collect();
    ordered.sort_by(|a, b| {
        a.timestamp
            .partial_cmp(&b.timestamp)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ordered
}

fn signals(records: &[FeedbackRecord]) -> Vec<LearningSignal> {
    chronological(records)
        .into_iter()
        .filter_map(FeedbackRecord::learning_signal)
        .collect()
}

/// Learner profile block from the newest progress assessment
pub fn profile_block(progress: &[FeedbackRecord]) -> Option<String> {
    let latest = &chronological(progress).pop()?.payload;

    // Fields are read one at a time so a malformed field only loses itself.
    let level = latest
        .get("estimated_level")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or(DEFAULT_LEVEL)
        .to_string();
    let score = latest
        .get("grammar_score")
        .and_then(Value::as_f64)
        .unwrap_or(DEFAULT_GRAMMAR_SCORE);
    let error_types: Vec<&str> = latest
        .get("errors")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|e| e.get("type").and_then(Value::as_str))
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .take(PROFILE_ERROR_TYPES)
        .collect();

    let mut block = format!(
        "Learner profile: estimated level {}, grammar score {}/10.",
        level, score
    );
    if !error_types.is_empty() {
        block.push_str(&format!(
            " Recent error types: {}. Model the correct forms naturally.",
            error_types.join(", ")
        ));
    }
    block.push_str(" Match vocabulary and sentence complexity to this level.");
    Some(block)
}

/// Compose the once-per-session instruction from ledger records
pub fn compose_instruction(
    target_lang: &str,
    progress: &[FeedbackRecord],
    experiences: &[FeedbackRecord],
) -> String {
    let mut instruction = base_instruction(target_lang);

    if let Some(profile) = profile_block(progress) {
        instruction.push_str("\n\n");
        instruction.push_str(&profile);
    }

    if let Some(directive) = first_match(RECENT_SIGNAL_RULES, &signals(experiences)) {
        instruction.push_str("\n\n");
        instruction.push_str(directive.text());
    }

    instruction
}

/// One-off system turns for the current request
pub fn turn_injections(experiences: &[FeedbackRecord], matches: &[FeedbackRecord]) -> Vec<Turn> {
    let mut directives = Vec::new();
    directives.extend(first_match(FREQUENCY_RULES, &signals(experiences)));
    directives.extend(all_matches(CONTEXT_RULES, &signals(matches)));
    directives.into_iter().map(|d| Turn::system(d.text())).collect()
}

/// Window history followed by this turn's injections
pub fn assemble(history: Vec<Turn>, injections: Vec<Turn>) -> Vec<Turn> {
    let mut turns = history;
    turns.extend(injections);
    turns
}

/// Reads the ledger to build instructions for a session
pub struct Personalizer {
    ledger: Arc<FeedbackLedger>,
    query_limit: usize,
}

impl Personalizer {
    pub fn new(ledger: Arc<FeedbackLedger>, query_limit: usize) -> Self {
        Self { ledger, query_limit }
    }

    /// The leading system instruction for a new session
    pub async fn session_instruction(&self, session_id: &str, target_lang: &str) -> String {
        let progress = self
            .ledger
            .query(Some(FeedbackType::UserProgress), Some(session_id), self.query_limit)
            .await;
        let experiences = self.experiences(session_id).await;
        compose_instruction(target_lang, &progress, &experiences)
    }

    /// Learning-experience records for a session
    pub async fn experiences(&self, session_id: &str) -> Vec<FeedbackRecord> {
        self.ledger
            .query(
                Some(FeedbackType::LearningExperience),
                Some(session_id),
                self.query_limit,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::Payload;
    use serde_json::{json, Value};

    fn record(feedback_type: FeedbackType, timestamp: f64, payload: Value) -> FeedbackRecord {
        let payload: Payload = match payload {
            Value::Object(map) => map,
            _ => Payload::new(),
        };
        FeedbackRecord {
            id: format!("f{}", timestamp),
            feedback_type,
            session_id: "s1".into(),
            message_pair_id: "p".into(),
            payload,
            timestamp,
        }
    }

    fn experiences(signals: &[&str]) -> Vec<FeedbackRecord> {
        signals
            .iter()
            .enumerate()
            .map(|(i, s)| {
                record(
                    FeedbackType::LearningExperience,
                    i as f64,
                    json!({"learning_feedback": s, "ai_response": "r", "user_message": "u"}),
                )
            })
            .collect()
    }

    #[test]
    fn base_instruction_is_always_present() {
        let instruction = compose_instruction("es", &[], &[]);
        assert_eq!(instruction, base_instruction("es"));
        assert!(instruction.contains("Target language: es."));
    }

    #[test]
    fn too_hard_outranks_confused() {
        let instruction = compose_instruction("fr", &[], &experiences(&["confused", "too_hard"]));
        assert!(instruction.contains(Directive::Simplify.text()));
        assert!(!instruction.contains(Directive::Clarify.text()));
    }

    #[test]
    fn too_easy_outranks_confused() {
        let instruction = compose_instruction("fr", &[], &experiences(&["too_easy", "confused"]));
        assert!(instruction.contains(Directive::IncreaseComplexity.text()));
    }

    #[test]
    fn only_last_three_signals_count() {
        let instruction = compose_instruction(
            "fr",
            &[],
            &experiences(&["too_hard", "confused", "great", "great"]),
        );
        assert!(instruction.contains(Directive::Clarify.text()));
        assert!(!instruction.contains(Directive::Simplify.text()));
    }

    #[test]
    fn signals_follow_timestamps_not_ledger_order() {
        let mut records = experiences(&["too_hard", "great", "great", "great"]);
        // Oldest record arrives last from the index
        records.rotate_left(1);
        let instruction = compose_instruction("fr", &[], &records);
        assert!(!instruction.contains(Directive::Simplify.text()));
    }

    #[test]
    fn profile_uses_latest_progress_with_defaults() {
        let progress = vec![
            record(
                FeedbackType::UserProgress,
                1.0,
                json!({"grammar_score": 3, "estimated_level": "A1"}),
            ),
            record(
                FeedbackType::UserProgress,
                2.0,
                json!({"errors": [
                    {"type": "tense"}, {"type": "gender"}, {"type": "article"}, {"type": "spelling"}
                ]}),
            ),
        ];
        let block = profile_block(&progress).unwrap();
        assert!(block.contains("estimated level A2"));
        assert!(block.contains("grammar score 5/10"));
        assert!(block.contains("tense, gender, article."));
        assert!(!block.contains("spelling"));
    }

    #[test]
    fn malformed_field_only_loses_itself() {
        let progress = vec![record(
            FeedbackType::UserProgress,
            1.0,
            json!({"grammar_score": "7", "estimated_level": "B2",
                   "errors": [{"type": "word order", "error": "x"}]}),
        )];
        let block = profile_block(&progress).unwrap();
        assert!(block.contains("estimated level B2"));
        assert!(block.contains("grammar score 5/10"));
        assert!(block.contains("Recent error types: word order."));
    }

    #[test]
    fn no_progress_means_no_profile() {
        assert!(profile_block(&[]).is_none());
    }

    #[test]
    fn frequency_rule_needs_two_occurrences_in_last_five() {
        let once = turn_injections(&experiences(&["too_hard", "great"]), &[]);
        assert!(once.is_empty());

        let twice = turn_injections(&experiences(&["confused", "too_hard", "x", "too_hard"]), &[]);
        assert_eq!(twice, vec![Turn::system(Directive::StrongSimplify.text())]);

        let old = turn_injections(
            &experiences(&["too_hard", "too_hard", "a", "b", "c", "d", "e"]),
            &[],
        );
        assert!(old.is_empty());
    }

    #[test]
    fn confused_frequency_applies_when_too_hard_does_not() {
        let injections = turn_injections(&experiences(&["confused", "too_easy", "confused"]), &[]);
        assert_eq!(injections, vec![Turn::system(Directive::StrongClarify.text())]);
    }

    #[test]
    fn contextual_matches_inject_independent_turns() {
        let matches = experiences(&["too_hard", "confused"]);
        let injections = turn_injections(&[], &matches);
        assert_eq!(
            injections,
            vec![
                Turn::system(Directive::ClarifySimilarTopic.text()),
                Turn::system(Directive::ExplainSimilarTopic.text()),
            ]
        );
    }

    #[test]
    fn contextual_rules_only_see_three_most_recent_matches() {
        let matches = experiences(&["too_hard", "great", "great", "great"]);
        assert!(turn_injections(&[], &matches).is_empty());
    }

    #[test]
    fn assemble_appends_injections_after_history() {
        let turns = assemble(
            vec![Turn::system("base"), Turn::user("hola")],
            vec![Turn::system("extra")],
        );
        assert_eq!(turns.last(), Some(&Turn::system("extra")));
        assert_eq!(turns.len(), 3);
    }
}
