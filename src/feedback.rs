//! Feedback record types: learner progress and learning-experience signals

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Structured payload stored with a feedback record
pub type Payload = Map<String, Value>;

/// Serialize any payload struct into a [`Payload`] map
pub fn to_payload<T: Serialize>(value: &T) -> Result<Payload> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::invalid_input(format!(
            "feedback payload must be an object, got {}",
            other
        ))),
    }
}

/// Kind of feedback record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    UserProgress,
    LearningExperience,
    QualityAnalysis,
}

impl FeedbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackType::UserProgress => "user_progress",
            FeedbackType::LearningExperience => "learning_experience",
            FeedbackType::QualityAnalysis => "quality_analysis",
        }
    }
}

impl std::fmt::Display for FeedbackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FeedbackType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user_progress" => Ok(FeedbackType::UserProgress),
            "learning_experience" => Ok(FeedbackType::LearningExperience),
            "quality_analysis" => Ok(FeedbackType::QualityAnalysis),
            other => Err(Error::invalid_input(format!("unknown feedback type '{}'", other))),
        }
    }
}

/// A stored feedback record with its payload reconstructed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackRecord {
    pub id: String,
    pub feedback_type: FeedbackType,
    pub session_id: String,
    pub message_pair_id: String,
    pub payload: Payload,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

impl FeedbackRecord {
    /// Payload read as a progress assessment
    pub fn progress(&self) -> Option<ProgressPayload> {
        serde_json::from_value(Value::Object(self.payload.clone())).ok()
    }

    /// The `learning_feedback` signal, if the payload carries one
    pub fn learning_signal(&self) -> Option<LearningSignal> {
        self.payload
            .get("learning_feedback")
            .and_then(Value::as_str)
            .map(LearningSignal::from)
    }
}

/// CEFR proficiency level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CefrLevel {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

impl CefrLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CefrLevel::A1 => "A1",
            CefrLevel::A2 => "A2",
            CefrLevel::B1 => "B1",
            CefrLevel::B2 => "B2",
            CefrLevel::C1 => "C1",
            CefrLevel::C2 => "C2",
        }
    }
}

impl std::fmt::Display for CefrLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CefrLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A1" => Ok(CefrLevel::A1),
            "A2" => Ok(CefrLevel::A2),
            "B1" => Ok(CefrLevel::B1),
            "B2" => Ok(CefrLevel::B2),
            "C1" => Ok(CefrLevel::C1),
            "C2" => Ok(CefrLevel::C2),
            other => Err(Error::invalid_input(format!("unknown CEFR level '{}'", other))),
        }
    }
}

/// One mistake found in a learner's utterance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LanguageError {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Proficiency assessment of a single utterance (`user_progress`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grammar_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocabulary_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_level: Option<String>,
    #[serde(default)]
    pub errors: Vec<LanguageError>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub focus_areas: Vec<String>,
}

impl ProgressPayload {
    /// Check the fields an assessment must carry to be recorded
    pub fn validate(&self) -> Result<()> {
        let score = self
            .grammar_score
            .ok_or_else(|| Error::invalid_input("grammar_score missing"))?;
        if !(0.0..=10.0).contains(&score) {
            return Err(Error::invalid_input(format!("grammar_score {} outside 0-10", score)));
        }
        let level = self
            .estimated_level
            .as_deref()
            .ok_or_else(|| Error::invalid_input("estimated_level missing"))?;
        level.parse::<CefrLevel>()?;
        Ok(())
    }

    pub fn level(&self) -> Option<CefrLevel> {
        self.estimated_level.as_deref().and_then(|l| l.parse().ok())
    }

    /// Up to `n` error types, in reported order
    pub fn error_types(&self, n: usize) -> Vec<String> {
        self.errors
            .iter()
            .map(|e| e.kind.trim())
            .filter(|k| !k.is_empty())
            .take(n)
            .map(str::to_string)
            .collect()
    }
}

/// How the learner said an exchange felt
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LearningSignal {
    TooHard,
    TooEasy,
    Confused,
    Other(String),
}

impl LearningSignal {
    pub fn as_str(&self) -> &str {
        match self {
            LearningSignal::TooHard => "too_hard",
            LearningSignal::TooEasy => "too_easy",
            LearningSignal::Confused => "confused",
            LearningSignal::Other(s) => s,
        }
    }
}

impl From<&str> for LearningSignal {
    fn from(s: &str) -> Self {
        match s {
            "too_hard" => LearningSignal::TooHard,
            "too_easy" => LearningSignal::TooEasy,
            "confused" => LearningSignal::Confused,
            other => LearningSignal::Other(other.to_string()),
        }
    }
}

impl From<String> for LearningSignal {
    fn from(s: String) -> Self {
        LearningSignal::from(s.as_str())
    }
}

impl From<LearningSignal> for String {
    fn from(signal: LearningSignal) -> Self {
        signal.as_str().to_string()
    }
}

impl std::fmt::Display for LearningSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A learner's report about one exchange (`learning_experience`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperiencePayload {
    pub learning_feedback: LearningSignal,
    pub ai_response: String,
    pub user_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    /// Id of the memory record holding `ai_response`, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progress_parses_model_shaped_output() {
        let payload: ProgressPayload = serde_json::from_value(json!({
            "grammar_score": 6,
            "vocabulary_level": "intermediate",
            "estimated_level": "b1",
            "errors": [
                {"type": "verb_tense", "error": "I go yesterday", "correction": "I went yesterday"},
                {"type": "article", "error": "a apple", "suggestion": "an apple"}
            ],
            "strengths": ["word order"],
            "focus_areas": ["past tense"]
        }))
        .unwrap();

        assert!(payload.validate().is_ok());
        assert_eq!(payload.level(), Some(CefrLevel::B1));
        assert_eq!(payload.error_types(3), vec!["verb_tense", "article"]);
        assert_eq!(payload.errors[1].suggestion.as_deref(), Some("an apple"));
    }

    #[test]
    fn progress_validation_rejects_bad_scores_and_levels() {
        let mut payload = ProgressPayload {
            grammar_score: Some(11.0),
            estimated_level: Some("B2".into()),
            ..Default::default()
        };
        assert!(payload.validate().is_err());
        payload.grammar_score = Some(4.0);
        payload.estimated_level = Some("D1".into());
        assert!(payload.validate().is_err());
        payload.estimated_level = None;
        assert!(payload.validate().is_err());
    }

    #[test]
    fn learning_signal_keeps_unknown_values() {
        let signal: LearningSignal = serde_json::from_value(json!("bored")).unwrap();
        assert_eq!(signal, LearningSignal::Other("bored".into()));
        assert_eq!(serde_json::to_value(LearningSignal::TooHard).unwrap(), json!("too_hard"));
    }

    #[test]
    fn feedback_type_round_trips_through_str() {
        for t in [
            FeedbackType::UserProgress,
            FeedbackType::LearningExperience,
            FeedbackType::QualityAnalysis,
        ] {
            assert_eq!(t.as_str().parse::<FeedbackType>().unwrap(), t);
        }
    }

    #[test]
    fn to_payload_rejects_non_objects() {
        assert!(to_payload(&"just a string").is_err());
        let map = to_payload(&json!({"a": 1})).unwrap();
        assert_eq!(map["a"], json!(1));
    }
}
