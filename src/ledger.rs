//! Append-only ledger of structured feedback records
//!
//! All feedback shares one namespace. The underlying index only accepts flat
//! primitive metadata, so the payload is serialized into `payload_json` and a
//! few scalar fields are promoted alongside it.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::feedback::{FeedbackRecord, FeedbackType, Payload};
use crate::storage::{
    Metadata, MetadataValue, RecordFilter, StoredRecord, VectorIndex, VectorRecord, KIND_KEY,
    SESSION_KEY,
};

/// Payload fields copied into top-level metadata when they are scalars
const PROMOTED_FIELDS: &[&str] = &[
    "grammar_score",
    "estimated_level",
    "vocabulary_level",
    "learning_feedback",
];

/// Store of learner and quality feedback
pub struct FeedbackLedger {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    namespace: String,
}

impl FeedbackLedger {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            index,
            namespace: namespace.into(),
        }
    }

    /// Append a feedback record. Returns its id, or `None` if the write failed.
    pub async fn record(
        &self,
        session_id: &str,
        message_pair_id: &str,
        feedback_type: FeedbackType,
        payload: Payload,
    ) -> Option<String> {
        let id = format!(
            "feedback-{}-{}-{}",
            session_id,
            Utc::now().timestamp_millis(),
            &Uuid::new_v4().simple().to_string()[..8]
        );

        match self
            .try_record(&id, session_id, message_pair_id, feedback_type, &payload)
            .await
        {
            Ok(()) => {
                debug!(session_id, %feedback_type, id = %id, "stored feedback");
                Some(id)
            }
            Err(e) => {
                warn!(session_id, %feedback_type, error = %e, "feedback write failed");
                None
            }
        }
    }

    async fn try_record(
        &self,
        id: &str,
        session_id: &str,
        message_pair_id: &str,
        feedback_type: FeedbackType,
        payload: &Payload,
    ) -> Result<()> {
        let values = self.embedder.embed(&summarize(feedback_type, payload)).await?;
        let metadata = flatten(session_id, message_pair_id, feedback_type, payload)?;

        self.index
            .upsert(
                &self.namespace,
                VectorRecord {
                    id: id.to_string(),
                    values,
                    metadata,
                },
            )
            .await
    }

    /// Up to `limit` records matching the filters. Order is whatever the
    /// index returns; callers sort by `timestamp` when order matters.
    pub async fn query(
        &self,
        feedback_type: Option<FeedbackType>,
        session_id: Option<&str>,
        limit: usize,
    ) -> Vec<FeedbackRecord> {
        let filter = RecordFilter {
            session_id: session_id.map(str::to_string),
            kind: feedback_type.map(|t| t.as_str().to_string()),
        };

        match self.index.scan(&self.namespace, &filter, limit).await {
            Ok(rows) => rows.into_iter().filter_map(reconstruct).collect(),
            Err(e) => {
                warn!(?feedback_type, session_id, error = %e, "feedback query failed");
                Vec::new()
            }
        }
    }
}

/// Short text embedded for similarity search over feedback
pub fn summarize(feedback_type: FeedbackType, payload: &Payload) -> String {
    let text = |key: &str| payload.get(key).and_then(Value::as_str).unwrap_or_default();

    let detail = match feedback_type {
        FeedbackType::UserProgress => {
            let errors = payload
                .get("errors")
                .and_then(Value::as_array)
                .map(|errs| {
                    errs.iter()
                        .filter_map(|e| e.get("type").and_then(Value::as_str))
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            format!("level {} errors {}", text("estimated_level"), errors)
        }
        FeedbackType::LearningExperience => {
            format!("{} {}", text("learning_feedback"), text("user_message"))
        }
        FeedbackType::QualityAnalysis => format!("{} {}", text("issue"), text("suggestion")),
    };

    format!("{}: {}", feedback_type, detail.trim())
}

fn flatten(
    session_id: &str,
    message_pair_id: &str,
    feedback_type: FeedbackType,
    payload: &Payload,
) -> Result<Metadata> {
    let mut meta = Metadata::new();
    meta.insert("type".into(), "feedback".into());
    meta.insert(SESSION_KEY.into(), session_id.into());
    meta.insert(KIND_KEY.into(), feedback_type.as_str().into());
    meta.insert("feedback_type".into(), feedback_type.as_str().into());
    meta.insert("message_pair_id".into(), message_pair_id.into());
    meta.insert("payload_json".into(), serde_json::to_string(payload)?.into());
    meta.insert(
        "timestamp".into(),
        (Utc::now().timestamp_micros() as f64 / 1_000_000.0).into(),
    );

    for key in PROMOTED_FIELDS {
        let promoted = match payload.get(*key) {
            Some(Value::String(s)) => Some(MetadataValue::Text(s.clone())),
            Some(Value::Number(n)) => n.as_f64().map(MetadataValue::Number),
            Some(Value::Bool(b)) => Some(MetadataValue::Bool(*b)),
            _ => None,
        };
        if let Some(value) = promoted {
            meta.insert((*key).to_string(), value);
        }
    }

    Ok(meta)
}

fn reconstruct(row: StoredRecord) -> Option<FeedbackRecord> {
    let text = |key: &str| {
        row.metadata
            .get(key)
            .and_then(MetadataValue::as_str)
            .map(str::to_string)
    };

    let feedback_type = match text("feedback_type").map(|t| t.parse::<FeedbackType>()) {
        Some(Ok(t)) => t,
        _ => {
            debug!(id = %row.id, "skipping record without a feedback type");
            return None;
        }
    };

    let payload = text("payload_json")
        .and_then(|raw| match serde_json::from_str::<Payload>(&raw) {
            Ok(map) => Some(map),
            Err(e) => {
                warn!(id = %row.id, error = %Error::from(e), "unreadable feedback payload");
                None
            }
        })
        .unwrap_or_default();

    Some(FeedbackRecord {
        feedback_type,
        session_id: text(SESSION_KEY).unwrap_or_default(),
        message_pair_id: text("message_pair_id").unwrap_or_default(),
        payload,
        timestamp: row
            .metadata
            .get("timestamp")
            .and_then(MetadataValue::as_f64)
            .unwrap_or_default(),
        id: row.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::storage::SqliteIndex;
    use serde_json::json;

    fn ledger() -> FeedbackLedger {
        FeedbackLedger::new(
            Arc::new(HashingEmbedder::new(64)),
            Arc::new(SqliteIndex::in_memory().unwrap()),
            "feedback",
        )
    }

    fn object(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn nested_payload_survives_round_trip() {
        let ledger = ledger();
        let payload = object(json!({
            "grammar_score": 7,
            "vocabulary_level": "intermediate",
            "estimated_level": "B1",
            "errors": [{"type": "gender", "error": "le table", "correction": "la table"}],
            "strengths": ["pronunciation"],
            "focus_areas": ["articles", "gender"]
        }));

        let id = ledger
            .record("s1", "pair-1", FeedbackType::UserProgress, payload.clone())
            .await
            .unwrap();

        let found = ledger.query(Some(FeedbackType::UserProgress), Some("s1"), 10).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
        assert_eq!(found[0].payload, payload);
        assert_eq!(found[0].message_pair_id, "pair-1");
        assert!(found[0].timestamp > 0.0);
    }

    #[tokio::test]
    async fn query_filters_by_type_and_session() {
        let ledger = ledger();
        let exp = object(json!({"learning_feedback": "too_hard", "ai_response": "x", "user_message": "y"}));
        ledger.record("s1", "p", FeedbackType::LearningExperience, exp.clone()).await;
        ledger.record("s2", "p", FeedbackType::LearningExperience, exp).await;
        ledger
            .record("s1", "p", FeedbackType::UserProgress, object(json!({"grammar_score": 3})))
            .await;

        assert_eq!(ledger.query(Some(FeedbackType::LearningExperience), Some("s1"), 20).await.len(), 1);
        assert_eq!(ledger.query(Some(FeedbackType::LearningExperience), None, 20).await.len(), 2);
        assert_eq!(ledger.query(None, Some("s1"), 20).await.len(), 2);
    }

    #[test]
    fn flatten_keeps_metadata_primitive() {
        let payload = object(json!({
            "grammar_score": 8.5,
            "estimated_level": "B2",
            "errors": [{"type": "x"}]
        }));
        let meta = flatten("s", "p", FeedbackType::UserProgress, &payload).unwrap();
        assert_eq!(meta["grammar_score"], MetadataValue::Number(8.5));
        assert_eq!(meta["estimated_level"], MetadataValue::Text("B2".into()));
        assert!(!meta.contains_key("errors"));
        assert!(meta["payload_json"].as_str().unwrap().contains("\"errors\""));
    }

    #[test]
    fn summary_mentions_signal_and_errors() {
        let exp = object(json!({"learning_feedback": "confused", "user_message": "que?"}));
        assert_eq!(
            summarize(FeedbackType::LearningExperience, &exp),
            "learning_experience: confused que?"
        );
        let prog = object(json!({"estimated_level": "A2", "errors": [{"type": "tense"}, {"type": "article"}]}));
        assert_eq!(
            summarize(FeedbackType::UserProgress, &prog),
            "user_progress: level A2 errors tense, article"
        );
    }

    #[test]
    fn unreadable_payload_reconstructs_as_empty() {
        let mut metadata = Metadata::new();
        metadata.insert("feedback_type".into(), "quality_analysis".into());
        metadata.insert("payload_json".into(), "{not json".into());
        let record = reconstruct(StoredRecord {
            id: "f".into(),
            metadata,
        })
        .unwrap();
        assert!(record.payload.is_empty());
    }
}
