//! Contextual retrieval: feedback attached to semantically similar past exchanges

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::feedback::{FeedbackRecord, FeedbackType};
use crate::ledger::FeedbackLedger;
use crate::memory::{LongTermMemory, Recollection};

/// Finds learning-experience feedback tied to exchanges similar to a new utterance
pub struct ContextualMatcher {
    memory: Arc<LongTermMemory>,
    ledger: Arc<FeedbackLedger>,
    top_k: usize,
    feedback_limit: usize,
}

impl ContextualMatcher {
    pub fn new(
        memory: Arc<LongTermMemory>,
        ledger: Arc<FeedbackLedger>,
        top_k: usize,
        feedback_limit: usize,
    ) -> Self {
        Self {
            memory,
            ledger,
            top_k,
            feedback_limit,
        }
    }

    /// Experience records whose rated reply is among the utterances most
    /// similar to `utterance`, in ledger order. Empty on a cold start.
    pub async fn matches(&self, session_id: &str, utterance: &str) -> Vec<FeedbackRecord> {
        let similar = self.memory.recall(session_id, utterance, self.top_k).await;
        if similar.is_empty() {
            return Vec::new();
        }

        let experiences = self
            .ledger
            .query(
                Some(FeedbackType::LearningExperience),
                Some(session_id),
                self.feedback_limit,
            )
            .await;

        let matched = join(&similar, experiences);
        debug!(
            session_id,
            similar = similar.len(),
            matched = matched.len(),
            "contextual feedback match"
        );
        matched
    }
}

/// Keep feedback that points at a recalled record, either by stored memory id
/// or by exact equality of the rated reply with the recalled content.
pub fn join(similar: &[Recollection], experiences: Vec<FeedbackRecord>) -> Vec<FeedbackRecord> {
    let ids: HashSet<&str> = similar.iter().map(|r| r.id.as_str()).collect();
    let contents: HashSet<&str> = similar.iter().map(|r| r.content.as_str()).collect();

    experiences
        .into_iter()
        .filter(|record| {
            let by_id = record
                .payload
                .get("memory_id")
                .and_then(Value::as_str)
                .is_some_and(|id| ids.contains(id));
            let by_content = record
                .payload
                .get("ai_response")
                .and_then(Value::as_str)
                .is_some_and(|text| contents.contains(text));
            by_id || by_content
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::Payload;
    use serde_json::json;

    fn recollection(id: &str, content: &str) -> Recollection {
        Recollection {
            id: id.into(),
            score: 0.9,
            role: None,
            content: content.into(),
        }
    }

    fn experience(id: &str, payload: Value) -> FeedbackRecord {
        let payload: Payload = match payload {
            Value::Object(map) => map,
            _ => Payload::new(),
        };
        FeedbackRecord {
            id: id.into(),
            feedback_type: FeedbackType::LearningExperience,
            session_id: "s".into(),
            message_pair_id: "p".into(),
            payload,
            timestamp: 0.0,
        }
    }

    #[test]
    fn joins_on_exact_reply_text() {
        let similar = vec![recollection("m1", "Le subjonctif exprime le doute.")];
        let matched = join(
            &similar,
            vec![
                experience("f1", json!({"ai_response": "Le subjonctif exprime le doute."})),
                experience("f2", json!({"ai_response": "Le subjonctif exprime le doute"})),
            ],
        );
        let ids: Vec<_> = matched.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["f1"]);
    }

    #[test]
    fn joins_on_memory_reference_even_when_text_differs() {
        let similar = vec![recollection("m7", "reply as stored")];
        let matched = join(
            &similar,
            vec![experience("f1", json!({"ai_response": "reply as shown", "memory_id": "m7"}))],
        );
        assert_eq!(matched.len(), 1);
    }

    #[test]
    fn preserves_ledger_order() {
        let similar = vec![recollection("a", "one"), recollection("b", "two")];
        let matched = join(
            &similar,
            vec![
                experience("f1", json!({"ai_response": "two"})),
                experience("f2", json!({"ai_response": "three"})),
                experience("f3", json!({"ai_response": "one"})),
            ],
        );
        let ids: Vec<_> = matched.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["f1", "f3"]);
    }

    #[test]
    fn empty_recall_matches_nothing() {
        let matched = join(&[], vec![experience("f1", json!({"ai_response": ""}))]);
        assert!(matched.is_empty());
    }
}
