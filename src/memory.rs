//! Long-term semantic memory of every utterance
//!
//! Each session's utterances live in their own namespace. Writes follow a
//! store-then-forget policy: failures are logged and never reach the caller.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::embedding::Embedder;
use crate::error::Result;
use crate::message::Role;
use crate::storage::{Metadata, RecordFilter, VectorIndex, VectorRecord, KIND_KEY, SESSION_KEY};

/// An utterance retrieved by similarity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recollection {
    pub id: String,
    pub score: f32,
    pub role: Option<Role>,
    pub content: String,
}

/// Prefix of every per-session namespace
pub const SESSION_NAMESPACE_PREFIX: &str = "session:";

/// Append-only, session-namespaced store of utterances
pub struct LongTermMemory {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl LongTermMemory {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Index namespace holding a session's utterances. The prefix keeps it
    /// apart from the shared feedback namespace.
    pub fn namespace(session_id: &str) -> String {
        format!("{}{}", SESSION_NAMESPACE_PREFIX, session_id)
    }

    /// Unique id for a memory record: timestamp plus a random suffix
    pub fn record_id(session_id: &str, role: Role) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}-{}-{}-{}",
            session_id,
            Utc::now().timestamp_millis(),
            role,
            &suffix[..8]
        )
    }

    /// Embed and store an utterance.
    ///
    /// Returns the new record's id, or `None` if it could not be stored.
    pub async fn remember(&self, session_id: &str, role: Role, content: &str) -> Option<String> {
        let id = Self::record_id(session_id, role);
        match self.try_remember(&id, session_id, role, content).await {
            Ok(()) => {
                debug!(session_id, %role, id = %id, "stored utterance");
                Some(id)
            }
            Err(e) => {
                warn!(session_id, %role, error = %e, "long-term memory write failed");
                None
            }
        }
    }

    async fn try_remember(&self, id: &str, session_id: &str, role: Role, content: &str) -> Result<()> {
        let values = self.embedder.embed(content).await?;

        let mut metadata = Metadata::new();
        metadata.insert(SESSION_KEY.into(), session_id.into());
        metadata.insert(KIND_KEY.into(), role.as_str().into());
        metadata.insert("role".into(), role.as_str().into());
        metadata.insert("content".into(), content.into());

        self.index
            .upsert(
                &Self::namespace(session_id),
                VectorRecord {
                    id: id.to_string(),
                    values,
                    metadata,
                },
            )
            .await
    }

    /// Up to `top_k` past utterances of this session most similar to `query`.
    ///
    /// Empty when the store is unavailable or the session has no entries.
    pub async fn recall(&self, session_id: &str, query: &str, top_k: usize) -> Vec<Recollection> {
        if top_k == 0 {
            return Vec::new();
        }
        match self.try_recall(session_id, query, top_k).await {
            Ok(found) => found,
            Err(e) => {
                warn!(session_id, error = %e, "long-term memory search failed");
                Vec::new()
            }
        }
    }

    async fn try_recall(&self, session_id: &str, query: &str, top_k: usize) -> Result<Vec<Recollection>> {
        let vector = self.embedder.embed(query).await?;
        let hits = self
            .index
            .query(
                &Self::namespace(session_id),
                &vector,
                top_k,
                &RecordFilter::default().session(session_id),
            )
            .await?;

        let mut found: Vec<Recollection> = hits
            .into_iter()
            .map(|hit| Recollection {
                role: hit
                    .metadata
                    .get("role")
                    .and_then(|v| v.as_str())
                    .and_then(|r| r.parse().ok()),
                content: hit
                    .metadata
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                id: hit.id,
                score: hit.score,
            })
            .collect();

        found.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        found.truncate(top_k);
        Ok(found)
    }
}
