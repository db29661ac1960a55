//! Vector index backends for lingua-memory
//!
//! Records live in named namespaces (one per session for utterances, one
//! shared namespace for feedback). Metadata is flat: every value is a string,
//! number or bool.

mod sqlite;
pub mod vector;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{Config, VectorBackend};
use crate::error::Result;

pub use sqlite::SqliteIndex;
pub use vector::LanceIndex;

/// Metadata key used to filter by session
pub const SESSION_KEY: &str = "session_id";

/// Metadata key used to filter by record kind (role or feedback type)
pub const KIND_KEY: &str = "kind";

/// A primitive metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

impl From<f64> for MetadataValue {
    fn from(n: f64) -> Self {
        MetadataValue::Number(n)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

/// Flat key-value metadata attached to a vector
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A vector to be written into a namespace
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Metadata,
}

impl VectorRecord {
    fn text(&self, key: &str) -> Option<String> {
        self.metadata.get(key).and_then(|v| v.as_str()).map(str::to_string)
    }

    /// Session this record is filterable by
    pub fn session_id(&self) -> Option<String> {
        self.text(SESSION_KEY)
    }

    /// Kind this record is filterable by
    pub fn kind(&self) -> Option<String> {
        self.text(KIND_KEY)
    }
}

/// A record read back without a score
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: String,
    pub metadata: Metadata,
}

/// A record returned by a similarity query
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub id: String,
    pub score: f32,
    pub metadata: Metadata,
}

/// Equality filter over the indexed metadata keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub session_id: Option<String>,
    pub kind: Option<String>,
}

impl RecordFilter {
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// SQL predicate in the dialect LanceDB accepts
    pub(crate) fn to_predicate(&self, namespace: &str) -> String {
        let mut clauses = vec![format!("namespace = '{}'", escape(namespace))];
        if let Some(session_id) = &self.session_id {
            clauses.push(format!("session_id = '{}'", escape(session_id)));
        }
        if let Some(kind) = &self.kind {
            clauses.push(format!("kind = '{}'", escape(kind)));
        }
        clauses.join(" AND ")
    }
}

fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

/// Namespaced vector index
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert a record, replacing any record with the same id
    async fn upsert(&self, namespace: &str, record: VectorRecord) -> Result<()>;

    /// Up to `top_k` records closest to `vector`, best first
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<ScoredRecord>>;

    /// Up to `limit` records matching the filter, without ranking
    async fn scan(
        &self,
        namespace: &str,
        filter: &RecordFilter,
        limit: usize,
    ) -> Result<Vec<StoredRecord>>;
}

/// Open the index selected by the configuration
pub async fn open_index(config: &Config) -> Result<Arc<dyn VectorIndex>> {
    match config.vector_backend {
        VectorBackend::Lance => Ok(Arc::new(LanceIndex::new(config).await?)),
        VectorBackend::Sqlite => Ok(Arc::new(SqliteIndex::open(config.sqlite_path())?)),
    }
}
