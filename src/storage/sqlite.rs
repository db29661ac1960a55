//! SQLite vector index with brute-force cosine ranking

use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{Metadata, RecordFilter, ScoredRecord, StoredRecord, VectorIndex, VectorRecord};
use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};

const SCOPE: &str = "namespace = ?1 AND (?2 IS NULL OR session_id = ?2) AND (?3 IS NULL OR kind = ?3)";

/// SQLite storage backend
pub struct SqliteIndex {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteIndex {
    /// Open (or create) an index file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Index that lives only as long as this value
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Number of records in a namespace
    pub fn count(&self, namespace: &str) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM vectors WHERE namespace = ?1",
            params![namespace],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(&self, namespace: &str, record: VectorRecord) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO vectors (id, namespace, session_id, kind, metadata, vector)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                namespace = excluded.namespace,
                session_id = excluded.session_id,
                kind = excluded.kind,
                metadata = excluded.metadata,
                vector = excluded.vector
            "#,
            params![
                record.id,
                namespace,
                record.session_id(),
                record.kind(),
                serde_json::to_string(&record.metadata)?,
                encode_vector(&record.values),
            ],
        )?;

        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<ScoredRecord>> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;

        let mut stmt = conn.prepare(&format!(
            "SELECT id, metadata, vector FROM vectors WHERE {} ORDER BY seq ASC",
            SCOPE
        ))?;
        let rows = stmt.query_map(
            params![namespace, filter.session_id.as_deref(), filter.kind.as_deref()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            },
        )?;

        let mut results = Vec::new();
        for row in rows {
            let (id, metadata, blob) = row?;
            results.push(ScoredRecord {
                id,
                score: cosine_similarity(vector, &decode_vector(&blob)),
                metadata: parse_metadata(&metadata)?,
            });
        }

        // Stable sort keeps append order among equal scores
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        Ok(results)
    }

    async fn scan(
        &self,
        namespace: &str,
        filter: &RecordFilter,
        limit: usize,
    ) -> Result<Vec<StoredRecord>> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;

        // Newest `limit` rows, returned oldest first
        let sql = format!(
            "SELECT id, metadata FROM \
             (SELECT seq, id, metadata FROM vectors WHERE {} ORDER BY seq DESC LIMIT ?4) \
             ORDER BY seq ASC",
            SCOPE
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                namespace,
                filter.session_id.as_deref(),
                filter.kind.as_deref(),
                limit as i64
            ],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?;

        let mut results = Vec::new();
        for row in rows {
            let (id, metadata) = row?;
            results.push(StoredRecord {
                id,
                metadata: parse_metadata(&metadata)?,
            });
        }
        Ok(results)
    }
}

fn parse_metadata(raw: &str) -> Result<Metadata> {
    Ok(serde_json::from_str(raw)?)
}

fn encode_vector(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
