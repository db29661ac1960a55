//! Vector storage using LanceDB for semantic search

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lance_arrow::FixedSizeListArrayExt;
use lancedb::connect;
use lancedb::query::{ExecutableQuery, QueryBase};
use std::sync::Arc;

use super::{Metadata, RecordFilter, ScoredRecord, StoredRecord, VectorIndex, VectorRecord};
use crate::config::Config;
use crate::error::{Error, Result};

const TABLE_NAME: &str = "records";

/// Vector storage backend using LanceDB
pub struct LanceIndex {
    db: lancedb::Connection,
    dimensions: usize,
}

impl LanceIndex {
    /// Create a new vector storage
    pub async fn new(config: &Config) -> Result<Self> {
        let path = config.vector_db_path();
        let uri = path
            .to_str()
            .ok_or_else(|| Error::config(format!("vector db path is not UTF-8: {:?}", path)))?;

        let db = connect(uri)
            .execute()
            .await
            .map_err(|e| Error::vector_db(e.to_string()))?;

        let storage = Self {
            db,
            dimensions: config.embedding_dimensions,
        };

        storage.ensure_table().await?;

        Ok(storage)
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("namespace", DataType::Utf8, false),
            Field::new("session_id", DataType::Utf8, true),
            Field::new("kind", DataType::Utf8, true),
            Field::new("metadata", DataType::Utf8, false),
            Field::new("inserted_at", DataType::Int64, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimensions as i32,
                ),
                false,
            ),
        ])
    }

    async fn ensure_table(&self) -> Result<()> {
        let tables = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| Error::vector_db(e.to_string()))?;

        if !tables.contains(&TABLE_NAME.to_string()) {
            let schema = Arc::new(self.schema());
            let empty_batch = RecordBatch::new_empty(schema.clone());
            let reader = RecordBatchIterator::new(vec![empty_batch].into_iter().map(Ok), schema);

            self.db
                .create_table(TABLE_NAME, Box::new(reader))
                .execute()
                .await
                .map_err(|e| Error::vector_db(e.to_string()))?;
        }

        Ok(())
    }

    async fn table(&self) -> Result<lancedb::Table> {
        self.db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| Error::vector_db(e.to_string()))
    }
}

#[async_trait]
impl VectorIndex for LanceIndex {
    async fn upsert(&self, namespace: &str, record: VectorRecord) -> Result<()> {
        if record.values.len() != self.dimensions {
            return Err(Error::vector_db(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimensions,
                record.values.len()
            )));
        }

        let table = self.table().await?;

        table
            .delete(&format!("id = '{}'", record.id.replace('\'', "''")))
            .await
            .map_err(|e| Error::vector_db(e.to_string()))?;

        let values = Float32Array::from(record.values.clone());
        let vector_array = FixedSizeListArray::try_new_from_values(values, self.dimensions as i32)
            .map_err(|e: arrow_schema::ArrowError| Error::vector_db(e.to_string()))?;

        let schema = Arc::new(self.schema());
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec![record.id.clone()])) as Arc<dyn Array>,
                Arc::new(StringArray::from(vec![namespace.to_string()])),
                Arc::new(StringArray::from(vec![record.session_id()])),
                Arc::new(StringArray::from(vec![record.kind()])),
                Arc::new(StringArray::from(vec![serde_json::to_string(&record.metadata)?])),
                Arc::new(Int64Array::from(vec![chrono::Utc::now().timestamp_micros()])),
                Arc::new(vector_array),
            ],
        )
        .map_err(|e| Error::vector_db(e.to_string()))?;

        let reader = RecordBatchIterator::new(vec![batch].into_iter().map(Ok), schema);

        table
            .add(Box::new(reader))
            .execute()
            .await
            .map_err(|e| Error::vector_db(e.to_string()))?;

        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<ScoredRecord>> {
        let table = self.table().await?;

        let stream = table
            .vector_search(vector.to_vec())
            .map_err(|e: lancedb::Error| Error::vector_db(e.to_string()))?
            .only_if(filter.to_predicate(namespace))
            .limit(top_k)
            .execute()
            .await
            .map_err(|e: lancedb::Error| Error::vector_db(e.to_string()))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect::<Vec<RecordBatch>>()
            .await
            .map_err(|e: lancedb::Error| Error::vector_db(e.to_string()))?;

        let mut results = Vec::new();
        for batch in batches {
            let ids = string_column(&batch, "id")?;
            let metadata = string_column(&batch, "metadata")?;
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| Error::vector_db("_distance column is not Float32Array"))?;

            for i in 0..batch.num_rows() {
                // LanceDB returns L2 distance, convert to similarity score
                let score = 1.0 / (1.0 + distances.value(i));
                results.push(ScoredRecord {
                    id: ids.value(i).to_string(),
                    score,
                    metadata: parse_metadata(metadata.value(i))?,
                });
            }
        }

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(results)
    }

    async fn scan(
        &self,
        namespace: &str,
        filter: &RecordFilter,
        limit: usize,
    ) -> Result<Vec<StoredRecord>> {
        let table = self.table().await?;

        let stream = table
            .query()
            .only_if(filter.to_predicate(namespace))
            .limit(limit)
            .execute()
            .await
            .map_err(|e: lancedb::Error| Error::vector_db(e.to_string()))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect::<Vec<RecordBatch>>()
            .await
            .map_err(|e: lancedb::Error| Error::vector_db(e.to_string()))?;

        let mut rows = Vec::new();
        for batch in batches {
            let ids = string_column(&batch, "id")?;
            let metadata = string_column(&batch, "metadata")?;
            let inserted = batch
                .column_by_name("inserted_at")
                .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
                .ok_or_else(|| Error::vector_db("inserted_at column is not Int64Array"))?;

            for i in 0..batch.num_rows() {
                rows.push((
                    inserted.value(i),
                    StoredRecord {
                        id: ids.value(i).to_string(),
                        metadata: parse_metadata(metadata.value(i))?,
                    },
                ));
            }
        }

        rows.sort_by_key(|(inserted_at, _)| *inserted_at);
        Ok(rows.into_iter().map(|(_, record)| record).collect())
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| Error::vector_db(format!("{} column is not StringArray", name)))
}

fn parse_metadata(raw: &str) -> Result<Metadata> {
    serde_json::from_str(raw).map_err(|e| Error::vector_db(format!("bad metadata: {}", e)))
}
