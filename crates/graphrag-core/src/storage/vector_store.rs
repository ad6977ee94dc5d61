use std::collections::HashMap;
use std::sync::Arc;

use arrow_array::{Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use lancedb::query::{ExecutableQuery, QueryBase};

use crate::error::{GraphRagError, Result};
use crate::types::VectorRecord;

#[derive(Debug, Clone, Default)]
pub struct VectorStoreStatus {
    pub row_count: usize,
    pub indexed: bool,
}

/// Storage boundary for a single collection of `(id, vector, content,
/// metadata)` records. Both the document-chunk collection and the
/// graph-embedding collection go through this trait — they differ only in
/// `collection_name`.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn add(&self, records: Vec<VectorRecord>) -> Result<()>;
    async fn search(&self, query: &[f32], top_k: usize, filter: Option<&str>) -> Result<Vec<VectorRecord>>;
    async fn delete_by_metadata(&self, key: &str, value: &str) -> Result<usize>;
    async fn status(&self) -> Result<VectorStoreStatus>;
    /// Drop and recreate the collection if it already exists. Used when a
    /// build is re-run against a stale store with a different dimension.
    async fn recreate_if_exists(&self) -> Result<()>;
    fn dimension(&self) -> usize;
    fn collection_name(&self) -> &str;
}

pub struct LanceVectorStore {
    db: lancedb::Connection,
    collection_name: String,
    dimension: usize,
}

const SEED_ID: &str = "__seed__";

impl LanceVectorStore {
    pub async fn open(path: &std::path::Path, collection_name: impl Into<String>, dimension: usize) -> Result<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| GraphRagError::StorageUnavailable(format!("create {path:?}: {e}")))?;
        let db = lancedb::connect(&path.to_string_lossy())
            .execute()
            .await
            .map_err(|e| GraphRagError::StorageUnavailable(format!("connect lancedb: {e}")))?;

        let store = Self {
            db,
            collection_name: collection_name.into(),
            dimension,
        };
        store.ensure_table().await?;
        Ok(store)
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), self.dimension as i32),
                true,
            ),
            Field::new("metadata_json", DataType::Utf8, false),
            Field::new("created_at", DataType::Int64, false),
        ]))
    }

    async fn ensure_table(&self) -> Result<()> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| GraphRagError::StorageQueryFailed(format!("list tables: {e}")))?;
        if names.contains(&self.collection_name) {
            return Ok(());
        }

        let schema = self.schema();
        let seed_vec = vec![0.0f32; self.dimension];
        let vector_field = Field::new("item", DataType::Float32, true);
        let vector_array = FixedSizeListArray::new(
            Arc::new(vector_field),
            self.dimension as i32,
            Arc::new(Float32Array::from(seed_vec)) as Arc<dyn Array>,
            None,
        );

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec![SEED_ID])) as Arc<dyn Array>,
                Arc::new(StringArray::from(vec![""])),
                Arc::new(vector_array) as Arc<dyn Array>,
                Arc::new(StringArray::from(vec!["{}"])),
                Arc::new(Int64Array::from(vec![0i64])),
            ],
        )
        .map_err(|e| GraphRagError::StorageQueryFailed(format!("build seed batch: {e}")))?;

        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.db
            .create_table(&self.collection_name, Box::new(reader))
            .execute()
            .await
            .map_err(|e| GraphRagError::StorageUnavailable(format!("create table {}: {e}", self.collection_name)))?;

        let table = self
            .db
            .open_table(&self.collection_name)
            .execute()
            .await
            .map_err(|e| GraphRagError::StorageUnavailable(e.to_string()))?;
        table.delete(&format!("id = '{SEED_ID}'")).await.ok();
        Ok(())
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn add(&self, records: Vec<VectorRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for record in &records {
            if record.vector.len() != self.dimension {
                return Err(GraphRagError::Validation(format!(
                    "record {} has dimension {}, expected {}",
                    record.id,
                    record.vector.len(),
                    self.dimension
                )));
            }
        }

        let table = self
            .db
            .open_table(&self.collection_name)
            .execute()
            .await
            .map_err(|e| GraphRagError::StorageUnavailable(e.to_string()))?;

        let schema = self.schema();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let contents: Vec<&str> = records.iter().map(|r| r.content.as_str()).collect();
        let metadata_jsons: Vec<String> = records
            .iter()
            .map(|r| serde_json::to_string(&r.metadata).unwrap_or_else(|_| "{}".to_string()))
            .collect();
        let created_ats: Vec<i64> = vec![0; records.len()];

        let flat_vectors: Vec<f32> = records.iter().flat_map(|r| r.vector.iter().copied()).collect();
        let vector_field = Field::new("item", DataType::Float32, true);
        let vector_array = FixedSizeListArray::new(
            Arc::new(vector_field),
            self.dimension as i32,
            Arc::new(Float32Array::from(flat_vectors)) as Arc<dyn Array>,
            None,
        );

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(ids)) as Arc<dyn Array>,
                Arc::new(StringArray::from(contents)),
                Arc::new(vector_array) as Arc<dyn Array>,
                Arc::new(StringArray::from(metadata_jsons)),
                Arc::new(Int64Array::from(created_ats)),
            ],
        )
        .map_err(|e| GraphRagError::StorageQueryFailed(format!("build batch: {e}")))?;

        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(Box::new(reader))
            .execute()
            .await
            .map_err(|e| GraphRagError::StorageQueryFailed(format!("insert records: {e}")))?;
        Ok(())
    }

    async fn search(&self, query: &[f32], top_k: usize, filter: Option<&str>) -> Result<Vec<VectorRecord>> {
        let table = self
            .db
            .open_table(&self.collection_name)
            .execute()
            .await
            .map_err(|e| GraphRagError::StorageUnavailable(e.to_string()))?;

        let mut builder = table
            .query()
            .nearest_to(query)
            .map_err(|e| GraphRagError::StorageQueryFailed(format!("build vector query: {e}")))?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(top_k);
        if let Some(predicate) = filter {
            builder = builder.only_if(predicate);
        }

        let results = builder
            .execute()
            .await
            .map_err(|e| GraphRagError::StorageQueryFailed(format!("vector search: {e}")))?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results)
            .await
            .map_err(|e| GraphRagError::StorageQueryFailed(format!("collect search results: {e}")))?;

        Ok(extract_records(&batches))
    }

    async fn delete_by_metadata(&self, key: &str, value: &str) -> Result<usize> {
        let table = self
            .db
            .open_table(&self.collection_name)
            .execute()
            .await
            .map_err(|e| GraphRagError::StorageUnavailable(e.to_string()))?;
        let before = table.count_rows(None).await.unwrap_or(0);
        let predicate = format!(
            "metadata_json LIKE '%\"{}\":\"{}\"%'",
            key.replace('\'', "''"),
            value.replace('\'', "''")
        );
        table
            .delete(&predicate)
            .await
            .map_err(|e| GraphRagError::StorageQueryFailed(format!("delete: {e}")))?;
        let after = table.count_rows(None).await.unwrap_or(0);
        Ok(before.saturating_sub(after))
    }

    async fn status(&self) -> Result<VectorStoreStatus> {
        let table = self
            .db
            .open_table(&self.collection_name)
            .execute()
            .await
            .map_err(|e| GraphRagError::StorageUnavailable(e.to_string()))?;
        let row_count = table
            .count_rows(None)
            .await
            .map_err(|e| GraphRagError::StorageQueryFailed(e.to_string()))?;

        if row_count >= 1_000 {
            table
                .create_index(&["vector"], lancedb::index::Index::Auto)
                .execute()
                .await
                .map_err(|e| GraphRagError::StorageQueryFailed(format!("create index: {e}")))?;
            return Ok(VectorStoreStatus { row_count, indexed: true });
        }
        Ok(VectorStoreStatus { row_count, indexed: false })
    }

    async fn recreate_if_exists(&self) -> Result<()> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| GraphRagError::StorageQueryFailed(e.to_string()))?;
        if names.contains(&self.collection_name) {
            self.db
                .drop_table(&self.collection_name, &[])
                .await
                .map_err(|e| GraphRagError::StorageQueryFailed(e.to_string()))?;
        }
        self.ensure_table().await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn collection_name(&self) -> &str {
        &self.collection_name
    }
}

fn extract_records(batches: &[RecordBatch]) -> Vec<VectorRecord> {
    let mut records = Vec::new();
    for batch in batches {
        let ids = batch.column_by_name("id").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let contents = batch.column_by_name("content").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let metadata_jsons = batch
            .column_by_name("metadata_json")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

        let (Some(ids), Some(contents)) = (ids, contents) else {
            continue;
        };

        for i in 0..batch.num_rows() {
            if ids.value(i) == SEED_ID {
                continue;
            }
            let metadata: HashMap<String, String> = metadata_jsons
                .and_then(|m| serde_json::from_str(m.value(i)).ok())
                .unwrap_or_default();
            let score = distances.map(|d| (1.0 - d.value(i)).max(0.0)).unwrap_or(0.0);
            let mut metadata = metadata;
            metadata.insert("score".to_string(), score.to_string());

            records.push(VectorRecord {
                id: ids.value(i).to_string(),
                vector: Vec::new(),
                content: contents.value(i).to_string(),
                metadata,
            });
        }
    }
    records
}
