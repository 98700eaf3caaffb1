use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering as AtomicOrdering},
    },
};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::io::{ensure_parent_dir, load_or_default, write_json_file};
use super::{SearchFilters, SearchHit, StorageResult, VectorIndex, VectorRecord};

#[derive(Clone, Debug)]
pub struct JsonVectorConfig {
    pub working_dir: PathBuf,
    pub namespace: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Collection {
    dimensions: usize,
    records: HashMap<String, VectorRecord>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct VectorData {
    collections: HashMap<String, Collection>,
}

/// JSON-file-backed vector index with brute-force cosine search. Records are
/// keyed by chunk id, so re-upserting an already-indexed chunk overwrites in
/// place.
pub struct JsonVectorStorage {
    namespace: String,
    file_path: PathBuf,
    data: Arc<RwLock<VectorData>>,
    dirty: AtomicBool,
}

impl JsonVectorStorage {
    pub fn new(config: JsonVectorConfig) -> Self {
        let JsonVectorConfig {
            working_dir,
            namespace,
        } = config;
        let file_path = working_dir.join(format!("vector_store_{}.json", namespace));
        Self {
            namespace,
            file_path,
            data: Arc::new(RwLock::new(VectorData::default())),
            dirty: AtomicBool::new(false),
        }
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, AtomicOrdering::SeqCst);
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[async_trait]
impl VectorIndex for JsonVectorStorage {
    async fn initialize(&self) -> StorageResult<()> {
        ensure_parent_dir(&self.file_path).await?;
        let data: VectorData = load_or_default(&self.file_path).await?;
        *self.data.write().await = data;
        self.dirty.store(false, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn finalize(&self) -> StorageResult<()> {
        self.sync_if_dirty().await
    }

    async fn create_collection(&self, collection: &str, dimensions: usize) -> StorageResult<()> {
        {
            let mut guard = self.data.write().await;
            guard
                .collections
                .entry(collection.to_string())
                .or_insert_with(|| Collection {
                    dimensions,
                    records: HashMap::new(),
                });
        }
        self.mark_dirty();
        self.sync_if_dirty().await
    }

    async fn drop_collection(&self, collection: &str) -> StorageResult<()> {
        let removed = {
            let mut guard = self.data.write().await;
            guard.collections.remove(collection).is_some()
        };
        if removed {
            self.mark_dirty();
            self.sync_if_dirty().await?;
        }
        Ok(())
    }

    async fn get_collection_dimensions(&self, collection: &str) -> StorageResult<Option<usize>> {
        let guard = self.data.read().await;
        Ok(guard.collections.get(collection).map(|c| c.dimensions))
    }

    async fn upsert_chunks(
        &self,
        collection: &str,
        records: Vec<VectorRecord>,
    ) -> StorageResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        {
            let mut guard = self.data.write().await;
            let coll = guard
                .collections
                .get_mut(collection)
                .ok_or_else(|| anyhow!("vector collection {collection} does not exist"))?;
            for record in records {
                if record.embedding.len() != coll.dimensions {
                    return Err(anyhow!(
                        "embedding dimensionality {} does not match collection {} ({})",
                        record.embedding.len(),
                        collection,
                        coll.dimensions
                    ));
                }
                coll.records.insert(record.chunk_id.clone(), record);
            }
        }
        self.mark_dirty();
        self.sync_if_dirty().await
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        tenant_id: &str,
        limit: usize,
        filters: SearchFilters,
    ) -> StorageResult<Vec<SearchHit>> {
        let guard = self.data.read().await;
        let Some(coll) = guard.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<SearchHit> = coll
            .records
            .values()
            .filter(|record| record.tenant_id == tenant_id)
            .filter(|record| {
                filters
                    .document_id
                    .as_deref()
                    .is_none_or(|doc| record.document_id == doc)
            })
            .filter(|record| {
                filters
                    .exclude_chunk
                    .as_deref()
                    .is_none_or(|chunk| record.chunk_id != chunk)
            })
            .map(|record| SearchHit {
                chunk_id: record.chunk_id.clone(),
                document_id: record.document_id.clone(),
                score: cosine_similarity(vector, &record.embedding),
                content: record.content.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_by_document(
        &self,
        collection: &str,
        document_id: &str,
        tenant_id: &str,
    ) -> StorageResult<usize> {
        let removed = {
            let mut guard = self.data.write().await;
            let Some(coll) = guard.collections.get_mut(collection) else {
                return Ok(0);
            };
            let before = coll.records.len();
            coll.records
                .retain(|_, r| !(r.document_id == document_id && r.tenant_id == tenant_id));
            before - coll.records.len()
        };
        if removed > 0 {
            self.mark_dirty();
            self.sync_if_dirty().await?;
        }
        Ok(removed)
    }

    async fn count(&self, collection: &str, tenant_id: &str) -> StorageResult<usize> {
        let guard = self.data.read().await;
        Ok(guard
            .collections
            .get(collection)
            .map(|coll| {
                coll.records
                    .values()
                    .filter(|r| r.tenant_id == tenant_id)
                    .count()
            })
            .unwrap_or(0))
    }

    async fn sync_if_dirty(&self) -> StorageResult<()> {
        if !self.dirty.swap(false, AtomicOrdering::SeqCst) {
            return Ok(());
        }

        let snapshot = {
            let guard = self.data.read().await;
            guard.clone()
        };

        write_json_file(&self.file_path, &snapshot)
            .await
            .with_context(|| format!("failed to write vector store {}", self.namespace))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_handles_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0]), 0.0);
        let sim = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]);
        assert!((sim - 1.0).abs() < 1e-6);
    }
}
