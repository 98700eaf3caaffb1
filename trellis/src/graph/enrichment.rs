use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::json;
use tracing::warn;

use crate::ai::schemas::EntitiesRelationships;
use crate::config::GraphConfig;
use crate::pipeline::utils::compute_hash_id;
use crate::storage::{
    ChunkRecord, DocumentRecord, EdgeLabel, EdgeRecord, GraphMutation, GraphStore, NodeLabel,
    NodeRecord, SearchFilters, VectorIndex,
};

use super::extractor::EntityExtractor;

#[derive(Debug, Clone, Copy, Default)]
pub struct EntitySyncStats {
    pub chunks_processed: usize,
    pub entities_written: usize,
    pub relations_written: usize,
}

/// Materializes the derived graph projections for one document: chunk and
/// document nodes, entity/relationship edges from the extractor, and
/// similarity edges from the vector index.
pub struct GraphEnrichment {
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorIndex>,
    extractor: Arc<dyn EntityExtractor>,
    config: GraphConfig,
}

impl GraphEnrichment {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorIndex>,
        extractor: Arc<dyn EntityExtractor>,
        config: GraphConfig,
    ) -> Self {
        Self {
            graph,
            vectors,
            extractor,
            config,
        }
    }

    /// Entity node ids are tenant-scoped by normalized name, so the same
    /// entity mentioned across documents resolves to one node.
    fn entity_id(tenant_id: &str, name: &str) -> String {
        compute_hash_id(
            &format!("{}::{}", tenant_id, name.trim().to_lowercase()),
            "entity-",
        )
    }

    /// Write the document node plus one chunk node per chunk, each linked
    /// with a PartOf edge. Keyed by the relational ids, so re-runs merge.
    pub async fn project_chunks(
        &self,
        doc: &DocumentRecord,
        chunks: &[ChunkRecord],
    ) -> Result<()> {
        self.graph
            .execute_write(GraphMutation::MergeNode(NodeRecord {
                id: doc.id.clone(),
                label: NodeLabel::Document,
                tenant_id: doc.tenant_id.clone(),
                props: json!({
                    "filename": doc.filename,
                    "domain": doc.domain,
                }),
            }))
            .await?;

        for chunk in chunks {
            self.graph
                .execute_write(GraphMutation::MergeNode(NodeRecord {
                    id: chunk.id.clone(),
                    label: NodeLabel::Chunk,
                    tenant_id: chunk.tenant_id.clone(),
                    props: json!({
                        "document_id": chunk.document_id,
                        "chunk_index": chunk.index,
                        "token_count": chunk.token_count,
                    }),
                }))
                .await?;
            self.graph
                .execute_write(GraphMutation::MergeEdge(EdgeRecord {
                    from: chunk.id.clone(),
                    to: doc.id.clone(),
                    label: EdgeLabel::PartOf,
                    tenant_id: chunk.tenant_id.clone(),
                    props: json!({}),
                }))
                .await?;
        }
        Ok(())
    }

    /// After a chunk's vector lands in the index, link it to its nearest
    /// neighbours above the similarity threshold, bounded by the configured
    /// fan-out. Edges are symmetric and idempotent (unordered-pair
    /// identity), so re-running ingestion cannot duplicate them.
    pub async fn link_similar(
        &self,
        collection: &str,
        chunk: &ChunkRecord,
        embedding: &[f32],
    ) -> Result<usize> {
        let hits = self
            .vectors
            .search(
                collection,
                embedding,
                &chunk.tenant_id,
                self.config.similarity_max_neighbors + 1,
                SearchFilters {
                    document_id: None,
                    exclude_chunk: Some(chunk.id.clone()),
                },
            )
            .await?;

        let mut written = 0usize;
        for hit in hits
            .into_iter()
            .filter(|hit| hit.score >= self.config.similarity_threshold)
            .take(self.config.similarity_max_neighbors)
        {
            self.graph
                .execute_write(GraphMutation::MergeEdge(EdgeRecord {
                    from: chunk.id.clone(),
                    to: hit.chunk_id.clone(),
                    label: EdgeLabel::SimilarTo,
                    tenant_id: chunk.tenant_id.clone(),
                    props: json!({ "score": hit.score }),
                }))
                .await?;
            written += 1;
        }
        Ok(written)
    }

    /// Run the entity extractor over every chunk with bounded concurrency
    /// and write the merged entity/relationship projection. A failed
    /// extraction fails the stage; progress is reported per completed chunk.
    pub async fn sync_entities(
        &self,
        doc: &DocumentRecord,
        chunks: &[ChunkRecord],
        progress: Option<&(dyn Fn(usize, usize) + Send + Sync)>,
    ) -> Result<EntitySyncStats> {
        let total = chunks.len();
        let completed = AtomicUsize::new(0);

        let extractions: Vec<(String, EntitiesRelationships)> =
            stream::iter(chunks.iter().cloned())
                .map(|chunk| {
                    let extractor = Arc::clone(&self.extractor);
                    let completed = &completed;
                    async move {
                        let extraction = extractor.extract(&chunk.content).await?;
                        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                        if let Some(cb) = progress {
                            cb(done, total);
                        }
                        anyhow::Ok((chunk.id.clone(), extraction))
                    }
                })
                .buffer_unordered(self.config.entity_concurrency.max(1))
                .try_collect()
                .await?;

        let mut stats = EntitySyncStats {
            chunks_processed: extractions.len(),
            ..Default::default()
        };

        // normalized name -> node id, for resolving relationship endpoints
        let mut entity_index: HashMap<String, String> = HashMap::new();

        for (chunk_id, extraction) in &extractions {
            for entity in &extraction.entities {
                let key = entity.entity_name.trim().to_lowercase();
                if key.is_empty() {
                    continue;
                }
                let entity_id = entity_index
                    .entry(key)
                    .or_insert_with(|| Self::entity_id(&doc.tenant_id, &entity.entity_name))
                    .clone();

                self.graph
                    .execute_write(GraphMutation::MergeNode(NodeRecord {
                        id: entity_id.clone(),
                        label: NodeLabel::Entity,
                        tenant_id: doc.tenant_id.clone(),
                        props: json!({
                            "entity_name": entity.entity_name,
                            "entity_type": entity.entity_type,
                            "entity_description": entity.entity_description,
                        }),
                    }))
                    .await?;
                stats.entities_written += 1;

                self.graph
                    .execute_write(GraphMutation::MergeEdge(EdgeRecord {
                        from: entity_id,
                        to: chunk_id.clone(),
                        label: EdgeLabel::MentionedIn,
                        tenant_id: doc.tenant_id.clone(),
                        props: json!({ "document_id": doc.id }),
                    }))
                    .await?;
            }
        }

        for (chunk_id, extraction) in &extractions {
            for relationship in &extraction.relationships {
                let source_key = relationship.source_entity.trim().to_lowercase();
                let target_key = relationship.target_entity.trim().to_lowercase();
                let (Some(source_id), Some(target_id)) =
                    (entity_index.get(&source_key), entity_index.get(&target_key))
                else {
                    warn!(
                        doc_id = %doc.id,
                        chunk_id = %chunk_id,
                        source = %relationship.source_entity,
                        target = %relationship.target_entity,
                        "relationship references unknown entity"
                    );
                    continue;
                };
                if source_id == target_id {
                    continue;
                }

                self.graph
                    .execute_write(GraphMutation::MergeEdge(EdgeRecord {
                        from: source_id.clone(),
                        to: target_id.clone(),
                        label: EdgeLabel::RelatesTo,
                        tenant_id: doc.tenant_id.clone(),
                        props: json!({
                            "relationship_keywords": relationship.relationship_keywords,
                            "relationship_description": relationship.relationship_description,
                            "chunk_id": chunk_id,
                        }),
                    }))
                    .await?;
                stats.relations_written += 1;
            }
        }

        Ok(stats)
    }
}
