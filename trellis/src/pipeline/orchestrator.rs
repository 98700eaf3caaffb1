use std::sync::Arc;

use anyhow::anyhow;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::context::IngestContext;
use crate::embedding::collection_name;
use crate::error::{PipelineError, PipelineResult};
use crate::notify::{StateChangeEvent, publish_best_effort};
use crate::storage::{
    ChunkRecord, DocumentEnrichmentFields, DocumentRecord, EmbeddingStatus, TenantRecord,
    VectorRecord,
};

use super::state::{DocStatus, validate_transition};
use super::utils::compute_hash_id;

/// Checkpoint percentages reported with each state-change event.
fn stage_progress(status: DocStatus) -> u8 {
    match status {
        DocStatus::INGESTED => 0,
        DocStatus::EXTRACTING => 10,
        DocStatus::CLASSIFYING => 25,
        DocStatus::CHUNKING => 40,
        DocStatus::EMBEDDING => 55,
        DocStatus::GRAPH_SYNC => 75,
        DocStatus::READY => 100,
        DocStatus::FAILED | DocStatus::NEEDS_REVIEW => 100,
    }
}

/// Drives a single document through extraction, classification, chunking,
/// embedding and graph sync under CAS-guarded status checkpoints. Each
/// checkpoint commits before the next stage's work starts, so a crash
/// resumes from the last completed checkpoint. The orchestrator never
/// retries internally; failures are persisted and re-raised to the task
/// queue, which owns retry policy.
pub struct IngestionOrchestrator {
    ctx: Arc<IngestContext>,
}

impl IngestionOrchestrator {
    pub fn new(ctx: Arc<IngestContext>) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, document_id: &str, cancel: CancellationToken) -> PipelineResult<()> {
        let Some(mut doc) = self.ctx.metadata.get_document(document_id).await? else {
            return Err(PipelineError::Other(anyhow!(
                "document {document_id} not found"
            )));
        };

        // the CAS claim makes duplicate ingestion structurally impossible:
        // exactly one worker wins INGESTED -> EXTRACTING
        let owned = self
            .ctx
            .metadata
            .update_status(&doc.id, DocStatus::EXTRACTING, Some(DocStatus::INGESTED))
            .await?;
        if !owned {
            info!(document_id, "another worker owns this document, skipping");
            return Ok(());
        }
        self.emit(&doc, doc.status, DocStatus::EXTRACTING).await;
        doc.status = DocStatus::EXTRACTING;

        match self.execute(&mut doc, cancel).await {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(error = %err, document_id = %doc.id, "pipeline run failed");
                for (depth, cause) in anyhow_chain(&err).skip(1).enumerate() {
                    error!(document_id = %doc.id, cause_depth = depth + 1, cause = %cause, "caused by");
                }
                self.fail_document(&doc, &err).await;
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        doc: &mut DocumentRecord,
        cancel: CancellationToken,
    ) -> PipelineResult<()> {
        // EXTRACTING: raw bytes -> normalized text
        let bytes = self.ctx.objects.get_file(&doc.storage_path).await?;
        let content_type = doc
            .metadata
            .get("content_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let extraction = self
            .ctx
            .extraction
            .run(&bytes, &content_type, &doc.filename)
            .await?;
        self.checkpoint(doc, DocStatus::CLASSIFYING).await?;
        self.bail_if_cancelled(doc, &cancel)?;

        // CLASSIFYING: pick the chunking strategy for the domain
        let domain = self
            .ctx
            .classifier
            .classify(&extraction.content, &doc.filename)
            .await;
        self.ctx.metadata.set_domain(&doc.id, domain.as_str()).await?;
        doc.domain = Some(domain.as_str().to_string());
        self.checkpoint(doc, DocStatus::CHUNKING).await?;
        self.bail_if_cancelled(doc, &cancel)?;

        // CHUNKING: split, grade, persist the full chunk set
        let base = super::chunker::ChunkProfile {
            chunk_size: self.ctx.chunking.chunk_size,
            chunk_overlap: self.ctx.chunking.chunk_overlap,
        };
        let profile = domain.chunk_profile(&base);
        let title = doc
            .filename
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&doc.filename)
            .to_string();
        let chunk_data = self.ctx.chunker.chunk(
            &extraction.content,
            Some(&title),
            &extraction.hints,
            &profile,
        )?;
        if chunk_data.is_empty() {
            return Err(PipelineError::Other(anyhow!(
                "chunker produced no chunks for non-empty content"
            )));
        }

        let chunks: Vec<ChunkRecord> = chunk_data
            .iter()
            .map(|chunk| {
                let quality = self.ctx.quality.grade(&chunk.content);
                ChunkRecord {
                    id: compute_hash_id(
                        &format!("{}:{}:{}", doc.id, chunk.index, chunk.content),
                        "chunk-",
                    ),
                    document_id: doc.id.clone(),
                    tenant_id: doc.tenant_id.clone(),
                    index: chunk.index,
                    content: chunk.content.clone(),
                    token_count: chunk.token_count as i64,
                    embedding_status: EmbeddingStatus::PENDING,
                    metadata: json!({
                        "quality": quality,
                        "extractor": extraction.extractor_used,
                        "extraction_confidence": extraction.confidence,
                        "domain": domain.as_str(),
                    }),
                }
            })
            .collect();
        self.ctx.metadata.replace_chunks(&doc.id, chunks.clone()).await?;
        self.checkpoint(doc, DocStatus::EMBEDDING).await?;
        self.bail_if_cancelled(doc, &cancel)?;

        // EMBEDDING: vectorize, upsert, project chunk nodes, link neighbours
        let tenant = self
            .ctx
            .metadata
            .get_tenant(&doc.tenant_id)
            .await?
            .unwrap_or_else(|| default_tenant(&doc.tenant_id));
        let effective = self.ctx.embeddings.resolve(&tenant);
        let collection = collection_name(&doc.tenant_id, self.ctx.dedicated_collections);
        self.ctx
            .vectors
            .create_collection(&collection, effective.dimensions)
            .await?;

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let progress_cb = self.embedding_progress_cb(doc);
        let outcome = self
            .ctx
            .embeddings
            .embed_batch(&tenant, &texts, Some(&progress_cb))
            .await?;
        if outcome.vectors.len() != chunks.len() {
            return Err(PipelineError::consistency(format!(
                "embedded {} vectors for {} chunks",
                outcome.vectors.len(),
                chunks.len()
            )));
        }
        publish_best_effort(
            &self.ctx.notifier,
            "usage",
            serde_json::to_value(&outcome.usage).unwrap_or_default(),
        )
        .await;

        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(outcome.vectors.iter().zip(outcome.sparse.iter()))
            .map(|(chunk, (dense, sparse))| VectorRecord {
                chunk_id: chunk.id.clone(),
                document_id: doc.id.clone(),
                tenant_id: doc.tenant_id.clone(),
                content: chunk.content.clone(),
                embedding: dense.clone(),
                sparse_vector: if sparse.is_empty() {
                    None
                } else {
                    Some(sparse.clone())
                },
                metadata: json!({ "chunk_index": chunk.index }),
            })
            .collect();
        self.ctx.vectors.upsert_chunks(&collection, records).await?;

        let chunk_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        self.ctx
            .metadata
            .set_chunk_embedding_status(&chunk_ids, EmbeddingStatus::COMPLETED)
            .await?;

        self.ctx.enrichment.project_chunks(doc, &chunks).await?;
        for (chunk, vector) in chunks.iter().zip(outcome.vectors.iter()) {
            self.ctx
                .enrichment
                .link_similar(&collection, chunk, vector)
                .await?;
        }
        self.checkpoint(doc, DocStatus::GRAPH_SYNC).await?;
        self.bail_if_cancelled(doc, &cancel)?;

        // GRAPH_SYNC: per-chunk entity extraction, then best-effort
        // document-level enrichment
        let entity_cb = self.entity_progress_cb(doc);
        let stats = self
            .ctx
            .enrichment
            .sync_entities(doc, &chunks, Some(&entity_cb))
            .await?;
        info!(
            document_id = %doc.id,
            entities = stats.entities_written,
            relations = stats.relations_written,
            "graph sync finished"
        );

        match self.ctx.enricher.enrich(&extraction.content).await {
            Ok(enrichment) => {
                self.ctx
                    .metadata
                    .set_enrichment(
                        &doc.id,
                        DocumentEnrichmentFields {
                            summary: if enrichment.summary.is_empty() {
                                None
                            } else {
                                Some(enrichment.summary)
                            },
                            keywords: enrichment.keywords,
                            hashtags: enrichment.hashtags,
                        },
                    )
                    .await?;
            }
            Err(err) => {
                warn!(error = %err, document_id = %doc.id, "document enrichment failed, continuing");
            }
        }

        self.checkpoint(doc, DocStatus::READY).await?;
        Ok(())
    }

    /// Commit the next status via CAS and emit the state-change event.
    /// Losing the CAS mid-run means another writer touched a document this
    /// worker owns, which is a race bug by definition.
    async fn checkpoint(&self, doc: &mut DocumentRecord, next: DocStatus) -> PipelineResult<()> {
        validate_transition(doc.status, next)?;
        let owned = self
            .ctx
            .metadata
            .update_status(&doc.id, next, Some(doc.status))
            .await?;
        if !owned {
            return Err(PipelineError::InvalidTransition {
                from: doc.status,
                to: next,
            });
        }
        self.emit(doc, doc.status, next).await;
        doc.status = next;
        Ok(())
    }

    async fn emit(&self, doc: &DocumentRecord, old: DocStatus, new: DocStatus) {
        let event = StateChangeEvent {
            document_id: doc.id.clone(),
            old_status: old,
            new_status: new,
            tenant_id: doc.tenant_id.clone(),
            progress: stage_progress(new),
        };
        publish_best_effort(
            &self.ctx.notifier,
            &StateChangeEvent::channel(&doc.tenant_id),
            serde_json::to_value(&event).unwrap_or_default(),
        )
        .await;
    }

    async fn fail_document(&self, doc: &DocumentRecord, err: &PipelineError) {
        if let Err(persist_err) = self
            .ctx
            .metadata
            .set_error(&doc.id, Some(err.to_payload()))
            .await
        {
            error!(error = %persist_err, document_id = %doc.id, "failed to persist error payload");
        }
        match self
            .ctx
            .metadata
            .update_status(&doc.id, DocStatus::FAILED, None)
            .await
        {
            Ok(_) => self.emit(doc, doc.status, DocStatus::FAILED).await,
            Err(status_err) => {
                error!(error = %status_err, document_id = %doc.id, "failed to mark document as failed");
            }
        }
    }

    fn bail_if_cancelled(
        &self,
        doc: &DocumentRecord,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        if cancel.is_cancelled() {
            warn!(
                document_id = %doc.id,
                status = doc.status.as_str(),
                "run cancelled between stages; leaving document for recovery"
            );
            return Err(PipelineError::Other(anyhow!("run cancelled")));
        }
        Ok(())
    }

    /// Granular progress inside the EMBEDDING stage, published fire-and-
    /// forget so the sync callback never blocks the batch.
    fn embedding_progress_cb(
        &self,
        doc: &DocumentRecord,
    ) -> impl Fn(usize, usize) + Send + Sync + use<> {
        Self::sub_progress_cb(
            Arc::clone(&self.ctx.notifier),
            doc.id.clone(),
            doc.tenant_id.clone(),
            "EMBEDDING",
        )
    }

    fn entity_progress_cb(
        &self,
        doc: &DocumentRecord,
    ) -> impl Fn(usize, usize) + Send + Sync + use<> {
        Self::sub_progress_cb(
            Arc::clone(&self.ctx.notifier),
            doc.id.clone(),
            doc.tenant_id.clone(),
            "GRAPH_SYNC",
        )
    }

    fn sub_progress_cb(
        notifier: Arc<dyn crate::notify::Notifier>,
        document_id: String,
        tenant_id: String,
        stage: &'static str,
    ) -> impl Fn(usize, usize) + Send + Sync + use<> {
        move |completed: usize, total: usize| {
            let payload = json!({
                "document_id": document_id,
                "tenant_id": tenant_id,
                "stage": stage,
                "completed": completed,
                "total": total,
            });
            let channel = StateChangeEvent::channel(&tenant_id);
            let notifier = Arc::clone(&notifier);
            tokio::spawn(async move {
                let _ = notifier.publish(&channel, payload).await;
            });
        }
    }
}

/// Adapter between the task dispatch port and the orchestrator.
pub struct ProcessDocumentHandler {
    ctx: Arc<IngestContext>,
}

impl ProcessDocumentHandler {
    pub fn new(ctx: Arc<IngestContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl crate::dispatch::TaskHandler for ProcessDocumentHandler {
    async fn run(&self, args: Value, cancel: CancellationToken) -> anyhow::Result<()> {
        let document_id = args
            .get("document_id")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("task args missing document_id"))?;
        IngestionOrchestrator::new(Arc::clone(&self.ctx))
            .run(document_id, cancel)
            .await?;
        Ok(())
    }
}

fn default_tenant(tenant_id: &str) -> TenantRecord {
    TenantRecord {
        id: tenant_id.to_string(),
        name: tenant_id.to_string(),
        embedding_provider: None,
        embedding_model: None,
        embedding_dimensions: None,
        active: true,
    }
}

fn anyhow_chain(err: &PipelineError) -> impl Iterator<Item = &(dyn std::error::Error + 'static)> {
    let mut next: Option<&(dyn std::error::Error + 'static)> = Some(err);
    std::iter::from_fn(move || {
        let current = next?;
        next = current.source();
        Some(current)
    })
}
