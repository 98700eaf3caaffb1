use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{info, warn};

use crate::context::IngestContext;
use crate::embedding::collection_name;
use crate::pipeline::state::DocStatus;
use crate::storage::DocumentRecord;

use super::utils::{compute_hash_id, content_hash, generate_track_id, summarize_content};

/// Upload registration and deletion use cases around the ingestion core.
pub struct RegistrationService {
    ctx: Arc<IngestContext>,
}

impl RegistrationService {
    pub fn new(ctx: Arc<IngestContext>) -> Self {
        Self { ctx }
    }

    /// Register uploaded bytes for a tenant. `(tenant_id, content_hash)` is
    /// unique: re-uploading identical bytes resolves to the existing
    /// document and uploads nothing.
    pub async fn register_document(
        &self,
        tenant_id: &str,
        filename: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<DocumentRecord> {
        let hash = content_hash(bytes);
        if let Some(existing) = self
            .ctx
            .metadata
            .find_by_content_hash(tenant_id, &hash)
            .await?
        {
            info!(
                tenant_id,
                document_id = %existing.id,
                "duplicate upload resolved to existing document"
            );
            return Ok(existing);
        }

        let doc_id = compute_hash_id(&format!("{tenant_id}:{hash}"), "doc-");
        let storage_path = format!("{tenant_id}/{doc_id}/{filename}");
        self.ctx
            .objects
            .upload_file(&storage_path, bytes)
            .await
            .with_context(|| format!("failed to store upload for {filename}"))?;

        let doc = DocumentRecord {
            id: doc_id.clone(),
            tenant_id: tenant_id.to_string(),
            filename: filename.to_string(),
            content_hash: hash,
            storage_path,
            status: DocStatus::INGESTED,
            domain: None,
            metadata: json!({
                "content_type": content_type,
                "size_bytes": bytes.len(),
                "content_preview": summarize_content(&String::from_utf8_lossy(
                    &bytes[..bytes.len().min(512)]
                )),
            }),
            summary: None,
            keywords: Vec::new(),
            hashtags: Vec::new(),
            error: None,
            folder_id: None,
            track_id: Some(generate_track_id("upload")),
            created_at: None,
            updated_at: None,
        };
        self.ctx.metadata.upsert_document(doc.clone()).await?;
        info!(tenant_id, document_id = %doc_id, filename, "document registered");
        Ok(doc)
    }

    /// Delete a document and purge its projections. Projection cleanup is
    /// deliberately lenient: failures are logged and left for orphan
    /// pruning, and never block deletion of the authoritative record.
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        let Some(doc) = self.ctx.metadata.get_document(document_id).await? else {
            return Ok(());
        };

        let collection = collection_name(&doc.tenant_id, self.ctx.dedicated_collections);
        if let Err(err) = self
            .ctx
            .vectors
            .delete_by_document(&collection, &doc.id, &doc.tenant_id)
            .await
        {
            warn!(error = %err, document_id, "failed to delete vector projection");
        }

        match self.ctx.metadata.chunks_by_document(&doc.id).await {
            Ok(chunks) => {
                for chunk in chunks {
                    if let Err(err) = self
                        .ctx
                        .graph
                        .execute_write(crate::storage::GraphMutation::DeleteNode {
                            id: chunk.id.clone(),
                            detach: true,
                        })
                        .await
                    {
                        warn!(error = %err, chunk_id = %chunk.id, "failed to delete chunk node");
                    }
                }
            }
            Err(err) => warn!(error = %err, document_id, "failed to list chunks for cleanup"),
        }
        if let Err(err) = self
            .ctx
            .graph
            .execute_write(crate::storage::GraphMutation::DeleteNode {
                id: doc.id.clone(),
                detach: true,
            })
            .await
        {
            warn!(error = %err, document_id, "failed to delete document node");
        }

        if let Err(err) = self.ctx.objects.delete_file(&doc.storage_path).await {
            warn!(error = %err, document_id, "failed to delete stored object");
        }

        self.ctx.metadata.delete_document(&doc.id).await?;
        info!(document_id, tenant_id = %doc.tenant_id, "document deleted");
        Ok(())
    }
}
