use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering as AtomicOrdering},
    },
};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::ErrorPayload;
use crate::pipeline::state::DocStatus;
use crate::pipeline::utils::now_rfc3339;

use super::io::{ensure_parent_dir, load_or_default, write_json_file};
use super::{
    ChunkRecord, DocumentEnrichmentFields, DocumentRecord, EmbeddingStatus, MetadataStore,
    StorageResult, TenantRecord,
};

#[derive(Clone, Debug)]
pub struct JsonMetaConfig {
    pub working_dir: PathBuf,
    pub namespace: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct MetaData {
    documents: HashMap<String, DocumentRecord>,
    chunks: HashMap<String, ChunkRecord>,
    tenants: HashMap<String, TenantRecord>,
}

/// JSON-file-backed metadata store. The write lock held across the
/// compare-and-set in `update_status` is what makes the CAS atomic for
/// every worker sharing this store.
pub struct JsonMetadataStorage {
    namespace: String,
    file_path: PathBuf,
    data: Arc<RwLock<MetaData>>,
    dirty: AtomicBool,
}

impl JsonMetadataStorage {
    pub fn new(config: JsonMetaConfig) -> Self {
        let JsonMetaConfig {
            working_dir,
            namespace,
        } = config;
        let file_path = working_dir.join(format!("meta_store_{}.json", namespace));
        Self {
            namespace,
            file_path,
            data: Arc::new(RwLock::new(MetaData::default())),
            dirty: AtomicBool::new(false),
        }
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, AtomicOrdering::SeqCst);
    }
}

#[async_trait]
impl MetadataStore for JsonMetadataStorage {
    async fn initialize(&self) -> StorageResult<()> {
        ensure_parent_dir(&self.file_path).await?;
        let data: MetaData = load_or_default(&self.file_path).await?;
        *self.data.write().await = data;
        self.dirty.store(false, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn finalize(&self) -> StorageResult<()> {
        self.sync_if_dirty().await
    }

    async fn upsert_document(&self, mut doc: DocumentRecord) -> StorageResult<()> {
        let now = now_rfc3339();
        if doc.created_at.is_none() {
            doc.created_at = Some(now.clone());
        }
        doc.updated_at = Some(now);
        {
            let mut guard = self.data.write().await;
            guard.documents.insert(doc.id.clone(), doc);
        }
        self.mark_dirty();
        self.sync_if_dirty().await
    }

    async fn get_document(&self, id: &str) -> StorageResult<Option<DocumentRecord>> {
        let guard = self.data.read().await;
        Ok(guard.documents.get(id).cloned())
    }

    async fn find_by_content_hash(
        &self,
        tenant_id: &str,
        content_hash: &str,
    ) -> StorageResult<Option<DocumentRecord>> {
        let guard = self.data.read().await;
        Ok(guard
            .documents
            .values()
            .find(|doc| doc.tenant_id == tenant_id && doc.content_hash == content_hash)
            .cloned())
    }

    async fn documents_by_status(
        &self,
        statuses: &[DocStatus],
    ) -> StorageResult<Vec<DocumentRecord>> {
        let guard = self.data.read().await;
        Ok(guard
            .documents
            .values()
            .filter(|doc| statuses.contains(&doc.status))
            .cloned()
            .collect())
    }

    async fn documents_by_tenant(&self, tenant_id: &str) -> StorageResult<Vec<DocumentRecord>> {
        let guard = self.data.read().await;
        Ok(guard
            .documents
            .values()
            .filter(|doc| doc.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn delete_document(&self, id: &str) -> StorageResult<()> {
        {
            let mut guard = self.data.write().await;
            guard.documents.remove(id);
            guard.chunks.retain(|_, chunk| chunk.document_id != id);
        }
        self.mark_dirty();
        self.sync_if_dirty().await
    }

    async fn update_status(
        &self,
        id: &str,
        new: DocStatus,
        expected_old: Option<DocStatus>,
    ) -> StorageResult<bool> {
        let owned = {
            let mut guard = self.data.write().await;
            match guard.documents.get_mut(id) {
                Some(doc) => {
                    if let Some(expected) = expected_old {
                        if doc.status != expected {
                            false
                        } else {
                            doc.status = new;
                            doc.updated_at = Some(now_rfc3339());
                            true
                        }
                    } else {
                        doc.status = new;
                        doc.updated_at = Some(now_rfc3339());
                        true
                    }
                }
                None => false,
            }
        };
        if owned {
            self.mark_dirty();
            self.sync_if_dirty().await?;
        }
        Ok(owned)
    }

    async fn set_domain(&self, id: &str, domain: &str) -> StorageResult<()> {
        {
            let mut guard = self.data.write().await;
            if let Some(doc) = guard.documents.get_mut(id) {
                doc.domain = Some(domain.to_string());
                doc.updated_at = Some(now_rfc3339());
            }
        }
        self.mark_dirty();
        self.sync_if_dirty().await
    }

    async fn set_error(&self, id: &str, payload: Option<ErrorPayload>) -> StorageResult<()> {
        {
            let mut guard = self.data.write().await;
            if let Some(doc) = guard.documents.get_mut(id) {
                doc.error = payload;
                doc.updated_at = Some(now_rfc3339());
            }
        }
        self.mark_dirty();
        self.sync_if_dirty().await
    }

    async fn set_enrichment(
        &self,
        id: &str,
        fields: DocumentEnrichmentFields,
    ) -> StorageResult<()> {
        {
            let mut guard = self.data.write().await;
            if let Some(doc) = guard.documents.get_mut(id) {
                doc.summary = fields.summary;
                doc.keywords = fields.keywords;
                doc.hashtags = fields.hashtags;
                doc.updated_at = Some(now_rfc3339());
            }
        }
        self.mark_dirty();
        self.sync_if_dirty().await
    }

    async fn replace_chunks(
        &self,
        document_id: &str,
        chunks: Vec<ChunkRecord>,
    ) -> StorageResult<()> {
        {
            let mut guard = self.data.write().await;
            guard
                .chunks
                .retain(|_, chunk| chunk.document_id != document_id);
            for chunk in chunks {
                guard.chunks.insert(chunk.id.clone(), chunk);
            }
        }
        self.mark_dirty();
        self.sync_if_dirty().await
    }

    async fn chunks_by_document(&self, document_id: &str) -> StorageResult<Vec<ChunkRecord>> {
        let guard = self.data.read().await;
        let mut chunks: Vec<ChunkRecord> = guard
            .chunks
            .values()
            .filter(|chunk| chunk.document_id == document_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|chunk| chunk.index);
        Ok(chunks)
    }

    async fn chunk_count(&self, document_id: &str) -> StorageResult<usize> {
        let guard = self.data.read().await;
        Ok(guard
            .chunks
            .values()
            .filter(|chunk| chunk.document_id == document_id)
            .count())
    }

    async fn delete_chunks_by_document(&self, document_id: &str) -> StorageResult<usize> {
        let removed = {
            let mut guard = self.data.write().await;
            let before = guard.chunks.len();
            guard
                .chunks
                .retain(|_, chunk| chunk.document_id != document_id);
            before - guard.chunks.len()
        };
        if removed > 0 {
            self.mark_dirty();
            self.sync_if_dirty().await?;
        }
        Ok(removed)
    }

    async fn delete_chunks_by_tenant(&self, tenant_id: &str) -> StorageResult<usize> {
        let removed = {
            let mut guard = self.data.write().await;
            let before = guard.chunks.len();
            guard.chunks.retain(|_, chunk| chunk.tenant_id != tenant_id);
            before - guard.chunks.len()
        };
        if removed > 0 {
            self.mark_dirty();
            self.sync_if_dirty().await?;
        }
        Ok(removed)
    }

    async fn set_chunk_embedding_status(
        &self,
        chunk_ids: &[String],
        status: EmbeddingStatus,
    ) -> StorageResult<()> {
        {
            let mut guard = self.data.write().await;
            for id in chunk_ids {
                if let Some(chunk) = guard.chunks.get_mut(id) {
                    chunk.embedding_status = status;
                }
            }
        }
        self.mark_dirty();
        self.sync_if_dirty().await
    }

    async fn upsert_tenant(&self, tenant: TenantRecord) -> StorageResult<()> {
        {
            let mut guard = self.data.write().await;
            guard.tenants.insert(tenant.id.clone(), tenant);
        }
        self.mark_dirty();
        self.sync_if_dirty().await
    }

    async fn get_tenant(&self, id: &str) -> StorageResult<Option<TenantRecord>> {
        let guard = self.data.read().await;
        Ok(guard.tenants.get(id).cloned())
    }

    async fn active_tenants(&self) -> StorageResult<Vec<TenantRecord>> {
        let guard = self.data.read().await;
        Ok(guard
            .tenants
            .values()
            .filter(|tenant| tenant.active)
            .cloned()
            .collect())
    }

    async fn status_counts(&self) -> StorageResult<HashMap<DocStatus, usize>> {
        let guard = self.data.read().await;
        let mut counts: HashMap<DocStatus, usize> = HashMap::new();
        for doc in guard.documents.values() {
            *counts.entry(doc.status).or_insert(0) += 1;
        }
        Ok(counts)
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
            .with_context(|| format!("failed to write meta store {}", self.namespace))?;
        Ok(())
    }
}
