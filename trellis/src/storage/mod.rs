use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorPayload;
use crate::pipeline::state::DocStatus;

pub mod graph;
pub mod graph_mem;
pub mod io;
pub mod json_meta;
pub mod json_vector;
pub mod manager;
pub mod object_fs;

pub use graph::{
    EdgeDirection, EdgeLabel, EdgeRecord, GraphMutation, GraphQuery, GraphReadResult, GraphStore,
    NodeLabel, NodeRecord, WriteSummary,
};
pub use graph_mem::{MemGraphConfig, MemGraphStorage};
pub use json_meta::{JsonMetaConfig, JsonMetadataStorage};
pub use json_vector::{JsonVectorConfig, JsonVectorStorage};
pub use manager::{StorageManager, StoragesStatus};
pub use object_fs::FsObjectStore;

pub type StorageResult<T> = Result<T>;

/// Embedding lifecycle of a single chunk, independent of the document's
/// pipeline status.
#[allow(non_camel_case_types)]
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum EmbeddingStatus {
    #[default]
    PENDING,
    COMPLETED,
    FAILED,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub tenant_id: String,
    pub filename: String,
    pub content_hash: String,
    pub storage_path: String,
    pub status: DocStatus,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "empty_object")]
    pub metadata: Value,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub error: Option<ErrorPayload>,
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub track_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub document_id: String,
    pub tenant_id: String,
    pub index: usize,
    pub content: String,
    pub token_count: i64,
    #[serde(default)]
    pub embedding_status: EmbeddingStatus,
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub embedding_provider: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub embedding_dimensions: Option<usize>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn default_true() -> bool {
    true
}

/// Enrichment fields written back onto a document after graph sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentEnrichmentFields {
    pub summary: Option<String>,
    pub keywords: Vec<String>,
    pub hashtags: Vec<String>,
}

/// Relational metadata port: Document/Chunk/Tenant rows plus the CAS status
/// update that is the pipeline's only cross-worker concurrency guard.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn initialize(&self) -> StorageResult<()>;
    async fn finalize(&self) -> StorageResult<()>;

    async fn upsert_document(&self, doc: DocumentRecord) -> StorageResult<()>;
    async fn get_document(&self, id: &str) -> StorageResult<Option<DocumentRecord>>;
    async fn find_by_content_hash(
        &self,
        tenant_id: &str,
        content_hash: &str,
    ) -> StorageResult<Option<DocumentRecord>>;
    async fn documents_by_status(
        &self,
        statuses: &[DocStatus],
    ) -> StorageResult<Vec<DocumentRecord>>;
    async fn documents_by_tenant(&self, tenant_id: &str) -> StorageResult<Vec<DocumentRecord>>;
    /// Deletes the document and cascades to its chunks.
    async fn delete_document(&self, id: &str) -> StorageResult<()>;

    /// Compare-and-swap status update. With `expected_old`, succeeds only if
    /// the stored status still matches; the returned bool says whether this
    /// caller owns the transition. With `None` the write is unconditional.
    async fn update_status(
        &self,
        id: &str,
        new: DocStatus,
        expected_old: Option<DocStatus>,
    ) -> StorageResult<bool>;

    async fn set_domain(&self, id: &str, domain: &str) -> StorageResult<()>;
    async fn set_error(&self, id: &str, payload: Option<ErrorPayload>) -> StorageResult<()>;
    async fn set_enrichment(
        &self,
        id: &str,
        fields: DocumentEnrichmentFields,
    ) -> StorageResult<()>;

    /// Replaces the document's full chunk set; indices must be contiguous.
    async fn replace_chunks(
        &self,
        document_id: &str,
        chunks: Vec<ChunkRecord>,
    ) -> StorageResult<()>;
    async fn chunks_by_document(&self, document_id: &str) -> StorageResult<Vec<ChunkRecord>>;
    async fn chunk_count(&self, document_id: &str) -> StorageResult<usize>;
    async fn delete_chunks_by_document(&self, document_id: &str) -> StorageResult<usize>;
    async fn delete_chunks_by_tenant(&self, tenant_id: &str) -> StorageResult<usize>;
    async fn set_chunk_embedding_status(
        &self,
        chunk_ids: &[String],
        status: EmbeddingStatus,
    ) -> StorageResult<()>;

    async fn upsert_tenant(&self, tenant: TenantRecord) -> StorageResult<()>;
    async fn get_tenant(&self, id: &str) -> StorageResult<Option<TenantRecord>>;
    async fn active_tenants(&self) -> StorageResult<Vec<TenantRecord>>;

    async fn status_counts(&self) -> StorageResult<HashMap<DocStatus, usize>>;

    async fn sync_if_dirty(&self) -> StorageResult<()>;
}

/// Sparse lexical representation stored alongside the dense vector.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub chunk_id: String,
    pub document_id: String,
    pub tenant_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub sparse_vector: Option<SparseVector>,
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub document_id: Option<String>,
    /// Excluded from results (a chunk is not its own neighbour).
    pub exclude_chunk: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    pub score: f32,
    pub content: String,
}

/// Vector index port. Collection names are resolved by the caller's naming
/// policy; the index itself is tenant-agnostic apart from record tags.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn initialize(&self) -> StorageResult<()>;
    async fn finalize(&self) -> StorageResult<()>;

    async fn create_collection(&self, collection: &str, dimensions: usize) -> StorageResult<()>;
    async fn drop_collection(&self, collection: &str) -> StorageResult<()>;
    async fn get_collection_dimensions(&self, collection: &str) -> StorageResult<Option<usize>>;

    async fn upsert_chunks(
        &self,
        collection: &str,
        records: Vec<VectorRecord>,
    ) -> StorageResult<()>;
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        tenant_id: &str,
        limit: usize,
        filters: SearchFilters,
    ) -> StorageResult<Vec<SearchHit>>;
    async fn delete_by_document(
        &self,
        collection: &str,
        document_id: &str,
        tenant_id: &str,
    ) -> StorageResult<usize>;
    async fn count(&self, collection: &str, tenant_id: &str) -> StorageResult<usize>;

    async fn sync_if_dirty(&self) -> StorageResult<()>;
}

/// Object storage port for raw document bytes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload_file(&self, path: &str, bytes: &[u8]) -> StorageResult<()>;
    async fn get_file(&self, path: &str) -> StorageResult<Vec<u8>>;
    async fn delete_file(&self, path: &str) -> StorageResult<()>;
    async fn exists(&self, path: &str) -> bool;
}
