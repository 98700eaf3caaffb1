use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::config::EmbeddingConfig;
use crate::dispatch::TaskDispatcher;
use crate::embedding::{
    EffectiveEmbedding, EmbeddingRegistry, collection_name, infer_provider_from_model,
    known_model_dimensions, resolve_embedding,
};
use crate::graph::GraphMaintenance;
use crate::storage::{MetadataStore, VectorIndex};

use super::state::DocStatus;

pub const PROCESS_DOCUMENT_TASK: &str = "process_document";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationRequest {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub dimensions: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantCompatibility {
    pub tenant_id: String,
    pub configured: EffectiveEmbedding,
    pub collection_dimensions: Option<usize>,
    pub compatible: bool,
}

#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    pub tenant_id: String,
    pub embedding: EffectiveEmbedding,
    pub documents_requeued: usize,
    pub task_ids: Vec<String>,
}

/// Re-indexes a tenant's corpus when its embedding configuration changes:
/// locks in the new config, rebuilds the vector collection, purges derived
/// data, and re-enqueues every document for the orchestrator.
pub struct ReindexService {
    metadata: Arc<dyn MetadataStore>,
    vectors: Arc<dyn VectorIndex>,
    maintenance: GraphMaintenance,
    registry: Arc<EmbeddingRegistry>,
    dispatcher: Arc<dyn TaskDispatcher>,
    defaults: EmbeddingConfig,
    dedicated_collections: bool,
}

impl ReindexService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        vectors: Arc<dyn VectorIndex>,
        maintenance: GraphMaintenance,
        registry: Arc<EmbeddingRegistry>,
        dispatcher: Arc<dyn TaskDispatcher>,
        defaults: EmbeddingConfig,
        dedicated_collections: bool,
    ) -> Self {
        Self {
            metadata,
            vectors,
            maintenance,
            registry,
            dispatcher,
            defaults,
            dedicated_collections,
        }
    }

    /// Report, per active tenant, whether the configured dimensionality
    /// matches what the vector collection actually materialized.
    pub async fn check_compatibility(&self) -> Result<Vec<TenantCompatibility>> {
        let tenants = self.metadata.active_tenants().await?;
        let mut statuses = Vec::with_capacity(tenants.len());

        for tenant in tenants {
            let configured = resolve_embedding(&tenant, &self.defaults);
            let collection = collection_name(&tenant.id, self.dedicated_collections);
            let collection_dimensions =
                self.vectors.get_collection_dimensions(&collection).await?;
            let compatible = collection_dimensions
                .is_none_or(|dims| dims == configured.dimensions);
            statuses.push(TenantCompatibility {
                tenant_id: tenant.id,
                configured,
                collection_dimensions,
                compatible,
            });
        }
        Ok(statuses)
    }

    /// Resolve the requested configuration: infer the provider from the
    /// model name when only a model was given, and resolve dimensionality
    /// from the known-model table or by embedding a probe string.
    async fn resolve_request(
        &self,
        tenant_id: &str,
        request: &MigrationRequest,
    ) -> Result<EffectiveEmbedding> {
        let tenant = self
            .metadata
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| anyhow!("tenant {tenant_id} not found"))?;

        let model = request
            .model
            .clone()
            .or(tenant.embedding_model)
            .unwrap_or_else(|| self.defaults.model.clone());
        let provider = request
            .provider
            .clone()
            .or_else(|| infer_provider_from_model(&model).map(str::to_string))
            .or(tenant.embedding_provider)
            .unwrap_or_else(|| self.defaults.provider.clone());
        let dimensions = match request.dimensions.or_else(|| known_model_dimensions(&model)) {
            Some(dimensions) => dimensions,
            None => self
                .registry
                .probe_dimensions(&provider, &model)
                .await
                .with_context(|| format!("failed to probe dimensions for {model}"))?,
        };

        Ok(EffectiveEmbedding {
            provider,
            model,
            dimensions,
        })
    }

    pub async fn migrate_tenant(
        &self,
        tenant_id: &str,
        request: MigrationRequest,
    ) -> Result<MigrationOutcome> {
        let embedding = self.resolve_request(tenant_id, &request).await?;
        info!(
            tenant_id,
            provider = %embedding.provider,
            model = %embedding.model,
            dimensions = embedding.dimensions,
            "starting embedding migration"
        );

        // lock the new config onto the tenant record first
        let mut tenant = self
            .metadata
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| anyhow!("tenant {tenant_id} not found"))?;
        tenant.embedding_provider = Some(embedding.provider.clone());
        tenant.embedding_model = Some(embedding.model.clone());
        tenant.embedding_dimensions = Some(embedding.dimensions);
        self.metadata.upsert_tenant(tenant).await?;

        // drop and PRE-create the collection; ingestion workers must never
        // race to create it on first write
        let collection = collection_name(tenant_id, self.dedicated_collections);
        self.vectors.drop_collection(&collection).await?;
        self.vectors
            .create_collection(&collection, embedding.dimensions)
            .await?;

        // purge derived projections
        self.maintenance.delete_tenant_data(tenant_id).await?;
        let removed_chunks = self.metadata.delete_chunks_by_tenant(tenant_id).await?;
        info!(tenant_id, removed_chunks, "tenant chunk rows deleted");

        // only now that the new collection exists, release the documents
        // back into the pipeline
        let documents = self.metadata.documents_by_tenant(tenant_id).await?;
        let mut task_ids = Vec::with_capacity(documents.len());
        for doc in &documents {
            self.metadata
                .update_status(&doc.id, DocStatus::INGESTED, None)
                .await?;
            self.metadata.set_error(&doc.id, None).await?;
            let task_id = self
                .dispatcher
                .dispatch(PROCESS_DOCUMENT_TASK, json!({ "document_id": doc.id }))
                .await?;
            task_ids.push(task_id);
        }

        info!(
            tenant_id,
            documents = documents.len(),
            "embedding migration dispatched"
        );
        Ok(MigrationOutcome {
            tenant_id: tenant_id.to_string(),
            embedding,
            documents_requeued: documents.len(),
            task_ids,
        })
    }

    /// Revoke dispatched re-processing tasks. Already-executing tasks are
    /// terminated best-effort; they are not guaranteed to stop instantly.
    pub async fn cancel_migration(&self, task_ids: &[String], terminate: bool) -> Result<()> {
        for task_id in task_ids {
            if let Err(err) = self.dispatcher.cancel_task(task_id, terminate).await {
                warn!(error = %err, task_id, "failed to revoke migration task");
            }
        }
        Ok(())
    }
}
