mod common;

use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use trellis::config::ChunkingConfig;
use trellis::embedding::{EmbeddingRegistry, collection_name};
use trellis::graph::GraphMaintenance;
use trellis::pipeline::{
    DocStatus, IngestionOrchestrator, MigrationRequest, RegistrationService, ReindexService,
};
use trellis::storage::{GraphQuery, GraphStore, MetadataStore, VectorIndex};

use common::{FakeEmbeddingProvider, RecordingDispatcher, TestHarness};

const NEW_DIMS: usize = 16;

async fn ingest_one(harness: &TestHarness) -> anyhow::Result<String> {
    harness
        .metadata
        .upsert_tenant(common::test_tenant("t1"))
        .await?;
    let registration = RegistrationService::new(harness.ctx.clone());
    let doc = registration
        .register_document(
            "t1",
            "corpus.txt",
            common::twelve_hundred_words().as_bytes(),
            "text/plain",
        )
        .await?;
    IngestionOrchestrator::new(harness.ctx.clone())
        .run(&doc.id, CancellationToken::new())
        .await?;
    Ok(doc.id)
}

fn reindex_service(
    harness: &TestHarness,
    dispatcher: Arc<RecordingDispatcher>,
) -> ReindexService {
    // the migration registry knows the target model; failover stays off
    let mut registry = EmbeddingRegistry::new(false);
    registry.register(Arc::new(FakeEmbeddingProvider::new(
        "fake",
        "fake-large",
        NEW_DIMS,
    )));

    ReindexService::new(
        harness.metadata.clone(),
        harness.vectors.clone(),
        GraphMaintenance::new(harness.graph.clone()),
        Arc::new(registry),
        dispatcher,
        harness.embedding_defaults.clone(),
        true,
    )
}

#[tokio::test]
async fn migrate_tenant_rebuilds_collection_and_requeues_documents() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let harness = common::harness(
        &dir,
        ChunkingConfig {
            chunk_size: 600,
            chunk_overlap: 50,
        },
    )
    .await;
    let doc_id = ingest_one(&harness).await?;
    assert!(harness.metadata.chunk_count(&doc_id).await? > 0);

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let service = reindex_service(&harness, dispatcher.clone());

    // dimensions resolved by probing the unrecognized model
    let outcome = service
        .migrate_tenant(
            "t1",
            MigrationRequest {
                provider: None,
                model: Some("fake-large".into()),
                dimensions: None,
            },
        )
        .await?;
    assert_eq!(outcome.embedding.provider, "fake");
    assert_eq!(outcome.embedding.dimensions, NEW_DIMS);
    assert_eq!(outcome.documents_requeued, 1);

    // the new config is locked onto the tenant record
    let tenant = harness.metadata.get_tenant("t1").await?.unwrap();
    assert_eq!(tenant.embedding_model.as_deref(), Some("fake-large"));
    assert_eq!(tenant.embedding_dimensions, Some(NEW_DIMS));

    // the collection was pre-created with the new dimensionality
    let collection = collection_name("t1", true);
    assert_eq!(
        harness.vectors.get_collection_dimensions(&collection).await?,
        Some(NEW_DIMS)
    );
    assert_eq!(harness.vectors.count(&collection, "t1").await?, 0);

    // no chunk rows and no graph nodes survive from before the migration
    assert_eq!(harness.metadata.chunk_count(&doc_id).await?, 0);
    let remaining_nodes = harness
        .graph
        .execute_read(GraphQuery::CountNodes {
            tenant_id: Some("t1".into()),
            label: None,
        })
        .await?
        .count();
    assert_eq!(remaining_nodes, 0);

    // every tenant document was reset and re-enqueued
    let doc = harness.metadata.get_document(&doc_id).await?.unwrap();
    assert_eq!(doc.status, DocStatus::INGESTED);
    assert!(doc.error.is_none());
    let dispatched = dispatcher.dispatched.lock().await;
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].0, "process_document");
    assert_eq!(outcome.task_ids.len(), 1);
    Ok(())
}

#[tokio::test]
async fn compatibility_report_flags_dimension_drift() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let harness = common::harness(
        &dir,
        ChunkingConfig {
            chunk_size: 600,
            chunk_overlap: 50,
        },
    )
    .await;
    ingest_one(&harness).await?;

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let service = reindex_service(&harness, dispatcher);

    let statuses = service.check_compatibility().await?;
    let status = statuses
        .iter()
        .find(|s| s.tenant_id == "t1")
        .expect("tenant reported");
    assert!(status.compatible);
    assert_eq!(status.collection_dimensions, Some(common::TEST_DIMS));

    // drift: tenant config changes without re-indexing the collection
    let mut tenant = harness.metadata.get_tenant("t1").await?.unwrap();
    tenant.embedding_dimensions = Some(NEW_DIMS);
    harness.metadata.upsert_tenant(tenant).await?;

    let statuses = service.check_compatibility().await?;
    let status = statuses.iter().find(|s| s.tenant_id == "t1").unwrap();
    assert!(!status.compatible);
    Ok(())
}

#[tokio::test]
async fn cancel_migration_revokes_every_dispatched_task() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let harness = common::harness(&dir, ChunkingConfig::default()).await;
    harness
        .metadata
        .upsert_tenant(common::test_tenant("t1"))
        .await?;

    // two pending documents, no pipeline runs needed
    let registration = RegistrationService::new(harness.ctx.clone());
    registration
        .register_document("t1", "a.txt", b"first body", "text/plain")
        .await?;
    registration
        .register_document("t1", "b.txt", b"second body", "text/plain")
        .await?;

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let service = reindex_service(&harness, dispatcher.clone());
    let outcome = service
        .migrate_tenant(
            "t1",
            MigrationRequest {
                provider: None,
                model: Some("fake-large".into()),
                dimensions: Some(NEW_DIMS),
            },
        )
        .await?;
    assert_eq!(outcome.task_ids.len(), 2);

    service.cancel_migration(&outcome.task_ids, true).await?;
    let cancelled = dispatcher.cancelled.lock().await;
    assert_eq!(cancelled.len(), 2);
    assert!(cancelled.iter().all(|(_, terminate)| *terminate));
    Ok(())
}
