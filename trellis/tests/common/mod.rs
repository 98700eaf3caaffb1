#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::Mutex;

use trellis::ai::schemas::{EntitiesRelationships, ExtractedEntity, ExtractedRelationship};
use trellis::config::{ChunkingConfig, EmbeddingConfig, ExtractionConfig, GraphConfig};
use trellis::context::IngestContext;
use trellis::dispatch::TaskDispatcher;
use trellis::embedding::{EmbeddingPipeline, EmbeddingProvider, EmbeddingRegistry, ProviderError};
use trellis::graph::{EntityExtractor, GraphEnrichment};
use trellis::notify::CapturingNotifier;
use trellis::pipeline::enrich::NoopEnricher;
use trellis::pipeline::quality::QualityScorer;
use trellis::pipeline::utils::TiktokenTokenizer;
use trellis::pipeline::{ExtractionChain, HeuristicClassifier, SemanticChunker};
use trellis::storage::{
    FsObjectStore, JsonMetaConfig, JsonMetadataStorage, JsonVectorConfig, JsonVectorStorage,
    MemGraphConfig, MemGraphStorage, ObjectStore, StorageManager, TenantRecord,
};

pub const TEST_DIMS: usize = 8;

/// Deterministic embedding provider: the vector is a function of the text
/// bytes only, so runs are reproducible.
pub struct FakeEmbeddingProvider {
    name: String,
    model: String,
    dims: usize,
    ceiling: usize,
    pub calls: AtomicUsize,
}

impl FakeEmbeddingProvider {
    pub fn new(name: &str, model: &str, dims: usize) -> Self {
        Self::with_ceiling(name, model, dims, 50_000)
    }

    pub fn with_ceiling(name: &str, model: &str, dims: usize, ceiling: usize) -> Self {
        Self {
            name: name.to_string(),
            model: model.to_string(),
            dims,
            ceiling,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbeddingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn max_batch_tokens(&self) -> usize {
        self.ceiling
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| {
                let seed: u32 = text.bytes().map(u32::from).sum();
                (0..self.dims)
                    .map(|i| ((seed.wrapping_add(i as u32 * 31)) % 97) as f32 / 97.0 + 0.01)
                    .collect()
            })
            .collect())
    }
}

/// Always fails with the configured error kind; used for failover tests.
pub struct FailingProvider {
    name: String,
    model: String,
    dims: usize,
    quota: bool,
}

impl FailingProvider {
    pub fn quota(name: &str, model: &str, dims: usize) -> Self {
        Self {
            name: name.to_string(),
            model: model.to_string(),
            dims,
            quota: true,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FailingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn max_batch_tokens(&self) -> usize {
        50_000
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if self.quota {
            Err(ProviderError::Quota {
                provider: self.name.clone(),
                message: "simulated quota exhaustion".into(),
            })
        } else {
            Err(ProviderError::Transient {
                provider: self.name.clone(),
                message: "simulated outage".into(),
            })
        }
    }
}

/// Extracts one entity per sentence-initial capitalized word, plus a
/// relation between the first two entities. Deterministic and offline.
pub struct FakeEntityExtractor;

#[async_trait]
impl EntityExtractor for FakeEntityExtractor {
    async fn extract(&self, text: &str) -> Result<EntitiesRelationships> {
        let mut entities: Vec<ExtractedEntity> = Vec::new();
        for word in text.split_whitespace() {
            let cleaned: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
            if cleaned.len() >= 4
                && cleaned.chars().next().is_some_and(|c| c.is_uppercase())
                && !entities.iter().any(|e| e.entity_name == cleaned)
            {
                entities.push(ExtractedEntity {
                    entity_name: cleaned,
                    entity_type: "Concept".into(),
                    entity_description: "mentioned in text".into(),
                });
            }
            if entities.len() >= 3 {
                break;
            }
        }

        let relationships = if entities.len() >= 2 {
            vec![ExtractedRelationship {
                source_entity: entities[0].entity_name.clone(),
                target_entity: entities[1].entity_name.clone(),
                relationship_keywords: vec!["co-occurrence".into()],
                relationship_description: "appear in the same span".into(),
            }]
        } else {
            Vec::new()
        };

        Ok(EntitiesRelationships {
            entities,
            relationships,
        })
    }
}

/// Object store wrapper counting uploads, for dedup assertions.
pub struct CountingObjectStore {
    inner: FsObjectStore,
    pub uploads: AtomicUsize,
}

impl CountingObjectStore {
    pub fn new(inner: FsObjectStore) -> Self {
        Self {
            inner,
            uploads: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ObjectStore for CountingObjectStore {
    async fn upload_file(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.inner.upload_file(path, bytes).await
    }

    async fn get_file(&self, path: &str) -> Result<Vec<u8>> {
        self.inner.get_file(path).await
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.inner.delete_file(path).await
    }

    async fn exists(&self, path: &str) -> bool {
        self.inner.exists(path).await
    }
}

/// Records dispatches without executing anything.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub dispatched: Mutex<Vec<(String, Value)>>,
    pub cancelled: Mutex<Vec<(String, bool)>>,
}

#[async_trait]
impl TaskDispatcher for RecordingDispatcher {
    async fn dispatch(&self, task_name: &str, args: Value) -> Result<String> {
        let mut dispatched = self.dispatched.lock().await;
        dispatched.push((task_name.to_string(), args));
        Ok(format!("task-{}", dispatched.len()))
    }

    async fn cancel_task(&self, task_id: &str, terminate: bool) -> Result<()> {
        self.cancelled
            .lock()
            .await
            .push((task_id.to_string(), terminate));
        Ok(())
    }
}

pub struct TestHarness {
    pub ctx: Arc<IngestContext>,
    pub metadata: Arc<JsonMetadataStorage>,
    pub vectors: Arc<JsonVectorStorage>,
    pub graph: Arc<MemGraphStorage>,
    pub objects: Arc<CountingObjectStore>,
    pub notifier: Arc<CapturingNotifier>,
    pub embedding_defaults: EmbeddingConfig,
}

pub fn test_tenant(id: &str) -> TenantRecord {
    TenantRecord {
        id: id.to_string(),
        name: format!("{id} tenant"),
        embedding_provider: Some("fake".into()),
        embedding_model: Some("fake-small".into()),
        embedding_dimensions: Some(TEST_DIMS),
        active: true,
    }
}

/// Wire a full context over temp-dir storages with deterministic fakes for
/// every external collaborator. Failover is disabled: determinism context.
pub async fn harness(dir: &TempDir, chunking: ChunkingConfig) -> TestHarness {
    let working_dir = dir.path().to_path_buf();

    let metadata = Arc::new(JsonMetadataStorage::new(JsonMetaConfig {
        working_dir: working_dir.clone(),
        namespace: "test".into(),
    }));
    let vectors = Arc::new(JsonVectorStorage::new(JsonVectorConfig {
        working_dir: working_dir.clone(),
        namespace: "test".into(),
    }));
    let graph = Arc::new(MemGraphStorage::new(MemGraphConfig {
        working_dir: working_dir.clone(),
        namespace: "test".into(),
    }));
    let objects = Arc::new(CountingObjectStore::new(FsObjectStore::new(
        working_dir.join("objects"),
    )));

    let mut manager = StorageManager::new();
    manager.register_metadata(metadata.clone());
    manager.register_vector(vectors.clone());
    manager.register_graph(graph.clone());
    manager.initialize_all().await.expect("initialize storages");

    let embedding_defaults = EmbeddingConfig {
        provider: "fake".into(),
        model: "fake-small".into(),
        dimensions: TEST_DIMS,
        ..EmbeddingConfig::default()
    };

    let mut registry = EmbeddingRegistry::new(false);
    registry.register(Arc::new(FakeEmbeddingProvider::new(
        "fake",
        "fake-small",
        TEST_DIMS,
    )));
    let registry = Arc::new(registry);

    let tokenizer = Arc::new(TiktokenTokenizer::new().expect("tokenizer"));
    let embeddings = Arc::new(EmbeddingPipeline::new(
        Arc::clone(&registry),
        tokenizer.clone(),
        embedding_defaults.clone(),
    ));

    let graph_config = GraphConfig {
        similarity_threshold: 0.5,
        similarity_max_neighbors: 3,
        entity_concurrency: 4,
    };
    let enrichment = Arc::new(GraphEnrichment::new(
        graph.clone(),
        vectors.clone(),
        Arc::new(FakeEntityExtractor),
        graph_config,
    ));

    let notifier = Arc::new(CapturingNotifier::new());

    let ctx = Arc::new(IngestContext {
        chunking,
        dedicated_collections: true,
        metadata: metadata.clone(),
        vectors: vectors.clone(),
        graph: graph.clone(),
        objects: objects.clone(),
        extraction: Arc::new(ExtractionChain::new(ExtractionConfig::default())),
        chunker: Arc::new(SemanticChunker::new(tokenizer)),
        quality: QualityScorer::new(),
        classifier: Arc::new(HeuristicClassifier::new()),
        embeddings,
        enrichment,
        enricher: Arc::new(NoopEnricher),
        notifier: notifier.clone(),
    });

    TestHarness {
        ctx,
        metadata,
        vectors,
        graph,
        objects,
        notifier,
        embedding_defaults,
    }
}

/// A 1,200-word plain-text document: 12 paragraphs of 100 words.
pub fn twelve_hundred_words() -> String {
    (0..12)
        .map(|p| {
            (0..100)
                .map(|w| format!("Section{p}token{w}"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
