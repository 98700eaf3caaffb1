use std::sync::Arc;

use crate::config::ChunkingConfig;
use crate::embedding::EmbeddingPipeline;
use crate::graph::GraphEnrichment;
use crate::notify::Notifier;
use crate::pipeline::chunker::Chunker;
use crate::pipeline::classifier::DomainClassifier;
use crate::pipeline::enrich::DocumentEnricher;
use crate::pipeline::extract::ExtractionChain;
use crate::pipeline::quality::QualityScorer;
use crate::storage::{GraphStore, MetadataStore, ObjectStore, VectorIndex};

/// Everything a pipeline run needs, wired once at startup and passed in
/// explicitly. There is no process-wide "current provider" state anywhere.
pub struct IngestContext {
    pub chunking: ChunkingConfig,
    pub dedicated_collections: bool,

    pub metadata: Arc<dyn MetadataStore>,
    pub vectors: Arc<dyn VectorIndex>,
    pub graph: Arc<dyn GraphStore>,
    pub objects: Arc<dyn ObjectStore>,

    pub extraction: Arc<ExtractionChain>,
    pub chunker: Arc<dyn Chunker>,
    pub quality: QualityScorer,
    pub classifier: Arc<dyn DomainClassifier>,
    pub embeddings: Arc<EmbeddingPipeline>,
    pub enrichment: Arc<GraphEnrichment>,
    pub enricher: Arc<dyn DocumentEnricher>,
    pub notifier: Arc<dyn Notifier>,
}
