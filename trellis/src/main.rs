use std::{env, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use trellis::ai::LlmClient;
use trellis::config::load_config;
use trellis::context::IngestContext;
use trellis::dispatch::{TaskDispatcher, WorkerPool};
use trellis::embedding::{EmbeddingPipeline, EmbeddingRegistry, HttpEmbeddingProvider};
use trellis::graph::{GraphEnrichment, LlmEntityExtractor};
use trellis::notify::TracingNotifier;
use trellis::pipeline::enrich::LlmEnricher;
use trellis::pipeline::migration::PROCESS_DOCUMENT_TASK;
use trellis::pipeline::utils::TiktokenTokenizer;
use trellis::pipeline::{
    DocStatus, ExtractionChain, HeuristicClassifier, ProcessDocumentHandler, SemanticChunker,
    StaleRecoveryService,
};
use trellis::pipeline::quality::QualityScorer;
use trellis::storage::{
    FsObjectStore, JsonMetaConfig, JsonMetadataStorage, JsonVectorConfig, JsonVectorStorage,
    MemGraphConfig, MemGraphStorage, MetadataStore, StorageManager,
};

const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(error = %err, "Worker crashed");
        eprintln!("Worker crashed: {err}");
    }
}

async fn run() -> Result<()> {
    init_tracing();
    dotenv().ok();
    let api_key = env::var("OPENAI_API_KEY").context("OPENAI_API_KEY not set")?;

    let config = load_config()
        .await
        .context("failed to load application configuration")?;
    let working_dir = PathBuf::from(&config.working_dir);

    let metadata = Arc::new(JsonMetadataStorage::new(JsonMetaConfig {
        working_dir: working_dir.clone(),
        namespace: "documents".into(),
    }));
    let vectors = Arc::new(JsonVectorStorage::new(JsonVectorConfig {
        working_dir: working_dir.clone(),
        namespace: "chunks".into(),
    }));
    let graph = Arc::new(MemGraphStorage::new(MemGraphConfig {
        working_dir: working_dir.clone(),
        namespace: "knowledge".into(),
    }));
    let objects = Arc::new(FsObjectStore::new(working_dir.join("objects")));

    let mut storage_manager = StorageManager::new();
    storage_manager.register_metadata(metadata.clone());
    storage_manager.register_vector(vectors.clone());
    storage_manager.register_graph(graph.clone());
    storage_manager.initialize_all().await?;

    let llm_model = env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string());
    let llm = Arc::new(LlmClient::new(api_key.clone(), None, llm_model));

    let mut registry = EmbeddingRegistry::new(true);
    let batch_tokens = if config.embedding.provider == "local" {
        config.embedding.local_max_batch_tokens
    } else {
        config.embedding.max_batch_tokens
    };
    registry.register(Arc::new(HttpEmbeddingProvider::new(
        config.embedding.provider.clone(),
        config.embedding.model.clone(),
        config.embedding.dimensions,
        batch_tokens,
        config.embedding.base_url.clone(),
        api_key,
    )));
    let registry = Arc::new(registry);

    let tokenizer = Arc::new(TiktokenTokenizer::new()?);
    let embeddings = Arc::new(EmbeddingPipeline::new(
        Arc::clone(&registry),
        tokenizer.clone(),
        config.embedding.clone(),
    ));
    let enrichment = Arc::new(GraphEnrichment::new(
        graph.clone(),
        vectors.clone(),
        Arc::new(LlmEntityExtractor::new(Arc::clone(&llm))),
        config.graph.clone(),
    ));

    let ctx = Arc::new(IngestContext {
        chunking: config.chunking.clone(),
        dedicated_collections: config.embedding.dedicated_collections,
        metadata: metadata.clone(),
        vectors: vectors.clone(),
        graph: graph.clone(),
        objects,
        extraction: Arc::new(ExtractionChain::new(config.extraction.clone())),
        chunker: Arc::new(SemanticChunker::new(tokenizer)),
        quality: QualityScorer::new(),
        classifier: Arc::new(HeuristicClassifier::new()),
        embeddings,
        enrichment,
        enricher: Arc::new(LlmEnricher::new(llm)),
        notifier: Arc::new(TracingNotifier),
    });

    let pool = Arc::new(WorkerPool::new(
        config.worker.pool_size,
        config.worker.queue_depth,
    ));
    pool.register_handler(
        PROCESS_DOCUMENT_TASK,
        Arc::new(ProcessDocumentHandler::new(Arc::clone(&ctx))),
    )
    .await;
    let pool_handle = pool.start();

    // reconcile documents stranded by the previous run before taking new work
    let recovery = StaleRecoveryService::new(metadata.clone());
    let report = recovery.run().await?;
    info!(
        promoted = report.promoted.len(),
        failed = report.failed.len(),
        "startup recovery complete"
    );
    if let Ok(counts) = metadata.status_counts().await {
        info!(?counts, "document status counts");
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(
        config.worker.poll_interval_secs.max(1),
    ));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = enqueue_ingested(&*metadata, &pool).await {
                    warn!(error = %err, "failed to enqueue pending documents");
                }
            }
            _ = shutdown_signal() => break,
        }
    }

    info!("shutting down");
    pool.shutdown();
    let _ = pool_handle.await;
    if let Err(err) = storage_manager.finalize_all().await {
        warn!(error = %err, "failed to finalize storages");
    }
    Ok(())
}

async fn enqueue_ingested(metadata: &dyn MetadataStore, pool: &Arc<WorkerPool>) -> Result<()> {
    let pending = metadata
        .documents_by_status(&[DocStatus::INGESTED])
        .await?;
    for doc in pending {
        // the CAS claim makes duplicate dispatch harmless
        pool.dispatch(
            PROCESS_DOCUMENT_TASK,
            serde_json::json!({ "document_id": doc.id }),
        )
        .await?;
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                if stream.recv().await.is_some() {
                    info!("Received SIGTERM");
                }
            }
            Err(err) => warn!(error = %err, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received termination signal (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received termination signal (SIGTERM)");
        }
    }
}
