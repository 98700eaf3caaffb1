mod common;

use std::sync::{Arc, Mutex};

use trellis::config::EmbeddingConfig;
use trellis::embedding::{EmbeddingPipeline, EmbeddingRegistry};
use trellis::error::PipelineError;
use trellis::pipeline::utils::TiktokenTokenizer;
use trellis::storage::TenantRecord;

use common::{FailingProvider, FakeEmbeddingProvider};

fn tenant_for(provider: &str, model: &str, dims: usize) -> TenantRecord {
    TenantRecord {
        id: "t1".into(),
        name: "tenant".into(),
        embedding_provider: Some(provider.into()),
        embedding_model: Some(model.into()),
        embedding_dimensions: Some(dims),
        active: true,
    }
}

fn pipeline_with(registry: EmbeddingRegistry) -> EmbeddingPipeline {
    EmbeddingPipeline::new(
        Arc::new(registry),
        Arc::new(TiktokenTokenizer::new().expect("tokenizer")),
        EmbeddingConfig::default(),
    )
}

#[tokio::test]
async fn ranked_failover_records_every_attempt() -> anyhow::Result<()> {
    let mut registry = EmbeddingRegistry::new(true);
    registry.register(Arc::new(FailingProvider::quota("openai", "primary", 8)));
    registry.register(Arc::new(FakeEmbeddingProvider::new("backup", "secondary", 8)));
    let pipeline = pipeline_with(registry);

    let texts = vec!["first span".to_string(), "second span".to_string()];
    let outcome = pipeline
        .embed_batch(&tenant_for("openai", "primary", 8), &texts, None)
        .await
        .expect("failover should rescue the batch");

    assert_eq!(outcome.vectors.len(), 2);
    assert!(outcome.vectors.iter().all(|v| v.len() == 8));
    assert_eq!(outcome.attempts.len(), 2);
    assert_eq!(outcome.attempts[0].provider, "openai");
    assert!(!outcome.attempts[0].succeeded);
    assert!(outcome.attempts[0].error.is_some());
    assert_eq!(outcome.attempts[1].provider, "backup");
    assert!(outcome.attempts[1].succeeded);
    assert_eq!(outcome.usage.provider, "backup");
    Ok(())
}

#[tokio::test]
async fn disabled_failover_surfaces_quota_error_with_provider() -> anyhow::Result<()> {
    let mut registry = EmbeddingRegistry::new(false);
    registry.register(Arc::new(FailingProvider::quota("openai", "primary", 8)));
    // a healthy provider exists but failover is off
    registry.register(Arc::new(FakeEmbeddingProvider::new("backup", "secondary", 8)));
    let pipeline = pipeline_with(registry);

    let err = pipeline
        .embed_batch(
            &tenant_for("openai", "primary", 8),
            &["span".to_string()],
            None,
        )
        .await
        .expect_err("quota must surface");
    match err {
        PipelineError::QuotaExceeded { provider, .. } => assert_eq!(provider, "openai"),
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn batches_split_under_token_ceiling_with_progress() -> anyhow::Result<()> {
    let mut registry = EmbeddingRegistry::new(false);
    // tiny ceiling forces one text per request
    registry.register(Arc::new(FakeEmbeddingProvider::with_ceiling(
        "fake", "fake-small", 8, 16,
    )));
    let pipeline = pipeline_with(registry);

    let texts: Vec<String> = (0..5)
        .map(|i| format!("chunk number {i} with a handful of words"))
        .collect();

    let progress: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&progress);
    let cb = move |completed: usize, total: usize| {
        seen.lock().unwrap().push((completed, total));
    };

    let outcome = pipeline
        .embed_batch(&tenant_for("fake", "fake-small", 8), &texts, Some(&cb))
        .await?;
    assert_eq!(outcome.vectors.len(), texts.len());
    assert_eq!(outcome.sparse.len(), texts.len());
    assert!(outcome.sparse.iter().all(|s| !s.is_empty()));

    let calls = progress.lock().unwrap();
    assert!(calls.len() > 1, "ceiling should force multiple sub-batches");
    assert!(calls.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(calls.last().unwrap(), &(texts.len(), texts.len()));

    assert!(outcome.usage.total_tokens > 0);
    Ok(())
}
