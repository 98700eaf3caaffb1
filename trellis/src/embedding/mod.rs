use std::sync::Arc;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub mod provider;
pub mod sparse;

pub use provider::{EmbeddingProvider, HttpEmbeddingProvider, ProviderError};
pub use sparse::SparseEncoder;

use crate::config::EmbeddingConfig;
use crate::error::PipelineError;
use crate::pipeline::utils::Tokenizer;
use crate::storage::{SparseVector, TenantRecord};

/// The provider/model/dimensionality actually in effect for a tenant:
/// tenant-level configuration wins over system defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EffectiveEmbedding {
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
}

pub fn resolve_embedding(tenant: &TenantRecord, defaults: &EmbeddingConfig) -> EffectiveEmbedding {
    EffectiveEmbedding {
        provider: tenant
            .embedding_provider
            .clone()
            .unwrap_or_else(|| defaults.provider.clone()),
        model: tenant
            .embedding_model
            .clone()
            .unwrap_or_else(|| defaults.model.clone()),
        dimensions: tenant.embedding_dimensions.unwrap_or(defaults.dimensions),
    }
}

/// Active vector collection naming policy.
pub fn collection_name(tenant_id: &str, dedicated: bool) -> String {
    if dedicated {
        format!("tenant_{tenant_id}")
    } else {
        "chunks_shared".to_string()
    }
}

/// Provider inference used when migration is given only a model name.
pub fn infer_provider_from_model(model: &str) -> Option<&'static str> {
    if model.starts_with("text-embedding") {
        Some("openai")
    } else if model.starts_with("nomic-")
        || model.starts_with("all-minilm")
        || model.starts_with("mxbai-")
    {
        Some("local")
    } else {
        None
    }
}

/// Dimensionality of well-known models; unknown models are probed instead.
pub fn known_model_dimensions(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        "text-embedding-ada-002" => Some(1536),
        "nomic-embed-text" => Some(768),
        "all-minilm-l6-v2" => Some(384),
        _ => None,
    }
}

fn estimate_cost_usd(model: &str, tokens: usize) -> f64 {
    let per_million = match model {
        "text-embedding-3-small" => 0.02,
        "text-embedding-3-large" => 0.13,
        "text-embedding-ada-002" => 0.10,
        _ => 0.0,
    };
    per_million * tokens as f64 / 1_000_000.0
}

/// One failover attempt, kept as data so the policy is inspectable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub provider: String,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Usage metering record emitted per embedded batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub tenant_id: String,
    pub provider: String,
    pub model: String,
    pub total_tokens: usize,
    pub estimated_cost_usd: f64,
}

#[derive(Debug)]
pub struct EmbedOutcome {
    pub vectors: Vec<Vec<f32>>,
    pub sparse: Vec<SparseVector>,
    pub attempts: Vec<ProviderAttempt>,
    pub usage: UsageRecord,
}

/// Ranked provider registry. The effective provider is tried first; with
/// failover enabled, every other registered provider of matching
/// dimensionality follows in registration order. Failover is disabled in
/// controlled contexts (determinism tests, migration probes).
pub struct EmbeddingRegistry {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
    failover_enabled: bool,
}

impl EmbeddingRegistry {
    pub fn new(failover_enabled: bool) -> Self {
        Self {
            providers: Vec::new(),
            failover_enabled,
        }
    }

    pub fn register(&mut self, provider: Arc<dyn EmbeddingProvider>) {
        self.providers.push(provider);
    }

    pub fn failover_enabled(&self) -> bool {
        self.failover_enabled
    }

    pub fn find(&self, name: &str, model: &str) -> Option<Arc<dyn EmbeddingProvider>> {
        self.providers
            .iter()
            .find(|p| p.name() == name && p.model() == model)
            .or_else(|| self.providers.iter().find(|p| p.name() == name))
            .cloned()
    }

    /// The explicit fallback order for one effective configuration. Only
    /// providers with the matching dimensionality are eligible: failing over
    /// to a different dimensionality would corrupt the collection.
    pub fn ranked_for(&self, effective: &EffectiveEmbedding) -> Vec<Arc<dyn EmbeddingProvider>> {
        let mut ranked: Vec<Arc<dyn EmbeddingProvider>> = Vec::new();
        if let Some(primary) = self
            .providers
            .iter()
            .find(|p| {
                p.name() == effective.provider
                    && p.model() == effective.model
                    && p.dimensions() == effective.dimensions
            })
            .or_else(|| {
                self.providers
                    .iter()
                    .find(|p| p.name() == effective.provider && p.dimensions() == effective.dimensions)
            })
        {
            ranked.push(primary.clone());
        }
        if self.failover_enabled {
            for provider in &self.providers {
                if provider.dimensions() == effective.dimensions
                    && !ranked
                        .iter()
                        .any(|r| r.name() == provider.name() && r.model() == provider.model())
                {
                    ranked.push(provider.clone());
                }
            }
        }
        ranked
    }

    /// Resolve dimensionality by actually embedding a probe string; used by
    /// migration when the model is unrecognized.
    pub async fn probe_dimensions(&self, provider: &str, model: &str) -> Result<usize> {
        let provider = self
            .find(provider, model)
            .ok_or_else(|| anyhow!("no provider registered under name {provider}"))?;
        let vectors = provider
            .embed(&["dimensionality probe".to_string()])
            .await
            .map_err(|err| anyhow!("probe embedding failed: {err}"))?;
        vectors
            .first()
            .map(|v| v.len())
            .ok_or_else(|| anyhow!("probe embedding returned no vector"))
    }
}

/// Batched, provider-agnostic vectorization of chunk texts for one tenant.
pub struct EmbeddingPipeline {
    registry: Arc<EmbeddingRegistry>,
    tokenizer: Arc<dyn Tokenizer>,
    sparse: SparseEncoder,
    defaults: EmbeddingConfig,
}

impl EmbeddingPipeline {
    pub fn new(
        registry: Arc<EmbeddingRegistry>,
        tokenizer: Arc<dyn Tokenizer>,
        defaults: EmbeddingConfig,
    ) -> Self {
        Self {
            registry,
            tokenizer,
            sparse: SparseEncoder::new(),
            defaults,
        }
    }

    pub fn resolve(&self, tenant: &TenantRecord) -> EffectiveEmbedding {
        resolve_embedding(tenant, &self.defaults)
    }

    pub async fn embed_batch(
        &self,
        tenant: &TenantRecord,
        texts: &[String],
        progress: Option<&(dyn Fn(usize, usize) + Send + Sync)>,
    ) -> Result<EmbedOutcome, PipelineError> {
        let effective = self.resolve(tenant);
        let ranked = self.registry.ranked_for(&effective);
        if ranked.is_empty() {
            return Err(PipelineError::Other(anyhow!(
                "no embedding provider registered for {}/{} ({} dims)",
                effective.provider,
                effective.model,
                effective.dimensions
            )));
        }

        // the ceiling must hold for every provider the batch may reach
        let ceiling = ranked
            .iter()
            .map(|p| p.max_batch_tokens())
            .min()
            .unwrap_or(self.defaults.max_batch_tokens)
            .max(1);

        let token_counts: Vec<usize> = texts.iter().map(|t| self.tokenizer.count(t)).collect();
        let total_tokens: usize = token_counts.iter().sum();

        let mut batches: Vec<(usize, usize)> = Vec::new(); // [start, end)
        let mut start = 0usize;
        let mut running = 0usize;
        for (i, tokens) in token_counts.iter().enumerate() {
            if i > start && running + tokens > ceiling {
                batches.push((start, i));
                start = i;
                running = 0;
            }
            running += tokens;
        }
        if start < texts.len() {
            batches.push((start, texts.len()));
        }

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        let mut attempts: Vec<ProviderAttempt> = Vec::new();
        let mut served_by = effective.provider.clone();

        for (batch_start, batch_end) in batches {
            let slice = &texts[batch_start..batch_end];
            let mut batch_vectors: Option<Vec<Vec<f32>>> = None;
            let mut last_error: Option<ProviderError> = None;

            for provider in &ranked {
                match provider.embed(slice).await {
                    Ok(result) => {
                        attempts.push(ProviderAttempt {
                            provider: provider.name().to_string(),
                            succeeded: true,
                            error: None,
                        });
                        served_by = provider.name().to_string();
                        batch_vectors = Some(result);
                        break;
                    }
                    Err(err) => {
                        warn!(
                            provider = %provider.name(),
                            error = %err,
                            "embedding attempt failed"
                        );
                        attempts.push(ProviderAttempt {
                            provider: provider.name().to_string(),
                            succeeded: false,
                            error: Some(err.to_string()),
                        });
                        last_error = Some(err);
                    }
                }
            }

            match batch_vectors {
                Some(batch) => vectors.extend(batch),
                None => {
                    let err = last_error
                        .map(ProviderError::into_pipeline_error)
                        .unwrap_or_else(|| {
                            PipelineError::Other(anyhow!("embedding produced no result"))
                        });
                    return Err(err);
                }
            }

            if let Some(cb) = progress {
                cb(batch_end, texts.len());
            }
        }

        // lexical sparse vectors are independent of the dense provider;
        // failures degrade to empty vectors instead of aborting the batch
        let sparse: Vec<SparseVector> = texts.iter().map(|t| self.sparse.encode(t)).collect();

        let usage = UsageRecord {
            tenant_id: tenant.id.clone(),
            provider: served_by,
            model: effective.model.clone(),
            total_tokens,
            estimated_cost_usd: estimate_cost_usd(&effective.model, total_tokens),
        };
        debug!(
            tenant_id = %usage.tenant_id,
            tokens = usage.total_tokens,
            cost = usage.estimated_cost_usd,
            "embedding batch metered"
        );

        Ok(EmbedOutcome {
            vectors,
            sparse,
            attempts,
            usage,
        })
    }
}
