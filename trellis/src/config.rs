use std::{env, path::PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::fs;
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "config/app.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub working_dir: String,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub graph: GraphConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub pool_size: usize,
    pub queue_depth: usize,
    /// Seconds between scans for INGESTED documents.
    pub poll_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            queue_depth: 64,
            poll_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    /// System default provider; tenants may override.
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    pub base_url: Option<String>,
    /// Dedicated per-tenant collections vs one shared collection.
    pub dedicated_collections: bool,
    /// Token ceiling per embedding request for remote providers.
    pub max_batch_tokens: usize,
    /// Reduced ceiling applied to locally hosted providers.
    pub local_max_batch_tokens: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            base_url: None,
            dedicated_collections: true,
            max_batch_tokens: 120_000,
            local_max_batch_tokens: 8_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    /// Enables the layout-aware pdf fallback parser.
    pub pdf_fallback: bool,
    /// Enables the remote OCR fallback.
    pub ocr_enabled: bool,
    pub ocr_endpoint: Option<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            pdf_fallback: true,
            ocr_enabled: false,
            ocr_endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    pub similarity_threshold: f32,
    pub similarity_max_neighbors: usize,
    /// Concurrent per-chunk entity extraction calls.
    pub entity_concurrency: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            similarity_max_neighbors: 5,
            entity_concurrency: 8,
        }
    }
}

pub async fn load_config() -> Result<AppConfig> {
    let path = config_path();
    let contents = fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: AppConfig = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    info!(path = %path.display(), "configuration loaded from disk");
    Ok(config)
}

fn config_path() -> PathBuf {
    env::var("APP_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}
