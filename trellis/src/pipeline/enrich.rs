use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::ai::LlmClient;
use crate::ai::schemas::{DocumentEnrichment, document_enrichment_schema};

const ENRICHMENT_SYSTEM_PROMPT: &str = "You summarize documents for a search index. \
Produce a short summary, topical keywords and hashtags for the given document. \
Always return JSON matching the provided schema.";

const ENRICHMENT_INPUT_BUDGET: usize = 24_000;

/// Document-level enrichment port (summary/keywords/hashtags). Callers treat
/// failures as non-fatal.
#[async_trait]
pub trait DocumentEnricher: Send + Sync {
    async fn enrich(&self, content: &str) -> Result<DocumentEnrichment>;
}

pub struct LlmEnricher {
    client: Arc<LlmClient>,
}

impl LlmEnricher {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DocumentEnricher for LlmEnricher {
    async fn enrich(&self, content: &str) -> Result<DocumentEnrichment> {
        let input: String = content.chars().take(ENRICHMENT_INPUT_BUDGET).collect();
        self.client
            .structured(
                ENRICHMENT_SYSTEM_PROMPT,
                &input,
                "document_enrichment",
                document_enrichment_schema(),
            )
            .await
    }
}

/// Disabled enricher for deployments without an LLM configured.
#[derive(Debug, Default, Clone)]
pub struct NoopEnricher;

#[async_trait]
impl DocumentEnricher for NoopEnricher {
    async fn enrich(&self, _content: &str) -> Result<DocumentEnrichment> {
        Ok(DocumentEnrichment::default())
    }
}
