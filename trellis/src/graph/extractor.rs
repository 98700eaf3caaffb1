use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::ai::LlmClient;
use crate::ai::schemas::{EntitiesRelationships, entities_relationships_schema};

const EXTRACTION_SYSTEM_PROMPT: &str = "You are a knowledge-graph extraction engine. \
Identify the entities mentioned in the given text span and the relationships between them. \
Use only information present in the text. Always return JSON matching the provided schema.";

/// Entity/relationship extraction port, invoked once per chunk.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<EntitiesRelationships>;
}

/// LLM-backed extractor constrained to the entity/relationship JSON schema.
pub struct LlmEntityExtractor {
    client: Arc<LlmClient>,
}

impl LlmEntityExtractor {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EntityExtractor for LlmEntityExtractor {
    async fn extract(&self, text: &str) -> Result<EntitiesRelationships> {
        self.client
            .structured(
                EXTRACTION_SYSTEM_PROMPT,
                text,
                "entities_relationships",
                entities_relationships_schema(),
            )
            .await
    }
}
