use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::time::Duration;

use crate::error::PipelineError;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("quota exceeded for {provider}: {message}")]
    Quota { provider: String, message: String },
    #[error("transient failure from {provider}: {message}")]
    Transient { provider: String, message: String },
    #[error("{provider} failed: {message}")]
    Fatal { provider: String, message: String },
}

impl ProviderError {
    pub fn provider(&self) -> &str {
        match self {
            Self::Quota { provider, .. }
            | Self::Transient { provider, .. }
            | Self::Fatal { provider, .. } => provider,
        }
    }

    pub fn into_pipeline_error(self) -> PipelineError {
        match self {
            Self::Quota { provider, message } => PipelineError::QuotaExceeded { provider, message },
            Self::Transient { provider, message } | Self::Fatal { provider, message } => {
                PipelineError::TransientProvider { provider, message }
            }
        }
    }
}

/// Dense embedding provider port. Implementations own their request ceiling
/// so the pipeline can split batches appropriately.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn dimensions(&self) -> usize;
    /// Token ceiling per embed request; local providers advertise a smaller
    /// one.
    fn max_batch_tokens(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// OpenAI-compatible embeddings endpoint (`POST /v1/embeddings`), used both
/// for the hosted default and for local gateways that speak the same
/// protocol. 429 and 5xx retry with exponential backoff and jitter before
/// surfacing as quota/transient errors.
pub struct HttpEmbeddingProvider {
    name: String,
    model: String,
    dimensions: usize,
    max_batch_tokens: usize,
    base: String,
    api_key: String,
    http: reqwest::Client,
}

impl HttpEmbeddingProvider {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
        max_batch_tokens: usize,
        base: Option<String>,
        api_key: String,
    ) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(120))
            .build()
            .expect("client");
        Self {
            name: name.into(),
            model: model.into(),
            dimensions,
            max_batch_tokens,
            base: base.unwrap_or_else(|| "https://api.openai.com".into()),
            api_key,
            http,
        }
    }

    fn quota(&self, message: impl Into<String>) -> ProviderError {
        ProviderError::Quota {
            provider: self.name.clone(),
            message: message.into(),
        }
    }

    fn transient(&self, message: impl Into<String>) -> ProviderError {
        ProviderError::Transient {
            provider: self.name.clone(),
            message: message.into(),
        }
    }

    fn fatal(&self, message: impl Into<String>) -> ProviderError {
        ProviderError::Fatal {
            provider: self.name.clone(),
            message: message.into(),
        }
    }

    fn parse_embeddings(&self, payload: &Value) -> Result<Vec<Vec<f32>>, ProviderError> {
        let data = payload
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| self.fatal("response missing data array"))?;

        let mut rows: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
        for item in data {
            let index = item
                .get("index")
                .and_then(Value::as_u64)
                .ok_or_else(|| self.fatal("embedding row missing index"))? as usize;
            let embedding = item
                .get("embedding")
                .and_then(Value::as_array)
                .ok_or_else(|| self.fatal("embedding row missing vector"))?
                .iter()
                .map(|v| v.as_f64().unwrap_or_default() as f32)
                .collect();
            rows.push((index, embedding));
        }
        rows.sort_by_key(|(index, _)| *index);
        Ok(rows.into_iter().map(|(_, embedding)| embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_batch_tokens(&self) -> usize {
        self.max_batch_tokens
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({
            "model": self.model,
            "input": texts,
        });

        let mut delay = Duration::from_millis(300);
        let mut last_retryable: Option<ProviderError> = None;
        for attempt in 0..4 {
            let response = match self
                .http
                .post(format!("{}/v1/embeddings", self.base))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    last_retryable = Some(self.transient(format!("network error: {err}")));
                    tokio::time::sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as f64 * 1.8) as u64)
                        + Duration::from_millis(fastrand::u64(0..250));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let payload: Value = response
                    .json()
                    .await
                    .map_err(|err| self.fatal(format!("invalid response body: {err}")))?;
                let vectors = self.parse_embeddings(&payload)?;
                if vectors.len() != texts.len() {
                    return Err(self.fatal(format!(
                        "expected {} embeddings, got {}",
                        texts.len(),
                        vectors.len()
                    )));
                }
                return Ok(vectors);
            }

            let text = response.text().await.unwrap_or_default();
            if status == StatusCode::TOO_MANY_REQUESTS {
                last_retryable = Some(self.quota(text));
            } else if status.is_server_error() {
                last_retryable = Some(self.transient(format!("{status}: {text}")));
            } else {
                return Err(self.fatal(format!("{status}: {text}")));
            }

            if attempt < 3 {
                tokio::time::sleep(delay).await;
                delay = Duration::from_millis((delay.as_millis() as f64 * 1.8) as u64)
                    + Duration::from_millis(fastrand::u64(0..250));
            }
        }

        Err(last_retryable.unwrap_or_else(|| self.transient("retries exhausted")))
    }
}
