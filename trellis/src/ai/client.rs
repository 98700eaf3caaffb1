use anyhow::Context;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::time::Duration;

/// Chat-completions client used for entity extraction, document enrichment
/// and domain classification. Responses are constrained to a JSON schema and
/// parsed into the caller's type.
pub struct LlmClient {
    http: Client,
    api_key: String,
    base: String,
    model: String,
}

impl LlmClient {
    pub fn new(api_key: String, base: Option<String>, model: String) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(120))
            .build()
            .expect("client");
        Self {
            http,
            api_key,
            base: base.unwrap_or_else(|| "https://api.openai.com".into()),
            model,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn post_json(&self, path: &str, body: &Value) -> reqwest::Result<reqwest::Response> {
        self.http
            .post(format!("{}/v1{}", self.base, path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
    }

    fn parse_structured<T: DeserializeOwned>(root: &Value) -> Option<T> {
        let content = root
            .get("choices")?
            .as_array()?
            .first()?
            .get("message")?
            .get("content")?;
        match content {
            Value::String(s) => serde_json::from_str(s).ok(),
            other => serde_json::from_value(other.clone()).ok(),
        }
    }

    /// Schema-constrained structured call with retry on 429/5xx; backoff is
    /// exponential with jitter.
    pub async fn structured<T: DeserializeOwned>(
        &self,
        system: &str,
        user: &str,
        schema_name: &str,
        schema: Value,
    ) -> anyhow::Result<T> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": schema_name,
                    "strict": true,
                    "schema": schema
                }
            }
        });

        let mut delay = Duration::from_millis(300);
        for attempt in 0..5 {
            let resp = self.post_json("/chat/completions", &body).await?;
            if resp.status().is_success() {
                let v: Value = resp
                    .json()
                    .await
                    .with_context(|| "error decoding chat completion response")?;
                if let Some(parsed) = Self::parse_structured(&v) {
                    return Ok(parsed);
                }
                anyhow::bail!("structured output not found in response");
            }

            if matches!(resp.status(), StatusCode::TOO_MANY_REQUESTS)
                || resp.status().is_server_error()
            {
                if attempt < 4 {
                    tokio::time::sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as f64 * 1.8) as u64)
                        + Duration::from_millis(fastrand::u64(0..250));
                    continue;
                }
            }

            let status = resp.status();
            let err_txt = resp.text().await.unwrap_or_default();
            anyhow::bail!("llm provider error {}: {}", status, err_txt);
        }
        anyhow::bail!("retries exhausted")
    }
}
