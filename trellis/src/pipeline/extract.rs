use std::{sync::Arc, time::Instant};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::ExtractionConfig;
use crate::error::{ExtractorFailure, PipelineError};

use super::chunker::StructuralHint;

/// Normalized output of every extractor in a chain.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub content: String,
    pub tables: Vec<String>,
    pub images: Vec<String>,
    pub metadata: Value,
    pub extractor_used: String,
    pub confidence: f32,
    pub extraction_time_ms: u64,
    /// Named spans for structure-aware chunking (populated for source code).
    pub hints: Vec<StructuralHint>,
}

impl ExtractionResult {
    fn text(content: String, extractor: &str, confidence: f32) -> Self {
        Self {
            content,
            tables: Vec::new(),
            images: Vec::new(),
            metadata: json!({}),
            extractor_used: extractor.to_string(),
            confidence,
            extraction_time_ms: 0,
            hints: Vec::new(),
        }
    }
}

#[async_trait]
pub trait ContentExtractor: Send + Sync {
    fn name(&self) -> &str;
    async fn extract(&self, bytes: &[u8]) -> Result<ExtractionResult>;
}

fn utf8_content(bytes: &[u8]) -> Result<String> {
    if bytes.is_empty() {
        return Err(anyhow!("file content is empty"));
    }
    let text = std::str::from_utf8(bytes).map_err(|_| anyhow!("file is not valid UTF-8"))?;
    if text.trim().is_empty() {
        return Err(anyhow!("file contains only whitespace"));
    }
    Ok(text.to_string())
}

/// Strict UTF-8 text extractor; the fast primary for text mime types.
#[derive(Debug, Default, Clone)]
pub struct PlainTextExtractor;

#[async_trait]
impl ContentExtractor for PlainTextExtractor {
    fn name(&self) -> &str {
        "plain_text"
    }

    async fn extract(&self, bytes: &[u8]) -> Result<ExtractionResult> {
        let content = utf8_content(bytes)?;
        Ok(ExtractionResult::text(content, self.name(), 1.0))
    }
}

/// Markdown-aware extractor: same text path, plus pipe tables collected into
/// the `tables` field.
#[derive(Debug, Default, Clone)]
pub struct MarkdownExtractor;

#[async_trait]
impl ContentExtractor for MarkdownExtractor {
    fn name(&self) -> &str {
        "markdown"
    }

    async fn extract(&self, bytes: &[u8]) -> Result<ExtractionResult> {
        let content = utf8_content(bytes)?;

        let mut tables = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        for line in content.lines() {
            if line.trim_start().starts_with('|') {
                current.push(line);
            } else if !current.is_empty() {
                tables.push(current.join("\n"));
                current.clear();
            }
        }
        if !current.is_empty() {
            tables.push(current.join("\n"));
        }

        let mut result = ExtractionResult::text(content, self.name(), 1.0);
        result.metadata = json!({ "tables_found": tables.len() });
        result.tables = tables;
        Ok(result)
    }
}

/// Source-code extractor: harvests top-level definition spans as structural
/// hints so the chunker can emit one chunk per definition.
#[derive(Debug, Default, Clone)]
pub struct CodeSpanExtractor;

const DEFINITION_PREFIXES: &[&str] = &[
    "fn ",
    "pub fn ",
    "async fn ",
    "pub async fn ",
    "class ",
    "def ",
    "async def ",
    "function ",
    "export function ",
];

impl CodeSpanExtractor {
    fn is_definition(line: &str) -> bool {
        DEFINITION_PREFIXES
            .iter()
            .any(|prefix| line.starts_with(prefix))
    }
}

#[async_trait]
impl ContentExtractor for CodeSpanExtractor {
    fn name(&self) -> &str {
        "code_span"
    }

    async fn extract(&self, bytes: &[u8]) -> Result<ExtractionResult> {
        let content = utf8_content(bytes)?;

        let mut hints: Vec<StructuralHint> = Vec::new();
        let mut span: Vec<&str> = Vec::new();
        let mut name = String::new();
        for line in content.lines() {
            if Self::is_definition(line) {
                if !span.is_empty() && !name.is_empty() {
                    hints.push(StructuralHint {
                        name: std::mem::take(&mut name),
                        span: span.join("\n"),
                    });
                    span.clear();
                }
                name = line.trim().trim_end_matches('{').trim().to_string();
            }
            if !name.is_empty() {
                span.push(line);
            }
        }
        if !span.is_empty() && !name.is_empty() {
            hints.push(StructuralHint {
                name,
                span: span.join("\n"),
            });
        }

        if hints.is_empty() {
            return Err(anyhow!("no top-level definitions found"));
        }

        let mut result = ExtractionResult::text(content, self.name(), 0.9);
        result.metadata = json!({ "definitions_found": hints.len() });
        result.hints = hints;
        Ok(result)
    }
}

/// Layout-aware PDF text extractor; parsing runs on the blocking pool.
#[derive(Debug, Default, Clone)]
pub struct PdfExtractor;

#[async_trait]
impl ContentExtractor for PdfExtractor {
    fn name(&self) -> &str {
        "pdf"
    }

    async fn extract(&self, bytes: &[u8]) -> Result<ExtractionResult> {
        if bytes.is_empty() {
            return Err(anyhow!("file content is empty"));
        }
        let owned = bytes.to_vec();
        let content = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem(&owned).map_err(|err| anyhow!("{err}"))
        })
        .await
        .map_err(|err| anyhow!("pdf parse task failed: {err}"))??;

        if content.trim().is_empty() {
            return Err(anyhow!("pdf contains no extractable text"));
        }
        Ok(ExtractionResult::text(content, self.name(), 0.8))
    }
}

/// Remote OCR fallback for scans and image-only documents.
pub struct RemoteOcrExtractor {
    endpoint: String,
    http: reqwest::Client,
}

impl RemoteOcrExtractor {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ContentExtractor for RemoteOcrExtractor {
    fn name(&self) -> &str {
        "remote_ocr"
    }

    async fn extract(&self, bytes: &[u8]) -> Result<ExtractionResult> {
        let response = self
            .http
            .post(&self.endpoint)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|err| anyhow!("ocr endpoint unreachable: {err}"))?;

        if !response.status().is_success() {
            return Err(anyhow!("ocr endpoint returned {}", response.status()));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| anyhow!("invalid ocr response: {err}"))?;
        let content = payload
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("ocr response missing text field"))?
            .to_string();
        if content.trim().is_empty() {
            return Err(anyhow!("ocr produced empty text"));
        }

        let confidence = payload
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.6) as f32;
        Ok(ExtractionResult::text(content, self.name(), confidence))
    }
}

const CODE_EXTENSIONS: &[&str] = &["rs", "py", "js", "ts", "go", "java", "c", "cpp", "rb"];

/// Builds the ordered fallback chain per mime type and runs it. Every
/// extractor failure is caught and recorded; exhaustion is a hard error,
/// never a silent empty result.
pub struct ExtractionChain {
    config: ExtractionConfig,
}

impl ExtractionChain {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    fn chain_for(&self, content_type: &str, filename: &str) -> Vec<Arc<dyn ContentExtractor>> {
        let mime = if content_type.is_empty() || content_type == "application/octet-stream" {
            mime_guess::from_path(filename)
                .first_raw()
                .unwrap_or(content_type)
                .to_string()
        } else {
            content_type.to_string()
        };
        let extension = filename
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        let mut chain: Vec<Arc<dyn ContentExtractor>> = Vec::new();
        if mime == "application/pdf" || extension == "pdf" {
            chain.push(Arc::new(PdfExtractor));
            if self.config.pdf_fallback {
                // lenient re-parse of the same bytes as raw text, for pdfs
                // that are actually mislabelled text
                chain.push(Arc::new(PlainTextExtractor));
            }
        } else if mime == "text/markdown" || extension == "md" {
            chain.push(Arc::new(MarkdownExtractor));
            chain.push(Arc::new(PlainTextExtractor));
        } else if CODE_EXTENSIONS.contains(&extension.as_str()) {
            chain.push(Arc::new(CodeSpanExtractor));
            chain.push(Arc::new(PlainTextExtractor));
        } else {
            chain.push(Arc::new(PlainTextExtractor));
        }

        if self.config.ocr_enabled {
            if let Some(endpoint) = self.config.ocr_endpoint.clone() {
                chain.push(Arc::new(RemoteOcrExtractor::new(endpoint)));
            }
        }
        chain
    }

    pub async fn run(
        &self,
        bytes: &[u8],
        content_type: &str,
        filename: &str,
    ) -> Result<ExtractionResult, PipelineError> {
        let chain = self.chain_for(content_type, filename);
        let mut attempts: Vec<ExtractorFailure> = Vec::new();

        for extractor in chain {
            let started = Instant::now();
            match extractor.extract(bytes).await {
                Ok(mut result) => {
                    result.extraction_time_ms = started.elapsed().as_millis() as u64;
                    debug!(
                        extractor = %result.extractor_used,
                        elapsed_ms = result.extraction_time_ms,
                        "extraction succeeded"
                    );
                    return Ok(result);
                }
                Err(err) => {
                    warn!(extractor = %extractor.name(), error = %err, file = %filename, "extractor failed, trying next");
                    attempts.push(ExtractorFailure {
                        extractor: extractor.name().to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        Err(PipelineError::ExtractionExhausted { attempts })
    }
}
