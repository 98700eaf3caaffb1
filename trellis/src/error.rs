use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::state::DocStatus;

/// One failed attempt inside an extraction chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorFailure {
    pub extractor: String,
    pub reason: String,
}

/// Structured error payload persisted on a failed document for UI display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("all extractors failed: {}", summarize_attempts(.attempts))]
    ExtractionExhausted { attempts: Vec<ExtractorFailure> },

    #[error("embedding provider {provider} quota exceeded: {message}")]
    QuotaExceeded { provider: String, message: String },

    #[error("provider {provider} transient failure: {message}")]
    TransientProvider { provider: String, message: String },

    #[error("invalid status transition {from:?} -> {to:?}")]
    InvalidTransition { from: DocStatus, to: DocStatus },

    #[error("cross-store consistency failure: {detail}")]
    ConsistencyFailure { detail: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ExtractionExhausted { .. } => "extraction_exhausted",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::TransientProvider { .. } => "transient_provider",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ConsistencyFailure { .. } => "consistency_failure",
            Self::Other(_) => "internal",
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::QuotaExceeded { provider, .. } | Self::TransientProvider { provider, .. } => {
                Some(provider.as_str())
            }
            _ => None,
        }
    }

    /// The serializable form persisted on `DocumentRecord::error`.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind().to_string(),
            provider: self.provider().map(|p| p.to_string()),
            message: self.to_string(),
        }
    }

    pub fn consistency(detail: impl Into<String>) -> Self {
        Self::ConsistencyFailure {
            detail: detail.into(),
        }
    }
}

fn summarize_attempts(attempts: &[ExtractorFailure]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.extractor, a.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
