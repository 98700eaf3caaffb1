use anyhow::Result;
use sha2::{Digest, Sha256};
use tiktoken_rs::{CoreBPE, o200k_base};

pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Vec<u32>;
    fn decode(&self, tokens: &[u32]) -> Result<String>;

    fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }
}

pub struct TiktokenTokenizer {
    bpe: CoreBPE,
}

impl TiktokenTokenizer {
    pub fn new() -> Result<Self> {
        let bpe = o200k_base()?;
        Ok(Self { bpe })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe.encode_with_special_tokens(text)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        self.bpe.decode(tokens.to_vec())
    }
}

/// Deterministic content-addressed id: sha-256 of the input, hex encoded,
/// truncated and prefixed (`doc-`, `chunk-`, `entity-`, ...).
pub fn compute_hash_id(content: &str, prefix: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    format!("{}{}", prefix, &hex::encode(digest)[..32])
}

/// Hex sha-256 of raw bytes, used for document content dedup.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn sanitize_text(input: &str) -> String {
    input.replace('\r', "").trim().to_string()
}

pub fn summarize_content(content: &str) -> String {
    const MAX_LEN: usize = 200;
    let trimmed = content.trim();
    if trimmed.chars().count() <= MAX_LEN {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(MAX_LEN).collect();
        format!("{head}…")
    }
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn generate_track_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_ids_are_stable_and_prefixed() {
        let a = compute_hash_id("same input", "doc-");
        let b = compute_hash_id("same input", "doc-");
        assert_eq!(a, b);
        assert!(a.starts_with("doc-"));
        assert_ne!(a, compute_hash_id("other input", "doc-"));
    }

    #[test]
    fn summary_truncates_on_char_boundary() {
        let long = "é".repeat(300);
        let summary = summarize_content(&long);
        assert!(summary.chars().count() <= 201);
        assert!(summary.ends_with('…'));
    }
}
