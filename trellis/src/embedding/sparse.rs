use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use crate::storage::SparseVector;

const BUCKETS: u64 = 1 << 20;

/// Hashed term-frequency encoder producing the lexical companion to the
/// dense vector. Deterministic and provider-independent, so migration never
/// invalidates sparse vectors.
#[derive(Debug, Default, Clone)]
pub struct SparseEncoder;

impl SparseEncoder {
    pub fn new() -> Self {
        Self
    }

    pub fn encode(&self, text: &str) -> SparseVector {
        let mut counts: HashMap<u32, f32> = HashMap::new();
        for term in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= 2)
        {
            let lowered = term.to_lowercase();
            let mut hasher = DefaultHasher::new();
            lowered.hash(&mut hasher);
            let bucket = (hasher.finish() % BUCKETS) as u32;
            *counts.entry(bucket).or_insert(0.0) += 1.0;
        }

        if counts.is_empty() {
            return SparseVector::default();
        }

        let norm = counts.values().map(|v| v * v).sum::<f32>().sqrt();
        let mut pairs: Vec<(u32, f32)> = counts
            .into_iter()
            .map(|(index, value)| (index, value / norm))
            .collect();
        pairs.sort_by_key(|(index, _)| *index);

        SparseVector {
            indices: pairs.iter().map(|(index, _)| *index).collect(),
            values: pairs.iter().map(|(_, value)| *value).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_texts_encode_identically() {
        let encoder = SparseEncoder::new();
        let a = encoder.encode("embedding pipelines love determinism");
        let b = encoder.encode("embedding pipelines love determinism");
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn vectors_are_l2_normalized() {
        let encoder = SparseEncoder::new();
        let vector = encoder.encode("alpha beta gamma alpha");
        let norm: f32 = vector.values.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_and_symbolic_text_degrade_to_empty() {
        let encoder = SparseEncoder::new();
        assert!(encoder.encode("").is_empty());
        assert!(encoder.encode("!!! ... ---").is_empty());
    }
}
