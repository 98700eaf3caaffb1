use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::chunker::ChunkProfile;

/// Content domain driving the chunking strategy. Dense prose domains get
/// larger chunks than conversational text.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    #[default]
    General,
    Legal,
    Financial,
    Scientific,
    Technical,
    Conversational,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Legal => "legal",
            Self::Financial => "financial",
            Self::Scientific => "scientific",
            Self::Technical => "technical",
            Self::Conversational => "conversational",
        }
    }

    /// Chunking parameters tuned per domain.
    pub fn chunk_profile(&self, base: &ChunkProfile) -> ChunkProfile {
        let (size_factor, overlap_factor) = match self {
            Self::Legal | Self::Financial | Self::Scientific => (2.0, 1.5),
            Self::Technical => (1.5, 1.2),
            Self::Conversational => (0.6, 0.6),
            Self::General => (1.0, 1.0),
        };
        let chunk_size = ((base.chunk_size as f64) * size_factor) as usize;
        let chunk_overlap = ((base.chunk_overlap as f64) * overlap_factor) as usize;
        ChunkProfile {
            chunk_size: chunk_size.max(64),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
        }
    }
}

#[async_trait]
pub trait DomainClassifier: Send + Sync {
    async fn classify(&self, text: &str, filename: &str) -> Domain;
}

const LEGAL_TERMS: &[&str] = &[
    "whereas",
    "hereinafter",
    "pursuant",
    "indemnify",
    "jurisdiction",
    "covenant",
    "herein",
    "party of the",
    "liability",
    "arbitration",
];

const FINANCIAL_TERMS: &[&str] = &[
    "revenue",
    "ebitda",
    "fiscal",
    "quarterly",
    "balance sheet",
    "cash flow",
    "dividend",
    "amortization",
    "portfolio",
    "shareholders",
];

const SCIENTIFIC_TERMS: &[&str] = &[
    "abstract",
    "hypothesis",
    "methodology",
    "et al",
    "experiment",
    "statistically",
    "in vitro",
    "dataset",
    "p-value",
    "peer-reviewed",
];

const TECHNICAL_TERMS: &[&str] = &[
    "function",
    "api",
    "config",
    "deployment",
    "runtime",
    "endpoint",
    "compile",
    "database",
    "kernel",
    "repository",
];

/// Keyword-frequency classifier; the cheap default in front of an optional
/// LLM classifier.
#[derive(Debug, Default, Clone)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    pub fn new() -> Self {
        Self
    }

    fn term_hits(haystack: &str, terms: &[&str]) -> usize {
        terms.iter().filter(|term| haystack.contains(**term)).count()
    }

    fn looks_conversational(text: &str) -> bool {
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.len() < 6 {
            return false;
        }
        let speaker_lines = lines
            .iter()
            .filter(|line| {
                let trimmed = line.trim_start();
                trimmed
                    .split_once(':')
                    .is_some_and(|(speaker, _)| {
                        !speaker.is_empty()
                            && speaker.len() <= 24
                            && speaker.chars().all(|c| c.is_alphanumeric() || c == ' ')
                    })
            })
            .count();
        speaker_lines * 2 >= lines.len()
    }
}

#[async_trait]
impl DomainClassifier for HeuristicClassifier {
    async fn classify(&self, text: &str, filename: &str) -> Domain {
        let sample: String = text.chars().take(20_000).collect::<String>().to_lowercase();
        let name = filename.to_lowercase();

        if Self::looks_conversational(&sample) || name.contains("chat") || name.contains("transcript")
        {
            return Domain::Conversational;
        }

        let scores = [
            (Domain::Legal, Self::term_hits(&sample, LEGAL_TERMS)),
            (Domain::Financial, Self::term_hits(&sample, FINANCIAL_TERMS)),
            (Domain::Scientific, Self::term_hits(&sample, SCIENTIFIC_TERMS)),
            (Domain::Technical, Self::term_hits(&sample, TECHNICAL_TERMS)),
        ];

        let best = scores.iter().max_by_key(|(_, hits)| *hits);
        match best {
            Some((domain, hits)) if *hits >= 3 => *domain,
            _ => Domain::General,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn legal_text_classifies_as_legal() {
        let classifier = HeuristicClassifier::new();
        let text = "WHEREAS the parties agree, pursuant to the jurisdiction of the court, \
                    each party shall indemnify the other against liability under this covenant.";
        assert_eq!(classifier.classify(text, "contract.txt").await, Domain::Legal);
    }

    #[tokio::test]
    async fn plain_prose_classifies_as_general() {
        let classifier = HeuristicClassifier::new();
        let text = "The quick brown fox jumps over the lazy dog near the riverbank at dawn.";
        assert_eq!(classifier.classify(text, "notes.txt").await, Domain::General);
    }

    #[tokio::test]
    async fn speaker_transcripts_classify_as_conversational() {
        let classifier = HeuristicClassifier::new();
        let text = "alice: hello there\nbob: hi alice\nalice: how are you\nbob: doing well\n\
                    alice: great to hear\nbob: indeed it is";
        assert_eq!(
            classifier.classify(text, "meeting.txt").await,
            Domain::Conversational
        );
    }

    #[test]
    fn dense_domains_get_larger_chunks() {
        let base = ChunkProfile {
            chunk_size: 500,
            chunk_overlap: 50,
        };
        let legal = Domain::Legal.chunk_profile(&base);
        let chat = Domain::Conversational.chunk_profile(&base);
        assert!(legal.chunk_size > base.chunk_size);
        assert!(chat.chunk_size < base.chunk_size);
        assert!(legal.chunk_overlap < legal.chunk_size);
    }
}
