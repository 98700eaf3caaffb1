use serde::{Deserialize, Serialize};

/// Sub-metric readings backing a readability grade.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub alnum_ratio: f64,
    pub whitespace_ratio: f64,
    pub avg_words_per_line: f64,
    pub non_ascii_ratio: f64,
    pub fragment_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub score: f64,
    pub is_readable: bool,
    pub reason: String,
    pub metrics: QualityMetrics,
}

// readability gates; every one must hold for is_readable
const MIN_SCORE: f64 = 0.6;
const MIN_ALNUM_RATIO: f64 = 0.5;
const MAX_WHITESPACE_RATIO: f64 = 0.4;
const MAX_NON_ASCII_RATIO: f64 = 0.25;
const MAX_FRAGMENT_RATIO: f64 = 0.5;

/// Heuristic readability grader for extracted text spans. Penalizes the
/// artifacts of corrupted OCR output: letter-spaced tokens, dense non-ASCII
/// noise, abnormal whitespace. The grade annotates chunks; it never blocks
/// chunk creation.
#[derive(Debug, Default, Clone)]
pub struct QualityScorer;

impl QualityScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn grade(&self, text: &str) -> QualityReport {
        let total_chars = text.chars().count();
        if total_chars == 0 || text.trim().is_empty() {
            return QualityReport {
                score: 0.0,
                is_readable: false,
                reason: "empty text".to_string(),
                metrics: QualityMetrics::default(),
            };
        }

        let whitespace = text.chars().filter(|c| c.is_whitespace()).count();
        let non_ws = total_chars - whitespace;
        let alnum = text.chars().filter(|c| c.is_alphanumeric()).count();
        let non_ascii = text
            .chars()
            .filter(|c| !c.is_whitespace() && !c.is_ascii())
            .count();

        let words: Vec<&str> = text.split_whitespace().collect();
        let lines = text.lines().filter(|l| !l.trim().is_empty()).count().max(1);
        let fragments = words
            .iter()
            .filter(|w| w.chars().count() <= 2 && w.chars().all(|c| c.is_alphabetic()))
            .count();

        let metrics = QualityMetrics {
            alnum_ratio: alnum as f64 / non_ws.max(1) as f64,
            whitespace_ratio: whitespace as f64 / total_chars as f64,
            avg_words_per_line: words.len() as f64 / lines as f64,
            non_ascii_ratio: non_ascii as f64 / non_ws.max(1) as f64,
            fragment_ratio: if words.is_empty() {
                1.0
            } else {
                fragments as f64 / words.len() as f64
            },
        };

        let line_structure = (metrics.avg_words_per_line / 8.0).min(1.0);
        let mut score = 0.4 * metrics.alnum_ratio
            + 0.25 * (1.0 - metrics.whitespace_ratio).max(0.0)
            + 0.2 * line_structure
            + 0.15 * (1.0 - metrics.non_ascii_ratio).max(0.0);

        let mut penalties = Vec::new();
        if metrics.fragment_ratio > MAX_FRAGMENT_RATIO {
            score *= 0.3;
            penalties.push("fragmented tokens");
        }
        if metrics.non_ascii_ratio > MAX_NON_ASCII_RATIO {
            score *= 0.5;
            penalties.push("non-ascii noise");
        }
        if metrics.whitespace_ratio > MAX_WHITESPACE_RATIO {
            score *= 0.6;
            penalties.push("abnormal whitespace");
        }
        let score = score.clamp(0.0, 1.0);

        let gates = [
            (score >= MIN_SCORE, "score below threshold"),
            (
                metrics.alnum_ratio >= MIN_ALNUM_RATIO,
                "low alphanumeric density",
            ),
            (
                metrics.whitespace_ratio <= MAX_WHITESPACE_RATIO,
                "whitespace ratio too high",
            ),
            (
                metrics.non_ascii_ratio <= MAX_NON_ASCII_RATIO,
                "non-ascii ratio too high",
            ),
            (
                metrics.fragment_ratio <= MAX_FRAGMENT_RATIO,
                "too many fragmented tokens",
            ),
        ];
        let failed: Vec<&str> = gates
            .iter()
            .filter(|(ok, _)| !ok)
            .map(|(_, reason)| *reason)
            .collect();

        let is_readable = failed.is_empty();
        let reason = if is_readable {
            if penalties.is_empty() {
                "text looks well formed".to_string()
            } else {
                format!("readable despite: {}", penalties.join(", "))
            }
        } else {
            failed.join(", ")
        };

        QualityReport {
            score,
            is_readable,
            reason,
            metrics,
        }
    }
}
