use std::sync::Arc;

use anyhow::{Result, anyhow};

use super::utils::Tokenizer;

/// Size bounds for one chunking run; tuned per classified domain.
#[derive(Debug, Clone)]
pub struct ChunkProfile {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkProfile {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkData {
    pub index: usize,
    pub content: String,
    pub token_count: usize,
}

/// A named span extracted upstream (e.g. a parsed code or definition block).
/// When hints are present, each one becomes a chunk directly.
#[derive(Debug, Clone)]
pub struct StructuralHint {
    pub name: String,
    pub span: String,
}

pub trait Chunker: Send + Sync {
    fn chunk(
        &self,
        text: &str,
        title: Option<&str>,
        hints: &[StructuralHint],
        profile: &ChunkProfile,
    ) -> Result<Vec<ChunkData>>;
}

/// Structure-aware splitter. Split priority: structural hints, then
/// top-level headers, then blank-line paragraphs, then sentence boundaries,
/// then a raw token window as the last resort. Fenced code blocks are
/// substituted with placeholders before header/paragraph splitting and
/// restored afterwards, so a fence is never cut — a fence larger than the
/// budget becomes its own oversized chunk.
pub struct SemanticChunker {
    tokenizer: Arc<dyn Tokenizer>,
}

const FENCE_MARK: &str = "\u{1a}fence:";

impl SemanticChunker {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }

    fn placeholder(index: usize) -> String {
        format!("{FENCE_MARK}{index}\u{1a}")
    }

    /// Swap fenced blocks for placeholder lines; returns the protected text
    /// and the extracted blocks in order.
    fn protect_fences(text: &str) -> (String, Vec<String>) {
        let mut blocks = Vec::new();
        let mut out: Vec<String> = Vec::new();
        let mut fence_lines: Vec<String> = Vec::new();
        let mut in_fence = false;

        for line in text.lines() {
            let is_delimiter = line.trim_start().starts_with("```");
            if in_fence {
                fence_lines.push(line.to_string());
                if is_delimiter {
                    out.push(Self::placeholder(blocks.len()));
                    blocks.push(std::mem::take(&mut fence_lines).join("\n"));
                    in_fence = false;
                }
            } else if is_delimiter {
                in_fence = true;
                fence_lines.push(line.to_string());
            } else {
                out.push(line.to_string());
            }
        }
        // unterminated fence: keep it protected anyway
        if in_fence {
            out.push(Self::placeholder(blocks.len()));
            blocks.push(fence_lines.join("\n"));
        }

        (out.join("\n"), blocks)
    }

    fn restore_fences(text: &str, blocks: &[String]) -> String {
        let mut restored = text.to_string();
        for (index, block) in blocks.iter().enumerate() {
            restored = restored.replace(&Self::placeholder(index), block);
        }
        restored
    }

    fn is_header(line: &str) -> bool {
        let trimmed = line.trim_start();
        let hashes = trimmed.chars().take_while(|c| *c == '#').count();
        (1..=2).contains(&hashes) && trimmed.chars().nth(hashes) == Some(' ')
    }

    /// Split into sections at top-level headers; each section keeps its
    /// header line.
    fn split_headers(text: &str) -> Vec<String> {
        let mut sections: Vec<Vec<&str>> = Vec::new();
        for line in text.lines() {
            if Self::is_header(line) || sections.is_empty() {
                sections.push(vec![line]);
            } else {
                sections.last_mut().unwrap().push(line);
            }
        }
        sections
            .into_iter()
            .map(|lines| lines.join("\n").trim().to_string())
            .filter(|section| !section.is_empty())
            .collect()
    }

    fn split_paragraphs(section: &str) -> Vec<String> {
        let mut paragraphs: Vec<Vec<&str>> = vec![Vec::new()];
        for line in section.lines() {
            if line.trim().is_empty() {
                if !paragraphs.last().unwrap().is_empty() {
                    paragraphs.push(Vec::new());
                }
            } else {
                paragraphs.last_mut().unwrap().push(line);
            }
        }
        paragraphs
            .into_iter()
            .filter(|lines| !lines.is_empty())
            .map(|lines| lines.join("\n"))
            .collect()
    }

    fn split_sentences(text: &str) -> Vec<String> {
        let mut sentences = Vec::new();
        let mut current = String::new();
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            current.push(c);
            if matches!(c, '.' | '!' | '?')
                && chars.peek().is_none_or(|next| next.is_whitespace())
            {
                sentences.push(current.trim().to_string());
                current.clear();
            }
        }
        if !current.trim().is_empty() {
            sentences.push(current.trim().to_string());
        }
        sentences.into_iter().filter(|s| !s.is_empty()).collect()
    }

    fn token_window(&self, text: &str, max_tokens: usize) -> Result<Vec<String>> {
        let tokens = self.tokenizer.encode(text);
        let mut pieces = Vec::new();
        let mut start = 0usize;
        while start < tokens.len() {
            let end = (start + max_tokens).min(tokens.len());
            pieces.push(self.tokenizer.decode(&tokens[start..end])?.trim().to_string());
            start = end;
        }
        Ok(pieces)
    }

    /// Break an oversized paragraph, keeping protected fences whole. A
    /// placeholder becomes its own unit; plain text falls back to sentences
    /// and finally to a raw token window.
    fn split_oversized(
        &self,
        paragraph: &str,
        blocks: &[String],
        max_tokens: usize,
    ) -> Result<Vec<String>> {
        if paragraph.contains(FENCE_MARK) {
            let mut units = Vec::new();
            let mut rest = paragraph;
            while let Some(pos) = rest.find(FENCE_MARK) {
                let (before, tail) = rest.split_at(pos);
                if !before.trim().is_empty() {
                    units.extend(self.split_oversized(before, blocks, max_tokens)?);
                }
                let close = tail[1..]
                    .find('\u{1a}')
                    .map(|i| i + 2)
                    .unwrap_or(tail.len());
                let (marker, after) = tail.split_at(close);
                units.push(Self::restore_fences(marker, blocks));
                rest = after;
            }
            if !rest.trim().is_empty() {
                units.extend(self.split_oversized(rest, blocks, max_tokens)?);
            }
            return Ok(units);
        }

        let restored = Self::restore_fences(paragraph, blocks);
        let mut units = Vec::new();
        for sentence in Self::split_sentences(&restored) {
            if self.tokenizer.count(&sentence) > max_tokens {
                units.extend(self.token_window(&sentence, max_tokens)?);
            } else {
                units.push(sentence);
            }
        }
        if units.is_empty() && !restored.trim().is_empty() {
            units.extend(self.token_window(&restored, max_tokens)?);
        }
        Ok(units)
    }

    /// Greedily pack units into pieces bounded by `max_tokens`.
    fn pack(&self, units: Vec<(String, usize)>, max_tokens: usize, separator: &str) -> Vec<String> {
        let mut pieces: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut current_tokens = 0usize;

        for (unit, tokens) in units {
            let fits = current_tokens + tokens <= max_tokens;
            if current.is_empty() {
                current = unit;
                current_tokens = tokens;
            } else if fits {
                current.push_str(separator);
                current.push_str(&unit);
                current_tokens += tokens;
            } else {
                pieces.push(std::mem::take(&mut current));
                current = unit;
                current_tokens = tokens;
            }
        }
        if !current.is_empty() {
            pieces.push(current);
        }
        pieces
    }

    fn section_pieces(
        &self,
        section: &str,
        blocks: &[String],
        max_tokens: usize,
    ) -> Result<Vec<String>> {
        let restored = Self::restore_fences(section, blocks);
        if self.tokenizer.count(&restored) <= max_tokens {
            return Ok(vec![restored]);
        }

        let mut units: Vec<(String, usize)> = Vec::new();
        for paragraph in Self::split_paragraphs(section) {
            let restored_paragraph = Self::restore_fences(&paragraph, blocks);
            let tokens = self.tokenizer.count(&restored_paragraph);
            if tokens <= max_tokens {
                units.push((restored_paragraph, tokens));
            } else {
                for unit in self.split_oversized(&paragraph, blocks, max_tokens)? {
                    let tokens = self.tokenizer.count(&unit);
                    units.push((unit, tokens));
                }
            }
        }
        Ok(self.pack(units, max_tokens, "\n\n"))
    }

    fn inject_overlap(&self, pieces: Vec<String>, overlap: usize) -> Result<Vec<ChunkData>> {
        let mut chunks = Vec::with_capacity(pieces.len());
        for (index, piece) in pieces.iter().enumerate() {
            let content = if index == 0 || overlap == 0 {
                piece.clone()
            } else {
                let prev_tokens = self.tokenizer.encode(&pieces[index - 1]);
                let take = overlap.min(prev_tokens.len());
                let tail = self
                    .tokenizer
                    .decode(&prev_tokens[prev_tokens.len() - take..])?;
                format!("{}\n{}", tail.trim(), piece)
            };
            let token_count = self.tokenizer.count(&content);
            chunks.push(ChunkData {
                index,
                content,
                token_count,
            });
        }
        Ok(chunks)
    }
}

impl Chunker for SemanticChunker {
    fn chunk(
        &self,
        text: &str,
        title: Option<&str>,
        hints: &[StructuralHint],
        profile: &ChunkProfile,
    ) -> Result<Vec<ChunkData>> {
        if profile.chunk_overlap >= profile.chunk_size {
            return Err(anyhow!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                profile.chunk_overlap,
                profile.chunk_size
            ));
        }

        if !hints.is_empty() {
            let pieces: Vec<String> = hints
                .iter()
                .map(|hint| {
                    if hint.name.is_empty() {
                        hint.span.trim().to_string()
                    } else {
                        format!("{}\n{}", hint.name, hint.span.trim())
                    }
                })
                .filter(|piece| !piece.is_empty())
                .collect();
            return self.inject_overlap(pieces, 0);
        }

        let source = match title {
            Some(title) if !title.trim().is_empty() && !text.trim_start().starts_with('#') => {
                format!("# {}\n\n{}", title.trim(), text)
            }
            _ => text.to_string(),
        };

        let (protected, blocks) = Self::protect_fences(&source);
        let mut pieces = Vec::new();
        for section in Self::split_headers(&protected) {
            pieces.extend(self.section_pieces(&section, &blocks, profile.chunk_size)?);
        }
        let pieces: Vec<String> = pieces
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        self.inject_overlap(pieces, profile.chunk_overlap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Whitespace-delimited fake: one token per word. Keeps the tests
    /// independent of the BPE vocabulary.
    struct WordTokenizer;

    impl Tokenizer for WordTokenizer {
        fn encode(&self, text: &str) -> Vec<u32> {
            text.split_whitespace().map(|_| 0).collect()
        }

        fn decode(&self, tokens: &[u32]) -> Result<String> {
            // decode is only meaningful for windows of a known text in these
            // tests; return a fixed-width stand-in of the right length
            Ok(vec!["w"; tokens.len()].join(" "))
        }
    }

    /// Word tokenizer that round-trips content through indices, so decode
    /// reproduces the original words.
    struct IndexedTokenizer {
        words: Vec<String>,
    }

    impl IndexedTokenizer {
        fn for_text(text: &str) -> Self {
            Self {
                words: text.split_whitespace().map(|w| w.to_string()).collect(),
            }
        }
    }

    impl Tokenizer for IndexedTokenizer {
        fn encode(&self, text: &str) -> Vec<u32> {
            // indices into the known corpus where possible
            text.split_whitespace()
                .map(|w| {
                    self.words
                        .iter()
                        .position(|known| known == w)
                        .unwrap_or(0) as u32
                })
                .collect()
        }

        fn decode(&self, tokens: &[u32]) -> Result<String> {
            Ok(tokens
                .iter()
                .map(|&i| self.words.get(i as usize).cloned().unwrap_or_default())
                .collect::<Vec<_>>()
                .join(" "))
        }
    }

    fn normalized(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn sample_text(words_per_paragraph: usize, paragraphs: usize) -> String {
        (0..paragraphs)
            .map(|p| {
                (0..words_per_paragraph)
                    .map(|w| format!("word{p}x{w}"))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn chunks_respect_token_budget() {
        let text = sample_text(40, 12);
        let chunker = SemanticChunker::new(Arc::new(IndexedTokenizer::for_text(&text)));
        let profile = ChunkProfile {
            chunk_size: 100,
            chunk_overlap: 10,
        };
        let chunks = chunker.chunk(&text, None, &[], &profile).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(
                chunk.token_count <= profile.chunk_size + profile.chunk_overlap,
                "chunk {} has {} tokens",
                chunk.index,
                chunk.token_count
            );
        }
    }

    #[test]
    fn zero_overlap_concatenation_reconstructs_content() {
        let text = sample_text(30, 8);
        let chunker = SemanticChunker::new(Arc::new(IndexedTokenizer::for_text(&text)));
        let profile = ChunkProfile {
            chunk_size: 80,
            chunk_overlap: 0,
        };
        let chunks = chunker.chunk(&text, None, &[], &profile).unwrap();
        let joined = chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(normalized(&joined), normalized(&text));
    }

    #[test]
    fn indices_are_contiguous_from_zero() {
        let text = sample_text(25, 6);
        let chunker = SemanticChunker::new(Arc::new(IndexedTokenizer::for_text(&text)));
        let chunks = chunker
            .chunk(
                &text,
                None,
                &[],
                &ChunkProfile {
                    chunk_size: 60,
                    chunk_overlap: 5,
                },
            )
            .unwrap();
        for (expected, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, expected);
        }
    }

    #[test]
    fn fenced_code_blocks_are_never_cut() {
        let code = format!("```rust\n{}\n```", "let x = compute();\n".repeat(30));
        let text = format!(
            "{}\n\n{}\n\n{}",
            sample_text(40, 2),
            code,
            sample_text(40, 2)
        );
        let chunker = SemanticChunker::new(Arc::new(WordTokenizer));
        let chunks = chunker
            .chunk(
                &text,
                None,
                &[],
                &ChunkProfile {
                    chunk_size: 50,
                    chunk_overlap: 0,
                },
            )
            .unwrap();

        let holders: Vec<&ChunkData> = chunks
            .iter()
            .filter(|c| c.content.contains("```"))
            .collect();
        assert!(!holders.is_empty());
        // the whole fence lives in exactly one chunk
        let with_full_fence = chunks
            .iter()
            .filter(|c| c.content.matches("```").count() == 2)
            .count();
        assert_eq!(with_full_fence, 1);
        for chunk in &chunks {
            let delimiters = chunk.content.matches("```").count();
            assert!(delimiters == 0 || delimiters == 2, "fence cut in half");
        }
    }

    #[test]
    fn structural_hints_bypass_generic_splitting() {
        let hints = vec![
            StructuralHint {
                name: "fn alpha".into(),
                span: "fn alpha() {}".into(),
            },
            StructuralHint {
                name: "fn beta".into(),
                span: "fn beta() {}".into(),
            },
        ];
        let chunker = SemanticChunker::new(Arc::new(WordTokenizer));
        let chunks = chunker
            .chunk("ignored body", None, &hints, &ChunkProfile::default())
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].content.contains("fn alpha"));
        assert!(chunks[1].content.contains("fn beta"));
    }

    #[test]
    fn headers_start_new_chunks_when_sections_fit() {
        let text = "# One\n\nfirst section body here\n\n# Two\n\nsecond section body here";
        let chunker = SemanticChunker::new(Arc::new(WordTokenizer));
        let chunks = chunker
            .chunk(
                text,
                None,
                &[],
                &ChunkProfile {
                    chunk_size: 100,
                    chunk_overlap: 0,
                },
            )
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].content.starts_with("# One"));
        assert!(chunks[1].content.starts_with("# Two"));
    }

    #[test]
    fn overlap_prefixes_carry_prior_tail() {
        let text = sample_text(30, 4);
        let chunker = SemanticChunker::new(Arc::new(IndexedTokenizer::for_text(&text)));
        let chunks = chunker
            .chunk(
                &text,
                None,
                &[],
                &ChunkProfile {
                    chunk_size: 35,
                    chunk_overlap: 5,
                },
            )
            .unwrap();
        assert!(chunks.len() >= 2);
        for pair in chunks.windows(2) {
            let prev_words: Vec<&str> = pair[0].content.split_whitespace().collect();
            let tail = prev_words[prev_words.len().saturating_sub(5)..].join(" ");
            assert!(
                pair[1].content.starts_with(&tail),
                "chunk {} does not start with prior tail",
                pair[1].index
            );
        }
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        let chunker = SemanticChunker::new(Arc::new(WordTokenizer));
        let result = chunker.chunk(
            "text",
            None,
            &[],
            &ChunkProfile {
                chunk_size: 50,
                chunk_overlap: 50,
            },
        );
        assert!(result.is_err());
    }
}
