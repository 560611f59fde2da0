//! Structure-Preserving Document Chunking
//!
//! Splits a document into an ordered sequence of overlapping segments that
//! each fit a token budget.
//!
//! ## Strategy
//!
//! 1. Prefer splitting at structural boundaries (headings)
//! 2. Oversized sections fall back to paragraph boundaries
//! 3. Oversized paragraphs fall back to sentence boundaries
//! 4. As a last resort, bisect at raw character boundaries
//!
//! The decomposition partitions the source byte-for-byte, so stripping each
//! chunk's overlap prefix and concatenating reproduces the document exactly.
//! Chunking is pure: identical input and parameters always yield an
//! identical chunk sequence.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::token_counter::TokenCounter;
use crate::types::{ForgeError, Result};

/// A token-budget-respecting slice of a larger document.
///
/// `text[..overlap_chars]` duplicates the tail of the previous chunk so
/// context is not lost across the boundary; it is zero for the first chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the chunk sequence, starting at 0
    pub index: usize,
    /// Chunk text, overlap prefix included
    pub text: String,
    /// Token count of `text` for the target backend
    pub token_count: u32,
    /// Byte length of the overlap prefix duplicated from the previous chunk
    pub overlap_chars: usize,
}

impl Chunk {
    /// Whether this chunk starts with content repeated from its predecessor
    pub fn overlaps_previous(&self) -> bool {
        self.overlap_chars > 0
    }

    /// The chunk's contribution beyond the duplicated overlap prefix
    pub fn new_content(&self) -> &str {
        &self.text[self.overlap_chars..]
    }
}

/// Matches ATX-style headings at line start ("# Findings", "## Scene")
static ATX_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,6} \S").expect("valid heading regex"));

/// Matches a blank-line run separating paragraphs
static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n[\s]*").expect("valid paragraph regex"));

/// Matches the end of a sentence followed by whitespace
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[.!?]["')\]]*\s+"#).expect("valid sentence regex"));

/// Structure-preserving splitter bound to one backend's token counter
#[derive(Debug, Clone)]
pub struct Chunker {
    counter: TokenCounter,
}

impl Chunker {
    pub fn new(counter: TokenCounter) -> Self {
        Self { counter }
    }

    /// Split `text` into chunks of at most `max_tokens`, each chunk after
    /// the first seeded with the previous chunk's trailing `overlap_tokens`
    /// worth of content.
    ///
    /// Produces exactly one chunk when the whole text fits the budget.
    /// Fails fast when the overlap is not smaller than the budget.
    pub fn split(&self, text: &str, max_tokens: u32, overlap_tokens: u32) -> Result<Vec<Chunk>> {
        if overlap_tokens >= max_tokens {
            return Err(ForgeError::chunking_config(max_tokens, overlap_tokens));
        }

        let total = self.counter.count(text).tokens;
        if total <= max_tokens {
            return Ok(vec![Chunk {
                index: 0,
                text: text.to_string(),
                token_count: total,
                overlap_chars: 0,
            }]);
        }

        // Every unit must fit the budget left after a worst-case overlap
        // seed, so greedy packing never stalls on an unplaceable unit.
        let unit_budget = max_tokens - overlap_tokens;
        let units = self.decompose(text, unit_budget);

        debug!(
            total_tokens = total,
            max_tokens,
            overlap_tokens,
            units = units.len(),
            "chunking oversized document"
        );

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut current = String::new();
        let mut current_tokens: u32 = 0;
        let mut overlap_chars: usize = 0;
        let mut has_new_content = false;

        for unit in units {
            let unit_tokens = self.counter.count(unit).tokens;

            if has_new_content && current_tokens + unit_tokens > max_tokens {
                let seed = self.overlap_suffix(&current, overlap_tokens).to_string();
                let seed_tokens = self.counter.count(&seed).tokens;
                self.push_chunk(&mut chunks, current, overlap_chars);

                overlap_chars = seed.len();
                current = seed;
                current_tokens = seed_tokens;
                has_new_content = false;
            }

            current.push_str(unit);
            current_tokens += unit_tokens;
            has_new_content = true;
        }

        if has_new_content {
            self.push_chunk(&mut chunks, current, overlap_chars);
        }

        Ok(chunks)
    }

    fn push_chunk(&self, chunks: &mut Vec<Chunk>, text: String, overlap_chars: usize) {
        let token_count = self.counter.count(&text).tokens;
        chunks.push(Chunk {
            index: chunks.len(),
            text,
            token_count,
            overlap_chars,
        });
    }

    /// Largest suffix of `text` that stays within `overlap_tokens`, aligned
    /// to a char boundary. Token counts grow monotonically with suffix
    /// length, so a binary search over char positions finds the cut.
    fn overlap_suffix<'a>(&self, text: &'a str, overlap_tokens: u32) -> &'a str {
        if overlap_tokens == 0 {
            return "";
        }
        if self.counter.count(text).tokens <= overlap_tokens {
            return text;
        }

        let starts: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();

        // Invariant: suffix starting at starts[hi] fits, at starts[lo] does not
        let mut lo = 0usize;
        let mut hi = starts.len();
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.counter.count(&text[starts[mid]..]).tokens <= overlap_tokens {
                hi = mid;
            } else {
                lo = mid;
            }
        }

        if hi == starts.len() {
            ""
        } else {
            &text[starts[hi]..]
        }
    }

    /// Decompose the text into ordered units that each fit `budget`,
    /// preferring the largest structure that fits. Concatenating the units
    /// reproduces the text exactly.
    fn decompose<'a>(&self, text: &'a str, budget: u32) -> Vec<&'a str> {
        let mut units = Vec::new();

        for section in split_at_offsets(text, section_boundaries(text)) {
            if self.counter.count(section).tokens <= budget {
                units.push(section);
                continue;
            }

            for paragraph in split_at_offsets(section, paragraph_boundaries(section)) {
                if self.counter.count(paragraph).tokens <= budget {
                    units.push(paragraph);
                    continue;
                }

                for sentence in split_at_offsets(paragraph, sentence_boundaries(paragraph)) {
                    if self.counter.count(sentence).tokens <= budget {
                        units.push(sentence);
                    } else {
                        self.bisect(sentence, budget, &mut units);
                    }
                }
            }
        }

        units
    }

    /// Last-resort splitting: recursively bisect at char boundaries until
    /// every piece fits the budget
    fn bisect<'a>(&self, text: &'a str, budget: u32, out: &mut Vec<&'a str>) {
        let char_count = text.chars().count();
        if char_count <= 1 || self.counter.count(text).tokens <= budget {
            out.push(text);
            return;
        }

        let mid_char = char_count / 2;
        let mid_byte = text
            .char_indices()
            .nth(mid_char)
            .map(|(i, _)| i)
            .unwrap_or(text.len());

        let (left, right) = text.split_at(mid_byte);
        self.bisect(left, budget, out);
        self.bisect(right, budget, out);
    }
}

// =============================================================================
// Boundary Detection
// =============================================================================

/// Byte offsets where a new heading-delimited section starts.
/// Detects ATX headings and setext-style underlined headings.
fn section_boundaries(text: &str) -> Vec<usize> {
    let mut offsets: Vec<usize> = ATX_HEADING
        .find_iter(text)
        .map(|m| m.start())
        .filter(|&o| o > 0)
        .collect();

    // Setext headings: a non-blank line underlined with === or ---
    let mut line_start = 0usize;
    let mut prev: Option<(usize, &str)> = None;
    for line in text.split_inclusive('\n') {
        if let Some((prev_start, prev_line)) = prev {
            let trimmed = line.trim_end();
            let is_underline = trimmed.len() >= 3
                && (trimmed.chars().all(|c| c == '=') || trimmed.chars().all(|c| c == '-'));
            if is_underline && !prev_line.trim().is_empty() && prev_start > 0 {
                offsets.push(prev_start);
            }
        }
        prev = Some((line_start, line));
        line_start += line.len();
    }

    offsets.sort_unstable();
    offsets.dedup();
    offsets
}

/// Byte offsets where a new paragraph starts (after a blank-line run)
fn paragraph_boundaries(text: &str) -> Vec<usize> {
    PARAGRAPH_BREAK
        .find_iter(text)
        .map(|m| m.end())
        .filter(|&o| o < text.len())
        .collect()
}

/// Byte offsets where a new sentence starts
fn sentence_boundaries(text: &str) -> Vec<usize> {
    SENTENCE_END
        .find_iter(text)
        .map(|m| m.end())
        .filter(|&o| o < text.len())
        .collect()
}

/// Split `text` at the given sorted byte offsets; the pieces concatenate
/// back to `text` exactly
fn split_at_offsets(text: &str, offsets: Vec<usize>) -> Vec<&str> {
    if offsets.is_empty() {
        return vec![text];
    }

    let mut pieces = Vec::with_capacity(offsets.len() + 1);
    let mut start = 0usize;
    for offset in offsets {
        if offset > start && offset < text.len() {
            pieces.push(&text[start..offset]);
            start = offset;
        }
    }
    pieces.push(&text[start..]);
    pieces
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::token_counter::TokenEstimator;
    use proptest::prelude::*;

    fn char_chunker() -> Chunker {
        Chunker::new(TokenCounter::with_estimator(
            "test",
            TokenEstimator::CharBased,
        ))
    }

    /// Strip declared overlaps and concatenate; must reproduce the source
    fn reassemble(chunks: &[Chunk]) -> String {
        chunks.iter().map(|c| c.new_content()).collect()
    }

    #[test]
    fn test_overlap_must_be_smaller_than_budget() {
        let chunker = char_chunker();
        assert!(chunker.split("text", 100, 100).is_err());
        assert!(chunker.split("text", 100, 200).is_err());
        assert!(chunker.split("text", 100, 99).is_ok());
    }

    #[test]
    fn test_single_chunk_when_text_fits() {
        let chunker = char_chunker();
        let text = "A short report body.";
        let chunks = chunker.split(text, 1_000, 50).expect("split");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].index, 0);
        assert!(!chunks[0].overlaps_previous());
    }

    #[test]
    fn test_chunks_cover_source_exactly() {
        let chunker = char_chunker();
        let text = "First sentence here. Second sentence there. Third one follows. \
                    Fourth continues on. Fifth wraps it up. Sixth for good measure. "
            .repeat(20);

        let chunks = chunker.split(&text, 50, 10).expect("split");
        assert!(chunks.len() > 1);
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn test_budget_respected() {
        let chunker = char_chunker();
        let text = "Observations were recorded at the scene. Samples were collected. "
            .repeat(50);

        let chunks = chunker.split(&text, 60, 12).expect("split");
        for chunk in &chunks {
            assert!(
                chunk.token_count <= 60,
                "chunk {} has {} tokens",
                chunk.index,
                chunk.token_count
            );
        }
    }

    #[test]
    fn test_overlap_prefix_matches_previous_tail() {
        let chunker = char_chunker();
        let text = "Alpha beta gamma delta. Epsilon zeta eta theta. Iota kappa lambda mu. "
            .repeat(30);

        let chunks = chunker.split(&text, 50, 10).expect("split");
        assert!(chunks.len() > 1);

        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            assert!(next.overlaps_previous());
            let prefix = &next.text[..next.overlap_chars];
            assert!(prev.text.ends_with(prefix));
            // The seed honors the overlap budget
            assert!(
                chunker.counter.count(prefix).tokens <= 10,
                "overlap prefix too large"
            );
        }
    }

    #[test]
    fn test_chunk_indices_are_ordered() {
        let chunker = char_chunker();
        let text = "word ".repeat(500);
        let chunks = chunker.split(&text, 40, 8).expect("split");

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn test_split_is_idempotent() {
        let chunker = char_chunker();
        let text = "The witness statement was taken. It was cross-checked against logs. "
            .repeat(40);

        let first = chunker.split(&text, 55, 11).expect("split");
        let second = chunker.split(&text, 55, 11).expect("split");
        assert_eq!(first, second);
    }

    #[test]
    fn test_prefers_heading_boundaries() {
        let chunker = char_chunker();
        let section = "# Section\n\nBody text with several words in it here.\n\n";
        let text = section.repeat(8);

        // Budget fits roughly two sections
        let chunks = chunker.split(&text, 30, 5).expect("split");
        assert!(chunks.len() > 1);

        // Every chunk's new content should start at a section boundary
        for chunk in &chunks {
            assert!(
                chunk.new_content().starts_with("# Section"),
                "chunk {} starts mid-section: {:?}",
                chunk.index,
                &chunk.new_content()[..20.min(chunk.new_content().len())]
            );
        }
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn test_oversized_section_falls_back_to_paragraphs() {
        let chunker = char_chunker();
        let text = format!(
            "# Big Section\n\n{}\n\n{}",
            "First paragraph sentence content. ".repeat(20),
            "Second paragraph sentence content. ".repeat(20)
        );

        let chunks = chunker.split(&text, 80, 10).expect("split");
        assert!(chunks.len() > 1);
        assert_eq!(reassemble(&chunks), text);
        for chunk in &chunks {
            assert!(chunk.token_count <= 80);
        }
    }

    #[test]
    fn test_unbroken_text_falls_back_to_char_windows() {
        let chunker = char_chunker();
        // No headings, paragraphs, sentences or even whitespace
        let text = "x".repeat(4_000);

        let chunks = chunker.split(&text, 100, 20).expect("split");
        assert!(chunks.len() > 1);
        assert_eq!(reassemble(&chunks), text);
        for chunk in &chunks {
            assert!(chunk.token_count <= 100);
        }
    }

    #[test]
    fn test_multibyte_text_splits_on_char_boundaries() {
        let chunker = char_chunker();
        let text = "Ценности и принципы расследования. ".repeat(60);

        let chunks = chunker.split(&text, 50, 10).expect("split");
        assert!(chunks.len() > 1);
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn test_boundary_math_scenario() {
        // 500k-token document, usable budget 100k, overlap 2k:
        // ceil((500000 - 2000) / (100000 - 2000)) lands on 6 chunks.
        let chunker = char_chunker();
        // CharBased: 4 chars = 1 token. 40-char sentence = 10 tokens;
        // 50k sentences = 500k tokens.
        let sentence = "The item was logged and sealed today. "; // 38 chars
        let padded = format!("{}a.", sentence); // 40 chars exactly
        assert_eq!(padded.chars().count(), 40);
        let text = padded.repeat(50_000);

        let chunks = chunker.split(&text, 100_000, 2_000).expect("split");

        assert_eq!(chunks.len(), 6, "expected 6 chunks, got {}", chunks.len());
        for chunk in &chunks {
            assert!(chunk.token_count <= 100_000);
        }
        for pair in chunks.windows(2) {
            let next = &pair[1];
            assert!(next.overlaps_previous());
            let prefix_tokens = chunker.counter.count(&next.text[..next.overlap_chars]).tokens;
            // Maximal suffix within the overlap budget
            assert!(prefix_tokens <= 2_000);
            assert!(prefix_tokens >= 1_900, "overlap seed unexpectedly small");
        }
        assert_eq!(reassemble(&chunks), text);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_chunks_cover_source(
            text in "[ -~\n]{0,2000}",
            max_tokens in 20u32..200,
            overlap in 0u32..15,
        ) {
            let chunker = char_chunker();
            let chunks = chunker.split(&text, max_tokens, overlap).expect("split");
            prop_assert_eq!(reassemble(&chunks), text);
        }

        #[test]
        fn prop_budget_respected(
            text in "[ -~\n]{1,2000}",
            max_tokens in 20u32..200,
            overlap in 0u32..15,
        ) {
            let chunker = char_chunker();
            let chunks = chunker.split(&text, max_tokens, overlap).expect("split");
            for chunk in &chunks {
                prop_assert!(chunk.token_count <= max_tokens);
            }
        }

        #[test]
        fn prop_split_is_idempotent(
            text in "[ -~\n]{0,1000}",
            max_tokens in 20u32..100,
            overlap in 0u32..10,
        ) {
            let chunker = char_chunker();
            let first = chunker.split(&text, max_tokens, overlap).expect("split");
            let second = chunker.split(&text, max_tokens, overlap).expect("split");
            prop_assert_eq!(first, second);
        }
    }
}
