//! Cuts oversized chunks down to the token ceiling.
//!
//! Lines are packed greedily into segments; a packed segment that still counts
//! over the ceiling is halved by line count and tried again, and a single line
//! that is too long is cut by character position. Work is kept on an explicit
//! stack so pathological input cannot exhaust the call stack.

use crate::chunks::{sanitize, Chunk, SymbolType};
use crate::tokens::TokenCounter;

/// Halvings allowed before a segment goes straight to character splitting.
pub const MAX_SPLIT_DEPTH: usize = 32;

/// Characters per token assumed when sizing character slices.
const CHARS_PER_TOKEN: usize = 3;

/// Attached to every character-split chunk.
pub const CHAR_SPLIT_NOTE: &str =
    "split by character position; line range is that of the original chunk";

#[derive(Debug, Clone)]
pub struct ChunkSplitter {
    counter: TokenCounter,
    max_tokens: usize,
}

/// A run of lines still to be split.
struct Segment {
    text: String,
    start_line: usize,
    end_line: usize,
    depth: usize,
}

enum Work {
    Emit(Chunk),
    Split(Segment),
}

impl ChunkSplitter {
    pub fn new(counter: TokenCounter, max_tokens: usize) -> Self {
        Self {
            counter,
            max_tokens: max_tokens.max(1),
        }
    }

    /// Splits `text`, whose lines are `start_line..=end_line` of `relative_path`,
    /// into chunks within the ceiling, in source order.
    pub fn split(&self, text: &str, relative_path: &str, start_line: usize, end_line: usize) -> Vec<Chunk> {
        let mut out = Vec::new();
        let mut stack = vec![Work::Split(Segment {
            text: sanitize(text),
            start_line,
            end_line: end_line.max(start_line),
            depth: 0,
        })];
        while let Some(work) = stack.pop() {
            match work {
                Work::Emit(chunk) => out.push(chunk),
                Work::Split(segment) => {
                    let pieces = self.split_segment(segment, relative_path);
                    stack.extend(pieces.into_iter().rev());
                }
            }
        }
        out
    }

    fn split_segment(&self, seg: Segment, path: &str) -> Vec<Work> {
        let lines: Vec<&str> = seg.text.lines().collect();
        if lines.len() <= 1 {
            return self.split_single_line(&seg, path);
        }
        if seg.depth >= MAX_SPLIT_DEPTH {
            tracing::warn!(
                "{path}:{}-{}: split depth exceeded, cutting by character",
                seg.start_line,
                seg.end_line
            );
            return self.char_split(&seg.text, path, seg.start_line, seg.end_line);
        }

        let mut work = Vec::new();
        for (from, to) in self.pack_lines(&lines) {
            let text = lines[from..to].join("\n");
            let start_line = (seg.start_line + from).min(seg.end_line);
            let end_line = (seg.start_line + to - 1).min(seg.end_line);
            if self.counter.count(&text) <= self.max_tokens {
                if !text.trim().is_empty() {
                    work.push(Work::Emit(self.chunk(
                        text,
                        path,
                        SymbolType::LineSplitSegment,
                        start_line,
                        end_line,
                    )));
                }
            } else if to - from > 1 {
                let mid = from + (to - from) / 2;
                for (a, b) in [(from, mid), (mid, to)] {
                    work.push(Work::Split(Segment {
                        text: lines[a..b].join("\n"),
                        start_line: (seg.start_line + a).min(seg.end_line),
                        end_line: (seg.start_line + b - 1).min(seg.end_line),
                        depth: seg.depth + 1,
                    }));
                }
            } else {
                work.push(Work::Split(Segment {
                    text,
                    start_line,
                    end_line,
                    depth: seg.depth + 1,
                }));
            }
        }
        work
    }

    /// Greedy packing by per-line estimates. Returns `[from, to)` line ranges
    /// covering every line; a buffer always takes at least one line.
    fn pack_lines(&self, lines: &[&str]) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        let mut from = 0;
        let mut tokens = 0;
        for (i, line) in lines.iter().enumerate() {
            let cost = self.counter.count(line) + usize::from(i > from);
            if i > from && tokens + cost > self.max_tokens {
                ranges.push((from, i));
                from = i;
                tokens = self.counter.count(line);
            } else {
                tokens += cost;
            }
        }
        if from < lines.len() {
            ranges.push((from, lines.len()));
        }
        ranges
    }

    fn split_single_line(&self, seg: &Segment, path: &str) -> Vec<Work> {
        if seg.text.trim().is_empty() {
            return Vec::new();
        }
        if self.counter.count(&seg.text) > self.max_tokens {
            return self.char_split(&seg.text, path, seg.start_line, seg.end_line);
        }
        // Survived trim but holds nothing printable, e.g. only control characters.
        let symbol_type = if seg.text.chars().all(|c| c.is_whitespace() || c.is_control()) {
            SymbolType::WhitespaceOrNoNewlineChunk
        } else {
            SymbolType::SingleLineSmallChunk
        };
        vec![Work::Emit(self.chunk(
            seg.text.clone(),
            path,
            symbol_type,
            seg.start_line,
            seg.end_line,
        ))]
    }

    /// Last resort: slices of `max_tokens * 3` characters, shrunk by 10% until
    /// they fit. Every slice keeps the original line range.
    fn char_split(&self, text: &str, path: &str, start_line: usize, end_line: usize) -> Vec<Work> {
        let chars: Vec<char> = text.chars().collect();
        let initial = self.max_tokens.saturating_mul(CHARS_PER_TOKEN).max(1);
        let mut work = Vec::new();
        let mut pos = 0;
        while pos < chars.len() {
            let mut size = initial.min(chars.len() - pos);
            let mut slice: String = chars[pos..pos + size].iter().collect();
            while size > 1 && self.counter.count(&slice) > self.max_tokens {
                size = (size * 9 / 10).clamp(1, size - 1);
                slice = chars[pos..pos + size].iter().collect();
            }
            pos += size;
            if slice.trim().is_empty() {
                continue;
            }
            let mut chunk = self.chunk(slice, path, SymbolType::CharSplitSegment, start_line, end_line);
            chunk.note = Some(CHAR_SPLIT_NOTE.to_string());
            work.push(Work::Emit(chunk));
        }
        work
    }

    fn chunk(&self, text: String, path: &str, symbol_type: SymbolType, start_line: usize, end_line: usize) -> Chunk {
        Chunk {
            text,
            file_path: path.to_string(),
            symbol_type,
            symbol_name: None,
            start_line,
            end_line,
            note: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn splitter(max_tokens: usize) -> ChunkSplitter {
        ChunkSplitter::new(TokenCounter::heuristic(), max_tokens)
    }

    fn tokens(text: &str) -> usize {
        TokenCounter::heuristic().count(text)
    }

    #[test]
    fn oversized_function_becomes_contiguous_segments() {
        // 200 lines of 100 chars: about 5000 tokens against a 2000 ceiling.
        let body: Vec<String> = (0..200).map(|i| format!("{:<100}", format!("x{i} = {i}"))).collect();
        let text = body.join("\n");
        assert!(tokens(&text) >= 5000);

        let chunks = splitter(2000).split(&text, "big.py", 11, 210);
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| tokens(&c.text) <= 2000));
        assert!(chunks.iter().all(|c| c.symbol_type == SymbolType::LineSplitSegment));
        assert_eq!(chunks.first().unwrap().start_line, 11);
        assert_eq!(chunks.last().unwrap().end_line, 210);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_line, pair[0].end_line + 1);
        }
    }

    #[test]
    fn huge_single_line_terminates_within_ceiling() {
        let text = "a".repeat(1_000_000);
        let chunks = splitter(2000).split(&text, "min.js", 1, 1);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| tokens(&c.text) <= 2000));
        assert!(chunks.iter().all(|c| c.symbol_type == SymbolType::CharSplitSegment));
        assert!(chunks.iter().all(|c| c.note.as_deref() == Some(CHAR_SPLIT_NOTE)));
        let total: usize = chunks.iter().map(|c| c.text.len()).sum();
        assert_eq!(total, 1_000_000);
    }

    #[test]
    fn char_split_keeps_original_range() {
        let text = format!("short\n{}\nshort", "b".repeat(400));
        let chunks = splitter(20).split(&text, "f.js", 7, 9);
        let char_chunks: Vec<_> = chunks
            .iter()
            .filter(|c| c.symbol_type == SymbolType::CharSplitSegment)
            .collect();
        assert!(char_chunks.len() > 1);
        assert!(char_chunks.iter().all(|c| (c.start_line, c.end_line) == (8, 8)));
        assert_eq!(chunks.first().unwrap().start_line, 7);
        assert_eq!(chunks.last().unwrap().end_line, 9);
    }

    #[test]
    fn empty_and_whitespace_input_yield_nothing() {
        assert!(splitter(10).split("", "e.py", 1, 1).is_empty());
        assert!(splitter(10).split("   \n\t\n  ", "e.py", 1, 3).is_empty());
        assert!(splitter(1).split(&" ".repeat(500), "e.py", 1, 1).is_empty());
    }

    #[test]
    fn small_single_lines_are_single_line_chunks() {
        for text in ["abc", "abc\n", "  x = 1"] {
            let chunks = splitter(10).split(text, "s.py", 4, 4);
            assert_eq!(chunks.len(), 1);
            assert_eq!(chunks[0].symbol_type, SymbolType::SingleLineSmallChunk);
            assert_eq!((chunks[0].start_line, chunks[0].end_line), (4, 4));
        }
    }

    #[test]
    fn control_only_line_is_tagged_as_whitespace() {
        let chunks = splitter(10).split("\u{1}\u{7}", "s.py", 2, 2);
        assert_eq!(chunks[0].symbol_type, SymbolType::WhitespaceOrNoNewlineChunk);
    }

    #[test]
    fn bpe_counts_respect_the_ceiling() {
        let counter = TokenCounter::for_model(crate::tokens::DEFAULT_TOKENIZER_MODEL);
        let lines: Vec<String> = (0..300)
            .map(|i| match i % 4 {
                0 => format!("    result_{i} = compute(alpha={i}, beta=\"{}\")", "ü".repeat(i % 23)),
                1 => format!("    # {}", "lorem ipsum dolor ".repeat(i % 9)),
                2 => "        ".repeat(i % 5),
                _ => format!("{}{}", "0x1f".repeat(i % 17), "}}]);".repeat(i % 3)),
            })
            .collect();
        let text = lines.join("\n");
        let splitter = ChunkSplitter::new(counter.clone(), 40);
        let chunks = splitter.split(&text, "mixed.py", 1, 300);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(counter.count(&c.text) <= 40, "{}-{} over ceiling", c.start_line, c.end_line);
            assert!(1 <= c.start_line && c.start_line <= c.end_line && c.end_line <= 300);
        }
    }

    #[test]
    fn nul_bytes_are_removed() {
        let chunks = splitter(10).split("a\0b", "n.py", 1, 1);
        assert_eq!(chunks[0].text, "ab");
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let text = "é".repeat(300);
        let chunks = splitter(10).split(&text, "u.py", 1, 1);
        assert!(chunks.iter().all(|c| tokens(&c.text) <= 10));
        assert_eq!(chunks.iter().map(|c| c.text.chars().count()).sum::<usize>(), 300);
    }

    proptest! {
        #[test]
        fn every_chunk_fits_and_stays_in_range(
            lines in prop::collection::vec("[a-z ]{0,120}", 1..60),
            ceiling in 5usize..80,
            start in 1usize..500,
        ) {
            let text = lines.join("\n");
            let end = start + lines.len() - 1;
            let chunks = splitter(ceiling).split(&text, "p.rs", start, end);
            for c in &chunks {
                prop_assert!(tokens(&c.text) <= ceiling);
                prop_assert!(start <= c.start_line);
                prop_assert!(c.start_line <= c.end_line);
                prop_assert!(c.end_line <= end);
                prop_assert!(!c.text.trim().is_empty());
            }
            for pair in chunks.windows(2) {
                prop_assert!(pair[0].start_line <= pair[1].start_line);
            }
        }
    }
}
