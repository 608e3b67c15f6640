//! Splits repository files into chunks for embedding.
//! Python files are cut along function and class definitions; everything else
//! (and any Python file that does not parse) goes through overlapping line windows.
//! Anything over the token ceiling is handed to the [`ChunkSplitter`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser};

use crate::config::ChunkingConfig;
use crate::splitter::ChunkSplitter;
use crate::tokens::TokenCounter;

/// Which strategy produced a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolType {
    Function,
    Class,
    AsyncFunction,
    LineWindow,
    LineSplitSegment,
    CharSplitSegment,
    SingleLineSmallChunk,
    WhitespaceOrNoNewlineChunk,
}

impl SymbolType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::AsyncFunction => "async_function",
            Self::LineWindow => "line_window",
            Self::LineSplitSegment => "line_split_segment",
            Self::CharSplitSegment => "char_split_segment",
            Self::SingleLineSmallChunk => "single_line_small_chunk",
            Self::WhitespaceOrNoNewlineChunk => "whitespace_or_no_newline_chunk",
        }
    }
}

/// A slice of a source file, with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    /// Relative to the repository root.
    pub file_path: String,
    pub symbol_type: SymbolType,
    /// Function or class name; only set for definition chunks.
    pub symbol_name: Option<String>,
    /// 1-indexed, inclusive.
    pub start_line: usize,
    /// 1-indexed, inclusive.
    pub end_line: usize,
    /// Free-form remark, e.g. that the line range is approximate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Languages the chunker knows how to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    Other,
}

impl Language {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("py") => Self::Python,
            _ => Self::Other,
        }
    }
}

/// Removes NUL bytes, which embedding APIs and databases reject.
pub fn sanitize(text: &str) -> String {
    if text.contains('\0') {
        text.replace('\0', "")
    } else {
        text.to_string()
    }
}

/// Turns files into ceiling-respecting chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    counter: TokenCounter,
    splitter: ChunkSplitter,
    max_tokens: usize,
    window_lines: usize,
    window_step: usize,
}

impl Chunker {
    pub fn new(counter: TokenCounter, config: &ChunkingConfig) -> Self {
        Self {
            splitter: ChunkSplitter::new(counter.clone(), config.max_tokens_per_chunk),
            counter,
            max_tokens: config.max_tokens_per_chunk,
            window_lines: config.window_lines.max(1),
            window_step: config.window_step(),
        }
    }

    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    /// Reads and chunks one file. An unreadable file yields no chunks.
    pub fn chunk_file(&self, path: &Path, relative: &str) -> Vec<Chunk> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("skipping {relative}: {e}");
                return Vec::new();
            }
        };
        let source = String::from_utf8_lossy(&bytes);
        self.chunk_source(&source, relative, Language::from_path(path))
    }

    /// Chunks already-loaded source text.
    pub fn chunk_source(&self, source: &str, relative: &str, language: Language) -> Vec<Chunk> {
        let lines: Vec<&str> = source.lines().collect();
        if language == Language::Python {
            match python_definitions(source) {
                Ok(defs) if !defs.is_empty() => return self.definition_chunks(&lines, defs, relative),
                Ok(_) => tracing::debug!("{relative}: no definitions, using line windows"),
                Err(e) => tracing::debug!("{relative}: {e}, using line windows"),
            }
        }
        self.window_chunks(&lines, relative)
    }

    fn definition_chunks(&self, lines: &[&str], defs: Vec<Definition>, relative: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for def in defs {
            let end = def.end_line.min(lines.len());
            if def.start_line > end {
                continue;
            }
            let text = sanitize(&lines[def.start_line - 1..end].join("\n"));
            if self.counter.count(&text) > self.max_tokens {
                chunks.extend(self.splitter.split(&text, relative, def.start_line, end));
            } else if !text.trim().is_empty() {
                chunks.push(Chunk {
                    text,
                    file_path: relative.to_string(),
                    symbol_type: def.kind,
                    symbol_name: Some(def.name),
                    start_line: def.start_line,
                    end_line: end,
                    note: None,
                });
            }
        }
        chunks
    }

    fn window_chunks(&self, lines: &[&str], relative: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for (start, end) in windows(lines.len(), self.window_lines, self.window_step) {
            let text = sanitize(&lines[start..end].join("\n"));
            if self.counter.count(&text) > self.max_tokens {
                chunks.extend(self.splitter.split(&text, relative, start + 1, end));
            } else if !text.trim().is_empty() {
                chunks.push(Chunk {
                    text,
                    file_path: relative.to_string(),
                    symbol_type: SymbolType::LineWindow,
                    symbol_name: None,
                    start_line: start + 1,
                    end_line: end,
                    note: None,
                });
            }
        }
        chunks
    }
}

/// Zero-based, end-exclusive line windows over `total` lines.
fn windows(total: usize, size: usize, step: usize) -> impl Iterator<Item = (usize, usize)> {
    let step = step.max(1);
    (0..total)
        .step_by(step)
        .map(move |start| (start, (start + size).min(total)))
}

#[derive(Debug)]
struct Definition {
    kind: SymbolType,
    name: String,
    start_line: usize,
    end_line: usize,
}

#[derive(Debug, thiserror::Error)]
enum ParseError {
    #[error("failed to load Python grammar: {0}")]
    Language(#[from] tree_sitter::LanguageError),
    #[error("parser returned no tree")]
    NoTree,
    #[error("syntax error")]
    Syntax,
}

/// Every function and class definition, nested ones included, in source order.
fn python_definitions(source: &str) -> Result<Vec<Definition>, ParseError> {
    let language: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
    let mut parser = Parser::new();
    parser.set_language(&language)?;
    let tree = parser.parse(source, None).ok_or(ParseError::NoTree)?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(ParseError::Syntax);
    }

    let bytes = source.as_bytes();
    let mut defs = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if let Some(kind) = definition_kind(&node) {
            let name = node
                .child_by_field_name("name")
                .and_then(|n| n.utf8_text(bytes).ok())
                .unwrap_or_default()
                .to_string();
            defs.push(Definition {
                kind,
                name,
                start_line: node.start_position().row + 1,
                end_line: code_end_row(node) + 1,
            });
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    Ok(defs)
}

/// Last row holding code in `node`. Trailing comments belong to the grammar
/// node but not to the definition.
fn code_end_row(node: Node) -> usize {
    let mut node = node;
    loop {
        let mut cursor = node.walk();
        let last = node.children(&mut cursor).filter(|c| c.kind() != "comment").last();
        match last {
            Some(child) => node = child,
            None => return node.end_position().row,
        }
    }
}

fn definition_kind(node: &Node) -> Option<SymbolType> {
    match node.kind() {
        "class_definition" => Some(SymbolType::Class),
        "function_definition" => {
            let is_async = node.child(0).is_some_and(|c| c.kind() == "async");
            Some(if is_async {
                SymbolType::AsyncFunction
            } else {
                SymbolType::Function
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn chunker() -> Chunker {
        Chunker::new(TokenCounter::heuristic(), &ChunkingConfig::default())
    }

    fn ranges(chunks: &[Chunk]) -> Vec<(usize, usize)> {
        chunks.iter().map(|c| (c.start_line, c.end_line)).collect()
    }

    #[test]
    fn small_python_function_is_one_chunk() {
        let src = "def add(a, b):\n    total = a + b\n    return total\n";
        let chunks = chunker().chunk_source(src, "math.py", Language::Python);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].symbol_type, SymbolType::Function);
        assert_eq!(chunks[0].symbol_name.as_deref(), Some("add"));
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 3));
        assert!(chunks[0].text.starts_with("def add"));
    }

    #[test]
    fn classes_methods_and_async_functions_in_line_order() {
        let src = "\
import os

class Greeter:
    def hello(self):
        return 'hi'

async def fetch():
    return await os.stat('.')
";
        let chunks = chunker().chunk_source(src, "g.py", Language::Python);
        let kinds: Vec<_> = chunks.iter().map(|c| c.symbol_type).collect();
        assert_eq!(
            kinds,
            vec![SymbolType::Class, SymbolType::Function, SymbolType::AsyncFunction]
        );
        assert_eq!(ranges(&chunks), vec![(3, 5), (4, 5), (7, 8)]);
        assert_eq!(chunks[2].symbol_name.as_deref(), Some("fetch"));
    }

    #[test]
    fn trailing_comments_do_not_extend_a_definition() {
        let src = "\
x = 0
def f():
    return 1
    # trailing
    # more

class K:
    \"\"\"Doc
    spanning lines.\"\"\"
# after K
";
        let chunks = chunker().chunk_source(src, "c.py", Language::Python);
        assert_eq!(ranges(&chunks), vec![(2, 3), (7, 9)]);
        assert!(!chunks[0].text.contains("trailing"));
    }

    #[test]
    fn python_without_definitions_uses_windows() {
        let src = "x = 1\ny = 2\nprint(x + y)\n";
        let chunks = chunker().chunk_source(src, "script.py", Language::Python);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].symbol_type, SymbolType::LineWindow);
    }

    #[test]
    fn python_syntax_error_falls_back_to_windows() {
        let src = "def broken(:\n    pass\n";
        let chunks = chunker().chunk_source(src, "bad.py", Language::Python);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.symbol_type == SymbolType::LineWindow));
    }

    #[test]
    fn forty_lines_make_four_overlapping_windows() {
        let src: String = (1..=40).map(|i| format!("line {i}\n")).collect();
        let chunks = chunker().chunk_source(&src, "notes.cfg", Language::Other);
        assert_eq!(ranges(&chunks), vec![(1, 15), (13, 27), (25, 39), (37, 40)]);
        assert!(chunks[3].text.ends_with("line 40"));
    }

    #[test]
    fn overlap_larger_than_window_still_terminates() {
        let config = ChunkingConfig {
            window_lines: 2,
            window_overlap: 5,
            ..ChunkingConfig::default()
        };
        let c = Chunker::new(TokenCounter::heuristic(), &config);
        let chunks = c.chunk_source("a\nb\nc\n", "x.js", Language::Other);
        assert_eq!(ranges(&chunks), vec![(1, 2), (2, 3), (3, 3)]);
    }

    #[test]
    fn blank_windows_are_dropped_and_nul_bytes_stripped() {
        let mut src = String::from("a\0b\n");
        src.push_str(&"\n".repeat(30));
        let chunks = chunker().chunk_source(&src, "x.js", Language::Other);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.starts_with("ab"));
    }

    #[test]
    fn empty_file_has_no_chunks() {
        assert!(chunker().chunk_source("", "empty.py", Language::Python).is_empty());
        assert!(chunker().chunk_source("", "empty.js", Language::Other).is_empty());
    }

    #[test]
    fn oversized_window_goes_through_the_splitter() {
        let config = ChunkingConfig {
            max_tokens_per_chunk: 50,
            max_tokens_per_batch: 500,
            ..ChunkingConfig::default()
        };
        let c = Chunker::new(TokenCounter::heuristic(), &config);
        let src: String = (0..15).map(|_| format!("{}\n", "y".repeat(60))).collect();
        let chunks = c.chunk_source(&src, "big.js", Language::Other);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|ch| c.counter().count(&ch.text) <= 50));
        assert!(chunks.iter().all(|ch| ch.start_line >= 1 && ch.end_line <= 15));
    }

    #[test]
    fn chunk_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.py");
        std::fs::write(&path, "class A:\n    pass\n").unwrap();
        let chunks = chunker().chunk_file(&path, "m.py");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].symbol_type, SymbolType::Class);
        assert!(chunker().chunk_file(&dir.path().join("missing.py"), "missing.py").is_empty());
    }

    #[test]
    fn bpe_counted_chunks_stay_under_the_ceiling() {
        let config = ChunkingConfig {
            max_tokens_per_chunk: 60,
            ..ChunkingConfig::default()
        };
        let counter = TokenCounter::for_model(crate::tokens::DEFAULT_TOKENIZER_MODEL);
        let c = Chunker::new(counter.clone(), &config);
        let mut src = String::from("def long_one(a, b):\n");
        for i in 0..120 {
            src.push_str(&format!("    v{i} = a * {i} + b  # сумма {}\n", "→".repeat(i % 11)));
        }
        src.push_str("\nclass Tiny:\n    pass\n");
        for language in [Language::Python, Language::Other] {
            let chunks = c.chunk_source(&src, "long.py", language);
            assert!(chunks.len() > 2);
            assert!(chunks.iter().all(|ch| counter.count(&ch.text) <= 60));
        }
    }

    fn source_line() -> impl Strategy<Value = String> {
        prop_oneof![
            "def [a-z]{1,6}\\(\\):",
            "class [A-Z][a-z]{0,5}:",
            "    (return|pass|x =) [a-z0-9 +]{0,60}",
            "[a-z_]{1,8} = [a-z0-9 ]{0,200}",
            "#[ a-z]{0,40}",
            Just(String::new()),
        ]
    }

    proptest! {
        #[test]
        fn chunks_stay_inside_the_file_and_under_the_ceiling(
            lines in prop::collection::vec(source_line(), 0..80),
            ceiling in 8usize..120,
            python in any::<bool>(),
        ) {
            let src = lines.join("\n");
            let total = src.lines().count();
            let config = ChunkingConfig {
                max_tokens_per_chunk: ceiling,
                ..ChunkingConfig::default()
            };
            let c = Chunker::new(TokenCounter::heuristic(), &config);
            let language = if python { Language::Python } else { Language::Other };
            for ch in c.chunk_source(&src, "gen.py", language) {
                prop_assert!(1 <= ch.start_line);
                prop_assert!(ch.start_line <= ch.end_line);
                prop_assert!(ch.end_line <= total);
                prop_assert!(c.counter().count(&ch.text) <= ceiling);
                prop_assert!(!ch.text.trim().is_empty());
            }
        }
    }
}
