use regex::Regex;
use std::collections::VecDeque;
use std::iter::Enumerate;
use std::str::Lines;
use std::sync::OnceLock;

use crate::config::ChunkingConfig;

/// A chunk of file text with its position in the source
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    /// 1-based line number of the first line of `text`
    pub start_line: usize,
    pub tokens: usize,
}

/// Top-level definition at column 0 (Rust, JS/TS, Python, Go, Java-ish)
fn definition_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:(?:pub(?:\([^)]*\))?\s+)?(?:async\s+|unsafe\s+|const\s+)*(?:fn|struct|enum|trait|impl|mod)\b|(?:export\s+(?:default\s+)?)?(?:async\s+)?(?:function|class|interface)\b|export\b|module\.exports\b|(?:async\s+)?def\b|func\b)",
        )
        .expect("Invalid regex pattern")
    })
}

/// Comments and attributes that lead into a definition and belong with it
fn is_preamble(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.is_empty()
        || trimmed.starts_with("//")
        || trimmed.starts_with("/*")
        || trimmed.starts_with('*')
        || trimmed.starts_with('#')
        || trimmed.starts_with('@')
}

/// Approximate token count: `ceil(words * factor)`.
///
/// Whitespace-separated words only; no real tokenizer is involved, so the count is
/// an estimate that errs high for prose and low for dense symbol runs.
pub fn estimate_tokens(text: &str, factor: f64) -> usize {
    let words = text.split_whitespace().count();
    (words as f64 * factor).ceil() as usize
}

/// Line-oriented, definition-aware splitter
#[derive(Debug, Clone)]
pub struct Chunker {
    max_tokens: usize,
    token_factor: f64,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            max_tokens: config.max_tokens.max(1),
            token_factor: config.token_factor,
        }
    }

    pub fn estimate_tokens(&self, text: &str) -> usize {
        estimate_tokens(text, self.token_factor)
    }

    /// Lazily split `text`; the iterator is single-pass.
    pub fn chunks<'a>(&self, text: &'a str) -> Chunks<'a> {
        Chunks {
            lines: text.lines().enumerate(),
            pending: VecDeque::new(),
            max_tokens: self.max_tokens,
            token_factor: self.token_factor,
        }
    }
}

/// Iterator returned by [`Chunker::chunks`]
pub struct Chunks<'a> {
    lines: Enumerate<Lines<'a>>,
    /// Lines already read that open the next chunk
    pending: VecDeque<(usize, &'a str)>,
    max_tokens: usize,
    token_factor: f64,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let mut buf: Vec<(usize, &'a str)> = Vec::new();
        let mut tokens = 0;

        while let Some((idx, line)) = self.pending.pop_front().or_else(|| self.lines.next()) {
            let line_tokens = estimate_tokens(line, self.token_factor);

            if buf.is_empty() {
                if line.trim().is_empty() {
                    continue;
                }
                // an over-long single line still becomes its own chunk
                buf.push((idx, line));
                tokens = line_tokens;
                continue;
            }

            if definition_regex().is_match(line) && !buf.iter().all(|(_, l)| is_preamble(l)) {
                // doc comments and attributes move with the definition they precede
                let lead_in = buf.iter().rev().take_while(|(_, l)| is_preamble(l)).count();
                let carried = buf.split_off(buf.len() - lead_in);
                self.pending.extend(carried);
                self.pending.push_back((idx, line));
                break;
            }

            if tokens + line_tokens > self.max_tokens {
                self.pending.push_back((idx, line));
                break;
            }

            buf.push((idx, line));
            tokens += line_tokens;
        }

        while buf.last().is_some_and(|(_, l)| l.trim().is_empty()) {
            buf.pop();
        }
        let start_line = buf.first()?.0 + 1;
        let text = buf.iter().map(|(_, l)| *l).collect::<Vec<_>>().join("\n");

        Some(Chunk {
            tokens: estimate_tokens(&text, self.token_factor),
            text,
            start_line,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max_tokens: usize) -> Chunker {
        Chunker::new(&ChunkingConfig {
            max_tokens,
            token_factor: 1.3,
        })
    }

    fn non_blank_lines(text: &str) -> Vec<&str> {
        text.lines().filter(|l| !l.trim().is_empty()).collect()
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens("", 1.3), 0);
        assert_eq!(estimate_tokens("   \t", 1.3), 0);
        // 1 * 1.3 -> 2
        assert_eq!(estimate_tokens("word", 1.3), 2);
        // 10 * 1.3 = 13
        assert_eq!(estimate_tokens(&"a ".repeat(10), 1.3), 13);
    }

    #[test]
    fn test_splits_on_top_level_definitions() {
        let text = "use std::io;\n\nfn a() {\n    1\n}\n\n/// docs\n#[inline]\npub fn b() {\n    2\n}\n";
        let chunks: Vec<Chunk> = chunker(500).chunks(text).collect();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "use std::io;");
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[1].text, "fn a() {\n    1\n}");
        assert_eq!(chunks[1].start_line, 3);
        // doc comment and attribute stay attached to their definition
        assert_eq!(chunks[2].text, "/// docs\n#[inline]\npub fn b() {\n    2\n}");
        assert_eq!(chunks[2].start_line, 7);
    }

    #[test]
    fn test_nested_definitions_do_not_split() {
        let text = "class A:\n    def one(self):\n        pass\n    def two(self):\n        pass\n";
        let chunks: Vec<Chunk> = chunker(500).chunks(text).collect();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_js_definitions() {
        let text = "const x = 1;\nexport default function f() {}\nasync function g() {}\nmodule.exports = { f };\n";
        let chunks: Vec<Chunk> = chunker(500).chunks(text).collect();
        assert_eq!(chunks.len(), 4);
    }

    #[test]
    fn test_coverage_preserves_non_blank_lines_in_order() {
        let text = "\n\nalpha beta\n\ngamma\nfn x() {}\n\n\ndelta epsilon zeta\n  eta\n\n";
        let chunks: Vec<Chunk> = chunker(4).chunks(text).collect();

        let rejoined: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let rejoined = rejoined.join("\n");
        assert_eq!(non_blank_lines(&rejoined), non_blank_lines(text));
        assert!(chunks.iter().all(|c| !c.text.trim().is_empty()));
        assert!(chunks.iter().all(|c| !c.text.ends_with('\n')));
    }

    #[test]
    fn test_token_budget_respected() {
        let text = (0..200)
            .map(|i| format!("let value_{} = compute({});", i, i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks: Vec<Chunk> = chunker(50).chunks(&text).collect();

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.tokens <= 50, "chunk has {} tokens", chunk.tokens);
            assert_eq!(chunk.tokens, estimate_tokens(&chunk.text, 1.3));
        }
    }

    #[test]
    fn test_overlong_line_is_its_own_chunk() {
        let long_line = "word ".repeat(100);
        let text = format!("short line\n{}\nafter", long_line.trim_end());
        let chunks: Vec<Chunk> = chunker(10).chunks(&text).collect();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].text, long_line.trim_end());
        assert_eq!(chunks[1].start_line, 2);
        assert!(chunks[1].tokens > 10);
    }

    #[test]
    fn test_interior_blank_lines_kept() {
        let text = "a b\n\nc d\n";
        let chunks: Vec<Chunk> = chunker(500).chunks(text).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "a b\n\nc d");
    }

    #[test]
    fn test_empty_and_blank_input() {
        assert_eq!(chunker(500).chunks("").count(), 0);
        assert_eq!(chunker(500).chunks("\n \n\t\n").count(), 0);
    }
}
