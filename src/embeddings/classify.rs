//! Code-vs-prose classification, shared by chunk indexing and query embedding.

use regex::RegexSet;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Code,
    Prose,
}

/// Strategy deciding which embedding model a text goes to
pub trait Classifier: Send + Sync {
    fn classify(&self, text: &str) -> ContentKind;
}

fn structural_patterns() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            // call or declaration with parentheses: `foo(`
            r"\w+\(",
            r"\bclass\s+\w+",
            r"\bdef\s+\w+",
            r"\bfn\s+\w+",
            r"\bfunction\b",
            r"\breturn\b",
            r"\b(const|let|var)\s+\w+",
            r"=>",
            r"(?m)^\s*(import|use|#include|from\s+\S+\s+import)\b",
        ])
        .expect("Invalid regex pattern")
    })
}

/// Structural regex heuristics plus brace density.
///
/// Any structural match, or at least one brace/semicolon per 40 characters across
/// three or more of them, marks the text as code.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    fn is_brace_heavy(text: &str) -> bool {
        let symbols = text.chars().filter(|c| matches!(c, '{' | '}' | ';')).count();
        let len = text.chars().count().max(1);
        symbols >= 3 && symbols * 40 >= len
    }
}

impl Classifier for HeuristicClassifier {
    fn classify(&self, text: &str) -> ContentKind {
        if structural_patterns().is_match(text) || Self::is_brace_heavy(text) {
            ContentKind::Code
        } else {
            ContentKind::Prose
        }
    }
}
