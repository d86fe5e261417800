//! Candidate selection: which tree entries are worth fetching, and which fetched
//! payloads are text.

use regex::Regex;
use std::sync::OnceLock;

use crate::remote::{EntryKind, TreeEntry};

/// Directory names whose contents are never indexed
const EXCLUDED_DIRS: &[&str] = &["node_modules", "dist", "build", "target", "vendor", "__pycache__"];

fn binary_extension_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\.(png|jpe?g|gif|svg|ico|webp|bmp|mp4|mp3|wav|mov|avi|zip|gz|tgz|tar|7z|rar|exe|dll|so|dylib|bin|class|jar|pdf|ttf|otf|woff2?|eot)$",
        )
        .expect("Invalid regex pattern")
    })
}

/// Extension pre-filter; avoids fetching content that cannot be text
pub fn has_binary_extension(path: &str) -> bool {
    binary_extension_regex().is_match(path)
}

/// True if any path component is hidden (`.git`, `.github/...`, `.env`) or an excluded directory
fn is_excluded_path(path: &str) -> bool {
    let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
    while let Some(component) = components.next() {
        if component.starts_with('.') {
            return true;
        }
        // only directories are matched against the exclusion list
        if components.peek().is_some() && EXCLUDED_DIRS.contains(&component) {
            return true;
        }
    }
    false
}

/// Keep blobs that pass the path and extension filters, preserving listing order.
pub fn select_candidates(entries: Vec<TreeEntry>) -> Vec<TreeEntry> {
    entries
        .into_iter()
        .filter(|entry| entry.kind == EntryKind::Blob)
        .filter(|entry| !is_excluded_path(&entry.path))
        .filter(|entry| !has_binary_extension(&entry.path))
        .collect()
}

/// Authoritative post-fetch check: any NUL byte marks the payload as binary.
pub fn is_binary_content(bytes: &[u8]) -> bool {
    bytes.contains(&0)
}

/// Decode fetched bytes as text, or `None` when the payload is binary.
///
/// Invalid UTF-8 sequences are replaced rather than rejected; only NUL bytes disqualify.
pub fn decode_text(bytes: &[u8]) -> Option<String> {
    if is_binary_content(bytes) {
        return None;
    }
    Some(String::from_utf8_lossy(bytes).into_owned())
}

/// Lowercase extension without the dot, empty when there is none
pub fn extension_of(path: &str) -> String {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_lowercase(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::EntryKind;

    fn paths(entries: &[TreeEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn test_select_candidates_filters_and_keeps_order() {
        let entries = vec![
            TreeEntry::blob("README.md"),
            TreeEntry::blob(".gitignore"),
            TreeEntry::blob(".github/workflows/ci.yml"),
            TreeEntry::blob("node_modules/left-pad/index.js"),
            TreeEntry::blob("web/dist/app.js"),
            TreeEntry::blob("assets/logo.PNG"),
            TreeEntry::blob("src/main.rs"),
            TreeEntry {
                path: "src".to_string(),
                kind: EntryKind::Tree,
            },
            TreeEntry::blob("docs/build.md"),
        ];

        let selected = select_candidates(entries);
        assert_eq!(paths(&selected), vec!["README.md", "src/main.rs", "docs/build.md"]);
    }

    #[test]
    fn test_binary_extension() {
        assert!(has_binary_extension("a/b/photo.jpeg"));
        assert!(has_binary_extension("font.woff2"));
        assert!(!has_binary_extension("src/lib.rs"));
        assert!(!has_binary_extension("pngs.txt"));
    }

    #[test]
    fn test_null_byte_detection() {
        assert!(is_binary_content(b"abc\0def"));
        assert!(!is_binary_content("héllo".as_bytes()));
        assert_eq!(decode_text(b"fn main() {}").as_deref(), Some("fn main() {}"));
        assert!(decode_text(b"\x7fELF\0\0").is_none());
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("src/Main.RS"), "rs");
        assert_eq!(extension_of("Makefile"), "");
        assert_eq!(extension_of("web/.eslintrc"), "");
        assert_eq!(extension_of("a.b/c"), "");
        assert_eq!(extension_of("archive.tar.gz"), "gz");
    }
}
