use sha2::{Digest, Sha256};

/// SHA256 of the exact bytes, lowercase hex (64 chars)
pub fn digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Outcome of comparing fresh content with the stored File Record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    New,
    Modified,
    Unchanged,
}

impl FileChange {
    pub fn detect(stored_digest: Option<&str>, current_digest: &str) -> Self {
        match stored_digest {
            None => FileChange::New,
            Some(stored) if stored != current_digest => FileChange::Modified,
            Some(_) => FileChange::Unchanged,
        }
    }

    pub fn needs_indexing(&self) -> bool {
        !matches!(self, FileChange::Unchanged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable_and_distinct() {
        let a = digest(b"fn main() {}\n");
        assert_eq!(a, digest(b"fn main() {}\n"));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, digest(b"fn main() {}"));
    }

    #[test]
    fn test_known_vector() {
        assert_eq!(
            digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_detect_change() {
        let d = digest(b"x");
        assert_eq!(FileChange::detect(None, &d), FileChange::New);
        assert_eq!(FileChange::detect(Some("old"), &d), FileChange::Modified);
        assert_eq!(FileChange::detect(Some(d.as_str()), &d), FileChange::Unchanged);
        assert!(FileChange::New.needs_indexing());
        assert!(!FileChange::Unchanged.needs_indexing());
    }
}
