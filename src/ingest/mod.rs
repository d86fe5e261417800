pub mod chunker;
pub mod db_writer;
pub mod digest;
pub mod filter;
pub mod importer;
pub mod tree;

pub use chunker::{estimate_tokens, Chunk, Chunker};
pub use db_writer::{replace_file, ChunkWrite, FileWrite};
pub use digest::{digest, FileChange};
pub use filter::{is_binary_content, select_candidates};
pub use importer::{ImportRequest, ImportSummary, Importer};
pub use tree::{build_tree, repository_tree, TreeNode};
