use serde::Serialize;

use crate::db::Db;
use crate::error::Result;
use crate::ingest::db_writer::list_file_paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    File,
}

/// One node of the repository browser tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub name: String,
    /// Repository-relative path of this node
    pub path: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub children: Vec<TreeNode>,
}

/// Nest slash-separated paths into folders and files, keeping first-seen order.
pub fn build_tree<S: AsRef<str>>(paths: &[S]) -> Vec<TreeNode> {
    let mut root: Vec<TreeNode> = Vec::new();

    for path in paths {
        let parts: Vec<&str> = path.as_ref().split('/').filter(|p| !p.is_empty()).collect();
        let mut level = &mut root;

        for (depth, part) in parts.iter().enumerate() {
            let is_leaf = depth + 1 == parts.len();
            let kind = if is_leaf { NodeKind::File } else { NodeKind::Folder };

            let pos = match level.iter().position(|n| n.name == *part && n.kind == kind) {
                Some(pos) => pos,
                None => {
                    level.push(TreeNode {
                        name: part.to_string(),
                        path: parts[..=depth].join("/"),
                        kind,
                        children: Vec::new(),
                    });
                    level.len() - 1
                }
            };
            level = &mut level[pos].children;
        }
    }

    root
}

/// Tree of every File Record in a repository
pub async fn repository_tree(db: &Db, repository_id: &str) -> Result<Vec<TreeNode>> {
    let paths = list_file_paths(db, repository_id).await?;
    Ok(build_tree(&paths))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_tree_nests_folders() {
        let tree = build_tree(&["README.md", "src/main.rs", "src/ingest/chunker.rs", "src/lib.rs"]);

        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].name, "README.md");
        assert_eq!(tree[0].kind, NodeKind::File);

        let src = &tree[1];
        assert_eq!(src.kind, NodeKind::Folder);
        assert_eq!(src.path, "src");
        let names: Vec<&str> = src.children.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["main.rs", "ingest", "lib.rs"]);
        assert_eq!(src.children[1].children[0].path, "src/ingest/chunker.rs");
    }

    #[test]
    fn test_tree_json_shape() {
        let tree = build_tree(&["a/b.rs"]);
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "name": "a",
                "path": "a",
                "type": "folder",
                "children": [{"name": "b.rs", "path": "a/b.rs", "type": "file", "children": []}]
            }])
        );
    }

    #[test]
    fn test_empty_tree() {
        let empty: Vec<String> = Vec::new();
        assert!(build_tree(&empty).is_empty());
    }
}
