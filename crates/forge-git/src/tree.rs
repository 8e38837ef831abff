//! In-memory tree construction.
//!
//! Overlay entries arrive as flat repository-relative paths; git wants nested
//! trees. We fold the flat entries into a nested node map, then rebuild trees
//! bottom-up on top of the base tree so untouched subtrees are reused by oid.

use std::collections::BTreeMap;

use git2::{ObjectType, Oid, Repository, Tree};

use crate::{GitError, GitResult};

const FILEMODE_BLOB: i32 = 0o100644;
const FILEMODE_TREE: i32 = 0o040000;

/// One overlay entry applied to the base tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeChange {
    /// Write these bytes at the path (creating parents as needed).
    Blob(Vec<u8>),
    /// Remove the path. Removing an absent path is a no-op.
    Delete,
}

enum Node {
    Blob(Oid),
    Delete,
    Dir(BTreeMap<String, Node>),
}

pub(crate) fn build_tree(
    repo: &Repository,
    base_tree: Option<&Tree<'_>>,
    changes: &[(String, TreeChange)],
) -> GitResult<Oid> {
    let mut root = BTreeMap::new();
    for (path, change) in changes {
        let node = match change {
            TreeChange::Blob(bytes) => Node::Blob(repo.blob(bytes)?),
            TreeChange::Delete => Node::Delete,
        };
        insert_node(&mut root, path, node);
    }
    write_level(repo, base_tree, &root)
}

fn insert_node(root: &mut BTreeMap<String, Node>, path: &str, node: Node) {
    let mut segments = path.split('/').peekable();
    let mut level = root;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            level.insert(segment.to_string(), node);
            return;
        }
        let entry = level
            .entry(segment.to_string())
            .or_insert_with(|| Node::Dir(BTreeMap::new()));
        if !matches!(entry, Node::Dir(_)) {
            // A blob write or delete at an ancestor path is shadowed by the
            // deeper entry; the deeper path wins.
            *entry = Node::Dir(BTreeMap::new());
        }
        let Node::Dir(children) = entry else {
            unreachable!();
        };
        level = children;
    }
}

fn write_level(
    repo: &Repository,
    base_tree: Option<&Tree<'_>>,
    nodes: &BTreeMap<String, Node>,
) -> GitResult<Oid> {
    let mut builder = repo.treebuilder(base_tree)?;

    for (name, node) in nodes {
        match node {
            Node::Blob(oid) => {
                builder.insert(name, *oid, FILEMODE_BLOB)?;
            }
            Node::Delete => {
                if builder.get(name)?.is_some() {
                    builder.remove(name)?;
                }
            }
            Node::Dir(children) => {
                let sub_base = subtree_of(repo, base_tree, name)?;
                let sub_oid = write_level(repo, sub_base.as_ref(), children)?;
                let sub_tree = repo
                    .find_tree(sub_oid)
                    .map_err(|err| GitError::CorruptObject {
                        oid: sub_oid,
                        detail: err.message().to_string(),
                    })?;
                if sub_tree.len() == 0 {
                    // Git has no empty directories; drop the entry entirely.
                    if builder.get(name)?.is_some() {
                        builder.remove(name)?;
                    }
                } else {
                    builder.insert(name, sub_oid, FILEMODE_TREE)?;
                }
            }
        }
    }

    Ok(builder.write()?)
}

fn subtree_of<'r>(
    repo: &'r Repository,
    base_tree: Option<&Tree<'_>>,
    name: &str,
) -> GitResult<Option<Tree<'r>>> {
    let Some(base) = base_tree else {
        return Ok(None);
    };
    let Some(entry) = base.get_name(name) else {
        return Ok(None);
    };
    if entry.kind() != Some(ObjectType::Tree) {
        return Ok(None);
    }
    Ok(Some(repo.find_tree(entry.id())?))
}
