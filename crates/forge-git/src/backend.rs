//! The repository adapter.
//!
//! A [`GitBackend`] wraps one `git2::Repository` behind a mutex; every write
//! (blob, tree, ref) goes through it, so branch updates are serialised
//! process-wide and the compare-and-swap check in [`GitBackend::commit_tree`]
//! is race-free for in-process callers. Nothing here writes the working
//! directory or the index except [`GitBackend::working_tree_sync`].

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use git2::{
    build::CheckoutBuilder, BranchType, ErrorCode, ObjectType, Oid, Repository, Signature, Tree,
};

use crate::commit_kind::{format_commit_message, parse_commit_kind, CommitKind};
use crate::tree::{build_tree, TreeChange};
use crate::{GitError, GitResult};

/// Commit author identity threaded in from settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Default for Author {
    fn default() -> Self {
        Self {
            name: "Forge".to_string(),
            email: "forge@localhost".to_string(),
        }
    }
}

/// Decoded commit header.
#[derive(Clone, Debug)]
pub struct CommitInfo {
    pub id: Oid,
    pub tree: Oid,
    pub parents: Vec<Oid>,
    pub author: Author,
    pub message: String,
    pub seconds: i64,
}

/// Result of a three-way tree merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    Clean(Oid),
    Conflicts(Vec<String>),
}

pub struct GitBackend {
    repo: Mutex<Repository>,
}

impl std::fmt::Debug for GitBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitBackend").finish_non_exhaustive()
    }
}

impl GitBackend {
    pub fn open(path: impl AsRef<Path>) -> GitResult<Self> {
        Ok(Self {
            repo: Mutex::new(Repository::open(path)?),
        })
    }

    /// Walk upward from `path` to the enclosing repository.
    pub fn discover(path: impl AsRef<Path>) -> GitResult<Self> {
        Ok(Self {
            repo: Mutex::new(Repository::discover(path)?),
        })
    }

    /// Initialise a fresh repository with an empty root commit on `branch`.
    pub fn init(path: impl AsRef<Path>, branch: &str, author: &Author) -> GitResult<Self> {
        let repo = Repository::init(path)?;
        {
            let tree_oid = repo.treebuilder(None)?.write()?;
            let tree = repo.find_tree(tree_oid)?;
            let sig = Signature::now(&author.name, &author.email)?;
            let refname = format!("refs/heads/{branch}");
            repo.commit(Some(&refname), &sig, &sig, "init", &tree, &[])?;
            repo.set_head(&refname)?;
        }
        Ok(Self {
            repo: Mutex::new(repo),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Repository> {
        // libgit2 state stays consistent across a payload panic; recover the
        // guard rather than wedging every session in the process.
        self.repo
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn workdir(&self) -> GitResult<PathBuf> {
        let repo = self.lock();
        repo.workdir().map(Path::to_path_buf).ok_or(GitError::Bare)
    }

    // ---- refs ------------------------------------------------------------

    pub fn branch_tip(&self, branch: &str) -> GitResult<Oid> {
        let repo = self.lock();
        branch_tip_locked(&repo, branch)
    }

    pub fn branch_exists(&self, branch: &str) -> GitResult<bool> {
        let repo = self.lock();
        let result = match repo.find_branch(branch, BranchType::Local) {
            Ok(_) => Ok(true),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        };
        result
    }

    pub fn local_branches(&self) -> GitResult<Vec<String>> {
        let repo = self.lock();
        let mut names = Vec::new();
        for entry in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = entry?;
            if let Some(name) = branch.name()? {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Create `branch` pointing at `from`. The commit history is shared, so a
    /// fork carries the source branch's session file with it.
    pub fn create_branch(&self, branch: &str, from: Oid) -> GitResult<()> {
        let repo = self.lock();
        if repo.find_branch(branch, BranchType::Local).is_ok() {
            return Err(GitError::BranchExists {
                branch: branch.to_string(),
            });
        }
        let commit = find_commit(&repo, from)?;
        repo.branch(branch, &commit, false)?;
        Ok(())
    }

    /// The branch HEAD points at, if HEAD is on a local branch.
    pub fn checked_out_branch(&self) -> GitResult<Option<String>> {
        let repo = self.lock();
        let head = match repo.head() {
            Ok(head) => head,
            Err(err) if err.code() == ErrorCode::UnbornBranch => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if !head.is_branch() {
            return Ok(None);
        }
        Ok(head.shorthand().map(str::to_string))
    }

    /// True when the working tree differs from the index. The index is only
    /// ever written by [`Self::working_tree_sync`], so this is "user touched
    /// files since the last sync" regardless of how far the branch ref has
    /// advanced in the meantime.
    pub fn working_tree_dirty(&self) -> GitResult<bool> {
        let repo = self.lock();
        if repo.workdir().is_none() {
            return Ok(false);
        }
        let diff = repo.diff_index_to_workdir(None, None)?;
        Ok(diff.deltas().len() > 0)
    }

    // ---- objects ----------------------------------------------------------

    pub fn write_blob(&self, bytes: &[u8]) -> GitResult<Oid> {
        let repo = self.lock();
        Ok(repo.blob(bytes)?)
    }

    pub fn read_blob(&self, oid: Oid) -> GitResult<Vec<u8>> {
        let repo = self.lock();
        let blob = repo
            .find_blob(oid)
            .map_err(|err| object_error(oid, err))?;
        Ok(blob.content().to_vec())
    }

    pub fn read_commit(&self, oid: Oid) -> GitResult<CommitInfo> {
        let repo = self.lock();
        let commit = find_commit(&repo, oid)?;
        let info = Ok(CommitInfo {
            id: commit.id(),
            tree: commit.tree_id(),
            parents: commit.parent_ids().collect(),
            author: Author {
                name: commit.author().name().unwrap_or_default().to_string(),
                email: commit.author().email().unwrap_or_default().to_string(),
            },
            message: commit.message().unwrap_or_default().to_string(),
            seconds: commit.time().seconds(),
        });
        info
    }

    pub fn tree_of(&self, commit: Oid) -> GitResult<Oid> {
        let repo = self.lock();
        let tree_id = find_commit(&repo, commit)?.tree_id();
        Ok(tree_id)
    }

    /// Blob oid at `path` in `commit`'s tree, or `None` when absent.
    pub fn blob_oid_at(&self, commit: Oid, path: &str) -> GitResult<Option<Oid>> {
        let repo = self.lock();
        let tree = find_commit(&repo, commit)?.tree()?;
        match tree.get_path(Path::new(path)) {
            Ok(entry) if entry.kind() == Some(ObjectType::Blob) => Ok(Some(entry.id())),
            Ok(_) => Ok(None),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// File contents at `path` in `commit`, or `None` when absent.
    pub fn read_file(&self, commit: Oid, path: &str) -> GitResult<Option<Vec<u8>>> {
        let repo = self.lock();
        let tree = find_commit(&repo, commit)?.tree()?;
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if entry.kind() != Some(ObjectType::Blob) {
            return Ok(None);
        }
        let blob = repo
            .find_blob(entry.id())
            .map_err(|err| object_error(entry.id(), err))?;
        Ok(Some(blob.content().to_vec()))
    }

    /// Every blob path in `commit`'s tree, git-sorted. Submodule entries are
    /// skipped; their oids live in other repositories.
    pub fn list_files(&self, commit: Oid) -> GitResult<Vec<String>> {
        let repo = self.lock();
        let tree = find_commit(&repo, commit)?.tree()?;
        let mut files = Vec::new();
        walk_tree(&repo, &tree, "", &mut files)?;
        Ok(files)
    }

    /// Build a tree by applying `changes` on top of `base_tree` (or an empty
    /// tree when `None`). Paths are folded into nested subtrees; entries are
    /// emitted in git sort order by the tree builder.
    pub fn build_tree(
        &self,
        base_tree: Option<Oid>,
        changes: &[(String, TreeChange)],
    ) -> GitResult<Oid> {
        let repo = self.lock();
        let base = match base_tree {
            Some(oid) => Some(repo.find_tree(oid).map_err(|err| object_error(oid, err))?),
            None => None,
        };
        build_tree(&repo, base.as_ref(), changes)
    }

    // ---- commits ----------------------------------------------------------

    /// Commit `tree` onto `branch`, atomically advancing the ref.
    ///
    /// Fails with [`GitError::RefRaced`] when `parents` does not include the
    /// current tip; callers retry via [`Self::three_way_merge`]. The commit
    /// kind drives the folding rules: `Prepare` concatenates onto a prepare
    /// tip, and `Major` absorbs any run of prepare commits below it.
    pub fn commit_tree(
        &self,
        branch: &str,
        tree: Oid,
        parents: &[Oid],
        message: &str,
        kind: CommitKind,
        author: &Author,
    ) -> GitResult<Oid> {
        let repo = self.lock();
        let tip = branch_tip_locked(&repo, branch)?;
        if !parents.contains(&tip) {
            return Err(GitError::RefRaced {
                branch: branch.to_string(),
                expected: parents.first().copied().unwrap_or_else(Oid::zero),
                actual: tip,
            });
        }

        let tip_commit = find_commit(&repo, tip)?;
        let (tip_kind, tip_bare) = parse_commit_kind(tip_commit.message().unwrap_or_default());
        let sig = Signature::now(&author.name, &author.email)?;
        let tree_obj = repo.find_tree(tree).map_err(|err| object_error(tree, err))?;
        let refname = format!("refs/heads/{branch}");

        let (commit_parents, final_message) = match kind {
            CommitKind::Prepare if tip_kind == CommitKind::Prepare => {
                let combined = format!("{tip_bare}\n{message}");
                (
                    tip_commit.parent_ids().collect(),
                    format_commit_message(CommitKind::Prepare, &combined),
                )
            }
            CommitKind::Major => {
                let below_prepares = skip_prepare_run(&repo, &tip_commit)?;
                (vec![below_prepares], message.to_string())
            }
            CommitKind::Prepare => (
                vec![tip],
                format_commit_message(CommitKind::Prepare, message),
            ),
        };

        let parent_commits = commit_parents
            .iter()
            .map(|oid| find_commit(&repo, *oid))
            .collect::<GitResult<Vec<_>>>()?;
        let parent_refs: Vec<_> = parent_commits.iter().collect();

        let oid = repo.commit(None, &sig, &sig, &final_message, &tree_obj, &parent_refs)?;
        repo.reference(&refname, oid, true, "forge: commit")?;
        tracing::debug!(branch, commit = %oid, ?kind, "advanced branch");
        Ok(oid)
    }

    /// Commit `tree` with explicit parents (a merge commit), advancing
    /// `branch` under the same compare-and-swap rule as
    /// [`Self::commit_tree`]. No kind folding applies.
    pub fn commit_merge(
        &self,
        branch: &str,
        tree: Oid,
        parents: &[Oid],
        message: &str,
        author: &Author,
    ) -> GitResult<Oid> {
        let repo = self.lock();
        let tip = branch_tip_locked(&repo, branch)?;
        if !parents.contains(&tip) {
            return Err(GitError::RefRaced {
                branch: branch.to_string(),
                expected: parents.first().copied().unwrap_or_else(Oid::zero),
                actual: tip,
            });
        }
        let sig = Signature::now(&author.name, &author.email)?;
        let tree_obj = repo.find_tree(tree).map_err(|err| object_error(tree, err))?;
        let parent_commits = parents
            .iter()
            .map(|oid| find_commit(&repo, *oid))
            .collect::<GitResult<Vec<_>>>()?;
        let parent_refs: Vec<_> = parent_commits.iter().collect();
        let oid = repo.commit(None, &sig, &sig, message, &tree_obj, &parent_refs)?;
        repo.reference(&format!("refs/heads/{branch}"), oid, true, "forge: merge")?;
        Ok(oid)
    }

    /// Common ancestor of two commits, or `None` for unrelated histories.
    pub fn merge_base(&self, a: Oid, b: Oid) -> GitResult<Option<Oid>> {
        let repo = self.lock();
        match repo.merge_base(a, b) {
            Ok(base) => Ok(Some(base)),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Merge `ours` and `theirs` against their common `ancestor`, all trees.
    pub fn three_way_merge(
        &self,
        ancestor: Oid,
        ours: Oid,
        theirs: Oid,
    ) -> GitResult<MergeOutcome> {
        let repo = self.lock();
        let ancestor = repo
            .find_tree(ancestor)
            .map_err(|err| object_error(ancestor, err))?;
        let ours = repo.find_tree(ours).map_err(|err| object_error(ours, err))?;
        let theirs = repo
            .find_tree(theirs)
            .map_err(|err| object_error(theirs, err))?;

        let mut index = repo.merge_trees(&ancestor, &ours, &theirs, None)?;
        if index.has_conflicts() {
            return Ok(MergeOutcome::Conflicts(conflict_paths(&index)?));
        }
        Ok(MergeOutcome::Clean(index.write_tree_to(&repo)?))
    }

    /// Would merging `theirs` into `ours` be clean? Conflicts confined to
    /// `ignored_paths` (e.g. the session file, which is archived on merge)
    /// do not count.
    pub fn merge_probe_clean(
        &self,
        ours: Oid,
        theirs: Oid,
        ignored_paths: &[&str],
    ) -> GitResult<bool> {
        let repo = self.lock();
        let base = match repo.merge_base(ours, theirs) {
            Ok(base) => base,
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        let base_tree = find_commit(&repo, base)?.tree()?;
        let our_tree = find_commit(&repo, ours)?.tree()?;
        let their_tree = find_commit(&repo, theirs)?.tree()?;
        let index = repo.merge_trees(&base_tree, &our_tree, &their_tree, None)?;
        if !index.has_conflicts() {
            return Ok(true);
        }
        let paths = conflict_paths(&index)?;
        Ok(paths.iter().all(|p| ignored_paths.contains(&p.as_str())))
    }

    /// Fast-forward the working tree to `target` when `branch` is checked
    /// out. Returns `false` (untouched) when some other branch is checked
    /// out, and [`GitError::WorkdirDirty`] when the user has local edits.
    /// This is the only code path in the workspace that writes the working
    /// directory or the index.
    pub fn working_tree_sync(&self, branch: &str, target: Oid) -> GitResult<bool> {
        let repo = self.lock();
        let Some(workdir) = repo.workdir().map(Path::to_path_buf) else {
            return Err(GitError::Bare);
        };
        let head = match repo.head() {
            Ok(head) => head,
            Err(err) if err.code() == ErrorCode::UnbornBranch => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        if !head.is_branch() || head.shorthand() != Some(branch) {
            return Ok(false);
        }

        let diff = repo.diff_index_to_workdir(None, None)?;
        if diff.deltas().len() > 0 {
            return Err(GitError::WorkdirDirty { workdir });
        }

        let commit = find_commit(&repo, target)?;
        let tree = commit.tree()?;
        let mut checkout = CheckoutBuilder::new();
        // The dirty check above already vetoed user edits; force makes the
        // workdir match the target even though HEAD's ref has moved ahead.
        checkout.force();
        repo.checkout_tree(commit.as_object(), Some(&mut checkout))?;
        let mut index = repo.index()?;
        index.read_tree(&tree)?;
        index.write()?;
        tracing::debug!(branch, commit = %target, "working tree synced");
        Ok(true)
    }
}

fn branch_tip_locked(repo: &Repository, branch: &str) -> GitResult<Oid> {
    let reference = repo
        .find_branch(branch, BranchType::Local)
        .map_err(|err| {
            if err.code() == ErrorCode::NotFound {
                GitError::BranchNotFound {
                    branch: branch.to_string(),
                }
            } else {
                GitError::Raw(err)
            }
        })?;
    reference
        .get()
        .target()
        .ok_or_else(|| GitError::BranchNotFound {
            branch: branch.to_string(),
        })
}

fn find_commit(repo: &Repository, oid: Oid) -> GitResult<git2::Commit<'_>> {
    repo.find_commit(oid).map_err(|err| object_error(oid, err))
}

fn object_error(oid: Oid, err: git2::Error) -> GitError {
    match err.code() {
        ErrorCode::NotFound => GitError::ObjectNotFound { oid },
        _ => GitError::CorruptObject {
            oid,
            detail: err.message().to_string(),
        },
    }
}

/// Walk back over a run of consecutive `[prepare]` commits starting at the
/// tip, returning the first commit below the run (the tip itself when it is
/// not a prepare commit).
fn skip_prepare_run(repo: &Repository, tip: &git2::Commit<'_>) -> GitResult<Oid> {
    let mut current = tip.clone();
    loop {
        let (kind, _) = parse_commit_kind(current.message().unwrap_or_default());
        if kind != CommitKind::Prepare {
            return Ok(current.id());
        }
        match current.parent_ids().next() {
            Some(parent) => current = find_commit(repo, parent)?,
            None => return Ok(current.id()),
        }
    }
}

fn conflict_paths(index: &git2::Index) -> GitResult<Vec<String>> {
    let mut paths = Vec::new();
    for conflict in index.conflicts()? {
        let conflict = conflict?;
        let entry = conflict
            .our
            .as_ref()
            .or(conflict.their.as_ref())
            .or(conflict.ancestor.as_ref());
        if let Some(entry) = entry {
            paths.push(String::from_utf8_lossy(&entry.path).into_owned());
        }
    }
    paths.sort();
    paths.dedup();
    Ok(paths)
}

fn walk_tree(
    repo: &Repository,
    tree: &Tree<'_>,
    prefix: &str,
    out: &mut Vec<String>,
) -> GitResult<()> {
    for entry in tree.iter() {
        let Some(name) = entry.name() else {
            continue;
        };
        let path = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}/{name}")
        };
        match entry.kind() {
            Some(ObjectType::Tree) => {
                let subtree = repo
                    .find_tree(entry.id())
                    .map_err(|err| object_error(entry.id(), err))?;
                walk_tree(repo, &subtree, &path, out)?;
            }
            Some(ObjectType::Blob) => out.push(path),
            _ => {}
        }
    }
    Ok(())
}
