use std::sync::Arc;

use anyhow::Result;
use forge_git::{Author, CommitKind, GitBackend, GitError};
use forge_vfs::{
    CommitOptions, CommitView, UndoAction, Vfs, VfsError, WorkInProgress,
};
use tempfile::TempDir;

fn fixture() -> Result<(TempDir, Arc<GitBackend>)> {
    let dir = TempDir::new()?;
    let backend = Arc::new(GitBackend::init(dir.path(), "main", &Author::default())?);
    Ok((dir, backend))
}

fn options(message: &str) -> CommitOptions {
    CommitOptions {
        message: message.to_string(),
        kind: CommitKind::Major,
        author: Author::default(),
    }
}

fn open_claimed(backend: &Arc<GitBackend>, branch: &str) -> Result<WorkInProgress> {
    let mut vfs = WorkInProgress::open(Arc::clone(backend), branch)?;
    vfs.claim()?;
    Ok(vfs)
}

#[test]
fn overlay_round_trips() -> Result<()> {
    let (_dir, backend) = fixture()?;
    let mut vfs = open_claimed(&backend, "main")?;

    vfs.write("a.txt", "alpha\n")?;
    assert_eq!(vfs.read("a.txt")?, "alpha\n");

    vfs.delete("a.txt")?;
    assert!(matches!(
        vfs.read("a.txt"),
        Err(VfsError::NotFound { .. })
    ));

    // A write after a delete clears the tombstone.
    vfs.write("a.txt", "beta\n")?;
    assert_eq!(vfs.read("a.txt")?, "beta\n");
    assert!(vfs.exists("a.txt")?);
    Ok(())
}

#[test]
fn list_is_base_union_writes_minus_deletes() -> Result<()> {
    let (_dir, backend) = fixture()?;
    let mut vfs = open_claimed(&backend, "main")?;
    vfs.write("keep.txt", "k\n")?;
    vfs.write("drop.txt", "d\n")?;
    vfs.commit(&options("seed"))?;

    vfs.write("new.txt", "n\n")?;
    vfs.delete("drop.txt")?;
    assert_eq!(vfs.list()?, vec!["keep.txt", "new.txt"]);
    Ok(())
}

#[test]
fn commit_advances_base_and_clears_overlay() -> Result<()> {
    let (_dir, backend) = fixture()?;
    let mut vfs = open_claimed(&backend, "main")?;
    vfs.write("src/app.rs", "fn main() {}\n")?;
    vfs.write("notes.md", "hello\n")?;
    let commit = vfs.commit(&options("first pass"))?;

    assert!(!vfs.has_changes());
    assert_eq!(vfs.base_commit(), commit);
    assert_eq!(backend.branch_tip("main")?, commit);

    // Reopening at the new tip resolves everything the overlay said.
    let view = CommitView::at_branch_tip(Arc::clone(&backend), "main")?;
    assert_eq!(view.read("src/app.rs")?, "fn main() {}\n");
    assert_eq!(view.read("notes.md")?, "hello\n");
    Ok(())
}

#[test]
fn commit_view_rejects_writes() -> Result<()> {
    let (_dir, backend) = fixture()?;
    let mut view = CommitView::at_branch_tip(Arc::clone(&backend), "main")?;
    assert!(matches!(view.write("x", "y"), Err(VfsError::ReadOnly)));
    assert!(matches!(view.delete("x"), Err(VfsError::ReadOnly)));
    Ok(())
}

#[test]
fn raced_commit_merges_disjoint_edits() -> Result<()> {
    let (_dir, backend) = fixture()?;
    let mut seed = open_claimed(&backend, "main")?;
    seed.write("x.txt", "x0\n")?;
    seed.write("y.txt", "y0\n")?;
    seed.commit(&options("seed"))?;

    let mut first = open_claimed(&backend, "main")?;
    let mut second = open_claimed(&backend, "main")?;

    first.write("x.txt", "x1\n")?;
    let c1 = first.commit(&options("edit x"))?;

    second.write("y.txt", "y1\n")?;
    let c2 = second.commit(&options("edit y"))?;

    let info = backend.read_commit(c2)?;
    assert_eq!(info.parents, vec![c1], "loser reparents onto the winner");
    let view = CommitView::new(Arc::clone(&backend), c2);
    assert_eq!(view.read("x.txt")?, "x1\n");
    assert_eq!(view.read("y.txt")?, "y1\n");
    Ok(())
}

#[test]
fn raced_commit_conflict_discards_overlay() -> Result<()> {
    let (_dir, backend) = fixture()?;
    let mut seed = open_claimed(&backend, "main")?;
    seed.write("x.txt", "x0\n")?;
    seed.commit(&options("seed"))?;

    let mut first = open_claimed(&backend, "main")?;
    let mut second = open_claimed(&backend, "main")?;

    first.write("x.txt", "first\n")?;
    let c1 = first.commit(&options("first"))?;

    second.write("x.txt", "second\n")?;
    let err = second.commit(&options("second")).expect_err("conflict");
    assert!(matches!(
        err,
        VfsError::Git(GitError::MergeConflict { .. })
    ));
    assert!(!second.has_changes(), "conflicting overlay is discarded");
    assert_eq!(backend.branch_tip("main")?, c1, "branch ref unchanged");
    Ok(())
}

#[test]
fn snapshot_restore_unwinds_a_tool() -> Result<()> {
    let (_dir, backend) = fixture()?;
    let mut vfs = open_claimed(&backend, "main")?;
    vfs.write("kept.txt", "kept\n")?;

    let before = vfs.snapshot();
    vfs.write("scratch.txt", "scratch\n")?;
    vfs.delete("kept.txt")?;
    vfs.restore(before);

    assert_eq!(vfs.read("kept.txt")?, "kept\n");
    assert!(!vfs.exists("scratch.txt")?);
    Ok(())
}

#[test]
fn undo_path_reverts_created_edited_and_deleted_files() -> Result<()> {
    let (_dir, backend) = fixture()?;
    let mut vfs = open_claimed(&backend, "main")?;
    vfs.write("base.txt", "v1\n")?;
    vfs.commit(&options("seed"))?;

    vfs.write("base.txt", "v2\n")?;
    assert_eq!(vfs.undo_path("base.txt")?, UndoAction::Reverted);
    assert_eq!(vfs.read("base.txt")?, "v1\n");

    vfs.write("fresh.txt", "new\n")?;
    assert_eq!(vfs.undo_path("fresh.txt")?, UndoAction::Removed);
    assert!(!vfs.exists("fresh.txt")?);

    vfs.delete("base.txt")?;
    assert_eq!(vfs.undo_path("base.txt")?, UndoAction::Restored);
    assert_eq!(vfs.read("base.txt")?, "v1\n");

    assert!(matches!(
        vfs.undo_path("base.txt"),
        Err(VfsError::NotFound { .. })
    ));
    Ok(())
}

#[test]
fn claim_is_exclusive_across_threads() -> Result<()> {
    let (_dir, backend) = fixture()?;
    let mut vfs = open_claimed(&backend, "main")?;

    let stolen = std::thread::scope(|scope| {
        scope
            .spawn(|| {
                // Another thread may neither claim nor use the view.
                vfs.claim().is_err()
            })
            .join()
            .expect("thread join")
    });
    assert!(stolen, "claim from a second thread must fail");
    Ok(())
}

#[test]
fn materialize_writes_resolved_tree() -> Result<()> {
    let (_dir, backend) = fixture()?;
    let mut vfs = open_claimed(&backend, "main")?;
    vfs.write("src/deep/mod.rs", "pub fn x() {}\n")?;
    vfs.write("removed.txt", "gone\n")?;
    vfs.commit(&options("seed"))?;
    vfs.delete("removed.txt")?;
    vfs.write("src/deep/mod.rs", "pub fn y() {}\n")?;

    let dir = vfs.materialize_to_tempdir()?;
    let body = std::fs::read_to_string(dir.path().join("src/deep/mod.rs"))?;
    assert_eq!(body, "pub fn y() {}\n");
    assert!(!dir.path().join("removed.txt").exists());
    Ok(())
}

#[test]
fn binary_read_as_text_is_refused() -> Result<()> {
    let (_dir, backend) = fixture()?;
    let mut vfs = open_claimed(&backend, "main")?;
    vfs.write("logo.png", "not really an image")?;
    assert!(matches!(
        vfs.read("logo.png"),
        Err(VfsError::Binary { .. })
    ));
    assert!(vfs.read_bytes("logo.png").is_ok());
    Ok(())
}

#[test]
fn traversal_paths_are_rejected() -> Result<()> {
    let (_dir, backend) = fixture()?;
    let mut vfs = open_claimed(&backend, "main")?;
    assert!(matches!(
        vfs.write("../escape.txt", "x"),
        Err(VfsError::BadPath { .. })
    ));
    assert!(matches!(
        vfs.read("/abs.txt"),
        Err(VfsError::BadPath { .. })
    ));
    Ok(())
}
