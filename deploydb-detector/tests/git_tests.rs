//! `GitCli` + `detect` against real repositories. Skipped when `git` is not
//! installed.

use std::fs;
use std::path::Path;
use std::process::Command;

use deploydb_core::{ChangeKind, ObjectType, RemoteAuth, SourceControl};
use deploydb_detector::{detect, GitCli};
use tempfile::TempDir;

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

fn run_git(root: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(root)
        .args([
            "-c",
            "user.name=deploydb",
            "-c",
            "user.email=deploydb@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .status()
        .expect("run git");
    assert!(status.success(), "git command failed: git -C {root:?} {args:?}");
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn init_origin() -> TempDir {
    let origin = TempDir::new().unwrap();
    run_git(origin.path(), &["init", "--initial-branch=main"]);
    write(origin.path(), "README.md", "scripts\n");
    run_git(origin.path(), &["add", "."]);
    run_git(origin.path(), &["commit", "-m", "initial"]);
    origin
}

fn commit_all(root: &Path, message: &str) {
    run_git(root, &["add", "-A"]);
    run_git(root, &["commit", "-m", message]);
}

#[test]
fn clone_pull_diff_and_head() {
    if !git_available() {
        eprintln!("git not installed; skipping");
        return;
    }
    let origin = init_origin();
    let workspace = TempDir::new().unwrap();
    let checkout = workspace.path().join("nested").join("checkout");
    let git = GitCli::new();

    let remote = RemoteAuth::Https {
        url: origin.path().display().to_string(),
    };
    git.ensure_cloned(&remote, "main", &checkout).expect("clone");
    let first = git.head_revision(&checkout).expect("head");

    write(origin.path(), "SalesDB/Tables/dbo.Customers.sql", "CREATE TABLE Customers (id INTEGER);\n");
    write(origin.path(), "SalesDB/Views/dbo.CustomerSummary.sql", "CREATE VIEW CustomerSummary AS SELECT id FROM Customers;\n");
    commit_all(origin.path(), "add sales objects");

    git.pull(&checkout, "main").expect("pull");
    let second = git.head_revision(&checkout).expect("head");
    assert_ne!(first, second);

    let entries = git.diff(&checkout, &first, &second).expect("diff");
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.kind == ChangeKind::Added));

    let changes = detect(&git, &checkout, Some(&first), &second).expect("detect");
    let order: Vec<ObjectType> = changes.iter().map(|c| c.object_type).collect();
    assert_eq!(order, vec![ObjectType::Tables, ObjectType::Views]);
}

#[test]
fn deleted_scripts_are_not_deployed() {
    if !git_available() {
        eprintln!("git not installed; skipping");
        return;
    }
    let repo = init_origin();
    write(repo.path(), "db/Tables/t.sql", "CREATE TABLE t (id INTEGER);\n");
    commit_all(repo.path(), "add t");
    let git = GitCli::new();
    let before = git.head_revision(repo.path()).unwrap();

    fs::remove_file(repo.path().join("db/Tables/t.sql")).unwrap();
    write(repo.path(), "db/Views/v.sql", "CREATE VIEW v AS SELECT 1;\n");
    commit_all(repo.path(), "drop t, add v");
    let after = git.head_revision(repo.path()).unwrap();

    let entries = git.diff(repo.path(), &before, &after).unwrap();
    assert!(entries
        .iter()
        .any(|e| e.kind == ChangeKind::Deleted && e.path == "db/Tables/t.sql"));

    let changes = detect(&git, repo.path(), Some(&before), &after).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].path, "db/Views/v.sql");
}

#[test]
fn clone_of_missing_remote_fails() {
    if !git_available() {
        eprintln!("git not installed; skipping");
        return;
    }
    let workspace = TempDir::new().unwrap();
    let git = GitCli::new();
    let remote = RemoteAuth::Https {
        url: workspace.path().join("does-not-exist").display().to_string(),
    };
    let err = git
        .ensure_cloned(&remote, "main", &workspace.path().join("checkout"))
        .unwrap_err();
    assert!(err.to_string().contains("clone"), "got {err}");
}
