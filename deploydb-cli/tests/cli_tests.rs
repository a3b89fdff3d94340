use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::boolean::PredicateBooleanExt;
use predicates::str::contains;
use tempfile::TempDir;

use deploydb_core::config;

fn deploydb_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("deploydb"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("RUST_LOG", "warn");
    cmd
}

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

fn git(root: &Path, args: &[&str]) {
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
    assert!(status.success(), "git {args:?} failed");
}

fn commit(repo: &Path, files: &[(&str, &str)], message: &str) {
    for (rel, body) in files {
        let path = repo.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, body).expect("write");
    }
    git(repo, &["add", "-A"]);
    git(repo, &["commit", "-m", message]);
}

fn new_remote() -> TempDir {
    let dir = TempDir::new().expect("remote");
    git(dir.path(), &["init", "--initial-branch=main"]);
    commit(dir.path(), &[("README.md", "scripts\n")], "initial");
    dir
}

fn stdout_json(cmd: &mut Command) -> serde_json::Value {
    let assert = cmd.assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");
    serde_json::from_str(&stdout).expect("parse json output")
}

#[test]
fn init_writes_config_once() {
    let home = TempDir::new().expect("home");

    deploydb_cmd(home.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("Wrote config"));
    assert!(config::config_path_at(home.path()).exists());

    deploydb_cmd(home.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("already exists"));

    deploydb_cmd(home.path())
        .args(["init", "--branch", "release"])
        .assert()
        .success()
        .stdout(contains("Updated config"));
    let loaded = config::load_at(home.path()).expect("load");
    assert_eq!(loaded.target_branch, "release");
}

#[test]
fn commands_without_config_point_at_init() {
    let home = TempDir::new().expect("home");
    deploydb_cmd(home.path())
        .arg("log")
        .assert()
        .failure()
        .stderr(contains("deploydb init"));
}

#[test]
fn check_creates_the_ledger() {
    let home = TempDir::new().expect("home");
    deploydb_cmd(home.path()).arg("init").assert().success();

    deploydb_cmd(home.path())
        .arg("check")
        .assert()
        .success()
        .stdout(contains("ledger ready"));

    let loaded = config::load_at(home.path()).expect("load");
    let db_file = Path::new(&loaded.db_creds.server).join("deploydb.db");
    assert!(db_file.exists(), "bookkeeping database at {}", db_file.display());

    deploydb_cmd(home.path())
        .arg("log")
        .assert()
        .success()
        .stdout(contains("No ledger entries"));
}

#[test]
fn explicit_config_path_is_honoured() {
    let home = TempDir::new().expect("home");
    let elsewhere = TempDir::new().expect("elsewhere");
    let mut cfg = config::template(elsewhere.path());
    cfg.db_creds.default_db = "audit".to_string();
    let path = config::save_at(elsewhere.path(), &cfg).expect("save");

    deploydb_cmd(home.path())
        .arg("--config")
        .arg(&path)
        .arg("check")
        .assert()
        .success()
        .stdout(contains("'audit'"));
}

#[test]
fn daemon_status_without_daemon_reports_not_running() {
    let home = TempDir::new().expect("home");
    deploydb_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains("\"running\": false"));
}

#[test]
fn sync_deploys_pending_scripts_and_logs_them() {
    if !git_available() {
        eprintln!("git not installed; skipping");
        return;
    }
    let home = TempDir::new().expect("home");
    let remote = new_remote();
    deploydb_cmd(home.path())
        .arg("init")
        .arg("--https-url")
        .arg(remote.path())
        .assert()
        .success();

    // First run records the baseline and executes nothing.
    deploydb_cmd(home.path())
        .arg("sync")
        .assert()
        .success()
        .stdout(contains("(first run)"));

    commit(
        remote.path(),
        &[
            ("Shop/DMLs/seed.sql", "INSERT INTO Orders VALUES (42);\n"),
            ("Shop/Tables/dbo.Orders.sql", "CREATE TABLE Orders (id INTEGER);\n"),
        ],
        "orders",
    );

    deploydb_cmd(home.path())
        .arg("diff")
        .assert()
        .success()
        .stdout(contains("PLANNED"))
        .stdout(contains("Shop/Tables/dbo.Orders.sql"));

    let report = stdout_json(deploydb_cmd(home.path()).args(["sync", "--json"]));
    assert_eq!(report["had_failures"], false);
    let outcomes = report["outcomes"].as_array().expect("outcomes");
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0]["path"], "Shop/Tables/dbo.Orders.sql");
    assert_eq!(outcomes[0]["status"], "executed");
    assert_eq!(outcomes[1]["path"], "Shop/DMLs/seed.sql");
    assert_eq!(outcomes[1]["status"], "executed");

    let entries = stdout_json(deploydb_cmd(home.path()).args(["log", "--json"]));
    assert_eq!(entries.as_array().expect("entries").len(), 2);

    let status = stdout_json(deploydb_cmd(home.path()).args(["status", "--json"]));
    assert_eq!(status["pointer"], report["commit_id"]);
    assert_eq!(status["pending"].as_array().expect("pending").len(), 0);
}

#[test]
fn failed_scripts_fail_the_command_and_show_in_the_log() {
    if !git_available() {
        eprintln!("git not installed; skipping");
        return;
    }
    let home = TempDir::new().expect("home");
    let remote = new_remote();
    deploydb_cmd(home.path())
        .arg("init")
        .arg("--https-url")
        .arg(remote.path())
        .assert()
        .success();
    deploydb_cmd(home.path()).arg("sync").assert().success();

    commit(
        remote.path(),
        &[("Ops/DMLs/broken.sql", "INSERT INTO NoSuchTable VALUES (1);\n")],
        "broken",
    );

    deploydb_cmd(home.path())
        .arg("sync")
        .assert()
        .failure()
        .stdout(contains("FAILED"))
        .stderr(contains("1 script(s) failed"));

    let failed = stdout_json(deploydb_cmd(home.path()).args(["log", "--failed", "--json"]));
    let failed = failed.as_array().expect("entries");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["file_path"], "Ops/DMLs/broken.sql");
    assert!(failed[0]["error"]
        .as_str()
        .unwrap_or_default()
        .contains("NoSuchTable"));

    // The pointer still moved: the commit is not retried on the next pass.
    deploydb_cmd(home.path())
        .arg("sync")
        .assert()
        .success()
        .stdout(contains("up to date"));
}

#[test]
fn diff_before_first_sync_explains_the_baseline() {
    if !git_available() {
        eprintln!("git not installed; skipping");
        return;
    }
    let home = TempDir::new().expect("home");
    let remote = new_remote();
    commit(
        remote.path(),
        &[("Shop/Tables/dbo.Orders.sql", "CREATE TABLE Orders (id INTEGER);\n")],
        "orders",
    );
    deploydb_cmd(home.path())
        .arg("init")
        .arg("--https-url")
        .arg(remote.path())
        .assert()
        .success();

    deploydb_cmd(home.path())
        .arg("diff")
        .assert()
        .success()
        .stdout(contains("No deployment recorded yet"))
        .stdout(contains("baseline"))
        .stdout(contains("No deployable scripts changed").not());

    let status = stdout_json(deploydb_cmd(home.path()).args(["status", "--json"]));
    assert!(status["pointer"].is_null());
}
