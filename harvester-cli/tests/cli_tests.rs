//! Binary-level tests for the `harvester` CLI.

use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use git2::{Repository, Signature};
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn harvester_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("harvester"))
}

/// A git repository with one root commit — the smallest valid archive root.
fn init_archive_repo(dir: &Path) {
    let repo = Repository::init(dir).expect("init repo");
    std::fs::write(dir.join("README.md"), "manifest archive\n").expect("seed file");
    let mut index = repo.index().expect("index");
    index.add_path(Path::new("README.md")).expect("add");
    index.write().expect("write index");
    let tree_id = index.write_tree().expect("tree");
    let tree = repo.find_tree(tree_id).expect("find tree");
    let signature = Signature::now("test", "test@example.com").expect("signature");
    repo.commit(Some("HEAD"), &signature, &signature, "init", &tree, &[])
        .expect("root commit");
}

#[test]
fn accounts_add_list_remove_roundtrip() {
    let root = TempDir::new().expect("root");

    harvester_cmd()
        .args(["accounts", "add", "alice", "hunter2", "--root"])
        .arg(root.path())
        .assert()
        .success()
        .stdout(contains("added account 'alice'"));

    harvester_cmd()
        .args(["accounts", "list", "--root"])
        .arg(root.path())
        .assert()
        .success()
        .stdout(contains("alice").and(contains("NEW")))
        .stdout(contains("hunter2").not());

    harvester_cmd()
        .args(["accounts", "remove", "alice", "--root"])
        .arg(root.path())
        .assert()
        .success()
        .stdout(contains("removed account 'alice'"));

    harvester_cmd()
        .args(["accounts", "remove", "alice", "--root"])
        .arg(root.path())
        .assert()
        .failure()
        .stderr(contains("no account named 'alice'"));
}

#[test]
fn accounts_add_with_two_factor_marks_the_listing() {
    let root = TempDir::new().expect("root");

    harvester_cmd()
        .args([
            "accounts",
            "add",
            "alice",
            "hunter2",
            "--two-factor",
            "REVBREJFRUZERUFEQkVFRg==",
            "--root",
        ])
        .arg(root.path())
        .assert()
        .success();

    harvester_cmd()
        .args(["accounts", "list", "--root"])
        .arg(root.path())
        .assert()
        .success()
        .stdout(contains("alice (two-factor)"));
}

#[test]
fn status_on_a_fresh_root_reports_no_records() {
    let root = TempDir::new().expect("root");

    harvester_cmd()
        .args(["status", "--root"])
        .arg(root.path())
        .assert()
        .success()
        .stdout(contains("No user records yet"));
}

#[test]
fn status_json_shape() {
    let root = TempDir::new().expect("root");
    harvester_cmd()
        .args(["accounts", "add", "alice", "hunter2", "--root"])
        .arg(root.path())
        .assert()
        .success();

    let output = harvester_cmd()
        .args(["status", "--json", "--root"])
        .arg(root.path())
        .output()
        .expect("run status");
    assert!(output.status.success());
    let payload: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(payload["accounts"], serde_json::json!(1));
    assert_eq!(payload["enabled"], serde_json::json!(0));
    assert!(payload["users"].as_array().expect("users array").is_empty());
}

#[test]
fn run_init_only_bootstraps_the_archive() {
    let root = TempDir::new().expect("root");
    init_archive_repo(root.path());

    harvester_cmd()
        .args(["run", "--init-only", "--no-push", "--root"])
        .arg(root.path())
        .assert()
        .success()
        .stdout(contains("archive initialized"));

    assert!(root.path().join("state").exists(), "state worktree created");
}

#[test]
fn run_refuses_a_non_repository_root() {
    let root = TempDir::new().expect("root");

    harvester_cmd()
        .args(["run", "--init-only", "--root"])
        .arg(root.path())
        .assert()
        .failure()
        .stderr(contains("not a git repository"));
}
