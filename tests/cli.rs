// SPDX-License-Identifier: MIT OR Apache-2.0

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, content).expect("write file");
}

fn write_hashing_config(root: &Path) {
    write_file(
        &root.join(".codeseekrc.toml"),
        r#"
[embeddings]
provider = "hashing"
dimension = 256
batch_size = 4
"#,
    );
}

fn sample_repo() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    write_hashing_config(dir.path());
    write_file(
        &dir.path().join("app/tools.py"),
        "def load_config(path):\n    \"\"\"Read the configuration file.\"\"\"\n    return open(path).read()\n\n\ndef render_chart(data):\n    return data\n",
    );
    write_file(
        &dir.path().join("src/lib.rs"),
        "/// Adds two numbers.\npub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n",
    );
    dir
}

fn run_json(root: &Path, args: &[&str]) -> Value {
    let mut cmd = cargo_bin_cmd!("codeseek");
    let assert = cmd
        .current_dir(root)
        .args(["--format", "json", "--compact"])
        .args(args)
        .assert()
        .success();
    serde_json::from_slice(&assert.get_output().stdout).expect("json output")
}

#[test]
fn index_then_search_returns_ranked_entities() {
    let dir = sample_repo();

    let mut cmd = cargo_bin_cmd!("codeseek");
    cmd.current_dir(dir.path())
        .env("NO_COLOR", "1")
        .arg("index")
        .assert()
        .success()
        .stdout(predicate::str::contains("Indexed 2 files"));

    let response = run_json(dir.path(), &["search", "load config", "-m", "3"]);
    let hits = response["hits"].as_array().expect("hits");
    assert!(!hits.is_empty());
    assert!(hits.len() <= 3);
    assert_eq!(hits[0]["node_id"], "app/tools.py::load_config");
    assert_eq!(hits[0]["metadata"]["kind"], "function");
    assert_eq!(response["model"], "hashing-v1-256");
}

#[test]
fn search_text_output_shows_location_and_kind() {
    let dir = sample_repo();
    run_json(dir.path(), &["index"]);

    let mut cmd = cargo_bin_cmd!("codeseek");
    cmd.current_dir(dir.path())
        .env("NO_COLOR", "1")
        .args(["search", "load config", "-m", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("app/tools.py:1 function load_config"));
}

#[test]
fn reindex_skips_unchanged_and_removes_deleted_files() {
    let dir = sample_repo();

    let first = run_json(dir.path(), &["index"]);
    assert_eq!(first["files_indexed"], 2);

    let second = run_json(dir.path(), &["index"]);
    assert_eq!(second["files_indexed"], 0);
    assert_eq!(second["files_skipped"], 2);

    fs::remove_file(dir.path().join("src/lib.rs")).expect("remove");
    let third = run_json(dir.path(), &["index"]);
    assert_eq!(third["files_removed"], 1);

    let stats = run_json(dir.path(), &["stats"]);
    assert_eq!(stats["files"], 1);
    assert_eq!(stats["models"][0]["model_name"], "hashing-v1-256");
}

#[test]
fn exclude_flag_keeps_files_out_of_the_index() {
    let dir = sample_repo();

    let summary = run_json(dir.path(), &["index", "--exclude", "src/**"]);
    assert_eq!(summary["files_scanned"], 1);

    let stats = run_json(dir.path(), &["stats"]);
    assert_eq!(stats["files"], 1);
}

#[test]
fn unavailable_backend_fails_search_with_distinct_exit_code() {
    let dir = TempDir::new().expect("tempdir");
    write_file(
        &dir.path().join(".codeseekrc.toml"),
        r#"
[embeddings]
provider = "command"
command = "codeseek-missing-embedder-binary --json"
dimension = 8
"#,
    );
    write_file(&dir.path().join("main.py"), "def main():\n    pass\n");

    let mut cmd = cargo_bin_cmd!("codeseek");
    cmd.current_dir(dir.path())
        .args(["search", "anything"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("semantic search is unavailable"));

    // A degraded index run still creates the store
    let mut cmd = cargo_bin_cmd!("codeseek");
    cmd.current_dir(dir.path()).arg("index").assert().code(2);
    assert!(dir.path().join(".codeseek").is_dir());

    let mut cmd = cargo_bin_cmd!("codeseek");
    cmd.current_dir(dir.path())
        .args(["search", "anything"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("semantic search is unavailable"));
}

#[test]
fn read_only_commands_do_not_create_a_store() {
    let dir = sample_repo();

    for args in [&["search", "load config"][..], &["stats"][..]] {
        let mut cmd = cargo_bin_cmd!("codeseek");
        cmd.current_dir(dir.path())
            .env("NO_COLOR", "1")
            .args(args)
            .assert()
            .success()
            .stderr(predicate::str::contains("Run `codeseek index` first"));
    }
    assert!(!dir.path().join(".codeseek").exists());
}

#[test]
fn completions_are_generated() {
    let mut cmd = cargo_bin_cmd!("codeseek");
    cmd.args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("codeseek"));
}
