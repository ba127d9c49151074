//! Integration tests for the sluice CLI.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn sluice(dir: &Path, args: &[&str]) -> Output {
    // Keep the user's config and log filter out of the tests.
    Command::new(env!("CARGO_BIN_EXE_sluice"))
        .arg("--config")
        .arg(dir.join("no-config.toml"))
        .args(args)
        .env_remove("RUST_LOG")
        .current_dir(dir)
        .output()
        .expect("Failed to execute command")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn write_input(dir: &Path) {
    fs::write(
        dir.join("in.jsonl"),
        concat!(
            "{\"type\":\"way\",\"id\":10,\"nodes\":[2,1]}\n",
            "{\"type\":\"node\",\"id\":2,\"lat\":1.0,\"lon\":1.0}\n",
            "{\"type\":\"node\",\"id\":1,\"lat\":0.0,\"lon\":0.0}\n",
        ),
    )
    .unwrap();
}

fn ids(path: &Path) -> Vec<i64> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value["id"].as_i64().unwrap()
        })
        .collect()
}

#[test]
fn test_help() {
    let dir = TempDir::new().unwrap();
    let output = sluice(dir.path(), &["--help"]);

    assert!(output.status.success());
    assert!(stdout(&output).contains("Streaming geodata pipelines"));
}

#[test]
fn test_list() {
    let dir = TempDir::new().unwrap();
    let output = sluice(dir.path(), &["list"]);

    assert!(output.status.success());
    let stdout = stdout(&output);
    assert!(stdout.contains("read-json (rj)"));
    assert!(stdout.contains("tag-filter (tf)"));
    assert!(stdout.contains("Total: 17 tasks"));
}

#[test]
fn test_run_task_args() {
    let dir = TempDir::new().unwrap();
    write_input(dir.path());

    let output = sluice(
        dir.path(),
        &["run", "--rj", "in.jsonl", "--sort", "--wj", "file=out.jsonl"],
    );

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(ids(&dir.path().join("out.jsonl")), vec![1, 2, 10]);
}

#[test]
fn test_run_named_pipes() {
    let dir = TempDir::new().unwrap();
    write_input(dir.path());

    let output = sluice(
        dir.path(),
        &[
            "run",
            "--read-json",
            "in.jsonl",
            "outPipe=raw",
            "--tee",
            "inPipe=raw",
            "outPipe.0=a",
            "outPipe.1=b",
            "--write-json",
            "a.jsonl",
            "inPipe=b",
            "--write-json",
            "b.jsonl",
            "inPipe=a",
        ],
    );

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(ids(&dir.path().join("a.jsonl")), vec![10, 2, 1]);
    assert_eq!(ids(&dir.path().join("b.jsonl")), vec![10, 2, 1]);
}

#[test]
fn test_run_workflow() {
    let dir = TempDir::new().unwrap();
    write_input(dir.path());
    fs::write(
        dir.path().join("pipeline.yaml"),
        r#"
tasks:
  - type: read-json
    default: in.jsonl
  - type: sort
    args:
      type: IdThenType
  - type: write-json
    args:
      file: sorted.jsonl
"#,
    )
    .unwrap();

    let output = sluice(dir.path(), &["run", "--workflow", "pipeline.yaml"]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(ids(&dir.path().join("sorted.jsonl")), vec![1, 2, 10]);
}

#[test]
fn test_run_failure_exit_code() {
    let dir = TempDir::new().unwrap();

    let output = sluice(dir.path(), &["run", "--rj", "absent.jsonl", "--null"]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr(&output);
    assert!(stderr.contains("1-rj"), "stderr: {}", stderr);
    assert!(stderr.contains("1 task(s) failed"), "stderr: {}", stderr);
}

#[test]
fn test_unknown_task_suggestion() {
    let dir = TempDir::new().unwrap();

    let output = sluice(dir.path(), &["run", "--sorrt"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("did you mean 'sort'?"));
}

#[test]
fn test_dangling_output_starts_nothing() {
    let dir = TempDir::new().unwrap();
    write_input(dir.path());

    let output = sluice(
        dir.path(),
        &["run", "--rj", "in.jsonl", "--tee", "--wj", "out.jsonl"],
    );

    assert_eq!(output.status.code(), Some(1));
    assert!(!dir.path().join("out.jsonl").exists());
}

#[test]
fn test_check_prints_bindings() {
    let dir = TempDir::new().unwrap();

    let output = sluice(
        dir.path(),
        &["check", "--rj", "in.jsonl", "--buffer", "--null"],
    );

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let stdout = stdout(&output);
    assert!(stdout.contains("1-rj[0] -> 2-buffer[0] (entity, default pipe)"));
    assert!(stdout.contains("2-buffer[0] -> 3-null[0] (entity, default pipe)"));
    assert!(stdout.contains("OK: 3 tasks, 2 bindings"));
}

#[test]
fn test_check_emits_workflow() {
    let dir = TempDir::new().unwrap();

    let output = sluice(
        dir.path(),
        &["check", "--emit", "json", "--rj", "in.jsonl", "--null"],
    );

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let workflow: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(workflow["tasks"][0]["type"], "rj");
    assert_eq!(workflow["tasks"][0]["default"], "in.jsonl");
    assert_eq!(workflow["tasks"][1]["id"], "2-null");
}

#[test]
fn test_config_task_defaults() {
    let dir = TempDir::new().unwrap();
    write_input(dir.path());
    let config = dir.path().join("config.toml");
    fs::write(&config, "[task_defaults.tee]\noutputCount = 1\n").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_sluice"))
        .args(["run", "--config"])
        .arg(&config)
        .args(["--rj", "in.jsonl", "--tee", "--wj", "out.jsonl"])
        .env_remove("RUST_LOG")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(ids(&dir.path().join("out.jsonl")), vec![10, 2, 1]);
}

#[test]
fn test_no_tasks() {
    let dir = TempDir::new().unwrap();
    let output = sluice(dir.path(), &["run"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("No tasks given"));
}

#[test]
fn test_completions() {
    let dir = TempDir::new().unwrap();
    let output = sluice(dir.path(), &["completions", "bash"]);

    assert!(output.status.success());
    assert!(stdout(&output).contains("sluice"));
}
