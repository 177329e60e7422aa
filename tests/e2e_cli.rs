mod common;

use common::cli::{KanbanWorkspace, kanban_cmd, run_kanban, run_kanban_with_env};
use predicates::prelude::*;
use std::fs;

const GOOD_CONFIG: &str = r#"
version: 1
organization: acme
labels:
  status:
    - name: "status: ready"
      color: "0e8a16"
      description: Ready to start
    - name: "status: in-progress"
      color: "fbca04"
settings:
  concurrency: 4
  wip_limits:
    In-Progress: 3
"#;

#[test]
fn e2e_version_and_completions() {
    let workspace = KanbanWorkspace::new();

    let version = run_kanban(&workspace, ["version"]);
    assert!(version.status.success(), "version failed: {}", version.stderr);
    assert!(version.stdout.starts_with("kanban version "));

    let json = run_kanban(&workspace, ["--json", "version"]);
    assert!(json.status.success());
    assert_eq!(
        json.stdout_json()["version"].as_str(),
        Some(env!("CARGO_PKG_VERSION"))
    );

    let bash = run_kanban(&workspace, ["completions", "bash"]);
    assert!(bash.status.success(), "completions failed: {}", bash.stderr);
    assert!(bash.stdout.contains("kanban"));
}

#[test]
fn e2e_db_lifecycle() {
    let workspace = KanbanWorkspace::new();

    let path = run_kanban(&workspace, ["db", "path"]);
    assert!(path.status.success());
    assert_eq!(path.stdout.trim(), workspace.db_path().display().to_string());

    let stats_missing = run_kanban(&workspace, ["db", "stats"]);
    assert_eq!(stats_missing.code(), Some(2));

    let init = run_kanban(&workspace, ["db", "init"]);
    assert!(init.status.success(), "init failed: {}", init.stderr);
    assert!(workspace.db_path().exists());

    let stats = run_kanban(&workspace, ["--json", "db", "stats"]);
    assert!(stats.status.success(), "stats failed: {}", stats.stderr);
    let payload = stats.stdout_json();
    assert_eq!(payload["repositories"], 0);
    assert_eq!(payload["issues"], 0);
    assert_eq!(payload["schema_version"], 2);
    assert!(payload["size_bytes"].as_u64().unwrap_or(0) > 0);

    // Opening twice leaves the schema alone.
    let again = run_kanban(&workspace, ["db", "init"]);
    assert!(again.status.success());
}

#[test]
fn e2e_db_flag_overrides_location() {
    let workspace = KanbanWorkspace::new();
    let custom = workspace.root.join("elsewhere").join("board.db");
    let custom_arg = custom.display().to_string();

    let init = run_kanban(&workspace, ["--db", custom_arg.as_str(), "db", "init"]);
    assert!(init.status.success(), "init failed: {}", init.stderr);
    assert!(custom.exists());
    assert!(!workspace.db_path().exists());

    let from_env = run_kanban_with_env(
        &workspace,
        ["db", "path"],
        [("KANBAN_DB", custom_arg.as_str())],
    );
    assert_eq!(from_env.stdout.trim(), custom_arg);
}

#[test]
fn e2e_board_without_database() {
    let workspace = KanbanWorkspace::new();

    let board = run_kanban(&workspace, ["board"]);
    assert_eq!(board.code(), Some(2));
    let err = board.error_json();
    assert_eq!(err["error"]["code"], "DATABASE_NOT_FOUND");
    assert!(err["error"]["hint"].as_str().unwrap_or("").contains("db init"));
}

#[test]
fn e2e_metrics_on_empty_store() {
    let workspace = KanbanWorkspace::new();
    assert!(run_kanban(&workspace, ["db", "init"]).status.success());

    let metrics = run_kanban(&workspace, ["metrics"]);
    assert_eq!(metrics.code(), Some(4));
    assert_eq!(metrics.error_json()["error"]["code"], "NO_REPOSITORIES");

    let unknown = run_kanban(&workspace, ["metrics", "--repo", "acme/api"]);
    assert_eq!(unknown.code(), Some(3));
    assert_eq!(unknown.error_json()["error"]["code"], "REPOSITORY_NOT_FOUND");

    let zero = run_kanban(&workspace, ["metrics", "--days", "0"]);
    assert_eq!(zero.code(), Some(4));
}

#[test]
fn e2e_sync_preconditions() {
    let workspace = KanbanWorkspace::new();

    let no_org = run_kanban(&workspace, ["sync"]);
    assert_eq!(no_org.code(), Some(4));
    assert_eq!(no_org.error_json()["error"]["code"], "NO_ORGANIZATION");

    let no_labels = run_kanban(&workspace, ["--org", "acme", "sync", "--repo", "api"]);
    assert_eq!(no_labels.code(), Some(4));
    assert_eq!(no_labels.error_json()["error"]["code"], "NO_LABELS");

    // Nothing was created on the way to the failure.
    assert!(!workspace.db_path().exists());
}

#[test]
fn e2e_audit_preconditions() {
    let workspace = KanbanWorkspace::new();

    let no_org = run_kanban(&workspace, ["audit"]);
    assert_eq!(no_org.code(), Some(4));
    assert_eq!(no_org.error_json()["error"]["code"], "NO_ORGANIZATION");

    let no_labels = run_kanban(&workspace, ["--org", "acme", "audit", "--repo", "api"]);
    assert_eq!(no_labels.code(), Some(4));
    assert_eq!(no_labels.error_json()["error"]["code"], "NO_LABELS");
}

#[test]
fn e2e_config_show_and_validate() {
    let workspace = KanbanWorkspace::new();
    workspace.write_config(GOOD_CONFIG);

    let validate = run_kanban(&workspace, ["config", "validate"]);
    assert!(validate.status.success(), "validate failed: {}", validate.stderr);
    assert!(validate.stdout.contains("2 labels"));

    let show = run_kanban(&workspace, ["--json", "config", "show"]);
    assert!(show.status.success(), "show failed: {}", show.stderr);
    let config = show.stdout_json();
    assert_eq!(config["organization"], "acme");
    assert_eq!(config["settings"]["concurrency"], 4);

    let env_org = run_kanban_with_env(
        &workspace,
        ["--json", "config", "show"],
        [("KANBAN_ORG", "globex")],
    );
    assert_eq!(env_org.stdout_json()["organization"], "globex");

    let flag_org = run_kanban_with_env(
        &workspace,
        ["--json", "--org", "initech", "config", "show"],
        [("KANBAN_ORG", "globex")],
    );
    assert_eq!(flag_org.stdout_json()["organization"], "initech");
}

#[test]
fn e2e_config_errors() {
    let workspace = KanbanWorkspace::new();
    workspace.write_config(
        r#"
organization: acme
labels:
  status:
    - name: "status: ready"
      color: "green"
"#,
    );

    let invalid = run_kanban(&workspace, ["config", "validate"]);
    assert_eq!(invalid.code(), Some(4));
    let err = invalid.error_json();
    assert_eq!(err["error"]["code"], "VALIDATION_FAILED");

    let missing = workspace.root.join("nope.yaml");
    let missing_arg = missing.display().to_string();
    let not_found = run_kanban(&workspace, ["--config", missing_arg.as_str(), "config", "show"]);
    assert_eq!(not_found.code(), Some(7));
    assert_eq!(not_found.error_json()["error"]["code"], "CONFIG_NOT_FOUND");

    fs::write(workspace.config_path(), "labels: [unterminated").expect("write config");
    let broken = run_kanban(&workspace, ["config", "show"]);
    assert!(!broken.status.success());
}

#[test]
fn e2e_cfd_show_unknown_repository() {
    let workspace = KanbanWorkspace::new();
    assert!(run_kanban(&workspace, ["db", "init"]).status.success());

    let show = run_kanban(&workspace, ["--org", "acme", "cfd", "show", "--repo", "api"]);
    assert_eq!(show.code(), Some(3));
}

#[test]
fn e2e_help_lists_commands() {
    let workspace = KanbanWorkspace::new();

    kanban_cmd(&workspace)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("metrics"))
        .stdout(predicate::str::contains("board"));

    kanban_cmd(&workspace)
        .args(["sync", "--concurrency", "lots"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--concurrency"));
}

#[test]
fn e2e_board_json_on_empty_store() {
    let workspace = KanbanWorkspace::new();
    kanban_cmd(&workspace).args(["db", "init"]).assert().success();

    kanban_cmd(&workspace)
        .args(["--json", "board"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("["));
}

#[test]
fn e2e_board_and_metrics_filters() {
    let workspace = KanbanWorkspace::new();
    kanban_cmd(&workspace).args(["db", "init"]).assert().success();

    kanban_cmd(&workspace)
        .args(["--json", "board", "--assignee", "octocat", "--limit", "3"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("["));

    let zero = run_kanban(&workspace, ["board", "--limit", "0"]);
    assert_eq!(zero.code(), Some(4));

    let pooled = run_kanban(&workspace, ["metrics", "--all", "--assignee", "octocat"]);
    assert_eq!(pooled.code(), Some(4));
    assert_eq!(pooled.error_json()["error"]["code"], "NO_REPOSITORIES");
}
