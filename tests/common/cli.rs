use assert_cmd::Command;
use std::ffi::OsStr;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

#[derive(Debug)]
pub struct KanbanRun {
    pub stdout: String,
    pub stderr: String,
    pub status: std::process::ExitStatus,
}

impl KanbanRun {
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    /// The structured error printed on stderr.
    pub fn error_json(&self) -> serde_json::Value {
        serde_json::from_str(extract_json_payload(&self.stderr).as_str())
            .unwrap_or_else(|e| panic!("stderr is not JSON ({e}): {}", self.stderr))
    }

    pub fn stdout_json(&self) -> serde_json::Value {
        serde_json::from_str(extract_json_payload(&self.stdout).as_str())
            .unwrap_or_else(|e| panic!("stdout is not JSON ({e}): {}", self.stdout))
    }
}

/// A throwaway HOME with XDG config and data directories inside it.
pub struct KanbanWorkspace {
    pub temp_dir: TempDir,
    pub root: PathBuf,
}

impl KanbanWorkspace {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let root = temp_dir.path().to_path_buf();
        Self { temp_dir, root }
    }

    pub fn config_home(&self) -> PathBuf {
        self.root.join("config")
    }

    pub fn data_home(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_home().join("kanban").join("config.yaml")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_home().join("kanban").join("kanban.db")
    }

    pub fn write_config(&self, yaml: &str) {
        let path = self.config_path();
        fs::create_dir_all(path.parent().expect("config dir")).expect("create config dir");
        fs::write(&path, yaml).expect("write config");
    }
}

/// A `kanban` command isolated to the workspace's HOME and XDG directories.
pub fn kanban_cmd(workspace: &KanbanWorkspace) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("kanban"));
    cmd.current_dir(&workspace.root);
    cmd.env_remove("KANBAN_ORG");
    cmd.env_remove("KANBAN_DB");
    cmd.env_remove("KANBAN_CONCURRENCY");
    cmd.env_remove("RUST_LOG");
    cmd.env("HOME", &workspace.root);
    cmd.env("XDG_CONFIG_HOME", workspace.config_home());
    cmd.env("XDG_DATA_HOME", workspace.data_home());
    cmd.env("NO_COLOR", "1");
    cmd
}

pub fn run_kanban<I, S>(workspace: &KanbanWorkspace, args: I) -> KanbanRun
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    run_kanban_with_env(workspace, args, std::iter::empty::<(String, String)>())
}

pub fn run_kanban_with_env<I, S, E, K, V>(
    workspace: &KanbanWorkspace,
    args: I,
    env_vars: E,
) -> KanbanRun
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
    E: IntoIterator<Item = (K, V)>,
    K: AsRef<OsStr>,
    V: AsRef<OsStr>,
{
    let mut cmd = kanban_cmd(workspace);
    cmd.args(args);
    cmd.envs(env_vars);

    let output = cmd.output().expect("run kanban");
    KanbanRun {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        status: output.status,
    }
}

/// Skip log lines before the first JSON value.
pub fn extract_json_payload(output: &str) -> String {
    let lines: Vec<&str> = output.lines().collect();
    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('[') || trimmed.starts_with('{') {
            return lines[idx..].join("\n").trim().to_string();
        }
    }
    output.trim().to_string()
}
