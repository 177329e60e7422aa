//! Configuration management for `kanban_rust`.
//!
//! Configuration sources and precedence (highest wins):
//! 1. CLI overrides
//! 2. Environment variables (`KANBAN_ORG`, `KANBAN_DB`, `KANBAN_CONCURRENCY`)
//! 3. YAML config file (`$XDG_CONFIG_HOME/kanban/config.yaml`)
//! 4. Defaults

use crate::error::{KanbanError, Result, ValidationError};
use crate::model::LabelSpec;
use crate::sync::{DEFAULT_CONCURRENCY, DEFAULT_ISSUE_LIMIT, DEFAULT_PR_LIMIT};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Highest config file version this binary reads.
pub const CONFIG_VERSION: u32 = 1;
/// Default metrics window in days.
pub const DEFAULT_METRICS_WINDOW_DAYS: u32 = 30;
const MAX_CONCURRENCY: usize = 50;

pub const ENV_ORG: &str = "KANBAN_ORG";
pub const ENV_DB: &str = "KANBAN_DB";
pub const ENV_CONCURRENCY: &str = "KANBAN_CONCURRENCY";

const APP_DIR: &str = "kanban";
const CONFIG_FILENAME: &str = "config.yaml";
const DB_FILENAME: &str = "kanban.db";

static COLOR_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{6}$").ok());
static NAME_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9 :\-_\.]*$").ok());

/// Which repositories a sync targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoriesConfig {
    /// Explicit names; when set, the remote listing is skipped.
    pub list: Vec<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub concurrency: usize,
    pub issue_limit: usize,
    pub pr_limit: usize,
    pub metrics_window_days: u32,
    /// Backfill issues closed within this many days during sync.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_days: Option<u32>,
    /// Keys may be `review` or `status: review`.
    pub wip_limits: BTreeMap<String, i64>,
    /// Leave labels outside the configured set out of audit reports.
    pub preserve_unknown: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            issue_limit: DEFAULT_ISSUE_LIMIT,
            pr_limit: DEFAULT_PR_LIMIT,
            metrics_window_days: DEFAULT_METRICS_WINDOW_DAYS,
            closed_days: None,
            wip_limits: BTreeMap::new(),
            preserve_unknown: false,
        }
    }
}

/// The resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    pub repositories: RepositoriesConfig,
    /// Desired labels grouped by category (`status`, `priority`, ...).
    pub labels: BTreeMap<String, Vec<LabelSpec>>,
    pub settings: Settings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            organization: None,
            database: None,
            repositories: RepositoriesConfig::default(),
            labels: BTreeMap::new(),
            settings: Settings::default(),
        }
    }
}

/// CLI overrides for config loading (optional).
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config: Option<PathBuf>,
    pub db: Option<PathBuf>,
    pub org: Option<String>,
    pub concurrency: Option<usize>,
}

impl Config {
    /// Parse a YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or the version is newer
    /// than [`CONFIG_VERSION`].
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)?;
        if config.version > CONFIG_VERSION {
            return Err(KanbanError::Config(format!(
                "config version {} is newer than supported version {CONFIG_VERSION}",
                config.version
            )));
        }
        Ok(config)
    }

    /// Read a config file. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if `KANBAN_CONCURRENCY` is not a number.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(org) = lookup(ENV_ORG).filter(|v| !v.trim().is_empty()) {
            self.organization = Some(org.trim().to_string());
        }
        if let Some(db) = lookup(ENV_DB).filter(|v| !v.trim().is_empty()) {
            self.database = Some(PathBuf::from(db));
        }
        if let Some(raw) = lookup(ENV_CONCURRENCY) {
            self.settings.concurrency = raw.trim().parse().map_err(|_| {
                KanbanError::validation(ENV_CONCURRENCY, format!("not a number: '{raw}'"))
            })?;
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(org) = &cli.org {
            self.organization = Some(org.clone());
        }
        if let Some(db) = &cli.db {
            self.database = Some(db.clone());
        }
        if let Some(concurrency) = cli.concurrency {
            self.settings.concurrency = concurrency;
        }
    }

    /// Every configured label, in category order then file order.
    #[must_use]
    pub fn all_labels(&self) -> Vec<LabelSpec> {
        self.labels.values().flatten().cloned().collect()
    }

    /// The configured organization.
    ///
    /// # Errors
    ///
    /// Returns [`KanbanError::NoOrganization`] when unset.
    pub fn require_organization(&self) -> Result<&str> {
        self.organization
            .as_deref()
            .filter(|o| !o.is_empty())
            .ok_or(KanbanError::NoOrganization)
    }

    /// Database path: configured, else the XDG data default.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(default_db_path)
    }

    /// Collect every problem in one pass.
    ///
    /// # Errors
    ///
    /// Returns a validation error listing all failures.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if !(1..=MAX_CONCURRENCY).contains(&self.settings.concurrency) {
            errors.push(ValidationError::new(
                "settings.concurrency",
                format!("must be between 1 and {MAX_CONCURRENCY}"),
            ));
        }
        if self.settings.metrics_window_days == 0 {
            errors.push(ValidationError::new(
                "settings.metrics_window_days",
                "must be at least 1",
            ));
        }
        for (status, limit) in &self.settings.wip_limits {
            if *limit < 0 {
                errors.push(ValidationError::new(
                    format!("settings.wip_limits.{status}"),
                    "must not be negative",
                ));
            }
        }

        let mut seen = HashSet::new();
        for (category, labels) in &self.labels {
            for label in labels {
                let field = format!("labels.{category}.{}", label.name);
                if !matches(&NAME_RE, &label.name) {
                    errors.push(ValidationError::new(&field, "invalid label name"));
                }
                if !matches(&COLOR_RE, &label.color) {
                    errors.push(ValidationError::new(
                        &field,
                        format!("color '{}' must be 6 hex digits", label.color),
                    ));
                }
                if !seen.insert(label.name.to_lowercase()) {
                    errors.push(ValidationError::new(&field, "duplicate label name"));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(KanbanError::from_validation_errors(errors))
        }
    }
}

fn matches(re: &LazyLock<Option<Regex>>, value: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(value))
}

fn xdg_dir(var: &str, fallback: &[&str]) -> PathBuf {
    if let Some(dir) = env::var_os(var).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    let home = env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from);
    fallback.iter().fold(home, |path, part| path.join(part))
}

/// `$XDG_CONFIG_HOME/kanban/config.yaml`.
#[must_use]
pub fn default_config_path() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", &[".config"])
        .join(APP_DIR)
        .join(CONFIG_FILENAME)
}

/// `$XDG_DATA_HOME/kanban/kanban.db`.
#[must_use]
pub fn default_db_path() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", &[".local", "share"])
        .join(APP_DIR)
        .join(DB_FILENAME)
}

/// Load configuration with the full precedence order.
///
/// An explicit `--config` path must exist; the default path may not.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or an
/// environment override is malformed.
pub fn load_config(cli: &CliOverrides) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) if !path.exists() => {
            return Err(KanbanError::ConfigNotFound { path: path.clone() });
        }
        Some(path) => Config::from_file(path)?,
        None => Config::from_file(&default_config_path())?,
    };
    config.apply_env_with(|key| env::var(key).ok())?;
    config.apply_cli(cli);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
version: 1
organization: acme
repositories:
  include: ["api-*"]
  exclude: ["*-archive"]
labels:
  status:
    - { name: "status: ready", color: "0e8a16", description: "Ready to start" }
    - { name: "status: review", color: "FBCA04" }
  priority:
    - { name: "priority: high", color: "d93f0b" }
settings:
  concurrency: 8
  wip_limits:
    "status: review": 5
"#;

    #[test]
    fn parse_full_document() {
        let config = Config::from_yaml_str(SAMPLE).expect("parse");
        assert_eq!(config.organization.as_deref(), Some("acme"));
        assert_eq!(config.repositories.include, vec!["api-*"]);
        assert_eq!(config.settings.concurrency, 8);
        assert_eq!(config.settings.issue_limit, DEFAULT_ISSUE_LIMIT);
        assert_eq!(config.settings.wip_limits.get("status: review"), Some(&5));
        assert!(config.validate().is_ok());

        let labels = config.all_labels();
        assert_eq!(labels.len(), 3);
        // BTreeMap orders categories by name.
        assert_eq!(labels[0].name, "priority: high");
        assert_eq!(labels[2].description, "");
    }

    #[test]
    fn empty_document_is_default() {
        assert_eq!(Config::from_yaml_str("  \n").expect("parse"), Config::default());
    }

    #[test]
    fn newer_version_is_rejected() {
        let err = Config::from_yaml_str("version: 9\n").unwrap_err();
        assert!(matches!(err, KanbanError::Config(_)));
    }

    #[test]
    fn validation_collects_every_problem() {
        let yaml = r#"
labels:
  status:
    - { name: "status: ready", color: "zzzzzz" }
    - { name: "Status: Ready", color: "0e8a16" }
    - { name: "-bad", color: "0e8a16" }
settings:
  concurrency: 0
"#;
        let config = Config::from_yaml_str(yaml).expect("parse");
        match config.validate().unwrap_err() {
            KanbanError::ValidationErrors { errors } => {
                assert_eq!(errors.len(), 4);
                assert!(errors.iter().any(|e| e.message == "duplicate label name"));
                assert!(errors.iter().any(|e| e.field == "settings.concurrency"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn precedence_cli_over_env_over_file() {
        let mut config = Config::from_yaml_str(SAMPLE).expect("parse");
        config
            .apply_env_with(|key| match key {
                ENV_ORG => Some("env-org".to_string()),
                ENV_CONCURRENCY => Some("3".to_string()),
                _ => None,
            })
            .expect("env");
        assert_eq!(config.organization.as_deref(), Some("env-org"));
        assert_eq!(config.settings.concurrency, 3);

        config.apply_cli(&CliOverrides {
            org: Some("cli-org".to_string()),
            ..CliOverrides::default()
        });
        assert_eq!(config.require_organization().expect("org"), "cli-org");
        assert_eq!(config.settings.concurrency, 3);
    }

    #[test]
    fn bad_env_concurrency_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_env_with(|key| (key == ENV_CONCURRENCY).then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, KanbanError::Validation { .. }));
    }

    #[test]
    fn missing_organization() {
        assert!(matches!(
            Config::default().require_organization(),
            Err(KanbanError::NoOrganization)
        ));
    }

    #[test]
    fn explicit_config_path_must_exist() {
        let temp = TempDir::new().expect("tempdir");
        let cli = CliOverrides {
            config: Some(temp.path().join("missing.yaml")),
            ..CliOverrides::default()
        };
        assert!(matches!(
            load_config(&cli),
            Err(KanbanError::ConfigNotFound { .. })
        ));
    }

    #[test]
    fn load_from_file_with_db_override() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("config.yaml");
        fs::write(&path, SAMPLE).expect("write config");
        let db = temp.path().join("cache.db");

        let config = load_config(&CliOverrides {
            config: Some(path),
            db: Some(db.clone()),
            ..CliOverrides::default()
        })
        .expect("load");
        assert_eq!(config.database_path(), db);
        assert_eq!(config.repositories.exclude, vec!["*-archive"]);
    }
}
