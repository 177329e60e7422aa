//! CLI definitions and entry point.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::CliOverrides;

pub mod commands;

/// Local mirror of GitHub issues with Kanban flow metrics
#[derive(Parser, Debug)]
#[command(name = "kanban", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: $XDG_DATA_HOME/kanban/kanban.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Config file (default: $XDG_CONFIG_HOME/kanban/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// GitHub organization (overrides config and KANBAN_ORG)
    #[arg(long, global = true)]
    pub org: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    #[must_use]
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            config: self.config.clone(),
            db: self.db.clone(),
            org: self.org.clone(),
            concurrency: match &self.command {
                Commands::Sync(args) => args.concurrency,
                _ => None,
            },
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pull issues (and optionally PRs) from GitHub into the local store
    Sync(SyncArgs),

    /// Compute Kanban flow metrics for a repository
    Metrics(MetricsArgs),

    /// Show the board grouped by status
    Board(BoardArgs),

    /// Compare repository labels against the configured set
    Audit(AuditArgs),

    /// Cumulative flow diagram snapshots
    Cfd {
        #[command(subcommand)]
        command: CfdCommands,
    },

    /// Database management
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completions(CompletionsArgs),

    /// Show version information
    Version,
}

#[derive(Args, Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct SyncArgs {
    /// Repository to sync (repeatable; default: from config)
    #[arg(long = "repo", value_name = "REPO")]
    pub repos: Vec<String>,

    /// Push configured labels (default)
    #[arg(long, overrides_with = "no_labels")]
    pub labels: bool,

    /// Skip label sync
    #[arg(long)]
    pub no_labels: bool,

    /// Also sync pull requests and their linked issues
    #[arg(long)]
    pub prs: bool,

    /// Refine history from issue timelines (one call per issue)
    #[arg(long)]
    pub timeline: bool,

    /// Repositories synced in parallel
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Skip the daily CFD snapshot
    #[arg(long)]
    pub no_snapshot: bool,
}

impl SyncArgs {
    #[must_use]
    pub const fn sync_labels(&self) -> bool {
        !self.no_labels
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct MetricsArgs {
    /// Repository (`name` or `org/name`; default: every synced repository)
    #[arg(long)]
    pub repo: Option<String>,

    /// One report pooling every synced repository
    #[arg(long, conflicts_with = "repo")]
    pub all: bool,

    /// Window in days (default: settings.metrics_window_days)
    #[arg(long)]
    pub days: Option<u32>,

    /// Only list aging issues assigned to this user
    #[arg(long)]
    pub assignee: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct BoardArgs {
    /// Repository (`name` or `org/name`; default: all)
    #[arg(long)]
    pub repo: Option<String>,

    /// Only show cards assigned to this user
    #[arg(long)]
    pub assignee: Option<String>,

    /// Cards shown per column
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct AuditArgs {
    /// Repository to audit (repeatable; default: from config)
    #[arg(long = "repo", value_name = "REPO")]
    pub repos: Vec<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CfdCommands {
    /// Record today's status counts
    Snapshot {
        /// Repository (`name` or `org/name`)
        #[arg(long)]
        repo: String,
    },
    /// Show snapshots for recent days
    Show {
        /// Repository (`name` or `org/name`)
        #[arg(long)]
        repo: String,

        /// Days back from today
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum DbCommands {
    /// Create the database (or migrate it to the current schema)
    Init,
    /// Show store statistics
    Stats,
    /// Print the database path
    Path,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the resolved configuration
    Show,
    /// Validate the configuration
    Validate,
}

#[derive(Args, Debug, Clone)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: ShellType,

    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellType {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
    Elvish,
}
