//! Error types and handling for `kanban_rust`.
//!
//! # Design
//!
//! - Uses `thiserror` for derive-based error types
//! - Wraps remote tracker failures as [`TrackerError`] so sync can
//!   isolate them per repository
//! - Provides recovery hints and category exit codes for the CLI

mod structured;

pub use structured::{ErrorCode, StructuredError};

use crate::tracker::TrackerError;
use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for `kanban_rust` operations.
#[derive(Error, Debug)]
pub enum KanbanError {
    // === Storage Errors ===
    /// Database file not found at the specified path.
    #[error("Database not found at '{path}'")]
    DatabaseNotFound { path: PathBuf },

    /// Stored schema is newer than this binary understands.
    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: i32, found: i32 },

    /// `SQLite` database error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // === Lookup Errors ===
    /// Repository has never been synced into the local store.
    #[error("Repository not found: {name}")]
    RepositoryNotFound { name: String },

    /// Issue with the specified number was not found.
    #[error("Issue not found: {repo}#{number}")]
    IssueNotFound { repo: String, number: i64 },

    // === Precondition Errors ===
    /// Sync was asked to run against an empty repository set.
    #[error("No repositories to sync")]
    NoRepositories,

    /// Label sync was requested but the configuration defines no labels.
    #[error("No labels defined in configuration")]
    NoLabels,

    /// Organization is required but was not configured.
    #[error("No organization configured")]
    NoOrganization,

    // === Validation Errors ===
    /// Field validation failed.
    #[error("Validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Multiple validation errors occurred.
    #[error("Validation errors: {errors:?}")]
    ValidationErrors { errors: Vec<ValidationError> },

    /// Invalid flow status value.
    #[error("Invalid status: {status}")]
    InvalidStatus { status: String },

    // === Remote Errors ===
    /// Issue tracker call failed.
    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    /// One or more repositories failed during a multi-repository sync.
    #[error("Sync finished with {count} error(s)")]
    SyncIncomplete { count: usize },

    // === Configuration Errors ===
    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file missing where one was required.
    #[error("Config file not found: '{path}'")]
    ConfigNotFound { path: PathBuf },

    // === I/O Errors ===
    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Wrapped anyhow error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A single field validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field that failed validation.
    pub field: String,
    /// The reason for the validation failure.
    pub message: String,
}

impl ValidationError {
    /// Create a new validation error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

impl KanbanError {
    /// Can the user fix this without code changes?
    #[must_use]
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseNotFound { .. }
                | Self::RepositoryNotFound { .. }
                | Self::NoRepositories
                | Self::NoLabels
                | Self::NoOrganization
                | Self::Validation { .. }
                | Self::ValidationErrors { .. }
                | Self::InvalidStatus { .. }
                | Self::ConfigNotFound { .. }
        )
    }

    /// Human-friendly suggestion for fixing this error.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::DatabaseNotFound { .. } => Some("Check --db or run: kanban db init"),
            Self::RepositoryNotFound { .. } => Some("Run: kanban sync --repo <name>"),
            Self::NoRepositories => {
                Some("Pass --repo or list repositories under 'repositories' in config.yaml")
            }
            Self::NoLabels => Some("Define labels in config.yaml or pass --no-labels"),
            Self::NoOrganization => Some("Set 'organization' in config.yaml or KANBAN_ORG"),
            Self::SchemaMismatch { .. } => Some("Upgrade kanban to a newer version"),
            Self::ConfigNotFound { .. } => Some("Create the file or pass --config <path>"),
            Self::Tracker(TrackerError::NotAuthenticated) => Some("Run: gh auth login"),
            Self::Tracker(TrackerError::NotInstalled) => {
                Some("Install the GitHub CLI: https://cli.github.com")
            }
            Self::Tracker(TrackerError::RateLimited { .. }) => {
                Some("Wait for the rate limit to reset and re-run sync")
            }
            Self::InvalidStatus { .. } => {
                Some("Valid statuses: backlog, ready, in-progress, review, testing, done")
            }
            _ => None,
        }
    }

    /// Create a validation error for a specific field.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create from multiple validation errors.
    #[must_use]
    pub fn from_validation_errors(mut errors: Vec<ValidationError>) -> Self {
        if errors.len() == 1 {
            let err = errors.remove(0);
            Self::Validation {
                field: err.field,
                reason: err.message,
            }
        } else {
            Self::ValidationErrors { errors }
        }
    }
}

/// Result type using `KanbanError`.
pub type Result<T> = std::result::Result<T, KanbanError>;
