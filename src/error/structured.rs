//! Structured error output for scripts and CI.
//!
//! Provides machine-parseable error information with:
//! - Error codes for categorization
//! - Hints for self-correction
//! - Retryability flags
//! - Context for debugging

use crate::error::KanbanError;
use crate::tracker::TrackerError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Machine-readable error codes.
///
/// These codes are stable and can be used for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // === Database Errors (exit code 2) ===
    DatabaseNotFound,
    SchemaMismatch,
    DatabaseError,

    // === Lookup Errors (exit code 3) ===
    RepositoryNotFound,
    IssueNotFound,

    // === Validation Errors (exit code 4) ===
    ValidationFailed,
    InvalidStatus,
    NoRepositories,
    NoLabels,
    NoOrganization,

    // === Sync Errors (exit code 5) ===
    /// Tracker call failed
    TrackerError,
    /// Tracker rate limit hit
    RateLimited,
    /// `gh` is not authenticated
    NotAuthenticated,
    /// Some repositories failed
    SyncIncomplete,

    // === Config Errors (exit code 7) ===
    ConfigError,
    ConfigNotFound,

    // === I/O Errors (exit code 8) ===
    IoError,
    JsonError,
    YamlError,

    // === Internal Errors (exit code 1) ===
    InternalError,
}

impl ErrorCode {
    /// Get the string representation for JSON output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DatabaseNotFound => "DATABASE_NOT_FOUND",
            Self::SchemaMismatch => "SCHEMA_MISMATCH",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::RepositoryNotFound => "REPOSITORY_NOT_FOUND",
            Self::IssueNotFound => "ISSUE_NOT_FOUND",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::InvalidStatus => "INVALID_STATUS",
            Self::NoRepositories => "NO_REPOSITORIES",
            Self::NoLabels => "NO_LABELS",
            Self::NoOrganization => "NO_ORGANIZATION",
            Self::TrackerError => "TRACKER_ERROR",
            Self::RateLimited => "RATE_LIMITED",
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::SyncIncomplete => "SYNC_INCOMPLETE",
            Self::ConfigError => "CONFIG_ERROR",
            Self::ConfigNotFound => "CONFIG_NOT_FOUND",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::YamlError => "YAML_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether re-running the same command might succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::TrackerError | Self::SyncIncomplete
        )
    }

    /// Get the exit code for this error category.
    ///
    /// - 1: Internal/unknown errors
    /// - 2: Database errors
    /// - 3: Lookup errors
    /// - 4: Validation and precondition errors
    /// - 5: Sync/tracker errors
    /// - 7: Config errors
    /// - 8: I/O errors
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::DatabaseNotFound | Self::SchemaMismatch | Self::DatabaseError => 2,
            Self::RepositoryNotFound | Self::IssueNotFound => 3,
            Self::ValidationFailed
            | Self::InvalidStatus
            | Self::NoRepositories
            | Self::NoLabels
            | Self::NoOrganization => 4,
            Self::TrackerError
            | Self::RateLimited
            | Self::NotAuthenticated
            | Self::SyncIncomplete => 5,
            Self::ConfigError | Self::ConfigNotFound => 7,
            Self::IoError | Self::JsonError | Self::YamlError => 8,
            Self::InternalError => 1,
        }
    }
}

/// Structured error for machine-parseable output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Machine-readable error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional hint for fixing the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether the operation can be retried
    pub retryable: bool,
    /// Additional context data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl StructuredError {
    /// Create a new structured error from a `KanbanError`.
    #[must_use]
    pub fn from_error(err: &KanbanError) -> Self {
        let (code, context) = Self::extract_code_and_context(err);
        Self {
            code,
            message: err.to_string(),
            hint: err.suggestion().map(str::to_string),
            retryable: code.is_retryable(),
            context,
        }
    }

    /// Convert to the JSON envelope written to stderr.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "error": {
                "code": self.code.as_str(),
                "message": self.message,
                "hint": self.hint,
                "retryable": self.retryable,
                "context": self.context,
            }
        })
    }

    /// Format for human-readable output.
    #[must_use]
    pub fn to_human(&self, color: bool) -> String {
        let mut output = String::new();

        if color {
            output.push_str("\x1b[31mError:\x1b[0m ");
        } else {
            output.push_str("Error: ");
        }
        output.push_str(&self.message);

        if let Some(hint) = &self.hint {
            output.push('\n');
            if color {
                output.push_str("\x1b[33mHint:\x1b[0m ");
            } else {
                output.push_str("Hint: ");
            }
            output.push_str(hint);
        }

        output
    }

    fn extract_code_and_context(err: &KanbanError) -> (ErrorCode, Option<Value>) {
        match err {
            KanbanError::DatabaseNotFound { path } => (
                ErrorCode::DatabaseNotFound,
                Some(json!({"path": path.display().to_string()})),
            ),
            KanbanError::SchemaMismatch { expected, found } => (
                ErrorCode::SchemaMismatch,
                Some(json!({"expected": expected, "found": found})),
            ),
            KanbanError::Database(_) => (ErrorCode::DatabaseError, None),
            KanbanError::RepositoryNotFound { name } => (
                ErrorCode::RepositoryNotFound,
                Some(json!({"repository": name})),
            ),
            KanbanError::IssueNotFound { repo, number } => (
                ErrorCode::IssueNotFound,
                Some(json!({"repository": repo, "number": number})),
            ),
            KanbanError::NoRepositories => (ErrorCode::NoRepositories, None),
            KanbanError::NoLabels => (ErrorCode::NoLabels, None),
            KanbanError::NoOrganization => (ErrorCode::NoOrganization, None),
            KanbanError::Validation { field, reason } => (
                ErrorCode::ValidationFailed,
                Some(json!({"field": field, "reason": reason})),
            ),
            KanbanError::ValidationErrors { errors } => (
                ErrorCode::ValidationFailed,
                Some(json!({
                    "errors": errors.iter()
                        .map(|e| json!({"field": e.field, "message": e.message}))
                        .collect::<Vec<_>>()
                })),
            ),
            KanbanError::InvalidStatus { status } => {
                (ErrorCode::InvalidStatus, Some(json!({"provided": status})))
            }
            KanbanError::Tracker(tracker) => match tracker {
                TrackerError::RateLimited { .. } => (ErrorCode::RateLimited, None),
                TrackerError::NotAuthenticated => (ErrorCode::NotAuthenticated, None),
                TrackerError::CommandFailed { command, .. } => (
                    ErrorCode::TrackerError,
                    Some(json!({"command": command})),
                ),
                _ => (ErrorCode::TrackerError, None),
            },
            KanbanError::SyncIncomplete { count } => {
                (ErrorCode::SyncIncomplete, Some(json!({"error_count": count})))
            }
            KanbanError::Config(_) => (ErrorCode::ConfigError, None),
            KanbanError::ConfigNotFound { path } => (
                ErrorCode::ConfigNotFound,
                Some(json!({"path": path.display().to_string()})),
            ),
            KanbanError::Io(_) => (ErrorCode::IoError, None),
            KanbanError::Json(_) => (ErrorCode::JsonError, None),
            KanbanError::Yaml(_) => (ErrorCode::YamlError, None),
            KanbanError::Other(_) => (ErrorCode::InternalError, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_categories() {
        assert_eq!(ErrorCode::DatabaseError.exit_code(), 2);
        assert_eq!(ErrorCode::RepositoryNotFound.exit_code(), 3);
        assert_eq!(ErrorCode::NoRepositories.exit_code(), 4);
        assert_eq!(ErrorCode::RateLimited.exit_code(), 5);
        assert_eq!(ErrorCode::ConfigError.exit_code(), 7);
        assert_eq!(ErrorCode::IoError.exit_code(), 8);
        assert_eq!(ErrorCode::InternalError.exit_code(), 1);
    }

    #[test]
    fn test_structured_from_repository_not_found() {
        let err = KanbanError::RepositoryNotFound {
            name: "acme/api".to_string(),
        };
        let structured = StructuredError::from_error(&err);
        assert_eq!(structured.code, ErrorCode::RepositoryNotFound);
        assert!(structured.hint.is_some());
        let json = structured.to_json();
        assert_eq!(json["error"]["code"], "REPOSITORY_NOT_FOUND");
        assert_eq!(json["error"]["context"]["repository"], "acme/api");
    }

    #[test]
    fn test_rate_limit_is_retryable() {
        let err = KanbanError::Tracker(TrackerError::RateLimited {
            message: "API rate limit exceeded".to_string(),
        });
        let structured = StructuredError::from_error(&err);
        assert_eq!(structured.code, ErrorCode::RateLimited);
        assert!(structured.retryable);
    }

    #[test]
    fn test_human_output_without_color() {
        let structured = StructuredError::from_error(&KanbanError::NoLabels);
        let text = structured.to_human(false);
        assert!(text.starts_with("Error: No labels defined"));
        assert!(text.contains("Hint: "));
    }
}
