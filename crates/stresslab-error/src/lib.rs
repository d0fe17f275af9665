use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for stress lab operations.
///
/// Seed-level failures (a document build rejecting a mutated payload, a
/// collaborator panicking) are *not* represented here: those are captured in
/// per-seed telemetry and never escape the runner. This enum covers failures
/// of the harness itself: bad arguments, unreadable files, broken reports.
#[derive(Error, Debug)]
pub enum StressLabError {
    // === Usage Errors ===
    /// A command-line argument could not be parsed.
    #[error("invalid argument {flag}: {detail}")]
    InvalidArgument { flag: String, detail: String },

    /// An unknown command-line flag was supplied.
    #[error("unknown argument: {0}")]
    UnknownArgument(String),

    /// A configuration value is out of range or inconsistent.
    #[error("invalid configuration: {detail}")]
    InvalidConfig { detail: String },

    // === I/O Errors ===
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A report or artifact file could not be written.
    #[error("failed to write '{path}': {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A report or artifact file could not be read.
    #[error("failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Run Errors ===
    /// The run was cancelled before any seed completed.
    #[error("run cancelled after {completed} of {requested} seeds")]
    Cancelled { completed: usize, requested: usize },

    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl StressLabError {
    /// Whether the error was caused by user input rather than the harness.
    pub const fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. } | Self::UnknownArgument(_) | Self::InvalidConfig { .. }
        )
    }

    /// Suggested remediation for user-facing errors.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::InvalidArgument { .. } | Self::UnknownArgument(_) => {
                Some("Run `stress-lab --help` for the accepted flags")
            }
            Self::InvalidConfig { .. } => Some("Check the thresholds file and numeric flags"),
            Self::WriteFailed { .. } => Some("Check that the report directory exists and is writable"),
            _ => None,
        }
    }

    /// Process exit code for this error.
    ///
    /// Exit codes 0 and 1 are reserved for "run passed" and "run found
    /// failures", so every harness error maps to 2.
    pub const fn exit_code(&self) -> i32 {
        2
    }

    /// Create an invalid-argument error.
    pub fn invalid_argument(flag: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidArgument {
            flag: flag.into(),
            detail: detail.into(),
        }
    }

    /// Create an invalid-configuration error.
    pub fn invalid_config(detail: impl Into<String>) -> Self {
        Self::InvalidConfig {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using `StressLabError`.
pub type Result<T> = std::result::Result<T, StressLabError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StressLabError::invalid_argument("--seeds", "expected a positive integer");
        assert_eq!(
            err.to_string(),
            "invalid argument --seeds: expected a positive integer"
        );
    }

    #[test]
    fn error_display_cancelled() {
        let err = StressLabError::Cancelled {
            completed: 3,
            requested: 30,
        };
        assert_eq!(err.to_string(), "run cancelled after 3 of 30 seeds");
    }

    #[test]
    fn usage_errors() {
        assert!(StressLabError::UnknownArgument("--bogus".to_owned()).is_usage_error());
        assert!(StressLabError::invalid_config("top must be > 0").is_usage_error());
        assert!(!StressLabError::internal("oops").is_usage_error());
    }

    #[test]
    fn suggestions() {
        assert!(
            StressLabError::UnknownArgument("--x".to_owned())
                .suggestion()
                .is_some()
        );
        assert!(StressLabError::internal("x").suggestion().is_none());
    }

    #[test]
    fn io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: StressLabError = io_err.into();
        assert!(matches!(err, StressLabError::Io(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn write_failed_keeps_source() {
        let err = StressLabError::WriteFailed {
            path: PathBuf::from("/nope/report.md"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/nope/report.md"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn json_error_from() {
        let parse = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: StressLabError = parse.into();
        assert!(err.to_string().starts_with("JSON error"));
    }
}
