//! Error types for pex
//!
//! All modules use `PexResult<T>` as their return type. Every error maps to a
//! process exit status through [`PexError::exit_code`].

use std::path::PathBuf;
use thiserror::Error;

/// Exit status when no interpreter could be set up for the build.
pub const CANNOT_SETUP_INTERPRETER: u8 = 102;

/// Exit status for invalid or conflicting option combinations.
pub const INVALID_OPTIONS: u8 = 103;

/// Result type alias for pex operations
pub type PexResult<T> = Result<T, PexError>;

/// All errors that can occur while building or seeding a PEX
#[derive(Error, Debug)]
pub enum PexError {
    // Option errors
    #[error("{0}")]
    ConfigConflict(String),

    #[error("Invalid resolve configuration: {0}")]
    InvalidConfiguration(String),

    #[error("The specified --tmpdir does not exist: {}", .0.display())]
    TmpDirMissing(PathBuf),

    #[error("The specified --tmpdir is not a directory: {}", .0.display())]
    TmpDirNotDirectory(PathBuf),

    // Interpreter errors
    #[error("Failed to find interpreter: {0}")]
    InterpreterNotFound(String),

    #[error("Compatibility requirements are not formatted properly: {constraint}: {reason}")]
    InvalidConstraint { constraint: String, reason: String },

    #[error("{}", unsatisfiable_message(.constraints, .search_path, .failures))]
    UnsatisfiableConstraints {
        constraints: Vec<String>,
        search_path: String,
        failures: Vec<String>,
    },

    #[error("Failed to identify interpreter {}: {reason}", .binary.display())]
    ProbeFailed { binary: PathBuf, reason: String },

    #[error("{platform} is an invalid platform: {reason}")]
    InvalidPlatform { platform: String, reason: String },

    // Resolution errors
    #[error("{0}")]
    Unsatisfiable(String),

    #[error("Invalid distribution at {}: {reason}", .path.display())]
    InvalidDistribution { path: PathBuf, reason: String },

    // Build errors
    #[error("Failed to validate entry point {entry_point}: {stderr}")]
    EntryPointInvalid { entry_point: String, stderr: String },

    #[error("Invalid PEX at {}: {reason}", .path.display())]
    InvalidPex { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

fn unsatisfiable_message(constraints: &[String], search_path: &str, failures: &[String]) -> String {
    let mut message = format!(
        "Could not find a compatible interpreter.\nExamined interpreters on {} against constraints: {}",
        search_path,
        constraints.join(" or ")
    );
    if !failures.is_empty() {
        message.push_str("\nSkipped interpreters:");
        for failure in failures {
            message.push_str("\n  ");
            message.push_str(failure);
        }
    }
    message
}

impl PexError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::ConfigConflict(_) => INVALID_OPTIONS,
            Self::InterpreterNotFound(_) | Self::UnsatisfiableConstraints { .. } => {
                CANNOT_SETUP_INTERPRETER
            }
            _ => 1,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InterpreterNotFound(_) => {
                Some("Pass an absolute path to --python or a binary name available on $PATH")
            }
            Self::UnsatisfiableConstraints { .. } => {
                Some("Widen --interpreter-constraint or point --python-path at more interpreters")
            }
            Self::TmpDirMissing(_) => Some("Create the directory or pass a different --tmpdir"),
            _ => None,
        }
    }
}
