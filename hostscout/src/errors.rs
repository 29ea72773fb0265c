/// Error types for hostscout.
///
/// Only conditions that make a whole operation meaningless are errors here:
/// a circular include in the definition set, a missing definitions root,
/// unreadable configuration, or a broken worker channel. Everything that
/// affects a single definition or a single unit of work is reported as data
/// (`LoadWarning`, `UnitStatus::Failed`) so callers can still render a full
/// summary.
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for hostscout operations
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors that can occur while loading definitions or driving a scan
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Definitions directory not found: {0}")]
    DefinitionsNotFound(PathBuf),
    #[error("Circular include: {}", format_cycle(.cycle))]
    CircularInclude { cycle: Vec<PathBuf> },
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Worker protocol error: {0}")]
    WorkerProtocol(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Invalid UTF-8 in {path}: {source}")]
    EncodingError {
        path: PathBuf,
        source: std::str::Utf8Error,
    },
}

fn format_cycle(cycle: &[PathBuf]) -> String {
    let mut out = String::new();
    for (i, path) in cycle.iter().enumerate() {
        if i > 0 {
            out.push_str(" -> ");
        }
        let _ = write!(out, "{}", path.display());
    }
    out
}

impl ScanError {
    pub fn definitions_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DefinitionsNotFound(path.into())
    }

    pub fn circular_include(cycle: Vec<PathBuf>) -> Self {
        Self::CircularInclude { cycle }
    }

    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound(path.into())
    }

    pub fn permission_denied(path: impl Into<PathBuf>) -> Self {
        Self::PermissionDenied(path.into())
    }

    pub fn invalid_pattern(msg: impl Into<String>) -> Self {
        Self::InvalidPattern(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn worker_protocol(msg: impl Into<String>) -> Self {
        Self::WorkerProtocol(msg.into())
    }

    pub fn encoding_error(path: impl Into<PathBuf>, source: std::str::Utf8Error) -> Self {
        Self::EncodingError {
            path: path.into(),
            source,
        }
    }

    /// Maps an I/O error on `path` to the most specific variant
    pub fn from_io(path: &Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::file_not_found(path),
            std::io::ErrorKind::PermissionDenied => Self::permission_denied(path),
            _ => Self::IoError(err),
        }
    }
}
