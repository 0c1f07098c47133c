use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoutError {
    #[error("Workspace target not found: {0}")]
    NotFound(PathBuf),

    #[error("Malformed descriptor at {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Permission denied: {0}")]
    Permission(PathBuf),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Failed to move {path} to trash: {source}")]
    Trash {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to back up {path}: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported workspace URI: {0}")]
    UnsupportedUri(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used by the error list and the retry action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Parse,
    Permission,
    Timeout,
    Trash,
    Backup,
    UnsupportedUri,
    Io,
}

impl ScoutError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScoutError::NotFound(_) => ErrorKind::NotFound,
            ScoutError::Parse { .. } => ErrorKind::Parse,
            ScoutError::Permission(_) => ErrorKind::Permission,
            ScoutError::Timeout { .. } => ErrorKind::Timeout,
            ScoutError::Trash { .. } => ErrorKind::Trash,
            ScoutError::Backup { .. } => ErrorKind::Backup,
            ScoutError::UnsupportedUri(_) => ErrorKind::UnsupportedUri,
            ScoutError::Io(_) => ErrorKind::Io,
        }
    }

    /// Permission and plain IO failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScoutError::Permission(_) | ScoutError::Io(_))
    }

    /// Converts an IO error on `path` into the matching taxonomy variant.
    pub fn from_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ScoutError::NotFound(path.into()),
            std::io::ErrorKind::PermissionDenied => ScoutError::Permission(path.into()),
            _ => ScoutError::Io(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_map_to_taxonomy() {
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let other = std::io::Error::other("disk on fire");

        assert_eq!(ScoutError::from_io("/a", missing).kind(), ErrorKind::NotFound);
        assert_eq!(ScoutError::from_io("/a", denied).kind(), ErrorKind::Permission);
        assert_eq!(ScoutError::from_io("/a", other).kind(), ErrorKind::Io);
    }

    #[test]
    fn test_only_io_and_permission_are_retryable() {
        assert!(ScoutError::Permission("/a".into()).is_retryable());
        assert!(!ScoutError::NotFound("/a".into()).is_retryable());
        assert!(
            !ScoutError::Parse {
                path: "/a".into(),
                message: "bad".into()
            }
            .is_retryable()
        );
    }
}
