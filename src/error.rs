use thiserror::Error;

/// Errors raised while opening and reading classpath archives.
///
/// All payloads are owned strings so the enum is `Clone`: singleton-map
/// cells hand the same failure to every caller that waited on a
/// construction, and retrying callers get a fresh attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("path does not exist or cannot be read: {0}")]
    NotFound(String),

    #[error("not an archive: {path}: {reason}")]
    NotArchive { path: String, reason: String },

    #[error("{0} scanning is disabled")]
    Disabled(&'static str),

    #[error("uncompressed size {size} of {path} is too large to inflate to memory")]
    TooLarge { path: String, size: u64 },

    #[error("failed to extract {path}: {reason}")]
    Extraction { path: String, reason: String },

    #[error("failed to map {path}: {reason}")]
    Mapping { path: String, reason: String },

    #[error("handler already closed")]
    Closed,

    #[error("interrupted")]
    Interrupted,

    #[error("close failed: {0}")]
    Close(String),

    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },
}

impl ScanError {
    pub fn io(path: impl std::fmt::Display, err: std::io::Error) -> Self {
        ScanError::Io {
            path: path.to_string(),
            reason: err.to_string(),
        }
    }

    pub fn not_archive(path: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        ScanError::NotArchive {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}
