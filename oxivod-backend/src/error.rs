use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VodError>;

#[derive(Debug, Error)]
pub enum VodError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("transfer from {url} broke off: {source}")]
    Transfer {
        url: String,
        #[source]
        source: io::Error,
    },

    #[error("no usable Last-Modified header for {url}")]
    MissingTimestamp { url: String },

    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("destination already exists: {}", path.display())]
    Collision { path: PathBuf },

    #[error("dedupe store error at {}: {source}", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Coarse classification used in log fields and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Filesystem,
    Store,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Filesystem => "filesystem",
            ErrorKind::Store => "store",
            ErrorKind::Config => "config",
        };
        f.write_str(name)
    }
}

impl VodError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VodError::Request { .. }
            | VodError::HttpStatus { .. }
            | VodError::Transfer { .. }
            | VodError::MissingTimestamp { .. } => ErrorKind::Network,
            VodError::Filesystem { .. } | VodError::Collision { .. } => ErrorKind::Filesystem,
            VodError::Store { .. } => ErrorKind::Store,
            VodError::Config(_) => ErrorKind::Config,
        }
    }

    /// Transient failures worth another attempt within the same run.
    pub fn is_retryable(&self) -> bool {
        match self {
            VodError::Request { .. } | VodError::Transfer { .. } => true,
            VodError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub(crate) fn request(url: impl Into<String>, source: reqwest::Error) -> Self {
        VodError::Request { url: url.into(), source }
    }

    pub(crate) fn fs(path: impl Into<PathBuf>, source: io::Error) -> Self {
        VodError::Filesystem { path: path.into(), source }
    }
}
