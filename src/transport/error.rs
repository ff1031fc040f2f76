// ABOUTME: Errors raised while moving artifacts to a target.
// ABOUTME: Adapters turn these into failed outcomes; they never reach the caller.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Ssh(#[from] crate::ssh::Error),

    #[error("failed to read {path}: {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload of {path} failed: {reason}")]
    Upload { path: String, reason: String },

    #[error("remote scp: {0}")]
    ScpRejected(String),

    #[error("FTP error: {0}")]
    Ftp(#[from] suppaftp::FtpError),

    #[error("SMB target {target}: {reason}")]
    Smb { target: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub(crate) fn local_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TransportError::LocalFile {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
