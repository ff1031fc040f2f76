// ABOUTME: SSH-specific error types.
// ABOUTME: Covers connection, authentication, key loading, and channel failures.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("connection to {host}:{port} timed out after {timeout:?}")]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    #[error("authentication failed for user [{user}] using {method}")]
    AuthenticationFailed { user: String, method: &'static str },

    #[error("failed to load key from {path}: {reason}")]
    KeyLoadFailed { path: PathBuf, reason: String },

    #[error("no key found for id [{0}]")]
    UnknownKey(String),

    #[error("channel request failed: {0}")]
    Channel(String),

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("SFTP error: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),

    #[error("SSH key error: {0}")]
    Key(#[from] russh::keys::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this failure came from credentials rather than the network.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Error::AuthenticationFailed { .. }
                | Error::KeyLoadFailed { .. }
                | Error::UnknownKey(_)
                | Error::Key(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
