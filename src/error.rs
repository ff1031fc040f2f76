// ABOUTME: Application-wide error types for the deployer.
// ABOUTME: Configuration failures raised before any network activity begins.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("unknown transport: [{0}]")]
    UnknownTransport(String),

    #[error("unknown authentication method [{method}] for {transport} transport")]
    UnknownAuthMethod { transport: String, method: String },

    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("invalid target [{target}]: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("parameter {param} refers to unset environment variable {var}")]
    MissingEnvVar { param: String, var: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub fn invalid_target(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidTarget {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
