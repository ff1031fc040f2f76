// ABOUTME: Transport adapters and the contract they share: one run, one terminal outcome.
// ABOUTME: Also holds the sequenced upload loop used by every file-copying transport.

mod error;
pub mod exec;
pub mod ftp;
pub mod scp;
pub mod sftp;
pub mod smb;

pub use error::{Result, TransportError};
pub use exec::ExecTransport;
pub use ftp::{FtpSettings, FtpTransport};
pub use scp::ScpTransport;
pub use sftp::SftpTransport;
pub use smb::SmbTransport;

use crate::artifacts::{ArtifactEntry, ArtifactSource};
use crate::config::{TRANSPORT_EXEC, TRANSPORT_FTP, TRANSPORT_SCP, TRANSPORT_SFTP, TRANSPORT_SMB};
use crate::diagnostics::BuildProblem;
use crate::output::BuildLog;
use crate::ssh::RemoteSession;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The protocol a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Exec,
    Scp,
    Sftp,
    Ftp,
    Smb,
}

impl TransportKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            TRANSPORT_EXEC => Some(TransportKind::Exec),
            TRANSPORT_SCP => Some(TransportKind::Scp),
            TRANSPORT_SFTP => Some(TransportKind::Sftp),
            TRANSPORT_FTP => Some(TransportKind::Ftp),
            TRANSPORT_SMB => Some(TransportKind::Smb),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Exec => TRANSPORT_EXEC,
            TransportKind::Scp => TRANSPORT_SCP,
            TransportKind::Sftp => TRANSPORT_SFTP,
            TransportKind::Ftp => TRANSPORT_FTP,
            TransportKind::Smb => TRANSPORT_SMB,
        }
    }

    /// Name used in log lines and exit-code messages.
    pub fn label(&self) -> &'static str {
        match self {
            TransportKind::Exec => "SSH",
            TransportKind::Scp => "SCP",
            TransportKind::Sftp => "SFTP",
            TransportKind::Ftp => "FTP",
            TransportKind::Smb => "SMB",
        }
    }

    /// Prefix of build problem identities.
    pub fn run_type(&self) -> &'static str {
        match self {
            TransportKind::Exec => "ssh-exec-runner",
            TransportKind::Scp => "scp-deploy-runner",
            TransportKind::Sftp => "sftp-deploy-runner",
            TransportKind::Ftp => "ftp-deploy-runner",
            TransportKind::Smb => "smb-deploy-runner",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    SucceededWithProblems { message: String },
    Failed { message: String },
    Interrupted,
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Outcome::SucceededWithProblems { message } | Outcome::Failed { message } => {
                Some(message)
            }
            Outcome::Success | Outcome::Interrupted => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("succeeded"),
            Outcome::SucceededWithProblems { message } => {
                write!(f, "succeeded with problems: {message}")
            }
            Outcome::Failed { message } => write!(f, "failed: {message}"),
            Outcome::Interrupted => f.write_str("interrupted"),
        }
    }
}

/// What a run reports to and listens on.
#[derive(Clone)]
pub struct RunContext {
    pub log: Arc<dyn BuildLog>,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(log: Arc<dyn BuildLog>, cancel: CancellationToken) -> Self {
        Self { log, cancel }
    }
}

/// One configured deployment step.
///
/// `run` consumes the adapter, so each one reaches its target once. Every
/// error is folded into the returned outcome and every resource it opened is
/// released before it returns.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn run(self: Box<Self>, ctx: &RunContext) -> Outcome;
}

/// Puts one artifact at a time onto an open connection.
#[async_trait]
pub(crate) trait Uploader: Send {
    async fn upload(&mut self, entry: &ArtifactEntry) -> Result<()>;
}

/// Why an upload sequence stopped early.
#[derive(Debug)]
pub(crate) enum UploadStop {
    Interrupted,
    Failed(TransportError),
}

/// Upload entries in order, stopping at the first failure or at cancellation.
pub(crate) async fn upload_all<U: Uploader>(
    uploader: &mut U,
    artifacts: &ArtifactSource,
    ctx: &RunContext,
) -> std::result::Result<usize, UploadStop> {
    let mut uploaded = 0;
    for entry in artifacts {
        if ctx.cancel.is_cancelled() {
            return Err(UploadStop::Interrupted);
        }
        if entry.escapes_base() {
            return Err(UploadStop::Failed(TransportError::Upload {
                path: entry.local_path().display().to_string(),
                reason: format!(
                    "remote path [{}] climbs out of the target directory",
                    entry.remote_relative_path()
                ),
            }));
        }
        tracing::debug!(
            local = %entry.local_path().display(),
            remote = entry.remote_relative_path(),
            "Uploading"
        );
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(UploadStop::Interrupted),
            result = uploader.upload(entry) => result.map_err(UploadStop::Failed)?,
        }
        uploaded += 1;
    }
    Ok(uploaded)
}

/// Outcome for an upload sequence, reported to the build log.
pub(crate) fn upload_outcome(
    kind: TransportKind,
    ctx: &RunContext,
    target: &str,
    result: std::result::Result<usize, UploadStop>,
) -> Outcome {
    match result {
        Ok(0) => {
            ctx.log.message("No artifacts to upload");
            Outcome::Success
        }
        Ok(count) => {
            ctx.log
                .message(&format!("Uploaded [{count}] file(s) to [{target}]"));
            Outcome::Success
        }
        Err(UploadStop::Interrupted) => interrupted(ctx),
        Err(UploadStop::Failed(e)) => failed(kind, ctx, e),
    }
}

pub(crate) fn interrupted(ctx: &RunContext) -> Outcome {
    ctx.log.message("Interrupted.");
    Outcome::Interrupted
}

/// Report an error as a deployment build problem and fail the run.
pub(crate) fn failed(kind: TransportKind, ctx: &RunContext, error: impl fmt::Display) -> Outcome {
    let message = error.to_string();
    tracing::warn!("{} deployment failed: {}", kind.label(), message);
    ctx.log
        .build_problem(BuildProblem::deployment(kind.run_type(), message.clone()));
    Outcome::Failed { message }
}

/// Disconnect after a run. A failure here never changes the outcome.
pub(crate) async fn disconnect<S: RemoteSession>(session: S) {
    let host = session.host().to_string();
    if let Err(e) = session.disconnect().await {
        tracing::warn!(host = %host, "Failed to disconnect cleanly: {}", e);
    }
}

/// Join a remote base path and a relative path with `/`.
///
/// An empty base is the login directory.
pub(crate) fn remote_join(base: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches('/');
    if base.is_empty() {
        relative.to_string()
    } else if relative.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), relative)
    }
}

/// Quote for a POSIX shell.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
