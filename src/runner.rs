// ABOUTME: Runner facade: picks and wires one transport adapter from the runner parameters.
// ABOUTME: Every configuration problem surfaces here, before any connection is attempted.

use crate::artifacts::ArtifactSource;
use crate::config::{
    ANONYMOUS_PASSWORD, ANONYMOUS_USER, AUTH_METHOD_ANONYMOUS, AUTH_METHOD_USER_PWD,
    DeployerConfig, InternalProperties, PARAM_AGENT_FORWARDING, PARAM_AUTH_METHOD, PARAM_COMMAND,
    PARAM_FAIL_ON_EXIT_CODE, PARAM_FTP_MODE, PARAM_FTP_TRANSFER_MODE, PARAM_PASSWORD, PARAM_PTY,
    PARAM_TARGET_URL, PARAM_TRANSPORT, PARAM_USERNAME, RunnerParams, TargetSpec,
};
use crate::error::{Error, Result};
use crate::monitor::{ExecutionOptions, MonitorSettings};
use crate::ssh::{AuthConfig, DirectoryKeyManager, KeyManager, SessionProvider};
use crate::transport::ftp::{FtpMode, FtpTransferType};
use crate::transport::{
    ExecTransport, FtpSettings, FtpTransport, Outcome, RunContext, ScpTransport, SftpTransport,
    SmbTransport, Transport, TransportKind,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

pub struct Runner {
    params: RunnerParams,
    internal: InternalProperties,
    artifacts: ArtifactSource,
    working_dir: PathBuf,
    key_manager: Arc<dyn KeyManager>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("transport", &self.params.get(PARAM_TRANSPORT))
            .field("target", &self.params.get(PARAM_TARGET_URL))
            .field("artifacts", &self.artifacts.len())
            .field("working_dir", &self.working_dir)
            .finish_non_exhaustive()
    }
}

impl Runner {
    pub fn new(params: RunnerParams, internal: InternalProperties, artifacts: ArtifactSource) -> Self {
        let key_manager: Arc<dyn KeyManager> = match &internal.uploaded_keys_dir {
            Some(dir) => Arc::new(DirectoryKeyManager::new(dir)),
            None => Arc::new(HashMap::<String, String>::new()),
        };
        Self {
            params,
            internal,
            artifacts,
            working_dir: PathBuf::from("."),
            key_manager,
        }
    }

    /// Runner for a loaded configuration file.
    pub fn from_config(config: &DeployerConfig, artifacts: ArtifactSource) -> Result<Self> {
        Ok(Self::new(config.runner_params()?, config.internal.clone(), artifacts))
    }

    /// Base for relative key file paths.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn key_manager(mut self, key_manager: Arc<dyn KeyManager>) -> Self {
        self.key_manager = key_manager;
        self
    }

    pub fn params(&self) -> &RunnerParams {
        &self.params
    }

    pub fn transport_kind(&self) -> Result<TransportKind> {
        let value = self
            .params
            .get(PARAM_TRANSPORT)
            .ok_or(Error::MissingParameter(PARAM_TRANSPORT))?;
        TransportKind::parse(value).ok_or_else(|| Error::UnknownTransport(value.to_string()))
    }

    /// Construct the adapter the parameters describe.
    pub fn build(&self) -> Result<Box<dyn Transport>> {
        let kind = self.transport_kind()?;
        tracing::debug!(transport = %kind, "Building transport");
        MonitorSettings::from(&self.internal).validate()?;

        match kind {
            TransportKind::Exec => {
                let command = self
                    .params
                    .get(PARAM_COMMAND)
                    .ok_or(Error::MissingParameter(PARAM_COMMAND))?;
                Ok(Box::new(ExecTransport::new(
                    self.session_provider(kind)?,
                    command,
                    self.execution_options(),
                    MonitorSettings::from(&self.internal),
                )))
            }
            TransportKind::Scp => Ok(Box::new(ScpTransport::new(
                self.session_provider(kind)?,
                self.target()?,
                self.artifacts.clone(),
            ))),
            TransportKind::Sftp => Ok(Box::new(SftpTransport::new(
                self.session_provider(kind)?,
                self.target()?,
                self.artifacts.clone(),
            ))),
            TransportKind::Ftp => Ok(Box::new(FtpTransport::new(
                self.ftp_settings()?,
                self.artifacts.clone(),
            ))),
            TransportKind::Smb => {
                let target = self
                    .params
                    .get(PARAM_TARGET_URL)
                    .ok_or(Error::MissingParameter(PARAM_TARGET_URL))?;
                Ok(Box::new(SmbTransport::new(
                    target,
                    self.internal.smb_mount_root.as_deref(),
                    self.artifacts.clone(),
                )?))
            }
        }
    }

    /// Build and run. Only configuration errors come back as `Err`.
    pub async fn run(&self, ctx: &RunContext) -> Result<Outcome> {
        let transport = self.build()?;
        Ok(transport.run(ctx).await)
    }

    fn target(&self) -> Result<TargetSpec> {
        let raw = self
            .params
            .get(PARAM_TARGET_URL)
            .ok_or(Error::MissingParameter(PARAM_TARGET_URL))?;
        TargetSpec::parse(raw)
    }

    fn session_provider(&self, kind: TransportKind) -> Result<SessionProvider> {
        let target = self.target()?;
        let auth = AuthConfig::from_params(&self.params, kind.as_str())?;
        Ok(SessionProvider::new(
            target,
            auth,
            self.internal.clone(),
            self.working_dir.clone(),
            Arc::clone(&self.key_manager),
        ))
    }

    fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            pty_type: self.params.get(PARAM_PTY).map(|term| term.trim().to_string()),
            agent_forwarding: self.params.flag(PARAM_AGENT_FORWARDING),
            fail_build_on_exit_code: self.params.flag(PARAM_FAIL_ON_EXIT_CODE),
        }
    }

    fn ftp_settings(&self) -> Result<FtpSettings> {
        let target = self.target()?;
        let (username, password) = match self.params.get(PARAM_AUTH_METHOD).unwrap_or(AUTH_METHOD_USER_PWD) {
            AUTH_METHOD_USER_PWD => (
                self.params.get_or_empty(PARAM_USERNAME).to_string(),
                self.params.raw(PARAM_PASSWORD).unwrap_or_default().to_string(),
            ),
            AUTH_METHOD_ANONYMOUS => (ANONYMOUS_USER.to_string(), ANONYMOUS_PASSWORD.to_string()),
            other => {
                return Err(Error::UnknownAuthMethod {
                    transport: TransportKind::Ftp.as_str().to_string(),
                    method: other.to_string(),
                });
            }
        };

        let mode = match self.params.get(PARAM_FTP_MODE) {
            None => FtpMode::default(),
            Some(value) => FtpMode::parse(value).ok_or_else(|| Error::InvalidParameter {
                name: PARAM_FTP_MODE,
                reason: format!("expected ACTIVE or PASSIVE, got [{value}]"),
            })?,
        };
        let transfer_type = match self.params.get(PARAM_FTP_TRANSFER_MODE) {
            None => FtpTransferType::default(),
            Some(value) => FtpTransferType::parse(value).ok_or_else(|| Error::InvalidParameter {
                name: PARAM_FTP_TRANSFER_MODE,
                reason: format!("expected BINARY or ASCII, got [{value}]"),
            })?,
        };

        Ok(FtpSettings::new(&target, username, password)
            .mode(mode)
            .transfer_type(transfer_type)
            .connect_timeout(self.internal.connect_timeout))
    }
}
