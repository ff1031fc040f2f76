// ABOUTME: SSH session management using russh.
// ABOUTME: Handles connection, host key checks, authentication, and channel creation.

use super::channel::{ChannelEvent, ExecChannel, RemoteFs, RemoteSession};
use super::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use russh::client::{self, Config, Handle, Msg};
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::{PrivateKeyWithHashAlg, ssh_key};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWriteExt};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// How the session proves its identity.
#[derive(Clone)]
pub enum Credentials {
    Password(String),
    PrivateKey(Arc<ssh_key::PrivateKey>),
}

impl Credentials {
    fn method(&self) -> &'static str {
        match self {
            Credentials::Password(_) => "password",
            Credentials::PrivateKey(_) => "public key",
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Password(_) => f.write_str("Password(<redacted>)"),
            Credentials::PrivateKey(key) => f
                .debug_tuple("PrivateKey")
                .field(&key.algorithm().as_str())
                .finish(),
        }
    }
}

/// Configuration for establishing an SSH session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Remote host to connect to.
    pub host: String,
    /// SSH port (default: 22).
    pub port: u16,
    /// Username for authentication.
    pub user: String,
    pub credentials: Credentials,
    /// Whether to accept unknown hosts (Trust On First Use).
    /// If false, connection to unknown hosts will fail.
    pub trust_on_first_use: bool,
    /// Optional path to known_hosts file.
    /// If None, uses the default ~/.ssh/known_hosts.
    pub known_hosts_path: Option<PathBuf>,
    /// Upper bound for TCP connect plus key exchange.
    pub connect_timeout: Duration,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            credentials,
            trust_on_first_use: true,
            known_hosts_path: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn trust_on_first_use(mut self, tofu: bool) -> Self {
        self.trust_on_first_use = tofu;
        self
    }

    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// SSH client handler for russh.
pub(crate) struct SshHandler {
    host: String,
    port: u16,
    trust_on_first_use: bool,
    known_hosts_path: Option<PathBuf>,
}

impl SshHandler {
    fn new(host: String, port: u16, trust_on_first_use: bool, known_hosts_path: Option<PathBuf>) -> Self {
        Self {
            host,
            port,
            trust_on_first_use,
            known_hosts_path,
        }
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let check_result = match &self.known_hosts_path {
            Some(path) => check_known_hosts_path(&self.host, self.port, server_public_key, path),
            None => check_known_hosts(&self.host, self.port, server_public_key),
        };

        match check_result {
            Ok(true) => Ok(true),
            Ok(false) => {
                // Host not in known_hosts
                if self.trust_on_first_use {
                    tracing::warn!(
                        "Trust-On-First-Use: accepting unknown host key for {}:{}",
                        self.host,
                        self.port
                    );
                    let learn_result = match &self.known_hosts_path {
                        Some(path) => {
                            learn_known_hosts_path(&self.host, self.port, server_public_key, path)
                        }
                        None => learn_known_hosts(&self.host, self.port, server_public_key),
                    };
                    if let Err(e) = learn_result {
                        tracing::warn!("Failed to save host key to known_hosts: {}", e);
                    }
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Err(russh::keys::Error::KeyChanged { .. }) => {
                tracing::error!("Host key for {}:{} has changed", self.host, self.port);
                Ok(false)
            }
            Err(_) => Ok(self.trust_on_first_use),
        }
    }

    async fn server_channel_open_agent_forward(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut client::Session,
    ) -> std::result::Result<(), Self::Error> {
        super::agent::spawn_bridge(channel);
        Ok(())
    }
}

/// An established SSH session.
pub struct Session {
    config: SessionConfig,
    handle: Handle<SshHandler>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

impl Session {
    /// Connect and authenticate. Never returns a half-open session.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        // Keepalives instead of an inactivity timeout: remote commands may be
        // silent for a long time.
        let russh_config = Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = SshHandler::new(
            config.host.clone(),
            config.port,
            config.trust_on_first_use,
            config.known_hosts_path.clone(),
        );

        tracing::debug!(host = %config.host, port = config.port, "Connecting");
        let connect = client::connect(
            Arc::new(russh_config),
            (config.host.as_str(), config.port),
            handler,
        );

        let mut handle = tokio::time::timeout(config.connect_timeout, connect)
            .await
            .map_err(|_| Error::ConnectTimeout {
                host: config.host.clone(),
                port: config.port,
                timeout: config.connect_timeout,
            })?
            .map_err(|e| {
                if e.to_string().contains("Connection refused") {
                    Error::Connection(format!(
                        "connection refused to {}:{}",
                        config.host, config.port
                    ))
                } else {
                    Error::Connection(e.to_string())
                }
            })?;

        let authenticated = match Self::authenticate(&mut handle, &config).await {
            Ok(authenticated) => authenticated,
            Err(e) => {
                let _ = handle.disconnect(Disconnect::ByApplication, "", "en").await;
                return Err(e);
            }
        };
        if !authenticated {
            let _ = handle.disconnect(Disconnect::ByApplication, "", "en").await;
            return Err(Error::AuthenticationFailed {
                user: config.user.clone(),
                method: config.credentials.method(),
            });
        }

        tracing::info!(host = %config.host, user = %config.user, "SSH session established");
        Ok(Self { config, handle })
    }

    async fn authenticate(handle: &mut Handle<SshHandler>, config: &SessionConfig) -> Result<bool> {
        match &config.credentials {
            Credentials::Password(password) => {
                let result = handle
                    .authenticate_password(&config.user, password)
                    .await
                    .map_err(Error::Protocol)?;
                Ok(result.success())
            }
            Credentials::PrivateKey(key) => {
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(Error::Protocol)?
                    .flatten();

                let result = handle
                    .authenticate_publickey(
                        &config.user,
                        PrivateKeyWithHashAlg::new(Arc::clone(key), hash_alg),
                    )
                    .await
                    .map_err(Error::Protocol)?;

                Ok(result.success())
            }
        }
    }

    /// Open a session channel for running one command.
    pub async fn open_exec_channel(&self) -> Result<SshChannel> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::Channel(format!("failed to open channel: {}", e)))?;
        Ok(SshChannel(channel))
    }

    /// Start the `sftp` subsystem on a fresh channel.
    pub async fn open_sftp(&self) -> Result<SftpSession> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::Channel(format!("failed to open channel: {}", e)))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| Error::Channel(format!("failed to start sftp subsystem: {}", e)))?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| Error::Channel(format!("sftp handshake failed: {}", e)))
    }

    /// Disconnect the session.
    pub async fn disconnect(self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(Error::Protocol)?;
        Ok(())
    }
}

#[async_trait]
impl RemoteSession for Session {
    type Channel = SshChannel;
    type Files = SftpSession;

    fn host(&self) -> &str {
        &self.config.host
    }

    async fn open_channel(&self) -> Result<SshChannel> {
        self.open_exec_channel().await
    }

    async fn open_files(&self) -> Result<SftpSession> {
        self.open_sftp().await
    }

    async fn disconnect(self) -> Result<()> {
        Session::disconnect(self).await
    }
}

/// A russh session channel driven as an [`ExecChannel`].
pub struct SshChannel(Channel<Msg>);

#[async_trait]
impl ExecChannel for SshChannel {
    async fn request_pty(&mut self, term: &str) -> Result<()> {
        self.0.request_pty(true, term, 80, 24, 0, 0, &[]).await?;
        Ok(())
    }

    async fn request_agent_forwarding(&mut self) -> Result<()> {
        self.0.agent_forward(true).await?;
        Ok(())
    }

    async fn exec(&mut self, command: &str) -> Result<()> {
        self.0
            .exec(true, command)
            .await
            .map_err(|e| Error::Channel(format!("failed to exec command: {}", e)))
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.0.data(data).await?;
        Ok(())
    }

    async fn send_eof(&mut self) -> Result<()> {
        self.0.eof().await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.0.wait().await? {
                ChannelMsg::Data { data } => {
                    return Some(ChannelEvent::Stdout(Bytes::copy_from_slice(&data[..])));
                }
                // Extended data type 1 is stderr
                ChannelMsg::ExtendedData { data, ext: 1 } => {
                    return Some(ChannelEvent::Stderr(Bytes::copy_from_slice(&data[..])));
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    return Some(ChannelEvent::ExitStatus(exit_status));
                }
                ChannelMsg::Eof => return Some(ChannelEvent::Eof),
                ChannelMsg::Close => return Some(ChannelEvent::Closed),
                ChannelMsg::Failure => {
                    tracing::debug!("Remote rejected a channel request");
                }
                _ => {}
            }
        }
    }

    async fn close(self) -> Result<()> {
        self.0.close().await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteFs for SftpSession {
    async fn exists(&mut self, path: &str) -> Result<bool> {
        Ok(self.try_exists(path).await?)
    }

    async fn create_dir(&mut self, path: &str) -> Result<()> {
        SftpSession::create_dir(self, path).await?;
        Ok(())
    }

    async fn put(&mut self, path: &str, source: &mut (dyn AsyncRead + Unpin + Send)) -> Result<u64> {
        let mut file = self.create(path).await?;
        let written = tokio::io::copy(source, &mut file).await?;
        file.shutdown().await?;
        Ok(written)
    }

    async fn close(self) -> Result<()> {
        SftpSession::close(&self).await?;
        Ok(())
    }
}
