// ABOUTME: FTP transport over suppaftp, outside the SSH session model.
// ABOUTME: The blocking client runs on the blocking pool, one operation per artifact.

use super::{
    Result, RunContext, Transport, TransportError, TransportKind, Uploader, failed, interrupted,
    upload_all, upload_outcome,
};
use crate::artifacts::{ArtifactEntry, ArtifactSource};
use crate::config::{FTP_MODE_ACTIVE, FTP_MODE_PASSIVE, FTP_TRANSFER_ASCII, FTP_TRANSFER_BINARY, TargetSpec};
use crate::transport::Outcome;
use async_trait::async_trait;
use std::io::Read;
use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::time::Duration;
use suppaftp::types::{FileType, FormatControl};
use suppaftp::{FtpStream, Mode};

pub const DEFAULT_FTP_PORT: u16 = 21;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FtpMode {
    Active,
    #[default]
    Passive,
}

impl FtpMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            FTP_MODE_ACTIVE => Some(FtpMode::Active),
            FTP_MODE_PASSIVE => Some(FtpMode::Passive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FtpTransferType {
    #[default]
    Binary,
    Ascii,
}

impl FtpTransferType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            FTP_TRANSFER_BINARY => Some(FtpTransferType::Binary),
            FTP_TRANSFER_ASCII => Some(FtpTransferType::Ascii),
            _ => None,
        }
    }
}

/// Everything needed to log in and find the upload directory.
#[derive(Clone)]
pub struct FtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub remote_base_path: String,
    pub mode: FtpMode,
    pub transfer_type: FtpTransferType,
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for FtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("remote_base_path", &self.remote_base_path)
            .field("mode", &self.mode)
            .field("transfer_type", &self.transfer_type)
            .finish_non_exhaustive()
    }
}

impl FtpSettings {
    pub fn new(target: &TargetSpec, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: target.host.clone(),
            port: target.port_or(DEFAULT_FTP_PORT),
            username: username.into(),
            password: password.into(),
            remote_base_path: target.remote_base_path.clone(),
            mode: FtpMode::default(),
            transfer_type: FtpTransferType::default(),
            connect_timeout: Duration::from_secs(3 * 60),
        }
    }

    pub fn mode(mut self, mode: FtpMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn transfer_type(mut self, transfer_type: FtpTransferType) -> Self {
        self.transfer_type = transfer_type;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// The blocking FTP operations a deployment needs.
pub trait FtpClient: Send + 'static {
    /// Directory the login landed in.
    fn current_dir(&mut self) -> Result<String>;

    fn change_dir(&mut self, path: &str) -> Result<()>;

    fn make_dir(&mut self, name: &str) -> Result<()>;

    /// Store `reader` as `name` in the current directory.
    fn put(&mut self, name: &str, reader: &mut dyn Read) -> Result<u64>;

    fn quit(&mut self) -> Result<()>;
}

/// Opens logged-in FTP clients.
pub trait FtpConnector: Clone + Send + Sync + 'static {
    type Client: FtpClient;

    fn connect(&self, settings: &FtpSettings) -> Result<Self::Client>;
}

/// Plain-text FTP through suppaftp.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeFtp;

impl FtpConnector for NativeFtp {
    type Client = FtpStream;

    fn connect(&self, settings: &FtpSettings) -> Result<FtpStream> {
        let addr = (settings.host.as_str(), settings.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("cannot resolve {}", settings.host),
                )
            })?;

        tracing::debug!(host = %settings.host, port = settings.port, "Connecting to FTP server");
        let mut ftp = FtpStream::connect_timeout(addr, settings.connect_timeout)?;
        if let Err(e) = ftp.login(&settings.username, &settings.password) {
            let _ = ftp.quit();
            return Err(e.into());
        }

        ftp.set_mode(match settings.mode {
            FtpMode::Active => Mode::Active,
            FtpMode::Passive => Mode::Passive,
        });
        ftp.transfer_type(match settings.transfer_type {
            FtpTransferType::Binary => FileType::Binary,
            FtpTransferType::Ascii => FileType::Ascii(FormatControl::Default),
        })?;

        tracing::info!(host = %settings.host, user = %settings.username, "FTP session established");
        Ok(ftp)
    }
}

impl FtpClient for FtpStream {
    fn current_dir(&mut self) -> Result<String> {
        Ok(self.pwd()?)
    }

    fn change_dir(&mut self, path: &str) -> Result<()> {
        Ok(self.cwd(path)?)
    }

    fn make_dir(&mut self, name: &str) -> Result<()> {
        Ok(self.mkdir(name)?)
    }

    fn put(&mut self, name: &str, mut reader: &mut dyn Read) -> Result<u64> {
        Ok(self.put_file(name, &mut reader)?)
    }

    fn quit(&mut self) -> Result<()> {
        Ok(FtpStream::quit(self)?)
    }
}

pub struct FtpTransport<C = NativeFtp> {
    connector: C,
    settings: FtpSettings,
    artifacts: ArtifactSource,
}

impl FtpTransport<NativeFtp> {
    pub fn new(settings: FtpSettings, artifacts: ArtifactSource) -> Self {
        Self::with_connector(NativeFtp, settings, artifacts)
    }
}

impl<C: FtpConnector> FtpTransport<C> {
    pub fn with_connector(connector: C, settings: FtpSettings, artifacts: ArtifactSource) -> Self {
        Self {
            connector,
            settings,
            artifacts,
        }
    }
}

#[async_trait]
impl<C: FtpConnector> Transport for FtpTransport<C> {
    fn kind(&self) -> TransportKind {
        TransportKind::Ftp
    }

    async fn run(self: Box<Self>, ctx: &RunContext) -> Outcome {
        let connector = self.connector.clone();
        let settings = self.settings.clone();
        let connect = tokio::task::spawn_blocking(move || {
            let mut client = connector.connect(&settings)?;
            let home = client.current_dir()?;
            Ok::<_, TransportError>((client, home))
        });

        let connected = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return interrupted(ctx),
            joined = connect => joined,
        };
        let (client, home) = match connected {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => return failed(self.kind(), ctx, e),
            Err(e) => return failed(self.kind(), ctx, e),
        };

        let target = format!("{}:{}", self.settings.host, self.settings.port);
        ctx.log.message(&format!(
            "Uploading [{}] file(s) to [{}] over FTP",
            self.artifacts.len(),
            target
        ));

        let mut uploader = FtpUploader::new(client, &home, &self.settings.remote_base_path);
        let result = upload_all(&mut uploader, &self.artifacts, ctx).await;
        uploader.quit().await;

        upload_outcome(self.kind(), ctx, &target, result)
    }
}

struct FtpUploader<C> {
    /// Out while an operation runs on the blocking pool.
    client: Option<C>,
    root: String,
    base: Vec<String>,
    /// Directory segments below `root` the client is currently in.
    current: Option<Vec<String>>,
}

impl<C: FtpClient> FtpUploader<C> {
    fn new(client: C, home: &str, remote_base_path: &str) -> Self {
        let root = if remote_base_path.starts_with('/') {
            "/".to_string()
        } else {
            home.to_string()
        };
        Self {
            client: Some(client),
            root,
            base: split_dirs(remote_base_path),
            current: None,
        }
    }

    async fn quit(mut self) {
        let Some(mut client) = self.client.take() else {
            return;
        };
        let quit = tokio::task::spawn_blocking(move || client.quit()).await;
        match quit {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("FTP quit failed: {}", e),
            Err(e) => tracing::debug!("FTP quit task failed: {}", e),
        }
    }
}

#[async_trait]
impl<C: FtpClient> Uploader for FtpUploader<C> {
    async fn upload(&mut self, entry: &ArtifactEntry) -> Result<()> {
        let mut client = self.client.take().ok_or_else(|| TransportError::Upload {
            path: entry.remote_relative_path().to_string(),
            reason: "FTP connection is no longer available".to_string(),
        })?;
        let name = entry
            .file_name()
            .ok_or_else(|| TransportError::Upload {
                path: entry.remote_relative_path().to_string(),
                reason: "no file name".to_string(),
            })?
            .to_string();

        let mut dirs = self.base.clone();
        dirs.extend(entry.remote_dirs().into_iter().map(str::to_string));
        let navigate = self.current.take().as_ref() != Some(&dirs);
        let root = self.root.clone();
        let local = entry.local_path().to_path_buf();
        let wanted = dirs.clone();

        let (client, result) = tokio::task::spawn_blocking(move || {
            let result = put_one(&mut client, navigate.then_some((&root, &wanted[..])), &name, local);
            (client, result)
        })
        .await
        .map_err(|e| TransportError::Io(std::io::Error::other(e)))?;

        self.client = Some(client);
        result?;
        self.current = Some(dirs);
        Ok(())
    }
}

fn put_one<C: FtpClient>(
    client: &mut C,
    navigate: Option<(&String, &[String])>,
    name: &str,
    local: PathBuf,
) -> Result<()> {
    if let Some((root, dirs)) = navigate {
        client.change_dir(root)?;
        for dir in dirs {
            if client.change_dir(dir).is_err() {
                tracing::debug!(dir = %dir, "Creating remote directory");
                client.make_dir(dir)?;
                client.change_dir(dir)?;
            }
        }
    }

    let mut file = std::fs::File::open(&local).map_err(|e| TransportError::local_file(&local, e))?;
    let written = client.put(name, &mut file)?;
    tracing::debug!(name, bytes = written, "Stored");
    Ok(())
}

fn split_dirs(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .map(str::to_string)
        .collect()
}
