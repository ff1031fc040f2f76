// ABOUTME: Session provider: turns target, auth method, and internal settings into a live session.
// ABOUTME: Resolves passwords, key files, uploaded keys, and ssh-config default keys.

use super::channel::SessionSource;
use super::client::{Credentials, Session, SessionConfig};
use super::error::{Error, Result};
use super::host_config::{HostSettings, SshConfig};
use crate::config::{
    ANONYMOUS_PASSWORD, ANONYMOUS_USER, AUTH_METHOD_ANONYMOUS, AUTH_METHOD_CUSTOM_KEY,
    AUTH_METHOD_DEFAULT_KEY, AUTH_METHOD_UPLOADED_KEY, AUTH_METHOD_USER_PWD, InternalProperties,
    PARAM_AUTH_METHOD, PARAM_KEYFILE, PARAM_PASSWORD, PARAM_UPLOADED_KEY, PARAM_USERNAME,
    RunnerParams, TargetSpec, expand_tilde,
};
use async_trait::async_trait;
use russh::keys::{decode_secret_key, load_secret_key};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Authentication configuration; exactly one variant is active per run.
#[derive(Clone)]
pub enum AuthConfig {
    UsernamePassword {
        username: String,
        password: String,
    },
    Anonymous,
    PrivateKeyFile {
        username: String,
        path: PathBuf,
        passphrase: Option<String>,
    },
    UploadedKey {
        username: String,
        key_id: String,
        passphrase: Option<String>,
    },
    DefaultKeyViaConfig {
        username: Option<String>,
    },
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthConfig::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .finish_non_exhaustive(),
            AuthConfig::Anonymous => f.write_str("Anonymous"),
            AuthConfig::PrivateKeyFile { username, path, .. } => f
                .debug_struct("PrivateKeyFile")
                .field("username", username)
                .field("path", path)
                .finish_non_exhaustive(),
            AuthConfig::UploadedKey { username, key_id, .. } => f
                .debug_struct("UploadedKey")
                .field("username", username)
                .field("key_id", key_id)
                .finish_non_exhaustive(),
            AuthConfig::DefaultKeyViaConfig { username } => f
                .debug_struct("DefaultKeyViaConfig")
                .field("username", username)
                .finish(),
        }
    }
}

impl AuthConfig {
    /// Pick the variant named by the auth-method parameter. A missing
    /// discriminator means username/password.
    pub fn from_params(params: &RunnerParams, transport: &str) -> crate::error::Result<Self> {
        let username = params.get_or_empty(PARAM_USERNAME).to_string();
        let secret = params.raw(PARAM_PASSWORD).unwrap_or_default().to_string();
        let passphrase = Some(secret.clone()).filter(|s| !s.is_empty());

        match params.get(PARAM_AUTH_METHOD).unwrap_or(AUTH_METHOD_USER_PWD) {
            AUTH_METHOD_USER_PWD => Ok(AuthConfig::UsernamePassword {
                username,
                password: secret,
            }),
            AUTH_METHOD_ANONYMOUS => Ok(AuthConfig::Anonymous),
            AUTH_METHOD_CUSTOM_KEY => {
                let path = params
                    .get(PARAM_KEYFILE)
                    .ok_or(crate::error::Error::MissingParameter(PARAM_KEYFILE))?;
                Ok(AuthConfig::PrivateKeyFile {
                    username,
                    path: PathBuf::from(path.trim()),
                    passphrase,
                })
            }
            AUTH_METHOD_UPLOADED_KEY => {
                let key_id = params
                    .get(PARAM_UPLOADED_KEY)
                    .ok_or(crate::error::Error::MissingParameter(PARAM_UPLOADED_KEY))?;
                Ok(AuthConfig::UploadedKey {
                    username,
                    key_id: key_id.trim().to_string(),
                    passphrase,
                })
            }
            AUTH_METHOD_DEFAULT_KEY => Ok(AuthConfig::DefaultKeyViaConfig {
                username: Some(username).filter(|u| !u.is_empty()),
            }),
            other => Err(crate::error::Error::UnknownAuthMethod {
                transport: transport.to_string(),
                method: other.to_string(),
            }),
        }
    }
}

/// Source of uploaded private keys, looked up by opaque id.
pub trait KeyManager: Send + Sync {
    /// PEM/OpenSSH text of the key, if known.
    fn private_key(&self, key_id: &str) -> Option<String>;
}

/// Keys stored as one file per id in a directory.
#[derive(Debug, Clone)]
pub struct DirectoryKeyManager {
    dir: PathBuf,
}

impl DirectoryKeyManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl KeyManager for DirectoryKeyManager {
    fn private_key(&self, key_id: &str) -> Option<String> {
        if key_id.is_empty() || key_id.contains(['/', '\\']) || key_id.starts_with('.') {
            return None;
        }
        std::fs::read_to_string(self.dir.join(key_id)).ok()
    }
}

impl KeyManager for HashMap<String, String> {
    fn private_key(&self, key_id: &str) -> Option<String> {
        self.get(key_id).cloned()
    }
}

/// Builds one authenticated session per call for a fixed target and auth method.
pub struct SessionProvider {
    target: TargetSpec,
    auth: AuthConfig,
    internal: InternalProperties,
    working_dir: PathBuf,
    key_manager: Arc<dyn KeyManager>,
}

impl std::fmt::Debug for SessionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionProvider")
            .field("target", &self.target)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl SessionProvider {
    pub fn new(
        target: TargetSpec,
        auth: AuthConfig,
        internal: InternalProperties,
        working_dir: impl Into<PathBuf>,
        key_manager: Arc<dyn KeyManager>,
    ) -> Self {
        Self {
            target,
            auth,
            internal,
            working_dir: working_dir.into(),
            key_manager,
        }
    }

    /// Resolve everything needed to connect, without touching the network.
    pub fn session_config(&self) -> Result<SessionConfig> {
        let default_port = self.target.port_or(22);
        let (host, port, user, credentials) = match &self.auth {
            AuthConfig::UsernamePassword { username, password } => (
                self.target.host.clone(),
                default_port,
                non_empty_or_local_user(username),
                Credentials::Password(password.clone()),
            ),
            AuthConfig::Anonymous => (
                self.target.host.clone(),
                default_port,
                ANONYMOUS_USER.to_string(),
                Credentials::Password(ANONYMOUS_PASSWORD.to_string()),
            ),
            AuthConfig::PrivateKeyFile {
                username,
                path,
                passphrase,
            } => {
                let path = self.resolve_key_path(path);
                let key = load_secret_key(&path, passphrase.as_deref()).map_err(|e| {
                    Error::KeyLoadFailed {
                        path: path.clone(),
                        reason: e.to_string(),
                    }
                })?;
                (
                    self.target.host.clone(),
                    default_port,
                    non_empty_or_local_user(username),
                    Credentials::PrivateKey(Arc::new(key)),
                )
            }
            AuthConfig::UploadedKey {
                username,
                key_id,
                passphrase,
            } => {
                let material = self
                    .key_manager
                    .private_key(key_id)
                    .ok_or_else(|| Error::UnknownKey(key_id.clone()))?;
                let key = decode_secret_key(&material, passphrase.as_deref())?;
                (
                    self.target.host.clone(),
                    default_port,
                    non_empty_or_local_user(username),
                    Credentials::PrivateKey(Arc::new(key)),
                )
            }
            AuthConfig::DefaultKeyViaConfig { username } => {
                let settings = self.host_settings()?;
                let key = self.first_usable_key(&settings)?;
                let host = settings
                    .hostname
                    .clone()
                    .unwrap_or_else(|| self.target.host.clone());
                let port = self.target.port.or(settings.port).unwrap_or(22);
                let user = username
                    .clone()
                    .or_else(|| settings.user.clone())
                    .unwrap_or_else(local_user);
                (host, port, user, Credentials::PrivateKey(Arc::new(key)))
            }
        };

        let mut config = SessionConfig::new(host, user, credentials)
            .port(port)
            .trust_on_first_use(!self.internal.strict_host_key_checking)
            .connect_timeout(self.internal.connect_timeout);
        if let Some(path) = &self.internal.known_hosts_path {
            config = config.known_hosts_path(path);
        }
        Ok(config)
    }

    /// Open a connected, authenticated session. Failures are returned as-is;
    /// retrying is up to the caller.
    pub async fn obtain_session(&self) -> Result<Session> {
        let config = self.session_config()?;
        Session::connect(config).await
    }

    fn resolve_key_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }

    fn host_settings(&self) -> Result<HostSettings> {
        match self.internal.ssh_config_path() {
            Some(path) if path.is_file() => {
                tracing::debug!(path = %path.display(), "Reading ssh config");
                Ok(SshConfig::load(&path)?.resolve(&self.target.host))
            }
            Some(path) => {
                tracing::debug!(path = %path.display(), "No ssh config, using default key");
                Ok(HostSettings::default())
            }
            None => Ok(HostSettings::default()),
        }
    }

    /// Identity files from the config in order, then the configured default key.
    fn first_usable_key(&self, settings: &HostSettings) -> Result<russh::keys::PrivateKey> {
        let mut candidates: Vec<PathBuf> = settings
            .identity_files
            .iter()
            .map(|file| self.resolve_key_path(&expand_tilde(file)))
            .collect();
        if let Some(fallback) = self.internal.default_key_path()
            && !candidates.contains(&fallback)
        {
            candidates.push(fallback);
        }

        let mut last_failure = None;
        for path in &candidates {
            if !path.is_file() {
                tracing::debug!(path = %path.display(), "Identity file not found");
                continue;
            }
            match load_secret_key(path, None) {
                Ok(key) => {
                    tracing::debug!(path = %path.display(), "Using identity file");
                    return Ok(key);
                }
                Err(e) => {
                    tracing::debug!(path = %path.display(), "Cannot load identity file: {}", e);
                    last_failure = Some(Error::KeyLoadFailed {
                        path: path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Err(last_failure.unwrap_or_else(|| Error::KeyLoadFailed {
            path: candidates.last().cloned().unwrap_or_default(),
            reason: "no identity file found".to_string(),
        }))
    }
}

#[async_trait]
impl SessionSource for SessionProvider {
    type Session = Session;

    async fn obtain_session(&self) -> Result<Session> {
        SessionProvider::obtain_session(self).await
    }
}

fn local_user() -> String {
    std::env::var("USER").unwrap_or_else(|_| "root".to_string())
}

fn non_empty_or_local_user(username: &str) -> String {
    if username.trim().is_empty() {
        local_user()
    } else {
        username.trim().to_string()
    }
}
