// ABOUTME: SSH client module: sessions, channels, and the session provider.
// ABOUTME: Supports password, key file, uploaded key, and ssh-config default key authentication.

mod agent;
mod channel;
mod client;
mod error;
pub mod host_config;
mod provider;

pub use channel::{ChannelEvent, ExecChannel, RemoteFs, RemoteSession, SessionSource};
pub use client::{Credentials, Session, SessionConfig, SshChannel};
pub use error::{Error, Result};
pub use host_config::{HostSettings, SshConfig};
pub use provider::{AuthConfig, DirectoryKeyManager, KeyManager, SessionProvider};
