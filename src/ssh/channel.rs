// ABOUTME: Seams between transports and the SSH session: channels, sessions, session sources.
// ABOUTME: The russh-backed session implements these; tests substitute scripted fakes.

use super::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;

/// Something observed on a command channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Stdout(Bytes),
    Stderr(Bytes),
    ExitStatus(u32),
    Eof,
    Closed,
}

/// One command-execution channel multiplexed over a session.
#[async_trait]
pub trait ExecChannel: Send {
    async fn request_pty(&mut self, term: &str) -> Result<()>;

    async fn request_agent_forwarding(&mut self) -> Result<()>;

    async fn exec(&mut self, command: &str) -> Result<()>;

    /// Write to the remote command's stdin.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    async fn send_eof(&mut self) -> Result<()>;

    /// Next event, or `None` once the channel is gone. Must be cancel-safe.
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    async fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// File operations on the remote side, as the sftp subsystem offers them.
#[async_trait]
pub trait RemoteFs: Send {
    async fn exists(&mut self, path: &str) -> Result<bool>;

    async fn create_dir(&mut self, path: &str) -> Result<()>;

    /// Create or truncate `path` and copy `source` into it; returns bytes written.
    async fn put(&mut self, path: &str, source: &mut (dyn AsyncRead + Unpin + Send)) -> Result<u64>;

    async fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// An authenticated session owned by a single run.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    type Channel: ExecChannel;
    type Files: RemoteFs;

    fn host(&self) -> &str;

    async fn open_channel(&self) -> Result<Self::Channel>;

    async fn open_files(&self) -> Result<Self::Files>;

    async fn disconnect(self) -> Result<()>
    where
        Self: Sized;
}

/// Produces a fresh session per call.
#[async_trait]
pub trait SessionSource: Send + Sync {
    type Session: RemoteSession;

    async fn obtain_session(&self) -> Result<Self::Session>;
}
