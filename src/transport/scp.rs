// ABOUTME: SCP transport: drives a remote `scp -t` sink over one exec channel.
// ABOUTME: Directories are entered with D/E directives and files sent with C directives.

use super::{
    Result, RunContext, Transport, TransportError, TransportKind, UploadStop, Uploader,
    disconnect, failed, interrupted, shell_quote, upload_all, upload_outcome,
};
use crate::artifacts::{ArtifactEntry, ArtifactSource};
use crate::config::TargetSpec;
use crate::ssh::{ChannelEvent, ExecChannel, RemoteSession, SessionSource};
use crate::transport::Outcome;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::AsyncReadExt;

const FILE_MODE: &str = "0644";
const DIR_MODE: &str = "0755";
const CHUNK_SIZE: usize = 32 * 1024;
/// How long to wait for the remote scp to exit after the last directive.
const EXIT_WAIT: Duration = Duration::from_secs(10);

pub struct ScpTransport<P> {
    provider: P,
    target: TargetSpec,
    artifacts: ArtifactSource,
}

impl<P: SessionSource> ScpTransport<P> {
    pub fn new(provider: P, target: TargetSpec, artifacts: ArtifactSource) -> Self {
        Self {
            provider,
            target,
            artifacts,
        }
    }

    async fn deploy<S: RemoteSession>(&self, session: &S, ctx: &RunContext) -> Outcome {
        let channel = match session.open_channel().await {
            Ok(channel) => channel,
            Err(e) => return failed(self.kind(), ctx, e),
        };
        ctx.log.message(&format!(
            "Copying [{}] file(s) to [{}] over SCP",
            self.artifacts.len(),
            self.target.raw
        ));

        let mut sink = ScpSink::new(channel);
        let result = match sink.start(&sink_command(&self.target.remote_base_path)).await {
            Ok(()) => match upload_all(&mut sink, &self.artifacts, ctx).await {
                Ok(count) => sink.finish().await.map(|()| count).map_err(UploadStop::Failed),
                Err(stop) => Err(stop),
            },
            Err(e) => Err(UploadStop::Failed(e)),
        };
        sink.close().await;

        upload_outcome(self.kind(), ctx, &self.target.raw, result)
    }
}

#[async_trait]
impl<P: SessionSource> Transport for ScpTransport<P> {
    fn kind(&self) -> TransportKind {
        TransportKind::Scp
    }

    async fn run(self: Box<Self>, ctx: &RunContext) -> Outcome {
        let session = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return interrupted(ctx),
            session = self.provider.obtain_session() => session,
        };
        let session = match session {
            Ok(session) => session,
            Err(e) => return failed(self.kind(), ctx, e),
        };

        let outcome = self.deploy(&session, ctx).await;
        disconnect(session).await;
        outcome
    }
}

/// Remote command that creates the base directory and starts the sink.
pub fn sink_command(remote_base_path: &str) -> String {
    if remote_base_path.is_empty() {
        "scp -r -d -t .".to_string()
    } else {
        let base = shell_quote(remote_base_path);
        format!("mkdir -p -- {base} && scp -r -d -t -- {base}")
    }
}

/// Client side of the scp sink protocol on one channel.
pub struct ScpSink<C> {
    channel: C,
    inbox: VecDeque<u8>,
    /// Directories entered below the base, innermost last.
    dirs: Vec<String>,
}

impl<C: ExecChannel> ScpSink<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            inbox: VecDeque::new(),
            dirs: Vec::new(),
        }
    }

    /// Run the sink command and wait for its ready signal.
    pub async fn start(&mut self, command: &str) -> Result<()> {
        tracing::debug!(command, "Starting scp sink");
        self.channel.exec(command).await?;
        self.read_ack().await
    }

    /// Leave every open directory and let the remote scp exit.
    pub async fn finish(&mut self) -> Result<()> {
        while self.dirs.pop().is_some() {
            self.directive("E\n").await?;
        }
        self.channel.send_eof().await?;

        let drain = async {
            loop {
                match self.channel.next_event().await {
                    Some(ChannelEvent::ExitStatus(0)) => return Ok(()),
                    Some(ChannelEvent::ExitStatus(code)) => {
                        return Err(TransportError::ScpRejected(format!(
                            "remote scp exited with code {code}"
                        )));
                    }
                    Some(ChannelEvent::Closed) | None => return Ok(()),
                    Some(_) => {}
                }
            }
        };
        match tokio::time::timeout(EXIT_WAIT, drain).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!("Remote scp did not report an exit status");
                Ok(())
            }
        }
    }

    pub async fn close(self) {
        if let Err(e) = self.channel.close().await {
            tracing::debug!("Closing scp channel failed: {}", e);
        }
    }

    /// Move from the currently open directories to `target`.
    async fn enter(&mut self, target: &[&str]) -> Result<()> {
        let common = self
            .dirs
            .iter()
            .zip(target)
            .take_while(|&(open, wanted)| open == wanted)
            .count();
        while self.dirs.len() > common {
            self.dirs.pop();
            self.directive("E\n").await?;
        }
        for dir in &target[common..] {
            self.directive(&format!("D{DIR_MODE} 0 {dir}\n")).await?;
            self.dirs.push((*dir).to_string());
        }
        Ok(())
    }

    async fn directive(&mut self, line: &str) -> Result<()> {
        self.channel.send(line.as_bytes()).await?;
        self.read_ack().await
    }

    async fn read_ack(&mut self) -> Result<()> {
        match self.read_byte().await? {
            0 => Ok(()),
            code @ (1 | 2) => {
                let message = self.read_line().await?;
                tracing::debug!(code, message = %message, "scp sink refused");
                Err(TransportError::ScpRejected(message))
            }
            other => Err(TransportError::ScpRejected(format!(
                "unexpected acknowledgement byte {other}"
            ))),
        }
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = Vec::new();
        loop {
            match self.read_byte().await? {
                b'\n' => break,
                byte => line.push(byte),
            }
        }
        Ok(String::from_utf8_lossy(&line).trim().to_string())
    }

    async fn read_byte(&mut self) -> Result<u8> {
        loop {
            if let Some(byte) = self.inbox.pop_front() {
                return Ok(byte);
            }
            match self.channel.next_event().await {
                Some(ChannelEvent::Stdout(data)) => self.inbox.extend(data.iter()),
                Some(ChannelEvent::Stderr(data)) => {
                    tracing::debug!("scp: {}", String::from_utf8_lossy(&data).trim_end());
                }
                Some(ChannelEvent::ExitStatus(code)) => {
                    tracing::debug!(code, "Remote scp exited");
                }
                Some(ChannelEvent::Eof) | Some(ChannelEvent::Closed) | None => {
                    return Err(TransportError::ScpRejected(
                        "remote scp closed the connection".to_string(),
                    ));
                }
            }
        }
    }
}

#[async_trait]
impl<C: ExecChannel> Uploader for ScpSink<C> {
    async fn upload(&mut self, entry: &ArtifactEntry) -> Result<()> {
        let name = entry.file_name().ok_or_else(|| TransportError::Upload {
            path: entry.remote_relative_path().to_string(),
            reason: "no file name".to_string(),
        })?;
        let name = name.to_string();

        let file = tokio::fs::File::open(entry.local_path())
            .await
            .map_err(|e| TransportError::local_file(entry.local_path(), e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| TransportError::local_file(entry.local_path(), e))?
            .len();

        self.enter(&entry.remote_dirs()).await?;
        self.directive(&format!("C{FILE_MODE} {size} {name}\n")).await?;

        let mut reader = file.take(size);
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut sent = 0u64;
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| TransportError::local_file(entry.local_path(), e))?;
            if n == 0 {
                break;
            }
            self.channel.send(&buf[..n]).await?;
            sent += n as u64;
        }
        if sent != size {
            return Err(TransportError::Upload {
                path: entry.local_path().display().to_string(),
                reason: format!("file shrank while copying ({sent} of {size} bytes)"),
            });
        }

        self.channel.send(&[0]).await?;
        self.read_ack().await
    }
}
