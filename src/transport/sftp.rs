// ABOUTME: SFTP transport: puts each artifact through the sftp subsystem of one session.
// ABOUTME: Remote directories are created on demand and remembered for the rest of the run.

use super::{
    Result, RunContext, Transport, TransportKind, Uploader, disconnect, failed,
    interrupted, remote_join, upload_all, upload_outcome,
};
use crate::artifacts::{ArtifactEntry, ArtifactSource};
use crate::config::TargetSpec;
use crate::ssh::{RemoteFs, RemoteSession, SessionSource};
use crate::transport::{Outcome, TransportError};
use async_trait::async_trait;
use std::collections::HashSet;

pub struct SftpTransport<P> {
    provider: P,
    target: TargetSpec,
    artifacts: ArtifactSource,
}

impl<P: SessionSource> SftpTransport<P> {
    pub fn new(provider: P, target: TargetSpec, artifacts: ArtifactSource) -> Self {
        Self {
            provider,
            target,
            artifacts,
        }
    }

    async fn deploy<S: RemoteSession>(&self, session: &S, ctx: &RunContext) -> Outcome {
        let files = match session.open_files().await {
            Ok(files) => files,
            Err(e) => return failed(self.kind(), ctx, e),
        };
        ctx.log.message(&format!(
            "Uploading [{}] file(s) to [{}] over SFTP",
            self.artifacts.len(),
            self.target.raw
        ));

        let mut uploader = SftpUploader::new(files, &self.target.remote_base_path);
        let result = upload_all(&mut uploader, &self.artifacts, ctx).await;
        if let Err(e) = uploader.files.close().await {
            tracing::debug!("Closing sftp session failed: {}", e);
        }

        upload_outcome(self.kind(), ctx, &self.target.raw, result)
    }
}

#[async_trait]
impl<P: SessionSource> Transport for SftpTransport<P> {
    fn kind(&self) -> TransportKind {
        TransportKind::Sftp
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

struct SftpUploader<F> {
    files: F,
    base: String,
    known_dirs: HashSet<String>,
}

impl<F: RemoteFs> SftpUploader<F> {
    fn new(files: F, base: &str) -> Self {
        Self {
            files,
            base: base.to_string(),
            known_dirs: HashSet::new(),
        }
    }

    /// Create every missing directory on the way to `dir`.
    async fn ensure_dir(&mut self, dir: &str) -> Result<()> {
        let mut path = String::new();
        if dir.starts_with('/') {
            path.push('/');
        }
        for segment in dir.split('/').filter(|s| !s.is_empty() && *s != ".") {
            if !path.is_empty() && !path.ends_with('/') {
                path.push('/');
            }
            path.push_str(segment);
            if self.known_dirs.contains(&path) {
                continue;
            }
            if !self.files.exists(&path).await? {
                tracing::debug!(path = %path, "Creating remote directory");
                self.files.create_dir(&path).await?;
            }
            self.known_dirs.insert(path.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl<F: RemoteFs> Uploader for SftpUploader<F> {
    async fn upload(&mut self, entry: &ArtifactEntry) -> Result<()> {
        let dir = remote_join(&self.base, &entry.remote_dirs().join("/"));
        self.ensure_dir(&dir).await?;

        let segments = entry.remote_segments();
        let remote = remote_join(&self.base, &segments.join("/"));
        let mut local = tokio::fs::File::open(entry.local_path())
            .await
            .map_err(|e| TransportError::local_file(entry.local_path(), e))?;

        let written = self.files.put(&remote, &mut local).await?;
        tracing::debug!(remote = %remote, bytes = written, "Uploaded");
        Ok(())
    }
}
