// ABOUTME: SMB transport: copies artifacts onto a share through the operating system.
// ABOUTME: Windows opens UNC paths natively; elsewhere shares are expected under a mount root.

use super::{
    Result, RunContext, Transport, TransportError, TransportKind, Uploader, failed, interrupted,
    upload_all, upload_outcome,
};
use crate::artifacts::{ArtifactEntry, ArtifactSource};
use crate::config::unc::UncTarget;
use crate::transport::Outcome;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub struct SmbTransport {
    raw_target: String,
    /// Directory of the share itself; must already exist.
    share_root: PathBuf,
    /// Where artifacts land, at or below `share_root`.
    destination: PathBuf,
    artifacts: ArtifactSource,
}

impl SmbTransport {
    /// Resolve the UNC target to a local path. `mount_root` is required on
    /// platforms without native UNC support.
    pub fn new(
        raw_target: &str,
        mount_root: Option<&Path>,
        artifacts: ArtifactSource,
    ) -> crate::error::Result<Self> {
        let unc = UncTarget::parse(raw_target)?;
        let share_root = share_root(&unc, mount_root)?;
        let destination = unc.path.iter().fold(share_root.clone(), |dir, segment| dir.join(segment));

        Ok(Self {
            raw_target: raw_target.trim().to_string(),
            share_root,
            destination,
            artifacts,
        })
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

#[cfg(windows)]
fn share_root(unc: &UncTarget, _mount_root: Option<&Path>) -> crate::error::Result<PathBuf> {
    Ok(PathBuf::from(format!(r"\\{}\{}", unc.host, unc.share)))
}

#[cfg(not(windows))]
fn share_root(unc: &UncTarget, mount_root: Option<&Path>) -> crate::error::Result<PathBuf> {
    let root = mount_root.ok_or(crate::error::Error::InvalidParameter {
        name: "smb_mount_root",
        reason: "SMB targets need a mount root on this platform".to_string(),
    })?;
    Ok(root.join(&unc.host).join(&unc.share))
}

#[async_trait]
impl Transport for SmbTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Smb
    }

    async fn run(self: Box<Self>, ctx: &RunContext) -> Outcome {
        if ctx.cancel.is_cancelled() {
            return interrupted(ctx);
        }

        match tokio::fs::metadata(&self.share_root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return failed(self.kind(), ctx, self.share_error("share is not a directory"));
            }
            Err(e) => {
                return failed(self.kind(), ctx, self.share_error(&format!("share is not reachable: {e}")));
            }
        }

        ctx.log.message(&format!(
            "Copying [{}] file(s) to [{}]",
            self.artifacts.len(),
            self.raw_target
        ));
        let mut uploader = ShareUploader {
            destination: self.destination.clone(),
        };
        let result = upload_all(&mut uploader, &self.artifacts, ctx).await;
        upload_outcome(self.kind(), ctx, &self.raw_target, result)
    }
}

impl SmbTransport {
    fn share_error(&self, reason: &str) -> TransportError {
        TransportError::Smb {
            target: self.raw_target.clone(),
            reason: reason.to_string(),
        }
    }
}

struct ShareUploader {
    destination: PathBuf,
}

#[async_trait]
impl Uploader for ShareUploader {
    async fn upload(&mut self, entry: &ArtifactEntry) -> Result<()> {
        let target = entry
            .remote_segments()
            .into_iter()
            .fold(self.destination.clone(), |path, segment| path.join(segment));
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = tokio::fs::copy(entry.local_path(), &target)
            .await
            .map_err(|e| TransportError::Upload {
                path: entry.local_path().display().to_string(),
                reason: e.to_string(),
            })?;
        tracing::debug!(target = %target.display(), bytes, "Copied");
        Ok(())
    }
}
