// ABOUTME: Artifact entries to transfer: local file plus remote relative path.
// ABOUTME: The collection arrives fully resolved; order only affects transfer sequencing.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// One file to deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEntry {
    local_path: PathBuf,
    remote_relative_path: String,
}

impl ArtifactEntry {
    pub fn new(local_path: impl Into<PathBuf>, remote_relative_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_relative_path: remote_relative_path.into(),
        }
    }

    /// Parse `LOCAL[=REMOTE]`. Without a remote part the file name is used.
    pub fn parse(raw: &str) -> Result<Self> {
        let (local, remote) = match raw.split_once('=') {
            Some((local, remote)) => (local.trim(), remote.trim().to_string()),
            None => {
                let local = raw.trim();
                let name = Path::new(local)
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                (local, name)
            }
        };

        if local.is_empty() {
            return Err(Error::InvalidParameter {
                name: "artifact",
                reason: format!("missing local path in [{raw}]"),
            });
        }

        let entry = Self::new(local, remote);
        if entry.escapes_base() {
            return Err(Error::InvalidParameter {
                name: "artifact",
                reason: format!("remote path climbs out of the target directory in [{raw}]"),
            });
        }
        if entry.file_name().is_none() {
            return Err(Error::InvalidParameter {
                name: "artifact",
                reason: format!("missing remote file name in [{raw}]"),
            });
        }
        Ok(entry)
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn remote_relative_path(&self) -> &str {
        &self.remote_relative_path
    }

    /// Remote path split into segments; accepts `/` and `\` separators.
    pub fn remote_segments(&self) -> Vec<&str> {
        self.remote_relative_path
            .split(['/', '\\'])
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect()
    }

    /// Whether any segment is `..`. Such an entry would land outside the
    /// target directory.
    pub fn escapes_base(&self) -> bool {
        self.remote_segments().contains(&"..")
    }

    /// Directory segments leading to the file.
    pub fn remote_dirs(&self) -> Vec<&str> {
        let mut segments = self.remote_segments();
        segments.pop();
        segments
    }

    pub fn file_name(&self) -> Option<&str> {
        self.remote_segments().last().copied()
    }
}

/// Ordered artifacts for one run.
#[derive(Debug, Clone, Default)]
pub struct ArtifactSource {
    entries: Vec<ArtifactEntry>,
}

impl ArtifactSource {
    pub fn new(entries: Vec<ArtifactEntry>) -> Self {
        Self { entries }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ArtifactEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<ArtifactEntry> for ArtifactSource {
    fn from_iter<I: IntoIterator<Item = ArtifactEntry>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ArtifactSource {
    type Item = &'a ArtifactEntry;
    type IntoIter = std::slice::Iter<'a, ArtifactEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
