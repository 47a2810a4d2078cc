//! Ephemeral per-call workspace directories.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use glob::Pattern;
use rcom_protocol::CallId;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{RcomError, Result};

/// A directory named after one call's id.
///
/// The workspace is owned by exactly one call; nothing else reads or writes
/// it while the call is in flight. Calls end with [`Workspace::remove`];
/// dropping a workspace that was never removed deletes it synchronously.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    removed: bool,
}

impl Workspace {
    /// Create `root/<call_id>`. The root is created if missing; the call
    /// directory itself must not exist yet.
    pub async fn create(root: &Path, call_id: CallId) -> Result<Self> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| RcomError::workspace("creating scratch root", e))?;
        let path = root.join(call_id.to_string());
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| RcomError::workspace("creating workspace", e))?;
        debug!(path = %path.display(), "workspace created");
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write every input file under its own name.
    ///
    /// Names must already be validated as plain filenames.
    pub async fn stage(
        &self,
        files: &BTreeMap<String, Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for (name, data) in files {
            if cancel.is_cancelled() {
                return Err(RcomError::Cancelled);
            }
            tokio::fs::write(self.path.join(name), data)
                .await
                .map_err(|e| RcomError::workspace(format!("staging input file {name:?}"), e))?;
        }
        Ok(())
    }

    /// Read every top-level regular file whose name matches one of
    /// `patterns`. Subdirectories and symbolic links are skipped.
    pub async fn collect(
        &self,
        patterns: &[Pattern],
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, Vec<u8>>> {
        let mut files = BTreeMap::new();
        if patterns.is_empty() {
            return Ok(files);
        }

        let mut entries = tokio::fs::read_dir(&self.path)
            .await
            .map_err(|e| RcomError::workspace("listing workspace", e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RcomError::workspace("listing workspace", e))?
        {
            if cancel.is_cancelled() {
                return Err(RcomError::Cancelled);
            }
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| RcomError::workspace("inspecting workspace entry", e))?;
            if !file_type.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !patterns.iter().any(|pattern| pattern.matches(&name)) {
                continue;
            }
            let data = tokio::fs::read(entry.path())
                .await
                .map_err(|e| RcomError::workspace(format!("reading result file {name:?}"), e))?;
            files.insert(name, data);
        }
        Ok(files)
    }

    /// Delete the directory and everything in it. Failures are logged.
    pub async fn remove(mut self) {
        self.removed = true;
        log_removal(&self.path, tokio::fs::remove_dir_all(&self.path).await);
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.removed {
            log_removal(&self.path, std::fs::remove_dir_all(&self.path));
        }
    }
}

fn log_removal(path: &Path, removed: io::Result<()>) {
    match removed {
        Ok(()) => debug!(path = %path.display(), "workspace removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => error!(path = %path.display(), error = %e, "failed to remove workspace"),
    }
}
