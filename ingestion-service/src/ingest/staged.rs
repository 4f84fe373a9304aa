use std::path::{Path, PathBuf};

/// A file handed to the ingestion routines, with its deletion policy.
#[derive(Debug)]
pub struct StagedUpload {
    path: PathBuf,
    remove_when_done: bool,
}

impl StagedUpload {
    /// A temp file written by the upload intake. Deleted once ingestion finishes.
    pub fn temporary<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            remove_when_done: true,
        }
    }

    /// A caller-owned file, e.g. a backfill input. Never deleted.
    pub fn retained<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            remove_when_done: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort removal; failures are logged only.
    pub async fn cleanup(self) {
        if !self.remove_when_done {
            return;
        }
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => tracing::info!(path = %self.path.display(), "temp file removed"),
            Err(e) => tracing::error!(error = %e, path = %self.path.display(), "failed to remove temp file"),
        }
    }
}
