//! Per-run temporary directory
//!
//! A [`RunWorkspace`] is a fresh `run-<uuid>` directory under the configured
//! temp root, owned by exactly one run. [`RunWorkspace::cleanup`] removes it
//! and only logs failures; `Drop` removes it too if a run is cancelled
//! before cleanup gets a chance.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

/// Private scratch space for one run
#[derive(Debug)]
pub struct RunWorkspace {
    dir: PathBuf,
    cleaned: bool,
}

impl RunWorkspace {
    /// Create the run directory; its path is always absolute, since ffmpeg
    /// resolves concat list entries against the list's own directory
    pub async fn create(temp_root: &Path) -> std::io::Result<Self> {
        let dir = std::path::absolute(temp_root)?.join(format!("run-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).await?;
        debug!("created run workspace {}", dir.display());
        Ok(Self { dir, cleaned: false })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for an artifact inside the workspace
    #[must_use]
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Remove the workspace; errors are logged, never returned
    pub async fn cleanup(mut self) {
        self.cleaned = true;
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => debug!("removed run workspace {}", self.dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove run workspace {}: {e}", self.dir.display()),
        }
    }
}

impl Drop for RunWorkspace {
    fn drop(&mut self) {
        if !self.cleaned {
            if let Err(e) = std::fs::remove_dir_all(&self.dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to remove run workspace {}: {e}", self.dir.display());
                }
            }
        }
    }
}

/// Move `src` to `dest` atomically where the filesystem allows.
///
/// Falls back to copying into a sibling temp file of `dest` and renaming
/// that when `src` is on another device, so `dest` is never half-written.
pub async fn persist(src: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    if fs::rename(src, dest).await.is_ok() {
        return Ok(());
    }

    let file_name = dest
        .file_name()
        .map_or_else(|| "artifact".to_string(), |n| n.to_string_lossy().to_string());
    let staging = dest.with_file_name(format!(".{file_name}.{}.partial", uuid::Uuid::new_v4()));
    if let Err(e) = fs::copy(src, &staging).await {
        let _ = fs::remove_file(&staging).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&staging, dest).await {
        let _ = fs::remove_file(&staging).await;
        return Err(e);
    }
    let _ = fs::remove_file(src).await;
    Ok(())
}
