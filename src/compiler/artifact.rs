//! Scoped ownership of one compilation's files.

use crate::core::diagnostic::Diagnostic;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// The artifact of a successful compilation together with its scratch
/// directory. Everything is deleted exactly once: by [`release`](Self::release)
/// or on drop.
#[derive(Debug)]
pub struct ArtifactHandle {
    dir: Option<TempDir>,
    scratch: PathBuf,
    artifact: PathBuf,
    warnings: Vec<Diagnostic>,
}

impl ArtifactHandle {
    pub(crate) fn new(dir: TempDir, artifact: PathBuf, warnings: Vec<Diagnostic>) -> Self {
        let scratch = dir.path().to_path_buf();
        Self { dir: Some(dir), scratch, artifact, warnings }
    }

    /// Path of the compiled module.
    pub fn path(&self) -> &Path {
        &self.artifact
    }

    /// Directory holding the artifact and the compiler's scratch files.
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch
    }

    /// Warnings reported by a compilation that still succeeded.
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    /// Delete the artifact and every scratch file now.
    pub fn release(mut self) -> io::Result<()> {
        match self.dir.take() {
            Some(dir) => {
                log::debug!("removing scratch directory {}", self.scratch.display());
                dir.close()
            }
            None => Ok(()),
        }
    }
}

impl Drop for ArtifactHandle {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            log::debug!("dropping scratch directory {}", self.scratch.display());
            if let Err(err) = dir.close() {
                log::warn!("failed to remove {}: {}", self.scratch.display(), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> ArtifactHandle {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("snippet.dll");
        std::fs::write(&artifact, b"x").unwrap();
        ArtifactHandle::new(dir, artifact, Vec::new())
    }

    #[test]
    fn release_removes_everything() {
        let handle = handle();
        let scratch = handle.scratch_dir().to_path_buf();
        assert!(handle.path().exists());
        handle.release().unwrap();
        assert!(!scratch.exists());
    }

    #[test]
    fn drop_removes_everything() {
        let handle = handle();
        let scratch = handle.scratch_dir().to_path_buf();
        drop(handle);
        assert!(!scratch.exists());
    }
}
