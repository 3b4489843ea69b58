use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const PREFIX: &str = "scene2image_";

/// Working directory exclusively owned by one run. Removed on drop unless kept.
#[derive(Debug)]
pub struct WorkDir {
    dir: TempDir,
}

impl WorkDir {
    pub fn create_in(parent: &Path) -> Result<Self> {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
        let dir = tempfile::Builder::new()
            .prefix(PREFIX)
            .tempdir_in(parent)
            .with_context(|| format!("Failed to create work dir in {}", parent.display()))?;
        log::debug!("Created work dir {}", dir.path().display());
        Ok(Self { dir })
    }

    /// Work dir under the system temp folder.
    pub fn ephemeral() -> Result<Self> {
        Self::create_in(&std::env::temp_dir())
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Detaches the directory from cleanup and returns its path.
    pub fn keep(self) -> PathBuf {
        self.dir.keep()
    }

    pub fn discard(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .with_context(|| format!("Failed to remove {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_and_discard() -> Result<()> {
        let parent = tempfile::tempdir()?;

        let kept = WorkDir::create_in(parent.path())?;
        std::fs::write(kept.path().join("a.png"), b"x")?;
        let kept_path = kept.keep();
        assert!(kept_path.join("a.png").exists());

        let discarded = WorkDir::create_in(parent.path())?;
        let discarded_path = discarded.path().to_path_buf();
        assert!(discarded_path.starts_with(parent.path()));
        discarded.discard()?;
        assert!(!discarded_path.exists());
        Ok(())
    }
}
