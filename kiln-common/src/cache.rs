// kiln-common/src/cache.rs
// Download cache: verified artifacts live at `<cache_dir>/<artifact name>`.
// Partially downloaded or unverified data never sits under a final name.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::Result;
use crate::Config;

pub struct Cache {
    cache_dir: PathBuf,
}

impl Cache {
    /// Create a new Cache using the config's cache_dir
    pub fn new(config: &Config) -> Result<Self> {
        let cache_dir = config.cache_dir();
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)?;
        }
        Ok(Self { cache_dir })
    }

    pub fn get_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(name)
    }

    /// Cached file for `name`, if one exists. Callers still verify it.
    pub fn lookup(&self, name: &str) -> Option<PathBuf> {
        let path = self.artifact_path(name);
        path.is_file().then_some(path)
    }

    pub fn clear_file(&self, name: &str) -> Result<()> {
        let path = self.artifact_path(name);
        if path.exists() {
            debug!("Removing cached file {}", path.display());
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}
