// kiln-common/src/keg.rs
use std::fs;
use std::path::PathBuf;

use tracing::{debug, warn};

use super::config::Config;
use super::error::{KilnError, Result};

/// Represents information about an installed package (Keg).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledKeg {
    pub name: String,
    pub version_str: String,
    pub path: PathBuf,
}

/// Manages querying installed packages in the Cellar.
#[derive(Debug)]
pub struct KegRegistry {
    config: Config,
}

impl KegRegistry {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn is_installed(&self, name: &str) -> Result<bool> {
        Ok(self.get_installed_keg(name)?.is_some())
    }

    /// The lexicographically greatest version directory under
    /// `Cellar/<name>`, if any.
    pub fn get_installed_keg(&self, name: &str) -> Result<Option<InstalledKeg>> {
        let formula_dir = self.config.formula_cellar_dir(name);
        if !formula_dir.is_dir() {
            debug!("[KEG_REGISTRY:{}] no Cellar directory at {}", name, formula_dir.display());
            return Ok(None);
        }

        let entries = fs::read_dir(&formula_dir).map_err(|e| {
            KilnError::IoError(format!("Failed to read {}: {}", formula_dir.display(), e))
        })?;
        let mut latest_keg: Option<InstalledKeg> = None;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(
                        "[KEG_REGISTRY:{}] error reading entry in {}: {}. Skipping.",
                        name,
                        formula_dir.display(),
                        e
                    );
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(version_str) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let newer = latest_keg
                .as_ref()
                .is_none_or(|current| version_str > current.version_str.as_str());
            if newer {
                latest_keg = Some(InstalledKeg {
                    name: name.to_string(),
                    version_str: version_str.to_string(),
                    path: path.clone(),
                });
            }
        }

        if let Some(keg) = &latest_keg {
            debug!("[KEG_REGISTRY:{}] latest keg: {}", name, keg.path.display());
        }
        Ok(latest_keg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_latest_version_directory() {
        let root = tempfile::tempdir().unwrap();
        let config = Config::with_root(root.path().to_path_buf());
        let registry = KegRegistry::new(config.clone());
        assert!(!registry.is_installed("poppler").unwrap());

        fs::create_dir_all(config.formula_keg_path("poppler", "0.53.0")).unwrap();
        fs::create_dir_all(config.formula_keg_path("poppler", "0.54.0-texworks")).unwrap();
        fs::write(config.formula_cellar_dir("poppler").join("stray"), "").unwrap();

        let keg = registry.get_installed_keg("poppler").unwrap().unwrap();
        assert_eq!(keg.version_str, "0.54.0-texworks");
        assert_eq!(keg.path, config.formula_keg_path("poppler", "0.54.0-texworks"));
        assert!(registry.is_installed("poppler").unwrap());
    }
}
