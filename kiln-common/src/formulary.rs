// kiln-common/src/formulary.rs
use std::path::{Path, PathBuf};

use tracing::debug;

use super::config::Config;
use super::error::{KilnError, Result};
use super::model::formula::Formula;

/// Finds and loads formula files.
pub struct Formulary {
    config: Config,
}

impl Formulary {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Accepts a formula name (looked up in the formula directories) or a
    /// path to a `.toml` file.
    pub fn locate(&self, name_or_path: &str) -> Result<PathBuf> {
        if name_or_path.ends_with(".toml") || name_or_path.contains('/') {
            let path = Path::new(name_or_path);
            return if path.is_file() {
                Ok(path.to_path_buf())
            } else {
                Err(KilnError::NotFound(format!(
                    "Formula file {} does not exist",
                    path.display()
                )))
            };
        }
        self.config.find_formula_file(name_or_path).ok_or_else(|| {
            let searched: Vec<String> = self
                .config
                .formula_dirs
                .iter()
                .map(|d| d.display().to_string())
                .collect();
            KilnError::NotFound(format!(
                "Formula '{}' not found (searched {})",
                name_or_path,
                searched.join(", ")
            ))
        })
    }

    pub fn load_formula(&self, name_or_path: &str) -> Result<Formula> {
        let path = self.locate(name_or_path)?;
        let formula = Formula::load(&path)?;
        debug!(
            "Successfully loaded formula '{}' version {}",
            formula.name,
            formula.version_str_full()
        );
        Ok(formula)
    }
}
