// kiln-core/src/install/link.rs
use std::fs;
use std::io;
#[cfg(unix)]
use std::os::unix::fs as unix_fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_common::config::Config;
use kiln_common::error::{KilnError, Result};
use tracing::debug;

/// Points `<root>/opt/<name>` at the keg, replacing whatever was there.
#[cfg(unix)]
pub fn link_opt(name: &str, keg_path: &Path, config: &Config) -> Result<PathBuf> {
    let opt_link_path = config.formula_opt_path(name);
    fs::create_dir_all(config.opt_dir())?;
    remove_existing_link_target(&opt_link_path)?;
    unix_fs::symlink(keg_path, &opt_link_path).map_err(|e| {
        KilnError::Io(Arc::new(io::Error::new(
            e.kind(),
            format!("Failed to create opt symlink for {name}: {e}"),
        )))
    })?;
    debug!(
        "Linked opt path: {} -> {}",
        opt_link_path.display(),
        keg_path.display()
    );
    Ok(opt_link_path)
}

fn remove_existing_link_target(path: &Path) -> Result<()> {
    match path.symlink_metadata() {
        Ok(metadata) => {
            debug!("Removing existing item at link target: {}", path.display());
            let file_type = metadata.file_type();
            let remove_result = if file_type.is_dir() && !file_type.is_symlink() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };
            remove_result.map_err(|e| KilnError::Io(Arc::new(e)))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(KilnError::Io(Arc::new(e))),
    }
}
