// kiln-core/src/install/receipt.rs
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use kiln_common::error::Result;
use kiln_common::model::formula::Formula;
use kiln_common::model::options::ResolvedConfig;
use tracing::debug;

pub const RECEIPT_FILE: &str = "INSTALL_RECEIPT.json";

/// Records how the keg was produced.
pub fn write_receipt(
    formula: &Formula,
    options: &ResolvedConfig,
    configure_args: &[String],
    install_dir: &Path,
) -> Result<PathBuf> {
    let receipt_path = install_dir.join(RECEIPT_FILE);
    debug!("Writing install receipt to {}", receipt_path.display());
    let mut receipt_file = File::create(&receipt_path)?;

    let receipt = serde_json::json!({
        "name": formula.name,
        "version": formula.version,
        "time": chrono::Utc::now().to_rfc3339(),
        "options": options.enabled().collect::<Vec<_>>(),
        "configure_args": configure_args,
        "source": {
            "url": formula.url,
            "sha256": formula.sha256,
            "patches": formula.patches.iter().map(|p| p.display_name()).collect::<Vec<_>>(),
            "resources": formula.resources.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
        },
        "built_on": {
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        }
    });

    let receipt_json = serde_json::to_string_pretty(&receipt)?;
    receipt_file.write_all(receipt_json.as_bytes())?;
    Ok(receipt_path)
}
