// kiln-core/src/check/conflicts.rs
use kiln_common::config::Config;
use kiln_common::error::{KilnError, Result};
use kiln_common::keg::KegRegistry;
use kiln_common::model::formula::Formula;
use tracing::debug;

/// Fails if any package the formula conflicts with has a keg in the Cellar.
pub fn check_conflicts(formula: &Formula, config: &Config) -> Result<()> {
    let registry = KegRegistry::new(config.clone());
    for conflict in &formula.conflicts {
        for name in &conflict.names {
            if let Some(keg) = registry.get_installed_keg(name)? {
                return Err(KilnError::ConflictingPackageInstalled {
                    formula: formula.name.clone(),
                    name: format!("{} {}", keg.name, keg.version_str),
                    reason: conflict.because.clone(),
                });
            }
            debug!("Conflicting package '{}' is not installed", name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const FORMULA: &str = r#"
[formula]
name = "poppler"
version = "0.54.0"
url = "https://example.org/poppler-0.54.0.tar.xz"
sha256 = "10cca9a67cc2e6f4f9024192b1067c444218bf94430891f43dc819d78536ca31"

[[conflict]]
names = ["pdftohtml", "pdf2image", "xpdf"]
because = "poppler, pdftohtml, pdf2image, and xpdf install conflicting executables"
"#;

    #[test]
    fn passes_when_nothing_conflicting_is_installed() {
        let root = tempfile::tempdir().unwrap();
        let config = Config::with_root(root.path().to_path_buf());
        let formula = Formula::from_toml_str(FORMULA).unwrap();
        check_conflicts(&formula, &config).unwrap();
    }

    #[test]
    fn installed_conflict_is_reported_with_reason() {
        let root = tempfile::tempdir().unwrap();
        let config = Config::with_root(root.path().to_path_buf());
        fs::create_dir_all(config.formula_keg_path("xpdf", "4.00")).unwrap();
        let formula = Formula::from_toml_str(FORMULA).unwrap();

        match check_conflicts(&formula, &config).unwrap_err() {
            KilnError::ConflictingPackageInstalled { formula, name, reason } => {
                assert_eq!(formula, "poppler");
                assert_eq!(name, "xpdf 4.00");
                assert!(reason.contains("conflicting executables"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
