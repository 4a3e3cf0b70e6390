// kiln/src/cli/install.rs
use clap::Args;
use colored::Colorize;
use kiln_common::config::Config;
use kiln_common::error::Result;
use kiln_common::formulary::Formulary;
use kiln_core::{install_formula, InstallOptions, SmokeOutcome};
use tracing::instrument;

use super::ohai;

#[derive(Debug, Args)]
pub struct InstallArgs {
    /// Reinstall even if this version already has a keg
    #[arg(long)]
    force: bool,

    /// Formula name or path to a formula file
    formula: String,

    /// Build options, e.g. --with-qt or --without-docs
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "OPTIONS")]
    options: Vec<String>,
}

impl InstallArgs {
    #[instrument(skip(self, config), fields(formula = %self.formula, options = ?self.options))]
    pub async fn run(&self, config: &Config) -> Result<()> {
        let formula = Formulary::new(config.clone()).load_formula(&self.formula)?;
        let install_options = InstallOptions { force: self.force };
        let report = install_formula(&formula, &self.options, &install_options, config).await?;

        for name in &report.absent_optional {
            println!(
                "{} optional dependency '{}' was requested but is not installed; built without it",
                "Warning:".yellow().bold(),
                name
            );
        }
        match &report.smoke {
            SmokeOutcome::Passed => ohai(&format!("{} test passed", report.name)),
            SmokeOutcome::Skipped => {}
            SmokeOutcome::Failed(reason) => println!(
                "{} {} installed, but its test failed: {}",
                "Warning:".yellow().bold(),
                report.name,
                reason
            ),
        }
        ohai(&format!(
            "{} {} ({}) -> {}",
            report.name,
            report.version,
            report.options,
            report.keg_path.display()
        ));
        Ok(())
    }
}
