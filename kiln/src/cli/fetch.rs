// kiln/src/cli/fetch.rs
use clap::Args;
use kiln_common::config::Config;
use kiln_common::error::Result;
use kiln_common::formulary::Formulary;
use kiln_core::fetch_all;

use super::ohai;

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Formula name or path to a formula file
    formula: String,
}

impl FetchArgs {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let formula = Formulary::new(config.clone()).load_formula(&self.formula)?;
        let fetched = fetch_all(&formula, config).await?;
        let artifacts = std::iter::once(&fetched.source)
            .chain(&fetched.patches)
            .chain(&fetched.resources);
        for artifact in artifacts {
            println!("{}  {}", artifact.sha256, artifact.path.display());
        }
        ohai(&format!("Fetched and verified {}", formula.name));
        Ok(())
    }
}
