// kiln-core/src/check/smoke.rs
use std::path::Path;

use kiln_common::config::Config;
use kiln_common::error::{KilnError, Result};
use kiln_common::model::formula::Formula;
use tracing::{debug, info};

use crate::build::template::TemplateContext;
use crate::process::run_command_in_dir;

/// Result of running a formula's test commands against its keg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmokeOutcome {
    Passed,
    /// The formula declares no test commands.
    Skipped,
    Failed(String),
}

impl SmokeOutcome {
    pub fn from_result(result: Result<()>, had_commands: bool) -> Self {
        match result {
            Ok(()) if had_commands => SmokeOutcome::Passed,
            Ok(()) => SmokeOutcome::Skipped,
            Err(e) => SmokeOutcome::Failed(e.to_string()),
        }
    }
}

/// Runs each test command, placeholders expanded against `keg_path`, in a
/// scratch directory. Any failure to run or non-zero exit is
/// `SmokeTestFailed`; nothing installed is touched.
pub async fn run_smoke_test(formula: &Formula, keg_path: &Path, config: &Config) -> Result<()> {
    if formula.test.commands.is_empty() {
        debug!("{} declares no test commands", formula.name);
        return Ok(());
    }
    let scratch = tempfile::Builder::new()
        .prefix(&format!("kiln-test-{}-", formula.name))
        .tempdir()
        .map_err(|e| KilnError::SmokeTestFailed(format!("cannot create scratch dir: {e}")))?;
    let ctx = TemplateContext::new(keg_path, config);

    for command in &formula.test.commands {
        let argv = ctx.expand_all(command);
        info!("==> Testing: {}", argv.join(" "));
        run_command_in_dir(&argv, scratch.path(), None, "test")
            .await
            .map_err(|e| match e {
                KilnError::BuildStepFailed { code, .. } => KilnError::SmokeTestFailed(format!(
                    "'{}' failed with {}",
                    argv.join(" "),
                    kiln_common::error::describe_exit(&code)
                )),
                other => KilnError::SmokeTestFailed(format!("'{}': {}", argv.join(" "), other)),
            })?;
    }
    Ok(())
}
