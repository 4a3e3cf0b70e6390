// kiln-core/src/build/mod.rs
// Turning verified artifacts into an installed prefix: extraction, patching,
// environment and flag assembly, and the configure/build/install steps.

use std::path::PathBuf;

use kiln_common::config::Config;
use kiln_common::model::formula::Formula;

pub mod env;
pub mod extract;
pub mod flags;
pub mod patch;
pub mod resource;
pub mod steps;
pub mod template;

pub use env::BuildEnvironment;
pub use extract::{extract_source, SourceTree};
pub use flags::assemble_flags;
pub use patch::{apply_patches, PatchFile, PatchedSource};
pub use resource::{stage_and_install_resources, StagedResource};
pub use steps::{regenerate_build_scripts, run_build};
pub use template::TemplateContext;

pub fn get_formula_cellar_path(formula: &Formula, config: &Config) -> PathBuf {
    config.formula_keg_path(formula.name(), formula.version_str_full())
}
