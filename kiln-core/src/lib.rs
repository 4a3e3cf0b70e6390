// kiln-core/src/lib.rs
pub mod build;
pub mod check;
pub mod install;
pub mod options;
pub mod process;

pub use check::SmokeOutcome;
pub use install::{fetch_all, install_formula, FetchedArtifacts, InstallOptions, InstallReport};
pub use options::resolve_options;
