// kiln-common/src/lib.rs
pub mod cache;
pub mod config;
pub mod dependency;
pub mod error;
pub mod formulary;
pub mod keg;
pub mod model;

// Re-export key types
pub use cache::Cache;
pub use config::Config;
pub use error::{KilnError, Result};
pub use model::{ArtifactRef, Formula, LocalArtifact, ResolvedConfig};
