// kiln-common/src/model/mod.rs
pub mod artifact;
pub mod formula;
pub mod options;

pub use artifact::{ArtifactRef, LocalArtifact};
pub use formula::Formula;
pub use options::ResolvedConfig;
