// kiln-common/src/model/artifact.rs
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Something to download and verify: the primary source, a patch or a resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ArtifactRef {
    /// Cache file name; unique per formula and artifact.
    pub name: String,
    pub url: String,
    pub sha256: String,
    /// Tried in order after `url` fails to download.
    #[serde(default)]
    pub mirrors: Vec<String>,
}

impl ArtifactRef {
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.url.as_str()).chain(self.mirrors.iter().map(String::as_str))
    }
}

/// A verified artifact sitting in the download cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifact {
    pub name: String,
    pub path: PathBuf,
    pub sha256: String,
}
