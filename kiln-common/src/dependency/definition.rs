// kiln-common/src/dependency/definition.rs
use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DependencyTag: u8 {
        const RUNTIME     = 0b00000001;
        const BUILD       = 0b00000010;
        const OPTIONAL    = 0b00001000;
    }
}

impl Default for DependencyTag {
    fn default() -> Self {
        Self::RUNTIME
    }
}

impl fmt::Display for DependencyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.contains(Self::BUILD) {
            parts.push("build");
        }
        if self.contains(Self::RUNTIME) {
            parts.push("runtime");
        }
        if self.contains(Self::OPTIONAL) {
            parts.push("optional");
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// Phase in which a dependency is needed, as written in a formula file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Build,
    #[default]
    #[serde(alias = "run")]
    Runtime,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct DependencyDecl {
    name: String,
    #[serde(default)]
    phase: Phase,
    #[serde(default)]
    optional: bool,
}

impl From<DependencyDecl> for Dependency {
    fn from(decl: DependencyDecl) -> Self {
        let mut tags = match decl.phase {
            Phase::Build => DependencyTag::BUILD,
            Phase::Runtime => DependencyTag::RUNTIME,
        };
        if decl.optional {
            tags |= DependencyTag::OPTIONAL;
        }
        Dependency::new_with_tags(decl.name, tags)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "DependencyDecl")]
pub struct Dependency {
    pub name: String,
    pub tags: DependencyTag,
}

impl Dependency {
    pub fn new_with_tags(name: impl Into<String>, tags: DependencyTag) -> Self {
        Self {
            name: name.into(),
            tags,
        }
    }

    pub fn is_optional(&self) -> bool {
        self.tags.contains(DependencyTag::OPTIONAL)
    }

    /// Name of the option that switches an optional dependency on.
    pub fn controlling_option(&self) -> Option<String> {
        self.is_optional().then(|| format!("with-{}", self.name))
    }
}

pub trait DependencyExt {
    fn filter_by_tags(&self, include: DependencyTag, exclude: DependencyTag) -> Vec<&Dependency>;
    fn runtime(&self) -> Vec<&Dependency>;
    fn build_time(&self) -> Vec<&Dependency>;
    fn optional(&self) -> Vec<&Dependency>;
}

impl DependencyExt for Vec<Dependency> {
    fn filter_by_tags(&self, include: DependencyTag, exclude: DependencyTag) -> Vec<&Dependency> {
        self.iter()
            .filter(|dep| dep.tags.contains(include) && !dep.tags.intersects(exclude))
            .collect()
    }

    /// Non-optional runtime dependencies.
    fn runtime(&self) -> Vec<&Dependency> {
        self.filter_by_tags(DependencyTag::RUNTIME, DependencyTag::OPTIONAL)
    }

    /// Non-optional build dependencies.
    fn build_time(&self) -> Vec<&Dependency> {
        self.filter_by_tags(DependencyTag::BUILD, DependencyTag::OPTIONAL)
    }

    fn optional(&self) -> Vec<&Dependency> {
        self.filter_by_tags(DependencyTag::OPTIONAL, DependencyTag::empty())
    }
}
