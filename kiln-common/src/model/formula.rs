// kiln-common/src/model/formula.rs
// A formula is plain data: everything needed to fetch, patch, configure,
// build, install and smoke-test one package. The interpreter in kiln-core
// consumes it; nothing here executes anything.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::dependency::Dependency;
use crate::error::{KilnError, Result};
use crate::model::artifact::ArtifactRef;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
struct FormulaHeader {
    name: String,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    homepage: Option<String>,
    version: String,
    url: String,
    sha256: String,
    #[serde(default)]
    mirrors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFormula {
    formula: FormulaHeader,
    #[serde(default, rename = "patch")]
    patches: Vec<PatchSpec>,
    #[serde(default, rename = "dependency")]
    dependencies: Vec<Dependency>,
    #[serde(default, rename = "option")]
    options: Vec<OptionSpec>,
    #[serde(default, rename = "deprecated_option")]
    deprecated_options: Vec<DeprecatedOption>,
    #[serde(default, rename = "resource")]
    resources: Vec<ResourceSpec>,
    #[serde(default, rename = "conflict")]
    conflicts: Vec<ConflictSpec>,
    #[serde(default)]
    env: Vec<EnvSpec>,
    #[serde(default)]
    install: InstallSpec,
    #[serde(default)]
    test: TestSpec,
}

/// A patch applied to the primary source before building.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PatchSpec {
    /// Remote (`https://`) or local (`file://`) location.
    #[serde(default)]
    pub url: Option<String>,
    /// Local file, relative to the directory holding the formula file.
    #[serde(default)]
    pub path: Option<String>,
    pub sha256: String,
    /// Leading path components stripped from file names in the diff.
    #[serde(default = "default_strip")]
    pub strip: usize,
}

fn default_strip() -> usize {
    1
}

impl PatchSpec {
    /// Short display name: the last path segment of the location.
    pub fn display_name(&self) -> String {
        self.url
            .as_deref()
            .or(self.path.as_deref())
            .and_then(|loc| loc.trim_end_matches('/').rsplit('/').next())
            .unwrap_or("patch")
            .to_string()
    }
}

/// A secondary archive installed into the same prefix after the primary build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ResourceSpec {
    pub name: String,
    pub url: String,
    pub sha256: String,
    #[serde(default = "default_resource_install")]
    pub install: Vec<Vec<String>>,
}

fn default_resource_install() -> Vec<Vec<String>> {
    vec![vec![
        "make".to_string(),
        "install".to_string(),
        "prefix={prefix}".to_string(),
    ]]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OptionSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DeprecatedOption {
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConflictSpec {
    pub names: Vec<String>,
    pub because: String,
}

/// An environment variable set for every build command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EnvSpec {
    pub name: String,
    pub value: String,
    /// Only set when this option is active.
    #[serde(default)]
    pub when: Option<String>,
}

/// Arguments added to the configure command depending on an option.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConditionalFlag {
    pub when: String,
    #[serde(default)]
    pub enable: Vec<String>,
    #[serde(default)]
    pub disable: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegenerateMode {
    /// Regenerate only when a patch touched a configure input.
    #[default]
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct InstallSpec {
    pub configure: Vec<String>,
    pub args: Vec<String>,
    #[serde(rename = "flag")]
    pub flags: Vec<ConditionalFlag>,
    /// Empty skips the separate build step.
    pub build: Vec<String>,
    pub install: Vec<String>,
    pub regenerate: RegenerateMode,
    pub regenerate_command: Vec<String>,
}

impl Default for InstallSpec {
    fn default() -> Self {
        Self {
            configure: vec!["./configure".to_string()],
            args: vec!["--prefix={prefix}".to_string()],
            flags: Vec::new(),
            build: vec!["make".to_string()],
            install: vec!["make".to_string(), "install".to_string()],
            regenerate: RegenerateMode::Auto,
            regenerate_command: vec!["autoreconf".to_string(), "-ivf".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct TestSpec {
    #[serde(default)]
    pub commands: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    pub name: String,
    pub desc: Option<String>,
    pub homepage: Option<String>,
    pub version: String,
    /// Source download URL (stable version)
    pub url: String,
    /// SHA256 checksum for the source archive
    pub sha256: String,
    pub mirrors: Vec<String>,
    /// Applied in declaration order.
    pub patches: Vec<PatchSpec>,
    pub dependencies: Vec<Dependency>,
    /// Declared options plus one `with-<dep>` option per optional dependency.
    pub options: Vec<OptionSpec>,
    pub deprecated_options: Vec<DeprecatedOption>,
    pub resources: Vec<ResourceSpec>,
    pub conflicts: Vec<ConflictSpec>,
    pub env: Vec<EnvSpec>,
    pub install: InstallSpec,
    pub test: TestSpec,
    /// Directory of the formula file; local patch paths resolve against it.
    pub formula_dir: Option<PathBuf>,
}

impl Formula {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw: RawFormula = toml::from_str(contents)?;
        let header = raw.formula;
        let mut formula = Formula {
            name: header.name,
            desc: header.desc,
            homepage: header.homepage,
            version: header.version,
            url: header.url,
            sha256: header.sha256,
            mirrors: header.mirrors,
            patches: raw.patches,
            dependencies: raw.dependencies,
            options: raw.options,
            deprecated_options: raw.deprecated_options,
            resources: raw.resources,
            conflicts: raw.conflicts,
            env: raw.env,
            install: raw.install,
            test: raw.test,
            formula_dir: None,
        };
        formula.synthesize_dependency_options();
        formula.validate()?;
        Ok(formula)
    }

    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading formula from {}", path.display());
        let contents = fs::read_to_string(path).map_err(|e| {
            KilnError::IoError(format!("Failed to read formula {}: {}", path.display(), e))
        })?;
        let mut formula = Self::from_toml_str(&contents)?;
        formula.formula_dir = path
            .parent()
            .map(|dir| fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf()));
        Ok(formula)
    }

    // Optional dependencies are controlled by `with-<name>` even when the
    // formula does not declare the option itself.
    fn synthesize_dependency_options(&mut self) {
        let mut added = Vec::new();
        for dep in &self.dependencies {
            if let Some(option_name) = dep.controlling_option() {
                if !self.options.iter().any(|o| o.name == option_name) {
                    added.push(OptionSpec {
                        name: option_name,
                        description: format!("Build with {} support", dep.name),
                    });
                }
            }
        }
        self.options.extend(added);
    }

    fn invalid(&self, reason: impl Into<String>) -> KilnError {
        KilnError::InvalidFormula(self.name.clone(), reason.into())
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(KilnError::InvalidFormula(
                "<unnamed>".to_string(),
                "formula name is empty".to_string(),
            ));
        }
        if self.url.trim().is_empty() {
            return Err(self.invalid("source url is empty"));
        }
        check_digest(&self.sha256).map_err(|reason| self.invalid(format!("source {reason}")))?;

        for (index, patch) in self.patches.iter().enumerate() {
            match (&patch.url, &patch.path) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => {
                    return Err(self.invalid(format!(
                        "patch #{} must set exactly one of url or path",
                        index + 1
                    )))
                }
            }
            check_digest(&patch.sha256).map_err(|reason| {
                self.invalid(format!("patch '{}' {reason}", patch.display_name()))
            })?;
        }

        let mut resource_names = HashSet::new();
        for resource in &self.resources {
            if !resource_names.insert(resource.name.as_str()) {
                return Err(self.invalid(format!("duplicate resource '{}'", resource.name)));
            }
            check_digest(&resource.sha256).map_err(|reason| {
                self.invalid(format!("resource '{}' {reason}", resource.name))
            })?;
        }

        let mut option_names = HashSet::new();
        for option in &self.options {
            if !(option.name.starts_with("with-") || option.name.starts_with("without-")) {
                return Err(self.invalid(format!(
                    "option '{}' must start with 'with-' or 'without-'",
                    option.name
                )));
            }
            if !option_names.insert(option.name.as_str()) {
                return Err(self.invalid(format!("duplicate option '{}'", option.name)));
            }
        }
        for alias in &self.deprecated_options {
            if !option_names.contains(alias.new.as_str()) {
                return Err(self.invalid(format!(
                    "deprecated option '{}' points at undeclared option '{}'",
                    alias.old, alias.new
                )));
            }
            if option_names.contains(alias.old.as_str()) {
                return Err(self.invalid(format!(
                    "deprecated option '{}' is also declared as an option",
                    alias.old
                )));
            }
        }
        let conditions = self
            .install
            .flags
            .iter()
            .map(|flag| flag.when.as_str())
            .chain(self.env.iter().filter_map(|env| env.when.as_deref()));
        for condition in conditions {
            if !option_names.contains(condition) {
                return Err(self.invalid(format!(
                    "condition refers to undeclared option '{condition}'"
                )));
            }
        }

        if self.install.configure.is_empty() {
            return Err(self.invalid("install.configure must name a program"));
        }
        if self.install.install.is_empty() {
            return Err(self.invalid("install.install must name a program"));
        }
        if self.test.commands.iter().any(Vec::is_empty) {
            return Err(self.invalid("test commands must not be empty"));
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version_str_full(&self) -> &str {
        &self.version
    }

    pub fn option(&self, name: &str) -> Option<&OptionSpec> {
        self.options.iter().find(|o| o.name == name)
    }

    /// Canonical option name for a possibly deprecated spelling.
    pub fn canonical_option_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.deprecated_options
            .iter()
            .find(|alias| alias.old == name)
            .map_or(name, |alias| alias.new.as_str())
    }

    /// The optional dependency an option switches on, if any.
    pub fn dependency_for_option(&self, option_name: &str) -> Option<&Dependency> {
        self.dependencies
            .iter()
            .find(|dep| dep.controlling_option().as_deref() == Some(option_name))
    }

    pub fn source_ref(&self) -> ArtifactRef {
        let file_name = self.url.rsplit('/').next().unwrap_or_default();
        ArtifactRef {
            name: format!("{}--{}", self.name, file_name),
            url: self.url.clone(),
            sha256: self.sha256.clone(),
            mirrors: self.mirrors.clone(),
        }
    }

    pub fn patch_refs(&self) -> Result<Vec<ArtifactRef>> {
        self.patches
            .iter()
            .map(|patch| {
                let url = match (&patch.url, &patch.path) {
                    (Some(url), _) => url.clone(),
                    (None, Some(path)) => self.local_file_url(Path::new(path))?,
                    (None, None) => return Err(self.invalid("patch without location")),
                };
                Ok(ArtifactRef {
                    name: format!("{}--patch--{}", self.name, patch.display_name()),
                    url,
                    sha256: patch.sha256.clone(),
                    mirrors: Vec::new(),
                })
            })
            .collect()
    }

    pub fn resource_refs(&self) -> Vec<ArtifactRef> {
        self.resources
            .iter()
            .map(|resource| {
                let file_name = resource.url.rsplit('/').next().unwrap_or_default();
                ArtifactRef {
                    name: format!("{}--{}--{}", self.name, resource.name, file_name),
                    url: resource.url.clone(),
                    sha256: resource.sha256.clone(),
                    mirrors: Vec::new(),
                }
            })
            .collect()
    }

    fn local_file_url(&self, path: &Path) -> Result<String> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            match &self.formula_dir {
                Some(dir) => dir.join(path),
                None => std::env::current_dir()?.join(path),
            }
        };
        Url::from_file_path(&absolute)
            .map(|url| url.to_string())
            .map_err(|_| {
                self.invalid(format!(
                    "cannot express {} as a file URL",
                    absolute.display()
                ))
            })
    }
}

fn check_digest(digest: &str) -> std::result::Result<(), String> {
    if digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else if digest.is_empty() {
        Err("has no sha256 digest".to_string())
    } else {
        Err(format!("has a malformed sha256 digest '{digest}'"))
    }
}
