// kiln-common/src/dependency/resolver.rs
// Decides, before anything is fetched, which declared dependencies are
// present on this machine. Dependencies are never installed from here; an
// installed keg linked into `opt/` or an executable on the tool search path
// counts as present.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::dependency::{Dependency, DependencyTag};
use crate::error::{KilnError, Result};
use crate::model::formula::Formula;
use crate::model::options::ResolvedConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionStatus {
    /// Linked keg at `<root>/opt/<name>`.
    Installed(PathBuf),
    /// Executable found on the tool search path.
    OnPath(PathBuf),
    Absent,
    /// Optional and its `with-<name>` option is off; never looked up.
    NotRequested,
}

impl ResolutionStatus {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Installed(_) | Self::OnPath(_))
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    pub name: String,
    pub tags: DependencyTag,
    pub status: ResolutionStatus,
}

impl ResolvedDependency {
    pub fn opt_path(&self) -> Option<&Path> {
        match &self.status {
            ResolutionStatus::Installed(path) => Some(path),
            _ => None,
        }
    }
}

/// Outcome of dependency resolution, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct DependencySet {
    pub resolved: Vec<ResolvedDependency>,
}

impl DependencySet {
    pub fn get(&self, name: &str) -> Option<&ResolvedDependency> {
        self.resolved.iter().find(|dep| dep.name == name)
    }

    pub fn is_present(&self, name: &str) -> bool {
        self.get(name).is_some_and(|dep| dep.status.is_present())
    }

    /// `opt/` paths of present dependencies, build-time ones included.
    pub fn opt_paths(&self) -> Vec<PathBuf> {
        self.resolved
            .iter()
            .filter_map(|dep| dep.opt_path().map(Path::to_path_buf))
            .collect()
    }

    /// Optional dependencies that were requested but could not be found.
    pub fn absent_optional(&self) -> Vec<&str> {
        self.resolved
            .iter()
            .filter(|dep| {
                dep.tags.contains(DependencyTag::OPTIONAL)
                    && dep.status == ResolutionStatus::Absent
            })
            .map(|dep| dep.name.as_str())
            .collect()
    }
}

pub struct ResolutionContext<'a> {
    pub opt_dir: &'a Path,
    pub tool_path: OsString,
}

pub struct DependencyResolver<'a> {
    context: ResolutionContext<'a>,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(context: ResolutionContext<'a>) -> Self {
        Self { context }
    }

    /// Resolves every declared dependency of `formula` under `config`. All
    /// missing required dependencies are reported together.
    pub fn resolve(&self, formula: &Formula, config: &ResolvedConfig) -> Result<DependencySet> {
        debug!(
            "Resolving {} dependencies for '{}'",
            formula.dependencies.len(),
            formula.name
        );
        let mut set = DependencySet::default();
        let mut missing = Vec::new();

        for dep in &formula.dependencies {
            let status = if self.should_consider_dependency(dep, config) {
                self.locate(&dep.name)
            } else {
                debug!("Optional dependency '{}' not requested; skipping", dep.name);
                ResolutionStatus::NotRequested
            };

            if status == ResolutionStatus::Absent {
                if dep.is_optional() {
                    warn!(
                        "Optional dependency '{}' was requested but is not installed; building without it",
                        dep.name
                    );
                } else {
                    missing.push(dep.name.clone());
                }
            }
            set.resolved.push(ResolvedDependency {
                name: dep.name.clone(),
                tags: dep.tags,
                status,
            });
        }

        if !missing.is_empty() {
            return Err(KilnError::MissingRequiredDependency {
                formula: formula.name.clone(),
                missing,
            });
        }
        Ok(set)
    }

    fn should_consider_dependency(&self, dep: &Dependency, config: &ResolvedConfig) -> bool {
        match dep.controlling_option() {
            Some(option) => config.is_on(&option),
            None => true,
        }
    }

    fn locate(&self, name: &str) -> ResolutionStatus {
        let opt_path = self.context.opt_dir.join(name);
        if opt_path.exists() {
            debug!("Dependency '{}' installed at {}", name, opt_path.display());
            return ResolutionStatus::Installed(opt_path);
        }
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        match which::which_in(name, Some(&self.context.tool_path), cwd) {
            Ok(exe) => {
                debug!("Dependency '{}' found on PATH at {}", name, exe.display());
                ResolutionStatus::OnPath(exe)
            }
            Err(_) => {
                debug!("Dependency '{}' not found", name);
                ResolutionStatus::Absent
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const FORMULA: &str = r#"
[formula]
name = "demo"
version = "1.0"
url = "https://example.org/demo-1.0.tar.gz"
sha256 = "10cca9a67cc2e6f4f9024192b1067c444218bf94430891f43dc819d78536ca31"

[[dependency]]
name = "pkg-config"
phase = "build"

[[dependency]]
name = "cairo"

[[dependency]]
name = "glib"

[[dependency]]
name = "qt"
optional = true
"#;

    fn resolver_for<'a>(opt_dir: &'a Path, bin_dir: &Path) -> DependencyResolver<'a> {
        DependencyResolver::new(ResolutionContext {
            opt_dir,
            tool_path: bin_dir.as_os_str().to_owned(),
        })
    }

    #[cfg(unix)]
    fn make_tool(bin_dir: &Path, name: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = bin_dir.join(name);
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn reports_every_missing_required_dependency() {
        let root = tempfile::tempdir().unwrap();
        let opt = root.path().join("opt");
        let bin = root.path().join("bin");
        fs::create_dir_all(opt.join("cairo")).unwrap();
        fs::create_dir_all(&bin).unwrap();

        let formula = Formula::from_toml_str(FORMULA).unwrap();
        let config = ResolvedConfig::with_declared(["with-qt"]);
        let err = resolver_for(&opt, &bin).resolve(&formula, &config).unwrap_err();
        match err {
            KilnError::MissingRequiredDependency { formula, missing } => {
                assert_eq!(formula, "demo");
                assert_eq!(missing, vec!["pkg-config", "glib"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn optional_dependency_is_looked_up_only_when_requested() {
        let root = tempfile::tempdir().unwrap();
        let opt = root.path().join("opt");
        let bin = root.path().join("bin");
        fs::create_dir_all(opt.join("cairo")).unwrap();
        fs::create_dir_all(opt.join("glib")).unwrap();
        fs::create_dir_all(&bin).unwrap();
        make_tool(&bin, "pkg-config");

        let formula = Formula::from_toml_str(FORMULA).unwrap();
        let resolver = resolver_for(&opt, &bin);

        let off = ResolvedConfig::with_declared(["with-qt"]);
        let set = resolver.resolve(&formula, &off).unwrap();
        assert_eq!(set.get("qt").unwrap().status, ResolutionStatus::NotRequested);
        assert!(matches!(
            set.get("pkg-config").unwrap().status,
            ResolutionStatus::OnPath(_)
        ));
        assert_eq!(set.opt_paths(), vec![opt.join("cairo"), opt.join("glib")]);
        assert!(set.absent_optional().is_empty());

        let mut on = off.clone();
        on.set("with-qt", true);
        let set = resolver.resolve(&formula, &on).unwrap();
        assert_eq!(set.get("qt").unwrap().status, ResolutionStatus::Absent);
        assert_eq!(set.absent_optional(), vec!["qt"]);
        assert!(!set.is_present("qt"));

        fs::create_dir_all(opt.join("qt")).unwrap();
        let set = resolver.resolve(&formula, &on).unwrap();
        assert!(set.is_present("qt"));
    }
}
