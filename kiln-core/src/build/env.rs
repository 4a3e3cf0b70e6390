// kiln-core/src/build/env.rs
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use kiln_common::config::Config;
use kiln_common::dependency::DependencySet;
use kiln_common::error::{KilnError, Result};
use kiln_common::model::formula::Formula;
use kiln_common::model::options::ResolvedConfig;
use tokio::process::Command;
use tracing::debug;

use super::flags::is_active;
use super::template::TemplateContext;

// Inherited variables that would override what the build is told here.
const ENV_VARS_TO_REMOVE: &[&str] = &[
    "MAKEFLAGS",
    "MAKELEVEL",
    "MFLAGS",
    "CDPATH",
    "GREP_OPTIONS",
    "CLICOLOR_FORCE",
];

/// Environment every build, resource and regenerate command runs with.
#[derive(Debug, Clone)]
pub struct BuildEnvironment {
    vars: HashMap<String, String>,
}

impl BuildEnvironment {
    /// Starts from the inherited environment, puts present dependencies'
    /// `bin/` directories and pkg-config/aclocal directories in front of the
    /// search paths, sets `MAKEFLAGS`, and finally applies the formula's own
    /// `[[env]]` entries.
    pub fn new(
        formula: &Formula,
        options: &ResolvedConfig,
        deps: &DependencySet,
        ctx: &TemplateContext<'_>,
        config: &Config,
    ) -> Result<Self> {
        debug!("Creating BuildEnvironment for {}", formula.name);
        let mut vars: HashMap<String, String> = env::vars()
            .filter(|(key, _)| !ENV_VARS_TO_REMOVE.contains(&key.as_str()))
            .collect();

        let dep_paths = deps.opt_paths();

        let mut path_dirs: Vec<PathBuf> = Vec::new();
        for dep_path in &dep_paths {
            for sub in ["bin", "sbin"] {
                let dir = dep_path.join(sub);
                if dir.is_dir() && !path_dirs.contains(&dir) {
                    path_dirs.push(dir);
                }
            }
        }
        let base_path = config.tool_search_path();
        path_dirs.extend(env::split_paths(&base_path));
        set_path_list_var(&mut vars, "PATH", &dedup(path_dirs))?;

        let mut pkg_config_dirs = Vec::new();
        let mut aclocal_dirs = Vec::new();
        for dep_path in &dep_paths {
            pkg_config_dirs.push(dep_path.join("lib/pkgconfig"));
            pkg_config_dirs.push(dep_path.join("share/pkgconfig"));
            aclocal_dirs.push(dep_path.join("share/aclocal"));
        }
        prepend_existing(&mut vars, "PKG_CONFIG_PATH", &pkg_config_dirs)?;
        prepend_existing(&mut vars, "ACLOCAL_PATH", &aclocal_dirs)?;

        let cppflags: Vec<String> = dep_paths
            .iter()
            .map(|p| p.join("include"))
            .filter(|p| p.is_dir())
            .map(|p| format!("-I{}", p.display()))
            .collect();
        let ldflags: Vec<String> = dep_paths
            .iter()
            .map(|p| p.join("lib"))
            .filter(|p| p.is_dir())
            .map(|p| format!("-L{}", p.display()))
            .collect();
        append_words(&mut vars, "CPPFLAGS", &cppflags);
        append_words(&mut vars, "LDFLAGS", &ldflags);

        let jobs = config
            .make_jobs
            .filter(|n| *n > 0)
            .unwrap_or_else(num_cpus::get);
        vars.insert("MAKEFLAGS".to_string(), format!("-j{jobs}"));
        debug!("Setting MAKEFLAGS=-j{}", jobs);

        for entry in &formula.env {
            if let Some(option) = &entry.when {
                if !is_active(formula, options, deps, option) {
                    debug!("Skipping {} (option '{}' inactive)", entry.name, option);
                    continue;
                }
            }
            let value = ctx.expand(&entry.value);
            debug!("Setting {}={}", entry.name, value);
            vars.insert(entry.name.clone(), value);
        }

        if vars.get("PATH").is_none_or(|p| p.is_empty()) {
            return Err(KilnError::Config(
                "PATH is empty after setting up the build environment".to_string(),
            ));
        }
        Ok(Self { vars })
    }

    /// Replaces the command's environment with this one.
    pub fn apply_to_command(&self, command: &mut Command) {
        command.env_clear();
        command.envs(&self.vars);
    }

    pub fn get_path_string(&self) -> Option<&str> {
        self.vars.get("PATH").map(|s| s.as_str())
    }

    pub fn get_var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }
}

fn dedup(dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut unique = Vec::with_capacity(dirs.len());
    for dir in dirs {
        if !unique.contains(&dir) {
            unique.push(dir);
        }
    }
    unique
}

fn set_path_list_var(vars: &mut HashMap<String, String>, name: &str, paths: &[PathBuf]) -> Result<()> {
    let joined = env::join_paths(paths)
        .map_err(|e| KilnError::Config(format!("Failed to join paths for {name}: {e}")))?
        .into_string()
        .map_err(|os| KilnError::Config(format!("{name} contains non-UTF8 characters: {os:?}")))?;
    debug!("Setting {}={}", name, joined);
    vars.insert(name.to_string(), joined);
    Ok(())
}

// Puts the existing directories among `paths` ahead of the variable's current
// value.
fn prepend_existing(vars: &mut HashMap<String, String>, name: &str, paths: &[PathBuf]) -> Result<()> {
    let mut dirs: Vec<PathBuf> = paths.iter().filter(|p| p.is_dir()).cloned().collect();
    if dirs.is_empty() {
        return Ok(());
    }
    if let Some(current) = vars.get(name) {
        dirs.extend(env::split_paths(current));
    }
    set_path_list_var(vars, name, &dedup(dirs))
}

fn append_words(vars: &mut HashMap<String, String>, name: &str, words: &[String]) {
    if words.is_empty() {
        return;
    }
    let joined = words.join(" ");
    let value = match vars.get(name).filter(|v| !v.is_empty()) {
        Some(current) => format!("{current} {joined}"),
        None => joined,
    };
    vars.insert(name.to_string(), value);
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use kiln_common::dependency::{DependencyTag, ResolutionStatus, ResolvedDependency};

    use super::*;

    fn path_string(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    const FORMULA: &str = r#"
[formula]
name = "demo"
version = "1.0"
url = "https://example.org/demo-1.0.tar.gz"
sha256 = "10cca9a67cc2e6f4f9024192b1067c444218bf94430891f43dc819d78536ca31"

[[dependency]]
name = "openjpeg"

[[dependency]]
name = "qt"
optional = true

[[env]]
name = "LIBOPENJPEG_CFLAGS"
value = "-I{opt:openjpeg}/include/openjpeg-2.1"

[[env]]
name = "CXXFLAGS"
value = "-std=c++11"
when = "with-qt"
"#;

    fn dep(name: &str, status: ResolutionStatus) -> ResolvedDependency {
        ResolvedDependency {
            name: name.to_string(),
            tags: DependencyTag::RUNTIME,
            status,
        }
    }

    #[test]
    fn dependency_dirs_come_first() {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::with_root(root.path().to_path_buf());
        config.tool_path = Some("/usr/bin:/bin".into());
        let openjpeg = config.formula_opt_path("openjpeg");
        fs::create_dir_all(openjpeg.join("bin")).unwrap();
        fs::create_dir_all(openjpeg.join("lib/pkgconfig")).unwrap();
        fs::create_dir_all(openjpeg.join("include")).unwrap();

        let formula = Formula::from_toml_str(FORMULA).unwrap();
        let mut deps = DependencySet::default();
        deps.resolved
            .push(dep("openjpeg", ResolutionStatus::Installed(openjpeg.clone())));
        deps.resolved.push(dep("qt", ResolutionStatus::NotRequested));
        let options = ResolvedConfig::with_declared(["with-qt"]);
        let prefix = config.formula_keg_path("demo", "1.0");
        let ctx = TemplateContext::new(&prefix, &config);

        let build_env = BuildEnvironment::new(&formula, &options, &deps, &ctx, &config).unwrap();
        let path = build_env.get_path_string().unwrap();
        assert!(path.starts_with(&path_string(&openjpeg.join("bin"))));
        assert!(path.ends_with("/usr/bin:/bin"));
        assert!(build_env
            .get_var("PKG_CONFIG_PATH")
            .unwrap()
            .starts_with(&path_string(&openjpeg.join("lib/pkgconfig"))));
        assert!(build_env
            .get_var("CPPFLAGS")
            .unwrap()
            .contains(&format!("-I{}", openjpeg.join("include").display())));
        assert!(build_env.get_var("MAKEFLAGS").unwrap().starts_with("-j"));
        assert_eq!(
            build_env.get_var("LIBOPENJPEG_CFLAGS").unwrap(),
            format!("-I{}/include/openjpeg-2.1", openjpeg.display())
        );
        assert_ne!(build_env.get_var("CXXFLAGS"), Some("-std=c++11"));
    }

    #[test]
    fn gated_entry_needs_option_and_dependency() {
        let root = tempfile::tempdir().unwrap();
        let config = Config::with_root(root.path().to_path_buf());
        let formula = Formula::from_toml_str(FORMULA).unwrap();
        let mut options = ResolvedConfig::with_declared(["with-qt"]);
        options.set("with-qt", true);
        let prefix = config.formula_keg_path("demo", "1.0");
        let ctx = TemplateContext::new(&prefix, &config);

        let mut deps = DependencySet::default();
        deps.resolved.push(dep("qt", ResolutionStatus::Absent));
        let build_env = BuildEnvironment::new(&formula, &options, &deps, &ctx, &config).unwrap();
        assert_ne!(build_env.get_var("CXXFLAGS"), Some("-std=c++11"));

        deps.resolved[0].status = ResolutionStatus::OnPath(PathBuf::from("/usr/bin/qmake"));
        let build_env = BuildEnvironment::new(&formula, &options, &deps, &ctx, &config).unwrap();
        assert_eq!(build_env.get_var("CXXFLAGS"), Some("-std=c++11"));
    }

    #[test]
    fn make_jobs_come_from_config() {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::with_root(root.path().to_path_buf());
        let formula = Formula::from_toml_str(FORMULA).unwrap();
        let options = ResolvedConfig::with_declared(["with-qt"]);
        let prefix = config.formula_keg_path("demo", "1.0");
        let deps = DependencySet::default();

        config.make_jobs = Some(3);
        let ctx = TemplateContext::new(&prefix, &config);
        let build_env = BuildEnvironment::new(&formula, &options, &deps, &ctx, &config).unwrap();
        assert_eq!(build_env.get_var("MAKEFLAGS"), Some("-j3"));

        config.make_jobs = Some(0);
        let ctx = TemplateContext::new(&prefix, &config);
        let build_env = BuildEnvironment::new(&formula, &options, &deps, &ctx, &config).unwrap();
        assert_eq!(
            build_env.get_var("MAKEFLAGS"),
            Some(format!("-j{}", num_cpus::get()).as_str())
        );
    }
}
