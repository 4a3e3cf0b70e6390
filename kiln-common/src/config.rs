// kiln-common/src/config.rs
use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use tracing::debug;

use super::error::Result;

// Fallback if KILN_ROOT is not set or is empty.
const DEFAULT_FALLBACK_KILN_ROOT: &str = "/opt/kiln";
const LOCAL_FORMULA_DIR: &str = "formulae";
const LOCAL_FIXTURE_DIR: &str = "fixtures";

#[derive(Debug, Clone)]
pub struct Config {
    pub kiln_root: PathBuf,
    /// Directories searched, in order, for `<name>.toml` formula files.
    pub formula_dirs: Vec<PathBuf>,
    pub cache_dir: PathBuf,
    /// Directories searched, in order, for smoke-test fixture files.
    pub fixture_dirs: Vec<PathBuf>,
    /// Search path used to locate tool dependencies and build programs.
    pub tool_path: Option<OsString>,
    /// Parallel make jobs; `None` means one per CPU.
    pub make_jobs: Option<usize>,
}

impl Config {
    pub fn load() -> Result<Self> {
        debug!("Loading kiln configuration");

        let kiln_root_str = env::var("KILN_ROOT")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                debug!(
                    "KILN_ROOT environment variable not set or empty, falling back to default: {}",
                    DEFAULT_FALLBACK_KILN_ROOT
                );
                DEFAULT_FALLBACK_KILN_ROOT.to_string()
            });
        let mut config = Self::with_root(PathBuf::from(&kiln_root_str));
        debug!("Effective KILN_ROOT set to: {}", config.kiln_root.display());

        if let Some(dirs) = env::var_os("KILN_FORMULA_PATH").filter(|s| !s.is_empty()) {
            config.formula_dirs = env::split_paths(&dirs).map(absolute).collect();
        }
        if let Some(dirs) = env::var_os("KILN_FIXTURES").filter(|s| !s.is_empty()) {
            config.fixture_dirs = env::split_paths(&dirs).map(absolute).collect();
        }
        if let Some(cache) = env::var_os("KILN_CACHE").filter(|s| !s.is_empty()) {
            config.cache_dir = absolute(PathBuf::from(cache));
        }
        config.tool_path = env::var_os("KILN_TOOL_PATH")
            .filter(|s| !s.is_empty())
            .or_else(|| env::var_os("PATH"));
        config.make_jobs = env::var("KILN_MAKE_JOBS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0);

        debug!("Configuration loaded successfully.");
        Ok(config)
    }

    /// Builds a configuration rooted at `kiln_root` without consulting the
    /// environment. The local formula and fixture directories resolve against
    /// the current directory.
    pub fn with_root(kiln_root: PathBuf) -> Self {
        let kiln_root = absolute(kiln_root);
        Self {
            formula_dirs: vec![kiln_root.join("Formula"), absolute(LOCAL_FORMULA_DIR.into())],
            cache_dir: kiln_root.join("kiln_cache"),
            fixture_dirs: vec![kiln_root.join("fixtures"), absolute(LOCAL_FIXTURE_DIR.into())],
            tool_path: None,
            make_jobs: None,
            kiln_root,
        }
    }

    pub fn cellar_dir(&self) -> PathBuf {
        self.kiln_root.join("Cellar")
    }

    pub fn opt_dir(&self) -> PathBuf {
        self.kiln_root.join("opt")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone()
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.kiln_root.join("kiln_logs")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.kiln_root.join("tmp")
    }

    pub fn formula_cellar_dir(&self, formula_name: &str) -> PathBuf {
        self.cellar_dir().join(formula_name)
    }

    pub fn formula_keg_path(&self, formula_name: &str, version_str: &str) -> PathBuf {
        self.formula_cellar_dir(formula_name).join(version_str)
    }

    pub fn formula_opt_path(&self, formula_name: &str) -> PathBuf {
        self.opt_dir().join(formula_name)
    }

    /// The search path for tools, falling back to the process PATH.
    pub fn tool_search_path(&self) -> OsString {
        self.tool_path
            .clone()
            .or_else(|| env::var_os("PATH"))
            .unwrap_or_default()
    }

    pub fn find_formula_file(&self, formula_name: &str) -> Option<PathBuf> {
        let file_name = format!("{formula_name}.toml");
        self.formula_dirs
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
    }

    /// Locates a fixture by file name. When no directory holds it, the path in
    /// the first fixture directory is returned so the failure surfaces in the
    /// command that reads it. Always absolute: test commands run elsewhere.
    pub fn fixture_path(&self, file_name: &str) -> PathBuf {
        let found = self
            .fixture_dirs
            .iter()
            .map(|dir| dir.join(file_name))
            .find(|candidate| candidate.exists())
            .or_else(|| self.fixture_dirs.first().map(|dir| dir.join(file_name)))
            .unwrap_or_else(|| PathBuf::from(file_name));
        absolute(found)
    }
}

fn absolute(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(e) => {
            debug!("Cannot resolve {} against the current directory: {}", path.display(), e);
            path
        }
    }
}
