// kiln-core/src/build/steps.rs
use std::fs;
use std::path::Path;

use kiln_common::error::{KilnError, Result};
use kiln_common::model::formula::{InstallSpec, RegenerateMode};
use tracing::{debug, error, info};

use super::env::BuildEnvironment;
use super::patch::PatchedSource;
use crate::process::{run_command_in_dir, tail};

const CONFIG_LOG_TAIL_LINES: usize = 50;

/// Whether a source file feeds the autotools-generated build scripts.
pub fn is_configure_input(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    matches!(
        name,
        "configure.ac" | "configure.in" | "Makefile.am" | "Makefile.in" | "acinclude.m4"
    ) || name.ends_with(".m4")
}

/// Regenerates the build scripts when the formula always wants it, or when
/// a patch touched a configure input. Returns whether the command ran.
pub async fn regenerate_build_scripts(
    install: &InstallSpec,
    patched: &PatchedSource,
    build_env: &BuildEnvironment,
) -> Result<bool> {
    let needed = match install.regenerate {
        RegenerateMode::Always => true,
        RegenerateMode::Never => false,
        RegenerateMode::Auto => patched.touched.iter().any(|p| is_configure_input(p)),
    };
    if !needed {
        debug!("Build scripts do not need regenerating");
        return Ok(false);
    }
    info!("==> {}", install.regenerate_command.join(" "));
    run_command_in_dir(
        &install.regenerate_command,
        &patched.root,
        Some(build_env),
        "regenerate",
    )
    .await?;
    Ok(true)
}

/// configure, build, install, in the source root. The first failing step
/// aborts with `BuildStepFailed`.
pub async fn run_build(
    install: &InstallSpec,
    source_root: &Path,
    configure_args: &[String],
    build_env: &BuildEnvironment,
) -> Result<()> {
    let mut configure = install.configure.clone();
    configure.extend(configure_args.iter().cloned());
    info!("==> {}", configure.join(" "));
    if let Err(e) = run_command_in_dir(&configure, source_root, Some(build_env), "configure").await {
        if matches!(e, KilnError::BuildStepFailed { .. }) {
            log_config_log_tail(source_root);
        }
        return Err(e);
    }

    if install.build.is_empty() {
        debug!("No separate build command; install step builds");
    } else {
        info!("==> {}", install.build.join(" "));
        run_command_in_dir(&install.build, source_root, Some(build_env), "build").await?;
    }

    info!("==> {}", install.install.join(" "));
    run_command_in_dir(&install.install, source_root, Some(build_env), "install").await?;
    Ok(())
}

fn log_config_log_tail(source_root: &Path) {
    let config_log = source_root.join("config.log");
    match fs::read(&config_log) {
        Ok(content) => error!(
            "--- Last {} lines of config.log ---\n{}\n--- End config.log ---",
            CONFIG_LOG_TAIL_LINES,
            tail(&content, CONFIG_LOG_TAIL_LINES)
        ),
        Err(_) => debug!("No config.log at {}", config_log.display()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    use kiln_common::config::Config;
    use kiln_common::dependency::DependencySet;
    use kiln_common::model::formula::Formula;
    use kiln_common::model::options::ResolvedConfig;

    use super::*;
    use crate::build::template::TemplateContext;

    const FORMULA: &str = r#"
[formula]
name = "demo"
version = "1.0"
url = "https://example.org/demo-1.0.tar.gz"
sha256 = "10cca9a67cc2e6f4f9024192b1067c444218bf94430891f43dc819d78536ca31"

[install]
configure = ["sh", "configure"]
build = ["sh", "-c", "echo built >> steps.log"]
install = ["sh", "-c", "echo installed >> steps.log"]
regenerate_command = ["sh", "-c", "echo regenerated >> steps.log"]
"#;

    fn environment(root: &Path, formula: &Formula) -> BuildEnvironment {
        let config = Config::with_root(root.to_path_buf());
        let prefix = config.formula_keg_path("demo", "1.0");
        let ctx = TemplateContext::new(&prefix, &config);
        BuildEnvironment::new(
            formula,
            &ResolvedConfig::default(),
            &DependencySet::default(),
            &ctx,
            &config,
        )
        .unwrap()
    }

    fn patched(root: &Path, touched: &[&str]) -> PatchedSource {
        PatchedSource {
            root: root.to_path_buf(),
            touched: touched.iter().map(PathBuf::from).collect::<BTreeSet<_>>(),
        }
    }

    #[test]
    fn recognises_configure_inputs() {
        assert!(is_configure_input(Path::new("configure.ac")));
        assert!(is_configure_input(Path::new("m4/libtool.m4")));
        assert!(is_configure_input(Path::new("poppler/Makefile.am")));
        assert!(!is_configure_input(Path::new("poppler/GlobalParams.cc")));
        assert!(!is_configure_input(Path::new("configure")));
    }

    #[tokio::test]
    async fn regenerates_only_when_needed() {
        let dir = tempfile::tempdir().unwrap();
        let mut formula = Formula::from_toml_str(FORMULA).unwrap();
        let build_env = environment(dir.path(), &formula);

        let ran = regenerate_build_scripts(
            &formula.install,
            &patched(dir.path(), &["poppler/Form.cc"]),
            &build_env,
        )
        .await
        .unwrap();
        assert!(!ran);

        let ran = regenerate_build_scripts(
            &formula.install,
            &patched(dir.path(), &["configure.ac"]),
            &build_env,
        )
        .await
        .unwrap();
        assert!(ran);

        formula.install.regenerate = RegenerateMode::Never;
        let ran = regenerate_build_scripts(
            &formula.install,
            &patched(dir.path(), &["configure.ac"]),
            &build_env,
        )
        .await
        .unwrap();
        assert!(!ran);

        formula.install.regenerate = RegenerateMode::Always;
        let ran = regenerate_build_scripts(&formula.install, &patched(dir.path(), &[]), &build_env)
            .await
            .unwrap();
        assert!(ran);
        let log = fs::read_to_string(dir.path().join("steps.log")).unwrap();
        assert_eq!(log, "regenerated\nregenerated\n");
    }

    #[tokio::test]
    async fn runs_steps_in_order_with_args() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("configure"),
            "echo \"configured $*\" >> steps.log\n",
        )
        .unwrap();
        let formula = Formula::from_toml_str(FORMULA).unwrap();
        let build_env = environment(dir.path(), &formula);

        run_build(
            &formula.install,
            dir.path(),
            &["--prefix=/p".to_string(), "--disable-poppler-qt5".to_string()],
            &build_env,
        )
        .await
        .unwrap();
        let log = fs::read_to_string(dir.path().join("steps.log")).unwrap();
        assert_eq!(
            log,
            "configured --prefix=/p --disable-poppler-qt5\nbuilt\ninstalled\n"
        );
    }

    #[tokio::test]
    async fn configure_failure_stops_the_build() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("configure"), "echo 'checking for cairo... no' > config.log\nexit 1\n")
            .unwrap();
        let formula = Formula::from_toml_str(FORMULA).unwrap();
        let build_env = environment(dir.path(), &formula);

        let err = run_build(&formula.install, dir.path(), &[], &build_env)
            .await
            .unwrap_err();
        match err {
            KilnError::BuildStepFailed { step, code } => {
                assert_eq!(step, "configure");
                assert_eq!(code, Some(1));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dir.path().join("steps.log").exists());
    }
}
