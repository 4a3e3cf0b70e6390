// kiln-core/src/build/resource.rs
use std::fs;
use std::path::Path;

use kiln_common::error::{KilnError, Result};
use kiln_common::model::artifact::LocalArtifact;
use kiln_common::model::formula::ResourceSpec;
use tracing::{debug, info};

use super::env::BuildEnvironment;
use super::extract::extract_source;
use super::template::TemplateContext;
use crate::process::run_command_in_dir;

/// A resource paired with its verified download.
#[derive(Debug, Clone)]
pub struct StagedResource<'a> {
    pub spec: &'a ResourceSpec,
    pub artifact: LocalArtifact,
}

/// Extracts every resource into its own directory under `build_dir` and runs
/// its install commands there, one resource after another. Commands see the
/// same prefix and environment as the primary build.
pub async fn stage_and_install_resources(
    resources: &[StagedResource<'_>],
    build_dir: &Path,
    ctx: &TemplateContext<'_>,
    build_env: &BuildEnvironment,
) -> Result<()> {
    for resource in resources {
        let name = &resource.spec.name;
        let stage_dir = build_dir.join(format!("resource-{name}"));
        if stage_dir.exists() {
            return Err(KilnError::Generic(format!(
                "Stage directory for resource '{}' already exists: {}",
                name,
                stage_dir.display()
            )));
        }
        fs::create_dir_all(&stage_dir)?;
        debug!("Staging resource {} in {}", name, stage_dir.display());
        let tree = extract_source(&resource.artifact, &stage_dir)?;

        for command in &resource.spec.install {
            let argv = ctx.expand_all(command);
            info!("==> [{}] {}", name, argv.join(" "));
            run_command_in_dir(&argv, &tree.root, Some(build_env), &format!("resource {name}"))
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use kiln_common::config::Config;
    use kiln_common::dependency::DependencySet;
    use kiln_common::model::formula::Formula;
    use kiln_common::model::options::ResolvedConfig;

    use super::*;

    const FORMULA: &str = r#"
[formula]
name = "demo"
version = "1.0"
url = "https://example.org/demo-1.0.tar.gz"
sha256 = "10cca9a67cc2e6f4f9024192b1067c444218bf94430891f43dc819d78536ca31"

[[resource]]
name = "font-data"
url = "https://example.org/font-data-0.4.8.tar.gz"
sha256 = "10cca9a67cc2e6f4f9024192b1067c444218bf94430891f43dc819d78536ca31"
install = [["sh", "install.sh", "{share}/fonts"]]

[[resource]]
name = "extra"
url = "https://example.org/extra-1.tar.gz"
sha256 = "10cca9a67cc2e6f4f9024192b1067c444218bf94430891f43dc819d78536ca31"
install = [["sh", "install.sh", "{share}/fonts"]]
"#;

    fn tarball(path: &Path, top: &str, script: &str) {
        let encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_size(script.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{top}/install.sh"), script.as_bytes())
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[tokio::test]
    async fn installs_resources_into_the_shared_prefix_in_order() {
        let root = tempfile::tempdir().unwrap();
        let build_dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(root.path().to_path_buf());
        let formula = Formula::from_toml_str(FORMULA).unwrap();
        let prefix = config.formula_keg_path("demo", "1.0");
        fs::create_dir_all(&prefix).unwrap();
        let ctx = TemplateContext::new(&prefix, &config);
        let build_env = BuildEnvironment::new(
            &formula,
            &ResolvedConfig::default(),
            &DependencySet::default(),
            &ctx,
            &config,
        )
        .unwrap();

        let first = root.path().join("font-data.tar.gz");
        tarball(
            &first,
            "poppler-data-0.4.8",
            "mkdir -p \"$1\" && echo font-data >> \"$1/order\"\n",
        );
        let second = root.path().join("extra.tar.gz");
        tarball(&second, "extra-1", "echo extra >> \"$1/order\"\n");

        let staged = vec![
            StagedResource {
                spec: &formula.resources[0],
                artifact: LocalArtifact {
                    name: "font-data".to_string(),
                    path: first,
                    sha256: String::new(),
                },
            },
            StagedResource {
                spec: &formula.resources[1],
                artifact: LocalArtifact {
                    name: "extra".to_string(),
                    path: second,
                    sha256: String::new(),
                },
            },
        ];
        stage_and_install_resources(&staged, build_dir.path(), &ctx, &build_env)
            .await
            .unwrap();

        let order = fs::read_to_string(prefix.join("share/fonts/order")).unwrap();
        assert_eq!(order, "font-data\nextra\n");
        assert!(build_dir.path().join("resource-font-data/install.sh").is_file());
    }

    #[tokio::test]
    async fn failing_resource_command_names_the_resource() {
        let root = tempfile::tempdir().unwrap();
        let build_dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(root.path().to_path_buf());
        let formula = Formula::from_toml_str(FORMULA).unwrap();
        let prefix = config.formula_keg_path("demo", "1.0");
        let ctx = TemplateContext::new(&prefix, &config);
        let build_env = BuildEnvironment::new(
            &formula,
            &ResolvedConfig::default(),
            &DependencySet::default(),
            &ctx,
            &config,
        )
        .unwrap();

        let archive = root.path().join("font-data.tar.gz");
        tarball(&archive, "poppler-data-0.4.8", "exit 2\n");
        let staged = vec![StagedResource {
            spec: &formula.resources[0],
            artifact: LocalArtifact {
                name: "font-data".to_string(),
                path: archive,
                sha256: String::new(),
            },
        }];
        let err = stage_and_install_resources(&staged, build_dir.path(), &ctx, &build_env)
            .await
            .unwrap_err();
        match err {
            KilnError::BuildStepFailed { step, code } => {
                assert_eq!(step, "resource font-data");
                assert_eq!(code, Some(2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
