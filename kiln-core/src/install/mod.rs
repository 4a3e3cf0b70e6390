// kiln-core/src/install/mod.rs
// The install pipeline. Every step runs to completion before the next one
// starts, and the first fatal error aborts with whatever is already in the
// prefix left in place.

use std::fs;
use std::path::PathBuf;

use kiln_common::config::Config;
use kiln_common::dependency::{DependencyResolver, ResolutionContext};
use kiln_common::error::{KilnError, Result};
use kiln_common::model::artifact::LocalArtifact;
use kiln_common::model::formula::{Formula, InstallSpec};
use kiln_common::model::options::ResolvedConfig;
use kiln_net::fetch_and_verify;
use tracing::{debug, info, warn};

use crate::build::{
    self, apply_patches, assemble_flags, extract_source, regenerate_build_scripts, run_build,
    stage_and_install_resources, BuildEnvironment, PatchFile, StagedResource, TemplateContext,
};
use crate::check::{check_conflicts, run_smoke_test, SmokeOutcome};
use crate::options::resolve_options;

pub mod link;
pub mod receipt;

pub use link::link_opt;
pub use receipt::write_receipt;

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Remove an existing keg of the same version and build again.
    pub force: bool,
}

/// What an install produced.
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub name: String,
    pub version: String,
    pub keg_path: PathBuf,
    pub options: ResolvedConfig,
    pub configure_args: Vec<String>,
    /// Optional dependencies that were requested but not found.
    pub absent_optional: Vec<String>,
    pub regenerated: bool,
    pub smoke: SmokeOutcome,
}

/// Every verified artifact a formula needs, in the order the formula lists
/// them.
#[derive(Debug, Clone)]
pub struct FetchedArtifacts {
    pub source: LocalArtifact,
    pub patches: Vec<LocalArtifact>,
    pub resources: Vec<LocalArtifact>,
}

/// Fetches and verifies the source, then each patch, then each resource.
pub async fn fetch_all(formula: &Formula, config: &Config) -> Result<FetchedArtifacts> {
    info!("==> Fetching {}", formula.name);
    let source = fetch_and_verify(&formula.source_ref(), config).await?;
    let mut patches = Vec::with_capacity(formula.patches.len());
    for patch_ref in formula.patch_refs()? {
        patches.push(fetch_and_verify(&patch_ref, config).await?);
    }
    let mut resources = Vec::with_capacity(formula.resources.len());
    for resource_ref in formula.resource_refs() {
        resources.push(fetch_and_verify(&resource_ref, config).await?);
    }
    debug!(
        "Fetched {} plus {} patches and {} resources",
        source.name,
        patches.len(),
        resources.len()
    );
    Ok(FetchedArtifacts {
        source,
        patches,
        resources,
    })
}

/// Installs `formula` built with the `requested` options into
/// `<root>/Cellar/<name>/<version>` and links it into `<root>/opt`.
///
/// A failing smoke test is reported in the returned `InstallReport`, not as
/// an error.
pub async fn install_formula<S: AsRef<str>>(
    formula: &Formula,
    requested: &[S],
    install_options: &InstallOptions,
    config: &Config,
) -> Result<InstallReport> {
    let options = resolve_options(formula, requested)?;
    info!("==> Installing {} {} {}", formula.name, formula.version, options);

    let keg_path = build::get_formula_cellar_path(formula, config);
    if keg_path.exists() && !install_options.force {
        return Err(KilnError::AlreadyInstalled(
            formula.name.clone(),
            formula.version.clone(),
        ));
    }

    check_conflicts(formula, config)?;

    let opt_dir = config.opt_dir();
    let deps = DependencyResolver::new(ResolutionContext {
        opt_dir: &opt_dir,
        tool_path: config.tool_search_path(),
    })
    .resolve(formula, &options)?;
    let absent_optional: Vec<String> = deps
        .absent_optional()
        .into_iter()
        .map(str::to_string)
        .collect();

    let fetched = fetch_all(formula, config).await?;

    let tmp_dir = config.tmp_dir();
    fs::create_dir_all(&tmp_dir)?;
    let build_root = tempfile::Builder::new()
        .prefix(&format!("kiln-build-{}-", formula.name))
        .tempdir_in(&tmp_dir)
        .map_err(|e| {
            KilnError::IoError(format!(
                "Failed to create build directory in {}: {}",
                tmp_dir.display(),
                e
            ))
        })?;
    debug!("Building in {}", build_root.path().display());
    let source_dir = build_root.path().join("source");
    fs::create_dir_all(&source_dir)?;

    info!("==> Extracting {}", fetched.source.name);
    let source = extract_source(&fetched.source, &source_dir)?;

    let patch_files: Vec<PatchFile> = formula
        .patches
        .iter()
        .zip(&fetched.patches)
        .map(|(spec, artifact)| PatchFile {
            name: spec.display_name(),
            path: artifact.path.clone(),
            strip: spec.strip,
        })
        .collect();
    if !patch_files.is_empty() {
        info!("==> Applying {} patches", patch_files.len());
    }
    let patched = apply_patches(&source, &patch_files)?;

    let ctx = TemplateContext::new(&keg_path, config);
    let build_env = BuildEnvironment::new(formula, &options, &deps, &ctx, config)?;
    let regenerated = regenerate_build_scripts(&formula.install, &patched, &build_env).await?;

    let configure_args = assemble_flags(formula, &options, &deps, &ctx);
    let install_spec = expand_commands(&formula.install, &ctx);
    // The old keg stays until everything up to the build has succeeded.
    if keg_path.exists() {
        info!("Removing existing keg at {}", keg_path.display());
        fs::remove_dir_all(&keg_path)?;
    }
    run_build(&install_spec, &patched.root, &configure_args, &build_env).await?;
    fs::create_dir_all(&keg_path)?;

    let staged: Vec<StagedResource<'_>> = formula
        .resources
        .iter()
        .zip(fetched.resources)
        .map(|(spec, artifact)| StagedResource { spec, artifact })
        .collect();
    if !staged.is_empty() {
        info!("==> Installing {} resources", staged.len());
    }
    stage_and_install_resources(&staged, build_root.path(), &ctx, &build_env).await?;

    write_receipt(formula, &options, &configure_args, &keg_path)?;
    link_opt(&formula.name, &keg_path, config)?;

    let smoke_result = run_smoke_test(formula, &keg_path, config).await;
    if let Err(e) = &smoke_result {
        warn!("{} was installed but its test failed: {}", formula.name, e);
    }
    let smoke = SmokeOutcome::from_result(smoke_result, !formula.test.commands.is_empty());

    info!("==> {} {} installed to {}", formula.name, formula.version, keg_path.display());
    Ok(InstallReport {
        name: formula.name.clone(),
        version: formula.version.clone(),
        keg_path,
        options,
        configure_args,
        absent_optional,
        regenerated,
        smoke,
    })
}

// Build and install commands may refer to the prefix.
fn expand_commands(install: &InstallSpec, ctx: &TemplateContext<'_>) -> InstallSpec {
    InstallSpec {
        configure: ctx.expand_all(&install.configure),
        build: ctx.expand_all(&install.build),
        install: ctx.expand_all(&install.install),
        ..install.clone()
    }
}
