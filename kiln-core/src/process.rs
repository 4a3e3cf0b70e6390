// kiln-core/src/process.rs
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use kiln_common::error::{KilnError, Result};
use tokio::process::Command;
use tracing::{debug, error};

use crate::build::env::BuildEnvironment;

const OUTPUT_TAIL_LINES: usize = 40;

/// Finds the program to execute. Names containing a slash are paths (relative
/// ones resolve against `cwd`); bare names are looked up on `search_path`.
pub fn resolve_program(program: &str, cwd: &Path, search_path: Option<OsString>) -> Result<PathBuf> {
    if program.contains('/') {
        let path = Path::new(program);
        return Ok(if path.is_absolute() {
            path.to_path_buf()
        } else {
            cwd.join(path)
        });
    }
    which::which_in(program, search_path, cwd).map_err(|e| {
        KilnError::CommandExecError(format!("'{program}' not found on PATH: {e}"))
    })
}

/// Runs `argv` in `cwd` and waits for it. A non-zero exit (or death by
/// signal) is `BuildStepFailed` named after `step`; failing to start the
/// program at all is `CommandExecError`.
///
/// Without a build environment the command inherits this process's
/// environment.
pub async fn run_command_in_dir(
    argv: &[String],
    cwd: &Path,
    build_env: Option<&BuildEnvironment>,
    step: &str,
) -> Result<Output> {
    let (program, args) = argv.split_first().ok_or_else(|| {
        KilnError::CommandExecError(format!("empty command for step '{step}'"))
    })?;
    let search_path = match build_env {
        Some(env) => env.get_path_string().map(OsString::from),
        None => std::env::var_os("PATH"),
    };
    let program_path = resolve_program(program, cwd, search_path)?;

    let mut cmd = Command::new(&program_path);
    cmd.args(args);
    if let Some(env) = build_env {
        env.apply_to_command(&mut cmd);
    }
    cmd.current_dir(cwd);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    debug!("Running {} in [{}]: {:?}", step, cwd.display(), argv);

    let output = cmd.output().await.map_err(|e| {
        KilnError::CommandExecError(format!(
            "Failed to execute {} for {} in {}: {}",
            program_path.display(),
            step,
            cwd.display(),
            e
        ))
    })?;

    if output.status.success() {
        debug!("Command successful for {} in [{}]", step, cwd.display());
        debug!("Stdout:\n{}", String::from_utf8_lossy(&output.stdout));
        return Ok(output);
    }

    error!(
        "Command failed for {} in [{}]. Status: {}",
        step,
        cwd.display(),
        output.status
    );
    error!("Stdout (tail):\n{}", tail(&output.stdout, OUTPUT_TAIL_LINES));
    error!("Stderr (tail):\n{}", tail(&output.stderr, OUTPUT_TAIL_LINES));
    Err(KilnError::BuildStepFailed {
        step: step.to_string(),
        code: output.status.code(),
    })
}

pub(crate) fn tail(bytes: &[u8], lines: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    let kept: Vec<&str> = text.lines().rev().take(lines).collect();
    kept.into_iter().rev().collect::<Vec<_>>().join("\n")
}
