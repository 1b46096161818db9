//! Pre-publish build hook.
//!
//! Before a release is created the project gets a chance to build its
//! artifact. The first npm script found in [`BUILD_SCRIPT_PRIORITY`] runs
//! with `NODE_ENV=production`; a non-zero exit aborts the publish.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Errors from the build hook.
#[derive(Error, Debug)]
pub enum BuildError {
    /// The build script exited with a non-zero status.
    #[error("`npm run {script}` failed: {stderr}")]
    CommandFailed {
        /// The script that failed.
        script: String,
        /// The exit code, if available.
        exit_code: Option<i32>,
        /// Captured stderr.
        stderr: String,
    },

    /// Failed to spawn the build command.
    #[error("failed to execute build script: {0}")]
    Exec(#[from] std::io::Error),
}

/// Result alias for build hook operations.
pub type BuildResult<T> = Result<T, BuildError>;

/// npm scripts consulted, highest priority first.
pub const BUILD_SCRIPT_PRIORITY: [&str; 3] = ["prepublish", "prepare", "build"];

/// The build script selected for this project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildScript {
    /// Script name, as passed to `npm run`.
    pub name: String,
    /// The script body, for display.
    pub command: String,
}

impl BuildScript {
    /// Pick the first script from [`BUILD_SCRIPT_PRIORITY`] the project defines.
    pub fn select(scripts: &BTreeMap<String, String>) -> Option<Self> {
        BUILD_SCRIPT_PRIORITY.iter().find_map(|name| {
            scripts.get(*name).map(|command| Self {
                name: (*name).to_string(),
                command: command.clone(),
            })
        })
    }
}

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// Script that ran.
    pub script: String,
    /// How long the build took.
    pub duration: Duration,
}

/// Run `npm run <script>` in `project_root` with `NODE_ENV=production`.
#[instrument(skip_all, fields(script = %script.name))]
pub async fn run_build_script(
    script: &BuildScript,
    project_root: &Utf8Path,
) -> BuildResult<BuildOutput> {
    run_with_program("npm", script, project_root).await
}

async fn run_with_program(
    program: &str,
    script: &BuildScript,
    project_root: &Utf8Path,
) -> BuildResult<BuildOutput> {
    debug!(command = %script.command, "running build script");

    let start = Instant::now();
    let output = Command::new(program)
        .args(["run", &script.name])
        .env("NODE_ENV", "production")
        .current_dir(project_root.as_std_path())
        .output()
        .await?;
    let duration = start.elapsed();

    if !output.status.success() {
        return Err(BuildError::CommandFailed {
            script: script.name.clone(),
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    debug!(stdout = %String::from_utf8_lossy(&output.stdout).trim(), "build output");
    info!(?duration, "build finished");
    Ok(BuildOutput {
        script: script.name.clone(),
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn scripts(names: &[&str]) -> BTreeMap<String, String> {
        names
            .iter()
            .map(|n| ((*n).to_string(), format!("run-{n}")))
            .collect()
    }

    #[test]
    fn prepublish_wins() {
        let picked = BuildScript::select(&scripts(&["build", "prepare", "prepublish"])).unwrap();
        assert_eq!(picked.name, "prepublish");
        assert_eq!(picked.command, "run-prepublish");
    }

    #[test]
    fn prepare_beats_build() {
        let picked = BuildScript::select(&scripts(&["build", "prepare", "test"])).unwrap();
        assert_eq!(picked.name, "prepare");
    }

    #[test]
    fn build_is_last_resort() {
        let picked = BuildScript::select(&scripts(&["build", "lint"])).unwrap();
        assert_eq!(picked.name, "build");
    }

    #[test]
    fn nothing_to_run() {
        assert!(BuildScript::select(&scripts(&["test", "lint"])).is_none());
    }

    /// A stand-in for `npm` running `body` as a shell script.
    fn fake_npm(dir: &Utf8Path, body: &str) -> String {
        let path = dir.join("fake-npm");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string()
    }

    #[tokio::test]
    async fn runs_script_in_production_mode() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let npm = fake_npm(root, "echo \"$1 $2 $NODE_ENV\" > ran.txt");
        let script = BuildScript {
            name: "build".into(),
            command: "skpm-build".into(),
        };

        let out = run_with_program(&npm, &script, root).await.unwrap();
        assert_eq!(out.script, "build");
        let ran = std::fs::read_to_string(root.join("ran.txt")).unwrap();
        assert_eq!(ran.trim(), "run build production");
    }

    #[tokio::test]
    async fn failing_script_is_fatal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let npm = fake_npm(root, "echo broken >&2\nexit 2");
        let script = BuildScript {
            name: "prepare".into(),
            command: "make".into(),
        };

        let err = run_with_program(&npm, &script, root).await.unwrap_err();
        match err {
            BuildError::CommandFailed {
                script,
                exit_code,
                stderr,
            } => {
                assert_eq!(script, "prepare");
                assert_eq!(exit_code, Some(2));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
