//! Version control operations for the publish workflow.
//!
//! Shells out to `git` and to the configured bump command (npm by default).
//! This ensures we inherit the user's SSH keys, GPG signing, hooks, and
//! other configuration.
//!
//! The [`Vcs`] trait is the seam the orchestrator drives; [`GitVcs`] is the
//! real implementation.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::version::BumpDirective;

/// Default bump command; `{bump}` is replaced with the directive.
pub const DEFAULT_BUMP_COMMAND: &str =
    "npm version {bump} -m \"Publish %s release :rocket:\" --allow-same-version";

/// Errors from version control operations.
#[derive(Error, Debug)]
pub enum GitError {
    /// Failed to execute a command at all.
    #[error("failed to run {program}: {source}")]
    Exec {
        /// Program that could not be spawned.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// `git` returned a non-zero exit code.
    #[error("git {command} failed: {stderr}")]
    Command {
        /// The git subcommand that failed (e.g., "push").
        command: String,
        /// Captured stderr.
        stderr: String,
    },

    /// The bump command exited non-zero.
    #[error("`{command}` failed: {stderr}")]
    BumpFailed {
        /// The interpolated command line.
        command: String,
        /// Captured stderr.
        stderr: String,
    },

    /// The bump command succeeded but printed no tag.
    #[error("`{0}` did not print the new tag")]
    NoTag(String),

    /// Not inside a git repository.
    #[error("not a git repository (or any parent up to mount point)")]
    NotARepo,
}

/// Result alias for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// The version control operations the publish workflow needs.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Bump the version, commit and tag. Returns the new tag.
    async fn bump_and_tag(&self, directive: &BumpDirective) -> GitResult<String>;

    /// Stage and commit `paths` (if any), then push the current branch.
    ///
    /// Never force-pushes the branch.
    async fn commit_and_push(&self, paths: &[Utf8PathBuf], message: &str) -> GitResult<()>;

    /// Force-push `tag` to `origin`.
    async fn push_tag(&self, tag: &str) -> GitResult<()>;
}

/// [`Vcs`] backed by the `git` binary and a shell bump command.
#[derive(Debug, Clone)]
pub struct GitVcs {
    root: Utf8PathBuf,
    bump_command: String,
}

impl GitVcs {
    /// Operate on the repository at `root` with the default npm bump command.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            bump_command: DEFAULT_BUMP_COMMAND.to_string(),
        }
    }

    /// Replace the bump command template.
    #[must_use]
    pub fn with_bump_command(mut self, template: impl Into<String>) -> Self {
        self.bump_command = template.into();
        self
    }

    /// Repository root.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Run a git command in the repository and return its stdout.
    async fn git(&self, args: &[&str]) -> GitResult<String> {
        debug!(?args, "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(self.root.as_std_path())
            .output()
            .await
            .map_err(|source| GitError::Exec {
                program: "git".into(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

            if stderr.contains("not a git repository") {
                return Err(GitError::NotARepo);
            }

            Err(GitError::Command {
                command: args.first().unwrap_or(&"").to_string(),
                stderr,
            })
        }
    }
}

#[async_trait]
impl Vcs for GitVcs {
    #[instrument(skip(self), fields(root = %self.root))]
    async fn bump_and_tag(&self, directive: &BumpDirective) -> GitResult<String> {
        let command = interpolate(&self.bump_command, directive);
        debug!(%command, "running bump command");

        let output = Command::new("sh")
            .args(["-c", &command])
            .current_dir(self.root.as_std_path())
            .output()
            .await
            .map_err(|source| GitError::Exec {
                program: "sh".into(),
                source,
            })?;

        if !output.status.success() {
            return Err(GitError::BumpFailed {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let tag = parse_tag(&stdout).ok_or_else(|| GitError::NoTag(command.clone()))?;
        info!(%tag, "version bumped");
        Ok(tag)
    }

    #[instrument(skip(self), fields(root = %self.root))]
    async fn commit_and_push(&self, paths: &[Utf8PathBuf], message: &str) -> GitResult<()> {
        if !paths.is_empty() {
            let mut add = vec!["add", "--"];
            add.extend(paths.iter().map(|p| p.as_str()));
            self.git(&add).await?;
            self.git(&["commit", "-m", message]).await?;
        }
        self.git(&["push", "origin", "HEAD"]).await?;
        info!("pushed branch");
        Ok(())
    }

    #[instrument(skip(self), fields(root = %self.root))]
    async fn push_tag(&self, tag: &str) -> GitResult<()> {
        self.git(&["push", "-f", "origin", "HEAD", tag]).await?;
        info!(%tag, "pushed tag");
        Ok(())
    }
}

/// Substitute `{bump}` in the command template.
fn interpolate(template: &str, directive: &BumpDirective) -> String {
    template.replace("{bump}", &directive.to_string())
}

/// The tag is the last non-empty line the bump command prints.
fn parse_tag(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .map(str::to_string)
}
