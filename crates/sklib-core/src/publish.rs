//! Publish orchestrator.
//!
//! Sequences the publish workflow for one project:
//!
//! 1. **Validate**: flags and project fields, before anything is touched
//! 2. **Authenticate**: resolve and check the token (only when a release or
//!    registry step will run)
//! 3. **Bump**: version bump, commit and tag
//! 4. **Appcast**: prepend the new release to the feed file
//! 5. **Push**: commit the feed, push the branch and force-push the tag
//! 6. **Build**: first of the `prepublish`/`prepare`/`build` npm scripts
//! 7. **Release**: draft, upload, publish
//! 8. **Registry**: propose the library to the shared registry
//!
//! Every step completes or stops the run. Nothing is rolled back; a
//! [`PublishFailure`] carries the [`PublishContext`] so the caller can see
//! what already happened remotely.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::appcast::{self, AppcastEntry, AppcastError};
use crate::auth::{self, AuthError, AuthSession, CredentialStore};
use crate::config::Config;
use crate::error::ConfigError;
use crate::git::{GitError, Vcs};
use crate::github::HostingPlatform;
use crate::hooks::{self, BuildError, BuildScript};
use crate::manifest::ProjectConfig;
use crate::pipeline::PublishContext;
use crate::registry::{
    Confirmation, ContributionOutcome, ExistenceCheck, RegistryContributor, RegistryError,
};
use crate::release::{ReleaseError, ReleaseManager};
use crate::version::{self, BumpDirective};

/// Commit message for the appcast update.
pub const APPCAST_COMMIT_MESSAGE: &str = "Update .appcast with new tag :sparkles:";

/// Question asked before contributing to the registry.
pub const REGISTRY_QUESTION: &str =
    "The library is not on the libraries registry yet. Do you wish to add it?";

// ──────────────────────────────────────────────
// Errors
// ──────────────────────────────────────────────

/// Errors from the publish workflow.
#[derive(Error, Debug)]
pub enum PublishError {
    /// Flags or project fields are unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Version bump, commit or push failed.
    #[error(transparent)]
    Vcs(#[from] GitError),

    /// The rewritten feed could not be serialized.
    #[error(transparent)]
    Appcast(#[from] AppcastError),

    /// The rewritten feed could not be written.
    #[error("failed to write appcast {path}: {source}")]
    AppcastWrite {
        /// Feed path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The build script failed.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// No usable token.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Release creation failed.
    #[error(transparent)]
    Release(#[from] ReleaseError),

    /// Registry contribution failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Result alias for publish operations.
pub type PublishResult<T> = Result<T, PublishError>;

/// A run that stopped at `step`.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct PublishFailure {
    /// The step that failed.
    pub step: PublishStep,
    /// What went wrong.
    pub error: PublishError,
    /// What had been done before the failure.
    pub context: Box<PublishContext>,
}

// ──────────────────────────────────────────────
// Options
// ──────────────────────────────────────────────

/// Options controlling which steps run.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// The version bump.
    pub bump: BumpDirective,
    /// Do not create a release (requires `download_url`).
    pub skip_release: bool,
    /// Do not contribute to the registry.
    pub skip_registry: bool,
    /// Download URL written into the appcast instead of the release URL.
    pub download_url: Option<String>,
    /// Value of [`auth::TOKEN_ENV`], if set.
    pub env_token: Option<String>,
}

impl PublishOptions {
    /// Options that run every step.
    pub fn new(bump: BumpDirective) -> Self {
        Self {
            bump,
            skip_release: false,
            skip_registry: false,
            download_url: None,
            env_token: None,
        }
    }
}

// ──────────────────────────────────────────────
// Steps and events
// ──────────────────────────────────────────────

/// Steps of the publish workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStep {
    /// Check flags and project fields.
    Validate,
    /// Resolve and check the token.
    Authenticate,
    /// Bump the version and tag.
    Bump,
    /// Rewrite the appcast.
    Appcast,
    /// Push branch and tag.
    Push,
    /// Run the build script.
    Build,
    /// Create the release.
    Release,
    /// Contribute to the registry.
    Registry,
}

impl std::fmt::Display for PublishStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validate => write!(f, "validate"),
            Self::Authenticate => write!(f, "authenticate"),
            Self::Bump => write!(f, "bump"),
            Self::Appcast => write!(f, "appcast"),
            Self::Push => write!(f, "push"),
            Self::Build => write!(f, "build"),
            Self::Release => write!(f, "release"),
            Self::Registry => write!(f, "registry"),
        }
    }
}

impl PublishStep {
    /// Status line shown while the step runs.
    pub const fn status(self) -> &'static str {
        match self {
            Self::Validate => "Checking the project",
            Self::Authenticate => "Checking the GitHub token",
            Self::Bump => "Bumping package.json version and creating git tag",
            Self::Appcast => "Updating the appcast file",
            Self::Push => "Pushing the changes to GitHub",
            Self::Build => "Building the library",
            Self::Release => "Creating the release on GitHub",
            Self::Registry => "Checking the libraries registry",
        }
    }
}

/// Events emitted during the run for progress reporting.
#[derive(Debug, Clone)]
pub enum PublishEvent {
    /// A step has started.
    StepStarted(PublishStep),
    /// A sub-task of the running step.
    Progress(String),
    /// A step has completed.
    StepCompleted(PublishStep, StepOutcome),
    /// A step has failed; the run stops.
    StepFailed(PublishStep),
}

/// Outcome of a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StepOutcome {
    /// Step completed successfully.
    Success {
        /// Description of what happened.
        message: String,
    },
    /// Step was skipped.
    Skipped {
        /// Why the step was skipped.
        reason: String,
    },
}

impl StepOutcome {
    fn success(message: impl Into<String>) -> Self {
        Self::Success {
            message: message.into(),
        }
    }

    fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }
}

/// Outcome of a complete run.
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    /// Package name.
    pub name: String,
    /// The published version.
    pub version: String,
    /// The git tag.
    pub tag: String,
    /// Results of each step.
    pub steps: Vec<(PublishStep, StepOutcome)>,
    /// Everything recorded along the way.
    pub context: PublishContext,
}

impl PublishOutcome {
    /// The `name@version` success line.
    pub fn summary(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// Web page of the release, when one was created.
    pub fn release_url(&self) -> Option<&str> {
        self.context.release_url.as_deref()
    }
}

/// Download URL of the release asset for `tag`.
pub fn default_download_url(project: &ProjectConfig, tag: &str) -> Result<String, ConfigError> {
    Ok(format!(
        "https://github.com/{}/releases/download/{tag}/{}",
        project.repository,
        project.artifact_file_name()?
    ))
}

// ──────────────────────────────────────────────
// Execute
// ──────────────────────────────────────────────

struct Tracker<'e> {
    on_event: &'e mut dyn FnMut(PublishEvent),
    current: PublishStep,
    steps: Vec<(PublishStep, StepOutcome)>,
}

impl Tracker<'_> {
    fn start(&mut self, step: PublishStep) {
        self.current = step;
        (self.on_event)(PublishEvent::StepStarted(step));
    }

    fn progress(&mut self, message: impl Into<String>) {
        (self.on_event)(PublishEvent::Progress(message.into()));
    }

    fn complete(&mut self, outcome: StepOutcome) {
        (self.on_event)(PublishEvent::StepCompleted(self.current, outcome.clone()));
        self.steps.push((self.current, outcome));
    }

    fn skip(&mut self, step: PublishStep, reason: &str) {
        self.start(step);
        self.complete(StepOutcome::skipped(reason));
    }
}

/// Everything one run needs.
pub struct Publisher<'a, V: ?Sized, P: ?Sized> {
    /// Project root; relative paths resolve against it.
    pub project_root: &'a Utf8Path,
    /// The resolved project.
    pub project: &'a ProjectConfig,
    /// Tool configuration.
    pub config: &'a Config,
    /// Version control.
    pub vcs: &'a V,
    /// Hosting platform.
    pub platform: &'a P,
    /// Fallback token source.
    pub credentials: &'a dyn CredentialStore,
    /// Registry confirmation.
    pub confirmation: &'a dyn Confirmation,
}

impl<V, P> Publisher<'_, V, P>
where
    V: Vcs + ?Sized,
    P: HostingPlatform + ?Sized,
{
    /// Run the workflow.
    ///
    /// Calls `on_event` at step boundaries so the CLI can update progress
    /// display.
    #[instrument(skip_all, fields(project = %self.project.name, bump = %options.bump))]
    pub async fn run(
        &self,
        options: &PublishOptions,
        mut on_event: impl FnMut(PublishEvent),
    ) -> Result<PublishOutcome, PublishFailure> {
        let mut ctx = PublishContext::new(self.project);
        let mut tracker = Tracker {
            on_event: &mut on_event,
            current: PublishStep::Validate,
            steps: Vec::new(),
        };

        match self.execute(options, &mut ctx, &mut tracker).await {
            Ok(tag) => {
                let version = version::version_from_tag(&tag).to_string();
                info!(%tag, "publish complete");
                Ok(PublishOutcome {
                    name: self.project.name.clone(),
                    version,
                    tag,
                    steps: tracker.steps,
                    context: ctx,
                })
            }
            Err(error) => {
                let step = tracker.current;
                (tracker.on_event)(PublishEvent::StepFailed(step));
                Err(PublishFailure {
                    step,
                    error,
                    context: Box::new(ctx),
                })
            }
        }
    }

    async fn execute(
        &self,
        options: &PublishOptions,
        ctx: &mut PublishContext,
        tracker: &mut Tracker<'_>,
    ) -> PublishResult<String> {
        let project = self.project;

        // ── Validate ──
        tracker.start(PublishStep::Validate);
        self.validate(options)?;
        tracker.complete(StepOutcome::success(format!(
            "{} ({})",
            project.name, project.repository
        )));

        // ── Authenticate ──
        let wants_registry = !options.skip_registry && !project.is_private;
        let session = if !options.skip_release || wants_registry {
            tracker.start(PublishStep::Authenticate);
            tracker.progress(format!("Checking if `{}` is accessible", project.repository));
            let (token, source) =
                auth::find_token(options.env_token.as_deref(), self.credentials).await?;
            let session =
                AuthSession::establish(self.platform, &project.repository, token, source).await?;
            tracker.complete(StepOutcome::success(match session.login() {
                Some(login) => format!("authenticated as {login} via {}", session.source()),
                None => format!("authenticated via {}", session.source()),
            }));
            Some(session)
        } else {
            tracker.skip(PublishStep::Authenticate, "no release or registry step");
            None
        };

        // ── Bump ──
        tracker.start(PublishStep::Bump);
        let expected = version::parse_version(&project.version)
            .ok()
            .map(|current| options.bump.apply(&current).to_string());
        if let Some(expected) = &expected {
            tracker.progress(format!("Bumping {} to {expected}", project.version));
        }
        let tag = self.vcs.bump_and_tag(&options.bump).await?;
        if let Some(expected) = expected.filter(|v| v != version::version_from_tag(&tag)) {
            warn!(%expected, %tag, "bump produced a different version than predicted");
        }
        ctx.record_tag(&tag);
        tracker.complete(StepOutcome::success(format!(
            "{} → {tag}",
            project.version
        )));

        // ── Appcast ──
        let mut changed = Vec::new();
        match &project.appcast {
            Some(appcast) => {
                tracker.start(PublishStep::Appcast);
                let download_url = match &options.download_url {
                    Some(url) => url.clone(),
                    None => default_download_url(project, &tag)?,
                };
                let entries = self.write_appcast(appcast, &tag, &download_url).await?;
                ctx.record_appcast(appcast.as_str(), &download_url, entries);
                changed.push(appcast.clone());
                tracker.complete(StepOutcome::success(format!(
                    "{appcast} now lists {entries} release(s)"
                )));
            }
            None => tracker.skip(PublishStep::Appcast, "appcast disabled"),
        }

        // ── Push ──
        tracker.start(PublishStep::Push);
        self.vcs
            .commit_and_push(&changed, APPCAST_COMMIT_MESSAGE)
            .await?;
        self.vcs.push_tag(&tag).await?;
        ctx.record_push();
        tracker.complete(StepOutcome::success(format!("pushed HEAD and {tag}")));

        // ── Build + Release ──
        if options.skip_release {
            tracker.skip(PublishStep::Build, "--skip-release flag");
            tracker.skip(PublishStep::Release, "--skip-release flag");
        } else {
            let session = session.as_ref().ok_or(AuthError::NotLoggedIn)?;

            tracker.start(PublishStep::Build);
            let outcome = match BuildScript::select(&project.scripts) {
                Some(script) => {
                    tracker.progress(format!("npm run {} ({})", script.name, script.command));
                    let output = hooks::run_build_script(&script, self.project_root).await?;
                    ctx.record_build(&output.script);
                    StepOutcome::success(format!(
                        "npm run {} ({:.1?})",
                        output.script, output.duration
                    ))
                }
                None => StepOutcome::skipped("no prepublish, prepare or build script"),
            };
            tracker.complete(outcome);

            tracker.start(PublishStep::Release);
            let manager = ReleaseManager::new(self.platform, session, &project.repository);
            tracker.progress("Creating a draft release");
            let draft = manager.create_draft(&tag).await?;
            let artifact = self.project_root.join(project.main_artifact()?);
            tracker.progress(format!("Uploading {}", project.artifact_file_name()?));
            let uploaded = manager.upload_asset(draft, &artifact).await?;
            tracker.progress("Publishing the release");
            let published = manager.publish(uploaded).await?;
            ctx.record_release(&published);
            tracker.complete(StepOutcome::success(format!(
                "published {tag} with {}",
                published.asset.name
            )));
        }

        // ── Registry ──
        if options.skip_registry {
            tracker.skip(PublishStep::Registry, "--skip-registry flag");
        } else if project.is_private {
            tracker.skip(PublishStep::Registry, "private library");
        } else {
            let session = session.as_ref().ok_or(AuthError::NotLoggedIn)?;
            tracker.start(PublishStep::Registry);
            let contributor =
                RegistryContributor::new(self.platform, session.token(), &self.config.registry)?;
            let outcome = match contributor.check(project).await? {
                ExistenceCheck::Listed { title } => ContributionOutcome::AlreadyListed { title },
                ExistenceCheck::Missing(snapshot) => {
                    if self.confirmation.confirm(REGISTRY_QUESTION) {
                        tracker.progress("Adding the library to the registry");
                        contributor.contribute(snapshot, project).await?
                    } else {
                        ContributionOutcome::Declined
                    }
                }
            };
            tracker.complete(match &outcome {
                ContributionOutcome::AlreadyListed { title } => {
                    StepOutcome::success(format!("already listed as {title}"))
                }
                ContributionOutcome::Declined => StepOutcome::skipped("contribution declined"),
                ContributionOutcome::Proposed { pull_request, .. } => {
                    StepOutcome::success(format!("opened {}", pull_request.html_url))
                }
            });
            ctx.record_registry(outcome);
        }

        Ok(tag)
    }

    /// Fail before any side effect when the flags cannot work together.
    fn validate(&self, options: &PublishOptions) -> PublishResult<()> {
        if options.skip_release && options.download_url.is_none() {
            return Err(ConfigError::DownloadUrlRequired.into());
        }
        if !options.skip_release {
            self.project.main_artifact()?;
        }
        if self.project.appcast.is_some() && options.download_url.is_none() {
            self.project.artifact_file_name()?;
        }
        debug!("publish options validated");
        Ok(())
    }

    /// Prepend the release to the feed at `appcast` and write it back.
    ///
    /// Returns the number of entries in the new feed.
    async fn write_appcast(
        &self,
        appcast: &Utf8Path,
        tag: &str,
        download_url: &str,
    ) -> PublishResult<usize> {
        let path = self.project_root.join(appcast);
        let existing = tokio::fs::read_to_string(&path).await.ok();
        let entry = AppcastEntry::new(download_url, version::version_from_tag(tag));
        let document = appcast::update(existing.as_deref(), &entry);
        let xml = document.to_xml()?;

        let write_err = |source| PublishError::AppcastWrite {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        tokio::fs::write(&path, xml).await.map_err(write_err)?;
        Ok(document.entries().len())
    }
}
