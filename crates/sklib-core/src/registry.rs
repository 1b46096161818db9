//! Contribution to the shared library registry.
//!
//! The registry is a repository holding one JSON listing. Adding a library
//! means proposing a change to that listing through a pull request from a
//! fork. The protocol is a straight line of typed stages, each consuming
//! the previous stage's output:
//!
//! ```text
//! check ─▶ RegistrySnapshot ─fork─▶ ForkedRegistry ─reconcile─▶ ReconciledFork
//!       ─create_branch─▶ FeatureBranch ─commit_entry─▶ CommittedEntry
//!       ─open_pull_request─▶ PullRequest
//! ```
//!
//! Nothing is retried. Deleting the stale branch is idempotent, and the
//! listing commit carries the blob SHA as an optimistic-concurrency token,
//! so a repeat either no-ops or fails loudly.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::auth::AuthToken;
use crate::config::RegistryConfig;
use crate::github::{
    Committer, ContentUpdate, HostingPlatform, NewPullRequest, PlatformError, PullRequest,
};
use crate::manifest::{DEFAULT_APPCAST, ProjectConfig, RepoId};

/// Errors from the registry contribution.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The configured registry repository is not `owner/name`.
    #[error("registry repository `{0}` is not an owner/name pair")]
    InvalidRegistry(String),

    /// The listing file could not be decoded.
    #[error("cannot read the registry listing: {0}")]
    Decode(String),

    /// The listing changed under us; the blob SHA is stale.
    #[error(
        "{path} changed on {branch} while contributing (blob {sha} is stale); run publish again to retry"
    )]
    Conflict {
        /// Listing path.
        path: String,
        /// Branch the commit targeted.
        branch: String,
        /// The stale blob SHA.
        sha: String,
        /// Platform response.
        #[source]
        source: PlatformError,
    },

    /// A platform call failed.
    #[error("{step} failed: {source}")]
    Platform {
        /// Which stage failed.
        step: &'static str,
        /// Platform response.
        #[source]
        source: PlatformError,
    },
}

/// Result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

fn platform(step: &'static str) -> impl FnOnce(PlatformError) -> RegistryError {
    move |source| RegistryError::Platform { step, source }
}

/// Asks the user whether to go ahead with a contribution.
pub trait Confirmation {
    /// `true` to proceed.
    fn confirm(&self, question: &str) -> bool;
}

/// Always answers yes (non-interactive runs).
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

impl Confirmation for AutoConfirm {
    fn confirm(&self, _question: &str) -> bool {
        true
    }
}

// ──────────────────────────────────────────────
// Listing
// ──────────────────────────────────────────────

/// One library in the registry listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Display title.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    /// One-line description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Repository name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Repository owner.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
    /// Raw URL of the library's appcast.
    #[serde(rename = "appcast", default, skip_serializing_if = "String::is_empty")]
    pub appcast_url: String,
    /// Homepage.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub homepage: String,
    /// Author name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl RegistryEntry {
    /// The entry describing `project`.
    pub fn for_project(project: &ProjectConfig) -> Self {
        let repo = &project.repository;
        let appcast = project
            .appcast
            .as_ref()
            .map_or(DEFAULT_APPCAST, |path| path.as_str());

        Self {
            title: project.title.clone(),
            description: project.description.clone(),
            name: repo.name.clone(),
            owner: repo.owner.clone(),
            appcast_url: format!(
                "https://raw.githubusercontent.com/{}/{}/HEAD/{appcast}",
                repo.owner, repo.name
            ),
            homepage: project.homepage.clone(),
            author: project.author.as_ref().map(|a| a.name().to_string()),
        }
    }
}

/// The registry listing as fetched.
///
/// Entries are kept as raw JSON so a rewrite preserves fields and key order
/// this tool does not know about.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryListing {
    entries: Vec<Value>,
}

impl RegistryListing {
    /// Decode the base64 payload of the contents API.
    pub fn decode(content: &str) -> RegistryResult<Self> {
        let compact: String = content.split_whitespace().collect();
        let bytes = BASE64
            .decode(compact)
            .map_err(|e| RegistryError::Decode(e.to_string()))?;
        Self::parse(&String::from_utf8_lossy(&bytes))
    }

    /// Parse listing JSON.
    pub fn parse(json: &str) -> RegistryResult<Self> {
        let entries: Vec<Value> =
            serde_json::from_str(json).map_err(|e| RegistryError::Decode(e.to_string()))?;
        Ok(Self { entries })
    }

    /// Number of libraries listed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the listing is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The raw entry for `project`, if listed.
    ///
    /// Only the `title` and `name` strings are compared: an entry whose
    /// other fields have an unexpected shape still counts as listed.
    pub fn find(&self, project: &ProjectConfig) -> Option<&Value> {
        self.entries.iter().find(|entry| {
            entry.get("title").and_then(Value::as_str) == Some(project.name.as_str())
                || entry.get("name").and_then(Value::as_str)
                    == Some(project.repository.name.as_str())
        })
    }

    /// A copy of this listing with `entry` appended.
    pub fn with_entry(&self, entry: &RegistryEntry) -> RegistryResult<Self> {
        let value = serde_json::to_value(entry).map_err(|e| RegistryError::Decode(e.to_string()))?;
        let mut entries = self.entries.clone();
        entries.push(value);
        Ok(Self { entries })
    }

    /// Two-space indented JSON, matching the registry's own formatting.
    pub fn to_pretty_json(&self) -> RegistryResult<String> {
        serde_json::to_string_pretty(&self.entries).map_err(|e| RegistryError::Decode(e.to_string()))
    }

    /// [`to_pretty_json`](Self::to_pretty_json), base64-encoded.
    pub fn encode(&self) -> RegistryResult<String> {
        Ok(BASE64.encode(self.to_pretty_json()?))
    }
}

// ──────────────────────────────────────────────
// Stages
// ──────────────────────────────────────────────

/// Result of the existence check.
#[derive(Debug, Clone)]
pub enum ExistenceCheck {
    /// Already in the registry; nothing to do.
    Listed {
        /// Title of the listed entry (its `name` when it has none).
        title: String,
    },
    /// Not listed; carries the listing for the contribution.
    Missing(RegistrySnapshot),
}

/// The upstream listing at the time of the check.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    /// Upstream listing.
    pub listing: RegistryListing,
}

/// The caller's fork of the registry.
#[derive(Debug, Clone)]
pub struct ForkedRegistry {
    /// Listing from the check.
    pub snapshot: RegistrySnapshot,
    /// The fork.
    pub fork: RepoId,
    /// The fork's default branch.
    pub fork_branch: String,
}

/// Fork/upstream SHAs observed during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationState {
    /// The fork.
    pub fork_repository: RepoId,
    /// Fork default-branch tip before reconciliation.
    pub origin_sha: String,
    /// Upstream default-branch tip.
    pub upstream_sha: String,
    /// Where the feature branch will start; always `upstream_sha`.
    pub branch_point: String,
}

/// A fork whose default branch matches upstream.
#[derive(Debug, Clone)]
pub struct ReconciledFork {
    /// Previous stage.
    pub forked: ForkedRegistry,
    /// Observed SHAs.
    pub state: ReconciliationState,
}

/// The contribution branch on the fork.
#[derive(Debug, Clone)]
pub struct FeatureBranch {
    /// Previous stage.
    pub reconciled: ReconciledFork,
    /// Branch name, `<owner>/<name>` of the project.
    pub name: String,
}

/// The listing change committed to the feature branch.
#[derive(Debug, Clone)]
pub struct CommittedEntry {
    /// Previous stage.
    pub branch: FeatureBranch,
    /// The entry that was added.
    pub entry: RegistryEntry,
}

/// What a contribution run ended with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContributionOutcome {
    /// Already in the registry.
    AlreadyListed {
        /// Title of the existing entry.
        title: String,
    },
    /// The user said no.
    Declined,
    /// A pull request is open.
    Proposed {
        /// The pull request.
        pull_request: PullRequest,
        /// Reconciliation details.
        reconciliation: ReconciliationState,
    },
}

/// Runs the contribution stages against one registry.
pub struct RegistryContributor<'a, P: ?Sized> {
    platform: &'a P,
    token: &'a AuthToken,
    config: &'a RegistryConfig,
    upstream: RepoId,
}

impl<'a, P: HostingPlatform + ?Sized> RegistryContributor<'a, P> {
    /// Contribute to the registry described by `config`.
    pub fn new(
        platform: &'a P,
        token: &'a AuthToken,
        config: &'a RegistryConfig,
    ) -> RegistryResult<Self> {
        let upstream = RepoId::parse(&config.repository)
            .ok_or_else(|| RegistryError::InvalidRegistry(config.repository.clone()))?;
        Ok(Self {
            platform,
            token,
            config,
            upstream,
        })
    }

    /// The registry repository.
    pub fn upstream(&self) -> &RepoId {
        &self.upstream
    }

    /// Stage 1: is the project already listed?
    #[instrument(skip_all, fields(registry = %self.upstream, project = %project.repository))]
    pub async fn check(&self, project: &ProjectConfig) -> RegistryResult<ExistenceCheck> {
        let contents = self
            .platform
            .get_contents(self.token, &self.upstream, &self.config.file, None)
            .await
            .map_err(platform("fetching the registry listing"))?;
        let listing = RegistryListing::decode(&contents.content)?;
        debug!(libraries = listing.len(), "registry listing fetched");

        Ok(match listing.find(project) {
            Some(entry) => {
                let title = ["title", "name"]
                    .iter()
                    .find_map(|key| entry.get(key).and_then(Value::as_str))
                    .unwrap_or(project.name.as_str())
                    .to_string();
                info!(%title, "library already listed");
                ExistenceCheck::Listed { title }
            }
            None => ExistenceCheck::Missing(RegistrySnapshot { listing }),
        })
    }

    /// Stage 3: fork the registry (the platform returns an existing fork as-is).
    #[instrument(skip_all, fields(registry = %self.upstream))]
    pub async fn fork(&self, snapshot: RegistrySnapshot) -> RegistryResult<ForkedRegistry> {
        let fork = self
            .platform
            .create_fork(self.token, &self.upstream)
            .await
            .map_err(platform("forking the registry"))?;

        let fork_branch = fork
            .default_branch
            .clone()
            .unwrap_or_else(|| self.config.branch.clone());
        info!(fork = %fork.id(), "registry forked");

        Ok(ForkedRegistry {
            snapshot,
            fork: fork.id(),
            fork_branch,
        })
    }

    /// Stage 4: drop any stale contribution branch and bring the fork's
    /// default branch level with upstream.
    #[instrument(skip_all, fields(fork = %forked.fork, %branch))]
    pub async fn reconcile(
        &self,
        forked: ForkedRegistry,
        branch: &str,
    ) -> RegistryResult<ReconciledFork> {
        match self
            .platform
            .delete_branch(self.token, &forked.fork, branch)
            .await
        {
            Ok(()) => debug!("deleted stale contribution branch"),
            Err(err) if matches!(err.status(), Some(404 | 422)) => {
                debug!("no stale contribution branch");
            }
            Err(err) => return Err(platform("deleting the stale branch")(err)),
        }

        let (origin_sha, upstream_sha) = tokio::try_join!(
            self.platform
                .get_branch_sha(self.token, &forked.fork, &forked.fork_branch),
            self.platform
                .get_branch_sha(self.token, &self.upstream, &self.config.branch),
        )
        .map_err(platform("reading branch tips"))?;

        if origin_sha == upstream_sha {
            debug!(sha = %upstream_sha, "fork is level with upstream");
        } else {
            info!(from = %origin_sha, to = %upstream_sha, "moving fork to upstream tip");
            self.platform
                .update_branch(
                    self.token,
                    &forked.fork,
                    &forked.fork_branch,
                    &upstream_sha,
                    true,
                )
                .await
                .map_err(platform("syncing the fork"))?;
        }

        let state = ReconciliationState {
            fork_repository: forked.fork.clone(),
            branch_point: upstream_sha.clone(),
            origin_sha,
            upstream_sha,
        };
        Ok(ReconciledFork { forked, state })
    }

    /// Stage 5: branch from the reconciled SHA.
    ///
    /// A concurrent contribution for the same project collides here.
    #[instrument(skip_all, fields(fork = %reconciled.forked.fork, %branch))]
    pub async fn create_branch(
        &self,
        reconciled: ReconciledFork,
        branch: &str,
    ) -> RegistryResult<FeatureBranch> {
        self.platform
            .create_branch(
                self.token,
                &reconciled.forked.fork,
                branch,
                &reconciled.state.branch_point,
            )
            .await
            .map_err(platform("creating the contribution branch"))?;

        Ok(FeatureBranch {
            reconciled,
            name: branch.to_string(),
        })
    }

    /// Stage 6: append `entry` to the listing on the feature branch.
    #[instrument(skip_all, fields(branch = %branch.name))]
    pub async fn commit_entry(
        &self,
        branch: FeatureBranch,
        entry: RegistryEntry,
        message: String,
    ) -> RegistryResult<CommittedEntry> {
        let fork = &branch.reconciled.forked.fork;
        let current = self
            .platform
            .get_contents(self.token, fork, &self.config.file, Some(&branch.name))
            .await
            .map_err(platform("reading the listing on the contribution branch"))?;

        let listing = branch.reconciled.forked.snapshot.listing.with_entry(&entry)?;
        let update = ContentUpdate {
            path: self.config.file.clone(),
            message,
            committer: Committer {
                name: self.config.committer_name.clone(),
                email: self.config.committer_email.clone(),
            },
            sha: current.sha.clone(),
            content: listing.encode()?,
            branch: branch.name.clone(),
        };

        self.platform
            .put_contents(self.token, fork, &update)
            .await
            .map_err(|source| {
                if source.status() == Some(409) {
                    RegistryError::Conflict {
                        path: update.path.clone(),
                        branch: update.branch.clone(),
                        sha: update.sha.clone(),
                        source,
                    }
                } else {
                    platform("committing the listing")(source)
                }
            })?;

        info!("listing committed");
        Ok(CommittedEntry { branch, entry })
    }

    /// Stage 7: propose the change upstream.
    #[instrument(skip_all, fields(branch = %committed.branch.name))]
    pub async fn open_pull_request(
        &self,
        committed: &CommittedEntry,
        title: String,
    ) -> RegistryResult<PullRequest> {
        let fork = &committed.branch.reconciled.forked.fork;
        let pull = NewPullRequest {
            title,
            head: format!("{}:{}", fork.owner, committed.branch.name),
            base: self.config.branch.clone(),
            body: pull_request_body(&committed.entry.homepage),
            maintainer_can_modify: true,
        };

        let opened = self
            .platform
            .create_pull_request(self.token, &self.upstream, &pull)
            .await
            .map_err(platform("opening the pull request"))?;
        info!(number = opened.number, url = %opened.html_url, "pull request opened");
        Ok(opened)
    }

    /// Stages 3 to 7 for a project the check found missing.
    pub async fn contribute(
        &self,
        snapshot: RegistrySnapshot,
        project: &ProjectConfig,
    ) -> RegistryResult<ContributionOutcome> {
        let branch = project.repository.to_string();
        let message = format!("Add the {branch} library");

        let forked = self.fork(snapshot).await?;
        let reconciled = self.reconcile(forked, &branch).await?;
        let reconciliation = reconciled.state.clone();
        let feature = self.create_branch(reconciled, &branch).await?;
        let committed = self
            .commit_entry(feature, RegistryEntry::for_project(project), message.clone())
            .await?;
        let pull_request = self.open_pull_request(&committed, message).await?;

        Ok(ContributionOutcome::Proposed {
            pull_request,
            reconciliation,
        })
    }
}

fn pull_request_body(homepage: &str) -> String {
    format!(
        "Hello Team :wave:\n\nThe library is [here]({homepage}) if you want to have a look.\n\nHope you are having a great day :)\n"
    )
}
