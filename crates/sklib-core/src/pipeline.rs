//! Publish context: the accumulator for the publish workflow.
//!
//! Each step records what it did into a [`PublishContext`]. It ends up in
//! the [`PublishOutcome`](crate::publish::PublishOutcome) for `--json`
//! output, and when a run fails part-way the partial context tells the user
//! how far the remote side got.
//!
//! Version fields are `String` so the JSON stays free of semver-aware types.

use serde::Serialize;

use crate::manifest::ProjectConfig;
use crate::registry::ContributionOutcome;
use crate::release::PublishedRelease;

/// The publish accumulator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishContext {
    // ── Project ──
    /// Package name.
    pub name: String,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Version recorded in the manifest before the bump.
    pub previous_version: String,

    // ── Bump ──
    /// Tag created by the bump (e.g. `"v1.2.1"`).
    pub tag: Option<String>,
    /// The tag without its `v` prefix.
    pub version: Option<String>,

    // ── Appcast ──
    /// Appcast file that was rewritten, relative to the project root.
    pub appcast_path: Option<String>,
    /// Download URL written into the new appcast entry.
    pub download_url: Option<String>,
    /// Number of entries in the rewritten appcast.
    pub appcast_entries: usize,

    // ── Git ──
    /// Whether the branch and tag reached the remote.
    pub pushed: bool,

    // ── Release ──
    /// npm script that built the artifact.
    pub build_script: Option<String>,
    /// Platform id of the published release.
    pub release_id: Option<u64>,
    /// Web page of the published release.
    pub release_url: Option<String>,
    /// Uploaded asset name.
    pub asset: Option<String>,

    // ── Registry ──
    /// What happened with the registry.
    pub registry: Option<ContributionOutcome>,
}

impl PublishContext {
    /// Start a context for `project`.
    pub fn new(project: &ProjectConfig) -> Self {
        Self {
            name: project.name.clone(),
            owner: project.repository.owner.clone(),
            repo: project.repository.name.clone(),
            previous_version: project.version.clone(),
            ..Self::default()
        }
    }

    /// Record the tag produced by the bump.
    pub fn record_tag(&mut self, tag: &str) {
        self.tag = Some(tag.to_string());
        self.version = Some(crate::version::version_from_tag(tag).to_string());
    }

    /// Record the appcast rewrite.
    pub fn record_appcast(&mut self, path: &str, download_url: &str, entries: usize) {
        self.appcast_path = Some(path.to_string());
        self.download_url = Some(download_url.to_string());
        self.appcast_entries = entries;
    }

    /// Record a successful push of branch and tag.
    pub fn record_push(&mut self) {
        self.pushed = true;
    }

    /// Record which build script ran.
    pub fn record_build(&mut self, script: &str) {
        self.build_script = Some(script.to_string());
    }

    /// Record the published release.
    pub fn record_release(&mut self, release: &PublishedRelease) {
        self.release_id = Some(release.id);
        self.release_url = release.html_url.clone();
        self.asset = Some(release.asset.name.clone());
    }

    /// Record the registry result.
    pub fn record_registry(&mut self, outcome: ContributionOutcome) {
        self.registry = Some(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::Asset;
    use crate::testing::project;

    #[test]
    fn new_context_is_seeded_from_project() {
        let ctx = PublishContext::new(&project());
        assert_eq!(ctx.name, "material-icons");
        assert_eq!(ctx.owner, "acme");
        assert_eq!(ctx.repo, "icons");
        assert_eq!(ctx.previous_version, "1.2.0");
        assert!(ctx.tag.is_none());
        assert!(!ctx.pushed);
    }

    #[test]
    fn record_tag_strips_prefix() {
        let mut ctx = PublishContext::new(&project());
        ctx.record_tag("v1.2.1");
        assert_eq!(ctx.tag.as_deref(), Some("v1.2.1"));
        assert_eq!(ctx.version.as_deref(), Some("1.2.1"));
    }

    #[test]
    fn record_release_keeps_url_and_asset() {
        let mut ctx = PublishContext::new(&project());
        ctx.record_release(&PublishedRelease {
            id: 7,
            tag: "v1.2.1".into(),
            html_url: Some("https://github.com/acme/icons/releases/tag/v1.2.1".into()),
            asset: Asset {
                id: 1,
                name: "icons.sketch".into(),
                size: 3,
                browser_download_url: None,
            },
        });
        assert_eq!(ctx.release_id, Some(7));
        assert_eq!(ctx.asset.as_deref(), Some("icons.sketch"));
    }

    #[test]
    fn context_serializes_registry_status() {
        let mut ctx = PublishContext::new(&project());
        ctx.record_registry(ContributionOutcome::Declined);
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["registry"]["status"], "declined");
    }
}
