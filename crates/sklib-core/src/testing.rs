//! In-memory collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use camino::{Utf8Path, Utf8PathBuf};
use reqwest::Method;
use semver::Version;
use serde_json::json;
use url::Url;

use crate::auth::{AuthResult, AuthSession, AuthToken, CredentialStore};
use crate::git::{GitResult, Vcs};
use crate::github::{
    Account, ApiError, Asset, AssetUpload, ContentUpdate, FileContents, HostingPlatform,
    NewPullRequest, NewRelease, Permissions, PlatformError, PlatformResult, PullRequest, Release,
    Repository, RequestSummary,
};
use crate::manifest::{ProjectConfig, RepoId};
use crate::version::BumpDirective;

pub const LOGIN: &str = "jane";
pub const REGISTRY: &str = "thierryc/sketch-libraries-directory";
pub const FORK: &str = "jane/sketch-libraries-directory";

/// The project most tests publish.
pub fn project() -> ProjectConfig {
    ProjectConfig {
        name: "material-icons".into(),
        title: "Material Icons".into(),
        version: "1.2.0".into(),
        description: Some("Icons for Sketch".into()),
        repository: RepoId::new("acme", "icons"),
        main: Some(Utf8PathBuf::from("icons.sketch")),
        appcast: Some(Utf8PathBuf::from(".appcast.xml")),
        homepage: "https://github.com/acme/icons".into(),
        author: None,
        is_private: false,
        scripts: Default::default(),
    }
}

/// A session that skipped validation.
pub fn session() -> AuthSession {
    AuthSession::unchecked(AuthToken::new("test-token"), LOGIN)
}

// ──────────────────────────────────────────────
// Credentials
// ──────────────────────────────────────────────

/// A credential store holding a fixed token (or none).
pub struct StaticCredentials(pub Option<&'static str>);

#[async_trait]
impl CredentialStore for StaticCredentials {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn token(&self) -> AuthResult<Option<AuthToken>> {
        Ok(self.0.map(AuthToken::new))
    }
}

// ──────────────────────────────────────────────
// VCS
// ──────────────────────────────────────────────

/// A VCS that predicts the bump with npm semantics and records calls.
pub struct FakeVcs {
    version: Mutex<Version>,
    calls: Mutex<Vec<String>>,
    fail_bump: bool,
}

impl FakeVcs {
    pub fn at(version: &str) -> Self {
        Self {
            version: Mutex::new(Version::parse(version).unwrap()),
            calls: Mutex::new(Vec::new()),
            fail_bump: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_bump: true,
            ..Self::at("0.0.0")
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn bump_and_tag(&self, directive: &BumpDirective) -> GitResult<String> {
        self.calls.lock().unwrap().push(format!("bump {directive}"));
        if self.fail_bump {
            return Err(crate::git::GitError::BumpFailed {
                command: format!("npm version {directive}"),
                stderr: "npm ERR! Git working directory not clean.".into(),
            });
        }
        let mut version = self.version.lock().unwrap();
        *version = directive.apply(&version);
        Ok(format!("v{version}"))
    }

    async fn commit_and_push(&self, paths: &[Utf8PathBuf], message: &str) -> GitResult<()> {
        let paths: Vec<_> = paths.iter().map(|p| p.as_str()).collect();
        self.calls
            .lock()
            .unwrap()
            .push(format!("commit_and_push [{}] {message}", paths.join(",")));
        Ok(())
    }

    async fn push_tag(&self, tag: &str) -> GitResult<()> {
        self.calls.lock().unwrap().push(format!("push_tag {tag}"));
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Platform
// ──────────────────────────────────────────────

#[derive(Default)]
struct State {
    calls: Vec<String>,
    failures: HashMap<&'static str, VecDeque<u16>>,
    no_push: bool,
    next_id: u64,
    releases: Vec<Release>,
    branches: HashMap<(String, String), String>,
    files: HashMap<(String, String, String), String>,
    pulls: Vec<NewPullRequest>,
}

/// An in-memory hosting platform.
///
/// Registry state lives under [`REGISTRY`] (upstream) and [`FORK`] (the
/// caller's fork). Blob SHAs are derived from branch tips, so moving a
/// branch invalidates the old blob.
pub struct FakePlatform {
    state: Mutex<State>,
}

impl FakePlatform {
    pub fn new() -> Self {
        let platform = Self {
            state: Mutex::new(State {
                next_id: 1,
                ..State::default()
            }),
        };
        platform.seed_registry(&json!([]), "base", "base");
        platform
    }

    /// Reset the registry listing and the fork/upstream default-branch tips.
    pub fn seed_registry(&self, listing: &serde_json::Value, fork_sha: &str, upstream_sha: &str) {
        let mut state = self.state.lock().unwrap();
        let listing = serde_json::to_string_pretty(listing).unwrap();
        state.files.insert(
            (REGISTRY.into(), "master".into(), "libraries.json".into()),
            listing.clone(),
        );
        state.files.insert(
            (FORK.into(), "master".into(), "libraries.json".into()),
            listing,
        );
        state
            .branches
            .insert((REGISTRY.into(), "master".into()), upstream_sha.into());
        state
            .branches
            .insert((FORK.into(), "master".into()), fork_sha.into());
    }

    pub fn set_push_permission(&self, push: bool) {
        self.state.lock().unwrap().no_push = !push;
    }

    /// Make the next call to `op` fail with `status`.
    pub fn fail_next(&self, op: &'static str, status: u16) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(op)
            .or_default()
            .push_back(status);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn release(&self, tag: &str) -> Option<Release> {
        self.state
            .lock()
            .unwrap()
            .releases
            .iter()
            .find(|r| r.tag_name == tag)
            .cloned()
    }

    pub fn branch_sha(&self, repo: &str, branch: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .branches
            .get(&(repo.to_string(), branch.to_string()))
            .cloned()
    }

    pub fn file(&self, repo: &str, branch: &str, path: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(&(repo.to_string(), branch.to_string(), path.to_string()))
            .cloned()
    }

    pub fn pull_requests(&self) -> Vec<NewPullRequest> {
        self.state.lock().unwrap().pulls.clone()
    }

    /// Record the call and pop a scripted failure, if any.
    fn enter(&self, op: &'static str, detail: String) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        let line = if detail.is_empty() {
            op.to_string()
        } else {
            format!("{op} {detail}")
        };
        state.calls.push(line);
        match state.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(status) => Err(api_error(status, "scripted failure")),
            None => Ok(()),
        }
    }
}

fn api_error(status: u16, message: &str) -> PlatformError {
    let url = Url::parse("https://api.github.test/").unwrap();
    ApiError::from_raw(
        status,
        &json!({ "message": message }).to_string(),
        RequestSummary::new(&Method::GET, &url, None),
    )
    .into()
}

fn blob_sha(tip: &str) -> String {
    format!("blob-{tip}")
}

#[async_trait]
impl HostingPlatform for FakePlatform {
    async fn get_user(&self, _token: &AuthToken) -> PlatformResult<Account> {
        self.enter("get_user", String::new())?;
        Ok(Account {
            login: LOGIN.into(),
        })
    }

    async fn get_repo(&self, _token: &AuthToken, repo: &RepoId) -> PlatformResult<Repository> {
        self.enter("get_repo", repo.to_string())?;
        let push = !self.state.lock().unwrap().no_push;
        Ok(Repository {
            name: repo.name.clone(),
            owner: Account {
                login: repo.owner.clone(),
            },
            default_branch: Some("main".into()),
            permissions: Some(Permissions {
                push,
                pull: true,
                ..Permissions::default()
            }),
            html_url: Some(format!("https://github.com/{repo}")),
        })
    }

    async fn create_release(
        &self,
        _token: &AuthToken,
        repo: &RepoId,
        release: &NewRelease,
    ) -> PlatformResult<Release> {
        self.enter("create_release", format!("{repo} {}", release.tag_name))?;
        let mut state = self.state.lock().unwrap();
        if state.releases.iter().any(|r| r.tag_name == release.tag_name) {
            let url = Url::parse("https://api.github.test/").unwrap();
            return Err(ApiError::from_raw(
                422,
                r#"{"message":"Validation Failed","errors":[{"resource":"Release","code":"already_exists","field":"tag_name"}]}"#,
                RequestSummary::new(&Method::POST, &url, None),
            )
            .into());
        }
        let id = state.next_id;
        state.next_id += 1;
        let created = Release {
            id,
            tag_name: release.tag_name.clone(),
            draft: release.draft,
            html_url: Some(format!(
                "https://github.com/{repo}/releases/tag/{}",
                release.tag_name
            )),
        };
        state.releases.push(created.clone());
        Ok(created)
    }

    async fn upload_asset(
        &self,
        _token: &AuthToken,
        repo: &RepoId,
        _release_id: u64,
        upload: AssetUpload,
    ) -> PlatformResult<Asset> {
        self.enter(
            "upload_asset",
            format!("{repo} {} {}", upload.name, upload.size),
        )?;
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        Ok(Asset {
            id,
            name: upload.name,
            size: upload.size,
            browser_download_url: None,
        })
    }

    async fn set_release_draft(
        &self,
        _token: &AuthToken,
        repo: &RepoId,
        release_id: u64,
        draft: bool,
    ) -> PlatformResult<Release> {
        self.enter("set_release_draft", format!("{repo} {draft}"))?;
        let mut state = self.state.lock().unwrap();
        let release = state
            .releases
            .iter_mut()
            .find(|r| r.id == release_id)
            .ok_or_else(|| api_error(404, "Not Found"))?;
        release.draft = draft;
        Ok(release.clone())
    }

    async fn get_contents(
        &self,
        _token: &AuthToken,
        repo: &RepoId,
        path: &str,
        git_ref: Option<&str>,
    ) -> PlatformResult<FileContents> {
        self.enter(
            "get_contents",
            format!("{repo} {path} {}", git_ref.unwrap_or("-")),
        )?;
        let state = self.state.lock().unwrap();
        let branch = git_ref.unwrap_or("master").to_string();
        let repo = repo.to_string();
        let tip = state
            .branches
            .get(&(repo.clone(), branch.clone()))
            .ok_or_else(|| api_error(404, "No commit found for the ref"))?;
        // New branches see the listing of the branch they were cut from.
        let content = state
            .files
            .get(&(repo.clone(), branch, path.to_string()))
            .or_else(|| state.files.get(&(repo, "master".into(), path.to_string())))
            .ok_or_else(|| api_error(404, "Not Found"))?;
        Ok(FileContents {
            sha: blob_sha(tip),
            content: BASE64.encode(content),
        })
    }

    async fn put_contents(
        &self,
        _token: &AuthToken,
        repo: &RepoId,
        update: &ContentUpdate,
    ) -> PlatformResult<()> {
        self.enter("put_contents", format!("{repo} {} {}", update.path, update.branch))?;
        let mut state = self.state.lock().unwrap();
        let key = (repo.to_string(), update.branch.clone());
        let tip = state
            .branches
            .get(&key)
            .cloned()
            .ok_or_else(|| api_error(404, "Branch not found"))?;
        if update.sha != blob_sha(&tip) {
            return Err(api_error(409, "sha does not match"));
        }
        let bytes = BASE64.decode(&update.content).unwrap();
        state.files.insert(
            (key.0.clone(), key.1.clone(), update.path.clone()),
            String::from_utf8(bytes).unwrap(),
        );
        state.branches.insert(key, format!("{tip}+commit"));
        Ok(())
    }

    async fn create_fork(&self, _token: &AuthToken, repo: &RepoId) -> PlatformResult<Repository> {
        self.enter("create_fork", repo.to_string())?;
        Ok(Repository {
            name: repo.name.clone(),
            owner: Account {
                login: LOGIN.into(),
            },
            default_branch: Some("master".into()),
            permissions: None,
            html_url: None,
        })
    }

    async fn get_branch_sha(
        &self,
        _token: &AuthToken,
        repo: &RepoId,
        branch: &str,
    ) -> PlatformResult<String> {
        self.enter("get_branch_sha", format!("{repo} {branch}"))?;
        self.branch_sha(&repo.to_string(), branch)
            .ok_or_else(|| api_error(404, "Not Found"))
    }

    async fn update_branch(
        &self,
        _token: &AuthToken,
        repo: &RepoId,
        branch: &str,
        sha: &str,
        _force: bool,
    ) -> PlatformResult<()> {
        self.enter("update_branch", format!("{repo} {branch} {sha}"))?;
        self.state
            .lock()
            .unwrap()
            .branches
            .insert((repo.to_string(), branch.to_string()), sha.to_string());
        Ok(())
    }

    async fn create_branch(
        &self,
        _token: &AuthToken,
        repo: &RepoId,
        branch: &str,
        sha: &str,
    ) -> PlatformResult<()> {
        self.enter("create_branch", format!("{repo} {branch} {sha}"))?;
        let mut state = self.state.lock().unwrap();
        let key = (repo.to_string(), branch.to_string());
        if state.branches.contains_key(&key) {
            return Err(api_error(422, "Reference already exists"));
        }
        state.branches.insert(key, sha.to_string());
        Ok(())
    }

    async fn delete_branch(
        &self,
        _token: &AuthToken,
        repo: &RepoId,
        branch: &str,
    ) -> PlatformResult<()> {
        self.enter("delete_branch", format!("{repo} {branch}"))?;
        let mut state = self.state.lock().unwrap();
        let key = (repo.to_string(), branch.to_string());
        if state.branches.remove(&key).is_none() {
            return Err(api_error(422, "Reference does not exist"));
        }
        state
            .files
            .retain(|(r, b, _), _| !(r == &key.0 && b == &key.1));
        Ok(())
    }

    async fn create_pull_request(
        &self,
        _token: &AuthToken,
        repo: &RepoId,
        pull: &NewPullRequest,
    ) -> PlatformResult<PullRequest> {
        self.enter("create_pull_request", format!("{repo} {}", pull.head))?;
        let mut state = self.state.lock().unwrap();
        state.pulls.push(pull.clone());
        let number = state.pulls.len() as u64;
        Ok(PullRequest {
            number,
            html_url: format!("https://github.com/{repo}/pull/{number}"),
        })
    }
}

/// Write `bytes` at `root/rel`, creating parents.
pub fn write_file(root: &Utf8Path, rel: &str, bytes: &[u8]) -> Utf8PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, bytes).unwrap();
    path
}
