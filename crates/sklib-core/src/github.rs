//! GitHub REST client.
//!
//! [`HostingPlatform`] is the narrow surface the publish workflow needs from
//! the hosting platform. [`GitHubClient`] implements it over `reqwest`.
//!
//! Every non-2xx response becomes an [`ApiError`] carrying the status, the
//! parsed response body and a summary of the request with the credential
//! redacted.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};
use url::Url;

use crate::auth::AuthToken;
use crate::config::GithubConfig;
use crate::manifest::RepoId;

const USER_AGENT: &str = concat!("sklib-release-agent/", env!("CARGO_PKG_VERSION"));
const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";
const REDACTED: &str = "**********";

// ──────────────────────────────────────────────
// Errors
// ──────────────────────────────────────────────

/// The request as it is reported inside an [`ApiError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestSummary {
    /// HTTP method.
    pub method: String,
    /// Full request URL.
    pub url: String,
    /// Request headers, with the credential redacted.
    pub headers: BTreeMap<String, String>,
    /// JSON body, or `"<binary>"` for uploads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl RequestSummary {
    /// Describe a request. Authorization is always redacted.
    pub fn new(method: &Method, url: &Url, body: Option<Value>) -> Self {
        let headers = BTreeMap::from([
            ("accept".to_string(), GITHUB_ACCEPT.to_string()),
            ("authorization".to_string(), format!("Bearer {REDACTED}")),
            ("user-agent".to_string(), USER_AGENT.to_string()),
        ]);
        Self {
            method: method.to_string(),
            url: url.to_string(),
            headers,
            body,
        }
    }

    fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }
}

/// A non-2xx response from the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiError {
    /// HTTP status code.
    #[serde(rename = "statusCode")]
    pub status: u16,
    /// Parsed response body; `{"response": "<raw>"}` when not JSON.
    pub body: Value,
    /// The request that produced it.
    pub request: RequestSummary,
}

impl ApiError {
    /// Build from a status and the raw response text.
    pub fn from_raw(status: u16, raw: &str, request: RequestSummary) -> Self {
        let body = serde_json::from_str(raw).unwrap_or_else(|_| json!({ "response": raw }));
        Self {
            status,
            body,
            request,
        }
    }

    /// The platform's human message, if it sent one.
    pub fn message(&self) -> Option<&str> {
        self.body.get("message").and_then(Value::as_str)
    }

    /// Whether any validation error in the body has the given `code`.
    pub fn has_error_code(&self, code: &str) -> bool {
        self.body
            .get("errors")
            .and_then(Value::as_array)
            .is_some_and(|errors| {
                errors
                    .iter()
                    .any(|e| e.get("code").and_then(Value::as_str) == Some(code))
            })
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string_pretty(self) {
            Ok(pretty) => f.write_str(&pretty),
            Err(_) => write!(f, "{} {} returned {}", self.request.method, self.request.url, self.status),
        }
    }
}

impl std::error::Error for ApiError {}

/// Errors from talking to the hosting platform.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// The platform answered with a non-2xx status.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The request never got a response.
    #[error("request to {url} failed: {source}")]
    Transport {
        /// Target URL.
        url: String,
        /// Underlying transport error.
        source: reqwest::Error,
    },

    /// The response body was not what we expected.
    #[error("unexpected response from {url}: {message}")]
    Decode {
        /// Source URL.
        url: String,
        /// Decoder message.
        message: String,
    },

    /// A configured base URL is unusable.
    #[error("invalid platform URL: {0}")]
    Url(#[from] url::ParseError),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
}

impl PlatformError {
    /// HTTP status, when the platform answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(api) => Some(api.status),
            _ => None,
        }
    }

    /// The underlying [`ApiError`], when the platform answered.
    pub fn api(&self) -> Option<&ApiError> {
        match self {
            Self::Api(api) => Some(api),
            _ => None,
        }
    }
}

/// Result alias for platform operations.
pub type PlatformResult<T> = Result<T, PlatformError>;

// ──────────────────────────────────────────────
// Wire types
// ──────────────────────────────────────────────

/// A user or organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Login name.
    pub login: String,
}

/// The caller's permissions on a repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Permissions {
    /// Admin rights.
    pub admin: bool,
    /// Write access.
    pub push: bool,
    /// Read access.
    pub pull: bool,
}

/// A repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Repository name.
    pub name: String,
    /// Owner account.
    pub owner: Account,
    /// Default branch, when reported.
    #[serde(default)]
    pub default_branch: Option<String>,
    /// Caller permissions, present for authenticated requests.
    #[serde(default)]
    pub permissions: Option<Permissions>,
    /// Web URL.
    #[serde(default)]
    pub html_url: Option<String>,
}

impl Repository {
    /// `owner/name` of this repository.
    pub fn id(&self) -> RepoId {
        RepoId::new(&self.owner.login, &self.name)
    }
}

/// Body of `POST /repos/{repo}/releases`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewRelease {
    /// Tag the release points at.
    pub tag_name: String,
    /// Display name.
    pub name: String,
    /// Create as draft.
    pub draft: bool,
}

/// A release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Release id.
    pub id: u64,
    /// Tag name.
    pub tag_name: String,
    /// Draft flag.
    #[serde(default)]
    pub draft: bool,
    /// Web URL.
    #[serde(default)]
    pub html_url: Option<String>,
}

/// An uploaded release asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Asset id.
    pub id: u64,
    /// File name.
    pub name: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Public download URL.
    #[serde(default)]
    pub browser_download_url: Option<String>,
}

/// A binary to attach to a release.
#[derive(Debug)]
pub struct AssetUpload {
    /// File name shown in the release.
    pub name: String,
    /// Label shown in the release.
    pub label: String,
    /// Exact byte length, sent as `Content-Length`.
    pub size: u64,
    /// Open handle to stream from.
    pub file: tokio::fs::File,
}

/// A file as returned by the contents API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContents {
    /// Blob SHA, required for updates.
    pub sha: String,
    /// Base64 content, possibly wrapped across lines.
    #[serde(default)]
    pub content: String,
}

/// A commit identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Committer {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
}

/// Body of `PUT /repos/{repo}/contents/{path}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentUpdate {
    /// File path in the repository.
    pub path: String,
    /// Commit message.
    pub message: String,
    /// Committer identity.
    pub committer: Committer,
    /// Blob SHA being replaced.
    pub sha: String,
    /// New content, base64.
    pub content: String,
    /// Target branch.
    pub branch: String,
}

/// Body of `POST /repos/{repo}/pulls`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPullRequest {
    /// Title.
    pub title: String,
    /// `owner:branch` of the changes.
    pub head: String,
    /// Branch to merge into.
    pub base: String,
    /// Markdown body.
    pub body: String,
    /// Let maintainers push to the head branch.
    pub maintainer_can_modify: bool,
}

/// An opened pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// PR number.
    pub number: u64,
    /// Web URL.
    pub html_url: String,
}

#[derive(Debug, Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Debug, Deserialize)]
struct GitObject {
    sha: String,
}

// ──────────────────────────────────────────────
// Platform trait
// ──────────────────────────────────────────────

/// The hosting-platform operations the publish workflow consumes.
///
/// Every call takes the token explicitly; the platform holds no credentials.
#[async_trait]
pub trait HostingPlatform: Send + Sync {
    /// `GET /user`
    async fn get_user(&self, token: &AuthToken) -> PlatformResult<Account>;

    /// `GET /repos/{repo}`
    async fn get_repo(&self, token: &AuthToken, repo: &RepoId) -> PlatformResult<Repository>;

    /// `POST /repos/{repo}/releases`
    async fn create_release(
        &self,
        token: &AuthToken,
        repo: &RepoId,
        release: &NewRelease,
    ) -> PlatformResult<Release>;

    /// `POST {uploads}/repos/{repo}/releases/{id}/assets`
    async fn upload_asset(
        &self,
        token: &AuthToken,
        repo: &RepoId,
        release_id: u64,
        upload: AssetUpload,
    ) -> PlatformResult<Asset>;

    /// `PATCH /repos/{repo}/releases/{id}` with `{draft}`
    async fn set_release_draft(
        &self,
        token: &AuthToken,
        repo: &RepoId,
        release_id: u64,
        draft: bool,
    ) -> PlatformResult<Release>;

    /// `GET /repos/{repo}/contents/{path}[?ref=]`
    async fn get_contents(
        &self,
        token: &AuthToken,
        repo: &RepoId,
        path: &str,
        git_ref: Option<&str>,
    ) -> PlatformResult<FileContents>;

    /// `PUT /repos/{repo}/contents/{path}`
    async fn put_contents(
        &self,
        token: &AuthToken,
        repo: &RepoId,
        update: &ContentUpdate,
    ) -> PlatformResult<()>;

    /// `POST /repos/{repo}/forks`; returns the (possibly pre-existing) fork.
    async fn create_fork(&self, token: &AuthToken, repo: &RepoId) -> PlatformResult<Repository>;

    /// `GET /repos/{repo}/git/ref/heads/{branch}`; returns the tip SHA.
    async fn get_branch_sha(
        &self,
        token: &AuthToken,
        repo: &RepoId,
        branch: &str,
    ) -> PlatformResult<String>;

    /// `PATCH /repos/{repo}/git/refs/heads/{branch}`
    async fn update_branch(
        &self,
        token: &AuthToken,
        repo: &RepoId,
        branch: &str,
        sha: &str,
        force: bool,
    ) -> PlatformResult<()>;

    /// `POST /repos/{repo}/git/refs`
    async fn create_branch(
        &self,
        token: &AuthToken,
        repo: &RepoId,
        branch: &str,
        sha: &str,
    ) -> PlatformResult<()>;

    /// `DELETE /repos/{repo}/git/refs/heads/{branch}`
    async fn delete_branch(
        &self,
        token: &AuthToken,
        repo: &RepoId,
        branch: &str,
    ) -> PlatformResult<()>;

    /// `POST /repos/{repo}/pulls`
    async fn create_pull_request(
        &self,
        token: &AuthToken,
        repo: &RepoId,
        pull: &NewPullRequest,
    ) -> PlatformResult<PullRequest>;
}

// ──────────────────────────────────────────────
// reqwest implementation
// ──────────────────────────────────────────────

/// [`HostingPlatform`] over the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: Client,
    api_url: String,
    uploads_url: String,
}

impl GitHubClient {
    /// Build a client for the configured API and uploads hosts.
    pub fn new(config: &GithubConfig) -> PlatformResult<Self> {
        // Validate both bases up front so later URL building cannot surprise.
        Url::parse(&config.api_url)?;
        Url::parse(&config.uploads_url)?;

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(PlatformError::Client)?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            uploads_url: config.uploads_url.trim_end_matches('/').to_string(),
        })
    }

    fn api(&self, path: &str) -> PlatformResult<Url> {
        Ok(Url::parse(&format!("{}/{path}", self.api_url))?)
    }

    /// Send a JSON request and fail on non-2xx.
    async fn execute(
        &self,
        token: &AuthToken,
        method: Method,
        url: Url,
        body: Option<Value>,
    ) -> PlatformResult<Response> {
        debug!(%method, %url, "github request");

        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .header(ACCEPT, GITHUB_ACCEPT)
            .bearer_auth(token.secret());
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|source| PlatformError::Transport {
            url: url.to_string(),
            source,
        })?;

        check(response, || RequestSummary::new(&method, &url, body)).await
    }

    async fn json<T: DeserializeOwned>(
        &self,
        token: &AuthToken,
        method: Method,
        url: Url,
        body: Option<Value>,
    ) -> PlatformResult<T> {
        let response = self.execute(token, method, url, body).await?;
        decode(response).await
    }
}

/// Turn a non-2xx response into an [`ApiError`].
async fn check(
    response: Response,
    summary: impl FnOnce() -> RequestSummary,
) -> PlatformResult<Response> {
    let status = response.status();
    debug!(status = status.as_u16(), "github response");
    if status.is_success() {
        return Ok(response);
    }
    let raw = response.text().await.unwrap_or_default();
    Err(ApiError::from_raw(status.as_u16(), &raw, summary()).into())
}

async fn decode<T: DeserializeOwned>(response: Response) -> PlatformResult<T> {
    let url = response.url().to_string();
    let bytes = response
        .bytes()
        .await
        .map_err(|source| PlatformError::Transport {
            url: url.clone(),
            source,
        })?;
    serde_json::from_slice(&bytes).map_err(|e| PlatformError::Decode {
        url,
        message: e.to_string(),
    })
}

#[async_trait]
impl HostingPlatform for GitHubClient {
    #[instrument(skip_all)]
    async fn get_user(&self, token: &AuthToken) -> PlatformResult<Account> {
        self.json(token, Method::GET, self.api("user")?, None).await
    }

    #[instrument(skip_all, fields(%repo))]
    async fn get_repo(&self, token: &AuthToken, repo: &RepoId) -> PlatformResult<Repository> {
        self.json(token, Method::GET, self.api(&format!("repos/{repo}"))?, None)
            .await
    }

    #[instrument(skip_all, fields(%repo))]
    async fn create_release(
        &self,
        token: &AuthToken,
        repo: &RepoId,
        release: &NewRelease,
    ) -> PlatformResult<Release> {
        let body = serde_json::to_value(release).map_err(|e| PlatformError::Decode {
            url: format!("repos/{repo}/releases"),
            message: e.to_string(),
        })?;
        self.json(
            token,
            Method::POST,
            self.api(&format!("repos/{repo}/releases"))?,
            Some(body),
        )
        .await
    }

    #[instrument(skip_all, fields(%repo, name = %upload.name, size = upload.size))]
    async fn upload_asset(
        &self,
        token: &AuthToken,
        repo: &RepoId,
        release_id: u64,
        upload: AssetUpload,
    ) -> PlatformResult<Asset> {
        let mut url = Url::parse(&format!(
            "{}/repos/{repo}/releases/{release_id}/assets",
            self.uploads_url
        ))?;
        url.query_pairs_mut()
            .append_pair("name", &upload.name)
            .append_pair("label", &upload.label);
        debug!(%url, "uploading asset");

        let body = reqwest::Body::wrap_stream(ReaderStream::new(upload.file));
        let response = self
            .http
            .post(url.clone())
            .header(ACCEPT, GITHUB_ACCEPT)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, upload.size)
            .bearer_auth(token.secret())
            .body(body)
            .send()
            .await
            .map_err(|source| PlatformError::Transport {
                url: url.to_string(),
                source,
            })?;

        let size = upload.size;
        let response = check(response, || {
            RequestSummary::new(&Method::POST, &url, Some(json!("<binary>")))
                .with_header("content-type", "application/octet-stream")
                .with_header("content-length", size.to_string())
        })
        .await?;
        decode(response).await
    }

    #[instrument(skip_all, fields(%repo))]
    async fn set_release_draft(
        &self,
        token: &AuthToken,
        repo: &RepoId,
        release_id: u64,
        draft: bool,
    ) -> PlatformResult<Release> {
        self.json(
            token,
            Method::PATCH,
            self.api(&format!("repos/{repo}/releases/{release_id}"))?,
            Some(json!({ "draft": draft })),
        )
        .await
    }

    #[instrument(skip_all, fields(%repo))]
    async fn get_contents(
        &self,
        token: &AuthToken,
        repo: &RepoId,
        path: &str,
        git_ref: Option<&str>,
    ) -> PlatformResult<FileContents> {
        let mut url = self.api(&format!("repos/{repo}/contents/{path}"))?;
        if let Some(git_ref) = git_ref {
            url.query_pairs_mut().append_pair("ref", git_ref);
        }
        self.json(token, Method::GET, url, None).await
    }

    #[instrument(skip_all, fields(%repo, path = %update.path, branch = %update.branch))]
    async fn put_contents(
        &self,
        token: &AuthToken,
        repo: &RepoId,
        update: &ContentUpdate,
    ) -> PlatformResult<()> {
        let url = self.api(&format!("repos/{repo}/contents/{}", update.path))?;
        let body = serde_json::to_value(update).map_err(|e| PlatformError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        self.execute(token, Method::PUT, url, Some(body)).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(%repo))]
    async fn create_fork(&self, token: &AuthToken, repo: &RepoId) -> PlatformResult<Repository> {
        self.json(
            token,
            Method::POST,
            self.api(&format!("repos/{repo}/forks"))?,
            None,
        )
        .await
    }

    #[instrument(skip_all, fields(%repo))]
    async fn get_branch_sha(
        &self,
        token: &AuthToken,
        repo: &RepoId,
        branch: &str,
    ) -> PlatformResult<String> {
        let git_ref: GitRef = self
            .json(
                token,
                Method::GET,
                self.api(&format!("repos/{repo}/git/ref/heads/{branch}"))?,
                None,
            )
            .await?;
        Ok(git_ref.object.sha)
    }

    #[instrument(skip_all, fields(%repo))]
    async fn update_branch(
        &self,
        token: &AuthToken,
        repo: &RepoId,
        branch: &str,
        sha: &str,
        force: bool,
    ) -> PlatformResult<()> {
        self.execute(
            token,
            Method::PATCH,
            self.api(&format!("repos/{repo}/git/refs/heads/{branch}"))?,
            Some(json!({ "sha": sha, "force": force })),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(%repo))]
    async fn create_branch(
        &self,
        token: &AuthToken,
        repo: &RepoId,
        branch: &str,
        sha: &str,
    ) -> PlatformResult<()> {
        self.execute(
            token,
            Method::POST,
            self.api(&format!("repos/{repo}/git/refs"))?,
            Some(json!({ "ref": format!("refs/heads/{branch}"), "sha": sha })),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(%repo))]
    async fn delete_branch(
        &self,
        token: &AuthToken,
        repo: &RepoId,
        branch: &str,
    ) -> PlatformResult<()> {
        self.execute(
            token,
            Method::DELETE,
            self.api(&format!("repos/{repo}/git/refs/heads/{branch}"))?,
            None,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(%repo, head = %pull.head))]
    async fn create_pull_request(
        &self,
        token: &AuthToken,
        repo: &RepoId,
        pull: &NewPullRequest,
    ) -> PlatformResult<PullRequest> {
        let url = self.api(&format!("repos/{repo}/pulls"))?;
        let body = serde_json::to_value(pull).map_err(|e| PlatformError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        self.json(token, Method::POST, url, Some(body)).await
    }
}
