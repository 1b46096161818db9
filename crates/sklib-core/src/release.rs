//! Release creation on the hosting platform.
//!
//! A release moves through three states, each a distinct type:
//!
//! ```text
//! DraftRelease ──upload_asset──▶ UploadedRelease ──publish──▶ PublishedRelease
//! ```
//!
//! Each transition consumes the previous state, so a release cannot be
//! published without an asset or uploaded to twice. Nothing is rolled back
//! on failure; a draft left behind stays a draft.

use camino::Utf8Path;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::auth::AuthSession;
use crate::github::{Asset, AssetUpload, HostingPlatform, NewRelease, PlatformError, Release};
use crate::manifest::RepoId;

/// The local artifact cannot be uploaded.
///
/// Raised before any network call is made.
#[derive(Error, Debug)]
pub enum AssetError {
    /// The file is missing or cannot be read.
    #[error("cannot read release asset {path}: {source}")]
    Unreadable {
        /// Artifact path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The path exists but is not a regular file.
    #[error("release asset {0} is not a file")]
    NotAFile(String),
}

/// Errors from the release state machine.
#[derive(Error, Debug)]
pub enum ReleaseError {
    /// The tag already has a release.
    #[error("a release for {tag} already exists on {repo}")]
    AlreadyExists {
        /// Project repository.
        repo: RepoId,
        /// Tag that collided.
        tag: String,
        /// Platform response.
        #[source]
        source: PlatformError,
    },

    /// Creating the draft failed.
    #[error("failed to create the draft release: {0}")]
    Create(#[source] PlatformError),

    /// Nothing to upload.
    #[error(transparent)]
    Asset(#[from] AssetError),

    /// The platform rejected the upload.
    #[error("failed to upload the release asset: {0}")]
    Upload(#[source] PlatformError),

    /// Undrafting failed.
    #[error("failed to publish the release: {0}")]
    Publish(#[source] PlatformError),
}

/// Result alias for release operations.
pub type ReleaseResult<T> = Result<T, ReleaseError>;

/// A release that exists but is not yet visible.
#[derive(Debug, Clone)]
pub struct DraftRelease {
    release: Release,
}

impl DraftRelease {
    /// Platform id.
    pub fn id(&self) -> u64 {
        self.release.id
    }
}

/// A draft with its artifact attached.
#[derive(Debug, Clone)]
pub struct UploadedRelease {
    release: Release,
    asset: Asset,
}

impl UploadedRelease {
    /// Platform id.
    pub fn id(&self) -> u64 {
        self.release.id
    }

    /// The attached artifact.
    pub fn asset(&self) -> &Asset {
        &self.asset
    }
}

/// A public release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedRelease {
    /// Platform id.
    pub id: u64,
    /// Tag the release points at.
    pub tag: String,
    /// Web page of the release.
    pub html_url: Option<String>,
    /// The attached artifact.
    pub asset: Asset,
}

/// Drives one release through its states.
pub struct ReleaseManager<'a, P: ?Sized> {
    platform: &'a P,
    session: &'a AuthSession,
    repo: &'a RepoId,
}

impl<'a, P: HostingPlatform + ?Sized> ReleaseManager<'a, P> {
    /// Manage releases of `repo` with a validated session.
    pub fn new(platform: &'a P, session: &'a AuthSession, repo: &'a RepoId) -> Self {
        Self {
            platform,
            session,
            repo,
        }
    }

    /// Create a draft release for `tag`.
    #[instrument(skip(self), fields(repo = %self.repo))]
    pub async fn create_draft(&self, tag: &str) -> ReleaseResult<DraftRelease> {
        let request = NewRelease {
            tag_name: tag.to_string(),
            name: tag.to_string(),
            draft: true,
        };

        let release = self
            .platform
            .create_release(self.session.token(), self.repo, &request)
            .await
            .map_err(|err| {
                let exists = err
                    .api()
                    .is_some_and(|api| api.status == 422 && api.has_error_code("already_exists"));
                if exists {
                    ReleaseError::AlreadyExists {
                        repo: self.repo.clone(),
                        tag: tag.to_string(),
                        source: err,
                    }
                } else {
                    ReleaseError::Create(err)
                }
            })?;

        info!(id = release.id, "draft release created");
        Ok(DraftRelease { release })
    }

    /// Stream the artifact at `path` into the draft.
    ///
    /// The file is checked before any request is made.
    #[instrument(skip(self, draft), fields(repo = %self.repo, release = draft.id()))]
    pub async fn upload_asset(
        &self,
        draft: DraftRelease,
        path: &Utf8Path,
    ) -> ReleaseResult<UploadedRelease> {
        let unreadable = |source| AssetError::Unreadable {
            path: path.to_string(),
            source,
        };

        let metadata = tokio::fs::metadata(path).await.map_err(unreadable)?;
        if !metadata.is_file() {
            return Err(AssetError::NotAFile(path.to_string()).into());
        }
        let file = tokio::fs::File::open(path).await.map_err(unreadable)?;

        let name = path.file_name().unwrap_or(path.as_str()).to_string();
        debug!(%name, size = metadata.len(), "asset ready");

        let upload = AssetUpload {
            label: name.clone(),
            name,
            size: metadata.len(),
            file,
        };

        let asset = self
            .platform
            .upload_asset(self.session.token(), self.repo, draft.release.id, upload)
            .await
            .map_err(ReleaseError::Upload)?;

        info!(asset = asset.id, "asset uploaded");
        Ok(UploadedRelease {
            release: draft.release,
            asset,
        })
    }

    /// Make the release public.
    #[instrument(skip(self, uploaded), fields(repo = %self.repo, release = uploaded.id()))]
    pub async fn publish(&self, uploaded: UploadedRelease) -> ReleaseResult<PublishedRelease> {
        let release = self
            .platform
            .set_release_draft(self.session.token(), self.repo, uploaded.release.id, false)
            .await
            .map_err(ReleaseError::Publish)?;

        info!(id = release.id, "release published");
        Ok(PublishedRelease {
            id: release.id,
            tag: release.tag_name,
            html_url: release.html_url,
            asset: uploaded.asset,
        })
    }
}
