//! Authorization token lookup and validation.
//!
//! A token comes from the `GITHUB_ACCESS_TOKEN` environment variable when
//! set, otherwise from a [`CredentialStore`]. Storing tokens is the store's
//! business; this module only reads them.
//!
//! An [`AuthSession`] is a token that has been checked against the
//! project repository once. The orchestrator owns it and lends it to the
//! steps that talk to the platform.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::github::{HostingPlatform, Permissions, PlatformError};
use crate::manifest::RepoId;

/// Environment variable that supplies the token directly.
pub const TOKEN_ENV: &str = "GITHUB_ACCESS_TOKEN";

/// Errors from token lookup and validation.
#[derive(Error, Debug)]
pub enum AuthError {
    /// No token in the environment or the credential store.
    #[error(
        "no GitHub token found; set {TOKEN_ENV} or run `gh auth login` (the token needs the `repo` scope to create releases)"
    )]
    NotLoggedIn,

    /// The platform could not be reached to validate the token.
    #[error("could not reach GitHub to validate the token: {0}")]
    Unreachable(#[source] PlatformError),

    /// The platform refused the token or does not know the repository.
    #[error("the repository {repo} doesn't exist or the GitHub token is invalid")]
    Rejected {
        /// Repository the token was checked against.
        repo: RepoId,
        /// Platform response.
        #[source]
        source: PlatformError,
    },

    /// The token works but cannot push to the repository.
    #[error("missing the \"push\" permission on {repo}; got {permissions:?}")]
    MissingPushPermission {
        /// Repository the token was checked against.
        repo: RepoId,
        /// Permissions the platform reported.
        permissions: Permissions,
    },

    /// The credential store itself failed.
    #[error("credential store `{store}` failed: {message}")]
    Store {
        /// Store name.
        store: &'static str,
        /// Failure details.
        message: String,
    },
}

/// Result alias for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// An opaque bearer token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a raw token.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw token, for the `Authorization` header only.
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(**********)")
    }
}

/// Where a token came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum TokenSource {
    /// [`TOKEN_ENV`].
    Environment,
    /// A named [`CredentialStore`].
    Store(&'static str),
}

impl fmt::Display for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Environment => f.write_str(TOKEN_ENV),
            Self::Store(name) => f.write_str(name),
        }
    }
}

// ──────────────────────────────────────────────
// Credential stores
// ──────────────────────────────────────────────

/// Somewhere a token may already be saved.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Short name for diagnostics.
    fn name(&self) -> &'static str;

    /// The stored token, or `None` when nothing is stored.
    async fn token(&self) -> AuthResult<Option<AuthToken>>;
}

/// Reads the token the GitHub CLI has stored (`gh auth token`).
#[derive(Debug, Clone, Copy, Default)]
pub struct GhCliCredentials;

#[async_trait]
impl CredentialStore for GhCliCredentials {
    fn name(&self) -> &'static str {
        "gh"
    }

    #[instrument(skip_all)]
    async fn token(&self) -> AuthResult<Option<AuthToken>> {
        if which::which("gh").is_err() {
            debug!("gh not installed");
            return Ok(None);
        }

        let output = Command::new("gh")
            .args(["auth", "token"])
            .output()
            .await
            .map_err(|e| AuthError::Store {
                store: self.name(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            debug!("gh has no stored token");
            return Ok(None);
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!token.is_empty()).then(|| AuthToken::new(token)))
    }
}

/// Find a token: `env_token` (the value of [`TOKEN_ENV`]) first, then `store`.
#[instrument(skip_all, fields(store = store.name()))]
pub async fn find_token(
    env_token: Option<&str>,
    store: &dyn CredentialStore,
) -> AuthResult<(AuthToken, TokenSource)> {
    if let Some(raw) = env_token.map(str::trim).filter(|t| !t.is_empty()) {
        debug!("using token from environment");
        return Ok((AuthToken::new(raw), TokenSource::Environment));
    }

    match store.token().await? {
        Some(token) => {
            debug!("using token from credential store");
            Ok((token, TokenSource::Store(store.name())))
        }
        None => Err(AuthError::NotLoggedIn),
    }
}

// ──────────────────────────────────────────────
// Session
// ──────────────────────────────────────────────

/// A token validated against the project repository.
#[derive(Debug, Clone)]
pub struct AuthSession {
    token: AuthToken,
    source: TokenSource,
    login: Option<String>,
}

impl AuthSession {
    /// Check that `token` can push to `repo`.
    ///
    /// The caller's login is looked up for display; failing that lookup is
    /// not fatal.
    #[instrument(skip_all, fields(%repo, %source))]
    pub async fn establish<P: HostingPlatform + ?Sized>(
        platform: &P,
        repo: &RepoId,
        token: AuthToken,
        source: TokenSource,
    ) -> AuthResult<Self> {
        let repository = platform.get_repo(&token, repo).await.map_err(|err| match err {
            PlatformError::Transport { .. } => AuthError::Unreachable(err),
            other => AuthError::Rejected {
                repo: repo.clone(),
                source: other,
            },
        })?;

        let permissions = repository.permissions.unwrap_or_default();
        if !permissions.push {
            return Err(AuthError::MissingPushPermission {
                repo: repo.clone(),
                permissions,
            });
        }

        let login = match platform.get_user(&token).await {
            Ok(user) => Some(user.login),
            Err(err) => {
                warn!(error = %err, "could not look up the authenticated user");
                None
            }
        };

        info!(login = ?login, "token validated");
        Ok(Self {
            token,
            source,
            login,
        })
    }

    #[cfg(test)]
    pub(crate) fn unchecked(token: AuthToken, login: &str) -> Self {
        Self {
            token,
            source: TokenSource::Environment,
            login: Some(login.to_string()),
        }
    }

    /// The validated token.
    pub fn token(&self) -> &AuthToken {
        &self.token
    }

    /// Where the token came from.
    pub fn source(&self) -> &TokenSource {
        &self.source
    }

    /// The authenticated account, if known.
    pub fn login(&self) -> Option<&str> {
        self.login.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePlatform, StaticCredentials};

    #[test]
    fn token_debug_is_redacted() {
        let token = AuthToken::new("ghp_secret");
        assert_eq!(format!("{token:?}"), "AuthToken(**********)");
        assert_eq!(token.secret(), "ghp_secret");
    }

    #[tokio::test]
    async fn environment_beats_store() {
        let store = StaticCredentials(Some("from-store"));
        let (token, source) = find_token(Some("from-env"), &store).await.unwrap();
        assert_eq!(token.secret(), "from-env");
        assert_eq!(source, TokenSource::Environment);
    }

    #[tokio::test]
    async fn blank_environment_falls_through() {
        let store = StaticCredentials(Some("from-store"));
        let (token, source) = find_token(Some("  "), &store).await.unwrap();
        assert_eq!(token.secret(), "from-store");
        assert_eq!(source, TokenSource::Store("static"));
    }

    #[tokio::test]
    async fn nothing_anywhere_is_not_logged_in() {
        let store = StaticCredentials(None);
        let err = find_token(None, &store).await.unwrap_err();
        assert!(matches!(err, AuthError::NotLoggedIn));
    }

    #[tokio::test]
    async fn session_requires_push() {
        let platform = FakePlatform::new();
        platform.set_push_permission(false);
        let repo = RepoId::new("acme", "icons");

        let err = AuthSession::establish(
            &platform,
            &repo,
            AuthToken::new("t"),
            TokenSource::Environment,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::MissingPushPermission { .. }));
    }

    #[tokio::test]
    async fn session_rejected_on_api_error() {
        let platform = FakePlatform::new();
        platform.fail_next("get_repo", 404);
        let repo = RepoId::new("acme", "icons");

        let err = AuthSession::establish(
            &platform,
            &repo,
            AuthToken::new("t"),
            TokenSource::Environment,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::Rejected { .. }));
    }

    #[tokio::test]
    async fn session_records_login() {
        let platform = FakePlatform::new();
        let repo = RepoId::new("acme", "icons");

        let session = AuthSession::establish(
            &platform,
            &repo,
            AuthToken::new("t"),
            TokenSource::Store("gh"),
        )
        .await
        .unwrap();
        assert_eq!(session.login(), Some("jane"));
        assert_eq!(session.source(), &TokenSource::Store("gh"));
        assert_eq!(platform.calls(), vec!["get_repo acme/icons", "get_user"]);
    }
}
