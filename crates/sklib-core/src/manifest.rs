//! Project manifest resolution.
//!
//! Reads `package.json` and folds its fields into one immutable
//! [`ProjectConfig`]. Precedence for every field, highest first:
//!
//! 1. CLI [`Overrides`]
//! 2. the nested `"sklib"` section of the manifest
//! 3. the top-level manifest field
//! 4. a built-in default
//!
//! [`resolve`] is pure; only [`load_manifest`] touches the filesystem.

use std::collections::BTreeMap;
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::{ConfigError, ConfigResult};

/// File name of the project manifest.
pub const MANIFEST_FILE: &str = "package.json";

/// Appcast location used when neither the CLI nor the manifest names one.
pub const DEFAULT_APPCAST: &str = ".appcast.xml";

// ──────────────────────────────────────────────
// Manifest model
// ──────────────────────────────────────────────

/// The subset of `package.json` that publishing cares about.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Manifest {
    /// Package name.
    pub name: Option<String>,
    /// Human readable title, used for the registry entry.
    pub title: Option<String>,
    /// Current version.
    pub version: Option<String>,
    /// One-line description.
    pub description: Option<String>,
    /// Path of the built artifact, relative to the project root.
    pub main: Option<String>,
    /// Project homepage.
    pub homepage: Option<String>,
    /// Appcast path, relative to the project root.
    pub appcast: Option<String>,
    /// Source repository.
    pub repository: Option<RepositoryField>,
    /// Author, free text or structured.
    pub author: Option<Author>,
    /// npm scripts, consulted for the pre-publish build.
    pub scripts: BTreeMap<String, String>,
    /// Library-specific overrides.
    pub sklib: LibrarySection,
}

/// The nested `"sklib"` section. Every field shadows its top-level twin.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LibrarySection {
    /// Overrides `name`.
    pub name: Option<String>,
    /// Overrides `title`.
    pub title: Option<String>,
    /// Overrides `version`.
    pub version: Option<String>,
    /// Overrides `description`.
    pub description: Option<String>,
    /// Overrides `main`.
    pub main: Option<String>,
    /// Overrides `homepage`.
    pub homepage: Option<String>,
    /// Overrides `appcast`.
    pub appcast: Option<String>,
    /// Overrides `repository`.
    pub repository: Option<RepositoryField>,
    /// Overrides `author`.
    pub author: Option<Author>,
    /// Keep this library out of the shared registry.
    pub private: Option<bool>,
}

/// `repository` is either a bare string or `{ "type": "git", "url": "…" }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RepositoryField {
    /// `"owner/name"`, `"github:owner/name"` or a URL.
    Url(String),
    /// npm's object form.
    Object {
        /// Repository URL.
        url: String,
    },
}

impl RepositoryField {
    fn url(&self) -> &str {
        match self {
            Self::Url(url) | Self::Object { url } => url,
        }
    }
}

/// `author` is either `"Name <email> (url)"` or a structured person.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Author {
    /// npm's one-line person format.
    Text(String),
    /// Structured person.
    Person {
        /// Display name.
        name: String,
        /// Contact email.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        email: Option<String>,
        /// Personal URL.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
}

impl Author {
    /// The display name, with any `<email>` or `(url)` suffix removed.
    pub fn name(&self) -> &str {
        match self {
            Self::Person { name, .. } => name.trim(),
            Self::Text(text) => text
                .split(['<', '('])
                .next()
                .unwrap_or(text)
                .trim(),
        }
    }
}

// ──────────────────────────────────────────────
// Repository identifier
// ──────────────────────────────────────────────

/// A hosting-platform repository, `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RepoId {
    /// Account or organization.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

impl RepoId {
    /// Build from parts.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse any of the repository spellings npm accepts.
    ///
    /// Handles:
    /// - `owner/name` and `github:owner/name`
    /// - `https://github.com/owner/name.git` (with optional `git+` prefix)
    /// - `git@github.com:owner/name.git`
    ///
    /// Returns `None` unless both parts are non-empty.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let input = input.strip_prefix("git+").unwrap_or(input);

        let path = if let Some(rest) = input.strip_prefix("github:") {
            rest
        } else if let Some(rest) = input.strip_prefix("git@") {
            rest.split_once(':').map(|(_, path)| path)?
        } else if let Some((_, after_scheme)) = input.split_once("://") {
            after_scheme.split_once('/').map(|(_, path)| path)?
        } else {
            input
        };

        let path = path.trim_end_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        let (owner, name) = path.split_once('/')?;

        if owner.is_empty()
            || name.is_empty()
            || name.contains('/')
            || owner.contains([':', ' '])
            || name.contains(' ')
        {
            return None;
        }

        Some(Self::new(owner, name))
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ──────────────────────────────────────────────
// Resolution
// ──────────────────────────────────────────────

/// Where the appcast step should write, if anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppcastSetting {
    /// Skip the appcast step.
    Disabled,
    /// Use this path, relative to the project root.
    Path(Utf8PathBuf),
}

impl AppcastSetting {
    /// Parse the `--appcast` flag value; the literal `false` disables the step.
    pub fn from_flag(value: &str) -> Self {
        if value == "false" {
            Self::Disabled
        } else {
            Self::Path(Utf8PathBuf::from(value))
        }
    }
}

/// Values supplied on the command line that beat the manifest.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// `--repo-url`
    pub repo_url: Option<String>,
    /// `--appcast`
    pub appcast: Option<AppcastSetting>,
}

/// The fully resolved, immutable description of the project being published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectConfig {
    /// Package name.
    pub name: String,
    /// Registry title (defaults to `name`).
    pub title: String,
    /// Version currently recorded in the manifest.
    pub version: String,
    /// One-line description.
    pub description: Option<String>,
    /// Repository on the hosting platform.
    pub repository: RepoId,
    /// Built artifact, relative to the project root.
    pub main: Option<Utf8PathBuf>,
    /// Appcast file, relative to the project root. `None` disables the step.
    pub appcast: Option<Utf8PathBuf>,
    /// Homepage (defaults to the repository page).
    pub homepage: String,
    /// Author, if declared.
    pub author: Option<Author>,
    /// Keep out of the shared registry.
    pub is_private: bool,
    /// npm scripts available to the build step.
    #[serde(skip)]
    pub scripts: BTreeMap<String, String>,
}

impl ProjectConfig {
    /// The artifact to upload, failing when the manifest names none.
    pub fn main_artifact(&self) -> ConfigResult<&Utf8Path> {
        self.main
            .as_deref()
            .ok_or(ConfigError::MissingField("main"))
    }

    /// File name of the artifact as it appears in release downloads.
    pub fn artifact_file_name(&self) -> ConfigResult<&str> {
        let main = self.main_artifact()?;
        Ok(main.file_name().unwrap_or(main.as_str()))
    }
}

/// Read and parse `package.json` from the project root.
#[instrument(fields(%project_root))]
pub fn load_manifest(project_root: &Utf8Path) -> ConfigResult<Manifest> {
    let path = project_root.join(MANIFEST_FILE);
    let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::ManifestRead {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::ManifestParse { path, source })
}

/// Merge manifest fields and CLI overrides into a [`ProjectConfig`].
pub fn resolve(manifest: &Manifest, overrides: &Overrides) -> ConfigResult<ProjectConfig> {
    let lib = &manifest.sklib;

    let repository = resolve_repository(manifest, overrides)?;

    let name = pick(&lib.name, &manifest.name).ok_or(ConfigError::MissingField("name"))?;
    let version =
        pick(&lib.version, &manifest.version).ok_or(ConfigError::MissingField("version"))?;
    let title = pick(&lib.title, &manifest.title).unwrap_or_else(|| name.clone());
    let homepage = pick(&lib.homepage, &manifest.homepage)
        .unwrap_or_else(|| format!("https://github.com/{repository}"));

    let appcast = match &overrides.appcast {
        Some(AppcastSetting::Disabled) => None,
        Some(AppcastSetting::Path(path)) => Some(normalize(path.as_str())),
        None => Some(normalize(
            pick(&lib.appcast, &manifest.appcast)
                .as_deref()
                .unwrap_or(DEFAULT_APPCAST),
        )),
    };

    let config = ProjectConfig {
        name,
        title,
        version,
        description: pick(&lib.description, &manifest.description),
        repository,
        main: pick(&lib.main, &manifest.main).map(|main| normalize(&main)),
        appcast,
        homepage,
        author: lib.author.clone().or_else(|| manifest.author.clone()),
        is_private: lib.private.unwrap_or(false),
        scripts: manifest.scripts.clone(),
    };

    debug!(
        name = %config.name,
        repository = %config.repository,
        appcast = ?config.appcast,
        "resolved project configuration"
    );
    Ok(config)
}

fn resolve_repository(manifest: &Manifest, overrides: &Overrides) -> ConfigResult<RepoId> {
    let from_override = overrides.repo_url.as_deref().map(|url| (url, RepoId::parse(url)));
    if let Some((_, Some(repo))) = from_override {
        return Ok(repo);
    }

    let from_manifest = manifest
        .sklib
        .repository
        .as_ref()
        .or(manifest.repository.as_ref())
        .and_then(|field| RepoId::parse(field.url()));

    match (from_override, from_manifest) {
        (Some((url, None)), Some(repo)) => {
            warn!(%url, fallback = %repo, "ignoring unparseable --repo-url");
            Ok(repo)
        }
        (_, Some(repo)) => Ok(repo),
        (Some((url, None)), None) => Err(ConfigError::InvalidRepository(url.to_string())),
        _ => Err(ConfigError::MissingRepository),
    }
}

fn pick(section: &Option<String>, top_level: &Option<String>) -> Option<String> {
    section.clone().or_else(|| top_level.clone())
}

/// Strip a leading `./` so paths read the same in URLs and git commands.
fn normalize(path: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(path.trim_start_matches("./"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(json: serde_json::Value) -> Manifest {
        serde_json::from_value(json).unwrap()
    }

    fn base() -> serde_json::Value {
        serde_json::json!({
            "name": "material-icons",
            "version": "1.2.0",
            "main": "dist/material-icons.sketch",
            "repository": "https://github.com/acme/material-icons.git",
        })
    }

    #[test]
    fn parse_repo_shorthand() {
        assert_eq!(
            RepoId::parse("acme/icons"),
            Some(RepoId::new("acme", "icons"))
        );
        assert_eq!(
            RepoId::parse("github:acme/icons"),
            Some(RepoId::new("acme", "icons"))
        );
    }

    #[test]
    fn parse_repo_urls() {
        for url in [
            "https://github.com/acme/icons",
            "https://github.com/acme/icons.git",
            "git+https://github.com/acme/icons.git",
            "git@github.com:acme/icons.git",
            "https://github.com/acme/icons/",
        ] {
            assert_eq!(RepoId::parse(url), Some(RepoId::new("acme", "icons")), "{url}");
        }
    }

    #[test]
    fn parse_repo_rejects_garbage() {
        assert!(RepoId::parse("").is_none());
        assert!(RepoId::parse("not-a-repo").is_none());
        assert!(RepoId::parse("https://github.com/acme").is_none());
        assert!(RepoId::parse("https://github.com/acme/icons/tree/main").is_none());
        assert!(RepoId::parse("/icons").is_none());
    }

    #[test]
    fn repo_id_displays_as_slug() {
        assert_eq!(RepoId::new("acme", "icons").to_string(), "acme/icons");
    }

    #[test]
    fn author_name_strips_contact_details() {
        let text = Author::Text("Jane Doe <jane@example.com> (https://jane.dev)".into());
        assert_eq!(text.name(), "Jane Doe");

        let person = Author::Person {
            name: "John".into(),
            email: None,
            url: None,
        };
        assert_eq!(person.name(), "John");
    }

    #[test]
    fn resolve_uses_top_level_fields_and_defaults() {
        let config = resolve(&manifest(base()), &Overrides::default()).unwrap();
        assert_eq!(config.name, "material-icons");
        assert_eq!(config.title, "material-icons");
        assert_eq!(config.version, "1.2.0");
        assert_eq!(config.repository, RepoId::new("acme", "material-icons"));
        assert_eq!(config.appcast.as_deref(), Some(Utf8Path::new(".appcast.xml")));
        assert_eq!(config.homepage, "https://github.com/acme/material-icons");
        assert!(!config.is_private);
        assert_eq!(config.artifact_file_name().unwrap(), "material-icons.sketch");
    }

    #[test]
    fn library_section_beats_top_level() {
        let mut json = base();
        json["title"] = "Top Title".into();
        json["sklib"] = serde_json::json!({
            "title": "Section Title",
            "main": "./build/icons.sketch",
            "appcast": "./feeds/appcast.xml",
            "repository": { "type": "git", "url": "git@github.com:other/icons.git" },
            "private": true,
        });

        let config = resolve(&manifest(json), &Overrides::default()).unwrap();
        assert_eq!(config.title, "Section Title");
        assert_eq!(config.main.as_deref(), Some(Utf8Path::new("build/icons.sketch")));
        assert_eq!(config.appcast.as_deref(), Some(Utf8Path::new("feeds/appcast.xml")));
        assert_eq!(config.repository, RepoId::new("other", "icons"));
        assert!(config.is_private);
    }

    #[test]
    fn overrides_beat_everything() {
        let overrides = Overrides {
            repo_url: Some("https://github.com/fork/icons".into()),
            appcast: Some(AppcastSetting::from_flag("custom.xml")),
        };
        let config = resolve(&manifest(base()), &overrides).unwrap();
        assert_eq!(config.repository, RepoId::new("fork", "icons"));
        assert_eq!(config.appcast.as_deref(), Some(Utf8Path::new("custom.xml")));
    }

    #[test]
    fn appcast_false_disables_step() {
        let overrides = Overrides {
            appcast: Some(AppcastSetting::from_flag("false")),
            ..Overrides::default()
        };
        let config = resolve(&manifest(base()), &overrides).unwrap();
        assert!(config.appcast.is_none());
    }

    #[test]
    fn unparseable_override_falls_back_to_manifest() {
        let overrides = Overrides {
            repo_url: Some("nonsense".into()),
            ..Overrides::default()
        };
        let config = resolve(&manifest(base()), &overrides).unwrap();
        assert_eq!(config.repository, RepoId::new("acme", "material-icons"));
    }

    #[test]
    fn missing_repository_fails() {
        let mut json = base();
        json.as_object_mut().unwrap().remove("repository");
        let err = resolve(&manifest(json.clone()), &Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRepository));

        let overrides = Overrides {
            repo_url: Some("nonsense".into()),
            ..Overrides::default()
        };
        let err = resolve(&manifest(json), &overrides).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRepository(url) if url == "nonsense"));
    }

    #[test]
    fn missing_name_or_version_fails() {
        let mut json = base();
        json.as_object_mut().unwrap().remove("version");
        let err = resolve(&manifest(json), &Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("version")));
    }

    #[test]
    fn missing_main_only_fails_when_asked() {
        let mut json = base();
        json.as_object_mut().unwrap().remove("main");
        let config = resolve(&manifest(json), &Overrides::default()).unwrap();
        assert!(matches!(
            config.main_artifact(),
            Err(ConfigError::MissingField("main"))
        ));
    }

    #[test]
    fn structured_author_and_scripts_are_kept() {
        let mut json = base();
        json["author"] = serde_json::json!({ "name": "Jane", "email": "jane@example.com" });
        json["scripts"] = serde_json::json!({ "build": "skpm-build" });
        let config = resolve(&manifest(json), &Overrides::default()).unwrap();
        assert_eq!(config.author.as_ref().map(Author::name), Some("Jane"));
        assert_eq!(config.scripts.get("build").map(String::as_str), Some("skpm-build"));
    }

    #[test]
    fn load_manifest_reports_missing_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let err = load_manifest(root).unwrap_err();
        assert!(matches!(err, ConfigError::ManifestRead { .. }));

        std::fs::write(root.join(MANIFEST_FILE), "{ not json").unwrap();
        let err = load_manifest(root).unwrap_err();
        assert!(matches!(err, ConfigError::ManifestParse { .. }));
    }
}
