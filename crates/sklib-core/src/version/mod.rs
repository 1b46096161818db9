//! Version bump directives.
//!
//! The actual bump is delegated to the package manager through
//! [`crate::git::Vcs::bump_and_tag`]. This module validates the directive up
//! front and can predict the resulting version for previews and tests.

use std::fmt;
use std::str::FromStr;

use semver::{Prerelease, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from version operations.
#[derive(Error, Debug)]
pub enum VersionError {
    /// Failed to parse a semver string.
    #[error("invalid semver: {0}")]
    InvalidSemver(#[from] semver::Error),

    /// The directive is neither a bump keyword nor a version.
    #[error(
        "`{0}` is not a valid bump: expected <newversion> or one of major, minor, patch, premajor, preminor, prepatch, prerelease"
    )]
    InvalidBump(String),
}

/// Result alias for version operations.
pub type VersionResult<T> = Result<T, VersionError>;

/// Semver bump level, using npm's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BumpLevel {
    /// Patch release (x.y.Z).
    Patch,
    /// Minor release (x.Y.0).
    Minor,
    /// Major release (X.0.0).
    Major,
    /// Next patch as a `-0` prerelease.
    Prepatch,
    /// Next minor as a `-0` prerelease.
    Preminor,
    /// Next major as a `-0` prerelease.
    Premajor,
    /// Increment the prerelease counter.
    Prerelease,
}

impl BumpLevel {
    const ALL: [Self; 7] = [
        Self::Patch,
        Self::Minor,
        Self::Major,
        Self::Prepatch,
        Self::Preminor,
        Self::Premajor,
        Self::Prerelease,
    ];

    const fn as_str(self) -> &'static str {
        match self {
            Self::Patch => "patch",
            Self::Minor => "minor",
            Self::Major => "major",
            Self::Prepatch => "prepatch",
            Self::Preminor => "preminor",
            Self::Premajor => "premajor",
            Self::Prerelease => "prerelease",
        }
    }
}

impl fmt::Display for BumpLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the user asked the version bump to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BumpDirective {
    /// Move by a semver level.
    Level(BumpLevel),
    /// Jump to this exact version.
    Exact(Version),
}

impl FromStr for BumpDirective {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(level) = BumpLevel::ALL.into_iter().find(|level| level.as_str() == s) {
            return Ok(Self::Level(level));
        }
        parse_version(s)
            .map(Self::Exact)
            .map_err(|_| VersionError::InvalidBump(s.to_string()))
    }
}

impl fmt::Display for BumpDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Level(level) => level.fmt(f),
            Self::Exact(version) => version.fmt(f),
        }
    }
}

impl BumpDirective {
    /// Predict the version the package manager will produce from `current`.
    ///
    /// The publish Bump step announces this before running the bump.
    pub fn apply(&self, current: &Version) -> Version {
        let level = match self {
            Self::Level(level) => level,
            Self::Exact(version) => return version.clone(),
        };

        let is_pre = !current.pre.is_empty();
        let (major, minor, patch) = (current.major, current.minor, current.patch);
        match level {
            BumpLevel::Major if is_pre && minor == 0 && patch == 0 => {
                Version::new(major, 0, 0)
            }
            BumpLevel::Major => Version::new(major + 1, 0, 0),
            BumpLevel::Minor if is_pre && patch == 0 => Version::new(major, minor, 0),
            BumpLevel::Minor => Version::new(major, minor + 1, 0),
            BumpLevel::Patch if is_pre => Version::new(major, minor, patch),
            BumpLevel::Patch => Version::new(major, minor, patch + 1),
            BumpLevel::Premajor => with_pre(Version::new(major + 1, 0, 0), "0"),
            BumpLevel::Preminor => with_pre(Version::new(major, minor + 1, 0), "0"),
            BumpLevel::Prepatch => with_pre(Version::new(major, minor, patch + 1), "0"),
            BumpLevel::Prerelease if !is_pre => {
                with_pre(Version::new(major, minor, patch + 1), "0")
            }
            BumpLevel::Prerelease => {
                let next = increment_prerelease(current.pre.as_str());
                with_pre(Version::new(major, minor, patch), &next)
            }
        }
    }
}

fn with_pre(mut version: Version, pre: &str) -> Version {
    // Identifiers built here are always numeric or copied from a valid prerelease.
    version.pre = Prerelease::new(pre).unwrap_or(Prerelease::EMPTY);
    version
}

/// `1` → `2`, `beta.3` → `beta.4`, `beta` → `beta.0`.
fn increment_prerelease(pre: &str) -> String {
    let mut parts: Vec<String> = pre.split('.').map(str::to_string).collect();
    let last_numeric = parts
        .iter()
        .rposition(|part| part.chars().all(|c| c.is_ascii_digit()));

    match last_numeric.and_then(|idx| parts[idx].parse::<u64>().ok().map(|n| (idx, n))) {
        Some((idx, n)) => parts[idx] = (n + 1).to_string(),
        None => parts.push("0".to_string()),
    }
    parts.join(".")
}

/// Parse a version string, stripping an optional `v` prefix.
pub fn parse_version(s: &str) -> VersionResult<Version> {
    let s = s.strip_prefix('v').unwrap_or(s);
    Ok(Version::parse(s)?)
}

/// The version part of a release tag: `v1.2.0` → `1.2.0`.
pub fn version_from_tag(tag: &str) -> &str {
    tag.strip_prefix('v').unwrap_or(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bump(directive: &str, from: &str) -> String {
        let directive: BumpDirective = directive.parse().unwrap();
        directive.apply(&parse_version(from).unwrap()).to_string()
    }

    #[test]
    fn parses_levels_and_versions() {
        assert_eq!(
            "minor".parse::<BumpDirective>().unwrap(),
            BumpDirective::Level(BumpLevel::Minor)
        );
        assert_eq!(
            "v2.0.0-beta.1".parse::<BumpDirective>().unwrap(),
            BumpDirective::Exact(Version::parse("2.0.0-beta.1").unwrap())
        );
    }

    #[test]
    fn rejects_unknown_directive() {
        let err = "huge".parse::<BumpDirective>().unwrap_err();
        assert!(matches!(err, VersionError::InvalidBump(s) if s == "huge"));
        assert!("".parse::<BumpDirective>().is_err());
    }

    #[test]
    fn release_levels() {
        assert_eq!(bump("patch", "1.2.3"), "1.2.4");
        assert_eq!(bump("minor", "1.2.3"), "1.3.0");
        assert_eq!(bump("major", "1.2.3"), "2.0.0");
    }

    #[test]
    fn release_levels_from_prerelease() {
        assert_eq!(bump("patch", "1.2.3-beta.1"), "1.2.3");
        assert_eq!(bump("minor", "1.3.0-0"), "1.3.0");
        assert_eq!(bump("minor", "1.3.1-0"), "1.4.0");
        assert_eq!(bump("major", "2.0.0-rc.2"), "2.0.0");
        assert_eq!(bump("major", "2.1.0-rc.2"), "3.0.0");
    }

    #[test]
    fn pre_levels() {
        assert_eq!(bump("prepatch", "1.2.3"), "1.2.4-0");
        assert_eq!(bump("preminor", "1.2.3"), "1.3.0-0");
        assert_eq!(bump("premajor", "1.2.3"), "2.0.0-0");
    }

    #[test]
    fn prerelease_counter() {
        assert_eq!(bump("prerelease", "1.2.3"), "1.2.4-0");
        assert_eq!(bump("prerelease", "1.2.4-0"), "1.2.4-1");
        assert_eq!(bump("prerelease", "1.2.4-beta.3"), "1.2.4-beta.4");
        assert_eq!(bump("prerelease", "1.2.4-beta"), "1.2.4-beta.0");
    }

    #[test]
    fn exact_version_wins() {
        assert_eq!(bump("3.0.0", "1.2.3"), "3.0.0");
    }

    #[test]
    fn tag_prefix_is_stripped() {
        assert_eq!(version_from_tag("v1.2.0"), "1.2.0");
        assert_eq!(version_from_tag("1.2.0"), "1.2.0");
    }
}
