//! Core library for sklib.
//!
//! This crate provides the publish workflow for Sketch libraries used by
//! the `sklib` CLI and any downstream consumers.
//!
//! # Modules
//!
//! - [`appcast`] - Sparkle appcast parsing and updating
//! - [`auth`] - Token lookup and validation
//! - [`config`] - Configuration loading and management
//! - [`error`] - Error types and result aliases
//! - [`git`] - Version bump, commit and push
//! - [`github`] - Hosting platform client
//! - [`hooks`] - Pre-publish build script
//! - [`manifest`] - `package.json` resolution
//! - [`pipeline`] - Publish context accumulator
//! - [`publish`] - The publish orchestrator
//! - [`registry`] - Registry contribution
//! - [`release`] - Release creation
//! - [`version`] - Bump directives
//!
//! # Quick Start
//!
//! ```no_run
//! use sklib_core::{ConfigLoader, manifest};
//! use camino::Utf8Path;
//!
//! let config = ConfigLoader::new()
//!     .with_user_config(true)
//!     .load()
//!     .expect("Failed to load configuration");
//!
//! let root = Utf8Path::new(".");
//! let manifest = manifest::load_manifest(root).expect("no package.json");
//! let project = manifest::resolve(&manifest, &Default::default()).expect("unusable manifest");
//! println!("{} -> {}", project.name, project.repository);
//! # let _ = config;
//! ```
#![deny(unsafe_code)]

pub mod appcast;

pub mod auth;

pub mod config;

pub mod error;

pub mod git;

pub mod github;

pub mod hooks;

pub mod manifest;

pub mod pipeline;

pub mod publish;

pub mod registry;

pub mod release;

pub mod version;

#[cfg(test)]
mod testing;

pub use config::{Config, ConfigLoader, LogLevel};

pub use error::{ConfigError, ConfigResult};

// Re-export semver so downstream crates don't need a direct dependency.
pub use semver;
