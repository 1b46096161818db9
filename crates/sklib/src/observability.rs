//! Structured logging setup.
//!
//! Logs are JSON lines written to a daily-rolled file. This module never
//! writes to stdout, which carries the command's own output (`--json`
//! results, the `name@version` line). When no log file can be opened the
//! logs go to stderr.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const ENV_LOG_PATH: &str = "SKLIB_LOG_PATH";
const ENV_LOG_DIR: &str = "SKLIB_LOG_DIR";
const DEFAULT_LOG_DIR_UNIX: &str = "/var/log";
const LOG_FILE_SUFFIX: &str = ".jsonl";

/// Where logs should go.
#[derive(Clone, Debug)]
pub struct ObservabilityConfig {
    /// Service name; also the log file stem.
    pub service: String,
    /// `log_dir` from the tool configuration.
    pub log_dir: Option<PathBuf>,
}

impl ObservabilityConfig {
    /// Config for this binary, with the configured log directory (if any).
    pub fn from_env_with_overrides(log_dir: Option<PathBuf>) -> Self {
        Self {
            service: env!("CARGO_PKG_NAME").to_string(),
            log_dir,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct LogTarget {
    dir: PathBuf,
    file_name: String,
}

/// Candidate log locations, highest priority first.
#[derive(Debug, Default)]
struct LogSources {
    path_override: Option<PathBuf>,
    dir_override: Option<PathBuf>,
    config_dir: Option<PathBuf>,
}

impl LogSources {
    fn from_env(config_dir: Option<&Path>) -> Self {
        Self {
            path_override: std::env::var_os(ENV_LOG_PATH).map(PathBuf::from),
            dir_override: std::env::var_os(ENV_LOG_DIR).map(PathBuf::from),
            config_dir: config_dir.map(Path::to_path_buf),
        }
    }

    fn resolve(self, service: &str) -> Result<LogTarget, String> {
        if let Some(path) = self.path_override {
            return target_from_path(&path);
        }
        let file_name = format!("{service}{LOG_FILE_SUFFIX}");
        if let Some(dir) = self.dir_override.or(self.config_dir) {
            ensure_writable(&dir, &file_name)?;
            return Ok(LogTarget { dir, file_name });
        }

        let mut candidates = Vec::new();
        if cfg!(unix) {
            candidates.push(PathBuf::from(DEFAULT_LOG_DIR_UNIX));
        }
        if let Some(dirs) = directories::ProjectDirs::from("", "", service) {
            candidates.push(dirs.data_local_dir().join("logs"));
        }
        if let Ok(dir) = std::env::current_dir() {
            candidates.push(dir);
        }

        candidates
            .into_iter()
            .find(|dir| ensure_writable(dir, &file_name).is_ok())
            .map(|dir| LogTarget {
                dir,
                file_name: file_name.clone(),
            })
            .ok_or_else(|| "no writable log directory found".to_string())
    }
}

/// Keeps the background log writer alive; hold it until exit.
pub struct ObservabilityGuard {
    _log_guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_observability(
    cfg: &ObservabilityConfig,
    env_filter: EnvFilter,
) -> Result<ObservabilityGuard> {
    let (writer, guard) = match LogSources::from_env(cfg.log_dir.as_deref()).resolve(&cfg.service)
    {
        Ok(target) => {
            let appender = tracing_appender::rolling::daily(&target.dir, &target.file_name);
            tracing_appender::non_blocking(appender)
        }
        Err(err) => {
            eprintln!("Warning: {err}. Falling back to stderr logging.");
            tracing_appender::non_blocking(std::io::stderr())
        }
    };

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_ansi(false)
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    tracing::debug!(service = %cfg.service, "observability initialized");
    Ok(ObservabilityGuard { _log_guard: guard })
}

/// Build the log filter.
///
/// Priority: `--quiet` > `-v`/`-vv` > `RUST_LOG` > `default_level`.
pub fn env_filter(quiet: bool, verbose: u8, default_level: &str) -> EnvFilter {
    if quiet {
        return EnvFilter::new("error");
    }
    match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    }
}

fn target_from_path(path: &Path) -> Result<LogTarget, String> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| format!("{ENV_LOG_PATH} must end in a UTF-8 file name"))?
        .to_string();
    let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    ensure_writable(&dir, &file_name)?;
    Ok(LogTarget { dir, file_name })
}

fn ensure_writable(dir: &Path, file_name: &str) -> Result<(), String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("failed to create log directory {}: {e}", dir.display()))?;
    let path = dir.join(file_name);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| format!("failed to open log file {}: {e}", path.display()))?;
    Ok(())
}
