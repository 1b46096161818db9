//! Publish command: bump, appcast, push, release, registry.

use std::io::IsTerminal;
use std::time::Duration;

use anyhow::Context;
use camino::Utf8Path;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Confirm;
use owo_colors::OwoColorize;
use serde::Serialize;
use sklib_core::Config;
use sklib_core::auth::{GhCliCredentials, TOKEN_ENV};
use sklib_core::git::GitVcs;
use sklib_core::github::GitHubClient;
use sklib_core::manifest::{self, AppcastSetting, Overrides};
use sklib_core::pipeline::PublishContext;
use sklib_core::publish::{
    PublishEvent, PublishOptions, PublishOutcome, PublishStep, Publisher, StepOutcome,
};
use sklib_core::registry::{Confirmation, ContributionOutcome};
use sklib_core::version::BumpDirective;
use tracing::{debug, instrument, warn};

/// Arguments for the `publish` subcommand.
#[derive(Args, Debug)]
pub struct PublishArgs {
    /// <newversion> | major | minor | patch | premajor | preminor | prepatch | prerelease
    #[arg(value_name = "BUMP")]
    pub bump: BumpDirective,

    /// Repository URL to use instead of package.json's
    #[arg(long, value_name = "URL")]
    pub repo_url: Option<String>,

    /// Do not create a GitHub release (requires --download-url)
    #[arg(long)]
    pub skip_release: bool,

    /// Do not offer the library to the libraries registry
    #[arg(long)]
    pub skip_registry: bool,

    /// Open the release page once published
    #[arg(short = 'o', long)]
    pub open_release: bool,

    /// Download URL to write in the appcast instead of the release asset URL
    #[arg(long, value_name = "URL")]
    pub download_url: Option<String>,

    /// Appcast path, or `false` to leave the appcast alone
    #[arg(long, value_name = "PATH|false")]
    pub appcast: Option<String>,

    /// Add the library to the registry without asking
    #[arg(short = 'y', long)]
    pub yes: bool,
}

// ──────────────────────────────────────────────
// Progress
// ──────────────────────────────────────────────

/// Renders publish events.
enum Reporter {
    /// One spinner, completed steps printed above it.
    Spinner(ProgressBar),
    /// Discrete status lines (CI).
    Lines,
    /// Nothing (`--json`).
    Silent,
}

impl Reporter {
    fn new(ci: bool, json: bool) -> Self {
        if json {
            Self::Silent
        } else if ci || !std::io::stderr().is_terminal() {
            Self::Lines
        } else {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.cyan} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            spinner.enable_steady_tick(Duration::from_millis(80));
            Self::Spinner(spinner)
        }
    }

    fn spinner(&self) -> Option<&ProgressBar> {
        match self {
            Self::Spinner(bar) => Some(bar),
            _ => None,
        }
    }

    fn line(&self, text: String) {
        match self {
            Self::Spinner(bar) => bar.println(text),
            Self::Lines => eprintln!("{text}"),
            Self::Silent => {}
        }
    }

    fn handle(&self, event: PublishEvent) {
        match event {
            PublishEvent::StepStarted(step) => match self {
                Self::Spinner(bar) => bar.set_message(step.status()),
                _ => self.line(format!("{}...", step.status())),
            },
            PublishEvent::Progress(message) => match self {
                Self::Spinner(bar) => bar.set_message(message),
                _ => self.line(format!("  {message}")),
            },
            PublishEvent::StepCompleted(step, StepOutcome::Success { message }) => {
                self.line(format!("{} {step}: {message}", "✓".green()));
            }
            PublishEvent::StepCompleted(step, StepOutcome::Skipped { reason }) => {
                self.line(format!("{} {step}: skipped ({reason})", "○".yellow()));
            }
            PublishEvent::StepFailed(step) => {
                self.line(format!("{} {step}", "✗".red()));
            }
        }
    }

    fn finish(&self) {
        if let Self::Spinner(bar) = self {
            bar.finish_and_clear();
        }
    }
}

// ──────────────────────────────────────────────
// Confirmation
// ──────────────────────────────────────────────

/// Registry confirmation through an `inquire` prompt.
struct PromptConfirmation {
    /// Answer yes without asking (`--yes` or CI).
    auto: bool,
    /// Spinner to pause while the prompt is up.
    spinner: Option<ProgressBar>,
}

impl Confirmation for PromptConfirmation {
    fn confirm(&self, question: &str) -> bool {
        if self.auto {
            debug!("registry contribution auto-confirmed");
            return true;
        }
        if !std::io::stdin().is_terminal() {
            warn!("stdin is not a terminal; not contributing to the registry (use --yes)");
            return false;
        }

        let ask = || Confirm::new(question).with_default(true).prompt();
        let answer = match &self.spinner {
            Some(bar) => bar.suspend(ask),
            None => ask(),
        };
        answer.unwrap_or_else(|err| {
            warn!(error = %err, "registry prompt interrupted");
            false
        })
    }
}

// ──────────────────────────────────────────────
// Command
// ──────────────────────────────────────────────

#[derive(Serialize)]
struct FailureReport<'a> {
    error: String,
    step: PublishStep,
    context: &'a PublishContext,
}

/// Run the publish workflow for the project in `cwd`.
#[instrument(name = "cmd_publish", skip_all, fields(bump = %args.bump))]
pub async fn cmd_publish(
    args: PublishArgs,
    global_json: bool,
    config: &Config,
    cwd: &Utf8Path,
) -> anyhow::Result<()> {
    let manifest = manifest::load_manifest(cwd)?;
    let overrides = Overrides {
        repo_url: args.repo_url.clone(),
        appcast: args.appcast.as_deref().map(AppcastSetting::from_flag),
    };
    let project = manifest::resolve(&manifest, &overrides)?;
    debug!(name = %project.name, repo = %project.repository, "project resolved");

    let vcs = GitVcs::new(cwd).with_bump_command(config.commands.bump.clone());
    let platform = GitHubClient::new(&config.github).context("invalid [github] configuration")?;

    let ci = crate::is_ci();
    let reporter = Reporter::new(ci, global_json);
    let confirmation = PromptConfirmation {
        auto: args.yes || ci,
        spinner: reporter.spinner().cloned(),
    };

    let options = PublishOptions {
        skip_release: args.skip_release,
        skip_registry: args.skip_registry,
        download_url: args.download_url.clone(),
        env_token: std::env::var(TOKEN_ENV).ok(),
        ..PublishOptions::new(args.bump.clone())
    };

    let publisher = Publisher {
        project_root: cwd,
        project: &project,
        config,
        vcs: &vcs,
        platform: &platform,
        credentials: &GhCliCredentials,
        confirmation: &confirmation,
    };
    let result = publisher.run(&options, |event| reporter.handle(event)).await;
    reporter.finish();

    match result {
        Ok(outcome) => {
            if global_json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_success(&outcome);
            }
            if args.open_release {
                open_release(&outcome)?;
            }
            Ok(())
        }
        Err(failure) => {
            if global_json {
                let report = FailureReport {
                    error: failure.error.to_string(),
                    step: failure.step,
                    context: &failure.context,
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            let step = failure.step;
            Err(anyhow::Error::new(failure.error).context(format!("{step} step failed")))
        }
    }
}

fn print_success(outcome: &PublishOutcome) {
    println!("{}", outcome.summary().green().bold());
    if let Some(url) = outcome.release_url() {
        println!("  {}: {}", "Release".dimmed(), url.cyan());
    }
    match &outcome.context.registry {
        Some(ContributionOutcome::Proposed { pull_request, .. }) => {
            println!("  {}: {}", "Registry".dimmed(), pull_request.html_url.cyan());
        }
        Some(ContributionOutcome::AlreadyListed { title }) => {
            println!("  {}: already listed as {}", "Registry".dimmed(), title.cyan());
        }
        _ => {}
    }
}

fn open_release(outcome: &PublishOutcome) -> anyhow::Result<()> {
    let Some(url) = outcome.release_url() else {
        warn!("no release was created; nothing to open");
        return Ok(());
    };
    open::that(url).with_context(|| format!("failed to open {url}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_confirmation_never_prompts() {
        let confirmation = PromptConfirmation {
            auto: true,
            spinner: None,
        };
        assert!(confirmation.confirm("Add it?"));
    }

    #[test]
    fn silent_reporter_has_no_spinner() {
        let reporter = Reporter::new(false, true);
        assert!(reporter.spinner().is_none());
        reporter.handle(PublishEvent::StepStarted(PublishStep::Bump));
        reporter.finish();
    }

    #[test]
    fn ci_reporter_prints_lines() {
        let reporter = Reporter::new(true, false);
        assert!(matches!(reporter, Reporter::Lines));
    }
}
