//! Doctor command: check that a project is ready to publish.

use std::io::IsTerminal;

use camino::Utf8Path;
use clap::Args;
use inquire::Confirm;
use owo_colors::OwoColorize;
use serde::Serialize;
use sklib_core::auth::{self, GhCliCredentials, TOKEN_ENV};
use sklib_core::config::{self, Config};
use sklib_core::manifest::{self, Overrides};
use tracing::{debug, instrument};

/// Arguments for the `doctor` subcommand.
#[derive(Args, Debug, Default)]
pub struct DoctorArgs {
    /// Never offer to create a config file
    #[arg(long)]
    pub no_prompt: bool,
}

const TOOLS: &[&str] = &["git", "npm", "gh"];

#[derive(Serialize)]
struct DoctorReport {
    project: ProjectStatus,
    token: Option<String>,
    tools: Vec<ToolStatus>,
    ci: bool,
    config: ConfigStatus,
    directories: DirectoryPaths,
    env_vars: Vec<EnvVar>,
}

#[derive(Serialize)]
struct ProjectStatus {
    found: bool,
    name: Option<String>,
    version: Option<String>,
    repository: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct ToolStatus {
    name: &'static str,
    path: Option<String>,
}

#[derive(Serialize)]
struct ConfigStatus {
    file: Option<String>,
    found: bool,
}

#[derive(Serialize)]
struct DirectoryPaths {
    config: Option<String>,
    data_local: Option<String>,
}

#[derive(Serialize)]
struct EnvVar {
    name: &'static str,
    set: bool,
    description: &'static str,
}

impl ProjectStatus {
    fn gather(cwd: &Utf8Path) -> Self {
        let resolved = manifest::load_manifest(cwd)
            .and_then(|m| manifest::resolve(&m, &Overrides::default()));
        match resolved {
            Ok(project) => Self {
                found: true,
                name: Some(project.name),
                version: Some(project.version),
                repository: Some(project.repository.to_string()),
                error: None,
            },
            Err(err) => Self {
                found: cwd.join("package.json").is_file(),
                name: None,
                version: None,
                repository: None,
                error: Some(err.to_string()),
            },
        }
    }
}

impl DoctorReport {
    async fn gather(cwd: &Utf8Path) -> Self {
        let env_token = std::env::var(TOKEN_ENV).ok();
        // Only where the token would come from; it is not checked against GitHub.
        let token = auth::find_token(env_token.as_deref(), &GhCliCredentials)
            .await
            .ok()
            .map(|(_, source)| source.to_string());

        let config_file = config::find_project_config(cwd);

        Self {
            project: ProjectStatus::gather(cwd),
            token,
            tools: TOOLS
                .iter()
                .map(|&name| ToolStatus {
                    name,
                    path: which::which(name).ok().map(|p| p.display().to_string()),
                })
                .collect(),
            ci: crate::is_ci(),
            config: ConfigStatus {
                found: config_file.is_some(),
                file: config_file.map(|p| p.to_string()),
            },
            directories: DirectoryPaths {
                config: config::user_config_dir().map(|p| p.to_string()),
                data_local: config::user_data_local_dir().map(|p| p.to_string()),
            },
            env_vars: [
                (TOKEN_ENV, "GitHub token"),
                ("CI", "Non-interactive mode"),
                ("RUST_LOG", "Log filter directive"),
                ("SKLIB_LOG_PATH", "Log file path"),
                ("SKLIB_LOG_DIR", "Log directory"),
            ]
            .into_iter()
            .map(|(name, description)| EnvVar {
                name,
                set: std::env::var_os(name).is_some(),
                description,
            })
            .collect(),
        }
    }
}

/// Run diagnostics and report whether the project can be published.
#[instrument(name = "cmd_doctor", skip_all, fields(json_output = global_json))]
pub async fn cmd_doctor(
    args: DoctorArgs,
    global_json: bool,
    cwd: &Utf8Path,
) -> anyhow::Result<()> {
    debug!("executing doctor command");
    let report = DoctorReport::gather(cwd).await;

    if global_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", "Project".bold().underline());
    match (&report.project.name, &report.project.error) {
        (Some(name), _) => {
            println!(
                "  {} {}@{}",
                "✓".green(),
                name.cyan(),
                report.project.version.as_deref().unwrap_or("?")
            );
            if let Some(repo) = &report.project.repository {
                println!("  {}: {}", "Repository".dimmed(), repo.cyan());
            }
        }
        (None, Some(err)) => println!("  {} {err}", "✗".red()),
        (None, None) => {}
    }
    println!();

    println!("{}", "GitHub".bold().underline());
    match &report.token {
        Some(source) => println!("  {} Token from {}", "✓".green(), source.cyan()),
        None => println!(
            "  {} No token (set {TOKEN_ENV} or run `gh auth login`)",
            "○".yellow()
        ),
    }
    println!();

    println!("{}", "Tools".bold().underline());
    for tool in &report.tools {
        match &tool.path {
            Some(path) => println!("  {} {}: {}", "✓".green(), tool.name, path.dimmed()),
            None => println!("  {} {}: not found", "✗".red(), tool.name),
        }
    }
    println!();

    println!("{}", "Configuration".bold().underline());
    match &report.config.file {
        Some(file) => println!("  {} Config file: {}", "✓".green(), file.cyan()),
        None => {
            println!("  {} No config file found", "○".yellow());
            if !args.no_prompt && !report.ci {
                offer_config_creation()?;
            }
        }
    }
    print_dir("  Config dir", report.directories.config.as_deref());
    print_dir("  Data dir", report.directories.data_local.as_deref());
    println!();

    println!("{}", "Environment".bold().underline());
    if report.ci {
        println!("  {} CI detected: prompts are auto-accepted", "○".dimmed());
    }
    for var in report.env_vars.iter().filter(|v| v.set) {
        println!("  {}: set ({})", var.name.dimmed(), var.description);
    }

    Ok(())
}

fn print_dir(label: &str, path: Option<&str>) {
    print!("{}: ", label.dimmed());
    match path {
        Some(p) => println!("{}", p.cyan()),
        None => println!("{}", "(unavailable)".yellow()),
    }
}

/// Offer to write a default user config file.
fn offer_config_creation() -> anyhow::Result<()> {
    let Some(config_dir) = config::user_config_dir() else {
        return Ok(());
    };
    if !std::io::stdin().is_terminal() {
        return Ok(());
    }

    let config_path = config_dir.join("config.json");
    let create = Confirm::new("Create a default config file?")
        .with_default(false)
        .with_help_message(&format!("Will create {config_path}"))
        .prompt();

    // Declined and interrupted prompts both leave things as they are.
    if let Ok(true) = create {
        std::fs::create_dir_all(&config_dir)?;
        let json = serde_json::to_string_pretty(&Config::default())?;
        std::fs::write(&config_path, json)?;
        println!("  {} Created {}", "✓".green(), config_path.cyan());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    fn project_dir(manifest: Option<&str>) -> (tempfile::TempDir, Utf8PathBuf) {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        if let Some(body) = manifest {
            std::fs::write(root.join("package.json"), body).unwrap();
        }
        (tmp, root)
    }

    #[tokio::test]
    async fn report_resolves_project() {
        let (_tmp, root) = project_dir(Some(
            r#"{"name":"icons","version":"1.0.0","main":"icons.sketch","repository":"acme/icons"}"#,
        ));
        let status = ProjectStatus::gather(&root);
        assert!(status.found);
        assert_eq!(status.name.as_deref(), Some("icons"));
        assert_eq!(status.version.as_deref(), Some("1.0.0"));
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn report_explains_missing_manifest() {
        let (_tmp, root) = project_dir(None);
        let report = DoctorReport::gather(&root).await;
        assert!(!report.project.found);
        assert!(report.project.error.is_some());
        assert_eq!(report.tools.len(), TOOLS.len());
    }

    #[tokio::test]
    async fn json_output_succeeds_without_project() {
        let (_tmp, root) = project_dir(None);
        let args = DoctorArgs { no_prompt: true };
        assert!(cmd_doctor(args, true, &root).await.is_ok());
    }

    #[tokio::test]
    async fn text_output_succeeds() {
        let (_tmp, root) = project_dir(Some(r#"{"name":"icons"}"#));
        let args = DoctorArgs { no_prompt: true };
        assert!(cmd_doctor(args, false, &root).await.is_ok());
    }
}
