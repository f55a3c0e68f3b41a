//! Dockhand - Entry Point

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{error, info};

use dockhand::app::options::{AppOptions, Command};
use dockhand::app::run::run;
use dockhand::logs::{init_logging, LogLevel, LogOptions};
use dockhand::storage::layout::StorageLayout;
use dockhand::storage::settings::Settings;
use dockhand::utils::version_info;

#[derive(Debug, Parser)]
#[command(name = "dockhand", about = "Blue-green deployments to a single host")]
struct Cli {
    /// Directory holding the application sources and dockhand.yml
    #[arg(long, global = true, default_value = ".")]
    project_dir: PathBuf,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Disable colours and unicode glyphs
    #[arg(long, global = true)]
    plain: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Deploy a new version of the application
    Deploy,

    /// Deploy the current commit as a preview environment
    Preview {
        /// Deploy under this commit hash instead of HEAD's
        #[arg(long)]
        hash: Option<String>,

        #[command(subcommand)]
        action: Option<PreviewAction>,
    },

    /// Print version information
    Version,
}

#[derive(Debug, Subcommand)]
enum PreviewAction {
    /// List preview environments
    List,

    /// Remove a preview environment
    Remove { hash: String },
}

impl CliCommand {
    fn into_command(self) -> Option<Command> {
        match self {
            CliCommand::Deploy => Some(Command::Deploy),
            CliCommand::Preview { action: None, hash } => Some(Command::Preview { hash }),
            CliCommand::Preview {
                action: Some(PreviewAction::List),
                ..
            } => Some(Command::PreviewList),
            CliCommand::Preview {
                action: Some(PreviewAction::Remove { hash }),
                ..
            } => Some(Command::PreviewRemove { hash }),
            CliCommand::Version => None,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            1
        }
    };
    std::process::exit(code);
}

async fn execute(cli: Cli) -> anyhow::Result<i32> {
    let Some(command) = cli.command.into_command() else {
        println!("{}", serde_json::to_string_pretty(&version_info())?);
        return Ok(0);
    };

    let layout = StorageLayout::default();
    layout
        .setup()
        .await
        .with_context(|| format!("cannot create {}", layout.base_dir.display()))?;

    let settings = Settings::load(&layout.settings_file())
        .await
        .context("unable to read settings")?;

    let log_options = LogOptions {
        log_level: cli.log_level.unwrap_or_else(|| settings.log_level.clone()),
        log_dir: layout.logs_dir().path().to_path_buf(),
        ..Default::default()
    };
    let _guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions {
        project_dir: cli.project_dir,
        storage: layout,
        styled: !cli.plain,
        ..Default::default()
    };
    info!("Running {:?} in {}", command, options.project_dir.display());

    let code = run(options, settings, command, await_shutdown_signal()).await?;
    Ok(code)
}

async fn await_shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl+C received, cancelling..."),
        Err(e) => {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
