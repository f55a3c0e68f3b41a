//! Main application run

use std::future::Future;
use std::sync::Arc;

use colored::Colorize;
use tracing::{error, info, warn};

use crate::app::options::{AppOptions, Command};
use crate::deploy::preview::{remove_preview, render_preview_table, resolve_commit};
use crate::deploy::stages::{deploy_pipeline, preview_pipeline};
use crate::deploy::{DeployContext, DeploymentDriver, PreviewDriver, StopFlag};
use crate::errors::DockhandError;
use crate::filesys::file::File;
use crate::pipeline::render::{Renderer, Theme};
use crate::pipeline::runner::RenderLoop;
use crate::pipeline::{EventSink, Pipeline, RunOutcome};
use crate::remote::ssh::{SshConfig, SshConnector, SshTarget};
use crate::remote::Connector;
use crate::storage::app_record::AppRecordStore;
use crate::storage::settings::Settings;
use crate::tooling::Toolkit;
use crate::workers::deployer::{self, Job, JobReport};

/// Terminal width used when stdout is not a terminal
const FALLBACK_WIDTH: usize = 100;

/// Run one command and return the process exit code
///
/// Errors before the live display starts (settings, app record, dirty git
/// tree) are returned; failures inside the pipeline are reported on screen
/// and turn into exit code 1.
pub async fn run(
    options: AppOptions,
    settings: Settings,
    command: Command,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<i32, DockhandError> {
    let project = options.project();
    let store = AppRecordStore::new(project.record_file());
    let record = store.load().await?;
    info!("Loaded app record {} at {}", record.name, record.version);

    let connector: Arc<dyn Connector> = Arc::new(SshConnector::new(
        SshTarget::from_settings(&settings),
        options.storage.control_dir().path(),
        SshConfig::default(),
    ));

    match command {
        Command::PreviewList => {
            print!("{}", render_preview_table(&record));
            Ok(0)
        }
        Command::PreviewRemove { hash } => {
            remove_preview(connector.as_ref(), &settings.project, &store, record, &hash).await?;
            println!("{} preview {}", "Removed".green().bold(), hash.cyan());
            Ok(0)
        }
        Command::Deploy => {
            let stop = StopFlag::default();
            let ctx = DeployContext::new(
                options.project_dir.clone(),
                settings,
                connector,
                Toolkit::system(),
            )
            .with_gate(options.gate.clone(), crate::swap::health::tokio_sleep())
            .with_stop(stop.clone());
            let pipeline = deploy_pipeline(&record.name)?;
            let job = Job::Deploy(DeploymentDriver::new(ctx, store, record));
            run_pipeline(&options, pipeline, job, stop, project.diagnostic_log(), shutdown_signal)
                .await
        }
        Command::Preview { hash } => {
            let tools = Toolkit::system();
            let hash = resolve_commit(tools.vcs.as_ref(), &options.project_dir, hash.as_deref()).await?;
            let stop = StopFlag::default();
            let ctx = DeployContext::new(options.project_dir.clone(), settings, connector, tools)
                .with_gate(options.gate.clone(), crate::swap::health::tokio_sleep())
                .with_stop(stop.clone());
            let pipeline = preview_pipeline(&record.name, &hash)?;
            let job = Job::Preview(PreviewDriver::new(ctx, store, record, hash));
            run_pipeline(&options, pipeline, job, stop, project.diagnostic_log(), shutdown_signal)
                .await
        }
    }
}

/// Drive `job` on a worker task while the live display follows it
///
/// A cancel stops the display at once, then waits for the worker to reach
/// its next stage boundary. A cutover in progress is finished first.
async fn run_pipeline(
    options: &AppOptions,
    pipeline: Pipeline,
    job: Job,
    stop: StopFlag,
    diagnostic_log: File,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<i32, DockhandError> {
    let (sink, events) = EventSink::channel();
    let handle = deployer::spawn(job, sink);

    let theme = if options.styled {
        Theme::default()
    } else {
        Theme::plain()
    };
    let width = crossterm::terminal::size()
        .map(|(w, _)| w as usize)
        .unwrap_or(FALLBACK_WIDTH);
    let renderer = Renderer::new(theme, width, diagnostic_log.path().display().to_string());
    let render_loop = RenderLoop::new(pipeline, renderer, std::io::stdout(), diagnostic_log);

    let (outcome, _) = render_loop.run(events, shutdown_signal).await?;

    if outcome == RunOutcome::Cancelled {
        stop.request();
        warn!("Run cancelled; waiting for the worker to reach a safe point");
        println!(
            "{} waiting for the current step to finish (a swap in progress always completes)",
            "Cancelled:".yellow().bold()
        );
    }

    match handle.await {
        Ok(Ok(JobReport::Deployed(report))) => {
            info!("Deployed {} as {}", report.image, report.version);
            if outcome == RunOutcome::Cancelled {
                println!("{} went live as {} before stopping", report.image, report.version);
            }
        }
        Ok(Ok(JobReport::Previewed(report))) => {
            info!("Preview {} live at {}", report.hash, report.host)
        }
        Ok(Err(DockhandError::Cancelled(next))) => info!("Worker stopped before {}", next),
        Ok(Err(e)) => info!("Run ended with {:?} failure", e.kind()),
        Err(e) => error!("Deployer worker panicked: {}", e),
    }

    Ok(outcome.exit_code())
}
