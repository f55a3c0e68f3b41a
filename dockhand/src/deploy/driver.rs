//! Primary deployment driver

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::deploy::secrets::{sync_env_file, EnvSync};
use crate::deploy::DeployContext;
use crate::errors::DockhandError;
use crate::filesys::dir::Dir;
use crate::pipeline::EventSink;
use crate::remote::{Connection, RemoteCommand, RemoteSessionExt};
use crate::storage::app_record::{AppRecord, AppRecordStore, Version};
use crate::swap::{RemoteCurlProbe, Rollout, RolloutOutcome, SwapPlan};
use crate::utils::shell_quote;

/// What a successful deployment did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    pub version: Version,
    pub image: String,
    pub url: String,
    pub rollout: RolloutOutcome,
    pub duration: Duration,
}

/// Image tags and artifact name of one build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifacts {
    /// Tag the compose file on the host runs
    pub latest: String,

    /// Tag recorded for this version
    pub versioned: String,

    /// Name of the tar holding both tags
    pub tar_name: String,
}

impl BuildArtifacts {
    pub fn new(record: &AppRecord, version: Version) -> Self {
        let repo = record.image_repository();
        Self {
            latest: format!("{repo}:latest"),
            versioned: format!("{repo}:{version}"),
            tar_name: format!("{repo}-{version}.tar"),
        }
    }

    pub fn tags(&self) -> Vec<String> {
        vec![self.latest.clone(), self.versioned.clone()]
    }
}

/// Builds, ships and swaps in a new version of the primary application
pub struct DeploymentDriver {
    ctx: DeployContext,
    store: AppRecordStore,
    record: AppRecord,
}

impl DeploymentDriver {
    pub fn new(ctx: DeployContext, store: AppRecordStore, record: AppRecord) -> Self {
        Self { ctx, store, record }
    }

    /// Run every stage, reporting through `sink`
    ///
    /// Ends with exactly one `AllDone` or one `Error` event.
    pub async fn run(self, sink: EventSink) -> Result<DeployReport, DockhandError> {
        let started = Instant::now();
        info!("Deploying {} (currently {})", self.record.name, self.record.version);

        match self.execute(&sink, started).await {
            Ok(report) => {
                info!(
                    "Deployed {} {} in {:?}",
                    self.record.name, report.version, report.duration
                );
                sink.all_done(report.duration, report.url.clone());
                Ok(report)
            }
            Err(e) => {
                error!("Deployment of {} failed: {}", self.record.name, e);
                sink.error(e.to_string());
                Err(e)
            }
        }
    }

    async fn execute(&self, sink: &EventSink, started: Instant) -> Result<DeployReport, DockhandError> {
        let plan = self.ctx.plan(
            &self.record,
            self.record.name.clone(),
            self.record.remote_dir(),
        )?;
        let version = self.record.version.next()?;

        // Connect
        self.ctx.checkpoint("connecting")?;
        let conn = self
            .ctx
            .connector
            .connect()
            .await
            .map_err(DockhandError::ConnectionError)?;
        sink.log(format!("Connected to {}", self.ctx.settings.server_address));
        sink.advance();

        let result = self.after_connect(&conn, &plan, version, sink, started).await;
        if let Err(e) = conn.session.close().await {
            warn!("Failed to close session: {}", e);
        }
        result
    }

    async fn after_connect(
        &self,
        conn: &Connection,
        plan: &SwapPlan,
        version: Version,
        sink: &EventSink,
        started: Instant,
    ) -> Result<DeployReport, DockhandError> {
        let remote_dir = self.record.remote_dir();

        // Secrets
        self.ctx.checkpoint("syncing secrets")?;
        let env_sync = sync_env_file(
            self.ctx.tools.encryptor.as_ref(),
            conn.transfer.as_ref(),
            &self.ctx.project_dir,
            &self.record.env,
            &self.ctx.settings.public_key,
            &remote_dir,
            sink,
        )
        .await?;
        sink.advance();

        // Build
        self.ctx.checkpoint("building")?;
        let artifacts = BuildArtifacts::new(&self.record, version);
        self.ctx
            .tools
            .containers
            .build(&self.ctx.project_dir, &artifacts.tags(), sink)
            .await
            .map_err(|e| DockhandError::BuildError(e.to_string()))?;
        sink.advance();

        // Save, transfer and load
        self.ctx.checkpoint("saving the image")?;
        self.ship_image(conn, &artifacts, &remote_dir, sink).await?;
        sink.advance();

        // Cutover; from here on the run finishes whatever the operator does
        self.ctx.checkpoint("the cutover")?;
        let rollout = Rollout::new(
            conn.session.clone(),
            Arc::new(RemoteCurlProbe::new(conn.session.clone())),
            self.ctx.gate.clone(),
            self.ctx.sleep_fn.clone(),
        );
        let outcome = rollout
            .apply(plan, sink)
            .await
            .map_err(DockhandError::CutoverError)?;
        match &outcome {
            RolloutOutcome::FirstStart => sink.log(format!("Started {}", plan.service)),
            RolloutOutcome::Swapped(report) => sink.log(format!(
                "Swapped in {} after {} health checks",
                crate::swap::containers::short_id(&report.new_container),
                report.health_attempts
            )),
        }
        sink.advance();

        // Persist
        let mut record = self.record.clone();
        record.version = version;
        record.image = artifacts.versioned.clone();
        if let EnvSync::Updated { hash } = env_sync {
            record.env.hash = hash;
        }
        self.store
            .save(&record)
            .await
            .map_err(|e| DockhandError::PersistError(e.to_string()))?;
        sink.log(format!("{} is now at {}", record.name, record.version));

        Ok(DeployReport {
            version,
            image: artifacts.versioned,
            url: record.url.clone(),
            rollout: outcome,
            duration: started.elapsed(),
        })
    }

    /// Save the image to a tar, upload it and load it on the host
    ///
    /// Advances from Save to Transfer once the tar exists. The local and
    /// remote tar are removed whatever happens.
    async fn ship_image(
        &self,
        conn: &Connection,
        artifacts: &BuildArtifacts,
        remote_dir: &str,
        sink: &EventSink,
    ) -> Result<(), DockhandError> {
        let staging = Dir::create_temp_dir("dockhand-image").await?;
        let tar = staging.file(&artifacts.tar_name);

        let result = async {
            self.ctx
                .tools
                .containers
                .save(&artifacts.tags(), tar.path(), sink)
                .await
                .map_err(|e| DockhandError::BuildError(e.to_string()))?;
            sink.advance();

            transfer_and_load(conn, tar.path(), remote_dir, &artifacts.tar_name, sink).await
        }
        .await;

        if let Err(e) = staging.delete().await {
            warn!("Failed to remove {}: {}", staging.path().display(), e);
        }
        result
    }
}

/// Upload `tar` into `remote_dir` and `docker load` it there
///
/// The remote tar is removed after the load, and also after a failed
/// upload or load.
pub async fn transfer_and_load(
    conn: &Connection,
    tar: &std::path::Path,
    remote_dir: &str,
    tar_name: &str,
    sink: &EventSink,
) -> Result<(), DockhandError> {
    let dir = shell_quote(remote_dir);
    let remote_tar = format!("{}/{}", remote_dir, tar_name);

    conn.session
        .run(RemoteCommand::new(format!("mkdir -p {dir}")))
        .await
        .map_err(|e| DockhandError::TransferError(e.to_string()))?;

    sink.log(format!("Uploading {tar_name}"));
    let loaded = match conn.transfer.upload(tar, &remote_tar).await {
        Ok(()) => {
            sink.log(format!("Loading {tar_name}"));
            conn.session
                .run_relayed(
                    RemoteCommand::new(format!(
                        "cd {dir} && docker load -i {}",
                        shell_quote(tar_name)
                    )),
                    sink,
                )
                .await
                .map_err(|e| DockhandError::TransferError(e.to_string()))
        }
        Err(e) => Err(DockhandError::TransferError(e.to_string())),
    };

    let cleanup = RemoteCommand::new(format!("rm -f {}", shell_quote(&remote_tar)));
    if let Err(e) = conn.session.run(cleanup).await {
        warn!("Failed to remove {} on the host: {}", remote_tar, e);
    }
    loaded
}
