//! Preview environments
//!
//! A preview runs the current commit next to the primary deployment under
//! `<app>-<hash>`, routed at `<hash>.<url>`. Previews are started once and
//! removed explicitly; they never touch the primary version or container.

use std::path::Path;
use std::time::{Duration, Instant};

use chrono::Utc;
use colored::Colorize;
use tracing::{error, info, warn};

use crate::deploy::compose::preview_compose;
use crate::deploy::driver::transfer_and_load;
use crate::deploy::secrets::{encrypt_and_upload, env_keys};
use crate::deploy::DeployContext;
use crate::errors::DockhandError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::pipeline::EventSink;
use crate::remote::{Connection, Connector, RemoteCommand, RemoteSessionExt};
use crate::storage::app_record::{AppRecord, AppRecordStore, PreviewEnvironment};
use crate::swap::containers::label_filters;
use crate::tooling::SourceControl;
use crate::utils::shell_quote;

/// Name of the compose file written for a preview
pub const PREVIEW_COMPOSE_FILE: &str = "docker-compose.yml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewReport {
    pub hash: String,
    pub host: String,
    pub image: String,
    pub duration: Duration,
}

/// Commit hash a preview is deployed under
///
/// The working tree must be clean so the hash names exactly what is built.
/// `requested` replaces the checked out commit's short hash.
pub async fn resolve_commit(
    vcs: &dyn SourceControl,
    dir: &Path,
    requested: Option<&str>,
) -> Result<String, DockhandError> {
    let clean = vcs
        .is_clean(dir)
        .await
        .map_err(|e| DockhandError::Precondition(format!("cannot inspect git tree: {e}")))?;
    if !clean {
        return Err(DockhandError::Precondition(
            "commit your changes before deploying a preview".to_string(),
        ));
    }

    let hash = match requested {
        Some(hash) => hash.trim().to_lowercase(),
        None => vcs
            .short_hash(dir)
            .await
            .map_err(|e| DockhandError::Precondition(format!("cannot read commit hash: {e}")))?,
    };
    validate_hash(&hash)?;
    Ok(hash)
}

/// Hashes end up in host names, service names and shell commands
fn validate_hash(hash: &str) -> Result<(), DockhandError> {
    let valid = !hash.is_empty()
        && hash.len() <= 40
        && hash
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase());
    if valid {
        Ok(())
    } else {
        Err(DockhandError::Precondition(format!(
            "invalid commit hash: {hash:?}"
        )))
    }
}

/// Deploys a preview environment
pub struct PreviewDriver {
    ctx: DeployContext,
    store: AppRecordStore,
    record: AppRecord,
    hash: String,
}

impl PreviewDriver {
    pub fn new(ctx: DeployContext, store: AppRecordStore, record: AppRecord, hash: String) -> Self {
        Self {
            ctx,
            store,
            record,
            hash,
        }
    }

    pub async fn run(self, sink: EventSink) -> Result<PreviewReport, DockhandError> {
        let started = Instant::now();
        info!("Deploying preview {} of {}", self.hash, self.record.name);

        match self.execute(&sink, started).await {
            Ok(report) => {
                sink.all_done(report.duration, report.host.clone());
                Ok(report)
            }
            Err(e) => {
                error!("Preview {} failed: {}", self.hash, e);
                sink.error(e.to_string());
                Err(e)
            }
        }
    }

    async fn execute(&self, sink: &EventSink, started: Instant) -> Result<PreviewReport, DockhandError> {
        let service = self.record.preview_service(&self.hash);
        let workdir = self.record.preview_dir(&self.hash);
        let plan = self.ctx.plan(&self.record, service, workdir.clone())?;

        self.ctx.checkpoint("connecting")?;
        let conn = self
            .ctx
            .connector
            .connect()
            .await
            .map_err(DockhandError::ConnectionError)?;
        sink.log(format!("Connected to {}", self.ctx.settings.server_address));
        sink.advance();

        let result = async {
            let image = self.record.preview_image(&self.hash);
            self.ctx.checkpoint("building")?;
            self.ctx
                .tools
                .containers
                .build(&self.ctx.project_dir, &[image.clone()], sink)
                .await
                .map_err(|e| DockhandError::BuildError(e.to_string()))?;
            sink.advance();

            self.ctx.checkpoint("saving the image")?;
            self.ship_image(&conn, &image, &workdir, sink).await?;
            sink.advance();

            self.ctx.checkpoint("launching")?;
            self.launch(&conn, &workdir, sink).await?;
            conn.session
                .run_relayed(plan.start(), sink)
                .await
                .map_err(DockhandError::RemoteCommandError)?;

            let host = self.record.preview_host(&self.hash);
            let mut record = self.record.clone();
            record.preview_environments.insert(
                self.hash.clone(),
                PreviewEnvironment {
                    url: host.clone(),
                    image: image.clone(),
                    created_at: Utc::now().to_rfc3339(),
                },
            );
            self.store
                .save(&record)
                .await
                .map_err(|e| DockhandError::PersistError(e.to_string()))?;
            sink.log(format!("Preview recorded under {}", self.hash));

            Ok(PreviewReport {
                hash: self.hash.clone(),
                host,
                image,
                duration: started.elapsed(),
            })
        }
        .await;

        if let Err(e) = conn.session.close().await {
            warn!("Failed to close session: {}", e);
        }
        result
    }

    async fn ship_image(
        &self,
        conn: &Connection,
        image: &str,
        workdir: &str,
        sink: &EventSink,
    ) -> Result<(), DockhandError> {
        let staging = Dir::create_temp_dir("dockhand-image").await?;
        let tar_name = format!("{}-{}.tar", self.record.image_repository(), self.hash);
        let tar = staging.file(&tar_name);

        let result = async {
            self.ctx
                .tools
                .containers
                .save(&[image.to_string()], tar.path(), sink)
                .await
                .map_err(|e| DockhandError::BuildError(e.to_string()))?;
            sink.advance();
            transfer_and_load(conn, tar.path(), workdir, &tar_name, sink).await
        }
        .await;

        if let Err(e) = staging.delete().await {
            warn!("Failed to remove {}: {}", staging.path().display(), e);
        }
        result
    }

    /// Upload the compose file and, when declared, the encrypted env file
    async fn launch(&self, conn: &Connection, workdir: &str, sink: &EventSink) -> Result<(), DockhandError> {
        let keys = if self.record.has_env_file() {
            let env_path = self.ctx.project_dir.join(&self.record.env.file);
            let content = File::new(&env_path).read_string().await.map_err(|e| {
                DockhandError::SecretsError(format!("cannot read {}: {e}", env_path.display()))
            })?;
            encrypt_and_upload(
                self.ctx.tools.encryptor.as_ref(),
                conn.transfer.as_ref(),
                &env_path,
                &self.ctx.settings.public_key,
                workdir,
            )
            .await?;
            sink.log("Uploaded encrypted env file");
            env_keys(&content)
        } else {
            Vec::new()
        };

        let compose = preview_compose(&self.record, &self.hash, &self.ctx.settings.project, &keys);
        let staging = Dir::create_temp_dir("dockhand-compose").await?;
        let file = staging.file(PREVIEW_COMPOSE_FILE);

        let result = async {
            file.write_string(&compose.to_yaml()?).await?;
            conn.transfer
                .upload(file.path(), &format!("{}/{}", workdir, PREVIEW_COMPOSE_FILE))
                .await
                .map_err(|e| DockhandError::TransferError(e.to_string()))
        }
        .await;

        if let Err(e) = staging.delete().await {
            warn!("Failed to remove {}: {}", staging.path().display(), e);
        }
        result?;
        sink.log(format!("Uploaded {PREVIEW_COMPOSE_FILE}"));
        Ok(())
    }
}

/// Table of the preview environments of `record`, sorted by hash
pub fn render_preview_table(record: &AppRecord) -> String {
    if record.preview_environments.is_empty() {
        return format!(
            "{} has no preview environments; deploy one with `dockhand preview`\n",
            record.name
        );
    }

    let mut out = format!(
        "{:<12} {:<24} {:<27} {}\n",
        "COMMIT".bold(),
        "IMAGE".bold(),
        "CREATED".bold(),
        "URL".bold()
    );
    for (hash, env) in &record.preview_environments {
        out.push_str(&format!(
            "{:<12} {:<24} {:<27} {}\n",
            hash.cyan(),
            env.image,
            env.created_at,
            format!("https://{}", env.url).green()
        ));
    }
    out
}

/// Stop and delete a preview environment and forget it
///
/// Unknown hashes fail before anything on the host is touched. Returns the
/// updated record.
pub async fn remove_preview(
    connector: &dyn Connector,
    project: &str,
    store: &AppRecordStore,
    mut record: AppRecord,
    hash: &str,
) -> Result<AppRecord, DockhandError> {
    let entry = record
        .preview_environments
        .get(hash)
        .cloned()
        .ok_or_else(|| DockhandError::NotFound(format!("no preview environment for {hash}")))?;

    let conn = connector
        .connect()
        .await
        .map_err(DockhandError::ConnectionError)?;

    let service = record.preview_service(hash);
    let commands = [
        format!(
            "docker ps -aq {} | xargs -r docker rm -f",
            label_filters(project, &service)
        ),
        format!("docker image rm -f {}", shell_quote(&entry.image)),
        format!("rm -rf {}", shell_quote(&record.preview_dir(hash))),
    ];

    let result = async {
        for command in commands {
            conn.session
                .run(RemoteCommand::new(command))
                .await
                .map_err(DockhandError::RemoteCommandError)?;
        }
        Ok::<(), DockhandError>(())
    }
    .await;
    if let Err(e) = conn.session.close().await {
        warn!("Failed to close session: {}", e);
    }
    result?;

    record.preview_environments.remove(hash);
    store
        .save(&record)
        .await
        .map_err(|e| DockhandError::PersistError(e.to_string()))?;
    info!("Removed preview {} of {}", hash, record.name);
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_hash() {
        assert!(validate_hash("abc1234").is_ok());
        assert!(validate_hash("").is_err());
        assert!(validate_hash("abc 123").is_err());
        assert!(validate_hash("ABC1234").is_err());
        assert!(validate_hash("abc;rm").is_err());
    }

    #[test]
    fn test_table_sorted_by_hash() {
        colored::control::set_override(false);
        let record: AppRecord = serde_yaml_ng::from_str(
            r#"
name: api
version: V3
url: api.example.com
port: 8080
previewEnvironments:
  def5678:
    url: def5678.api.example.com
    image: api:def5678
    createdAt: "2024-06-02T10:00:00Z"
  abc1234:
    url: abc1234.api.example.com
    image: api:abc1234
    createdAt: "2024-06-01T10:00:00Z"
"#,
        )
        .unwrap();

        let table = render_preview_table(&record);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("COMMIT"));
        assert!(lines[1].starts_with("abc1234"));
        assert!(lines[1].ends_with("https://abc1234.api.example.com"));
        assert!(lines[2].starts_with("def5678"));
    }

    #[test]
    fn test_empty_table() {
        let record: AppRecord =
            serde_yaml_ng::from_str("name: api\nversion: V3\nurl: api.example.com\nport: 8080\n")
                .unwrap();
        assert!(render_preview_table(&record).contains("no preview environments"));
    }
}
