//! Deployment drivers
//!
//! A driver walks its pipeline's stages in order, doing the work of each
//! one and reporting progress through an [`EventSink`]. It never touches
//! the pipeline itself.
//!
//! [`EventSink`]: crate::pipeline::EventSink

pub mod compose;
pub mod driver;
pub mod preview;
pub mod secrets;
pub mod stages;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::errors::DockhandError;
use crate::remote::Connector;
use crate::storage::app_record::AppRecord;
use crate::storage::settings::Settings;
use crate::swap::health::{tokio_sleep, SleepFn};
use crate::swap::{GateSettings, SwapPlan};
use crate::tooling::Toolkit;

pub use driver::{DeployReport, DeploymentDriver};
pub use preview::{PreviewDriver, PreviewReport};

/// Operator request to stop a run
///
/// Drivers look at it only between stages and only until the cutover
/// starts. A swap that began always runs to its end, and so does the
/// record write after it.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a driver needs besides the application record
#[derive(Clone)]
pub struct DeployContext {
    /// Directory holding the application's sources and record
    pub project_dir: PathBuf,
    pub settings: Settings,
    pub connector: Arc<dyn Connector>,
    pub tools: Toolkit,
    pub gate: GateSettings,
    pub sleep_fn: SleepFn,
    pub stop: StopFlag,
}

impl DeployContext {
    pub fn new(
        project_dir: PathBuf,
        settings: Settings,
        connector: Arc<dyn Connector>,
        tools: Toolkit,
    ) -> Self {
        Self {
            project_dir,
            settings,
            connector,
            tools,
            gate: GateSettings::default(),
            sleep_fn: tokio_sleep(),
            stop: StopFlag::default(),
        }
    }

    pub fn with_stop(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    /// Fail with `Cancelled` when a stop was requested before `next`
    pub fn checkpoint(&self, next: &str) -> Result<(), DockhandError> {
        if self.stop.is_requested() {
            info!("Stopping before {}", next);
            return Err(DockhandError::Cancelled(next.to_string()));
        }
        Ok(())
    }

    pub fn with_gate(mut self, gate: GateSettings, sleep_fn: SleepFn) -> Self {
        self.gate = gate;
        self.sleep_fn = sleep_fn;
        self
    }

    /// Compose plan for a service of `record` living in `workdir`
    ///
    /// An app with an env file needs the age secret key on the host.
    pub fn plan(
        &self,
        record: &AppRecord,
        service: String,
        workdir: String,
    ) -> Result<SwapPlan, DockhandError> {
        let secret_key = if record.has_env_file() {
            Some(self.settings.secret_key.clone().ok_or_else(|| {
                DockhandError::Precondition(format!(
                    "{} declares env file {} but no secret_key is configured",
                    record.name, record.env.file
                ))
            })?)
        } else {
            None
        };

        Ok(SwapPlan {
            project: self.settings.project.clone(),
            service,
            workdir,
            port: record.port,
            secret_key,
        })
    }
}
