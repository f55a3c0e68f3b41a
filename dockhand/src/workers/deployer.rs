//! Deployment worker
//!
//! Runs one driver on its own task. The worker and the render loop share
//! nothing but the event channel behind the [`EventSink`].

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::deploy::{DeployReport, DeploymentDriver, PreviewDriver, PreviewReport};
use crate::errors::DockhandError;
use crate::pipeline::EventSink;

/// A unit of work for the deployer
pub enum Job {
    Deploy(DeploymentDriver),
    Preview(PreviewDriver),
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::Deploy(_) => "deploy",
            Job::Preview(_) => "preview",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobReport {
    Deployed(DeployReport),
    Previewed(PreviewReport),
}

/// Run the job to completion
///
/// The driver reports its own terminal event; the returned result is only
/// for the caller's logs.
pub async fn run(job: Job, sink: EventSink) -> Result<JobReport, DockhandError> {
    let name = job.name();
    info!("Deployer worker starting {} job...", name);

    let result = match job {
        Job::Deploy(driver) => driver.run(sink).await.map(JobReport::Deployed),
        Job::Preview(driver) => driver.run(sink).await.map(JobReport::Previewed),
    };

    match &result {
        Ok(_) => info!("Deployer worker finished {} job", name),
        Err(e) => error!("Deployer worker {} job failed: {}", name, e),
    }
    result
}

/// Spawn the job on the runtime
pub fn spawn(job: Job, sink: EventSink) -> JoinHandle<Result<JobReport, DockhandError>> {
    tokio::spawn(run(job, sink))
}
