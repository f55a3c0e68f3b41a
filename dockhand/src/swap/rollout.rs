//! Bringing a new image live, whether or not the service already runs

use std::sync::Arc;

use tracing::info;

use crate::pipeline::EventSink;
use crate::remote::{RemoteSession, RemoteSessionExt};
use crate::swap::containers::list_containers;
use crate::swap::health::{HealthGate, SleepFn};
use crate::swap::protocol::{BlueGreenSwap, SwapReport};
use crate::swap::{GateSettings, HealthProbe, SwapError, SwapPlan};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutOutcome {
    /// Nothing was running; the service was started from scratch
    FirstStart,

    /// The running container was replaced
    Swapped(SwapReport),
}

/// Chooses between a first start and a blue-green swap
pub struct Rollout {
    session: Arc<dyn RemoteSession>,
    swap: BlueGreenSwap,
}

impl Rollout {
    pub fn new(
        session: Arc<dyn RemoteSession>,
        probe: Arc<dyn HealthProbe>,
        settings: GateSettings,
        sleep_fn: SleepFn,
    ) -> Self {
        let gate = HealthGate::new(probe, settings, sleep_fn);
        Self {
            swap: BlueGreenSwap::new(session.clone(), gate),
            session,
        }
    }

    pub async fn apply(&self, plan: &SwapPlan, sink: &EventSink) -> Result<RolloutOutcome, SwapError> {
        let running = list_containers(self.session.as_ref(), &plan.project, &plan.service).await?;
        if running.is_empty() {
            info!("{} is not running, starting it", plan.service);
            sink.log(format!("{} is not running yet, starting it", plan.service));
            self.session.run_relayed(plan.start(), sink).await?;
            return Ok(RolloutOutcome::FirstStart);
        }

        self.swap.execute(plan, sink).await.map(RolloutOutcome::Swapped)
    }
}
