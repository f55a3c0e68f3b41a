//! Blue-green swap state machine
//!
//! Steps, in order:
//!
//! 1. identify the old container (oldest running one of the service)
//! 2. scale the service to 2 without recreating the old container
//! 3. identify the new container (newest); it must differ from the old
//! 4. resolve the new container's private address
//! 5. gate on an HTTP health check
//! 6. on failure remove the new container and scale back to 1
//! 7. on success retire the old container and scale back to 1
//!
//! The old container keeps serving traffic until step 7.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::pipeline::EventSink;
use crate::remote::{RemoteCommand, RemoteError, RemoteSession, RemoteSessionExt};
use crate::swap::containers::{list_containers, resolve_address, short_id, ContainerInfo};
use crate::swap::health::{GateOutcome, HealthGate};
use crate::swap::{SwapError, SwapPlan};

/// What a completed swap did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapReport {
    pub old_container: String,
    pub new_container: String,
    pub address: String,
    pub health_attempts: u32,
}

#[derive(Debug)]
enum State {
    IdentifyOld,
    ScaleUp {
        old: ContainerInfo,
    },
    IdentifyNew {
        old: ContainerInfo,
    },
    ResolveAddress {
        old: ContainerInfo,
        new: ContainerInfo,
    },
    HealthGate {
        old: ContainerInfo,
        new: ContainerInfo,
        address: String,
    },
    Retire {
        old: ContainerInfo,
        new: ContainerInfo,
        address: String,
        attempts: u32,
    },
    RollBack {
        new: Option<ContainerInfo>,
        cause: SwapError,
    },
    Done(SwapReport),
    Failed(SwapError),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::IdentifyOld => "identify-old",
            State::ScaleUp { .. } => "scale-up",
            State::IdentifyNew { .. } => "identify-new",
            State::ResolveAddress { .. } => "resolve-address",
            State::HealthGate { .. } => "health-gate",
            State::Retire { .. } => "retire-old",
            State::RollBack { .. } => "roll-back",
            State::Done(_) => "done",
            State::Failed(_) => "failed",
        }
    }
}

/// Replaces the running container of a service with a freshly built one
pub struct BlueGreenSwap {
    session: Arc<dyn RemoteSession>,
    gate: HealthGate,
}

impl BlueGreenSwap {
    pub fn new(session: Arc<dyn RemoteSession>, gate: HealthGate) -> Self {
        Self { session, gate }
    }

    /// Run the swap to completion
    ///
    /// Returns an error only after the rollback ran; the old container is
    /// left serving unless the rollback itself failed.
    pub async fn execute(&self, plan: &SwapPlan, sink: &EventSink) -> Result<SwapReport, SwapError> {
        let mut state = State::IdentifyOld;
        loop {
            info!("Swap {}: {}", plan.service, state.name());
            state = match state {
                State::Done(report) => return Ok(report),
                State::Failed(err) => {
                    error!("Swap of {} failed: {}", plan.service, err);
                    return Err(err);
                }
                state => self.step(state, plan, sink).await,
            };
        }
    }

    async fn step(&self, state: State, plan: &SwapPlan, sink: &EventSink) -> State {
        match state {
            State::IdentifyOld => self.identify_old(plan, sink).await,
            State::ScaleUp { old } => {
                sink.log(format!("Starting a new {} container next to the old one", plan.service));
                match self.session.run_relayed(plan.scale(2), sink).await {
                    Ok(()) => State::IdentifyNew { old },
                    Err(e) => State::RollBack {
                        new: None,
                        cause: e.into(),
                    },
                }
            }
            State::IdentifyNew { old } => self.identify_new(plan, old).await,
            State::ResolveAddress { old, new } => {
                match resolve_address(self.session.as_ref(), &new.id).await {
                    Ok(address) => {
                        sink.log(format!(
                            "New container {} is at {}",
                            new.short_id(),
                            address
                        ));
                        State::HealthGate { old, new, address }
                    }
                    Err(cause) => State::RollBack {
                        new: Some(new),
                        cause,
                    },
                }
            }
            State::HealthGate { old, new, address } => {
                match self.gate.wait_healthy(&address, plan.port, sink).await {
                    Ok(GateOutcome::Healthy { attempts, .. }) => State::Retire {
                        old,
                        new,
                        address,
                        attempts,
                    },
                    Ok(GateOutcome::Unhealthy { status, .. }) => State::RollBack {
                        new: Some(new),
                        cause: SwapError::Unhealthy { status },
                    },
                    Ok(GateOutcome::Exhausted { attempts }) => State::RollBack {
                        new: Some(new),
                        cause: SwapError::HealthGateExhausted { attempts },
                    },
                    Err(e) => State::RollBack {
                        new: Some(new),
                        cause: e.into(),
                    },
                }
            }
            State::Retire {
                old,
                new,
                address,
                attempts,
            } => self.retire(plan, sink, old, new, address, attempts).await,
            State::RollBack { new, cause } => self.roll_back(plan, sink, new, cause).await,
            done @ (State::Done(_) | State::Failed(_)) => done,
        }
    }

    async fn identify_old(&self, plan: &SwapPlan, sink: &EventSink) -> State {
        let containers =
            match list_containers(self.session.as_ref(), &plan.project, &plan.service).await {
                Ok(c) => c,
                Err(e) => return State::Failed(e),
            };
        if containers.len() > 1 {
            warn!(
                "{} has {} running containers, treating the oldest as live",
                plan.service,
                containers.len()
            );
        }
        match containers.into_iter().next() {
            Some(old) => {
                sink.log(format!("Live container is {}", old.short_id()));
                State::ScaleUp { old }
            }
            None => State::Failed(SwapError::NoRunningContainer {
                service: plan.service.clone(),
            }),
        }
    }

    async fn identify_new(&self, plan: &SwapPlan, old: ContainerInfo) -> State {
        let containers =
            match list_containers(self.session.as_ref(), &plan.project, &plan.service).await {
                Ok(c) => c,
                Err(cause) => return State::RollBack { new: None, cause },
            };
        match containers.into_iter().last() {
            Some(new) if new.id != old.id => State::ResolveAddress { old, new },
            _ => {
                warn!("Newest container of {} is still {}", plan.service, old.id);
                State::RollBack {
                    new: None,
                    cause: SwapError::IdentityCollision { id: old.id },
                }
            }
        }
    }

    async fn retire(
        &self,
        plan: &SwapPlan,
        sink: &EventSink,
        old: ContainerInfo,
        new: ContainerInfo,
        address: String,
        attempts: u32,
    ) -> State {
        sink.log(format!("Retiring old container {}", old.short_id()));
        let stop = RemoteCommand::new(format!("docker stop {id} && docker rm {id}", id = old.id));
        if let Err(e) = self.session.run_relayed(stop, sink).await {
            return State::Failed(e.into());
        }
        if let Err(e) = self.session.run_relayed(plan.scale(1), sink).await {
            return State::Failed(e.into());
        }
        info!(
            "Swapped {}: {} -> {}",
            plan.service,
            short_id(&old.id),
            short_id(&new.id)
        );
        State::Done(SwapReport {
            old_container: old.id,
            new_container: new.id,
            address,
            health_attempts: attempts,
        })
    }

    async fn roll_back(
        &self,
        plan: &SwapPlan,
        sink: &EventSink,
        new: Option<ContainerInfo>,
        cause: SwapError,
    ) -> State {
        warn!("Rolling back {}: {}", plan.service, cause);
        sink.log(format!("Rolling back: {cause}"));

        if let Some(new) = new {
            let remove = RemoteCommand::new(format!("docker rm -f {}", new.id));
            if let Err(rollback) = self.session.run_relayed(remove, sink).await {
                return rollback_failed(cause, rollback);
            }
        }
        if let Err(rollback) = self.session.run_relayed(plan.scale(1), sink).await {
            return rollback_failed(cause, rollback);
        }

        sink.log("Previous version is still live");
        State::Failed(cause)
    }
}

fn rollback_failed(cause: SwapError, rollback: RemoteError) -> State {
    error!("Rollback failed: {}", rollback);
    State::Failed(SwapError::RollbackFailed {
        cause: Box::new(cause),
        rollback,
    })
}
