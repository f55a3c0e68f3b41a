//! Zero-downtime container replacement on the target host
//!
//! The swap runs next to the live container: scale the service to two,
//! gate the newcomer on an HTTP health check, then retire the old one.
//! Any failure before the old container is retired rolls back to the old
//! container alone.

pub mod containers;
pub mod health;
pub mod protocol;
pub mod rollout;

use std::sync::Arc;

use secrecy::SecretString;
use thiserror::Error;

use crate::remote::{RemoteCommand, RemoteError};
use crate::utils::shell_quote;

pub use health::{GateSettings, HealthGate, HealthProbe, ProbeResult, RemoteCurlProbe};
pub use protocol::{BlueGreenSwap, SwapReport};
pub use rollout::{Rollout, RolloutOutcome};

/// Name of the encrypted env file next to a compose file on the host
pub const ENCRYPTED_ENV_FILE: &str = "encrypted.env";

/// Environment variable sops reads the age secret key from
pub const SOPS_KEY_ENV: &str = "SOPS_AGE_KEY";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SwapError {
    #[error("no running container for service {service}")]
    NoRunningContainer { service: String },

    #[error("scaling up did not start a distinguishable new container (still {id}); scale restored to 1")]
    IdentityCollision { id: String },

    #[error("container {id} has no private network address")]
    NoAddress { id: String },

    #[error("health check answered HTTP {status}; new container removed")]
    Unhealthy { status: u16 },

    #[error("health check did not pass after {attempts} attempts; new container removed")]
    HealthGateExhausted { attempts: u32 },

    #[error("unexpected container listing: {0}")]
    Listing(String),

    #[error("{0}")]
    Remote(#[from] RemoteError),

    #[error("{cause}; rollback also failed: {rollback}")]
    RollbackFailed {
        cause: Box<SwapError>,
        rollback: RemoteError,
    },
}

/// What to swap and how to reach its compose project
#[derive(Clone)]
pub struct SwapPlan {
    /// Compose project the service belongs to
    pub project: String,

    /// Compose service name
    pub service: String,

    /// Remote directory holding the compose file
    pub workdir: String,

    /// Port the application listens on inside the container
    pub port: u16,

    /// Age secret key when the service reads an encrypted env file
    pub secret_key: Option<Arc<SecretString>>,
}

impl SwapPlan {
    /// A `docker compose` invocation for this service's project, run from
    /// its directory and wrapped in `sops exec-env` when secrets are used
    pub fn compose(&self, args: &str) -> RemoteCommand {
        let compose = format!("docker compose -p {} {}", self.project, args);
        let workdir = shell_quote(&self.workdir);
        match &self.secret_key {
            Some(key) => RemoteCommand::new(format!(
                "cd {} && sops exec-env {} {}",
                workdir,
                ENCRYPTED_ENV_FILE,
                shell_quote(&compose)
            ))
            .with_secret_env(SOPS_KEY_ENV, key.clone()),
            None => RemoteCommand::new(format!("cd {} && {}", workdir, compose)),
        }
    }

    /// Scale the service to `replicas` without touching existing containers
    pub fn scale(&self, replicas: u32) -> RemoteCommand {
        self.compose(&format!(
            "up -d --no-deps --scale {svc}={replicas} --no-recreate {svc}",
            svc = self.service
        ))
    }

    /// Start the service from nothing
    pub fn start(&self) -> RemoteCommand {
        self.compose(&format!("up -d --no-deps {}", self.service))
    }
}

impl std::fmt::Debug for SwapPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapPlan")
            .field("project", &self.project)
            .field("service", &self.service)
            .field("workdir", &self.workdir)
            .field("port", &self.port)
            .field("secrets", &self.secret_key.is_some())
            .finish()
    }
}
