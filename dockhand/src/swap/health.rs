//! Health gate in front of a cutover

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::pipeline::EventSink;
use crate::remote::{RemoteCommand, RemoteError, RemoteSession, RemoteSessionExt};

/// Outcome of one probe attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// Nothing listens on the port yet
    Refused,

    /// Something answered but not with a complete HTTP response in time
    NotReady,

    /// An HTTP response arrived
    Status(u16),
}

/// Probes an HTTP endpoint on the host's private network
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, address: &str, port: u16) -> Result<ProbeResult, RemoteError>;
}

/// Runs `curl` on the host, where the container's private address is reachable
pub struct RemoteCurlProbe {
    session: Arc<dyn RemoteSession>,
    timeout: Duration,
}

impl RemoteCurlProbe {
    pub fn new(session: Arc<dyn RemoteSession>) -> Self {
        Self {
            session,
            timeout: Duration::from_secs(1),
        }
    }

    pub fn command(&self, address: &str, port: u16) -> RemoteCommand {
        let timeout = self.timeout.as_secs().max(1);
        RemoteCommand::new(format!(
            "curl --silent --output /dev/null --write-out '%{{http_code}}' \
             --connect-timeout {timeout} --max-time {timeout} http://{}:{}/",
            address,
            port
        ))
    }
}

// curl exit codes
const CURL_COULDNT_CONNECT: i32 = 7;
const CURL_NOT_FOUND: i32 = 127;

#[async_trait]
impl HealthProbe for RemoteCurlProbe {
    async fn probe(&self, address: &str, port: u16) -> Result<ProbeResult, RemoteError> {
        match self.session.run(self.command(address, port)).await {
            Ok(output) => Ok(parse_status(&output.stdout_text())),
            Err(RemoteError::CommandFailed {
                exit_code: CURL_COULDNT_CONNECT,
                ..
            }) => Ok(ProbeResult::Refused),
            Err(
                err @ RemoteError::CommandFailed {
                    exit_code: CURL_NOT_FOUND,
                    ..
                },
            ) => Err(err),
            // Timeouts, resets and empty replies
            Err(RemoteError::CommandFailed { .. }) => Ok(ProbeResult::NotReady),
            Err(err) => Err(err),
        }
    }
}

fn parse_status(text: &str) -> ProbeResult {
    match text.trim().parse::<u16>() {
        Ok(0) | Err(_) => ProbeResult::NotReady,
        Ok(code) => ProbeResult::Status(code),
    }
}

/// Retry budget of the gate
#[derive(Debug, Clone)]
pub struct GateSettings {
    pub attempts: u32,
    pub interval: Duration,
}

impl GateSettings {
    /// Wall-clock ceiling of the whole gate, however slow single probes are
    pub fn deadline(&self) -> Duration {
        self.interval * self.attempts.max(1)
    }
}

/// Statuses an app answers with while it warms up
///
/// Same set curl's `--retry` treats as transient.
pub fn is_transient(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval: Duration::from_secs(1),
        }
    }
}

/// Sleep used between attempts
pub type SleepFn = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

/// Sleep on the tokio timer
pub fn tokio_sleep() -> SleepFn {
    Arc::new(|d| Box::pin(tokio::time::sleep(d)))
}

/// What the gate decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Healthy { attempts: u32, status: u16 },
    Unhealthy { attempts: u32, status: u16 },
    Exhausted { attempts: u32 },
}

/// Bounded retry of a [`HealthProbe`]
///
/// Refused, not-ready and transient-status attempts are retried until the
/// attempt budget or the deadline runs out. Any HTTP status below 400
/// passes; any other status fails at once.
#[derive(Clone)]
pub struct HealthGate {
    probe: Arc<dyn HealthProbe>,
    settings: GateSettings,
    sleep_fn: SleepFn,
}

impl HealthGate {
    pub fn new(probe: Arc<dyn HealthProbe>, settings: GateSettings, sleep_fn: SleepFn) -> Self {
        Self {
            probe,
            settings,
            sleep_fn,
        }
    }

    pub fn settings(&self) -> &GateSettings {
        &self.settings
    }

    pub async fn wait_healthy(
        &self,
        address: &str,
        port: u16,
        sink: &EventSink,
    ) -> Result<GateOutcome, RemoteError> {
        let budget = self.settings.attempts.max(1);
        let deadline = Instant::now() + self.settings.deadline();
        info!("Health gate on {}:{} ({} attempts)", address, port, budget);

        for attempt in 1..=budget {
            let result = self.probe.probe(address, port).await?;
            debug!("Health probe {}/{}: {:?}", attempt, budget, result);

            match result {
                ProbeResult::Status(status) if status < 400 => {
                    sink.log(format!("Health check passed with HTTP {status}"));
                    return Ok(GateOutcome::Healthy {
                        attempts: attempt,
                        status,
                    });
                }
                ProbeResult::Status(status) if is_transient(status) => {
                    sink.log(format!(
                        "Waiting for the new container ({attempt}/{budget}): HTTP {status}"
                    ));
                }
                ProbeResult::Status(status) => {
                    warn!("Health check answered HTTP {}", status);
                    sink.log(format!("Health check failed with HTTP {status}"));
                    return Ok(GateOutcome::Unhealthy {
                        attempts: attempt,
                        status,
                    });
                }
                ProbeResult::Refused => {
                    sink.log(format!(
                        "Waiting for the new container ({attempt}/{budget}): connection refused"
                    ));
                }
                ProbeResult::NotReady => {
                    sink.log(format!(
                        "Waiting for the new container ({attempt}/{budget}): no response yet"
                    ));
                }
            }

            if Instant::now() >= deadline {
                warn!("Health gate ran past its deadline after {} attempts", attempt);
                return Ok(GateOutcome::Exhausted { attempts: attempt });
            }
            if attempt < budget {
                (self.sleep_fn)(self.settings.interval).await;
            }
        }

        warn!("Health gate exhausted after {} attempts", budget);
        Ok(GateOutcome::Exhausted { attempts: budget })
    }
}
