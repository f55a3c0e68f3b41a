//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use dockhand::deploy::DeployContext;
use dockhand::pipeline::{EventSink, PipelineEvent};
use dockhand::remote::{
    Connection, Connector, FileTransfer, RemoteCommand, RemoteError, RemoteExecution,
    RemoteSession,
};
use dockhand::storage::app_record::{AppRecord, AppRecordStore};
use dockhand::storage::layout::ProjectLayout;
use dockhand::storage::settings::Settings;
use dockhand::swap::health::SleepFn;
use dockhand::swap::GateSettings;
use dockhand::tooling::{ContainerTool, SecretEncryptor, SourceControl, ToolError, Toolkit};

pub const OLD_ID: &str = "aaaaaaaaaaaa0000000000000000000000000000000000000000000000000001";
pub const NEW_ID: &str = "bbbbbbbbbbbb0000000000000000000000000000000000000000000000000002";
pub const OLD_CREATED: &str = "2024-06-01T10:00:00.000000000Z";
pub const NEW_CREATED: &str = "2024-06-03T10:00:00.000000000Z";

// ================================= REMOTE ======================================= //

/// Canned result of one remote command
#[derive(Debug, Clone)]
pub struct Reply {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub result: Result<(), RemoteError>,
}

impl Reply {
    pub fn ok(stdout: &str) -> Self {
        Self {
            stdout: stdout.lines().map(str::to_string).collect(),
            stderr: Vec::new(),
            result: Ok(()),
        }
    }

    pub fn fail(exit_code: i32, stderr: &str) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: vec![stderr.to_string()],
            result: Err(RemoteError::CommandFailed {
                exit_code,
                last_stderr: stderr.to_string(),
                stderr: vec![stderr.to_string()],
            }),
        }
    }

    pub fn lost() -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            result: Err(RemoteError::ConnectionLost {
                last_stderr: "Connection reset by peer".to_string(),
            }),
        }
    }
}

struct Rule {
    pattern: String,
    replies: Vec<Reply>,
    served: usize,
}

/// Scripted remote session
///
/// A command is answered by the first rule whose pattern it contains. Each
/// rule serves its replies in order and keeps repeating the last one.
/// Unmatched commands succeed with no output.
#[derive(Default)]
pub struct FakeRemote {
    rules: Mutex<Vec<Rule>>,
    log: Mutex<Vec<String>>,
    closed: AtomicU32,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: &str, reply: Reply) -> Self {
        self.on_seq(pattern, vec![reply])
    }

    pub fn on_seq(self, pattern: &str, replies: Vec<Reply>) -> Self {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            replies,
            served: 0,
        });
        self
    }

    /// Every command received, rendered without secrets
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(pattern)).count()
    }

    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.contains(pattern))
    }

    pub fn closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }

    fn reply_for(&self, script: &str) -> Reply {
        let mut rules = self.rules.lock().unwrap();
        match rules.iter_mut().find(|r| script.contains(&r.pattern)) {
            Some(rule) => {
                let index = rule.served.min(rule.replies.len() - 1);
                rule.served += 1;
                rule.replies[index].clone()
            }
            None => Reply::ok(""),
        }
    }
}

#[async_trait]
impl RemoteSession for FakeRemote {
    async fn exec(&self, command: RemoteCommand) -> Result<RemoteExecution, RemoteError> {
        self.log.lock().unwrap().push(command.to_string());
        let reply = self.reply_for(command.script());

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (err_tx, err_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        for line in reply.stdout {
            let _ = out_tx.send(line);
        }
        for line in reply.stderr {
            let _ = err_tx.send(line);
        }
        let _ = done_tx.send(reply.result);
        Ok(RemoteExecution::new(out_rx, err_rx, done_rx))
    }

    async fn close(&self) -> Result<(), RemoteError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// `docker ps | docker inspect` output for the given containers
pub fn listing(containers: &[(&str, &str)]) -> Reply {
    let lines: Vec<String> = containers
        .iter()
        .map(|(id, created)| format!("{id} {created}"))
        .collect();
    Reply::ok(&lines.join("\n"))
}

/// A remote with one live container that scales up cleanly and answers
/// the health check with `status`
pub fn healthy_host(status: &str) -> FakeRemote {
    FakeRemote::new()
        .on_seq(
            "docker ps -q",
            vec![
                listing(&[(OLD_ID, OLD_CREATED)]),
                listing(&[(OLD_ID, OLD_CREATED)]),
                listing(&[(NEW_ID, NEW_CREATED), (OLD_ID, OLD_CREATED)]),
            ],
        )
        .on("docker inspect -f", Reply::ok("172.18.0.5 "))
        .on("curl", Reply::ok(status))
}

/// One recorded upload
#[derive(Debug, Clone)]
pub struct Upload {
    pub remote: String,
    pub contents: String,
}

/// Records uploads, keeping text contents for inspection
#[derive(Default)]
pub struct FakeTransfer {
    uploads: Mutex<Vec<Upload>>,
    fail_on: Option<String>,
}

impl FakeTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(pattern: &str) -> Self {
        Self {
            uploads: Mutex::new(Vec::new()),
            fail_on: Some(pattern.to_string()),
        }
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn uploaded(&self, remote: &str) -> Option<Upload> {
        self.uploads().into_iter().find(|u| u.remote == remote)
    }
}

#[async_trait]
impl FileTransfer for FakeTransfer {
    async fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        if self.fail_on.as_deref().is_some_and(|p| remote.contains(p)) {
            return Err(RemoteError::ConnectionLost {
                last_stderr: "lost connection".to_string(),
            });
        }
        let contents = std::fs::read(local)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default();
        self.uploads.lock().unwrap().push(Upload {
            remote: remote.to_string(),
            contents,
        });
        Ok(())
    }
}

pub struct FakeConnector {
    pub remote: Arc<FakeRemote>,
    pub transfer: Arc<FakeTransfer>,
    pub refuse: Option<RemoteError>,
    connects: AtomicU32,
}

impl FakeConnector {
    pub fn new(remote: FakeRemote, transfer: FakeTransfer) -> Self {
        Self {
            remote: Arc::new(remote),
            transfer: Arc::new(transfer),
            refuse: None,
            connects: AtomicU32::new(0),
        }
    }

    pub fn refusing(error: RemoteError) -> Self {
        Self {
            refuse: Some(error),
            ..Self::new(FakeRemote::new(), FakeTransfer::new())
        }
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Connection, RemoteError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.refuse {
            return Err(err.clone());
        }
        Ok(Connection {
            session: self.remote.clone(),
            transfer: self.transfer.clone(),
        })
    }
}

// ================================= TOOLING ====================================== //

#[derive(Default)]
pub struct FakeContainerTool {
    pub builds: Mutex<Vec<Vec<String>>>,
    pub saves: Mutex<Vec<(Vec<String>, PathBuf)>>,
    pub fail_build: bool,
}

impl FakeContainerTool {
    pub fn failing_build() -> Self {
        Self {
            fail_build: true,
            ..Default::default()
        }
    }

    pub fn built_tags(&self) -> Vec<Vec<String>> {
        self.builds.lock().unwrap().clone()
    }

    pub fn saved(&self) -> Vec<(Vec<String>, PathBuf)> {
        self.saves.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerTool for FakeContainerTool {
    async fn build(&self, _context: &Path, tags: &[String], sink: &EventSink) -> Result<(), ToolError> {
        sink.log("#1 [internal] load build definition from Dockerfile");
        if self.fail_build {
            return Err(ToolError::Failed {
                program: "docker".to_string(),
                exit_code: Some(1),
                last_line: "failed to solve: dockerfile parse error".to_string(),
            });
        }
        self.builds.lock().unwrap().push(tags.to_vec());
        Ok(())
    }

    async fn save(&self, refs: &[String], output: &Path, _sink: &EventSink) -> Result<(), ToolError> {
        std::fs::write(output, b"image tarball")?;
        self.saves
            .lock()
            .unwrap()
            .push((refs.to_vec(), output.to_path_buf()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeEncryptor {
    calls: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeEncryptor {
    pub fn calls(&self) -> Vec<(PathBuf, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SecretEncryptor for FakeEncryptor {
    async fn encrypt(&self, input: &Path, public_key: &str, output: &Path) -> Result<(), ToolError> {
        let plain = std::fs::read_to_string(input)?;
        let encrypted: String = plain
            .lines()
            .filter_map(|l| l.split_once('='))
            .map(|(k, _)| format!("{k}=ENC[AES256_GCM,data:redacted]\n"))
            .collect();
        std::fs::write(output, encrypted)?;
        self.calls
            .lock()
            .unwrap()
            .push((input.to_path_buf(), public_key.to_string()));
        Ok(())
    }
}

pub struct FakeVcs {
    pub clean: bool,
    pub hash: String,
}

impl FakeVcs {
    pub fn clean(hash: &str) -> Self {
        Self {
            clean: true,
            hash: hash.to_string(),
        }
    }

    pub fn dirty() -> Self {
        Self {
            clean: false,
            hash: "abc1234".to_string(),
        }
    }
}

#[async_trait]
impl SourceControl for FakeVcs {
    async fn is_clean(&self, _dir: &Path) -> Result<bool, ToolError> {
        Ok(self.clean)
    }

    async fn short_hash(&self, _dir: &Path) -> Result<String, ToolError> {
        Ok(self.hash.clone())
    }
}

pub struct Tools {
    pub containers: Arc<FakeContainerTool>,
    pub encryptor: Arc<FakeEncryptor>,
    pub vcs: Arc<FakeVcs>,
}

impl Tools {
    pub fn new() -> Self {
        Self::with_containers(FakeContainerTool::default())
    }

    pub fn with_containers(containers: FakeContainerTool) -> Self {
        Self {
            containers: Arc::new(containers),
            encryptor: Arc::new(FakeEncryptor::default()),
            vcs: Arc::new(FakeVcs::clean("abc1234")),
        }
    }

    pub fn toolkit(&self) -> Toolkit {
        Toolkit {
            containers: self.containers.clone(),
            encryptor: self.encryptor.clone(),
            vcs: self.vcs.clone(),
        }
    }
}

// ================================= FIXTURES ===================================== //

pub const RECORD: &str = r#"
name: api
version: V3
image: api:V3
url: api.example.com
port: 8080
createdAt: "2024-06-01T10:00:00Z"
"#;

pub fn settings() -> Settings {
    serde_json::from_str(
        r#"{
            "server_address": "203.0.113.7",
            "public_key": "age1qyqszqgpqyqszqgpqyqszqgpqyqszqgpqyqszqgpqyqszqgpqyqs3290gq",
            "secret_key": "AGE-SECRET-KEY-1QQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQ"
        }"#,
    )
    .unwrap()
}

/// Scratch project directory holding `record` as its app record
pub struct Project {
    pub dir: tempfile::TempDir,
}

impl Project {
    pub async fn new(record: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dockhand.yml"), record).unwrap();
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn layout(&self) -> ProjectLayout {
        ProjectLayout::new(self.dir.path())
    }

    pub fn store(&self) -> AppRecordStore {
        AppRecordStore::new(self.layout().record_file())
    }

    pub async fn record(&self) -> AppRecord {
        self.store().load().await.unwrap()
    }

    pub fn write(&self, name: &str, contents: &str) {
        std::fs::write(self.dir.path().join(name), contents).unwrap();
    }
}

/// Sleep that returns at once and counts its calls
pub fn counting_sleep() -> (SleepFn, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let sleep: SleepFn = Arc::new(move |_d: Duration| {
        counter.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    });
    (sleep, calls)
}

pub fn context(project: &Project, connector: Arc<FakeConnector>, tools: &Tools) -> DeployContext {
    let (sleep, _) = counting_sleep();
    DeployContext::new(
        project.path().to_path_buf(),
        settings(),
        connector,
        tools.toolkit(),
    )
    .with_gate(GateSettings::default(), sleep)
}

/// Events sent so far, without waiting for more
pub fn drain(events: &mut mpsc::UnboundedReceiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

pub fn advances(events: &[PipelineEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::Advance))
        .count()
}
