//! Deployment driver tests, end to end against in-memory collaborators

mod support;

use std::sync::Arc;

use dockhand::deploy::stages::{deploy_pipeline, DeployStage};
use dockhand::deploy::{DeploymentDriver, StopFlag};
use dockhand::errors::{DockhandError, FailureKind};
use dockhand::pipeline::render::{Renderer, Theme};
use dockhand::pipeline::runner::RenderLoop;
use dockhand::pipeline::{EventSink, PipelineEvent, RunOutcome};
use dockhand::remote::RemoteError;
use dockhand::storage::app_record::Version;
use dockhand::swap::{RolloutOutcome, SwapError};
use dockhand::utils::sha256_hash;
use dockhand::workers::deployer::{self, Job};

use support::*;

const ENV: &str = "DATABASE_URL=postgres://db\nAPI_KEY=secret\n";

fn record_with_env(hash: &str) -> String {
    format!("{RECORD}env:\n  file: .env\n  hash: {hash}\n")
}

fn flaky_then_healthy_host() -> FakeRemote {
    FakeRemote::new()
        .on_seq(
            "docker ps -q",
            vec![
                listing(&[(OLD_ID, OLD_CREATED)]),
                listing(&[(OLD_ID, OLD_CREATED)]),
                listing(&[(OLD_ID, OLD_CREATED), (NEW_ID, NEW_CREATED)]),
            ],
        )
        .on("docker inspect -f", Reply::ok("172.18.0.5"))
        .on_seq(
            "curl",
            vec![Reply::fail(7, ""), Reply::fail(7, ""), Reply::ok("200")],
        )
}

fn refusing_host() -> FakeRemote {
    FakeRemote::new()
        .on_seq(
            "docker ps -q",
            vec![
                listing(&[(OLD_ID, OLD_CREATED)]),
                listing(&[(OLD_ID, OLD_CREATED)]),
                listing(&[(OLD_ID, OLD_CREATED), (NEW_ID, NEW_CREATED)]),
            ],
        )
        .on("docker inspect -f", Reply::ok("172.18.0.5"))
        .on("curl", Reply::fail(7, ""))
}

#[tokio::test]
async fn test_scenario_a_swaps_and_bumps_version() {
    let project = Project::new(RECORD).await;
    let connector = Arc::new(FakeConnector::new(flaky_then_healthy_host(), FakeTransfer::new()));
    let tools = Tools::new();
    let driver = DeploymentDriver::new(
        context(&project, connector.clone(), &tools),
        project.store(),
        project.record().await,
    );
    let (sink, mut events) = EventSink::channel();

    let report = driver.run(sink).await.unwrap();

    assert_eq!(report.version, Version(4));
    assert_eq!(report.image, "api:V4");
    let RolloutOutcome::Swapped(swap) = &report.rollout else {
        panic!("expected a swap");
    };
    assert_eq!(swap.health_attempts, 3);

    let remote = &connector.remote;
    assert_eq!(remote.count(&format!("docker stop {OLD_ID}")), 1);
    assert_eq!(remote.count("docker rm -f"), 0);
    assert_eq!(remote.count("--scale api=1"), 1);
    assert_eq!(remote.closed(), 1);

    let record = project.record().await;
    assert_eq!(record.version, Version(4));
    assert_eq!(record.image, "api:V4");
    assert_eq!(record.url, "api.example.com");

    let events = drain(&mut events);
    assert_eq!(advances(&events), DeployStage::ALL.len() - 1);
    assert!(matches!(
        events.last(),
        Some(PipelineEvent::AllDone { url, .. }) if url == "api.example.com"
    ));
}

#[tokio::test]
async fn test_build_tags_latest_and_version_into_one_tar() {
    let project = Project::new(RECORD).await;
    let connector = Arc::new(FakeConnector::new(healthy_host("200"), FakeTransfer::new()));
    let tools = Tools::new();
    let driver = DeploymentDriver::new(
        context(&project, connector.clone(), &tools),
        project.store(),
        project.record().await,
    );
    let (sink, _events) = EventSink::channel();

    driver.run(sink).await.unwrap();

    let tags = vec!["api:latest".to_string(), "api:V4".to_string()];
    assert_eq!(tools.containers.built_tags(), vec![tags.clone()]);
    let saved = tools.containers.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].0, tags);
    assert!(saved[0].1.ends_with("api-V4.tar"));

    // Local staging directory removed, remote tar loaded then removed
    assert!(!saved[0].1.exists());
    assert!(connector.transfer.uploaded("api/api-V4.tar").is_some());
    let load = connector.remote.position("docker load -i api-V4.tar").unwrap();
    let cleanup = connector.remote.position("rm -f api/api-V4.tar").unwrap();
    assert!(load < cleanup);
}

#[tokio::test]
async fn test_scenario_b_gate_exhausted_keeps_version_and_marks_cutover() {
    let project = Project::new(RECORD).await;
    let connector = Arc::new(FakeConnector::new(refusing_host(), FakeTransfer::new()));
    let tools = Tools::new();
    let record = project.record().await;
    let pipeline = deploy_pipeline(&record.name).unwrap();
    let driver = DeploymentDriver::new(
        context(&project, connector.clone(), &tools),
        project.store(),
        record,
    );

    let (sink, events) = EventSink::channel();
    let handle = deployer::spawn(Job::Deploy(driver), sink);
    let render_loop = RenderLoop::new(
        pipeline,
        Renderer::new(Theme::plain(), 100, "dockhand.logs.txt"),
        Vec::new(),
        project.layout().diagnostic_log(),
    );
    let (outcome, pipeline) = render_loop
        .run(events, std::future::pending::<()>())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Failed {
            stage_index: DeployStage::Cutover.index(),
            title: "Switching traffic to the new version".to_string(),
        }
    );
    assert_eq!(outcome.exit_code(), 1);
    assert!(pipeline.active_stage().has_error);

    let err = handle.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), FailureKind::Cutover);
    assert!(matches!(
        err,
        DockhandError::CutoverError(SwapError::HealthGateExhausted { attempts: 30 })
    ));

    let remote = &connector.remote;
    assert_eq!(remote.count("curl"), 30);
    assert_eq!(remote.count(&format!("docker rm -f {NEW_ID}")), 1);
    assert_eq!(remote.count("--scale api=1"), 1);
    assert_eq!(remote.count("docker stop"), 0);

    assert_eq!(project.record().await.version, Version(3));

    let diagnostics = std::fs::read_to_string(project.layout().diagnostic_log().path()).unwrap();
    assert!(diagnostics.contains("=== STAGE 6 ERROR LOG"));
    assert!(diagnostics.contains("Stage: Switching traffic to the new version"));
}

#[tokio::test]
async fn test_scenario_c_unchanged_env_is_not_reencrypted() {
    let project = Project::new(&record_with_env(&sha256_hash(ENV.as_bytes()))).await;
    project.write(".env", ENV);
    let connector = Arc::new(FakeConnector::new(healthy_host("200"), FakeTransfer::new()));
    let tools = Tools::new();
    let driver = DeploymentDriver::new(
        context(&project, connector.clone(), &tools),
        project.store(),
        project.record().await,
    );
    let (sink, _events) = EventSink::channel();

    driver.run(sink).await.unwrap();

    assert!(tools.encryptor.calls().is_empty());
    assert!(connector.transfer.uploaded("api/encrypted.env").is_none());
    assert_eq!(tools.containers.built_tags().len(), 1);
}

#[tokio::test]
async fn test_changed_env_is_encrypted_and_hash_recorded() {
    let project = Project::new(&record_with_env("stale")).await;
    project.write(".env", ENV);
    let connector = Arc::new(FakeConnector::new(healthy_host("200"), FakeTransfer::new()));
    let tools = Tools::new();
    let driver = DeploymentDriver::new(
        context(&project, connector.clone(), &tools),
        project.store(),
        project.record().await,
    );
    let (sink, _events) = EventSink::channel();

    driver.run(sink).await.unwrap();

    assert_eq!(tools.encryptor.calls().len(), 1);
    let upload = connector.transfer.uploaded("api/encrypted.env").unwrap();
    assert!(upload.contents.contains("API_KEY=ENC["));
    assert!(!upload.contents.contains("secret"));
    assert_eq!(project.record().await.env.hash, sha256_hash(ENV.as_bytes()));

    // Compose runs under sops with the key passed out of band
    assert!(connector
        .remote
        .commands()
        .iter()
        .any(|c| c.starts_with("cd api && sops exec-env encrypted.env")));
}

#[tokio::test]
async fn test_env_without_secret_key_fails_before_connecting() {
    let project = Project::new(&record_with_env("stale")).await;
    project.write(".env", ENV);
    let connector = Arc::new(FakeConnector::new(healthy_host("200"), FakeTransfer::new()));
    let tools = Tools::new();
    let mut ctx = context(&project, connector.clone(), &tools);
    ctx.settings.secret_key = None;
    let driver = DeploymentDriver::new(ctx, project.store(), project.record().await);
    let (sink, mut events) = EventSink::channel();

    let err = driver.run(sink).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::Precondition);
    assert_eq!(connector.connects(), 0);
    assert!(matches!(drain(&mut events).last(), Some(PipelineEvent::Error(Some(_)))));
}

#[tokio::test]
async fn test_connection_failure_is_fatal_before_anything_runs() {
    let project = Project::new(RECORD).await;
    let connector = Arc::new(FakeConnector::refusing(RemoteError::HostKeyMismatch {
        host: "203.0.113.7".to_string(),
    }));
    let tools = Tools::new();
    let driver = DeploymentDriver::new(
        context(&project, connector.clone(), &tools),
        project.store(),
        project.record().await,
    );
    let (sink, mut events) = EventSink::channel();

    let err = driver.run(sink).await.unwrap_err();

    assert!(matches!(
        err,
        DockhandError::ConnectionError(RemoteError::HostKeyMismatch { .. })
    ));
    assert_eq!(err.kind(), FailureKind::Precondition);
    let events = drain(&mut events);
    assert_eq!(advances(&events), 0);
    assert!(tools.containers.built_tags().is_empty());
}

#[tokio::test]
async fn test_build_failure_leaves_host_and_record_untouched() {
    let project = Project::new(RECORD).await;
    let connector = Arc::new(FakeConnector::new(healthy_host("200"), FakeTransfer::new()));
    let tools = Tools::with_containers(FakeContainerTool::failing_build());
    let driver = DeploymentDriver::new(
        context(&project, connector.clone(), &tools),
        project.store(),
        project.record().await,
    );
    let (sink, mut events) = EventSink::channel();

    let err = driver.run(sink).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::BuildOrTransfer);
    assert!(err.to_string().contains("dockerfile parse error"));
    assert!(connector.remote.commands().is_empty());
    assert_eq!(connector.remote.closed(), 1);
    assert_eq!(project.record().await.version, Version(3));

    // Connect and Secrets succeeded, Build failed
    let events = drain(&mut events);
    assert_eq!(advances(&events), DeployStage::Build.index());
}

#[tokio::test]
async fn test_failed_upload_still_removes_remote_tar() {
    let project = Project::new(RECORD).await;
    let connector = Arc::new(FakeConnector::new(
        healthy_host("200"),
        FakeTransfer::failing_on(".tar"),
    ));
    let tools = Tools::new();
    let driver = DeploymentDriver::new(
        context(&project, connector.clone(), &tools),
        project.store(),
        project.record().await,
    );
    let (sink, _events) = EventSink::channel();

    let err = driver.run(sink).await.unwrap_err();

    assert!(matches!(err, DockhandError::TransferError(_)));
    assert_eq!(connector.remote.count("docker load"), 0);
    assert_eq!(connector.remote.count("rm -f api/api-V4.tar"), 1);
    assert_eq!(connector.remote.count("--scale"), 0);
    assert!(!tools.containers.saved()[0].1.exists());
}

#[tokio::test]
async fn test_version_is_monotonic_across_runs() {
    let project = Project::new(RECORD).await;
    let tools = Tools::new();

    for expected in [4, 5] {
        let connector = Arc::new(FakeConnector::new(healthy_host("200"), FakeTransfer::new()));
        let driver = DeploymentDriver::new(
            context(&project, connector, &tools),
            project.store(),
            project.record().await,
        );
        let (sink, _events) = EventSink::channel();
        driver.run(sink).await.unwrap();
        assert_eq!(project.record().await.version, Version(expected));
    }

    let connector = Arc::new(FakeConnector::new(refusing_host(), FakeTransfer::new()));
    let driver = DeploymentDriver::new(
        context(&project, connector, &tools),
        project.store(),
        project.record().await,
    );
    let (sink, _events) = EventSink::channel();
    assert!(driver.run(sink).await.is_err());
    assert_eq!(project.record().await.version, Version(5));
}

#[tokio::test]
async fn test_first_deploy_starts_service() {
    let project = Project::new(RECORD).await;
    let connector = Arc::new(FakeConnector::new(
        FakeRemote::new().on("docker ps -q", Reply::ok("")),
        FakeTransfer::new(),
    ));
    let tools = Tools::new();
    let driver = DeploymentDriver::new(
        context(&project, connector.clone(), &tools),
        project.store(),
        project.record().await,
    );
    let (sink, _events) = EventSink::channel();

    let report = driver.run(sink).await.unwrap();

    assert_eq!(report.rollout, RolloutOutcome::FirstStart);
    assert_eq!(connector.remote.count("up -d --no-deps api"), 1);
    assert_eq!(project.record().await.version, Version(4));
}

#[tokio::test]
async fn test_stop_before_start_touches_nothing() {
    let project = Project::new(RECORD).await;
    let connector = Arc::new(FakeConnector::new(healthy_host("200"), FakeTransfer::new()));
    let tools = Tools::new();
    let stop = StopFlag::default();
    stop.request();
    let driver = DeploymentDriver::new(
        context(&project, connector.clone(), &tools).with_stop(stop),
        project.store(),
        project.record().await,
    );
    let (sink, _events) = EventSink::channel();

    let err = driver.run(sink).await.unwrap_err();

    assert!(matches!(err, DockhandError::Cancelled(_)));
    assert_eq!(connector.connects(), 0);
    assert!(tools.containers.builds.lock().unwrap().is_empty());
    assert_eq!(project.record().await.version, Version(3));
}

#[tokio::test]
async fn test_exhausted_version_counter_fails_before_connecting() {
    let project = Project::new(&RECORD.replace("version: V3", "version: V18446744073709551615")).await;
    let connector = Arc::new(FakeConnector::new(healthy_host("200"), FakeTransfer::new()));
    let tools = Tools::new();
    let driver = DeploymentDriver::new(
        context(&project, connector.clone(), &tools),
        project.store(),
        project.record().await,
    );
    let (sink, _events) = EventSink::channel();

    let err = driver.run(sink).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::Precondition);
    assert_eq!(connector.connects(), 0);
}
