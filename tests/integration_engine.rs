//! Engine integration tests
//!
//! Drives the scheduler with the real job runner over a recording backend,
//! releasing package callbacks by hand to observe strict sequencing.

use std::collections::BTreeMap;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::sync::Arc;
use std::time::{Duration, Instant};

use overlayd::OverlaydError;
use overlayd::config::{Backend, Config, ShimConfig};
use overlayd::domain::{Job, JobOutcome, Request};
use overlayd::engine::{Engine, EngineConfig, EngineEvent, Rejection, SchedulerState};
use overlayd::ipc::{Events, IpcClient};
use overlayd::jobs::{JobRunner, JobSettings};
use overlayd::system::shell::CommandTemplates;
use overlayd::system::{PackageResult, RecordingSystem, ShellSystem, SystemCall, SystemServices};
use tempfile::TempDir;
use tokio::sync::broadcast;

const CALLER: &str = "projekt.substratum";

fn engine_with(system: Arc<RecordingSystem>) -> Engine {
    let settings = JobSettings {
        shim: ShimConfig {
            kick_delay_ms: 0,
            restore_delay_ms: 0,
            ..Default::default()
        },
        ..Default::default()
    };
    let runner = Arc::new(JobRunner::new(SystemServices::uniform(system), settings));
    let (engine, _task) = Engine::spawn(EngineConfig::default(), runner);
    engine
}

/// Poll until the recorder has seen `count` calls
async fn wait_for_calls(system: &RecordingSystem, count: usize) -> Vec<SystemCall> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let calls = system.calls();
            if calls.len() >= count {
                return calls;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("timed out waiting for collaborator calls")
}

async fn next_drained(events: &mut broadcast::Receiver<EngineEvent>) -> Vec<overlayd::domain::JobReport> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let EngineEvent::AllJobsDrained { reports } = events.recv().await.unwrap() {
                return reports;
            }
        }
    })
    .await
    .expect("timed out waiting for drain")
}

#[tokio::test]
async fn test_installs_run_one_at_a_time_in_order() {
    let system = Arc::new(RecordingSystem::manual());
    let engine = engine_with(system.clone());
    let mut events = engine.subscribe();

    let ids = engine
        .submit(Request::install(["/a.apk", "/b.apk"], 100).from_caller(CALLER))
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(engine.state(), SchedulerState::Busy);

    // Only the head has been issued while its callback is held
    let calls = wait_for_calls(&system, 1).await;
    assert_eq!(calls, vec![SystemCall::Install("/a.apk".into())]);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(system.calls().len(), 1);

    assert!(system.finish_next(PackageResult::success()));
    let calls = wait_for_calls(&system, 2).await;
    assert_eq!(calls[1], SystemCall::Install("/b.apk".into()));

    assert!(system.finish_next(PackageResult::success()));
    let reports = next_drained(&mut events).await;
    let order: Vec<_> = reports.iter().map(|r| r.id).collect();
    assert_eq!(order, ids);
    assert!(reports.iter().all(|r| r.outcome.is_success()));

    engine.wait_idle().await.unwrap();
    assert_eq!(engine.state(), SchedulerState::Idle);
}

#[tokio::test]
async fn test_uninstall_restart_waits_for_removal_callback() {
    let system = Arc::new(RecordingSystem::manual());
    let engine = engine_with(system.clone());
    let mut events = engine.subscribe();

    engine
        .submit(Request::uninstall(["com.theme.overlay"], true, 200).from_caller(CALLER))
        .await
        .unwrap();

    wait_for_calls(&system, 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(
        !system.calls().iter().any(|c| matches!(c, SystemCall::ForceStop(_))),
        "UI restarted before the removal finished"
    );

    system.finish_next(PackageResult::failure(-1, "not installed"));
    let reports = next_drained(&mut events).await;

    assert_eq!(reports.len(), 2);
    assert!(matches!(reports[0].outcome, JobOutcome::Failed(_)));
    assert_eq!(reports[1].job, Job::RestartUi);
    assert_eq!(reports[1].outcome, JobOutcome::Completed);
    assert_eq!(
        system.calls().last(),
        Some(&SystemCall::ForceStop("com.android.systemui".into()))
    );
}

#[tokio::test]
async fn test_fonts_reset_restarts_ui_inside_one_job() {
    let system = Arc::new(RecordingSystem::manual());
    let engine = engine_with(system.clone());
    let mut events = engine.subscribe();

    let ids = engine.submit(Request::fonts(true, 300).from_caller(CALLER)).await.unwrap();
    assert_eq!(ids.len(), 1);

    let reports = next_drained(&mut events).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].job, Job::FontsChange { clear: true });

    let calls = system.calls();
    assert!(matches!(calls.first(), Some(SystemCall::DeletePath(_))));
    assert_eq!(calls.last(), Some(&SystemCall::ForceStop("com.android.systemui".into())));
}

#[tokio::test]
async fn test_rejections_leave_queue_untouched() {
    let system = Arc::new(RecordingSystem::manual());
    let engine = engine_with(system.clone());
    let mut events = engine.subscribe();

    let unauthorized = engine
        .submit(Request::new("restart_ui", 10).from_caller("com.example.untrusted"))
        .await
        .unwrap_err();
    assert_eq!(unauthorized.rejection(), Some(Rejection::Unauthorized));

    engine
        .submit(Request::install(["/held.apk"], 20).from_caller(CALLER))
        .await
        .unwrap();

    let busy = engine
        .submit(Request::new("restart_ui", 30).from_caller(CALLER))
        .await
        .unwrap_err();
    assert_eq!(busy.rejection(), Some(Rejection::Busy));
    assert_eq!(engine.status().await.unwrap().queued.len(), 1);

    system.finish_next(PackageResult::success());
    next_drained(&mut events).await;

    // The busy rejection did not consume timestamp 30
    let duplicate = engine
        .submit(Request::new("restart_ui", 20).from_caller(CALLER))
        .await
        .unwrap_err();
    assert_eq!(duplicate.rejection(), Some(Rejection::DuplicateOrMissingTimestamp));

    let unknown = engine
        .submit(Request::new("wallpaper", 25).from_caller(CALLER))
        .await
        .unwrap_err();
    assert_eq!(unknown.rejection(), Some(Rejection::UnknownCommand));

    engine
        .submit(Request::new("restart_ui", 30).from_caller(CALLER))
        .await
        .unwrap();
    let status = engine.status().await.unwrap();
    assert_eq!(status.last_accepted, Some(30));
}

#[tokio::test]
async fn test_audio_is_accepted_without_jobs() {
    let system = Arc::new(RecordingSystem::manual());
    let engine = engine_with(system.clone());

    let ids = engine.submit(Request::new("audio", 1).from_caller(CALLER)).await.unwrap();
    assert!(ids.is_empty());
    assert_eq!(engine.state(), SchedulerState::Idle);
    assert!(system.calls().is_empty());
}

#[tokio::test]
async fn test_locale_shim_drains_after_config_change() {
    let system = Arc::new(RecordingSystem::manual());
    let engine = engine_with(system.clone());
    let mut events = engine.subscribe();

    engine
        .submit(Request::new("configuration_shim", 5).from_caller(CALLER))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while system.listener_count() == 0
            || !system
                .calls()
                .iter()
                .any(|c| matches!(c, SystemCall::UpdateConfiguration(_)))
        {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(engine.state(), SchedulerState::Busy);

    assert_eq!(system.notify_configuration_changed(), 1);
    let reports = next_drained(&mut events).await;
    assert_eq!(reports[0].job, Job::LocaleConfigurationShim);
    assert_eq!(reports[0].outcome, JobOutcome::Completed);
    assert_eq!(system.current_configuration().locale, "en-US");
    assert_eq!(system.listener_count(), 0);
}

#[tokio::test]
async fn test_slow_command_does_not_stall_runtime() {
    let shell = Arc::new(ShellSystem::new(
        CommandTemplates {
            force_stop: vec!["sleep".into(), "0.5".into()],
            ..Default::default()
        },
        tokio::runtime::Handle::current(),
    ));
    let services = SystemServices {
        packages: shell.clone(),
        processes: shell.clone(),
        configuration: shell,
        filesystem: Arc::new(RecordingSystem::manual()),
    };
    let runner = Arc::new(JobRunner::new(services, JobSettings::default()));
    let (engine, _task) = Engine::spawn(EngineConfig::default(), runner);
    let mut events = engine.subscribe();

    let ticker = tokio::spawn(async {
        let mut worst = Duration::ZERO;
        let mut last = Instant::now();
        for _ in 0..60 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let now = Instant::now();
            worst = worst.max(now - last);
            last = now;
        }
        worst
    });

    engine
        .submit(Request::new("restart_ui", 1).from_caller(CALLER))
        .await
        .unwrap();
    let reports = next_drained(&mut events).await;
    assert_eq!(reports[0].outcome, JobOutcome::Completed);

    let worst = ticker.await.unwrap();
    assert!(worst < Duration::from_millis(250), "runtime stalled for {:?}", worst);
}

#[tokio::test]
async fn test_shutdown_stops_engine() {
    let system = Arc::new(RecordingSystem::manual());
    let engine = engine_with(system);
    engine.shutdown();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let err = engine.submit(Request::new("audio", 1).from_caller(CALLER)).await.unwrap_err();
    assert!(matches!(err, OverlaydError::EngineStopped));
}

#[tokio::test]
async fn test_daemon_round_trip_over_socket() {
    let temp_dir = TempDir::new().unwrap();
    let socket = temp_dir.path().join("overlayd.sock");
    let own_uid = std::fs::metadata(temp_dir.path()).unwrap().uid();
    let config = Config {
        backend: Backend::DryRun,
        socket_path: Some(socket.clone()),
        trusted_uids: BTreeMap::from([(own_uid, CALLER.to_string())]),
        ..Default::default()
    };

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let daemon = tokio::spawn(async move {
        overlayd::daemon::run(&config, async {
            let _ = stop_rx.await;
        })
        .await
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while !socket.exists() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(std::fs::metadata(&socket).unwrap().permissions().mode() & 0o777, 0o660);

    let client = IpcClient::with_socket(&socket);
    client.connect().await.unwrap();
    assert!(client.ping().await.unwrap());
    assert!(client.subscribe().await.unwrap().is_success());

    // Claiming a creator this uid is not bound to is refused
    let impostor = client
        .submit(&Request::new("restart_ui", 41).from_caller("masquerade.substratum"))
        .await
        .unwrap();
    assert_eq!(impostor.rejection(), Some(Rejection::Unauthorized));

    let response = client
        .submit(&Request::uninstall(["com.theme.a"], true, 42).from_caller(CALLER))
        .await
        .unwrap();
    assert!(response.is_success());

    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = client.recv_event().await.unwrap();
            if event.event == Events::ALL_JOBS_DRAINED {
                return event;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(drained.data["reports"].as_array().unwrap().len(), 2);

    let duplicate = client
        .submit(&Request::new("restart_ui", 42).from_caller(CALLER))
        .await
        .unwrap();
    assert_eq!(duplicate.rejection(), Some(Rejection::DuplicateOrMissingTimestamp));

    stop_tx.send(()).unwrap();
    daemon.await.unwrap().unwrap();
    assert!(!socket.exists());
}
