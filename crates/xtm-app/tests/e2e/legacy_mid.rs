//! Pre-17 orchestration: pushed configuration files

use std::sync::Arc;

use xtm_app::{SessionState, TestListener, VersionDispatcher, LOST_CONNECTION};
use xtm_core::{Error, ProtocolGeneration};
use xtm_daemon::protocol::{selectors, LEGACY_SERVICE, MID_SERVICE};
use xtm_daemon::test_utils::{DeviceCall, FakeDevice, JsonArchiver};
use xtm_daemon::{ArchivedValue, Archiver, CloseReason};

use crate::{bundle_ready, case_names, run_single};

const RUNNER_HOME: &str = "/private/var/mobile/Containers/Data/Application/RUNNER";

// ─────────────────────────────────────────────────────────
// Version Dispatch
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_version_boundaries() {
    let cases = [
        ("13.9.9", ProtocolGeneration::Legacy),
        ("14.0.0", ProtocolGeneration::Mid),
        ("16.9.9", ProtocolGeneration::Mid),
        ("17.0.0", ProtocolGeneration::Modern),
        ("12.5", ProtocolGeneration::Legacy),
        ("18.1", ProtocolGeneration::Modern),
    ];
    for (version, expected) in cases {
        let device = FakeDevice::new(version);
        let generation = VersionDispatcher::new(&device, &JsonArchiver)
            .generation()
            .await
            .unwrap();
        assert_eq!(generation, expected, "iOS {version}");
    }
}

#[tokio::test]
async fn test_version_query_failure_is_fatal() {
    let device = FakeDevice::with_ui_test_apps("17.0").without_version();

    let err = run_single(&device, Arc::new(TestListener::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::VersionQuery { .. }));
    assert_eq!(device.calls(), vec![DeviceCall::ProductVersion]);
}

// ─────────────────────────────────────────────────────────
// Mid (iOS 14 - 16)
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_mid_flow_pushes_configuration() {
    let device = FakeDevice::with_ui_test_apps("15.7").completes_test_plan();

    let outcome = run_single(&device, Arc::new(TestListener::new()))
        .await
        .unwrap();

    assert_eq!(
        device.selectors(),
        vec![
            selectors::INITIATE_SESSION_WITH_IDENTIFIER,
            selectors::INITIATE_CONTROL_SESSION_WITH_PROTOCOL_VERSION,
            selectors::INITIATE_CONTROL_SESSION_FOR_PROCESS,
            selectors::START_EXECUTING_TEST_PLAN,
        ]
    );
    assert!(device
        .calls()
        .iter()
        .filter(|c| matches!(c, DeviceCall::OpenConnection { .. }))
        .all(|c| matches!(c, DeviceCall::OpenConnection { service } if service == MID_SERVICE)));
    assert_eq!(device.connection_count(), 2);

    let session_id = outcome.session.id;
    let relative = format!("tmp/{}.xctestconfiguration", session_id);
    let pushed = device.pushed_files();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].bundle_id, "com.example.UITests.xctrunner");
    assert_eq!(pushed[0].path, relative);

    let archived = JsonArchiver.unarchive(&pushed[0].contents).unwrap();
    match archived {
        ArchivedValue::TestConfiguration(config) => {
            assert_eq!(config.session_identifier, session_id);
            assert_eq!(config.protocol_version, 36);
            assert_eq!(
                config.test_bundle_path,
                "/private/var/containers/Bundle/Application/ExampleUITests-Runner.app/PlugIns/ExampleUITests.xctest"
            );
        }
        other => panic!("expected a test configuration, got {other:?}"),
    }

    let env = &device.launches()[0].env;
    assert_eq!(
        env["XCTestConfigurationFilePath"],
        format!("{RUNNER_HOME}/{relative}")
    );
    assert_eq!(env["XCTestManagerVariant"], "DDI");

    assert_eq!(
        device.arguments_of(selectors::INITIATE_CONTROL_SESSION_FOR_PROCESS),
        vec![vec![ArchivedValue::UInt(1000), ArchivedValue::UInt(36)]]
    );
    assert_eq!(case_names(&outcome.suites).len(), 2);
    assert_eq!(device.kill_attempts(), 1);
    assert!(device.all_connections_closed());
}

#[tokio::test]
async fn test_mid_push_failure_opens_nothing() {
    let device = FakeDevice::with_ui_test_apps("14.2").fail_push();

    let err = run_single(&device, Arc::new(TestListener::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::FileTransfer { .. }));
    assert_eq!(device.connection_count(), 0);
    assert!(device.launches().is_empty());
}

#[tokio::test]
async fn test_runner_without_home_cannot_receive_configuration() {
    let apps = xtm_daemon::test_utils::ui_test_apps()
        .into_iter()
        .map(|mut app| {
            app.environment.clear();
            app
        })
        .collect();
    let device = FakeDevice::new("16.0").with_apps(apps);

    let err = run_single(&device, Arc::new(TestListener::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NoHomeDirectory { .. }));
    assert!(device.pushed_files().is_empty());
}

// ─────────────────────────────────────────────────────────
// Legacy (before iOS 14)
// ─────────────────────────────────────────────────────────

fn legacy_device() -> FakeDevice {
    FakeDevice::with_ui_test_apps("13.0")
        .emit_after(
            selectors::INITIATE_CONTROL_SESSION_FOR_PROCESS,
            vec![bundle_ready(25, 8)],
        )
        .completes_test_plan()
}

#[tokio::test]
async fn test_legacy_flow_waits_for_bundle_ready() {
    let device = legacy_device();

    let outcome = run_single(&device, Arc::new(TestListener::new()))
        .await
        .unwrap();

    assert_eq!(
        device.selectors(),
        vec![
            selectors::INITIATE_SESSION_WITH_IDENTIFIER,
            selectors::INITIATE_CONTROL_SESSION_FOR_PROCESS,
            selectors::START_EXECUTING_TEST_PLAN,
        ]
    );
    assert_eq!(device.connection_count(), 1);
    // version, apps, push, then the single connection
    assert!(matches!(
        &device.calls()[3],
        DeviceCall::OpenConnection { service } if service == LEGACY_SERVICE
    ));
    assert_eq!(
        device.arguments_of(selectors::START_EXECUTING_TEST_PLAN),
        vec![vec![ArchivedValue::UInt(25)]]
    );

    assert_eq!(outcome.session.protocol_version, Some(25));
    assert_eq!(outcome.session.minimum_version, Some(8));
    assert_eq!(outcome.session.generation, ProtocolGeneration::Legacy);
    assert!(outcome.failure.is_none());

    let env = &device.launches()[0].env;
    assert!(!env.contains_key("XCTestManagerVariant"));
    assert!(env["XCTestConfigurationFilePath"].starts_with(RUNNER_HOME));
    assert_eq!(device.launches()[0].args[0], "-NSTreatUnknownArgumentsAsOpen");

    assert_eq!(device.kill_attempts(), 1);
    assert!(device.is_closed(0));
}

#[tokio::test]
async fn test_legacy_connection_loss_before_bundle_ready() {
    // The runner never announces itself and the connection drops
    let device = FakeDevice::with_ui_test_apps("12.4")
        .drop_connection_after(selectors::INITIATE_CONTROL_SESSION_FOR_PROCESS, 0);
    let listener = Arc::new(TestListener::new());

    let outcome = run_single(&device, listener.clone()).await.unwrap();

    assert_eq!(outcome.failure.as_deref(), Some(LOST_CONNECTION));
    assert!(!device
        .selectors()
        .contains(&selectors::START_EXECUTING_TEST_PLAN.to_string()));
    assert!(!outcome.session.trail().contains(&SessionState::PlanExecuting));
    assert_eq!(device.kill_attempts(), 1);
    assert_eq!(device.close_count(0), 1);
}

#[tokio::test]
async fn test_legacy_external_close_after_start() {
    let device = FakeDevice::with_ui_test_apps("13.7").emit_after(
        selectors::INITIATE_CONTROL_SESSION_FOR_PROCESS,
        vec![bundle_ready(25, 8)],
    );
    let listener = Arc::new(TestListener::new());

    let run = tokio::spawn({
        let device = device.clone();
        let listener = listener.clone();
        async move { run_single(&device, listener).await }
    });

    // Wait until the plan has been started, then pull the plug
    while !device
        .selectors()
        .contains(&selectors::START_EXECUTING_TEST_PLAN.to_string())
    {
        tokio::task::yield_now().await;
    }
    device.close_connection(0, CloseReason::Abnormal("device unplugged".into()));

    let outcome = run.await.unwrap().unwrap();
    assert_eq!(outcome.failure.as_deref(), Some(LOST_CONNECTION));
    assert_eq!(device.kill_attempts(), 1);
}
