//! iOS 17+ orchestration

use std::sync::Arc;

use tokio_test::{assert_err, assert_ok};

use xtm_app::{SessionState, TestListener};
use xtm_core::{Error, ProtocolGeneration};
use xtm_daemon::protocol::{selectors, DRIVER_CHANNEL, MODERN_SERVICE, PROXY_CHANNEL};
use xtm_daemon::test_utils::{DeviceCall, FakeDevice};
use xtm_daemon::{ArchivedValue, InboundMessage};

use crate::{case_names, run_single};

#[tokio::test]
async fn test_modern_end_to_end_call_sequence() {
    let device = FakeDevice::with_ui_test_apps("17.0").completes_test_plan();
    let listener = Arc::new(TestListener::new());

    let outcome = assert_ok!(run_single(&device, listener.clone()).await);

    assert_eq!(
        device.selectors(),
        vec![
            selectors::INITIATE_SESSION_WITH_CAPABILITIES,
            selectors::INITIATE_CONTROL_SESSION_WITH_CAPABILITIES,
            selectors::AUTHORIZE_TEST_SESSION,
            selectors::START_EXECUTING_TEST_PLAN,
        ]
    );

    let calls = device.calls();
    assert_eq!(
        calls
            .iter()
            .filter(|c| matches!(c, DeviceCall::OpenConnection { service } if service == MODERN_SERVICE))
            .count(),
        2
    );
    assert!(!calls.iter().any(|c| matches!(c, DeviceCall::PushFile { .. })));
    assert!(device.pushed_files().is_empty());

    // Proxy on both connections, driver on execution only
    let channels: Vec<_> = calls
        .iter()
        .filter_map(|c| match c {
            DeviceCall::RequestChannel {
                connection,
                identifier,
            } => Some((*connection, identifier.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(
        channels,
        vec![(0, PROXY_CHANNEL), (1, PROXY_CHANNEL), (0, DRIVER_CHANNEL)]
    );

    // Runner killed, both connections closed, once each
    assert_eq!(device.kill_attempts(), 1);
    assert!(device.live_pids().is_empty());
    assert_eq!(device.close_count(0), 1);
    assert_eq!(device.close_count(1), 1);
    assert!(device.all_connections_closed());

    assert_eq!(
        device.arguments_of(selectors::START_EXECUTING_TEST_PLAN),
        vec![vec![ArchivedValue::UInt(36)]]
    );
    assert_eq!(
        case_names(&outcome.suites),
        vec!["ExampleUITests/testSignIn", "ExampleUITests/testSignOut"]
    );
    assert!(outcome.failure.is_none());
    assert_eq!(outcome.session.generation, ProtocolGeneration::Modern);
    assert!(outcome.session.remote_capabilities.is_some());
    assert_eq!(
        outcome.session.trail(),
        &[
            SessionState::Connecting,
            SessionState::AppResolved,
            SessionState::SessionNegotiated,
            SessionState::RunnerLaunched,
            SessionState::ControlAuthorized,
            SessionState::PlanExecuting,
            SessionState::Terminating,
            SessionState::Done,
        ]
    );
}

#[tokio::test]
async fn test_modern_launch_environment() {
    let device = FakeDevice::with_ui_test_apps("17.4.1").completes_test_plan();
    let outcome = run_single(&device, Arc::new(TestListener::new()))
        .await
        .unwrap();

    let launches = device.launches();
    assert_eq!(launches.len(), 1);
    let env = &launches[0].env;
    assert_eq!(
        env["XCTestSessionIdentifier"],
        outcome.session.id.canonical()
    );
    assert_eq!(env["XCTestSessionIdentifier"], env["XCTestSessionIdentifier"].to_uppercase());
    assert_eq!(env["XCTestConfigurationFilePath"], "");
    assert_eq!(
        env["XCTestBundlePath"],
        "/private/var/containers/Bundle/Application/ExampleUITests-Runner.app/PlugIns/ExampleUITests.xctest"
    );
}

#[tokio::test]
async fn test_runner_receives_in_memory_configuration() {
    let device = FakeDevice::with_ui_test_apps("17.0")
        .emit_after(
            selectors::AUTHORIZE_TEST_SESSION,
            vec![InboundMessage::new(
                selectors::TEST_RUNNER_READY,
                vec![ArchivedValue::Capabilities(Default::default())],
            )
            .expecting_reply()],
        )
        .completes_test_plan();

    run_single(&device, Arc::new(TestListener::new()))
        .await
        .unwrap();

    let replies = device.replies_sent();
    assert_eq!(replies.len(), 1);
    let (selector, payload) = &replies[0];
    assert_eq!(selector, selectors::TEST_RUNNER_READY);
    match &payload[0] {
        ArchivedValue::TestConfiguration(config) => {
            assert_eq!(config.test_bundle_path, "PlugIns/ExampleUITests.xctest");
            assert_eq!(
                config.target_application_bundle_id.as_deref(),
                Some("com.example.App")
            );
            assert!(config.initialize_for_ui_testing);
        }
        other => panic!("expected a test configuration, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_reply_is_protocol_error() {
    let device = FakeDevice::with_ui_test_apps("17.0").reply(
        selectors::INITIATE_SESSION_WITH_CAPABILITIES,
        vec![ArchivedValue::Str("not a dictionary".into())],
    );

    let err = assert_err!(run_single(&device, Arc::new(TestListener::new())).await);

    match &err {
        Error::UnexpectedReply {
            selector, payload, ..
        } => {
            assert_eq!(selector, selectors::INITIATE_SESSION_WITH_CAPABILITIES);
            assert!(payload.contains("not a dictionary"), "{payload}");
        }
        other => panic!("expected UnexpectedReply, got {other:?}"),
    }
    // Nothing launched, but both connections released
    assert_eq!(device.kill_attempts(), 0);
    assert!(device.launches().is_empty());
    assert!(device.all_connections_closed());
}

#[tokio::test]
async fn test_refused_authorization_kills_runner() {
    let device = FakeDevice::with_ui_test_apps("17.0").reply(
        selectors::AUTHORIZE_TEST_SESSION,
        vec![ArchivedValue::Bool(false)],
    );

    let err = run_single(&device, Arc::new(TestListener::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::AuthorizationRefused { pid: 1000 }));
    assert_eq!(device.kill_attempts(), 1);
    assert!(device.live_pids().is_empty());
    assert!(device.all_connections_closed());
    assert!(!device
        .selectors()
        .contains(&selectors::START_EXECUTING_TEST_PLAN.to_string()));
}

#[tokio::test]
async fn test_missing_runner_fails_before_launch() {
    let device = FakeDevice::new("17.0");

    let err = run_single(&device, Arc::new(TestListener::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::AppNotFound { ref bundle_id } if bundle_id == "com.example.UITests.xctrunner"));
    assert!(device.selectors().is_empty());
    assert!(device.all_connections_closed());
}

#[tokio::test]
async fn test_control_connection_failure_closes_execution() {
    let device = FakeDevice::with_ui_test_apps("17.0").fail_open_connection(1);

    let err = run_single(&device, Arc::new(TestListener::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Connection { .. }));
    assert_eq!(device.connection_count(), 1);
    assert_eq!(device.close_count(0), 1);
}

#[tokio::test]
async fn test_launch_failure_closes_connections() {
    let device = FakeDevice::with_ui_test_apps("17.0").fail_launch();

    let err = run_single(&device, Arc::new(TestListener::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Launch { .. }));
    assert_eq!(device.kill_attempts(), 0);
    assert!(device.all_connections_closed());
}

#[tokio::test]
async fn test_runner_output_reaches_listener() {
    let device = FakeDevice::with_ui_test_apps("17.0")
        .runner_output(&["Running tests...", "Test Suite 'All tests' started"])
        .completes_test_plan();
    let listener = Arc::new(TestListener::new());

    run_single(&device, listener.clone()).await.unwrap();

    // The forwarder may be aborted during teardown; what arrived is in order
    let output = listener.output();
    let expected = ["Running tests...", "Test Suite 'All tests' started"];
    assert!(output.len() <= expected.len());
    for (got, want) in output.iter().zip(expected) {
        assert_eq!(got, want);
    }
}
