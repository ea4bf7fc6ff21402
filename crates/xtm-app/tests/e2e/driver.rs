//! Multi-target runs

use std::sync::Arc;

use xtm_app::{RunDriver, SessionRegistry, TestListener};
use xtm_core::{Error, TestConfig};
use xtm_daemon::protocol::selectors;
use xtm_daemon::test_utils::{DeviceCall, FakeDevice, JsonArchiver, Trigger};
use xtm_daemon::{CloseReason, DeviceServices, TestSink};

use crate::{case_names, ui_test_config};

fn missing_runner() -> TestConfig {
    TestConfig {
        test_runner_bundle_id: "com.example.Missing.xctrunner".to_string(),
        ..ui_test_config()
    }
}

#[tokio::test]
async fn test_failing_target_does_not_stop_later_ones() {
    let device = FakeDevice::with_ui_test_apps("17.0").completes_test_plan();
    let registry = SessionRegistry::new();
    let listener = Arc::new(TestListener::new());

    let result = RunDriver::new(&device, &JsonArchiver, &registry)
        .run(
            &[ui_test_config(), missing_runner(), ui_test_config()],
            listener,
        )
        .await
        .unwrap();

    // Suites from targets 1 and 3
    assert_eq!(
        case_names(&result.suites),
        vec![
            "ExampleUITests/testSignIn",
            "ExampleUITests/testSignOut",
            "ExampleUITests/testSignIn",
            "ExampleUITests/testSignOut",
        ]
    );

    let err = result.error.unwrap();
    match &err {
        Error::Aggregate(errors) => {
            assert_eq!(errors.len(), 1);
            assert!(matches!(
                &errors[0],
                Error::Target { index: 2, source } if matches!(**source, Error::AppNotFound { .. })
            ));
        }
        other => panic!("expected an aggregate error, got {other:?}"),
    }
    let message = err.to_string();
    assert!(message.contains("test target 2"), "{message}");
    assert!(message.contains("com.example.Missing.xctrunner"), "{message}");
    assert!(!message.contains("test target 1"), "{message}");
    assert!(!message.contains("test target 3"), "{message}");

    // Two full sessions, each torn down
    assert_eq!(device.kill_attempts(), 2);
    assert!(device.all_connections_closed());
    assert!(!registry.is_active(device.udid()));
}

#[tokio::test]
async fn test_lost_connection_reported_per_target() {
    let device = FakeDevice::with_ui_test_apps("17.0").drop_connection_after(
        selectors::START_EXECUTING_TEST_PLAN,
        1,
    );
    let registry = SessionRegistry::new();

    let result = RunDriver::new(&device, &JsonArchiver, &registry)
        .run(&[ui_test_config()], Arc::new(TestListener::new()))
        .await
        .unwrap();

    assert!(!result.is_success());
    let message = result.error.unwrap().to_string();
    assert!(message.contains("test target 1"), "{message}");
    assert!(message.contains("lost connection to testmanagerd"), "{message}");
}

#[tokio::test]
async fn test_clean_close_keeps_target_successful() {
    let device = FakeDevice::with_ui_test_apps("17.0")
        .completes_test_plan()
        .on_call(
            selectors::START_EXECUTING_TEST_PLAN,
            Trigger::Close {
                connection: 0,
                reason: CloseReason::Normal,
            },
        );
    let registry = SessionRegistry::new();

    let result = RunDriver::new(&device, &JsonArchiver, &registry)
        .run(&[ui_test_config()], Arc::new(TestListener::new()))
        .await
        .unwrap();

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.suites.len(), 1);
}

#[tokio::test]
async fn test_sink_is_reset_between_targets() {
    let device = FakeDevice::with_ui_test_apps("17.0").completes_test_plan();
    let registry = SessionRegistry::new();
    let listener = Arc::new(TestListener::new());

    let result = RunDriver::new(&device, &JsonArchiver, &registry)
        .run(&[ui_test_config(), ui_test_config()], listener.clone())
        .await
        .unwrap();

    assert!(result.is_success());
    // The listener only holds the last target's suites
    assert_eq!(listener.suites().len(), 1);
    assert_eq!(result.suites.len(), 2);
    assert_eq!(
        device
            .calls()
            .iter()
            .filter(|c| matches!(c, DeviceCall::ProductVersion))
            .count(),
        2
    );
}

#[tokio::test]
async fn test_invalid_target_is_reported_not_run() {
    let device = FakeDevice::with_ui_test_apps("17.0").completes_test_plan();
    let registry = SessionRegistry::new();
    let invalid = TestConfig {
        tests_to_run: vec!["not a test id".to_string()],
        ..ui_test_config()
    };

    let result = RunDriver::new(&device, &JsonArchiver, &registry)
        .run(&[invalid, ui_test_config()], Arc::new(TestListener::new()))
        .await
        .unwrap();

    assert_eq!(result.suites.len(), 1);
    let message = result.error.unwrap().to_string();
    assert!(message.contains("test target 1"), "{message}");
    assert!(message.contains("invalid test identifier"), "{message}");
}
