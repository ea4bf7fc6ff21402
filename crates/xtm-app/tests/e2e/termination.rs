//! Connection loss while the test plan runs

use std::sync::Arc;

use tokio::sync::watch;

use xtm_app::{SessionState, VersionDispatcher, LOST_CONNECTION};
use xtm_daemon::protocol::selectors;
use xtm_daemon::test_utils::{FakeDevice, JsonArchiver, Trigger};
use xtm_daemon::{CloseReason, TestSink};

use crate::{run_single, ui_test_config, CountingListener};

async fn assert_single_teardown(device: FakeDevice) {
    let listener = Arc::new(CountingListener::default());

    let outcome = run_single(&device, listener.clone()).await.unwrap();

    assert_eq!(listener.finishes(), 1);
    assert_eq!(outcome.failure.as_deref(), Some(LOST_CONNECTION));
    assert_eq!(device.kill_attempts(), 1);
    assert!(device.live_pids().is_empty());
    assert_eq!(device.close_count(0), 1);
    assert_eq!(device.close_count(1), 1);
    assert!(device.all_connections_closed());
    assert_eq!(
        outcome.session.trail().last(),
        Some(&SessionState::Done)
    );
}

#[tokio::test]
async fn test_execution_connection_loss_modern() {
    assert_single_teardown(
        FakeDevice::with_ui_test_apps("17.0")
            .drop_connection_after(selectors::START_EXECUTING_TEST_PLAN, 0),
    )
    .await;
}

#[tokio::test]
async fn test_control_connection_loss_modern() {
    assert_single_teardown(
        FakeDevice::with_ui_test_apps("17.2")
            .drop_connection_after(selectors::START_EXECUTING_TEST_PLAN, 1),
    )
    .await;
}

#[tokio::test]
async fn test_execution_connection_loss_mid() {
    assert_single_teardown(
        FakeDevice::with_ui_test_apps("16.4")
            .drop_connection_after(selectors::START_EXECUTING_TEST_PLAN, 0),
    )
    .await;
}

#[tokio::test]
async fn test_control_connection_loss_mid() {
    assert_single_teardown(
        FakeDevice::with_ui_test_apps("14.0")
            .drop_connection_after(selectors::START_EXECUTING_TEST_PLAN, 1),
    )
    .await;
}

#[tokio::test]
async fn test_partial_results_survive_connection_loss() {
    let device = FakeDevice::with_ui_test_apps("17.0")
        .emit_after(
            selectors::START_EXECUTING_TEST_PLAN,
            xtm_daemon::test_utils::passing_plan("LoginTests", &["testSignIn"])
                .into_iter()
                // Everything but the final plan-finished callback
                .take(5)
                .collect(),
        )
        .drop_connection_after(selectors::START_EXECUTING_TEST_PLAN, 0);
    let listener = Arc::new(CountingListener::default());

    let outcome = run_single(&device, listener.clone()).await.unwrap();

    assert_eq!(listener.finishes(), 1);
    assert_eq!(outcome.suites.len(), 1);
    assert_eq!(outcome.suites[0].cases.len(), 1);
    assert!(outcome.suites[0].is_finished());
}

fn normal_close_after_start(device: FakeDevice) -> FakeDevice {
    device.on_call(
        selectors::START_EXECUTING_TEST_PLAN,
        Trigger::Close {
            connection: 0,
            reason: CloseReason::Normal,
        },
    )
}

#[tokio::test]
async fn test_clean_close_after_finished_plan_is_success() {
    let device = normal_close_after_start(
        FakeDevice::with_ui_test_apps("17.0").completes_test_plan(),
    );
    let listener = Arc::new(CountingListener::default());

    let outcome = run_single(&device, listener.clone()).await.unwrap();

    assert_eq!(listener.finishes(), 0);
    assert!(outcome.failure.is_none());
    assert_eq!(outcome.suites.len(), 1);
    assert_eq!(device.kill_attempts(), 1);
    assert!(device.all_connections_closed());
}

#[tokio::test]
async fn test_clean_close_before_plan_finishes_is_not_a_failure() {
    for version in ["17.0", "15.0"] {
        let device = normal_close_after_start(FakeDevice::with_ui_test_apps(version));
        let listener = Arc::new(CountingListener::default());

        let outcome = run_single(&device, listener.clone()).await.unwrap();

        assert_eq!(listener.finishes(), 0, "iOS {version}");
        assert!(outcome.failure.is_none(), "iOS {version}");
        assert_eq!(device.kill_attempts(), 1, "iOS {version}");
        assert_eq!(device.close_count(0), 1, "iOS {version}");
        assert_eq!(device.close_count(1), 1, "iOS {version}");
    }
}

#[tokio::test]
async fn test_listener_done_does_not_fail_run() {
    let device = FakeDevice::with_ui_test_apps("17.0").completes_test_plan();
    let listener = Arc::new(CountingListener::default());

    let outcome = run_single(&device, listener.clone()).await.unwrap();

    assert_eq!(listener.finishes(), 0);
    assert!(outcome.failure.is_none());
    assert!(listener.inner.is_done());
}

#[tokio::test]
async fn test_cancellation_tears_down_without_failure() {
    let device = FakeDevice::with_ui_test_apps("17.0");
    let listener = Arc::new(CountingListener::default());
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let run = tokio::spawn({
        let device = device.clone();
        let sink: Arc<dyn TestSink> = listener.clone();
        async move {
            VersionDispatcher::new(&device, &JsonArchiver)
                .run_test(&ui_test_config(), sink, cancel_rx)
                .await
        }
    });

    while !device
        .selectors()
        .contains(&selectors::START_EXECUTING_TEST_PLAN.to_string())
    {
        tokio::task::yield_now().await;
    }
    cancel_tx.send_replace(true);

    let outcome = run.await.unwrap().unwrap();
    assert_eq!(listener.finishes(), 0);
    assert!(outcome.failure.is_none());
    assert_eq!(device.kill_attempts(), 1);
    assert!(device.all_connections_closed());
}
