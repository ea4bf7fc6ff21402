//! Sequential execution of several test targets against one device

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use xtm_core::prelude::*;
use xtm_core::{TestConfig, TestSuite};
use xtm_daemon::{Archiver, DeviceServices, TestSink};

use crate::config::RunSettings;
use crate::dispatch::VersionDispatcher;
use crate::registry::SessionRegistry;

/// Suites from every target plus the combined failure, if any.
///
/// Suites are kept even for targets that failed.
#[derive(Debug)]
pub struct RunResult {
    pub suites: Vec<TestSuite>,
    pub error: Option<Error>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Vec<TestSuite>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.suites),
        }
    }
}

/// Runs test targets one after another; a failing target never stops the
/// ones after it.
pub struct RunDriver<'a, D> {
    device: &'a D,
    archiver: &'a dyn Archiver,
    registry: &'a SessionRegistry,
    timeout: Option<Duration>,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a, D: DeviceServices> RunDriver<'a, D> {
    pub fn new(device: &'a D, archiver: &'a dyn Archiver, registry: &'a SessionRegistry) -> Self {
        Self {
            device,
            archiver,
            registry,
            timeout: None,
            cancel: None,
        }
    }

    /// Per-target deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_settings(mut self, settings: &RunSettings) -> Self {
        self.timeout = settings.timeout();
        self
    }

    /// Flipping `cancel` to `true` ends the current target and all later
    /// ones as soon as their test plans start.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn externally_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Arm the cancellation input for one target.
    fn arm_deadline(&self) -> (watch::Receiver<bool>, Option<JoinHandle<()>>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        if self.timeout.is_none() && self.cancel.is_none() {
            return (cancel_rx, None);
        }

        let timeout = self.timeout;
        let external = self.cancel.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = sleep_or_pending(timeout) => {
                    warn!("Test target exceeded its {:?} deadline", timeout.unwrap_or_default());
                }
                _ = cancelled_or_pending(external) => {
                    info!("Test run cancelled");
                }
            }
            cancel_tx.send_replace(true);
        });
        (cancel_rx, Some(task))
    }

    /// Run every target in order against the device.
    ///
    /// Fails only when the device already has a run in progress; per-target
    /// failures are reported through [`RunResult::error`].
    pub async fn run(&self, targets: &[TestConfig], sink: Arc<dyn TestSink>) -> Result<RunResult> {
        let _guard = self.registry.acquire(self.device.udid())?;
        let dispatcher = VersionDispatcher::new(self.device, self.archiver);

        let mut suites = Vec::new();
        let mut errors = Vec::new();

        for (i, config) in targets.iter().enumerate() {
            let index = i + 1;
            info!(
                "Running test target {}/{}: {}",
                index,
                targets.len(),
                config.test_runner_bundle_id
            );
            sink.reset();

            let (cancel, deadline) = self.arm_deadline();
            let result = dispatcher
                .run_test(config, sink.clone(), cancel.clone())
                .await;
            if let Some(task) = deadline {
                task.abort();
            }

            match result {
                Ok(outcome) => {
                    suites.extend(outcome.suites);
                    let failure = outcome.failure.or_else(|| {
                        (*cancel.borrow()).then(|| self.cancel_reason())
                    });
                    if let Some(message) = failure {
                        warn!("Test target {} failed: {}", index, message);
                        errors.push(Error::target(index, Error::test_run(message)));
                    }
                }
                Err(e) => {
                    error!("Test target {} failed: {}", index, e);
                    suites.extend(sink.suites());
                    errors.push(Error::target(index, e));
                }
            }
        }

        Ok(RunResult {
            suites,
            error: Error::aggregate(errors),
        })
    }

    fn cancel_reason(&self) -> String {
        match self.timeout {
            Some(timeout) if !self.externally_cancelled() => {
                format!("timed out after {}s", timeout.as_secs_f64())
            }
            _ => "cancelled".to_string(),
        }
    }
}

async fn sleep_or_pending(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

async fn cancelled_or_pending(cancel: Option<watch::Receiver<bool>>) {
    match cancel {
        Some(mut rx) => {
            if rx.wait_for(|value| *value).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xtm_daemon::test_utils::{FakeDevice, JsonArchiver, RecordingSink};

    fn config() -> TestConfig {
        TestConfig {
            bundle_id: Some("com.example.App".into()),
            test_runner_bundle_id: "com.example.UITests.xctrunner".into(),
            xctest_config_name: "ExampleUITests.xctest".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_busy_device_is_rejected() {
        let device = FakeDevice::with_ui_test_apps("17.0");
        let registry = SessionRegistry::new();
        let _held = registry.acquire(device.udid()).unwrap();

        let driver = RunDriver::new(&device, &JsonArchiver, &registry);
        let err = driver
            .run(&[config()], Arc::new(RecordingSink::default()))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DeviceBusy { .. }));
        assert!(device.calls().is_empty());
    }

    #[tokio::test]
    async fn test_registry_released_after_run() {
        let device = FakeDevice::with_ui_test_apps("17.0").completes_test_plan();
        let registry = SessionRegistry::new();

        let result = RunDriver::new(&device, &JsonArchiver, &registry)
            .run(&[config()], Arc::new(RecordingSink::default()))
            .await
            .unwrap();

        assert!(result.is_success());
        assert!(!registry.is_active(device.udid()));
    }

    #[tokio::test]
    async fn test_empty_target_list() {
        let device = FakeDevice::new("17.0");
        let registry = SessionRegistry::new();

        let result = RunDriver::new(&device, &JsonArchiver, &registry)
            .run(&[], Arc::new(RecordingSink::default()))
            .await
            .unwrap();

        assert!(result.suites.is_empty());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_timeout_ends_a_stuck_target() {
        // The runner never finishes its plan
        let device = FakeDevice::with_ui_test_apps("17.0");
        let registry = SessionRegistry::new();

        let result = RunDriver::new(&device, &JsonArchiver, &registry)
            .with_timeout(Duration::from_millis(50))
            .run(&[config()], Arc::new(RecordingSink::default()))
            .await
            .unwrap();

        let message = result.error.unwrap().to_string();
        assert!(message.contains("test target 1"), "{message}");
        assert!(message.contains("timed out"), "{message}");
        assert_eq!(device.kill_attempts(), 1);
        assert!(device.all_connections_closed());
    }

    #[tokio::test]
    async fn test_external_cancellation() {
        let device = FakeDevice::with_ui_test_apps("17.0");
        let registry = SessionRegistry::new();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send_replace(true);

        let result = RunDriver::new(&device, &JsonArchiver, &registry)
            .with_timeout(Duration::from_secs(600))
            .with_cancellation(cancel_rx)
            .run(&[config()], Arc::new(RecordingSink::default()))
            .await
            .unwrap();

        let message = result.error.unwrap().to_string();
        assert!(message.contains("cancelled"), "{message}");
        assert!(device.live_pids().is_empty());
    }
}
