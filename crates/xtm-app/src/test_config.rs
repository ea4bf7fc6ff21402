//! Building and delivering the runner's session configuration

use xtm_core::prelude::*;
use xtm_core::{AppInfo, SessionId, TestConfig, XcTestConfiguration};
use xtm_daemon::{ArchivedValue, Archiver, DeviceServices};

/// `Foo.xctest` -> `Foo`
pub fn module_name(xctest_config_name: &str) -> &str {
    xctest_config_name
        .strip_suffix(".xctest")
        .unwrap_or(xctest_config_name)
}

/// Absolute path of the test bundle inside the installed runner.
pub fn bundle_path_on_device(runner: &AppInfo, xctest_config_name: &str) -> String {
    format!("{}/PlugIns/{}", runner.path, xctest_config_name)
}

/// Relative path of a pushed configuration inside the runner's sandbox.
pub fn config_relative_path(session_id: SessionId) -> String {
    format!("tmp/{}.xctestconfiguration", session_id)
}

/// Assembles the [`XcTestConfiguration`] for one session.
#[derive(Debug, Clone, Copy)]
pub struct TestConfigBuilder<'a> {
    config: &'a TestConfig,
    runner: &'a AppInfo,
    target: Option<&'a AppInfo>,
    session_id: SessionId,
    protocol_version: u64,
}

impl<'a> TestConfigBuilder<'a> {
    pub fn new(
        config: &'a TestConfig,
        runner: &'a AppInfo,
        target: Option<&'a AppInfo>,
        session_id: SessionId,
        protocol_version: u64,
    ) -> Self {
        Self {
            config,
            runner,
            target,
            session_id,
            protocol_version,
        }
    }

    fn build(&self, test_bundle_path: String) -> XcTestConfiguration {
        XcTestConfiguration {
            product_module_name: module_name(&self.config.xctest_config_name).to_string(),
            session_identifier: self.session_id,
            target_application_bundle_id: self.target.map(|t| t.bundle_id.clone()),
            target_application_path: self.target.map(|t| t.path.clone()),
            test_bundle_path,
            tests_to_run: self.config.tests_to_run.clone(),
            tests_to_skip: self.config.tests_to_skip.clone(),
            initialize_for_ui_testing: !self.config.xctest,
            protocol_version: self.protocol_version,
        }
    }

    /// Configuration handed to the runner over the proxy channel.
    pub fn in_memory(&self) -> XcTestConfiguration {
        self.build(format!("PlugIns/{}", self.config.xctest_config_name))
    }

    /// Archive the configuration and push it into the runner's sandbox.
    ///
    /// Returns the configuration and its absolute path on the device.
    pub async fn on_device<D: DeviceServices>(
        &self,
        device: &D,
        archiver: &dyn Archiver,
    ) -> Result<(XcTestConfiguration, String)> {
        let home = self
            .runner
            .home
            .as_deref()
            .ok_or_else(|| Error::NoHomeDirectory {
                bundle_id: self.runner.bundle_id.clone(),
            })?;

        let configuration = self.build(bundle_path_on_device(
            self.runner,
            &self.config.xctest_config_name,
        ));
        let bytes = archiver.archive(&ArchivedValue::from(configuration.clone()))?;

        let relative = config_relative_path(self.session_id);
        debug!(
            "Pushing {} bytes of test configuration to {}:{}",
            bytes.len(),
            self.runner.bundle_id,
            relative
        );
        device
            .push_file(&self.runner.bundle_id, bytes, &relative)
            .await
            .map_err(|e| match e {
                Error::FileTransfer { .. } => e,
                other => Error::file_transfer(&relative, other.to_string()),
            })
            .with_context(|| {
                format!("Failed to push test configuration to {}", self.runner.bundle_id)
            })?;

        Ok((configuration, format!("{}/{}", home.trim_end_matches('/'), relative)))
    }
}
