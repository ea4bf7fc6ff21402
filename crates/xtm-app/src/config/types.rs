//! Configuration types
//!
//! Defines:
//! - `Settings` - Run defaults from `.xtm/config.toml`
//! - `TargetConfig` - One test target from `.xtm/targets.toml`

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use xtm_core::TestConfig;

/// Global settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub run: RunSettings,

    #[serde(default)]
    pub log: LogSettings,
}

/// Defaults applied to every test target
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RunSettings {
    /// Cancel a target after this many seconds. Unset waits indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Environment for every runner; a target's own env wins
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl RunSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LogSettings {
    /// Default filter when `XTM_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A single test target
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct TargetConfig {
    /// Display name, used in logs only
    #[serde(default)]
    pub name: Option<String>,

    /// App under test; omit for unit tests hosted by the runner
    #[serde(default)]
    pub bundle_id: Option<String>,

    pub test_runner_bundle_id: String,

    pub xctest_config_name: String,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub tests_to_run: Vec<String>,

    #[serde(default)]
    pub tests_to_skip: Vec<String>,

    #[serde(default)]
    pub xctest: bool,
}

/// The `[[targets]]` array of `targets.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TargetsFile {
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl TargetConfig {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .unwrap_or(&self.test_runner_bundle_id)
    }

    /// Convert to a [`TestConfig`], layering the target's env over the
    /// settings env.
    pub fn into_test_config(self, settings: &Settings) -> TestConfig {
        let mut env = settings.run.env.clone();
        env.extend(self.env);

        TestConfig {
            bundle_id: self.bundle_id,
            test_runner_bundle_id: self.test_runner_bundle_id,
            xctest_config_name: self.xctest_config_name,
            env,
            args: self.args,
            tests_to_run: self.tests_to_run,
            tests_to_skip: self.tests_to_skip,
            xctest: self.xctest,
        }
    }
}
