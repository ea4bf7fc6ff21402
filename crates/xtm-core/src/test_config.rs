//! Test target parameters and the session configuration sent to the runner

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::SessionId;

/// Parameters of one test execution.
///
/// The device and the result sink travel next to this value; it is
/// immutable once handed to an orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestConfig {
    /// The identifier of the app under test. Unit tests run inside the
    /// runner itself, so this may be left empty.
    #[serde(default)]
    pub bundle_id: Option<String>,

    /// The identifier of the installed test runner
    pub test_runner_bundle_id: String,

    /// Name of the `.xctest` bundle inside the runner's `PlugIns` directory
    pub xctest_config_name: String,

    /// Passed as environment variables to the runner; overrides defaults
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Passed to the runner as launch arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Tests to execute, `[MODULE.]CLASS[/METHOD]`. Empty runs everything.
    #[serde(default)]
    pub tests_to_run: Vec<String>,

    /// Tests to skip, same format as `tests_to_run`
    #[serde(default)]
    pub tests_to_skip: Vec<String>,

    /// `true` if the runner hosts a unit-test bundle rather than UI tests
    #[serde(default)]
    pub xctest: bool,
}

fn test_identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:[A-Za-z_][A-Za-z0-9_]*\.)?[A-Za-z_][A-Za-z0-9_]*(?:/[A-Za-z_][A-Za-z0-9_]*)?$")
            .expect("test identifier pattern is valid")
    })
}

impl TestConfig {
    /// Check the invariants every orchestrator relies on.
    pub fn validate(&self) -> Result<()> {
        if self.test_runner_bundle_id.trim().is_empty() {
            return Err(Error::config_invalid(
                "test_runner_bundle_id can not be empty",
            ));
        }
        if self.xctest_config_name.trim().is_empty() {
            return Err(Error::config_invalid("xctest_config_name can not be empty"));
        }

        let pattern = test_identifier_pattern();
        for filter in self.tests_to_run.iter().chain(&self.tests_to_skip) {
            if !pattern.is_match(filter) {
                return Err(Error::config_invalid(format!(
                    "invalid test identifier '{}', expected [MODULE.]CLASS[/METHOD]",
                    filter
                )));
            }
        }

        Ok(())
    }

    /// Non-empty target app identifier, if any.
    pub fn target_bundle_id(&self) -> Option<&str> {
        self.bundle_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// The session configuration handed to the runner (`XCTestConfiguration`).
///
/// Modern devices receive it in memory when the runner asks for it; older
/// generations read it from a file pushed into the runner's sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XcTestConfiguration {
    pub product_module_name: String,
    pub session_identifier: SessionId,
    /// Target app under test; empty for unit tests
    pub target_application_bundle_id: Option<String>,
    pub target_application_path: Option<String>,
    /// Relative (`PlugIns/X.xctest`) in memory, absolute when pushed
    pub test_bundle_path: String,
    pub tests_to_run: Vec<String>,
    pub tests_to_skip: Vec<String>,
    /// `false` for unit tests (the bundle is injected into the runner)
    pub initialize_for_ui_testing: bool,
    pub protocol_version: u64,
}
