//! testmanagerd wire contract: service names, channel names, selectors and
//! typed decoding of reply payloads and runner callbacks.

use xtm_core::prelude::*;
use xtm_core::{Capabilities, ProtocolGeneration, TestCaseStatus};

use crate::archive::{describe_payload, ArchivedValue};

// ─────────────────────────────────────────────────────────────────
// Services & Channels
// ─────────────────────────────────────────────────────────────────

/// iOS < 14
pub const LEGACY_SERVICE: &str = "com.apple.testmanagerd.lockdown";
/// iOS 14 – 16
pub const MID_SERVICE: &str = "com.apple.testmanagerd.lockdown.secure";
/// iOS 17+, reached through the device tunnel
pub const MODERN_SERVICE: &str = "com.apple.dt.testmanagerd.remote";

pub const PROXY_CHANNEL: &str =
    "dtxproxy:XCTestManager_IDEInterface:XCTestManager_DaemonConnectionInterface";
pub const DRIVER_CHANNEL: &str = "dtxproxy:XCTestDriverInterface:XCTestManager_IDEInterface";

pub const LEGACY_PROTOCOL_VERSION: u64 = 25;
pub const PROTOCOL_VERSION: u64 = 36;

/// Client tag sent when opening an identified session. The daemon ignores it.
pub const CLIENT_TAG: &str = "thephonedoesntcarewhatisendhereitseems";
pub const XCODE_PATH: &str = "/Applications/Xcode.app";

pub const fn service_for(generation: ProtocolGeneration) -> &'static str {
    match generation {
        ProtocolGeneration::Legacy => LEGACY_SERVICE,
        ProtocolGeneration::Mid => MID_SERVICE,
        ProtocolGeneration::Modern => MODERN_SERVICE,
    }
}

pub const fn protocol_version_for(generation: ProtocolGeneration) -> u64 {
    match generation {
        ProtocolGeneration::Legacy => LEGACY_PROTOCOL_VERSION,
        ProtocolGeneration::Mid | ProtocolGeneration::Modern => PROTOCOL_VERSION,
    }
}

/// Capabilities we announce when opening a modern execution session.
pub fn modern_local_capabilities() -> Capabilities {
    Capabilities::enabled([
        "XCTIssue capability",
        "daemon container sandbox extension",
        "delayed attachment transfer",
        "expected failure test capability",
        "request diagnostics for specific devices",
        "skipped test capability",
        "test case run configurations",
        "test iterations",
        "test timeout capability",
        "ubiquitous test identifiers",
    ])
}

// ─────────────────────────────────────────────────────────────────
// Selectors
// ─────────────────────────────────────────────────────────────────

pub mod selectors {
    // Outbound, IDE -> daemon
    pub const INITIATE_SESSION_WITH_CAPABILITIES: &str =
        "_IDE_initiateSessionWithIdentifier:capabilities:";
    pub const INITIATE_CONTROL_SESSION_WITH_CAPABILITIES: &str =
        "_IDE_initiateControlSessionWithCapabilities:";
    pub const AUTHORIZE_TEST_SESSION: &str = "_IDE_authorizeTestSessionWithProcessID:";
    pub const START_EXECUTING_TEST_PLAN: &str = "_IDE_startExecutingTestPlanWithProtocolVersion:";
    pub const INITIATE_SESSION_WITH_IDENTIFIER: &str =
        "_IDE_initiateSessionWithIdentifier:forClient:atPath:protocolVersion:";
    pub const INITIATE_CONTROL_SESSION_FOR_PROCESS: &str =
        "_IDE_initiateControlSessionForTestProcessID:protocolVersion:";
    pub const INITIATE_CONTROL_SESSION_WITH_PROTOCOL_VERSION: &str =
        "_IDE_initiateControlSessionWithProtocolVersion:";

    // Inbound, runner -> IDE
    pub const TEST_BUNDLE_READY: &str = "_XCT_testBundleReadyWithProtocolVersion:minimumVersion:";
    pub const TEST_RUNNER_READY: &str = "_XCT_testRunnerReadyWithCapabilities:";
    pub const DID_BEGIN_EXECUTING_TEST_PLAN: &str = "_XCT_didBeginExecutingTestPlan";
    pub const TEST_SUITE_DID_START: &str = "_XCT_testSuite:didStartAt:";
    pub const TEST_CASE_DID_START: &str = "_XCT_testCaseDidStartForTestClass:method:";
    pub const TEST_CASE_DID_FAIL: &str =
        "_XCT_testCaseDidFailForTestClass:method:withMessage:file:line:";
    pub const TEST_CASE_DID_FINISH: &str =
        "_XCT_testCaseDidFinishForTestClass:method:withStatus:duration:";
    pub const TEST_SUITE_DID_FINISH: &str =
        "_XCT_testSuite:didFinishAt:runCount:withFailures:unexpected:testDuration:totalDuration:";
    pub const DID_FINISH_EXECUTING_TEST_PLAN: &str = "_XCT_didFinishExecutingTestPlan";
    pub const LOG_MESSAGE: &str = "_XCT_logMessage:";
    pub const LOG_DEBUG_MESSAGE: &str = "_XCT_logDebugMessage:";
    pub const DID_FAIL_TO_BOOTSTRAP: &str = "_XCT_didFailToBootstrapWithError:";
    pub const UI_TESTING_INIT_DID_FAIL: &str = "_XCT_initializationForUITestingDidFailWithError:";
}

// ─────────────────────────────────────────────────────────────────
// Typed Reply Decoding
// ─────────────────────────────────────────────────────────────────

/// Outcome of decoding a reply payload into the shape a call expects.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Value(T),
    Mismatch { expected: &'static str },
}

impl<T> Decoded<T> {
    /// Turn a mismatch into an error naming the selector and the raw payload.
    pub fn into_result(self, selector: &str, payload: &[ArchivedValue]) -> Result<T> {
        match self {
            Decoded::Value(value) => Ok(value),
            Decoded::Mismatch { expected } => Err(Error::UnexpectedReply {
                selector: selector.to_string(),
                expected,
                payload: describe_payload(payload),
            }),
        }
    }
}

fn first_value<T>(
    payload: &[ArchivedValue],
    expected: &'static str,
    pick: impl FnOnce(&ArchivedValue) -> Option<T>,
) -> Decoded<T> {
    match payload.first().and_then(pick) {
        Some(value) => Decoded::Value(value),
        None => Decoded::Mismatch { expected },
    }
}

pub fn decode_capabilities(payload: &[ArchivedValue]) -> Decoded<Capabilities> {
    first_value(payload, "capabilities", |v| v.as_capabilities().cloned())
}

pub fn decode_bool(payload: &[ArchivedValue]) -> Decoded<bool> {
    first_value(payload, "bool", ArchivedValue::as_bool)
}

/// Session tokens come back as integers.
pub fn decode_token(payload: &[ArchivedValue]) -> Decoded<u64> {
    first_value(payload, "integer", ArchivedValue::as_u64)
}

// ─────────────────────────────────────────────────────────────────
// Runner Callbacks
// ─────────────────────────────────────────────────────────────────

/// A decoded callback from the test runner.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerEvent {
    BundleReady {
        protocol_version: u64,
        minimum_version: u64,
    },
    RunnerReady {
        capabilities: Capabilities,
    },
    PlanStarted,
    SuiteStarted {
        suite: String,
        at: String,
    },
    CaseStarted {
        class_name: String,
        method_name: String,
    },
    CaseFailed {
        class_name: String,
        method_name: String,
        message: String,
        file: String,
        line: u64,
    },
    CaseFinished {
        class_name: String,
        method_name: String,
        status: TestCaseStatus,
        duration: f64,
    },
    SuiteFinished {
        suite: String,
        at: String,
        run_count: u64,
        failures: u64,
        unexpected: u64,
        test_duration: f64,
        total_duration: f64,
    },
    PlanFinished,
    Log(String),
    DebugLog(String),
    BootstrapFailed(String),
    UiTestingInitFailed(String),
}

/// Positional argument reader producing protocol errors on bad shapes.
struct Args<'a> {
    selector: &'a str,
    values: &'a [ArchivedValue],
}

impl<'a> Args<'a> {
    fn mismatch(&self, expected: &'static str) -> Error {
        Error::UnexpectedReply {
            selector: self.selector.to_string(),
            expected,
            payload: describe_payload(self.values),
        }
    }

    fn string(&self, index: usize) -> Result<String> {
        self.values
            .get(index)
            .and_then(ArchivedValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| self.mismatch("string"))
    }

    fn uint(&self, index: usize) -> Result<u64> {
        self.values
            .get(index)
            .and_then(ArchivedValue::as_u64)
            .ok_or_else(|| self.mismatch("integer"))
    }

    fn float(&self, index: usize) -> Result<f64> {
        self.values
            .get(index)
            .and_then(ArchivedValue::as_f64)
            .ok_or_else(|| self.mismatch("number"))
    }

    /// Error objects arrive in several shapes; keep whatever text they carry.
    fn description(&self, index: usize) -> String {
        match self.values.get(index) {
            Some(ArchivedValue::Str(s)) => s.clone(),
            Some(ArchivedValue::Dict(d)) => d
                .get("NSLocalizedDescription")
                .and_then(ArchivedValue::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{d:?}")),
            Some(other) => other.to_string(),
            None => "unknown error".to_string(),
        }
    }
}

impl RunnerEvent {
    /// Decode an inbound callback. Unknown selectors yield `Ok(None)`.
    pub fn decode(selector: &str, arguments: &[ArchivedValue]) -> Result<Option<Self>> {
        use selectors::*;

        let args = Args {
            selector,
            values: arguments,
        };

        let event = match selector {
            TEST_BUNDLE_READY => RunnerEvent::BundleReady {
                protocol_version: args.uint(0)?,
                minimum_version: args.uint(1)?,
            },
            TEST_RUNNER_READY => RunnerEvent::RunnerReady {
                capabilities: arguments
                    .first()
                    .and_then(ArchivedValue::as_capabilities)
                    .cloned()
                    .unwrap_or_default(),
            },
            DID_BEGIN_EXECUTING_TEST_PLAN => RunnerEvent::PlanStarted,
            TEST_SUITE_DID_START => RunnerEvent::SuiteStarted {
                suite: args.string(0)?,
                at: args.string(1)?,
            },
            TEST_CASE_DID_START => RunnerEvent::CaseStarted {
                class_name: args.string(0)?,
                method_name: args.string(1)?,
            },
            TEST_CASE_DID_FAIL => RunnerEvent::CaseFailed {
                class_name: args.string(0)?,
                method_name: args.string(1)?,
                message: args.string(2)?,
                file: args.string(3)?,
                line: args.uint(4)?,
            },
            TEST_CASE_DID_FINISH => RunnerEvent::CaseFinished {
                class_name: args.string(0)?,
                method_name: args.string(1)?,
                status: TestCaseStatus::from_wire(&args.string(2)?),
                duration: args.float(3)?,
            },
            TEST_SUITE_DID_FINISH => RunnerEvent::SuiteFinished {
                suite: args.string(0)?,
                at: args.string(1)?,
                run_count: args.uint(2)?,
                failures: args.uint(3)?,
                unexpected: args.uint(4)?,
                test_duration: args.float(5)?,
                total_duration: args.float(6)?,
            },
            DID_FINISH_EXECUTING_TEST_PLAN => RunnerEvent::PlanFinished,
            LOG_MESSAGE => RunnerEvent::Log(args.string(0)?),
            LOG_DEBUG_MESSAGE => RunnerEvent::DebugLog(args.string(0)?),
            DID_FAIL_TO_BOOTSTRAP => RunnerEvent::BootstrapFailed(args.description(0)),
            UI_TESTING_INIT_DID_FAIL => RunnerEvent::UiTestingInitFailed(args.description(0)),
            _ => return Ok(None),
        };

        Ok(Some(event))
    }
}
