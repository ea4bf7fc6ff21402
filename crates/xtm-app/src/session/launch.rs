//! Runner launch parameters per protocol generation

use std::collections::BTreeMap;
use std::sync::Arc;

use xtm_core::prelude::*;
use xtm_core::{AppInfo, ProtocolGeneration, SessionId, TestConfig};
use xtm_daemon::{
    spawn_output_forwarder, ArchivedValue, DeviceServices, LaunchRequest, RunnerProcess, TestSink,
};

use super::termination::RunnerSlot;
use crate::test_config::bundle_path_on_device;

const MAIN_THREAD_CHECKER: &str = "/Developer/usr/lib/libMainThreadChecker.dylib";
const TEST_BUNDLE_INJECT: &str = "/System/Developer/usr/lib/libXCTestBundleInject.dylib";

/// Arguments older runners need so state restoration does not interfere.
const PUSHED_CONFIG_ARGS: [&str; 4] = [
    "-NSTreatUnknownArgumentsAsOpen",
    "NO",
    "-ApplePersistenceIgnoreState",
    "YES",
];

fn inserted_libraries(xctest: bool) -> String {
    if xctest {
        format!("{MAIN_THREAD_CHECKER}:{TEST_BUNDLE_INJECT}")
    } else {
        MAIN_THREAD_CHECKER.to_string()
    }
}

fn env_map(pairs: &[(&str, String)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Caller-supplied variables win over the defaults.
fn with_caller_env(
    mut env: BTreeMap<String, String>,
    config: &TestConfig,
) -> BTreeMap<String, String> {
    for (key, value) in &config.env {
        debug!("Adding extra env {}={}", key, value);
        env.insert(key.clone(), value.clone());
    }
    env
}

fn uint_options(pairs: &[(&str, u64)]) -> BTreeMap<String, ArchivedValue> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), ArchivedValue::UInt(*v)))
        .collect()
}

/// iOS 17+: configuration arrives over the proxy channel, so the file path
/// stays empty.
pub fn modern_request(config: &TestConfig, runner: &AppInfo, session_id: SessionId) -> LaunchRequest {
    let env = env_map(&[
        ("CA_ASSERT_MAIN_THREAD_TRANSACTIONS", "0".into()),
        ("CA_DEBUG_TRANSACTIONS", "0".into()),
        ("DYLD_INSERT_LIBRARIES", inserted_libraries(config.xctest)),
        (
            "DYLD_FRAMEWORK_PATH",
            "/System/Developer/Library/Frameworks".into(),
        ),
        ("DYLD_LIBRARY_PATH", "/System/Developer/usr/lib".into()),
        ("MTC_CRASH_ON_REPORT", "1".into()),
        ("NSUnbufferedIO", "YES".into()),
        ("OS_ACTIVITY_DT_MODE", "YES".into()),
        ("SQLITE_ENABLE_THREAD_ASSERTIONS", "1".into()),
        (
            "XCTestBundlePath",
            bundle_path_on_device(runner, &config.xctest_config_name),
        ),
        ("XCTestConfigurationFilePath", String::new()),
        ("XCTestManagerVariant", "DDI".into()),
        ("XCTestSessionIdentifier", session_id.canonical()),
    ]);

    // Unit tests run inside the runner and must not be brought to the front
    let options = if config.xctest {
        BTreeMap::new()
    } else {
        uint_options(&[
            ("ActivateSuspended", 1),
            ("StartSuspendedKey", 0),
            ("__ActivateSuspended", 1),
        ])
    };

    LaunchRequest {
        bundle_id: config.test_runner_bundle_id.clone(),
        args: config.args.clone(),
        env: with_caller_env(env, config),
        options,
    }
}

/// Before iOS 17 the runner reads its configuration from `config_path`.
pub fn pushed_config_request(
    config: &TestConfig,
    runner: &AppInfo,
    session_id: SessionId,
    config_path: &str,
    generation: ProtocolGeneration,
) -> LaunchRequest {
    let mut env = env_map(&[
        ("DYLD_INSERT_LIBRARIES", inserted_libraries(config.xctest)),
        ("MTC_CRASH_ON_REPORT", "1".into()),
        ("NSUnbufferedIO", "YES".into()),
        ("OS_ACTIVITY_DT_MODE", "YES".into()),
        ("SQLITE_ENABLE_THREAD_ASSERTIONS", "1".into()),
        (
            "XCTestBundlePath",
            bundle_path_on_device(runner, &config.xctest_config_name),
        ),
        ("XCTestConfigurationFilePath", config_path.to_string()),
        ("XCTestSessionIdentifier", session_id.canonical()),
    ]);
    if generation == ProtocolGeneration::Mid {
        env.insert("XCTestManagerVariant".into(), "DDI".into());
    }

    let args = PUSHED_CONFIG_ARGS
        .iter()
        .map(|a| a.to_string())
        .chain(config.args.iter().cloned())
        .collect();

    LaunchRequest {
        bundle_id: config.test_runner_bundle_id.clone(),
        args,
        env: with_caller_env(env, config),
        options: uint_options(&[("StartSuspendedKey", 0), ("ActivateSuspended", 1)]),
    }
}

/// Launch the runner, start forwarding its output and park both in `slot`.
pub async fn launch_runner<D: DeviceServices>(
    device: &D,
    request: LaunchRequest,
    sink: Arc<dyn TestSink>,
    slot: &mut RunnerSlot,
) -> Result<u64> {
    let bundle_id = request.bundle_id.clone();
    info!("Launching test runner {}", bundle_id);

    let launched = device.launch_app(request).await.map_err(|e| match e {
        Error::Launch { .. } => e,
        other => Error::launch(&bundle_id, other.to_string()),
    })?;

    info!("Test runner {} started with pid {}", bundle_id, launched.pid);
    let forwarder = spawn_output_forwarder(launched.stdout, sink);
    slot.launched(RunnerProcess::new(launched.pid), forwarder);
    Ok(launched.pid)
}
