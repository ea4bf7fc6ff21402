//! Test utilities for protocol and orchestration tests
//!
//! [`FakeDevice`] is an in-memory device: it records every call made against
//! it, answers selectors with scripted (or sensible default) replies, emits
//! runner callbacks after chosen calls and can drop connections on cue.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use xtm_core::prelude::*;
use xtm_core::{Capabilities, OsVersion, SessionId, TestSuite, XcTestConfiguration};

use crate::apps::InstalledApp;
use crate::archive::{ArchivedValue, Archiver};
use crate::protocol::{selectors, RunnerEvent, PROXY_CHANNEL};
use crate::sink::TestSink;
use crate::transport::{
    ChannelCode, CloseReason, Connection, DeviceServices, InboundMessage, LaunchRequest,
    LaunchedApp, MessageDispatcher,
};

// ─────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────

/// Creates an installed-app record under the usual bundle container path.
pub fn installed_app(bundle_id: &str, bundle_name: &str, home: Option<&str>) -> InstalledApp {
    let mut environment = BTreeMap::new();
    if let Some(home) = home {
        environment.insert("HOME".to_string(), ArchivedValue::Str(home.to_string()));
    }
    InstalledApp {
        bundle_id: bundle_id.to_string(),
        bundle_name: bundle_name.to_string(),
        path: format!("/private/var/containers/Bundle/Application/{bundle_name}.app"),
        environment,
    }
}

/// Runner, target app and an unrelated app, as installed for a UI test.
pub fn ui_test_apps() -> Vec<InstalledApp> {
    vec![
        installed_app(
            "com.example.App",
            "Example",
            Some("/private/var/mobile/Containers/Data/Application/APP"),
        ),
        installed_app(
            "com.example.UITests.xctrunner",
            "ExampleUITests-Runner",
            Some("/private/var/mobile/Containers/Data/Application/RUNNER"),
        ),
        installed_app("com.example.Other", "Other", None),
    ]
}

/// A UI-test session configuration for dispatcher tests.
pub fn test_configuration() -> XcTestConfiguration {
    XcTestConfiguration {
        product_module_name: "ExampleUITests".to_string(),
        session_identifier: SessionId::new(),
        target_application_bundle_id: Some("com.example.App".to_string()),
        target_application_path: Some(
            "/private/var/containers/Bundle/Application/Example.app".to_string(),
        ),
        test_bundle_path: "PlugIns/ExampleUITests.xctest".to_string(),
        tests_to_run: Vec::new(),
        tests_to_skip: Vec::new(),
        initialize_for_ui_testing: true,
        protocol_version: 36,
    }
}

/// Callbacks of a test plan where every listed method passes.
pub fn passing_plan(suite: &str, methods: &[&str]) -> Vec<InboundMessage> {
    let at = "2026-10-16 10:00:00 +0000";
    let mut messages = vec![
        InboundMessage::new(selectors::DID_BEGIN_EXECUTING_TEST_PLAN, vec![]),
        InboundMessage::new(
            selectors::TEST_SUITE_DID_START,
            vec![ArchivedValue::Str(suite.into()), ArchivedValue::Str(at.into())],
        ),
    ];
    for method in methods {
        messages.push(InboundMessage::new(
            selectors::TEST_CASE_DID_START,
            vec![
                ArchivedValue::Str(suite.into()),
                ArchivedValue::Str((*method).into()),
            ],
        ));
        messages.push(InboundMessage::new(
            selectors::TEST_CASE_DID_FINISH,
            vec![
                ArchivedValue::Str(suite.into()),
                ArchivedValue::Str((*method).into()),
                ArchivedValue::Str("passed".into()),
                ArchivedValue::Double(0.5),
            ],
        ));
    }
    messages.push(InboundMessage::new(
        selectors::TEST_SUITE_DID_FINISH,
        vec![
            ArchivedValue::Str(suite.into()),
            ArchivedValue::Str(at.into()),
            ArchivedValue::UInt(methods.len() as u64),
            ArchivedValue::UInt(0),
            ArchivedValue::UInt(0),
            ArchivedValue::Double(0.5 * methods.len() as f64),
            ArchivedValue::Double(0.5 * methods.len() as f64 + 0.1),
        ],
    ));
    messages.push(InboundMessage::new(
        selectors::DID_FINISH_EXECUTING_TEST_PLAN,
        vec![],
    ));
    messages
}

// ─────────────────────────────────────────────────────────────────
// Fake Device
// ─────────────────────────────────────────────────────────────────

/// Everything observable that happened against a [`FakeDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    ProductVersion,
    OpenConnection {
        service: String,
    },
    BrowseApps,
    PushFile {
        bundle_id: String,
        path: String,
    },
    Launch {
        bundle_id: String,
    },
    Kill {
        pid: u64,
    },
    RequestChannel {
        connection: usize,
        identifier: String,
    },
    Call {
        connection: usize,
        channel: i32,
        selector: String,
    },
    CallAsync {
        connection: usize,
        channel: i32,
        selector: String,
    },
    Close {
        connection: usize,
    },
}

/// Scripted reaction to a selector being called.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Deliver a runner callback on a named channel. `None` targets the
    /// connection the triggering call was made on.
    Emit {
        connection: Option<usize>,
        channel: String,
        message: InboundMessage,
    },
    /// Drop a connection
    Close {
        connection: usize,
        reason: CloseReason,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushedFile {
    pub bundle_id: String,
    pub path: String,
    pub contents: Vec<u8>,
}

#[derive(Default)]
struct Script {
    version: Option<String>,
    apps: Vec<InstalledApp>,
    replies: HashMap<String, Vec<ArchivedValue>>,
    triggers: HashMap<String, Vec<Trigger>>,
    failing_calls: HashSet<String>,
    failing_opens: HashSet<usize>,
    fail_launch: bool,
    fail_push: bool,
    output: Vec<String>,
}

struct ConnState {
    index: usize,
    service: String,
    next_channel: AtomicI32,
    channels: Mutex<Vec<(String, Option<Arc<dyn MessageDispatcher>>)>>,
    closed_tx: watch::Sender<bool>,
    reason: Mutex<Option<CloseReason>>,
    close_calls: AtomicUsize,
}

impl ConnState {
    fn shut(&self, reason: CloseReason) {
        let mut slot = self.reason.lock().unwrap();
        if slot.is_none() {
            *slot = Some(reason);
            self.closed_tx.send_replace(true);
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }
}

struct Shared {
    udid: String,
    script: Mutex<Script>,
    calls: Mutex<Vec<DeviceCall>>,
    connections: Mutex<Vec<Arc<ConnState>>>,
    open_attempts: AtomicUsize,
    next_pid: AtomicU64,
    live_pids: Mutex<HashSet<u64>>,
    pushed: Mutex<Vec<PushedFile>>,
    launches: Mutex<Vec<LaunchRequest>>,
    replies_sent: Mutex<Vec<(String, Vec<ArchivedValue>)>>,
    arguments: Mutex<Vec<(String, Vec<ArchivedValue>)>>,
}

impl Shared {
    fn record(&self, call: DeviceCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn record_arguments(&self, selector: &str, arguments: Vec<ArchivedValue>) {
        self.arguments
            .lock()
            .unwrap()
            .push((selector.to_string(), arguments));
    }

    fn connection(&self, index: usize) -> Option<Arc<ConnState>> {
        self.connections.lock().unwrap().get(index).cloned()
    }

    fn deliver(&self, connection: usize, channel: &str, message: InboundMessage) {
        let Some(conn) = self.connection(connection) else {
            return;
        };
        let dispatcher = conn
            .channels
            .lock()
            .unwrap()
            .iter()
            .find(|(identifier, d)| identifier == channel && d.is_some())
            .and_then(|(_, d)| d.clone());

        if let Some(dispatcher) = dispatcher {
            let selector = message.selector.clone();
            if let Some(reply) = dispatcher.dispatch(message) {
                self.replies_sent.lock().unwrap().push((selector, reply));
            }
        }
    }

    fn fire(&self, origin: usize, triggers: Vec<Trigger>) {
        for trigger in triggers {
            match trigger {
                Trigger::Emit {
                    connection,
                    channel,
                    message,
                } => self.deliver(connection.unwrap_or(origin), &channel, message),
                Trigger::Close { connection, reason } => {
                    if let Some(conn) = self.connection(connection) {
                        conn.shut(reason);
                    }
                }
            }
        }
    }
}

/// In-memory device for orchestration tests.
#[derive(Clone)]
pub struct FakeDevice {
    shared: Arc<Shared>,
}

impl FakeDevice {
    /// A device reporting `version` with no apps installed.
    pub fn new(version: &str) -> Self {
        Self {
            shared: Arc::new(Shared {
                udid: "00008110-000A1C2E0C41801E".to_string(),
                script: Mutex::new(Script {
                    version: Some(version.to_string()),
                    ..Default::default()
                }),
                calls: Mutex::new(Vec::new()),
                connections: Mutex::new(Vec::new()),
                open_attempts: AtomicUsize::new(0),
                next_pid: AtomicU64::new(1000),
                live_pids: Mutex::new(HashSet::new()),
                pushed: Mutex::new(Vec::new()),
                launches: Mutex::new(Vec::new()),
                replies_sent: Mutex::new(Vec::new()),
                arguments: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A device with the runner and target app of a UI test installed.
    pub fn with_ui_test_apps(version: &str) -> Self {
        Self::new(version).with_apps(ui_test_apps())
    }

    fn script(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.shared.script.lock().unwrap());
    }

    // ── scripting ────────────────────────────────────────────────

    pub fn with_udid(self, udid: &str) -> Self {
        // udid is only read, so rebuilding the shared state is not needed
        let shared = Arc::try_unwrap(self.shared)
            .ok()
            .expect("with_udid must be called before the device is shared");
        Self {
            shared: Arc::new(Shared {
                udid: udid.to_string(),
                ..shared
            }),
        }
    }

    pub fn without_version(self) -> Self {
        self.script(|s| s.version = None);
        self
    }

    pub fn with_apps(self, apps: Vec<InstalledApp>) -> Self {
        self.script(|s| s.apps = apps);
        self
    }

    pub fn reply(self, selector: &str, payload: Vec<ArchivedValue>) -> Self {
        self.script(|s| {
            s.replies.insert(selector.to_string(), payload);
        });
        self
    }

    pub fn on_call(self, selector: &str, trigger: Trigger) -> Self {
        self.script(|s| {
            s.triggers
                .entry(selector.to_string())
                .or_default()
                .push(trigger)
        });
        self
    }

    /// Make calls to `selector` fail at the transport level.
    pub fn fail_call(self, selector: &str) -> Self {
        self.script(|s| {
            s.failing_calls.insert(selector.to_string());
        });
        self
    }

    /// Make the `attempt`-th (0-based) `open_connection` fail.
    pub fn fail_open_connection(self, attempt: usize) -> Self {
        self.script(|s| {
            s.failing_opens.insert(attempt);
        });
        self
    }

    pub fn fail_launch(self) -> Self {
        self.script(|s| s.fail_launch = true);
        self
    }

    pub fn fail_push(self) -> Self {
        self.script(|s| s.fail_push = true);
        self
    }

    pub fn runner_output(self, lines: &[&str]) -> Self {
        self.script(|s| s.output = lines.iter().map(|l| l.to_string()).collect());
        self
    }

    /// Play `messages` on the proxy channel of the connection that called
    /// `selector`, right after the call.
    pub fn emit_after(self, selector: &str, messages: Vec<InboundMessage>) -> Self {
        messages.into_iter().fold(self, |device, message| {
            device.on_call(
                selector,
                Trigger::Emit {
                    connection: None,
                    channel: PROXY_CHANNEL.to_string(),
                    message,
                },
            )
        })
    }

    /// Finish a passing test plan as soon as execution is started.
    pub fn completes_test_plan(self) -> Self {
        self.emit_after(
            selectors::START_EXECUTING_TEST_PLAN,
            passing_plan("ExampleUITests", &["testSignIn", "testSignOut"]),
        )
    }

    /// Drop connection `connection` after `selector` with an abnormal reason.
    pub fn drop_connection_after(self, selector: &str, connection: usize) -> Self {
        self.on_call(
            selector,
            Trigger::Close {
                connection,
                reason: CloseReason::Abnormal("connection reset by peer".to_string()),
            },
        )
    }

    /// Deliver an inbound message right now.
    pub fn emit(&self, connection: usize, channel: &str, message: InboundMessage) {
        self.shared.deliver(connection, channel, message);
    }

    /// Drop a connection right now.
    pub fn close_connection(&self, connection: usize, reason: CloseReason) {
        if let Some(conn) = self.shared.connection(connection) {
            conn.shut(reason);
        }
    }

    // ── inspection ───────────────────────────────────────────────

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.shared.calls.lock().unwrap().clone()
    }

    /// Outbound selectors in call order, sync and async alike.
    pub fn selectors(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                DeviceCall::Call { selector, .. } | DeviceCall::CallAsync { selector, .. } => {
                    Some(selector)
                }
                _ => None,
            })
            .collect()
    }

    pub fn kill_attempts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, DeviceCall::Kill { .. }))
            .count()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().unwrap().len()
    }

    pub fn close_count(&self, connection: usize) -> usize {
        self.shared
            .connection(connection)
            .map_or(0, |c| c.close_calls.load(Ordering::SeqCst))
    }

    pub fn is_closed(&self, connection: usize) -> bool {
        self.shared
            .connection(connection)
            .is_some_and(|c| c.is_closed())
    }

    pub fn all_connections_closed(&self) -> bool {
        (0..self.connection_count()).all(|i| self.is_closed(i))
    }

    pub fn pushed_files(&self) -> Vec<PushedFile> {
        self.shared.pushed.lock().unwrap().clone()
    }

    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.shared.launches.lock().unwrap().clone()
    }

    pub fn live_pids(&self) -> Vec<u64> {
        self.shared.live_pids.lock().unwrap().iter().copied().collect()
    }

    /// Arguments of every outbound call to `selector`, in call order.
    pub fn arguments_of(&self, selector: &str) -> Vec<Vec<ArchivedValue>> {
        self.shared
            .arguments
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == selector)
            .map(|(_, args)| args.clone())
            .collect()
    }

    /// Replies our dispatchers produced for inbound calls.
    pub fn replies_sent(&self) -> Vec<(String, Vec<ArchivedValue>)> {
        self.shared.replies_sent.lock().unwrap().clone()
    }
}

fn default_reply(selector: &str) -> Vec<ArchivedValue> {
    match selector {
        selectors::INITIATE_SESSION_WITH_CAPABILITIES
        | selectors::INITIATE_CONTROL_SESSION_WITH_CAPABILITIES => {
            let mut caps = Capabilities::new();
            caps.insert("expected failure test capability", 1);
            caps.insert("test timeout capability", 1);
            vec![ArchivedValue::Capabilities(caps)]
        }
        selectors::AUTHORIZE_TEST_SESSION => vec![ArchivedValue::Bool(true)],
        selectors::INITIATE_SESSION_WITH_IDENTIFIER
        | selectors::INITIATE_CONTROL_SESSION_WITH_PROTOCOL_VERSION => {
            vec![ArchivedValue::UInt(1)]
        }
        _ => Vec::new(),
    }
}

impl DeviceServices for FakeDevice {
    type Connection = FakeConnection;

    fn udid(&self) -> &str {
        &self.shared.udid
    }

    async fn product_version(&self) -> Result<OsVersion> {
        self.shared.record(DeviceCall::ProductVersion);
        let version = self.shared.script.lock().unwrap().version.clone();
        match version {
            Some(v) => v
                .parse::<OsVersion>()
                .map_err(|e| Error::version_query(e.to_string())),
            None => Err(Error::version_query("lockdown did not answer")),
        }
    }

    async fn open_connection(&self, service: &str) -> Result<FakeConnection> {
        self.shared.record(DeviceCall::OpenConnection {
            service: service.to_string(),
        });

        let attempt = self.shared.open_attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .shared
            .script
            .lock()
            .unwrap()
            .failing_opens
            .contains(&attempt)
        {
            return Err(Error::connection(service, "scripted connection failure"));
        }

        let mut connections = self.shared.connections.lock().unwrap();
        let (closed_tx, _) = watch::channel(false);
        let state = Arc::new(ConnState {
            index: connections.len(),
            service: service.to_string(),
            next_channel: AtomicI32::new(1),
            channels: Mutex::new(Vec::new()),
            closed_tx,
            reason: Mutex::new(None),
            close_calls: AtomicUsize::new(0),
        });
        connections.push(state.clone());

        Ok(FakeConnection {
            shared: self.shared.clone(),
            state,
        })
    }

    async fn browse_user_apps(&self) -> Result<Vec<InstalledApp>> {
        self.shared.record(DeviceCall::BrowseApps);
        Ok(self.shared.script.lock().unwrap().apps.clone())
    }

    async fn push_file(&self, bundle_id: &str, contents: Vec<u8>, relative_path: &str) -> Result<()> {
        self.shared.record(DeviceCall::PushFile {
            bundle_id: bundle_id.to_string(),
            path: relative_path.to_string(),
        });
        if self.shared.script.lock().unwrap().fail_push {
            return Err(Error::file_transfer(relative_path, "scripted transfer failure"));
        }
        self.shared.pushed.lock().unwrap().push(PushedFile {
            bundle_id: bundle_id.to_string(),
            path: relative_path.to_string(),
            contents,
        });
        Ok(())
    }

    async fn launch_app(&self, request: LaunchRequest) -> Result<LaunchedApp> {
        self.shared.record(DeviceCall::Launch {
            bundle_id: request.bundle_id.clone(),
        });
        let (fail, output) = {
            let script = self.shared.script.lock().unwrap();
            (script.fail_launch, script.output.clone())
        };
        if fail {
            return Err(Error::launch(&request.bundle_id, "scripted launch failure"));
        }

        let pid = self.shared.next_pid.fetch_add(1, Ordering::SeqCst);
        self.shared.live_pids.lock().unwrap().insert(pid);
        self.shared.launches.lock().unwrap().push(request);

        let mut stdout = output.join("\n");
        if !stdout.is_empty() {
            stdout.push('\n');
        }
        Ok(LaunchedApp {
            pid,
            stdout: Box::new(std::io::Cursor::new(stdout.into_bytes())),
        })
    }

    async fn kill_process(&self, pid: u64) -> Result<()> {
        self.shared.record(DeviceCall::Kill { pid });
        if self.shared.live_pids.lock().unwrap().remove(&pid) {
            Ok(())
        } else {
            Err(Error::kill(pid, "no such process"))
        }
    }
}

/// Connection handed out by [`FakeDevice::open_connection`].
pub struct FakeConnection {
    shared: Arc<Shared>,
    state: Arc<ConnState>,
}

impl FakeConnection {
    pub fn index(&self) -> usize {
        self.state.index
    }

    fn outbound(&self, selector: &str) -> Result<(Vec<ArchivedValue>, Vec<Trigger>)> {
        if self.state.is_closed() {
            return Err(Error::connection_lost("connection is closed"));
        }
        let script = self.shared.script.lock().unwrap();
        if script.failing_calls.contains(selector) {
            return Err(Error::connection_lost("scripted call failure"));
        }
        let reply = script
            .replies
            .get(selector)
            .cloned()
            .unwrap_or_else(|| default_reply(selector));
        let triggers = script.triggers.get(selector).cloned().unwrap_or_default();
        Ok((reply, triggers))
    }
}

impl Connection for FakeConnection {
    fn service(&self) -> &str {
        &self.state.service
    }

    async fn request_channel(
        &self,
        identifier: &str,
        dispatcher: Option<Arc<dyn MessageDispatcher>>,
    ) -> Result<ChannelCode> {
        self.shared.record(DeviceCall::RequestChannel {
            connection: self.state.index,
            identifier: identifier.to_string(),
        });
        if self.state.is_closed() {
            return Err(Error::connection_lost("connection is closed"));
        }
        let code = self.state.next_channel.fetch_add(1, Ordering::SeqCst);
        self.state
            .channels
            .lock()
            .unwrap()
            .push((identifier.to_string(), dispatcher));
        Ok(ChannelCode(code))
    }

    async fn call(
        &self,
        channel: ChannelCode,
        selector: &str,
        arguments: Vec<ArchivedValue>,
    ) -> Result<Vec<ArchivedValue>> {
        self.shared.record(DeviceCall::Call {
            connection: self.state.index,
            channel: channel.0,
            selector: selector.to_string(),
        });
        self.shared.record_arguments(selector, arguments);
        let (reply, triggers) = self.outbound(selector)?;
        self.shared.fire(self.state.index, triggers);
        Ok(reply)
    }

    async fn call_async(
        &self,
        channel: ChannelCode,
        selector: &str,
        arguments: Vec<ArchivedValue>,
    ) -> Result<()> {
        self.shared.record(DeviceCall::CallAsync {
            connection: self.state.index,
            channel: channel.0,
            selector: selector.to_string(),
        });
        self.shared.record_arguments(selector, arguments);
        let (_, triggers) = self.outbound(selector)?;
        self.shared.fire(self.state.index, triggers);
        Ok(())
    }

    async fn closed(&self) {
        let mut rx = self.state.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    fn last_error(&self) -> Option<CloseReason> {
        self.state.reason.lock().unwrap().clone()
    }

    async fn close(&self) -> Result<()> {
        self.shared.record(DeviceCall::Close {
            connection: self.state.index,
        });
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        self.state.shut(CloseReason::Normal);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// Sinks & Archivers
// ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorded {
    events: Vec<RunnerEvent>,
    output: Vec<String>,
    finish_calls: Vec<String>,
    resets: usize,
}

/// A [`TestSink`] that only records what it receives.
///
/// Completes on `_XCT_didFinishExecutingTestPlan` and on `finish_with_error`.
pub struct RecordingSink {
    recorded: Mutex<Recorded>,
    done_tx: watch::Sender<bool>,
}

impl Default for RecordingSink {
    fn default() -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            recorded: Mutex::new(Recorded::default()),
            done_tx,
        }
    }
}

impl RecordingSink {
    pub fn events(&self) -> Vec<RunnerEvent> {
        self.recorded.lock().unwrap().events.clone()
    }

    pub fn output(&self) -> Vec<String> {
        self.recorded.lock().unwrap().output.clone()
    }

    pub fn finish_calls(&self) -> Vec<String> {
        self.recorded.lock().unwrap().finish_calls.clone()
    }

    pub fn resets(&self) -> usize {
        self.recorded.lock().unwrap().resets
    }
}

impl TestSink for RecordingSink {
    fn reset(&self) {
        let mut recorded = self.recorded.lock().unwrap();
        recorded.resets += 1;
        recorded.events.clear();
        recorded.finish_calls.clear();
        self.done_tx.send_replace(false);
    }

    fn finish_with_error(&self, error: String) {
        self.recorded.lock().unwrap().finish_calls.push(error);
        self.done_tx.send_replace(true);
    }

    fn done(&self) -> watch::Receiver<bool> {
        self.done_tx.subscribe()
    }

    fn suites(&self) -> Vec<TestSuite> {
        Vec::new()
    }

    fn error(&self) -> Option<String> {
        self.recorded.lock().unwrap().finish_calls.first().cloned()
    }

    fn write_output(&self, line: &str) {
        self.recorded.lock().unwrap().output.push(line.to_string());
    }

    fn on_event(&self, event: RunnerEvent) {
        let finished = event == RunnerEvent::PlanFinished;
        self.recorded.lock().unwrap().events.push(event);
        if finished {
            self.done_tx.send_replace(true);
        }
    }
}

/// Stand-in for the keyed archiver that encodes values as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonArchiver;

impl Archiver for JsonArchiver {
    fn archive(&self, value: &ArchivedValue) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn unarchive(&self, bytes: &[u8]) -> Result<ArchivedValue> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
