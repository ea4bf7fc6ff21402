//! Session orchestration for the three testmanagerd protocol generations
//!
//! Every orchestrator follows the same shape: set up the session, launch and
//! authorize the runner, start the test plan, then wait for the first
//! termination signal and tear down. Only the setup differs per generation:
//!
//! | generation | service | connections | configuration |
//! |---|---|---|---|
//! | legacy (< 14) | `com.apple.testmanagerd.lockdown` | 1 | pushed file, protocol 25 |
//! | mid (14 – 16) | `com.apple.testmanagerd.lockdown.secure` | 2 | pushed file, protocol 36 |
//! | modern (17+) | `com.apple.dt.testmanagerd.remote` | 2 | in memory, capabilities |

pub mod launch;
mod legacy;
mod mid;
mod modern;
pub mod termination;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use xtm_core::prelude::*;
use xtm_core::{AppInfo, Capabilities, ProtocolGeneration, SessionId, TestConfig, TestSuite};
use xtm_daemon::{resolve_app, Archiver, DeviceServices, TestSink};

/// Stages a session moves through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    AppResolved,
    SessionNegotiated,
    RunnerLaunched,
    ControlAuthorized,
    PlanExecuting,
    Terminating,
    Done,
}

/// One orchestration attempt. Never reused.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub generation: ProtocolGeneration,
    /// Version we asked for, or the one the test bundle announced (legacy)
    pub protocol_version: Option<u64>,
    /// Minimum version announced by the test bundle (legacy)
    pub minimum_version: Option<u64>,
    /// What the daemon told us it supports; logged, never enforced
    pub remote_capabilities: Option<Capabilities>,
    trail: Vec<SessionState>,
}

impl Session {
    pub fn new(generation: ProtocolGeneration) -> Self {
        Self {
            id: SessionId::new(),
            generation,
            protocol_version: None,
            minimum_version: None,
            remote_capabilities: None,
            trail: Vec::new(),
        }
    }

    pub(crate) fn advance(&mut self, state: SessionState) {
        debug!("Session {} -> {:?}", self.id, state);
        self.trail.push(state);
    }

    /// Every state visited so far.
    pub fn trail(&self) -> &[SessionState] {
        &self.trail
    }

    pub fn state(&self) -> Option<SessionState> {
        self.trail.last().copied()
    }
}

/// What one session produced: the sink's suites and recorded failure.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub suites: Vec<TestSuite>,
    /// Failure reported through the sink (lost connection, bootstrap error)
    pub failure: Option<String>,
    pub session: Session,
}

impl RunOutcome {
    fn collect(sink: &dyn TestSink, session: Session) -> Self {
        Self {
            suites: sink.suites(),
            failure: sink.error(),
            session,
        }
    }
}

/// Everything an orchestrator needs besides the device's protocol generation.
pub struct SessionContext<'a, D> {
    pub device: &'a D,
    pub config: &'a TestConfig,
    pub sink: Arc<dyn TestSink>,
    /// Encodes configurations pushed to pre-17 devices
    pub archiver: &'a dyn Archiver,
    /// Flips to `true` to stop the run; a dropped sender never cancels
    pub cancel: watch::Receiver<bool>,
}

/// Look up the runner and, for UI tests, the app under test in one listing.
async fn resolve_apps<D: DeviceServices>(
    device: &D,
    config: &TestConfig,
) -> Result<(AppInfo, Option<AppInfo>)> {
    let apps = device.browse_user_apps().await?;
    let runner = resolve_app(&config.test_runner_bundle_id, &apps)?;
    info!("Runner app: {} at {}", runner.bundle_id, runner.path);

    let target = match config.target_bundle_id() {
        Some(bundle_id) => {
            let target = resolve_app(bundle_id, &apps)?;
            info!("Target app: {} at {}", target.bundle_id, target.path);
            Some(target)
        }
        None => None,
    };
    Ok((runner, target))
}

/// The orchestrator for one protocol generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrchestrator {
    Legacy,
    Mid,
    Modern,
}

impl SessionOrchestrator {
    pub fn for_generation(generation: ProtocolGeneration) -> Self {
        match generation {
            ProtocolGeneration::Legacy => SessionOrchestrator::Legacy,
            ProtocolGeneration::Mid => SessionOrchestrator::Mid,
            ProtocolGeneration::Modern => SessionOrchestrator::Modern,
        }
    }

    pub fn generation(&self) -> ProtocolGeneration {
        match self {
            SessionOrchestrator::Legacy => ProtocolGeneration::Legacy,
            SessionOrchestrator::Mid => ProtocolGeneration::Mid,
            SessionOrchestrator::Modern => ProtocolGeneration::Modern,
        }
    }

    /// Run one test target to completion.
    ///
    /// Fatal setup errors are returned as `Err`; failures reported while the
    /// plan executes end up in [`RunOutcome::failure`]. Connections and the
    /// runner process are released on every path.
    pub async fn run<D: DeviceServices>(&self, ctx: &SessionContext<'_, D>) -> Result<RunOutcome> {
        let mut session = Session::new(self.generation());
        info!(
            "Starting {} test session {} for {}",
            session.generation, session.id, ctx.config.test_runner_bundle_id
        );

        let result = match self {
            SessionOrchestrator::Legacy => legacy::run(ctx, &mut session).await,
            SessionOrchestrator::Mid => mid::run(ctx, &mut session).await,
            SessionOrchestrator::Modern => modern::run(ctx, &mut session).await,
        };
        session.advance(SessionState::Done);

        match result {
            Ok(()) => {
                info!("Test session {} finished", session.id);
                Ok(RunOutcome::collect(ctx.sink.as_ref(), session))
            }
            Err(e) => {
                error!("Test session {} failed: {}", session.id, e);
                Err(e)
            }
        }
    }
}

impl fmt::Display for SessionOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.generation())
    }
}
