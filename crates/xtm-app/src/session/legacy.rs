//! Before iOS 14: one lockdown connection, pushed configuration, and the
//! runner announces its protocol version before the plan may start.

use xtm_core::prelude::*;
use xtm_core::{AppInfo, ProtocolGeneration, XcTestConfiguration};
use xtm_daemon::protocol::{self, CLIENT_TAG, XCODE_PATH};
use xtm_daemon::{DeviceServices, ProtocolProxy};

use super::launch::{launch_runner, pushed_config_request};
use super::termination::{
    self, first_of, plan_signals, RunnerSlot, SignalSource, TerminationSignal,
};
use super::{resolve_apps, Session, SessionContext, SessionState};
use crate::test_config::TestConfigBuilder;

const GENERATION: ProtocolGeneration = ProtocolGeneration::Legacy;
const VERSION: u64 = protocol::protocol_version_for(GENERATION);

pub(super) async fn run<D: DeviceServices>(
    ctx: &SessionContext<'_, D>,
    session: &mut Session,
) -> Result<()> {
    let (runner_app, target_app) = resolve_apps(ctx.device, ctx.config).await?;
    session.advance(SessionState::AppResolved);

    let (configuration, config_path) = TestConfigBuilder::new(
        ctx.config,
        &runner_app,
        target_app.as_ref(),
        session.id,
        VERSION,
    )
    .on_device(ctx.device, ctx.archiver)
    .await?;
    debug!("Test configuration pushed to {}", config_path);

    session.advance(SessionState::Connecting);
    let connection = ctx
        .device
        .open_connection(protocol::service_for(GENERATION))
        .await
        .context("Failed to open the testmanagerd connection")?;

    let mut runner = RunnerSlot::default();
    let result = drive(
        ctx,
        session,
        &connection,
        &runner_app,
        configuration,
        &config_path,
        &mut runner,
    )
    .await;

    session.advance(SessionState::Terminating);
    termination::teardown(
        ctx.device,
        ctx.sink.as_ref(),
        &[&connection],
        runner,
        result.as_ref().ok().copied(),
    )
    .await;

    result.map(|_| ())
}

fn signals<'a, D: DeviceServices>(
    ctx: &SessionContext<'_, D>,
    connection: &'a D::Connection,
) -> Vec<SignalSource<'a>> {
    plan_signals(&ctx.sink, ctx.cancel.clone(), &[connection])
}

async fn drive<D: DeviceServices>(
    ctx: &SessionContext<'_, D>,
    session: &mut Session,
    connection: &D::Connection,
    runner_app: &AppInfo,
    configuration: XcTestConfiguration,
    config_path: &str,
    runner: &mut RunnerSlot,
) -> Result<TerminationSignal> {
    let (mut ide, daemon) = ProtocolProxy::bind(connection, configuration, ctx.sink.clone()).await?;
    daemon
        .initiate_session_with_identifier(session.id, CLIENT_TAG, XCODE_PATH, VERSION)
        .await?;
    session.advance(SessionState::SessionNegotiated);

    let request = pushed_config_request(
        ctx.config,
        runner_app,
        session.id,
        config_path,
        GENERATION,
    );
    let pid = launch_runner(ctx.device, request, ctx.sink.clone(), runner).await?;
    session.advance(SessionState::RunnerLaunched);

    daemon
        .initiate_control_session_for_process(pid, VERSION)
        .await?;
    session.advance(SessionState::ControlAuthorized);

    tokio::select! {
        ready = ide.test_bundle_ready() => {
            let (version, minimum) = ready?;
            info!("Test bundle ready: protocol {} (minimum {})", version, minimum);
            session.protocol_version = Some(version);
            session.minimum_version = Some(minimum);
        }
        signal = first_of(signals(ctx, connection)) => {
            warn!("Session ended before the test bundle was ready: {:?}", signal);
            return Ok(signal);
        }
    }

    let driver = daemon.request_driver_channel().await?;
    daemon
        .start_executing_test_plan(driver, VERSION)
        .await?;
    session.advance(SessionState::PlanExecuting);

    Ok(first_of(signals(ctx, connection)).await)
}
