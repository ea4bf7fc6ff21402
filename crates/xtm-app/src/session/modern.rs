//! iOS 17 and later: capability negotiation over two connections, in-memory
//! configuration

use xtm_core::prelude::*;
use xtm_core::{Capabilities, ProtocolGeneration};
use xtm_daemon::protocol;
use xtm_daemon::{DeviceServices, ProtocolProxy};

use super::launch::{launch_runner, modern_request};
use super::termination::{self, close_all, first_of, plan_signals, RunnerSlot, TerminationSignal};
use super::{resolve_apps, Session, SessionContext, SessionState};
use crate::test_config::TestConfigBuilder;

const GENERATION: ProtocolGeneration = ProtocolGeneration::Modern;
const VERSION: u64 = protocol::protocol_version_for(GENERATION);

pub(super) async fn run<D: DeviceServices>(
    ctx: &SessionContext<'_, D>,
    session: &mut Session,
) -> Result<()> {
    let service = protocol::service_for(GENERATION);
    session.advance(SessionState::Connecting);

    let exec = ctx
        .device
        .open_connection(service)
        .await
        .context("Failed to open the execution connection")?;
    let control = match ctx
        .device
        .open_connection(service)
        .await
        .context("Failed to open the control connection")
    {
        Ok(control) => control,
        Err(e) => {
            close_all(&[&exec]).await;
            return Err(e);
        }
    };

    let mut runner = RunnerSlot::default();
    let result = drive(ctx, session, &exec, &control, &mut runner).await;

    session.advance(SessionState::Terminating);
    termination::teardown(
        ctx.device,
        ctx.sink.as_ref(),
        &[&exec, &control],
        runner,
        result.as_ref().ok().copied(),
    )
    .await;

    result.map(|_| ())
}

async fn drive<D: DeviceServices>(
    ctx: &SessionContext<'_, D>,
    session: &mut Session,
    exec: &D::Connection,
    control: &D::Connection,
    runner: &mut RunnerSlot,
) -> Result<TerminationSignal> {
    let (runner_app, target_app) = resolve_apps(ctx.device, ctx.config).await?;
    session.advance(SessionState::AppResolved);

    let configuration = TestConfigBuilder::new(
        ctx.config,
        &runner_app,
        target_app.as_ref(),
        session.id,
        VERSION,
    )
    .in_memory();

    let (_exec_ide, exec_daemon) =
        ProtocolProxy::bind(exec, configuration.clone(), ctx.sink.clone()).await?;
    let remote = exec_daemon
        .initiate_session_with_capabilities(session.id, protocol::modern_local_capabilities())
        .await?;
    info!("testmanagerd capabilities: {:?}", remote);
    session.remote_capabilities = Some(remote);
    session.advance(SessionState::SessionNegotiated);

    let request = modern_request(ctx.config, &runner_app, session.id);
    let pid = launch_runner(ctx.device, request, ctx.sink.clone(), runner).await?;
    session.advance(SessionState::RunnerLaunched);

    let (_control_ide, control_daemon) =
        ProtocolProxy::bind(control, configuration, ctx.sink.clone()).await?;
    control_daemon
        .initiate_control_session_with_capabilities(Capabilities::new())
        .await?;
    if !control_daemon.authorize_test_session(pid).await? {
        return Err(Error::AuthorizationRefused { pid });
    }
    debug!("Test session authorized for pid {}", pid);
    session.advance(SessionState::ControlAuthorized);

    let driver = exec_daemon.request_driver_channel().await?;
    exec_daemon
        .start_executing_test_plan(driver, VERSION)
        .await?;
    session.protocol_version = Some(VERSION);
    session.advance(SessionState::PlanExecuting);

    Ok(first_of(plan_signals(&ctx.sink, ctx.cancel.clone(), &[exec, control])).await)
}
