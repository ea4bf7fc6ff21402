//! iOS 14 to 16: secure lockdown service, two connections, pushed
//! configuration

use xtm_core::prelude::*;
use xtm_core::ProtocolGeneration;
use xtm_daemon::protocol::{self, CLIENT_TAG, XCODE_PATH};
use xtm_daemon::{DeviceServices, ProtocolProxy};

use super::launch::{launch_runner, pushed_config_request};
use super::termination::{self, close_all, first_of, plan_signals, RunnerSlot, TerminationSignal};
use super::{resolve_apps, Session, SessionContext, SessionState};
use crate::test_config::TestConfigBuilder;

const GENERATION: ProtocolGeneration = ProtocolGeneration::Mid;
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
    let result = async {
        let (_exec_ide, exec_daemon) =
            ProtocolProxy::bind(&exec, configuration.clone(), ctx.sink.clone()).await?;
        exec_daemon
            .initiate_session_with_identifier(session.id, CLIENT_TAG, XCODE_PATH, VERSION)
            .await?;

        let (_control_ide, control_daemon) =
            ProtocolProxy::bind(&control, configuration, ctx.sink.clone()).await?;
        control_daemon
            .initiate_control_session_with_protocol_version(VERSION)
            .await?;
        session.protocol_version = Some(VERSION);
        session.advance(SessionState::SessionNegotiated);

        let request = pushed_config_request(
            ctx.config,
            &runner_app,
            session.id,
            &config_path,
            GENERATION,
        );
        let pid = launch_runner(ctx.device, request, ctx.sink.clone(), &mut runner).await?;
        session.advance(SessionState::RunnerLaunched);

        control_daemon
            .initiate_control_session_for_process(pid, VERSION)
            .await?;
        session.advance(SessionState::ControlAuthorized);

        let driver = exec_daemon.request_driver_channel().await?;
        exec_daemon
            .start_executing_test_plan(driver, VERSION)
            .await?;
        session.advance(SessionState::PlanExecuting);

        Ok::<TerminationSignal, Error>(
            first_of(plan_signals(&ctx.sink, ctx.cancel.clone(), &[&exec, &control])).await,
        )
    }
    .await;

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
