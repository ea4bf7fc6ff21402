//! The end of every session: first-of-N termination race and teardown

use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::Arc;

use futures_util::future::select_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use xtm_core::prelude::*;
use xtm_daemon::{Connection, DeviceServices, KillOutcome, RunnerProcess, TestSink};

/// Recorded in the sink when a connection drops while tests run.
pub const LOST_CONNECTION: &str =
    "lost connection to testmanagerd. the test-runner may have been killed";

/// The event that ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    /// Connection at this index (execution = 0, control = 1) stopped
    ConnectionClosed(usize),
    /// The sink reported completion
    ListenerDone,
    /// External cancellation or deadline
    Cancelled,
}

pub type SignalSource<'a> = Pin<Box<dyn Future<Output = TerminationSignal> + Send + 'a>>;

/// Resolve with whichever source fires first; the others are dropped.
///
/// `sources` must not be empty.
pub async fn first_of(sources: Vec<SignalSource<'_>>) -> TerminationSignal {
    let (signal, _, _rest) = select_all(sources).await;
    debug!("Termination signal: {:?}", signal);
    signal
}

pub fn connection_closed<C>(connection: &C, index: usize) -> SignalSource<'_>
where
    C: Connection + Sync,
{
    Box::pin(async move {
        connection.closed().await;
        TerminationSignal::ConnectionClosed(index)
    })
}

pub fn sink_done(sink: &Arc<dyn TestSink>) -> SignalSource<'static> {
    let done = sink.done();
    Box::pin(async move {
        wait_until_true(done).await;
        TerminationSignal::ListenerDone
    })
}

pub fn cancelled(cancel: watch::Receiver<bool>) -> SignalSource<'static> {
    Box::pin(async move {
        wait_until_true(cancel).await;
        TerminationSignal::Cancelled
    })
}

/// Every way an executing plan can end, highest priority first.
///
/// `select_all` takes the first ready source, so a plan that already
/// finished wins over a connection that closed right after it. Connection
/// indices follow the order of `connections`.
pub fn plan_signals<'a, C>(
    sink: &Arc<dyn TestSink>,
    cancel: watch::Receiver<bool>,
    connections: &[&'a C],
) -> Vec<SignalSource<'a>>
where
    C: Connection + Sync,
{
    let mut sources: Vec<SignalSource<'a>> = vec![sink_done(sink), cancelled(cancel)];
    sources.extend(
        connections
            .iter()
            .enumerate()
            .map(|(index, connection)| connection_closed(*connection, index)),
    );
    sources
}

/// A sender dropped without ever flipping the flag never fires.
async fn wait_until_true(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|value| *value).await.is_err() {
        pending::<()>().await;
    }
}

/// The launched runner and its output forwarder, once there is one.
#[derive(Debug, Default)]
pub struct RunnerSlot {
    process: Option<RunnerProcess>,
    forwarder: Option<JoinHandle<()>>,
}

impl RunnerSlot {
    pub fn launched(&mut self, process: RunnerProcess, forwarder: JoinHandle<()>) {
        self.process = Some(process);
        self.forwarder = Some(forwarder);
    }

    pub fn pid(&self) -> Option<u64> {
        self.process.as_ref().map(RunnerProcess::pid)
    }
}

/// Release everything a session acquired. Consumes the runner slot, so it
/// runs at most once per session.
///
/// A connection that closed under us with an error fails the run in the
/// sink before anything else is torn down. A normal close fails nothing.
pub async fn teardown<D: DeviceServices>(
    device: &D,
    sink: &dyn TestSink,
    connections: &[&D::Connection],
    runner: RunnerSlot,
    signal: Option<TerminationSignal>,
) {
    if let Some(TerminationSignal::ConnectionClosed(index)) = signal {
        let closed = connections
            .get(index)
            .and_then(|connection| Some((connection, connection.last_error()?)));
        match closed {
            Some((connection, reason)) if !reason.is_normal() => {
                error!(
                    "Connection to {} closed unexpectedly: {}",
                    connection.service(),
                    reason
                );
                sink.finish_with_error(LOST_CONNECTION.to_string());
            }
            _ => info!("Connection {} closed normally", index),
        }
    }

    let RunnerSlot { process, forwarder } = runner;
    if let Some(process) = process {
        info!("Killing test runner with pid {} ...", process.pid());
        match process.kill(device).await {
            KillOutcome::Killed => debug!("Test runner killed"),
            KillOutcome::AlreadyExited => {
                info!("Nothing to kill, pid {} is already gone", process.pid())
            }
        }
    }
    if let Some(forwarder) = forwarder {
        forwarder.abort();
    }

    close_all(connections).await;
}

/// Close every connection, logging failures.
pub async fn close_all<C: Connection + Sync>(connections: &[&C]) {
    for connection in connections {
        if let Err(e) = connection.close().await {
            warn!("Failed to close connection to {}: {}", connection.service(), e);
        }
    }
}
